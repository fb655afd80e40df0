//! Static catalog of monitored variables
//!
//! The catalog is built once from configuration and never changes while the
//! engine runs. Order is preserved: read cycles and snapshots follow it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Error, Result};

/// Logical variable: a protocol address plus a human-readable name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableDescriptor {
    /// Opaque protocol address (e.g. `ns=2;i=7`)
    pub identifier: String,
    /// Name written to the log (e.g. `C_TOTAL`)
    pub display_name: String,
}

impl VariableDescriptor {
    pub fn new(identifier: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
        }
    }

    /// Parse the `DISPLAY_NAME=identifier` form
    ///
    /// Splits at the first `=`, since identifiers such as `ns=2;i=7`
    /// contain `=` themselves.
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, identifier) = spec.split_once('=').ok_or_else(|| {
            Error::config(format!(
                "Variable '{}' must be written as DISPLAY_NAME=identifier",
                spec
            ))
        })?;

        let descriptor = Self::new(identifier.trim(), name.trim());
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> Result<()> {
        if self.identifier.is_empty() {
            return Err(Error::config(format!(
                "Variable '{}' has an empty identifier",
                self.display_name
            )));
        }
        if self.display_name.is_empty() {
            return Err(Error::config(format!(
                "Variable '{}' has an empty display name",
                self.identifier
            )));
        }
        Ok(())
    }
}

/// Immutable, ordered, non-empty set of variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableCatalog {
    variables: Vec<VariableDescriptor>,
}

impl VariableCatalog {
    /// Build a catalog
    ///
    /// An empty list, an empty field or a duplicate identifier is a
    /// configuration error: the engine refuses to start on it.
    pub fn new(variables: Vec<VariableDescriptor>) -> Result<Self> {
        if variables.is_empty() {
            return Err(Error::config("Variable catalog is empty"));
        }

        let mut seen = HashSet::new();
        for variable in &variables {
            variable.validate()?;
            if !seen.insert(variable.identifier.as_str()) {
                return Err(Error::config(format!(
                    "Duplicate identifier in catalog: {}",
                    variable.identifier
                )));
            }
        }

        Ok(Self { variables })
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.variables.iter()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Always `false`; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn get(&self, identifier: &str) -> Option<&VariableDescriptor> {
        self.variables.iter().find(|v| v.identifier == identifier)
    }
}
