//! Configuration types for the plclog system
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Main logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Endpoint address (e.g. `opc.tcp://127.0.0.2:4840`)
    pub endpoint: String,

    /// Variables to monitor, in logging order
    pub variables: Vec<crate::catalog::VariableDescriptor>,

    /// Acquisition mode
    #[serde(default)]
    pub mode: AcquisitionMode,

    /// Poll period, or publish interval in subscription mode
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Destination of the durable log
    pub output_path: PathBuf,

    /// Directory for per-session run metadata (disabled when unset)
    #[serde(default)]
    pub metadata_dir: Option<PathBuf>,

    /// Period of the background snapshot task (disabled when unset)
    #[serde(default)]
    pub snapshot_interval_ms: Option<u64>,

    /// Transport selection
    #[serde(default)]
    pub transport: TransportConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl LoggerConfig {
    /// Create a configuration with defaults for everything optional
    pub fn new(
        endpoint: impl Into<String>,
        variables: Vec<crate::catalog::VariableDescriptor>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            variables,
            mode: AcquisitionMode::default(),
            interval_ms: default_interval_ms(),
            output_path: output_path.into(),
            metadata_dir: None,
            snapshot_interval_ms: None,
            transport: TransportConfig::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Validate the configuration
    ///
    /// Everything rejected here is a configuration error: the engine
    /// reports it and never starts.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.endpoint.trim().is_empty() {
            return Err(crate::Error::config("Endpoint cannot be empty"));
        }

        if self.variables.is_empty() {
            return Err(crate::Error::config("No variables configured"));
        }

        let mut seen = HashSet::new();
        for variable in &self.variables {
            if variable.identifier.is_empty() || variable.display_name.is_empty() {
                return Err(crate::Error::config(format!(
                    "Variable entry '{}={}' has an empty field",
                    variable.display_name, variable.identifier
                )));
            }
            if !seen.insert(variable.identifier.as_str()) {
                return Err(crate::Error::config(format!(
                    "Duplicate identifier: {}",
                    variable.identifier
                )));
            }
        }

        if self.interval_ms == 0 {
            return Err(crate::Error::config("Interval must be > 0"));
        }

        if self.output_path.as_os_str().is_empty() {
            return Err(crate::Error::config("Output path cannot be empty"));
        }

        if self.snapshot_interval_ms == Some(0) {
            return Err(crate::Error::config("Snapshot interval must be > 0"));
        }

        self.transport.validate()?;
        self.engine.validate()?;

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn snapshot_interval(&self) -> Option<Duration> {
        self.snapshot_interval_ms.map(Duration::from_millis)
    }
}

/// Acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// Batched read on a fixed cadence
    #[default]
    Poll,
    /// Server-pushed change notifications
    Subscribe,
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionMode::Poll => f.write_str("poll"),
            AcquisitionMode::Subscribe => f.write_str("subscribe"),
        }
    }
}

impl FromStr for AcquisitionMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "poll" => Ok(AcquisitionMode::Poll),
            "subscribe" => Ok(AcquisitionMode::Subscribe),
            other => Err(crate::Error::config(format!(
                "Unknown acquisition mode '{}'. Supported modes: poll, subscribe",
                other
            ))),
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// In-process simulated endpoint
    #[default]
    Simulated,

    /// Custom transport
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl TransportConfig {
    /// Validate the transport configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            TransportConfig::Simulated => Ok(()),
            TransportConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom transport factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom transport config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the transport type name
    pub fn type_name(&self) -> &str {
        match self {
            TransportConfig::Simulated => "simulated",
            TransportConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay between a failed session and the next connect attempt
    ///
    /// Retries are unbounded: the endpoint may come back arbitrarily late.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Upper bound on every single transport call
    ///
    /// A half-open connection would otherwise block a read forever.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long to wait for the snapshot task to finish before teardown
    #[serde(default = "default_snapshot_join_timeout_ms")]
    pub snapshot_join_timeout_ms: u64,

    /// Capacity of the engine event channel
    ///
    /// When full, events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.backoff_ms == 0 {
            return Err(crate::Error::config("Backoff must be > 0"));
        }
        if self.request_timeout_ms == 0 {
            return Err(crate::Error::config("Request timeout must be > 0"));
        }
        if self.snapshot_join_timeout_ms == 0 {
            return Err(crate::Error::config("Snapshot join timeout must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn snapshot_join_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_join_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            snapshot_join_timeout_ms: default_snapshot_join_timeout_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_backoff_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_snapshot_join_timeout_ms() -> u64 {
    2000
}

fn default_event_channel_capacity() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::VariableDescriptor;

    fn config() -> LoggerConfig {
        LoggerConfig::new(
            "opc.tcp://127.0.0.2:4840",
            vec![VariableDescriptor::new("ns=2;i=7", "C_TOTAL")],
            "logs/plc.ndjson",
        )
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.mode, AcquisitionMode::Poll);
        assert_eq!(config.interval(), Duration::from_secs(1));
        assert_eq!(config.engine.backoff(), Duration::from_secs(5));
    }

    #[test]
    fn test_deserialize_minimal_json() {
        let json = r#"{
            "endpoint": "opc.tcp://127.0.0.2:4840",
            "variables": [{"identifier": "ns=2;i=7", "display_name": "C_TOTAL"}],
            "mode": "subscribe",
            "interval_ms": 200,
            "output_path": "logs/plc.ndjson"
        }"#;
        let config: LoggerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.mode, AcquisitionMode::Subscribe);
        assert_eq!(config.interval_ms, 200);
        assert!(matches!(config.transport, TransportConfig::Simulated));
        assert_eq!(config.engine.request_timeout_ms, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut empty = config();
        empty.variables.clear();
        assert!(matches!(empty.validate(), Err(crate::Error::Config(_))));

        let mut zero_interval = config();
        zero_interval.interval_ms = 0;
        assert!(zero_interval.validate().is_err());

        let mut duplicate = config();
        duplicate
            .variables
            .push(VariableDescriptor::new("ns=2;i=7", "AGAIN"));
        assert!(duplicate.validate().is_err());

        let mut zero_snapshot = config();
        zero_snapshot.snapshot_interval_ms = Some(0);
        assert!(zero_snapshot.validate().is_err());

        let mut zero_backoff = config();
        zero_backoff.engine.backoff_ms = 0;
        assert!(zero_backoff.validate().is_err());
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("POLL".parse::<AcquisitionMode>().unwrap(), AcquisitionMode::Poll);
        assert_eq!(
            "subscribe".parse::<AcquisitionMode>().unwrap(),
            AcquisitionMode::Subscribe
        );
        assert!("push".parse::<AcquisitionMode>().is_err());
    }
}
