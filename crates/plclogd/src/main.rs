// # plclogd - PLC Variable Logging Daemon
//
// This is a thin integration layer. Acquisition, change detection,
// reconnection and durable logging all live in plclog-core.
//
// The plclogd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering transports
// 4. Running the acquisition engine until SIGINT/SIGTERM
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Endpoint
// - `PLCLOG_ENDPOINT`: Endpoint address (e.g. `opc.tcp://127.0.0.2:4840`)
// - `PLCLOG_TRANSPORT`: Transport factory name (default `simulated`)
// - `PLCLOG_TRANSPORT_CONFIG`: JSON configuration for a non-simulated transport
// - `PLCLOG_VARIABLES`: Comma-separated `DISPLAY_NAME=identifier` list
//
// ### Acquisition
// - `PLCLOG_MODE`: `poll` or `subscribe` (default `poll`)
// - `PLCLOG_INTERVAL_MS`: Poll period / publish interval (default 1000)
// - `PLCLOG_SNAPSHOT_INTERVAL_MS`: Enables periodic snapshot entries
//
// ### Output
// - `PLCLOG_OUTPUT_PATH`: Durable log file (NDJSON)
// - `PLCLOG_METADATA_DIR`: Directory for per-session run metadata (optional)
//
// ### Engine
// - `PLCLOG_BACKOFF_MS`: Delay before reconnecting (default 5000)
// - `PLCLOG_REQUEST_TIMEOUT_MS`: Bound on every transport call (default 10000)
// - `PLCLOG_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ### Simulated transport
// - `PLCLOG_SIM_LINE_PERIOD_MS`: How often the simulated line moves a part
//   (default 1000, 0 keeps it still)
//
// ## Example
//
// ```bash
// export PLCLOG_ENDPOINT=opc.tcp://127.0.0.2:4840
// export PLCLOG_VARIABLES='C_TOTAL=ns=2;i=7,Diffuse_Sensor_0=ns=2;i=10'
// export PLCLOG_MODE=subscribe
// export PLCLOG_OUTPUT_PATH=/var/lib/plclog/sorting_line.ndjson
// export PLCLOG_METADATA_DIR=/var/lib/plclog/runs
//
// plclogd
// ```

use anyhow::{Context, Result};
use plclog_core::{
    AcquisitionEngine, AcquisitionMode, DurableLogWriter, EngineEvent, ErrorClass, LoggerConfig,
    RunMetadataStore, TransportConfig, TransportRegistry, VariableDescriptor,
};
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
#[cfg(feature = "sim")]
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (storage failure, unexpected)
#[derive(Debug, Clone, Copy)]
enum PlclogExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error
    RuntimeError = 2,
}

impl From<PlclogExitCode> for ExitCode {
    fn from(code: PlclogExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration
struct Config {
    logger: LoggerConfig,
    log_level: Level,
    sim_line_period_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let endpoint = env::var("PLCLOG_ENDPOINT").context(
            "PLCLOG_ENDPOINT is required. \
            Set it via: export PLCLOG_ENDPOINT=opc.tcp://127.0.0.2:4840",
        )?;
        let output_path = env::var("PLCLOG_OUTPUT_PATH").context(
            "PLCLOG_OUTPUT_PATH is required. \
            Set it via: export PLCLOG_OUTPUT_PATH=/var/lib/plclog/log.ndjson",
        )?;

        let variables = env::var("PLCLOG_VARIABLES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(VariableDescriptor::parse)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut logger = LoggerConfig::new(endpoint, variables, output_path);

        if let Ok(mode) = env::var("PLCLOG_MODE") {
            logger.mode = AcquisitionMode::from_str(&mode)?;
        }
        if let Some(interval) = parse_u64("PLCLOG_INTERVAL_MS")? {
            logger.interval_ms = interval;
        }
        logger.snapshot_interval_ms = parse_u64("PLCLOG_SNAPSHOT_INTERVAL_MS")?;
        logger.metadata_dir = env::var("PLCLOG_METADATA_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(Into::into);
        if let Some(backoff) = parse_u64("PLCLOG_BACKOFF_MS")? {
            logger.engine.backoff_ms = backoff;
        }
        if let Some(timeout) = parse_u64("PLCLOG_REQUEST_TIMEOUT_MS")? {
            logger.engine.request_timeout_ms = timeout;
        }

        logger.transport = match env::var("PLCLOG_TRANSPORT").as_deref() {
            Err(_) | Ok("simulated") => TransportConfig::Simulated,
            Ok(factory) => {
                let raw = env::var("PLCLOG_TRANSPORT_CONFIG").unwrap_or_else(|_| "{}".to_string());
                let config = serde_json::from_str(&raw)
                    .context("PLCLOG_TRANSPORT_CONFIG must be a JSON document")?;
                TransportConfig::Custom {
                    factory: factory.to_string(),
                    config,
                }
            }
        };

        let log_level = match env::var("PLCLOG_LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string())
            .to_lowercase()
            .as_str()
        {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            other => anyhow::bail!(
                "PLCLOG_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                other
            ),
        };

        Ok(Self {
            logger,
            log_level,
            sim_line_period_ms: parse_u64("PLCLOG_SIM_LINE_PERIOD_MS")?.unwrap_or(1000),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.logger.validate()?;

        if let Some(parent) = self.logger.output_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "PLCLOG_OUTPUT_PATH parent directory does not exist: {}. \
                Create it first: mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        Ok(())
    }
}

/// Read an optional numeric variable
fn parse_u64(name: &str) -> Result<Option<u64>> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} must be a non-negative integer. Got: {}", name, raw)),
        _ => Ok(None),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return PlclogExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return PlclogExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return PlclogExitCode::ConfigError.into();
    }

    info!("Starting plclogd daemon");
    info!(
        "Configuration loaded: {} variable(s), mode {}",
        config.logger.variables.len(),
        config.logger.mode
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return PlclogExitCode::RuntimeError.into();
        }
    };

    rt.block_on(run_daemon(config)).into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> PlclogExitCode {
    let registry = TransportRegistry::new();
    let shutdown = CancellationToken::new();

    #[cfg(feature = "sim")]
    {
        info!("Registering simulated transport");
        let endpoint = plclog_sim::SimulatedEndpoint::sorting_line();
        if config.sim_line_period_ms > 0 && config.logger.transport.type_name() == "simulated" {
            let period = Duration::from_millis(config.sim_line_period_ms);
            let endpoint = endpoint.clone();
            let line = shutdown.child_token();
            tokio::spawn(async move { endpoint.run_line(period, line).await });
        }
        plclog_sim::register(&registry, endpoint);
    }

    #[cfg(not(feature = "sim"))]
    let _ = config.sim_line_period_ms;

    let transport = match registry.create_transport(&config.logger.endpoint, &config.logger.transport) {
        Ok(transport) => transport,
        Err(e) => {
            error!(
                "Failed to create transport '{}': {} (available: {:?})",
                config.logger.transport.type_name(),
                e,
                registry.list_transports()
            );
            return PlclogExitCode::ConfigError;
        }
    };

    let writer = match DurableLogWriter::open(&config.logger.output_path).await {
        Ok(writer) => writer,
        Err(e) => {
            error!(
                "Failed to open log {}: {}",
                config.logger.output_path.display(),
                e
            );
            return PlclogExitCode::RuntimeError;
        }
    };
    let metadata = config.logger.metadata_dir.as_ref().map(RunMetadataStore::new);

    let (engine, events) =
        match AcquisitionEngine::new(transport, Arc::new(writer), metadata, config.logger) {
            Ok(pair) => pair,
            Err(e) => {
                error!("Failed to create engine: {}", e);
                return PlclogExitCode::ConfigError;
            }
        };

    tokio::spawn(log_events(events));

    let signals = shutdown.clone();
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Signal handling error: {}; shutting down", e),
        }
        signals.cancel();
    });

    match engine.run(shutdown).await {
        Ok(()) => {
            info!("Daemon stopped cleanly");
            PlclogExitCode::CleanShutdown
        }
        Err(e) => {
            error!("Engine stopped with {} error: {}", e.class(), e);
            match e.class() {
                ErrorClass::Configuration => PlclogExitCode::ConfigError,
                _ => PlclogExitCode::RuntimeError,
            }
        }
    }
}

/// Drain engine events into the log
async fn log_events(mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::Connected {
                session_id,
                resolved,
                dropped,
            } => info!(
                "Session {} connected: {} resolved, {} dropped",
                session_id, resolved, dropped
            ),
            EngineEvent::SessionFailed { class, error } => {
                warn!("Session failed ({}): {}", class, error)
            }
            EngineEvent::Stopped { reason } => info!("Engine stopped: {}", reason),
            other => debug!("Engine event: {:?}", other),
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
