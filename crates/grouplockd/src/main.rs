// # grouplockd - Group Attribute Guard Daemon
//
// This is a THIN integration layer only:
// 1. Reads configuration from environment variables
// 2. Initializes the runtime and tracing
// 3. Registers gateway and store adapters
// 4. Starts the guard engine and logs its events
//
// All enforcement logic lives in grouplock-core.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Gateway
// - `GROUPLOCK_GATEWAY_URL`: Base URL of the HTTP bridge (required)
// - `GROUPLOCK_GATEWAY_TOKEN`: Bearer token for the bridge (required)
// - `GROUPLOCK_EVENT_POLL_SECS`: Event poll interval in seconds
//
// ### Lock Store
// - `GROUPLOCK_STORE_TYPE`: Type of lock store (file, memory)
// - `GROUPLOCK_STORE_PATH`: Path to state file (for file store)
//
// ### Engine
// - `GROUPLOCK_NAME_CHECK_SECS`: Name sweep period
// - `GROUPLOCK_NAME_DEBOUNCE_SECS`: Name drift grace window
// - `GROUPLOCK_BURST_LIMIT`: Corrections before cooldown trips
// - `GROUPLOCK_COOLDOWN_SECS`: Cooldown duration
// - `GROUPLOCK_MAX_CONCURRENT`: Global in-flight mutation cap
//
// ### Logging
// - `GROUPLOCK_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export GROUPLOCK_GATEWAY_URL=https://bridge.internal:8443
// export GROUPLOCK_GATEWAY_TOKEN=your_token
// export GROUPLOCK_STORE_TYPE=file
// export GROUPLOCK_STORE_PATH=/var/lib/grouplock/state.json
//
// grouplockd
// ```

use anyhow::Result;
use std::env;
use std::process::ExitCode;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use grouplock_core::{
    AdapterRegistry, EngineConfig, EngineEvent, GatewayConfig, GuardConfig, GuardEngine,
    StoreConfig,
};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum GuardExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<GuardExitCode> for ExitCode {
    fn from(code: GuardExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    gateway_url: String,
    gateway_token: String,
    event_poll_secs: u64,
    store_type: String,
    store_path: Option<String>,
    name_check_secs: Option<u64>,
    name_debounce_secs: Option<u64>,
    burst_limit: Option<u32>,
    cooldown_secs: Option<u64>,
    max_concurrent: Option<usize>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            gateway_url: env::var("GROUPLOCK_GATEWAY_URL").map_err(|_| {
                anyhow::anyhow!(
                    "GROUPLOCK_GATEWAY_URL is required. \
                    Set it via: export GROUPLOCK_GATEWAY_URL=https://bridge.internal:8443"
                )
            })?,
            gateway_token: env::var("GROUPLOCK_GATEWAY_TOKEN").map_err(|_| {
                anyhow::anyhow!(
                    "GROUPLOCK_GATEWAY_TOKEN is required. \
                    Set it via: export GROUPLOCK_GATEWAY_TOKEN=your_token"
                )
            })?,
            event_poll_secs: env::var("GROUPLOCK_EVENT_POLL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            store_type: env::var("GROUPLOCK_STORE_TYPE").unwrap_or_else(|_| "file".to_string()),
            store_path: env::var("GROUPLOCK_STORE_PATH").ok(),
            name_check_secs: env::var("GROUPLOCK_NAME_CHECK_SECS")
                .ok()
                .and_then(|s| s.parse().ok()),
            name_debounce_secs: env::var("GROUPLOCK_NAME_DEBOUNCE_SECS")
                .ok()
                .and_then(|s| s.parse().ok()),
            burst_limit: env::var("GROUPLOCK_BURST_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok()),
            cooldown_secs: env::var("GROUPLOCK_COOLDOWN_SECS")
                .ok()
                .and_then(|s| s.parse().ok()),
            max_concurrent: env::var("GROUPLOCK_MAX_CONCURRENT")
                .ok()
                .and_then(|s| s.parse().ok()),
            log_level: env::var("GROUPLOCK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration before any network activity
    fn validate(&self) -> Result<()> {
        if !self.gateway_url.starts_with("https://") && !self.gateway_url.starts_with("http://") {
            anyhow::bail!(
                "GROUPLOCK_GATEWAY_URL must use HTTP or HTTPS scheme. Got: {}",
                self.gateway_url
            );
        }

        // Warn if using HTTP (not HTTPS)
        if self.gateway_url.starts_with("http://") {
            eprintln!(
                "WARNING: GROUPLOCK_GATEWAY_URL uses HTTP (not HTTPS). \
                This is less secure. Consider using HTTPS."
            );
        }

        if self.gateway_token.is_empty() {
            anyhow::bail!("GROUPLOCK_GATEWAY_TOKEN cannot be empty");
        }

        // Check for obvious placeholder tokens (common mistake)
        let token_lower = self.gateway_token.to_lowercase();
        if token_lower.contains("your_token")
            || token_lower.contains("replace_me")
            || token_lower == "token"
        {
            anyhow::bail!(
                "GROUPLOCK_GATEWAY_TOKEN appears to be a placeholder. \
                Use an actual bridge token."
            );
        }

        match self.store_type.as_str() {
            "file" | "memory" => {}
            _ => anyhow::bail!(
                "GROUPLOCK_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                self.store_type
            ),
        }

        if self.store_type == "file" {
            match self.store_path {
                Some(ref path) if !path.is_empty() => {}
                _ => anyhow::bail!(
                    "GROUPLOCK_STORE_PATH is required when GROUPLOCK_STORE_TYPE=file. \
                    Set it via: export GROUPLOCK_STORE_PATH=/var/lib/grouplock/state.json"
                ),
            }
        }

        if !(1..=300).contains(&self.event_poll_secs) {
            anyhow::bail!(
                "GROUPLOCK_EVENT_POLL_SECS must be between 1 and 300. Got: {}",
                self.event_poll_secs
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "GROUPLOCK_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    fn guard_config(&self) -> GuardConfig {
        let gateway = GatewayConfig::Http {
            base_url: self.gateway_url.clone(),
            auth_token: self.gateway_token.clone(),
            event_poll_secs: self.event_poll_secs,
        };

        let store = match self.store_type.as_str() {
            "memory" => StoreConfig::Memory,
            _ => StoreConfig::File {
                path: self.store_path.clone().unwrap_or_default(),
            },
        };

        let mut engine = EngineConfig::default();
        if let Some(v) = self.name_check_secs {
            engine.name_check_interval_secs = v;
        }
        if let Some(v) = self.name_debounce_secs {
            engine.name_debounce_secs = v;
        }
        if let Some(v) = self.burst_limit {
            engine.correction_burst_limit = v;
        }
        if let Some(v) = self.cooldown_secs {
            engine.cooldown_secs = v;
        }
        if let Some(v) = self.max_concurrent {
            engine.max_concurrent_mutations = v;
        }

        GuardConfig {
            gateway,
            store,
            engine,
        }
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return GuardExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return GuardExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return GuardExitCode::ConfigError.into();
    }

    info!("Starting grouplockd daemon");

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return GuardExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {}", e);
            GuardExitCode::RuntimeError
        } else {
            GuardExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    // Create adapter registry and register built-in adapters
    let registry = AdapterRegistry::new();

    #[cfg(feature = "http")]
    {
        info!("Registering HTTP bridge gateway");
        grouplock_gateway_http::register(&registry);
    }

    registry.register_store(
        "file",
        Box::new(grouplock_core::state::FileLockStoreFactory),
    );
    registry.register_store(
        "memory",
        Box::new(grouplock_core::state::MemoryLockStoreFactory),
    );

    let guard_config = config.guard_config();
    info!("Gateway type: {}", guard_config.gateway.type_name());
    info!("Store type: {}", guard_config.store.type_name());

    let gateway = registry.create_gateway(&guard_config.gateway)?;
    let store = registry.create_store(&guard_config.store).await?;

    let (engine, mut events, _commands) = GuardEngine::new(gateway, store, guard_config).await?;

    // Consume engine events for operational logging
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(event);
        }
    });

    // Bridge OS signals to the engine's shutdown channel so SIGTERM is
    // honored as well as SIGINT.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let reason = wait_for_shutdown().await;
        info!("Received shutdown signal: {}", reason);
        let _ = shutdown_tx.send(());
    });

    info!("Starting guard engine");
    engine.run_with_shutdown(Some(shutdown_rx)).await?;
    info!("Shutting down daemon");

    Ok(())
}

fn log_event(event: EngineEvent) {
    match event {
        EngineEvent::Started { entities } => {
            info!("Engine started, watching {} entities", entities);
        }
        EngineEvent::DriftDetected { entity, attribute } => {
            info!("Drift detected on {} ({})", entity, attribute);
        }
        EngineEvent::DriftSuppressed { entity } => {
            info!("Drift on {} suppressed (cooldown)", entity);
        }
        EngineEvent::CorrectionEnqueued { entity, .. } => {
            info!("Correction enqueued for {}", entity);
        }
        EngineEvent::CorrectionApplied { entity, .. } => {
            info!("Correction applied for {}", entity);
        }
        EngineEvent::CorrectionSkipped { entity } => {
            info!("Correction skipped for {}", entity);
        }
        EngineEvent::CorrectionFailed { entity, error } => {
            warn!("Correction failed for {}: {}", entity, error);
        }
        EngineEvent::CooldownEntered { entity } => {
            warn!("Cooldown entered for {}", entity);
        }
        EngineEvent::CooldownLifted { entity, resync } => {
            info!("Cooldown lifted for {} (resync: {})", entity, resync);
        }
        EngineEvent::ResyncCompleted { entity, applied } => {
            info!("Resync completed for {} ({} applied)", entity, applied);
        }
        EngineEvent::EntityRemoved { entity } => {
            warn!("Entity {} removed from watch set", entity);
        }
        EngineEvent::ThrottlePaused { secs } => {
            warn!("Throttle paused for {}s after rate limit", secs);
        }
        EngineEvent::Stopped { reason } => {
            info!("Engine stopped: {}", reason);
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
#[cfg(unix)]
async fn wait_for_shutdown() -> &'static str {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to setup SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to setup SIGINT handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

/// Fallback implementation for non-Unix platforms (SIGINT only).
#[cfg(not(unix))]
async fn wait_for_shutdown() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}
