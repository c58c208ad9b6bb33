//! Engine orchestration -- assembly, store wiring, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `rulekeeper-daemon`.
//! It loads configuration, opens the detection and settings stores, builds
//! the enabled engines, and runs until a shutdown signal arrives.
//!
//! # Startup Order
//!
//! 1. Strelka (YARA)
//! 2. Suricata
//! 3. ElastAlert (Sigma)
//!
//! # Shutdown Order (reverse of startup)
//!
//! Each engine cancels its sync loop and integrity checker and waits for
//! them to exit before the next one is stopped.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::broadcast;

use rulekeeper_core::config::RulekeeperConfig;
use rulekeeper_core::event::{SyncNotifier, SyncStatus};
use rulekeeper_core::pipeline::HealthStatus;
use rulekeeper_core::registry::EngineRegistry;
use rulekeeper_core::store::{MemoryDetectionStore, MemorySettingsStore};
use rulekeeper_core::types::{EngineKind, EngineStateSnapshot};
use rulekeeper_engines::{ElastAlertEngine, EngineContext, StrelkaEngine, SuricataEngine};

use crate::health::{DaemonHealth, EngineHealth, aggregate_status};
use crate::metrics_server;

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: RulekeeperConfig,
    /// Registered engines (ordered for start/stop).
    engines: EngineRegistry,
    /// Sync status broadcast shared by all engines.
    notifier: SyncNotifier,
    /// Shutdown broadcast sender (signals all background tasks).
    shutdown_tx: broadcast::Sender<()>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read, parsed or
    /// validated, or if any enabled engine fails to build.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = RulekeeperConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    pub async fn build_from_config(config: RulekeeperConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let store = MemoryDetectionStore::open(&config.store.path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to open detection store: {}", e))?;
        store.add_template(&config.store.template_name);
        let store = Arc::new(store);

        let settings = Arc::new(
            MemorySettingsStore::open(&config.store.settings_path)
                .await
                .map_err(|e| anyhow::anyhow!("failed to open settings store: {}", e))?,
        );

        let notifier = SyncNotifier::new();
        let context = EngineContext::new(store, notifier.clone(), &config.store.template_name);
        let mut engines = EngineRegistry::new();

        if config.strelka.enabled {
            tracing::info!("initializing strelka engine");
            let engine = StrelkaEngine::new(config.strelka.clone(), context.clone())
                .map_err(|e| anyhow::anyhow!("failed to build strelka engine: {}", e))?;
            engines.register(Arc::new(engine))?;
        }

        if config.suricata.enabled {
            tracing::info!("initializing suricata engine");
            let engine = SuricataEngine::new(config.suricata.clone(), context.clone(), settings)
                .map_err(|e| anyhow::anyhow!("failed to build suricata engine: {}", e))?;
            engines.register(Arc::new(engine))?;
        }

        if config.elastalert.enabled {
            tracing::info!("initializing elastalert engine");
            let engine = ElastAlertEngine::new(config.elastalert.clone(), context)
                .map_err(|e| anyhow::anyhow!("failed to build elastalert engine: {}", e))?;
            engines.register(Arc::new(engine))?;
        }

        tracing::info!(total_engines = engines.count(), "orchestrator initialized");

        if config.metrics.enabled {
            record_daemon_metrics(engines.count());
        }

        let (shutdown_tx, _) = broadcast::channel(16);

        Ok(Self {
            config,
            engines,
            notifier,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Start all enabled engines and block until a shutdown signal is received.
    ///
    /// # Shutdown Triggers
    ///
    /// - `SIGTERM` (from systemd, Docker, or `kill`)
    /// - `SIGINT` (Ctrl+C)
    pub async fn run(&self) -> Result<()> {
        let pid_file = self.pid_file();
        if let Some(path) = pid_file {
            write_pid_file(path)?;
        }

        // Subscribe before starting so the first cycle's status is not missed
        let status_rx = self.notifier.subscribe();

        tracing::info!("starting all engines");
        if let Err(e) = self.engines.start_all().await {
            tracing::warn!("startup failed, rolling back already-started engines");
            if let Err(stop_err) = self.engines.stop_all().await {
                tracing::error!(
                    startup_error = %e,
                    rollback_error = %stop_err,
                    "rollback also failed during startup failure cleanup"
                );
            }
            if let Some(path) = pid_file {
                remove_pid_file(path);
            }
            return Err(e.into());
        }

        let status_logger = spawn_status_logger(status_rx, self.shutdown_tx.subscribe());
        let uptime_updater = self
            .config
            .metrics
            .enabled
            .then(|| spawn_uptime_updater(self.start_time, self.shutdown_tx.subscribe()));

        tracing::info!("entering main loop");
        let signal = wait_for_shutdown_signal().await?;
        tracing::info!(signal = signal, "shutdown signal received");

        let _ = self.shutdown_tx.send(());
        let _ = status_logger.await;
        if let Some(task) = uptime_updater {
            let _ = task.await;
        }

        let result = self.shutdown().await;

        if let Some(path) = pid_file {
            remove_pid_file(path);
        }

        result
    }

    /// Stop all engines in reverse registration order.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("stopping all engines");
        self.engines.stop_all().await.map_err(|e| e.into())
    }

    /// Get the current aggregated health status.
    ///
    /// Engines disabled in configuration are listed with `enabled: false`.
    pub async fn health(&self) -> DaemonHealth {
        let statuses = self.engines.health_check_all().await;
        let states = self.engines.states();

        let engines: Vec<EngineHealth> = EngineKind::ALL
            .iter()
            .map(|kind| {
                let status = statuses.iter().find(|(k, _)| k == kind).map(|(_, s)| s.clone());
                let state = states
                    .iter()
                    .find(|(k, _)| k == kind)
                    .map(|(_, s)| *s)
                    .unwrap_or_default();
                EngineHealth {
                    name: kind.as_str().to_owned(),
                    enabled: status.is_some(),
                    status: status.unwrap_or(HealthStatus::Healthy),
                    state,
                }
            })
            .collect();

        let uptime_secs = self.start_time.elapsed().as_secs();
        if self.config.metrics.enabled {
            use rulekeeper_core::metrics as m;
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
        }

        DaemonHealth {
            status: aggregate_status(&engines),
            uptime_secs,
            engines,
        }
    }

    /// Kinds of the registered engines, in startup order.
    pub fn engine_kinds(&self) -> Vec<EngineKind> {
        self.engines.kinds()
    }

    /// Per-engine state flags.
    pub fn engine_states(&self) -> Vec<(EngineKind, EngineStateSnapshot)> {
        self.engines.states()
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &RulekeeperConfig {
        &self.config
    }

    fn pid_file(&self) -> Option<&Path> {
        let path = self.config.general.pid_file.as_str();
        (!path.is_empty()).then(|| Path::new(path))
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to a file.
///
/// # Security
///
/// - Uses `create_new(true)` to atomically create the file
/// - Verifies the created file is a regular file
/// - Creates the parent directory with restrictive permissions (0o700)
///
/// # Errors
///
/// Returns an error if the file already exists or cannot be written.
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new().mode(0o700).recursive(true).create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on daemon shutdown. Failures are only logged.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

/// Spawn a background task that logs every sync cycle outcome.
fn spawn_status_logger(
    mut status_rx: broadcast::Receiver<SyncStatus>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = status_rx.recv() => {
                    match received {
                        Ok(status) => {
                            tracing::info!(
                                engine = %status.engine,
                                status = %status.status,
                                "engine sync status"
                            );
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped = skipped, "sync status logger lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::debug!("sync status channel closed, exiting logger");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("sync status logger shutting down");
                    break;
                }
            }
        }
    })
}

/// Record daemon-level metrics (build info, engines registered).
fn record_daemon_metrics(engine_count: usize) {
    use rulekeeper_core::metrics as m;

    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);

    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!(m::DAEMON_ENGINES_REGISTERED).set(engine_count as f64);

    tracing::debug!(
        engine_count = engine_count,
        version = env!("CARGO_PKG_VERSION"),
        "daemon metrics recorded"
    );
}

/// Spawn a background task that refreshes the uptime gauge every 10 seconds.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    use rulekeeper_core::metrics as m;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
