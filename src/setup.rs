//! Wiring shared by the subcommands: logging, store and scheduler.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tickwork_config::{Config, LoggingConfig, StoreBackend, StoreConfig};
use tickwork_core::{Scheduler, SchedulerConfig, TaskRegistry};
use tickwork_protocols::JobStore;
use tickwork_store::{FileJobStore, MemoryJobStore, SqliteJobStore};

/// `~/.tickwork`, or `./.tickwork` without a home directory.
pub(crate) fn tickwork_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".tickwork"))
        .unwrap_or_else(|| PathBuf::from(".tickwork"))
}

/// Install the console layer and, if enabled, a daily-rolling file layer.
///
/// `RUST_LOG` overrides the configured level.
pub(crate) fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let file_layer = if logging.file {
        let log_dir = logging
            .directory
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| tickwork_dir().join("logs"));
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

        let mut builder = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("tickwork")
            .filename_suffix("log");
        if logging.max_log_files > 0 {
            builder = builder.max_log_files(logging.max_log_files);
        }
        let file_appender = builder
            .build(&log_dir)
            .context("failed to create log file appender")?;

        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = GUARD.set(guard);
        Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}

pub(crate) async fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    let path = || {
        config
            .path
            .as_deref()
            .map(PathBuf::from)
            .with_context(|| format!("store.path is required for the {:?} backend", config.backend))
    };

    let store: Arc<dyn JobStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryJobStore::new()),
        StoreBackend::File => {
            let path = path()?;
            Arc::new(
                FileJobStore::new(&path)
                    .await
                    .with_context(|| format!("failed to open job directory {}", path.display()))?,
            )
        }
        StoreBackend::Sqlite => {
            let path = path()?;
            Arc::new(
                SqliteJobStore::open(&path)
                    .await
                    .with_context(|| format!("failed to open database {}", path.display()))?,
            )
        }
    };
    Ok(store)
}

pub(crate) fn scheduler_config(config: &Config) -> SchedulerConfig {
    let section = &config.scheduler;
    SchedulerConfig {
        instance_id: section.instance_id.clone(),
        max_concurrent_jobs: section.max_concurrent_jobs,
        default_max_retries: section.default_max_retries,
        job_expiration_days: section.job_expiration_days,
        check_interval: section.check_interval(),
        execution_timeout: section.execution_timeout(),
        create_job_rate_per_minute: config.rate_limits.create_job_per_minute(),
        trigger_job_rate_per_minute: config.rate_limits.trigger_job_per_minute(),
        lease_grace: section.lease_grace(),
        max_payload_bytes: section.max_payload_bytes,
    }
}

pub(crate) async fn build_scheduler(
    config: &Config,
    registry: Arc<TaskRegistry>,
) -> anyhow::Result<Scheduler> {
    let store = open_store(&config.store).await?;
    Ok(Scheduler::builder(store, registry)
        .config(scheduler_config(config))
        .build())
}
