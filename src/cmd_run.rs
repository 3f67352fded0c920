//! `run` subcommand: the scheduler in the foreground.

use futures::StreamExt;
use tracing::{error, info, warn};

use tickwork_config::{Config, ConfigValidator};
use tickwork_core::JobNotification;

use crate::handlers::builtin_registry;
use crate::setup;

/// Run until Ctrl-C, then stop polling and drain in-flight executions.
pub(crate) async fn run(config: Config) -> anyhow::Result<()> {
    let validation = ConfigValidator::validate(&config);
    for warning in &validation.warnings {
        warn!("{}: {}", warning.path, warning.message);
    }
    if !validation.is_valid() {
        for err in &validation.errors {
            error!("{}: {}", err.path, err.message);
        }
        anyhow::bail!("invalid configuration");
    }

    let registry = builtin_registry();
    let scheduler = setup::build_scheduler(&config, registry.clone()).await?;
    info!(
        instance_id = %scheduler.instance_id(),
        backend = ?config.store.backend,
        task_types = ?registry.task_types(),
        "Starting tickwork"
    );

    let mut failures = scheduler.failures();
    let reporter = tokio::spawn(async move {
        while let Some(notification) = failures.next().await {
            if let JobNotification::Failed {
                job,
                error,
                will_retry,
            } = notification
            {
                if will_retry {
                    warn!(job_id = %job.id, name = %job.name, attempt = job.retry_attempts, "Job failed, will retry: {}", error);
                } else {
                    error!(job_id = %job.id, name = %job.name, "Job failed permanently: {}", error);
                }
            }
        }
    });

    scheduler.start().await;
    info!("Scheduler running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down, waiting for running jobs");

    scheduler.shutdown().await;
    reporter.abort();
    info!("Stopped");
    Ok(())
}
