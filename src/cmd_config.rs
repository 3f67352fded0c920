//! `validate` and `config` subcommand handlers.

use std::path::Path;

use chrono::Utc;

use tickwork_config::{Config, ConfigError, ConfigValidator};
use tickwork_core::StandardCron;

/// Print the next `count` fire times of `expression`.
pub(crate) fn validate_expression(expression: &str, count: usize) -> anyhow::Result<()> {
    let cron = StandardCron::new();
    let times = cron
        .upcoming(expression, Utc::now(), count)
        .map_err(|e| anyhow::anyhow!("invalid cron expression '{}': {}", expression, e))?;

    println!("Expression: {}", expression);
    println!("{}", "-".repeat(40));
    for (i, time) in times.iter().enumerate() {
        println!("{:>3}. {}", i + 1, time.to_rfc3339());
    }
    Ok(())
}

/// Load and validate the configuration file, printing every finding.
pub(crate) fn check(path: &Path, loaded: Result<Config, ConfigError>) -> anyhow::Result<()> {
    let config = match loaded {
        Ok(config) => config,
        Err(e) => anyhow::bail!("failed to load {}: {}", path.display(), e),
    };

    if !path.exists() {
        println!("{} not found; checking built-in defaults", path.display());
    }

    let result = ConfigValidator::validate(&config);
    for warning in &result.warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }
    for error in &result.errors {
        println!("error:   {}: {}", error.path, error.message);
    }

    if !result.is_valid() {
        anyhow::bail!("configuration has {} error(s)", result.errors.len());
    }

    println!("Configuration OK");
    println!("  store:        {:?}", config.store.backend);
    if let Some(store_path) = &config.store.path {
        println!("  store path:   {}", store_path);
    }
    println!("  concurrency:  {}", config.scheduler.max_concurrent_jobs);
    println!("  check every:  {}s", config.scheduler.check_interval_secs);
    Ok(())
}
