//! Cron expression service protocol.

use chrono::{DateTime, Utc};

use crate::error::CronError;

/// Validates cron expressions and computes fire times.
pub trait CronService: Send + Sync {
    fn validate(&self, expression: &str) -> bool;

    /// First fire time strictly after `after`.
    fn next_fire_time(
        &self,
        expression: &str,
        after: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, CronError>;
}
