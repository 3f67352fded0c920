//! Cron expression service backed by the `cron` crate.
//!
//! Accepted forms:
//! - 5 fields, POSIX: `minute hour day-of-month month day-of-week`. Numeric
//!   days of week use `0`/`7` for Sunday.
//! - 6 or 7 fields: `second minute hour day-of-month month day-of-week [year]`,
//!   passed through unchanged (days of week numbered `1` = Sunday).

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use tickwork_protocols::{CronError, CronService};

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCron;

impl StandardCron {
    pub fn new() -> Self {
        Self
    }

    /// Parse `expression` into a schedule, normalizing POSIX input first.
    pub fn parse(&self, expression: &str) -> Result<Schedule, CronError> {
        let normalized = normalize(expression)?;
        Schedule::from_str(&normalized).map_err(|e| CronError::Parse {
            expression: expression.to_string(),
            message: e.to_string(),
        })
    }

    /// The next `count` fire times after `after`.
    pub fn upcoming(
        &self,
        expression: &str,
        after: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>, CronError> {
        let schedule = self.parse(expression)?;
        Ok(schedule
            .after(&after)
            .filter(|t| *t > after)
            .take(count)
            .collect())
    }
}

impl CronService for StandardCron {
    fn validate(&self, expression: &str) -> bool {
        self.parse(expression).is_ok()
    }

    fn next_fire_time(
        &self,
        expression: &str,
        after: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, CronError> {
        let schedule = self.parse(expression)?;
        schedule
            .after(&after)
            .find(|t| *t > after)
            .ok_or_else(|| CronError::NoUpcoming {
                expression: expression.to_string(),
            })
    }
}

fn normalize(expression: &str) -> Result<String, CronError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let dow = translate_day_of_week(fields[4]).ok_or_else(|| CronError::Parse {
                expression: expression.to_string(),
                message: format!("invalid day-of-week field '{}'", fields[4]),
            })?;
            Ok(format!(
                "0 {} {} {} {} {}",
                fields[0], fields[1], fields[2], fields[3], dow
            ))
        }
        6 | 7 => Ok(fields.join(" ")),
        n => Err(CronError::Parse {
            expression: expression.to_string(),
            message: format!("expected 5, 6 or 7 fields, found {}", n),
        }),
    }
}

/// POSIX day (0-7, Sunday = 0 or 7) to the `cron` crate's 1-7 (Sunday = 1).
fn shift_day(day: u32) -> Option<u32> {
    (day <= 7).then_some(day % 7 + 1)
}

/// Rewrite numeric days of week in a POSIX day-of-week field.
///
/// Named days, `*` and `?` pass through. Returns `None` for out-of-range
/// numbers.
fn translate_day_of_week(field: &str) -> Option<String> {
    let mut parts = Vec::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };
        let suffix = step.map(|s| format!("/{}", s)).unwrap_or_default();

        if range == "*" || range == "?" || !range.chars().all(|c| c.is_ascii_digit() || c == '-') {
            parts.push(item.to_string());
            continue;
        }

        match range.split_once('-') {
            None => {
                let day = shift_day(range.parse().ok()?)?;
                parts.push(format!("{}{}", day, suffix));
            }
            Some((start, end)) => {
                let start: u32 = start.parse().ok()?;
                let end: u32 = end.parse().ok()?;
                if start > 7 || end > 7 {
                    return None;
                }
                if end == 7 && start > 0 && step.is_none() {
                    // start..Saturday, then Sunday wraps to 1
                    parts.push(format!("{}-7", start + 1));
                    parts.push("1".to_string());
                } else if end == 7 && start == 0 {
                    parts.push(format!("1-7{}", suffix));
                } else if end == 7 {
                    // Stepped range ending on Sunday: keep Monday-based days
                    // and add Sunday if the step lands on it.
                    parts.push(format!("{}-7{}", start + 1, suffix));
                    let lands_on_sunday = step
                        .and_then(|s| s.parse::<u32>().ok())
                        .is_some_and(|s| s > 0 && (7 - start) % s == 0);
                    if lands_on_sunday {
                        parts.push("1".to_string());
                    }
                } else {
                    parts.push(format!("{}-{}{}", start + 1, end + 1, suffix));
                }
            }
        }
    }
    Some(parts.join(","))
}

#[cfg(test)]
#[path = "cron_tests.rs"]
mod tests;
