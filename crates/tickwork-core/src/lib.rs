//! Scheduler core for Tickwork.
//!
//! [`Scheduler`] polls a [`JobStore`](tickwork_protocols::JobStore) for due
//! jobs, runs them through handlers from a [`TaskRegistry`], retries
//! failures with exponential backoff and shares slot usage with peer
//! instances over a [`CoordinationChannel`](tickwork_protocols::CoordinationChannel).

pub mod backoff;
pub mod bus;
pub mod config;
pub mod cron;
pub mod error;
pub mod gates;
pub mod limiter;
pub mod notifications;
pub mod registry;
pub mod running_set;
pub mod scheduler;
mod scheduler_api;
mod scheduler_coordination;
mod scheduler_execution;

pub use backoff::retry_delay;
pub use bus::{LocalBus, LocalBusEndpoint, NoopChannel};
pub use config::SchedulerConfig;
pub use cron::StandardCron;
pub use error::{ExecutionError, SchedulerError, SchedulerResult};
pub use gates::SchedulerGates;
pub use limiter::TokenBucket;
pub use notifications::{JobNotification, NotificationStream};
pub use registry::TaskRegistry;
pub use running_set::RunningSet;
pub use scheduler::{Scheduler, SchedulerBuilder};
