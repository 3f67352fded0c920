//! # Tickwork Protocols
//!
//! Data model and collaborator traits for the Tickwork scheduler.
//! Contains only interface definitions and plain data types.
//!
//! ## Core Traits
//!
//! - [`JobStore`] - Persistent job storage shared by scheduler instances
//! - [`CoordinationChannel`] - Best-effort pub/sub bus between instances
//! - [`CronService`] - Cron expression validation and next-fire computation
//! - [`TaskHandler`] - Async handler executed for a task type
//! - [`Clock`] - Injectable time source

pub mod clock;
pub mod coordination;
pub mod cron;
pub mod error;
pub mod execution;
pub mod job;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordination::{
    CoordinationChannel, CoordinationEvent, CoordinationMessage, EventCallback, EventKind,
    Subscription,
};
pub use cron::CronService;
pub use error::{CoordinationError, CronError, HandlerError, StoreError};
pub use execution::{handler_fn, FnHandler, JobExecutionContext, JobExecutionResult, TaskHandler};
pub use job::{Job, JobInput, JobLease, JobPatch, JobStatus, NewJob, TaskPayload};
pub use store::JobStore;
