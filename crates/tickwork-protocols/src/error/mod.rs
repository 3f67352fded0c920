//! Error types for the Tickwork protocol layer.

mod coordination;
mod cron;
mod handler;
mod store;

pub use coordination::*;
pub use cron::*;
pub use handler::*;
pub use store::*;
