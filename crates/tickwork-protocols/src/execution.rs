//! Task handler protocol and per-attempt execution types.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HandlerError;
use crate::job::TaskPayload;

/// Context handed to a handler for one execution attempt. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecutionContext {
    pub job_id: String,
    /// Failures recorded before this attempt.
    pub retry_count: u32,
    pub start_time: DateTime<Utc>,
    pub payload: TaskPayload,
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JobExecutionResult {
    pub fn success(data: Option<Value>) -> Self {
        Self {
            success: true,
            error: None,
            data,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data: None,
        }
    }
}

/// Handler for one task type.
///
/// Returning `Err` is equivalent to returning a failed result with the
/// error's message.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(
        &self,
        payload: TaskPayload,
        ctx: JobExecutionContext,
    ) -> Result<JobExecutionResult, HandlerError>;
}

/// Adapter turning an async closure into a [`TaskHandler`].
pub struct FnHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

/// Wrap an async closure as a handler.
///
/// ```ignore
/// registry.register("echo", handler_fn(|payload, _ctx| async move {
///     Ok(JobExecutionResult::success(Some(payload.data)))
/// }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F, Fut>
where
    F: Fn(TaskPayload, JobExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JobExecutionResult, HandlerError>> + Send,
{
    FnHandler {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F, Fut>
where
    F: Fn(TaskPayload, JobExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JobExecutionResult, HandlerError>> + Send,
{
    async fn handle(
        &self,
        payload: TaskPayload,
        ctx: JobExecutionContext,
    ) -> Result<JobExecutionResult, HandlerError> {
        (self.f)(payload, ctx).await
    }
}
