//! Local change notifications.
//!
//! Each scheduler fans its job transitions out on a broadcast channel.
//! Subscribers get one of three filtered streams. Slow subscribers skip
//! missed notifications rather than blocking the scheduler.

use std::pin::Pin;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use tickwork_protocols::Job;

const CAPACITY: usize = 256;

pub type NotificationStream = Pin<Box<dyn Stream<Item = JobNotification> + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub enum JobNotification {
    /// Paused or resumed by a caller.
    StatusChanged { job: Job },
    /// An execution succeeded.
    Completed { job: Job, data: Option<Value> },
    /// An execution failed.
    Failed {
        job: Job,
        error: String,
        will_retry: bool,
    },
}

impl JobNotification {
    pub fn job(&self) -> &Job {
        match self {
            JobNotification::StatusChanged { job }
            | JobNotification::Completed { job, .. }
            | JobNotification::Failed { job, .. } => job,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Notifier {
    sender: broadcast::Sender<JobNotification>,
}

impl Notifier {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(CAPACITY);
        Self { sender }
    }

    pub(crate) fn emit(&self, notification: JobNotification) {
        // Nobody listening is fine.
        let _ = self.sender.send(notification);
    }

    pub(crate) fn stream<F>(&self, filter: F) -> NotificationStream
    where
        F: Fn(&JobNotification) -> bool + Send + 'static,
    {
        Box::pin(
            BroadcastStream::new(self.sender.subscribe())
                .filter_map(|item| item.ok())
                .filter(move |n| filter(n)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tickwork_protocols::{JobStatus, NewJob, TaskPayload};

    fn job() -> Job {
        Job::from_new(
            "n1",
            NewJob {
                name: "n".to_string(),
                schedule: "* * * * *".to_string(),
                task: TaskPayload::new("log", Value::Null),
                status: JobStatus::Scheduled,
                next_run: None,
                max_retries: 1,
                tags: vec![],
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_filtered_stream() {
        let notifier = Notifier::new();
        let mut completions =
            notifier.stream(|n| matches!(n, JobNotification::Completed { .. }));

        notifier.emit(JobNotification::StatusChanged { job: job() });
        notifier.emit(JobNotification::Completed {
            job: job(),
            data: Some(Value::Bool(true)),
        });

        let first = completions.next().await.unwrap();
        assert!(matches!(first, JobNotification::Completed { .. }));
        assert_eq!(first.job().id, "n1");
    }

    #[test]
    fn test_emit_without_subscribers() {
        Notifier::new().emit(JobNotification::StatusChanged { job: job() });
    }
}
