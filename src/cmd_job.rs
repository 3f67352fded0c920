//! Job subcommand handlers.

use anyhow::Context;
use serde_json::Value;
use tracing::warn;

use tickwork_config::{Config, StoreBackend};
use tickwork_core::Scheduler;
use tickwork_protocols::{Job, JobInput, JobStatus, TaskPayload};

use crate::cli::JobAction;
use crate::handlers::builtin_registry;
use crate::setup;

/// Handle job subcommands against the configured store.
pub(crate) async fn handle_job_command(action: JobAction, config: &Config) -> anyhow::Result<()> {
    if config.store.backend == StoreBackend::Memory {
        warn!("Store backend is 'memory'; job changes are lost when this command exits");
    }

    let scheduler = setup::build_scheduler(config, builtin_registry()).await?;
    let result = run_action(&scheduler, action).await;
    scheduler.shutdown().await;
    result
}

async fn run_action(scheduler: &Scheduler, action: JobAction) -> anyhow::Result<()> {
    match action {
        JobAction::Add {
            name,
            schedule,
            task_type,
            data,
            max_retries,
            tags,
        } => {
            let task = TaskPayload::new(task_type, parse_data(data)?);
            let mut input = JobInput::new(name, schedule, task);
            input.max_retries = max_retries;
            if !tags.is_empty() {
                input.tags = Some(tags);
            }
            let job = scheduler.create_job(input).await?;
            println!("Created job {}", job.id);
            println!("Next run: {}", format_time(job.next_run));
        }
        JobAction::List {
            tag,
            status,
            format,
        } => {
            let jobs = match (tag, status) {
                (Some(tag), status) => {
                    let status = status.map(|s| parse_status(&s)).transpose()?;
                    scheduler
                        .jobs_by_tag(&tag)
                        .await?
                        .into_iter()
                        .filter(|job| status.is_none_or(|s| job.status == s))
                        .collect()
                }
                (None, Some(status)) => scheduler.jobs_by_status(parse_status(&status)?).await?,
                (None, None) => scheduler.list_jobs().await?,
            };
            print_jobs(&jobs, &format)?;
        }
        JobAction::Show { id } => {
            let job = scheduler
                .get_job(&id)
                .await?
                .with_context(|| format!("job '{}' not found", id))?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        JobAction::Update {
            id,
            name,
            schedule,
            task_type,
            data,
            max_retries,
            tags,
        } => {
            let existing = scheduler
                .get_job(&id)
                .await?
                .with_context(|| format!("job '{}' not found", id))?;

            let task = TaskPayload::new(
                task_type.unwrap_or(existing.task.task_type),
                match data {
                    Some(_) => parse_data(data)?,
                    None => existing.task.data,
                },
            );
            let mut input = JobInput::new(
                name.unwrap_or(existing.name),
                schedule.unwrap_or(existing.schedule),
                task,
            );
            input.max_retries = max_retries;
            if !tags.is_empty() {
                input.tags = Some(tags);
            }

            let job = scheduler
                .update_job(&id, input)
                .await?
                .with_context(|| format!("job '{}' not found", id))?;
            println!("Updated job {}", job.id);
            println!("Next run: {}", format_time(job.next_run));
        }
        JobAction::Delete { id } => {
            if !scheduler.delete_job(&id).await? {
                anyhow::bail!("job '{}' not found", id);
            }
            println!("Deleted job {}", id);
        }
        JobAction::Pause { id } => {
            let job = scheduler
                .pause_job(&id)
                .await?
                .with_context(|| format!("job '{}' not found", id))?;
            println!("Job {} is {}", job.id, job.status);
        }
        JobAction::Resume { id } => {
            let job = scheduler
                .resume_job(&id)
                .await?
                .with_context(|| format!("job '{}' not found", id))?;
            println!("Job {} is {}", job.id, job.status);
            println!("Next run: {}", format_time(job.next_run));
        }
        JobAction::Trigger { id } => {
            let job = scheduler
                .trigger_job_now(&id)
                .await?
                .with_context(|| format!("job '{}' not found", id))?;
            println!("Job {} is due at {}", job.id, format_time(job.next_run));
        }
    }
    Ok(())
}

fn parse_data(data: Option<String>) -> anyhow::Result<Value> {
    match data {
        Some(raw) => serde_json::from_str(&raw).context("--data must be valid JSON"),
        None => Ok(Value::Object(Default::default())),
    }
}

fn parse_status(raw: &str) -> anyhow::Result<JobStatus> {
    raw.parse::<JobStatus>().map_err(anyhow::Error::msg)
}

fn format_time(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_jobs(jobs: &[Job], format: &str) -> anyhow::Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<36} {:<20} {:<15} {:<10} {:<19} {}",
        "ID", "NAME", "SCHEDULE", "STATUS", "NEXT RUN", "TAGS"
    );
    println!("{}", "-".repeat(110));
    for job in jobs {
        println!(
            "{:<36} {:<20} {:<15} {:<10} {:<19} {}",
            job.id,
            truncate(&job.name, 20),
            truncate(&job.schedule, 15),
            job.status.as_str(),
            format_time(job.next_run),
            job.tags.join(", ")
        );
    }
    Ok(())
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
        out.push('~');
        out
    }
}
