//! Configuration validation.

use crate::schema::Config;

/// Longest retention accepted for finished jobs, about a century.
pub const MAX_JOB_EXPIRATION_DAYS: u32 = 36_500;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_scheduler(config, &mut result);
        Self::validate_rate_limits(config, &mut result);
        Self::validate_store(config, &mut result);
        Self::validate_logging(config, &mut result);

        result
    }

    fn validate_scheduler(config: &Config, result: &mut ValidationResult) {
        let scheduler = &config.scheduler;

        if scheduler.max_concurrent_jobs == 0 {
            result.add_error(ValidationError::new(
                "scheduler.max_concurrent_jobs",
                "max_concurrent_jobs must be greater than 0",
            ));
        }

        if scheduler.max_concurrent_jobs > 100 {
            result.add_warning(ValidationWarning::new(
                "scheduler.max_concurrent_jobs",
                "max_concurrent_jobs is very high (>100)",
            ));
        }

        if scheduler.check_interval_secs == 0 {
            result.add_error(ValidationError::new(
                "scheduler.check_interval_secs",
                "check_interval_secs must be greater than 0",
            ));
        }

        if scheduler.execution_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "scheduler.execution_timeout_secs",
                "execution_timeout_secs must be greater than 0",
            ));
        }

        if scheduler.max_payload_bytes == 0 {
            result.add_error(ValidationError::new(
                "scheduler.max_payload_bytes",
                "max_payload_bytes must be greater than 0",
            ));
        }

        if scheduler.job_expiration_days > MAX_JOB_EXPIRATION_DAYS {
            result.add_error(ValidationError::new(
                "scheduler.job_expiration_days",
                format!(
                    "job_expiration_days must be at most {}",
                    MAX_JOB_EXPIRATION_DAYS
                ),
            ));
        } else if scheduler.job_expiration_days == 0 {
            result.add_warning(ValidationWarning::new(
                "scheduler.job_expiration_days",
                "job_expiration_days is 0, finished jobs are removed at every start",
            ));
        }

        if let Some(id) = &scheduler.instance_id {
            if id.trim().is_empty() {
                result.add_error(ValidationError::new(
                    "scheduler.instance_id",
                    "instance_id cannot be empty",
                ));
            }
        }
    }

    fn validate_rate_limits(config: &Config, result: &mut ValidationResult) {
        if config.rate_limits.create_job == 0 {
            result.add_warning(ValidationWarning::new(
                "rate_limits.create_job",
                "create_job rate limit is disabled",
            ));
        }
        if config.rate_limits.trigger_job == 0 {
            result.add_warning(ValidationWarning::new(
                "rate_limits.trigger_job",
                "trigger_job rate limit is disabled",
            ));
        }
    }

    fn validate_store(config: &Config, result: &mut ValidationResult) {
        let store = &config.store;
        match &store.path {
            None if store.backend.requires_path() => {
                result.add_error(ValidationError::new(
                    "store.path",
                    format!("{:?} backend requires a path", store.backend).to_lowercase(),
                ));
            }
            Some(path) if path.trim().is_empty() => {
                result.add_error(ValidationError::new("store.path", "path cannot be empty"));
            }
            Some(_) if !store.backend.requires_path() => {
                result.add_warning(ValidationWarning::new(
                    "store.path",
                    "path is ignored by the memory backend",
                ));
            }
            _ => {}
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        if config.logging.level.trim().is_empty() {
            result.add_error(ValidationError::new(
                "logging.level",
                "level cannot be empty",
            ));
        }
        if config.logging.file && config.logging.max_log_files == 0 {
            result.add_warning(ValidationWarning::new(
                "logging.max_log_files",
                "max_log_files is 0, old log files are never pruned",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
