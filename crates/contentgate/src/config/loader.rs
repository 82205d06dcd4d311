use std::path::Path;

use crate::config::schema::CoreConfig;
use crate::error::ConfigError;
use crate::time::parse_timezone;

const SUPPORTED_VERSION: &str = "1.0";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CoreConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<CoreConfig, ConfigError> {
    let config: CoreConfig = serde_yaml::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &CoreConfig) -> Result<(), ConfigError> {
    if config.version != SUPPORTED_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let execute = &config.rate_limits.execute;
    if execute.max_requests == 0 || execute.window_ms == 0 {
        return Err(ConfigError::Validation {
            message: "rate_limits.execute needs a positive max_requests and window_ms".to_string(),
        });
    }

    if config.jobs.stale_job_minutes == 0 {
        return Err(ConfigError::Validation {
            message: "jobs.stale_job_minutes must be positive".to_string(),
        });
    }

    if config.execution.claim_timeout_minutes == 0 {
        return Err(ConfigError::Validation {
            message: "execution.claim_timeout_minutes must be positive".to_string(),
        });
    }

    if parse_timezone(&config.scheduler.timezone).is_none() {
        return Err(ConfigError::UnknownTimezone(
            config.scheduler.timezone.clone(),
        ));
    }

    // Malformed run windows are kept; the enforcer skips them with a warning.
    Ok(())
}
