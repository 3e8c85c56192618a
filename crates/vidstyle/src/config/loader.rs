use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

/// Checks the constraints the schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.work_directory.trim().is_empty() {
        return Err(invalid("work_directory must not be empty"));
    }

    if config.worker_count == 0 {
        return Err(invalid("worker_count must be greater than 0"));
    }

    let download = &config.download;
    if download.timeout_secs == 0 {
        return Err(invalid("download.timeout_secs must be greater than 0"));
    }
    if download.max_bytes == 0 {
        return Err(invalid("download.max_bytes must be greater than 0"));
    }
    if download.allowed_schemes.is_empty() {
        return Err(invalid("download.allowed_schemes must list at least one scheme"));
    }

    if let Some(fps) = config.extract.sample_fps {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(invalid(format!(
                "extract.sample_fps must be positive, got {}",
                fps
            )));
        }
    }

    let stylize = &config.stylize;
    if stylize.max_attempts == 0 {
        return Err(invalid("stylize.max_attempts must be greater than 0"));
    }
    if stylize.workers == Some(0) {
        return Err(invalid("stylize.workers must be greater than 0"));
    }
    if !(stylize.saturation.is_finite() && stylize.saturation > 0.0) {
        return Err(invalid("stylize.saturation must be positive"));
    }
    if !(stylize.brightness.is_finite() && stylize.brightness > 0.0) {
        return Err(invalid("stylize.brightness must be positive"));
    }
    if !(stylize.blur_sigma.is_finite() && stylize.blur_sigma >= 0.0) {
        return Err(invalid("stylize.blur_sigma must not be negative"));
    }

    let reassemble = &config.reassemble;
    if !(reassemble.default_frame_rate.is_finite() && reassemble.default_frame_rate > 0.0) {
        return Err(invalid("reassemble.default_frame_rate must be positive"));
    }
    if reassemble.crf > 51 {
        return Err(invalid(format!(
            "reassemble.crf must be between 0 and 51, got {}",
            reassemble.crf
        )));
    }

    if config.retention.max_age_hours == 0 {
        return Err(invalid("retention.max_age_hours must be greater than 0"));
    }

    Ok(())
}
