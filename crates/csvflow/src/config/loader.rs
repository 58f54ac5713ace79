use std::path::Path;

use crate::config::settings::{Settings, SETTINGS_VERSION};
use crate::error::ConfigError;

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = serde_json::from_str(content)?;

    validate_settings(&settings)?;

    Ok(settings)
}

pub fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.version != SETTINGS_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported settings version: {}", settings.version),
        });
    }

    let sizes = [
        ("numWorkers", settings.num_workers),
        ("chunkSize", settings.chunk_size),
        ("maxQueueSize", settings.max_queue_size),
    ];
    for (name, value) in sizes {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than 0", name),
            });
        }
    }

    if settings.max_write_attempts == Some(0) {
        return Err(ConfigError::Validation {
            message: "maxWriteAttempts must be greater than 0, or null to retry forever"
                .to_string(),
        });
    }

    let extension = settings.file_extension.trim_start_matches('.');
    if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ConfigError::Validation {
            message: format!("Invalid file extension: '{}'", settings.file_extension),
        });
    }

    Ok(())
}
