use std::path::PathBuf;

use crate::config::Config;
use crate::stages::StylizeOptions;

/// Controller settings derived from the loaded configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub work_directory: PathBuf,
    pub allowed_schemes: Vec<String>,
    pub stylize: StylizeOptions,
    /// Playback rate used when a job has no recorded frame rate.
    pub default_frame_rate: f64,
    /// Age after which `sweep_expired` removes a job.
    pub max_age_hours: u64,
    pub event_capacity: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            work_directory: PathBuf::from(&config.work_directory),
            allowed_schemes: config.download.allowed_schemes.clone(),
            stylize: StylizeOptions::from_config(&config.stylize),
            default_frame_rate: config.reassemble.default_frame_rate,
            max_age_hours: config.retention.max_age_hours,
            event_capacity: 100,
        }
    }

    /// Default settings rooted at `work_directory`.
    pub fn with_work_directory(work_directory: impl Into<PathBuf>) -> Self {
        let work_directory = work_directory.into();
        let mut settings =
            Self::from_config(&Config::with_work_directory(work_directory.to_string_lossy()));
        settings.work_directory = work_directory;
        settings
    }
}
