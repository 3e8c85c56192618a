use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub work_directory: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub stylize: StylizeConfig,
    #[serde(default)]
    pub reassemble: ReassembleConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Configuration with every section at its default.
    pub fn with_work_directory(work_directory: impl Into<String>) -> Self {
        Self {
            version: "1.0".to_string(),
            work_directory: work_directory.into(),
            worker_count: default_worker_count(),
            download: DownloadConfig::default(),
            extract: ExtractConfig::default(),
            stylize: StylizeConfig::default(),
            reassemble: ReassembleConfig::default(),
            retention: RetentionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadBackend {
    Http,
    YtDlp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_backend")]
    pub backend: DownloadBackend,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on the downloaded source size.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_allowed_schemes")]
    pub allowed_schemes: Vec<String>,
    #[serde(default = "default_yt_dlp")]
    pub yt_dlp_path: String,
}

fn default_backend() -> DownloadBackend {
    DownloadBackend::Http
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_allowed_schemes() -> Vec<String> {
    vec!["http".to_string(), "https".to_string()]
}

fn default_yt_dlp() -> String {
    "yt-dlp".to_string()
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            timeout_secs: default_timeout_secs(),
            max_bytes: default_max_bytes(),
            allowed_schemes: default_allowed_schemes(),
            yt_dlp_path: default_yt_dlp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe_path: String,
    /// Frames sampled per second of video. Every frame is kept when unset.
    #[serde(default)]
    pub sample_fps: Option<f64>,
    /// ffmpeg `-q:v` value.
    #[serde(default = "default_quality")]
    pub quality: u32,
}

fn default_quality() -> u32 {
    2
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg(),
            ffprobe_path: default_ffprobe(),
            sample_fps: None,
            quality: default_quality(),
        }
    }
}

/// What happens when a single frame cannot be stylized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramePolicy {
    /// The first failing frame fails the job.
    #[default]
    FailFast,
    /// Failing frames are replaced by their unstyled original.
    BestEffort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StylizeConfig {
    #[serde(default)]
    pub policy: FramePolicy,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Parallel frame workers. Defaults to the number of cores.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_saturation")]
    pub saturation: f32,
    #[serde(default = "default_brightness")]
    pub brightness: f32,
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,
    #[serde(default = "default_tint")]
    pub tint: [u8; 3],
}

fn default_max_attempts() -> u32 {
    1
}

fn default_saturation() -> f32 {
    1.4
}

fn default_brightness() -> f32 {
    1.05
}

fn default_blur_sigma() -> f32 {
    0.3
}

fn default_tint() -> [u8; 3] {
    [255, 240, 230]
}

impl Default for StylizeConfig {
    fn default() -> Self {
        Self {
            policy: FramePolicy::default(),
            max_attempts: default_max_attempts(),
            workers: None,
            saturation: default_saturation(),
            brightness: default_brightness(),
            blur_sigma: default_blur_sigma(),
            tint: default_tint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReassembleConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe_path: String,
    /// Used when neither a sampling rate nor a probed rate is known.
    #[serde(default = "default_frame_rate")]
    pub default_frame_rate: f64,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_true")]
    pub verify_frame_count: bool,
}

fn default_frame_rate() -> f64 {
    24.0
}

fn default_codec() -> String {
    "libx264".to_string()
}

fn default_pixel_format() -> String {
    "yuv420p".to_string()
}

fn default_crf() -> u32 {
    23
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ReassembleConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg(),
            ffprobe_path: default_ffprobe(),
            default_frame_rate: default_frame_rate(),
            codec: default_codec(),
            pixel_format: default_pixel_format(),
            crf: default_crf(),
            preset: default_preset(),
            verify_frame_count: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
}

fn default_max_age_hours() -> u64 {
    24
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_hours: default_max_age_hours(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG` when set.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}
