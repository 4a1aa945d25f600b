//! Service configuration module.
//!
//! Contains the runtime configuration for the lofi-server: execution device,
//! checkpoint source, post-processing policy and HTTP/queue settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{DitherStrategy, NormalizationStrategy, DEFAULT_HEADROOM};
use crate::models::{CheckpointSource, ModelSize};
use crate::types::ArtifactMode;

/// Output sample rates the encoder accepts.
pub const SUPPORTED_SAMPLE_RATES: &[u32] = &[32000, 48000];

/// Execution device for the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Automatically pick the best available device.
    #[default]
    Auto,

    /// Force CPU execution.
    Cpu,

    /// NVIDIA GPU acceleration.
    Cuda,

    /// Apple Silicon acceleration.
    Metal,
}

impl Device {
    /// Returns the string representation of the device.
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Auto => "auto",
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
            Device::Metal => "metal",
        }
    }

    /// Parses a device from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(Device::Auto),
            "cpu" => Some(Device::Cpu),
            "cuda" | "gpu" => Some(Device::Cuda),
            "metal" | "coreml" => Some(Device::Metal),
            _ => None,
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime configuration for the service.
///
/// Loaded from environment variables at startup, then overridden by
/// command-line flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    pub host: String,

    /// Port the HTTP server listens on.
    pub port: u16,

    /// Execution device for generation.
    pub device: Device,

    /// Generator size.
    pub model_size: ModelSize,

    /// Remote checkpoint to apply after constructing the generator.
    /// If None, the generator's built-in weights are used.
    pub checkpoint: Option<CheckpointSource>,

    /// Directory holding cached checkpoints.
    /// If None, uses the platform-specific default cache location.
    pub checkpoint_dir: Option<PathBuf>,

    /// Directory for transient generated WAV files.
    /// If None, uses the platform-specific default cache location.
    pub output_dir: Option<PathBuf>,

    /// Multiplier applied to the requested duration before invoking the model.
    pub duration_multiplier: f32,

    /// Largest duration in seconds a request may ask for.
    pub max_duration_sec: u32,

    /// Sample rate declared in generated WAV files.
    pub sample_rate: u32,

    /// Normalization applied to raw model output.
    pub normalization: NormalizationStrategy,

    /// Dither added before 16-bit quantization.
    pub dither: DitherStrategy,

    /// Whether artifacts are kept in memory or written to the output directory.
    pub artifact_mode: ArtifactMode,

    /// Keyword prepended to every prompt before generation.
    pub prompt_prefix: Option<String>,

    /// Sampling temperature passed to the generator.
    pub temperature: f32,

    /// Load the model in the background at startup.
    pub preload: bool,

    /// Number of generation worker threads.
    pub workers: usize,

    /// Maximum number of jobs waiting for a worker.
    pub queue_capacity: usize,

    /// Seconds a request may wait for its generation to finish.
    pub request_timeout_sec: u64,

    /// Additional checkpoint download attempts after the first failure.
    pub fetch_retries: u32,
}

impl ServerConfig {
    /// Creates a new ServerConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ServerConfig from environment variables.
    ///
    /// Reads the `LOFI_*` variables listed in the crate-level docs. Unset or
    /// unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("LOFI_HOST") {
            if !host.trim().is_empty() {
                config.host = host;
            }
        }

        if let Some(port) = env_parse::<u16>("LOFI_PORT") {
            config.port = port;
        }

        if let Ok(device_str) = std::env::var("LOFI_DEVICE") {
            if let Some(device) = Device::parse(&device_str) {
                config.device = device;
            }
        }

        if let Ok(size_str) = std::env::var("LOFI_MODEL_SIZE") {
            if let Some(size) = ModelSize::parse(&size_str) {
                config.model_size = size;
            }
        }

        if let (Ok(bucket), Ok(blob)) = (
            std::env::var("LOFI_CHECKPOINT_BUCKET"),
            std::env::var("LOFI_CHECKPOINT_BLOB"),
        ) {
            let mut source = CheckpointSource::new(bucket, blob);
            if let Ok(endpoint) = std::env::var("LOFI_CHECKPOINT_ENDPOINT") {
                source.endpoint = endpoint;
            }
            if let Ok(sha) = std::env::var("LOFI_CHECKPOINT_SHA256") {
                source.sha256 = Some(sha.to_lowercase());
            }
            config.checkpoint = Some(source);
        }

        if let Ok(path) = std::env::var("LOFI_CHECKPOINT_DIR") {
            config.checkpoint_dir = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("LOFI_OUTPUT_DIR") {
            config.output_dir = Some(PathBuf::from(path));
        }

        if let Some(multiplier) = env_parse::<f32>("LOFI_DURATION_MULTIPLIER") {
            if (0.5..=4.0).contains(&multiplier) {
                config.duration_multiplier = multiplier;
            }
        }

        if let Some(max) = env_parse::<u32>("LOFI_MAX_DURATION") {
            if max > 0 {
                config.max_duration_sec = max;
            }
        }

        if let Some(rate) = env_parse::<u32>("LOFI_SAMPLE_RATE") {
            if SUPPORTED_SAMPLE_RATES.contains(&rate) {
                config.sample_rate = rate;
            }
        }

        if let Ok(strategy) = std::env::var("LOFI_NORMALIZATION") {
            if let Some(strategy) = NormalizationStrategy::parse(&strategy) {
                config.normalization = strategy;
            }
        }

        if let Some(headroom) = env_parse::<f32>("LOFI_HEADROOM") {
            if headroom > 0.0 && headroom <= 1.0 {
                if let NormalizationStrategy::PeakHeadroom(_) = config.normalization {
                    config.normalization = NormalizationStrategy::PeakHeadroom(headroom);
                }
            }
        }

        if let Ok(dither) = std::env::var("LOFI_DITHER") {
            if let Some(dither) = DitherStrategy::parse(&dither) {
                config.dither = dither;
            }
        }

        if let Ok(mode) = std::env::var("LOFI_ARTIFACT_MODE") {
            if let Some(mode) = ArtifactMode::parse(&mode) {
                config.artifact_mode = mode;
            }
        }

        if let Ok(prefix) = std::env::var("LOFI_PROMPT_PREFIX") {
            config.prompt_prefix = if prefix.trim().is_empty() {
                None
            } else {
                Some(prefix)
            };
        }

        if let Some(temperature) = env_parse::<f32>("LOFI_TEMPERATURE") {
            if (0.0..=2.0).contains(&temperature) {
                config.temperature = temperature;
            }
        }

        if let Ok(preload) = std::env::var("LOFI_PRELOAD") {
            match preload.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.preload = true,
                "0" | "false" | "no" | "off" => config.preload = false,
                _ => {}
            }
        }

        if let Some(workers) = env_parse::<usize>("LOFI_WORKERS") {
            if workers > 0 {
                config.workers = workers;
            }
        }

        if let Some(capacity) = env_parse::<usize>("LOFI_QUEUE_CAPACITY") {
            if capacity > 0 {
                config.queue_capacity = capacity;
            }
        }

        if let Some(timeout) = env_parse::<u64>("LOFI_REQUEST_TIMEOUT") {
            if timeout > 0 {
                config.request_timeout_sec = timeout;
            }
        }

        if let Some(retries) = env_parse::<u32>("LOFI_FETCH_RETRIES") {
            config.fetch_retries = retries;
        }

        config
    }

    /// Returns the effective checkpoint cache directory.
    pub fn effective_checkpoint_dir(&self) -> PathBuf {
        if let Some(ref path) = self.checkpoint_dir {
            path.clone()
        } else {
            default_checkpoint_dir()
        }
    }

    /// Returns the well-known local path of the configured checkpoint, if any.
    pub fn effective_checkpoint_path(&self) -> Option<PathBuf> {
        self.checkpoint
            .as_ref()
            .map(|source| self.effective_checkpoint_dir().join(source.local_file_name()))
    }

    /// Returns the effective output directory, using platform defaults if not specified.
    pub fn effective_output_dir(&self) -> PathBuf {
        if let Some(ref path) = self.output_dir {
            path.clone()
        } else {
            default_output_dir()
        }
    }

    /// Returns the request timeout as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }

    /// Returns the socket address string the server binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails, None otherwise.
    pub fn validate(&self) -> Option<String> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Some(format!(
                "sample_rate must be one of {:?}, got {}",
                SUPPORTED_SAMPLE_RATES, self.sample_rate
            ));
        }

        if self.duration_multiplier <= 0.0 || !self.duration_multiplier.is_finite() {
            return Some(format!(
                "duration_multiplier must be positive, got {}",
                self.duration_multiplier
            ));
        }

        if self.max_duration_sec == 0 {
            return Some("max_duration_sec must be > 0".to_string());
        }

        if let NormalizationStrategy::PeakHeadroom(headroom) = self.normalization {
            if headroom <= 0.0 || headroom > 1.0 {
                return Some(format!("headroom must be in (0, 1], got {}", headroom));
            }
        }

        if self.workers == 0 {
            return Some("workers must be > 0".to_string());
        }
        if self.workers > 64 {
            return Some(format!("workers too high: {} (max 64)", self.workers));
        }

        if self.queue_capacity == 0 {
            return Some("queue_capacity must be > 0".to_string());
        }

        if let Some(ref source) = self.checkpoint {
            if let Some(message) = source.validate() {
                return Some(message);
            }
        }

        None
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            device: Device::Auto,
            model_size: ModelSize::default(),
            checkpoint: None,
            checkpoint_dir: None,
            output_dir: None,
            duration_multiplier: 1.0,
            max_duration_sec: 30,
            sample_rate: 32000,
            normalization: NormalizationStrategy::PeakHeadroom(DEFAULT_HEADROOM),
            dither: DitherStrategy::Triangular,
            artifact_mode: ArtifactMode::Disk,
            prompt_prefix: Some("lo-fi".to_string()),
            temperature: 1.0,
            preload: true,
            workers: 1,
            queue_capacity: 10,
            request_timeout_sec: 300,
            fetch_retries: 3,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

/// Returns the platform-specific default checkpoint cache directory.
///
/// - macOS: ~/Library/Caches/lofi-server/checkpoints
/// - Linux: ~/.cache/lofi-server/checkpoints
/// - Windows: C:\Users\<user>\AppData\Local\lofi-server\cache\checkpoints
fn default_checkpoint_dir() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "lofi-server") {
        proj_dirs.cache_dir().join("checkpoints")
    } else {
        PathBuf::from("./checkpoints")
    }
}

/// Returns the platform-specific default directory for transient WAV files.
fn default_output_dir() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "lofi-server") {
        proj_dirs.cache_dir().join("generated")
    } else {
        PathBuf::from("./generated")
    }
}
