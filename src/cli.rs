//! Command-line interface.
//!
//! `serve` runs the HTTP API; `generate` and `extend` work on local files;
//! `client` drives a remote server the way the web front end does.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::audio::{LoopOptions, NormalizationStrategy, DEFAULT_CROSSFADE_MS, DEFAULT_HEADROOM};
use crate::client::{ClientOptions, PromptSelection, DEFAULT_BACKEND_MAX_SEC};
use crate::config::{Device, ServerConfig};
use crate::error::{ErrorCode, Result, ServiceError};
use crate::types::{ArtifactMode, DEFAULT_DURATION_SEC};

/// Execution device choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeviceArg {
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl From<DeviceArg> for Device {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Auto => Device::Auto,
            DeviceArg::Cpu => Device::Cpu,
            DeviceArg::Cuda => Device::Cuda,
            DeviceArg::Metal => Device::Metal,
        }
    }
}

/// Artifact storage choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ArtifactModeArg {
    /// Keep WAV bytes in memory
    Memory,
    /// Write WAV files and delete them after sending
    Disk,
}

impl From<ArtifactModeArg> for ArtifactMode {
    fn from(arg: ArtifactModeArg) -> Self {
        match arg {
            ArtifactModeArg::Memory => ArtifactMode::Memory,
            ArtifactModeArg::Disk => ArtifactMode::Disk,
        }
    }
}

/// lofi-server: lo-fi music generation service
#[derive(Parser, Debug)]
#[command(name = "lofi-server")]
#[command(about = "Lo-fi music generation service with loop extension and a remote client")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API
    Serve(ServeArgs),
    /// Generate one track locally
    Generate(GenerateArgs),
    /// Loop-extend an existing WAV file
    Extend(ExtendArgs),
    /// Request a track from a remote server
    Client(ClientArgs),
}

/// Flags overriding `LOFI_*` environment settings for the server.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Execution device
    #[arg(long, value_enum)]
    pub device: Option<DeviceArg>,

    /// Load the model on the first request instead of at startup
    #[arg(long)]
    pub no_preload: bool,

    /// Where generated WAVs are kept until sent
    #[arg(long, value_enum)]
    pub artifact_mode: Option<ArtifactModeArg>,

    /// Number of generation worker threads
    #[arg(long)]
    pub workers: Option<usize>,
}

impl ServeArgs {
    /// Applies the flags on top of `config`.
    pub fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(device) = self.device {
            config.device = device.into();
        }
        if self.no_preload {
            config.preload = false;
        }
        if let Some(mode) = self.artifact_mode {
            config.artifact_mode = mode.into();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
    }
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Text prompt describing the music to generate
    #[arg(short, long)]
    pub prompt: String,

    /// Duration in seconds
    #[arg(short, long, default_value_t = DEFAULT_DURATION_SEC)]
    pub duration: u32,

    /// Random seed for reproducible generation
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Output WAV file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Execution device
    #[arg(long, value_enum)]
    pub device: Option<DeviceArg>,
}

impl GenerateArgs {
    /// Returns the effective output path, "output.wav" by default.
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| PathBuf::from("output.wav"))
    }
}

#[derive(Args, Debug)]
pub struct ExtendArgs {
    /// WAV file to extend
    #[arg(short, long)]
    pub input: PathBuf,

    /// Where to write the extended WAV
    #[arg(short, long)]
    pub output: PathBuf,

    /// Target duration in seconds
    #[arg(short, long)]
    pub target: f32,

    /// Overlap between repeats in milliseconds
    #[arg(long, default_value_t = DEFAULT_CROSSFADE_MS)]
    pub crossfade_ms: u32,

    /// Skip the final loudness pass
    #[arg(long)]
    pub no_normalize: bool,

    /// Seed for the dither noise
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

impl ExtendArgs {
    pub fn loop_options(&self) -> LoopOptions {
        loop_options(self.crossfade_ms, self.no_normalize)
    }
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Base URL of the generation server
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    pub url: String,

    /// Preset prompt, by text or 1-based index
    #[arg(long, conflicts_with_all = ["subgenre", "mood", "atmosphere"])]
    pub preset: Option<String>,

    /// Primary lo-fi subgenre
    #[arg(long)]
    pub subgenre: Option<String>,

    /// Mood tag (repeatable)
    #[arg(long)]
    pub mood: Vec<String>,

    /// Atmosphere tag (repeatable)
    #[arg(long)]
    pub atmosphere: Vec<String>,

    /// Track duration in seconds
    #[arg(short, long, default_value_t = DEFAULT_DURATION_SEC)]
    pub duration: u32,

    /// Longest clip the server generates; longer tracks are looped
    #[arg(long, default_value_t = DEFAULT_BACKEND_MAX_SEC)]
    pub backend_max: u32,

    /// Overlap between loop repeats in milliseconds
    #[arg(long, default_value_t = DEFAULT_CROSSFADE_MS)]
    pub crossfade_ms: u32,

    /// Skip the loudness pass after looping
    #[arg(long)]
    pub no_normalize: bool,

    /// Random seed for reproducible generation
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Directory tracks are saved into
    #[arg(long, default_value = "generated")]
    pub output_dir: PathBuf,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,

    /// Print the available tags and presets, then exit
    #[arg(long)]
    pub list_tags: bool,
}

impl ClientArgs {
    /// Prompt selection from the tag flags.
    pub fn selection(&self) -> Result<PromptSelection> {
        if let Some(preset) = &self.preset {
            return Ok(PromptSelection::Preset(preset.clone()));
        }
        match &self.subgenre {
            Some(subgenre) => Ok(PromptSelection::Tags {
                subgenre: subgenre.clone(),
                moods: self.mood.clone(),
                atmospheres: self.atmosphere.clone(),
            }),
            None => Err(ServiceError::new(
                ErrorCode::InvalidPrompt,
                "Choose a --preset or a --subgenre",
            )),
        }
    }

    pub fn options(&self) -> Result<ClientOptions> {
        Ok(ClientOptions {
            url: self.url.clone(),
            selection: self.selection()?,
            duration_sec: self.duration,
            backend_max_sec: self.backend_max,
            seed: self.seed,
            loop_options: loop_options(self.crossfade_ms, self.no_normalize),
            output_dir: self.output_dir.clone(),
            timeout: Duration::from_secs(self.timeout),
        })
    }
}

fn loop_options(crossfade_ms: u32, no_normalize: bool) -> LoopOptions {
    LoopOptions {
        crossfade_ms,
        loudness: (!no_normalize).then_some(NormalizationStrategy::PeakHeadroom(DEFAULT_HEADROOM)),
        ..LoopOptions::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn serve_flags_override_config() {
        let cli = parse(&[
            "lofi-server", "serve", "--port", "9000", "--no-preload", "--artifact-mode", "memory",
            "--device", "cpu",
        ]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };

        let mut config = ServerConfig::default();
        args.apply(&mut config);
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "0.0.0.0");
        assert!(!config.preload);
        assert_eq!(config.artifact_mode, ArtifactMode::Memory);
        assert_eq!(config.device, Device::Cpu);
    }

    #[test]
    fn generate_defaults() {
        let cli = parse(&["lofi-server", "generate", "--prompt", "rain"]);
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.duration, DEFAULT_DURATION_SEC);
        assert_eq!(args.output_path(), PathBuf::from("output.wav"));
        assert!(args.seed.is_none());
    }

    #[test]
    fn extend_options() {
        let cli = parse(&[
            "lofi-server", "extend", "-i", "a.wav", "-o", "b.wav", "-t", "60", "--no-normalize",
        ]);
        let Command::Extend(args) = cli.command else {
            panic!("expected extend");
        };
        let options = args.loop_options();
        assert_eq!(options.crossfade_ms, DEFAULT_CROSSFADE_MS);
        assert!(options.loudness.is_none());
        assert_eq!(args.target, 60.0);
    }

    #[test]
    fn client_tags_and_presets() {
        let cli = parse(&[
            "lofi-server", "client", "--subgenre", "Jazz", "--mood", "cozy", "--mood", "chill",
            "--atmosphere", "rain", "--duration", "60",
        ]);
        let Command::Client(args) = cli.command else {
            panic!("expected client");
        };
        let options = args.options().unwrap();
        assert_eq!(options.duration_sec, 60);
        assert_eq!(options.backend_max_sec, DEFAULT_BACKEND_MAX_SEC);
        assert_eq!(
            options.selection,
            PromptSelection::Tags {
                subgenre: "Jazz".to_string(),
                moods: vec!["cozy".to_string(), "chill".to_string()],
                atmospheres: vec!["rain".to_string()],
            }
        );
        assert!(options.loop_options.loudness.is_some());

        let cli = parse(&["lofi-server", "client", "--preset", "3"]);
        let Command::Client(args) = cli.command else {
            panic!("expected client");
        };
        assert_eq!(args.selection().unwrap(), PromptSelection::Preset("3".to_string()));
    }

    #[test]
    fn client_requires_selection() {
        let cli = parse(&["lofi-server", "client"]);
        let Command::Client(args) = cli.command else {
            panic!("expected client");
        };
        assert_eq!(args.selection().unwrap_err().code, ErrorCode::InvalidPrompt);
    }

    #[test]
    fn preset_conflicts_with_tags() {
        assert!(Cli::try_parse_from(["lofi-server", "client", "--preset", "1", "--subgenre", "Jazz"]).is_err());
    }
}
