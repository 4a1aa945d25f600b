//! WAV artifact type and filename policy.
//!
//! A WavArtifact holds one encoded generation result, either in memory or
//! as a transient file that is deleted once the response has been sent.

use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Maximum length of the sanitized prompt part of a filename.
const MAX_KEYWORDS_CHARS: usize = 80;

/// Where encoded artifacts are kept until they are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactMode {
    /// Keep WAV bytes in memory.
    Memory,
    /// Write WAV files to the output directory and delete them after sending.
    #[default]
    Disk,
}

impl ArtifactMode {
    /// Returns the string representation of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactMode::Memory => "memory",
            ArtifactMode::Disk => "disk",
        }
    }

    /// Parses a mode from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Some(ArtifactMode::Memory),
            "disk" | "file" => Some(ArtifactMode::Disk),
            _ => None,
        }
    }
}

/// Storage of an encoded artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactPayload {
    /// WAV bytes held in memory.
    Memory(Vec<u8>),
    /// Path to a WAV file owned by the request.
    File(PathBuf),
}

/// A PCM-16 mono WAV encoding of one raw sample buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct WavArtifact {
    /// Download filename hint.
    pub file_name: String,
    /// Sample rate declared in the WAV header.
    pub sample_rate: u32,
    /// Audio duration in seconds.
    pub duration_sec: f32,
    /// Seed the audio was generated with.
    pub seed: u64,
    /// The encoded bytes or file.
    pub payload: ArtifactPayload,
}

impl WavArtifact {
    /// Returns the file path if the artifact was persisted.
    pub fn path(&self) -> Option<&Path> {
        match &self.payload {
            ArtifactPayload::File(path) => Some(path),
            ArtifactPayload::Memory(_) => None,
        }
    }

    /// Reads the artifact's WAV bytes.
    pub fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        match &self.payload {
            ArtifactPayload::Memory(bytes) => Ok(bytes.clone()),
            ArtifactPayload::File(path) => std::fs::read(path),
        }
    }
}

/// Deletes a transient file when dropped.
///
/// Failure to delete is logged and otherwise ignored.
#[derive(Debug)]
pub struct CleanupGuard {
    path: PathBuf,
}

impl CleanupGuard {
    /// Takes ownership of the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the guarded path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed transient artifact"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove transient artifact"),
        }
    }
}

/// A WavArtifact whose file, if any, is deleted when this value is dropped.
///
/// Generation results travel from the worker to the response as this type,
/// so a result nobody collects (caller timed out or disconnected) still
/// removes its file.
#[derive(Debug)]
pub struct TransientArtifact {
    artifact: WavArtifact,
    guard: Option<CleanupGuard>,
}

impl TransientArtifact {
    /// Takes ownership of `artifact` and its file.
    pub fn new(artifact: WavArtifact) -> Self {
        let guard = artifact.path().map(CleanupGuard::new);
        Self { artifact, guard }
    }

    /// Splits into the artifact and the guard that now owns its file.
    pub fn into_parts(self) -> (WavArtifact, Option<CleanupGuard>) {
        (self.artifact, self.guard)
    }
}

/// Reduces a prompt to lowercase word tokens joined by underscores.
///
/// Word characters are letters, digits and `_` in any script; everything
/// else separates tokens, so the result never contains path separators or
/// control characters. Returns `"untitled"` if nothing survives.
pub fn sanitize_prompt(prompt: &str) -> String {
    let lowered = prompt.to_lowercase();
    let joined = lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    let truncated: String = joined.chars().take(MAX_KEYWORDS_CHARS).collect();
    let truncated = truncated.trim_end_matches('_');

    if truncated.is_empty() {
        "untitled".to_string()
    } else {
        truncated.to_string()
    }
}

/// Builds a unique WAV filename from the current time, the prompt prefix and the prompt.
///
/// Format: `{YYYYmmddTHHMMSS}_{keywords}_{6 hex}.wav`.
pub fn artifact_file_name(prefix: Option<&str>, prompt: &str) -> String {
    let timestamp = chrono::Local::now().format("%Y%m%dT%H%M%S").to_string();
    let suffix: [u8; 3] = rand::thread_rng().gen();
    file_name_with(&timestamp, prefix, prompt, &hex::encode(suffix))
}

fn file_name_with(timestamp: &str, prefix: Option<&str>, prompt: &str, suffix: &str) -> String {
    let keywords = match prefix {
        Some(prefix) => sanitize_prompt(&format!("{} {}", prefix, prompt)),
        None => sanitize_prompt(prompt),
    };
    format!("{}_{}_{}.wav", timestamp, keywords, suffix)
}

/// Builds a `Content-Disposition` value that is always a valid header.
///
/// Non-ASCII characters in the filename are replaced by underscores.
pub fn content_disposition(file_name: &str) -> String {
    let ascii: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("attachment; filename=\"{}\"", ascii)
}
