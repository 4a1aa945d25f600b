//! Per-request orchestration: loader, pipeline, encoder.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use super::pipeline::{generate, PipelineSettings};
use crate::audio::{AudioEncoder, Destination};
use crate::config::ServerConfig;
use crate::error::{Result, ServiceError};
use crate::models::ModelLoader;
use crate::types::{ArtifactMode, GenerationRequest, WavArtifact};

/// Runs one validated request from model handle to WAV artifact.
///
/// Cheap to clone; every clone shares the same loader.
#[derive(Clone)]
pub struct RequestHandler {
    loader: Arc<ModelLoader>,
    encoder: AudioEncoder,
    settings: PipelineSettings,
    artifact_mode: ArtifactMode,
    output_dir: PathBuf,
}

impl RequestHandler {
    pub fn new(
        loader: Arc<ModelLoader>,
        encoder: AudioEncoder,
        settings: PipelineSettings,
        artifact_mode: ArtifactMode,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            loader,
            encoder,
            settings,
            artifact_mode,
            output_dir: output_dir.into(),
        }
    }

    /// Builds a handler from configuration, creating the output directory
    /// when artifacts go to disk.
    pub fn from_config(config: &ServerConfig, loader: Arc<ModelLoader>) -> Result<Self> {
        let output_dir = config.effective_output_dir();
        if config.artifact_mode == ArtifactMode::Disk {
            std::fs::create_dir_all(&output_dir).map_err(|e| {
                ServiceError::encoding_failed(format!(
                    "Failed to create output directory {}: {}",
                    output_dir.display(),
                    e
                ))
            })?;
        }

        Ok(Self::new(
            loader,
            AudioEncoder::new(config.sample_rate, config.dither),
            PipelineSettings::from_config(config),
            config.artifact_mode,
            output_dir,
        ))
    }

    /// Shared model loader.
    pub fn loader(&self) -> &Arc<ModelLoader> {
        &self.loader
    }

    /// Directory disk artifacts are written to.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Generates and encodes audio for `request`.
    ///
    /// Blocks for the whole generation; call it from a worker thread.
    pub fn handle(&self, request: &GenerationRequest) -> Result<WavArtifact> {
        let start = Instant::now();
        let handle = self.loader.get_handle()?;
        let buffer = generate(handle.as_ref(), request, &self.settings)?;

        let destination = match self.artifact_mode {
            ArtifactMode::Memory => Destination::Memory,
            ArtifactMode::Disk => Destination::Directory(&self.output_dir),
        };
        let artifact = self.encoder.encode(
            &buffer,
            destination,
            self.settings.prompt_prefix.as_deref(),
            &request.prompt,
        )?;

        info!(
            file = %artifact.file_name,
            seed = artifact.seed,
            duration_sec = artifact.duration_sec,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "generation complete"
        );
        Ok(artifact)
    }
}
