//! Lazy, once-only model loading.
//!
//! The first caller of [`ModelLoader::get_handle`] fetches the checkpoint and
//! builds the generator while holding the construction lock; concurrent
//! callers wait on that lock and then share the same handle. A failed or
//! panicking construction returns the loader to `Unloaded` so the next
//! request retries.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::backend::{GeneratorFactory, ModelHandle, ModelSize};
use super::checkpoint::{CheckpointFetcher, CheckpointSource, HttpObjectStore};
use super::procedural::ProceduralFactory;
use crate::config::{Device, ServerConfig};
use crate::error::Result;

/// Lifecycle state of the shared model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LoaderState {
    /// Not constructed yet, or the last construction failed.
    Unloaded = 0,
    /// Construction is in progress.
    Loading = 1,
    /// The handle is available.
    Ready = 2,
}

impl LoaderState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LoaderState::Loading,
            2 => LoaderState::Ready,
            _ => LoaderState::Unloaded,
        }
    }

    /// Returns the string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoaderState::Unloaded => "unloaded",
            LoaderState::Loading => "loading",
            LoaderState::Ready => "ready",
        }
    }
}

/// Remote checkpoint to apply during construction.
struct CheckpointPlan {
    fetcher: CheckpointFetcher,
    source: CheckpointSource,
    local_path: PathBuf,
}

/// Restores `Unloaded` unless construction completed.
struct LoadingGuard<'a> {
    state: &'a AtomicU8,
    armed: bool,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.store(LoaderState::Unloaded as u8, Ordering::SeqCst);
        }
    }
}

/// Owns the process-wide generator handle.
pub struct ModelLoader {
    factory: Arc<dyn GeneratorFactory>,
    checkpoint: Option<CheckpointPlan>,
    device: Device,
    size: ModelSize,
    lock: Mutex<()>,
    ready: OnceLock<ModelHandle>,
    state: AtomicU8,
    last_error: Mutex<Option<String>>,
    constructions: AtomicUsize,
}

impl ModelLoader {
    /// Creates a loader that builds generators without a checkpoint.
    pub fn new(factory: Arc<dyn GeneratorFactory>, device: Device, size: ModelSize) -> Self {
        Self {
            factory,
            checkpoint: None,
            device,
            size,
            lock: Mutex::new(()),
            ready: OnceLock::new(),
            state: AtomicU8::new(LoaderState::Unloaded as u8),
            last_error: Mutex::new(None),
            constructions: AtomicUsize::new(0),
        }
    }

    /// Fetches `source` to `local_path` and applies it on construction.
    pub fn with_checkpoint(
        mut self,
        fetcher: CheckpointFetcher,
        source: CheckpointSource,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        self.checkpoint = Some(CheckpointPlan {
            fetcher,
            source,
            local_path: local_path.into(),
        });
        self
    }

    /// Builds the production loader: procedural generator, HTTP checkpoint store.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let loader = Self::new(Arc::new(ProceduralFactory), config.device, config.model_size);

        match (&config.checkpoint, config.effective_checkpoint_path()) {
            (Some(source), Some(local_path)) => {
                let store = Arc::new(HttpObjectStore::new()?);
                let fetcher = CheckpointFetcher::new(store, config.fetch_retries);
                Ok(loader.with_checkpoint(fetcher, source.clone(), local_path))
            }
            _ => Ok(loader),
        }
    }

    /// Returns the shared handle, constructing it on first use.
    ///
    /// Blocks while another caller is constructing.
    pub fn get_handle(&self) -> Result<ModelHandle> {
        if let Some(handle) = self.ready.get() {
            return Ok(handle.clone());
        }

        // A panic in a previous construction poisons the lock; the guard has
        // already reset the state, so the lock is still usable.
        let _lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = self.ready.get() {
            return Ok(handle.clone());
        }

        self.state.store(LoaderState::Loading as u8, Ordering::SeqCst);
        let mut guard = LoadingGuard {
            state: &self.state,
            armed: true,
        };

        self.constructions.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();
        match self.construct() {
            Ok(handle) => {
                let handle = self.ready.get_or_init(|| handle).clone();
                self.state.store(LoaderState::Ready as u8, Ordering::SeqCst);
                guard.armed = false;
                self.set_last_error(None);
                info!(
                    version = handle.version(),
                    sample_rate = handle.sample_rate(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "model ready"
                );
                Ok(handle)
            }
            Err(e) => {
                error!(error = %e, "model construction failed");
                self.set_last_error(Some(e.to_string()));
                Err(e)
            }
        }
    }

    fn construct(&self) -> Result<ModelHandle> {
        let checkpoint = match &self.checkpoint {
            Some(plan) => Some(plan.fetcher.ensure_local(&plan.source, &plan.local_path)?),
            None => None,
        };
        self.factory
            .build(checkpoint.as_deref(), self.device, self.size)
    }

    fn set_last_error(&self, message: Option<String>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = message;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LoaderState {
        LoaderState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Message of the most recent failed construction, cleared on success.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Version of the loaded weights, once ready.
    pub fn version(&self) -> Option<String> {
        self.ready.get().map(|handle| handle.version().to_string())
    }

    /// Number of construction attempts so far.
    pub fn construction_count(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    /// Local checkpoint path, if a checkpoint is configured.
    pub fn checkpoint_path(&self) -> Option<&Path> {
        self.checkpoint.as_ref().map(|plan| plan.local_path.as_path())
    }
}
