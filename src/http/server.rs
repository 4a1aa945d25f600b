//! HTTP server setup.
//!
//! Builds the axum router over shared [`AppState`], starts the optional
//! background model preload, and serves until Ctrl-C.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::handlers;
use crate::config::ServerConfig;
use crate::generation::{GenerationQueue, RequestHandler};
use crate::models::ModelLoader;

/// Progress of the background model preload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreloadStatus {
    /// Preload is turned off; the first request loads the model.
    Disabled = 0,
    /// Preload task is running.
    Pending = 1,
    /// Preload finished with a ready model.
    Finished = 2,
    /// Preload failed; the next request retries.
    Failed = 3,
}

impl PreloadStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PreloadStatus::Pending,
            2 => PreloadStatus::Finished,
            3 => PreloadStatus::Failed,
            _ => PreloadStatus::Disabled,
        }
    }

    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PreloadStatus::Disabled => "disabled",
            PreloadStatus::Pending => "pending",
            PreloadStatus::Finished => "finished",
            PreloadStatus::Failed => "failed",
        }
    }
}

/// State shared across all request handlers.
pub struct AppState {
    /// Service configuration.
    pub config: ServerConfig,
    /// Generation orchestration, cloned into each queued job.
    pub handler: RequestHandler,
    /// Worker queue running generation off the executor.
    pub queue: GenerationQueue,
    preload: Arc<AtomicU8>,
}

impl AppState {
    /// Creates state around an existing handler.
    pub fn new(config: ServerConfig, handler: RequestHandler) -> Self {
        let queue = GenerationQueue::new(config.workers, config.queue_capacity);
        Self {
            config,
            handler,
            queue,
            preload: Arc::new(AtomicU8::new(PreloadStatus::Disabled as u8)),
        }
    }

    /// Builds the production state from configuration.
    pub fn from_config(config: ServerConfig) -> crate::error::Result<Self> {
        let loader = Arc::new(ModelLoader::from_config(&config)?);
        let handler = RequestHandler::from_config(&config, loader)?;
        Ok(Self::new(config, handler))
    }

    /// Shared model loader.
    pub fn loader(&self) -> &Arc<ModelLoader> {
        self.handler.loader()
    }

    /// Current preload status.
    pub fn preload_status(&self) -> PreloadStatus {
        PreloadStatus::from_u8(self.preload.load(Ordering::SeqCst))
    }

    /// Starts loading the model on the blocking pool.
    ///
    /// Requests arriving before it finishes wait on the loader's lock.
    pub fn spawn_preload(&self) -> tokio::task::JoinHandle<()> {
        let loader = Arc::clone(self.loader());
        let status = Arc::clone(&self.preload);
        status.store(PreloadStatus::Pending as u8, Ordering::SeqCst);

        tokio::task::spawn_blocking(move || {
            let outcome = match loader.get_handle() {
                Ok(_) => PreloadStatus::Finished,
                Err(e) => {
                    warn!(error = %e, "model preload failed; first request will retry");
                    PreloadStatus::Failed
                }
            };
            status.store(outcome as u8, Ordering::SeqCst);
        })
    }
}

/// Builds the router with tracing and CORS layers.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/generate_music", get(handlers::generate_music))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serves on `listener` until `shutdown` resolves, then drains the workers.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = build_router(Arc::clone(&state));
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;

    let drain = Arc::clone(&state);
    tokio::task::spawn_blocking(move || drain.queue.shutdown())
        .await
        .context("failed to stop generation workers")?;
    Ok(())
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Runs the HTTP service described by `config`.
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    if let Some(message) = config.validate() {
        anyhow::bail!("invalid configuration: {}", message);
    }

    let addr = config.bind_address();
    let preload = config.preload;
    let state = Arc::new(AppState::from_config(config)?);

    if preload {
        state.spawn_preload();
    }

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(
        address = %addr,
        output_dir = %state.handler.output_dir().display(),
        "listening"
    );

    serve(listener, state, shutdown_signal()).await?;
    info!("server stopped");
    Ok(())
}
