//! Route handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream;
use tokio::io::AsyncReadExt;

use super::server::AppState;
use super::types::{GenerateQuery, HealthResponse};
use crate::error::{Result, ServiceError};
use crate::generation::Ticket;
use crate::models::LoaderState;
use crate::types::{
    content_disposition, ArtifactPayload, CleanupGuard, GenerationRequest, TransientArtifact,
};

/// Chunk size used when streaming disk artifacts.
const STREAM_CHUNK: usize = 64 * 1024;

/// `GET /generate_music?prompt=...&duration=...&seed=...`
pub async fn generate_music(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GenerateQuery>,
) -> Response {
    match run_generation(&state, query).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn run_generation(state: &AppState, query: GenerateQuery) -> Result<Response> {
    let request = GenerationRequest::from_raw(
        query.prompt.as_deref(),
        query.duration.as_deref(),
        query.seed.as_deref(),
        state.config.max_duration_sec,
    )?;

    let ticket = enqueue(state, request, state.config.request_timeout())?;
    let transient = ticket.wait().await??;
    artifact_response(transient).await
}

/// Queues generation for `request`.
///
/// The result owns its file until the response takes it over, so a result
/// nobody waits for any more is deleted by the worker that produced it.
fn enqueue(
    state: &AppState,
    request: GenerationRequest,
    timeout: Duration,
) -> Result<Ticket<Result<TransientArtifact>>> {
    let handler = state.handler.clone();
    state
        .queue
        .submit(timeout, move || handler.handle(&request).map(TransientArtifact::new))
}

/// Builds the WAV response; disk artifacts are streamed and deleted once the
/// body is dropped.
async fn artifact_response(transient: TransientArtifact) -> Result<Response> {
    let (artifact, guard) = transient.into_parts();
    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/wav")
        .header(header::CONTENT_DISPOSITION, content_disposition(&artifact.file_name))
        .header("X-Seed", artifact.seed.to_string())
        .header("X-Sample-Rate", artifact.sample_rate.to_string())
        .header("X-Audio-Duration", format!("{:.3}", artifact.duration_sec));

    let (builder, body) = match artifact.payload {
        ArtifactPayload::Memory(bytes) => (
            builder.header(header::CONTENT_LENGTH, bytes.len()),
            Body::from(bytes),
        ),
        ArtifactPayload::File(path) => {
            let guard = guard.unwrap_or_else(|| CleanupGuard::new(path));
            let file = tokio::fs::File::open(guard.path()).await.map_err(|e| {
                ServiceError::encoding_failed(format!("Failed to open artifact: {}", e))
            })?;
            let len = file
                .metadata()
                .await
                .map_err(|e| ServiceError::encoding_failed(format!("Failed to stat artifact: {}", e)))?
                .len();

            let chunks = stream::unfold(Some((file, guard)), |state| async move {
                let (mut file, guard) = state?;
                let mut buf = vec![0u8; STREAM_CHUNK];
                match file.read(&mut buf).await {
                    Ok(0) => None,
                    Ok(n) => {
                        buf.truncate(n);
                        Some((Ok(Bytes::from(buf)), Some((file, guard))))
                    }
                    Err(e) => Some((Err(e), None)),
                }
            });

            (builder.header(header::CONTENT_LENGTH, len), Body::from_stream(chunks))
        }
    };

    builder
        .body(body)
        .map_err(|e| ServiceError::encoding_failed(format!("Failed to build response: {}", e)))
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let loader = state.loader();
    let last_error = loader.last_error();
    let status = if last_error.is_some() && loader.state() != LoaderState::Ready {
        "degraded"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model_state: loader.state().as_str().to_string(),
        model_version: loader.version(),
        last_error,
        preload: state.preload_status().as_str().to_string(),
        queue_pending: state.queue.pending(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{decode_wav, AudioEncoder, DitherStrategy};
    use crate::config::{Device, ServerConfig};
    use crate::generation::{PipelineSettings, RequestHandler};
    use crate::http::server::serve;
    use crate::http::types::ErrorBody;
    use crate::error::ErrorCode;
    use crate::models::{
        GenerationParams, Generator, GeneratorFactory, ModelHandle, ModelLoader, ModelSize,
        ProceduralFactory,
    };
    use crate::types::ArtifactMode;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    struct TestServer {
        base: String,
        state: Arc<AppState>,
        stop: Option<oneshot::Sender<()>>,
        task: Option<tokio::task::JoinHandle<anyhow::Result<()>>>,
    }

    impl TestServer {
        async fn start(mode: ArtifactMode, dir: &Path) -> Self {
            let mut config = ServerConfig::default();
            config.artifact_mode = mode;
            config.output_dir = Some(dir.to_path_buf());

            let loader = Arc::new(ModelLoader::new(
                Arc::new(ProceduralFactory),
                Device::Cpu,
                ModelSize::Small,
            ));
            let handler = RequestHandler::new(
                loader,
                AudioEncoder::new(config.sample_rate, DitherStrategy::Triangular),
                PipelineSettings::from_config(&config),
                mode,
                dir,
            );
            let state = Arc::new(AppState::new(config, handler));

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let (stop, stopped) = oneshot::channel::<()>();
            let task = tokio::spawn(serve(listener, Arc::clone(&state), async move {
                stopped.await.ok();
            }));

            Self {
                base,
                state,
                stop: Some(stop),
                task: Some(task),
            }
        }

        async fn stop(mut self) {
            if let Some(stop) = self.stop.take() {
                stop.send(()).ok();
            }
            if let Some(task) = self.task.take() {
                task.await.unwrap().unwrap();
            }
        }
    }

    async fn wait_for_empty_dir(dir: &Path) -> bool {
        for _ in 0..100 {
            if std::fs::read_dir(dir).unwrap().next().is_none() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    /// Takes 300 ms per clip and records when it has started and finished.
    #[derive(Default)]
    struct SlowGenerator {
        started: AtomicBool,
        finished: AtomicBool,
    }

    impl Generator for SlowGenerator {
        fn sample_rate(&self) -> u32 {
            32000
        }

        fn version(&self) -> &str {
            "slow-1"
        }

        fn generate(&self, _prompt: &str, params: &GenerationParams) -> Result<Vec<f32>> {
            self.started.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            let len = (params.duration_sec * 32000.0) as usize;
            let samples = (0..len).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
            self.finished.store(true, Ordering::SeqCst);
            Ok(samples)
        }
    }

    struct SlowFactory(Arc<SlowGenerator>);

    impl GeneratorFactory for SlowFactory {
        fn build(
            &self,
            _checkpoint: Option<&Path>,
            _device: Device,
            _size: ModelSize,
        ) -> Result<ModelHandle> {
            Ok(Arc::clone(&self.0) as ModelHandle)
        }
    }

    fn slow_disk_state(dir: &Path) -> (Arc<AppState>, Arc<SlowGenerator>) {
        let mut config = ServerConfig::default();
        config.artifact_mode = ArtifactMode::Disk;
        config.output_dir = Some(dir.to_path_buf());

        let generator = Arc::new(SlowGenerator::default());
        let loader = Arc::new(ModelLoader::new(
            Arc::new(SlowFactory(Arc::clone(&generator))),
            Device::Cpu,
            ModelSize::Small,
        ));
        let handler = RequestHandler::new(
            loader,
            AudioEncoder::new(config.sample_rate, DitherStrategy::Triangular),
            PipelineSettings::from_config(&config),
            ArtifactMode::Disk,
            dir,
        );
        (Arc::new(AppState::new(config, handler)), generator)
    }

    /// Waits for the running job to finish by joining the workers.
    async fn drain(state: &Arc<AppState>) {
        let state = Arc::clone(state);
        tokio::task::spawn_blocking(move || state.queue.shutdown())
            .await
            .unwrap();
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timed_out_request_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let (state, generator) = slow_disk_state(dir.path());
        let request = GenerationRequest::new("rain", 1, Some(3), 30).unwrap();

        let ticket = enqueue(&state, request, Duration::from_millis(100)).unwrap();
        let err = ticket.wait().await.err().unwrap();
        assert_eq!(err.code, ErrorCode::Timeout);

        drain(&state).await;
        assert!(generator.finished.load(Ordering::SeqCst));
        assert!(dir_is_empty(dir.path()), "abandoned artifact was left on disk");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnected_caller_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let (state, generator) = slow_disk_state(dir.path());
        let request = GenerationRequest::new("rain", 1, Some(3), 30).unwrap();

        let ticket = enqueue(&state, request, Duration::from_secs(30)).unwrap();
        while !generator.started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(ticket);

        drain(&state).await;
        assert!(generator.finished.load(Ordering::SeqCst));
        assert!(dir_is_empty(dir.path()), "abandoned artifact was left on disk");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn collected_artifact_survives_until_response() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _generator) = slow_disk_state(dir.path());
        let request = GenerationRequest::new("rain", 1, Some(3), 30).unwrap();

        let transient = enqueue(&state, request, Duration::from_secs(30))
            .unwrap()
            .wait()
            .await
            .unwrap()
            .unwrap();
        assert!(!dir_is_empty(dir.path()));

        let response = artifact_response(transient).await.unwrap();
        assert!(!dir_is_empty(dir.path()));
        drop(response);
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn generate_music_returns_wav_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let server = TestServer::start(ArtifactMode::Disk, dir.path()).await;

        let response = reqwest::get(format!(
            "{}/generate_music?prompt=rainy%20night&duration=2&seed=7",
            server.base
        ))
        .await
        .unwrap();

        assert_eq!(response.status(), 200);
        let headers = response.headers().clone();
        assert_eq!(headers[header::CONTENT_TYPE], "audio/wav");
        assert_eq!(headers["x-seed"], "7");
        assert_eq!(headers["x-sample-rate"], "32000");
        let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\""));
        assert!(disposition.contains("_lo_fi_rainy_night_"));

        let bytes = response.bytes().await.unwrap();
        let (samples, rate) = decode_wav(&bytes).unwrap();
        assert_eq!(rate, 32000);
        assert_eq!(samples.len(), 64000);

        assert!(wait_for_empty_dir(dir.path()).await, "artifact was not removed");
        server.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn seeded_requests_repeat_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let server = TestServer::start(ArtifactMode::Memory, dir.path()).await;
        let url = format!("{}/generate_music?prompt=jazz&duration=1&seed=123", server.base);

        let a = reqwest::get(&url).await.unwrap().bytes().await.unwrap();
        let b = reqwest::get(&url).await.unwrap().bytes().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(server.state.loader().construction_count(), 1);
        server.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unseeded_request_echoes_seed() {
        let dir = tempfile::tempdir().unwrap();
        let server = TestServer::start(ArtifactMode::Memory, dir.path()).await;

        let response = reqwest::get(format!("{}/generate_music?prompt=jazz&duration=1", server.base))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let seed = response.headers()["x-seed"].to_str().unwrap().to_string();
        assert!(seed.parse::<u64>().is_ok());
        server.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalid_input_rejected_before_generation() {
        let dir = tempfile::tempdir().unwrap();
        let server = TestServer::start(ArtifactMode::Disk, dir.path()).await;

        for (query, code) in [
            ("prompt=jazz&duration=0", "INVALID_DURATION"),
            ("prompt=jazz&duration=-5", "INVALID_DURATION"),
            ("prompt=jazz&duration=31", "INVALID_DURATION"),
            ("prompt=jazz&duration=ten", "INVALID_DURATION"),
            ("prompt=&duration=5", "INVALID_PROMPT"),
            ("duration=5", "INVALID_PROMPT"),
            ("prompt=jazz&seed=abc", "INVALID_SEED"),
        ] {
            let response = reqwest::get(format!("{}/generate_music?{}", server.base, query))
                .await
                .unwrap();
            assert_eq!(response.status(), 400, "query {}", query);
            let body: ErrorBody = response.json().await.unwrap();
            assert_eq!(body.error.code, code, "query {}", query);
        }

        assert_eq!(server.state.loader().construction_count(), 0);
        assert_eq!(server.state.loader().state(), LoaderState::Unloaded);
        server.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn health_reports_loader_and_queue() {
        let dir = tempfile::tempdir().unwrap();
        let server = TestServer::start(ArtifactMode::Memory, dir.path()).await;

        let health: HealthResponse = reqwest::get(format!("{}/health", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.model_state, "unloaded");
        assert_eq!(health.preload, "disabled");
        assert_eq!(health.queue_pending, 0);
        assert!(health.model_version.is_none());

        server.state.spawn_preload().await.unwrap();
        let health: HealthResponse = reqwest::get(format!("{}/health", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health.model_state, "ready");
        assert_eq!(health.preload, "finished");
        assert_eq!(health.model_version.as_deref(), Some("procedural-lofi-1"));
        server.stop().await;
    }
}
