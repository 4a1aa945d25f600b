//! Blocking client for a remote generation server.
//!
//! Requests a track, saves it locally and loop-extends it when the wanted
//! duration is longer than the server will generate in one call.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use super::prompt::{build_prompt, BuiltPrompt, PromptSelection};
use crate::audio::{extend_wav, LoopOptions};
use crate::error::{Result, ServiceError};
use crate::http::ErrorBody;

/// Longest clip the default server generates in one request.
pub const DEFAULT_BACKEND_MAX_SEC: u32 = 30;

/// A track returned by the server.
#[derive(Debug, Clone)]
pub struct RemoteTrack {
    /// WAV bytes.
    pub bytes: Vec<u8>,
    /// Seed reported in `X-Seed`.
    pub seed: Option<u64>,
}

/// HTTP client for `/generate_music`.
pub struct RemoteClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl RemoteClient {
    /// Creates a client for the server at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ServiceError::remote_request_failed(format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Requests one track.
    pub fn generate(&self, prompt: &str, duration_sec: u32, seed: Option<u64>) -> Result<RemoteTrack> {
        let url = format!("{}/generate_music", self.base_url);
        let mut query = vec![
            ("prompt", prompt.to_string()),
            ("duration", duration_sec.to_string()),
        ];
        if let Some(seed) = seed {
            query.push(("seed", seed.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .map_err(|e| ServiceError::remote_request_failed(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = match response.json::<ErrorBody>() {
                Ok(body) => format!("{} {}", body.error.code, body.error.message),
                Err(_) => "no error details".to_string(),
            };
            return Err(ServiceError::remote_request_failed(format!(
                "HTTP {}: {}",
                status, detail
            )));
        }

        let seed = response
            .headers()
            .get("x-seed")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok());
        let bytes = response
            .bytes()
            .map_err(|e| ServiceError::remote_request_failed(format!("Failed to read body: {}", e)))?
            .to_vec();

        Ok(RemoteTrack { bytes, seed })
    }
}

/// Options for one client run.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Server base URL.
    pub url: String,
    /// Tags or preset to build the prompt from.
    pub selection: PromptSelection,
    /// Wanted track length.
    pub duration_sec: u32,
    /// Longest clip the server generates.
    pub backend_max_sec: u32,
    /// Optional fixed seed.
    pub seed: Option<u64>,
    /// Loop extension settings for long tracks.
    pub loop_options: LoopOptions,
    /// Directory tracks are saved into.
    pub output_dir: PathBuf,
    /// HTTP timeout per request.
    pub timeout: Duration,
}

/// Result of one client run.
#[derive(Debug, Clone)]
pub struct SavedTrack {
    pub prompt: BuiltPrompt,
    pub path: PathBuf,
    pub seed: Option<u64>,
    pub extended: bool,
}

/// Builds a prompt, fetches the track and saves it under `output_dir`.
pub fn run_client(options: &ClientOptions) -> Result<SavedTrack> {
    if options.duration_sec == 0 || options.backend_max_sec == 0 {
        return Err(ServiceError::invalid_duration(
            i64::from(options.duration_sec.min(options.backend_max_sec)),
            options.backend_max_sec,
        ));
    }

    let prompt = build_prompt(&options.selection, &mut rand::thread_rng())?;
    let request_sec = options.duration_sec.min(options.backend_max_sec);
    info!(prompt = %prompt.prompt, request_sec, "requesting track");

    let client = RemoteClient::new(&options.url, options.timeout)?;
    let track = client.generate(&prompt.prompt, request_sec, options.seed)?;

    fs::create_dir_all(&options.output_dir).map_err(|e| {
        ServiceError::encoding_failed(format!(
            "Failed to create {}: {}",
            options.output_dir.display(),
            e
        ))
    })?;
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let path = options.output_dir.join(prompt.file_name(&timestamp));
    save(&path, &track.bytes)?;

    let extended = options.duration_sec > request_sec;
    if extended {
        warn!(
            wanted = options.duration_sec,
            generated = request_sec,
            "looping generated clip to reach the requested length"
        );
        extend_wav(
            &path,
            &path,
            options.duration_sec as f32,
            &options.loop_options,
            track.seed.unwrap_or_default(),
        )?;
    }

    info!(path = %path.display(), "saved track");
    Ok(SavedTrack {
        prompt,
        path,
        seed: track.seed,
        extended,
    })
}

fn save(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).map_err(|e| {
        ServiceError::encoding_failed(format!("Failed to write {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{encode_wav, read_wav, DitherStrategy};
    use crate::error::ErrorCode;
    use crate::http::{ErrorDetail, GenerateQuery};
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const STUB_RATE: u32 = 8000;

    /// Serves WAVs of the requested length, rejecting anything over 2 s.
    async fn stub_generate(Query(query): Query<GenerateQuery>) -> Response {
        let duration: u32 = query.duration.as_deref().unwrap_or("10").parse().unwrap();
        if duration > 2 {
            let body = ErrorBody {
                error: ErrorDetail {
                    code: "INVALID_DURATION".to_string(),
                    message: "too long".to_string(),
                    hint: "shorter".to_string(),
                },
            };
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
        let samples: Vec<f32> = (0..(duration * STUB_RATE) as usize)
            .map(|i| (i as f32 * 0.03).sin() * 0.5)
            .collect();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let bytes = encode_wav(&samples, STUB_RATE, DitherStrategy::None, &mut rng).unwrap();
        ([("x-seed", "5")], bytes).into_response()
    }

    /// Starts the stub on its own runtime thread and returns its base URL.
    fn start_stub() -> String {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                tx.send(listener.local_addr().unwrap()).unwrap();
                let app = Router::new().route("/generate_music", get(stub_generate));
                axum::serve(listener, app).await.unwrap();
            });
        });
        format!("http://{}", rx.recv().unwrap())
    }

    fn options(url: String, dir: &Path, duration_sec: u32) -> ClientOptions {
        ClientOptions {
            url,
            selection: PromptSelection::Preset("1".to_string()),
            duration_sec,
            backend_max_sec: 2,
            seed: None,
            loop_options: LoopOptions::default(),
            output_dir: dir.to_path_buf(),
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn saves_track_within_backend_cap() {
        let url = start_stub();
        let dir = tempfile::tempdir().unwrap();

        let saved = run_client(&options(url, dir.path(), 2)).unwrap();
        assert!(!saved.extended);
        assert_eq!(saved.seed, Some(5));
        let name = saved.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_lofi_chillhop_focus_library.wav"), "{}", name);
        assert!(!name.contains("bpm"));

        let (samples, rate) = read_wav(&saved.path).unwrap();
        assert_eq!(rate, STUB_RATE);
        assert_eq!(samples.len(), 2 * STUB_RATE as usize);
    }

    #[test]
    fn loop_extends_past_backend_cap() {
        let url = start_stub();
        let dir = tempfile::tempdir().unwrap();

        let saved = run_client(&options(url, dir.path(), 5)).unwrap();
        assert!(saved.extended);

        // 3 repeats of 2 s with two 0.5 s overlaps
        let (samples, _) = read_wav(&saved.path).unwrap();
        assert_eq!(samples.len(), 3 * 16000 - 2 * 4000);
    }

    #[test]
    fn server_errors_are_reported() {
        let url = start_stub();
        let client = RemoteClient::new(&url, Duration::from_secs(10)).unwrap();
        let err = client.generate("lofi", 9, None).unwrap_err();
        assert_eq!(err.code, ErrorCode::RemoteRequestFailed);
        assert!(err.message.contains("INVALID_DURATION"));
    }

    #[test]
    fn unreachable_server_is_reported() {
        let client = RemoteClient::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let err = client.generate("lofi", 1, None).unwrap_err();
        assert_eq!(err.code, ErrorCode::RemoteRequestFailed);
    }
}
