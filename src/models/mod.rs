//! Model lifecycle components.
//!
//! - [`Generator`](backend::Generator): black-box generation seam
//! - [`CheckpointFetcher`](checkpoint::CheckpointFetcher): remote weights download
//! - [`ModelLoader`](loader::ModelLoader): lazy, once-only construction
//! - [`ProceduralGenerator`](procedural::ProceduralGenerator): built-in backend

pub mod backend;
pub mod checkpoint;
pub mod loader;
pub mod procedural;

pub use backend::{GenerationParams, Generator, GeneratorFactory, ModelHandle, ModelSize};
pub use checkpoint::{
    CheckpointFetcher, CheckpointSource, HttpObjectStore, RemoteStore, DEFAULT_ENDPOINT,
    DEFAULT_FETCH_RETRIES,
};
pub use loader::{LoaderState, ModelLoader};
pub use procedural::{ProceduralFactory, ProceduralGenerator, ProceduralWeights};
