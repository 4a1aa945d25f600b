//! Command-line client for a remote generation server.

pub mod prompt;
pub mod remote;

pub use prompt::{build_prompt, catalog_listing, BuiltPrompt, PromptSelection};
pub use remote::{run_client, ClientOptions, RemoteClient, RemoteTrack, SavedTrack, DEFAULT_BACKEND_MAX_SEC};
