//! lofi-server: lo-fi music generation service.
//!
//! This binary runs in one of four modes:
//! - `serve`: HTTP API
//! - `generate`: one-off local generation for testing
//! - `extend`: loop an existing WAV to a longer duration
//! - `client`: request a track from a running server and save it

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lofi_server::audio::extend_wav;
use lofi_server::cli::{ClientArgs, Cli, Command, ExtendArgs, GenerateArgs, ServeArgs};
use lofi_server::client::{catalog_listing, run_client};
use lofi_server::config::ServerConfig;
use lofi_server::generation::RequestHandler;
use lofi_server::http::run_server;
use lofi_server::models::ModelLoader;
use lofi_server::types::{ArtifactMode, GenerationRequest};

fn main() {
    init_tracing();

    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env().add_directive(
        "lofi_server=info"
            .parse()
            .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
    );
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => run_serve(&args),
        Command::Generate(args) => run_generate(&args),
        Command::Extend(args) => run_extend(&args),
        Command::Client(args) => run_client_mode(&args),
    }
}

/// Starts the HTTP API on a multi-threaded runtime.
fn run_serve(args: &ServeArgs) -> anyhow::Result<()> {
    let mut config = ServerConfig::from_env();
    args.apply(&mut config);

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(run_server(config))
}

/// Generates one track in-process and writes it to disk.
fn run_generate(args: &GenerateArgs) -> anyhow::Result<()> {
    let mut config = ServerConfig::from_env();
    if let Some(device) = args.device {
        config.device = device.into();
    }
    config.artifact_mode = ArtifactMode::Memory;
    if let Some(message) = config.validate() {
        anyhow::bail!("invalid configuration: {}", message);
    }

    let output_path = args.output_path();
    let request = GenerationRequest::new(
        &args.prompt,
        i64::from(args.duration),
        args.seed,
        config.max_duration_sec,
    )?;

    eprintln!("=== lofi-server generate ===");
    eprintln!("Prompt: \"{}\"", request.prompt);
    eprintln!("Duration: {}s", request.duration_sec);
    eprintln!("Output: {}", output_path.display());

    let loader = Arc::new(ModelLoader::from_config(&config)?);
    let handler = RequestHandler::from_config(&config, loader)?;

    let start = Instant::now();
    let artifact = handler.handle(&request)?;
    let bytes = artifact
        .read_bytes()
        .context("failed to read generated audio")?;
    std::fs::write(&output_path, &bytes)
        .with_context(|| format!("failed to write {}", output_path.display()))?;

    eprintln!(
        "Wrote {:.1}s at {} Hz (seed {}) in {:.2}s",
        artifact.duration_sec,
        artifact.sample_rate,
        artifact.seed,
        start.elapsed().as_secs_f32()
    );
    Ok(())
}

/// Loops an existing clip up to the target duration.
fn run_extend(args: &ExtendArgs) -> anyhow::Result<()> {
    let artifact = extend_wav(
        &args.input,
        &args.output,
        args.target,
        &args.loop_options(),
        args.seed,
    )?;
    eprintln!(
        "Wrote {} ({:.1}s)",
        args.output.display(),
        artifact.duration_sec
    );
    Ok(())
}

fn run_client_mode(args: &ClientArgs) -> anyhow::Result<()> {
    if args.list_tags {
        print!("{}", catalog_listing());
        return Ok(());
    }

    let saved = run_client(&args.options()?)?;
    println!("{}", saved.path.display());
    eprintln!("Prompt: \"{}\"", saved.prompt.prompt);
    if let Some(seed) = saved.seed {
        eprintln!("Seed: {}", seed);
    }
    if saved.extended {
        eprintln!("Looped to {}s", args.duration);
    }
    Ok(())
}
