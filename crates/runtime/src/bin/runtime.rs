use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;
use wintermute_runtime::{
    GameRuntime, HeadlessRender, RenderBackend, RuntimeConfig, SilentMixer,
};

/// The Wintermute game runtime.
#[derive(Parser)]
#[command(author, version, about = "Wintermute game runtime")]
struct Cli {
    /// Project file of the game to run.
    project_file: PathBuf,
    /// Run in a window (the default).
    #[arg(long, conflicts_with = "fullscreen")]
    windowed: bool,
    #[arg(long)]
    fullscreen: bool,
    #[arg(long, default_value_t = 800)]
    width: u32,
    #[arg(long, default_value_t = 600)]
    height: u32,
    /// Log level filter (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log: String,
    /// Save file to load immediately after boot.
    #[arg(long)]
    save: Option<PathBuf>,
    /// Stop after this many frames (headless runs and CI).
    #[arg(long)]
    frames: Option<u64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&cli.log)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut runtime = match boot(&cli) {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = ?err, "startup failed");
            return ExitCode::from(1);
        }
    };
    match run(&mut runtime, &cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = ?err, "fatal runtime error");
            ExitCode::from(2)
        }
    }
}

fn boot(cli: &Cli) -> Result<GameRuntime> {
    let mut config = RuntimeConfig::new(&cli.project_file);
    config.width = cli.width;
    config.height = cli.height;
    config.fullscreen = cli.fullscreen && !cli.windowed;
    let mut runtime = GameRuntime::boot(&config)
        .with_context(|| format!("boot {}", cli.project_file.display()))?;
    if let Some(save) = &cli.save {
        let bytes =
            std::fs::read(save).with_context(|| format!("read save {}", save.display()))?;
        runtime
            .load_save_bytes(&bytes)
            .with_context(|| format!("load save {}", save.display()))?;
    }
    Ok(runtime)
}

fn run(runtime: &mut GameRuntime, cli: &Cli) -> Result<()> {
    // The bundled backends are headless; the real renderer and mixer
    // plug in through the same traits.
    let mut renderer = HeadlessRender::new();
    renderer.resize(cli.width, cli.height);
    let mut mixer = SilentMixer::new();

    const FRAME_MS: u64 = 16;
    let mut frames = 0u64;
    let mut last = Instant::now();
    loop {
        let running = runtime
            .frame(&[], FRAME_MS, &mut renderer, &mut mixer)
            .context("frame")?;
        frames += 1;
        if !running {
            return Ok(());
        }
        if cli.frames.is_some_and(|limit| frames >= limit) {
            return Ok(());
        }
        // Idle games stop on their own once no script is live.
        if runtime.scheduler.live_count() == 0 && cli.frames.is_none() {
            return Ok(());
        }
        let elapsed = last.elapsed();
        if elapsed < Duration::from_millis(FRAME_MS) {
            std::thread::sleep(Duration::from_millis(FRAME_MS) - elapsed);
        }
        last = Instant::now();
    }
}
