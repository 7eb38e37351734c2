//! tonegraph CLI: realtime playback and WAV export.
//!
//! Usage:
//!   tonegraph -open path/to/project.toml
//!   tonegraph -open path/to/project.toml --wav output.wav --seconds 30
//!
//! `/` in place of the path means "no project".

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::Parser;
use tg_master::{Controller, ControllerError};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tonegraph")]
#[command(about = "Node-graph synthesizer and composition player")]
struct Cli {
    /// Project file to load at startup (`/` for none)
    #[arg(long, value_name = "PATH")]
    open: Option<String>,

    /// Render to this WAV file instead of playing
    #[arg(long, value_name = "OUT")]
    wav: Option<PathBuf>,

    /// Longest offline render, in seconds
    #[arg(long, default_value_t = 300.0)]
    seconds: f64,
}

impl Cli {
    fn project(&self) -> Option<&Path> {
        match self.open.as_deref() {
            None | Some("/") => None,
            Some(path) => Some(Path::new(path)),
        }
    }
}

/// Accept the single-dash `-open` spelling.
fn normalize_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|a| if a == "-open" { OsString::from("--open") } else { a })
        .collect()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse_from(normalize_args(std::env::args_os()));
    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), ControllerError> {
    let mut ctrl = Controller::new();
    match cli.project() {
        Some(path) => ctrl.load_project(path)?,
        None => info!("no project given, starting empty"),
    }

    let state = ctrl.state();
    println!("Synths:   {}", state.synths.len());
    println!("Patterns: {}", state.patterns.len());
    println!("Speed:    {} s/measure", state.base_speed);
    println!();

    match &cli.wav {
        Some(path) => render_to_wav(&ctrl, path, cli.seconds),
        None => play_audio(&mut ctrl),
    }
}

fn play_audio(ctrl: &mut Controller) -> Result<(), ControllerError> {
    ctrl.play()?;
    println!("Playing...");

    if let Some(report) = ctrl.wait() {
        if let Some(e) = report.error {
            eprintln!("Playback stopped: {}", e);
        }
        println!(
            "Done. {} buffers, {} underruns.",
            report.buffers, report.underruns
        );
    }
    Ok(())
}

fn render_to_wav(ctrl: &Controller, path: &Path, seconds: f64) -> Result<(), ControllerError> {
    println!(
        "Rendering to {} at {} Hz...",
        path.display(),
        ctrl.config().sample_rate
    );
    let wav = ctrl.render_to_wav(seconds)?;
    println!("Rendered {} bytes", wav.len());
    std::fs::write(path, &wav)?;
    println!("Done.");
    Ok(())
}
