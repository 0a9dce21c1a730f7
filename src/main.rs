// SPDX-License-Identifier: GPL-3.0-only

use camera_compositor::render::ScaleMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-compositor")]
#[command(about = "Real-time camera preview compositor")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Config file (default: ~/.config/camera-compositor/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Camera id to use (from 'camera-compositor list')
    #[arg(short, long, global = true)]
    camera: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Run the preview headless and report the frame rate
    Preview {
        /// Preview duration in seconds
        #[arg(short, long, default_value = "5")]
        seconds: u64,

        /// stretch, keep-aspect-viewport, keep-aspect-scale or crop-center
        #[arg(long)]
        scale: Option<ScaleMode>,
    },

    /// Take a snapshot of the composed preview
    Snapshot {
        /// Output file path; the extension picks PNG or JPEG
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Record composed frames as raw RGBA
    Record {
        /// Recording duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Output file path (default: <output dir>/TIMESTAMP.rgba)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config {
        /// Also write it to this file
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=camera_compositor=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let args = Cli::parse();
    let config = cli::load_config(args.config.as_deref(), args.camera);

    match args.command {
        Commands::List => cli::list_cameras(),
        Commands::Preview { seconds, scale } => cli::run_preview(config, seconds, scale),
        Commands::Snapshot { output } => cli::take_snapshot(config, output),
        Commands::Record { duration, output } => cli::record_video(config, duration, output),
        Commands::Config { write } => cli::show_config(&config, write),
    }
}
