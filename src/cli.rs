// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! Every command runs the full pipeline headless: a camera view on an
//! off-screen surface, fed by the synthetic camera.
//! - Listing available cameras
//! - Running the preview for a while
//! - Taking a snapshot
//! - Recording raw frames
//! - Printing the effective configuration

use camera_compositor::backends::camera::{CameraProvider, SyntheticProvider};
use camera_compositor::config::Config;
use camera_compositor::errors::AppResult;
use camera_compositor::gpu::SurfaceTarget;
use camera_compositor::pipelines::photo::SaveCallback;
use camera_compositor::render::{ScaleMode, VideoEncoder};
use camera_compositor::{CameraView, Services};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// How long to wait for the first composed frame
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);
/// Frames from the start of a stream are skipped before a snapshot
const WARMUP: Duration = Duration::from_millis(500);
/// How long to wait for a snapshot to reach the disk
const SAVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Load the config from `path`, or from the default location
pub fn load_config(path: Option<&Path>, camera: Option<u32>) -> Config {
    let mut config = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    if let Some(camera) = camera {
        config.camera_id = camera;
    }
    config
}

/// List all available cameras
pub fn list_cameras() -> Result<(), Box<dyn std::error::Error>> {
    let provider = SyntheticProvider::new();
    let cameras = provider.cameras();

    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for camera in &cameras {
        println!(
            "  [{}] {} ({:?}, mounted at {})",
            camera.id, camera.name, camera.facing, camera.orientation
        );
        if let Ok(mut device) = provider.open(camera.id) {
            if let Ok(params) = device.parameters() {
                let sizes: Vec<String> =
                    params.preview_sizes.iter().map(|s| s.to_string()).collect();
                println!("      Preview sizes: {}", sizes.join(", "));
            }
            device.release();
        }
        println!();
    }

    Ok(())
}

/// Run the preview for `seconds`, or until Ctrl+C
pub fn run_preview(
    config: Config,
    seconds: u64,
    scale: Option<ScaleMode>,
) -> Result<(), Box<dyn std::error::Error>> {
    let services = Services::from_config(&config, None)?;
    let view = services.camera_view(Arc::new(SyntheticProvider::new()));
    if let Some(scale) = scale {
        view.set_scale_mode(scale);
    }
    attach_surface(&view, &config)?;

    println!("Previewing camera {} ({})", config.camera_id, view.scale_mode());
    println!("Press Ctrl+C to stop early");
    let stop = stop_flag()?;
    wait_for_first_frame(&view)?;
    if let Some(session) = view.session() {
        println!(
            "Session: {} at {}, rotation {}°",
            session.camera.name,
            session.preview_size(),
            session.rotation_degrees()
        );
    }

    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(seconds) && !stop.load(Ordering::SeqCst) {
        print!("\rFrames drawn: {}", view.frames_drawn());
        std::io::Write::flush(&mut std::io::stdout())?;
        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    let frames = view.frames_drawn();
    let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
    view.surface_destroyed()?;
    println!("Drew {} frames ({:.1} fps)", frames, frames as f64 / elapsed);
    Ok(())
}

/// Compose one frame and save it
pub fn take_snapshot(
    config: Config,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (saved_tx, saved_rx) = mpsc::channel::<AppResult<PathBuf>>();
    let on_saved: SaveCallback = Arc::new(move |result: AppResult<PathBuf>| {
        let _ = saved_tx.send(result);
    });
    let services = Services::from_config(&config, Some(on_saved))?;
    let view = services.camera_view(Arc::new(SyntheticProvider::new()));
    attach_surface(&view, &config)?;

    println!("Capturing...");
    wait_for_first_frame(&view)?;
    std::thread::sleep(WARMUP);

    let requested = view.take_picture(output)?;
    let saved = saved_rx
        .recv_timeout(SAVE_TIMEOUT)
        .map_err(|_| format!("Snapshot {} was not written", requested.display()))??;

    view.surface_destroyed()?;
    services.photos.finish();
    println!("Photo saved: {}", saved.display());
    Ok(())
}

/// Record composed frames for `duration` seconds as raw RGBA
pub fn record_video(
    config: Config,
    duration: u64,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let services = Services::from_config(&config, None)?;
    let output_path = match output {
        Some(path) => path,
        None => camera_compositor::storage::capture_file(&config.output_dir(), "rgba")?,
    };
    let (width, height) = (config.preview_size.width, config.preview_size.height);
    let recorder = Arc::new(services.recorder(&output_path, width, height)?);

    let view = services.camera_view(Arc::new(SyntheticProvider::new()));
    view.set_video_encoder(Some(Arc::clone(&recorder) as Arc<dyn VideoEncoder>));
    attach_surface(&view, &config)?;

    println!("Output: {} ({}x{} RGBA)", output_path.display(), width, height);
    println!("Duration: {} seconds", duration);
    println!();
    println!("Recording... (press Ctrl+C to stop early)");
    let stop = stop_flag()?;
    wait_for_first_frame(&view)?;

    let start = Instant::now();
    let target_duration = Duration::from_secs(duration);
    while start.elapsed() < target_duration {
        if stop.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }

        let elapsed = start.elapsed().as_secs();
        print!(
            "\rRecording: {:02}:{:02}  frames: {}",
            elapsed / 60,
            elapsed % 60,
            recorder.frames_written()
        );
        std::io::Write::flush(&mut std::io::stdout())?;

        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    view.set_video_encoder(None);
    view.surface_destroyed()?;
    let final_path = recorder.stop()?;
    println!(
        "Video saved: {} ({} frames)",
        final_path.display(),
        recorder.frames_written()
    );
    Ok(())
}

/// Print the effective configuration, optionally writing it out
pub fn show_config(
    config: &Config,
    write: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(config)?);
    if let Some(path) = write {
        config.save_to(&path)?;
        println!();
        println!("Written to {}", path.display());
    }
    Ok(())
}

fn attach_surface(view: &CameraView, config: &Config) -> AppResult<()> {
    let target = SurfaceTarget::offscreen(
        "preview",
        config.preview_size.width,
        config.preview_size.height,
    );
    view.surface_created(target)
}

fn wait_for_first_frame(view: &CameraView) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    while start.elapsed() < FIRST_FRAME_TIMEOUT {
        if view.session().is_some() && view.frames_drawn() > 0 {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(16));
    }
    Err("Camera did not deliver a frame".into())
}

fn stop_flag() -> Result<Arc<AtomicBool>, Box<dyn std::error::Error>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;
    Ok(stop)
}
