// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use camera_compositor::Config;
use camera_compositor::config::PhotoOutputFormat;
use camera_compositor::gpu::{GpuBackendKind, Viewport};
use camera_compositor::render::ScaleMode;
use std::path::PathBuf;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("camera-compositor-config-{}", std::process::id()))
        .join(name)
}

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.camera_id, 0);
    assert_eq!(
        (config.preview_size.width, config.preview_size.height),
        (1280, 720),
        "Preview request should default to 1280x720"
    );
    assert_eq!(config.scale_mode, ScaleMode::Stretch);
    assert_eq!(config.gpu_backend, GpuBackendKind::Software);
    assert_eq!(config.photo_format, PhotoOutputFormat::Png);
    assert_eq!(
        config.encoder_duty_cycle, 2,
        "Encoder should receive every other frame by default"
    );
    assert!(config.overlay.enabled);
}

#[test]
fn test_default_overlay_layout() {
    let layout = Config::default().overlay.layout();
    assert_eq!(layout.timestamp_origin, (160, 300));
    assert_eq!(layout.glyph_stride, 15);
    assert_eq!(layout.glyph_viewport, (220, 60));
    assert_eq!(layout.watermark_rect, Viewport::new(20, 20, 100, 50));
}

#[test]
fn test_config_round_trip() {
    let path = temp_path("round-trip.json");
    let mut config = Config::default();
    config.camera_id = 1;
    config.scale_mode = ScaleMode::CropCenter;
    config.photo_format = PhotoOutputFormat::Jpeg;
    config.jpeg_quality = 80;
    config.output_dir = Some(PathBuf::from("/tmp/shots"));
    config.overlay.timestamp_origin = (10, 20);

    config.save_to(&path).expect("config should save");
    let loaded = Config::load_from(&path);
    assert_eq!(loaded, config, "Saved config should load back unchanged");
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_missing_file_yields_defaults() {
    let loaded = Config::load_from(&temp_path("does-not-exist.json"));
    assert_eq!(loaded, Config::default());
}

#[test]
fn test_malformed_file_yields_defaults() {
    let path = temp_path("malformed.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{ camera_id: not json").unwrap();

    let loaded = Config::load_from(&path);
    assert_eq!(loaded, Config::default(), "Malformed config should fall back");
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_partial_file_fills_defaults() {
    let path = temp_path("partial.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{ "camera_id": 1, "scale_mode": "KeepAspectScale" }"#).unwrap();

    let loaded = Config::load_from(&path);
    assert_eq!(loaded.camera_id, 1);
    assert_eq!(loaded.scale_mode, ScaleMode::KeepAspectScale);
    assert_eq!(loaded.preview_size, Config::default().preview_size);
    assert_eq!(loaded.overlay, Config::default().overlay);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_explicit_output_dir_wins() {
    let mut config = Config::default();
    config.output_dir = Some(PathBuf::from("/srv/captures"));
    assert_eq!(config.output_dir(), PathBuf::from("/srv/captures"));
}
