//! Integration tests for persisted settings.

use progressive_tracer::prelude::*;
use tempfile::TempDir;

#[test]
fn test_settings_roundtrip() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("nested").join("settings.json");

    let settings = Settings {
        width: 320,
        height: 200,
        mode: RenderMode::DebugNormals,
        camera_yaw: 30.0,
        max_bounces: 8,
        orbit_every: 4,
        ..Default::default()
    };
    settings.save_to(&path).expect("Failed to save settings");

    let loaded = Settings::load_from(&path).expect("Failed to load settings");
    assert_eq!(loaded, settings);
}

#[test]
fn test_malformed_settings_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, "{ width: ").unwrap();

    let err = Settings::load_from(&path).unwrap_err();
    match err {
        Error::Settings { path: p, .. } => assert_eq!(p, path),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_missing_settings_file() {
    let dir = TempDir::new().unwrap();
    let result = Settings::load_from(dir.path().join("absent.json"));
    assert!(matches!(result, Err(Error::Settings { .. })));
}

#[test]
fn test_loaded_zero_size_is_sanitized() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{"width": 0, "height": 0, "max_bounces": 0}"#).unwrap();

    let loaded = Settings::load_from(&path).unwrap();
    assert!(loaded.resolution().is_ok());
    assert!(loaded.max_bounces > 0);
}

#[test]
fn test_renderer_from_settings() {
    let settings = Settings {
        width: 8,
        height: 6,
        mode: RenderMode::DebugNormals,
        camera_distance: 3.0,
        ..Default::default()
    };
    let mut ctx = HeadlessContext::new();
    let mut renderer = Renderer::from_settings(&mut ctx, &settings, Scene::default()).unwrap();
    assert_eq!((renderer.width(), renderer.height()), (8, 6));
    assert_eq!(renderer.mode(), RenderMode::DebugNormals);
    assert!((renderer.camera().distance() - 3.0).abs() < 1e-4);
    assert!(!renderer.is_invalidated());

    renderer.render(&mut ctx).unwrap();
    assert_eq!(renderer.samples(), 0);
}
