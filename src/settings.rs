//! Persistent renderer settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use glam::Vec3;

use crate::camera::Camera;
use crate::render::{RenderMode, DEFAULT_MAX_BOUNCES};
use crate::util::{Error, Resolution, Result};

/// Settings that persist between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Surface
    pub width: u32,
    pub height: u32,
    pub mode: RenderMode,

    // Camera
    pub camera_focus: [f32; 3],
    pub camera_distance: f32,
    pub camera_yaw: f32,   // degrees
    pub camera_pitch: f32, // degrees
    pub orbit_sensitivity: f32, // radians per orbit step

    // Tracer
    pub max_bounces: u32,

    // Headless runner
    pub frames: u32,
    /// Orbit the camera every N frames (0 = never).
    pub orbit_every: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            mode: RenderMode::Standard,
            camera_focus: [0.0, 1.0, 0.0],
            camera_distance: 4.0,
            camera_yaw: 0.0,
            camera_pitch: 0.0,
            orbit_sensitivity: 0.01,
            max_bounces: DEFAULT_MAX_BOUNCES,
            frames: 64,
            orbit_every: 0,
        }
    }
}

impl Settings {
    /// Get settings file path
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("progressive-tracer");
            p.push("settings.json");
            p
        })
    }

    /// Load settings from the config dir, defaults on missing or corrupt file
    pub fn load() -> Self {
        Self::path()
            .and_then(|p| std::fs::read_to_string(&p).ok())
            .and_then(|s| serde_json::from_str::<Self>(&s).ok())
            .unwrap_or_default()
            .sanitized()
    }

    /// Load settings from `path`, failing on unreadable or malformed files
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| settings_error(path, e))?;
        let settings: Self = serde_json::from_str(&text).map_err(|e| settings_error(path, e))?;
        Ok(settings.sanitized())
    }

    /// Save settings to the config dir
    pub fn save(&self) -> Result<()> {
        let path = Self::path().ok_or_else(|| Error::other("no config directory"))?;
        self.save_to(path)
    }

    /// Save settings to `path` as pretty JSON, creating parent dirs
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| settings_error(path, e))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Replace out-of-range values with defaults
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.width == 0 || self.height == 0 {
            self.width = defaults.width;
            self.height = defaults.height;
        }
        if self.max_bounces == 0 {
            self.max_bounces = defaults.max_bounces;
        }
        if !(self.camera_distance.is_finite() && self.camera_distance > 0.0) {
            self.camera_distance = defaults.camera_distance;
        }
        if !self.camera_focus.iter().all(|c| c.is_finite()) {
            self.camera_focus = defaults.camera_focus;
        }
        if !self.orbit_sensitivity.is_finite() {
            self.orbit_sensitivity = defaults.orbit_sensitivity;
        }
        if !self.camera_yaw.is_finite() {
            self.camera_yaw = defaults.camera_yaw;
        }
        if !self.camera_pitch.is_finite() {
            self.camera_pitch = defaults.camera_pitch;
        }
        self
    }

    pub fn resolution(&self) -> Result<Resolution> {
        Resolution::new(self.width, self.height)
    }

    /// Camera placed per the stored focus, distance and angles
    pub fn camera(&self) -> Camera {
        Camera::new(
            Vec3::from_array(self.camera_focus),
            self.camera_distance,
            self.camera_yaw,
            self.camera_pitch,
        )
    }
}

fn settings_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Settings { path: path.to_path_buf(), message: e.to_string() }
}
