//! Orbit camera built on a dolly rig.
//!
//! The rig is `Position(focus) -> YawPitch -> Arm(distance)`: the camera sits on a
//! sphere around the focus and always looks at it. Mutations update the rig and
//! recompute the orthonormal basis the trace kernel consumes. The camera knows
//! nothing about accumulation; the renderer decides what a mutation invalidates.

use dolly::prelude::*;
use glam::Vec3;

/// Orthonormal camera frame in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraBasis {
    pub position: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
}

/// Orbit camera rig for the path tracer
pub struct Camera {
    rig: CameraRig,
    focus: Vec3,
    basis: CameraBasis,
    /// Vertical FOV in degrees
    pub fov: f32,
}

impl Camera {
    /// Create a camera orbiting `focus` at `distance`, angles in degrees.
    pub fn new(focus: Vec3, distance: f32, yaw: f32, pitch: f32) -> Self {
        let rig = CameraRig::builder()
            .with(Position::new(mint::Point3 { x: focus.x, y: focus.y, z: focus.z }))
            .with(YawPitch::new().yaw_degrees(yaw).pitch_degrees(pitch))
            .with(Arm::new(mint::Vector3 { x: 0.0, y: 0.0, z: distance.max(1e-3) }))
            .build();

        let mut camera = Self {
            rig,
            focus,
            basis: CameraBasis {
                position: Vec3::ZERO,
                forward: Vec3::NEG_Z,
                right: Vec3::X,
                up: Vec3::Y,
            },
            fov: 45.0,
        };
        camera.refresh();
        camera
    }

    /// Translate camera and focus by a world-space `delta`. Orientation is unchanged.
    pub fn move_by(&mut self, delta: Vec3) {
        self.focus += delta;
        self.rig
            .driver_mut::<Position>()
            .translate(mint::Vector3 { x: delta.x, y: delta.y, z: delta.z });
        self.refresh();
    }

    /// Rotate around the focus. `d_theta` is yaw, `d_phi` is pitch, both radians.
    /// Pitch is clamped by the rig to avoid flipping over the poles.
    pub fn orbit(&mut self, d_theta: f32, d_phi: f32) {
        self.rig
            .driver_mut::<YawPitch>()
            .rotate_yaw_pitch(d_theta.to_degrees(), d_phi.to_degrees());
        self.refresh();
    }

    /// Settle the rig and rebuild the basis with Gram-Schmidt so repeated
    /// orbits cannot accumulate drift.
    fn refresh(&mut self) {
        self.rig.update(0.0);
        let t = &self.rig.final_transform;
        let position = Vec3::new(t.position.x, t.position.y, t.position.z);
        let forward: Vec3 = t.forward();
        let up_hint: Vec3 = t.up();

        let forward = forward.normalize();
        let right = forward.cross(up_hint).normalize();
        let up = right.cross(forward);

        self.basis = CameraBasis { position, forward, right, up };
    }

    /// Current camera position
    pub fn position(&self) -> Vec3 {
        self.basis.position
    }

    /// Point the camera orbits around
    pub fn focus(&self) -> Vec3 {
        self.focus
    }

    pub fn basis(&self) -> &CameraBasis {
        &self.basis
    }

    /// Distance from focus
    pub fn distance(&self) -> f32 {
        self.rig.driver::<Arm>().offset.z
    }

    /// `tan(fov / 2)`, the image-plane half height at unit distance.
    pub fn tan_half_fov(&self) -> f32 {
        (self.fov.to_radians() * 0.5).tan()
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 1.0, 0.0), 4.0, 0.0, 0.0)
    }
}
