//! # Progressive Tracer
//!
//! Host-side control loop of a progressive Monte Carlo path tracer.
//!
//! Every call to [`Renderer::render`] adds one sample per pixel to a running
//! radiance sum on the GPU and displays the average. Moving the camera raises an
//! invalidation flag and the next cycle starts the sum over; resizing
//! reallocates the sum and re-seeds the per-pixel RNG state.
//!
//! ## Modules
//!
//! - [`util`] - Error type and validated resolution
//! - [`camera`] - Orbit camera (dolly rig) and its orthonormal basis
//! - [`scene`] - Material/primitive records and bounded constant blocks
//! - [`gpu`] - Explicit GPU context trait, programs, headless and wgpu backends
//! - [`render`] - Accumulation, RNG grid, render modes, the [`Renderer`]
//! - [`settings`] - Persistent JSON settings
//!
//! ## Example
//!
//! ```no_run
//! use progressive_tracer::prelude::*;
//!
//! let mut ctx = HeadlessContext::new();
//! let mut renderer = Renderer::new(&mut ctx, 320, 240, Scene::default())?;
//! for _ in 0..16 {
//!     renderer.render(&mut ctx)?;
//! }
//! assert_eq!(renderer.samples(), 16);
//! # Ok::<(), progressive_tracer::Error>(())
//! ```

pub mod util;
pub mod camera;
pub mod scene;
pub mod gpu;
pub mod render;
pub mod settings;

// Re-export commonly used types
pub use util::{Error, Resolution, Result};
pub use render::{FrameStats, RenderMode, Renderer};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{Error, Resolution, Result};
    pub use crate::camera::{Camera, CameraBasis};
    pub use crate::scene::{Material, Primitive, Scene, MAX_MATERIALS, MAX_PRIMITIVES};
    pub use crate::gpu::{GpuContext, HeadlessContext, RenderTarget, TargetBinding};
    #[cfg(feature = "gpu")]
    pub use crate::gpu::WgpuContext;
    pub use crate::render::{FrameStats, RenderMode, Renderer, SeedSource};
    pub use crate::settings::Settings;
}
