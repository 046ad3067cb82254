//! GPU abstraction: explicit context, programs, and backends.
//!
//! ## Architecture
//! ```text
//! Renderer ──(&mut impl GpuContext)──> create / bind / draw
//!                 ├── HeadlessContext  CPU emulation, command log (tests, CI)
//!                 └── WgpuContext      compute trace + raster display (feature "gpu")
//! ```

pub mod context;
pub mod headless;
pub mod program;
pub mod shaders;
#[cfg(feature = "gpu")]
pub mod wgpu_backend;

pub use context::{GpuContext, RenderTarget, SurfaceFormat, SurfaceInit, TargetBinding};
pub use headless::{Command, HeadlessContext};
pub use program::{Program, ProgramKind, ProgramSource, ProgramStages, UniformValue};
#[cfg(feature = "gpu")]
pub use wgpu_backend::WgpuContext;

/// Per-pixel surface owned by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub(crate) u32);

/// Constant block owned by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle(pub(crate) u32);

/// Compiled program owned by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u32);
