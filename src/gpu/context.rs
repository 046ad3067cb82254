//! Explicit GPU context and scoped target binding.

use super::program::{Program, ProgramSource};
use super::{BlockHandle, ProgramHandle, SurfaceHandle};
use crate::util::{Resolution, Result};

/// Per-pixel storage format of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceFormat {
    /// Linear RGB running sum, 32-bit float per channel.
    Rgb32Float,
    /// One 32-bit unsigned integer per pixel (RNG state).
    R32Uint,
}

impl SurfaceFormat {
    /// Bytes per pixel as stored host-side.
    pub fn texel_size(&self) -> usize {
        match self {
            SurfaceFormat::Rgb32Float => 12,
            SurfaceFormat::R32Uint => 4,
        }
    }
}

/// Initial contents of a new surface.
#[derive(Debug, Clone, Copy)]
pub enum SurfaceInit<'a> {
    Zeroed,
    /// One value per pixel, row-major; format must be `R32Uint`.
    U32(&'a [u32]),
}

/// What subsequent draws write into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget {
    /// The trace pass writes both the running sum and the advanced RNG state.
    Accumulation {
        accum: SurfaceHandle,
        state: SurfaceHandle,
    },
    /// The displayed frame.
    Frame(Resolution),
}

/// Device operations the renderer needs.
///
/// Every allocation reports failure instead of panicking; the renderer treats
/// any error here as fatal for the operation in progress.
pub trait GpuContext {
    /// Compile a program.
    fn create_program(&mut self, source: &ProgramSource) -> Result<ProgramHandle>;

    /// Allocate a per-pixel surface.
    fn create_surface(
        &mut self,
        label: &str,
        format: SurfaceFormat,
        resolution: Resolution,
        init: SurfaceInit<'_>,
    ) -> Result<SurfaceHandle>;

    /// Free a surface. Unknown handles are ignored.
    fn release_surface(&mut self, surface: SurfaceHandle);

    /// Zero a surface's contents.
    fn clear_surface(&mut self, surface: SurfaceHandle) -> Result<()>;

    /// Allocate a constant block of `capacity` bytes holding `contents` at its start.
    fn create_block(&mut self, name: &str, capacity: usize, contents: &[u8]) -> Result<BlockHandle>;

    /// Free a block and detach it from any index. Unknown handles are ignored.
    fn release_block(&mut self, block: BlockHandle);

    /// Attach a block to a binding index shared by all programs.
    fn bind_block(&mut self, block: BlockHandle, index: u32) -> Result<()>;

    fn bind_target(&mut self, target: RenderTarget) -> Result<()>;

    fn unbind_target(&mut self);

    /// Run `program` against the bound target.
    fn draw(&mut self, program: &Program) -> Result<()>;
}

/// Target binding that is released when dropped.
///
/// ```ignore
/// let mut pass = TargetBinding::bind(ctx, RenderTarget::Frame(res))?;
/// pass.draw(&display)?;
/// // unbound here, on success and on `?` alike
/// ```
pub struct TargetBinding<'a, C: GpuContext + ?Sized> {
    ctx: &'a mut C,
}

impl<'a, C: GpuContext + ?Sized> TargetBinding<'a, C> {
    pub fn bind(ctx: &'a mut C, target: RenderTarget) -> Result<Self> {
        ctx.bind_target(target)?;
        Ok(Self { ctx })
    }

    pub fn draw(&mut self, program: &Program) -> Result<()> {
        self.ctx.draw(program)
    }
}

impl<C: GpuContext + ?Sized> Drop for TargetBinding<'_, C> {
    fn drop(&mut self) {
        self.ctx.unbind_target();
    }
}
