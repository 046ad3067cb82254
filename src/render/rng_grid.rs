//! Per-pixel RNG state and the entropy that seeds it.
//!
//! Each pixel gets its own non-zero xorshift seed so neighbouring pixels draw
//! uncorrelated streams. The trace kernel advances the state in place every
//! frame; the host only allocates and re-seeds the grid.

use std::num::NonZeroU32;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::gpu::{GpuContext, SurfaceFormat, SurfaceHandle, SurfaceInit};
use crate::util::{Resolution, Result};

/// Source of per-pixel seeds.
pub trait SeedSource: Send {
    /// Uniform draw from `1..=u32::MAX`.
    fn next_seed(&mut self) -> NonZeroU32;
}

impl<R: RngCore + Send> SeedSource for R {
    fn next_seed(&mut self) -> NonZeroU32 {
        NonZeroU32::new(self.gen_range(1..=u32::MAX)).unwrap_or(NonZeroU32::MIN)
    }
}

/// Non-deterministic seed source backed by OS entropy.
pub fn os_seed_source() -> StdRng {
    StdRng::from_entropy()
}

/// Draw one seed per pixel, row-major.
pub fn draw_seeds(resolution: Resolution, source: &mut dyn SeedSource) -> Vec<u32> {
    (0..resolution.pixel_count()).map(|_| source.next_seed().get()).collect()
}

/// GPU-resident per-pixel RNG state.
#[derive(Debug)]
pub struct RandomStateGrid {
    surface: SurfaceHandle,
    resolution: Resolution,
}

impl RandomStateGrid {
    /// Allocate a freshly seeded grid.
    pub fn initialize<C: GpuContext + ?Sized>(
        ctx: &mut C,
        resolution: Resolution,
        source: &mut dyn SeedSource,
    ) -> Result<Self> {
        let seeds = draw_seeds(resolution, source);
        let surface = ctx.create_surface(
            "pt_rng_state",
            SurfaceFormat::R32Uint,
            resolution,
            SurfaceInit::U32(&seeds),
        )?;
        tracing::debug!("seeded RNG grid {resolution}");
        Ok(Self { surface, resolution })
    }

    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn release<C: GpuContext + ?Sized>(self, ctx: &mut C) {
        ctx.release_surface(self.surface);
    }
}
