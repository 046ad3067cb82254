//! Running radiance sum and the number of samples in it.

use std::num::NonZeroU32;

use crate::gpu::{GpuContext, SurfaceFormat, SurfaceHandle, SurfaceInit};
use crate::util::{Resolution, Result};

/// Per-pixel RGB sum plus the shared sample count.
///
/// The count only changes through [`reset`](Self::reset) (to zero) and
/// [`record_sample`](Self::record_sample) (by one), so it always equals the
/// number of trace passes summed into the surface.
#[derive(Debug)]
pub struct AccumulationSurface {
    surface: SurfaceHandle,
    resolution: Resolution,
    samples: u32,
}

impl AccumulationSurface {
    /// Allocate a zeroed surface with no samples.
    pub fn allocate<C: GpuContext + ?Sized>(ctx: &mut C, resolution: Resolution) -> Result<Self> {
        let surface = ctx.create_surface(
            "pt_accumulation",
            SurfaceFormat::Rgb32Float,
            resolution,
            SurfaceInit::Zeroed,
        )?;
        Ok(Self { surface, resolution, samples: 0 })
    }

    /// Zero the sum and the count.
    pub fn reset<C: GpuContext + ?Sized>(&mut self, ctx: &mut C) -> Result<()> {
        ctx.clear_surface(self.surface)?;
        self.samples = 0;
        Ok(())
    }

    /// Count the sample a trace pass just added. The returned count is never
    /// zero, which is what makes [`samples_inv`] total.
    ///
    /// Callers must stop tracing once [`is_saturated`](Self::is_saturated)
    /// holds; the count cannot grow past `u32::MAX`.
    pub fn record_sample(&mut self) -> NonZeroU32 {
        self.samples = self.samples.saturating_add(1);
        if self.is_saturated() {
            tracing::warn!("accumulation saturated at {} samples at {}", self.samples, self.resolution);
        }
        NonZeroU32::new(self.samples).unwrap_or(NonZeroU32::MIN)
    }

    /// No further samples can be counted until the next reset.
    pub fn is_saturated(&self) -> bool {
        self.samples == u32::MAX
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    #[cfg(test)]
    pub(crate) fn force_samples(&mut self, samples: u32) {
        self.samples = samples;
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

/// Reciprocal passed to the display program instead of the count itself.
#[inline]
pub fn samples_inv(samples: NonZeroU32) -> f32 {
    1.0 / samples.get() as f32
}
