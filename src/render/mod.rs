//! Render orchestration: invalidation, accumulation, resize.
//!
//! One [`Renderer::render`] call is one cycle:
//! ```text
//! invalidated? ── yes ──> clear accumulation, samples = 0
//!      │
//!      ├─ Standard:     trace (accum + rng target) -> samples += 1 -> display (frame)
//!      └─ DebugNormals: normals (frame), accumulation untouched
//! ```
//! Camera moves only raise the flag; the reset happens at the start of the next
//! cycle. Resize reallocates both per-pixel surfaces and re-seeds the RNG grid
//! inline.

pub mod accumulation;
pub mod mode;
pub mod rng_grid;

pub use accumulation::{samples_inv, AccumulationSurface};
pub use mode::{InvalidationFlag, RenderMode};
pub use rng_grid::{draw_seeds, os_seed_source, RandomStateGrid, SeedSource};

use std::num::NonZeroU32;

use glam::Vec3;

use crate::camera::{Camera, CameraBasis};
use crate::gpu::{
    shaders, BlockHandle, GpuContext, Program, ProgramKind, ProgramSource, RenderTarget,
    TargetBinding,
};
use crate::scene::{Material, Primitive, Scene};
use crate::settings::Settings;
use crate::util::{Resolution, Result};

/// Binding index of the material constant block.
pub const MATERIAL_BLOCK_INDEX: u32 = 0;
/// Binding index of the primitive constant block.
pub const PRIMITIVE_BLOCK_INDEX: u32 = 1;

const ACCUM_TEXTURE_UNIT: u32 = 0;
const STATE_TEXTURE_UNIT: u32 = 1;

/// Default path depth for the trace kernel.
pub const DEFAULT_MAX_BOUNCES: u32 = 4;

/// Snapshot of the renderer for logging and UI overlays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub resolution: Resolution,
    pub samples: u32,
    pub mode: RenderMode,
    /// Number of times the RNG grid has been seeded.
    pub generation: u64,
}

/// The three programs the renderer drives.
struct Programs {
    trace: Program,
    display: Program,
    normals: Program,
}

impl Programs {
    fn create<C: GpuContext + ?Sized>(ctx: &mut C) -> Result<Self> {
        let mut build = |source: &ProgramSource| -> Result<Program> {
            Ok(Program::new(source.kind, ctx.create_program(source)?))
        };
        Ok(Self {
            trace: build(&shaders::TRACE)?,
            display: build(&shaders::DISPLAY)?,
            normals: build(&shaders::NORMALS)?,
        })
    }

    /// The program that produces this mode's per-frame image.
    fn for_mode(&mut self, mode: RenderMode) -> &mut Program {
        match mode {
            RenderMode::Standard => &mut self.trace,
            RenderMode::DebugNormals => &mut self.normals,
        }
    }
}

/// Host-side control loop of the progressive path tracer.
pub struct Renderer {
    resolution: Resolution,
    camera: Camera,
    scene: Scene,
    accumulation: AccumulationSurface,
    rng_grid: RandomStateGrid,
    generation: u64,
    programs: Programs,
    material_block: BlockHandle,
    primitive_block: BlockHandle,
    mode: RenderMode,
    invalidated: InvalidationFlag,
    seeds: Box<dyn SeedSource>,
    max_bounces: u32,
}

impl Renderer {
    /// Create a renderer with a default camera and OS-seeded RNG grid.
    pub fn new<C: GpuContext + ?Sized>(ctx: &mut C, width: u32, height: u32, scene: Scene) -> Result<Self> {
        Self::with_seed_source(ctx, width, height, scene, Camera::default(), Box::new(os_seed_source()))
    }

    /// Validate raw scene records, then create the renderer. Capacity and
    /// material reference errors are reported before anything is uploaded.
    pub fn from_records<C: GpuContext + ?Sized>(
        ctx: &mut C,
        width: u32,
        height: u32,
        materials: Vec<Material>,
        primitives: Vec<Primitive>,
    ) -> Result<Self> {
        let scene = Scene::new(materials, primitives)?;
        Self::new(ctx, width, height, scene)
    }

    /// Create a renderer from persisted settings.
    pub fn from_settings<C: GpuContext + ?Sized>(ctx: &mut C, settings: &Settings, scene: Scene) -> Result<Self> {
        let resolution = settings.resolution()?;
        let mut renderer = Self::with_seed_source(
            ctx,
            resolution.width(),
            resolution.height(),
            scene,
            settings.camera(),
            Box::new(os_seed_source()),
        )?;
        renderer.set_mode(settings.mode);
        renderer.max_bounces = settings.max_bounces.max(1);
        renderer.bind_static_uniforms();
        Ok(renderer)
    }

    /// Create a renderer with an explicit camera and seed source.
    #[tracing::instrument(skip_all, fields(width = width, height = height))]
    pub fn with_seed_source<C: GpuContext + ?Sized>(
        ctx: &mut C,
        width: u32,
        height: u32,
        scene: Scene,
        camera: Camera,
        mut seeds: Box<dyn SeedSource>,
    ) -> Result<Self> {
        let resolution = Resolution::new(width, height)?;

        let programs = Programs::create(ctx)?;

        // Each failure releases what was allocated before it
        let accumulation = AccumulationSurface::allocate(ctx, resolution)?;
        let rng_grid = match RandomStateGrid::initialize(ctx, resolution, seeds.as_mut()) {
            Ok(grid) => grid,
            Err(e) => {
                accumulation.release(ctx);
                return Err(e);
            }
        };
        let (material_block, primitive_block) = match upload_scene(ctx, &scene) {
            Ok(blocks) => blocks,
            Err(e) => {
                accumulation.release(ctx);
                rng_grid.release(ctx);
                return Err(e);
            }
        };

        tracing::info!(
            "renderer {resolution}: {} materials, {} primitives",
            scene.materials().len(),
            scene.primitives().len()
        );

        let mut renderer = Self {
            resolution,
            camera,
            scene,
            accumulation,
            rng_grid,
            generation: 1,
            programs,
            material_block,
            primitive_block,
            mode: RenderMode::Standard,
            invalidated: InvalidationFlag::default(),
            seeds,
            max_bounces: DEFAULT_MAX_BOUNCES,
        };
        renderer.bind_static_uniforms();
        renderer.bind_surface_uniforms();
        Ok(renderer)
    }

    pub fn width(&self) -> u32 {
        self.resolution.width()
    }

    pub fn height(&self) -> u32 {
        self.resolution.height()
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Samples currently summed into every pixel.
    pub fn samples(&self) -> u32 {
        self.accumulation.samples()
    }

    pub fn camera_position(&self) -> Vec3 {
        self.camera.position()
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn accumulation(&self) -> &AccumulationSurface {
        &self.accumulation
    }

    pub fn rng_grid(&self) -> &RandomStateGrid {
        &self.rng_grid
    }

    /// Whether the next cycle will restart accumulation.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated.is_raised()
    }

    pub fn frame_stats(&self) -> FrameStats {
        FrameStats {
            resolution: self.resolution,
            samples: self.samples(),
            mode: self.mode,
            generation: self.generation,
        }
    }

    /// Translate the camera; accumulation restarts on the next cycle.
    pub fn move_camera(&mut self, delta: Vec3) {
        self.camera.move_by(delta);
        self.invalidated.raise();
    }

    /// Orbit the camera (radians); accumulation restarts on the next cycle.
    pub fn orbit_camera(&mut self, d_theta: f32, d_phi: f32) {
        self.camera.orbit(d_theta, d_phi);
        self.invalidated.raise();
    }

    /// Switch modes. Normals never accumulate, so the running sum for the
    /// current camera stays valid across a round trip.
    pub fn set_mode(&mut self, mode: RenderMode) {
        if mode == self.mode {
            return;
        }
        if mode.accumulates() {
            tracing::debug!("render mode {:?} -> {:?}", self.mode, mode);
        } else {
            tracing::warn!("render mode {:?}: frames are not accumulated", mode);
        }
        self.mode = mode;
    }

    /// Path depth of the trace kernel (at least one bounce).
    pub fn set_max_bounces(&mut self, bounces: u32) {
        self.max_bounces = bounces.max(1);
        self.programs.trace.set_uniform("maxBounces", self.max_bounces);
        self.invalidated.raise();
    }

    /// Discard accumulated samples now. The RNG grid is kept.
    pub fn clear<C: GpuContext + ?Sized>(&mut self, ctx: &mut C) -> Result<()> {
        self.accumulation.reset(ctx)?;
        self.invalidated.take();
        // Surfaces may be rebound by a host that shares the context
        self.bind_surface_uniforms();
        tracing::debug!("accumulation cleared at {}", self.resolution);
        Ok(())
    }

    /// Run one cycle: pending reset, one trace or normals pass, display.
    #[tracing::instrument(skip_all)]
    pub fn render<C: GpuContext + ?Sized>(&mut self, ctx: &mut C) -> Result<()> {
        if self.invalidated.take() {
            self.accumulation.reset(ctx)?;
            tracing::debug!("camera changed, accumulation restarted");
        }

        let basis = *self.camera.basis();
        let tan_half_fov = self.camera.tan_half_fov();
        let program = self.programs.for_mode(self.mode);
        set_camera_uniforms(program, &basis, tan_half_fov);

        if !self.mode.accumulates() {
            let mut pass = TargetBinding::bind(ctx, RenderTarget::Frame(self.resolution))?;
            pass.draw(program)?;
            tracing::trace!("normals frame at {}", self.resolution);
            return Ok(());
        }

        // A saturated sum keeps being displayed but receives no more samples
        let samples = if self.accumulation.is_saturated() {
            NonZeroU32::MAX
        } else {
            let target = RenderTarget::Accumulation {
                accum: self.accumulation.surface(),
                state: self.rng_grid.surface(),
            };
            let mut pass = TargetBinding::bind(ctx, target)?;
            pass.draw(program)?;
            drop(pass);
            self.accumulation.record_sample()
        };

        let display = &mut self.programs.display;
        display.set_uniform("samplesInv", samples_inv(samples));
        let mut pass = TargetBinding::bind(ctx, RenderTarget::Frame(self.resolution))?;
        pass.draw(display)?;
        tracing::trace!("frame {} at {}", samples, self.resolution);
        Ok(())
    }

    /// Reallocate both per-pixel surfaces at `width x height`, re-seed the RNG
    /// grid and restart accumulation. Unconditional, also at the current size.
    ///
    /// Zero dimensions are rejected before anything is allocated. If either
    /// allocation fails the previous surfaces stay in place.
    #[tracing::instrument(skip_all, fields(width = width, height = height))]
    pub fn resize<C: GpuContext + ?Sized>(&mut self, ctx: &mut C, width: u32, height: u32) -> Result<()> {
        let resolution = Resolution::new(width, height)?;

        let accumulation = AccumulationSurface::allocate(ctx, resolution)?;
        let rng_grid = match RandomStateGrid::initialize(ctx, resolution, self.seeds.as_mut()) {
            Ok(grid) => grid,
            Err(e) => {
                accumulation.release(ctx);
                return Err(e);
            }
        };

        std::mem::replace(&mut self.accumulation, accumulation).release(ctx);
        std::mem::replace(&mut self.rng_grid, rng_grid).release(ctx);
        self.generation += 1;
        self.resolution = resolution;
        // The new surfaces start empty, a pending camera reset is already satisfied
        self.invalidated.take();
        self.bind_surface_uniforms();

        tracing::debug!("resized to {resolution}, RNG generation {}", self.generation);
        Ok(())
    }

    /// Block bindings and scene-size uniforms; fixed for the renderer's lifetime.
    fn bind_static_uniforms(&mut self) {
        let material_count = self.scene.materials().len() as u32;
        let primitive_count = self.scene.primitives().len() as u32;

        let trace = &mut self.programs.trace;
        trace.set_ubo("MaterialBlock", MATERIAL_BLOCK_INDEX);
        trace.set_ubo("PrimitiveBlock", PRIMITIVE_BLOCK_INDEX);
        trace.set_uniform("materialCount", material_count);
        trace.set_uniform("primitiveCount", primitive_count);
        trace.set_uniform("maxBounces", self.max_bounces);

        let normals = &mut self.programs.normals;
        normals.set_ubo("PrimitiveBlock", PRIMITIVE_BLOCK_INDEX);
        normals.set_uniform("primitiveCount", primitive_count);
    }

    /// Resolution uniforms and surface bindings; refreshed after every reallocation.
    fn bind_surface_uniforms(&mut self) {
        let res = self.resolution.as_array();
        let res_y_inv = self.resolution.height_inv();
        let accum = self.accumulation.surface();
        let state = self.rng_grid.surface();

        let trace = &mut self.programs.trace;
        trace.set_uniform("resolution", res);
        trace.set_uniform("resolutionYInv", res_y_inv);
        trace.set_uniform_texture("accumTexture", accum, ACCUM_TEXTURE_UNIT);
        trace.set_uniform_texture("stateTexture", state, STATE_TEXTURE_UNIT);

        let display = &mut self.programs.display;
        display.set_uniform("resolution", res);
        display.set_uniform_texture("accumTexture", accum, ACCUM_TEXTURE_UNIT);

        let normals = &mut self.programs.normals;
        normals.set_uniform("resolution", res);
        normals.set_uniform("resolutionYInv", res_y_inv);
    }

    /// Constant block handles (materials, primitives).
    pub fn blocks(&self) -> (BlockHandle, BlockHandle) {
        (self.material_block, self.primitive_block)
    }

    /// Kind of program the current mode draws per frame.
    pub fn active_program(&self) -> ProgramKind {
        match self.mode {
            RenderMode::Standard => ProgramKind::Trace,
            RenderMode::DebugNormals => ProgramKind::Normals,
        }
    }
}

/// Upload both constant blocks and attach them at their fixed indices.
fn upload_scene<C: GpuContext + ?Sized>(ctx: &mut C, scene: &Scene) -> Result<(BlockHandle, BlockHandle)> {
    let materials = scene.materials();
    let material_block = ctx.create_block(materials.name(), materials.capacity_bytes(), materials.as_bytes())?;
    let primitives = scene.primitives();
    let attached = ctx
        .bind_block(material_block, MATERIAL_BLOCK_INDEX)
        .and_then(|_| ctx.create_block(primitives.name(), primitives.capacity_bytes(), primitives.as_bytes()));
    let primitive_block = match attached {
        Ok(block) => block,
        Err(e) => {
            ctx.release_block(material_block);
            return Err(e);
        }
    };
    if let Err(e) = ctx.bind_block(primitive_block, PRIMITIVE_BLOCK_INDEX) {
        ctx.release_block(primitive_block);
        ctx.release_block(material_block);
        return Err(e);
    }
    Ok((material_block, primitive_block))
}

fn set_camera_uniforms(program: &mut Program, basis: &CameraBasis, tan_half_fov: f32) {
    program.set_uniform("camPos", basis.position);
    program.set_uniform("camForward", basis.forward);
    program.set_uniform("camRight", basis.right);
    program.set_uniform("camUp", basis.up);
    program.set_uniform("tanHalfFov", tan_half_fov);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Command, HeadlessContext};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn renderer(ctx: &mut HeadlessContext, w: u32, h: u32) -> Renderer {
        Renderer::with_seed_source(
            ctx,
            w,
            h,
            Scene::default(),
            Camera::default(),
            Box::new(StdRng::seed_from_u64(1)),
        )
        .unwrap()
    }

    #[test]
    fn test_cycle_order() {
        let mut ctx = HeadlessContext::new();
        let mut r = renderer(&mut ctx, 4, 4);
        ctx.clear_commands();
        r.render(&mut ctx).unwrap();

        let accum = r.accumulation().surface();
        let state = r.rng_grid().surface();
        assert_eq!(
            ctx.commands(),
            &[
                Command::BindTarget(RenderTarget::Accumulation { accum, state }),
                Command::Draw(ProgramKind::Trace),
                Command::UnbindTarget,
                Command::BindTarget(RenderTarget::Frame(r.resolution())),
                Command::Draw(ProgramKind::Display),
                Command::UnbindTarget,
            ]
        );
    }

    #[test]
    fn test_invalidation_clears_before_trace() {
        let mut ctx = HeadlessContext::new();
        let mut r = renderer(&mut ctx, 4, 4);
        r.render(&mut ctx).unwrap();
        r.orbit_camera(0.1, 0.0);
        assert!(r.is_invalidated());
        ctx.clear_commands();
        r.render(&mut ctx).unwrap();

        assert_eq!(ctx.commands()[0], Command::ClearSurface(r.accumulation().surface()));
        assert!(!r.is_invalidated());
        assert_eq!(r.samples(), 1);
    }

    #[test]
    fn test_blocks_bound_at_fixed_indices() {
        let mut ctx = HeadlessContext::new();
        let r = renderer(&mut ctx, 2, 2);
        let (materials, primitives) = r.blocks();
        assert_eq!(ctx.block_at(MATERIAL_BLOCK_INDEX), Some(materials));
        assert_eq!(ctx.block_at(PRIMITIVE_BLOCK_INDEX), Some(primitives));
        assert_eq!(r.programs.trace.block("MaterialBlock").unwrap(), 0);
        assert_eq!(r.programs.trace.block("PrimitiveBlock").unwrap(), 1);
        assert_eq!(r.programs.normals.block("PrimitiveBlock").unwrap(), 1);
        assert!(r.programs.normals.block("MaterialBlock").is_err());
    }

    #[test]
    fn test_display_gets_reciprocal() {
        let mut ctx = HeadlessContext::new();
        let mut r = renderer(&mut ctx, 2, 2);
        for _ in 0..4 {
            r.render(&mut ctx).unwrap();
        }
        assert_eq!(r.programs.display.uniform_f32("samplesInv").unwrap(), 0.25);
    }

    #[test]
    fn test_saturated_accumulation_stops_tracing() {
        let mut ctx = HeadlessContext::new();
        let mut r = renderer(&mut ctx, 2, 2);
        r.accumulation.force_samples(u32::MAX - 1);
        r.render(&mut ctx).unwrap();
        assert_eq!(r.samples(), u32::MAX);
        assert_eq!(ctx.draw_count(ProgramKind::Trace), 1);

        r.render(&mut ctx).unwrap();
        assert_eq!(r.samples(), u32::MAX);
        assert_eq!(ctx.draw_count(ProgramKind::Trace), 1);
        assert_eq!(ctx.draw_count(ProgramKind::Display), 2);
        assert_eq!(r.programs.display.uniform_f32("samplesInv").unwrap(), 1.0 / u32::MAX as f32);
    }

    #[test]
    fn test_max_bounces_clamped() {
        let mut ctx = HeadlessContext::new();
        let mut r = renderer(&mut ctx, 2, 2);
        r.set_max_bounces(0);
        assert_eq!(r.programs.trace.uniform_u32("maxBounces").unwrap(), 1);
        assert!(r.is_invalidated());
    }
}
