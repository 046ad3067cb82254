//! Integration tests for the render cycle against the headless backend.

use glam::Vec3;
use progressive_tracer::camera::Camera;
use progressive_tracer::gpu::headless::FLAT_NORMAL_COLOR;
use progressive_tracer::gpu::{
    BlockHandle, Command, GpuContext, HeadlessContext, Program, ProgramHandle, ProgramKind,
    ProgramSource, RenderTarget, SurfaceFormat, SurfaceHandle, SurfaceInit,
};
use progressive_tracer::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn seeded(ctx: &mut HeadlessContext, w: u32, h: u32, seed: u64) -> Renderer {
    Renderer::with_seed_source(
        ctx,
        w,
        h,
        Scene::default(),
        Camera::default(),
        Box::new(StdRng::seed_from_u64(seed)),
    )
    .expect("Failed to create renderer")
}

/// Bytes held by a 4x4 renderer: two full constant blocks plus both surfaces.
const BYTES_4X4: usize = 2 * MAX_PRIMITIVES * 32 + 16 * 12 + 16 * 4;

#[test]
fn test_scenario_a_samples_count_renders() {
    let mut ctx = HeadlessContext::new();
    let mut renderer = seeded(&mut ctx, 4, 4, 1);
    assert_eq!(renderer.samples(), 0);

    for _ in 0..3 {
        renderer.render(&mut ctx).expect("render failed");
    }
    assert_eq!(renderer.samples(), 3);
    assert_eq!(ctx.draw_count(ProgramKind::Trace), 3);
    assert_eq!(ctx.draw_count(ProgramKind::Display), 3);
}

#[test]
fn test_scenario_b_move_restarts_accumulation() {
    let mut ctx = HeadlessContext::new();
    let mut renderer = seeded(&mut ctx, 4, 4, 1);
    renderer.render(&mut ctx).unwrap();
    let before = renderer.camera_position();

    renderer.move_camera(Vec3::new(1.0, 0.0, 0.0));
    assert!(renderer.is_invalidated());
    // Samples only reset when the next cycle starts
    assert_eq!(renderer.samples(), 1);

    renderer.render(&mut ctx).unwrap();
    assert_eq!(renderer.samples(), 1);
    assert!(renderer.camera_position().abs_diff_eq(before + Vec3::X, 1e-4));
}

#[test]
fn test_scenario_c_resize_resets() {
    let mut ctx = HeadlessContext::new();
    let mut renderer = seeded(&mut ctx, 4, 4, 1);
    renderer.render(&mut ctx).unwrap();

    renderer.resize(&mut ctx, 8, 8).expect("resize failed");
    assert_eq!(renderer.width(), 8);
    assert_eq!(renderer.height(), 8);
    assert_eq!(renderer.samples(), 0);
    assert_eq!(ctx.live_surfaces(), 2);

    let size = Some(Resolution::new(8, 8).unwrap());
    assert_eq!(ctx.surface_resolution(renderer.accumulation().surface()), size);
    let grid = renderer.rng_grid().surface();
    assert_eq!(ctx.surface_resolution(grid), size);
    assert!(ctx.surface_u32(grid).unwrap().iter().all(|s| *s != 0));
}

#[test]
fn test_scenario_d_capacity_rejected_before_upload() {
    let mut ctx = HeadlessContext::new();
    let materials = vec![Material::diffuse(Vec3::ONE)];
    let primitives = vec![Primitive::sphere(Vec3::ZERO, 1.0, 0); 101];

    let result = Renderer::from_records(&mut ctx, 4, 4, materials, primitives);
    assert!(matches!(
        result,
        Err(Error::CapacityExceeded { block: "PrimitiveBlock", count: 101, capacity: 100 })
    ));
    assert!(ctx.commands().is_empty(), "nothing may reach the GPU");
}

#[test]
fn test_zero_construction_rejected() {
    let mut ctx = HeadlessContext::new();
    let result = Renderer::new(&mut ctx, 0, 4, Scene::default());
    assert!(matches!(result, Err(Error::InvalidResolution { width: 0, height: 4 })));
    assert!(ctx.commands().is_empty());
}

#[test]
fn test_zero_resize_keeps_state() {
    let mut ctx = HeadlessContext::new();
    let mut renderer = seeded(&mut ctx, 4, 4, 1);
    renderer.render(&mut ctx).unwrap();
    ctx.clear_commands();

    let err = renderer.resize(&mut ctx, 8, 0).unwrap_err();
    assert!(matches!(err, Error::InvalidResolution { width: 8, height: 0 }));
    assert!(ctx.commands().is_empty());
    assert_eq!((renderer.width(), renderer.height()), (4, 4));
    assert_eq!(renderer.samples(), 1);

    renderer.render(&mut ctx).unwrap();
    assert_eq!(renderer.samples(), 2);
}

#[test]
fn test_resize_same_size_reseeds() {
    let mut ctx = HeadlessContext::new();
    let mut renderer = seeded(&mut ctx, 4, 4, 3);
    renderer.render(&mut ctx).unwrap();
    renderer.render(&mut ctx).unwrap();
    let old_seeds = ctx.surface_u32(renderer.rng_grid().surface()).unwrap().to_vec();

    renderer.resize(&mut ctx, 4, 4).unwrap();
    assert_eq!(renderer.samples(), 0);
    assert_eq!(renderer.frame_stats().generation, 2);
    let new_seeds = ctx.surface_u32(renderer.rng_grid().surface()).unwrap();
    assert_ne!(new_seeds, old_seeds.as_slice());
    assert!(ctx.surface_rgb(renderer.accumulation().surface()).unwrap().iter().all(|c| *c == [0.0; 3]));
}

#[test]
fn test_resize_satisfies_pending_invalidation() {
    let mut ctx = HeadlessContext::new();
    let mut renderer = seeded(&mut ctx, 4, 4, 1);
    renderer.orbit_camera(0.3, 0.1);
    renderer.resize(&mut ctx, 6, 2).unwrap();
    assert!(!renderer.is_invalidated());

    renderer.render(&mut ctx).unwrap();
    assert_eq!(renderer.samples(), 1);
}

#[test]
fn test_display_is_average_of_sum() {
    let mut ctx = HeadlessContext::new();
    let mut renderer = seeded(&mut ctx, 4, 2, 9);
    for _ in 0..5 {
        renderer.render(&mut ctx).unwrap();
    }
    let sum = ctx.surface_rgb(renderer.accumulation().surface()).unwrap();
    let frame = ctx.frame();
    assert_eq!(frame.len(), 8);
    for (px, total) in frame.iter().zip(sum) {
        for c in 0..3 {
            assert!((px[c] - total[c] * 0.2).abs() < 1e-6);
            assert!((0.0..1.0).contains(&px[c]));
        }
    }
}

#[test]
fn test_trace_advances_rng_state() {
    let mut ctx = HeadlessContext::new();
    let mut renderer = seeded(&mut ctx, 4, 4, 11);
    let initial = ctx.surface_u32(renderer.rng_grid().surface()).unwrap().to_vec();
    renderer.render(&mut ctx).unwrap();
    let advanced = ctx.surface_u32(renderer.rng_grid().surface()).unwrap();
    assert!(advanced.iter().zip(&initial).all(|(a, b)| a != b && *a != 0));
}

#[test]
fn test_deterministic_seeds_reproduce_frames() {
    let mut ctx_a = HeadlessContext::new();
    let mut ctx_b = HeadlessContext::new();
    let mut a = seeded(&mut ctx_a, 3, 3, 21);
    let mut b = seeded(&mut ctx_b, 3, 3, 21);
    for _ in 0..4 {
        a.render(&mut ctx_a).unwrap();
        b.render(&mut ctx_b).unwrap();
    }
    assert_eq!(ctx_a.frame(), ctx_b.frame());
}

#[test]
fn test_os_seeded_renderers_differ() {
    let mut ctx_a = HeadlessContext::new();
    let mut ctx_b = HeadlessContext::new();
    let a = Renderer::new(&mut ctx_a, 16, 16, Scene::default()).unwrap();
    let b = Renderer::new(&mut ctx_b, 16, 16, Scene::default()).unwrap();
    assert_ne!(
        ctx_a.surface_u32(a.rng_grid().surface()).unwrap(),
        ctx_b.surface_u32(b.rng_grid().surface()).unwrap()
    );
}

#[test]
fn test_debug_normals_do_not_accumulate() {
    let mut ctx = HeadlessContext::new();
    let mut renderer = seeded(&mut ctx, 4, 4, 1);
    renderer.render(&mut ctx).unwrap();
    renderer.render(&mut ctx).unwrap();

    renderer.set_mode(RenderMode::DebugNormals);
    for _ in 0..3 {
        renderer.render(&mut ctx).unwrap();
    }
    assert_eq!(renderer.samples(), 2);
    assert_eq!(ctx.draw_count(ProgramKind::Trace), 2);
    assert_eq!(ctx.draw_count(ProgramKind::Normals), 3);
    assert!(ctx.frame().iter().all(|px| *px == FLAT_NORMAL_COLOR));

    // Switching back resumes the same sum
    renderer.set_mode(RenderMode::Standard);
    renderer.render(&mut ctx).unwrap();
    assert_eq!(renderer.samples(), 3);
}

#[test]
fn test_camera_change_in_normals_mode_still_resets() {
    let mut ctx = HeadlessContext::new();
    let mut renderer = seeded(&mut ctx, 4, 4, 1);
    renderer.render(&mut ctx).unwrap();
    renderer.set_mode(RenderMode::DebugNormals);
    renderer.orbit_camera(0.2, 0.0);
    renderer.render(&mut ctx).unwrap();

    assert!(!renderer.is_invalidated());
    assert_eq!(renderer.samples(), 0);
}

#[test]
fn test_clear_discards_samples() {
    let mut ctx = HeadlessContext::new();
    let mut renderer = seeded(&mut ctx, 4, 4, 1);
    renderer.render(&mut ctx).unwrap();
    renderer.move_camera(Vec3::Y);
    renderer.clear(&mut ctx).unwrap();
    assert_eq!(renderer.samples(), 0);
    assert!(!renderer.is_invalidated());
}

#[test]
fn test_construction_allocation_failure() {
    let mut ctx = HeadlessContext::new().with_allocation_budget(1024);
    let result = Renderer::new(&mut ctx, 64, 64, Scene::default());
    assert!(matches!(result, Err(Error::Allocation(_))));
    assert_eq!(ctx.live_surfaces(), 0);
    assert_eq!(ctx.live_bytes(), 0);
}

#[test]
fn test_failed_rng_grid_releases_accumulation() {
    // The 4x4 accumulation surface fits, its RNG grid does not
    let mut ctx = HeadlessContext::new().with_allocation_budget(16 * 12 + 10);
    let result = Renderer::with_seed_source(
        &mut ctx,
        4,
        4,
        Scene::default(),
        Camera::default(),
        Box::new(StdRng::seed_from_u64(1)),
    );
    assert!(matches!(result, Err(Error::Allocation(_))));
    assert_eq!(ctx.live_surfaces(), 0);
    assert_eq!(ctx.live_bytes(), 0);
}

#[test]
fn test_failed_block_upload_releases_everything() {
    // Both surfaces and the material block fit, the primitive block does not
    let mut ctx = HeadlessContext::new().with_allocation_budget(16 * 12 + 16 * 4 + MAX_MATERIALS * 32 + 100);
    let result = Renderer::new(&mut ctx, 4, 4, Scene::default());
    assert!(matches!(result, Err(Error::Allocation(_))));
    assert_eq!(ctx.live_surfaces(), 0);
    assert_eq!(ctx.live_bytes(), 0);
    assert_eq!(ctx.block_at(0), None);
    assert!(ctx.commands().iter().any(|c| matches!(c, Command::ReleaseBlock(_))));
}

#[test]
fn test_resize_allocation_failure_keeps_old_surfaces() {
    // Room for the 8x8 accumulation surface but not its RNG grid
    let mut ctx = HeadlessContext::new().with_allocation_budget(BYTES_4X4 + 64 * 12 + 100);
    let mut renderer = seeded(&mut ctx, 4, 4, 1);
    renderer.render(&mut ctx).unwrap();
    let accum = renderer.accumulation().surface();

    let err = renderer.resize(&mut ctx, 8, 8).unwrap_err();
    assert!(matches!(err, Error::Allocation(_)));
    assert_eq!(ctx.live_bytes(), BYTES_4X4);
    assert_eq!(ctx.live_surfaces(), 2);
    assert_eq!(renderer.accumulation().surface(), accum);
    assert_eq!((renderer.width(), renderer.samples()), (4, 1));

    renderer.render(&mut ctx).unwrap();
    assert_eq!(renderer.samples(), 2);
}

#[test]
fn test_frame_stats() {
    let mut ctx = HeadlessContext::new();
    let mut renderer = seeded(&mut ctx, 5, 3, 1);
    renderer.render(&mut ctx).unwrap();
    let stats = renderer.frame_stats();
    assert_eq!(stats.resolution, Resolution::new(5, 3).unwrap());
    assert_eq!(stats.samples, 1);
    assert_eq!(stats.mode, RenderMode::Standard);
    assert_eq!(stats.generation, 1);
}

/// Headless context whose display draws always fail.
struct BrokenDisplay(HeadlessContext);

impl GpuContext for BrokenDisplay {
    fn create_program(&mut self, source: &ProgramSource) -> Result<ProgramHandle> {
        self.0.create_program(source)
    }

    fn create_surface(
        &mut self,
        label: &str,
        format: SurfaceFormat,
        resolution: Resolution,
        init: SurfaceInit<'_>,
    ) -> Result<SurfaceHandle> {
        self.0.create_surface(label, format, resolution, init)
    }

    fn release_surface(&mut self, surface: SurfaceHandle) {
        self.0.release_surface(surface)
    }

    fn clear_surface(&mut self, surface: SurfaceHandle) -> Result<()> {
        self.0.clear_surface(surface)
    }

    fn create_block(&mut self, name: &str, capacity: usize, contents: &[u8]) -> Result<BlockHandle> {
        self.0.create_block(name, capacity, contents)
    }

    fn release_block(&mut self, block: BlockHandle) {
        self.0.release_block(block)
    }

    fn bind_block(&mut self, block: BlockHandle, index: u32) -> Result<()> {
        self.0.bind_block(block, index)
    }

    fn bind_target(&mut self, target: RenderTarget) -> Result<()> {
        self.0.bind_target(target)
    }

    fn unbind_target(&mut self) {
        self.0.unbind_target()
    }

    fn draw(&mut self, program: &Program) -> Result<()> {
        if program.kind() == ProgramKind::Display {
            return Err(Error::program("display lost"));
        }
        self.0.draw(program)
    }
}

#[test]
fn test_failed_draw_unbinds_target() {
    let mut ctx = BrokenDisplay(HeadlessContext::new());
    let mut renderer = Renderer::new(&mut ctx, 4, 4, Scene::default()).unwrap();

    let err = renderer.render(&mut ctx).unwrap_err();
    assert!(matches!(err, Error::Program(_)));
    assert_eq!(ctx.0.bound_target(), None);
    assert_eq!(ctx.0.commands().last(), Some(&Command::UnbindTarget));
    // The trace pass completed, so its sample is counted
    assert_eq!(renderer.samples(), 1);
}
