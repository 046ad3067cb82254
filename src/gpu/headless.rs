//! CPU emulation of the renderer's GPU programs.
//!
//! Keeps surfaces in host memory and runs a stand-in for each program with the
//! same data dependencies as the real kernels:
//! - trace: advance every pixel's xorshift32 state, add one sample to the sum
//! - display: `frame = sum * samplesInv`
//! - normals: write a flat normal color to the frame, surfaces untouched
//!
//! Every call is logged as a [`Command`] so tests can assert on ordering.

use std::collections::HashMap;

use rayon::prelude::*;

use super::context::{GpuContext, RenderTarget, SurfaceFormat, SurfaceInit};
use super::program::{Program, ProgramKind, ProgramSource};
use super::{BlockHandle, ProgramHandle, SurfaceHandle};
use crate::util::{Error, Resolution, Result};

/// Color the normals program writes for every pixel.
pub const FLAT_NORMAL_COLOR: [f32; 3] = [0.5, 1.0, 0.5];

/// One recorded context call.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateProgram(ProgramKind),
    CreateSurface {
        handle: SurfaceHandle,
        format: SurfaceFormat,
        resolution: Resolution,
    },
    ReleaseSurface(SurfaceHandle),
    ClearSurface(SurfaceHandle),
    CreateBlock {
        name: String,
        capacity: usize,
        len: usize,
    },
    ReleaseBlock(BlockHandle),
    BindBlock {
        block: BlockHandle,
        index: u32,
    },
    BindTarget(RenderTarget),
    UnbindTarget,
    Draw(ProgramKind),
}

#[derive(Debug)]
enum SurfaceData {
    Rgb(Vec<[f32; 3]>),
    U32(Vec<u32>),
}

#[derive(Debug)]
struct HostSurface {
    resolution: Resolution,
    data: SurfaceData,
}

impl HostSurface {
    fn byte_size(&self) -> usize {
        match &self.data {
            SurfaceData::Rgb(v) => v.len() * SurfaceFormat::Rgb32Float.texel_size(),
            SurfaceData::U32(v) => v.len() * SurfaceFormat::R32Uint.texel_size(),
        }
    }
}

/// GPU context backed by host memory.
#[derive(Debug, Default)]
pub struct HeadlessContext {
    programs: Vec<ProgramKind>,
    surfaces: Vec<Option<HostSurface>>,
    blocks: Vec<Option<Vec<u8>>>,
    block_bindings: HashMap<u32, BlockHandle>,
    target: Option<RenderTarget>,
    frame: Vec<[f32; 3]>,
    commands: Vec<Command>,
    allocation_budget: Option<usize>,
    live_bytes: usize,
}

impl HeadlessContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any allocation that would push live surface + block memory past `bytes`.
    pub fn with_allocation_budget(mut self, bytes: usize) -> Self {
        self.allocation_budget = Some(bytes);
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Number of draws of `kind` in the command log.
    pub fn draw_count(&self, kind: ProgramKind) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Draw(k) if *k == kind))
            .count()
    }

    pub fn live_surfaces(&self) -> usize {
        self.surfaces.iter().filter(|s| s.is_some()).count()
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    pub fn bound_target(&self) -> Option<RenderTarget> {
        self.target
    }

    pub fn surface_resolution(&self, surface: SurfaceHandle) -> Option<Resolution> {
        self.surface(surface).ok().map(|s| s.resolution)
    }

    pub fn surface_rgb(&self, surface: SurfaceHandle) -> Option<&[[f32; 3]]> {
        match &self.surface(surface).ok()?.data {
            SurfaceData::Rgb(v) => Some(v),
            SurfaceData::U32(_) => None,
        }
    }

    pub fn surface_u32(&self, surface: SurfaceHandle) -> Option<&[u32]> {
        match &self.surface(surface).ok()?.data {
            SurfaceData::U32(v) => Some(v),
            SurfaceData::Rgb(_) => None,
        }
    }

    /// Contents of a constant block (full capacity).
    pub fn block_bytes(&self, block: BlockHandle) -> Option<&[u8]> {
        self.blocks.get(block.0 as usize).and_then(|b| b.as_deref())
    }

    /// Block currently attached to `index`.
    pub fn block_at(&self, index: u32) -> Option<BlockHandle> {
        self.block_bindings.get(&index).copied()
    }

    /// Last frame written by a display or normals draw.
    pub fn frame(&self) -> &[[f32; 3]] {
        &self.frame
    }

    fn surface(&self, handle: SurfaceHandle) -> Result<&HostSurface> {
        self.surfaces
            .get(handle.0 as usize)
            .and_then(|s| s.as_ref())
            .ok_or(Error::UnknownHandle { kind: "surface", id: handle.0 })
    }

    fn take_surface(&mut self, handle: SurfaceHandle) -> Result<HostSurface> {
        self.surfaces
            .get_mut(handle.0 as usize)
            .and_then(|s| s.take())
            .ok_or(Error::UnknownHandle { kind: "surface", id: handle.0 })
    }

    fn put_surface(&mut self, handle: SurfaceHandle, surface: HostSurface) {
        self.surfaces[handle.0 as usize] = Some(surface);
    }

    fn reserve(&mut self, bytes: usize, what: &str) -> Result<()> {
        if let Some(budget) = self.allocation_budget {
            if self.live_bytes + bytes > budget {
                return Err(Error::allocation(format!(
                    "{what}: {bytes} bytes requested, {} of {budget} in use",
                    self.live_bytes
                )));
            }
        }
        self.live_bytes += bytes;
        Ok(())
    }

    fn require_block(&self, program: &Program, name: &str, index: u32) -> Result<()> {
        let bound = program.block(name)?;
        if bound != index {
            return Err(Error::program(format!("{name} bound at {bound}, expected {index}")));
        }
        if !self.block_bindings.contains_key(&index) {
            return Err(Error::program(format!("no block attached at index {index}")));
        }
        Ok(())
    }

    fn run_trace(&mut self, program: &Program, accum: SurfaceHandle, state: SurfaceHandle) -> Result<()> {
        self.require_block(program, "MaterialBlock", 0)?;
        self.require_block(program, "PrimitiveBlock", 1)?;
        for name in ["camPos", "camForward", "camRight", "camUp"] {
            program.uniform_vec3(name)?;
        }
        let accum_tex = program.texture("accumTexture")?;
        let state_tex = program.texture("stateTexture")?;
        if accum_tex.surface != accum || state_tex.surface != state {
            return Err(Error::program("trace textures do not match the bound target"));
        }

        let resolution = program.uniform_uvec2("resolution")?;
        let mut sum = self.take_surface(accum)?;
        let mut rng = match self.take_surface(state) {
            Ok(s) => s,
            Err(e) => {
                self.put_surface(accum, sum);
                return Err(e);
            }
        };

        let result = if sum.resolution.as_array() != resolution || rng.resolution.as_array() != resolution {
            Err(Error::program(format!(
                "resolution uniform {resolution:?} does not match surfaces {} / {}",
                sum.resolution, rng.resolution
            )))
        } else {
            match (&mut sum.data, &mut rng.data) {
                (SurfaceData::Rgb(pixels), SurfaceData::U32(seeds)) => {
                    pixels.par_iter_mut().zip(seeds.par_iter_mut()).for_each(|(px, seed)| {
                        let u = next_unit(seed);
                        px[0] += u;
                        px[1] += u;
                        px[2] += u;
                    });
                    Ok(())
                }
                _ => Err(Error::program("trace target surfaces have the wrong formats")),
            }
        };

        self.put_surface(accum, sum);
        self.put_surface(state, rng);
        result
    }

    fn run_display(&mut self, program: &Program, frame: Resolution) -> Result<()> {
        let accum = program.texture("accumTexture")?;
        let samples_inv = program.uniform_f32("samplesInv")?;
        let resolution = program.uniform_uvec2("resolution")?;
        if resolution != frame.as_array() {
            return Err(Error::program("display resolution does not match frame"));
        }
        let sum = match &self.surface(accum.surface)?.data {
            SurfaceData::Rgb(v) => v,
            SurfaceData::U32(_) => return Err(Error::program("accumTexture is not an RGB surface")),
        };
        if sum.len() != frame.pixel_count() {
            return Err(Error::program("accumTexture size does not match frame"));
        }
        self.frame = sum
            .par_iter()
            .map(|c| [c[0] * samples_inv, c[1] * samples_inv, c[2] * samples_inv])
            .collect();
        Ok(())
    }

    fn run_normals(&mut self, program: &Program, frame: Resolution) -> Result<()> {
        self.require_block(program, "PrimitiveBlock", 1)?;
        if program.uniform_uvec2("resolution")? != frame.as_array() {
            return Err(Error::program("normals resolution does not match frame"));
        }
        program.uniform_vec3("camPos")?;
        self.frame = vec![FLAT_NORMAL_COLOR; frame.pixel_count()];
        Ok(())
    }
}

/// xorshift32 step, mapped to [0, 1). Mirrors `rand()` in the trace kernel.
fn next_unit(state: &mut u32) -> f32 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    *state = x;
    x as f32 * 2.328_306_4e-10
}

impl GpuContext for HeadlessContext {
    fn create_program(&mut self, source: &ProgramSource) -> Result<ProgramHandle> {
        let handle = ProgramHandle(self.programs.len() as u32);
        self.programs.push(source.kind);
        self.commands.push(Command::CreateProgram(source.kind));
        Ok(handle)
    }

    fn create_surface(
        &mut self,
        label: &str,
        format: SurfaceFormat,
        resolution: Resolution,
        init: SurfaceInit<'_>,
    ) -> Result<SurfaceHandle> {
        let pixels = resolution.pixel_count();
        let data = match (format, init) {
            (SurfaceFormat::Rgb32Float, SurfaceInit::Zeroed) => SurfaceData::Rgb(vec![[0.0; 3]; pixels]),
            (SurfaceFormat::R32Uint, SurfaceInit::Zeroed) => SurfaceData::U32(vec![0; pixels]),
            (SurfaceFormat::R32Uint, SurfaceInit::U32(values)) if values.len() == pixels => {
                SurfaceData::U32(values.to_vec())
            }
            (SurfaceFormat::R32Uint, SurfaceInit::U32(values)) => {
                return Err(Error::allocation(format!(
                    "{label}: {} initial values for {pixels} pixels",
                    values.len()
                )));
            }
            (SurfaceFormat::Rgb32Float, SurfaceInit::U32(_)) => {
                return Err(Error::allocation(format!("{label}: u32 data for a float surface")));
            }
        };
        let surface = HostSurface { resolution, data };
        self.reserve(surface.byte_size(), label)?;

        let handle = SurfaceHandle(self.surfaces.len() as u32);
        self.surfaces.push(Some(surface));
        self.commands.push(Command::CreateSurface { handle, format, resolution });
        Ok(handle)
    }

    fn release_surface(&mut self, surface: SurfaceHandle) {
        if let Ok(s) = self.take_surface(surface) {
            self.live_bytes -= s.byte_size();
            self.commands.push(Command::ReleaseSurface(surface));
        }
    }

    fn clear_surface(&mut self, surface: SurfaceHandle) -> Result<()> {
        let s = self
            .surfaces
            .get_mut(surface.0 as usize)
            .and_then(|s| s.as_mut())
            .ok_or(Error::UnknownHandle { kind: "surface", id: surface.0 })?;
        match &mut s.data {
            SurfaceData::Rgb(v) => v.fill([0.0; 3]),
            SurfaceData::U32(v) => v.fill(0),
        }
        self.commands.push(Command::ClearSurface(surface));
        Ok(())
    }

    fn create_block(&mut self, name: &str, capacity: usize, contents: &[u8]) -> Result<BlockHandle> {
        if contents.len() > capacity {
            return Err(Error::allocation(format!(
                "{name}: {} bytes do not fit in {capacity}",
                contents.len()
            )));
        }
        self.reserve(capacity, name)?;
        let mut bytes = vec![0u8; capacity];
        bytes[..contents.len()].copy_from_slice(contents);

        let handle = BlockHandle(self.blocks.len() as u32);
        self.blocks.push(Some(bytes));
        self.commands.push(Command::CreateBlock {
            name: name.to_string(),
            capacity,
            len: contents.len(),
        });
        Ok(handle)
    }

    fn bind_block(&mut self, block: BlockHandle, index: u32) -> Result<()> {
        if !self.blocks.get(block.0 as usize).is_some_and(|b| b.is_some()) {
            return Err(Error::UnknownHandle { kind: "block", id: block.0 });
        }
        self.block_bindings.insert(index, block);
        self.commands.push(Command::BindBlock { block, index });
        Ok(())
    }

    fn release_block(&mut self, block: BlockHandle) {
        if let Some(bytes) = self.blocks.get_mut(block.0 as usize).and_then(|b| b.take()) {
            self.live_bytes -= bytes.len();
            self.block_bindings.retain(|_, bound| *bound != block);
            self.commands.push(Command::ReleaseBlock(block));
        }
    }

    fn bind_target(&mut self, target: RenderTarget) -> Result<()> {
        if let RenderTarget::Accumulation { accum, state } = target {
            self.surface(accum)?;
            self.surface(state)?;
        }
        self.target = Some(target);
        self.commands.push(Command::BindTarget(target));
        Ok(())
    }

    fn unbind_target(&mut self) {
        self.target = None;
        self.commands.push(Command::UnbindTarget);
    }

    fn draw(&mut self, program: &Program) -> Result<()> {
        let target = self.target.ok_or(Error::NoTarget)?;
        let kind = self
            .programs
            .get(program.handle().0 as usize)
            .copied()
            .ok_or(Error::UnknownHandle { kind: "program", id: program.handle().0 })?;

        match (kind, target) {
            (ProgramKind::Trace, RenderTarget::Accumulation { accum, state }) => {
                self.run_trace(program, accum, state)?
            }
            (ProgramKind::Display, RenderTarget::Frame(res)) => self.run_display(program, res)?,
            (ProgramKind::Normals, RenderTarget::Frame(res)) => self.run_normals(program, res)?,
            (kind, target) => {
                return Err(Error::program(format!("{kind:?} cannot draw into {target:?}")));
            }
        }
        self.commands.push(Command::Draw(kind));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::context::TargetBinding;
    use crate::gpu::shaders;

    fn res(w: u32, h: u32) -> Resolution {
        Resolution::new(w, h).unwrap()
    }

    #[test]
    fn test_xorshift_never_zero() {
        let mut s = 1u32;
        for _ in 0..10_000 {
            next_unit(&mut s);
            assert_ne!(s, 0);
        }
    }

    #[test]
    fn test_binding_guard_unbinds() {
        let mut ctx = HeadlessContext::new();
        {
            let _pass = TargetBinding::bind(&mut ctx, RenderTarget::Frame(res(2, 2))).unwrap();
        }
        assert_eq!(ctx.bound_target(), None);
        assert_eq!(ctx.commands().last(), Some(&Command::UnbindTarget));
    }

    #[test]
    fn test_guard_unbinds_on_error() {
        let mut ctx = HeadlessContext::new();
        let handle = ctx.create_program(&shaders::DISPLAY).unwrap();
        let program = Program::new(ProgramKind::Display, handle);
        let result = (|| -> Result<()> {
            let mut pass = TargetBinding::bind(&mut ctx, RenderTarget::Frame(res(2, 2)))?;
            pass.draw(&program)?;
            Ok(())
        })();
        assert!(matches!(result, Err(Error::Program(_))));
        assert_eq!(ctx.bound_target(), None);
    }

    #[test]
    fn test_draw_without_target() {
        let mut ctx = HeadlessContext::new();
        let handle = ctx.create_program(&shaders::NORMALS).unwrap();
        let program = Program::new(ProgramKind::Normals, handle);
        assert!(matches!(ctx.draw(&program), Err(Error::NoTarget)));
    }

    #[test]
    fn test_allocation_budget() {
        let mut ctx = HeadlessContext::new().with_allocation_budget(64);
        let a = ctx
            .create_surface("a", SurfaceFormat::R32Uint, res(4, 4), SurfaceInit::Zeroed)
            .unwrap();
        assert_eq!(ctx.live_bytes(), 64);
        let err = ctx
            .create_surface("b", SurfaceFormat::R32Uint, res(1, 1), SurfaceInit::Zeroed)
            .unwrap_err();
        assert!(matches!(err, Error::Allocation(_)));

        ctx.release_surface(a);
        assert_eq!(ctx.live_bytes(), 0);
        assert_eq!(ctx.live_surfaces(), 0);
    }

    #[test]
    fn test_seed_length_mismatch() {
        let mut ctx = HeadlessContext::new();
        let err = ctx
            .create_surface("s", SurfaceFormat::R32Uint, res(2, 2), SurfaceInit::U32(&[1, 2, 3]))
            .unwrap_err();
        assert!(matches!(err, Error::Allocation(_)));
    }

    #[test]
    fn test_block_padded_to_capacity() {
        let mut ctx = HeadlessContext::new();
        let block = ctx.create_block("PrimitiveBlock", 64, &[7u8; 32]).unwrap();
        let bytes = ctx.block_bytes(block).unwrap();
        assert_eq!(bytes.len(), 64);
        assert!(bytes[..32].iter().all(|b| *b == 7));
        assert!(bytes[32..].iter().all(|b| *b == 0));
        assert!(ctx.create_block("x", 4, &[0u8; 8]).is_err());
    }

    #[test]
    fn test_release_block_detaches() {
        let mut ctx = HeadlessContext::new();
        let block = ctx.create_block("MaterialBlock", 64, &[1u8; 16]).unwrap();
        ctx.bind_block(block, 0).unwrap();
        assert_eq!(ctx.live_bytes(), 64);

        ctx.release_block(block);
        assert_eq!(ctx.live_bytes(), 0);
        assert_eq!(ctx.block_at(0), None);
        assert_eq!(ctx.block_bytes(block), None);
        assert!(ctx.bind_block(block, 0).is_err());
        // Second release is ignored
        ctx.release_block(block);
        assert_eq!(ctx.commands().last(), Some(&Command::ReleaseBlock(block)));
    }
}
