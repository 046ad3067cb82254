//! GPU program descriptions and their host-side uniform tables.
//!
//! A [`Program`] owns the state a GL-style program would keep on the driver side:
//! named uniform values, texture units, and uniform block binding indices. The
//! renderer sets them through `set_uniform` / `set_uniform_texture` / `set_ubo`;
//! backends read them back at draw time and reject anything missing.

use std::collections::BTreeMap;

use glam::Vec3;

use super::{ProgramHandle, SurfaceHandle};
use crate::util::{Error, Result};

/// Which of the renderer's programs this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    /// Path tracing kernel, adds one sample per pixel to the accumulation surface.
    Trace,
    /// Divides the running sum by the sample count and writes the frame.
    Display,
    /// Primary-hit normals written straight to the frame.
    Normals,
}

/// Shader stages a program is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramStages {
    /// Single compute entry point dispatched over the resolution.
    Compute {
        entry: &'static str,
        workgroup: (u32, u32),
    },
    /// Vertex + fragment pair drawn as one fullscreen triangle.
    Raster {
        vertex: &'static str,
        fragment: &'static str,
    },
}

/// Where a program's code comes from.
#[derive(Debug, Clone, Copy)]
pub struct ProgramSource {
    pub kind: ProgramKind,
    pub label: &'static str,
    /// WGSL chunks concatenated into one module.
    pub chunks: &'static [&'static str],
    pub stages: ProgramStages,
}

impl ProgramSource {
    /// Full WGSL module text.
    pub fn wgsl(&self) -> String {
        self.chunks.concat()
    }
}

/// Value of a named uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    U32(u32),
    F32(f32),
    UVec2([u32; 2]),
    Vec3([f32; 3]),
}

impl From<u32> for UniformValue {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<[u32; 2]> for UniformValue {
    fn from(v: [u32; 2]) -> Self {
        Self::UVec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        Self::Vec3(v.to_array())
    }
}

/// Surface sampled by a program on a given unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    pub surface: SurfaceHandle,
    pub unit: u32,
}

/// A created program plus its uniform table.
#[derive(Debug, Clone)]
pub struct Program {
    kind: ProgramKind,
    handle: ProgramHandle,
    uniforms: BTreeMap<&'static str, UniformValue>,
    textures: BTreeMap<&'static str, TextureBinding>,
    blocks: BTreeMap<&'static str, u32>,
}

impl Program {
    pub fn new(kind: ProgramKind, handle: ProgramHandle) -> Self {
        Self {
            kind,
            handle,
            uniforms: BTreeMap::new(),
            textures: BTreeMap::new(),
            blocks: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    pub fn set_uniform(&mut self, name: &'static str, value: impl Into<UniformValue>) {
        self.uniforms.insert(name, value.into());
    }

    pub fn set_uniform_texture(&mut self, name: &'static str, surface: SurfaceHandle, unit: u32) {
        self.textures.insert(name, TextureBinding { surface, unit });
    }

    /// Attach the uniform block `block` to binding index `binding`.
    pub fn set_ubo(&mut self, block: &'static str, binding: u32) {
        self.blocks.insert(block, binding);
    }

    pub fn uniform(&self, name: &str) -> Result<UniformValue> {
        self.uniforms
            .get(name)
            .copied()
            .ok_or_else(|| Error::program(format!("{:?}: uniform '{name}' not set", self.kind)))
    }

    pub fn uniform_u32(&self, name: &str) -> Result<u32> {
        match self.uniform(name)? {
            UniformValue::U32(v) => Ok(v),
            other => Err(self.type_mismatch(name, "u32", other)),
        }
    }

    pub fn uniform_f32(&self, name: &str) -> Result<f32> {
        match self.uniform(name)? {
            UniformValue::F32(v) => Ok(v),
            other => Err(self.type_mismatch(name, "f32", other)),
        }
    }

    pub fn uniform_uvec2(&self, name: &str) -> Result<[u32; 2]> {
        match self.uniform(name)? {
            UniformValue::UVec2(v) => Ok(v),
            other => Err(self.type_mismatch(name, "uvec2", other)),
        }
    }

    pub fn uniform_vec3(&self, name: &str) -> Result<[f32; 3]> {
        match self.uniform(name)? {
            UniformValue::Vec3(v) => Ok(v),
            other => Err(self.type_mismatch(name, "vec3", other)),
        }
    }

    pub fn texture(&self, name: &str) -> Result<TextureBinding> {
        self.textures
            .get(name)
            .copied()
            .ok_or_else(|| Error::program(format!("{:?}: texture '{name}' not set", self.kind)))
    }

    /// Binding index of a uniform block.
    pub fn block(&self, name: &str) -> Result<u32> {
        self.blocks
            .get(name)
            .copied()
            .ok_or_else(|| Error::program(format!("{:?}: block '{name}' not bound", self.kind)))
    }

    fn type_mismatch(&self, name: &str, expected: &str, actual: UniformValue) -> Error {
        Error::program(format!(
            "{:?}: uniform '{name}' expected {expected}, got {actual:?}",
            self.kind
        ))
    }
}
