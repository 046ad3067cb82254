//! Scene description records and their bounded GPU constant blocks.
//!
//! Records are `#[repr(C)]` and 32 bytes each so an array of them matches the
//! std140 layout of the `MaterialBlock` / `PrimitiveBlock` uniform arrays:
//!
//! ```text
//! Material  : albedo.xyz | kind     | emission.xyz | roughness
//! Primitive : data.xyzw             | kind | material | pad pad
//! ```

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::util::{Error, Result};

/// Material capacity of the GPU-side `MaterialBlock`.
pub const MAX_MATERIALS: usize = 100;
/// Primitive capacity of the GPU-side `PrimitiveBlock`.
pub const MAX_PRIMITIVES: usize = 100;

pub const MATERIAL_DIFFUSE: u32 = 0;
pub const MATERIAL_METAL: u32 = 1;
pub const MATERIAL_EMISSIVE: u32 = 2;

pub const PRIMITIVE_SPHERE: u32 = 0;
pub const PRIMITIVE_PLANE: u32 = 1;

/// Surface material (32 bytes, matches WGSL struct).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Material {
    pub albedo: [f32; 3],
    pub kind: u32,
    pub emission: [f32; 3],
    pub roughness: f32,
}

impl Material {
    pub fn diffuse(albedo: Vec3) -> Self {
        Self {
            albedo: albedo.to_array(),
            kind: MATERIAL_DIFFUSE,
            emission: [0.0; 3],
            roughness: 1.0,
        }
    }

    pub fn metal(albedo: Vec3, roughness: f32) -> Self {
        Self {
            albedo: albedo.to_array(),
            kind: MATERIAL_METAL,
            emission: [0.0; 3],
            roughness: roughness.clamp(0.0, 1.0),
        }
    }

    pub fn emissive(emission: Vec3) -> Self {
        Self {
            albedo: [0.0; 3],
            kind: MATERIAL_EMISSIVE,
            emission: emission.to_array(),
            roughness: 1.0,
        }
    }
}

/// Analytic primitive (32 bytes, matches WGSL struct).
///
/// Sphere: `data = center.xyz, radius`. Plane: `data = normal.xyz, offset`
/// where points satisfy `dot(normal, p) = offset`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Primitive {
    pub data: [f32; 4],
    pub kind: u32,
    pub material: u32,
    pub _pad: [u32; 2],
}

impl Primitive {
    pub fn sphere(center: Vec3, radius: f32, material: u32) -> Self {
        Self {
            data: center.extend(radius).to_array(),
            kind: PRIMITIVE_SPHERE,
            material,
            _pad: [0; 2],
        }
    }

    pub fn plane(normal: Vec3, offset: f32, material: u32) -> Self {
        Self {
            data: normal.normalize_or_zero().extend(offset).to_array(),
            kind: PRIMITIVE_PLANE,
            material,
            _pad: [0; 2],
        }
    }
}

/// Fixed-capacity record collection destined for one GPU constant block.
///
/// Construction fails instead of truncating when the records do not fit.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantBlock<T: Pod, const N: usize> {
    name: &'static str,
    records: Vec<T>,
}

impl<T: Pod, const N: usize> ConstantBlock<T, N> {
    pub const CAPACITY: usize = N;

    pub fn new(name: &'static str, records: Vec<T>) -> Result<Self> {
        if records.len() > N {
            return Err(Error::CapacityExceeded {
                block: name,
                count: records.len(),
                capacity: N,
            });
        }
        Ok(Self { name, records })
    }

    /// Block name as declared in the shaders.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    /// Live records as bytes (the upload payload).
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.records)
    }

    /// Size of the full GPU allocation, live records plus unused tail.
    pub fn capacity_bytes(&self) -> usize {
        N * std::mem::size_of::<T>()
    }
}

pub type MaterialBlock = ConstantBlock<Material, MAX_MATERIALS>;
pub type PrimitiveBlock = ConstantBlock<Primitive, MAX_PRIMITIVES>;

/// Immutable scene: materials and primitives, each within block capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    materials: MaterialBlock,
    primitives: PrimitiveBlock,
}

impl Scene {
    /// Validate and build a scene. Capacity is checked before material
    /// references, and nothing is uploaded here.
    pub fn new(materials: Vec<Material>, primitives: Vec<Primitive>) -> Result<Self> {
        let materials = MaterialBlock::new("MaterialBlock", materials)?;
        let primitives = PrimitiveBlock::new("PrimitiveBlock", primitives)?;

        let count = materials.len();
        if let Some((primitive, p)) = primitives
            .records()
            .iter()
            .enumerate()
            .find(|(_, p)| p.material as usize >= count)
        {
            return Err(Error::DanglingMaterial {
                primitive,
                material: p.material,
                count,
            });
        }

        Ok(Self { materials, primitives })
    }

    /// Scene with no records.
    pub fn empty() -> Self {
        Self {
            materials: MaterialBlock { name: "MaterialBlock", records: Vec::new() },
            primitives: PrimitiveBlock { name: "PrimitiveBlock", records: Vec::new() },
        }
    }

    pub fn materials(&self) -> &MaterialBlock {
        &self.materials
    }

    pub fn primitives(&self) -> &PrimitiveBlock {
        &self.primitives
    }
}

impl Default for Scene {
    /// Closed box with a ceiling light, a matte and a metal sphere.
    fn default() -> Self {
        let materials = vec![
            Material::diffuse(Vec3::splat(0.73)),
            Material::diffuse(Vec3::new(0.65, 0.05, 0.05)),
            Material::diffuse(Vec3::new(0.12, 0.45, 0.15)),
            Material::emissive(Vec3::splat(15.0)),
            Material::metal(Vec3::new(0.9, 0.8, 0.6), 0.15),
        ];
        let primitives = vec![
            Primitive::plane(Vec3::Y, 0.0, 0),
            Primitive::plane(Vec3::NEG_Y, -2.0, 0),
            Primitive::plane(Vec3::Z, -1.0, 0),
            Primitive::plane(Vec3::X, -1.0, 1),
            Primitive::plane(Vec3::NEG_X, -1.0, 2),
            Primitive::sphere(Vec3::new(0.0, 2.9, 0.0), 1.0, 3),
            Primitive::sphere(Vec3::new(-0.45, 0.35, 0.1), 0.35, 0),
            Primitive::sphere(Vec3::new(0.45, 0.4, -0.3), 0.4, 4),
        ];
        Self {
            materials: MaterialBlock { name: "MaterialBlock", records: materials },
            primitives: PrimitiveBlock { name: "PrimitiveBlock", records: primitives },
        }
    }
}
