//! Embedded WGSL for the trace, display and normals programs.
//!
//! Modules are assembled from chunks so the record layouts and camera ray setup
//! are declared once. Binding numbers follow the constant block indices:
//! 0 = `MaterialBlock`, 1 = `PrimitiveBlock`, 2 = per-program params.

use super::program::{ProgramKind, ProgramSource, ProgramStages};

/// Workgroup size of the trace kernel (must match @workgroup_size below).
pub const TRACE_WORKGROUP: (u32, u32) = (8, 8);

/// Record layouts, must match `scene::{Material, Primitive}`.
pub const SCENE_TYPES: &str = r#"
const MAX_RECORDS: u32 = 100u;
const MATERIAL_METAL: u32 = 1u;
const MATERIAL_EMISSIVE: u32 = 2u;
const PRIMITIVE_SPHERE: u32 = 0u;
const NO_HIT: u32 = 0xffffffffu;
const T_MIN: f32 = 1e-4;
const T_MAX: f32 = 1e30;

struct Material {
    albedo: vec3<f32>,
    kind: u32,
    emission: vec3<f32>,
    roughness: f32,
}

struct Primitive {
    data: vec4<f32>,
    kind: u32,
    material: u32,
    pad0: u32,
    pad1: u32,
}

struct MaterialBlock {
    items: array<Material, MAX_RECORDS>,
}

struct PrimitiveBlock {
    items: array<Primitive, MAX_RECORDS>,
}

// Must match wgpu_backend::CameraParams
struct CameraParams {
    resolution: vec2<u32>,
    resolution_y_inv: f32,
    tan_half_fov: f32,
    cam_pos: vec3<f32>,
    max_bounces: u32,
    cam_forward: vec3<f32>,
    material_count: u32,
    cam_right: vec3<f32>,
    primitive_count: u32,
    cam_up: vec3<f32>,
    _pad: u32,
}
"#;

/// Closest-hit query against the primitive block.
pub const INTERSECT: &str = r#"
struct Hit {
    t: f32,
    normal: vec3<f32>,
    material: u32,
}

fn intersect(ro: vec3<f32>, rd: vec3<f32>) -> Hit {
    var hit: Hit;
    hit.t = T_MAX;
    hit.normal = vec3<f32>(0.0, 1.0, 0.0);
    hit.material = NO_HIT;

    let count = min(params.primitive_count, MAX_RECORDS);
    for (var i = 0u; i < count; i++) {
        let p = primitives.items[i];
        if p.kind == PRIMITIVE_SPHERE {
            let oc = ro - p.data.xyz;
            let b = dot(oc, rd);
            let c = dot(oc, oc) - p.data.w * p.data.w;
            let disc = b * b - c;
            if disc > 0.0 {
                let sq = sqrt(disc);
                var t = -b - sq;
                if t < T_MIN {
                    t = -b + sq;
                }
                if t > T_MIN && t < hit.t {
                    var n = (ro + rd * t - p.data.xyz) / p.data.w;
                    if dot(n, rd) > 0.0 {
                        n = -n;
                    }
                    hit.t = t;
                    hit.normal = n;
                    hit.material = p.material;
                }
            }
        } else {
            let n = p.data.xyz;
            let denom = dot(n, rd);
            if abs(denom) > 1e-6 {
                let t = (p.data.w - dot(n, ro)) / denom;
                if t > T_MIN && t < hit.t {
                    hit.t = t;
                    hit.normal = select(n, -n, denom > 0.0);
                    hit.material = p.material;
                }
            }
        }
    }
    return hit;
}

// Pixel position (plus sub-pixel offset) to a world-space primary ray direction.
fn primary_dir(px: vec2<f32>) -> vec3<f32> {
    let uv = (2.0 * px - vec2<f32>(params.resolution)) * params.resolution_y_inv;
    return normalize(
        params.cam_forward
            + (uv.x * params.cam_right - uv.y * params.cam_up) * params.tan_half_fov
    );
}
"#;

/// Trace kernel: one jittered path per pixel, added to the running sum.
pub const TRACE_KERNEL: &str = r#"
@group(0) @binding(0) var<uniform> materials: MaterialBlock;
@group(0) @binding(1) var<uniform> primitives: PrimitiveBlock;
@group(0) @binding(2) var<uniform> params: CameraParams;
@group(0) @binding(3) var<storage, read_write> accum: array<vec4<f32>>;
@group(0) @binding(4) var<storage, read_write> state: array<u32>;

// xorshift32; state is never zero so the sequence never collapses
fn rand(s: ptr<function, u32>) -> f32 {
    var x = *s;
    x ^= x << 13u;
    x ^= x >> 17u;
    x ^= x << 5u;
    *s = x;
    return f32(x) * 2.3283064e-10;
}

fn cosine_dir(n: vec3<f32>, s: ptr<function, u32>) -> vec3<f32> {
    let r1 = rand(s);
    let r2 = rand(s);
    let phi = 6.2831853 * r1;
    let r = sqrt(r2);
    let helper = select(vec3<f32>(1.0, 0.0, 0.0), vec3<f32>(0.0, 1.0, 0.0), abs(n.x) > 0.9);
    let u = normalize(cross(helper, n));
    let v = cross(n, u);
    return normalize(u * (cos(phi) * r) + v * (sin(phi) * r) + n * sqrt(1.0 - r2));
}

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x >= params.resolution.x || gid.y >= params.resolution.y {
        return;
    }
    let idx = gid.y * params.resolution.x + gid.x;
    var seed = state[idx];

    let jitter = vec2<f32>(rand(&seed), rand(&seed));
    var ro = params.cam_pos;
    var rd = primary_dir(vec2<f32>(gid.xy) + jitter);
    var throughput = vec3<f32>(1.0);
    var radiance = vec3<f32>(0.0);

    for (var bounce = 0u; bounce <= params.max_bounces; bounce++) {
        let hit = intersect(ro, rd);
        if hit.material == NO_HIT || hit.material >= params.material_count {
            break;
        }
        let m = materials.items[hit.material];
        radiance += throughput * m.emission;
        if m.kind == MATERIAL_EMISSIVE {
            break;
        }

        ro = ro + rd * hit.t + hit.normal * T_MIN;
        if m.kind == MATERIAL_METAL {
            let fuzz = m.roughness * (cosine_dir(hit.normal, &seed) - hit.normal);
            rd = normalize(reflect(rd, hit.normal) + fuzz);
            if dot(rd, hit.normal) <= 0.0 {
                break;
            }
        } else {
            rd = cosine_dir(hit.normal, &seed);
        }
        throughput *= m.albedo;
    }

    accum[idx] += vec4<f32>(radiance, 0.0);
    state[idx] = seed;
}
"#;

/// Fullscreen triangle vertex stage shared by the raster programs.
pub const FULLSCREEN_VS: &str = r#"
struct VsOut {
    @builtin(position) pos: vec4<f32>,
}

@vertex
fn vs_fullscreen(@builtin(vertex_index) index: u32) -> VsOut {
    var positions = array<vec2<f32>, 3>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(3.0, -1.0),
        vec2<f32>(-1.0, 3.0)
    );
    var out: VsOut;
    out.pos = vec4<f32>(positions[index], 0.0, 1.0);
    return out;
}
"#;

/// Display: running sum times 1/samples, tone mapped.
pub const DISPLAY_FS: &str = r#"
// Must match wgpu_backend::DisplayParams
struct DisplayParams {
    resolution: vec2<u32>,
    samples_inv: f32,
    _pad: f32,
}

@group(0) @binding(2) var<uniform> params: DisplayParams;
@group(0) @binding(3) var<storage, read> accum: array<vec4<f32>>;

@fragment
fn fs_display(in: VsOut) -> @location(0) vec4<f32> {
    let p = min(vec2<u32>(in.pos.xy), params.resolution - vec2<u32>(1u));
    let c = accum[p.y * params.resolution.x + p.x].rgb * params.samples_inv;
    let mapped = c / (c + vec3<f32>(1.0));
    return vec4<f32>(pow(mapped, vec3<f32>(1.0 / 2.2)), 1.0);
}
"#;

/// Normals: single unjittered primary ray, no accumulation.
pub const NORMALS_FS: &str = r#"
@group(0) @binding(1) var<uniform> primitives: PrimitiveBlock;
@group(0) @binding(2) var<uniform> params: CameraParams;

@fragment
fn fs_normals(in: VsOut) -> @location(0) vec4<f32> {
    let rd = primary_dir(floor(in.pos.xy) + vec2<f32>(0.5));
    let hit = intersect(params.cam_pos, rd);
    if hit.material == NO_HIT {
        return vec4<f32>(0.0, 0.0, 0.0, 1.0);
    }
    return vec4<f32>(hit.normal * 0.5 + vec3<f32>(0.5), 1.0);
}
"#;

pub const TRACE: ProgramSource = ProgramSource {
    kind: ProgramKind::Trace,
    label: "pt_trace",
    chunks: &[SCENE_TYPES, TRACE_KERNEL, INTERSECT],
    stages: ProgramStages::Compute {
        entry: "main",
        workgroup: TRACE_WORKGROUP,
    },
};

pub const DISPLAY: ProgramSource = ProgramSource {
    kind: ProgramKind::Display,
    label: "pt_display",
    chunks: &[FULLSCREEN_VS, DISPLAY_FS],
    stages: ProgramStages::Raster {
        vertex: "vs_fullscreen",
        fragment: "fs_display",
    },
};

pub const NORMALS: ProgramSource = ProgramSource {
    kind: ProgramKind::Normals,
    label: "pt_normals",
    chunks: &[SCENE_TYPES, FULLSCREEN_VS, NORMALS_FS, INTERSECT],
    stages: ProgramStages::Raster {
        vertex: "vs_fullscreen",
        fragment: "fs_normals",
    },
};
