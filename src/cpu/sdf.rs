//! Offline signed distance field generation from a triangle mesh.
//!
//! The pipeline runs once per distinct mesh:
//! 1. triangle preprocessing (edges, face normal, degenerate triangles dropped, bounding box),
//! 2. voxelization: every voxel row along +X is ray cast against the mesh and the crossing
//!    parity decides `inside`,
//! 3. distance: unsigned distance to the closest triangle, signed by `inside`, plus that
//!    triangle's normal.
//!
//! The resulting [`SdfField`] is immutable and lives in mesh-local space.

use bevy::log::info;
use glam::{UVec3, Vec3};
use rayon::prelude::*;

use crate::error::PBFError;
use crate::gpu::ffi::GPUField;

/// Indexed triangle mesh, counter-clockwise winding seen from outside.
#[derive(Clone, Debug, Default)]
pub struct TriangleMesh {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl TriangleMesh {
    pub fn new(vertices: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Axis-aligned box centered at the origin.
    pub fn cuboid(half_extents: Vec3) -> Self {
        let h = half_extents;
        let vertices = vec![
            Vec3::new(-h.x, -h.y, -h.z),
            Vec3::new(h.x, -h.y, -h.z),
            Vec3::new(h.x, h.y, -h.z),
            Vec3::new(-h.x, h.y, -h.z),
            Vec3::new(-h.x, -h.y, h.z),
            Vec3::new(h.x, -h.y, h.z),
            Vec3::new(h.x, h.y, h.z),
            Vec3::new(-h.x, h.y, h.z),
        ];
        #[rustfmt::skip]
        let indices = vec![
            0, 3, 2, 0, 2, 1, // -z
            4, 5, 6, 4, 6, 7, // +z
            0, 4, 7, 0, 7, 3, // -x
            1, 2, 6, 1, 6, 5, // +x
            0, 1, 5, 0, 5, 4, // -y
            3, 7, 6, 3, 6, 2, // +y
        ];
        Self { vertices, indices }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Preprocessed triangle: vertices, edge vectors and unit face normal.
#[derive(Clone, Copy, Debug)]
pub struct Triangle {
    pub v0: Vec3,
    pub v1: Vec3,
    pub v2: Vec3,
    pub v21: Vec3, // v1 - v0
    pub v32: Vec3, // v2 - v1
    pub v13: Vec3, // v0 - v2
    pub normal: Vec3,
}

impl Triangle {
    /// None for zero-area triangles.
    pub fn new(v0: Vec3, v1: Vec3, v2: Vec3) -> Option<Self> {
        let v21 = v1 - v0;
        let v32 = v2 - v1;
        let v13 = v0 - v2;
        let n = v21.cross(-v13);
        // relative test, sin^2 of the corner angle
        if n.length_squared() <= 1e-12 * v21.length_squared() * v13.length_squared() {
            return None;
        }
        Some(Self { v0, v1, v2, v21, v32, v13, normal: n.normalize() })
    }

    /// Closest point on the triangle (Ericson, Real-Time Collision Detection 5.1.5).
    pub fn closest_point(&self, p: Vec3) -> Vec3 {
        let ab = self.v21;
        let ac = -self.v13;

        let ap = p - self.v0;
        let d1 = ab.dot(ap);
        let d2 = ac.dot(ap);
        if d1 <= 0.0 && d2 <= 0.0 {
            return self.v0;
        }

        let bp = p - self.v1;
        let d3 = ab.dot(bp);
        let d4 = ac.dot(bp);
        if d3 >= 0.0 && d4 <= d3 {
            return self.v1;
        }

        let vc = d1 * d4 - d3 * d2;
        if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
            return self.v0 + ab * (d1 / (d1 - d3));
        }

        let cp = p - self.v2;
        let d5 = ab.dot(cp);
        let d6 = ac.dot(cp);
        if d6 >= 0.0 && d5 <= d6 {
            return self.v2;
        }

        let vb = d5 * d2 - d1 * d6;
        if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
            return self.v0 + ac * (d2 / (d2 - d6));
        }

        let va = d3 * d6 - d5 * d4;
        if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
            let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
            return self.v1 + self.v32 * w;
        }

        let denom = 1.0 / (va + vb + vc);
        self.v0 + ab * (vb * denom) + ac * (vc * denom)
    }

    #[inline]
    pub fn distance(&self, p: Vec3) -> f32 {
        (p - self.closest_point(p)).length()
    }

    /// X coordinate where the +X ray from `origin` crosses the triangle, edges included.
    pub fn ray_x_hit(&self, origin: Vec3) -> Option<f32> {
        // Moller-Trumbore with dir = +X
        const TOL: f32 = 1e-7;
        let e1 = self.v21;
        let e2 = -self.v13;
        let pvec = Vec3::X.cross(e2);
        let det = e1.dot(pvec);
        if det.abs() < 1e-12 {
            return None; // parallel to the ray
        }
        let inv_det = 1.0 / det;
        let tvec = origin - self.v0;
        let u = tvec.dot(pvec) * inv_det;
        if u < -TOL || u > 1.0 + TOL {
            return None;
        }
        let qvec = tvec.cross(e1);
        let v = Vec3::X.dot(qvec) * inv_det;
        if v < -TOL || u + v > 1.0 + TOL {
            return None;
        }
        let t = e2.dot(qvec) * inv_det;
        (t >= 0.0).then_some(origin.x + t)
    }
}

/// One voxel: signed distance (negative inside) and the nearest surface normal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Field {
    pub normal: Vec3,
    pub distance: f32,
    pub inside: bool,
}

impl Default for Field {
    fn default() -> Self {
        Self { normal: Vec3::ZERO, distance: f32::INFINITY, inside: false }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldSample {
    pub distance: f32,
    pub normal: Vec3, // unit, pointing out of the solid
    pub inside: bool,
}

/// Voxel grid of `resolution^3` cells spanning `[min_bb, max_bb]`, x fastest.
#[derive(Clone, Debug)]
pub struct SdfField {
    pub resolution: usize,
    pub min_bb: Vec3,
    pub max_bb: Vec3,
    pub voxels: Vec<Field>,
}

impl SdfField {
    /// Fills a field from an analytic function of the voxel center.
    pub fn from_fn(
        resolution: usize,
        min_bb: Vec3,
        max_bb: Vec3,
        f: impl Fn(Vec3) -> Field + Sync,
    ) -> Self {
        let mut field = Self {
            resolution,
            min_bb,
            max_bb,
            voxels: vec![Field::default(); resolution.pow(3)],
        };
        let step = field.voxel_size();
        let res = resolution;
        field.voxels.par_iter_mut().enumerate().for_each(|(i, v)| {
            let idx = UVec3::new((i % res) as u32, ((i / res) % res) as u32, (i / (res * res)) as u32);
            *v = f(min_bb + (idx.as_vec3() + 0.5) * step);
        });
        field
    }

    pub fn voxel_size(&self) -> Vec3 {
        (self.max_bb - self.min_bb) / self.resolution as f32
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.resolution * (y + self.resolution * z)
    }

    pub fn voxel(&self, x: usize, y: usize, z: usize) -> &Field {
        &self.voxels[self.index(x, y, z)]
    }

    pub fn voxel_center(&self, x: usize, y: usize, z: usize) -> Vec3 {
        self.min_bb + (Vec3::new(x as f32, y as f32, z as f32) + 0.5) * self.voxel_size()
    }

    /// Voxels in the `#[repr(C)]` layout a device-side collision pass reads.
    pub fn gpu_fields(&self) -> Vec<GPUField> {
        self.voxels.iter().map(GPUField::from).collect()
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min_bb).all() && p.cmple(self.max_bb).all()
    }

    /// Trilinear distance and normal at a mesh-local point.
    /// Outside the grid the distance grows by the gap to the box and the normal points away from it.
    pub fn sample(&self, p: Vec3) -> FieldSample {
        if !self.contains(p) {
            let clamped = p.clamp(self.min_bb, self.max_bb);
            let gap = p - clamped;
            let (distance, _) = self.trilinear(clamped);
            return FieldSample {
                distance: distance + gap.length(),
                normal: gap.normalize_or_zero(),
                inside: false,
            };
        }

        let (distance, normal) = self.trilinear(p);
        let normal = normal.try_normalize().unwrap_or_else(|| self.gradient(p));
        FieldSample { distance, normal, inside: distance < 0.0 }
    }

    fn trilinear(&self, p: Vec3) -> (f32, Vec3) {
        let res = self.resolution as i32;
        let f = (p - self.min_bb) / self.voxel_size() - 0.5;
        let base = f.floor();
        let t = (f - base).clamp(Vec3::ZERO, Vec3::ONE);
        let b = base.as_ivec3();

        let get = |dx: usize, dy: usize, dz: usize| -> Field {
            let x = (b.x + dx as i32).clamp(0, res - 1) as usize;
            let y = (b.y + dy as i32).clamp(0, res - 1) as usize;
            let z = (b.z + dz as i32).clamp(0, res - 1) as usize;
            *self.voxel(x, y, z)
        };
        let wx = [1.0 - t.x, t.x];
        let wy = [1.0 - t.y, t.y];
        let wz = [1.0 - t.z, t.z];

        let mut distance = 0.0;
        let mut normal = Vec3::ZERO;
        for dz in 0..2 {
            for dy in 0..2 {
                for dx in 0..2 {
                    let w = wx[dx] * wy[dy] * wz[dz];
                    let v = get(dx, dy, dz);
                    distance += w * v.distance;
                    normal += w * v.normal;
                }
            }
        }
        (distance, normal)
    }

    /// Central-difference gradient of the distance, used where the stored normals cancel out.
    pub fn gradient(&self, p: Vec3) -> Vec3 {
        let s = self.voxel_size();
        let d = |o: Vec3| self.trilinear((p + o).clamp(self.min_bb, self.max_bb)).0;
        Vec3::new(
            d(Vec3::X * s.x) - d(-Vec3::X * s.x),
            d(Vec3::Y * s.y) - d(-Vec3::Y * s.y),
            d(Vec3::Z * s.z) - d(-Vec3::Z * s.z),
        )
        .normalize_or_zero()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SdfGenerator {
    pub resolution: usize,
    pub padding: f32,
}

impl Default for SdfGenerator {
    fn default() -> Self {
        Self { resolution: 64, padding: 0.1 }
    }
}

impl SdfGenerator {
    pub fn new(resolution: usize, padding: f32) -> Self {
        Self { resolution, padding }
    }

    pub fn generate(&self, mesh: &TriangleMesh) -> Result<SdfField, PBFError> {
        if self.resolution < 2 {
            return Err(PBFError::InvalidConfig("SDF resolution must be at least 2".into()));
        }
        let triangles = preprocess_triangles(mesh)?;
        let (min_bb, max_bb) = padded_bounds(&triangles, self.padding);

        let mut field = SdfField {
            resolution: self.resolution,
            min_bb,
            max_bb,
            voxels: vec![Field::default(); self.resolution.pow(3)],
        };
        voxelize(&mut field, &triangles);
        compute_distances(&mut field, &triangles);

        info!(
            "SDF generated: {}^3 voxels from {} triangles ({} degenerate skipped)",
            self.resolution,
            triangles.len(),
            mesh.triangle_count() - triangles.len()
        );
        Ok(field)
    }
}

/// Edge/normal form of every non-degenerate triangle.
pub fn preprocess_triangles(mesh: &TriangleMesh) -> Result<Vec<Triangle>, PBFError> {
    let vertex_count = mesh.vertices.len();
    let mut triangles = Vec::with_capacity(mesh.triangle_count());

    for tri in mesh.indices.chunks_exact(3) {
        let mut v = [Vec3::ZERO; 3];
        for (k, &index) in tri.iter().enumerate() {
            v[k] = *mesh
                .vertices
                .get(index as usize)
                .ok_or(PBFError::InvalidMeshIndex { index, vertex_count })?;
        }
        if let Some(t) = Triangle::new(v[0], v[1], v[2]) {
            triangles.push(t);
        }
    }

    if triangles.is_empty() {
        return Err(PBFError::EmptyMesh);
    }
    Ok(triangles)
}

fn padded_bounds(triangles: &[Triangle], padding: f32) -> (Vec3, Vec3) {
    let mut min = Vec3::splat(f32::INFINITY);
    let mut max = Vec3::splat(f32::NEG_INFINITY);
    for t in triangles {
        min = min.min(t.v0).min(t.v1).min(t.v2);
        max = max.max(t.v0).max(t.v1).max(t.v2);
    }

    let extent = (max - min).max_element();
    let pad = Vec3::splat(extent * padding);
    min -= pad;
    max += pad;
    // flat meshes still need a non-empty box on every axis
    let min_extent = extent * 1e-3;
    (min, max.max(min + Vec3::splat(min_extent)))
}

/// Parity ray casting along +X, one voxel row per task.
fn voxelize(field: &mut SdfField, triangles: &[Triangle]) {
    let res = field.resolution;
    let step = field.voxel_size();
    let (min_bb, max_bb) = (field.min_bb, field.max_bb);
    let merge_tol = (max_bb.x - min_bb.x) * 1e-5;

    field.voxels.par_chunks_mut(res).enumerate().for_each(|(row, voxels)| {
        let y = row % res;
        let z = row / res;
        let origin = Vec3::new(
            min_bb.x - 1.0,
            min_bb.y + (y as f32 + 0.5) * step.y,
            min_bb.z + (z as f32 + 0.5) * step.z,
        );

        let mut hits: Vec<f32> = triangles.iter().filter_map(|t| t.ray_x_hit(origin)).collect();
        hits.sort_unstable_by(f32::total_cmp);
        // a ray through a shared edge reports the same crossing once per triangle
        hits.dedup_by(|a, b| (*a - *b).abs() <= merge_tol);

        let mut crossed = 0;
        for (x, voxel) in voxels.iter_mut().enumerate() {
            let cx = min_bb.x + (x as f32 + 0.5) * step.x;
            while crossed < hits.len() && hits[crossed] < cx {
                crossed += 1;
            }
            *voxel = Field { inside: crossed % 2 == 1, ..Field::default() };
        }
    });
}

fn compute_distances(field: &mut SdfField, triangles: &[Triangle]) {
    let res = field.resolution;
    let step = field.voxel_size();
    let min_bb = field.min_bb;

    field.voxels.par_iter_mut().enumerate().for_each(|(i, voxel)| {
        let idx = UVec3::new((i % res) as u32, ((i / res) % res) as u32, (i / (res * res)) as u32);
        let p = min_bb + (idx.as_vec3() + 0.5) * step;

        let (d, nearest) = triangles
            .iter()
            .map(|t| (t.distance(p), t))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map_or((f32::INFINITY, Vec3::ZERO), |(d, t)| (d, t.normal));

        voxel.distance = if voxel.inside { -d } else { d };
        voxel.normal = nearest;
    });
}
