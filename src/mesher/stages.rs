//! The passes of the meshing pipeline, run in dependency order:
//!
//! corners -> vertices -> materials -> quads -> segment offsets -> compaction
//!
//! Each pass is split into batches of lattice points that run on the compute pool. Batches keep
//! their own scratch buffers between jobs, so a warmed up handler meshes without allocating.

use std::ops::Range;

use bevy::math::{UVec3, Vec2, Vec3};
use bevy::tasks::ParallelSliceMut;
use smallvec::SmallVec;

use super::tables::{corner_offset, CUBE_EDGES, EDGE_MASKS};
use super::SubMesh;
use crate::config::SKIRT;
use crate::edit::Aabb;
use crate::field::ambient_occlusion;
use crate::parallel::{compute_pool, par_batches_mut};
use crate::{Lattice, VoxelField};

/// Lattice points handled by one unit of work
pub const CELL_BATCH: usize = 4096;

/// Marks a cell without a vertex
pub(crate) const NO_VERTEX: u32 = u32::MAX;

/// Scratch memory owned by one batch of lattice points
pub(crate) struct BatchScratch {
    range: Range<usize>,
    vertices: Vec<Vec3>,
    uvs: Vec<Vec2>,
    solid_counts: Vec<u32>,
    quads: Vec<Vec<u32>>,
}

impl BatchScratch {
    fn new(range: Range<usize>, max_materials: usize) -> Self {
        Self {
            range,
            vertices: Vec::new(),
            uvs: Vec::new(),
            solid_counts: vec![0; max_materials],
            quads: (0..max_materials).map(|_| Vec::new()).collect(),
        }
    }
}

/// Result of one run of the pipeline
#[derive(Debug, Clone, Default)]
pub(crate) struct MeshSummary {
    pub vertex_count: usize,
    pub triangle_count: usize,
    pub submeshes: SmallVec<[SubMesh; 4]>,
    pub bounds: Option<Aabb>,
}

/// All memory needed to mesh one chunk. Sized to the chunk volume and the material cap once,
/// then reused for every chunk the owning handler meshes
pub(crate) struct MeshScratch {
    pub field: VoxelField,
    corners: Vec<u8>,
    indices: Vec<u32>,
    pub vertices: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub triangles: Vec<u32>,
    batches: Vec<BatchScratch>,
    /// Solid voxels per material in `field`
    pub material_counts: Vec<u32>,
    material_lookup: Vec<u16>,
    materials: Vec<u8>,
    quad_counts: Vec<u32>,
    segment_offsets: Vec<usize>,
    pub summary: MeshSummary,
}

impl MeshScratch {
    pub fn new(lattice: Lattice, max_materials: usize) -> Self {
        let volume = lattice.volume();
        let batches = (0..volume)
            .step_by(CELL_BATCH)
            .map(|start| BatchScratch::new(start..(start + CELL_BATCH).min(volume), max_materials))
            .collect();
        Self {
            field: VoxelField::empty(lattice),
            corners: vec![0; volume],
            indices: vec![NO_VERTEX; volume],
            vertices: Vec::new(),
            uvs: Vec::new(),
            triangles: Vec::new(),
            batches,
            material_counts: vec![0; max_materials],
            material_lookup: vec![u16::MAX; max_materials],
            materials: Vec::with_capacity(max_materials),
            quad_counts: vec![0; max_materials],
            segment_offsets: vec![0; max_materials],
            summary: MeshSummary::default(),
        }
    }

    /// Run every pass over the current contents of `field`
    pub fn build(&mut self, voxel_size: f32) {
        self.classify_corners();
        self.place_vertices(voxel_size);
        self.bucket_materials();
        self.emit_quads();
        self.compute_segment_offsets();
        self.compact();
    }

    /// Pass 1: a bitmask of the solid corners of every cell. Lattice points on the last layer
    /// have no cell and get an empty mask
    fn classify_corners(&mut self) {
        let field = &self.field;
        let lattice = field.lattice();
        let last = lattice.size() - 1;
        par_batches_mut(&mut self.corners, CELL_BATCH, |start, corners| {
            for (offset, mask) in corners.iter_mut().enumerate() {
                let cell = lattice.to_coord(start + offset);
                *mask = 0;
                if cell.cmpge(UVec3::splat(last)).any() {
                    continue;
                }
                for corner in 0..8u8 {
                    let p = cell + UVec3::from_array(corner_offset(corner));
                    if field.get_voxel(p).is_solid() {
                        *mask |= 1 << corner;
                    }
                }
            }
        });
    }

    /// Pass 2: one vertex per cell the surface passes through, shared by every quad touching
    /// that cell. Each batch numbers its vertices locally, a prefix sum over the batch counts
    /// turns those into final indices
    fn place_vertices(&mut self, voxel_size: f32) {
        let field = &self.field;
        let corners = &self.corners;
        let lattice = field.lattice();

        let mut work: Vec<_> = self
            .batches
            .iter_mut()
            .zip(self.indices.chunks_mut(CELL_BATCH))
            .collect();
        work.par_chunk_map_mut(compute_pool(), 1, |items| {
            for (batch, indices) in items.iter_mut() {
                batch.vertices.clear();
                batch.uvs.clear();
                for (offset, index) in indices.iter_mut().enumerate() {
                    let cell_index = batch.range.start + offset;
                    let mask = corners[cell_index];
                    let edges = EDGE_MASKS[mask as usize];
                    if edges == 0 {
                        *index = NO_VERTEX;
                        continue;
                    }

                    let cell = lattice.to_coord(cell_index);
                    let mut sum = Vec3::ZERO;
                    let mut crossings = 0;
                    let mut material = 0;
                    for (edge, [a, b]) in CUBE_EDGES.iter().enumerate() {
                        if edges & (1 << edge) == 0 {
                            continue;
                        }
                        let pa = UVec3::from_array(corner_offset(*a));
                        let pb = UVec3::from_array(corner_offset(*b));
                        let va = field.get_voxel(cell + pa);
                        let vb = field.get_voxel(cell + pb);
                        let (da, db) = (va.density(), vb.density());
                        let t = da / (da - db);
                        sum += pa.as_vec3().lerp(pb.as_vec3(), t);
                        crossings += 1;
                        if crossings == 1 {
                            material = if va.is_solid() {
                                va.material()
                            } else {
                                vb.material()
                            };
                        }
                    }

                    let local = cell.as_vec3() + sum / crossings as f32;
                    *index = batch.vertices.len() as u32;
                    batch
                        .vertices
                        .push((local - SKIRT as f32) * voxel_size);
                    let ao = ambient_occlusion(lattice, field.voxels(), local, 1.0);
                    batch.uvs.push(Vec2::new(ao, material as f32));
                }
            }
        });
        drop(work);

        let mut offsets = Vec::with_capacity(self.batches.len());
        let mut total = 0u32;
        for batch in &self.batches {
            offsets.push(total);
            total += batch.vertices.len() as u32;
        }

        let mut work: Vec<_> = self
            .indices
            .chunks_mut(CELL_BATCH)
            .zip(offsets)
            .collect();
        work.par_chunk_map_mut(compute_pool(), 1, |items| {
            for (indices, base) in items.iter_mut() {
                for index in indices.iter_mut().filter(|i| **i != NO_VERTEX) {
                    *index += *base;
                }
            }
        });

        self.vertices.clear();
        self.uvs.clear();
        let mut bounds: Option<Aabb> = None;
        for batch in &self.batches {
            self.vertices.extend_from_slice(&batch.vertices);
            self.uvs.extend_from_slice(&batch.uvs);
            for v in &batch.vertices {
                bounds = Some(match bounds {
                    Some(b) => Aabb::new(b.min.min(*v), b.max.max(*v)),
                    None => Aabb::new(*v, *v),
                });
            }
        }
        self.summary.vertex_count = self.vertices.len();
        self.summary.bounds = bounds;
    }

    /// Pass 3: histogram of the solid voxels per material, then a dense index for every material
    /// that is present. Materials past the cap share the last slot
    fn bucket_materials(&mut self) {
        let voxels = self.field.voxels();
        let cap = self.material_counts.len();
        self.batches.par_chunk_map_mut(compute_pool(), 1, |batches| {
            for batch in batches.iter_mut() {
                batch.solid_counts.fill(0);
                for voxel in &voxels[batch.range.clone()] {
                    if voxel.is_solid() {
                        batch.solid_counts[(voxel.material() as usize).min(cap - 1)] += 1;
                    }
                }
            }
        });

        self.material_counts.fill(0);
        for batch in &self.batches {
            for (total, count) in self.material_counts.iter_mut().zip(&batch.solid_counts) {
                *total += count;
            }
        }

        self.materials.clear();
        self.material_lookup.fill(u16::MAX);
        for (material, count) in self.material_counts.iter().enumerate() {
            if *count > 0 {
                self.material_lookup[material] = self.materials.len() as u16;
                self.materials.push(material as u8);
            }
        }
    }

    /// Pass 4: a quad for every crossed edge leaving a lattice point this chunk owns, written to
    /// the batch's bucket for the material on the solid side
    fn emit_quads(&mut self) {
        let field = &self.field;
        let corners = &self.corners;
        let indices = &self.indices;
        let lookup = &self.material_lookup;
        let used = self.materials.len();
        let lattice = field.lattice();
        let cap = lookup.len();
        let owned = SKIRT..lattice.size() - SKIRT;

        self.batches.par_chunk_map_mut(compute_pool(), 1, |batches| {
            for batch in batches.iter_mut() {
                for bucket in batch.quads.iter_mut().take(used) {
                    bucket.clear();
                }
                for point_index in batch.range.clone() {
                    let point = lattice.to_coord(point_index);
                    if !point.to_array().iter().all(|c| owned.contains(c)) {
                        continue;
                    }
                    let mask = corners[point_index];
                    let inside = mask & 1 != 0;
                    for axis in 0..3 {
                        let other = mask & (1 << (1 << axis)) != 0;
                        if inside == other {
                            continue;
                        }

                        let b = axis_unit((axis + 1) % 3);
                        let c = axis_unit((axis + 2) % 3);
                        let cell = |p: UVec3| indices[lattice.to_index(p)];
                        let v = [
                            cell(point),
                            cell(point - b),
                            cell(point - b - c),
                            cell(point - c),
                        ];
                        debug_assert!(v.iter().all(|i| *i != NO_VERTEX));

                        let solid = if inside {
                            field.get_voxel(point)
                        } else {
                            field.get_voxel(point + axis_unit(axis))
                        };
                        let dense = lookup[(solid.material() as usize).min(cap - 1)] as usize;
                        let bucket = &mut batch.quads[dense];
                        if inside {
                            bucket.extend_from_slice(&[v[0], v[1], v[2], v[0], v[2], v[3]]);
                        } else {
                            bucket.extend_from_slice(&[v[0], v[2], v[1], v[0], v[3], v[2]]);
                        }
                    }
                }
            }
        });

        for (dense, count) in self.quad_counts.iter_mut().enumerate().take(used) {
            *count = self
                .batches
                .iter()
                .map(|batch| (batch.quads[dense].len() / 6) as u32)
                .sum();
        }
    }

    /// Pass 5: exclusive prefix sum of the per material index counts
    fn compute_segment_offsets(&mut self) {
        let used = self.materials.len();
        let mut offset = 0;
        for dense in 0..used {
            self.segment_offsets[dense] = offset;
            offset += self.quad_counts[dense] as usize * 6;
        }
        self.summary.triangle_count = offset / 3;
    }

    /// Pass 6: copy every material's quads into its own contiguous run of the index buffer
    fn compact(&mut self) {
        let used = self.materials.len();
        let total = self.summary.triangle_count * 3;
        self.triangles.clear();
        self.triangles.resize(total, 0);

        let mut segments = Vec::with_capacity(used);
        let mut rest = self.triangles.as_mut_slice();
        for dense in 0..used {
            let (segment, tail) =
                std::mem::take(&mut rest).split_at_mut(self.quad_counts[dense] as usize * 6);
            segments.push((dense, segment));
            rest = tail;
        }

        let batches = &self.batches;
        segments.par_chunk_map_mut(compute_pool(), 1, |segments| {
            for (dense, segment) in segments.iter_mut() {
                let mut cursor = 0;
                for batch in batches {
                    let quads = &batch.quads[*dense];
                    segment[cursor..cursor + quads.len()].copy_from_slice(quads);
                    cursor += quads.len();
                }
            }
        });

        self.summary.submeshes.clear();
        for dense in 0..used {
            let count = self.quad_counts[dense] as usize * 6;
            if count > 0 {
                self.summary.submeshes.push(SubMesh {
                    material: self.materials[dense],
                    start: self.segment_offsets[dense],
                    count,
                });
            }
        }
    }
}

#[inline(always)]
fn axis_unit(axis: usize) -> UVec3 {
    match axis {
        0 => UVec3::X,
        1 => UVec3::Y,
        _ => UVec3::Z,
    }
}
