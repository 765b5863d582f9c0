//! Surface extraction. A [`MeshJobHandler`] owns every buffer needed to turn one chunk's field
//! into a mesh, and keeps those buffers for the next chunk once the host has consumed the result.
//!
//! The mesh is a dual contour of the density field: every cell the surface passes through gets
//! one vertex, and every lattice edge the surface crosses becomes a quad joining the vertices of
//! the four cells around that edge.

mod stages;
mod tables;

use std::sync::Arc;

use bevy::log::debug;
use bevy::math::{Vec2, Vec3};
use bevy::tasks::{block_on, Task};

use crate::apply::apply_edit;
use crate::edit::Aabb;
use crate::parallel::async_pool;
use crate::{Lattice, TerrainConfig, VoxelEdit, VoxelField};

pub use stages::CELL_BATCH;
pub(crate) use stages::MeshScratch;

/// A contiguous run of the index buffer drawn with one material
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubMesh {
    /// The material of every triangle in this run
    pub material: u8,
    /// Offset of the first index of this run
    pub start: usize,
    /// Number of indices in this run, always a multiple of 3
    pub count: usize,
}

impl SubMesh {
    /// Offset of the first triangle of this run
    pub fn triangle_offset(&self) -> usize {
        self.start / 3
    }

    /// Number of triangles in this run
    pub fn triangle_count(&self) -> usize {
        self.count / 3
    }
}

/// A finished mesh, borrowed from the handler that built it. Vertex positions are relative to the
/// chunk origin. `uvs` hold the ambient occlusion in `x` and the material in `y`
#[derive(Clone, Copy, Debug)]
pub struct MeshDescription<'a> {
    /// Vertex positions
    pub vertices: &'a [Vec3],
    /// Per vertex attributes
    pub uvs: &'a [Vec2],
    /// Triangle list, partitioned by material
    pub indices: &'a [u32],
    /// The material partitions of `indices`, ordered by offset
    pub submeshes: &'a [SubMesh],
    /// Bounds of all vertices, `None` for an empty mesh
    pub bounds: Option<Aabb>,
    /// Whether the host should bake a collider for this mesh
    pub needs_collision_bake: bool,
}

impl MeshDescription<'_> {
    /// The number of vertices
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// The number of triangles
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Whether the mesh has any triangles at all
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Everything a handler needs to know to mesh one chunk
#[derive(Clone)]
pub struct MeshJob {
    /// Index of the chunk in the terrain
    pub chunk: usize,
    /// World position of the chunk
    pub origin: Vec3,
    /// An edit to apply to the field before it is meshed
    pub edit: Option<Arc<dyn VoxelEdit>>,
    /// Whether the finished mesh should get a collider
    pub collisions: bool,
    /// Frames the job may run before it is completed by force
    pub max_frames: u32,
}

/// A job a handler has finished. The handler holds on to the mesh and the new field until the
/// next job is started
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FinishedJob {
    /// Index of the chunk in the terrain
    pub chunk: usize,
    /// Whether the job applied an edit to the field
    pub applied_edit: bool,
    /// Whether the job had to be completed by blocking
    pub forced: bool,
}

#[derive(Clone, Copy)]
struct JobInfo {
    chunk: usize,
    applied_edit: bool,
    collisions: bool,
    started: u64,
    max_frames: u32,
}

struct RunningJob {
    info: JobInfo,
    task: Task<Box<MeshScratch>>,
}

/// One reusable slot of the meshing pool. At most one job runs on a handler at a time
pub struct MeshJobHandler {
    scratch: Option<Box<MeshScratch>>,
    running: Option<RunningJob>,
    collisions: bool,
    voxel_size: f32,
}

impl MeshJobHandler {
    /// Allocate a handler for chunks of the given config
    pub fn new(config: &TerrainConfig) -> Self {
        Self {
            scratch: Some(Box::new(MeshScratch::new(
                Lattice::new(config.chunk_size),
                config.max_materials,
            ))),
            running: None,
            collisions: false,
            voxel_size: config.voxel_size,
        }
    }

    /// Whether the handler can take a new job
    pub fn is_free(&self) -> bool {
        self.running.is_none()
    }

    /// The chunk this handler is currently meshing
    pub fn chunk(&self) -> Option<usize> {
        self.running.as_ref().map(|job| job.info.chunk)
    }

    /// Start meshing a copy of `field`, applying the job's edit to it first. The chunk keeps
    /// its field untouched until the result is swapped in by [`MeshJobHandler::swap_field`]
    pub fn start(&mut self, job: MeshJob, field: &VoxelField, config: &TerrainConfig, frame: u64) {
        assert!(self.is_free(), "mesh handler is still busy");
        let Some(mut scratch) = self.scratch.take() else {
            return;
        };
        scratch.field.voxels_mut().copy_from_slice(field.voxels());

        let config = config.clone();
        let applied_edit = job.edit.is_some();
        let voxel_size = self.voxel_size;
        let origin = job.origin;
        let edit = job.edit;
        let task = async_pool().spawn(async move {
            if let Some(edit) = edit {
                apply_edit(edit.as_ref(), &config, origin, &mut scratch.field);
            }
            scratch.build(voxel_size);
            scratch
        });

        self.running = Some(RunningJob {
            info: JobInfo {
                chunk: job.chunk,
                applied_edit,
                collisions: job.collisions,
                started: frame,
                max_frames: job.max_frames,
            },
            task,
        });
    }

    /// Take the result of the running job if it is done. A job that has used up its frame budget
    /// is completed by blocking on it
    pub fn poll(&mut self, frame: u64) -> Option<FinishedJob> {
        let job = self.running.as_mut()?;
        if job.task.is_finished() {
            let RunningJob { info, task } = self.running.take()?;
            let scratch = block_on(task);
            return Some(self.finish(info, scratch, false));
        }

        let elapsed = frame.saturating_sub(job.info.started);
        if elapsed < job.info.max_frames as u64 {
            return None;
        }
        debug!(
            "Forcing mesh of chunk {} after {elapsed} frames",
            job.info.chunk
        );
        self.complete()
    }

    /// Block until the running job is done
    pub fn complete(&mut self) -> Option<FinishedJob> {
        let RunningJob { info, task } = self.running.take()?;
        let scratch = block_on(task);
        Some(self.finish(info, scratch, true))
    }

    fn finish(&mut self, info: JobInfo, scratch: Box<MeshScratch>, forced: bool) -> FinishedJob {
        self.scratch = Some(scratch);
        self.collisions = info.collisions;
        FinishedJob {
            chunk: info.chunk,
            applied_edit: info.applied_edit,
            forced,
        }
    }

    /// The mesh of the last finished job
    pub fn description(&self) -> Option<MeshDescription<'_>> {
        if self.running.is_some() {
            return None;
        }
        let scratch = self.scratch.as_ref()?;
        let summary = &scratch.summary;
        Some(MeshDescription {
            vertices: &scratch.vertices,
            uvs: &scratch.uvs,
            indices: &scratch.triangles,
            submeshes: &summary.submeshes,
            bounds: summary.bounds,
            needs_collision_bake: self.collisions && !scratch.triangles.is_empty(),
        })
    }

    /// Solid voxels per material in the field of the last finished job
    pub fn material_counts(&self) -> Option<&[u32]> {
        if self.running.is_some() {
            return None;
        }
        self.scratch.as_ref().map(|s| s.material_counts.as_slice())
    }

    /// Exchange the field of the last finished job with `field`. After this the chunk holds the
    /// edited voxels and the handler holds the old ones, which the next job overwrites
    pub fn swap_field(&mut self, field: &mut VoxelField) {
        if self.running.is_some() {
            return;
        }
        if let Some(scratch) = self.scratch.as_mut() {
            assert_eq!(scratch.field.lattice(), field.lattice());
            std::mem::swap(&mut scratch.field, field);
        }
    }
}

/// Mesh `field` on the calling thread, using `handler`'s buffers
pub fn mesh_field_blocking<'a>(
    handler: &'a mut MeshJobHandler,
    field: &VoxelField,
    config: &TerrainConfig,
) -> MeshDescription<'a> {
    let job = MeshJob {
        chunk: usize::MAX,
        origin: Vec3::ZERO,
        edit: None,
        collisions: config.collisions,
        max_frames: 0,
    };
    handler.start(job, field, config, 0);
    handler.complete();
    handler
        .description()
        .unwrap_or(MeshDescription {
            vertices: &[],
            uvs: &[],
            indices: &[],
            submeshes: &[],
            bounds: None,
            needs_collision_bake: false,
        })
}

#[cfg(test)]
fn test_config(size: u32) -> TerrainConfig {
    TerrainConfig {
        chunk_size: size,
        grid_size: [1, 1, 1],
        ..Default::default()
    }
}

#[cfg(test)]
fn sphere_field(size: u32, center: Vec3, radius: f32, material: u8) -> VoxelField {
    let lattice = Lattice::new(size);
    let mut field = VoxelField::empty(lattice);
    for (i, voxel) in field.voxels_mut().iter_mut().enumerate() {
        let p = lattice.to_coord(i).as_vec3();
        *voxel = crate::Voxel::new(p.distance(center) - radius, material);
    }
    field
}

#[test]
fn test_empty_field_has_no_mesh() {
    let config = test_config(8);
    let mut handler = MeshJobHandler::new(&config);
    let field = VoxelField::filled(Lattice::new(8), crate::Voxel::new(1., 0));
    let mesh = mesh_field_blocking(&mut handler, &field, &config);
    assert_eq!(0, mesh.vertex_count());
    assert_eq!(0, mesh.triangle_count());
    assert!(mesh.submeshes.is_empty());
    assert!(mesh.bounds.is_none());
    assert!(!mesh.needs_collision_bake);
}

#[test]
fn test_solid_field_has_no_surface() {
    let config = test_config(8);
    let mut handler = MeshJobHandler::new(&config);
    let field = VoxelField::filled(Lattice::new(8), crate::Voxel::new(-1., 2));
    let mesh = mesh_field_blocking(&mut handler, &field, &config);
    assert_eq!(0, mesh.triangle_count());
    assert_eq!(0, mesh.vertex_count());
    assert_eq!(8 * 8 * 8, handler.material_counts().unwrap()[2]);
}

#[test]
fn test_sphere_is_watertight() {
    use bevy::utils::HashMap;

    let config = test_config(16);
    let mut handler = MeshJobHandler::new(&config);
    let field = sphere_field(16, Vec3::new(7.3, 7.6, 7.1), 4.2, 1);
    let mesh = mesh_field_blocking(&mut handler, &field, &config);
    assert!(mesh.triangle_count() > 0);
    assert!(mesh.needs_collision_bake);

    // Every directed edge shows up exactly once, and its reverse exactly once too
    let mut edges: HashMap<(u32, u32), usize> = HashMap::default();
    for tri in mesh.indices.chunks(3) {
        for k in 0..3 {
            *edges.entry((tri[k], tri[(k + 1) % 3])).or_default() += 1;
        }
    }
    for (&(a, b), &count) in &edges {
        assert_eq!(1, count, "edge {a}-{b} is used {count} times");
        assert_eq!(Some(&1), edges.get(&(b, a)), "edge {a}-{b} is open");
    }

    let bounds = mesh.bounds.unwrap();
    // Vertices are relative to the chunk origin, one skirt sample in
    assert!(bounds.contains(Vec3::new(6.3, 6.6, 6.1)));
    assert!(bounds.max.x - bounds.min.x < 2. * 4.2 + 1.);
}

#[test]
fn test_vertex_count_matches_surface_nets() {
    use fast_surface_nets::{surface_nets, SurfaceNetsBuffer};

    let config = test_config(16);
    let mut handler = MeshJobHandler::new(&config);
    let field = sphere_field(16, Vec3::new(5.5, 9.2, 8.1), 5.3, 0);
    let lattice = field.lattice();

    let mut reference = SurfaceNetsBuffer::default();
    surface_nets(field.voxels(), &lattice.shape(), [0; 3], [15; 3], &mut reference);

    let mesh = mesh_field_blocking(&mut handler, &field, &config);
    assert_eq!(reference.positions.len(), mesh.vertex_count());
}

#[test]
fn test_submeshes_partition_indices() {
    let config = test_config(16);
    let mut handler = MeshJobHandler::new(&config);
    let mut field = sphere_field(16, Vec3::new(7.5, 7.5, 7.5), 5., 3);
    // The lower half of the sphere gets another material
    let lattice = field.lattice();
    for (i, voxel) in field.voxels_mut().iter_mut().enumerate() {
        if lattice.to_coord(i).y < 7 {
            *voxel = voxel.with_material(9);
        }
    }

    let mesh = mesh_field_blocking(&mut handler, &field, &config);
    assert_eq!(2, mesh.submeshes.len());
    assert_eq!(3, mesh.submeshes[0].material);
    assert_eq!(9, mesh.submeshes[1].material);

    let mut offset = 0;
    for submesh in mesh.submeshes {
        assert_eq!(offset, submesh.start);
        assert_eq!(0, submesh.count % 3);
        assert_eq!(submesh.start / 3, submesh.triangle_offset());
        offset += submesh.count;
    }
    assert_eq!(mesh.indices.len(), offset);
    assert!(mesh
        .uvs
        .iter()
        .all(|uv| (0. ..=1.).contains(&uv.x) && (uv.y == 3. || uv.y == 9.)));
}

#[test]
fn test_handler_applies_edit_and_swaps_field() {
    let config = test_config(8);
    let mut handler = MeshJobHandler::new(&config);
    let mut field = VoxelField::filled(Lattice::new(8), crate::Voxel::new(1., 0));
    let edit: Arc<dyn VoxelEdit> = Arc::new(crate::edit::SetDensityEdit {
        center: Vec3::new(3., 3., 3.),
        radius: 1.5,
        target_density: -1.,
    });

    handler.start(
        MeshJob {
            chunk: 4,
            origin: Vec3::ZERO,
            edit: Some(edit),
            collisions: false,
            max_frames: 3,
        },
        &field,
        &config,
        10,
    );
    assert!(!handler.is_free());
    assert_eq!(Some(4), handler.chunk());
    assert!(handler.description().is_none());

    // Polling past the budget forces the job to finish
    let finished = loop {
        if let Some(finished) = handler.poll(13) {
            break finished;
        }
    };
    assert_eq!(4, finished.chunk);
    assert!(finished.applied_edit);
    assert!(handler.is_free());

    // The chunk's own field is untouched until the swap
    assert!(field.voxels().iter().all(|v| !v.is_solid()));
    let mesh = handler.description().unwrap();
    assert!(mesh.triangle_count() > 0);
    assert!(!mesh.needs_collision_bake);
    handler.swap_field(&mut field);
    assert!(field.voxels().iter().any(|v| v.is_solid()));
}

#[test]
fn test_handler_finishes_within_budget() {
    let config = test_config(8);
    let mut handler = MeshJobHandler::new(&config);
    let field = VoxelField::filled(Lattice::new(8), crate::Voxel::new(1., 0));
    handler.start(
        MeshJob {
            chunk: 1,
            origin: Vec3::ZERO,
            edit: None,
            collisions: true,
            max_frames: 3,
        },
        &field,
        &config,
        10,
    );

    // The frame never advances, so only a finished task can be taken
    let finished = loop {
        if let Some(finished) = handler.poll(10) {
            break finished;
        }
        std::thread::yield_now();
    };
    assert!(!finished.forced);
    assert!(!finished.applied_edit);
    assert!(handler.is_free());
    let mesh = handler.description().unwrap();
    assert!(mesh.is_empty());
    assert!(!mesh.needs_collision_bake);
}
