use std::collections::VecDeque;
use std::sync::Arc;

use bevy::math::{UVec3, Vec3};
use bevy::tasks::Task;
use serde::{Deserialize, Serialize};

use crate::config::SKIRT;
use crate::edit::Aabb;
use crate::{MeshId, TerrainConfig, VoxelEdit, VoxelField};

/// The position of a chunk in the grid. Chunks are numbered x-major: x is the outermost axis of
/// the traversal and z the innermost
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Serialize, Deserialize)]
pub struct ChunkPosition(pub(crate) [u32; 3]);

impl From<[u32; 3]> for ChunkPosition {
    fn from(value: [u32; 3]) -> Self {
        Self(value)
    }
}

impl ChunkPosition {
    /// Construct a ChunkPosition from the x, y and z coordinates
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self([x, y, z])
    }

    /// The grid coordinate as a vector
    pub fn as_uvec3(&self) -> UVec3 {
        UVec3::from_array(self.0)
    }

    /// The index of this chunk in grid order, `None` if it lies outside the grid
    pub fn to_index(&self, grid: UVec3) -> Option<usize> {
        let [x, y, z] = self.0;
        if !self.as_uvec3().cmplt(grid).all() {
            return None;
        }
        Some(z as usize + y as usize * grid.z as usize + x as usize * (grid.z * grid.y) as usize)
    }

    /// The position of the chunk at `index` in grid order
    pub fn from_index(index: usize, grid: UVec3) -> Self {
        let plane = (grid.z * grid.y) as usize;
        let x = index / plane;
        let y = (index % plane) / grid.z as usize;
        let z = index % grid.z as usize;
        Self([x as u32, y as u32, z as u32])
    }

    /// Get the world position of this chunk's origin
    pub fn get_translation(&self, config: &TerrainConfig) -> Vec3 {
        self.as_uvec3().as_vec3() * config.chunk_world_size()
    }

    /// Get the chunk containing a world position, `None` if the position is outside the grid
    pub fn from_translation(config: &TerrainConfig, pos: Vec3) -> Option<Self> {
        let coord = (pos / config.chunk_world_size()).floor();
        if coord.cmplt(Vec3::ZERO).any() || coord.cmpge(config.grid().as_vec3()).any() {
            return None;
        }
        Some(Self(coord.as_uvec3().to_array()))
    }
}

/// Where a chunk is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChunkState {
    /// The chunk has no voxels
    Unloaded,
    /// The voxels are being generated
    Generating,
    /// The chunk is waiting for or running a mesh job
    Meshing,
    /// The published mesh matches the voxels
    Ready,
}

/// An edit waiting to be applied to one chunk
pub(crate) struct PendingEdit {
    pub edit: Arc<dyn VoxelEdit>,
    pub ticket: u64,
    /// Frame budget of the mesh job that applies this edit
    pub max_frames: u32,
}

/// A single chunk of the terrain grid
pub struct Chunk {
    position: ChunkPosition,
    origin: Vec3,
    bounds: Aabb,
    pub(crate) state: ChunkState,
    pub(crate) field: Option<VoxelField>,
    pub(crate) generation: Option<Task<VoxelField>>,
    pub(crate) pending_edits: VecDeque<PendingEdit>,
    pub(crate) material_counts: Vec<u32>,
    pub(crate) collisions: bool,
    pub(crate) mesh: Option<MeshId>,
    pub(crate) published: bool,
}

impl Chunk {
    pub(crate) fn new(position: ChunkPosition, config: &TerrainConfig) -> Self {
        let origin = position.get_translation(config);
        let skirt = SKIRT as f32 * config.voxel_size;
        let bounds = Aabb::new(origin - skirt, origin + config.chunk_world_size());
        Self {
            position,
            origin,
            bounds,
            state: ChunkState::Unloaded,
            field: None,
            generation: None,
            pending_edits: VecDeque::new(),
            material_counts: vec![0; config.max_materials],
            collisions: config.collisions,
            mesh: None,
            published: false,
        }
    }

    /// Drop the voxels and everything derived from them
    pub(crate) fn unload(&mut self) {
        self.state = ChunkState::Unloaded;
        self.field = None;
        self.generation = None;
        self.pending_edits.clear();
        self.material_counts.fill(0);
        self.published = false;
    }

    /// The grid position of this chunk
    pub fn position(&self) -> ChunkPosition {
        self.position
    }

    /// The world position of lattice sample (1, 1, 1)
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// The world space box covered by this chunk's samples
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Where the chunk is in its lifecycle
    pub fn state(&self) -> ChunkState {
        self.state
    }

    /// The voxels of this chunk, as of its last published mesh
    pub fn field(&self) -> Option<&VoxelField> {
        self.field.as_ref()
    }

    /// Solid voxels per material, as of its last published mesh
    pub fn material_counts(&self) -> &[u32] {
        &self.material_counts
    }

    /// Whether the chunk gets a collider
    pub fn collisions(&self) -> bool {
        self.collisions
    }

    /// The last mesh uploaded for this chunk
    pub fn mesh(&self) -> Option<MeshId> {
        self.mesh
    }

    /// The number of edits waiting for this chunk
    pub fn pending_edits(&self) -> usize {
        self.pending_edits.len()
    }
}

#[test]
fn test_grid_order_is_x_major() {
    let grid = UVec3::new(3, 2, 4);
    assert_eq!(Some(0), ChunkPosition::new(0, 0, 0).to_index(grid));
    assert_eq!(Some(1), ChunkPosition::new(0, 0, 1).to_index(grid));
    assert_eq!(Some(4), ChunkPosition::new(0, 1, 0).to_index(grid));
    assert_eq!(Some(8), ChunkPosition::new(1, 0, 0).to_index(grid));
    assert_eq!(None, ChunkPosition::new(0, 2, 0).to_index(grid));
    for index in 0..24 {
        assert_eq!(
            Some(index),
            ChunkPosition::from_index(index, grid).to_index(grid)
        );
    }
}

#[test]
fn test_translation() {
    let config = TerrainConfig {
        chunk_size: 10,
        voxel_size: 0.5,
        grid_size: [2, 2, 2],
        ..Default::default()
    };
    let pos = ChunkPosition::new(1, 0, 1);
    assert_eq!(Vec3::new(4., 0., 4.), pos.get_translation(&config));
    assert_eq!(
        Some(pos),
        ChunkPosition::from_translation(&config, Vec3::new(7.9, 0.1, 4.))
    );
    assert_eq!(
        None,
        ChunkPosition::from_translation(&config, Vec3::new(-0.1, 0., 0.))
    );
    assert_eq!(
        None,
        ChunkPosition::from_translation(&config, Vec3::new(0., 8., 0.))
    );
}
