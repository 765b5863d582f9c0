//! This crate holds a real-time voxel terrain.
//! Like most voxel systems it works with chunks: a fixed grid of cubic chunks, each holding a
//! dense lattice of voxels that overlaps its neighbours by one sample on every side.
//!
//! Voxels hold two values:
//! - A density, used as a Signed Distance Field to create a smooth mesh. Negative is solid
//! - A material, which decides the color and texture it is rendered with
//!
//! Edits are pure functions of a world position and the previous voxel, applied to every chunk
//! they touch in parallel. A small pool of [`MeshJobHandler`]s turns edited chunks into meshes,
//! which the [`Terrain`] hands to a [`TerrainHost`] for rendering and collision.

#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]

mod voxel;
pub use voxel::Voxel;

mod error;
pub use error::{Result, TerrainError};

pub mod config;
pub use config::TerrainConfig;

mod field;
pub use field::{Lattice, VoxelField};

pub mod edit;
pub use edit::{Aabb, Edit, VoxelEdit};

mod parallel;

pub mod apply;
pub use apply::{FlatGenerator, VoxelGenerator};

pub mod mesher;
pub use mesher::{FinishedJob, MeshDescription, MeshJob, MeshJobHandler, SubMesh};

mod host;
pub use host::{MeshId, TerrainHost};

mod chunk;
pub use chunk::{Chunk, ChunkPosition, ChunkState};

pub mod storage;
pub use storage::{ChunkData, SavedMap};

mod terrain;
pub use terrain::{
    CountersCallback, EditOptions, EditSubmission, GeneratedCallback, Terrain, TerrainStats,
};

pub mod brush;

mod plugin;
pub use plugin::VoxelTerrainPlugin;
