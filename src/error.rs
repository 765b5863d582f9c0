use std::error::Error;
use std::fmt;

use bevy::math::UVec3;

/// Errors surfaced by the terrain when loading maps or validating configuration
#[derive(Debug, Clone, PartialEq)]
pub enum TerrainError {
    /// The persisted grid dimensions disagree with the runtime configuration. The load is
    /// aborted and the map has to be regenerated
    ConfigMismatch {
        /// Chunks per axis recorded in the saved map
        saved_grid: UVec3,
        /// Chunks per axis of the running terrain
        runtime_grid: UVec3,
        /// Lattice size recorded in the saved map
        saved_chunk_size: u32,
        /// Lattice size of the running terrain
        runtime_chunk_size: u32,
    },
    /// A region stream failed to decompress or decode, or held the wrong number of records
    MalformedRegion {
        /// Index of the offending region
        region: usize,
        /// What was wrong with it
        reason: String,
    },
    /// The terrain configuration is out of range
    InvalidConfig(String),
    /// A chunk has no voxels to save
    NotGenerated {
        /// Index of the chunk in grid order
        chunk: usize,
    },
}

impl fmt::Display for TerrainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TerrainError::ConfigMismatch {
                saved_grid,
                runtime_grid,
                saved_chunk_size,
                runtime_chunk_size,
            } => write!(
                f,
                "saved map ({saved_grid} chunks of {saved_chunk_size}) does not match the current terrain ({runtime_grid} chunks of {runtime_chunk_size})"
            ),
            TerrainError::MalformedRegion { region, reason } => {
                write!(f, "region {region} is malformed: {reason}")
            }
            TerrainError::InvalidConfig(msg) => write!(f, "invalid terrain config: {msg}"),
            TerrainError::NotGenerated { chunk } => write!(f, "chunk {chunk} has not been generated"),
        }
    }
}

impl Error for TerrainError {}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, TerrainError>;
