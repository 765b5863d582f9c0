//! Runtime configuration of the terrain

use bevy::log::debug;
use bevy::math::{UVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::{Result, TerrainError};

/// Number of lattice samples shared with each neighbouring chunk, on every side
pub const SKIRT: u32 = 1;

/// All options the terrain recognizes. Every field has a sensible default, so a TOML file only
/// needs to name the values it changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// The number of lattice samples per side of a chunk
    pub chunk_size: u32,
    /// The distance between two lattice samples, in world units
    pub voxel_size: f32,
    /// The number of chunks along each axis of the grid
    pub grid_size: [u32; 3],
    /// The number of mesh job handlers, which caps how many chunks mesh at once
    pub mesh_jobs_per_frame: usize,
    /// The number of distinct materials the mesher keeps apart
    pub max_materials: usize,
    /// Frames a mesh job may run before it is forced to complete
    pub max_mesh_frames: u32,
    /// Whether chunks request a collision bake by default
    pub collisions: bool,
    /// Frames a symmetric edit is retried before it is forced onto every target chunk
    pub max_symmetric_retries: u32,
    /// Margin added around an edit's bounds when looking for affected chunks
    pub edit_margin: f32,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            chunk_size: 32,
            voxel_size: 1.0,
            grid_size: [4, 2, 4],
            mesh_jobs_per_frame: 2,
            max_materials: 256,
            max_mesh_frames: 5,
            collisions: true,
            max_symmetric_retries: 8,
            edit_margin: 3.0,
        }
    }
}

impl TerrainConfig {
    /// Parse and validate a config from TOML
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| TerrainError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every option is within the supported range
    pub fn validate(&self) -> Result<()> {
        if !(4..=256).contains(&self.chunk_size) {
            return Err(TerrainError::InvalidConfig(format!(
                "chunk_size must be within 4..=256, got {}",
                self.chunk_size
            )));
        }
        if !self.chunk_size.is_power_of_two() {
            debug!("chunk_size {} is not a power of two", self.chunk_size);
        }
        if !(self.voxel_size > 0.0) {
            return Err(TerrainError::InvalidConfig(format!(
                "voxel_size must be positive, got {}",
                self.voxel_size
            )));
        }
        if self.grid_size.iter().any(|&n| n == 0) {
            return Err(TerrainError::InvalidConfig(format!(
                "grid_size must have at least one chunk per axis, got {:?}",
                self.grid_size
            )));
        }
        if !(1..=8).contains(&self.mesh_jobs_per_frame) {
            return Err(TerrainError::InvalidConfig(format!(
                "mesh_jobs_per_frame must be within 1..=8, got {}",
                self.mesh_jobs_per_frame
            )));
        }
        if !(1..=256).contains(&self.max_materials) {
            return Err(TerrainError::InvalidConfig(format!(
                "max_materials must be within 1..=256, got {}",
                self.max_materials
            )));
        }
        if self.edit_margin < 0.0 {
            return Err(TerrainError::InvalidConfig(format!(
                "edit_margin must not be negative, got {}",
                self.edit_margin
            )));
        }
        Ok(())
    }

    /// The grid size as a vector
    pub fn grid(&self) -> UVec3 {
        UVec3::from_array(self.grid_size)
    }

    /// The total number of chunks in the grid
    pub fn chunk_count(&self) -> usize {
        self.grid_size.iter().map(|&n| n as usize).product()
    }

    /// The number of voxels in a single chunk
    pub fn volume(&self) -> usize {
        (self.chunk_size as usize).pow(3)
    }

    /// The distance between two neighbouring chunk origins, in world units
    pub fn chunk_world_size(&self) -> f32 {
        (self.chunk_size - 2 * SKIRT) as f32 * self.voxel_size
    }

    /// World position of a lattice sample of the chunk at `origin`
    #[inline]
    pub fn lattice_to_world(&self, origin: Vec3, coord: [u32; 3]) -> Vec3 {
        origin + (Vec3::new(coord[0] as f32, coord[1] as f32, coord[2] as f32) - SKIRT as f32)
            * self.voxel_size
    }

    /// Lattice position, in fractional samples, of a world position relative to the chunk at
    /// `origin`
    #[inline]
    pub fn world_to_lattice(&self, origin: Vec3, position: Vec3) -> Vec3 {
        (position - origin) / self.voxel_size + SKIRT as f32
    }
}

#[test]
fn test_default_config_is_valid() {
    assert_eq!(Ok(()), TerrainConfig::default().validate());
}

#[test]
fn test_toml_overrides() {
    let config = TerrainConfig::from_toml_str(
        r#"
        chunk_size = 16
        grid_size = [2, 1, 2]
        mesh_jobs_per_frame = 4
        "#,
    )
    .unwrap();
    assert_eq!(16, config.chunk_size);
    assert_eq!(4, config.chunk_count());
    assert_eq!(4, config.mesh_jobs_per_frame);
    assert_eq!(256, config.max_materials);
}

#[test]
fn test_rejects_bad_values() {
    let config = TerrainConfig {
        chunk_size: 2,
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(TerrainError::InvalidConfig(_))
    ));
    assert!(TerrainConfig::from_toml_str("mesh_jobs_per_frame = 0").is_err());
    assert!(TerrainConfig::from_toml_str("grid_size = [1, 0, 1]").is_err());
}

#[test]
fn test_lattice_world_roundtrip() {
    let config = TerrainConfig {
        voxel_size: 0.5,
        ..Default::default()
    };
    let origin = Vec3::new(15., 0., 30.);
    let world = config.lattice_to_world(origin, [3, 1, 7]);
    assert_eq!(Vec3::new(16., 0., 33.), world);
    assert_eq!(Vec3::new(3., 1., 7.), config.world_to_lattice(origin, world));
}
