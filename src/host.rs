//! The boundary to whatever renders the terrain and runs its physics

use crate::MeshDescription;

/// Handle of a mesh the host has uploaded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u64);

/// Implemented by the renderer and physics side of the application. The terrain only produces
/// mesh data, uploading it and turning it into colliders is up to the host
pub trait TerrainHost {
    /// Upload or replace the mesh of `chunk`. The description is only valid during this call
    fn upload_mesh(&mut self, chunk: usize, mesh: &MeshDescription) -> MeshId;

    /// Start baking a physics mesh for an uploaded mesh, usually on a background thread
    fn begin_collision_bake(&mut self, mesh: MeshId);

    /// Whether the bake started by [`TerrainHost::begin_collision_bake`] has finished
    fn is_bake_complete(&mut self, mesh: MeshId) -> bool;

    /// Attach a finished bake to the chunk's collider
    fn install_collider(&mut self, chunk: usize, mesh: MeshId);
}
