//! Applies edits and generators to a chunk's voxel field in parallel

use std::sync::Arc;

use bevy::math::Vec3;
use bevy::tasks::Task;

use crate::parallel::{async_pool, par_batches_mut};
use crate::{TerrainConfig, Voxel, VoxelEdit, VoxelField};

/// Voxels handled by one unit of work
pub const EDIT_BATCH: usize = 2048;

/// Produces the initial voxels of the world from nothing but a world position
pub trait VoxelGenerator: Send + Sync {
    /// The voxel at `position`
    fn sample(&self, position: Vec3) -> Voxel;
}

impl<F> VoxelGenerator for F
where
    F: Fn(Vec3) -> Voxel + Send + Sync,
{
    fn sample(&self, position: Vec3) -> Voxel {
        self(position)
    }
}

/// Flat ground, solid below `height`
#[derive(Debug, Clone, Copy)]
pub struct FlatGenerator {
    /// World height of the surface
    pub height: f32,
    /// Material of the ground
    pub material: u8,
}

impl VoxelGenerator for FlatGenerator {
    fn sample(&self, position: Vec3) -> Voxel {
        Voxel::new(position.y - self.height, self.material)
    }
}

/// Overwrite every voxel of `field` with `f(world_position, previous)`. Every voxel is an
/// independent unit of work, batches own disjoint slices of the field
fn transform_field<F>(config: &TerrainConfig, origin: Vec3, field: &mut VoxelField, f: F)
where
    F: Fn(Vec3, Voxel) -> Voxel + Send + Sync,
{
    let lattice = field.lattice();
    let f = &f;
    par_batches_mut(field.voxels_mut(), EDIT_BATCH, move |start, voxels| {
        for (offset, voxel) in voxels.iter_mut().enumerate() {
            let coord = lattice.to_coord(start + offset);
            let position = config.lattice_to_world(origin, coord.to_array());
            *voxel = f(position, *voxel);
        }
    });
}

/// Apply `edit` to every voxel of the chunk at `origin`. The caller is responsible for
/// recomputing anything derived from the field afterwards
pub fn apply_edit<E>(edit: &E, config: &TerrainConfig, origin: Vec3, field: &mut VoxelField)
where
    E: VoxelEdit + ?Sized,
{
    transform_field(config, origin, field, |position, voxel| {
        edit.modify(position, voxel)
    });
}

/// Fill the chunk at `origin` from `generator`
pub fn generate_field<G>(generator: &G, config: &TerrainConfig, origin: Vec3, field: &mut VoxelField)
where
    G: VoxelGenerator + ?Sized,
{
    transform_field(config, origin, field, |position, _| generator.sample(position));
}

/// Apply `edit` on the async pool. The returned task hands the field back once every voxel has
/// been visited
pub fn spawn_edit(
    edit: Arc<dyn VoxelEdit>,
    config: TerrainConfig,
    origin: Vec3,
    mut field: VoxelField,
) -> Task<VoxelField> {
    async_pool().spawn(async move {
        apply_edit(edit.as_ref(), &config, origin, &mut field);
        field
    })
}

/// Allocate and fill a chunk's field on the async pool
pub fn spawn_generate(
    generator: Arc<dyn VoxelGenerator>,
    config: TerrainConfig,
    origin: Vec3,
) -> Task<VoxelField> {
    async_pool().spawn(async move {
        let mut field = VoxelField::empty(crate::Lattice::new(config.chunk_size));
        generate_field(generator.as_ref(), &config, origin, &mut field);
        field
    })
}

#[cfg(test)]
fn small_config() -> TerrainConfig {
    TerrainConfig {
        chunk_size: 8,
        grid_size: [1, 1, 1],
        ..Default::default()
    }
}

#[test]
fn test_parallel_matches_sequential() {
    let config = small_config();
    let origin = Vec3::new(6., 0., -6.);
    let edit = crate::edit::SphereEdit {
        center: origin + Vec3::splat(3.2),
        radius: 2.5,
        strength: -2.,
        material: 4,
        write_material: true,
    };

    let mut field = VoxelField::filled(crate::Lattice::new(8), Voxel::new(1., 0));
    let mut expected = field.clone();
    apply_edit(&edit, &config, origin, &mut field);

    let lattice = expected.lattice();
    for (index, voxel) in expected.voxels_mut().iter_mut().enumerate() {
        let position = config.lattice_to_world(origin, lattice.to_coord(index).to_array());
        *voxel = edit.modify(position, *voxel);
    }
    assert_eq!(expected, field);
    assert!(field.voxels().iter().any(|v| v.is_solid()));
}

#[test]
fn test_negated_additive_edits_restore_field() {
    use crate::edit::{AddEdit, CuboidEdit, Dimensionality, Edit, NoiseEdit, NoiseType, RaiseEdit};

    let config = small_config();
    let origin = Vec3::ZERO;
    let mut field = VoxelField::empty(crate::Lattice::new(8));
    generate_field(
        &FlatGenerator {
            height: 2.5,
            material: 1,
        },
        &config,
        origin,
        &mut field,
    );
    let before = field.clone();

    let center = Vec3::new(3.1, 2.4, 2.9);
    let pairs: Vec<(Edit, Edit)> = vec![
        (
            AddEdit { center, radius: 2., strength: -1.7, material: 0, write_material: false }.into(),
            AddEdit { center, radius: 2., strength: 1.7, material: 0, write_material: false }.into(),
        ),
        (
            RaiseEdit { center, radius: 3., strength: 0.9, material: 0, write_material: false }.into(),
            RaiseEdit { center, radius: 3., strength: -0.9, material: 0, write_material: false }.into(),
        ),
        (
            CuboidEdit { center, half_extents: Vec3::new(2., 1., 1.5), strength: -3., material: 0, write_material: false }.into(),
            CuboidEdit { center, half_extents: Vec3::new(2., 1., 1.5), strength: 3., material: 0, write_material: false }.into(),
        ),
        (
            NoiseEdit::new(center, 4., 1.5, 0.21, NoiseType::Perlin, Dimensionality::Three, 3).into(),
            NoiseEdit::new(center, 4., -1.5, 0.21, NoiseType::Perlin, Dimensionality::Three, 3).into(),
        ),
    ];

    for (edit, inverse) in &pairs {
        apply_edit(edit, &config, origin, &mut field);
        assert_ne!(before, field, "{edit:?} changed nothing");
        apply_edit(inverse, &config, origin, &mut field);
        assert_eq!(before, field, "{edit:?} was not reversed");
    }
}

#[test]
fn test_spawned_edit_completes() {
    use bevy::tasks::block_on;

    let config = small_config();
    let field = VoxelField::empty(crate::Lattice::new(8));
    let edit: Arc<dyn VoxelEdit> = Arc::new(crate::edit::SetDensityEdit {
        center: Vec3::ZERO,
        radius: 100.,
        target_density: -1.,
    });
    let task = spawn_edit(edit, config.clone(), Vec3::ZERO, field);
    let field = block_on(task);
    assert!(field.voxels().iter().all(|v| v.density() == -1.));

    let generator: Arc<dyn VoxelGenerator> = Arc::new(|p: Vec3| Voxel::new(p.y, 2));
    let field = block_on(spawn_generate(generator, config, Vec3::ZERO));
    // Sample (0, 1, 0) sits at the chunk origin, one skirt voxel in
    assert_eq!(0., field.get_voxel(bevy::math::UVec3::new(0, 1, 0)).density());
    assert_eq!(2, field.get_voxel(bevy::math::UVec3::ZERO).material());
}
