use bevy::math::{UVec3, Vec3};
use proptest::prelude::*;
use voxel_terrain::edit::{AddEdit, SphereEdit};
use voxel_terrain::{ChunkData, Lattice, Voxel, VoxelEdit, VoxelField};

fn size() -> impl Strategy<Value = u32> {
    2u32..=12
}

fn arb_voxel() -> impl Strategy<Value = Voxel> {
    // Few distinct values so the encoder sees real runs
    (-4i16..=4, 0u8..3).prop_map(|(d, m)| Voxel::from_fixed(d * 64, m))
}

fn small_vec3() -> impl Strategy<Value = Vec3> {
    (-8f32..8., -8f32..8., -8f32..8.).prop_map(|(x, y, z)| Vec3::new(x, y, z))
}

proptest! {
    // to_index and to_coord are inverse over the whole lattice
    #[test]
    fn lattice_mapping_is_a_bijection(s in size()) {
        let lattice = Lattice::new(s);
        let mut seen = vec![false; lattice.volume()];
        for x in 0..s { for y in 0..s { for z in 0..s {
            let c = UVec3::new(x, y, z);
            let i = lattice.to_index(c);
            prop_assert!(i < lattice.volume());
            prop_assert!(!seen[i]);
            seen[i] = true;
            prop_assert_eq!(c, lattice.to_coord(i));
        }}}
        prop_assert!(seen.into_iter().all(|b| b));
    }

    // Run length encoding keeps every voxel bit exact
    #[test]
    fn rle_roundtrip(voxels in proptest::collection::vec(arb_voxel(), 216)) {
        let lattice = Lattice::new(6);
        let field = VoxelField::from_voxels(lattice, voxels).unwrap();
        let data = ChunkData::from(&field);
        prop_assert_eq!(Some(field), data.expand(lattice));
    }

    // Applying an additive edit and then its negation restores the voxel
    #[test]
    fn additive_edits_invert(
        center in small_vec3(),
        position in small_vec3(),
        radius in 0.5f32..6.,
        strength in -8f32..8.,
        density in -20f32..20.,
    ) {
        let voxel = Voxel::new(density, 1);
        let add = AddEdit { center, radius, strength, material: 0, write_material: false };
        let remove = AddEdit { strength: -strength, ..add };
        prop_assert_eq!(voxel, remove.modify(position, add.modify(position, voxel)));

        let stamp = SphereEdit { center, radius, strength, material: 0, write_material: false };
        let unstamp = SphereEdit { strength: -strength, ..stamp };
        prop_assert_eq!(voxel, unstamp.modify(position, stamp.modify(position, voxel)));
    }
}
