use bevy::math::{UVec3, Vec3};
use fast_surface_nets::ndshape::{RuntimeShape, Shape};

use crate::Voxel;

/// The cubic lattice of a chunk. This is the one place that converts between lattice
/// coordinates and indices into a chunk's voxel array
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Lattice {
    size: u32,
}

impl Lattice {
    /// A lattice with `size` samples per side
    pub const fn new(size: u32) -> Self {
        Self { size }
    }

    /// The number of samples per side
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// The total number of samples, size^3
    #[inline]
    pub fn volume(&self) -> usize {
        (self.size as usize).pow(3)
    }

    /// The ndshape describing this lattice
    #[inline]
    pub fn shape(&self) -> RuntimeShape<u32, 3> {
        RuntimeShape::<u32, 3>::new([self.size; 3])
    }

    /// Convert a lattice coordinate to an index into the voxel array
    #[inline]
    pub fn to_index(&self, coord: UVec3) -> usize {
        assert!(
            coord.cmplt(UVec3::splat(self.size)).all(),
            "lattice coordinate {coord} out of range for size {}",
            self.size
        );
        self.shape().linearize(coord.to_array()) as usize
    }

    /// Convert an index into the voxel array back to its lattice coordinate
    #[inline]
    pub fn to_coord(&self, index: usize) -> UVec3 {
        assert!(
            index < self.volume(),
            "lattice index {index} out of range for size {}",
            self.size
        );
        UVec3::from_array(self.shape().delinearize(index as u32))
    }

    /// Whether the signed coordinate lies inside the lattice
    #[inline]
    pub fn contains(&self, coord: [i32; 3]) -> bool {
        coord.iter().all(|&c| c >= 0 && (c as u32) < self.size)
    }
}

/// The dense voxel data of a single chunk. A field always holds exactly size^3 voxels
#[derive(Clone, Debug, PartialEq)]
pub struct VoxelField {
    lattice: Lattice,
    voxels: Vec<Voxel>,
}

impl VoxelField {
    /// Get a field made from only empty voxels
    pub fn empty(lattice: Lattice) -> Self {
        Self::filled(lattice, Voxel::EMPTY)
    }

    /// Get a field where every voxel is `voxel`
    pub fn filled(lattice: Lattice, voxel: Voxel) -> Self {
        Self {
            lattice,
            voxels: vec![voxel; lattice.volume()],
        }
    }

    /// Wrap existing voxel data, which has to hold exactly size^3 voxels
    pub fn from_voxels(lattice: Lattice, voxels: Vec<Voxel>) -> Option<Self> {
        (voxels.len() == lattice.volume()).then_some(Self { lattice, voxels })
    }

    /// The lattice of this field
    pub fn lattice(&self) -> Lattice {
        self.lattice
    }

    /// All voxels, in lattice index order
    pub fn voxels(&self) -> &[Voxel] {
        &self.voxels
    }

    /// All voxels, in lattice index order
    pub fn voxels_mut(&mut self) -> &mut [Voxel] {
        &mut self.voxels
    }

    /// Get the voxel at the specified coordinates
    pub fn get_voxel(&self, coord: UVec3) -> Voxel {
        self.voxels[self.lattice.to_index(coord)]
    }

    /// Get a mutable reference to the voxel at the specified coordinates
    pub fn get_mut_voxel(&mut self, coord: UVec3) -> &mut Voxel {
        let idx = self.lattice.to_index(coord);
        &mut self.voxels[idx]
    }

    /// Set the voxel at the specified coordinates to the given Voxel
    pub fn set_voxel(&mut self, coord: UVec3, voxel: Voxel) {
        let idx = self.lattice.to_index(coord);
        self.voxels[idx] = voxel;
    }

    /// Sample the density with trilinear filtering. `position` is in lattice units, positions
    /// outside the lattice are clamped to the nearest cell
    pub fn sample_interpolated(&self, position: Vec3) -> f32 {
        sample_interpolated(self.lattice, &self.voxels, position)
    }

    /// Fraction of solid samples in a 3x3x3 kernel around `position`, `spread` lattice units apart
    pub fn ambient_occlusion(&self, position: Vec3, spread: f32) -> f32 {
        ambient_occlusion(self.lattice, &self.voxels, position, spread)
    }
}

pub(crate) fn sample_interpolated(lattice: Lattice, voxels: &[Voxel], position: Vec3) -> f32 {
    let last = (lattice.size() - 1) as f32;
    let position = position.clamp(Vec3::ZERO, Vec3::splat(last));
    let base = position
        .floor()
        .min(Vec3::splat(last - 1.))
        .max(Vec3::ZERO)
        .as_uvec3();
    let frac = position - base.as_vec3();

    let d = |x: u32, y: u32, z: u32| voxels[lattice.to_index(base + UVec3::new(x, y, z))].density();

    let x00 = lerp(d(0, 0, 0), d(1, 0, 0), frac.x);
    let x10 = lerp(d(0, 1, 0), d(1, 1, 0), frac.x);
    let x01 = lerp(d(0, 0, 1), d(1, 0, 1), frac.x);
    let x11 = lerp(d(0, 1, 1), d(1, 1, 1), frac.x);

    let y0 = lerp(x00, x10, frac.y);
    let y1 = lerp(x01, x11, frac.y);

    lerp(y0, y1, frac.z)
}

pub(crate) fn ambient_occlusion(
    lattice: Lattice,
    voxels: &[Voxel],
    position: Vec3,
    spread: f32,
) -> f32 {
    let mut solid = 0u32;
    for x in -1..=1 {
        for y in -1..=1 {
            for z in -1..=1 {
                let offset = Vec3::new(x as f32, y as f32, z as f32) * spread;
                if sample_interpolated(lattice, voxels, position + offset) < 0. {
                    solid += 1;
                }
            }
        }
    }
    solid as f32 / 27.
}

#[inline(always)]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[test]
fn test_index_coord_roundtrip() {
    let lattice = Lattice::new(8);
    for index in 0..lattice.volume() {
        assert_eq!(index, lattice.to_index(lattice.to_coord(index)));
    }
}

#[test]
#[should_panic]
fn test_out_of_range_coord_panics() {
    Lattice::new(4).to_index(UVec3::new(0, 4, 0));
}

#[test]
fn test_from_voxels_checks_length() {
    let lattice = Lattice::new(4);
    assert!(VoxelField::from_voxels(lattice, vec![Voxel::EMPTY; 63]).is_none());
    assert!(VoxelField::from_voxels(lattice, vec![Voxel::EMPTY; 64]).is_some());
}

#[test]
fn test_sample_interpolated() {
    let lattice = Lattice::new(4);
    let mut field = VoxelField::empty(lattice);
    for x in 0..4 {
        for y in 0..4 {
            for z in 0..4 {
                field.set_voxel(UVec3::new(x, y, z), Voxel::new(x as f32, 0));
            }
        }
    }

    // Density grows linearly along x, so the filter reproduces it exactly
    assert_eq!(1.5, field.sample_interpolated(Vec3::new(1.5, 0.3, 2.7)));
    assert_eq!(3.0, field.sample_interpolated(Vec3::new(3.0, 3.0, 3.0)));
    // Lookups outside the lattice clamp instead of wrapping around
    assert_eq!(0.0, field.sample_interpolated(Vec3::new(-5.0, 1.0, 1.0)));
    assert_eq!(3.0, field.sample_interpolated(Vec3::new(40.0, 1.0, 1.0)));
}

#[test]
fn test_ambient_occlusion() {
    let lattice = Lattice::new(8);
    let solid = VoxelField::filled(lattice, Voxel::new(-1., 0));
    let air = VoxelField::filled(lattice, Voxel::new(1., 0));
    let center = Vec3::splat(4.);
    assert_eq!(1.0, solid.ambient_occlusion(center, 1.));
    assert_eq!(0.0, air.ambient_occlusion(center, 1.));
}
