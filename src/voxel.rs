use serde::{Deserialize, Serialize};

/// A Voxel is the data for a single lattice sample. It holds a density and a material. The
/// density is a signed distance style value: negative densities are solid, everything else is
/// empty space. It is stored as fixed point so edits are exactly reversible and the persisted
/// form is bit exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Voxel {
    density: i16,
    material: u8,
}

impl From<Voxel> for f32 {
    fn from(value: Voxel) -> Self {
        value.density()
    }
}

impl fast_surface_nets::SignedDistance for Voxel {
    fn is_negative(self) -> bool {
        self.is_solid()
    }
}

impl Voxel {
    /// Number of fixed point steps per density unit
    pub const DENSITY_SCALE: f32 = 256.0;
    /// The smallest density a voxel can hold
    pub const MIN_DENSITY: f32 = i16::MIN as f32 / Self::DENSITY_SCALE;
    /// The largest density a voxel can hold
    pub const MAX_DENSITY: f32 = i16::MAX as f32 / Self::DENSITY_SCALE;

    /// An empty voxel with the default material
    pub const EMPTY: Voxel = Voxel {
        density: 0,
        material: 0,
    };

    /// Construct a Voxel from the specified density and material. Densities outside the
    /// representable range are clamped
    pub fn new(density: f32, material: u8) -> Self {
        Self {
            density: quantize(density),
            material,
        }
    }

    /// Construct a Voxel from its raw fixed point density
    pub const fn from_fixed(density: i16, material: u8) -> Self {
        Self { density, material }
    }

    /// Get the density of this voxel
    #[inline]
    pub fn density(&self) -> f32 {
        self.density as f32 / Self::DENSITY_SCALE
    }

    /// Get the raw fixed point density of this voxel
    #[inline]
    pub fn fixed_density(&self) -> i16 {
        self.density
    }

    /// Get the material for this voxel
    #[inline]
    pub fn material(&self) -> u8 {
        self.material
    }

    /// Whether this voxel is inside the surface
    #[inline]
    pub fn is_solid(&self) -> bool {
        self.density < 0
    }

    /// Get a new Voxel with the specified density
    pub fn with_density(self, density: f32) -> Self {
        Self {
            density: quantize(density),
            ..self
        }
    }

    /// Get a new Voxel with the specified material
    pub fn with_material(self, material: u8) -> Self {
        Self { material, ..self }
    }

    /// Get a new Voxel with `delta` added to its density. The delta is quantized before it is
    /// added, so adding `-delta` afterwards restores the original density exactly unless the
    /// density saturated in between
    pub fn add_density(self, delta: f32) -> Self {
        let delta = (delta * Self::DENSITY_SCALE)
            .round()
            .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        Self {
            density: self.density.saturating_add(delta),
            ..self
        }
    }

    /// Pack the voxel into a single integer, used by the run length encoder
    pub(crate) fn raw(&self) -> u32 {
        (self.density as u16 as u32) | ((self.material as u32) << 16)
    }

    pub(crate) fn from_raw(input: u32) -> Voxel {
        Self {
            density: (input & 0xFFFF) as u16 as i16,
            material: (input >> 16) as u8,
        }
    }
}

#[inline]
fn quantize(density: f32) -> i16 {
    (density * Voxel::DENSITY_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[test]
fn test_voxel_to_sdf() {
    // Empty voxels sit exactly on the threshold and are not solid
    assert_eq!(0., f32::from(Voxel::EMPTY));
    assert!(!Voxel::EMPTY.is_solid());
    assert!(Voxel::new(-0.5, 0).is_solid());
    assert_eq!(-0.5, f32::from(Voxel::new(-0.5, 3)));
}

#[test]
fn test_density_clamps() {
    assert_eq!(Voxel::MAX_DENSITY, Voxel::new(1000., 0).density());
    assert_eq!(Voxel::MIN_DENSITY, Voxel::new(-1000., 0).density());
    assert_eq!(
        Voxel::MAX_DENSITY,
        Voxel::new(Voxel::MAX_DENSITY, 0).add_density(4.).density()
    );
}

#[test]
fn test_add_density_reverses_exactly() {
    let voxel = Voxel::new(0.3, 7);
    for delta in [0.1f32, -3.7, 0.001_953_125, 12.345] {
        assert_eq!(voxel, voxel.add_density(delta).add_density(-delta));
    }
}

#[test]
fn test_raw_roundtrip_keeps_sign() {
    let voxel = Voxel::from_fixed(-1234, 200);
    assert_eq!(voxel, Voxel::from_raw(voxel.raw()));
    assert_eq!(200, Voxel::from_raw(voxel.raw()).material());
}
