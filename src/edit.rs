//! This module contains the edits that can be applied to the voxel grid
//!
//! Every edit is a pure function of a world position and the voxel that was there before. Edits
//! never look at neighbouring voxels, so the engine can apply them to a whole chunk in any order
//! and on any number of threads.

use crate::Voxel;

use bevy::math::{Vec3, Vec3Swizzles};
use enum_dispatch::enum_dispatch;
use noise::{NoiseFn, OpenSimplex, Perlin, Simplex, Value};
use serde::{Deserialize, Serialize};

/// An axis aligned bounding box in world space
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// The smallest corner
    pub min: Vec3,
    /// The largest corner
    pub max: Vec3,
}

impl Aabb {
    /// Construct a box from its two corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Construct a box around `center`
    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    /// Get this box grown by `margin` on every side
    pub fn expand(self, margin: f32) -> Self {
        Self {
            min: self.min - margin,
            max: self.max + margin,
        }
    }

    /// Whether the two boxes overlap
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    /// Whether the point lies inside the box
    pub fn contains(&self, point: Vec3) -> bool {
        self.min.cmple(point).all() && point.cmple(self.max).all()
    }
}

/// The capability set of an edit. New kinds of edits are added by implementing this trait, the
/// engine never needs to know about them
#[enum_dispatch]
pub trait VoxelEdit: Send + Sync {
    /// Get the bounding box of the region this edit can change
    fn bounds(&self) -> Aabb;
    /// Compute the new voxel at `position` from the voxel that was there before
    fn modify(&self, position: Vec3, voxel: Voxel) -> Voxel;
}

/// An enum with the built in edit variants, used to pass edits around without Box or dynamic
/// dispatch
#[derive(Debug, Clone)]
#[enum_dispatch(VoxelEdit)]
pub enum Edit {
    /// Add or remove matter within a sphere
    Add(AddEdit),
    /// Raise or lower the terrain within a vertical column
    Raise(RaiseEdit),
    /// A sphere stamp
    Sphere(SphereEdit),
    /// A box stamp
    Cuboid(CuboidEdit),
    /// Pull the terrain toward a plane
    Flatten(FlattenEdit),
    /// Perturb the terrain with procedural noise
    Noise(NoiseEdit),
    /// Override the density within a sphere
    SetDensity(SetDensityEdit),
    /// Override the terrain height within a column
    SetHeight(SetHeightEdit),
}

/// A trait for a signed distance function
pub trait SignedDistanceFunction {
    /// Get the sdf value at the provided position, with the shape at 0,0,0
    fn sdf(&self, pos: Vec3) -> f32;
    /// Get the bounding box for the shape
    fn aabb(&self) -> (Vec3, Vec3);
}

/// A signed distance sphere
#[derive(Debug, Clone, Copy)]
pub struct SphereSdf(pub f32);

impl SignedDistanceFunction for SphereSdf {
    fn sdf(&self, pos: Vec3) -> f32 {
        pos.length() - self.0
    }

    fn aabb(&self) -> (Vec3, Vec3) {
        (Vec3::splat(-self.0), Vec3::splat(self.0))
    }
}

/// A signed distance box
#[derive(Debug, Clone, Copy)]
pub struct BoxSdf(pub Vec3);

impl SignedDistanceFunction for BoxSdf {
    fn sdf(&self, pos: Vec3) -> f32 {
        let q = pos.abs() - self.0;
        q.max(Vec3::ZERO).length() + q.x.max(q.y).max(q.z).min(0.0)
    }

    fn aabb(&self) -> (Vec3, Vec3) {
        (-self.0, self.0)
    }
}

// Materials are painted up to this distance outside a shape's surface
const PAINT_BAND: f32 = 1.0;

// Materials are only written close to the surface, and only when matter is being added
#[inline(always)]
fn paint(voxel: Voxel, write: bool, strength: f32, distance: f32, material: u8) -> Voxel {
    if write && strength < 0.0 && distance < PAINT_BAND {
        voxel.with_material(material)
    } else {
        voxel
    }
}

#[inline(always)]
fn linear_falloff(distance: f32, radius: f32) -> f32 {
    if radius <= 0.0 {
        return 0.0;
    }
    (1.0 - distance / radius).clamp(0.0, 1.0)
}

/// Adds `strength` to the density of every voxel within `radius` of `center`. A negative
/// strength adds matter, a positive one removes it
#[derive(Debug, Clone, Copy)]
pub struct AddEdit {
    /// Center of the brush
    pub center: Vec3,
    /// Radius of the brush
    pub radius: f32,
    /// Density added to voxels inside the brush
    pub strength: f32,
    /// Material painted onto new surface
    pub material: u8,
    /// Whether the material is painted at all
    pub write_material: bool,
}

impl VoxelEdit for AddEdit {
    fn bounds(&self) -> Aabb {
        Aabb::from_center(self.center, Vec3::splat(self.radius + PAINT_BAND))
    }

    fn modify(&self, position: Vec3, voxel: Voxel) -> Voxel {
        let density = position.distance(self.center) - self.radius;
        let voxel = paint(
            voxel,
            self.write_material,
            self.strength,
            density,
            self.material,
        );
        if density < 0.0 {
            voxel.add_density(self.strength)
        } else {
            voxel
        }
    }
}

/// Raises (negative strength) or lowers (positive strength) the terrain in a vertical column,
/// strongest at the column's axis
#[derive(Debug, Clone, Copy)]
pub struct RaiseEdit {
    /// Center of the brush
    pub center: Vec3,
    /// Radius of the column, also its half height
    pub radius: f32,
    /// Density added on the column's axis
    pub strength: f32,
    /// Material painted onto new surface
    pub material: u8,
    /// Whether the material is painted at all
    pub write_material: bool,
}

impl VoxelEdit for RaiseEdit {
    fn bounds(&self) -> Aabb {
        Aabb::from_center(self.center, Vec3::splat(self.radius))
    }

    fn modify(&self, position: Vec3, voxel: Voxel) -> Voxel {
        let offset = position - self.center;
        if offset.y.abs() > self.radius {
            return voxel;
        }
        let horizontal = offset.xz().length();
        let falloff = linear_falloff(horizontal, self.radius);
        if falloff <= 0.0 {
            return voxel;
        }
        let falloff = falloff * falloff * (3.0 - 2.0 * falloff);
        let voxel = voxel.add_density(self.strength * falloff);
        paint(
            voxel,
            self.write_material,
            self.strength,
            voxel.density().abs(),
            self.material,
        )
    }
}

/// A sphere stamp. The strength is scaled by how deep inside the sphere a voxel lies, reaching
/// full strength one unit below the surface
#[derive(Debug, Clone, Copy)]
pub struct SphereEdit {
    /// Center of the sphere
    pub center: Vec3,
    /// Radius of the sphere
    pub radius: f32,
    /// Density added deep inside the sphere
    pub strength: f32,
    /// Material painted onto new surface
    pub material: u8,
    /// Whether the material is painted at all
    pub write_material: bool,
}

impl VoxelEdit for SphereEdit {
    fn bounds(&self) -> Aabb {
        let (min, max) = SphereSdf(self.radius).aabb();
        Aabb::new(min + self.center, max + self.center).expand(PAINT_BAND)
    }

    fn modify(&self, position: Vec3, voxel: Voxel) -> Voxel {
        let distance = SphereSdf(self.radius).sdf(position - self.center);
        stamp(
            voxel,
            distance,
            self.strength,
            self.write_material,
            self.material,
        )
    }
}

/// A box stamp, see [SphereEdit]
#[derive(Debug, Clone, Copy)]
pub struct CuboidEdit {
    /// Center of the box
    pub center: Vec3,
    /// Half of the box size along every axis
    pub half_extents: Vec3,
    /// Density added deep inside the box
    pub strength: f32,
    /// Material painted onto new surface
    pub material: u8,
    /// Whether the material is painted at all
    pub write_material: bool,
}

impl VoxelEdit for CuboidEdit {
    fn bounds(&self) -> Aabb {
        let (min, max) = BoxSdf(self.half_extents).aabb();
        Aabb::new(min + self.center, max + self.center).expand(PAINT_BAND)
    }

    fn modify(&self, position: Vec3, voxel: Voxel) -> Voxel {
        let distance = BoxSdf(self.half_extents).sdf(position - self.center);
        stamp(
            voxel,
            distance,
            self.strength,
            self.write_material,
            self.material,
        )
    }
}

#[inline(always)]
fn stamp(voxel: Voxel, distance: f32, strength: f32, write: bool, material: u8) -> Voxel {
    let falloff = (-distance).clamp(0.0, 1.0);
    let voxel = paint(voxel, write, strength, distance, material);
    if falloff > 0.0 {
        voxel.add_density(strength * falloff)
    } else {
        voxel
    }
}

/// Shaves off matter above a plane through `center`: on the side the normal points to, density is
/// raised toward the plane's signed distance. Voxels below the plane, and voxels already emptier
/// than the plane, are left alone. The normal is usually locked when the brush stroke starts
#[derive(Debug, Clone, Copy)]
pub struct FlattenEdit {
    /// A point on the plane, and the center of the brush
    pub center: Vec3,
    /// Radius of the brush
    pub radius: f32,
    /// How far the density moves toward the plane, per application
    pub strength: f32,
    /// The plane normal, pointing out of the terrain
    pub normal: Vec3,
}

impl VoxelEdit for FlattenEdit {
    fn bounds(&self) -> Aabb {
        Aabb::from_center(self.center, Vec3::splat(self.radius))
    }

    fn modify(&self, position: Vec3, voxel: Voxel) -> Voxel {
        let normal = self.normal.normalize_or_zero();
        if normal == Vec3::ZERO {
            return voxel;
        }
        let offset = position - self.center;
        let t = (self.strength.abs() * linear_falloff(offset.length(), self.radius)).min(1.0);
        if t <= 0.0 {
            return voxel;
        }
        let height = offset.dot(normal);
        let density = voxel.density();
        if height < 0.0 || density >= height {
            return voxel;
        }
        voxel.with_density(density + (height - density) * t)
    }
}

/// The noise functions supported by [NoiseEdit]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoiseType {
    /// Classic gradient noise
    Perlin,
    /// Simplex noise
    Simplex,
    /// OpenSimplex noise
    OpenSimplex,
    /// Value noise
    Value,
}

/// Whether noise is sampled as a height map or as a full volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimensionality {
    /// Sampled on the horizontal plane, like a height map
    Two,
    /// Sampled in all three dimensions, which can create overhangs
    Three,
}

#[derive(Clone, Copy)]
enum NoiseSampler {
    Perlin(Perlin),
    Simplex(Simplex),
    OpenSimplex(OpenSimplex),
    Value(Value),
}

impl NoiseSampler {
    fn new(kind: NoiseType, seed: u32) -> Self {
        match kind {
            NoiseType::Perlin => Self::Perlin(Perlin::new(seed)),
            NoiseType::Simplex => Self::Simplex(Simplex::new(seed)),
            NoiseType::OpenSimplex => Self::OpenSimplex(OpenSimplex::new(seed)),
            NoiseType::Value => Self::Value(Value::new(seed)),
        }
    }

    fn sample2(&self, p: [f64; 2]) -> f64 {
        match self {
            Self::Perlin(n) => n.get(p),
            Self::Simplex(n) => n.get(p),
            Self::OpenSimplex(n) => n.get(p),
            Self::Value(n) => n.get(p),
        }
    }

    fn sample3(&self, p: [f64; 3]) -> f64 {
        match self {
            Self::Perlin(n) => n.get(p),
            Self::Simplex(n) => n.get(p),
            Self::OpenSimplex(n) => n.get(p),
            Self::Value(n) => n.get(p),
        }
    }
}

/// Perturbs the density within a sphere with procedural noise
#[derive(Clone, Copy)]
pub struct NoiseEdit {
    /// Center of the brush
    pub center: Vec3,
    /// Radius of the brush
    pub radius: f32,
    /// Density added where the noise is 1
    pub strength: f32,
    /// Frequency multiplier applied to world positions before sampling
    pub scale: f32,
    /// Height map or volume noise
    pub dimensionality: Dimensionality,
    noise_type: NoiseType,
    seed: u32,
    sampler: NoiseSampler,
}

impl std::fmt::Debug for NoiseEdit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseEdit")
            .field("center", &self.center)
            .field("radius", &self.radius)
            .field("strength", &self.strength)
            .field("scale", &self.scale)
            .field("dimensionality", &self.dimensionality)
            .field("noise_type", &self.noise_type)
            .field("seed", &self.seed)
            .finish()
    }
}

impl NoiseEdit {
    /// Construct a noise edit. The noise tables are built once here instead of per voxel
    pub fn new(
        center: Vec3,
        radius: f32,
        strength: f32,
        scale: f32,
        noise_type: NoiseType,
        dimensionality: Dimensionality,
        seed: u32,
    ) -> Self {
        Self {
            center,
            radius,
            strength,
            scale,
            dimensionality,
            noise_type,
            seed,
            sampler: NoiseSampler::new(noise_type, seed),
        }
    }

    /// The noise function this edit samples
    pub fn noise_type(&self) -> NoiseType {
        self.noise_type
    }

    /// The noise at a world position, roughly within -1..1
    pub fn sample(&self, position: Vec3) -> f32 {
        let p = position.as_dvec3() * self.scale as f64;
        match self.dimensionality {
            Dimensionality::Two => self.sampler.sample2([p.x, p.z]) as f32,
            Dimensionality::Three => self.sampler.sample3([p.x, p.y, p.z]) as f32,
        }
    }
}

impl VoxelEdit for NoiseEdit {
    fn bounds(&self) -> Aabb {
        Aabb::from_center(self.center, Vec3::splat(self.radius))
    }

    fn modify(&self, position: Vec3, voxel: Voxel) -> Voxel {
        let falloff = linear_falloff(position.distance(self.center), self.radius);
        if falloff <= 0.0 {
            return voxel;
        }
        voxel.add_density(self.strength * self.sample(position) * falloff)
    }
}

/// Overrides the density of every voxel within a sphere, regardless of its previous value
#[derive(Debug, Clone, Copy)]
pub struct SetDensityEdit {
    /// Center of the brush
    pub center: Vec3,
    /// Radius of the brush
    pub radius: f32,
    /// The density written
    pub target_density: f32,
}

impl VoxelEdit for SetDensityEdit {
    fn bounds(&self) -> Aabb {
        Aabb::from_center(self.center, Vec3::splat(self.radius))
    }

    fn modify(&self, position: Vec3, voxel: Voxel) -> Voxel {
        if position.distance(self.center) < self.radius {
            voxel.with_density(self.target_density)
        } else {
            voxel
        }
    }
}

/// Overrides a column of terrain so its surface sits exactly at `target_height`
#[derive(Debug, Clone, Copy)]
pub struct SetHeightEdit {
    /// Center of the brush
    pub center: Vec3,
    /// Radius of the column
    pub radius: f32,
    /// The world height of the new surface
    pub target_height: f32,
}

impl SetHeightEdit {
    fn vertical_range(&self) -> (f32, f32) {
        (
            self.center.y.min(self.target_height) - self.radius,
            self.center.y.max(self.target_height) + self.radius,
        )
    }
}

impl VoxelEdit for SetHeightEdit {
    fn bounds(&self) -> Aabb {
        let (bottom, top) = self.vertical_range();
        Aabb::new(
            Vec3::new(
                self.center.x - self.radius,
                bottom,
                self.center.z - self.radius,
            ),
            Vec3::new(self.center.x + self.radius, top, self.center.z + self.radius),
        )
    }

    fn modify(&self, position: Vec3, voxel: Voxel) -> Voxel {
        let (bottom, top) = self.vertical_range();
        let horizontal = (position.xz() - self.center.xz()).length();
        if horizontal >= self.radius || position.y < bottom || position.y > top {
            return voxel;
        }
        voxel.with_density(position.y - self.target_height)
    }
}

#[test]
fn test_sphere_sdf() {
    let sphere = SphereSdf(5.);
    assert_eq!(-5., sphere.sdf(Vec3::new(0., 0., 0.)));
    assert_eq!(-2., sphere.sdf(Vec3::new(2., 2., 2.)).round());
    assert_eq!(4., sphere.sdf(Vec3::new(5., 5., 5.)).round());
    assert_eq!(16., sphere.sdf(Vec3::new(20., 3., 7.)).round());
}

#[test]
fn test_box_sdf() {
    let cube = BoxSdf(Vec3::splat(2.));
    assert_eq!(-2., cube.sdf(Vec3::ZERO));
    assert_eq!(1., cube.sdf(Vec3::new(3., 0., 0.)));
    assert_eq!(0., cube.sdf(Vec3::new(2., 1., -1.)));
}

#[test]
fn test_aabb_intersection() {
    let a = Aabb::from_center(Vec3::ZERO, Vec3::ONE);
    let b = Aabb::new(Vec3::new(0.5, 0.5, 0.5), Vec3::splat(3.));
    let c = Aabb::new(Vec3::splat(1.5), Vec3::splat(3.));
    assert!(a.intersects(&b));
    assert!(!a.intersects(&c));
    assert!(a.expand(0.5).intersects(&c));
    assert!(a.contains(Vec3::new(1., -1., 0.)));
}

#[test]
fn test_add_edit() {
    let edit = AddEdit {
        center: Vec3::ZERO,
        radius: 2.,
        strength: -5.,
        material: 3,
        write_material: true,
    };
    let inside = edit.modify(Vec3::new(1., 0., 0.), Voxel::EMPTY);
    assert_eq!(-5., inside.density());
    assert_eq!(3, inside.material());

    let outside = edit.modify(Vec3::new(5., 0., 0.), Voxel::EMPTY);
    assert_eq!(Voxel::EMPTY, outside);

    // Removing matter never paints
    let remove = AddEdit {
        strength: 5.,
        ..edit
    };
    assert_eq!(0, remove.modify(Vec3::ZERO, Voxel::new(-1., 0)).material());
}

#[test]
fn test_every_edit_stays_in_bounds() {
    let center = Vec3::new(3., -2., 7.);
    let edits: Vec<Edit> = vec![
        AddEdit {
            center,
            radius: 3.,
            strength: -1.,
            material: 1,
            write_material: true,
        }
        .into(),
        RaiseEdit {
            center,
            radius: 3.,
            strength: -1.,
            material: 1,
            write_material: true,
        }
        .into(),
        SphereEdit {
            center,
            radius: 3.,
            strength: -1.,
            material: 1,
            write_material: true,
        }
        .into(),
        CuboidEdit {
            center,
            half_extents: Vec3::new(1., 2., 3.),
            strength: -1.,
            material: 1,
            write_material: true,
        }
        .into(),
        FlattenEdit {
            center,
            radius: 3.,
            strength: 1.,
            normal: Vec3::Y,
        }
        .into(),
        NoiseEdit::new(center, 3., 2., 0.3, NoiseType::Perlin, Dimensionality::Three, 7).into(),
        SetDensityEdit {
            center,
            radius: 3.,
            target_density: -4.,
        }
        .into(),
        SetHeightEdit {
            center,
            radius: 3.,
            target_height: 1.,
        }
        .into(),
    ];

    let before = Voxel::new(0.75, 0);
    for edit in &edits {
        let bounds = edit.bounds();
        for x in -10..=10 {
            for y in -10..=10 {
                for z in -10..=10 {
                    let p = center + Vec3::new(x as f32, y as f32, z as f32) * 0.75;
                    if !bounds.contains(p) {
                        assert_eq!(before, edit.modify(p, before), "{edit:?} changed {p}");
                    }
                }
            }
        }
    }
}

#[test]
fn test_set_height() {
    let edit = SetHeightEdit {
        center: Vec3::new(0., 4., 0.),
        radius: 2.,
        target_height: 1.5,
    };
    assert_eq!(-1.5, edit.modify(Vec3::new(0.5, 0., 0.5), Voxel::EMPTY).density());
    assert_eq!(2.5, edit.modify(Vec3::new(0.5, 4., 0.5), Voxel::EMPTY).density());
    assert_eq!(Voxel::EMPTY, edit.modify(Vec3::new(3., 0., 0.), Voxel::EMPTY));
}

#[test]
fn test_flatten_moves_toward_plane() {
    let edit = FlattenEdit {
        center: Vec3::ZERO,
        radius: 4.,
        strength: 1.,
        normal: Vec3::Y * 2.,
    };
    // Full strength at the center snaps onto the plane
    assert_eq!(0., edit.modify(Vec3::ZERO, Voxel::new(-3., 0)).density());
    let halfway = edit.modify(Vec3::new(0., 2., 0.), Voxel::new(-2., 0));
    assert!(halfway.density() > -2. && halfway.density() < 2.);

    // Only the side the normal points to is clamped
    let below = Voxel::new(-2., 0);
    assert_eq!(below, edit.modify(Vec3::new(0., -2., 0.), below));
    let air = Voxel::new(3., 0);
    assert_eq!(air, edit.modify(Vec3::new(0., 1., 0.), air));
}

#[test]
fn test_noise_two_dimensional_ignores_height() {
    let edit = NoiseEdit::new(
        Vec3::ZERO,
        8.,
        1.,
        0.37,
        NoiseType::Simplex,
        Dimensionality::Two,
        11,
    );
    assert_eq!(
        edit.sample(Vec3::new(1.3, 0., 2.1)),
        edit.sample(Vec3::new(1.3, 5., 2.1))
    );
    assert_eq!(NoiseType::Simplex, edit.noise_type());
}
