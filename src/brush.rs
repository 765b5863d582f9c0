//! Editor brushes, which turn a pointer position on the terrain into an [Edit]

use bevy::math::Vec3;
use serde::{Deserialize, Serialize};

use crate::edit::{
    AddEdit, CuboidEdit, Dimensionality, Edit, FlattenEdit, NoiseEdit, NoiseType, RaiseEdit,
    SetDensityEdit, SetHeightEdit, SphereEdit,
};

/// The shape and behaviour of a brush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrushType {
    /// Add or remove density within a sphere
    AddRemove,
    /// Raise or lower a column of terrain
    RaiseLower,
    /// Stamp a sphere
    Sphere,
    /// Stamp a cube
    Cube,
    /// Pull the terrain toward the plane held when the stroke started
    Flatten,
    /// Perturb the terrain with noise
    Noise,
    /// Overwrite the density within a sphere
    SetDensity,
    /// Overwrite the height of a column of terrain
    SetHeight,
}

/// Whether a stroke builds terrain up or carves it away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrushAction {
    /// Add matter
    Add,
    /// Remove matter
    Remove,
}

impl BrushAction {
    /// The sign applied to a brush's strength. Solid voxels have a negative density, so adding
    /// matter lowers the density
    pub fn sign(self) -> f32 {
        match self {
            BrushAction::Add => -1.0,
            BrushAction::Remove => 1.0,
        }
    }
}

/// All settings of an editor brush
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Brush {
    /// What the brush does
    pub brush_type: BrushType,
    /// Radius, or half extent for cubes
    pub radius: f32,
    /// Density change per application
    pub strength: f32,
    /// Material painted onto exposed surface
    pub material: u8,
    /// Whether the material is painted at all
    pub write_material: bool,
    /// Noise function of the noise brush
    pub noise_type: NoiseType,
    /// Whether the noise brush samples a height map or a volume
    pub noise_dimensionality: Dimensionality,
    /// Frequency of the noise brush
    pub noise_scale: f32,
    /// Seed of the noise brush
    pub noise_seed: u32,
    /// Density written by the set density brush
    pub target_density: f32,
    /// Height written by the set height brush
    pub target_height: f32,
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            brush_type: BrushType::AddRemove,
            radius: 3.0,
            strength: 1.0,
            material: 0,
            write_material: true,
            noise_type: NoiseType::Perlin,
            noise_dimensionality: Dimensionality::Three,
            noise_scale: 0.1,
            noise_seed: 0,
            target_density: -1.0,
            target_height: 0.0,
        }
    }
}

impl Brush {
    /// The edit this brush makes at `point`. `normal` is only used by the flatten brush
    pub fn edit(&self, point: Vec3, normal: Vec3, action: BrushAction) -> Edit {
        let strength = self.strength * action.sign();
        match self.brush_type {
            BrushType::AddRemove => AddEdit {
                center: point,
                radius: self.radius,
                strength,
                material: self.material,
                write_material: self.write_material,
            }
            .into(),
            BrushType::RaiseLower => RaiseEdit {
                center: point,
                radius: self.radius,
                strength,
                material: self.material,
                write_material: self.write_material,
            }
            .into(),
            BrushType::Sphere => SphereEdit {
                center: point,
                radius: self.radius,
                strength,
                material: self.material,
                write_material: self.write_material,
            }
            .into(),
            BrushType::Cube => CuboidEdit {
                center: point,
                half_extents: Vec3::splat(self.radius),
                strength,
                material: self.material,
                write_material: self.write_material,
            }
            .into(),
            BrushType::Flatten => FlattenEdit {
                center: point,
                radius: self.radius,
                strength,
                normal,
            }
            .into(),
            BrushType::Noise => NoiseEdit::new(
                point,
                self.radius,
                strength,
                self.noise_scale,
                self.noise_type,
                self.noise_dimensionality,
                self.noise_seed,
            )
            .into(),
            BrushType::SetDensity => SetDensityEdit {
                center: point,
                radius: self.radius,
                target_density: self.target_density,
            }
            .into(),
            BrushType::SetHeight => SetHeightEdit {
                center: point,
                radius: self.radius,
                target_height: self.target_height,
            }
            .into(),
        }
    }
}

/// A brush held down over several frames. The surface normal is locked when the stroke begins,
/// so flattening keeps working against the same plane while the surface changes under it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrushStroke {
    brush: Brush,
    action: BrushAction,
    held_normal: Vec3,
}

impl BrushStroke {
    /// Start a stroke on a surface with the given normal
    pub fn begin(brush: Brush, action: BrushAction, normal: Vec3) -> Self {
        Self {
            brush,
            action,
            held_normal: normal.normalize_or_zero(),
        }
    }

    /// The normal locked at the start of the stroke
    pub fn held_normal(&self) -> Vec3 {
        self.held_normal
    }

    /// The edit for the current pointer position
    pub fn edit_at(&self, point: Vec3) -> Edit {
        self.brush.edit(point, self.held_normal, self.action)
    }
}

#[test]
fn test_action_sets_strength_sign() {
    use crate::VoxelEdit;

    let brush = Brush {
        strength: 2.0,
        ..Default::default()
    };
    let add = brush.edit(Vec3::ZERO, Vec3::Y, BrushAction::Add);
    let remove = brush.edit(Vec3::ZERO, Vec3::Y, BrushAction::Remove);
    let voxel = crate::Voxel::new(0.5, 0);
    assert_eq!(-1.5, add.modify(Vec3::ZERO, voxel).density());
    assert_eq!(2.5, remove.modify(Vec3::ZERO, voxel).density());
}

#[test]
fn test_every_brush_type_builds_its_edit() {
    let types = [
        BrushType::AddRemove,
        BrushType::RaiseLower,
        BrushType::Sphere,
        BrushType::Cube,
        BrushType::Flatten,
        BrushType::Noise,
        BrushType::SetDensity,
        BrushType::SetHeight,
    ];
    for brush_type in types {
        let brush = Brush {
            brush_type,
            ..Default::default()
        };
        let edit = brush.edit(Vec3::ONE, Vec3::Y, BrushAction::Add);
        let matches = matches!(
            (brush_type, &edit),
            (BrushType::AddRemove, Edit::Add(_))
                | (BrushType::RaiseLower, Edit::Raise(_))
                | (BrushType::Sphere, Edit::Sphere(_))
                | (BrushType::Cube, Edit::Cuboid(_))
                | (BrushType::Flatten, Edit::Flatten(_))
                | (BrushType::Noise, Edit::Noise(_))
                | (BrushType::SetDensity, Edit::SetDensity(_))
                | (BrushType::SetHeight, Edit::SetHeight(_))
        );
        assert!(matches, "{brush_type:?} built {edit:?}");
    }
}

#[test]
fn test_stroke_keeps_normal() {
    let brush = Brush {
        brush_type: BrushType::Flatten,
        ..Default::default()
    };
    let stroke = BrushStroke::begin(brush, BrushAction::Add, Vec3::new(0., 2., 0.));
    assert_eq!(Vec3::Y, stroke.held_normal());
    let Edit::Flatten(flatten) = stroke.edit_at(Vec3::new(4., 1., 0.)) else {
        panic!("flatten brush built another edit");
    };
    assert_eq!(Vec3::Y, flatten.normal);
    assert_eq!(Vec3::new(4., 1., 0.), flatten.center);
}
