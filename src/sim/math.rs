//! Vector helpers shared by the wire protocol and the physics systems
//!
//! World axes: x east, y up, z south. Yaw 0 faces +Z and positive yaw turns
//! toward +X.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use glam::Vec3;

/// Lengths below this are treated as zero when normalizing
pub const EPSILON: f32 = 1e-4;

/// Unit vector on the ground plane for a facing angle
pub fn facing(yaw: f32) -> Vec3 {
    Vec3::new(yaw.sin(), 0.0, yaw.cos())
}

/// Ground-plane operations the physics code leans on
pub trait GroundPlane {
    /// Copy with y zeroed
    fn horizontal(self) -> Vec3;
    /// Length of the x/z component
    fn horizontal_length(self) -> f32;
    /// Normalize, or `fallback` when shorter than [`EPSILON`]
    fn direction_or(self, fallback: Vec3) -> Vec3;
    /// Rotate around the Y axis by `yaw` radians, same convention as [`facing`]
    fn rotate_yaw(self, yaw: f32) -> Vec3;
}

impl GroundPlane for Vec3 {
    fn horizontal(self) -> Vec3 {
        Vec3::new(self.x, 0.0, self.z)
    }

    fn horizontal_length(self) -> f32 {
        self.horizontal().length()
    }

    fn direction_or(self, fallback: Vec3) -> Vec3 {
        let len = self.length();
        if len < EPSILON {
            fallback
        } else {
            self / len
        }
    }

    fn rotate_yaw(self, yaw: f32) -> Vec3 {
        let (s, c) = yaw.sin_cos();
        Vec3::new(self.x * c + self.z * s, self.y, -self.x * s + self.z * c)
    }
}

/// Convert a per-60Hz-frame multiplier into the factor for a step of `dt` seconds
pub fn frame_damping(per_frame: f32, dt: f32) -> f32 {
    per_frame.powf(dt * 60.0)
}

/// Exponential approach factor for smoothing at `rate` per second
pub fn approach(rate: f32, dt: f32) -> f32 {
    (rate * dt).clamp(0.0, 1.0)
}

#[derive(Serialize, Deserialize)]
struct Xyz {
    x: f32,
    y: f32,
    z: f32,
}

impl From<Vec3> for Xyz {
    fn from(v: Vec3) -> Self {
        Self { x: v.x, y: v.y, z: v.z }
    }
}

impl From<Xyz> for Vec3 {
    fn from(v: Xyz) -> Self {
        Vec3::new(v.x, v.y, v.z)
    }
}

/// `{"x","y","z"}` object encoding for vectors, used with `#[serde(with = "xyz")]`
pub mod xyz {
    use super::*;

    pub fn serialize<S: Serializer>(v: &Vec3, serializer: S) -> Result<S::Ok, S::Error> {
        Xyz::from(*v).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec3, D::Error> {
        Xyz::deserialize(deserializer).map(Vec3::from)
    }
}

/// Same as [`xyz`] for optional vectors
pub mod opt_xyz {
    use super::*;

    pub fn serialize<S: Serializer>(v: &Option<Vec3>, serializer: S) -> Result<S::Ok, S::Error> {
        v.map(Xyz::from).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec3>, D::Error> {
        Option::<Xyz>::deserialize(deserializer).map(|v| v.map(Vec3::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_matches_facing_convention() {
        assert_eq!(facing(0.0), Vec3::new(0.0, 0.0, 1.0));

        let east = facing(std::f32::consts::FRAC_PI_2);
        assert!((east.x - 1.0).abs() < 1e-6);
        assert!(east.z.abs() < 1e-6);
    }

    #[test]
    fn rotate_yaw_agrees_with_forward() {
        let yaw = 0.7;
        let rotated = Vec3::Z.rotate_yaw(yaw);
        assert!((rotated - facing(yaw)).length() < 1e-6);
    }

    #[test]
    fn direction_falls_back_on_zero() {
        assert_eq!(Vec3::ZERO.direction_or(Vec3::Z), Vec3::Z);
        let n = Vec3::new(3.0, 0.0, 4.0).direction_or(Vec3::Z);
        assert!((n.length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn frame_damping_is_identity_at_one_frame() {
        let f = frame_damping(0.99, 1.0 / 60.0);
        assert!((f - 0.99).abs() < 1e-5);
    }

    #[test]
    fn vectors_travel_as_xyz_objects() {
        #[derive(Serialize, Deserialize)]
        struct Holder {
            #[serde(with = "xyz")]
            at: Vec3,
            #[serde(with = "opt_xyz", default)]
            head: Option<Vec3>,
        }

        let json = serde_json::to_value(Holder {
            at: Vec3::new(1.0, 2.0, 3.0),
            head: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"at": {"x": 1.0, "y": 2.0, "z": 3.0}, "head": null}));

        let back: Holder = serde_json::from_str(r#"{"at":{"x":4,"y":5,"z":6}}"#).unwrap();
        assert_eq!(back.at, Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(back.head, None);
    }
}
