//! Directions on the listener sphere
//!
//! Ambisonic convention throughout: +X front, +Y left, +Z up. Azimuth is
//! measured counter-clockwise from the front (positive = left), elevation
//! positive upwards.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Below this length a vector has no usable direction
const DEGENERATE_LENGTH: f32 = 1e-10;

/// Cartesian point or direction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position3D {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Unit vector straight ahead
    pub fn front() -> Self {
        Self::new(1.0, 0.0, 0.0)
    }

    /// From azimuth and elevation in degrees
    pub fn from_spherical(azimuth: f32, elevation: f32, distance: f32) -> Self {
        let (sin_az, cos_az) = azimuth.to_radians().sin_cos();
        let (sin_el, cos_el) = elevation.to_radians().sin_cos();
        Self::new(
            distance * cos_az * cos_el,
            distance * sin_az * cos_el,
            distance * sin_el,
        )
    }

    /// Azimuth in (-180, 180], elevation in [-90, 90]; all zero at the origin
    pub fn to_spherical(&self) -> SphericalCoord {
        let distance = self.magnitude();
        if distance < DEGENERATE_LENGTH {
            return SphericalCoord::new(0.0, 0.0, 0.0);
        }
        SphericalCoord::new(
            self.y.atan2(self.x).to_degrees(),
            (self.z / distance).clamp(-1.0, 1.0).asin().to_degrees(),
            distance,
        )
    }

    pub fn magnitude(&self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Unit vector in the same direction, or [`front`](Self::front) for a
    /// zero-length input
    pub fn normalize(&self) -> Self {
        let length = self.magnitude();
        if length < DEGENERATE_LENGTH {
            Self::front()
        } else {
            Self::new(self.x / length, self.y / length, self.z / length)
        }
    }

    pub fn dot(&self, other: &Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Great-circle angle in radians
    pub fn angle_to(&self, other: &Self) -> f32 {
        self.normalize()
            .dot(&other.normalize())
            .clamp(-1.0, 1.0)
            .acos()
    }
}

impl From<Vector3<f32>> for Position3D {
    fn from(v: Vector3<f32>) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<Position3D> for Vector3<f32> {
    fn from(p: Position3D) -> Self {
        Vector3::new(p.x, p.y, p.z)
    }
}

impl Default for Position3D {
    fn default() -> Self {
        Self::front()
    }
}

/// Azimuth/elevation in degrees plus distance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SphericalCoord {
    pub azimuth: f32,
    pub elevation: f32,
    pub distance: f32,
}

impl SphericalCoord {
    pub fn new(azimuth: f32, elevation: f32, distance: f32) -> Self {
        Self {
            azimuth,
            elevation,
            distance,
        }
    }

    pub fn to_cartesian(&self) -> Position3D {
        Position3D::from_spherical(self.azimuth, self.elevation, self.distance)
    }
}
