//! Obstacle interface for the trajectory optimizer.
//!
//! The optimizer does not own a map; it queries an external occupancy
//! source (the perception adapter) point by point. Cells the source
//! cannot classify are reported as [`Occupancy::Unknown`] and penalized
//! at a configurable fraction of the occupied weight.

use nalgebra::Vector3;

/// Classification of a queried point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupancy {
    /// Known free space.
    Free,
    /// Known occupied (or within an obstacle's inflation radius).
    Occupied,
    /// The source has no information for this point.
    Unknown,
}

/// Result of a point query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObstacleSample {
    pub occupancy: Occupancy,
    /// Distance to the nearest known obstacle surface [m]
    /// (`f64::INFINITY` when none is known).
    pub distance: f64,
}

impl ObstacleSample {
    pub const FREE: Self = Self {
        occupancy: Occupancy::Free,
        distance: f64::INFINITY,
    };
}

/// External occupancy source queried by the planner.
pub trait ObstacleQuery: Send + Sync {
    fn query(&self, point: &Vector3<f64>) -> ObstacleSample;
}

/// Empty world; every point is free.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeSpace;

impl ObstacleQuery for FreeSpace {
    fn query(&self, _point: &Vector3<f64>) -> ObstacleSample {
        ObstacleSample::FREE
    }
}

/// Spherical obstacle set with an optional known-space radius — points
/// farther than `known_radius` from the origin report `Unknown`.
/// Sufficient for tests and the simulation tier.
#[derive(Debug, Clone, Default)]
pub struct SphereField {
    spheres: Vec<(Vector3<f64>, f64)>,
    known_radius: Option<f64>,
}

impl SphereField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sphere(mut self, center: Vector3<f64>, radius: f64) -> Self {
        self.spheres.push((center, radius));
        self
    }

    /// Mark everything farther than `radius` from the origin as unknown.
    pub fn with_known_radius(mut self, radius: f64) -> Self {
        self.known_radius = Some(radius);
        self
    }
}

impl ObstacleQuery for SphereField {
    fn query(&self, point: &Vector3<f64>) -> ObstacleSample {
        if let Some(r) = self.known_radius {
            if point.norm() > r {
                return ObstacleSample {
                    occupancy: Occupancy::Unknown,
                    distance: f64::INFINITY,
                };
            }
        }
        let mut min_dist = f64::INFINITY;
        for (center, radius) in &self.spheres {
            let d = (point - center).norm() - radius;
            if d < min_dist {
                min_dist = d;
            }
        }
        if min_dist <= 0.0 {
            ObstacleSample {
                occupancy: Occupancy::Occupied,
                distance: 0.0,
            }
        } else {
            ObstacleSample {
                occupancy: Occupancy::Free,
                distance: min_dist,
            }
        }
    }
}
