//! Controller tuning profiles.
//!
//! A profile is immutable while the high-rate loop runs; swaps go
//! through the scheduler's dynamic stage and take effect at the next
//! controller cycle.

use nalgebra::Vector3;

/// Gains and limits of the geometric controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningProfile {
    /// Position gain [N/m], per axis.
    pub kp: Vector3<f64>,
    /// Velocity gain [N·s/m], per axis.
    pub kd: Vector3<f64>,
    /// Integral gain [N/(m·s)], per axis (0 disables).
    pub ki: Vector3<f64>,
    /// Acceleration feedforward gain (1.0 = full feedforward).
    pub kff: f64,
    /// Attitude gain [N·m], per axis.
    pub kr: Vector3<f64>,
    /// Angular-rate gain [N·m·s], per axis.
    pub komega: Vector3<f64>,
    /// Per-axis clamp on the position-error integral [m·s].
    pub integral_limit: Vector3<f64>,
    /// Position error below which the integral decays toward zero [m].
    pub integral_decay_threshold: f64,
    /// Integral decay time constant [s].
    pub integral_decay_tau: f64,
    /// Per-axis torque limit [N·m].
    pub torque_limit: Vector3<f64>,
}

impl TuningProfile {
    /// Balanced profile for a ~1.5 kg quadrotor.
    pub fn standard() -> Self {
        Self {
            kp: Vector3::new(6.0, 6.0, 8.0),
            kd: Vector3::new(4.0, 4.0, 5.0),
            ki: Vector3::new(0.4, 0.4, 0.6),
            kff: 1.0,
            kr: Vector3::new(8.0, 8.0, 2.5),
            komega: Vector3::new(0.25, 0.25, 0.12),
            integral_limit: Vector3::new(2.0, 2.0, 2.0),
            integral_decay_threshold: 0.05,
            integral_decay_tau: 2.0,
            torque_limit: Vector3::new(2.0, 2.0, 1.0),
        }
    }

    /// Softer profile for degraded operation: lower bandwidth, tighter
    /// torque ceiling.
    pub fn conservative() -> Self {
        Self {
            kp: Vector3::new(3.0, 3.0, 5.0),
            kd: Vector3::new(2.5, 2.5, 3.5),
            ki: Vector3::new(0.2, 0.2, 0.3),
            kff: 0.5,
            kr: Vector3::new(5.0, 5.0, 1.5),
            komega: Vector3::new(0.18, 0.18, 0.08),
            integral_limit: Vector3::new(1.0, 1.0, 1.0),
            integral_decay_threshold: 0.05,
            integral_decay_tau: 1.0,
            torque_limit: Vector3::new(1.2, 1.2, 0.6),
        }
    }
}

impl Default for TuningProfile {
    fn default() -> Self {
        Self::standard()
    }
}
