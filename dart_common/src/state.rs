//! Vehicle state, reference trajectory and command types.
//!
//! These are the plain-data values exchanged between the estimator, the
//! planner, the controller and the mixer. Each instance is immutable once
//! produced; the state buffer hands out copies. All fields are base-SI,
//! unit-stripped — unit conversion happens at the API surface only.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::consts::{MAX_HORIZON, MAX_MOTORS, QUAT_NORM_TOL};

/// Wrap an angle to the half-open interval (−π, π].
#[inline]
pub fn wrap_angle(angle: f64) -> f64 {
    let two_pi = 2.0 * std::f64::consts::PI;
    let mut a = angle % two_pi;
    if a > std::f64::consts::PI {
        a -= two_pi;
    } else if a <= -std::f64::consts::PI {
        a += two_pi;
    }
    a
}

// ─── DroneState ────────────────────────────────────────────────────

/// Estimator output: full kinematic state of the vehicle.
///
/// Carries attitude both as wrapped Euler angles and as a unit
/// quaternion; consumers pick whichever form their math wants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DroneState {
    /// Monotonic timestamp [s since an arbitrary epoch].
    pub t: f64,
    /// Position [m], world frame.
    pub position: Vector3<f64>,
    /// Velocity [m/s], world frame.
    pub velocity: Vector3<f64>,
    /// Attitude quaternion (body → world).
    pub attitude: UnitQuaternion<f64>,
    /// Angular velocity [rad/s], body frame.
    pub angular_velocity: Vector3<f64>,
}

impl Default for DroneState {
    fn default() -> Self {
        Self {
            t: 0.0,
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            attitude: UnitQuaternion::identity(),
            angular_velocity: Vector3::zeros(),
        }
    }
}

impl DroneState {
    /// Build from Euler angles (roll, pitch, yaw) [rad]. Yaw is wrapped.
    pub fn from_euler(
        t: f64,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        roll: f64,
        pitch: f64,
        yaw: f64,
        angular_velocity: Vector3<f64>,
    ) -> Self {
        Self {
            t,
            position,
            velocity,
            attitude: UnitQuaternion::from_euler_angles(roll, pitch, wrap_angle(yaw)),
            angular_velocity,
        }
    }

    /// Attitude as (roll, pitch, yaw) [rad], yaw wrapped to (−π, π].
    #[inline]
    pub fn euler_angles(&self) -> (f64, f64, f64) {
        let (r, p, y) = self.attitude.euler_angles();
        (r, p, wrap_angle(y))
    }

    /// Body→world rotation matrix.
    #[inline]
    pub fn rotation(&self) -> Rotation3<f64> {
        self.attitude.to_rotation_matrix()
    }

    /// Whether every component is finite and the quaternion is unit-norm.
    pub fn is_valid(&self) -> bool {
        let finite = self.t.is_finite()
            && self.position.iter().all(|v| v.is_finite())
            && self.velocity.iter().all(|v| v.is_finite())
            && self.angular_velocity.iter().all(|v| v.is_finite())
            && self.attitude.coords.iter().all(|v| v.is_finite());
        finite && (self.attitude.coords.norm() - 1.0).abs() <= QUAT_NORM_TOL
    }
}

// ─── ReferenceTrajectory ───────────────────────────────────────────

/// One trajectory sample: the flat outputs the controller tracks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySample {
    /// Position [m], world frame.
    pub position: [f64; 3],
    /// Velocity [m/s], world frame.
    pub velocity: [f64; 3],
    /// Acceleration [m/s²], world frame.
    pub acceleration: [f64; 3],
    /// Heading [rad], wrapped.
    pub yaw: f64,
    /// Heading rate [rad/s].
    pub yaw_rate: f64,
}

impl Default for TrajectorySample {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            velocity: [0.0; 3],
            acceleration: [0.0; 3],
            yaw: 0.0,
            yaw_rate: 0.0,
        }
    }
}

impl TrajectorySample {
    /// Hold-in-place sample at the given position and heading.
    pub fn hover_at(position: Vector3<f64>, yaw: f64) -> Self {
        Self {
            position: position.into(),
            yaw: wrap_angle(yaw),
            ..Self::default()
        }
    }

    #[inline]
    pub fn position_vec(&self) -> Vector3<f64> {
        Vector3::from(self.position)
    }

    #[inline]
    pub fn velocity_vec(&self) -> Vector3<f64> {
        Vector3::from(self.velocity)
    }

    #[inline]
    pub fn acceleration_vec(&self) -> Vector3<f64> {
        Vector3::from(self.acceleration)
    }

    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
            && self.velocity.iter().all(|v| v.is_finite())
            && self.acceleration.iter().all(|v| v.is_finite())
            && self.yaw.is_finite()
            && self.yaw_rate.is_finite()
    }
}

/// Uniformly sampled reference trajectory produced by the planner and
/// consumed (atomically, as a whole) by the controller.
///
/// Storage is inline — no heap allocation when a plan is swapped in the
/// high-rate path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceTrajectory {
    /// Monotonic plan id; consumers reject ids that do not increase.
    pub plan_id: u64,
    /// Timestamp of sample 0 [s].
    pub start_time: f64,
    /// Uniform sample step [s].
    pub dt: f64,
    /// Samples, monotonic in time.
    pub samples: heapless::Vec<TrajectorySample, MAX_HORIZON>,
}

impl ReferenceTrajectory {
    /// Single-sample hover trajectory (used as a safe fallback).
    pub fn hover(plan_id: u64, start_time: f64, position: Vector3<f64>, yaw: f64) -> Self {
        let mut samples = heapless::Vec::new();
        let _ = samples.push(TrajectorySample::hover_at(position, yaw));
        Self {
            plan_id,
            start_time,
            dt: crate::consts::DEFAULT_PLAN_DT,
            samples,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample the trajectory at absolute time `t`, holding the endpoints.
    ///
    /// Linear interpolation between neighbouring samples; before the
    /// start the first sample is returned, past the end the last.
    pub fn sample_at(&self, t: f64) -> TrajectorySample {
        debug_assert!(!self.is_empty());
        let n = self.samples.len();
        if n == 1 {
            return self.samples[0];
        }
        let rel = (t - self.start_time) / self.dt;
        if rel <= 0.0 {
            return self.samples[0];
        }
        let idx = rel.floor() as usize;
        if idx >= n - 1 {
            return self.samples[n - 1];
        }
        let alpha = rel - idx as f64;
        let a = &self.samples[idx];
        let b = &self.samples[idx + 1];
        let lerp3 = |x: &[f64; 3], y: &[f64; 3]| {
            [
                x[0] + alpha * (y[0] - x[0]),
                x[1] + alpha * (y[1] - x[1]),
                x[2] + alpha * (y[2] - x[2]),
            ]
        };
        TrajectorySample {
            position: lerp3(&a.position, &b.position),
            velocity: lerp3(&a.velocity, &b.velocity),
            acceleration: lerp3(&a.acceleration, &b.acceleration),
            yaw: wrap_angle(a.yaw + alpha * wrap_angle(b.yaw - a.yaw)),
            yaw_rate: a.yaw_rate + alpha * (b.yaw_rate - a.yaw_rate),
        }
    }
}

// ─── Commands ──────────────────────────────────────────────────────

/// Collective thrust + body torques emitted by the geometric controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlCommand {
    /// Collective thrust [N], ≥ 0.
    pub thrust: f64,
    /// Body torques [N·m].
    pub torque: Vector3<f64>,
    /// Monotonic timestamp [s].
    pub timestamp: f64,
}

impl ControlCommand {
    pub fn is_finite(&self) -> bool {
        self.thrust.is_finite()
            && self.torque.iter().all(|v| v.is_finite())
            && self.timestamp.is_finite()
    }
}

/// Per-motor PWM output of the mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorCommand {
    /// PWM microsecond values; only the first `count` entries are live.
    pub pwm: [u16; MAX_MOTORS],
    /// Number of motors.
    pub count: usize,
    /// Monotonic timestamp [µs].
    pub timestamp_us: u64,
}

impl MotorCommand {
    /// All-idle command for `count` motors.
    pub fn idle(count: usize, pwm_idle: u16, timestamp_us: u64) -> Self {
        let mut pwm = [0u16; MAX_MOTORS];
        pwm[..count].fill(pwm_idle);
        Self {
            pwm,
            count,
            timestamp_us,
        }
    }

    /// Live PWM slice.
    #[inline]
    pub fn pwm(&self) -> &[u16] {
        &self.pwm[..self.count]
    }
}

// ─── Snapshot ──────────────────────────────────────────────────────

/// A versioned copy handed out by the state buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot<T> {
    /// The snapshotted value.
    pub state: T,
    /// Producer timestamp [s].
    pub timestamp: f64,
    /// Strictly monotonically increasing per buffer.
    pub version: u64,
    /// Producer identifier.
    pub source: &'static str,
}

// ─── Inertia helper ────────────────────────────────────────────────

/// Build a nalgebra matrix from config inertia rows.
pub fn inertia_matrix(rows: &[[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::new(
        rows[0][0], rows[0][1], rows[0][2], //
        rows[1][0], rows[1][1], rows[1][2], //
        rows[2][0], rows[2][1], rows[2][2],
    )
}
