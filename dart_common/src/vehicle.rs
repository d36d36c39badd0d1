//! Immutable physical vehicle parameters.
//!
//! Constructed exactly once at bootstrap from a validated
//! [`VehicleConfig`](crate::config::VehicleConfig) and shared read-only
//! afterwards. All constants are pre-converted base-SI so the hot loops
//! never touch unit conversion.

use nalgebra::{Matrix3, Vector3};

use crate::config::{ConfigError, MotorLayout, VehicleConfig};
use crate::consts::MAX_MOTORS;
use crate::state::inertia_matrix;

/// Geometry of a single motor: arm lever in the body frame plus spin
/// direction for yaw torque.
#[derive(Debug, Clone, Copy)]
pub struct MotorGeometry {
    /// Arm lever [m], body frame (x forward, y left, z up).
    pub arm: Vector3<f64>,
    /// Spin direction: +1 CCW, −1 CW.
    pub direction: f64,
}

/// Immutable vehicle description used by the controller, mixer and
/// simulation backend.
#[derive(Debug, Clone)]
pub struct VehicleParams {
    /// Takeoff mass [kg].
    pub mass: f64,
    /// Gravitational acceleration [m/s²].
    pub gravity: f64,
    /// Body inertia [kg·m²].
    pub inertia: Matrix3<f64>,
    /// Inverse inertia, precomputed.
    pub inertia_inv: Matrix3<f64>,
    /// Arm length [m].
    pub arm_length: f64,
    /// Motor layout.
    pub layout: MotorLayout,
    /// Per-motor geometry, length `motor_count`.
    pub motors: [MotorGeometry; MAX_MOTORS],
    /// Number of motors K.
    pub motor_count: usize,
    /// Thrust coefficient (normalized² → N).
    pub thrust_coefficient: f64,
    /// Yaw torque per Newton of motor thrust [N·m/N].
    pub torque_coefficient: f64,
    /// PWM limits [µs].
    pub pwm_idle: u16,
    pub pwm_min: u16,
    pub pwm_max: u16,
    /// PWM microseconds per sqrt(N).
    pub pwm_scaling_factor: f64,
    /// Maximum per-motor thrust [N], derived from the PWM curve span.
    pub motor_thrust_max: f64,
    /// Maximum collective thrust [N].
    pub thrust_max: f64,
    /// Hover collective thrust m·g [N].
    pub hover_thrust: f64,
}

impl VehicleParams {
    /// Build from a validated configuration. The only constructor.
    pub fn from_config(cfg: &VehicleConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;

        let inertia = inertia_matrix(&cfg.inertia);
        let inertia_inv = inertia.try_inverse().ok_or_else(|| {
            ConfigError::ValidationError("vehicle.inertia is singular".to_string())
        })?;

        let mut motors = [MotorGeometry {
            arm: Vector3::zeros(),
            direction: 1.0,
        }; MAX_MOTORS];
        for (i, geo) in motor_arms(cfg.layout, cfg.arm_length)
            .into_iter()
            .enumerate()
        {
            motors[i] = MotorGeometry {
                arm: geo,
                direction: cfg.motor_directions[i] as f64,
            };
        }

        // The sqrt PWM curve spans [pwm_idle, pwm_max]; invert it at the
        // top of the band to get the largest thrust a motor can realize.
        let span = (cfg.pwm_max - cfg.pwm_idle) as f64;
        let motor_thrust_max = (span / cfg.pwm_scaling_factor).powi(2);
        let thrust_max = motor_thrust_max * cfg.num_motors as f64;
        let hover_thrust = cfg.mass * cfg.gravity;

        if hover_thrust >= thrust_max {
            return Err(ConfigError::ValidationError(format!(
                "vehicle cannot hover: m*g = {hover_thrust:.2} N >= max thrust {thrust_max:.2} N"
            )));
        }

        Ok(Self {
            mass: cfg.mass,
            gravity: cfg.gravity,
            inertia,
            inertia_inv,
            arm_length: cfg.arm_length,
            layout: cfg.layout,
            motors,
            motor_count: cfg.num_motors,
            thrust_coefficient: cfg.thrust_coefficient,
            torque_coefficient: cfg.torque_coefficient,
            pwm_idle: cfg.pwm_idle,
            pwm_min: cfg.pwm_min,
            pwm_max: cfg.pwm_max,
            pwm_scaling_factor: cfg.pwm_scaling_factor,
            motor_thrust_max,
            thrust_max,
            hover_thrust,
        })
    }

    /// Live motor geometry slice.
    #[inline]
    pub fn motors(&self) -> &[MotorGeometry] {
        &self.motors[..self.motor_count]
    }
}

/// Arm levers for the supported layouts, body frame, z up.
fn motor_arms(layout: MotorLayout, arm_length: f64) -> Vec<Vector3<f64>> {
    let l = arm_length;
    let d = l / std::f64::consts::SQRT_2;
    match layout {
        // Front-right, back-left, front-left, back-right.
        MotorLayout::QuadX => vec![
            Vector3::new(d, -d, 0.0),
            Vector3::new(-d, d, 0.0),
            Vector3::new(d, d, 0.0),
            Vector3::new(-d, -d, 0.0),
        ],
        // Front, back, left, right.
        MotorLayout::QuadPlus => vec![
            Vector3::new(l, 0.0, 0.0),
            Vector3::new(-l, 0.0, 0.0),
            Vector3::new(0.0, l, 0.0),
            Vector3::new(0.0, -l, 0.0),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn quad_cfg() -> VehicleConfig {
        VehicleConfig {
            mass: 1.5,
            gravity: 9.81,
            inertia: [[0.02, 0.0, 0.0], [0.0, 0.02, 0.0], [0.0, 0.0, 0.04]],
            arm_length: 0.25,
            num_motors: 4,
            layout: MotorLayout::QuadX,
            motor_directions: vec![1, 1, -1, -1],
            thrust_coefficient: 1.0e-5,
            torque_coefficient: 0.016,
            pwm_idle: 1100,
            pwm_min: 1000,
            pwm_max: 2000,
            pwm_scaling_factor: 200.0,
        }
    }

    #[test]
    fn hover_thrust_is_mg() {
        let p = VehicleParams::from_config(&quad_cfg()).unwrap();
        assert_relative_eq!(p.hover_thrust, 1.5 * 9.81, epsilon = 1e-12);
    }

    #[test]
    fn motor_thrust_max_from_pwm_span() {
        let p = VehicleParams::from_config(&quad_cfg()).unwrap();
        // span = 900 µs, scale = 200 → sqrt(f) = 4.5 → f = 20.25 N
        assert_relative_eq!(p.motor_thrust_max, 20.25, epsilon = 1e-12);
        assert_relative_eq!(p.thrust_max, 81.0, epsilon = 1e-12);
    }

    #[test]
    fn arms_have_configured_length() {
        let p = VehicleParams::from_config(&quad_cfg()).unwrap();
        for m in p.motors() {
            assert_relative_eq!(m.arm.norm(), 0.25, epsilon = 1e-12);
        }
    }

    #[test]
    fn overweight_vehicle_rejected() {
        let mut cfg = quad_cfg();
        cfg.mass = 9.0; // m*g = 88 N > 81 N max
        assert!(VehicleParams::from_config(&cfg).is_err());
    }

    #[test]
    fn inertia_inverse_precomputed() {
        let p = VehicleParams::from_config(&quad_cfg()).unwrap();
        let id = p.inertia * p.inertia_inv;
        for i in 0..3 {
            for j in 0..3 {
                let expect = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(id[(i, j)], expect, epsilon = 1e-9);
            }
        }
    }
}
