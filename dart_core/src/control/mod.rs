//! High-rate SE(3) geometric attitude + position controller.
//!
//! Pure function of (state, reference sample, dt, profile, vehicle
//! params) → thrust + body torques. Bounded execution, no allocation in
//! the per-cycle path. Integral state is clamped per axis and reset on
//! every mode change.
//!
//! Singularities are handled without emitting NaN: a vanishing desired
//! force reuses the last valid body-z direction, a heading collinear
//! with body-z substitutes the previous yaw, and any non-finite result
//! aborts the cycle with a hover command and a fault report.

pub mod gains;
pub mod se3;

use nalgebra::{Rotation3, Vector3};
use tracing::warn;

use dart_common::error::CoreError;
use dart_common::state::{wrap_angle, ControlCommand, DroneState, TrajectorySample};
use dart_common::vehicle::VehicleParams;

pub use gains::TuningProfile;
use se3::{attitude_error, hat, rotation_from_axis_yaw, DIRECTION_EPS};

/// Operating mode commanded by the scheduler / watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum ControlMode {
    /// Track the supplied reference sample.
    #[default]
    Active,
    /// Hold position: zero velocity/acceleration setpoint.
    Hold,
    /// Constant-rate descent, yaw held, lateral position loop disabled.
    EmergencyLand,
}

/// One controller cycle result: the command to mix, plus the fault that
/// forced a hover fallback, if any.
#[derive(Debug, Clone)]
pub struct ControlOutput {
    pub command: ControlCommand,
    pub fault: Option<CoreError>,
}

/// SE(3) geometric controller with integral action.
pub struct GeometricController {
    params: VehicleParams,
    profile: TuningProfile,
    mode: ControlMode,
    /// Position-error integral [m·s], clamped per axis.
    integral: Vector3<f64>,
    /// Last valid desired body-z direction (unit), for the thrust
    /// singularity fallback.
    last_b3: Vector3<f64>,
    /// Last valid yaw reference [rad], for the degenerate-heading
    /// fallback and the emergency descent.
    last_yaw: f64,
    /// Emergency descent rate [m/s], positive down.
    descent_rate: f64,
}

impl GeometricController {
    pub fn new(params: VehicleParams, profile: TuningProfile, descent_rate: f64) -> Self {
        Self {
            params,
            profile,
            mode: ControlMode::Active,
            integral: Vector3::zeros(),
            last_b3: Vector3::z(),
            last_yaw: 0.0,
            descent_rate,
        }
    }

    #[inline]
    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    /// Switch operating mode. Resets the integral accumulator.
    pub fn set_mode(&mut self, mode: ControlMode) {
        if mode != self.mode {
            self.mode = mode;
            self.integral = Vector3::zeros();
        }
    }

    /// Swap the tuning profile. Takes effect on the next cycle; resets
    /// the integral so old accumulation does not couple with new gains.
    pub fn set_profile(&mut self, profile: TuningProfile) {
        self.profile = profile;
        self.integral = Vector3::zeros();
    }

    /// Hover fallback: weight compensation, zero torque.
    pub fn hover_command(&self, timestamp: f64) -> ControlCommand {
        ControlCommand {
            thrust: self.params.hover_thrust,
            torque: Vector3::zeros(),
            timestamp,
        }
    }

    /// Execute one control cycle.
    pub fn update(
        &mut self,
        state: &DroneState,
        reference: &TrajectorySample,
        dt: f64,
    ) -> ControlOutput {
        if dt <= 0.0 || !state.is_valid() || !reference.is_finite() {
            return self.fault_output(state.t, "invalid controller inputs");
        }

        let (p_ref, v_ref, a_ref, yaw_ref, yaw_rate_ref) = self.shape_reference(state, reference);

        // 1. Tracking errors.
        let ep = state.position - p_ref;
        let ev = state.velocity - v_ref;

        // 2. Integral with per-axis clamp; decays once the position
        //    error is inside the threshold so a trimmed hover does not
        //    hold stale wind-up.
        if ep.norm() < self.profile.integral_decay_threshold {
            let decay = (-dt / self.profile.integral_decay_tau).exp();
            self.integral *= decay;
        } else {
            self.integral += ep * dt;
        }
        for i in 0..3 {
            let lim = self.profile.integral_limit[i];
            self.integral[i] = self.integral[i].clamp(-lim, lim);
        }

        // Desired force: PD + integral action toward the reference,
        // weight compensation, acceleration feedforward.
        let prof = self.profile;
        let f_des = -prof.kp.component_mul(&ep) - prof.kd.component_mul(&ev)
            - prof.ki.component_mul(&self.integral)
            + self.params.mass * (self.params.gravity * Vector3::z() + prof.kff * a_ref);

        // 3. Collective thrust: projection onto the current body z.
        let r = state.rotation();
        let body_z = r * Vector3::z();
        let thrust = f_des.dot(&body_z).clamp(0.0, self.params.thrust_max);

        // 4. Desired attitude from the thrust direction and heading.
        let b3 = if f_des.norm() > DIRECTION_EPS {
            let b3 = f_des.normalize();
            self.last_b3 = b3;
            b3
        } else {
            self.last_b3
        };
        let r_des = match rotation_from_axis_yaw(&b3, yaw_ref) {
            Some(rd) => {
                self.last_yaw = yaw_ref;
                rd
            }
            None => match rotation_from_axis_yaw(&b3, self.last_yaw) {
                Some(rd) => rd,
                None => Rotation3::identity(),
            },
        };

        // 5. Attitude and angular-velocity errors.
        let e_r = attitude_error(&r, &r_des);
        let omega_ref = Vector3::new(0.0, 0.0, yaw_rate_ref);
        let rt_rd = r.matrix().transpose() * r_des.matrix();
        let e_omega = state.angular_velocity - rt_rd * omega_ref;

        // 6. Torque: PD on SO(3) plus gyroscopic and reference-rate
        //    feedforward terms (reference angular acceleration is zero).
        let j = &self.params.inertia;
        let omega = state.angular_velocity;
        let torque_raw = -prof.kr.component_mul(&e_r) - prof.komega.component_mul(&e_omega)
            + omega.cross(&(j * omega))
            - j * (hat(&omega) * rt_rd * omega_ref);

        // 7. Per-axis torque limits.
        let mut torque = torque_raw;
        for i in 0..3 {
            let lim = prof.torque_limit[i];
            torque[i] = torque[i].clamp(-lim, lim);
        }

        let command = ControlCommand {
            thrust,
            torque,
            timestamp: state.t,
        };
        if !command.is_finite() {
            return self.fault_output(state.t, "non-finite control output");
        }

        ControlOutput {
            command,
            fault: None,
        }
    }

    /// Reference shaping per mode.
    fn shape_reference(
        &mut self,
        state: &DroneState,
        reference: &TrajectorySample,
    ) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>, f64, f64) {
        match self.mode {
            ControlMode::Active => (
                reference.position_vec(),
                reference.velocity_vec(),
                reference.acceleration_vec(),
                wrap_angle(reference.yaw),
                reference.yaw_rate,
            ),
            ControlMode::Hold => (
                reference.position_vec(),
                Vector3::zeros(),
                Vector3::zeros(),
                wrap_angle(reference.yaw),
                0.0,
            ),
            ControlMode::EmergencyLand => {
                // Lateral loop disabled: track current xy, command a
                // fixed descent, hold the last heading.
                let p_ref = Vector3::new(state.position.x, state.position.y, state.position.z);
                let v_ref = Vector3::new(0.0, 0.0, -self.descent_rate);
                (p_ref, v_ref, Vector3::zeros(), self.last_yaw, 0.0)
            }
        }
    }

    fn fault_output(&mut self, timestamp: f64, reason: &str) -> ControlOutput {
        warn!(reason, "controller cycle aborted, emitting hover");
        self.integral = Vector3::zeros();
        ControlOutput {
            command: self.hover_command(timestamp),
            fault: Some(CoreError::ControllerFault(reason.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use dart_common::config::{MotorLayout, VehicleConfig};

    fn quad_params() -> VehicleParams {
        VehicleParams::from_config(&VehicleConfig {
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
        })
        .unwrap()
    }

    fn controller() -> GeometricController {
        GeometricController::new(quad_params(), TuningProfile::standard(), 0.5)
    }

    #[test]
    fn hover_at_reference_commands_weight() {
        let mut ctrl = controller();
        let state = DroneState::default();
        let reference = TrajectorySample::default();
        let out = ctrl.update(&state, &reference, 0.0025);
        assert!(out.fault.is_none());
        assert_relative_eq!(out.command.thrust, 1.5 * 9.81, epsilon = 1e-6);
        assert!(out.command.torque.norm() < 1e-9);
    }

    #[test]
    fn thrust_always_finite_and_non_negative() {
        let mut ctrl = controller();
        let mut state = DroneState::default();
        state.position = Vector3::new(3.0, -2.0, 10.0);
        state.velocity = Vector3::new(5.0, 5.0, -5.0);
        let reference = TrajectorySample::default();
        let out = ctrl.update(&state, &reference, 0.0025);
        assert!(out.command.thrust.is_finite());
        assert!(out.command.thrust >= 0.0);
    }

    #[test]
    fn position_error_pulls_toward_reference() {
        let mut ctrl = controller();
        let mut state = DroneState::default();
        state.position = Vector3::new(-1.0, 0.0, 0.0); // left of reference
        let reference = TrajectorySample::default();
        let out = ctrl.update(&state, &reference, 0.0025);
        // Desired force tilts toward +x, so pitch torque is nonzero.
        assert!(out.command.torque.norm() > 1e-4);
        assert!(out.fault.is_none());
    }

    #[test]
    fn invalid_state_yields_hover_and_fault() {
        let mut ctrl = controller();
        let mut state = DroneState::default();
        state.velocity.x = f64::NAN;
        let out = ctrl.update(&state, &TrajectorySample::default(), 0.0025);
        assert!(matches!(out.fault, Some(CoreError::ControllerFault(_))));
        assert_relative_eq!(out.command.thrust, 1.5 * 9.81, epsilon = 1e-9);
        assert!(out.command.torque.norm() == 0.0);
    }

    #[test]
    fn vanishing_force_reuses_last_b3() {
        let mut ctrl = controller();
        let state = DroneState::default();
        // A reference acceleration of exactly -g cancels weight
        // compensation; with zero errors the desired force vanishes.
        let reference = TrajectorySample {
            acceleration: [0.0, 0.0, -9.81],
            ..Default::default()
        };
        let out = ctrl.update(&state, &reference, 0.0025);
        assert!(out.fault.is_none());
        assert!(out.command.thrust.is_finite());
        assert!(out.command.torque.iter().all(|t| t.is_finite()));
    }

    #[test]
    fn mode_change_resets_integral() {
        let mut ctrl = controller();
        let mut state = DroneState::default();
        state.position = Vector3::new(1.0, 0.0, 0.0);
        for _ in 0..200 {
            ctrl.update(&state, &TrajectorySample::default(), 0.0025);
        }
        assert!(ctrl.integral.norm() > 0.0);
        ctrl.set_mode(ControlMode::Hold);
        assert_eq!(ctrl.integral.norm(), 0.0);
    }

    #[test]
    fn integral_is_clamped_per_axis() {
        let mut ctrl = controller();
        let mut state = DroneState::default();
        state.position = Vector3::new(100.0, 0.0, 0.0);
        for _ in 0..100_000 {
            ctrl.update(&state, &TrajectorySample::default(), 0.0025);
        }
        let lim = TuningProfile::standard().integral_limit;
        assert!(ctrl.integral.x.abs() <= lim.x + 1e-9);
    }

    #[test]
    fn emergency_land_commands_descent() {
        let mut ctrl = controller();
        ctrl.set_mode(ControlMode::EmergencyLand);
        let mut state = DroneState::default();
        state.position = Vector3::new(4.0, 4.0, 20.0);
        let out = ctrl.update(&state, &TrajectorySample::default(), 0.0025);
        assert!(out.fault.is_none());
        // Descending at the configured rate requires less than hover
        // thrust while stationary (Kd pushes downward against zero
        // vertical velocity vs the -0.5 m/s setpoint).
        assert!(out.command.thrust < 1.5 * 9.81);
        // Lateral loop disabled: no torque demand from the 4 m offset.
        assert!(out.command.torque.norm() < 0.2);
    }

    #[test]
    fn torque_respects_per_axis_limits() {
        let mut ctrl = controller();
        let mut state = DroneState::default();
        state.attitude = nalgebra::UnitQuaternion::from_euler_angles(1.2, 0.0, 0.0);
        state.angular_velocity = Vector3::new(20.0, -20.0, 20.0);
        let out = ctrl.update(&state, &TrajectorySample::default(), 0.0025);
        let lim = TuningProfile::standard().torque_limit;
        for i in 0..3 {
            assert!(out.command.torque[i].abs() <= lim[i] + 1e-12);
        }
    }
}
