//! Simulated vehicle backend.
//!
//! Rigid-body quadrotor physics driven by the motor frames the core
//! sends: the PWM curve is inverted to per-motor thrust, the wrench is
//! assembled from the motor geometry, and the body state is integrated
//! with a ground clamp. Good enough to close the loop end-to-end with
//! no hardware attached; not a substitute for a real aerodynamics
//! model.

use nalgebra::{UnitQuaternion, Vector3};
use parking_lot::Mutex;
use tracing::debug;

use dart_common::state::{DroneState, MotorCommand};
use dart_common::vehicle::VehicleParams;

use crate::{AdapterError, Capabilities, Capability, HardwareAdapter};

struct SimState {
    connected: bool,
    estopped: bool,
    t: f64,
    position: Vector3<f64>,
    velocity: Vector3<f64>,
    attitude: UnitQuaternion<f64>,
    angular_velocity: Vector3<f64>,
    /// Last commanded per-motor thrust [N].
    motor_thrust: [f64; dart_common::consts::MAX_MOTORS],
}

/// Software-in-the-loop adapter.
pub struct SimAdapter {
    params: VehicleParams,
    state: Mutex<SimState>,
}

impl SimAdapter {
    pub fn new(params: VehicleParams) -> Self {
        let state = SimState {
            connected: false,
            estopped: false,
            t: 0.0,
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            attitude: UnitQuaternion::identity(),
            angular_velocity: Vector3::zeros(),
            motor_thrust: [0.0; dart_common::consts::MAX_MOTORS],
        };
        Self {
            params,
            state: Mutex::new(state),
        }
    }

    /// Place the vehicle (tests and scenario setup).
    pub fn set_position(&self, position: Vector3<f64>) {
        self.state.lock().position = position;
    }

    /// Invert the mixer's PWM curve back to thrust.
    fn pwm_to_thrust(&self, pwm: u16) -> f64 {
        let p = &self.params;
        if pwm <= p.pwm_idle {
            return 0.0;
        }
        let span = (pwm - p.pwm_idle) as f64;
        (span / p.pwm_scaling_factor).powi(2)
    }

    /// Advance the physics by `dt` seconds. Driven by the edge runtime
    /// at the control rate.
    pub fn step(&self, dt: f64) {
        let p = &self.params;
        let mut s = self.state.lock();
        if !s.connected || dt <= 0.0 {
            return;
        }

        // Wrench from the per-motor thrusts.
        let mut thrust_total = 0.0;
        let mut torque = Vector3::zeros();
        for (i, geo) in p.motors().iter().enumerate() {
            let f = s.motor_thrust[i];
            thrust_total += f;
            // Roll/pitch from the arm lever, yaw from the spin drag.
            torque.x += geo.arm.y * f;
            torque.y += -geo.arm.x * f;
            torque.z += geo.direction * p.torque_coefficient * f;
        }

        // Translational dynamics, world frame (z up).
        let body_z = s.attitude * Vector3::z();
        let accel = body_z * (thrust_total / p.mass) - Vector3::new(0.0, 0.0, p.gravity);
        s.velocity += accel * dt;
        let v = s.velocity;
        s.position += v * dt;

        // Ground clamp.
        if s.position.z < 0.0 {
            s.position.z = 0.0;
            s.velocity = Vector3::zeros();
            s.angular_velocity = Vector3::zeros();
        }

        // Rotational dynamics, body frame.
        let omega = s.angular_velocity;
        let omega_dot = p.inertia_inv * (torque - omega.cross(&(p.inertia * omega)));
        s.angular_velocity += omega_dot * dt;
        let delta = UnitQuaternion::from_scaled_axis(s.angular_velocity * dt);
        s.attitude = s.attitude * delta;

        s.t += dt;
    }
}

impl HardwareAdapter for SimAdapter {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn connect(&self) -> Result<(), AdapterError> {
        let mut s = self.state.lock();
        s.connected = true;
        debug!("simulation backend connected");
        Ok(())
    }

    fn disconnect(&self) -> Result<(), AdapterError> {
        self.state.lock().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn send_command(&self, cmd: &MotorCommand) -> Result<(), AdapterError> {
        let mut s = self.state.lock();
        if !s.connected {
            return Err(AdapterError::NotConnected);
        }
        if s.estopped {
            // Motors are cut; frames are accepted and discarded.
            return Ok(());
        }
        if cmd.count != self.params.motor_count {
            return Err(AdapterError::Fault(format!(
                "frame carries {} motors, vehicle has {}",
                cmd.count, self.params.motor_count
            )));
        }
        for (i, pwm) in cmd.pwm().iter().enumerate() {
            s.motor_thrust[i] = self.pwm_to_thrust(*pwm);
        }
        Ok(())
    }

    fn get_state(&self) -> Result<DroneState, AdapterError> {
        let s = self.state.lock();
        if !s.connected {
            return Err(AdapterError::NotConnected);
        }
        Ok(DroneState {
            t: s.t,
            position: s.position,
            velocity: s.velocity,
            attitude: s.attitude,
            angular_velocity: s.angular_velocity,
        })
    }

    fn emergency_stop(&self) -> Result<(), AdapterError> {
        let mut s = self.state.lock();
        s.estopped = true;
        s.motor_thrust = [0.0; dart_common::consts::MAX_MOTORS];
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supported: Capability::MOTOR_COMMAND
                | Capability::STATE_ESTIMATE
                | Capability::EMERGENCY_STOP,
            simulated: true,
            max_velocity: 20.0,
            motor_channels: self.params.motor_count,
        }
    }
}
