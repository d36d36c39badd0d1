//! Closed-loop control scenarios against the simulated vehicle.
//!
//! Controller → mixer → simulated physics → estimate, at the nominal
//! 400 Hz control rate. These are the end-to-end behaviors the high-rate
//! path must deliver before any scheduling or networking is layered on
//! top.

use approx::assert_relative_eq;
use nalgebra::Vector3;

use dart_common::config::{MotorLayout, VehicleConfig};
use dart_common::state::TrajectorySample;
use dart_common::vehicle::VehicleParams;
use dart_core::control::{ControlMode, GeometricController, TuningProfile};
use dart_core::mixer::MotorMixer;
use dart_hal::sim::SimAdapter;
use dart_hal::HardwareAdapter;

const DT: f64 = 0.0025; // 400 Hz

fn vehicle() -> VehicleParams {
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

struct Loop {
    sim: SimAdapter,
    controller: GeometricController,
    mixer: MotorMixer,
}

impl Loop {
    fn new(start: Vector3<f64>) -> Self {
        let params = vehicle();
        let sim = SimAdapter::new(params.clone());
        sim.connect().unwrap();
        sim.set_position(start);
        Self {
            sim,
            controller: GeometricController::new(params.clone(), TuningProfile::standard(), 0.5),
            mixer: MotorMixer::new(params).unwrap(),
        }
    }

    /// Run one cycle; returns the state used for the control decision
    /// and the commanded collective thrust.
    fn cycle(&mut self, reference: &TrajectorySample) -> (dart_common::state::DroneState, f64) {
        let state = self.sim.get_state().unwrap();
        let out = self.controller.update(&state, reference, DT);
        assert!(out.fault.is_none(), "unexpected fault: {:?}", out.fault);
        let cmd = self.mixer.mix(&out.command).unwrap();
        self.sim.send_command(&cmd).unwrap();
        self.sim.step(DT);
        (state, out.command.thrust)
    }
}

#[test]
fn hover_holds_position_within_a_centimeter() {
    let start = Vector3::new(0.0, 0.0, 1.0);
    let mut sim_loop = Loop::new(start);
    let reference = TrajectorySample::hover_at(start, 0.0);

    let mut max_offset: f64 = 0.0;
    let mut thrusts = Vec::new();
    for _ in 0..400 {
        let (state, thrust) = sim_loop.cycle(&reference);
        max_offset = max_offset.max((state.position - start).norm());
        thrusts.push(thrust);
    }

    assert!(max_offset <= 0.01, "drifted {max_offset} m from hover");
    // Commanded thrust averages m·g within 1%.
    let mean_thrust: f64 = thrusts.iter().sum::<f64>() / thrusts.len() as f64;
    assert_relative_eq!(mean_thrust, 1.5 * 9.81, max_relative = 0.01);
}

#[test]
fn step_response_meets_overshoot_and_settling() {
    let start = Vector3::new(0.0, 0.0, 1.0);
    let mut sim_loop = Loop::new(start);

    // Settle at the start point first.
    let hold = TrajectorySample::hover_at(start, 0.0);
    for _ in 0..400 {
        sim_loop.cycle(&hold);
    }

    // Reference jumps to (5, 0, 1).
    let target = Vector3::new(5.0, 0.0, 1.0);
    let step = TrajectorySample::hover_at(target, 0.0);
    let mut max_x: f64 = f64::MIN;
    let mut max_yaw: f64 = 0.0;
    let mut final_state = None;
    for _ in 0..1200 {
        // 3 s
        let (state, _) = sim_loop.cycle(&step);
        max_x = max_x.max(state.position.x);
        let (_, _, yaw) = state.euler_angles();
        max_yaw = max_yaw.max(yaw.abs());
        final_state = Some(state);
    }
    let final_state = final_state.unwrap();

    // Overshoot ≤ 10 % of the 5 m step.
    assert!(max_x <= 5.5, "overshoot to {max_x} m");
    // Settled within 3 s.
    assert!(
        (final_state.position.x - 5.0).abs() <= 0.25,
        "x at 3 s: {}",
        final_state.position.x
    );
    assert!(final_state.velocity.norm() < 0.5);
    // Heading stays put through the translation.
    assert!(max_yaw <= 0.05, "yaw deviated {max_yaw} rad");
}

#[test]
fn saturating_thrust_request_clips_all_motors() {
    let params = vehicle();
    let mut mixer = MotorMixer::new(params.clone()).unwrap();
    let cmd = dart_common::state::ControlCommand {
        thrust: 4.0 * params.mass * params.gravity * 4.0,
        torque: Vector3::zeros(),
        timestamp: 0.0,
    };
    let out = mixer.mix(&cmd).unwrap();
    assert!(out.pwm().iter().all(|p| *p == params.pwm_max));
    assert_eq!(mixer.stats().saturation_events, 4);
    // Saturation is not an idle fault.
    assert_eq!(mixer.stats().idle_faults, 0);
}

#[test]
fn emergency_land_descends_at_configured_rate() {
    let start = Vector3::new(2.0, -1.0, 10.0);
    let mut sim_loop = Loop::new(start);
    sim_loop.controller.set_mode(ControlMode::EmergencyLand);
    let reference = TrajectorySample::hover_at(start, 0.0);

    // Let the descent reach steady state, then measure.
    for _ in 0..800 {
        sim_loop.cycle(&reference);
    }
    let mut vz_sum = 0.0;
    let mut n = 0;
    for _ in 0..400 {
        let (state, _) = sim_loop.cycle(&reference);
        vz_sum += state.velocity.z;
        n += 1;
    }
    let vz_mean = vz_sum / n as f64;
    // Constant descent at the configured 0.5 m/s, lateral loop off.
    assert_relative_eq!(vz_mean, -0.5, epsilon = 0.1);
}

#[test]
fn hold_mode_zeroes_the_velocity_setpoint() {
    let start = Vector3::new(0.0, 0.0, 2.0);
    let mut sim_loop = Loop::new(start);
    sim_loop.controller.set_mode(ControlMode::Hold);

    // Reference carries a velocity the Hold mode must ignore.
    let moving_reference = TrajectorySample {
        position: [0.0, 0.0, 2.0],
        velocity: [3.0, 0.0, 0.0],
        ..Default::default()
    };
    for _ in 0..800 {
        sim_loop.cycle(&moving_reference);
    }
    let state = sim_loop.sim.get_state().unwrap();
    assert!(state.velocity.norm() < 0.1);
    assert!((state.position - start).norm() < 0.1);
}
