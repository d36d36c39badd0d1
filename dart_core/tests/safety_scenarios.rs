//! Failsafe scenarios spanning watchdog, planner, mixer and controller.

use nalgebra::Vector3;
use std::time::{Duration, Instant};

use dart_common::config::{MotorLayout, PlanningConfig, SafetyConfig, VehicleConfig};
use dart_common::error::{CoreError, SafetyEvent};
use dart_common::state::ControlCommand;
use dart_common::vehicle::VehicleParams;
use dart_core::mixer::MotorMixer;
use dart_core::planner::obstacles::{ObstacleQuery, ObstacleSample};
use dart_core::planner::{GoalState, PlanStatus, Se3Mpc};
use dart_core::watchdog::{FlightMode, SafetyWatchdog, WatchdogParams};

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

fn watchdog() -> SafetyWatchdog {
    SafetyWatchdog::new(WatchdogParams {
        heartbeat_timeout: Duration::from_millis(500),
        max_safety_violations: 10,
    })
}

/// One second of nominal heartbeats, then silence: Autonomous at half a
/// second past the last beat, Emergency a second later.
#[test]
fn heartbeat_loss_walks_down_the_failsafe_ladder() {
    let wd = watchdog();
    let t0 = Instant::now();
    let ms = |m: u64| t0 + Duration::from_millis(m);

    // Nominal phase: beats every 100 ms for 1 s, ticking at 100 Hz.
    for i in 0..=10u64 {
        wd.on_heartbeat_at("cloud", ms(i * 100));
    }
    for i in 0..100u64 {
        wd.tick(ms(i * 10));
    }
    assert_eq!(wd.current_state(), FlightMode::Nominal);

    // Last beat was at t = 1000 ms. At t = 1500 ms the 500 ms timeout
    // has just expired.
    wd.tick(ms(1501));
    assert_eq!(wd.current_state(), FlightMode::Autonomous);

    // At t = 2500 ms the silence exceeds 3 × timeout.
    wd.tick(ms(2501));
    assert_eq!(wd.current_state(), FlightMode::Emergency);

    // Terminal until an external reset.
    wd.on_heartbeat_at("cloud", ms(2600));
    wd.tick(ms(2601));
    assert_eq!(wd.current_state(), FlightMode::Emergency);
    wd.reset();
    assert_eq!(wd.current_state(), FlightMode::Nominal);
}

/// Mixer faults propagate to the watchdog as recordable events: a
/// non-finite command as CommandNonFinite, an idle-while-thrust
/// violation as an actuator fault.
#[test]
fn mixer_faults_reach_the_watchdog() {
    let wd = watchdog();
    let mut mixer = MotorMixer::new(vehicle()).unwrap();

    // Healthy mixer handles a real thrust demand without faulting.
    let cmd = ControlCommand {
        thrust: 10.0,
        torque: Vector3::zeros(),
        timestamp: 0.0,
    };
    assert!(mixer.mix(&cmd).is_ok());

    // Non-finite command → CommandInvalid → CommandNonFinite event.
    let bad = ControlCommand {
        thrust: f64::NAN,
        ..cmd
    };
    let err = mixer.mix(&bad).unwrap_err();
    assert!(matches!(err, CoreError::CommandInvalid(_)));
    wd.observe(err.safety_event().expect("maps to a safety event"));
    assert_eq!(wd.event_count(SafetyEvent::CommandNonFinite), 1);

    // Idle-while-thrust surfaces as a safety violation, which the
    // watchdog records as an actuator fault.
    let idle_fault = CoreError::SafetyViolation(
        "all motors idle while thrust 10 N requested".to_string(),
    );
    wd.observe(idle_fault.safety_event().expect("maps to a safety event"));
    assert_eq!(wd.event_count(SafetyEvent::EscFault), 1);
}

/// Repeated non-finite commands escalate to Emergency.
#[test]
fn repeated_command_invalid_escalates() {
    let wd = watchdog();
    let mut mixer = MotorMixer::new(vehicle()).unwrap();
    let bad = ControlCommand {
        thrust: f64::INFINITY,
        torque: Vector3::zeros(),
        timestamp: 0.0,
    };
    for _ in 0..3 {
        let err = mixer.mix(&bad).unwrap_err();
        wd.observe(err.safety_event().unwrap());
    }
    assert_eq!(wd.current_state(), FlightMode::Emergency);
}

/// A pathological obstacle field pushes the solve past the hard cap:
/// the planner returns the warm-started previous solution, the outcome
/// is visible as degraded, and the watchdog degrades after the second
/// consecutive miss.
#[test]
fn planner_deadline_cap_degrades_gracefully() {
    struct PathologicalField;
    impl ObstacleQuery for PathologicalField {
        fn query(&self, _p: &Vector3<f64>) -> ObstacleSample {
            std::thread::sleep(Duration::from_millis(2));
            ObstacleSample::FREE
        }
    }

    let wd = watchdog();
    let mut planner = Se3Mpc::new(
        PlanningConfig::default(),
        SafetyConfig::default(),
        Duration::from_millis(10),
    );
    let state = dart_common::state::DroneState::default();
    let goal = GoalState::hover_at(Vector3::new(5.0, 0.0, 2.0), 0.0);

    for i in 0..2 {
        let outcome = planner.plan(&state, &goal, &PathologicalField);
        assert_eq!(outcome.status, PlanStatus::DeadlineMiss, "solve {i}");
        assert!(outcome.error().is_some());
        // The fallback is still a full-horizon trajectory the
        // controller can keep tracking without discontinuity.
        assert_eq!(
            outcome.trajectory.len(),
            PlanningConfig::default().prediction_horizon
        );
        wd.on_planner_deadline(true);
    }
    assert_eq!(wd.current_state(), FlightMode::Degraded);
    assert_eq!(planner.stats().deadline_misses, 2);
}

/// Envelope violations while autonomous go straight to Emergency.
#[test]
fn envelope_violation_in_autonomous_is_terminal() {
    let wd = watchdog();
    let t0 = Instant::now();
    wd.on_heartbeat_at("cloud", t0);
    wd.tick(t0 + Duration::from_millis(600));
    assert_eq!(wd.current_state(), FlightMode::Autonomous);

    wd.observe_at(
        SafetyEvent::AltitudeLimitExceeded,
        t0 + Duration::from_millis(650),
    );
    assert_eq!(wd.current_state(), FlightMode::Emergency);
}
