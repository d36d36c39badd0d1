//! Configuration loading round-trips on complete TOML documents.

use std::io::Write;
use tempfile::NamedTempFile;

use dart_common::config::{ConfigError, CoordinateFrame, DartConfig, LogLevel};

const FULL_DOCUMENT: &str = r#"
log_level = "debug"
coordinate_frame = "enu"

[communication]
heartbeat_interval_ms = 100
heartbeat_timeout_ms = 500
bind_address = "127.0.0.1:14650"
encryption = false

[hardware]
baud_rate = 921600
connection_path = "sim://"
control_frequency_hz = 400.0
planning_frequency_hz = 10.0
telemetry_frequency_hz = 10.0

[planning]
prediction_horizon = 8
dt = 0.1
max_iterations = 15
convergence_tolerance = 0.05
position_weight = 100.0
velocity_weight = 10.0
obstacle_weight = 1000.0
safety_margin = 1.0
unknown_weight_factor = 0.5

[safety]
max_velocity = 15.0
max_acceleration = 10.0
max_altitude = 120.0
min_altitude = 0.0
emergency_landing_velocity = 0.5
max_safety_violations = 10

[vehicle]
mass = 1.5
gravity = 9.81
inertia = [[0.02, 0.0, 0.0], [0.0, 0.02, 0.0], [0.0, 0.0, 0.04]]
arm_length = 0.25
num_motors = 4
layout = "quad_x"
motor_directions = [1, 1, -1, -1]
thrust_coefficient = 1.0e-5
torque_coefficient = 0.016
pwm_idle = 1100
pwm_min = 1000
pwm_max = 2000
pwm_scaling_factor = 200.0
"#;

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn full_document_loads_and_validates() {
    let file = write_temp(FULL_DOCUMENT);
    let cfg = DartConfig::load_validated(file.path()).unwrap();
    assert_eq!(cfg.log_level, LogLevel::Debug);
    assert_eq!(cfg.coordinate_frame, CoordinateFrame::Enu);
    assert_eq!(cfg.communication.heartbeat_timeout_ms, 500);
    assert_eq!(cfg.hardware.control_frequency_hz, 400.0);
    assert_eq!(cfg.planning.prediction_horizon, 8);
    assert_eq!(cfg.safety.max_velocity, 15.0);
    assert_eq!(cfg.vehicle.num_motors, 4);
}

#[test]
fn ned_frame_is_accepted() {
    let doc = FULL_DOCUMENT.replace("coordinate_frame = \"enu\"", "coordinate_frame = \"ned\"");
    let file = write_temp(&doc);
    let cfg = DartConfig::load_validated(file.path()).unwrap();
    assert_eq!(cfg.coordinate_frame, CoordinateFrame::Ned);
    assert_eq!(cfg.coordinate_frame.up_sign(), -1.0);
}

#[test]
fn out_of_range_field_aborts() {
    let doc = FULL_DOCUMENT.replace("max_velocity = 15.0", "max_velocity = 100.0");
    let file = write_temp(&doc);
    let err = DartConfig::load_validated(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError(_)));
    assert!(err.to_string().contains("max_velocity"));
}

#[test]
fn missing_required_section_aborts() {
    // Strip the [vehicle] section: there is no sensible default for it.
    let doc = FULL_DOCUMENT
        .split("[vehicle]")
        .next()
        .unwrap()
        .to_string();
    let file = write_temp(&doc);
    let err = DartConfig::load_validated(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError(_)));
}

#[test]
fn unknown_field_aborts() {
    let doc = format!("{FULL_DOCUMENT}\n[surprise]\nvalue = 1\n");
    let file = write_temp(&doc);
    let err = DartConfig::load_validated(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownField(_)));
}

#[test]
fn wrong_layout_motor_count_aborts() {
    let doc = FULL_DOCUMENT.replace("num_motors = 4", "num_motors = 6");
    let file = write_temp(&doc);
    assert!(DartConfig::load_validated(file.path()).is_err());
}
