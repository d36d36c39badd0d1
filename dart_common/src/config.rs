//! Configuration loading and validation.
//!
//! A single TOML document, loaded once at bootstrap and immutable
//! thereafter. Parsing is strict (`deny_unknown_fields` on every
//! section); any missing or out-of-range field aborts startup.
//!
//! # Usage
//!
//! ```rust,no_run
//! use dart_common::config::DartConfig;
//! use std::path::Path;
//!
//! let cfg = DartConfig::load_validated(Path::new("dart.toml")).expect("load config");
//! println!("control rate: {} Hz", cfg.hardware.control_frequency_hz);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::consts::{
    CONTROL_HZ_MAX, CONTROL_HZ_MIN, DEFAULT_CONTROL_HZ, DEFAULT_HORIZON, DEFAULT_PLAN_DT,
    DEFAULT_PLANNING_HZ, DEFAULT_TELEMETRY_HZ, HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS,
    MAX_HORIZON, MAX_MOTORS,
};

/// Log level for configuration.
///
/// Serializes to lowercase strings: "trace", "debug", "info", "warn", "error".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    /// Info-level verbosity (default).
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Filter directive string for `tracing_subscriber::EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Unknown field in TOML (strict parsing with `deny_unknown_fields`).
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// A required secret is absent from the process environment.
    #[error("Missing required environment secret: {0}")]
    MissingSecret(&'static str),
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
/// - Returns `ConfigError::UnknownField` if strict parsing rejects a field
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(format!("{}: {}", path.display(), e))
            }
        })?;

        toml::from_str(&content).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("unknown field") {
                ConfigError::UnknownField(format!("{}: {}", path.display(), msg))
            } else {
                ConfigError::ParseError(format!("{}: {}", path.display(), msg))
            }
        })
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Numeric Bounds Constants ──────────────────────────────────────

/// Maximum vehicle mass [kg].
pub const MAX_MASS: f64 = 50.0;
/// Maximum arm length [m].
pub const MAX_ARM_LENGTH: f64 = 2.0;
/// Maximum configurable velocity limit [m/s].
pub const MAX_VELOCITY_LIMIT: f64 = 30.0;
/// Maximum configurable acceleration limit [m/s²].
pub const MAX_ACCELERATION_LIMIT: f64 = 50.0;
/// Maximum configurable altitude [m].
pub const MAX_ALTITUDE_LIMIT: f64 = 10_000.0;
/// Maximum MPC iterations allowed by config.
pub const MAX_ITERATIONS_LIMIT: u32 = 200;
/// PWM values live in the standard servo microsecond band.
pub const PWM_BAND: (u16, u16) = (800, 2200);

// ─── Coordinate Frame ──────────────────────────────────────────────

/// World coordinate frame convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateFrame {
    /// East-North-Up: +z is up (default).
    Enu,
    /// North-East-Down: +z is down.
    Ned,
}

fn default_frame() -> CoordinateFrame {
    CoordinateFrame::Enu
}

impl CoordinateFrame {
    /// Sign of the "up" direction along the world z axis.
    #[inline]
    pub fn up_sign(&self) -> f64 {
        match self {
            Self::Enu => 1.0,
            Self::Ned => -1.0,
        }
    }
}

// ─── Communication ─────────────────────────────────────────────────

fn default_heartbeat_interval_ms() -> u64 {
    HEARTBEAT_INTERVAL_MS
}
fn default_heartbeat_timeout_ms() -> u64 {
    HEARTBEAT_TIMEOUT_MS
}
fn default_bind_address() -> String {
    "127.0.0.1:14650".to_string()
}

/// Cloud↔edge link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommunicationConfig {
    /// Cloud heartbeat interval [ms] (10..=1000).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Heartbeat timeout before the watchdog degrades [ms] (50..=5000).
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Peer bind address (host:port).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Whether the link is encrypted. When true, the `DART_LINK_KEY`
    /// environment variable must be present at startup.
    #[serde(default)]
    pub encryption: bool,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            bind_address: default_bind_address(),
            encryption: false,
        }
    }
}

impl CommunicationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(10..=1000).contains(&self.heartbeat_interval_ms) {
            return Err(ConfigError::ValidationError(format!(
                "communication.heartbeat_interval_ms={} out of range [10, 1000]",
                self.heartbeat_interval_ms
            )));
        }
        if !(50..=5000).contains(&self.heartbeat_timeout_ms) {
            return Err(ConfigError::ValidationError(format!(
                "communication.heartbeat_timeout_ms={} out of range [50, 5000]",
                self.heartbeat_timeout_ms
            )));
        }
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(ConfigError::ValidationError(format!(
                "communication.heartbeat_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                self.heartbeat_timeout_ms, self.heartbeat_interval_ms
            )));
        }
        if self.bind_address.is_empty() {
            return Err(ConfigError::ValidationError(
                "communication.bind_address cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── Hardware ──────────────────────────────────────────────────────

fn default_baud() -> u32 {
    921_600
}
fn default_connection_path() -> String {
    "sim://".to_string()
}
fn default_control_hz() -> f64 {
    DEFAULT_CONTROL_HZ
}
fn default_planning_hz() -> f64 {
    DEFAULT_PLANNING_HZ
}
fn default_telemetry_hz() -> f64 {
    DEFAULT_TELEMETRY_HZ
}

/// Hardware link and loop-rate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HardwareConfig {
    /// Serial baud rate (ignored by the simulation backend).
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
    /// Backend selector, e.g. `sim://` or `serial:///dev/ttyACM0`.
    #[serde(default = "default_connection_path")]
    pub connection_path: String,
    /// High-rate control loop frequency [Hz] (100..=1000).
    #[serde(default = "default_control_hz")]
    pub control_frequency_hz: f64,
    /// Planner frequency [Hz] (1..=50).
    #[serde(default = "default_planning_hz")]
    pub planning_frequency_hz: f64,
    /// Telemetry frequency [Hz] (1..=100).
    #[serde(default = "default_telemetry_hz")]
    pub telemetry_frequency_hz: f64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud(),
            connection_path: default_connection_path(),
            control_frequency_hz: default_control_hz(),
            planning_frequency_hz: default_planning_hz(),
            telemetry_frequency_hz: default_telemetry_hz(),
        }
    }
}

impl HardwareConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(CONTROL_HZ_MIN..=CONTROL_HZ_MAX).contains(&self.control_frequency_hz) {
            return Err(ConfigError::ValidationError(format!(
                "hardware.control_frequency_hz={} out of range [{CONTROL_HZ_MIN}, {CONTROL_HZ_MAX}]",
                self.control_frequency_hz
            )));
        }
        if !(1.0..=50.0).contains(&self.planning_frequency_hz) {
            return Err(ConfigError::ValidationError(format!(
                "hardware.planning_frequency_hz={} out of range [1, 50]",
                self.planning_frequency_hz
            )));
        }
        if !(1.0..=100.0).contains(&self.telemetry_frequency_hz) {
            return Err(ConfigError::ValidationError(format!(
                "hardware.telemetry_frequency_hz={} out of range [1, 100]",
                self.telemetry_frequency_hz
            )));
        }
        if self.connection_path.is_empty() {
            return Err(ConfigError::ValidationError(
                "hardware.connection_path cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── Planning ──────────────────────────────────────────────────────

fn default_horizon() -> usize {
    DEFAULT_HORIZON
}
fn default_plan_dt() -> f64 {
    DEFAULT_PLAN_DT
}
fn default_max_iterations() -> u32 {
    15
}
fn default_convergence_tolerance() -> f64 {
    0.05
}
fn default_position_weight() -> f64 {
    100.0
}
fn default_velocity_weight() -> f64 {
    10.0
}
fn default_obstacle_weight() -> f64 {
    1000.0
}
fn default_safety_margin() -> f64 {
    1.0
}
fn default_unknown_weight_factor() -> f64 {
    0.5
}

/// SE(3) MPC configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanningConfig {
    /// Prediction horizon N [samples] (2..=MAX_HORIZON).
    #[serde(default = "default_horizon")]
    pub prediction_horizon: usize,
    /// Sample step dt [s] (0.01..=1.0). Must match the consumer's
    /// interpolation step.
    #[serde(default = "default_plan_dt")]
    pub dt: f64,
    /// Maximum optimizer iterations per solve (1..=MAX_ITERATIONS_LIMIT).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Relative cost-improvement convergence threshold.
    #[serde(default = "default_convergence_tolerance")]
    pub convergence_tolerance: f64,
    /// Position tracking weight.
    #[serde(default = "default_position_weight")]
    pub position_weight: f64,
    /// Velocity tracking weight.
    #[serde(default = "default_velocity_weight")]
    pub velocity_weight: f64,
    /// Obstacle barrier weight.
    #[serde(default = "default_obstacle_weight")]
    pub obstacle_weight: f64,
    /// Required clearance from obstacles [m].
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,
    /// Scale applied to the obstacle weight for cells the occupancy
    /// query reports as unknown (0 = treat as free, 1 = as occupied).
    #[serde(default = "default_unknown_weight_factor")]
    pub unknown_weight_factor: f64,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            prediction_horizon: default_horizon(),
            dt: default_plan_dt(),
            max_iterations: default_max_iterations(),
            convergence_tolerance: default_convergence_tolerance(),
            position_weight: default_position_weight(),
            velocity_weight: default_velocity_weight(),
            obstacle_weight: default_obstacle_weight(),
            safety_margin: default_safety_margin(),
            unknown_weight_factor: default_unknown_weight_factor(),
        }
    }
}

impl PlanningConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(2..=MAX_HORIZON).contains(&self.prediction_horizon) {
            return Err(ConfigError::ValidationError(format!(
                "planning.prediction_horizon={} out of range [2, {MAX_HORIZON}]",
                self.prediction_horizon
            )));
        }
        if !(0.01..=1.0).contains(&self.dt) {
            return Err(ConfigError::ValidationError(format!(
                "planning.dt={} out of range [0.01, 1.0]",
                self.dt
            )));
        }
        if !(1..=MAX_ITERATIONS_LIMIT).contains(&self.max_iterations) {
            return Err(ConfigError::ValidationError(format!(
                "planning.max_iterations={} out of range [1, {MAX_ITERATIONS_LIMIT}]",
                self.max_iterations
            )));
        }
        if self.convergence_tolerance <= 0.0 || self.convergence_tolerance >= 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "planning.convergence_tolerance={} out of range (0, 1)",
                self.convergence_tolerance
            )));
        }
        for (name, w) in [
            ("position_weight", self.position_weight),
            ("velocity_weight", self.velocity_weight),
            ("obstacle_weight", self.obstacle_weight),
        ] {
            if w < 0.0 || !w.is_finite() {
                return Err(ConfigError::ValidationError(format!(
                    "planning.{name}={w} must be finite and non-negative"
                )));
            }
        }
        if self.safety_margin < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "planning.safety_margin={} must be non-negative",
                self.safety_margin
            )));
        }
        if !(0.0..=1.0).contains(&self.unknown_weight_factor) {
            return Err(ConfigError::ValidationError(format!(
                "planning.unknown_weight_factor={} out of range [0, 1]",
                self.unknown_weight_factor
            )));
        }
        Ok(())
    }
}

// ─── Safety ────────────────────────────────────────────────────────

fn default_max_velocity() -> f64 {
    15.0
}
fn default_max_acceleration() -> f64 {
    10.0
}
fn default_max_altitude() -> f64 {
    120.0
}
fn default_min_altitude() -> f64 {
    0.0
}
fn default_emergency_landing_velocity() -> f64 {
    0.5
}
fn default_max_safety_violations() -> u32 {
    10
}

/// Flight envelope and failsafe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SafetyConfig {
    /// Velocity limit [m/s].
    #[serde(default = "default_max_velocity")]
    pub max_velocity: f64,
    /// Acceleration limit [m/s²].
    #[serde(default = "default_max_acceleration")]
    pub max_acceleration: f64,
    /// Ceiling [m].
    #[serde(default = "default_max_altitude")]
    pub max_altitude: f64,
    /// Floor [m].
    #[serde(default = "default_min_altitude")]
    pub min_altitude: f64,
    /// Constant descent rate in Emergency-Land [m/s].
    #[serde(default = "default_emergency_landing_velocity")]
    pub emergency_landing_velocity: f64,
    /// Violation count that trips the Degraded transition at half, and
    /// contributes to Emergency escalation at full.
    #[serde(default = "default_max_safety_violations")]
    pub max_safety_violations: u32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_velocity: default_max_velocity(),
            max_acceleration: default_max_acceleration(),
            max_altitude: default_max_altitude(),
            min_altitude: default_min_altitude(),
            emergency_landing_velocity: default_emergency_landing_velocity(),
            max_safety_violations: default_max_safety_violations(),
        }
    }
}

impl SafetyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_velocity <= 0.0 || self.max_velocity > MAX_VELOCITY_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "safety.max_velocity={} out of range (0, {MAX_VELOCITY_LIMIT}]",
                self.max_velocity
            )));
        }
        if self.max_acceleration <= 0.0 || self.max_acceleration > MAX_ACCELERATION_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "safety.max_acceleration={} out of range (0, {MAX_ACCELERATION_LIMIT}]",
                self.max_acceleration
            )));
        }
        if self.min_altitude >= self.max_altitude {
            return Err(ConfigError::ValidationError(format!(
                "safety.min_altitude ({}) must be < max_altitude ({})",
                self.min_altitude, self.max_altitude
            )));
        }
        if self.max_altitude > MAX_ALTITUDE_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "safety.max_altitude={} exceeds {MAX_ALTITUDE_LIMIT}",
                self.max_altitude
            )));
        }
        if self.emergency_landing_velocity <= 0.0 || self.emergency_landing_velocity > 5.0 {
            return Err(ConfigError::ValidationError(format!(
                "safety.emergency_landing_velocity={} out of range (0, 5]",
                self.emergency_landing_velocity
            )));
        }
        if !(1..=1000).contains(&self.max_safety_violations) {
            return Err(ConfigError::ValidationError(format!(
                "safety.max_safety_violations={} out of range [1, 1000]",
                self.max_safety_violations
            )));
        }
        Ok(())
    }
}

// ─── Vehicle ───────────────────────────────────────────────────────

/// Motor geometry layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorLayout {
    /// 4 motors on the diagonals (default).
    QuadX,
    /// 4 motors on the body axes.
    QuadPlus,
}

fn default_layout() -> MotorLayout {
    MotorLayout::QuadX
}
fn default_gravity() -> f64 {
    9.81
}
fn default_pwm_idle() -> u16 {
    1100
}
fn default_pwm_min() -> u16 {
    1000
}
fn default_pwm_max() -> u16 {
    2000
}
fn default_pwm_scaling() -> f64 {
    200.0
}
// Matches the built-in arm ordering (front-right, back-left,
// front-left, back-right): diagonal pairs spin together.
fn default_motor_directions() -> Vec<i8> {
    vec![1, 1, -1, -1]
}

/// Physical vehicle description. Converted into the immutable
/// [`crate::vehicle::VehicleParams`] at bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VehicleConfig {
    /// Takeoff mass [kg].
    pub mass: f64,
    /// Gravitational acceleration [m/s²].
    #[serde(default = "default_gravity")]
    pub gravity: f64,
    /// Body inertia matrix rows [kg·m²].
    pub inertia: [[f64; 3]; 3],
    /// Motor arm length [m].
    pub arm_length: f64,
    /// Number of motors K (must match layout).
    pub num_motors: usize,
    /// Motor layout.
    #[serde(default = "default_layout")]
    pub layout: MotorLayout,
    /// Spin direction per motor (+1 CCW / −1 CW), length K.
    #[serde(default = "default_motor_directions")]
    pub motor_directions: Vec<i8>,
    /// Thrust coefficient [N per normalized unit²].
    pub thrust_coefficient: f64,
    /// Yaw torque coefficient [N·m per N of thrust].
    pub torque_coefficient: f64,
    /// Idle PWM [µs].
    #[serde(default = "default_pwm_idle")]
    pub pwm_idle: u16,
    /// Minimum PWM [µs].
    #[serde(default = "default_pwm_min")]
    pub pwm_min: u16,
    /// Maximum PWM [µs].
    #[serde(default = "default_pwm_max")]
    pub pwm_max: u16,
    /// PWM microseconds per sqrt(N) of per-motor thrust.
    #[serde(default = "default_pwm_scaling")]
    pub pwm_scaling_factor: f64,
}

impl VehicleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mass <= 0.0 || self.mass > MAX_MASS {
            return Err(ConfigError::ValidationError(format!(
                "vehicle.mass={} out of range (0, {MAX_MASS}]",
                self.mass
            )));
        }
        if !(1.0..=25.0).contains(&self.gravity) {
            return Err(ConfigError::ValidationError(format!(
                "vehicle.gravity={} out of range [1, 25]",
                self.gravity
            )));
        }
        if self.arm_length <= 0.0 || self.arm_length > MAX_ARM_LENGTH {
            return Err(ConfigError::ValidationError(format!(
                "vehicle.arm_length={} out of range (0, {MAX_ARM_LENGTH}]",
                self.arm_length
            )));
        }
        let expected = match self.layout {
            MotorLayout::QuadX | MotorLayout::QuadPlus => 4,
        };
        if self.num_motors != expected {
            return Err(ConfigError::ValidationError(format!(
                "vehicle.num_motors={} does not match layout ({expected} expected)",
                self.num_motors
            )));
        }
        if self.num_motors > MAX_MOTORS {
            return Err(ConfigError::ValidationError(format!(
                "vehicle.num_motors={} exceeds {MAX_MOTORS}",
                self.num_motors
            )));
        }
        if self.motor_directions.len() != self.num_motors {
            return Err(ConfigError::ValidationError(format!(
                "vehicle.motor_directions has {} entries, expected {}",
                self.motor_directions.len(),
                self.num_motors
            )));
        }
        if self.motor_directions.iter().any(|d| *d != 1 && *d != -1) {
            return Err(ConfigError::ValidationError(
                "vehicle.motor_directions entries must be +1 or -1".to_string(),
            ));
        }
        if self.thrust_coefficient <= 0.0 || self.torque_coefficient <= 0.0 {
            return Err(ConfigError::ValidationError(
                "vehicle thrust/torque coefficients must be positive".to_string(),
            ));
        }
        let (lo, hi) = PWM_BAND;
        for (name, v) in [
            ("pwm_idle", self.pwm_idle),
            ("pwm_min", self.pwm_min),
            ("pwm_max", self.pwm_max),
        ] {
            if !(lo..=hi).contains(&v) {
                return Err(ConfigError::ValidationError(format!(
                    "vehicle.{name}={v} out of range [{lo}, {hi}]"
                )));
            }
        }
        if !(self.pwm_min <= self.pwm_idle && self.pwm_idle < self.pwm_max) {
            return Err(ConfigError::ValidationError(format!(
                "vehicle PWM ordering violated: min={} idle={} max={}",
                self.pwm_min, self.pwm_idle, self.pwm_max
            )));
        }
        if self.pwm_scaling_factor <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "vehicle.pwm_scaling_factor={} must be positive",
                self.pwm_scaling_factor
            )));
        }
        // Inertia must be symmetric with positive diagonal.
        let j = &self.inertia;
        for i in 0..3 {
            if j[i][i] <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "vehicle.inertia diagonal element [{i}][{i}]={} must be positive",
                    j[i][i]
                )));
            }
            for k in (i + 1)..3 {
                if (j[i][k] - j[k][i]).abs() > 1e-9 {
                    return Err(ConfigError::ValidationError(
                        "vehicle.inertia must be symmetric".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

// ─── Root Config ───────────────────────────────────────────────────

/// Top-level DART configuration — loaded from a single TOML document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DartConfig {
    /// Log verbosity; overridable via `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    /// World frame convention.
    #[serde(default = "default_frame")]
    pub coordinate_frame: CoordinateFrame,
    /// Cloud↔edge link.
    #[serde(default)]
    pub communication: CommunicationConfig,
    /// Hardware link and loop rates.
    #[serde(default)]
    pub hardware: HardwareConfig,
    /// MPC parameters.
    #[serde(default)]
    pub planning: PlanningConfig,
    /// Flight envelope and failsafe limits.
    #[serde(default)]
    pub safety: SafetyConfig,
    /// Physical vehicle description (required — no sensible default).
    pub vehicle: VehicleConfig,
}

/// Environment variable holding the link encryption key.
pub const LINK_KEY_ENV: &str = "DART_LINK_KEY";

impl DartConfig {
    /// Validate all sections and cross-section constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.communication.validate()?;
        self.hardware.validate()?;
        self.planning.validate()?;
        self.safety.validate()?;
        self.vehicle.validate()?;

        // The planner's velocity box must not exceed the safety envelope.
        if self.safety.max_velocity > MAX_VELOCITY_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "safety.max_velocity={} exceeds {MAX_VELOCITY_LIMIT}",
                self.safety.max_velocity
            )));
        }
        Ok(())
    }

    /// Resolve secrets from the process environment.
    ///
    /// Secrets never come from the configuration file. Absence of a
    /// required secret aborts startup.
    pub fn resolve_secrets(&self) -> Result<(), ConfigError> {
        if self.encryption_enabled() && std::env::var(LINK_KEY_ENV).is_err() {
            return Err(ConfigError::MissingSecret(LINK_KEY_ENV));
        }
        Ok(())
    }

    #[inline]
    pub fn encryption_enabled(&self) -> bool {
        self.communication.encryption
    }

    /// Load, validate and resolve secrets in one step.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let cfg = Self::load(path)?;
        cfg.validate()?;
        cfg.resolve_secrets()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn quad_vehicle() -> VehicleConfig {
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

    fn full_config() -> DartConfig {
        DartConfig {
            log_level: LogLevel::Info,
            coordinate_frame: CoordinateFrame::Enu,
            communication: CommunicationConfig::default(),
            hardware: HardwareConfig::default(),
            planning: PlanningConfig::default(),
            safety: SafetyConfig::default(),
            vehicle: quad_vehicle(),
        }
    }

    #[test]
    fn default_sections_validate() {
        assert!(full_config().validate().is_ok());
    }

    #[test]
    fn heartbeat_timeout_must_exceed_interval() {
        let mut cfg = full_config();
        cfg.communication.heartbeat_interval_ms = 500;
        cfg.communication.heartbeat_timeout_ms = 500;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn control_rate_bounds_enforced() {
        let mut cfg = full_config();
        cfg.hardware.control_frequency_hz = 2000.0;
        assert!(cfg.validate().is_err());
        cfg.hardware.control_frequency_hz = 50.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn altitude_band_must_be_ordered() {
        let mut cfg = full_config();
        cfg.safety.min_altitude = 10.0;
        cfg.safety.max_altitude = 5.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn motor_directions_must_match_count() {
        let mut cfg = full_config();
        cfg.vehicle.motor_directions = vec![1, -1, 1];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn pwm_ordering_enforced() {
        let mut cfg = full_config();
        cfg.vehicle.pwm_idle = 2100;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn asymmetric_inertia_rejected() {
        let mut cfg = full_config();
        cfg.vehicle.inertia[0][1] = 0.01;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_file_not_found() {
        let result = DartConfig::load(Path::new("/nonexistent/dart.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn load_rejects_unknown_field() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[vehicle]
mass = 1.5
inertia = [[0.02, 0.0, 0.0], [0.0, 0.02, 0.0], [0.0, 0.0, 0.04]]
arm_length = 0.25
num_motors = 4
thrust_coefficient = 1.0e-5
torque_coefficient = 0.016
bogus_field = 42
"#
        )
        .unwrap();
        file.flush().unwrap();

        let result = DartConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::UnknownField(_))));
    }

    #[test]
    fn load_minimal_document_with_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[vehicle]
mass = 1.5
inertia = [[0.02, 0.0, 0.0], [0.0, 0.02, 0.0], [0.0, 0.0, 0.04]]
arm_length = 0.25
num_motors = 4
thrust_coefficient = 1.0e-5
torque_coefficient = 0.016
"#
        )
        .unwrap();
        file.flush().unwrap();

        let cfg = DartConfig::load(file.path()).unwrap();
        assert_eq!(cfg.log_level, LogLevel::Info);
        assert_eq!(cfg.coordinate_frame, CoordinateFrame::Enu);
        assert_eq!(cfg.planning.prediction_horizon, DEFAULT_HORIZON);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_secret_aborts_when_encrypted() {
        let mut cfg = full_config();
        cfg.communication.encryption = true;
        std::env::remove_var(LINK_KEY_ENV);
        assert!(matches!(
            cfg.resolve_secrets(),
            Err(ConfigError::MissingSecret(_))
        ));
    }

    #[test]
    fn frame_up_sign() {
        assert_eq!(CoordinateFrame::Enu.up_sign(), 1.0);
        assert_eq!(CoordinateFrame::Ned.up_sign(), -1.0);
    }
}
