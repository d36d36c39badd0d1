//! System-wide constants for the DART workspace.
//!
//! Single source of truth for all numeric limits and defaults.
//! Imported by all crates — no duplication permitted.

/// Maximum number of motors supported by the mixer and wire format.
pub const MAX_MOTORS: usize = 8;

/// Maximum MPC prediction horizon (samples).
pub const MAX_HORIZON: usize = 32;

/// Default MPC prediction horizon (samples).
pub const DEFAULT_HORIZON: usize = 8;

/// Default MPC sample step [s].
pub const DEFAULT_PLAN_DT: f64 = 0.1;

/// Default control loop frequency [Hz].
pub const DEFAULT_CONTROL_HZ: f64 = 400.0;

/// Minimum allowed control loop frequency [Hz].
pub const CONTROL_HZ_MIN: f64 = 100.0;

/// Maximum allowed control loop frequency [Hz].
pub const CONTROL_HZ_MAX: f64 = 1000.0;

/// Default planning frequency [Hz].
pub const DEFAULT_PLANNING_HZ: f64 = 10.0;

/// Default telemetry frequency [Hz].
pub const DEFAULT_TELEMETRY_HZ: f64 = 10.0;

/// Default cloud heartbeat interval [ms].
pub const HEARTBEAT_INTERVAL_MS: u64 = 100;

/// Default cloud heartbeat timeout [ms].
pub const HEARTBEAT_TIMEOUT_MS: u64 = 500;

/// Planner soft deadline [ms] at the default 10 Hz planning rate.
pub const PLAN_BUDGET_MS: u64 = 50;

/// Planner hard wall-clock cap [ms].
pub const PLAN_HARD_CAP_MS: u64 = 80;

/// Unit-quaternion norm tolerance for state validation.
pub const QUAT_NORM_TOL: f64 = 1e-6;
