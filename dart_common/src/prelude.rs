//! Prelude module for common re-exports.
//!
//! Consumers can do `use dart_common::prelude::*;` and get the most
//! important types without listing individual paths.

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, CoordinateFrame, DartConfig, LogLevel};

// ─── Errors & safety events ────────────────────────────────────────
pub use crate::error::{CoreError, SafetyEvent};

// ─── State & commands ──────────────────────────────────────────────
pub use crate::state::{
    ControlCommand, DroneState, MotorCommand, ReferenceTrajectory, StateSnapshot,
    TrajectorySample,
};

// ─── Vehicle ───────────────────────────────────────────────────────
pub use crate::vehicle::VehicleParams;

// ─── System constants ──────────────────────────────────────────────
pub use crate::consts::{DEFAULT_HORIZON, DEFAULT_PLAN_DT, MAX_HORIZON, MAX_MOTORS};
