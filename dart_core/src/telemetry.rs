//! Aggregated runtime telemetry.
//!
//! Assembled by the Low-priority telemetry task from read-only
//! snapshots of the other components and serialized as one JSON object
//! per emission. The core publishes structure only; compression and
//! transport belong to external collaborators.

use serde::Serialize;

use crate::buffer::BufferStatsSnapshot;
use crate::control::ControlMode;
use crate::mixer::MixerStats;
use crate::planner::{PlanStatus, PlannerStats};
use crate::sched::TaskStatsSnapshot;
use crate::watchdog::FlightMode;

/// One telemetry emission.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    /// Monotonic timestamp [s].
    pub t: f64,
    /// Watchdog failsafe state.
    pub flight_mode: FlightMode,
    /// Controller operating mode.
    pub control_mode: ControlMode,
    /// Last planner outcome, if any solve has run.
    pub plan_status: Option<PlanStatus>,
    pub planner: PlannerStats,
    pub mixer: MixerStats,
    pub state_buffer: BufferStatsSnapshot,
    pub tasks: Vec<TaskStatsSnapshot>,
}

impl TelemetrySnapshot {
    /// Serialize to a single JSON line.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}
