//! Runtime error taxonomy shared across the core.
//!
//! Errors are values: every boundary converts lower-level failures into
//! one of these kinds, preserving the originating context in the message.
//! Nothing above the hardware adapter panics in production paths; faults
//! funnel to the safety watchdog as [`SafetyEvent`]s.

use thiserror::Error;

/// Safety-relevant events observed anywhere in the stack and fed to the
/// watchdog's event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafetyEvent {
    /// A monitored heartbeat source exceeded its timeout.
    HeartbeatTimeout,
    /// Estimated velocity exceeded the configured limit.
    VelocityLimitExceeded,
    /// Altitude left the allowed band.
    AltitudeLimitExceeded,
    /// Estimator produced a non-finite or otherwise invalid state.
    SensorInvalid,
    /// A command containing NaN/∞ reached the mixer.
    CommandNonFinite,
    /// The ESC / actuator layer reported a fault.
    EscFault,
    /// Operator requested manual override.
    ManualOverride,
}

/// Error kinds of the control core.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Bootstrap-time configuration failure. Fatal.
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),

    /// Hardware / link failure. Recoverable via reconnect; repeated
    /// occurrences escalate to the watchdog.
    #[error("hardware fault: {0}")]
    HardwareFault(String),

    /// The MPC failed to improve and fell back to its warm start.
    #[error("planning degraded: {0}")]
    PlanningDegraded(String),

    /// Non-finite computation or singularity in the controller.
    #[error("controller fault: {0}")]
    ControllerFault(String),

    /// Non-finite or out-of-range command rejected at the mixer.
    #[error("command invalid: {0}")]
    CommandInvalid(String),

    /// A task exceeded its declared deadline.
    #[error("deadline miss: task '{task}' took {actual_us}us, deadline {deadline_us}us")]
    DeadlineMiss {
        task: String,
        actual_us: u64,
        deadline_us: u64,
    },

    /// A monitored heartbeat source went silent.
    #[error("heartbeat timeout: source '{source_name}' silent for {silent_ms}ms")]
    HeartbeatTimeout { source_name: String, silent_ms: u64 },

    /// The adapter does not implement the requested capability.
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    /// A configured safety limit was exceeded.
    #[error("safety violation: {0}")]
    SafetyViolation(String),
}

impl CoreError {
    /// The watchdog event equivalent of this error, if it has one.
    pub fn safety_event(&self) -> Option<SafetyEvent> {
        match self {
            Self::CommandInvalid(_) | Self::ControllerFault(_) => {
                Some(SafetyEvent::CommandNonFinite)
            }
            Self::HeartbeatTimeout { .. } => Some(SafetyEvent::HeartbeatTimeout),
            Self::SafetyViolation(_) | Self::HardwareFault(_) => Some(SafetyEvent::EscFault),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_preserves_context() {
        let err = CoreError::DeadlineMiss {
            task: "mpc".to_string(),
            actual_us: 91_000,
            deadline_us: 80_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("mpc"));
        assert!(msg.contains("91000"));
    }

    #[test]
    fn command_invalid_maps_to_non_finite_event() {
        let err = CoreError::CommandInvalid("thrust is NaN".to_string());
        assert_eq!(err.safety_event(), Some(SafetyEvent::CommandNonFinite));
    }

    #[test]
    fn planning_degraded_has_no_safety_event() {
        let err = CoreError::PlanningDegraded("no improvement".to_string());
        assert!(err.safety_event().is_none());
    }
}
