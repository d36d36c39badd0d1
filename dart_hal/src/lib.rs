//! # DART Hardware Adapter Boundary
//!
//! Uniform capability-based interface between the control core and a
//! vehicle backend (simulation, serial flight controller, SITL). The
//! adapter is the ONLY component that performs I/O; the core stays
//! deterministic given its inputs.
//!
//! Backends advertise what they support through [`Capabilities`];
//! callers check before issuing optional commands, and unsupported
//! operations answer [`AdapterError::UnsupportedCommand`] — never a
//! generic "not implemented".
//!
//! # Lifecycle
//!
//! 1. `connect()` — once, before the control loops start; may block.
//! 2. `send_command()` / `get_state()` — per cycle; MUST be non-blocking.
//! 3. `emergency_stop()` — any time; idempotent.
//! 4. `disconnect()` — shutdown; releases the backend.

pub mod sim;

use bitflags::bitflags;
use thiserror::Error;

use dart_common::error::CoreError;
use dart_common::state::{DroneState, MotorCommand};

bitflags! {
    /// Operations a backend supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capability: u32 {
        /// Accepts per-motor PWM frames.
        const MOTOR_COMMAND  = 1 << 0;
        /// Provides a state estimate.
        const STATE_ESTIMATE = 1 << 1;
        /// Can cut motors immediately.
        const EMERGENCY_STOP = 1 << 2;
        /// Can reboot the flight controller.
        const REBOOT         = 1 << 3;
    }
}

/// Backend self-description returned by [`HardwareAdapter::capabilities`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capabilities {
    pub supported: Capability,
    /// True for simulation / SITL backends.
    pub simulated: bool,
    /// Velocity the backend can safely realize [m/s].
    pub max_velocity: f64,
    /// Number of motor channels.
    pub motor_channels: usize,
}

/// Errors crossing the adapter boundary.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// Operation attempted before `connect()` succeeded.
    #[error("adapter not connected")]
    NotConnected,

    /// Backend I/O or protocol failure.
    #[error("hardware fault: {0}")]
    Fault(String),

    /// The backend does not implement this operation; check
    /// `capabilities()` first.
    #[error("unsupported command: {0}")]
    UnsupportedCommand(&'static str),
}

impl From<AdapterError> for CoreError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::UnsupportedCommand(op) => CoreError::UnsupportedCommand(op.to_string()),
            other => CoreError::HardwareFault(other.to_string()),
        }
    }
}

/// Uniform vehicle backend interface.
///
/// Implementations use interior mutability where needed so a connected
/// adapter can be shared (`Arc<dyn HardwareAdapter>`) between the
/// control and telemetry tasks.
pub trait HardwareAdapter: Send + Sync {
    /// Backend identifier, e.g. `"sim"`.
    fn name(&self) -> &'static str;

    /// Establish the link. May block; called before the loops start.
    fn connect(&self) -> Result<(), AdapterError>;

    /// Release the link. Idempotent.
    fn disconnect(&self) -> Result<(), AdapterError>;

    fn is_connected(&self) -> bool;

    /// Push one motor frame. MUST NOT block; a backend that cannot
    /// accept the frame now reports a fault instead of waiting.
    fn send_command(&self, cmd: &MotorCommand) -> Result<(), AdapterError>;

    /// Latest available state estimate.
    fn get_state(&self) -> Result<DroneState, AdapterError>;

    /// Cut motors immediately. Idempotent: repeated calls leave the
    /// backend in the same stopped state.
    fn emergency_stop(&self) -> Result<(), AdapterError>;

    fn capabilities(&self) -> Capabilities;

    /// Reboot the flight controller. Optional; backends without
    /// [`Capability::REBOOT`] keep this default.
    fn reboot(&self) -> Result<(), AdapterError> {
        Err(AdapterError::UnsupportedCommand("reboot"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAdapter;

    impl HardwareAdapter for StubAdapter {
        fn name(&self) -> &'static str {
            "stub"
        }
        fn connect(&self) -> Result<(), AdapterError> {
            Ok(())
        }
        fn disconnect(&self) -> Result<(), AdapterError> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        fn send_command(&self, _cmd: &MotorCommand) -> Result<(), AdapterError> {
            Ok(())
        }
        fn get_state(&self) -> Result<DroneState, AdapterError> {
            Ok(DroneState::default())
        }
        fn emergency_stop(&self) -> Result<(), AdapterError> {
            Ok(())
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities {
                supported: Capability::MOTOR_COMMAND | Capability::STATE_ESTIMATE,
                simulated: true,
                max_velocity: 10.0,
                motor_channels: 4,
            }
        }
    }

    #[test]
    fn unsupported_operation_reports_unsupported_not_fault() {
        let adapter = StubAdapter;
        assert!(!adapter.capabilities().supported.contains(Capability::REBOOT));
        let err = adapter.reboot().unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedCommand("reboot")));
        // And it converts to the matching core error kind.
        let core: CoreError = err.into();
        assert!(matches!(core, CoreError::UnsupportedCommand(_)));
    }

    #[test]
    fn fault_converts_to_hardware_fault() {
        let core: CoreError = AdapterError::Fault("link down".to_string()).into();
        assert!(matches!(core, CoreError::HardwareFault(_)));
    }
}
