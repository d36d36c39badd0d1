//! Cloud↔edge link message codecs.
//!
//! Fixed little-endian layouts, hand-laid so the byte-level contract is
//! explicit and independent of compiler struct layout. Integrity
//! (checksums) belongs to the outer transport; these codecs only reject
//! structurally invalid frames.
//!
//! Frame layouts (all little-endian):
//!
//! | Frame | Layout |
//! |-------|--------|
//! | Heartbeat | magic u16, ver u8, source u8, seq u32, timestamp_us u64 |
//! | Motor | magic u16, count u8, pad u8, pwm `[u16; 8]`, timestamp_us u64 |
//! | Trajectory | magic u16, count u8, pad u8, plan_id u64, start_time f64, dt f64, count × sample |
//!
//! A trajectory sample is 11 consecutive f64: position, velocity,
//! acceleration (3 each), yaw, yaw_rate.

use static_assertions::const_assert_eq;
use thiserror::Error;

use crate::consts::{MAX_HORIZON, MAX_MOTORS};
use crate::state::{MotorCommand, ReferenceTrajectory, TrajectorySample};

/// Frame type discriminators.
pub const MAGIC_HEARTBEAT: u16 = 0xDA01;
pub const MAGIC_MOTOR: u16 = 0xDA02;
pub const MAGIC_TRAJECTORY: u16 = 0xDA03;

/// Wire protocol version.
pub const WIRE_VERSION: u8 = 1;

/// Encoded heartbeat length [bytes].
pub const HEARTBEAT_LEN: usize = 16;
/// Encoded motor frame length [bytes].
pub const MOTOR_FRAME_LEN: usize = 4 + 2 * MAX_MOTORS + 8;
/// Trajectory header length [bytes].
pub const TRAJECTORY_HEADER_LEN: usize = 4 + 8 + 8 + 8;
/// Encoded trajectory sample length [bytes].
pub const SAMPLE_LEN: usize = 11 * 8;
/// Largest possible trajectory frame [bytes].
pub const TRAJECTORY_MAX_LEN: usize = TRAJECTORY_HEADER_LEN + MAX_HORIZON * SAMPLE_LEN;

const_assert_eq!(HEARTBEAT_LEN, 16);
const_assert_eq!(MOTOR_FRAME_LEN, 28);
const_assert_eq!(SAMPLE_LEN, 88);

/// Wire decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("frame too short: {got} bytes, need {need}")]
    Truncated { got: usize, need: usize },

    #[error("bad magic: expected {expected:#06x}, got {got:#06x}")]
    BadMagic { expected: u16, got: u16 },

    #[error("unsupported wire version {0}")]
    BadVersion(u8),

    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    #[error("plan id {got} does not exceed previous {previous}")]
    StalePlan { got: u64, previous: u64 },
}

// ─── Heartbeat ─────────────────────────────────────────────────────

/// Periodic liveness signal between cooperating tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Source identifier (e.g. cloud = 1).
    pub source: u8,
    /// Monotonic sequence number.
    pub seq: u32,
    /// Sender monotonic timestamp [µs].
    pub timestamp_us: u64,
}

impl Heartbeat {
    pub fn encode(&self) -> [u8; HEARTBEAT_LEN] {
        let mut buf = [0u8; HEARTBEAT_LEN];
        buf[0..2].copy_from_slice(&MAGIC_HEARTBEAT.to_le_bytes());
        buf[2] = WIRE_VERSION;
        buf[3] = self.source;
        buf[4..8].copy_from_slice(&self.seq.to_le_bytes());
        buf[8..16].copy_from_slice(&self.timestamp_us.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEARTBEAT_LEN {
            return Err(WireError::Truncated {
                got: buf.len(),
                need: HEARTBEAT_LEN,
            });
        }
        let magic = u16::from_le_bytes([buf[0], buf[1]]);
        if magic != MAGIC_HEARTBEAT {
            return Err(WireError::BadMagic {
                expected: MAGIC_HEARTBEAT,
                got: magic,
            });
        }
        if buf[2] != WIRE_VERSION {
            return Err(WireError::BadVersion(buf[2]));
        }
        Ok(Self {
            source: buf[3],
            seq: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            timestamp_us: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        })
    }
}

// ─── Motor frame ───────────────────────────────────────────────────

/// Encode a motor command: K little-endian u16 PWM values (unused
/// slots zero) plus the monotonic timestamp.
pub fn encode_motor_frame(cmd: &MotorCommand) -> [u8; MOTOR_FRAME_LEN] {
    let mut buf = [0u8; MOTOR_FRAME_LEN];
    buf[0..2].copy_from_slice(&MAGIC_MOTOR.to_le_bytes());
    buf[2] = cmd.count as u8;
    for (i, pwm) in cmd.pwm.iter().enumerate() {
        let off = 4 + 2 * i;
        buf[off..off + 2].copy_from_slice(&pwm.to_le_bytes());
    }
    let ts_off = 4 + 2 * MAX_MOTORS;
    buf[ts_off..ts_off + 8].copy_from_slice(&cmd.timestamp_us.to_le_bytes());
    buf
}

/// Decode a motor frame.
pub fn decode_motor_frame(buf: &[u8]) -> Result<MotorCommand, WireError> {
    if buf.len() < MOTOR_FRAME_LEN {
        return Err(WireError::Truncated {
            got: buf.len(),
            need: MOTOR_FRAME_LEN,
        });
    }
    let magic = u16::from_le_bytes([buf[0], buf[1]]);
    if magic != MAGIC_MOTOR {
        return Err(WireError::BadMagic {
            expected: MAGIC_MOTOR,
            got: magic,
        });
    }
    let count = buf[2] as usize;
    if count == 0 || count > MAX_MOTORS {
        return Err(WireError::InvalidField("motor count"));
    }
    let mut pwm = [0u16; MAX_MOTORS];
    for (i, slot) in pwm.iter_mut().enumerate() {
        let off = 4 + 2 * i;
        *slot = u16::from_le_bytes([buf[off], buf[off + 1]]);
    }
    let ts_off = 4 + 2 * MAX_MOTORS;
    let timestamp_us = u64::from_le_bytes(buf[ts_off..ts_off + 8].try_into().unwrap());
    Ok(MotorCommand {
        pwm,
        count,
        timestamp_us,
    })
}

// ─── Trajectory frame ──────────────────────────────────────────────

fn put_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn get_f64(buf: &[u8], off: usize) -> f64 {
    f64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}

/// Encode a reference trajectory for cloud→edge transmission.
pub fn encode_trajectory(traj: &ReferenceTrajectory) -> Vec<u8> {
    let mut buf = Vec::with_capacity(TRAJECTORY_HEADER_LEN + traj.len() * SAMPLE_LEN);
    buf.extend_from_slice(&MAGIC_TRAJECTORY.to_le_bytes());
    buf.push(traj.len() as u8);
    buf.push(0); // pad
    buf.extend_from_slice(&traj.plan_id.to_le_bytes());
    put_f64(&mut buf, traj.start_time);
    put_f64(&mut buf, traj.dt);
    for s in &traj.samples {
        for v in s.position.iter().chain(&s.velocity).chain(&s.acceleration) {
            put_f64(&mut buf, *v);
        }
        put_f64(&mut buf, s.yaw);
        put_f64(&mut buf, s.yaw_rate);
    }
    buf
}

/// Decode a trajectory frame. Structural validation only; plan-id
/// monotonicity is enforced by [`PlanGate`].
pub fn decode_trajectory(buf: &[u8]) -> Result<ReferenceTrajectory, WireError> {
    if buf.len() < TRAJECTORY_HEADER_LEN {
        return Err(WireError::Truncated {
            got: buf.len(),
            need: TRAJECTORY_HEADER_LEN,
        });
    }
    let magic = u16::from_le_bytes([buf[0], buf[1]]);
    if magic != MAGIC_TRAJECTORY {
        return Err(WireError::BadMagic {
            expected: MAGIC_TRAJECTORY,
            got: magic,
        });
    }
    let count = buf[2] as usize;
    if count == 0 || count > MAX_HORIZON {
        return Err(WireError::InvalidField("sample count"));
    }
    let need = TRAJECTORY_HEADER_LEN + count * SAMPLE_LEN;
    if buf.len() < need {
        return Err(WireError::Truncated {
            got: buf.len(),
            need,
        });
    }
    let plan_id = u64::from_le_bytes(buf[4..12].try_into().unwrap());
    let start_time = get_f64(buf, 12);
    let dt = get_f64(buf, 20);
    if !start_time.is_finite() || !dt.is_finite() || dt <= 0.0 {
        return Err(WireError::InvalidField("time base"));
    }

    let mut samples = heapless::Vec::new();
    for i in 0..count {
        let base = TRAJECTORY_HEADER_LEN + i * SAMPLE_LEN;
        let f = |j: usize| get_f64(buf, base + j * 8);
        let sample = TrajectorySample {
            position: [f(0), f(1), f(2)],
            velocity: [f(3), f(4), f(5)],
            acceleration: [f(6), f(7), f(8)],
            yaw: f(9),
            yaw_rate: f(10),
        };
        if !sample.is_finite() {
            return Err(WireError::InvalidField("non-finite sample"));
        }
        let _ = samples.push(sample);
    }

    Ok(ReferenceTrajectory {
        plan_id,
        start_time,
        dt,
        samples,
    })
}

// ─── Plan gate ─────────────────────────────────────────────────────

/// Edge-side acceptance gate: a plan is admitted only when its id
/// strictly exceeds the previously accepted one.
#[derive(Debug, Default)]
pub struct PlanGate {
    last_plan_id: Option<u64>,
}

impl PlanGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit or reject a decoded trajectory.
    pub fn admit(&mut self, traj: ReferenceTrajectory) -> Result<ReferenceTrajectory, WireError> {
        if let Some(prev) = self.last_plan_id {
            if traj.plan_id <= prev {
                return Err(WireError::StalePlan {
                    got: traj.plan_id,
                    previous: prev,
                });
            }
        }
        self.last_plan_id = Some(traj.plan_id);
        Ok(traj)
    }

    /// Last accepted plan id, if any.
    #[inline]
    pub fn last_plan_id(&self) -> Option<u64> {
        self.last_plan_id
    }
}
