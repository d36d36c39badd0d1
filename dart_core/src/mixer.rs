//! Motor mixer: collective thrust + body torques → per-motor PWM.
//!
//! The allocation matrix M (K×4) is precomputed from vehicle geometry at
//! construction. Per cycle: `f = M · [T; τ]`, clip `f` to `[0, f_max]`,
//! map to PWM via the sqrt curve `pwm = pwm_idle + scale · sqrt(f)`, then
//! clip to `[pwm_min, pwm_max]`. The order of operations is fixed:
//! pre-clip detection, clip, then the idle-while-thrust check.
//!
//! Saturation is observable but non-fatal; non-finite input is a hard
//! error; all-idle output under positive thrust demand indicates an
//! actuator fault or gross mis-scaling and is reported for the watchdog
//! to escalate.

use nalgebra::{DMatrix, DVector, Vector3};
use tracing::warn;

use dart_common::error::CoreError;
use dart_common::state::{ControlCommand, MotorCommand};
use dart_common::vehicle::VehicleParams;

/// Thrust below which an all-idle output is considered legitimate [N].
const IDLE_THRUST_FLOOR: f64 = 0.2;

/// Pre-clip warning threshold as a fraction of `pwm_max`.
const PRECLIP_WARN_FACTOR: f64 = 1.10;

/// Mixer outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MixerStats {
    /// Commands processed.
    pub commands: u64,
    /// Times clipping modified a requested PWM (per motor, per cycle).
    pub saturation_events: u64,
    /// Non-finite inputs rejected.
    pub rejected: u64,
    /// Idle-while-thrust faults raised.
    pub idle_faults: u64,
}

/// Allocates collective thrust and body torques to per-motor PWM.
#[derive(Debug)]
pub struct MotorMixer {
    params: VehicleParams,
    /// K×4 allocation: column 0 thrust share, columns 1–3 torque shares.
    allocation: DMatrix<f64>,
    /// 4×K wrench map `f → [T; τ]`, kept for diagnostics and
    /// round-trip checks.
    wrench: DMatrix<f64>,
    stats: MixerStats,
}

impl MotorMixer {
    /// Build the mixer, precomputing the allocation matrix from the
    /// motor geometry.
    ///
    /// Row i solves: thrust share 1/K, roll/pitch from the arm lever
    /// cross product, yaw from the spin direction and torque
    /// coefficient. The wrench map `f → [T; τ]` is `Aᵀ` with
    /// `A[i] = [1, arm_y, −arm_x, dir·c_q]`; the mixer applies its
    /// pseudo-inverse so `mix(unmix(f)) = f` within actuator bounds.
    pub fn new(params: VehicleParams) -> Result<Self, CoreError> {
        let k = params.motor_count;
        // Wrench matrix B (4×K): [T; τx; τy; τz] = B · f.
        let mut wrench = DMatrix::zeros(4, k);
        for (i, m) in params.motors().iter().enumerate() {
            wrench[(0, i)] = 1.0;
            wrench[(1, i)] = m.arm.y; // roll torque per Newton
            wrench[(2, i)] = -m.arm.x; // pitch torque per Newton
            wrench[(3, i)] = m.direction * params.torque_coefficient;
        }
        let allocation = wrench
            .clone()
            .pseudo_inverse(1e-9)
            .map_err(|e| CoreError::ConfigurationInvalid(format!("allocation matrix: {e}")))?;
        // A direction/layout combination whose wrench map loses rank
        // cannot realize thrust and torques independently.
        let residual = (&wrench * &allocation - DMatrix::identity(4, 4)).norm();
        if residual > 1e-6 {
            return Err(CoreError::ConfigurationInvalid(format!(
                "motor layout cannot realize independent thrust and torques (residual {residual:.3})"
            )));
        }
        Ok(Self {
            params,
            allocation,
            wrench,
            stats: MixerStats::default(),
        })
    }

    /// Mix one command into per-motor PWM.
    pub fn mix(&mut self, cmd: &ControlCommand) -> Result<MotorCommand, CoreError> {
        if !cmd.is_finite() {
            self.stats.rejected += 1;
            return Err(CoreError::CommandInvalid(format!(
                "non-finite control command: thrust={}, torque={:?}",
                cmd.thrust, cmd.torque
            )));
        }
        self.stats.commands += 1;

        let wrench = DVector::from_column_slice(&[
            cmd.thrust,
            cmd.torque.x,
            cmd.torque.y,
            cmd.torque.z,
        ]);
        let forces = &self.allocation * wrench;

        let p = &self.params;
        let timestamp_us = (cmd.timestamp * 1e6).max(0.0) as u64;
        let mut out = MotorCommand::idle(p.motor_count, p.pwm_idle, timestamp_us);
        let mut saturated = 0u64;
        let mut all_idle = true;

        for i in 0..p.motor_count {
            let f = forces[i].clamp(0.0, p.motor_thrust_max);
            if (forces[i] - f).abs() > 1e-12 {
                saturated += 1;
            }
            let raw_pwm = p.pwm_idle as f64 + p.pwm_scaling_factor * f.max(0.0).sqrt();

            if raw_pwm > PRECLIP_WARN_FACTOR * p.pwm_max as f64 {
                warn!(
                    motor = i,
                    raw_pwm, "requested PWM exceeds 110% of pwm_max before clipping"
                );
            }

            let clipped = raw_pwm.round().clamp(p.pwm_min as f64, p.pwm_max as f64) as u16;
            if (clipped as f64 - raw_pwm.round()).abs() > 0.5 {
                saturated += 1;
            }
            if clipped > p.pwm_idle {
                all_idle = false;
            }
            out.pwm[i] = clipped;
        }
        self.stats.saturation_events += saturated;

        if all_idle && cmd.thrust > IDLE_THRUST_FLOOR {
            self.stats.idle_faults += 1;
            return Err(CoreError::SafetyViolation(format!(
                "all motors idle while thrust {} N requested",
                cmd.thrust
            )));
        }

        Ok(out)
    }

    /// Recover the wrench `[T; τ]` realized by a per-motor force vector.
    ///
    /// Inverse of the allocation step; used by tests and diagnostics.
    pub fn unmix(&self, forces: &[f64]) -> (f64, Vector3<f64>) {
        let f = DVector::from_column_slice(forces);
        let w = &self.wrench * f;
        (w[0], Vector3::new(w[1], w[2], w[3]))
    }

    /// Per-motor forces for a wrench, pre-clip. Test/diagnostic hook.
    pub fn allocate(&self, thrust: f64, torque: &Vector3<f64>) -> Vec<f64> {
        let wrench = DVector::from_column_slice(&[thrust, torque.x, torque.y, torque.z]);
        (&self.allocation * wrench).iter().copied().collect()
    }

    #[inline]
    pub fn stats(&self) -> MixerStats {
        self.stats
    }

    #[inline]
    pub fn params(&self) -> &VehicleParams {
        &self.params
    }
}
