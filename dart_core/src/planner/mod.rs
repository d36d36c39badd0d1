//! Mid-rate SE(3) model-predictive trajectory optimizer.
//!
//! Refines a goal state into a dynamically feasible reference
//! trajectory over N steps of dt. Decision variables are the per-step
//! acceleration and yaw rate; positions and velocities follow from the
//! double-integrator rollout, so the dynamics coupling between
//! consecutive samples holds by construction. Box constraints are
//! enforced by projection (acceleration, yaw rate) and clamped rollout
//! (velocity norm, altitude band).
//!
//! Each solve warm-starts from the previous solution shifted by one
//! step. The gradient is evaluated by central finite differences and
//! applied with a backtracking line search. A hard wall-clock cap bounds
//! the solve; on expiry the shifted previous solution is returned and a
//! deadline miss recorded. Three consecutive non-improving iterations
//! degrade the solve to the warm start.

pub mod obstacles;

use std::time::{Duration, Instant};

use nalgebra::Vector3;
use tracing::{debug, warn};

use dart_common::config::{PlanningConfig, SafetyConfig};
use dart_common::consts::MAX_HORIZON;
use dart_common::error::CoreError;
use dart_common::state::{wrap_angle, DroneState, ReferenceTrajectory, TrajectorySample};

use obstacles::{Occupancy, ObstacleQuery};

/// Effort (acceleration norm) weight.
const EFFORT_WEIGHT: f64 = 0.1;
/// Jerk (acceleration difference) weight.
const JERK_WEIGHT: f64 = 1.0;
/// Yaw-rate smoothness weight.
const YAW_WEIGHT: f64 = 0.5;
/// Yaw-rate box constraint [rad/s].
const YAW_RATE_MAX: f64 = 3.0;
/// Gradient norm below which the solve is considered converged.
const GRAD_EPS: f64 = 1e-8;
/// Cost difference treated as a tie for candidate comparison.
const COST_TIE_EPS: f64 = 1e-12;
/// Backtracking halvings per iteration.
const BACKTRACK_STEPS: u32 = 8;

/// Target the planner tracks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalState {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub yaw: f64,
}

impl GoalState {
    /// Stationary goal at a position and heading.
    pub fn hover_at(position: Vector3<f64>, yaw: f64) -> Self {
        Self {
            position,
            velocity: Vector3::zeros(),
            yaw: wrap_angle(yaw),
        }
    }
}

/// How a solve ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PlanStatus {
    /// Relative improvement dropped below tolerance (or the gradient
    /// vanished).
    Converged,
    /// Ran out of iterations while still improving.
    IterationLimit,
    /// Fell back to the warm start (no improvement, or clearance below
    /// the safety margin).
    Degraded,
    /// The wall-clock cap expired; the shifted previous solution was
    /// returned.
    DeadlineMiss,
}

/// Result of one solve.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub trajectory: ReferenceTrajectory,
    pub status: PlanStatus,
    pub iterations: u32,
    pub solve_time: Duration,
    /// Smallest known obstacle distance along the returned trajectory.
    pub min_clearance: f64,
}

impl PlanOutcome {
    /// Error value for telemetry / watchdog when the solve degraded.
    pub fn error(&self) -> Option<CoreError> {
        match self.status {
            PlanStatus::Degraded => Some(CoreError::PlanningDegraded(
                "optimizer fell back to warm start".to_string(),
            )),
            PlanStatus::DeadlineMiss => Some(CoreError::PlanningDegraded(
                "solve exceeded wall-clock cap".to_string(),
            )),
            _ => None,
        }
    }
}

/// Cumulative solver counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PlannerStats {
    pub solves: u64,
    pub deadline_misses: u64,
    pub degraded: u64,
}

// ─── Decision vector ────────────────────────────────────────────────

/// Per-step acceleration + yaw rate, the optimizer's decision variables.
#[derive(Clone, Copy)]
struct Decision {
    accel: [Vector3<f64>; MAX_HORIZON],
    yaw_rate: [f64; MAX_HORIZON],
    n: usize,
}

impl Decision {
    fn zeros(n: usize) -> Self {
        Self {
            accel: [Vector3::zeros(); MAX_HORIZON],
            yaw_rate: [0.0; MAX_HORIZON],
            n,
        }
    }

    /// Shift forward one step, repeating the last entry.
    fn shifted(&self) -> Self {
        let mut out = *self;
        for k in 0..self.n.saturating_sub(1) {
            out.accel[k] = self.accel[k + 1];
            out.yaw_rate[k] = self.yaw_rate[k + 1];
        }
        if self.n > 0 {
            out.accel[self.n - 1] = Vector3::zeros();
            out.yaw_rate[self.n - 1] = 0.0;
        }
        out
    }

    #[inline]
    fn dim(&self) -> usize {
        4 * self.n
    }

    #[inline]
    fn get(&self, idx: usize) -> f64 {
        let (k, c) = (idx / 4, idx % 4);
        if c < 3 {
            self.accel[k][c]
        } else {
            self.yaw_rate[k]
        }
    }

    #[inline]
    fn set(&mut self, idx: usize, v: f64) {
        let (k, c) = (idx / 4, idx % 4);
        if c < 3 {
            self.accel[k][c] = v;
        } else {
            self.yaw_rate[k] = v;
        }
    }

    /// Project into the acceleration / yaw-rate boxes.
    fn project(&mut self, a_max: f64) {
        for k in 0..self.n {
            for c in 0..3 {
                self.accel[k][c] = self.accel[k][c].clamp(-a_max, a_max);
            }
            self.yaw_rate[k] = self.yaw_rate[k].clamp(-YAW_RATE_MAX, YAW_RATE_MAX);
        }
    }

    /// Σ‖Δa‖² — the jerk measure used for cost and tie-breaks.
    fn jerk(&self) -> f64 {
        let mut j = 0.0;
        for k in 1..self.n {
            j += (self.accel[k] - self.accel[k - 1]).norm_squared();
        }
        j
    }

    /// Squared distance to another decision, for the warm-start
    /// tie-break.
    fn dist_sq(&self, other: &Self) -> f64 {
        let mut d = 0.0;
        for k in 0..self.n {
            d += (self.accel[k] - other.accel[k]).norm_squared();
            let dy = self.yaw_rate[k] - other.yaw_rate[k];
            d += dy * dy;
        }
        d
    }
}

// ─── Optimizer ──────────────────────────────────────────────────────

/// SE(3) MPC with warm starts and a hard wall-clock cap.
pub struct Se3Mpc {
    cfg: PlanningConfig,
    limits: SafetyConfig,
    hard_cap: Duration,
    plan_counter: u64,
    prev: Option<Decision>,
    stats: PlannerStats,
    last_status: Option<PlanStatus>,
}

impl Se3Mpc {
    pub fn new(cfg: PlanningConfig, limits: SafetyConfig, hard_cap: Duration) -> Self {
        Self {
            cfg,
            limits,
            hard_cap,
            plan_counter: 0,
            prev: None,
            stats: PlannerStats::default(),
            last_status: None,
        }
    }

    /// Discard the warm start. Called on watchdog mode changes so the
    /// next solve re-initializes from the current state.
    pub fn reset(&mut self) {
        self.prev = None;
    }

    #[inline]
    pub fn stats(&self) -> PlannerStats {
        self.stats
    }

    #[inline]
    pub fn last_status(&self) -> Option<PlanStatus> {
        self.last_status
    }

    /// Solve for a reference trajectory tracking `goal`.
    pub fn plan(
        &mut self,
        state: &DroneState,
        goal: &GoalState,
        obstacle_query: &dyn ObstacleQuery,
    ) -> PlanOutcome {
        let t0 = Instant::now();
        let deadline = t0 + self.hard_cap;
        let n = self.cfg.prediction_horizon;
        self.stats.solves += 1;

        // Initialization: shifted previous solution, or a straight-line
        // seed (zero acceleration at the current velocity) on first call.
        let warm = match self.prev {
            Some(prev) if prev.n == n => prev.shifted(),
            _ => Decision::zeros(n),
        };

        let mut best = warm;
        let mut best_cost = self.cost(state, goal, &best, obstacle_query);
        let mut status = PlanStatus::IterationLimit;
        let mut iterations = 0u32;
        let mut non_improving = 0u32;

        for _ in 0..self.cfg.max_iterations {
            // Wall-clock cap: bail out between iterations so a
            // cancellation or overrun is bounded by one iteration.
            if Instant::now() >= deadline {
                warn!(elapsed_ms = t0.elapsed().as_millis() as u64, "solve hit wall-clock cap");
                self.stats.deadline_misses += 1;
                best = warm;
                status = PlanStatus::DeadlineMiss;
                break;
            }
            iterations += 1;

            let (grad, grad_norm) = self.gradient(state, goal, &best, obstacle_query);
            if grad_norm < GRAD_EPS {
                status = PlanStatus::Converged;
                break;
            }

            // Backtracking line search along the negative gradient,
            // projecting each candidate into the constraint boxes.
            let mut accepted = false;
            let mut alpha = 1.0 / (1.0 + grad_norm);
            for _ in 0..BACKTRACK_STEPS {
                let mut cand = best;
                for i in 0..cand.dim() {
                    cand.set(i, cand.get(i) - alpha * grad.get(i));
                }
                cand.project(self.limits.max_acceleration);

                let cand_cost = self.cost(state, goal, &cand, obstacle_query);
                if self.candidate_improves(cand_cost, best_cost, &cand, &best, &warm) {
                    let rel = if best_cost > 0.0 {
                        (best_cost - cand_cost) / best_cost
                    } else {
                        0.0
                    };
                    best = cand;
                    best_cost = cand_cost;
                    accepted = true;
                    if rel.abs() < self.cfg.convergence_tolerance {
                        status = PlanStatus::Converged;
                    }
                    break;
                }
                alpha *= 0.5;
            }

            if status == PlanStatus::Converged {
                break;
            }
            if accepted {
                non_improving = 0;
            } else {
                non_improving += 1;
                if non_improving >= 3 {
                    debug!("three consecutive non-improving iterations, degrading to warm start");
                    best = warm;
                    status = PlanStatus::Degraded;
                    break;
                }
            }
        }

        // Build the trajectory and check clearance against the margin.
        self.plan_counter += 1;
        let (trajectory, min_clearance) = self.emit(state, &best, obstacle_query);
        if min_clearance < self.cfg.safety_margin
            && !matches!(status, PlanStatus::DeadlineMiss)
        {
            status = PlanStatus::Degraded;
        }
        if matches!(status, PlanStatus::Degraded) {
            self.stats.degraded += 1;
        }

        self.prev = Some(best);
        self.last_status = Some(status);

        PlanOutcome {
            trajectory,
            status,
            iterations,
            solve_time: t0.elapsed(),
            min_clearance,
        }
    }

    /// Candidate acceptance with the fixed tie-break order: lower cost,
    /// then lower jerk, then closer to the warm start.
    fn candidate_improves(
        &self,
        cand_cost: f64,
        best_cost: f64,
        cand: &Decision,
        best: &Decision,
        warm: &Decision,
    ) -> bool {
        if cand_cost < best_cost - COST_TIE_EPS {
            return true;
        }
        if (cand_cost - best_cost).abs() <= COST_TIE_EPS {
            let (cj, bj) = (cand.jerk(), best.jerk());
            if cj < bj - COST_TIE_EPS {
                return true;
            }
            if (cj - bj).abs() <= COST_TIE_EPS {
                return cand.dist_sq(warm) < best.dist_sq(warm);
            }
        }
        false
    }

    /// Roll the double integrator forward, applying the velocity-norm
    /// and altitude clamps.
    fn rollout(
        &self,
        state: &DroneState,
        d: &Decision,
        mut visit: impl FnMut(usize, &Vector3<f64>, &Vector3<f64>, f64),
    ) {
        let dt = self.cfg.dt;
        let mut p = state.position;
        let mut v = state.velocity;
        let (_, _, mut yaw) = state.euler_angles();
        for k in 0..d.n {
            let a = d.accel[k];
            // Symplectic Euler: advance the velocity, then integrate
            // the position with the updated velocity.
            v += a * dt;
            let speed = v.norm();
            if speed > self.limits.max_velocity {
                v *= self.limits.max_velocity / speed;
            }
            p += v * dt;
            if p.z < self.limits.min_altitude {
                p.z = self.limits.min_altitude;
                v.z = v.z.max(0.0);
            } else if p.z > self.limits.max_altitude {
                p.z = self.limits.max_altitude;
                v.z = v.z.min(0.0);
            }
            yaw = wrap_angle(yaw + d.yaw_rate[k] * dt);
            visit(k, &p, &v, yaw);
        }
    }

    /// Weighted sum of tracking, effort, jerk, yaw smoothness and the
    /// obstacle barrier.
    fn cost(
        &self,
        state: &DroneState,
        goal: &GoalState,
        d: &Decision,
        obstacle_query: &dyn ObstacleQuery,
    ) -> f64 {
        let cfg = &self.cfg;
        let mut cost = 0.0;
        self.rollout(state, d, |k, p, v, yaw| {
            cost += cfg.position_weight * (p - goal.position).norm_squared();
            cost += cfg.velocity_weight * (v - goal.velocity).norm_squared();
            cost += EFFORT_WEIGHT * d.accel[k].norm_squared();
            cost += YAW_WEIGHT * wrap_angle(yaw - goal.yaw).powi(2);
            cost += self.obstacle_penalty(p, obstacle_query);
        });
        cost += JERK_WEIGHT * d.jerk();
        cost
    }

    /// Exponential barrier around known obstacles; unknown space is
    /// penalized as occupied at a configurable fraction of the weight.
    fn obstacle_penalty(&self, p: &Vector3<f64>, obstacle_query: &dyn ObstacleQuery) -> f64 {
        let margin = self.cfg.safety_margin.max(1e-3);
        let sample = obstacle_query.query(p);
        match sample.occupancy {
            Occupancy::Free => {
                if sample.distance.is_finite() {
                    self.cfg.obstacle_weight * (-(sample.distance - margin) / margin).exp()
                } else {
                    0.0
                }
            }
            Occupancy::Occupied => {
                self.cfg.obstacle_weight * (-(sample.distance - margin) / margin).exp()
            }
            Occupancy::Unknown => {
                self.cfg.obstacle_weight * self.cfg.unknown_weight_factor * std::f64::consts::E
            }
        }
    }

    /// Central finite-difference gradient.
    fn gradient(
        &self,
        state: &DroneState,
        goal: &GoalState,
        d: &Decision,
        obstacle_query: &dyn ObstacleQuery,
    ) -> (Decision, f64) {
        const H: f64 = 1e-4;
        let mut grad = Decision::zeros(d.n);
        let mut norm_sq = 0.0;
        for i in 0..d.dim() {
            let mut plus = *d;
            plus.set(i, plus.get(i) + H);
            let mut minus = *d;
            minus.set(i, minus.get(i) - H);
            let g = (self.cost(state, goal, &plus, obstacle_query)
                - self.cost(state, goal, &minus, obstacle_query))
                / (2.0 * H);
            grad.set(i, g);
            norm_sq += g * g;
        }
        (grad, norm_sq.sqrt())
    }

    /// Build the reference trajectory from the rollout and measure the
    /// minimum known clearance along it.
    fn emit(
        &self,
        state: &DroneState,
        d: &Decision,
        obstacle_query: &dyn ObstacleQuery,
    ) -> (ReferenceTrajectory, f64) {
        let mut samples: heapless::Vec<TrajectorySample, MAX_HORIZON> = heapless::Vec::new();
        let mut min_clearance = f64::INFINITY;
        self.rollout(state, d, |k, p, v, yaw| {
            let clearance = obstacle_query.query(p).distance;
            if clearance < min_clearance {
                min_clearance = clearance;
            }
            let _ = samples.push(TrajectorySample {
                position: (*p).into(),
                velocity: (*v).into(),
                acceleration: d.accel[k].into(),
                yaw,
                yaw_rate: d.yaw_rate[k],
            });
        });
        let trajectory = ReferenceTrajectory {
            plan_id: self.plan_counter,
            start_time: state.t + self.cfg.dt,
            dt: self.cfg.dt,
            samples,
        };
        (trajectory, min_clearance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obstacles::{FreeSpace, SphereField};

    fn mpc() -> Se3Mpc {
        Se3Mpc::new(
            PlanningConfig::default(),
            SafetyConfig::default(),
            Duration::from_millis(80),
        )
    }

    fn state_at(p: Vector3<f64>) -> DroneState {
        DroneState {
            position: p,
            ..DroneState::default()
        }
    }

    #[test]
    fn plan_ids_are_monotonic() {
        let mut mpc = mpc();
        let state = state_at(Vector3::zeros());
        let goal = GoalState::hover_at(Vector3::new(1.0, 0.0, 1.0), 0.0);
        let a = mpc.plan(&state, &goal, &FreeSpace);
        let b = mpc.plan(&state, &goal, &FreeSpace);
        assert!(b.trajectory.plan_id > a.trajectory.plan_id);
    }

    #[test]
    fn trajectory_has_configured_horizon_and_dt() {
        let mut mpc = mpc();
        let out = mpc.plan(
            &state_at(Vector3::zeros()),
            &GoalState::hover_at(Vector3::new(2.0, 0.0, 1.0), 0.0),
            &FreeSpace,
        );
        assert_eq!(out.trajectory.len(), PlanningConfig::default().prediction_horizon);
        assert_eq!(out.trajectory.dt, PlanningConfig::default().dt);
    }

    #[test]
    fn plan_moves_toward_goal() {
        let mut mpc = mpc();
        let goal = GoalState::hover_at(Vector3::new(5.0, 0.0, 2.0), 0.0);
        let state = state_at(Vector3::new(0.0, 0.0, 2.0));
        // A few solves with warm starting.
        let mut out = mpc.plan(&state, &goal, &FreeSpace);
        for _ in 0..4 {
            out = mpc.plan(&state, &goal, &FreeSpace);
        }
        let first = out.trajectory.samples[0].position[0];
        let last = out.trajectory.samples[out.trajectory.len() - 1].position[0];
        assert!(last > first, "x must advance toward the goal: {first} → {last}");
        assert!(last > 0.1);
    }

    #[test]
    fn velocity_stays_inside_box() {
        let mut mpc = mpc();
        let goal = GoalState::hover_at(Vector3::new(500.0, 0.0, 2.0), 0.0);
        let out = mpc.plan(&state_at(Vector3::new(0.0, 0.0, 2.0)), &goal, &FreeSpace);
        let vmax = SafetyConfig::default().max_velocity;
        for s in &out.trajectory.samples {
            assert!(s.velocity_vec().norm() <= vmax + 1e-9);
        }
    }

    #[test]
    fn acceleration_projected_into_box() {
        let mut mpc = mpc();
        let goal = GoalState::hover_at(Vector3::new(100.0, 100.0, 2.0), 0.0);
        let out = mpc.plan(&state_at(Vector3::new(0.0, 0.0, 2.0)), &goal, &FreeSpace);
        let amax = SafetyConfig::default().max_acceleration;
        for s in &out.trajectory.samples {
            for c in s.acceleration {
                assert!(c.abs() <= amax + 1e-9);
            }
        }
    }

    #[test]
    fn altitude_band_respected() {
        let mut mpc = mpc();
        let goal = GoalState::hover_at(Vector3::new(0.0, 0.0, -10.0), 0.0);
        let out = mpc.plan(&state_at(Vector3::new(0.0, 0.0, 1.0)), &goal, &FreeSpace);
        let limits = SafetyConfig::default();
        for s in &out.trajectory.samples {
            assert!(s.position[2] >= limits.min_altitude - 1e-9);
            assert!(s.position[2] <= limits.max_altitude + 1e-9);
        }
    }

    #[test]
    fn obstacle_on_path_degrades_or_clears() {
        let mut mpc = mpc();
        let goal = GoalState::hover_at(Vector3::new(6.0, 0.0, 2.0), 0.0);
        // Obstacle squarely between start and goal.
        let field = SphereField::new().with_sphere(Vector3::new(1.0, 0.0, 2.0), 0.8);
        let out = mpc.plan(&state_at(Vector3::new(0.0, 0.0, 2.0)), &goal, &field);
        let margin = PlanningConfig::default().safety_margin;
        assert!(
            out.min_clearance >= margin || out.status == PlanStatus::Degraded,
            "clearance {} with status {:?}",
            out.min_clearance,
            out.status
        );
    }

    #[test]
    fn deadline_cap_returns_warm_start() {
        struct SlowQuery;
        impl ObstacleQuery for SlowQuery {
            fn query(&self, _p: &Vector3<f64>) -> obstacles::ObstacleSample {
                std::thread::sleep(Duration::from_micros(200));
                obstacles::ObstacleSample::FREE
            }
        }
        let mut mpc = Se3Mpc::new(
            PlanningConfig::default(),
            SafetyConfig::default(),
            Duration::from_millis(1),
        );
        let goal = GoalState::hover_at(Vector3::new(5.0, 0.0, 2.0), 0.0);
        let out = mpc.plan(&state_at(Vector3::new(0.0, 0.0, 2.0)), &goal, &SlowQuery);
        assert_eq!(out.status, PlanStatus::DeadlineMiss);
        assert_eq!(mpc.stats().deadline_misses, 1);
        // The fallback is still a usable trajectory.
        assert_eq!(out.trajectory.len(), PlanningConfig::default().prediction_horizon);
    }

    #[test]
    fn reset_discards_warm_start() {
        let mut mpc = mpc();
        let goal = GoalState::hover_at(Vector3::new(3.0, 0.0, 2.0), 0.0);
        mpc.plan(&state_at(Vector3::zeros()), &goal, &FreeSpace);
        assert!(mpc.prev.is_some());
        mpc.reset();
        assert!(mpc.prev.is_none());
    }

    #[test]
    fn rollout_samples_satisfy_double_integrator_coupling() {
        let mpc = mpc();
        let dt = PlanningConfig::default().dt;
        let n = PlanningConfig::default().prediction_horizon;

        // Non-trivial acceleration profile, small enough that neither
        // the velocity-norm nor the altitude clamp engages.
        let mut d = Decision::zeros(n);
        for k in 0..n {
            d.accel[k] = Vector3::new(1.0, -0.5, 0.25 * (k as f64 + 1.0));
            d.yaw_rate[k] = 0.1;
        }

        let state = DroneState {
            position: Vector3::new(0.0, 0.0, 50.0),
            velocity: Vector3::new(0.5, 0.0, 0.0),
            ..DroneState::default()
        };

        let mut samples: Vec<(Vector3<f64>, Vector3<f64>)> = Vec::new();
        mpc.rollout(&state, &d, |_, p, v, _| samples.push((*p, *v)));
        assert_eq!(samples.len(), n);

        // Symplectic Euler step by step: v[k] = v[k-1] + a[k]·dt,
        // p[k] = p[k-1] + v[k]·dt, seeded from the current state.
        let (mut prev_p, mut prev_v) = (state.position, state.velocity);
        for (k, (p, v)) in samples.iter().enumerate() {
            let expect_v = prev_v + d.accel[k] * dt;
            let expect_p = prev_p + expect_v * dt;
            assert!(
                (v - expect_v).norm() < 1e-9,
                "velocity coupling broken at step {k}: {v:?} vs {expect_v:?}"
            );
            assert!(
                (p - expect_p).norm() < 1e-9,
                "position coupling broken at step {k}: {p:?} vs {expect_p:?}"
            );
            prev_p = *p;
            prev_v = *v;
        }
    }

    #[test]
    fn emitted_trajectory_is_dynamically_consistent() {
        let mut mpc = mpc();
        let goal = GoalState::hover_at(Vector3::new(4.0, 2.0, 52.0), 0.0);
        let out = mpc.plan(&state_at(Vector3::new(0.0, 0.0, 50.0)), &goal, &FreeSpace);
        let dt = out.trajectory.dt;
        let vmax = SafetyConfig::default().max_velocity;

        for w in out.trajectory.samples.windows(2) {
            let (a, b) = (&w[0], &w[1]);
            // Position follows the post-step velocity.
            let expect_p = a.position_vec() + b.velocity_vec() * dt;
            assert!(
                (b.position_vec() - expect_p).norm() < 1e-9,
                "position/velocity coupling broken: {:?} vs {expect_p:?}",
                b.position
            );
            // Velocity follows the sample's acceleration whenever the
            // norm clamp is not binding.
            if b.velocity_vec().norm() < vmax - 1e-6 {
                let expect_v = a.velocity_vec() + b.acceleration_vec() * dt;
                assert!(
                    (b.velocity_vec() - expect_v).norm() < 1e-9,
                    "velocity/acceleration coupling broken: {:?} vs {expect_v:?}",
                    b.velocity
                );
            }
        }
    }

    #[test]
    fn unknown_space_is_penalized_less_than_occupied() {
        let mpc = mpc();
        let p = Vector3::new(0.0, 0.0, 2.0);
        let occupied = SphereField::new().with_sphere(p, 1.0);
        let unknown = SphereField::new().with_known_radius(0.5);
        let pen_occ = mpc.obstacle_penalty(&p, &occupied);
        let pen_unk = mpc.obstacle_penalty(&p, &unknown);
        assert!(pen_unk > 0.0);
        assert!(pen_unk < pen_occ);
    }
}
