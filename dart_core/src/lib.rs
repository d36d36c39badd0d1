//! # DART Control Core
//!
//! Real-time onboard control core for multirotor aerial vehicles.
//! Hosts a deterministic three-tier pipeline: an SE(3) model-predictive
//! trajectory optimizer at planning rate, a geometric attitude/thrust
//! controller at 400–1000 Hz, and a motor mixer, supervised by a
//! heartbeat-driven safety watchdog and executed by a deadline-enforcing
//! scheduler.
//!
//! ## Architecture
//!
//! 1. **[`buffer`]** — lock-free versioned snapshot exchange (estimator → consumers)
//! 2. **[`mixer`]** — thrust/torque → per-motor PWM with saturation accounting
//! 3. **[`control`]** — high-rate SE(3) geometric controller
//! 4. **[`planner`]** — mid-rate SE(3) MPC with warm starts and a wall-clock cap
//! 5. **[`watchdog`]** — failsafe state machine Nominal → Degraded → Autonomous → Emergency
//! 6. **[`sched`]** — staged, priority-ordered periodic task executor
//! 7. **[`telemetry`]** — aggregated read-only runtime snapshot
//!
//! ## Zero-Allocation Hot Loops
//!
//! Controller and mixer state is pre-allocated at startup; the per-cycle
//! paths perform no heap allocation. The core performs no I/O — the
//! hardware adapter is the only component that touches the outside world.

pub mod buffer;
pub mod control;
pub mod mixer;
pub mod planner;
pub mod sched;
pub mod telemetry;
pub mod watchdog;
