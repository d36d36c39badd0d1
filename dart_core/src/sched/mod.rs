//! Deadline-enforcing periodic task executor.
//!
//! ## Concurrency model
//!
//! One dedicated OS worker thread per registered task — a fixed pool
//! sized at finalization. Preemption between tasks is delegated to the
//! kernel: under the `rt` feature each worker runs SCHED_FIFO with a
//! priority mapped from its task priority, so Critical preempts all;
//! without the feature the workers are plain threads and deadline
//! accounting is best-effort (simulation mode).
//!
//! ## Registration lifecycle
//!
//! Staged: `Bootstrap` accepts registrations and validates statically;
//! `start()` runs the cross-task checks (dependency graph acyclic,
//! rate-monotonic utilization bound — warn only) and spawns the pool;
//! `Runtime` rejects registrations; `enable_dynamic()` re-opens a
//! restricted window where only Low/Background tasks may be added or
//! removed.
//!
//! ## Per-cycle contract
//!
//! Phase-aligned pacing: each wake targets `next_deadline += period`,
//! so jitter never accumulates as drift. Sleeps are clamped to zero.
//! Missed cycles are counted and skipped, never re-executed
//! back-to-back. A panicking callback is caught, the task is marked
//! faulted and retired, the watchdog is notified, and the remaining
//! tasks keep running.

pub mod task;

use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use dart_common::error::CoreError;

use crate::watchdog::SafetyWatchdog;
pub use task::{MissPolicy, Priority, TaskDescriptor, TaskKind, TaskStatsCell, TaskStatsSnapshot};

/// Rate-monotonic sufficient schedulability bound coefficient.
const RM_BOUND: f64 = 0.69;

/// How often trigger-driven workers re-check their cancel flag.
const TRIGGER_POLL: Duration = Duration::from_millis(50);

/// Registration lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Accepting registrations.
    Bootstrap,
    /// Running; registrations rejected.
    Runtime,
    /// Running; Low/Background tasks may be added and removed.
    Dynamic,
}

type Callback = Box<dyn FnMut() -> Result<(), CoreError> + Send>;

struct Registered {
    desc: TaskDescriptor,
    callback: Option<Callback>,
    stats: Arc<TaskStatsCell>,
    cancel: Arc<AtomicBool>,
    /// Pending releases for trigger-driven tasks.
    pending: Arc<(Mutex<u64>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

/// Priority-based, deadline-enforcing task executor.
pub struct Scheduler {
    stage: Stage,
    tasks: Vec<Registered>,
    watchdog: Option<Arc<SafetyWatchdog>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            stage: Stage::Bootstrap,
            tasks: Vec::new(),
            watchdog: None,
        }
    }

    /// Attach the watchdog that receives fault and deadline escalations.
    pub fn with_watchdog(mut self, watchdog: Arc<SafetyWatchdog>) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Register a task.
    ///
    /// Rejected after finalization unless the dynamic stage is enabled
    /// and the task is Low/Background priority. Placeholder callbacks —
    /// marked by a zero execution budget — are refused outright.
    pub fn register(
        &mut self,
        desc: TaskDescriptor,
        callback: Callback,
    ) -> Result<(), CoreError> {
        match self.stage {
            Stage::Bootstrap => {}
            Stage::Runtime => {
                return Err(CoreError::ConfigurationInvalid(format!(
                    "task '{}' registered after finalization",
                    desc.name
                )));
            }
            Stage::Dynamic => {
                if !desc.priority.dynamic_eligible() {
                    return Err(CoreError::ConfigurationInvalid(format!(
                        "task '{}' has priority {:?}; only Low/Background may be added dynamically",
                        desc.name, desc.priority
                    )));
                }
            }
        }
        self.validate_descriptor(&desc)?;

        let mut reg = Registered {
            desc,
            callback: Some(callback),
            stats: Arc::new(TaskStatsCell::default()),
            cancel: Arc::new(AtomicBool::new(false)),
            pending: Arc::new((Mutex::new(0), Condvar::new())),
            handle: None,
        };
        if self.stage == Stage::Dynamic {
            // The pool is live; spawn immediately.
            Self::spawn_worker(&mut reg, self.watchdog.clone());
        }
        debug!(task = %reg.desc.name, "task registered");
        self.tasks.push(reg);
        Ok(())
    }

    fn validate_descriptor(&self, desc: &TaskDescriptor) -> Result<(), CoreError> {
        if desc.name.is_empty() {
            return Err(CoreError::ConfigurationInvalid(
                "task name cannot be empty".to_string(),
            ));
        }
        if self.tasks.iter().any(|t| t.desc.name == desc.name) {
            return Err(CoreError::ConfigurationInvalid(format!(
                "duplicate task name '{}'",
                desc.name
            )));
        }
        if desc.expected_execution_time.is_zero() {
            return Err(CoreError::ConfigurationInvalid(format!(
                "task '{}' has a zero execution budget (placeholder callbacks are refused)",
                desc.name
            )));
        }
        if desc.period.is_zero() {
            return Err(CoreError::ConfigurationInvalid(format!(
                "task '{}' has a zero period",
                desc.name
            )));
        }
        if desc.deadline > desc.period {
            return Err(CoreError::ConfigurationInvalid(format!(
                "task '{}': deadline {:?} exceeds period {:?}",
                desc.name, desc.deadline, desc.period
            )));
        }
        if desc.expected_execution_time + desc.jitter_bound > desc.deadline {
            return Err(CoreError::ConfigurationInvalid(format!(
                "task '{}': execution budget + jitter bound exceeds deadline",
                desc.name
            )));
        }
        Ok(())
    }

    /// Finalize registration and spawn the worker pool.
    pub fn start(&mut self) -> Result<(), CoreError> {
        if self.stage != Stage::Bootstrap {
            return Err(CoreError::ConfigurationInvalid(
                "scheduler already started".to_string(),
            ));
        }
        self.check_dependencies()?;
        self.check_utilization();
        rt_setup()?;

        for reg in &mut self.tasks {
            Self::spawn_worker(reg, self.watchdog.clone());
        }
        self.stage = Stage::Runtime;
        info!(tasks = self.tasks.len(), "scheduler running");
        Ok(())
    }

    /// Open the restricted dynamic stage.
    pub fn enable_dynamic(&mut self) -> Result<(), CoreError> {
        if self.stage != Stage::Runtime {
            return Err(CoreError::ConfigurationInvalid(
                "dynamic stage requires a running scheduler".to_string(),
            ));
        }
        self.stage = Stage::Dynamic;
        Ok(())
    }

    /// Release one cycle of a trigger-driven (aperiodic/sporadic) task.
    pub fn trigger(&self, name: &str) -> Result<(), CoreError> {
        let reg = self
            .tasks
            .iter()
            .find(|t| t.desc.name == name)
            .ok_or_else(|| {
                CoreError::ConfigurationInvalid(format!("unknown task '{name}'"))
            })?;
        if matches!(reg.desc.kind, TaskKind::Periodic) {
            return Err(CoreError::ConfigurationInvalid(format!(
                "task '{name}' is periodic and cannot be triggered"
            )));
        }
        let (lock, cv) = &*reg.pending;
        *lock.lock() += 1;
        cv.notify_one();
        Ok(())
    }

    /// Cooperatively cancel and remove a task (dynamic stage, Low or
    /// Background only). The worker exits at its next tick boundary.
    pub fn remove(&mut self, name: &str) -> Result<(), CoreError> {
        if self.stage != Stage::Dynamic {
            return Err(CoreError::ConfigurationInvalid(
                "task removal requires the dynamic stage".to_string(),
            ));
        }
        let idx = self
            .tasks
            .iter()
            .position(|t| t.desc.name == name)
            .ok_or_else(|| {
                CoreError::ConfigurationInvalid(format!("unknown task '{name}'"))
            })?;
        if !self.tasks[idx].desc.priority.dynamic_eligible() {
            return Err(CoreError::ConfigurationInvalid(format!(
                "task '{name}' is not removable at runtime"
            )));
        }
        let mut reg = self.tasks.remove(idx);
        Self::stop_worker(&mut reg);
        Ok(())
    }

    /// Cancel everything and join the pool.
    pub fn shutdown(&mut self) {
        for reg in &mut self.tasks {
            reg.cancel.store(true, Ordering::Release);
            let (_, cv) = &*reg.pending;
            cv.notify_all();
        }
        for reg in &mut self.tasks {
            if let Some(handle) = reg.handle.take() {
                let _ = handle.join();
            }
        }
        info!("scheduler stopped");
    }

    /// Aggregated read-only statistics, copied atomically per task.
    pub fn stats(&self) -> Vec<TaskStatsSnapshot> {
        self.tasks
            .iter()
            .map(|t| t.stats.snapshot(&t.desc.name))
            .collect()
    }

    /// Stats handle for one task, usable from other tasks.
    pub fn stats_cell(&self, name: &str) -> Option<Arc<TaskStatsCell>> {
        self.tasks
            .iter()
            .find(|t| t.desc.name == name)
            .map(|t| Arc::clone(&t.stats))
    }

    // ── Validation ─────────────────────────────────────────────────

    fn check_dependencies(&self) -> Result<(), CoreError> {
        // Every dependency must be registered.
        for t in &self.tasks {
            for dep in &t.desc.dependencies {
                if !self.tasks.iter().any(|o| &o.desc.name == dep) {
                    return Err(CoreError::ConfigurationInvalid(format!(
                        "task '{}' depends on unregistered '{dep}'",
                        t.desc.name
                    )));
                }
            }
        }
        // DFS cycle detection. 0 = unvisited, 1 = on stack, 2 = done.
        let n = self.tasks.len();
        let mut color = vec![0u8; n];
        let index_of = |name: &str| self.tasks.iter().position(|t| t.desc.name == name);

        fn visit(
            tasks: &[Registered],
            color: &mut [u8],
            index_of: &dyn Fn(&str) -> Option<usize>,
            i: usize,
        ) -> bool {
            if color[i] == 1 {
                return false;
            }
            if color[i] == 2 {
                return true;
            }
            color[i] = 1;
            for dep in &tasks[i].desc.dependencies {
                if let Some(j) = index_of(dep) {
                    if !visit(tasks, color, index_of, j) {
                        return false;
                    }
                }
            }
            color[i] = 2;
            true
        }

        for i in 0..n {
            if !visit(&self.tasks, &mut color, &index_of, i) {
                return Err(CoreError::ConfigurationInvalid(format!(
                    "dependency cycle involving task '{}'",
                    self.tasks[i].desc.name
                )));
            }
        }
        Ok(())
    }

    /// Rate-monotonic sufficient condition `∑ Ci/Ti ≤ 0.69·n`.
    /// Violation logs a warning and does not fail.
    fn check_utilization(&self) {
        let periodic: Vec<_> = self
            .tasks
            .iter()
            .filter(|t| matches!(t.desc.kind, TaskKind::Periodic))
            .collect();
        if periodic.is_empty() {
            return;
        }
        let total: f64 = periodic.iter().map(|t| t.desc.utilization()).sum();
        let bound = RM_BOUND * periodic.len() as f64;
        if total > bound {
            warn!(
                utilization = total,
                bound, "aggregate CPU utilization exceeds the rate-monotonic bound"
            );
        } else {
            debug!(utilization = total, bound, "utilization check passed");
        }
    }

    // ── Workers ────────────────────────────────────────────────────

    fn spawn_worker(reg: &mut Registered, watchdog: Option<Arc<SafetyWatchdog>>) {
        let desc = reg.desc.clone();
        let stats = Arc::clone(&reg.stats);
        let cancel = Arc::clone(&reg.cancel);
        let pending = Arc::clone(&reg.pending);
        let mut callback = reg.callback.take().expect("callback already taken");

        let handle = std::thread::Builder::new()
            .name(desc.name.clone())
            .spawn(move || {
                rt_set_thread_priority(desc.priority.rt_priority());
                match desc.kind {
                    TaskKind::Periodic => {
                        periodic_loop(&desc, &mut callback, &stats, &cancel, watchdog.as_deref())
                    }
                    TaskKind::Aperiodic | TaskKind::Sporadic { .. } => triggered_loop(
                        &desc,
                        &mut callback,
                        &stats,
                        &cancel,
                        &pending,
                        watchdog.as_deref(),
                    ),
                }
            })
            .expect("spawn worker thread");
        reg.handle = Some(handle);
    }

    fn stop_worker(reg: &mut Registered) {
        reg.cancel.store(true, Ordering::Release);
        let (_, cv) = &*reg.pending;
        cv.notify_all();
        if let Some(handle) = reg.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ─── Worker loops ───────────────────────────────────────────────────

/// Execute one callback invocation with fault isolation and deadline
/// accounting. Returns false when the task must be retired.
fn run_cycle(
    desc: &TaskDescriptor,
    callback: &mut Callback,
    stats: &TaskStatsCell,
    watchdog: Option<&SafetyWatchdog>,
) -> bool {
    let start = Instant::now();
    let result = catch_unwind(AssertUnwindSafe(|| callback()));
    let elapsed = start.elapsed();
    stats.record(elapsed, desc.deadline);

    match result {
        Err(_) => {
            stats.mark_faulted();
            error!(task = %desc.name, "callback panicked; task retired");
            if let Some(wd) = watchdog {
                wd.on_task_fault(&desc.name);
            }
            return false;
        }
        Ok(Err(e)) => {
            stats.record_error();
            warn!(task = %desc.name, error = %e, "task cycle returned an error");
            if let (Some(wd), Some(event)) = (watchdog, e.safety_event()) {
                wd.observe(event);
            }
        }
        Ok(Ok(())) => {}
    }

    if elapsed > desc.deadline && desc.miss_policy == MissPolicy::Escalate {
        if let Some(wd) = watchdog {
            wd.on_critical_deadline_miss(&desc.name);
        }
    }
    true
}

/// Phase-aligned periodic loop (`next_deadline += period`, no drift
/// accumulation, negative sleeps clamped, missed cycles skipped).
fn periodic_loop(
    desc: &TaskDescriptor,
    callback: &mut Callback,
    stats: &TaskStatsCell,
    cancel: &AtomicBool,
    watchdog: Option<&SafetyWatchdog>,
) {
    let period = desc.period;
    let mut next_deadline = Instant::now() + period;

    loop {
        if cancel.load(Ordering::Acquire) {
            break;
        }
        let now = Instant::now();
        if next_deadline > now {
            std::thread::sleep(next_deadline - now);
        }
        if cancel.load(Ordering::Acquire) {
            break;
        }

        if !run_cycle(desc, callback, stats, watchdog) {
            break;
        }

        next_deadline += period;
        let now = Instant::now();
        if next_deadline < now {
            // Behind schedule: count the lost cycles and realign to the
            // next future tick instead of running catch-up cycles.
            let behind_ns = now.duration_since(next_deadline).as_nanos();
            let lost = (behind_ns / period.as_nanos().max(1)) as u64 + 1;
            stats.record_skipped(lost);
            next_deadline += period * lost as u32;
        }
    }
}

/// Trigger-driven loop for aperiodic and sporadic tasks. Sporadic
/// releases closer together than the minimum inter-arrival time are
/// delayed, not dropped.
fn triggered_loop(
    desc: &TaskDescriptor,
    callback: &mut Callback,
    stats: &TaskStatsCell,
    cancel: &AtomicBool,
    pending: &(Mutex<u64>, Condvar),
    watchdog: Option<&SafetyWatchdog>,
) {
    let min_gap = match desc.kind {
        TaskKind::Sporadic { min_interarrival } => Some(min_interarrival),
        _ => None,
    };
    let mut last_release: Option<Instant> = None;
    let (lock, cv) = pending;

    loop {
        {
            let mut count = lock.lock();
            while *count == 0 {
                if cancel.load(Ordering::Acquire) {
                    return;
                }
                cv.wait_for(&mut count, TRIGGER_POLL);
            }
            *count -= 1;
        }
        if cancel.load(Ordering::Acquire) {
            return;
        }

        if let (Some(gap), Some(last)) = (min_gap, last_release) {
            let since = last.elapsed();
            if since < gap {
                std::thread::sleep(gap - since);
            }
        }
        last_release = Some(Instant::now());

        if !run_cycle(desc, callback, stats, watchdog) {
            return;
        }
    }
}

// ─── RT setup (no-ops without the `rt` feature) ────────────────────

/// Lock all current and future memory pages and prefault the stack so
/// the workers never page-fault mid-cycle.
#[cfg(feature = "rt")]
fn rt_setup() -> Result<(), CoreError> {
    use nix::sys::mman::{mlockall, MlockallFlags};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| CoreError::ConfigurationInvalid(format!("mlockall failed: {e}")))?;
    prefault_stack();
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_setup() -> Result<(), CoreError> {
    Ok(()) // No-op in simulation mode
}

#[cfg(feature = "rt")]
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

/// Set SCHED_FIFO for the calling worker thread.
#[cfg(feature = "rt")]
fn rt_set_thread_priority(priority: i32) {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        warn!(
            priority,
            error = %std::io::Error::last_os_error(),
            "sched_setscheduler(SCHED_FIFO) failed; continuing best-effort"
        );
    }
}

#[cfg(not(feature = "rt"))]
fn rt_set_thread_priority(_priority: i32) {
    // No-op in simulation mode
}
