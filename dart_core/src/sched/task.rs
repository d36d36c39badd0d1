//! Task descriptors and per-task execution statistics.

use heapless::HistoryBuffer;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Scheduling priority, strictly totally ordered. Critical preempts all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub enum Priority {
    Background = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Priority {
    /// SCHED_FIFO priority used when the `rt` feature is enabled.
    pub fn rt_priority(&self) -> i32 {
        match self {
            Self::Critical => 90,
            Self::High => 80,
            Self::Medium => 60,
            Self::Low => 40,
            Self::Background => 20,
        }
    }

    /// Whether the task may be added or removed in the dynamic stage.
    pub fn dynamic_eligible(&self) -> bool {
        matches!(self, Self::Low | Self::Background)
    }
}

/// Activation pattern of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Released every `period`, phase-aligned.
    Periodic,
    /// Released by an explicit trigger, no arrival bound.
    Aperiodic,
    /// Released by trigger, with a minimum inter-arrival time.
    Sporadic { min_interarrival: Duration },
}

/// What to do when a cycle exceeds its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissPolicy {
    /// Count and continue (default).
    #[default]
    Continue,
    /// Count and escalate to the safety watchdog (forced for Critical).
    Escalate,
}

/// Static description of a schedulable task.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub name: String,
    pub priority: Priority,
    pub kind: TaskKind,
    /// Release period (Periodic) or stats horizon (others).
    pub period: Duration,
    /// Per-cycle deadline; must not exceed the period.
    pub deadline: Duration,
    /// Budgeted execution time; zero marks a placeholder and is refused.
    pub expected_execution_time: Duration,
    /// Tolerated release jitter.
    pub jitter_bound: Duration,
    /// Names of tasks that must be registered with this one.
    pub dependencies: Vec<String>,
    pub miss_policy: MissPolicy,
}

impl TaskDescriptor {
    /// Convenience constructor for a periodic task.
    pub fn periodic(name: &str, priority: Priority, period: Duration, deadline: Duration) -> Self {
        Self {
            name: name.to_string(),
            priority,
            kind: TaskKind::Periodic,
            period,
            deadline,
            expected_execution_time: deadline / 4,
            jitter_bound: deadline / 10,
            dependencies: Vec::new(),
            miss_policy: if priority == Priority::Critical {
                MissPolicy::Escalate
            } else {
                MissPolicy::Continue
            },
        }
    }

    pub fn with_budget(mut self, expected: Duration, jitter: Duration) -> Self {
        self.expected_execution_time = expected;
        self.jitter_bound = jitter;
        self
    }

    pub fn with_dependency(mut self, name: &str) -> Self {
        self.dependencies.push(name.to_string());
        self
    }

    /// Fraction of one CPU this task consumes (rate-monotonic C/T).
    pub fn utilization(&self) -> f64 {
        self.expected_execution_time.as_secs_f64() / self.period.as_secs_f64().max(1e-9)
    }
}

// ─── Statistics ─────────────────────────────────────────────────────

/// Rolling window size for percentile estimation.
const WINDOW: usize = 128;

/// Shared per-task counters. Written only from the owning worker;
/// snapshots are read from other tasks via atomic copies.
#[derive(Debug, Default)]
pub struct TaskStatsCell {
    cycles: AtomicU64,
    deadline_misses: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
    sum_ns: AtomicU64,
    max_ns: AtomicU64,
    faulted: AtomicBool,
    window: Mutex<HistoryBuffer<u64, WINDOW>>,
}

/// Point-in-time statistics copy exposed read-only.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TaskStatsSnapshot {
    pub name: String,
    pub cycles: u64,
    pub deadline_misses: u64,
    pub skipped: u64,
    pub errors: u64,
    pub faulted: bool,
    pub mean_us: f64,
    pub max_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    /// Cycles that met the deadline and returned Ok.
    pub success_rate: f64,
}

impl TaskStatsCell {
    /// Record one execution. O(1), single mutex on the rolling window.
    pub fn record(&self, duration: Duration, deadline: Duration) {
        let ns = duration.as_nanos() as u64;
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.sum_ns.fetch_add(ns, Ordering::Relaxed);
        self.max_ns.fetch_max(ns, Ordering::Relaxed);
        if duration > deadline {
            self.deadline_misses.fetch_add(1, Ordering::Relaxed);
        }
        self.window.lock().write(ns);
    }

    pub fn record_skipped(&self, n: u64) {
        self.skipped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_faulted(&self) {
        self.faulted.store(true, Ordering::Release);
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    pub fn deadline_misses(&self) -> u64 {
        self.deadline_misses.load(Ordering::Relaxed)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Aggregate into a snapshot, computing the percentile estimates
    /// from the rolling window.
    pub fn snapshot(&self, name: &str) -> TaskStatsSnapshot {
        let cycles = self.cycles.load(Ordering::Relaxed);
        let misses = self.deadline_misses.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let sum_ns = self.sum_ns.load(Ordering::Relaxed);
        let max_ns = self.max_ns.load(Ordering::Relaxed);

        let mut sorted: Vec<u64> = {
            let window = self.window.lock();
            window.oldest_ordered().copied().collect()
        };
        sorted.sort_unstable();
        let pct = |q: f64| -> f64 {
            if sorted.is_empty() {
                return 0.0;
            }
            let idx = ((sorted.len() as f64 - 1.0) * q).round() as usize;
            sorted[idx] as f64 / 1000.0
        };

        let failures = misses + errors;
        TaskStatsSnapshot {
            name: name.to_string(),
            cycles,
            deadline_misses: misses,
            skipped: self.skipped.load(Ordering::Relaxed),
            errors,
            faulted: self.is_faulted(),
            mean_us: if cycles == 0 {
                0.0
            } else {
                sum_ns as f64 / cycles as f64 / 1000.0
            },
            max_us: max_ns as f64 / 1000.0,
            p95_us: pct(0.95),
            p99_us: pct(0.99),
            success_rate: if cycles == 0 {
                1.0
            } else {
                1.0 - (failures.min(cycles) as f64 / cycles as f64)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_total_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert!(Priority::Low > Priority::Background);
    }

    #[test]
    fn only_low_and_background_are_dynamic() {
        assert!(Priority::Low.dynamic_eligible());
        assert!(Priority::Background.dynamic_eligible());
        assert!(!Priority::Critical.dynamic_eligible());
        assert!(!Priority::High.dynamic_eligible());
        assert!(!Priority::Medium.dynamic_eligible());
    }

    #[test]
    fn critical_defaults_to_escalating_miss_policy() {
        let d = TaskDescriptor::periodic(
            "wd",
            Priority::Critical,
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        assert_eq!(d.miss_policy, MissPolicy::Escalate);
        let d = TaskDescriptor::periodic(
            "telemetry",
            Priority::Low,
            Duration::from_millis(100),
            Duration::from_millis(100),
        );
        assert_eq!(d.miss_policy, MissPolicy::Continue);
    }

    #[test]
    fn utilization_is_c_over_t() {
        let d = TaskDescriptor::periodic(
            "ctrl",
            Priority::High,
            Duration::from_millis(10),
            Duration::from_millis(10),
        )
        .with_budget(Duration::from_millis(2), Duration::from_micros(100));
        assert!((d.utilization() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn stats_record_and_snapshot() {
        let cell = TaskStatsCell::default();
        let deadline = Duration::from_millis(10);
        for i in 1..=100u64 {
            cell.record(Duration::from_micros(i * 10), deadline);
        }
        // One overrun.
        cell.record(Duration::from_millis(20), deadline);

        let snap = cell.snapshot("t");
        assert_eq!(snap.cycles, 101);
        assert_eq!(snap.deadline_misses, 1);
        assert!(snap.max_us >= 20_000.0);
        assert!(snap.p95_us >= snap.mean_us);
        assert!(snap.p99_us >= snap.p95_us);
        assert!((snap.success_rate - 100.0 / 101.0).abs() < 1e-9);
    }

    #[test]
    fn empty_stats_snapshot_is_zeroed() {
        let snap = TaskStatsCell::default().snapshot("idle");
        assert_eq!(snap.cycles, 0);
        assert_eq!(snap.mean_us, 0.0);
        assert_eq!(snap.success_rate, 1.0);
    }
}
