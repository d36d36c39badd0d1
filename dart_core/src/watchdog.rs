//! Safety watchdog: heartbeat supervision and failsafe state machine.
//!
//! Flight capability degrades monotonically Nominal → Degraded →
//! Autonomous → Emergency; the only way back is an explicit external
//! [`reset`](SafetyWatchdog::reset). `current_state()` is a lock-free
//! atomic read so the high-rate controller can route around the watchdog
//! without contention. Events arrive either synchronously via
//! [`observe`](SafetyWatchdog::observe) or through the mpsc sender
//! handed to other tasks; `tick()` drains the queue and evaluates
//! timers.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use dart_common::error::SafetyEvent;

/// Sliding window over which safety violations are counted.
const VIOLATION_WINDOW: Duration = Duration::from_secs(10);

/// Non-finite commands within the window that force Emergency.
const COMMAND_INVALID_LIMIT: u32 = 3;

/// Sensor dropout longer than this is no longer a "single dropout".
const SENSOR_DROPOUT_MAX: Duration = Duration::from_secs(1);

/// Failsafe operating state, strictly ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[repr(u8)]
pub enum FlightMode {
    /// Full capability.
    Nominal = 0,
    /// Reduced trust in inputs; planner results are treated cautiously.
    Degraded = 1,
    /// Cloud link lost; planner frozen, last valid trajectory tracked.
    Autonomous = 2,
    /// Terminal: emergency landing until external reset.
    Emergency = 3,
}

impl FlightMode {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Nominal,
            1 => Self::Degraded,
            2 => Self::Autonomous,
            _ => Self::Emergency,
        }
    }
}

/// Watchdog timing parameters.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogParams {
    /// Cloud heartbeat timeout; expiry drives Autonomous.
    pub heartbeat_timeout: Duration,
    /// Violation count that forces Emergency; half of it forces
    /// Degraded.
    pub max_safety_violations: u32,
}

#[derive(Debug, Default)]
struct Counters {
    /// Saturating totals per event kind.
    totals: HashMap<SafetyEvent, u32>,
    /// Timestamps of recent non-critical violations.
    window: VecDeque<Instant>,
    /// Timestamps of recent non-finite commands.
    command_invalid: VecDeque<Instant>,
}

struct Inner {
    heartbeats: HashMap<String, Instant>,
    counters: Counters,
    /// Consecutive planner deadline misses.
    planner_misses: u32,
    /// Start of an ongoing sensor dropout, if any.
    sensor_dropout_since: Option<Instant>,
}

/// Heartbeat-driven supervisor. Cheap to share behind an `Arc`.
pub struct SafetyWatchdog {
    state: AtomicU8,
    params: WatchdogParams,
    inner: Mutex<Inner>,
    event_tx: Sender<SafetyEvent>,
    event_rx: Mutex<Receiver<SafetyEvent>>,
}

impl SafetyWatchdog {
    pub fn new(params: WatchdogParams) -> Self {
        let (event_tx, event_rx) = channel();
        Self {
            state: AtomicU8::new(FlightMode::Nominal as u8),
            params,
            inner: Mutex::new(Inner {
                heartbeats: HashMap::new(),
                counters: Counters::default(),
                planner_misses: 0,
                sensor_dropout_since: None,
            }),
            event_tx,
            event_rx: Mutex::new(event_rx),
        }
    }

    /// Sender for tasks that report events asynchronously; delivered at
    /// the next `tick()`.
    pub fn event_sender(&self) -> Sender<SafetyEvent> {
        self.event_tx.clone()
    }

    /// Current state. Lock-free; safe from the high-rate loop.
    #[inline]
    pub fn current_state(&self) -> FlightMode {
        FlightMode::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Record a heartbeat from `source`. Resets that source's timer.
    pub fn on_heartbeat(&self, source: &str) {
        self.on_heartbeat_at(source, Instant::now());
    }

    /// Timestamped variant for deterministic tests.
    pub fn on_heartbeat_at(&self, source: &str, now: Instant) {
        let mut inner = self.inner.lock();
        inner.heartbeats.insert(source.to_string(), now);
    }

    /// Feed an event synchronously.
    pub fn observe(&self, event: SafetyEvent) {
        self.observe_at(event, Instant::now());
    }

    /// Timestamped variant for deterministic tests.
    pub fn observe_at(&self, event: SafetyEvent, now: Instant) {
        let mut inner = self.inner.lock();
        let total = inner.counters.totals.entry(event).or_insert(0);
        *total = total.saturating_add(1);

        match event {
            SafetyEvent::ManualOverride => {
                drop(inner);
                self.escalate(FlightMode::Emergency, "manual override");
                return;
            }
            SafetyEvent::VelocityLimitExceeded | SafetyEvent::AltitudeLimitExceeded => {
                inner.counters.window.push_back(now);
                if self.current_state() >= FlightMode::Autonomous {
                    drop(inner);
                    self.escalate(FlightMode::Emergency, "envelope violation while autonomous");
                    return;
                }
            }
            SafetyEvent::CommandNonFinite => {
                inner.counters.command_invalid.push_back(now);
                inner.counters.window.push_back(now);
            }
            SafetyEvent::SensorInvalid => {
                inner.sensor_dropout_since.get_or_insert(now);
                inner.counters.window.push_back(now);
            }
            SafetyEvent::EscFault | SafetyEvent::HeartbeatTimeout => {
                inner.counters.window.push_back(now);
            }
        }
        drop(inner);
        self.evaluate(now);
    }

    /// Report the outcome of a planner cycle; two consecutive deadline
    /// misses degrade the system.
    pub fn on_planner_deadline(&self, missed: bool) {
        let misses = {
            let mut inner = self.inner.lock();
            if missed {
                inner.planner_misses = inner.planner_misses.saturating_add(1);
            } else {
                inner.planner_misses = 0;
            }
            inner.planner_misses
        };
        if misses >= 2 {
            self.escalate(FlightMode::Degraded, "planner deadline missed twice in a row");
        }
    }

    /// A Critical-priority task missed its deadline.
    pub fn on_critical_deadline_miss(&self, task: &str) {
        warn!(task, "critical task missed its deadline");
        let now = Instant::now();
        self.inner.lock().counters.window.push_back(now);
        self.evaluate(now);
    }

    /// A scheduled task panicked and was retired.
    pub fn on_task_fault(&self, task: &str) {
        error!(task, "scheduled task faulted");
        let now = Instant::now();
        self.inner.lock().counters.window.push_back(now);
        self.evaluate(now);
    }

    /// The estimator recovered; closes an ongoing sensor dropout.
    pub fn on_sensor_recovered(&self) {
        self.inner.lock().sensor_dropout_since = None;
    }

    /// Periodic evaluation of timers and queued events. Called by the
    /// scheduler at Critical priority.
    pub fn tick(&self, now: Instant) {
        // Drain asynchronously reported events first.
        loop {
            let event = { self.event_rx.lock().try_recv() };
            match event {
                Ok(e) => self.observe_at(e, now),
                Err(_) => break,
            }
        }
        self.evaluate(now);
    }

    /// Explicit external reset. The only transition toward Nominal.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.counters = Counters::default();
        inner.planner_misses = 0;
        inner.sensor_dropout_since = None;
        inner.heartbeats.clear();
        self.state
            .store(FlightMode::Nominal as u8, Ordering::Release);
        info!("watchdog reset to nominal");
    }

    /// Saturating total for one event kind.
    pub fn event_count(&self, event: SafetyEvent) -> u32 {
        *self.inner.lock().counters.totals.get(&event).unwrap_or(&0)
    }

    // ── Internals ──────────────────────────────────────────────────

    fn evaluate(&self, now: Instant) {
        let (hb_silent, window_count, invalid_count, dropout) = {
            let mut inner = self.inner.lock();
            let prune = |q: &mut VecDeque<Instant>| {
                while let Some(front) = q.front() {
                    if now.duration_since(*front) > VIOLATION_WINDOW {
                        q.pop_front();
                    } else {
                        break;
                    }
                }
            };
            prune(&mut inner.counters.window);
            prune(&mut inner.counters.command_invalid);

            let hb_silent = inner
                .heartbeats
                .get("cloud")
                .map(|last| now.saturating_duration_since(*last));
            let dropout = inner
                .sensor_dropout_since
                .map(|since| now.saturating_duration_since(since));
            (
                hb_silent,
                inner.counters.window.len() as u32,
                inner.counters.command_invalid.len() as u32,
                dropout,
            )
        };

        let timeout = self.params.heartbeat_timeout;

        // Emergency triggers.
        if let Some(silent) = hb_silent {
            if silent > 3 * timeout {
                self.escalate(FlightMode::Emergency, "heartbeat lost beyond 3x timeout");
                return;
            }
        }
        if invalid_count >= COMMAND_INVALID_LIMIT {
            self.escalate(FlightMode::Emergency, "repeated non-finite commands");
            return;
        }
        if window_count > self.params.max_safety_violations {
            self.escalate(FlightMode::Emergency, "safety violation budget exhausted");
            return;
        }

        // Autonomous trigger: cloud silent beyond the timeout.
        if let Some(silent) = hb_silent {
            if silent > timeout {
                self.escalate(FlightMode::Autonomous, "cloud heartbeat timed out");
                return;
            }
        }

        // Degraded triggers.
        if let Some(d) = dropout {
            if d < SENSOR_DROPOUT_MAX {
                self.escalate(FlightMode::Degraded, "sensor dropout");
                return;
            }
            // A dropout past the tolerance is no longer survivable
            // input loss.
            self.escalate(FlightMode::Emergency, "sensor dropout exceeded tolerance");
            return;
        }
        if window_count > self.params.max_safety_violations / 2 {
            self.escalate(FlightMode::Degraded, "safety violation count above half budget");
        }
    }

    /// Move toward `target` if it is more severe than the current
    /// state. Transitions are monotone by construction.
    fn escalate(&self, target: FlightMode, reason: &str) {
        let mut current = self.state.load(Ordering::Acquire);
        while target as u8 > current {
            match self.state.compare_exchange(
                current,
                target as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    match target {
                        FlightMode::Emergency => {
                            error!(reason, "failsafe escalation to EMERGENCY")
                        }
                        _ => warn!(?target, reason, "failsafe escalation"),
                    }
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }
}
