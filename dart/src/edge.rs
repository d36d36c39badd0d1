//! Edge tier: the onboard real-time core wired end-to-end.
//!
//! Bootstrap order: vehicle params → adapter → state buffer → watchdog
//! → scheduler task registration → start. The scheduler hosts five
//! periodic tasks (watchdog tick, estimator, controller, planner,
//! telemetry) plus background housekeeping; a plain thread outside the
//! core receives cloud heartbeats and plans over UDP — the core itself
//! performs no I/O.

use parking_lot::{Mutex, RwLock};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use dart_common::config::DartConfig;
use dart_common::error::{CoreError, SafetyEvent};
use dart_common::state::{DroneState, ReferenceTrajectory};
use dart_common::vehicle::VehicleParams;
use dart_common::wire::{self, Heartbeat, PlanGate, MAGIC_HEARTBEAT, MAGIC_TRAJECTORY};
use dart_core::buffer::state_buffer;
use dart_core::control::{ControlMode, GeometricController, TuningProfile};
use dart_core::mixer::MotorMixer;
use dart_core::planner::{obstacles::FreeSpace, GoalState, PlanStatus, Se3Mpc};
use dart_core::sched::{Priority, Scheduler, TaskDescriptor, TaskStatsCell};
use dart_core::telemetry::TelemetrySnapshot;
use dart_core::watchdog::{FlightMode, SafetyWatchdog, WatchdogParams};
use dart_hal::sim::SimAdapter;
use dart_hal::HardwareAdapter;

/// How a tier ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Normal shutdown (operator request).
    Clean,
    /// The failsafe escalated to Emergency; the vehicle was landed.
    EmergencyLanded,
}

/// Altitude margin and speed below which the vehicle counts as landed.
const LANDED_ALTITUDE: f64 = 0.1;
const LANDED_SPEED: f64 = 0.2;

pub fn run(cfg: DartConfig) -> Result<Outcome, CoreError> {
    let params = VehicleParams::from_config(&cfg.vehicle)
        .map_err(|e| CoreError::ConfigurationInvalid(e.to_string()))?;

    if !cfg.hardware.connection_path.starts_with("sim://") {
        return Err(CoreError::UnsupportedCommand(format!(
            "backend '{}' is not available; only sim:// is built in",
            cfg.hardware.connection_path
        )));
    }
    let adapter = Arc::new(SimAdapter::new(params.clone()));
    adapter.connect().map_err(CoreError::from)?;
    info!(backend = adapter.name(), "hardware adapter connected");

    let watchdog = Arc::new(SafetyWatchdog::new(WatchdogParams {
        heartbeat_timeout: Duration::from_millis(cfg.communication.heartbeat_timeout_ms),
        max_safety_violations: cfg.safety.max_safety_violations,
    }));

    let (state_writer, state_reader) = state_buffer::<DroneState>("estimator");

    // The controller consumes a published plan atomically: under the
    // read lock it samples either the previous trajectory or the new
    // one as a whole, never a mix.
    let trajectory = Arc::new(RwLock::new(ReferenceTrajectory::hover(
        0,
        0.0,
        nalgebra::Vector3::new(0.0, 0.0, 1.0),
        0.0,
    )));
    let goal = Arc::new(Mutex::new(GoalState::hover_at(
        nalgebra::Vector3::new(0.0, 0.0, 1.0),
        0.0,
    )));

    let controller = Arc::new(Mutex::new(GeometricController::new(
        params.clone(),
        TuningProfile::standard(),
        cfg.safety.emergency_landing_velocity,
    )));
    let mixer = Arc::new(Mutex::new(MotorMixer::new(params.clone())?));
    let planner = Arc::new(Mutex::new(Se3Mpc::new(
        cfg.planning.clone(),
        cfg.safety.clone(),
        Duration::from_millis(dart_common::consts::PLAN_HARD_CAP_MS),
    )));

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::Release);
        })
        .map_err(|e| CoreError::ConfigurationInvalid(format!("signal handler: {e}")))?;
    }

    // Cloud link receiver lives outside the scheduler: it is I/O and
    // belongs to the process boundary, not the core.
    let link_handle = spawn_link_receiver(
        &cfg,
        Arc::clone(&watchdog),
        Arc::clone(&goal),
        Arc::clone(&running),
    )?;

    // ── Task registration (bootstrap stage) ────────────────────────

    let mut scheduler = Scheduler::new().with_watchdog(Arc::clone(&watchdog));
    let control_period = Duration::from_secs_f64(1.0 / cfg.hardware.control_frequency_hz);
    let planning_period = Duration::from_secs_f64(1.0 / cfg.hardware.planning_frequency_hz);
    let telemetry_period = Duration::from_secs_f64(1.0 / cfg.hardware.telemetry_frequency_hz);

    // Safety watchdog tick: Critical, 100 Hz, evaluates timers and the
    // flight envelope.
    {
        let wd = Arc::clone(&watchdog);
        let reader = state_reader.clone();
        let safety = cfg.safety.clone();
        scheduler.register(
            TaskDescriptor::periodic(
                "watchdog",
                Priority::Critical,
                Duration::from_millis(10),
                Duration::from_millis(10),
            )
            .with_budget(Duration::from_micros(500), Duration::from_micros(200)),
            Box::new(move || {
                if let Some(snap) = reader.latest() {
                    let s = &snap.state;
                    if !s.is_valid() {
                        wd.observe(SafetyEvent::SensorInvalid);
                    } else {
                        wd.on_sensor_recovered();
                        if s.velocity.norm() > safety.max_velocity {
                            wd.observe(SafetyEvent::VelocityLimitExceeded);
                        }
                        if s.position.z > safety.max_altitude + 1e-6
                            || s.position.z < safety.min_altitude - 1e-6
                        {
                            wd.observe(SafetyEvent::AltitudeLimitExceeded);
                        }
                    }
                }
                wd.tick(Instant::now());
                Ok(())
            }),
        )?;
    }

    // Estimator: steps the simulation and publishes the snapshot.
    {
        let sim = Arc::clone(&adapter);
        let dt = control_period.as_secs_f64();
        let mut writer = state_writer;
        scheduler.register(
            TaskDescriptor::periodic("estimator", Priority::High, control_period, control_period)
                .with_budget(control_period / 8, control_period / 16),
            Box::new(move || {
                sim.step(dt);
                let state = sim.get_state().map_err(CoreError::from)?;
                writer.update(state, state.t);
                Ok(())
            }),
        )?;
    }

    // Geometric controller: highest snapshot at cycle start → command.
    {
        let wd = Arc::clone(&watchdog);
        let reader = state_reader.clone();
        let traj = Arc::clone(&trajectory);
        let ctrl = Arc::clone(&controller);
        let mix = Arc::clone(&mixer);
        let sim = Arc::clone(&adapter);
        let dt = control_period.as_secs_f64();
        let mut last_version = 0u64;
        scheduler.register(
            TaskDescriptor::periodic("controller", Priority::High, control_period, control_period)
                .with_budget(control_period / 8, control_period / 16)
                .with_dependency("estimator"),
            Box::new(move || {
                // Tolerate the estimator not having published yet.
                let Some(snap) = reader.poll(last_version) else {
                    return Ok(());
                };
                last_version = snap.version;

                let mode = match wd.current_state() {
                    FlightMode::Emergency => ControlMode::EmergencyLand,
                    _ => ControlMode::Active,
                };
                let reference = traj.read().sample_at(snap.state.t);
                let out = {
                    let mut c = ctrl.lock();
                    c.set_mode(mode);
                    c.update(&snap.state, &reference, dt)
                };
                if let Some(fault) = out.fault {
                    return Err(fault);
                }
                let motor_cmd = mix.lock().mix(&out.command)?;
                sim.send_command(&motor_cmd).map_err(CoreError::from)?;
                Ok(())
            }),
        )?;
    }

    // SE(3) MPC: frozen once the watchdog leaves Degraded; warm start
    // discarded on any mode change.
    {
        let wd = Arc::clone(&watchdog);
        let reader = state_reader.clone();
        let traj = Arc::clone(&trajectory);
        let goal = Arc::clone(&goal);
        let pln = Arc::clone(&planner);
        let mut prev_mode = FlightMode::Nominal;
        scheduler.register(
            TaskDescriptor::periodic(
                "planner",
                Priority::Medium,
                planning_period,
                Duration::from_millis(dart_common::consts::PLAN_BUDGET_MS),
            )
            .with_budget(Duration::from_millis(40), Duration::from_millis(5))
            .with_dependency("estimator"),
            Box::new(move || {
                let mode = wd.current_state();
                if mode != prev_mode {
                    pln.lock().reset();
                    prev_mode = mode;
                }
                if mode >= FlightMode::Autonomous {
                    // Planner frozen: the controller keeps tracking the
                    // last valid trajectory.
                    return Ok(());
                }
                let Some(snap) = reader.latest() else {
                    return Ok(());
                };
                let g = *goal.lock();
                let outcome = pln.lock().plan(&snap.state, &g, &FreeSpace);
                wd.on_planner_deadline(outcome.status == PlanStatus::DeadlineMiss);
                if let Some(e) = outcome.error() {
                    warn!(error = %e, "planner degraded");
                }
                *traj.write() = outcome.trajectory;
                Ok(())
            }),
        )?;
    }

    // Telemetry: aggregate read-only snapshots as one JSON line.
    {
        let cells: Vec<(String, Arc<TaskStatsCell>)> =
            ["watchdog", "estimator", "controller", "planner"]
                .iter()
                .map(|n| {
                    (
                        n.to_string(),
                        scheduler.stats_cell(n).expect("task registered above"),
                    )
                })
                .collect();
        let wd = Arc::clone(&watchdog);
        let reader = state_reader.clone();
        let ctrl = Arc::clone(&controller);
        let pln = Arc::clone(&planner);
        let mix = Arc::clone(&mixer);
        scheduler.register(
            TaskDescriptor::periodic(
                "telemetry",
                Priority::Low,
                telemetry_period,
                Duration::from_millis(100),
            )
            .with_budget(Duration::from_millis(5), Duration::from_millis(2)),
            Box::new(move || {
                let snapshot = TelemetrySnapshot {
                    t: reader.latest().map(|s| s.state.t).unwrap_or(0.0),
                    flight_mode: wd.current_state(),
                    control_mode: ctrl.lock().mode(),
                    plan_status: pln.lock().last_status(),
                    planner: pln.lock().stats(),
                    mixer: mix.lock().stats(),
                    state_buffer: reader.stats(),
                    tasks: cells.iter().map(|(n, c)| c.snapshot(n)).collect(),
                };
                info!(target: "telemetry", "{}", snapshot.to_json());
                Ok(())
            }),
        )?;
    }

    // Housekeeping: low-value periodic upkeep at the bottom priority.
    {
        let reader = state_reader.clone();
        scheduler.register(
            TaskDescriptor::periodic(
                "housekeeping",
                Priority::Background,
                Duration::from_secs(1),
                Duration::from_secs(1),
            )
            .with_budget(Duration::from_millis(5), Duration::from_millis(5)),
            Box::new(move || {
                let stats = reader.stats();
                debug!(
                    updates = stats.updates,
                    reads = stats.reads,
                    stale = stats.stale_reads,
                    "state buffer counters"
                );
                Ok(())
            }),
        )?;
    }

    scheduler.start()?;
    info!("edge tier running");

    // Supervise until the operator stops the process or an Emergency
    // landing completes.
    let outcome = loop {
        if !running.load(Ordering::Acquire) {
            break if watchdog.current_state() == FlightMode::Emergency {
                Outcome::EmergencyLanded
            } else {
                Outcome::Clean
            };
        }
        if watchdog.current_state() == FlightMode::Emergency {
            if let Some(snap) = state_reader.latest() {
                let landed = snap.state.position.z <= cfg.safety.min_altitude + LANDED_ALTITUDE
                    && snap.state.velocity.norm() < LANDED_SPEED;
                if landed {
                    info!("emergency landing complete");
                    break Outcome::EmergencyLanded;
                }
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    running.store(false, Ordering::Release);
    scheduler.shutdown();
    let _ = link_handle.join();
    adapter.emergency_stop().map_err(CoreError::from)?;
    adapter.disconnect().map_err(CoreError::from)?;
    Ok(outcome)
}

/// Receive cloud heartbeats and plans over UDP, feeding the watchdog
/// and the planner goal. Plans must carry strictly increasing ids.
fn spawn_link_receiver(
    cfg: &DartConfig,
    watchdog: Arc<SafetyWatchdog>,
    goal: Arc<Mutex<GoalState>>,
    running: Arc<AtomicBool>,
) -> Result<std::thread::JoinHandle<()>, CoreError> {
    let socket = UdpSocket::bind(&cfg.communication.bind_address).map_err(|e| {
        CoreError::HardwareFault(format!("bind {}: {e}", cfg.communication.bind_address))
    })?;
    socket
        .set_read_timeout(Some(Duration::from_millis(100)))
        .map_err(|e| CoreError::HardwareFault(e.to_string()))?;
    info!(addr = %cfg.communication.bind_address, "cloud link listening");

    let handle = std::thread::Builder::new()
        .name("cloud-link".to_string())
        .spawn(move || {
            let mut gate = PlanGate::new();
            let mut buf = [0u8; wire::TRAJECTORY_MAX_LEN];
            while running.load(Ordering::Acquire) {
                let n = match socket.recv(&mut buf) {
                    Ok(n) => n,
                    Err(_) => continue, // timeout or transient error
                };
                if n < 2 {
                    continue;
                }
                let magic = u16::from_le_bytes([buf[0], buf[1]]);
                if magic == MAGIC_HEARTBEAT {
                    if Heartbeat::decode(&buf[..n]).is_ok() {
                        watchdog.on_heartbeat("cloud");
                    }
                } else if magic == MAGIC_TRAJECTORY {
                    match wire::decode_trajectory(&buf[..n]).and_then(|t| gate.admit(t)) {
                        Ok(traj) => {
                            if let Some(last) = traj.samples.last() {
                                *goal.lock() = GoalState {
                                    position: last.position_vec(),
                                    velocity: last.velocity_vec(),
                                    yaw: last.yaw,
                                };
                            }
                        }
                        Err(e) => warn!(error = %e, "rejected cloud plan"),
                    }
                }
            }
        })
        .map_err(|e| CoreError::HardwareFault(format!("spawn link thread: {e}")))?;
    Ok(handle)
}
