//! Cloud tier: heartbeat and plan publisher.
//!
//! Stands in for the offboard side of the link so the edge tier can be
//! exercised end-to-end: emits heartbeats at the configured interval
//! and a goal plan (monotonic plan ids) at the planning rate. The real
//! global mission planner is an external collaborator; this tier only
//! speaks its wire protocol.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use dart_common::config::DartConfig;
use dart_common::error::CoreError;
use dart_common::state::ReferenceTrajectory;
use dart_common::wire::{encode_trajectory, Heartbeat};

use crate::edge::Outcome;

/// Source identifier carried in heartbeat frames.
const CLOUD_SOURCE_ID: u8 = 1;

pub fn run(cfg: DartConfig, peer: Option<String>) -> Result<Outcome, CoreError> {
    let target = peer.unwrap_or_else(|| cfg.communication.bind_address.clone());
    let socket = UdpSocket::bind("0.0.0.0:0")
        .map_err(|e| CoreError::HardwareFault(format!("bind: {e}")))?;
    socket
        .connect(&target)
        .map_err(|e| CoreError::HardwareFault(format!("connect {target}: {e}")))?;
    info!(%target, "cloud tier publishing");

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::Release);
        })
        .map_err(|e| CoreError::ConfigurationInvalid(format!("signal handler: {e}")))?;
    }

    let heartbeat_interval = Duration::from_millis(cfg.communication.heartbeat_interval_ms);
    let plan_interval = Duration::from_secs_f64(1.0 / cfg.hardware.planning_frequency_hz);
    // Mission stub: hold 2 m above the origin.
    let goal = nalgebra::Vector3::new(0.0, 0.0, 2.0);

    let start = Instant::now();
    let mut seq = 0u32;
    let mut plan_id = 0u64;
    let mut next_heartbeat = Instant::now();
    let mut next_plan = Instant::now();

    while running.load(Ordering::Acquire) {
        let now = Instant::now();

        if now >= next_heartbeat {
            seq = seq.wrapping_add(1);
            let hb = Heartbeat {
                source: CLOUD_SOURCE_ID,
                seq,
                timestamp_us: start.elapsed().as_micros() as u64,
            };
            if let Err(e) = socket.send(&hb.encode()) {
                debug!(error = %e, "heartbeat send failed");
            }
            next_heartbeat += heartbeat_interval;
        }

        if now >= next_plan {
            plan_id += 1;
            let traj =
                ReferenceTrajectory::hover(plan_id, start.elapsed().as_secs_f64(), goal, 0.0);
            if let Err(e) = socket.send(&encode_trajectory(&traj)) {
                debug!(error = %e, "plan send failed");
            }
            next_plan += plan_interval;
        }

        let wake = next_heartbeat.min(next_plan);
        let now = Instant::now();
        if wake > now {
            std::thread::sleep((wake - now).min(Duration::from_millis(50)));
        }
    }

    info!("cloud tier stopped");
    Ok(Outcome::Clean)
}
