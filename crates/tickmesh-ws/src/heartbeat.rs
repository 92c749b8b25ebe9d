//! Heartbeat monitoring for WebSocket connections.
//!
//! Sends a periodic heartbeat via callback and checks pong staleness on a
//! separate timer. Staleness is reported through an `on_timeout` callback,
//! once per episode; closing the socket is the caller's job.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickmesh_core::CoreError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Heartbeat timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// How often to send a heartbeat.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Max silence since the last pong before the link is stale.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// How often staleness is checked.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
}

fn default_interval_ms() -> u64 {
    30_000
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_check_interval_ms() -> u64 {
    10_000
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            check_interval_ms: default_check_interval_ms(),
        }
    }
}

impl HeartbeatConfig {
    /// `timeout_ms` must exceed `interval_ms`.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.interval_ms == 0 || self.check_interval_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "heartbeat intervals must be > 0".to_string(),
            ));
        }
        if self.timeout_ms <= self.interval_ms {
            return Err(CoreError::InvalidConfig(format!(
                "heartbeat timeout_ms ({}) must exceed interval_ms ({})",
                self.timeout_ms, self.interval_ms
            )));
        }
        Ok(())
    }
}

struct RunningTimers {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Per-connection liveness tracker.
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    /// Last pong received (or start time if none yet).
    last_pong: Arc<Mutex<Instant>>,
    /// Latched once a staleness episode has been reported.
    timed_out: Arc<AtomicBool>,
    /// Total staleness episodes reported.
    timeout_count: Arc<AtomicU64>,
    timers: Mutex<Option<RunningTimers>>,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            last_pong: Arc::new(Mutex::new(Instant::now())),
            timed_out: Arc::new(AtomicBool::new(false)),
            timeout_count: Arc::new(AtomicU64::new(0)),
            timers: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Start both timers. Restarting replaces any timers already running.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start<H, T>(&self, on_heartbeat: H, on_timeout: T)
    where
        H: Fn() + Send + 'static,
        T: Fn() + Send + 'static,
    {
        self.stop();

        let now = Instant::now();
        *self.last_pong.lock() = now;
        self.timed_out.store(false, Ordering::Release);

        let heartbeat_every = Duration::from_millis(self.config.interval_ms);
        let check_every = Duration::from_millis(self.config.check_interval_ms);
        let timeout = Duration::from_millis(self.config.timeout_ms);

        let token = CancellationToken::new();
        let child = token.clone();
        let last_pong = self.last_pong.clone();
        let timed_out = self.timed_out.clone();
        let timeout_count = self.timeout_count.clone();

        let handle = tokio::spawn(async move {
            let mut heartbeat_timer = interval_at(now + heartbeat_every, heartbeat_every);
            heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut check_timer = interval_at(now + check_every, check_every);
            check_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = child.cancelled() => break,
                    _ = heartbeat_timer.tick() => {
                        debug!("Heartbeat due");
                        on_heartbeat();
                    }
                    _ = check_timer.tick() => {
                        let silent_for = last_pong.lock().elapsed();
                        if silent_for > timeout && !timed_out.swap(true, Ordering::AcqRel) {
                            timeout_count.fetch_add(1, Ordering::Relaxed);
                            warn!(silent_ms = silent_for.as_millis() as u64, "Heartbeat stale");
                            on_timeout();
                        }
                    }
                }
            }
        });

        *self.timers.lock() = Some(RunningTimers { token, handle });
    }

    /// Record that a pong (or equivalent liveness frame) was received.
    ///
    /// Ends the current staleness episode, if any.
    pub fn record_pong(&self) {
        *self.last_pong.lock() = Instant::now();
        self.timed_out.store(false, Ordering::Release);
    }

    /// Time since the last pong.
    pub fn since_last_pong(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Whether the link is currently past the timeout.
    pub fn is_stale(&self) -> bool {
        self.since_last_pong() > Duration::from_millis(self.config.timeout_ms)
    }

    /// Staleness episodes reported since creation.
    pub fn timeout_count(&self) -> u64 {
        self.timeout_count.load(Ordering::Relaxed)
    }

    /// Whether timers are active.
    pub fn is_running(&self) -> bool {
        self.timers.lock().is_some()
    }

    /// Cancel both timers. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(timers) = self.timers.lock().take() {
            timers.token.cancel();
            timers.handle.abort();
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
