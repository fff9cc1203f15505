//! Recurring simulation task with explicit start/stop

use parking_lot::Mutex;
use std::sync::Weak;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::util::time::{TICK_DURATION, TICK_FAILURE_BACKOFF};

use super::session::Session;

/// Owns the handle of the running simulation task, if any
#[derive(Default)]
pub struct SimulationScheduler {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Spawn the tick loop. No-op (returns false) while one is running.
    pub fn start(&self, session: Weak<Session>) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }

        *task = Some(tokio::spawn(run(session)));
        info!("Simulation scheduler started");
        true
    }

    /// Cancel the tick loop. No tick starts after this returns.
    pub fn stop(&self) -> bool {
        match self.task.lock().take() {
            Some(task) => {
                task.abort();
                info!("Simulation scheduler stopped");
                true
            }
            None => false,
        }
    }
}

impl Drop for SimulationScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Tick loop. Holds only a weak reference so a dropped session ends it.
///
/// Time comes from the ticker's schedule rather than the wake-up clock, so
/// wake-up jitter never makes a tick look shorter than the period.
async fn run(session: Weak<Session>) {
    let mut ticker = interval(TICK_DURATION);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_tick: Option<Instant> = None;

    loop {
        let now = ticker.tick().await;

        let Some(session) = session.upgrade() else {
            debug!("Session dropped, simulation loop exiting");
            break;
        };

        let dt = last_tick
            .map(|last| now.saturating_duration_since(last).as_secs_f64())
            .unwrap_or(0.0);
        last_tick = Some(now);

        match session.simulation_tick(now, dt) {
            Ok(changed) if changed > 0 => {
                debug!(changed, "Simulation tick");
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Simulation tick failed, backing off");
                drop(session);
                sleep(TICK_FAILURE_BACKOFF).await;
                ticker.reset();
                last_tick = None;
            }
        }
    }
}
