//! Session: registry, connections and simulation for one game

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{SessionConfig, SimulationConfig, TuningError, TuningOverrides};
use crate::ws::fanout::{ConnectionHandle, ConnectionTable};
use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::motion::SimulationError;
use super::registry::{
    GamePhase, ParticipantCounts, RegistryError, SessionRegistry, SessionSnapshot,
};
use super::scheduler::SimulationScheduler;

/// Points credited to the killer named in a kill report
pub const KILL_POINTS: u32 = 1;

/// How a connection attached to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// New participant, announced to everyone else
    Joined,
    /// Known participant took over its record silently
    Reconnected,
}

/// What the connection handler should do after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Disconnect,
}

/// Connection failures collected during a broadcast
type Failures = Vec<(String, Uuid)>;

/// One game's worth of shared state.
///
/// All registry mutations, and the broadcasts they trigger, happen inside a
/// single registry lock section; connection and grace-timer bookkeeping is
/// done under that same lock so a reconnect can never race a removal.
pub struct Session {
    config: SessionConfig,
    registry: Mutex<SessionRegistry>,
    connections: ConnectionTable,
    scheduler: SimulationScheduler,
    bootstrapped: AtomicBool,
}

impl Session {
    pub fn new(config: SessionConfig, simulation: SimulationConfig) -> Arc<Self> {
        let registry = SessionRegistry::new(&config, simulation);
        Arc::new(Self {
            config,
            registry: Mutex::new(registry),
            connections: ConnectionTable::new(),
            scheduler: SimulationScheduler::new(),
            bootstrapped: AtomicBool::new(false),
        })
    }

    /// Attach a connection for `player_id` and send it the full state.
    ///
    /// A known id (including one inside its grace period) keeps its record:
    /// the old handle is closed and nobody is told. A new id is added and
    /// announced with `player_joined`.
    pub fn connect(
        self: &Arc<Self>,
        player_id: &str,
        handle: ConnectionHandle,
    ) -> Result<JoinOutcome, RegistryError> {
        let conn_id = handle.id();

        let (outcome, failed) = {
            let mut registry = self.registry.lock();
            let known = registry
                .get(player_id)
                .is_some_and(|p| !p.is_simulated());
            if !known {
                registry.add_participant(player_id)?;
            }

            self.connections.cancel_removal(player_id);
            let mut failed = Vec::new();
            // A peer gone before the first frame goes through the grace path
            if let Err(e) = handle.send(ServerMsg::GameState(registry.snapshot())) {
                warn!(player_id = %player_id, error = %e, "Initial state not delivered");
                failed.push((player_id.to_string(), conn_id));
            }
            if let Some(stale) = self.connections.register(player_id, handle) {
                debug!(player_id = %player_id, conn_id = %stale.id(), "Closing replaced connection");
                stale.close();
            }

            if known {
                (JoinOutcome::Reconnected, failed)
            } else {
                let joined = ServerMsg::PlayerJoined {
                    player_id: player_id.to_string(),
                };
                failed.extend(self.connections.broadcast(&joined, Some(player_id)));
                (JoinOutcome::Joined, failed)
            }
        };

        info!(player_id = %player_id, conn_id = %conn_id, outcome = ?outcome, "Player connected");
        self.handle_failures(failed);
        self.bootstrap_bots();
        Ok(outcome)
    }

    /// Apply one inbound message from `player_id` on connection `conn_id`
    pub fn handle_message(
        self: &Arc<Self>,
        player_id: &str,
        conn_id: Uuid,
        msg: ClientMsg,
    ) -> Flow {
        if !self.connections.is_current(player_id, conn_id) {
            debug!(player_id = %player_id, conn_id = %conn_id, "Message from replaced connection");
            return Flow::Disconnect;
        }

        let failed = match msg {
            ClientMsg::PlayerMove { position } => {
                let mut registry = self.registry.lock();
                if !registry.update_position(player_id, position.clone()) {
                    return Flow::Continue;
                }
                let moved = ServerMsg::PlayerMoved {
                    player_id: player_id.to_string(),
                    position,
                };
                self.connections.broadcast(&moved, Some(player_id))
            }
            ClientMsg::PlayerEliminated => {
                let mut registry = self.registry.lock();
                if !registry.eliminate(player_id) {
                    return Flow::Continue;
                }
                info!(player_id = %player_id, "Player eliminated");
                let eliminated = ServerMsg::PlayerEliminated {
                    player_id: player_id.to_string(),
                };
                self.connections.broadcast(&eliminated, None)
            }
            ClientMsg::PlayerKill(report) => {
                let mut registry = self.registry.lock();
                let mut failed = self
                    .connections
                    .broadcast(&ServerMsg::kill_feed(&report), None);
                if let Some(view) = registry.add_score(&report.killer, KILL_POINTS) {
                    let updated = ServerMsg::PlayerUpdated {
                        player_id: report.killer.clone(),
                        player: view,
                    };
                    failed.extend(self.connections.broadcast(&updated, None));
                }
                failed
            }
            ClientMsg::ChatMessage(line) => {
                let _registry = self.registry.lock();
                self.connections
                    .broadcast(&ServerMsg::ChatMessage(line), None)
            }
            ClientMsg::PlayerDisconnect => {
                self.disconnect(player_id, conn_id);
                return Flow::Disconnect;
            }
        };

        self.handle_failures(failed);
        Flow::Continue
    }

    /// Explicit leave: remove immediately, no grace period
    pub fn disconnect(self: &Arc<Self>, player_id: &str, conn_id: Uuid) {
        let failed = {
            let mut registry = self.registry.lock();
            if self
                .connections
                .remove_if_current(player_id, conn_id)
                .is_none()
            {
                return;
            }
            self.connections.cancel_removal(player_id);
            if registry.remove_participant(player_id).is_none() {
                return;
            }
            let left = ServerMsg::PlayerLeft {
                player_id: player_id.to_string(),
            };
            self.connections.broadcast(&left, None)
        };

        info!(player_id = %player_id, "Player left");
        self.handle_failures(failed);
    }

    /// Transport dropped or a send failed. The participant stays for the
    /// grace period; if no new connection shows up it is removed.
    pub fn connection_lost(self: &Arc<Self>, player_id: &str, conn_id: Uuid) {
        let _registry = self.registry.lock();
        let Some(handle) = self.connections.remove_if_current(player_id, conn_id) else {
            return;
        };
        handle.close();

        let session = Arc::downgrade(self);
        let grace = self.config.grace_period;
        let id = player_id.to_string();
        let timer = tokio::spawn(async move {
            sleep(grace).await;
            if let Some(session) = session.upgrade() {
                session.expire(&id, conn_id);
            }
        });
        self.connections.schedule_removal(player_id, conn_id, timer);

        info!(
            player_id = %player_id,
            conn_id = %conn_id,
            grace_ms = grace.as_millis() as u64,
            "Connection lost, waiting for reconnect"
        );
    }

    /// Grace period ran out for `conn_id`
    fn expire(self: &Arc<Self>, player_id: &str, conn_id: Uuid) {
        let failed = {
            let mut registry = self.registry.lock();
            if !self.connections.take_expired(player_id, conn_id)
                || self.connections.contains(player_id)
            {
                return;
            }
            if registry.remove_participant(player_id).is_none() {
                return;
            }
            let left = ServerMsg::PlayerLeft {
                player_id: player_id.to_string(),
            };
            self.connections.broadcast(&left, None)
        };

        info!(player_id = %player_id, "Player removed after grace period");
        self.handle_failures(failed);
    }

    /// Route failed sends into the grace-period path
    fn handle_failures(self: &Arc<Self>, failed: Failures) {
        for (player_id, conn_id) in failed {
            warn!(player_id = %player_id, conn_id = %conn_id, "Send failed, treating as disconnect");
            self.connection_lost(&player_id, conn_id);
        }
    }

    /// Create the configured population on the first human connection.
    /// Runs at most once per session.
    fn bootstrap_bots(self: &Arc<Self>) {
        if self.bootstrapped.swap(true, Ordering::SeqCst) {
            return;
        }
        let (count, trails) = {
            let registry = self.registry.lock();
            let simulation = registry.simulation();
            (simulation.bot_count, simulation.enable_light_trails)
        };
        if count > 0 {
            self.populate_bots(count, trails);
        }
    }

    /// Replace the simulated population with `count` new participants
    pub fn populate_bots(self: &Arc<Self>, count: usize, enable_trails: bool) -> usize {
        let failed = {
            let mut registry = self.registry.lock();
            let mut simulation = registry.simulation().clone();
            simulation.bot_count = count;
            simulation.enable_light_trails = enable_trails;
            registry.set_simulation(simulation);

            let removed = registry.reset_bots(count, enable_trails, Instant::now());
            self.announce_departures(&removed)
        };

        if count > 0 {
            self.scheduler.start(Arc::downgrade(self));
        } else {
            self.scheduler.stop();
        }

        info!(count, trails = enable_trails, "Simulated population reset");
        self.handle_failures(failed);
        count
    }

    /// Remove every simulated participant and stop the simulation
    pub fn clear_bots(self: &Arc<Self>) -> usize {
        self.scheduler.stop();

        let (population, failed) = {
            let mut registry = self.registry.lock();
            let population = registry.bot_population();
            let removed = registry.clear_bots();
            (population, self.announce_departures(&removed))
        };

        info!(removed = population, "Simulated population cleared");
        self.handle_failures(failed);
        population
    }

    fn announce_departures(&self, removed: &[String]) -> Failures {
        removed
            .iter()
            .flat_map(|id| {
                let left = ServerMsg::PlayerLeft {
                    player_id: id.clone(),
                };
                self.connections.broadcast(&left, None)
            })
            .collect()
    }

    /// Update tuning and apply it to the existing population. A changed
    /// `bot_count` resets the population.
    pub fn update_tuning(
        self: &Arc<Self>,
        bot_count: Option<usize>,
        enable_trails: Option<bool>,
        overrides: &TuningOverrides,
    ) -> Result<SimulationConfig, TuningError> {
        let (config, resize) = {
            let mut registry = self.registry.lock();
            let mut next = registry.simulation().clone();
            next.apply(overrides)?;
            if let Some(trails) = enable_trails {
                next.enable_light_trails = trails;
            }
            let resize = bot_count.filter(|count| *count != registry.bot_population());
            if let Some(count) = bot_count {
                next.bot_count = count;
            }
            registry.set_simulation(next.clone());
            (next, resize)
        };

        info!(config = ?config, "Simulation tuning updated");
        if let Some(count) = resize {
            self.populate_bots(count, config.enable_light_trails);
        }
        Ok(config)
    }

    pub fn simulation_config(&self) -> SimulationConfig {
        self.registry.lock().simulation().clone()
    }

    /// One scheduler iteration: advance the population and broadcast
    /// every participant that changed. Returns the number changed.
    pub fn simulation_tick(
        self: &Arc<Self>,
        now: Instant,
        dt: f64,
    ) -> Result<usize, SimulationError> {
        let (changed, failed) = {
            let mut registry = self.registry.lock();
            let changed = registry.advance_bots(now, dt)?;
            let mut failed = Vec::new();
            for view in &changed {
                let updated = ServerMsg::PlayerUpdated {
                    player_id: view.id.clone(),
                    player: view.clone(),
                };
                failed.extend(self.connections.broadcast(&updated, None));
            }
            (changed.len(), failed)
        };

        self.handle_failures(failed);
        Ok(changed)
    }

    pub fn start_game(&self) -> Result<(), RegistryError> {
        self.registry.lock().start_game()
    }

    pub fn end_game(&self) {
        self.registry.lock().end_game();
    }

    pub fn phase(&self) -> (GamePhase, u32) {
        let registry = self.registry.lock();
        (registry.phase(), registry.current_round())
    }

    pub fn counts(&self) -> ParticipantCounts {
        self.registry.lock().counts()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.registry.lock().snapshot()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn simulation_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Stop the simulation and close every connection
    pub fn shutdown(&self) {
        self.scheduler.stop();
        self.connections.shutdown();
    }
}
