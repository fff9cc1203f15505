//! Session registry: participants, eliminations and game phase

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::time::Instant;
use tracing::info;

use crate::config::{SessionConfig, SimulationConfig};

use super::bots::BotRoster;
use super::motion::SimulationError;
use super::participant::{Participant, ParticipantView, Position};

/// Session phase. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Waiting,
    Playing,
    Finished,
}

/// Registry errors, reported as values
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Session is full ({max} players)")]
    SessionFull { max: usize },

    #[error("Not enough participants to start: have {have}, need {need}")]
    NotEnoughParticipants { have: usize, need: usize },

    #[error("Cannot start from phase {0:?}")]
    InvalidTransition(GamePhase),

    #[error("Id {0} belongs to a simulated participant")]
    IdReserved(String),
}

/// Full session state sent to a newly connected client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub players: BTreeMap<String, ParticipantView>,
    pub eliminated_players: Vec<String>,
    pub game_phase: GamePhase,
    pub current_round: u32,
    pub player_count: usize,
    pub human_count: usize,
    pub bot_count: usize,
    pub max_players: Option<usize>,
    pub min_players: usize,
}

/// Participant totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantCounts {
    pub total: usize,
    pub humans: usize,
    pub bots: usize,
}

/// Authoritative state of one session (owned by `Session`, behind a mutex)
pub struct SessionRegistry {
    humans: HashMap<String, Participant>,
    bots: BotRoster,
    eliminated: HashSet<String>,
    phase: GamePhase,
    current_round: u32,
    min_players: usize,
    max_players: Option<usize>,
    simulation: SimulationConfig,
    rng: ChaCha8Rng,
}

impl SessionRegistry {
    pub fn new(config: &SessionConfig, simulation: SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        Self {
            humans: HashMap::new(),
            bots: BotRoster::new(),
            eliminated: HashSet::new(),
            phase: GamePhase::Waiting,
            current_round: 0,
            min_players: config.min_players,
            max_players: config.max_players,
            simulation,
            rng,
        }
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    pub fn simulation(&self) -> &SimulationConfig {
        &self.simulation
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.humans.get(id).or_else(|| self.bots.get(id))
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Participant> {
        match self.humans.get_mut(id) {
            Some(player) => Some(player),
            None => self.bots.get_mut(id),
        }
    }

    /// Visible participants: humans plus activated simulated ones
    pub fn counts(&self) -> ParticipantCounts {
        let humans = self.humans.len();
        let bots = self.bots.active_count();
        ParticipantCounts {
            total: humans + bots,
            humans,
            bots,
        }
    }

    pub fn bot_population(&self) -> usize {
        self.bots.len()
    }

    /// Add a human. An existing id is overwritten with a fresh record;
    /// only new ids count against the cap.
    pub fn add_participant(&mut self, id: &str) -> Result<(), RegistryError> {
        if self.bots.contains(id) {
            return Err(RegistryError::IdReserved(id.to_string()));
        }
        if !self.humans.contains_key(id) {
            if let Some(max) = self.max_players {
                if self.humans.len() >= max {
                    return Err(RegistryError::SessionFull { max });
                }
            }
        }
        self.humans.insert(id.to_string(), Participant::human(id));
        Ok(())
    }

    /// Remove a participant of either kind, pruning it from `eliminated`
    pub fn remove_participant(&mut self, id: &str) -> Option<Participant> {
        self.eliminated.remove(id);
        self.humans.remove(id).or_else(|| self.bots.remove(id))
    }

    /// Replace a participant's position. Unknown ids are ignored.
    pub fn update_position(&mut self, id: &str, position: Position) -> bool {
        match self.humans.get_mut(id) {
            Some(player) => {
                player.update_position(position);
                true
            }
            None => false,
        }
    }

    /// Eliminate a participant of either kind. Returns true only when the id
    /// enters `eliminated`; unknown or already eliminated ids are no-ops.
    /// The participant's own flag stays set across rounds.
    pub fn eliminate(&mut self, id: &str) -> bool {
        if self.eliminated.contains(id) {
            return false;
        }
        let Some(player) = self.get_mut(id) else {
            return false;
        };
        player.eliminate();
        self.eliminated.insert(id.to_string());
        true
    }

    /// Add to a participant's score, returning its updated view
    pub fn add_score(&mut self, id: &str, points: u32) -> Option<ParticipantView> {
        let player = self.get_mut(id)?;
        player.add_score(points);
        player.serialize()
    }

    /// Waiting -> Playing, if enough participants are present
    pub fn start_game(&mut self) -> Result<(), RegistryError> {
        if self.phase != GamePhase::Waiting {
            return Err(RegistryError::InvalidTransition(self.phase));
        }
        let have = self.counts().total;
        if have < self.min_players {
            return Err(RegistryError::NotEnoughParticipants {
                have,
                need: self.min_players,
            });
        }

        self.phase = GamePhase::Playing;
        self.current_round = 1;
        self.eliminated.clear();
        info!(players = have, "Game started");
        Ok(())
    }

    /// Enter Finished unconditionally
    pub fn end_game(&mut self) {
        if self.phase != GamePhase::Finished {
            info!(round = self.current_round, "Game finished");
        }
        self.phase = GamePhase::Finished;
    }

    /// Merge humans and activated simulated participants
    pub fn snapshot(&self) -> SessionSnapshot {
        let players: BTreeMap<String, ParticipantView> = self
            .humans
            .values()
            .filter_map(Participant::serialize)
            .chain(self.bots.views())
            .map(|view| (view.id.clone(), view))
            .collect();

        let mut eliminated_players: Vec<String> = self.eliminated.iter().cloned().collect();
        eliminated_players.sort();

        let counts = self.counts();
        SessionSnapshot {
            players,
            eliminated_players,
            game_phase: self.phase,
            current_round: self.current_round,
            player_count: counts.total,
            human_count: counts.humans,
            bot_count: counts.bots,
            max_players: self.max_players,
            min_players: self.min_players,
        }
    }

    /// Replace the simulated population with `count` new participants.
    /// Returns ids of removed participants that clients could see.
    pub fn reset_bots(&mut self, count: usize, trails_enabled: bool, now: Instant) -> Vec<String> {
        let removed = self.clear_bots();
        self.bots
            .create(count, trails_enabled, &self.simulation, now, &mut self.rng);
        removed
    }

    /// Drop every simulated participant
    pub fn clear_bots(&mut self) -> Vec<String> {
        let mut visible = Vec::new();
        for bot in self.bots.clear() {
            self.eliminated.remove(&bot.id);
            if bot.is_visible() {
                visible.push(bot.id);
            }
        }
        visible
    }

    /// Store new tuning and re-apply it to the existing population
    pub fn set_simulation(&mut self, simulation: SimulationConfig) {
        self.simulation = simulation;
        self.bots.retune(&self.simulation);
    }

    /// One motion step over the simulated population
    pub fn advance_bots(
        &mut self,
        now: Instant,
        dt: f64,
    ) -> Result<Vec<ParticipantView>, SimulationError> {
        self.bots
            .update(now, dt, &self.eliminated, &self.simulation, &mut self.rng)
    }

    #[cfg(test)]
    pub(crate) fn bot_mut(&mut self, id: &str) -> Option<&mut Participant> {
        self.bots.get_mut(id)
    }
}
