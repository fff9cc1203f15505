//! Simulated participant roster: creation, staggered activation, motion

use std::collections::{HashMap, HashSet};
use std::f64::consts::TAU;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::SimulationConfig;

use super::motion::{self, MotionParams, SimulationError, BASE_SPEED_RANGE};
use super::participant::{Participant, ParticipantView, SimulatedBody};

/// Random extra delay added to each staggered activation
const SPAWN_JITTER_SECS: (f64, f64) = (0.5, 2.0);

/// How often pending activations are checked for bunching
const SPAWN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Cap on any single activation delay
const MAX_ACTIVATION_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// `from + delay`, saturating instead of panicking on overflow
fn saturating_offset(from: Instant, delay: Duration) -> Instant {
    let delay = delay.min(MAX_ACTIVATION_DELAY);
    from.checked_add(delay).unwrap_or(from)
}

/// All simulated participants in a session
#[derive(Debug, Default)]
pub struct BotRoster {
    bots: HashMap<String, Participant>,
    /// Monotonic id counter, never reused within a session
    next_index: usize,
    last_spawn_check: Option<Instant>,
}

impl BotRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bots.len()
    }

    pub fn active_count(&self) -> usize {
        self.bots.values().filter(|b| b.is_visible()).count()
    }

    pub fn trail_count(&self) -> usize {
        self.bots
            .values()
            .filter_map(Participant::body)
            .filter(|b| b.use_trails)
            .count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.bots.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.bots.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Participant> {
        self.bots.get_mut(id)
    }

    /// Create `count` participants with staggered activation times.
    /// Returns the new ids.
    pub fn create<R: Rng + ?Sized>(
        &mut self,
        count: usize,
        trails_enabled: bool,
        config: &SimulationConfig,
        now: Instant,
        rng: &mut R,
    ) -> Vec<String> {
        let mut trails = self.trail_count();
        let half = motion::ARENA_SIZE / 2.0;
        let mut created = Vec::with_capacity(count);

        for i in 0..count {
            let delay = i as f64 * config.spawn_interval_secs
                + rng.gen_range(SPAWN_JITTER_SECS.0..=SPAWN_JITTER_SECS.1);
            let use_trails = trails_enabled && trails < config.max_trail_bots;
            if use_trails {
                trails += 1;
            }

            let base_speed = rng.gen_range(BASE_SPEED_RANGE.0..=BASE_SPEED_RANGE.1);
            let body = SimulatedBody {
                x: rng.gen_range(-half..=half),
                z: rng.gen_range(-half..=half),
                heading: rng.gen_range(0.0..TAU),
                base_speed,
                speed: base_speed * config.speed_multiplier,
                use_trails,
                active: false,
                activation_time: saturating_offset(
                    now,
                    Duration::try_from_secs_f64(delay).unwrap_or(MAX_ACTIVATION_DELAY),
                ),
                active_elapsed: 0.0,
                next_turn_at: motion::next_turn_delay(rng),
                last_applied: None,
                update_interval: config.update_interval(),
            };

            self.next_index += 1;
            let id = format!("{}{}", config.prefix, self.next_index);
            debug!(
                bot_id = %id,
                speed = body.speed,
                trails = use_trails,
                spawn_delay_secs = delay,
                "Simulated participant created"
            );
            self.bots.insert(id.clone(), Participant::simulated(id.clone(), body));
            created.push(id);
        }

        info!(count, total = self.bots.len(), "Simulated participants created");
        created
    }

    /// Remove and return every participant
    pub fn clear(&mut self) -> Vec<Participant> {
        self.last_spawn_check = None;
        self.bots.drain().map(|(_, bot)| bot).collect()
    }

    pub fn remove(&mut self, id: &str) -> Option<Participant> {
        self.bots.remove(id)
    }

    /// Re-apply tuning to existing participants
    pub fn retune(&mut self, config: &SimulationConfig) {
        let mut trails = 0;
        for bot in self.bots.values_mut() {
            if let Some(body) = bot.body_mut() {
                body.speed = body.base_speed * config.speed_multiplier;
                body.update_interval = config.update_interval();
                body.use_trails = config.enable_light_trails && trails < config.max_trail_bots;
                if body.use_trails {
                    trails += 1;
                }
            }
            bot.sync_position();
        }
    }

    /// Push back activations so no more than `max_concurrent_spawns`
    /// happen within one check window.
    fn smooth_spawns(&mut self, now: Instant, max_concurrent: usize) {
        if let Some(last) = self.last_spawn_check {
            if now.saturating_duration_since(last) < SPAWN_CHECK_INTERVAL {
                return;
            }
        }
        self.last_spawn_check = Some(now);

        let window_end = now + SPAWN_CHECK_INTERVAL;
        let mut upcoming: Vec<&mut SimulatedBody> = self
            .bots
            .values_mut()
            .filter_map(Participant::body_mut)
            .filter(|b| !b.active && b.activation_time < window_end)
            .collect();

        if upcoming.len() <= max_concurrent {
            return;
        }

        upcoming.sort_by_key(|b| b.activation_time);
        let postponed = upcoming.len() - max_concurrent;
        for body in upcoming.into_iter().skip(max_concurrent) {
            body.activation_time =
                saturating_offset(body.activation_time, SPAWN_CHECK_INTERVAL * 2);
        }
        debug!(postponed, "Postponed simulated activations");
    }

    /// Run one motion step for every participant not in `eliminated`.
    /// Returns views of the participants whose visible state changed.
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        now: Instant,
        dt: f64,
        eliminated: &HashSet<String>,
        config: &SimulationConfig,
        rng: &mut R,
    ) -> Result<Vec<ParticipantView>, SimulationError> {
        self.smooth_spawns(now, config.max_concurrent_spawns);

        let params = MotionParams {
            turn_probability: config.turn_probability,
            ..Default::default()
        };

        let mut changed = Vec::new();
        for bot in self.bots.values_mut() {
            if eliminated.contains(&bot.id) {
                continue;
            }
            let Some(body) = bot.body_mut() else {
                continue;
            };
            let was_active = body.active;

            let changed_here = motion::advance(body, now, dt, &params, rng)?;
            if !body.x.is_finite() || !body.z.is_finite() {
                return Err(SimulationError::NonFinite { id: bot.id.clone() });
            }
            if !changed_here {
                continue;
            }
            if !was_active {
                info!(bot_id = %bot.id, "Simulated participant activated");
            }

            bot.sync_position();
            if let Some(view) = bot.serialize() {
                changed.push(view);
            }
        }

        Ok(changed)
    }

    /// Views of every activated participant
    pub fn views(&self) -> impl Iterator<Item = ParticipantView> + '_ {
        self.bots.values().filter_map(Participant::serialize)
    }
}
