//! Participant model shared by humans and simulated players

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::time::Instant;

/// Height simulated participants are placed at
pub const SIMULATED_HEIGHT: f64 = 0.25;

/// Position record as sent by clients.
///
/// Every named field is optional and unknown keys are kept in `extra`, so
/// client-only fields survive a relay untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    /// Facing in radians
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Whether the client draws a light trail behind this participant
    #[serde(
        default,
        rename = "useTrails",
        skip_serializing_if = "Option::is_none"
    )]
    pub use_trails: Option<bool>,
    /// Unrecognized client fields, passed through as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Position {
    /// Spawn position for a freshly connected human
    pub fn spawn() -> Self {
        Self {
            x: Some(0.0),
            y: Some(1.0),
            z: Some(0.0),
            ..Default::default()
        }
    }
}

/// Motion state of a simulated participant
#[derive(Debug, Clone)]
pub struct SimulatedBody {
    pub x: f64,
    pub z: f64,
    /// Heading in radians, kept in [0, 2π)
    pub heading: f64,
    /// Speed before the tuning multiplier
    pub base_speed: f64,
    /// Effective speed in units per second
    pub speed: f64,
    pub use_trails: bool,
    pub active: bool,
    /// Absolute time after which the participant becomes visible
    pub activation_time: Instant,
    /// Seconds accumulated since activation
    pub active_elapsed: f64,
    /// `active_elapsed` value at which the next scheduled turn happens
    pub next_turn_at: f64,
    /// Time of the last applied motion update
    pub last_applied: Option<Instant>,
    /// Minimum spacing between applied motion updates
    pub update_interval: Duration,
}

impl SimulatedBody {
    fn position(&self) -> Position {
        Position {
            x: Some(self.x),
            y: Some(SIMULATED_HEIGHT),
            z: Some(self.z),
            rotation: Some(self.heading),
            speed: Some(self.speed),
            use_trails: Some(self.use_trails),
            extra: Map::new(),
        }
    }
}

/// Human or simulated
#[derive(Debug, Clone)]
pub enum ParticipantKind {
    Human,
    Simulated(SimulatedBody),
}

/// One tracked entity in the session
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: String,
    pub position: Position,
    pub is_eliminated: bool,
    pub score: u32,
    pub kind: ParticipantKind,
}

/// Serialized view of a participant, as clients see it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub id: String,
    pub position: Position,
    pub is_eliminated: bool,
    pub score: u32,
    pub is_bot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_light_trails: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl Participant {
    pub fn human(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            position: Position::spawn(),
            is_eliminated: false,
            score: 0,
            kind: ParticipantKind::Human,
        }
    }

    pub fn simulated(id: impl Into<String>, body: SimulatedBody) -> Self {
        Self {
            id: id.into(),
            position: body.position(),
            is_eliminated: false,
            score: 0,
            kind: ParticipantKind::Simulated(body),
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self.kind, ParticipantKind::Simulated(_))
    }

    /// Inactive simulated participants are hidden from everyone
    pub fn is_visible(&self) -> bool {
        match &self.kind {
            ParticipantKind::Human => true,
            ParticipantKind::Simulated(body) => body.active,
        }
    }

    pub fn body(&self) -> Option<&SimulatedBody> {
        match &self.kind {
            ParticipantKind::Simulated(body) => Some(body),
            ParticipantKind::Human => None,
        }
    }

    pub fn body_mut(&mut self) -> Option<&mut SimulatedBody> {
        match &mut self.kind {
            ParticipantKind::Simulated(body) => Some(body),
            ParticipantKind::Human => None,
        }
    }

    /// Replace the position wholesale (last write wins)
    pub fn update_position(&mut self, position: Position) {
        self.position = position;
    }

    /// Copy the motion body into the public position record
    pub fn sync_position(&mut self) {
        if let ParticipantKind::Simulated(body) = &self.kind {
            self.position = body.position();
        }
    }

    /// Mark eliminated. Returns false if it already was.
    pub fn eliminate(&mut self) -> bool {
        if self.is_eliminated {
            return false;
        }
        self.is_eliminated = true;
        true
    }

    pub fn add_score(&mut self, points: u32) {
        self.score = self.score.saturating_add(points);
    }

    /// Snapshot view, `None` while a simulated participant is still inactive
    pub fn serialize(&self) -> Option<ParticipantView> {
        match &self.kind {
            ParticipantKind::Human => Some(ParticipantView {
                id: self.id.clone(),
                position: self.position.clone(),
                is_eliminated: self.is_eliminated,
                score: self.score,
                is_bot: false,
                use_light_trails: None,
                active: None,
            }),
            ParticipantKind::Simulated(body) if body.active => {
                let mut position = self.position.clone();
                position.use_trails.get_or_insert(body.use_trails);
                Some(ParticipantView {
                    id: self.id.clone(),
                    position,
                    is_eliminated: self.is_eliminated,
                    score: self.score,
                    is_bot: true,
                    use_light_trails: Some(body.use_trails),
                    active: Some(true),
                })
            }
            ParticipantKind::Simulated(_) => None,
        }
    }
}
