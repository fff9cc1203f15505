//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::participant::{ParticipantView, Position};
use crate::game::registry::SessionSnapshot;

/// Inbound envelope: `{ "type": ..., "data": ... }`
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMsg {
    /// New position for the sender
    PlayerMove { position: Position },

    /// Sender was eliminated
    PlayerEliminated,

    /// Kill notification, relayed with display names
    PlayerKill(KillReport),

    /// Chat line, relayed verbatim
    ChatMessage(ChatLine),

    /// Sender is leaving for good
    PlayerDisconnect,
}

#[derive(Debug, Deserialize)]
struct MoveData {
    position: Position,
}

/// `player_kill` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillReport {
    pub killer: String,
    pub victim: String,
}

/// `chat_message` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatLine {
    pub player_id: String,
    pub player_name: String,
    pub message: String,
}

/// Why an inbound frame was dropped
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

impl ClientMsg {
    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;

        let msg = match envelope.kind.as_str() {
            "player_move" => {
                let data: MoveData = serde_json::from_value(envelope.data)?;
                ClientMsg::PlayerMove {
                    position: data.position,
                }
            }
            "player_eliminated" => ClientMsg::PlayerEliminated,
            "player_kill" => ClientMsg::PlayerKill(serde_json::from_value(envelope.data)?),
            "chat_message" => ClientMsg::ChatMessage(serde_json::from_value(envelope.data)?),
            "player_disconnect" => ClientMsg::PlayerDisconnect,
            other => return Err(ProtocolError::UnknownType(other.to_string())),
        };

        Ok(msg)
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Full session state, sent once on connect
    GameState(SessionSnapshot),

    PlayerJoined {
        player_id: String,
    },

    PlayerMoved {
        player_id: String,
        position: Position,
    },

    PlayerEliminated {
        player_id: String,
    },

    PlayerLeft {
        player_id: String,
    },

    /// Full record of a participant whose state changed server-side
    PlayerUpdated {
        player_id: String,
        player: ParticipantView,
    },

    /// Kill feed entry with display names
    PlayerKill {
        killer: String,
        victim: String,
    },

    ChatMessage(ChatLine),
}

impl ServerMsg {
    /// Kill feed entry with the `-suffix` stripped from both names
    pub fn kill_feed(report: &KillReport) -> Self {
        ServerMsg::PlayerKill {
            killer: display_name(&report.killer).to_string(),
            victim: display_name(&report.victim).to_string(),
        }
    }
}

/// Name without the trailing `-suffix` clients append for uniqueness
pub fn display_name(name: &str) -> &str {
    match name.rsplit_once('-') {
        Some((base, _)) if !base.is_empty() => base,
        _ => name,
    }
}
