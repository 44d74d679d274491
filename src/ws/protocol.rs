//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use glam::Vec2;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::ball::{BallColor, BallId};
use crate::game::replay::{CueAnimation, ReplayPhase};
use crate::game::scoring::PlayerScore;
use crate::game::session::SeatId;
use crate::game::table::Placement;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Sit down at a seat
    JoinSeat { seat: SeatId },

    /// Give up the current seat
    LeaveSeat,

    /// Cosmetic aim update, drives the aim indicator only
    Aim {
        /// Aim direction on the table plane
        direction: Vec2,
        /// Distance from the shooter to the cue ball, display metres
        reach: f32,
    },

    /// Take a shot
    Fire {
        direction: Vec2,
        /// Draw-back distance, display metres
        pull_distance: f32,
        reach: f32,
    },

    /// Re-rack and start a new game
    Reset,

    /// Store the shot log under a label
    Save { label: String },

    /// Replace the shot log with a stored one
    Load { label: String },

    /// Play the shot log back
    Replay,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        connection_id: Uuid,
        table_id: Uuid,
        server_time: u64,
    },

    /// A seat was taken or freed
    SeatChanged {
        seat: SeatId,
        occupant: Option<String>,
    },

    /// Create (or recreate) a ball at a pose
    BallSpawned {
        ball: BallId,
        color: BallColor,
        /// Display metres
        position: Vec2,
    },

    /// Per-tick positions of every ball in play, display metres
    Poses { poses: Vec<BallPose> },

    /// Ball left play; destroy its actor after the delay
    BallDestroyed {
        ball: BallId,
        placement: Option<Placement>,
        delay_ms: u64,
    },

    /// Cue stick animation played before a replayed shot
    CueStick { animation: CueAnimation },

    /// Show, rotate or hide a seat's aim indicator
    AimIndicator {
        seat: SeatId,
        visible: bool,
        /// Radians on the table plane
        yaw: f32,
    },

    /// Play an audio cue
    Sound { cue: SoundCue, variant: u8 },

    /// The black ball went down; the game is closed
    GameOver {
        game_id: String,
        /// Absent when the game was not scored
        scores: Option<Vec<PlayerScore>>,
    },

    /// Shot log stored
    Saved { label: String },

    /// Shot log replaced from storage
    Loaded { label: String, shots: usize },

    /// Replay phase change or progress
    ReplayState {
        phase: ReplayPhase,
        step: Option<usize>,
    },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// One ball's render position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BallPose {
    pub ball: BallId,
    pub position: Vec2,
}

/// Audio cues the table can trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundCue {
    BallClick,
    RailHit,
    CueStrike,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_are_tagged() {
        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"fire","direction":[1.0,0.0],"pull_distance":0.3,"reach":0.8}"#)
                .unwrap();
        match msg {
            ClientMsg::Fire {
                direction,
                pull_distance,
                reach,
            } => {
                assert_eq!(direction, Vec2::X);
                assert_eq!(pull_distance, 0.3);
                assert_eq!(reach, 0.8);
            }
            other => panic!("unexpected {:?}", other),
        }

        let join: ClientMsg = serde_json::from_str(r#"{"type":"join_seat","seat":1}"#).unwrap();
        assert!(matches!(join, ClientMsg::JoinSeat { seat: SeatId(1) }));
        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"fly"}"#).is_err());
    }

    #[test]
    fn server_messages_use_snake_case_tags() {
        let json = serde_json::to_value(ServerMsg::BallDestroyed {
            ball: BallId::Object(5),
            placement: Some(Placement::Pocketed),
            delay_ms: 100,
        })
        .unwrap();
        assert_eq!(json["type"], "ball_destroyed");
        assert_eq!(json["ball"], "5");
        assert_eq!(json["placement"], "pocketed");

        let json = serde_json::to_value(ServerMsg::Sound {
            cue: SoundCue::RailHit,
            variant: 2,
        })
        .unwrap();
        assert_eq!(json["cue"], "rail_hit");
    }
}
