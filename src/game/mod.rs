//! Game simulation modules

pub mod ball;
pub mod physics;
pub mod replay;
pub mod scheduler;
pub mod scoring;
pub mod session;
pub mod shot;
pub mod simulation;
pub mod snapshot;
pub mod table;
pub mod table_match;

pub use table_match::{PoolTable, TableEvent, TableHandle, TableRegistry};

use crate::ws::protocol::ClientMsg;
use uuid::Uuid;

/// Input from one connection, delivered to its table in arrival order
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub connection_id: Uuid,
    pub name: String,
    pub event: InputEvent,
    pub received_at: u64,
}

#[derive(Debug, Clone)]
pub enum InputEvent {
    /// Connection opened; the table sends it the current board
    Connected,
    Message(ClientMsg),
    /// Connection closed; any seat it held is freed
    Disconnected,
}
