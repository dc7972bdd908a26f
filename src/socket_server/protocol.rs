//! Socket server protocol message types
//!
//! Defines the JSON message format for client-server communication.

use serde::{Deserialize, Serialize};

use crate::daemon::{RawCommand, Response};

/// Client-to-server message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Run a daemon command
    Command {
        id: u64,
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    /// Ping to check connection
    Ping,
}

impl ClientMessage {
    /// Split a command message into its id and the command
    pub fn into_command(self) -> Option<(u64, RawCommand)> {
        match self {
            Self::Command { id, name, args } => Some((id, RawCommand { name, args })),
            Self::Ping => None,
        }
    }
}

/// Server-to-client message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the handshake
    Welcome { client_id: String, version: String },
    /// Reply to a command
    Response {
        id: u64,
        #[serde(flatten)]
        response: Response,
    },
    /// The message itself could not be understood
    Error {
        id: Option<u64>,
        code: String,
        message: String,
    },
    /// Pong response
    Pong,
}
