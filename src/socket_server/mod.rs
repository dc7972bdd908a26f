//! cindex Socket Server
//!
//! A standalone daemon (`cindexd`) that exposes the command dispatcher to
//! any number of WebSocket clients.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     CINDEX SOCKET SERVER (cindexd)              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  WebSocket Server ──► ConnectionState per client                │
//! │                          │                                      │
//! │                          ▼  spawn_blocking                      │
//! │                   Arc<Daemon<TreeSitterParser>>                 │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol
//!
//! All messages are JSON over WebSocket:
//!
//! ```json
//! // Client -> Server
//! {"type": "command", "id": 1, "name": "add-source-file", "args": {"path": "/src/a.cpp"}}
//! {"type": "command", "id": 2, "name": "lookup", "args": {"location": "/src/a.cpp,42", "flags": 4}}
//! {"type": "ping"}
//!
//! // Server -> Client
//! {"type": "welcome", "client_id": "cli_...", "version": "0.1.0"}
//! {"type": "response", "id": 1, "status": "ok", "result": {...}}
//! {"type": "response", "id": 2, "status": "error", "error": {"code": "not_found", "message": "..."}}
//! ```

pub mod connection;
pub mod protocol;

pub use connection::handle_connection;
pub use protocol::{ClientMessage, ServerMessage};
