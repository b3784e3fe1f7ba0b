//! Inkroom WebSocket Room Server
//!
//! Keeps one authoritative raster per room and fans drawing events out to
//! every member.
//!
//! ## Protocol
//!
//! Messages are JSON text frames tagged by `type`:
//! ```json
//! { "type": "join-room", "roomCode": "AB12" }
//! { "type": "stroke-delta", "roomCode": "AB12", "prevX": 10, "prevY": 10,
//!   "currX": 50, "currY": 10, "color": "#000000", "width": 5, "tool": "pen",
//!   "generation": 0 }
//! { "type": "canvas-snapshot", "roomCode": "AB12", "raster": "data:image/png;base64,...",
//!   "sequence": 1, "generation": 0 }
//! { "type": "clear-canvas", "roomCode": "AB12", "generation": 1 }
//! ```
//! See [`inkroom_core::protocol`] for the full message set.

pub mod config;
pub mod hub;
pub mod registry;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use hub::{BroadcastHub, Frame, OutboundQueue, PushOutcome};
pub use registry::{Bootstrap, Member, RoomRegistry};
pub use server::{AppState, ServerError, router, run, serve};
pub use session::ClientSession;
