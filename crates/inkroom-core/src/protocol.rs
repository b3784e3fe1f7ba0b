//! Room-broadcast wire messages.
//!
//! Every frame is a JSON text message tagged by `type`:
//! ```json
//! { "type": "join-room", "roomCode": "AB12" }
//! { "type": "stroke-delta", "roomCode": "AB12", "prevX": 10, "prevY": 10,
//!   "currX": 12, "currY": 10, "color": "#000000", "width": 5, "tool": "pen",
//!   "generation": 0 }
//! { "type": "canvas-snapshot", "roomCode": "AB12", "raster": "data:image/png;base64,...",
//!   "sequence": 1, "generation": 0 }
//! { "type": "clear-canvas", "roomCode": "AB12", "generation": 1 }
//! ```
//! The server relays events with an extra `from` field naming the sender.

use crate::brush::{BrushColor, Tool};
use kurbo::Point;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest accepted room code, in characters.
pub const MAX_ROOM_CODE_LEN: usize = 64;

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Trim a room code and check it is usable. Returns `None` for empty,
/// oversized or control-character codes.
pub fn normalize_room_code(code: &str) -> Option<String> {
    let code = code.trim();
    if code.is_empty()
        || code.chars().count() > MAX_ROOM_CODE_LEN
        || code.chars().any(char::is_control)
    {
        return None;
    }
    Some(code.to_string())
}

/// One incremental line segment of an in-progress stroke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeDelta {
    pub room_code: String,
    pub prev_x: f64,
    pub prev_y: f64,
    pub curr_x: f64,
    pub curr_y: f64,
    pub color: BrushColor,
    pub width: f64,
    pub tool: Tool,
    /// Generation the sender believed was current.
    pub generation: u64,
}

impl StrokeDelta {
    pub fn from_point(&self) -> Point {
        Point::new(self.prev_x, self.prev_y)
    }

    pub fn to_point(&self) -> Point {
        Point::new(self.curr_x, self.curr_y)
    }
}

/// Full authoritative surface at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasSnapshot {
    pub room_code: String,
    /// PNG data URL. Opaque to the server.
    pub raster: String,
    pub sequence: u64,
    pub generation: u64,
}

/// Blanks the surface and fences out older stroke deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearCanvas {
    pub room_code: String,
    /// The new generation.
    pub generation: u64,
}

/// Messages sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Join (or switch to) a room
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_code: String },
    /// Leave the current room
    LeaveRoom,
    StrokeDelta(StrokeDelta),
    CanvasSnapshot(CanvasSnapshot),
    ClearCanvas(ClearCanvas),
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Bootstrap state for a join. A missing raster means a blank canvas.
    #[serde(rename_all = "camelCase")]
    Joined {
        room_code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raster: Option<String>,
        sequence: u64,
        generation: u64,
        peer_count: usize,
    },
    #[serde(rename_all = "camelCase")]
    PeerJoined { peer_id: String, name: String },
    #[serde(rename_all = "camelCase")]
    PeerLeft { peer_id: String },
    StrokeDelta {
        from: String,
        #[serde(flatten)]
        delta: StrokeDelta,
    },
    CanvasSnapshot {
        from: String,
        #[serde(flatten)]
        snapshot: CanvasSnapshot,
    },
    ClearCanvas {
        from: String,
        #[serde(flatten)]
        clear: ClearCanvas,
    },
}

impl ServerMessage {
    /// Stroke deltas are a best-effort live preview and may be shed under
    /// load; every other message must reach the client.
    pub fn is_droppable(&self) -> bool {
        matches!(self, ServerMessage::StrokeDelta { .. })
    }
}

/// Encode a message as a JSON text frame.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(msg)?)
}

/// Decode a client frame.
pub fn decode_client(text: &str) -> Result<ClientMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Decode a server frame.
pub fn decode_server(text: &str) -> Result<ServerMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
