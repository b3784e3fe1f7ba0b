//! Client configuration.

use crate::raster::{DEFAULT_CANVAS_HEIGHT, DEFAULT_CANVAS_WIDTH};
use crate::sync::{ConnectionError, validate_ws_url};
use serde::{Deserialize, Serialize};

/// Default server endpoint.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:3030/ws";
/// Display name used when none is given.
pub const DEFAULT_DISPLAY_NAME: &str = "anonymous";

/// Settings a whiteboard client starts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint of the room server, without query.
    pub server_url: String,
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Name shown to other members of a room.
    pub display_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            canvas_width: DEFAULT_CANVAS_WIDTH,
            canvas_height: DEFAULT_CANVAS_HEIGHT,
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// URL to open: the server endpoint with the display name as the
    /// `name` query parameter.
    pub fn socket_url(&self) -> Result<String, ConnectionError> {
        let mut url = validate_ws_url(&self.server_url)?;
        let name = self.display_name.trim();
        let name = if name.is_empty() {
            DEFAULT_DISPLAY_NAME
        } else {
            name
        };
        url.query_pairs_mut().append_pair("name", name);
        Ok(url.to_string())
    }
}
