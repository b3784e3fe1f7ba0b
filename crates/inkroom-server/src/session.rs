//! Server side of one client connection.
//!
//! The session owns room membership for its connection. It checks that
//! inbound events belong to the joined room, runs snapshots and clears
//! through the registry and publishes whatever was accepted.

use std::sync::Arc;

use inkroom_core::protocol::{
    CanvasSnapshot, ClearCanvas, ClientMessage, ServerMessage, StrokeDelta, decode_client,
    normalize_room_code,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::hub::{BroadcastHub, OutboundQueue};
use crate::registry::Member;

pub struct ClientSession {
    id: Uuid,
    name: String,
    hub: BroadcastHub,
    queue: Arc<OutboundQueue>,
    room: Option<String>,
    last_seen: Instant,
}

impl ClientSession {
    pub fn new(
        id: Uuid,
        name: impl Into<String>,
        hub: BroadcastHub,
        queue: Arc<OutboundQueue>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            hub,
            queue,
            room: None,
            last_seen: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Record inbound traffic.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Handle a text frame. Malformed frames are logged and dropped.
    pub fn handle_text(&mut self, text: &str) {
        match decode_client(text) {
            Ok(msg) => self.handle(msg),
            Err(e) => warn!("Invalid message from {}: {}", self.id, e),
        }
    }

    pub fn handle(&mut self, msg: ClientMessage) {
        match msg {
            ClientMessage::JoinRoom { room_code } => self.join(&room_code),
            ClientMessage::LeaveRoom => self.leave(),
            ClientMessage::StrokeDelta(delta) => self.stroke(delta),
            ClientMessage::CanvasSnapshot(snapshot) => self.snapshot(snapshot),
            ClientMessage::ClearCanvas(clear) => self.clear(clear),
        }
    }

    /// Release membership when the connection goes away.
    pub fn on_disconnect(&mut self) {
        self.leave();
    }

    fn join(&mut self, code: &str) {
        let Some(code) = normalize_room_code(code) else {
            warn!("Peer {} sent an invalid room code", self.id);
            return;
        };
        let rejoin = self.room.as_deref() == Some(code.as_str());
        if !rejoin {
            self.leave();
        }

        let member = Member::new(self.id, self.name.clone(), self.queue.clone());
        let boot = self.hub.registry().join(&code, member);
        let joined = ServerMessage::Joined {
            room_code: code.clone(),
            raster: boot.snapshot,
            sequence: boot.sequence,
            generation: boot.generation,
            peer_count: boot.peer_count,
        };
        self.hub.send_to(&self.queue, &joined);

        if !rejoin {
            let announce = ServerMessage::PeerJoined {
                peer_id: self.id.to_string(),
                name: self.name.clone(),
            };
            self.hub.publish(&code, &announce, Some(self.id));
            info!("Peer {} ({}) joined room {}", self.id, self.name, code);
        }
        self.room = Some(code);
    }

    fn leave(&mut self) {
        let Some(code) = self.room.take() else {
            return;
        };
        if self.hub.registry().leave(&code, self.id) {
            let left = ServerMessage::PeerLeft {
                peer_id: self.id.to_string(),
            };
            self.hub.publish(&code, &left, Some(self.id));
        }
        info!("Peer {} left room {}", self.id, code);
    }

    /// The joined room if `room_code` names it.
    fn joined_room(&self, room_code: &str, kind: &str) -> Option<String> {
        match self.room.as_deref() {
            Some(room) if room == room_code => Some(room.to_string()),
            _ => {
                debug!(
                    "Ignoring {} from {} for room {:?} (joined {:?})",
                    kind, self.id, room_code, self.room
                );
                None
            }
        }
    }

    fn stroke(&self, delta: StrokeDelta) {
        let Some(room) = self.joined_room(&delta.room_code, "stroke-delta") else {
            return;
        };
        let relayed = ServerMessage::StrokeDelta {
            from: self.id.to_string(),
            delta,
        };
        self.hub.publish(&room, &relayed, Some(self.id));
    }

    fn snapshot(&self, snapshot: CanvasSnapshot) {
        let Some(room) = self.joined_room(&snapshot.room_code, "canvas-snapshot") else {
            return;
        };
        let accepted = self.hub.registry().apply_snapshot(
            &room,
            snapshot.raster.clone(),
            snapshot.sequence,
            snapshot.generation,
        );
        if accepted {
            debug!(
                "Room {} advanced to {}/{} by {}",
                room, snapshot.generation, snapshot.sequence, self.id
            );
            // the sender gets its own snapshot back as the acknowledgement
            let relayed = ServerMessage::CanvasSnapshot {
                from: self.id.to_string(),
                snapshot,
            };
            self.hub.publish(&room, &relayed, None);
        }
    }

    fn clear(&self, clear: ClearCanvas) {
        let Some(room) = self.joined_room(&clear.room_code, "clear-canvas") else {
            return;
        };
        if self.hub.registry().apply_clear(&room, clear.generation) {
            info!(
                "Room {} cleared to generation {} by {}",
                room, clear.generation, self.id
            );
            let relayed = ServerMessage::ClearCanvas {
                from: self.id.to_string(),
                clear,
            };
            self.hub.publish(&room, &relayed, Some(self.id));
        }
    }
}
