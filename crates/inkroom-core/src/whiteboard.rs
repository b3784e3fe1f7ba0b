//! Client-side room session.
//!
//! The [`Whiteboard`] owns the local raster and ties the drawing state
//! machine and the sync receiver to one room. Local input and inbound
//! messages go through the same `&mut self`, so they are applied strictly
//! one after the other. Outbound frames are queued as JSON strings and
//! drained by whoever owns the connection.

use std::time::Duration;

use kurbo::Point;

use crate::brush::{Brush, BrushColor, Tool};
use crate::config::ClientConfig;
use crate::drawing::{DrawState, DrawingStateMachine};
use crate::input::PointerEvent;
use crate::protocol::{ClientMessage, ServerMessage, decode_server, encode, normalize_room_code};
use crate::raster::Raster;
use crate::receiver::{SyncReceiver, Versions};
use crate::sync::ConnectionEvent;

/// What an inbound message or connection change did to the whiteboard.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Connected,
    Disconnected,
    Reconnecting { attempt: u32, delay: Duration },
    /// Server confirmed the join and the bootstrap was handled.
    JoinedRoom {
        room_code: String,
        peer_count: usize,
    },
    PeerJoined { peer_id: String, name: String },
    PeerLeft { peer_id: String },
    StrokeApplied { from: String },
    SnapshotApplied { from: String, versions: Versions },
    Cleared { from: String, generation: u64 },
}

/// One user's view of a shared drawing room.
pub struct Whiteboard {
    config: ClientConfig,
    raster: Raster,
    drawing: DrawingStateMachine,
    receiver: SyncReceiver,
    /// Room the user asked to be in.
    current_room: Option<String>,
    /// Whether the server acknowledged `current_room`.
    joined: bool,
    peer_count: usize,
    /// Socket is up; frames are only queued while online.
    online: bool,
    /// Pending outgoing messages (JSON strings).
    outgoing: Vec<String>,
}

impl Whiteboard {
    pub fn new(config: ClientConfig) -> Self {
        let raster = Raster::blank(config.canvas_width, config.canvas_height);
        Self {
            config,
            raster,
            drawing: DrawingStateMachine::new(),
            receiver: SyncReceiver::new(),
            current_room: None,
            joined: false,
            peer_count: 0,
            online: false,
            outgoing: Vec::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    /// Locally observed generation and sequence.
    pub fn versions(&self) -> Versions {
        self.receiver.versions()
    }

    pub fn draw_state(&self) -> DrawState {
        self.drawing.state()
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    // --- Room Management ---

    pub fn current_room(&self) -> Option<&str> {
        self.current_room.as_deref()
    }

    /// True once the server confirmed the current room.
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Room members including this client, as last reported.
    pub fn peer_count(&self) -> usize {
        self.peer_count
    }

    /// Switch to a room. The surface is blanked until the server's bootstrap
    /// arrives. Returns false for an unusable room code.
    pub fn join_room(&mut self, code: &str) -> bool {
        let Some(code) = normalize_room_code(code) else {
            log::warn!("Refusing to join invalid room code {:?}", code);
            return false;
        };
        self.drawing.reset();
        self.receiver.reset();
        self.raster.clear();
        self.joined = false;
        self.peer_count = 0;
        self.current_room = Some(code.clone());
        if self.online {
            self.queue(&ClientMessage::JoinRoom { room_code: code });
        }
        true
    }

    /// Leave the current room. The surface keeps its last contents.
    pub fn leave_room(&mut self) {
        if self.current_room.take().is_some() {
            if self.online {
                self.queue(&ClientMessage::LeaveRoom);
            }
            self.drawing.reset();
            self.receiver.reset();
            self.joined = false;
            self.peer_count = 0;
        }
    }

    /// Take pending outgoing messages (drains the queue).
    pub fn take_outgoing(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outgoing)
    }

    /// Check if there are pending outgoing messages.
    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    // --- Brush ---

    pub fn brush(&self) -> &Brush {
        &self.drawing.brush
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.drawing.brush.tool = tool;
    }

    pub fn set_color(&mut self, color: BrushColor) {
        self.drawing.brush.color = color;
    }

    pub fn set_brush_width(&mut self, width: f64) {
        self.drawing.brush.set_width(width);
    }

    // --- Local Input ---

    pub fn handle_pointer(&mut self, event: PointerEvent) {
        match event {
            PointerEvent::Down { position } => self.pointer_down(position),
            PointerEvent::Move { position } => self.pointer_move(position),
            PointerEvent::Up | PointerEvent::Leave => self.pointer_up(),
        }
    }

    pub fn pointer_down(&mut self, position: Point) {
        self.drawing.pointer_down(position);
    }

    pub fn pointer_move(&mut self, position: Point) {
        let room = self.current_room.as_deref().filter(|_| self.online);
        let delta = self
            .drawing
            .pointer_move(position, &mut self.raster, &self.receiver, room);
        if let Some(delta) = delta {
            self.queue(&ClientMessage::StrokeDelta(delta));
        }
    }

    pub fn pointer_up(&mut self) {
        let room = self.current_room.as_deref().filter(|_| self.online);
        let snapshot = self.drawing.pointer_up(&self.raster, &self.receiver, room);
        if let Some(snapshot) = snapshot {
            self.queue(&ClientMessage::CanvasSnapshot(snapshot));
        }
    }

    /// First step of a clear; the UI asks for confirmation next.
    pub fn request_clear(&mut self) {
        self.drawing.request_clear();
    }

    pub fn cancel_clear(&mut self) {
        self.drawing.cancel_clear();
    }

    pub fn is_clear_requested(&self) -> bool {
        self.drawing.is_clear_requested()
    }

    /// Clear the surface if a clear was requested.
    pub fn confirm_clear(&mut self) -> bool {
        if !self.drawing.is_clear_requested() {
            return false;
        }
        let room = self.current_room.as_deref().filter(|_| self.online);
        let clear = self
            .drawing
            .confirm_clear(&mut self.raster, &mut self.receiver, room);
        if let Some(clear) = clear {
            self.queue(&ClientMessage::ClearCanvas(clear));
        }
        true
    }

    // --- Incoming ---

    /// Handle a connection change or inbound frame from the socket thread.
    pub fn handle_connection_event(&mut self, event: ConnectionEvent) -> Option<SyncEvent> {
        match event {
            ConnectionEvent::Connected => {
                self.online = true;
                if let Some(room_code) = self.current_room.clone() {
                    log::info!("Connected, joining room {}", room_code);
                    // fresh bootstrap: whatever arrives from the room is newer
                    self.receiver.reset();
                    self.drawing.forget_sent();
                    self.joined = false;
                    self.queue(&ClientMessage::JoinRoom { room_code });
                }
                Some(SyncEvent::Connected)
            }
            ConnectionEvent::Disconnected => {
                self.online = false;
                self.joined = false;
                Some(SyncEvent::Disconnected)
            }
            ConnectionEvent::Reconnecting { attempt, delay } => {
                Some(SyncEvent::Reconnecting { attempt, delay })
            }
            ConnectionEvent::Message(msg) => self.handle_server_message(msg),
        }
    }

    /// Handle a raw server frame.
    pub fn handle_message(&mut self, json: &str) -> Option<SyncEvent> {
        match decode_server(json) {
            Ok(msg) => self.handle_server_message(msg),
            Err(e) => {
                log::warn!("Failed to parse server message: {}", e);
                None
            }
        }
    }

    /// Handle a decoded server message. Returns a SyncEvent describing what
    /// happened, or `None` when the message was ignored or stale.
    pub fn handle_server_message(&mut self, msg: ServerMessage) -> Option<SyncEvent> {
        match msg {
            ServerMessage::Joined {
                room_code,
                raster,
                sequence,
                generation,
                peer_count,
            } => {
                if !self.is_current(&room_code) {
                    return None;
                }
                self.joined = true;
                self.peer_count = peer_count;
                let versions = Versions::new(generation, sequence);
                if self
                    .receiver
                    .apply_bootstrap(&mut self.raster, raster.as_deref(), versions)
                {
                    self.drawing.restore_local_work(&mut self.raster, versions);
                }
                Some(SyncEvent::JoinedRoom {
                    room_code,
                    peer_count,
                })
            }
            ServerMessage::PeerJoined { peer_id, name } => {
                self.peer_count += 1;
                Some(SyncEvent::PeerJoined { peer_id, name })
            }
            ServerMessage::PeerLeft { peer_id } => {
                self.peer_count = self.peer_count.saturating_sub(1);
                Some(SyncEvent::PeerLeft { peer_id })
            }
            ServerMessage::StrokeDelta { from, delta } => {
                if !self.is_current(&delta.room_code) {
                    return None;
                }
                self.receiver
                    .apply_stroke(&mut self.raster, &delta)
                    .then_some(SyncEvent::StrokeApplied { from })
            }
            ServerMessage::CanvasSnapshot { from, snapshot } => {
                if !self.is_current(&snapshot.room_code) {
                    return None;
                }
                if !self.receiver.apply_snapshot(&mut self.raster, &snapshot) {
                    return None;
                }
                let versions = self.receiver.versions();
                self.drawing.restore_local_work(&mut self.raster, versions);
                Some(SyncEvent::SnapshotApplied { from, versions })
            }
            ServerMessage::ClearCanvas { from, clear } => {
                if !self.is_current(&clear.room_code) {
                    return None;
                }
                let generation = clear.generation;
                if !self.receiver.apply_clear(&mut self.raster, generation) {
                    return None;
                }
                self.drawing.apply_remote_clear(generation);
                Some(SyncEvent::Cleared { from, generation })
            }
        }
    }

    fn is_current(&self, room_code: &str) -> bool {
        let current = self.current_room.as_deref() == Some(room_code);
        if !current {
            log::debug!("Ignoring event for room {}", room_code);
        }
        current
    }

    fn queue(&mut self, msg: &ClientMessage) {
        match encode(msg) {
            Ok(json) => self.outgoing.push(json),
            Err(e) => log::error!("Failed to encode message: {}", e),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Whiteboard {
    /// Open a connection for this whiteboard's configured server.
    pub fn connect(
        &self,
        socket: &mut crate::sync::NativeWebSocket,
    ) -> Result<(), crate::sync::ConnectionError> {
        let url = self.config.socket_url()?;
        socket.connect(&url, crate::sync::Backoff::default())
    }

    /// Exchange pending traffic with the socket: apply everything received,
    /// then send everything queued.
    pub fn pump(&mut self, socket: &mut crate::sync::NativeWebSocket) -> Vec<SyncEvent> {
        let events: Vec<SyncEvent> = socket
            .poll_events()
            .into_iter()
            .filter_map(|event| self.handle_connection_event(event))
            .collect();
        for msg in self.take_outgoing() {
            if let Err(e) = socket.send(&msg) {
                log::debug!("Dropping outgoing frame: {}", e);
            }
        }
        events
    }
}
