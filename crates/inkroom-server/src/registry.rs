//! Live rooms and their authoritative surface.
//!
//! Rooms live in a sharded map; each room's state sits behind its own mutex
//! so contention stays local to one room. Whenever both are held the map
//! shard is taken first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::hub::OutboundQueue;

/// A connection that belongs to a room.
#[derive(Debug, Clone)]
pub struct Member {
    pub session_id: Uuid,
    pub name: String,
    pub queue: Arc<OutboundQueue>,
}

impl Member {
    pub fn new(session_id: Uuid, name: impl Into<String>, queue: Arc<OutboundQueue>) -> Self {
        Self {
            session_id,
            name: name.into(),
            queue,
        }
    }
}

/// State handed to a session when it joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bootstrap {
    /// PNG data URL; `None` means blank.
    pub snapshot: Option<String>,
    pub sequence: u64,
    pub generation: u64,
    /// Members including the joiner.
    pub peer_count: usize,
}

#[derive(Debug)]
struct RoomState {
    snapshot: Option<String>,
    sequence: u64,
    generation: u64,
    members: HashMap<Uuid, Member>,
    vacant_since: Option<Instant>,
}

/// One drawing room.
#[derive(Debug)]
pub struct Room {
    code: String,
    created_at: Instant,
    state: Mutex<RoomState>,
}

impl Room {
    fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            created_at: Instant::now(),
            state: Mutex::new(RoomState {
                snapshot: None,
                sequence: 0,
                generation: 0,
                members: HashMap::new(),
                vacant_since: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    fn bootstrap(state: &RoomState) -> Bootstrap {
        Bootstrap {
            snapshot: state.snapshot.clone(),
            sequence: state.sequence,
            generation: state.generation,
            peer_count: state.members.len(),
        }
    }
}

/// All live rooms.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: DashMap<String, Arc<Room>>,
    grace: Duration,
}

impl RoomRegistry {
    /// `grace` is how long an empty room survives.
    pub fn new(grace: Duration) -> Self {
        Self {
            rooms: DashMap::new(),
            grace,
        }
    }

    /// Add `member` to the room, creating it blank if needed.
    pub fn join(&self, code: &str, member: Member) -> Bootstrap {
        let entry = self.rooms.entry(code.to_string());
        let room = entry.or_insert_with(|| {
            info!("Creating room {}", code);
            Arc::new(Room::new(code))
        });
        let mut state = room.lock();
        state.vacant_since = None;
        state.members.insert(member.session_id, member);
        Room::bootstrap(&state)
    }

    /// Remove a member. Returns false when it was not in the room.
    pub fn leave(&self, code: &str, session_id: Uuid) -> bool {
        let Some(room) = self.rooms.get(code) else {
            return false;
        };
        let mut state = room.lock();
        let removed = state.members.remove(&session_id).is_some();
        if removed && state.members.is_empty() {
            debug!("Room {} is now empty", code);
            state.vacant_since = Some(Instant::now());
        }
        removed
    }

    /// Store a snapshot if it advances the sequence within the current
    /// generation.
    pub fn apply_snapshot(
        &self,
        code: &str,
        snapshot: String,
        sequence: u64,
        generation: u64,
    ) -> bool {
        let Some(room) = self.rooms.get(code) else {
            return false;
        };
        let mut state = room.lock();
        if generation != state.generation || sequence <= state.sequence {
            debug!(
                "Rejecting snapshot {}/{} for {} (stored {}/{})",
                generation, sequence, code, state.generation, state.sequence
            );
            return false;
        }
        state.snapshot = Some(snapshot);
        state.sequence = sequence;
        true
    }

    /// Blank the room if `generation` is newer than the stored one.
    pub fn apply_clear(&self, code: &str, generation: u64) -> bool {
        let Some(room) = self.rooms.get(code) else {
            return false;
        };
        let mut state = room.lock();
        if generation <= state.generation {
            debug!(
                "Rejecting clear to generation {} for {} (stored {})",
                generation, code, state.generation
            );
            return false;
        }
        state.snapshot = None;
        state.sequence = 0;
        state.generation = generation;
        true
    }

    /// Queues of every member except `exclude`.
    pub fn subscribers(&self, code: &str, exclude: Option<Uuid>) -> Vec<Arc<OutboundQueue>> {
        let Some(room) = self.rooms.get(code) else {
            return Vec::new();
        };
        let state = room.lock();
        state
            .members
            .values()
            .filter(|m| Some(m.session_id) != exclude)
            .map(|m| m.queue.clone())
            .collect()
    }

    /// Current authoritative state of a room, without joining it.
    pub fn current(&self, code: &str) -> Option<Bootstrap> {
        let room = self.rooms.get(code)?;
        let state = room.lock();
        Some(Room::bootstrap(&state))
    }

    /// Delete rooms that have been empty for longer than the grace period.
    /// Returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.rooms.retain(|code, room| {
            let state = room.lock();
            let vacant = state.members.is_empty();
            let expired = match state.vacant_since {
                Some(since) => vacant && now.saturating_duration_since(since) >= self.grace,
                None => false,
            };
            if expired {
                info!("Destroying room {}", code);
                removed += 1;
            }
            !expired
        });
        removed
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
