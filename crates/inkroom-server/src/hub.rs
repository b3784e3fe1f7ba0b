//! Fan-out of room events to member connections.
//!
//! Each connection owns an [`OutboundQueue`]. Publishing serializes an event
//! once and pushes it to every member's queue without waiting; a writer task
//! per connection drains its queue onto the socket. A slow reader therefore
//! only ever holds up itself.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use inkroom_core::protocol::{ServerMessage, encode};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error};
use uuid::Uuid;

use crate::registry::RoomRegistry;

/// A serialized server message.
#[derive(Debug, Clone)]
pub struct Frame {
    pub text: Arc<str>,
    /// Whether the frame may be shed under pressure.
    pub droppable: bool,
}

impl Frame {
    pub fn encode(msg: &ServerMessage) -> Option<Self> {
        match encode(msg) {
            Ok(text) => Some(Self {
                text: text.into(),
                droppable: msg.is_droppable(),
            }),
            Err(e) => {
                error!("Failed to encode server message: {}", e);
                None
            }
        }
    }
}

/// Result of pushing a frame onto a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The queue was full; the oldest pending stroke delta made room.
    DroppedOldest,
    /// The queue was full of frames that must be delivered; the incoming
    /// stroke delta was discarded.
    DroppedIncoming,
    /// Queued beyond capacity because the frame must be delivered.
    Overfilled,
    /// The connection is gone.
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<Frame>,
    saturated_since: Option<Instant>,
    dropped: u64,
    closed: bool,
}

/// Bounded outbound buffer for one connection.
#[derive(Debug)]
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue a frame. Never blocks.
    pub fn push(&self, frame: Frame) -> PushOutcome {
        let mut state = self.lock();
        if state.closed {
            return PushOutcome::Closed;
        }

        let outcome = if state.frames.len() < self.capacity {
            state.frames.push_back(frame);
            PushOutcome::Queued
        } else {
            state.saturated_since.get_or_insert_with(Instant::now);
            if let Some(oldest) = state.frames.iter().position(|f| f.droppable) {
                state.frames.remove(oldest);
                state.dropped += 1;
                state.frames.push_back(frame);
                PushOutcome::DroppedOldest
            } else if frame.droppable {
                state.dropped += 1;
                return PushOutcome::DroppedIncoming;
            } else {
                state.frames.push_back(frame);
                PushOutcome::Overfilled
            }
        };
        drop(state);
        self.notify.notify_one();
        outcome
    }

    /// Take every pending frame. An emptied queue is no longer saturated.
    pub fn drain(&self) -> Vec<Frame> {
        let mut state = self.lock();
        state.saturated_since = None;
        state.frames.drain(..).collect()
    }

    /// Wait until frames are pushed or the queue is closed.
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    /// How long the queue has been full without being drained.
    pub fn saturated_for(&self, now: Instant) -> Option<Duration> {
        self.lock()
            .saturated_since
            .map(|since| now.saturating_duration_since(since))
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stroke deltas shed so far.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Refuse further frames and wake the writer so it can shut down.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Publishes events to the members of a room.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    registry: Arc<RoomRegistry>,
}

impl BroadcastHub {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Send `msg` to every member of `room_code` except `exclude`.
    /// Returns the number of queues the frame landed in.
    pub fn publish(&self, room_code: &str, msg: &ServerMessage, exclude: Option<Uuid>) -> usize {
        let Some(frame) = Frame::encode(msg) else {
            return 0;
        };
        let mut delivered = 0;
        for queue in self.registry.subscribers(room_code, exclude) {
            match queue.push(frame.clone()) {
                PushOutcome::Queued | PushOutcome::DroppedOldest | PushOutcome::Overfilled => {
                    delivered += 1
                }
                PushOutcome::DroppedIncoming => {
                    debug!("Shedding stroke delta for a slow member of {}", room_code)
                }
                PushOutcome::Closed => {}
            }
        }
        delivered
    }

    /// Send `msg` to a single connection.
    pub fn send_to(&self, queue: &OutboundQueue, msg: &ServerMessage) -> bool {
        match Frame::encode(msg) {
            Some(frame) => !matches!(queue.push(frame), PushOutcome::Closed),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Member;
    use inkroom_core::protocol::ClearCanvas;

    fn stroke(n: usize) -> Frame {
        Frame {
            text: format!("stroke-{n}").into(),
            droppable: true,
        }
    }

    fn control(n: usize) -> Frame {
        Frame {
            text: format!("snapshot-{n}").into(),
            droppable: false,
        }
    }

    fn texts(frames: Vec<Frame>) -> Vec<String> {
        frames.into_iter().map(|f| f.text.to_string()).collect()
    }

    #[test]
    fn test_fifo_under_capacity() {
        let queue = OutboundQueue::new(4);
        assert_eq!(queue.push(stroke(1)), PushOutcome::Queued);
        assert_eq!(queue.push(control(2)), PushOutcome::Queued);
        assert_eq!(texts(queue.drain()), ["stroke-1", "snapshot-2"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_drops_oldest_stroke() {
        let queue = OutboundQueue::new(3);
        queue.push(stroke(1));
        queue.push(control(2));
        queue.push(stroke(3));
        assert_eq!(queue.push(stroke(4)), PushOutcome::DroppedOldest);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(texts(queue.drain()), ["snapshot-2", "stroke-3", "stroke-4"]);
    }

    #[test]
    fn test_full_of_controls_drops_incoming_stroke() {
        let queue = OutboundQueue::new(2);
        queue.push(control(1));
        queue.push(control(2));
        assert_eq!(queue.push(stroke(3)), PushOutcome::DroppedIncoming);
        assert_eq!(queue.push(control(4)), PushOutcome::Overfilled);
        assert_eq!(
            texts(queue.drain()),
            ["snapshot-1", "snapshot-2", "snapshot-4"]
        );
    }

    #[test]
    fn test_saturation_tracked_until_drained() {
        let queue = OutboundQueue::new(1);
        queue.push(control(1));
        assert!(queue.saturated_for(Instant::now()).is_none());

        queue.push(control(2));
        let later = Instant::now() + Duration::from_secs(6);
        let saturated = queue.saturated_for(later).unwrap();
        assert!(saturated >= Duration::from_secs(5));

        queue.drain();
        assert!(queue.saturated_for(later).is_none());
    }

    #[test]
    fn test_closed_queue_refuses_frames() {
        let queue = OutboundQueue::new(2);
        queue.close();
        assert!(queue.is_closed());
        assert_eq!(queue.push(control(1)), PushOutcome::Closed);
    }

    #[tokio::test]
    async fn test_push_wakes_writer() {
        let queue = Arc::new(OutboundQueue::new(4));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.notified().await;
                queue.drain().len()
            })
        };
        queue.push(stroke(1));
        assert_eq!(waiter.await.unwrap(), 1);
    }

    #[test]
    fn test_publish_excludes_sender() {
        let registry = Arc::new(RoomRegistry::new(Duration::from_secs(30)));
        let hub = BroadcastHub::new(registry.clone());
        let a = Member::new(Uuid::new_v4(), "a", Arc::new(OutboundQueue::new(8)));
        let b = Member::new(Uuid::new_v4(), "b", Arc::new(OutboundQueue::new(8)));
        let (a_id, a_queue, b_queue) = (a.session_id, a.queue.clone(), b.queue.clone());
        registry.join("AB12", a);
        registry.join("AB12", b);

        let msg = ServerMessage::ClearCanvas {
            from: a_id.to_string(),
            clear: ClearCanvas {
                room_code: "AB12".to_string(),
                generation: 1,
            },
        };
        assert_eq!(hub.publish("AB12", &msg, Some(a_id)), 1);
        assert!(a_queue.is_empty());
        let frames = b_queue.drain();
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].droppable);

        assert_eq!(hub.publish("AB12", &msg, None), 2);
        assert_eq!(hub.publish("nope", &msg, None), 0);
    }
}
