//! Local drawing state machine.
//!
//! Turns pointer activity into stroke deltas and end-of-stroke snapshots.
//! Every segment is applied to the local raster before the matching event is
//! handed out, so the user's own input never waits on the network.
//!
//! Finished strokes are remembered until the room settles past the snapshot
//! that carried them. A snapshot arriving in the meantime (including a late
//! echo of an older one of ours) replaces the raster, and the remembered
//! strokes are drawn again on top of it.

use crate::brush::Brush;
use crate::protocol::{CanvasSnapshot, ClearCanvas, StrokeDelta};
use crate::raster::Raster;
use crate::receiver::{SyncReceiver, Versions};
use kurbo::Point;

/// State of a drawing interaction.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DrawState {
    /// Waiting for a pointer-down.
    #[default]
    Idle,
    /// Pointer is down and strokes are being laid.
    Drawing {
        /// Where the stroke started.
        start: Point,
        /// Last point a segment ended at.
        last: Point,
        /// Segments applied so far in this stroke.
        segments: usize,
    },
}

/// Points laid with one brush.
#[derive(Debug, Clone, Default)]
struct Stroke {
    brush: Brush,
    points: Vec<Point>,
}

impl Stroke {
    fn replay(&self, raster: &mut Raster) {
        let color = self.brush.stroke_color();
        let mode = self.brush.tool.composite_mode();
        for pair in self.points.windows(2) {
            raster.stroke_segment(pair[0], pair[1], color, self.brush.width(), mode);
        }
    }
}

/// A finished stroke and the snapshot version it was sent under.
#[derive(Debug, Clone)]
struct SentStroke {
    versions: Versions,
    stroke: Stroke,
}

/// Converts pointer input into local raster edits and outbound events.
#[derive(Debug, Clone, Default)]
pub struct DrawingStateMachine {
    /// Brush picked up by the next stroke.
    pub brush: Brush,
    state: DrawState,
    /// Stroke in progress.
    stroke: Stroke,
    /// Sent strokes the room has not settled past yet, oldest first.
    unsettled: Vec<SentStroke>,
    /// Last snapshot version this client handed out.
    issued: Versions,
    clear_requested: bool,
}

impl DrawingStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DrawState {
        self.state
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self.state, DrawState::Drawing { .. })
    }

    /// Idle -> Drawing.
    pub fn pointer_down(&mut self, position: Point) {
        if !position.is_finite() {
            return;
        }
        self.stroke = Stroke {
            brush: self.brush,
            points: vec![position],
        };
        self.state = DrawState::Drawing {
            start: position,
            last: position,
            segments: 0,
        };
    }

    /// Drawing -> Drawing. Applies the segment locally, then returns the
    /// delta to send when a room is joined. Hover moves while idle do
    /// nothing.
    pub fn pointer_move(
        &mut self,
        position: Point,
        raster: &mut Raster,
        receiver: &SyncReceiver,
        room_code: Option<&str>,
    ) -> Option<StrokeDelta> {
        if !position.is_finite() {
            return None;
        }
        let DrawState::Drawing { last, segments, .. } = &mut self.state else {
            return None;
        };
        let from = std::mem::replace(last, position);
        *segments += 1;

        let brush = self.stroke.brush;
        let color = brush.stroke_color();
        let width = brush.width();
        let tool = brush.tool;
        raster.stroke_segment(from, position, color, width, tool.composite_mode());
        self.stroke.points.push(position);

        room_code.map(|room_code| StrokeDelta {
            room_code: room_code.to_string(),
            prev_x: from.x,
            prev_y: from.y,
            curr_x: position.x,
            curr_y: position.y,
            color,
            width,
            tool,
            generation: receiver.versions().generation,
        })
    }

    /// Drawing -> Idle. Captures the full raster as the next snapshot.
    ///
    /// A press-and-release without movement lays no segment and produces no
    /// snapshot.
    pub fn pointer_up(
        &mut self,
        raster: &Raster,
        receiver: &SyncReceiver,
        room_code: Option<&str>,
    ) -> Option<CanvasSnapshot> {
        let DrawState::Drawing { segments, .. } = self.state else {
            return None;
        };
        let stroke = std::mem::take(&mut self.stroke);
        self.state = DrawState::Idle;
        if segments == 0 {
            return None;
        }
        let room_code = room_code?;

        let payload = match raster.to_data_url() {
            Ok(url) => url,
            Err(e) => {
                log::error!("Failed to capture snapshot: {}", e);
                return None;
            }
        };
        let versions = self.next_snapshot_version(receiver.versions());
        self.unsettled.push(SentStroke { versions, stroke });
        Some(CanvasSnapshot {
            room_code: room_code.to_string(),
            raster: payload,
            sequence: versions.sequence,
            generation: versions.generation,
        })
    }

    /// Ask for a clear. Nothing happens until it is confirmed.
    pub fn request_clear(&mut self) {
        self.clear_requested = true;
    }

    pub fn cancel_clear(&mut self) {
        self.clear_requested = false;
    }

    pub fn is_clear_requested(&self) -> bool {
        self.clear_requested
    }

    /// Perform a requested clear: blank the raster, move to the next
    /// generation and abandon the stroke in progress.
    pub fn confirm_clear(
        &mut self,
        raster: &mut Raster,
        receiver: &mut SyncReceiver,
        room_code: Option<&str>,
    ) -> Option<ClearCanvas> {
        if !std::mem::take(&mut self.clear_requested) {
            return None;
        }
        self.end_stroke();
        self.unsettled.clear();
        raster.clear();

        let generation = receiver.versions().generation + 1;
        receiver.adopt_local_clear(generation);
        self.issued = Versions::new(generation, 0);

        room_code.map(|room_code| ClearCanvas {
            room_code: room_code.to_string(),
            generation,
        })
    }

    /// Redraw this client's own work on top of a raster that room state at
    /// `applied` just replaced.
    ///
    /// Sent strokes at or below `applied` are settled: either the room's
    /// raster already holds them, or the room took another snapshot at their
    /// sequence and they are gone for everyone. Echoes come back in the order
    /// the room accepted them, so a sent stroke still missing its echo when a
    /// later version lands was rejected. The rest are replayed oldest first,
    /// then the stroke in progress.
    pub fn restore_local_work(&mut self, raster: &mut Raster, applied: Versions) {
        self.unsettled.retain(|sent| sent.versions > applied);
        for sent in &self.unsettled {
            sent.stroke.replay(raster);
        }
        self.stroke.replay(raster);
    }

    /// A remote clear moved the room to `generation`. Sent strokes from
    /// earlier generations are gone, and the stroke in progress continues
    /// from its current point.
    pub fn apply_remote_clear(&mut self, generation: u64) {
        let cleared = Versions::new(generation, 0);
        self.unsettled.retain(|sent| sent.versions > cleared);
        if let Some(&last) = self.stroke.points.last() {
            self.stroke.points.clear();
            self.stroke.points.push(last);
        }
    }

    /// Forget sent strokes. After a reconnect the room's bootstrap is the
    /// whole truth and nothing sent earlier is replayed.
    pub fn forget_sent(&mut self) {
        self.unsettled.clear();
    }

    /// Number of sent strokes not settled yet.
    pub fn unsettled_strokes(&self) -> usize {
        self.unsettled.len()
    }

    /// Drop any stroke in progress, sent strokes and the pending clear, and
    /// forget issued versions. Used when switching rooms.
    pub fn reset(&mut self) {
        self.end_stroke();
        self.unsettled.clear();
        self.clear_requested = false;
        self.issued = Versions::default();
    }

    fn end_stroke(&mut self) {
        self.state = DrawState::Idle;
        self.stroke = Stroke::default();
    }

    /// Next sequence to stamp on a snapshot: one past both what was observed
    /// from the room and what this client already handed out in the same
    /// generation.
    fn next_snapshot_version(&mut self, observed: Versions) -> Versions {
        let base = if self.issued.generation == observed.generation {
            self.issued.sequence.max(observed.sequence)
        } else {
            observed.sequence
        };
        self.issued = Versions::new(observed.generation, base + 1);
        self.issued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brush::{BrushColor, Tool};

    const ROOM: Option<&str> = Some("AB12");

    fn setup() -> (DrawingStateMachine, Raster, SyncReceiver) {
        (
            DrawingStateMachine::new(),
            Raster::blank(100, 60),
            SyncReceiver::new(),
        )
    }

    #[test]
    fn test_move_without_down_is_hover() {
        let (mut dsm, mut raster, receiver) = setup();
        let delta = dsm.pointer_move(Point::new(5.0, 5.0), &mut raster, &receiver, ROOM);
        assert!(delta.is_none());
        assert!(raster.is_blank());
        assert_eq!(dsm.state(), DrawState::Idle);
    }

    #[test]
    fn test_stroke_applies_locally_then_emits() {
        let (mut dsm, mut raster, receiver) = setup();
        dsm.pointer_down(Point::new(10.0, 10.0));
        assert!(dsm.is_drawing());

        let delta = dsm
            .pointer_move(Point::new(50.0, 10.0), &mut raster, &receiver, ROOM)
            .unwrap();
        assert_eq!(raster.pixel(30, 10), Some([0, 0, 0, 255]));
        assert_eq!(delta.from_point(), Point::new(10.0, 10.0));
        assert_eq!(delta.to_point(), Point::new(50.0, 10.0));
        assert_eq!(delta.color, BrushColor::black());
        assert_eq!(delta.width, 5.0);
        assert_eq!(delta.tool, Tool::Pen);
        assert_eq!(delta.generation, 0);
        assert_eq!(delta.room_code, "AB12");

        let next = dsm
            .pointer_move(Point::new(50.0, 40.0), &mut raster, &receiver, ROOM)
            .unwrap();
        assert_eq!(next.from_point(), Point::new(50.0, 10.0));
    }

    #[test]
    fn test_release_emits_snapshot_of_raster() {
        let (mut dsm, mut raster, receiver) = setup();
        dsm.pointer_down(Point::new(10.0, 10.0));
        dsm.pointer_move(Point::new(50.0, 10.0), &mut raster, &receiver, ROOM);
        let snap = dsm.pointer_up(&raster, &receiver, ROOM).unwrap();

        assert_eq!(snap.sequence, 1);
        assert_eq!(snap.generation, 0);
        assert_eq!(Raster::from_data_url(&snap.raster).unwrap(), raster);
        assert_eq!(dsm.state(), DrawState::Idle);
        assert!(dsm.pointer_up(&raster, &receiver, ROOM).is_none());
    }

    #[test]
    fn test_click_without_move_sends_nothing() {
        let (mut dsm, raster, receiver) = setup();
        dsm.pointer_down(Point::new(10.0, 10.0));
        assert!(dsm.pointer_up(&raster, &receiver, ROOM).is_none());
    }

    #[test]
    fn test_offline_drawing_stays_local() {
        let (mut dsm, mut raster, receiver) = setup();
        dsm.pointer_down(Point::new(10.0, 10.0));
        let delta = dsm.pointer_move(Point::new(20.0, 10.0), &mut raster, &receiver, None);
        assert!(delta.is_none());
        assert!(!raster.is_blank());
        assert!(dsm.pointer_up(&raster, &receiver, None).is_none());
    }

    #[test]
    fn test_sequence_tracks_issued_and_observed() {
        fn stroke(
            dsm: &mut DrawingStateMachine,
            raster: &mut Raster,
            receiver: &SyncReceiver,
        ) -> u64 {
            dsm.pointer_down(Point::new(1.0, 1.0));
            dsm.pointer_move(Point::new(9.0, 1.0), raster, receiver, ROOM);
            dsm.pointer_up(raster, receiver, ROOM).unwrap().sequence
        }

        let (mut dsm, mut raster, mut receiver) = setup();

        assert_eq!(stroke(&mut dsm, &mut raster, &receiver), 1);
        // not yet echoed back by the room: keep counting from what was issued
        assert_eq!(stroke(&mut dsm, &mut raster, &receiver), 2);

        // another client's snapshot moved the room ahead
        let remote = CanvasSnapshot {
            room_code: "AB12".to_string(),
            raster: raster.to_data_url().unwrap(),
            sequence: 7,
            generation: 0,
        };
        assert!(receiver.apply_snapshot(&mut raster, &remote));
        assert_eq!(stroke(&mut dsm, &mut raster, &receiver), 8);
    }

    #[test]
    fn test_clear_needs_confirmation() {
        let (mut dsm, mut raster, mut receiver) = setup();
        dsm.pointer_down(Point::new(10.0, 10.0));
        dsm.pointer_move(Point::new(50.0, 10.0), &mut raster, &receiver, ROOM);

        let clear = dsm.confirm_clear(&mut raster, &mut receiver, ROOM);
        assert!(clear.is_none());
        dsm.request_clear();
        dsm.cancel_clear();
        let clear = dsm.confirm_clear(&mut raster, &mut receiver, ROOM);
        assert!(clear.is_none());
        assert!(!raster.is_blank());

        dsm.request_clear();
        let clear = dsm.confirm_clear(&mut raster, &mut receiver, ROOM).unwrap();
        assert_eq!(clear.generation, 1);
        assert!(raster.is_blank());
        assert_eq!(receiver.versions(), Versions::new(1, 0));
        // stroke in progress was abandoned
        assert!(!dsm.is_drawing());
        assert!(dsm.pointer_up(&raster, &receiver, ROOM).is_none());
    }

    #[test]
    fn test_strokes_after_clear_use_new_generation() {
        let (mut dsm, mut raster, mut receiver) = setup();
        dsm.request_clear();
        dsm.confirm_clear(&mut raster, &mut receiver, ROOM);

        dsm.pointer_down(Point::new(10.0, 10.0));
        let delta = dsm
            .pointer_move(Point::new(20.0, 10.0), &mut raster, &receiver, ROOM)
            .unwrap();
        assert_eq!(delta.generation, 1);
        let snap = dsm.pointer_up(&raster, &receiver, ROOM).unwrap();
        assert_eq!((snap.generation, snap.sequence), (1, 1));
    }

    #[test]
    fn test_eraser_knocks_out_pen() {
        let (mut dsm, mut raster, receiver) = setup();
        dsm.pointer_down(Point::new(10.0, 10.0));
        dsm.pointer_move(Point::new(50.0, 10.0), &mut raster, &receiver, ROOM);
        dsm.pointer_up(&raster, &receiver, ROOM);

        dsm.brush.tool = Tool::Eraser;
        dsm.pointer_down(Point::new(30.0, 0.0));
        let delta = dsm
            .pointer_move(Point::new(30.0, 20.0), &mut raster, &receiver, ROOM)
            .unwrap();
        assert_eq!(delta.color, BrushColor::white());
        assert_eq!(raster.pixel(30, 10), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_restore_redraws_stroke_in_progress() {
        let (mut dsm, mut raster, receiver) = setup();
        dsm.pointer_down(Point::new(10.0, 10.0));
        dsm.pointer_move(Point::new(50.0, 10.0), &mut raster, &receiver, ROOM);
        let drawn = raster.clone();

        raster.clear();
        dsm.restore_local_work(&mut raster, Versions::new(0, 3));
        assert_eq!(raster, drawn);

        dsm.apply_remote_clear(1);
        raster.clear();
        dsm.restore_local_work(&mut raster, Versions::new(1, 0));
        assert!(raster.is_blank());
    }

    #[test]
    fn test_restore_keeps_strokes_newer_than_applied() {
        let (mut dsm, mut raster, receiver) = setup();
        for y in [10.0, 30.0, 50.0] {
            dsm.pointer_down(Point::new(10.0, y));
            dsm.pointer_move(Point::new(90.0, y), &mut raster, &receiver, ROOM);
            dsm.pointer_up(&raster, &receiver, ROOM).unwrap();
        }
        assert_eq!(dsm.unsettled_strokes(), 3);

        // the room settled on sequence 1: strokes 2 and 3 come back
        raster.clear();
        dsm.restore_local_work(&mut raster, Versions::new(0, 1));
        assert_eq!(dsm.unsettled_strokes(), 2);
        assert_eq!(raster.pixel(50, 10), Some([255, 255, 255, 255]));
        assert_eq!(raster.pixel(50, 30), Some([0, 0, 0, 255]));
        assert_eq!(raster.pixel(50, 50), Some([0, 0, 0, 255]));

        dsm.restore_local_work(&mut raster, Versions::new(0, 3));
        assert_eq!(dsm.unsettled_strokes(), 0);
    }

    #[test]
    fn test_stroke_keeps_brush_it_started_with() {
        let (mut dsm, mut raster, receiver) = setup();
        dsm.pointer_down(Point::new(10.0, 10.0));
        dsm.brush.color = BrushColor::new(255, 0, 0, 255);
        let delta = dsm
            .pointer_move(Point::new(50.0, 10.0), &mut raster, &receiver, ROOM)
            .unwrap();
        assert_eq!(delta.color, BrushColor::black());
        assert_eq!(raster.pixel(30, 10), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_clear_and_reset_forget_sent_strokes() {
        let (mut dsm, mut raster, mut receiver) = setup();
        dsm.pointer_down(Point::new(10.0, 10.0));
        dsm.pointer_move(Point::new(50.0, 10.0), &mut raster, &receiver, ROOM);
        dsm.pointer_up(&raster, &receiver, ROOM).unwrap();
        assert_eq!(dsm.unsettled_strokes(), 1);

        dsm.request_clear();
        dsm.confirm_clear(&mut raster, &mut receiver, ROOM).unwrap();
        assert_eq!(dsm.unsettled_strokes(), 0);

        dsm.pointer_down(Point::new(10.0, 10.0));
        dsm.pointer_move(Point::new(50.0, 10.0), &mut raster, &receiver, ROOM);
        dsm.pointer_up(&raster, &receiver, ROOM).unwrap();
        dsm.reset();
        assert_eq!(dsm.unsettled_strokes(), 0);
    }
}
