//! Applies inbound room events to the local raster.
//!
//! Stroke deltas are only a preview; snapshots and clears carry the
//! (generation, sequence) pair that decides whether an event is newer than
//! what the raster already shows. Anything stale is discarded so a late or
//! duplicated event can never roll the surface back.

use crate::protocol::{CanvasSnapshot, StrokeDelta};
use crate::raster::Raster;

/// Position of a raster in the room's history.
///
/// Field order matters: the derived ordering compares `generation` first,
/// then `sequence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Versions {
    /// Bumped by every accepted clear.
    pub generation: u64,
    /// Bumped by every accepted snapshot; reset to 0 by a clear.
    pub sequence: u64,
}

impl Versions {
    pub fn new(generation: u64, sequence: u64) -> Self {
        Self {
            generation,
            sequence,
        }
    }
}

/// Client-side receiver state for one room.
#[derive(Debug, Clone, Default)]
pub struct SyncReceiver {
    versions: Versions,
    discarded: u64,
}

impl SyncReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locally observed generation and sequence.
    pub fn versions(&self) -> Versions {
        self.versions
    }

    /// Number of events dropped as stale since the last reset.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Forget everything observed. Called before (re)joining a room.
    pub fn reset(&mut self) {
        self.versions = Versions::default();
        self.discarded = 0;
    }

    /// Apply the state handed out on join.
    ///
    /// Uses the snapshot ordering, but an equal version is accepted so that a
    /// fresh room (generation 0, sequence 0) still blanks the raster. Events
    /// relayed before the bootstrap frame may already have moved the receiver
    /// past it, in which case the bootstrap is stale and ignored.
    pub fn apply_bootstrap(
        &mut self,
        raster: &mut Raster,
        payload: Option<&str>,
        versions: Versions,
    ) -> bool {
        if versions < self.versions {
            self.discard("bootstrap", versions);
            return false;
        }
        match payload {
            None => raster.clear(),
            Some(url) => match raster.decode_snapshot(url) {
                Ok(decoded) => raster.replace_with(&decoded),
                Err(e) => {
                    log::warn!("Ignoring bootstrap with undecodable raster: {}", e);
                    return false;
                }
            },
        }
        self.versions = versions;
        true
    }

    /// Apply a stroke delta when it was drawn under the current generation.
    pub fn apply_stroke(&mut self, raster: &mut Raster, delta: &StrokeDelta) -> bool {
        if delta.generation != self.versions.generation {
            let incoming = Versions::new(delta.generation, self.versions.sequence);
            self.discard("stroke", incoming);
            return false;
        }
        raster.stroke_segment(
            delta.from_point(),
            delta.to_point(),
            delta.color,
            delta.width,
            delta.tool.composite_mode(),
        );
        true
    }

    /// Overwrite the raster with a snapshot newer than the local state.
    ///
    /// Within a generation a higher sequence wins. A snapshot from a newer
    /// generation is adopted together with its generation.
    pub fn apply_snapshot(&mut self, raster: &mut Raster, snapshot: &CanvasSnapshot) -> bool {
        let incoming = Versions::new(snapshot.generation, snapshot.sequence);
        if incoming <= self.versions {
            self.discard("snapshot", incoming);
            return false;
        }
        match raster.decode_snapshot(&snapshot.raster) {
            Ok(decoded) => {
                raster.replace_with(&decoded);
                self.versions = incoming;
                true
            }
            Err(e) => {
                log::warn!(
                    "Ignoring snapshot {}/{} with undecodable raster: {}",
                    snapshot.generation,
                    snapshot.sequence,
                    e
                );
                false
            }
        }
    }

    /// Blank the raster for a clear from a newer generation.
    pub fn apply_clear(&mut self, raster: &mut Raster, generation: u64) -> bool {
        if generation <= self.versions.generation {
            self.discard("clear", Versions::new(generation, 0));
            return false;
        }
        raster.clear();
        self.versions = Versions::new(generation, 0);
        true
    }

    /// Record a clear performed locally.
    pub fn adopt_local_clear(&mut self, generation: u64) {
        self.versions = Versions::new(generation, 0);
    }

    fn discard(&mut self, kind: &str, incoming: Versions) {
        self.discarded += 1;
        log::debug!(
            "Discarding stale {} {}/{} (local {}/{})",
            kind,
            incoming.generation,
            incoming.sequence,
            self.versions.generation,
            self.versions.sequence
        );
    }
}
