//! Playback slots

use crate::engine::{AudioEngineHandle, SourceId};
use crate::graph::EffectGraph;

use super::track::Track;

/// Lifecycle of a slot's source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Stopped, nothing scheduled
    Idle,
    /// Source created, still decoding
    Loading,
    /// Decoded, not playing
    Ready,
    Playing,
    Paused,
    Ended,
    /// Swapped out and released
    Superseded,
}

/// One of the two live slots (`current` or `next`)
#[derive(Debug)]
pub struct PlaybackSlot {
    pub track: Track,
    pub source: SourceId,
    pub graph: EffectGraph,
    pub state: SlotState,
    /// Unique per promotion; timers address slots by it
    pub generation: u64,
    /// Advisor suggestions already applied to this slot's chain
    pub advice_applied: bool,
    /// Start playing as soon as the source is ready
    pub(crate) autoplay: bool,
}

impl PlaybackSlot {
    pub(crate) fn new(track: Track, source: SourceId, graph: EffectGraph, state: SlotState, generation: u64) -> Self {
        Self {
            track,
            source,
            graph,
            state,
            generation,
            advice_applied: false,
            autoplay: false,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state == SlotState::Playing
    }

    /// Stop the source, tear down its chain and free it
    pub(crate) fn release(mut self, engine: &mut dyn AudioEngineHandle) -> Track {
        engine.stop(self.source);
        let graph = std::mem::replace(&mut self.graph, EffectGraph::Unavailable);
        graph.teardown(engine);
        engine.release_source(self.source);
        self.state = SlotState::Superseded;
        tracing::debug!(source = ?self.source, title = %self.track.title, "slot released");
        self.track
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::track::TrackId;
    use crate::sim::SimulatedEngine;

    #[test]
    fn test_release_frees_everything() {
        let mut engine = SimulatedEngine::new();
        let source = engine.create_source("a.mp3").unwrap();
        let graph = EffectGraph::build(&mut engine, source);
        engine.play(source).unwrap();

        let slot = PlaybackSlot::new(Track::new(TrackId(1), "a.mp3"), source, graph, SlotState::Playing, 1);
        assert!(slot.is_playing());
        let track = slot.release(&mut engine);

        assert_eq!(track.locator, "a.mp3");
        assert_eq!(engine.node_count(), 0);
        assert_eq!(engine.source_count(), 0);
        assert!(engine.connections().is_empty());
    }
}
