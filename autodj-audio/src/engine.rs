//! Audio engine handle - the seam between the playback core and a renderer
//!
//! Everything the pipeline, scheduler and effect graph do to audio goes
//! through [`AudioEngineHandle`]. Two implementations exist: the real-time
//! [`NativeEngine`](crate::NativeEngine) and the virtual-clock
//! [`SimulatedEngine`](crate::SimulatedEngine) used by tests.

use autodj_analysis::{FilterType, FrequencySnapshot};
use thiserror::Error;

/// Handle to a playable source (one decoded track)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

/// Handle to a node in the render graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Kind of node to create
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    /// Feeds a source's audio into the graph (at most one per source)
    MediaSource(SourceId),
    Gain,
    Biquad(FilterType),
    /// Delay line with an internal feedback path
    Delay { max_delay_secs: f32 },
    /// Convolution reverb with a generated impulse response
    Convolver,
    Compressor,
    /// Pass-through tap that exposes frequency snapshots
    Analyser { fft_size: usize },
    /// Spatial positioning relative to a listener at the origin facing -z
    Panner,
}

/// Automatable parameter of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Gain,
    Frequency,
    Q,
    /// Biquad shelf/peak gain in dB
    FilterGain,
    DelayTime,
    Feedback,
    Threshold,
    Knee,
    Ratio,
    Attack,
    Release,
    PositionX,
    PositionY,
    PositionZ,
    OrientationX,
    OrientationY,
    OrientationZ,
}

impl ParamKind {
    /// Intrinsic value of a parameter before any automation
    pub fn default_value(self) -> f32 {
        match self {
            ParamKind::Gain => 1.0,
            ParamKind::Frequency => 350.0,
            ParamKind::Q => 1.0,
            ParamKind::FilterGain => 0.0,
            ParamKind::DelayTime => 0.0,
            ParamKind::Feedback => 0.0,
            ParamKind::Threshold => -24.0,
            ParamKind::Knee => 30.0,
            ParamKind::Ratio => 12.0,
            ParamKind::Attack => 0.003,
            ParamKind::Release => 0.25,
            ParamKind::PositionX | ParamKind::PositionY | ParamKind::PositionZ => 0.0,
            ParamKind::OrientationX | ParamKind::OrientationY => 0.0,
            ParamKind::OrientationZ => 1.0,
        }
    }

    /// Parameters a node of the given kind exposes
    pub fn for_node(kind: &NodeKind) -> &'static [ParamKind] {
        match kind {
            NodeKind::MediaSource(_) | NodeKind::Convolver | NodeKind::Analyser { .. } => &[],
            NodeKind::Gain => &[ParamKind::Gain],
            NodeKind::Biquad(_) => &[ParamKind::Frequency, ParamKind::Q, ParamKind::FilterGain],
            NodeKind::Delay { .. } => &[ParamKind::DelayTime, ParamKind::Feedback],
            NodeKind::Compressor => &[
                ParamKind::Threshold,
                ParamKind::Knee,
                ParamKind::Ratio,
                ParamKind::Attack,
                ParamKind::Release,
            ],
            NodeKind::Panner => &[
                ParamKind::PositionX,
                ParamKind::PositionY,
                ParamKind::PositionZ,
                ParamKind::OrientationX,
                ParamKind::OrientationY,
                ParamKind::OrientationZ,
            ],
        }
    }
}

/// Address of one automatable parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Param {
    pub node: NodeId,
    pub kind: ParamKind,
}

impl Param {
    pub fn new(node: NodeId, kind: ParamKind) -> Self {
        Self { node, kind }
    }
}

/// Notifications surfaced by [`AudioEngineHandle::poll_events`]
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The source finished decoding and can start immediately
    Loaded(SourceId),
    /// The source could not be decoded
    LoadFailed(SourceId, String),
    /// The source played through to its end
    Ended(SourceId),
}

/// Errors from graph and source management
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Unknown source {0:?}")]
    UnknownSource(SourceId),
    #[error("Unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("Source {0:?} is already connected to the graph")]
    SourceAlreadyConnected(SourceId),
    #[error("Connecting {0:?} -> {1:?} would create a cycle")]
    Cycle(NodeId, NodeId),
    #[error("Audio engine unavailable: {0}")]
    Unavailable(String),
}

/// Errors from starting playback
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlayError {
    #[error("Unknown source {0:?}")]
    UnknownSource(SourceId),
    #[error("Playback rejected: {0}")]
    Rejected(String),
}

/// Handle to an audio engine.
///
/// Object safe, used from a single control thread. Times are engine seconds
/// on the same clock as [`current_time`](Self::current_time).
pub trait AudioEngineHandle {
    /// Monotonic engine clock in seconds
    fn current_time(&self) -> f64;

    // Sources

    /// Start loading a track; `EngineEvent::Loaded` follows when ready
    fn create_source(&mut self, locator: &str) -> Result<SourceId, EngineError>;
    fn is_ready(&self, source: SourceId) -> bool;
    fn play(&mut self, source: SourceId) -> Result<(), PlayError>;
    fn pause(&mut self, source: SourceId);
    /// Pause and rewind to the start
    fn stop(&mut self, source: SourceId);
    fn seek(&mut self, source: SourceId, secs: f64);
    fn is_playing(&self, source: SourceId) -> bool;
    /// Per-source output volume (0.0 - 1.0)
    fn set_volume(&mut self, source: SourceId, volume: f32);
    fn volume(&self, source: SourceId) -> f32;
    /// Playback position in seconds
    fn position(&self, source: SourceId) -> f64;
    /// Length in seconds, once known
    fn duration(&self, source: SourceId) -> Option<f64>;
    /// Stop and free a source and its decoded audio
    fn release_source(&mut self, source: SourceId);

    // Graph

    fn create_node(&mut self, kind: NodeKind) -> Result<NodeId, EngineError>;
    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), EngineError>;
    /// Remove every outgoing edge of `node`
    fn disconnect(&mut self, node: NodeId);
    /// Remove a node and every edge touching it
    fn remove_node(&mut self, node: NodeId);
    /// Final output node
    fn destination(&self) -> NodeId;
    /// All edges currently in the graph
    fn connections(&self) -> Vec<(NodeId, NodeId)>;
    fn set_filter_type(&mut self, node: NodeId, filter_type: FilterType);

    // Parameter automation

    fn set_value_at_time(&mut self, param: Param, value: f32, time: f64);
    fn linear_ramp_to_value_at_time(&mut self, param: Param, value: f32, time: f64);
    /// Drop every event scheduled at or after `from`
    fn cancel_scheduled_values(&mut self, param: Param, from: f64);
    /// Automated value at `time`, `None` for an unknown parameter
    fn param_value_at(&self, param: Param, time: f64) -> Option<f32>;

    // Analysis and notifications

    /// Latest snapshot from an analyser node
    fn frequency_snapshot(&mut self, analyser: NodeId) -> Option<FrequencySnapshot>;
    /// Drain pending notifications
    fn poll_events(&mut self) -> Vec<EngineEvent>;
}

/// Nodes reachable downstream of `from`, including `from` itself
pub(crate) fn downstream(edges: &[(NodeId, NodeId)], from: NodeId) -> Vec<NodeId> {
    let mut seen = vec![from];
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        for &(a, b) in edges {
            if a == node && !seen.contains(&b) {
                seen.push(b);
                stack.push(b);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_for_node() {
        assert_eq!(ParamKind::for_node(&NodeKind::Gain), &[ParamKind::Gain]);
        assert!(ParamKind::for_node(&NodeKind::Convolver).is_empty());
        assert_eq!(ParamKind::for_node(&NodeKind::Panner).len(), 6);
    }

    #[test]
    fn test_downstream() {
        let (a, b, c, d) = (NodeId(1), NodeId(2), NodeId(3), NodeId(4));
        let edges = vec![(a, b), (b, c), (d, c)];
        let reach = downstream(&edges, a);
        assert_eq!(reach, vec![a, b, c]);
        assert!(!reach.contains(&d));
    }
}
