//! Per-slot effect chain
//!
//! Each playback slot owns one [`EffectGraph`]: either a fully built
//! chain of engine nodes or `Unavailable`, in which case every operation is
//! a no-op and the source plays dry.
//!
//! Signal flow:
//! ```text
//! source -> pre-gain -> 7-band EQ -> transition EQ (low/mid/high)
//!        -> dynamic filter pool (4) -> sweep lowpass -> stereo gain
//!        -> { dry | delay -> delay wet | reverb send -> convolver -> reverb wet }
//!        -> compressor -> analyser -> panner -> destination
//! ```

use autodj_analysis::{EffectSpec, FilterSpec, FilterType};

use crate::engine::{AudioEngineHandle, EngineError, NodeId, NodeKind, Param, ParamKind, SourceId};

/// Number of biquads in the dynamic filter pool
pub const DYNAMIC_POOL_SIZE: usize = 4;

/// Analyser FFT size
pub const ANALYSER_FFT_SIZE: usize = 2048;

/// Longest delay the chain's delay line supports
pub const MAX_DELAY_SECS: f32 = 2.0;

/// Largest boost/cut any EQ gain may be automated to
pub const MAX_EQ_GAIN_DB: f32 = 12.0;

/// Default ramp time for advisor-driven changes
pub const ADVICE_RAMP_SECS: f64 = 0.5;

/// One band of the static tone-shaping EQ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EqBand {
    pub filter_type: FilterType,
    pub frequency_hz: f32,
    pub q: Option<f32>,
    pub gain_db: f32,
}

const fn band(filter_type: FilterType, frequency_hz: f32, q: Option<f32>, gain_db: f32) -> EqBand {
    EqBand {
        filter_type,
        frequency_hz,
        q,
        gain_db,
    }
}

/// Static EQ: sub-bass, bass, lower-mid, mid, upper-mid, high, air
pub const EQ_BANDS: [EqBand; 7] = [
    band(FilterType::LowShelf, 60.0, None, 2.0),
    band(FilterType::Peaking, 120.0, Some(1.2), 3.5),
    band(FilterType::Peaking, 400.0, Some(1.5), -1.0),
    band(FilterType::Peaking, 1200.0, Some(1.2), 2.0),
    band(FilterType::Peaking, 3000.0, Some(1.5), 2.5),
    band(FilterType::Peaking, 7500.0, Some(1.0), 2.5),
    band(FilterType::HighShelf, 12000.0, None, 3.0),
];

/// Automatable control of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    PreGain,
    EqGain(usize),
    /// Transition EQ low shelf gain (dB)
    TransitionLow,
    /// Transition EQ mid peak gain (dB)
    TransitionMid,
    /// Transition EQ high shelf gain (dB)
    TransitionHigh,
    DynamicFrequency(usize),
    DynamicQ(usize),
    DynamicGain(usize),
    SweepFrequency,
    SweepQ,
    StereoGain,
    Dry,
    DelayTime,
    DelayFeedback,
    DelayWet,
    ReverbWet,
}

impl Control {
    /// Valid automation range
    pub fn bounds(self) -> (f32, f32) {
        match self {
            Control::EqGain(_)
            | Control::TransitionLow
            | Control::TransitionMid
            | Control::TransitionHigh
            | Control::DynamicGain(_) => (-MAX_EQ_GAIN_DB, MAX_EQ_GAIN_DB),
            Control::DynamicFrequency(_) | Control::SweepFrequency => (20.0, 20000.0),
            Control::DynamicQ(_) | Control::SweepQ => (0.0001, 30.0),
            Control::DelayTime => (0.0, MAX_DELAY_SECS),
            Control::DelayFeedback => (0.0, 0.95),
            Control::PreGain
            | Control::StereoGain
            | Control::Dry
            | Control::DelayWet
            | Control::ReverbWet => (0.0, 1.0),
        }
    }
}

/// Node handles of a built chain
#[derive(Debug, Clone, PartialEq)]
pub struct EffectChain {
    pub input: NodeId,
    pub pre_gain: NodeId,
    pub eq: [NodeId; 7],
    pub transition_low: NodeId,
    pub transition_mid: NodeId,
    pub transition_high: NodeId,
    pub dynamic: [NodeId; DYNAMIC_POOL_SIZE],
    pub sweep: NodeId,
    pub stereo: NodeId,
    pub dry: NodeId,
    pub delay: NodeId,
    pub delay_wet: NodeId,
    pub reverb_send: NodeId,
    pub convolver: NodeId,
    pub reverb_wet: NodeId,
    pub compressor: NodeId,
    pub analyser: NodeId,
    pub panner: NodeId,
    nodes: Vec<NodeId>,
}

impl EffectChain {
    /// Engine parameter behind a control (`None` for an out-of-range index)
    pub fn param(&self, control: Control) -> Option<Param> {
        let p = |node, kind| Some(Param::new(node, kind));
        match control {
            Control::PreGain => p(self.pre_gain, ParamKind::Gain),
            Control::EqGain(i) => p(*self.eq.get(i)?, ParamKind::FilterGain),
            Control::TransitionLow => p(self.transition_low, ParamKind::FilterGain),
            Control::TransitionMid => p(self.transition_mid, ParamKind::FilterGain),
            Control::TransitionHigh => p(self.transition_high, ParamKind::FilterGain),
            Control::DynamicFrequency(i) => p(*self.dynamic.get(i)?, ParamKind::Frequency),
            Control::DynamicQ(i) => p(*self.dynamic.get(i)?, ParamKind::Q),
            Control::DynamicGain(i) => p(*self.dynamic.get(i)?, ParamKind::FilterGain),
            Control::SweepFrequency => p(self.sweep, ParamKind::Frequency),
            Control::SweepQ => p(self.sweep, ParamKind::Q),
            Control::StereoGain => p(self.stereo, ParamKind::Gain),
            Control::Dry => p(self.dry, ParamKind::Gain),
            Control::DelayTime => p(self.delay, ParamKind::DelayTime),
            Control::DelayFeedback => p(self.delay, ParamKind::Feedback),
            Control::DelayWet => p(self.delay_wet, ParamKind::Gain),
            Control::ReverbWet => p(self.reverb_wet, ParamKind::Gain),
        }
    }

    /// Every node owned by the chain
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }
}

/// A point in listener space with a facing direction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialPoint {
    pub position: [f32; 3],
    pub orientation: [f32; 3],
}

const POSITION_PARAMS: [ParamKind; 3] = [ParamKind::PositionX, ParamKind::PositionY, ParamKind::PositionZ];
const ORIENTATION_PARAMS: [ParamKind; 3] = [
    ParamKind::OrientationX,
    ParamKind::OrientationY,
    ParamKind::OrientationZ,
];

/// Effect chain of one slot, or its absence
#[derive(Debug, Clone, PartialEq)]
pub enum EffectGraph {
    Built(Box<EffectChain>),
    Unavailable,
}

impl EffectGraph {
    /// Build a full chain for `source` and connect it to the destination.
    ///
    /// Any engine failure tears down what was created and yields
    /// `Unavailable`.
    pub fn build(engine: &mut dyn AudioEngineHandle, source: SourceId) -> Self {
        let mut created = Vec::new();
        let result = ChainBuilder {
            engine: &mut *engine,
            created: &mut created,
        }
        .build(source);

        match result {
            Ok(chain) => {
                tracing::debug!(?source, nodes = chain.nodes.len(), "effect chain built");
                EffectGraph::Built(Box::new(chain))
            }
            Err(e) => {
                tracing::warn!(?source, error = %e, "effect chain unavailable");
                for node in created {
                    engine.remove_node(node);
                }
                EffectGraph::Unavailable
            }
        }
    }

    /// Tear down the current chain, then build a fresh one
    pub fn rebuild(&mut self, engine: &mut dyn AudioEngineHandle, source: SourceId) {
        std::mem::replace(self, EffectGraph::Unavailable).teardown(engine);
        *self = Self::build(engine, source);
    }

    /// Disconnect and remove every node of the chain
    pub fn teardown(self, engine: &mut dyn AudioEngineHandle) {
        if let EffectGraph::Built(chain) = self {
            for &node in &chain.nodes {
                engine.disconnect(node);
            }
            for &node in &chain.nodes {
                engine.remove_node(node);
            }
        }
    }

    pub fn chain(&self) -> Option<&EffectChain> {
        match self {
            EffectGraph::Built(chain) => Some(chain),
            EffectGraph::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, EffectGraph::Built(_))
    }

    pub fn analyser(&self) -> Option<NodeId> {
        self.chain().map(|c| c.analyser)
    }

    fn param(&self, control: Control) -> Option<Param> {
        self.chain()?.param(control)
    }

    /// Set a control now, dropping anything scheduled from now on
    pub fn set_immediate(&self, engine: &mut dyn AudioEngineHandle, control: Control, value: f32) {
        if let Some(param) = self.param(control) {
            let (lo, hi) = control.bounds();
            let now = engine.current_time();
            engine.cancel_scheduled_values(param, now);
            engine.set_value_at_time(param, value.clamp(lo, hi), now);
        }
    }

    /// Ramp a control from whatever it holds at `start_at` to `target`.
    ///
    /// Events after `start_at` are dropped; the curve up to `start_at` is
    /// kept as it was.
    pub fn ramp(
        &self,
        engine: &mut dyn AudioEngineHandle,
        control: Control,
        target: f32,
        over_secs: f64,
        start_at: f64,
    ) {
        let Some(param) = self.param(control) else {
            return;
        };
        let (lo, hi) = control.bounds();
        hold_at(engine, param, start_at, lo, hi);
        engine.linear_ramp_to_value_at_time(param, target.clamp(lo, hi), start_at + over_secs.max(0.0));
    }

    /// Jump a control to `from` at `start_at`, then ramp to `to`
    pub fn ramp_from(
        &self,
        engine: &mut dyn AudioEngineHandle,
        control: Control,
        from: f32,
        to: f32,
        over_secs: f64,
        start_at: f64,
    ) {
        let Some(param) = self.param(control) else {
            return;
        };
        let (lo, hi) = control.bounds();
        hold_at(engine, param, start_at, lo, hi);
        engine.set_value_at_time(param, from.clamp(lo, hi), start_at);
        engine.linear_ramp_to_value_at_time(param, to.clamp(lo, hi), start_at + over_secs.max(0.0));
    }

    /// Append a ramp to `target` ending at `end_at`, keeping earlier events
    pub fn ramp_to_at(
        &self,
        engine: &mut dyn AudioEngineHandle,
        control: Control,
        target: f32,
        end_at: f64,
    ) {
        if let Some(param) = self.param(control) {
            let (lo, hi) = control.bounds();
            engine.linear_ramp_to_value_at_time(param, target.clamp(lo, hi), end_at);
        }
    }

    /// Change the response shape of a dynamic pool filter
    pub fn set_dynamic_type(&self, engine: &mut dyn AudioEngineHandle, index: usize, filter_type: FilterType) {
        if let Some(&node) = self.chain().and_then(|c| c.dynamic.get(index)) {
            engine.set_filter_type(node, filter_type);
        }
    }

    /// Place the panner immediately
    pub fn position_in_space(&self, engine: &mut dyn AudioEngineHandle, point: SpatialPoint) {
        let Some(chain) = self.chain() else {
            return;
        };
        let now = engine.current_time();
        for (kind, value) in Self::spatial_params(point) {
            let param = Param::new(chain.panner, kind);
            engine.cancel_scheduled_values(param, now);
            engine.set_value_at_time(param, value, now);
        }
    }

    /// Schedule the panner to glide through `points` at the given times.
    ///
    /// The first point is a jump, the rest are linear ramps.
    pub fn glide_in_space(&self, engine: &mut dyn AudioEngineHandle, points: &[(f64, SpatialPoint)]) {
        let Some(chain) = self.chain() else {
            return;
        };
        let Some(&(start, _)) = points.first() else {
            return;
        };
        for kind in POSITION_PARAMS.iter().chain(ORIENTATION_PARAMS.iter()) {
            engine.cancel_scheduled_values(Param::new(chain.panner, *kind), start);
        }
        for (i, &(at, point)) in points.iter().enumerate() {
            for (kind, value) in Self::spatial_params(point) {
                let param = Param::new(chain.panner, kind);
                if i == 0 {
                    engine.set_value_at_time(param, value, at);
                } else {
                    engine.linear_ramp_to_value_at_time(param, value, at);
                }
            }
        }
    }

    fn spatial_params(point: SpatialPoint) -> impl Iterator<Item = (ParamKind, f32)> {
        POSITION_PARAMS
            .into_iter()
            .zip(point.position)
            .chain(ORIENTATION_PARAMS.into_iter().zip(point.orientation))
    }

    /// Map advisor filter suggestions onto the nearest static EQ band of the
    /// same type. Returns how many suggestions were applied.
    pub fn apply_filter_specs(&self, engine: &mut dyn AudioEngineHandle, specs: &[FilterSpec]) -> usize {
        if !self.is_available() {
            return 0;
        }
        let now = engine.current_time();
        let mut applied = 0;
        for spec in specs {
            let Some(index) = nearest_band(spec) else {
                tracing::debug!(filter = spec.filter_type.as_str(), "no matching EQ band");
                continue;
            };
            self.ramp(engine, Control::EqGain(index), spec.gain_db, ADVICE_RAMP_SECS, now);
            applied += 1;
        }
        applied
    }

    /// Ramp the delay and reverb sends to an effect mix
    pub fn apply_effect_mix(
        &self,
        engine: &mut dyn AudioEngineHandle,
        effects: &EffectSpec,
        over_secs: f64,
    ) {
        let now = engine.current_time();
        self.ramp(engine, Control::ReverbWet, effects.reverb, over_secs, now);
        self.ramp(engine, Control::DelayWet, effects.delay, over_secs, now);
        self.ramp(engine, Control::DelayTime, effects.delay_time_secs, over_secs, now);
        self.ramp(engine, Control::DelayFeedback, effects.feedback, over_secs, now);
    }
}

/// Cancel everything from `at` on while keeping the curve leading up to it
fn hold_at(engine: &mut dyn AudioEngineHandle, param: Param, at: f64, lo: f32, hi: f32) {
    let Some(held) = engine.param_value_at(param, at) else {
        return;
    };
    engine.cancel_scheduled_values(param, at);
    engine.linear_ramp_to_value_at_time(param, held.clamp(lo, hi), at);
}

/// Index of the closest EQ band with the same filter type
fn nearest_band(spec: &FilterSpec) -> Option<usize> {
    EQ_BANDS
        .iter()
        .enumerate()
        .filter(|(_, b)| b.filter_type == spec.filter_type)
        .min_by(|(_, a), (_, b)| {
            let da = (a.frequency_hz - spec.frequency_hz).abs();
            let db = (b.frequency_hz - spec.frequency_hz).abs();
            da.total_cmp(&db)
        })
        .map(|(i, _)| i)
}

struct ChainBuilder<'a> {
    engine: &'a mut dyn AudioEngineHandle,
    created: &'a mut Vec<NodeId>,
}

impl ChainBuilder<'_> {
    fn node(&mut self, kind: NodeKind) -> Result<NodeId, EngineError> {
        let id = self.engine.create_node(kind)?;
        self.created.push(id);
        Ok(id)
    }

    fn set(&mut self, node: NodeId, kind: ParamKind, value: f32) {
        let now = self.engine.current_time();
        self.engine.set_value_at_time(Param::new(node, kind), value, now);
    }

    fn gain(&mut self, value: f32) -> Result<NodeId, EngineError> {
        let id = self.node(NodeKind::Gain)?;
        self.set(id, ParamKind::Gain, value);
        Ok(id)
    }

    fn biquad(&mut self, b: EqBand) -> Result<NodeId, EngineError> {
        let id = self.node(NodeKind::Biquad(b.filter_type))?;
        self.set(id, ParamKind::Frequency, b.frequency_hz);
        if let Some(q) = b.q {
            self.set(id, ParamKind::Q, q);
        }
        self.set(id, ParamKind::FilterGain, b.gain_db);
        Ok(id)
    }

    fn series(&mut self, nodes: &[NodeId]) -> Result<(), EngineError> {
        for pair in nodes.windows(2) {
            self.engine.connect(pair[0], pair[1])?;
        }
        Ok(())
    }

    fn build(mut self, source: SourceId) -> Result<EffectChain, EngineError> {
        let input = self.node(NodeKind::MediaSource(source))?;
        let pre_gain = self.gain(0.9)?;

        let mut eq = [input; 7];
        for (slot, b) in eq.iter_mut().zip(EQ_BANDS) {
            *slot = self.biquad(b)?;
        }

        let transition_low = self.biquad(band(FilterType::LowShelf, 200.0, None, 0.0))?;
        let transition_mid = self.biquad(band(FilterType::Peaking, 1000.0, Some(1.0), 0.0))?;
        let transition_high = self.biquad(band(FilterType::HighShelf, 3200.0, None, 0.0))?;

        let mut dynamic = [input; DYNAMIC_POOL_SIZE];
        for slot in dynamic.iter_mut() {
            *slot = self.biquad(band(FilterType::Peaking, 1000.0, Some(1.0), 0.0))?;
        }

        let sweep = self.biquad(band(FilterType::LowPass, 20000.0, Some(1.0), 0.0))?;
        let stereo = self.gain(1.0)?;

        let dry = self.gain(1.0)?;
        let delay = self.node(NodeKind::Delay {
            max_delay_secs: MAX_DELAY_SECS,
        })?;
        self.set(delay, ParamKind::DelayTime, 0.01);
        self.set(delay, ParamKind::Feedback, 0.0);
        let delay_wet = self.gain(0.0)?;
        let reverb_send = self.gain(1.0)?;
        let convolver = self.node(NodeKind::Convolver)?;
        let reverb_wet = self.gain(0.05)?;

        let compressor = self.node(NodeKind::Compressor)?;
        self.set(compressor, ParamKind::Threshold, -24.0);
        self.set(compressor, ParamKind::Knee, 12.0);
        self.set(compressor, ParamKind::Ratio, 4.0);
        self.set(compressor, ParamKind::Attack, 0.005);
        self.set(compressor, ParamKind::Release, 0.2);

        let analyser = self.node(NodeKind::Analyser {
            fft_size: ANALYSER_FFT_SIZE,
        })?;
        let panner = self.node(NodeKind::Panner)?;

        let mut main = vec![input, pre_gain];
        main.extend(eq);
        main.extend([transition_low, transition_mid, transition_high]);
        main.extend(dynamic);
        main.extend([sweep, stereo]);
        self.series(&main)?;

        self.series(&[stereo, dry, compressor])?;
        self.series(&[stereo, delay, delay_wet, compressor])?;
        self.series(&[stereo, reverb_send, convolver, reverb_wet, compressor])?;
        let destination = self.engine.destination();
        self.series(&[compressor, analyser, panner, destination])?;

        Ok(EffectChain {
            input,
            pre_gain,
            eq,
            transition_low,
            transition_mid,
            transition_high,
            dynamic,
            sweep,
            stereo,
            dry,
            delay,
            delay_wet,
            reverb_send,
            convolver,
            reverb_wet,
            compressor,
            analyser,
            panner,
            nodes: self.created.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedEngine;

    fn engine_with_source() -> (SimulatedEngine, SourceId) {
        let mut engine = SimulatedEngine::new();
        let source = engine.create_source("a.mp3").unwrap();
        (engine, source)
    }

    fn value(engine: &SimulatedEngine, graph: &EffectGraph, control: Control, at: f64) -> f32 {
        let param = graph.chain().unwrap().param(control).unwrap();
        engine.param_value_at(param, at).unwrap()
    }

    #[test]
    fn test_build_chain_defaults() {
        let (mut engine, source) = engine_with_source();
        let graph = EffectGraph::build(&mut engine, source);
        let chain = graph.chain().unwrap();

        assert_eq!(chain.nodes().len(), 28);
        assert_eq!(engine.node_count(), 28);
        assert_eq!(engine.audible_sources(), vec![source]);
        assert_eq!(engine.filter_type(chain.eq[0]), Some(FilterType::LowShelf));
        assert_eq!(engine.filter_type(chain.sweep), Some(FilterType::LowPass));

        assert!((value(&engine, &graph, Control::PreGain, 0.0) - 0.9).abs() < 1e-6);
        assert_eq!(value(&engine, &graph, Control::EqGain(1), 0.0), 3.5);
        assert_eq!(value(&engine, &graph, Control::TransitionHigh, 0.0), 0.0);
        assert_eq!(value(&engine, &graph, Control::SweepFrequency, 0.0), 20000.0);
        assert_eq!(value(&engine, &graph, Control::DelayWet, 0.0), 0.0);
        assert!((value(&engine, &graph, Control::ReverbWet, 0.0) - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_single_edge_into_destination() {
        let (mut engine, source) = engine_with_source();
        let graph = EffectGraph::build(&mut engine, source);
        let dest = engine.destination();
        let into_dest: Vec<_> = engine
            .connections()
            .into_iter()
            .filter(|&(_, b)| b == dest)
            .collect();
        assert_eq!(into_dest, vec![(graph.chain().unwrap().panner, dest)]);
    }

    #[test]
    fn test_rebuild_leaves_one_chain() {
        let (mut engine, source) = engine_with_source();
        let mut graph = EffectGraph::build(&mut engine, source);
        let first = graph.chain().unwrap().clone();

        graph.rebuild(&mut engine, source);
        let second = graph.chain().unwrap();

        assert_ne!(first.input, second.input);
        assert_eq!(engine.node_count(), 28);
        assert_eq!(engine.audible_sources(), vec![source]);
        let dest = engine.destination();
        let into_dest = engine.connections().iter().filter(|&&(_, b)| b == dest).count();
        assert_eq!(into_dest, 1);
    }

    #[test]
    fn test_build_failure_is_unavailable() {
        let (mut engine, source) = engine_with_source();
        engine.set_nodes_unavailable(true);
        let graph = EffectGraph::build(&mut engine, source);
        assert_eq!(graph, EffectGraph::Unavailable);
        assert_eq!(engine.node_count(), 0);

        // Every operation is a no-op
        graph.set_immediate(&mut engine, Control::Dry, 0.5);
        graph.ramp(&mut engine, Control::TransitionHigh, -12.0, 1.0, 0.0);
        assert_eq!(graph.analyser(), None);
        assert_eq!(graph.apply_filter_specs(&mut engine, &[FilterSpec::new(FilterType::LowShelf, 60.0, 3.0)]), 0);
    }

    #[test]
    fn test_ramp_anchors_at_start() {
        let (mut engine, source) = engine_with_source();
        let graph = EffectGraph::build(&mut engine, source);

        graph.ramp(&mut engine, Control::Dry, 0.5, 2.0, 4.0);
        assert_eq!(value(&engine, &graph, Control::Dry, 3.0), 1.0);
        assert_eq!(value(&engine, &graph, Control::Dry, 4.0), 1.0);
        assert!((value(&engine, &graph, Control::Dry, 5.0) - 0.75).abs() < 1e-6);
        assert_eq!(value(&engine, &graph, Control::Dry, 6.0), 0.5);

        // A later ramp keeps the earlier one intact
        graph.ramp(&mut engine, Control::Dry, 0.0, 1.0, 8.0);
        assert_eq!(value(&engine, &graph, Control::Dry, 6.0), 0.5);
        assert_eq!(value(&engine, &graph, Control::Dry, 9.0), 0.0);
    }

    #[test]
    fn test_ramp_clamps_targets() {
        let (mut engine, source) = engine_with_source();
        let graph = EffectGraph::build(&mut engine, source);
        graph.ramp_from(&mut engine, Control::TransitionLow, -40.0, 30.0, 1.0, 0.0);
        assert_eq!(value(&engine, &graph, Control::TransitionLow, 0.0), -12.0);
        assert_eq!(value(&engine, &graph, Control::TransitionLow, 1.0), 12.0);
    }

    #[test]
    fn test_apply_filter_specs_nearest_band() {
        let (mut engine, source) = engine_with_source();
        let graph = EffectGraph::build(&mut engine, source);
        let specs = [
            FilterSpec::new(FilterType::LowShelf, 150.0, 3.0),
            FilterSpec::new(FilterType::Peaking, 2500.0, 20.0),
            FilterSpec::new(FilterType::HighPass, 30.0, 0.0),
        ];
        assert_eq!(graph.apply_filter_specs(&mut engine, &specs), 2);
        assert_eq!(value(&engine, &graph, Control::EqGain(0), 0.5), 3.0);
        // 2500 Hz is closest to the 3 kHz upper-mid band, gain clamped to 12 dB
        assert_eq!(value(&engine, &graph, Control::EqGain(4), 0.5), 12.0);
    }

    #[test]
    fn test_apply_effect_mix() {
        let (mut engine, source) = engine_with_source();
        let graph = EffectGraph::build(&mut engine, source);
        let effects = EffectSpec {
            reverb: 0.4,
            delay: 0.3,
            delay_time_secs: 0.25,
            feedback: 0.2,
        };
        graph.apply_effect_mix(&mut engine, &effects, 1.0);
        assert!((value(&engine, &graph, Control::ReverbWet, 1.0) - 0.4).abs() < 1e-6);
        assert!((value(&engine, &graph, Control::DelayWet, 1.0) - 0.3).abs() < 1e-6);
        assert!((value(&engine, &graph, Control::DelayTime, 1.0) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_glide_in_space() {
        let (mut engine, source) = engine_with_source();
        let graph = EffectGraph::build(&mut engine, source);
        let a = SpatialPoint {
            position: [0.0, 0.0, -2.0],
            orientation: [0.0, 0.0, 1.0],
        };
        let b = SpatialPoint {
            position: [-2.0, 0.0, 0.0],
            orientation: [0.0, 0.0, -1.0],
        };
        graph.glide_in_space(&mut engine, &[(10.0, a), (20.0, b)]);
        let x = Param::new(graph.chain().unwrap().panner, ParamKind::PositionX);
        assert_eq!(engine.param_value_at(x, 10.0), Some(0.0));
        assert_eq!(engine.param_value_at(x, 15.0), Some(-1.0));
        assert_eq!(engine.param_value_at(x, 20.0), Some(-2.0));
    }
}
