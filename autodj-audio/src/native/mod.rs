//! Real-time render engine
//!
//! [`NativeEngine`] renders the node graph in fixed quanta of
//! [`RENDER_QUANTUM`] frames, in topological order, with k-rate automation.
//! Decoding happens on a loader thread; finished loads are picked up by
//! [`poll_events`](AudioEngineHandle::poll_events). The app shares the engine
//! with the audio callback through [`SharedEngine`].

mod dsp;

pub use dsp::{
    noise_impulse, Biquad, Compressor, CompressorParams, Convolver, DelayLine, Panner, PannerParams,
    IMPULSE_SECS,
};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;

use autodj_analysis::{FilterType, FrequencySnapshot, SpectrumAnalyzer};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, MutexGuard};

use crate::automation::AutomationTimeline;
use crate::engine::{
    downstream, AudioEngineHandle, EngineError, EngineEvent, NodeId, NodeKind, Param, ParamKind,
    PlayError, SourceId,
};

/// Frames per render quantum
pub const RENDER_QUANTUM: usize = 128;

const QUANTUM_SAMPLES: usize = RENDER_QUANTUM * 2;

/// Decoded track, interleaved stereo at the engine's sample rate
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Arc<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}

/// Decodes a locator into stereo audio at `sample_rate`
pub trait SourceLoader: Send + 'static {
    type Error: std::fmt::Display;

    fn load(&self, locator: &str, sample_rate: u32) -> Result<DecodedAudio, Self::Error>;
}

struct LoadRequest {
    source: SourceId,
    locator: String,
}

struct LoadResult {
    source: SourceId,
    result: Result<DecodedAudio, String>,
}

struct NativeSource {
    locator: String,
    audio: Option<DecodedAudio>,
    /// Frame index of the next frame to play
    position: usize,
    volume: f32,
    playing: bool,
}

impl NativeSource {
    fn frames(&self) -> usize {
        self.audio.as_ref().map_or(0, DecodedAudio::frames)
    }
}

enum Processor {
    Source(SourceId),
    Gain,
    Biquad(Biquad),
    Delay(DelayLine),
    Convolver(Box<Convolver>),
    Compressor(Compressor),
    Analyser {
        analyzer: SpectrumAnalyzer,
        history: VecDeque<f32>,
    },
    Panner(Panner),
}

struct NativeNode {
    kind: NodeKind,
    processor: Processor,
    params: HashMap<ParamKind, AutomationTimeline>,
    output: Vec<f32>,
}


/// Render engine behind the cpal stream
pub struct NativeEngine {
    sample_rate: u32,
    frames_rendered: u64,
    next_id: u64,
    destination: NodeId,
    sources: HashMap<SourceId, NativeSource>,
    nodes: HashMap<NodeId, NativeNode>,
    edges: Vec<(NodeId, NodeId)>,
    /// Render order with each node's inputs, rebuilt after graph edits
    order: Option<Vec<(NodeId, Vec<NodeId>)>>,
    events: Vec<EngineEvent>,
    load_tx: Option<Sender<LoadRequest>>,
    load_rx: Receiver<LoadResult>,
    scratch: Vec<f32>,
    mix: Vec<f32>,
    /// Rendered frames not yet handed to the device
    pending: Vec<f32>,
    pending_pos: usize,
    impulse_seed: u64,
}

impl NativeEngine {
    /// Start an engine whose loads run on a background thread
    pub fn new<L: SourceLoader>(sample_rate: u32, loader: L) -> Self {
        let (request_tx, request_rx) = unbounded::<LoadRequest>();
        let (result_tx, result_rx) = unbounded();

        let spawned = thread::Builder::new()
            .name("autodj-loader".to_string())
            .spawn(move || {
                for request in request_rx {
                    let result = loader
                        .load(&request.locator, sample_rate)
                        .map_err(|e| e.to_string());
                    let sent = result_tx.send(LoadResult {
                        source: request.source,
                        result,
                    });
                    if sent.is_err() {
                        break;
                    }
                }
                tracing::debug!("loader thread finished");
            });
        let load_tx = match spawned {
            Ok(_) => Some(request_tx),
            Err(e) => {
                tracing::error!(error = %e, "could not start loader thread");
                None
            }
        };

        Self {
            sample_rate: sample_rate.max(1),
            frames_rendered: 0,
            next_id: 1,
            destination: NodeId(0),
            sources: HashMap::new(),
            nodes: HashMap::new(),
            edges: Vec::new(),
            order: None,
            events: Vec::new(),
            load_tx,
            load_rx: result_rx,
            scratch: vec![0.0; QUANTUM_SAMPLES],
            mix: vec![0.0; QUANTUM_SAMPLES],
            pending: vec![0.0; QUANTUM_SAMPLES],
            pending_pos: QUANTUM_SAMPLES,
            impulse_seed: 0x5eed,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Fill `out` with interleaved stereo frames
    pub fn render(&mut self, out: &mut [f32]) {
        let mut written = 0;
        while written < out.len() {
            if self.pending_pos >= QUANTUM_SAMPLES {
                self.render_quantum();
                self.pending_pos = 0;
            }
            let n = (QUANTUM_SAMPLES - self.pending_pos).min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            self.pending_pos += n;
            written += n;
        }
    }

    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn invalidate(&mut self) {
        self.order = None;
    }

    /// Kahn's algorithm over every live node; the destination is rendered last
    fn build_order(&self) -> Vec<(NodeId, Vec<NodeId>)> {
        let mut indegree: HashMap<NodeId, usize> = self.nodes.keys().map(|&id| (id, 0)).collect();
        for &(_, to) in &self.edges {
            if let Some(d) = indegree.get_mut(&to) {
                *d += 1;
            }
        }
        let mut ready: Vec<NodeId> = indegree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        ready.sort();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop() {
            let inputs = self
                .edges
                .iter()
                .filter(|&&(_, to)| to == id)
                .map(|&(from, _)| from)
                .collect();
            order.push((id, inputs));
            for &(from, to) in &self.edges {
                if from != id {
                    continue;
                }
                if let Some(d) = indegree.get_mut(&to) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(to);
                    }
                }
            }
        }
        order
    }

    fn render_quantum(&mut self) {
        let now = self.current_time();
        let order = match self.order.take() {
            Some(order) => order,
            None => self.build_order(),
        };

        for (id, inputs) in &order {
            self.scratch.fill(0.0);
            for input in inputs {
                if let Some(node) = self.nodes.get(input) {
                    for (acc, s) in self.scratch.iter_mut().zip(&node.output) {
                        *acc += s;
                    }
                }
            }
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            node.output.copy_from_slice(&self.scratch);
            process_node(node, &self.sources, now);
        }

        self.mix.fill(0.0);
        for &(from, to) in &self.edges {
            if to != self.destination {
                continue;
            }
            if let Some(node) = self.nodes.get(&from) {
                for (acc, s) in self.mix.iter_mut().zip(&node.output) {
                    *acc += s;
                }
            }
        }
        self.pending.copy_from_slice(&self.mix);
        self.order = Some(order);

        self.advance_sources();
        self.frames_rendered += RENDER_QUANTUM as u64;

        let now = self.current_time();
        for node in self.nodes.values_mut() {
            for timeline in node.params.values_mut() {
                timeline.prune_before(now);
            }
        }
    }

    fn advance_sources(&mut self) {
        for (&id, source) in self.sources.iter_mut() {
            if !source.playing || source.audio.is_none() {
                continue;
            }
            let frames = source.frames();
            source.position = (source.position + RENDER_QUANTUM).min(frames);
            if source.position >= frames {
                source.playing = false;
                self.events.push(EngineEvent::Ended(id));
            }
        }
    }

    fn drain_loads(&mut self) {
        while let Ok(LoadResult { source, result }) = self.load_rx.try_recv() {
            let Some(entry) = self.sources.get_mut(&source) else {
                continue;
            };
            match result {
                Ok(audio) => {
                    tracing::debug!(locator = %entry.locator, secs = audio.duration_secs(), "source decoded");
                    entry.audio = Some(audio);
                    self.events.push(EngineEvent::Loaded(source));
                }
                Err(reason) => self.events.push(EngineEvent::LoadFailed(source, reason)),
            }
        }
    }

    fn timeline_mut(&mut self, param: Param) -> Option<&mut AutomationTimeline> {
        self.nodes.get_mut(&param.node)?.params.get_mut(&param.kind)
    }
}

fn process_node(node: &mut NativeNode, sources: &HashMap<SourceId, NativeSource>, now: f64) {
    let params = &node.params;
    let at = |kind: ParamKind| {
        params
            .get(&kind)
            .map_or(kind.default_value(), |t| t.value_at(now))
    };
    match &mut node.processor {
        Processor::Source(id) => {
            node.output.fill(0.0);
            let Some(source) = sources.get(id).filter(|s| s.playing) else {
                return;
            };
            let Some(audio) = &source.audio else {
                return;
            };
            let start = source.position * 2;
            let end = (start + QUANTUM_SAMPLES).min(audio.samples.len());
            if start < end {
                for (out, s) in node.output.iter_mut().zip(&audio.samples[start..end]) {
                    *out = s * source.volume;
                }
            }
        }
        Processor::Gain => {
            let gain = at(ParamKind::Gain);
            node.output.iter_mut().for_each(|s| *s *= gain);
        }
        Processor::Biquad(filter) => {
            let (freq, q, gain) = (at(ParamKind::Frequency), at(ParamKind::Q), at(ParamKind::FilterGain));
            filter.process(&mut node.output, freq, q, gain);
        }
        Processor::Delay(delay) => {
            let (time, feedback) = (at(ParamKind::DelayTime), at(ParamKind::Feedback));
            delay.process(&mut node.output, time, feedback);
        }
        Processor::Convolver(convolver) => convolver.process(&mut node.output),
        Processor::Compressor(compressor) => {
            let params = CompressorParams {
                threshold: at(ParamKind::Threshold),
                knee: at(ParamKind::Knee),
                ratio: at(ParamKind::Ratio),
                attack: at(ParamKind::Attack),
                release: at(ParamKind::Release),
            };
            compressor.process(&mut node.output, &params);
        }
        Processor::Analyser { analyzer, history } => {
            let capacity = analyzer.fft_size();
            for frame in node.output.chunks_exact(2) {
                if history.len() == capacity {
                    history.pop_front();
                }
                history.push_back((frame[0] + frame[1]) * 0.5);
            }
        }
        Processor::Panner(panner) => {
            let params = PannerParams {
                position: [at(ParamKind::PositionX), at(ParamKind::PositionY), at(ParamKind::PositionZ)],
                orientation: [
                    at(ParamKind::OrientationX),
                    at(ParamKind::OrientationY),
                    at(ParamKind::OrientationZ),
                ],
            };
            panner.process(&mut node.output, &params);
        }
    }
}

impl AudioEngineHandle for NativeEngine {
    fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / f64::from(self.sample_rate)
    }

    fn create_source(&mut self, locator: &str) -> Result<SourceId, EngineError> {
        let Some(tx) = &self.load_tx else {
            return Err(EngineError::Unavailable("loader thread not running".to_string()));
        };
        let source = SourceId(self.next_id);
        tx.send(LoadRequest {
            source,
            locator: locator.to_string(),
        })
        .map_err(|_| EngineError::Unavailable("loader thread stopped".to_string()))?;
        self.next_id += 1;

        self.sources.insert(
            source,
            NativeSource {
                locator: locator.to_string(),
                audio: None,
                position: 0,
                volume: 1.0,
                playing: false,
            },
        );
        Ok(source)
    }

    fn is_ready(&self, source: SourceId) -> bool {
        self.sources.get(&source).is_some_and(|s| s.audio.is_some())
    }

    fn play(&mut self, source: SourceId) -> Result<(), PlayError> {
        let entry = self
            .sources
            .get_mut(&source)
            .ok_or(PlayError::UnknownSource(source))?;
        if entry.audio.is_some() && entry.position >= entry.frames() {
            entry.position = 0;
        }
        entry.playing = true;
        Ok(())
    }

    fn pause(&mut self, source: SourceId) {
        if let Some(s) = self.sources.get_mut(&source) {
            s.playing = false;
        }
    }

    fn stop(&mut self, source: SourceId) {
        if let Some(s) = self.sources.get_mut(&source) {
            s.playing = false;
            s.position = 0;
        }
    }

    fn seek(&mut self, source: SourceId, secs: f64) {
        let rate = f64::from(self.sample_rate);
        if let Some(s) = self.sources.get_mut(&source) {
            let frame = (secs.max(0.0) * rate) as usize;
            s.position = frame.min(s.frames());
        }
    }

    fn is_playing(&self, source: SourceId) -> bool {
        self.sources.get(&source).is_some_and(|s| s.playing)
    }

    fn set_volume(&mut self, source: SourceId, volume: f32) {
        if let Some(s) = self.sources.get_mut(&source) {
            s.volume = volume.clamp(0.0, 1.0);
        }
    }

    fn volume(&self, source: SourceId) -> f32 {
        self.sources.get(&source).map_or(0.0, |s| s.volume)
    }

    fn position(&self, source: SourceId) -> f64 {
        self.sources
            .get(&source)
            .map_or(0.0, |s| s.position as f64 / f64::from(self.sample_rate))
    }

    fn duration(&self, source: SourceId) -> Option<f64> {
        self.sources
            .get(&source)?
            .audio
            .as_ref()
            .map(DecodedAudio::duration_secs)
    }

    fn release_source(&mut self, source: SourceId) {
        self.sources.remove(&source);
    }

    fn create_node(&mut self, kind: NodeKind) -> Result<NodeId, EngineError> {
        let rate = self.sample_rate as f32;
        let processor = match kind {
            NodeKind::MediaSource(source) => {
                if !self.sources.contains_key(&source) {
                    return Err(EngineError::UnknownSource(source));
                }
                if self.nodes.values().any(|n| n.kind == kind) {
                    return Err(EngineError::SourceAlreadyConnected(source));
                }
                Processor::Source(source)
            }
            NodeKind::Gain => Processor::Gain,
            NodeKind::Biquad(filter_type) => Processor::Biquad(Biquad::new(filter_type, rate)),
            NodeKind::Delay { max_delay_secs } => Processor::Delay(DelayLine::new(max_delay_secs, rate)),
            NodeKind::Convolver => {
                self.impulse_seed += 1;
                let impulse = noise_impulse(rate, IMPULSE_SECS, self.impulse_seed);
                Processor::Convolver(Box::new(Convolver::new(impulse, RENDER_QUANTUM)))
            }
            NodeKind::Compressor => Processor::Compressor(Compressor::new(rate)),
            NodeKind::Analyser { fft_size } => {
                let analyzer = SpectrumAnalyzer::with_fft_size(self.sample_rate, fft_size);
                let history = VecDeque::with_capacity(analyzer.fft_size());
                Processor::Analyser { analyzer, history }
            }
            NodeKind::Panner => Processor::Panner(Panner),
        };

        let id = NodeId(self.allocate());
        let params = ParamKind::for_node(&kind)
            .iter()
            .map(|&p| (p, AutomationTimeline::new(p.default_value())))
            .collect();
        self.nodes.insert(
            id,
            NativeNode {
                kind,
                processor,
                params,
                output: vec![0.0; QUANTUM_SAMPLES],
            },
        );
        self.invalidate();
        Ok(id)
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), EngineError> {
        if !self.nodes.contains_key(&from) {
            return Err(EngineError::UnknownNode(from));
        }
        if to != self.destination && !self.nodes.contains_key(&to) {
            return Err(EngineError::UnknownNode(to));
        }
        if downstream(&self.edges, to).contains(&from) {
            return Err(EngineError::Cycle(from, to));
        }
        if !self.edges.contains(&(from, to)) {
            self.edges.push((from, to));
            self.invalidate();
        }
        Ok(())
    }

    fn disconnect(&mut self, node: NodeId) {
        self.edges.retain(|&(a, _)| a != node);
        self.invalidate();
    }

    fn remove_node(&mut self, node: NodeId) {
        self.nodes.remove(&node);
        self.edges.retain(|&(a, b)| a != node && b != node);
        self.invalidate();
    }

    fn destination(&self) -> NodeId {
        self.destination
    }

    fn connections(&self) -> Vec<(NodeId, NodeId)> {
        self.edges.clone()
    }

    fn set_filter_type(&mut self, node: NodeId, filter_type: FilterType) {
        if let Some(Processor::Biquad(filter)) = self.nodes.get_mut(&node).map(|n| &mut n.processor) {
            filter.set_filter_type(filter_type);
        }
    }

    fn set_value_at_time(&mut self, param: Param, value: f32, time: f64) {
        if let Some(t) = self.timeline_mut(param) {
            t.set_value_at_time(value, time);
        }
    }

    fn linear_ramp_to_value_at_time(&mut self, param: Param, value: f32, time: f64) {
        let now = self.current_time();
        if let Some(t) = self.timeline_mut(param) {
            t.linear_ramp_to_value_at_time(value, time, now);
        }
    }

    fn cancel_scheduled_values(&mut self, param: Param, from: f64) {
        if let Some(t) = self.timeline_mut(param) {
            t.cancel_scheduled_values(from);
        }
    }

    fn param_value_at(&self, param: Param, time: f64) -> Option<f32> {
        let node = self.nodes.get(&param.node)?;
        node.params.get(&param.kind).map(|t| t.value_at(time))
    }

    fn frequency_snapshot(&mut self, analyser: NodeId) -> Option<FrequencySnapshot> {
        match &mut self.nodes.get_mut(&analyser)?.processor {
            Processor::Analyser { analyzer, history } => {
                let samples: Vec<f32> = history.iter().copied().collect();
                Some(analyzer.analyze(&samples))
            }
            _ => None,
        }
    }

    fn poll_events(&mut self) -> Vec<EngineEvent> {
        self.drain_loads();
        std::mem::take(&mut self.events)
    }
}

/// [`NativeEngine`] shared between the control loop and the audio callback
#[derive(Clone)]
pub struct SharedEngine(Arc<Mutex<NativeEngine>>);

impl SharedEngine {
    pub fn new(engine: NativeEngine) -> Self {
        Self(Arc::new(Mutex::new(engine)))
    }

    pub fn lock(&self) -> MutexGuard<'_, NativeEngine> {
        self.0.lock()
    }

    /// Render from the audio callback, outputting silence on contention
    pub fn render(&self, out: &mut [f32]) {
        match self.0.try_lock() {
            Some(mut engine) => engine.render(out),
            None => out.fill(0.0),
        }
    }
}

impl AudioEngineHandle for SharedEngine {
    fn current_time(&self) -> f64 {
        self.lock().current_time()
    }

    fn create_source(&mut self, locator: &str) -> Result<SourceId, EngineError> {
        self.lock().create_source(locator)
    }

    fn is_ready(&self, source: SourceId) -> bool {
        self.lock().is_ready(source)
    }

    fn play(&mut self, source: SourceId) -> Result<(), PlayError> {
        self.lock().play(source)
    }

    fn pause(&mut self, source: SourceId) {
        self.lock().pause(source)
    }

    fn stop(&mut self, source: SourceId) {
        self.lock().stop(source)
    }

    fn seek(&mut self, source: SourceId, secs: f64) {
        self.lock().seek(source, secs)
    }

    fn is_playing(&self, source: SourceId) -> bool {
        self.lock().is_playing(source)
    }

    fn set_volume(&mut self, source: SourceId, volume: f32) {
        self.lock().set_volume(source, volume)
    }

    fn volume(&self, source: SourceId) -> f32 {
        self.lock().volume(source)
    }

    fn position(&self, source: SourceId) -> f64 {
        self.lock().position(source)
    }

    fn duration(&self, source: SourceId) -> Option<f64> {
        self.lock().duration(source)
    }

    fn release_source(&mut self, source: SourceId) {
        self.lock().release_source(source)
    }

    fn create_node(&mut self, kind: NodeKind) -> Result<NodeId, EngineError> {
        self.lock().create_node(kind)
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), EngineError> {
        self.lock().connect(from, to)
    }

    fn disconnect(&mut self, node: NodeId) {
        self.lock().disconnect(node)
    }

    fn remove_node(&mut self, node: NodeId) {
        self.lock().remove_node(node)
    }

    fn destination(&self) -> NodeId {
        self.lock().destination()
    }

    fn connections(&self) -> Vec<(NodeId, NodeId)> {
        self.lock().connections()
    }

    fn set_filter_type(&mut self, node: NodeId, filter_type: FilterType) {
        self.lock().set_filter_type(node, filter_type)
    }

    fn set_value_at_time(&mut self, param: Param, value: f32, time: f64) {
        self.lock().set_value_at_time(param, value, time)
    }

    fn linear_ramp_to_value_at_time(&mut self, param: Param, value: f32, time: f64) {
        self.lock().linear_ramp_to_value_at_time(param, value, time)
    }

    fn cancel_scheduled_values(&mut self, param: Param, from: f64) {
        self.lock().cancel_scheduled_values(param, from)
    }

    fn param_value_at(&self, param: Param, time: f64) -> Option<f32> {
        self.lock().param_value_at(param, time)
    }

    fn frequency_snapshot(&mut self, analyser: NodeId) -> Option<FrequencySnapshot> {
        self.lock().frequency_snapshot(analyser)
    }

    fn poll_events(&mut self) -> Vec<EngineEvent> {
        self.lock().poll_events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    const RATE: u32 = 1000;

    /// Constant-level stereo audio, one second per locator character
    struct ToneLoader;

    impl SourceLoader for ToneLoader {
        type Error = String;

        fn load(&self, locator: &str, sample_rate: u32) -> Result<DecodedAudio, String> {
            if locator.starts_with("bad") {
                return Err("unsupported format".to_string());
            }
            let frames = locator.len() * sample_rate as usize;
            Ok(DecodedAudio {
                samples: Arc::new(vec![0.5; frames * 2]),
                sample_rate,
            })
        }
    }

    fn wait_for_events(engine: &mut NativeEngine) -> Vec<EngineEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let events = engine.poll_events();
            if !events.is_empty() || Instant::now() > deadline {
                return events;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn loaded(engine: &mut NativeEngine, locator: &str) -> SourceId {
        let source = engine.create_source(locator).unwrap();
        assert_eq!(wait_for_events(engine), vec![EngineEvent::Loaded(source)]);
        source
    }

    #[test]
    fn test_load_and_fail() {
        let mut engine = NativeEngine::new(RATE, ToneLoader);
        let good = loaded(&mut engine, "ab");
        assert!(engine.is_ready(good));
        assert_eq!(engine.duration(good), Some(2.0));

        let bad = engine.create_source("bad").unwrap();
        assert!(!engine.is_ready(bad));
        assert_eq!(
            wait_for_events(&mut engine),
            vec![EngineEvent::LoadFailed(bad, "unsupported format".to_string())]
        );
    }

    #[test]
    fn test_source_plays_through_gain() {
        let mut engine = NativeEngine::new(RATE, ToneLoader);
        let source = loaded(&mut engine, "a");
        let input = engine.create_node(NodeKind::MediaSource(source)).unwrap();
        let gain = engine.create_node(NodeKind::Gain).unwrap();
        engine.connect(input, gain).unwrap();
        engine.connect(gain, engine.destination()).unwrap();
        engine.set_value_at_time(Param::new(gain, ParamKind::Gain), 0.5, 0.0);

        let mut out = vec![1.0; 64];
        engine.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));

        engine.play(source).unwrap();
        engine.set_volume(source, 0.8);
        let mut out = vec![0.0; QUANTUM_SAMPLES];
        engine.render(&mut out);
        // The first partial quantum was already rendered silent
        assert!((out[QUANTUM_SAMPLES - 1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_clock_and_end_of_track() {
        let mut engine = NativeEngine::new(RATE, ToneLoader);
        let source = loaded(&mut engine, "a");
        engine.play(source).unwrap();

        let mut out = vec![0.0; RATE as usize * 2];
        engine.render(&mut out);
        assert!(engine.current_time() >= 1.0);
        assert!(!engine.is_playing(source));
        assert_eq!(engine.position(source), 1.0);
        assert_eq!(engine.poll_events(), vec![EngineEvent::Ended(source)]);
    }

    #[test]
    fn test_graph_rules() {
        let mut engine = NativeEngine::new(RATE, ToneLoader);
        let source = engine.create_source("a").unwrap();
        let a = engine.create_node(NodeKind::MediaSource(source)).unwrap();
        assert_eq!(
            engine.create_node(NodeKind::MediaSource(source)),
            Err(EngineError::SourceAlreadyConnected(source))
        );
        let b = engine.create_node(NodeKind::Gain).unwrap();
        let c = engine.create_node(NodeKind::Gain).unwrap();
        engine.connect(a, b).unwrap();
        engine.connect(b, c).unwrap();
        assert_eq!(engine.connect(c, b), Err(EngineError::Cycle(c, b)));

        let order: Vec<NodeId> = engine.build_order().into_iter().map(|(id, _)| id).collect();
        let index = |n: NodeId| order.iter().position(|&id| id == n).unwrap();
        assert!(index(a) < index(b) && index(b) < index(c));

        engine.remove_node(b);
        assert!(engine.connections().is_empty());
    }

    #[test]
    fn test_automation_is_pruned() {
        let mut engine = NativeEngine::new(RATE, ToneLoader);
        let gain = engine.create_node(NodeKind::Gain).unwrap();
        let param = Param::new(gain, ParamKind::Gain);
        engine.set_value_at_time(param, 0.2, 0.0);
        engine.linear_ramp_to_value_at_time(param, 0.8, 0.5);
        engine.set_value_at_time(param, 0.1, 2.0);

        let mut out = vec![0.0; RATE as usize * 2];
        engine.render(&mut out);
        assert_eq!(engine.scheduled_events(param), 2);
        assert_eq!(engine.param_value_at(param, 1.5), Some(0.8));
        assert_eq!(engine.param_value_at(param, 2.0), Some(0.1));
    }

    #[test]
    fn test_analyser_snapshot() {
        let mut engine = NativeEngine::new(RATE, ToneLoader);
        let source = loaded(&mut engine, "abc");
        let input = engine.create_node(NodeKind::MediaSource(source)).unwrap();
        let analyser = engine
            .create_node(NodeKind::Analyser { fft_size: 256 })
            .unwrap();
        engine.connect(input, analyser).unwrap();
        engine.play(source).unwrap();

        let mut out = vec![0.0; 512];
        engine.render(&mut out);
        let snapshot = engine.frequency_snapshot(analyser).unwrap();
        assert_eq!(snapshot.magnitudes.len(), 128);
        assert_eq!(snapshot.waveform.len(), 256);
        assert!(engine.frequency_snapshot(input).is_none());
    }

    #[test]
    fn test_shared_engine_renders_silence_when_locked() {
        let shared = SharedEngine::new(NativeEngine::new(RATE, ToneLoader));
        let guard = shared.lock();
        let mut out = vec![1.0; 16];
        shared.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        drop(guard);

        shared.render(&mut out);
        assert!(shared.current_time() > 0.0);
    }

    impl NativeEngine {
        fn scheduled_events(&self, param: Param) -> usize {
            self.nodes[&param.node].params[&param.kind].events().len()
        }
    }
}
