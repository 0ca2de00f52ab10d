//! Simulated audio engine
//!
//! A deterministic [`AudioEngineHandle`] with a virtual clock. Sources never
//! produce sound; their positions advance with [`SimulatedEngine::advance`].
//! Every node, edge and automation event is recorded so tests can inspect
//! exactly what the playback core scheduled. `autodj --simulate` also runs on
//! it to dry-run a folder.

use std::collections::{HashMap, HashSet};

use autodj_analysis::{FilterType, FrequencySnapshot};

use crate::automation::{AutomationEvent, AutomationTimeline};
use crate::engine::{
    downstream, AudioEngineHandle, EngineError, EngineEvent, NodeId, NodeKind, Param, ParamKind,
    PlayError, SourceId,
};

#[derive(Debug, Clone)]
struct SimSource {
    locator: String,
    position: f64,
    duration: Option<f64>,
    volume: f32,
    playing: bool,
    ready: bool,
}

#[derive(Debug, Clone)]
struct SimNode {
    kind: NodeKind,
    filter_type: Option<FilterType>,
    params: HashMap<ParamKind, AutomationTimeline>,
}

/// Virtual-clock engine for tests and dry runs
#[derive(Debug)]
pub struct SimulatedEngine {
    now: f64,
    next_id: u64,
    destination: NodeId,
    sources: HashMap<SourceId, SimSource>,
    nodes: HashMap<NodeId, SimNode>,
    edges: Vec<(NodeId, NodeId)>,
    events: Vec<EngineEvent>,
    durations: HashMap<String, f64>,
    default_duration: Option<f64>,
    slow_loads: HashSet<String>,
    play_failures: HashMap<String, u32>,
    play_attempts: HashMap<String, u32>,
    snapshot: Option<FrequencySnapshot>,
    nodes_unavailable: bool,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEngine {
    pub fn new() -> Self {
        let destination = NodeId(0);
        Self {
            now: 0.0,
            next_id: 1,
            destination,
            sources: HashMap::new(),
            nodes: HashMap::new(),
            edges: Vec::new(),
            events: Vec::new(),
            durations: HashMap::new(),
            default_duration: None,
            slow_loads: HashSet::new(),
            play_failures: HashMap::new(),
            play_attempts: HashMap::new(),
            snapshot: None,
            nodes_unavailable: false,
        }
    }

    /// Duration reported for sources created from `locator`
    pub fn set_duration(&mut self, locator: &str, secs: f64) {
        self.durations.insert(locator.to_string(), secs);
    }

    /// Duration reported for locators without an explicit one
    pub fn set_default_duration(&mut self, secs: Option<f64>) {
        self.default_duration = secs;
    }

    /// Sources for `locator` stay unready until [`finish_loading`](Self::finish_loading)
    pub fn delay_loading(&mut self, locator: &str) {
        self.slow_loads.insert(locator.to_string());
    }

    /// Mark every source of `locator` ready and emit `Loaded`
    pub fn finish_loading(&mut self, locator: &str) {
        self.slow_loads.remove(locator);
        let mut loaded: Vec<SourceId> = self
            .sources
            .iter_mut()
            .filter(|(_, s)| s.locator == locator && !s.ready)
            .map(|(id, s)| {
                s.ready = true;
                *id
            })
            .collect();
        loaded.sort();
        self.events.extend(loaded.into_iter().map(EngineEvent::Loaded));
    }

    /// Fail every pending load of `locator` with `LoadFailed`
    pub fn fail_loading(&mut self, locator: &str, reason: &str) {
        self.slow_loads.remove(locator);
        let mut failed: Vec<SourceId> = self
            .sources
            .iter()
            .filter(|(_, s)| s.locator == locator && !s.ready)
            .map(|(id, _)| *id)
            .collect();
        failed.sort();
        self.events
            .extend(failed.into_iter().map(|id| EngineEvent::LoadFailed(id, reason.to_string())));
    }

    /// Reject the next `count` play attempts for `locator`
    pub fn fail_next_plays(&mut self, locator: &str, count: u32) {
        self.play_failures.insert(locator.to_string(), count);
    }

    /// Number of play attempts made for `locator` so far
    pub fn play_attempts(&self, locator: &str) -> u32 {
        self.play_attempts.get(locator).copied().unwrap_or(0)
    }

    /// Snapshot returned by every analyser until replaced
    pub fn set_snapshot(&mut self, snapshot: Option<FrequencySnapshot>) {
        self.snapshot = snapshot;
    }

    /// Make every subsequent `create_node` fail
    pub fn set_nodes_unavailable(&mut self, unavailable: bool) {
        self.nodes_unavailable = unavailable;
    }

    /// Advance the clock, moving playing sources and emitting `Ended`
    pub fn advance(&mut self, secs: f64) {
        self.now += secs;
        let mut ended = Vec::new();
        for (id, source) in self.sources.iter_mut() {
            if !source.playing {
                continue;
            }
            source.position += secs;
            if let Some(duration) = source.duration {
                if source.position >= duration {
                    source.position = duration;
                    source.playing = false;
                    ended.push(*id);
                }
            }
        }
        ended.sort();
        self.events.extend(ended.into_iter().map(EngineEvent::Ended));
    }

    /// Source created for `locator`, if still alive
    pub fn source_for(&self, locator: &str) -> Option<SourceId> {
        self.sources
            .iter()
            .filter(|(_, s)| s.locator == locator)
            .map(|(id, _)| *id)
            .max()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_kind(&self, node: NodeId) -> Option<NodeKind> {
        self.nodes.get(&node).map(|n| n.kind)
    }

    pub fn filter_type(&self, node: NodeId) -> Option<FilterType> {
        self.nodes.get(&node).and_then(|n| n.filter_type)
    }

    /// Every automation event recorded for a parameter
    pub fn param_events(&self, param: Param) -> Vec<AutomationEvent> {
        self.timeline(param)
            .map(|t| t.events().to_vec())
            .unwrap_or_default()
    }

    /// Media source nodes with a path to the destination
    pub fn audible_sources(&self) -> Vec<SourceId> {
        let mut out: Vec<SourceId> = self
            .nodes
            .iter()
            .filter_map(|(id, node)| match node.kind {
                NodeKind::MediaSource(source)
                    if downstream(&self.edges, *id).contains(&self.destination) =>
                {
                    Some(source)
                }
                _ => None,
            })
            .collect();
        out.sort();
        out
    }

    fn timeline(&self, param: Param) -> Option<&AutomationTimeline> {
        self.nodes.get(&param.node)?.params.get(&param.kind)
    }

    fn timeline_mut(&mut self, param: Param) -> Option<&mut AutomationTimeline> {
        self.nodes.get_mut(&param.node)?.params.get_mut(&param.kind)
    }

    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl AudioEngineHandle for SimulatedEngine {
    fn current_time(&self) -> f64 {
        self.now
    }

    fn create_source(&mut self, locator: &str) -> Result<SourceId, EngineError> {
        let id = SourceId(self.allocate());
        let ready = !self.slow_loads.contains(locator);
        let duration = self.durations.get(locator).copied().or(self.default_duration);
        self.sources.insert(
            id,
            SimSource {
                locator: locator.to_string(),
                position: 0.0,
                duration,
                volume: 1.0,
                playing: false,
                ready,
            },
        );
        if ready {
            self.events.push(EngineEvent::Loaded(id));
        }
        Ok(id)
    }

    fn is_ready(&self, source: SourceId) -> bool {
        self.sources.get(&source).map(|s| s.ready).unwrap_or(false)
    }

    fn play(&mut self, source: SourceId) -> Result<(), PlayError> {
        let locator = self
            .sources
            .get(&source)
            .map(|s| s.locator.clone())
            .ok_or(PlayError::UnknownSource(source))?;
        *self.play_attempts.entry(locator.clone()).or_insert(0) += 1;

        if let Some(remaining) = self.play_failures.get_mut(&locator) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PlayError::Rejected("simulated rejection".to_string()));
            }
        }
        if let Some(s) = self.sources.get_mut(&source) {
            s.playing = true;
        }
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
            s.position = 0.0;
        }
    }

    fn seek(&mut self, source: SourceId, secs: f64) {
        if let Some(s) = self.sources.get_mut(&source) {
            let max = s.duration.unwrap_or(f64::MAX);
            s.position = secs.clamp(0.0, max);
        }
    }

    fn is_playing(&self, source: SourceId) -> bool {
        self.sources.get(&source).map(|s| s.playing).unwrap_or(false)
    }

    fn set_volume(&mut self, source: SourceId, volume: f32) {
        if let Some(s) = self.sources.get_mut(&source) {
            s.volume = volume.clamp(0.0, 1.0);
        }
    }

    fn volume(&self, source: SourceId) -> f32 {
        self.sources.get(&source).map(|s| s.volume).unwrap_or(0.0)
    }

    fn position(&self, source: SourceId) -> f64 {
        self.sources.get(&source).map(|s| s.position).unwrap_or(0.0)
    }

    fn duration(&self, source: SourceId) -> Option<f64> {
        self.sources.get(&source).and_then(|s| s.duration)
    }

    fn release_source(&mut self, source: SourceId) {
        self.sources.remove(&source);
    }

    fn create_node(&mut self, kind: NodeKind) -> Result<NodeId, EngineError> {
        if self.nodes_unavailable {
            return Err(EngineError::Unavailable("simulated failure".to_string()));
        }
        if let NodeKind::MediaSource(source) = kind {
            if !self.sources.contains_key(&source) {
                return Err(EngineError::UnknownSource(source));
            }
            let taken = self
                .nodes
                .values()
                .any(|n| n.kind == NodeKind::MediaSource(source));
            if taken {
                return Err(EngineError::SourceAlreadyConnected(source));
            }
        }
        let id = NodeId(self.allocate());
        let params = ParamKind::for_node(&kind)
            .iter()
            .map(|&p| (p, AutomationTimeline::new(p.default_value())))
            .collect();
        let filter_type = match kind {
            NodeKind::Biquad(ft) => Some(ft),
            _ => None,
        };
        self.nodes.insert(
            id,
            SimNode {
                kind,
                filter_type,
                params,
            },
        );
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
        }
        Ok(())
    }

    fn disconnect(&mut self, node: NodeId) {
        self.edges.retain(|&(a, _)| a != node);
    }

    fn remove_node(&mut self, node: NodeId) {
        self.nodes.remove(&node);
        self.edges.retain(|&(a, b)| a != node && b != node);
    }

    fn destination(&self) -> NodeId {
        self.destination
    }

    fn connections(&self) -> Vec<(NodeId, NodeId)> {
        self.edges.clone()
    }

    fn set_filter_type(&mut self, node: NodeId, filter_type: FilterType) {
        if let Some(n) = self.nodes.get_mut(&node) {
            if n.filter_type.is_some() {
                n.filter_type = Some(filter_type);
            }
        }
    }

    fn set_value_at_time(&mut self, param: Param, value: f32, time: f64) {
        if let Some(t) = self.timeline_mut(param) {
            t.set_value_at_time(value, time);
        }
    }

    fn linear_ramp_to_value_at_time(&mut self, param: Param, value: f32, time: f64) {
        let now = self.now;
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
        self.timeline(param).map(|t| t.value_at(time))
    }

    fn frequency_snapshot(&mut self, analyser: NodeId) -> Option<FrequencySnapshot> {
        match self.nodes.get(&analyser)?.kind {
            NodeKind::Analyser { .. } => self.snapshot.clone(),
            _ => None,
        }
    }

    fn poll_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_moves_playing_sources() {
        let mut engine = SimulatedEngine::new();
        engine.set_duration("a.mp3", 2.0);
        let a = engine.create_source("a.mp3").unwrap();
        assert_eq!(engine.poll_events(), vec![EngineEvent::Loaded(a)]);

        engine.advance(1.0);
        assert_eq!(engine.position(a), 0.0);

        engine.play(a).unwrap();
        engine.advance(1.5);
        assert_eq!(engine.position(a), 1.5);
        assert!(engine.poll_events().is_empty());

        engine.advance(1.0);
        assert_eq!(engine.position(a), 2.0);
        assert!(!engine.is_playing(a));
        assert_eq!(engine.poll_events(), vec![EngineEvent::Ended(a)]);
    }

    #[test]
    fn test_play_failures_counted() {
        let mut engine = SimulatedEngine::new();
        let a = engine.create_source("a.mp3").unwrap();
        engine.fail_next_plays("a.mp3", 1);
        assert!(engine.play(a).is_err());
        assert!(engine.play(a).is_ok());
        assert_eq!(engine.play_attempts("a.mp3"), 2);
    }

    #[test]
    fn test_slow_load() {
        let mut engine = SimulatedEngine::new();
        engine.delay_loading("b.mp3");
        let b = engine.create_source("b.mp3").unwrap();
        assert!(!engine.is_ready(b));
        assert!(engine.poll_events().is_empty());

        engine.finish_loading("b.mp3");
        assert!(engine.is_ready(b));
        assert_eq!(engine.poll_events(), vec![EngineEvent::Loaded(b)]);
    }

    #[test]
    fn test_media_source_node_is_unique() {
        let mut engine = SimulatedEngine::new();
        let a = engine.create_source("a.mp3").unwrap();
        let node = engine.create_node(NodeKind::MediaSource(a)).unwrap();
        assert_eq!(
            engine.create_node(NodeKind::MediaSource(a)),
            Err(EngineError::SourceAlreadyConnected(a))
        );

        engine.remove_node(node);
        assert!(engine.create_node(NodeKind::MediaSource(a)).is_ok());
    }

    #[test]
    fn test_connect_rejects_cycles() {
        let mut engine = SimulatedEngine::new();
        let g1 = engine.create_node(NodeKind::Gain).unwrap();
        let g2 = engine.create_node(NodeKind::Gain).unwrap();
        engine.connect(g1, g2).unwrap();
        assert_eq!(engine.connect(g2, g1), Err(EngineError::Cycle(g2, g1)));
    }

    #[test]
    fn test_audible_sources() {
        let mut engine = SimulatedEngine::new();
        let a = engine.create_source("a.mp3").unwrap();
        let input = engine.create_node(NodeKind::MediaSource(a)).unwrap();
        let gain = engine.create_node(NodeKind::Gain).unwrap();
        engine.connect(input, gain).unwrap();
        assert!(engine.audible_sources().is_empty());

        let dest = engine.destination();
        engine.connect(gain, dest).unwrap();
        assert_eq!(engine.audible_sources(), vec![a]);

        engine.disconnect(gain);
        assert!(engine.audible_sources().is_empty());
    }

    #[test]
    fn test_param_automation() {
        let mut engine = SimulatedEngine::new();
        let gain = engine.create_node(NodeKind::Gain).unwrap();
        let param = Param::new(gain, ParamKind::Gain);
        assert_eq!(engine.param_value_at(param, 0.0), Some(1.0));

        engine.set_value_at_time(param, 0.0, 1.0);
        engine.linear_ramp_to_value_at_time(param, 1.0, 3.0);
        assert_eq!(engine.param_value_at(param, 2.0), Some(0.5));
        assert_eq!(engine.param_events(param).len(), 2);

        let missing = Param::new(gain, ParamKind::Q);
        assert_eq!(engine.param_value_at(missing, 0.0), None);
    }
}
