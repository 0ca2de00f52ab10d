//! Two-slot playback pipeline
//!
//! Owns the queue and the `current`/`next` slots, decides when to hand
//! over, and keeps everything moving when parts of it fail. The pipeline is
//! single-threaded and driven by [`PlaybackPipeline::tick`]; every timer it
//! arms runs on the engine clock, so a [`SimulatedEngine`](crate::SimulatedEngine)
//! replays it deterministically.
//!
//! Per tick:
//! 1. drain engine notifications (loaded, failed, ended)
//! 2. fire due timers (play retry, readiness poll, fallback, effect reverts)
//! 3. trigger the transition once the current track is inside the window
//! 4. drive the crossfade volumes and complete the swap at the end
//! 5. analyse the current chain: dynamic filters, drops, advisor suggestions

mod drops;
mod dynamic;
mod slot;
mod track;

pub use drops::{band_energy, DropDetector, DROP_COOLDOWN_SECS, DROP_EFFECT_SECS, DROP_THRESHOLD};
pub use dynamic::{DynamicFilterPool, PoolAction, ScheduledFilter, FILTER_FADE_SECS, MAX_SCHEDULED_FILTERS};
pub use slot::{PlaybackSlot, SlotState};
pub use track::{format_clock, guess_genre, DisplaySong, Track, TrackId, TrackUpdate, LOADING_TITLE};

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use autodj_analysis::advisor::{Feedback, Reaction, UserAdjustments};
use autodj_analysis::{
    banded_energies, AudioCharacteristics, EffectSpec, EnergyLevels, FilterSpec, FrequencySnapshot,
    HeuristicAdvisor, TrackHints,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::engine::{AudioEngineHandle, EngineEvent, SourceId};
use crate::graph::{Control, EffectGraph, ADVICE_RAMP_SECS};
use crate::transition::{
    phrase_aligned_trigger, TransitionPhase, TransitionScheduler, TransitionSession, FRONT_CENTER,
    TRANSITION_WINDOW_SECS,
};

const READINESS_POLL_SECS: f64 = 0.1;
const READINESS_TIMEOUT_SECS: f64 = 1.5;
const FALLBACK_DELAY_SECS: f64 = 0.3;
/// An unstarted transition is forced once the current track has this little left
const FALLBACK_FORCE_REMAINING_SECS: f64 = 5.0;
const PLAY_RETRY_SECS: f64 = 0.1;
/// Refill the queue while it holds fewer tracks than this
const QUEUE_LOW_WATER: usize = 2;
const PRELOAD_AHEAD: usize = 3;
const TIMER_EPSILON: f64 = 1e-6;
const EFFECT_APPLY_SECS: f64 = 0.5;
const EFFECT_REVERT_SECS: f64 = 1.0;

/// Learned transition quality (0 - 10) for a normal and a forced swap
const SMOOTH_TRANSITION_QUALITY: f32 = 7.0;
const FORCED_TRANSITION_QUALITY: f32 = 3.0;

/// Pipeline settings
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Longest transition, also how close to the end it triggers
    pub transition_window_secs: f64,
    /// Trigger on the last phrase boundary before the window instead of
    /// exactly at it
    pub phrase_align: bool,
    /// Playback seconds between dynamics analyses
    pub analysis_interval_secs: f64,
    /// Seed for queue refills; random when `None`
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transition_window_secs: TRANSITION_WINDOW_SECS,
            phrase_align: false,
            analysis_interval_secs: 1.0,
            seed: None,
        }
    }
}

/// Coarse state of the whole pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    SingleTrack,
    DualTrackSteady,
    Transitioning,
}

/// Things worth logging or showing
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    TrackStarted { id: TrackId, title: String },
    TransitionTriggered { remaining_secs: f64, duration_secs: f64 },
    TransitionStarted { duration_secs: f64 },
    TransitionPhase(TransitionPhase),
    TransitionCompleted { forced: bool },
    /// Playback second of the current track
    DropDetected { at_secs: f64 },
    LoadFailed { id: TrackId, reason: String },
    PlaybackFailed { id: TrackId, reason: String },
    /// Locators likely to be needed soon
    PreloadHint(Vec<String>),
    /// The queue ran dry and the last track ended
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TimerKind {
    Fallback { transition: u64 },
    ReadinessPoll { transition: u64 },
    RetryPlay { generation: u64 },
    /// `sweep_only` when the drop landed mid-transition
    DropRevert { generation: u64, sweep_only: bool },
    EffectApply { generation: u64, effects: EffectSpec, duration: f64 },
    EffectRevert { generation: u64 },
}

impl TimerKind {
    /// Timers that touch the current chain's effect sends
    fn is_effect_of(&self, slot: u64) -> bool {
        matches!(
            *self,
            TimerKind::DropRevert { generation, .. }
            | TimerKind::EffectApply { generation, .. }
            | TimerKind::EffectRevert { generation } if generation == slot
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    at: f64,
    kind: TimerKind,
}

/// Suggestions applied to the current slot, kept so they can be rated
#[derive(Debug, Clone)]
struct Advice {
    energy: EnergyLevels,
    characteristics: AudioCharacteristics,
    filters: Vec<FilterSpec>,
    effects: EffectSpec,
}

#[derive(Debug, Clone)]
struct CompletedTransition {
    from: (TrackHints, f32),
    to: (TrackHints, f32),
    quality: f32,
}

/// Back-to-back player with automated transitions
pub struct PlaybackPipeline<E: AudioEngineHandle> {
    engine: E,
    config: PipelineConfig,
    advisor: HeuristicAdvisor,
    playlist: Vec<Track>,
    queue: VecDeque<Track>,
    current: Option<PlaybackSlot>,
    next: Option<PlaybackSlot>,
    scheduler: TransitionScheduler,
    drops: DropDetector,
    pool: DynamicFilterPool,
    timers: Vec<Timer>,
    events: Vec<PipelineEvent>,
    rng: StdRng,
    generation: u64,
    transition_id: u64,
    readiness_deadline: f64,
    last_analysis_at: Option<f64>,
    advice: Option<Advice>,
    last_transition: Option<CompletedTransition>,
    effects_degraded: bool,
}

impl<E: AudioEngineHandle> PlaybackPipeline<E> {
    /// Queue the playlist in order; refills draw from it at random
    pub fn new(engine: E, config: PipelineConfig, playlist: Vec<Track>) -> Self {
        let queue = playlist.clone();
        Self::with_queue(engine, config, queue, playlist)
    }

    /// Start from an explicit queue, refilling from `playlist`
    pub fn with_queue(engine: E, config: PipelineConfig, queue: Vec<Track>, playlist: Vec<Track>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            engine,
            scheduler: TransitionScheduler::new(config.transition_window_secs),
            config,
            advisor: HeuristicAdvisor::new(),
            playlist,
            queue: queue.into(),
            current: None,
            next: None,
            drops: DropDetector::new(),
            pool: DynamicFilterPool::new(),
            timers: Vec::new(),
            events: Vec::new(),
            rng,
            generation: 0,
            transition_id: 0,
            readiness_deadline: 0.0,
            last_analysis_at: None,
            advice: None,
            last_transition: None,
            effects_degraded: false,
        }
    }

    pub fn with_advisor(mut self, advisor: HeuristicAdvisor) -> Self {
        self.advisor = advisor;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn advisor(&self) -> &HeuristicAdvisor {
        &self.advisor
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn current(&self) -> Option<&PlaybackSlot> {
        self.current.as_ref()
    }

    pub fn next(&self) -> Option<&PlaybackSlot> {
        self.next.as_ref()
    }

    /// Tracks waiting behind `next`
    pub fn queue(&self) -> &VecDeque<Track> {
        &self.queue
    }

    pub fn transition(&self) -> Option<&TransitionSession> {
        self.scheduler.session()
    }

    pub fn dynamic_filters(&self) -> &DynamicFilterPool {
        &self.pool
    }

    pub fn state(&self) -> PipelineState {
        let Some(current) = &self.current else {
            return PipelineState::Stopped;
        };
        if matches!(
            current.state,
            SlotState::Idle | SlotState::Ended | SlotState::Superseded
        ) {
            return PipelineState::Stopped;
        }
        if self.scheduler.is_active() {
            PipelineState::Transitioning
        } else if self.next.is_some() {
            PipelineState::DualTrackSteady
        } else {
            PipelineState::SingleTrack
        }
    }

    /// Drain pending events
    pub fn take_events(&mut self) -> Vec<PipelineEvent> {
        std::mem::take(&mut self.events)
    }

    /// Promote the head of the queue to `current` and start it, and the
    /// following track to `next`, muted. No-op once started.
    pub fn start(&mut self) {
        if self.current.is_some() {
            return;
        }
        while let Some(track) = self.queue.pop_front() {
            if let Some(mut slot) = self.open_slot(track) {
                slot.autoplay = true;
                self.engine.set_volume(slot.source, 1.0);
                slot.graph.position_in_space(&mut self.engine, FRONT_CENTER);
                self.current = Some(slot);
                break;
            }
        }
        let Some(current) = &self.current else {
            tracing::warn!("nothing to play");
            return;
        };

        let generation = current.generation;
        tracing::info!(title = %current.track.title, "playback started");
        self.events.push(PipelineEvent::TrackStarted {
            id: current.track.id,
            title: current.track.title.clone(),
        });
        self.begin_playback(generation);
        self.promote_next();
        self.refill_queue();
        self.emit_preload_hint();
    }

    /// Advance the pipeline to the engine's current time
    pub fn tick(&mut self) {
        for event in self.engine.poll_events() {
            match event {
                EngineEvent::Loaded(source) => self.on_loaded(source),
                EngineEvent::LoadFailed(source, reason) => self.on_load_failed(source, reason),
                EngineEvent::Ended(source) => self.on_ended(source),
            }
        }
        self.fire_due_timers();
        self.update_progress();
    }

    /// Open a transition session toward `next`.
    ///
    /// Returns false when one is already active, when there is no `next`,
    /// or when the current track's length is unknown. The automation starts
    /// as soon as `next` is ready, or after a bounded wait.
    pub fn trigger_transition(&mut self) -> bool {
        let Some(remaining) = self.remaining() else {
            return false;
        };
        let (Some(current), Some(next)) = (&self.current, &self.next) else {
            return false;
        };
        if current.state != SlotState::Playing {
            return false;
        }

        let now = self.engine.current_time();
        let next_ready = self.engine.is_ready(next.source);
        let (current_bpm, next_bpm) = (current.track.bpm_or_default(), next.track.bpm_or_default());
        if !self.scheduler.trigger(now, remaining, current_bpm, next_bpm) {
            return false;
        }

        self.transition_id += 1;
        let duration_secs = self.scheduler.session().map_or(0.0, |s| s.duration_secs);
        self.events.push(PipelineEvent::TransitionTriggered {
            remaining_secs: remaining,
            duration_secs,
        });
        self.emit_preload_hint();

        if next_ready {
            self.start_transition();
        } else {
            tracing::debug!("waiting for next track to load");
            self.readiness_deadline = now + READINESS_TIMEOUT_SECS;
            self.arm(
                now + READINESS_POLL_SECS,
                TimerKind::ReadinessPoll {
                    transition: self.transition_id,
                },
            );
        }
        self.arm(
            now + FALLBACK_DELAY_SECS,
            TimerKind::Fallback {
                transition: self.transition_id,
            },
        );
        true
    }

    /// Swap `next` into `current`, release the old track and promote the
    /// following one. Returns false when there is no `next`.
    pub fn complete_transition(&mut self, forced: bool) -> bool {
        let Some(mut incoming) = self.next.take() else {
            return false;
        };
        // The incoming track was never heard
        let forced = forced || incoming.state != SlotState::Playing;
        let session = self.scheduler.complete();
        self.transition_id += 1;

        if let Some(outgoing) = self.current.take() {
            let from_bpm = session.as_ref().map_or(outgoing.track.bpm_or_default(), |s| s.current_bpm);
            let to_bpm = session.as_ref().map_or(incoming.track.bpm_or_default(), |s| s.next_bpm);
            let quality = if forced {
                FORCED_TRANSITION_QUALITY
            } else {
                SMOOTH_TRANSITION_QUALITY
            };
            let record = CompletedTransition {
                from: (outgoing.track.hints(), from_bpm),
                to: (incoming.track.hints(), to_bpm),
                quality,
            };
            self.advisor.record_transition(
                (&record.from.0, record.from.1),
                (&record.to.0, record.to.1),
                record.quality,
                None,
            );
            self.last_transition = Some(record);
            outgoing.release(&mut self.engine);
        }

        self.pool.clear();
        self.drops.reset();
        self.advisor.reset_history();
        self.last_analysis_at = None;
        self.advice = None;

        // Settle the incoming chain where the transition would have left it
        self.engine.set_volume(incoming.source, 1.0);
        for control in [Control::TransitionLow, Control::TransitionMid, Control::TransitionHigh] {
            incoming.graph.set_immediate(&mut self.engine, control, 0.0);
        }
        incoming.graph.set_immediate(&mut self.engine, Control::Dry, 1.0);
        incoming.graph.set_immediate(&mut self.engine, Control::DelayWet, 0.0);
        incoming.graph.position_in_space(&mut self.engine, FRONT_CENTER);
        incoming.autoplay = true;

        let generation = incoming.generation;
        tracing::info!(title = %incoming.track.title, forced, "transition completed");
        self.events.push(PipelineEvent::TransitionCompleted { forced });
        self.events.push(PipelineEvent::TrackStarted {
            id: incoming.track.id,
            title: incoming.track.title.clone(),
        });
        self.current = Some(incoming);
        self.begin_playback(generation);

        self.promote_next();
        self.refill_queue();
        true
    }

    /// Pause or resume; starts the pipeline when nothing is loaded yet
    pub fn toggle_play_pause(&mut self) {
        let Some(current) = self.current.as_mut() else {
            self.start();
            return;
        };

        match current.state {
            SlotState::Playing => {
                self.engine.pause(current.source);
                current.state = SlotState::Paused;
                if let Some(next) = self.next.as_mut().filter(|n| n.is_playing()) {
                    self.engine.pause(next.source);
                    next.state = SlotState::Paused;
                }
                tracing::info!("paused");
            }
            SlotState::Loading => {
                current.autoplay = !current.autoplay;
            }
            SlotState::Paused | SlotState::Ready | SlotState::Idle | SlotState::Ended => {
                let generation = current.generation;
                self.begin_playback(generation);
                if let Some(next) = self.next.as_ref().filter(|n| n.state == SlotState::Paused) {
                    let generation = next.generation;
                    self.begin_playback(generation);
                }
                tracing::info!("resumed");
            }
            SlotState::Superseded => {}
        }
    }

    /// Patch every copy of a track (live, queued, and in the playlist).
    /// Returns false when no copy exists.
    pub fn update_track(&mut self, id: TrackId, update: &TrackUpdate) -> bool {
        let mut found = false;
        let live = self
            .current
            .iter_mut()
            .chain(self.next.iter_mut())
            .map(|slot| &mut slot.track);
        for track in live
            .chain(self.queue.iter_mut())
            .chain(self.playlist.iter_mut())
            .filter(|t| t.id == id)
        {
            track.apply(update);
            found = true;
        }
        found
    }

    /// Current, next, then the queue
    pub fn display_songs(&self) -> Vec<DisplaySong> {
        let slots = self.current.iter().chain(self.next.iter()).map(|slot| {
            let duration = self.engine.duration(slot.source).or(slot.track.duration_secs);
            DisplaySong::from_track(
                &slot.track,
                self.engine.position(slot.source),
                duration,
                slot.is_playing(),
            )
        });
        slots.chain(self.queue.iter().map(DisplaySong::queued)).collect()
    }

    /// Rate the advisor's suggestions for the current track (1 - 5).
    /// Returns false before any suggestion was applied.
    pub fn provide_feedback(&mut self, rating: u8, adjustments: Option<UserAdjustments>) -> bool {
        let (Some(advice), Some(current)) = (&self.advice, &self.current) else {
            tracing::debug!("no suggestions to rate yet");
            return false;
        };
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let feedback = Feedback {
            energy: advice.energy,
            characteristics: advice.characteristics,
            filters: advice.filters.clone(),
            effects: advice.effects,
            rating,
            adjustments,
            hints: current.track.hints(),
            timestamp,
        };
        self.advisor.provide_feedback(feedback);
        tracing::info!(rating, "feedback recorded");
        true
    }

    /// React to the most recent transition. Returns false before the first one.
    pub fn react_to_transition(&mut self, reaction: Reaction) -> bool {
        let Some(last) = &self.last_transition else {
            return false;
        };
        self.advisor.record_transition(
            (&last.from.0, last.from.1),
            (&last.to.0, last.to.1),
            last.quality,
            Some(reaction),
        );
        tracing::info!(?reaction, "transition reaction recorded");
        true
    }

    // Slots

    fn open_slot(&mut self, track: Track) -> Option<PlaybackSlot> {
        let source = match self.engine.create_source(&track.locator) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(locator = %track.locator, error = %e, "could not open track");
                self.events.push(PipelineEvent::LoadFailed {
                    id: track.id,
                    reason: e.to_string(),
                });
                return None;
            }
        };
        let graph = self.build_graph(source);
        let state = if self.engine.is_ready(source) {
            SlotState::Ready
        } else {
            SlotState::Loading
        };
        self.generation += 1;
        Some(PlaybackSlot::new(track, source, graph, state, self.generation))
    }

    fn build_graph(&mut self, source: SourceId) -> EffectGraph {
        if self.effects_degraded {
            return EffectGraph::Unavailable;
        }
        let graph = EffectGraph::build(&mut self.engine, source);
        if !graph.is_available() {
            tracing::warn!("effect chains unavailable, playing dry from now on");
            self.effects_degraded = true;
        }
        graph
    }

    fn promote_next(&mut self) {
        while self.next.is_none() {
            let Some(track) = self.queue.pop_front() else {
                break;
            };
            if let Some(slot) = self.open_slot(track) {
                self.engine.set_volume(slot.source, 0.0);
                tracing::debug!(title = %slot.track.title, "next track loading");
                self.next = Some(slot);
            }
        }
    }

    fn refill_queue(&mut self) {
        while self.queue.len() < QUEUE_LOW_WATER && !self.playlist.is_empty() {
            let pick = self.rng.gen_range(0..self.playlist.len());
            let track = self.playlist[pick].clone();
            tracing::debug!(title = %track.title, "queue refilled");
            self.queue.push_back(track);
        }
    }

    fn emit_preload_hint(&mut self) {
        let locators: Vec<String> = self
            .queue
            .iter()
            .take(PRELOAD_AHEAD)
            .map(|t| t.locator.clone())
            .collect();
        if !locators.is_empty() {
            self.events.push(PipelineEvent::PreloadHint(locators));
        }
    }

    fn slot_mut(&mut self, generation: u64) -> Option<&mut PlaybackSlot> {
        self.current
            .iter_mut()
            .chain(self.next.iter_mut())
            .find(|s| s.generation == generation)
    }

    fn generation_of(&self, source: SourceId) -> Option<u64> {
        self.current
            .iter()
            .chain(self.next.iter())
            .find(|s| s.source == source)
            .map(|s| s.generation)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.current.as_ref().is_some_and(|c| c.generation == generation)
    }

    /// Play a slot now, or as soon as it has loaded
    fn begin_playback(&mut self, generation: u64) {
        let Some(slot) = self.slot_mut(generation) else {
            return;
        };
        let state = slot.state;
        match state {
            SlotState::Loading => slot.autoplay = true,
            SlotState::Playing | SlotState::Superseded => {}
            _ => self.try_play(generation, false),
        }
    }

    fn try_play(&mut self, generation: u64, is_retry: bool) {
        let Some(slot) = self.slot_mut(generation) else {
            return;
        };
        if slot.state == SlotState::Playing {
            return;
        }
        let (source, id) = (slot.source, slot.track.id);

        match self.engine.play(source) {
            Ok(()) => {
                if let Some(slot) = self.slot_mut(generation) {
                    slot.state = SlotState::Playing;
                    slot.autoplay = false;
                }
            }
            Err(e) if !is_retry => {
                tracing::warn!(error = %e, "play rejected, retrying");
                let at = self.engine.current_time() + PLAY_RETRY_SECS;
                self.arm(at, TimerKind::RetryPlay { generation });
            }
            Err(e) => {
                tracing::error!(error = %e, "play failed after retry");
                if let Some(slot) = self.slot_mut(generation) {
                    slot.state = SlotState::Idle;
                    slot.autoplay = false;
                }
                self.events.push(PipelineEvent::PlaybackFailed {
                    id,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn remaining(&self) -> Option<f64> {
        let current = self.current.as_ref()?;
        let duration = self
            .engine
            .duration(current.source)
            .or(current.track.duration_secs)?;
        Some((duration - self.engine.position(current.source)).max(0.0))
    }

    // Engine notifications

    fn on_loaded(&mut self, source: SourceId) {
        let Some(generation) = self.generation_of(source) else {
            return;
        };
        let Some(slot) = self.slot_mut(generation) else {
            return;
        };
        if slot.state != SlotState::Loading {
            return;
        }
        slot.state = SlotState::Ready;
        tracing::debug!(title = %slot.track.title, "track loaded");
        if slot.autoplay {
            self.try_play(generation, false);
        }
    }

    fn on_load_failed(&mut self, source: SourceId, reason: String) {
        let Some(generation) = self.generation_of(source) else {
            return;
        };
        if self.is_current(generation) {
            if let Some(current) = &self.current {
                tracing::warn!(title = %current.track.title, %reason, "current track failed to load");
                self.events.push(PipelineEvent::LoadFailed {
                    id: current.track.id,
                    reason,
                });
            }
            if !self.complete_transition(true) {
                self.stop_playback();
            }
            return;
        }

        let Some(failed) = self.next.take() else {
            return;
        };
        tracing::warn!(title = %failed.track.title, %reason, "next track failed to load");
        self.events.push(PipelineEvent::LoadFailed {
            id: failed.track.id,
            reason,
        });
        if self.scheduler.is_active() {
            self.scheduler.complete();
            self.transition_id += 1;
        }
        failed.release(&mut self.engine);
        self.promote_next();
        self.refill_queue();
    }

    fn on_ended(&mut self, source: SourceId) {
        let Some(generation) = self.generation_of(source) else {
            return;
        };
        if !self.is_current(generation) {
            return;
        }
        let started = self.scheduler.session().is_some_and(|s| s.started);
        if !self.complete_transition(!started) {
            self.stop_playback();
        }
    }

    /// The last track ended with nothing queued
    fn stop_playback(&mut self) {
        let Some(current) = self.current.as_mut() else {
            return;
        };
        self.engine.stop(current.source);
        current.state = SlotState::Idle;
        current.autoplay = false;
        tracing::info!("queue exhausted, playback stopped");
        self.events.push(PipelineEvent::Stopped);
    }

    // Timers

    fn arm(&mut self, at: f64, kind: TimerKind) {
        self.timers.push(Timer { at, kind });
    }

    fn fire_due_timers(&mut self) {
        loop {
            let now = self.engine.current_time();
            let due = self
                .timers
                .iter()
                .enumerate()
                .filter(|(_, t)| t.at <= now + TIMER_EPSILON)
                .min_by(|a, b| a.1.at.total_cmp(&b.1.at))
                .map(|(i, _)| i);
            let Some(index) = due else {
                break;
            };
            let timer = self.timers.swap_remove(index);
            self.fire(timer.kind, now);
        }
    }

    fn fire(&mut self, kind: TimerKind, now: f64) {
        match kind {
            TimerKind::Fallback { transition } if transition == self.transition_id => {
                self.on_fallback(now);
            }
            TimerKind::ReadinessPoll { transition } if transition == self.transition_id => {
                self.on_readiness_poll(now);
            }
            TimerKind::RetryPlay { generation } => self.try_play(generation, true),
            TimerKind::DropRevert {
                generation,
                sweep_only,
            } if self.is_current(generation) => {
                if let Some(current) = &self.current {
                    if sweep_only {
                        drops::revert_drop_sweep(&mut self.engine, &current.graph, now);
                    } else {
                        drops::revert_drop_effect(&mut self.engine, &current.graph, now);
                    }
                }
            }
            TimerKind::EffectApply {
                generation,
                effects,
                duration,
            } if self.is_current(generation) => {
                if let Some(current) = &self.current {
                    current.graph.apply_effect_mix(&mut self.engine, &effects, EFFECT_APPLY_SECS);
                }
                self.arm(now + duration, TimerKind::EffectRevert { generation });
            }
            TimerKind::EffectRevert { generation } if self.is_current(generation) => {
                if let Some(current) = &self.current {
                    let graph = &current.graph;
                    graph.ramp(&mut self.engine, Control::ReverbWet, 0.2, EFFECT_REVERT_SECS, now);
                    graph.ramp(&mut self.engine, Control::DelayWet, 0.1, EFFECT_REVERT_SECS, now);
                }
            }
            _ => tracing::trace!(?kind, "stale timer dropped"),
        }
    }

    fn on_readiness_poll(&mut self, now: f64) {
        let pending = self.scheduler.session().is_some_and(|s| !s.started && !s.completed);
        if !pending {
            return;
        }
        let ready = self.next.as_ref().is_some_and(|n| self.engine.is_ready(n.source));
        if ready {
            self.start_transition();
        } else if now + TIMER_EPSILON >= self.readiness_deadline {
            tracing::warn!("next track still loading, starting transition anyway");
            self.start_transition();
        } else {
            self.arm(
                now + READINESS_POLL_SECS,
                TimerKind::ReadinessPoll {
                    transition: self.transition_id,
                },
            );
        }
    }

    fn on_fallback(&mut self, now: f64) {
        let Some(session) = self.scheduler.session().filter(|s| !s.completed).cloned() else {
            return;
        };
        let transition = self.transition_id;

        if !session.started {
            let remaining = self.remaining().unwrap_or(0.0);
            if remaining <= FALLBACK_FORCE_REMAINING_SECS {
                tracing::warn!(remaining, "transition never started, forcing swap");
                self.complete_transition(true);
            } else {
                let at = now + remaining - FALLBACK_FORCE_REMAINING_SECS;
                self.arm(at, TimerKind::Fallback { transition });
            }
            return;
        }

        let deadline = session.ends_at() + FALLBACK_DELAY_SECS;
        if now + TIMER_EPSILON >= deadline {
            tracing::warn!("transition overran its window, forcing swap");
            self.complete_transition(true);
        } else {
            self.arm(deadline, TimerKind::Fallback { transition });
        }
    }

    // Transition

    fn start_transition(&mut self) {
        let Some(remaining) = self.remaining() else {
            return;
        };
        self.clear_current_effects();

        let energy = self.drops.energy();
        let (Some(current), Some(next)) = (&self.current, &self.next) else {
            return;
        };
        if !self
            .scheduler
            .start(&mut self.engine, &current.graph, &next.graph, remaining, energy)
        {
            return;
        }

        let (next_source, next_generation) = (next.source, next.generation);
        let now = self.engine.current_time();
        if let Some(volumes) = self.scheduler.volumes(now, remaining) {
            self.engine.set_volume(next_source, volumes.next);
        }
        self.begin_playback(next_generation);

        let duration_secs = self.scheduler.session().map_or(0.0, |s| s.duration_secs);
        self.events.push(PipelineEvent::TransitionStarted { duration_secs });
    }

    /// Cut short drop and dynamics effects on the outgoing chain
    fn clear_current_effects(&mut self) {
        let Some(current) = &self.current else {
            return;
        };
        let generation = current.generation;
        let drop_active = self
            .timers
            .iter()
            .any(|t| matches!(t.kind, TimerKind::DropRevert { generation: g, .. } if g == generation));
        self.timers.retain(|t| !t.kind.is_effect_of(generation));

        if drop_active {
            let now = self.engine.current_time();
            current
                .graph
                .ramp(&mut self.engine, Control::SweepFrequency, 20000.0, EFFECT_APPLY_SECS, now);
            current
                .graph
                .ramp(&mut self.engine, Control::SweepQ, 1.0, EFFECT_APPLY_SECS, now);
        }
    }

    fn should_trigger(&self, position: f64, duration: f64, remaining: f64) -> bool {
        let window = self.scheduler.window_secs();
        if remaining <= window {
            return true;
        }
        if !self.config.phrase_align {
            return false;
        }
        let bpm = self
            .current
            .as_ref()
            .map_or(crate::transition::DEFAULT_BPM, |c| c.track.bpm_or_default());
        position >= phrase_aligned_trigger(duration, bpm, window)
    }

    fn update_progress(&mut self) {
        let Some(current) = &self.current else {
            return;
        };
        if current.state != SlotState::Playing {
            return;
        }
        let source = current.source;
        let now = self.engine.current_time();
        let position = self.engine.position(source);
        let Some(duration) = self.engine.duration(source).or(current.track.duration_secs) else {
            return;
        };
        let remaining = (duration - position).max(0.0);

        if self.next.is_some()
            && !self.scheduler.is_active()
            && self.should_trigger(position, duration, remaining)
        {
            tracing::info!(remaining, "current track entering transition window");
            self.trigger_transition();
        }

        if let Some(volumes) = self.scheduler.volumes(now, remaining) {
            self.engine.set_volume(source, volumes.current);
            if let Some(next) = &self.next {
                self.engine.set_volume(next.source, volumes.next);
            }
        }
        if let Some(phase) = self.scheduler.update(now) {
            self.events.push(PipelineEvent::TransitionPhase(phase));
        }

        let started = self.scheduler.session().is_some_and(|s| s.started);
        if started && remaining <= 0.0 {
            self.complete_transition(false);
            return;
        }

        self.analyse(now, position, duration);
    }

    // Analysis

    fn analyse(&mut self, now: f64, position: f64, duration: f64) {
        let Some(current) = &self.current else {
            return;
        };
        let generation = current.generation;
        let Some(analyser) = current.graph.analyser() else {
            return;
        };
        let Some(snapshot) = self.engine.frequency_snapshot(analyser) else {
            return;
        };

        for action in self.pool.process(position) {
            if let Some(current) = &self.current {
                apply_pool_action(&mut self.engine, &current.graph, action, now);
            }
        }

        let transitioning = self.scheduler.is_active();
        if self.drops.observe(&snapshot, now) {
            tracing::info!(at = position, transitioning, "drop detected");
            self.events.push(PipelineEvent::DropDetected { at_secs: position });
            if let Some(current) = &self.current {
                // Effect sends belong to the transition while one runs
                if transitioning {
                    drops::apply_drop_sweep(&mut self.engine, &current.graph, now);
                } else {
                    drops::apply_drop_effect(&mut self.engine, &current.graph, now);
                }
            }
            self.arm(
                now + DROP_EFFECT_SECS,
                TimerKind::DropRevert {
                    generation,
                    sweep_only: transitioning,
                },
            );
        }

        if transitioning {
            return;
        }

        let due = self
            .last_analysis_at
            .map_or(true, |at| position < at || position - at >= self.config.analysis_interval_secs);
        if due {
            self.last_analysis_at = Some(position);
            self.analyse_dynamics(&snapshot, now, position, duration, generation);
        }
    }

    fn analyse_dynamics(
        &mut self,
        snapshot: &FrequencySnapshot,
        now: f64,
        position: f64,
        duration: f64,
        generation: u64,
    ) {
        let Some(current) = &self.current else {
            return;
        };
        let hints = current.track.hints();
        let advice_applied = current.advice_applied;

        let analysis = self
            .advisor
            .analyze_dynamics(snapshot, position, duration, Some(&hints));
        for change in &analysis.changes {
            tracing::debug!(kind = ?change.kind, intensity = change.intensity, "energy change");
        }
        self.pool.schedule(&analysis.filters);

        let timed = analysis.effects;
        if let (Some(apply_at), Some(effect_secs)) = (timed.apply_at, timed.duration) {
            self.arm(
                now + (apply_at - position).max(0.0),
                TimerKind::EffectApply {
                    generation,
                    effects: timed.effects,
                    duration: effect_secs,
                },
            );
        }

        if !advice_applied {
            self.apply_advice(snapshot, &hints);
        }
    }

    /// One-off corrective EQ and send levels for a freshly started track
    fn apply_advice(&mut self, snapshot: &FrequencySnapshot, hints: &TrackHints) {
        let energy = banded_energies(snapshot);
        let characteristics = self.advisor.characteristics(&energy);
        let filters = self.advisor.suggest_filters(&characteristics, &energy, Some(hints));
        let effects = self.advisor.suggest_effects(&characteristics, &energy, Some(hints));

        let Some(current) = self.current.as_mut() else {
            return;
        };
        let applied = current.graph.apply_filter_specs(&mut self.engine, &filters);
        current
            .graph
            .apply_effect_mix(&mut self.engine, &effects, ADVICE_RAMP_SECS);
        current.advice_applied = true;
        tracing::debug!(filters = applied, "advisor suggestions applied");

        self.advice = Some(Advice {
            energy,
            characteristics,
            filters,
            effects,
        });
    }
}

fn apply_pool_action(engine: &mut dyn AudioEngineHandle, graph: &EffectGraph, action: PoolAction, now: f64) {
    match action {
        PoolAction::Apply { slot, filter } => {
            graph.set_dynamic_type(engine, slot, filter.filter_type);
            graph.set_immediate(engine, Control::DynamicFrequency(slot), filter.frequency_hz);
            graph.set_immediate(engine, Control::DynamicQ(slot), filter.q.unwrap_or(1.0));
            graph.ramp_from(
                engine,
                Control::DynamicGain(slot),
                0.0,
                filter.gain_db,
                FILTER_FADE_SECS,
                now,
            );
        }
        PoolAction::FadeOut { slot } => {
            graph.ramp(engine, Control::DynamicGain(slot), 0.0, FILTER_FADE_SECS, now);
        }
    }
}
