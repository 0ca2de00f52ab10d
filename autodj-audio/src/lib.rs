//! Audio engine for autodj - render graph, effect chains, and transitions
//!
//! This crate drives unattended playback:
//! - Engine: the [`AudioEngineHandle`] contract, implemented by
//!   [`crate::NativeEngine`] for real output and [`crate::SimulatedEngine`] for tests
//! - Automation: Web Audio style parameter timelines on the engine clock
//! - Graph: per-track effect chains (EQ, filters, reverb, delay, spatial)
//! - Transition: the timed crossfade between the current and next track
//! - Pipeline: queue, preload, drop detection, and the transition scheduler

mod automation;
mod engine;
mod graph;
pub mod native;
mod pipeline;
mod sim;
mod transition;

pub use automation::{AutomationEvent, AutomationTimeline};
pub use engine::{
    AudioEngineHandle, EngineError, EngineEvent, NodeId, NodeKind, Param, ParamKind, PlayError,
    SourceId,
};
pub use graph::{
    Control, EffectChain, EffectGraph, EqBand, SpatialPoint, ADVICE_RAMP_SECS, ANALYSER_FFT_SIZE,
    DYNAMIC_POOL_SIZE, EQ_BANDS, MAX_DELAY_SECS, MAX_EQ_GAIN_DB,
};
pub use native::{DecodedAudio, NativeEngine, SharedEngine, SourceLoader, RENDER_QUANTUM};
pub use pipeline::{
    band_energy, format_clock, guess_genre, DisplaySong, DropDetector, DynamicFilterPool,
    PipelineConfig, PipelineEvent, PipelineState, PlaybackPipeline, PlaybackSlot, PoolAction,
    ScheduledFilter, SlotState, Track, TrackId, TrackUpdate, DROP_COOLDOWN_SECS,
    DROP_EFFECT_SECS, DROP_THRESHOLD, FILTER_FADE_SECS, LOADING_TITLE, MAX_SCHEDULED_FILTERS,
};
pub use sim::SimulatedEngine;
pub use transition::{
    beatmatch_eligible, current_volume, next_volume, phrase_aligned_trigger, phrase_secs,
    BandEnergy, TransitionPhase, TransitionScheduler, TransitionSession, Volumes,
    BEATMATCH_TOLERANCE, BEATS_PER_PHRASE, DEFAULT_BPM, DELAY_BUILD_SECS, FRONT_CENTER,
    FULL_VOLUME_REMAINING_SECS, NEXT_VOLUME_FLOOR, TRANSITION_WINDOW_SECS,
};
