//! Transition scheduling
//!
//! A transition hands the mix from the current slot to the next one over a
//! window of `D = min(remaining, 20)` seconds, in four EQ phases:
//!
//! | Phase   | Span      | Incoming (next)     | Outgoing (current)        |
//! |---------|-----------|---------------------|---------------------------|
//! | Highs   | 0 - 25%   | high -12 -> 0 dB    |                           |
//! | Mids    | 25 - 50%  | mid -12 -> 0 dB     | high 0 -> -6 dB           |
//! | Bass    | 50 - 75%  | low -12 -> 0 dB     | mid 0 -> -6 dB            |
//! | Retire  | 75 - 100% |                     | low, mid, high -> -12 dB  |
//!
//! Volumes follow an equal-power curve, the panners glide the two tracks
//! past each other, and the outgoing delay grows over the final ten seconds.
//! Everything is scheduled up front on the engine clock when the session
//! starts; the pipeline only drives the per-source volumes each tick.

use std::f64::consts::FRAC_PI_2;

use crate::engine::AudioEngineHandle;
use crate::graph::{Control, EffectGraph, SpatialPoint};

/// Longest transition window in seconds
pub const TRANSITION_WINDOW_SECS: f64 = 20.0;

/// Tempo assumed for tracks without a detected BPM
pub const DEFAULT_BPM: f32 = 128.0;

/// Beats in one phrase
pub const BEATS_PER_PHRASE: f32 = 8.0;

/// Relative tempo difference under which two tracks could be beatmatched
pub const BEATMATCH_TOLERANCE: f32 = 0.1;

/// Quietest the incoming track gets while a session runs
pub const NEXT_VOLUME_FLOOR: f32 = 0.1;

/// Remaining time under which the incoming track is forced to full volume
pub const FULL_VOLUME_REMAINING_SECS: f64 = 0.5;

/// Length of the outgoing delay build-up
pub const DELAY_BUILD_SECS: f64 = 10.0;

/// Transition EQ cut at the end of a phase
const FULL_CUT_DB: f32 = -12.0;
const HALF_CUT_DB: f32 = -6.0;

/// Where a session is within its window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransitionPhase {
    /// Triggered, waiting for the next track
    Pending,
    Highs,
    Mids,
    Bass,
    Retire,
    Done,
}

impl TransitionPhase {
    /// Phase for a window progress of `p` (0.0 - 1.0)
    pub fn at_progress(p: f64) -> Self {
        if p < 0.25 {
            TransitionPhase::Highs
        } else if p < 0.5 {
            TransitionPhase::Mids
        } else if p < 0.75 {
            TransitionPhase::Bass
        } else if p < 1.0 {
            TransitionPhase::Retire
        } else {
            TransitionPhase::Done
        }
    }
}

/// The single in-flight transition
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionSession {
    /// Engine time the session was triggered
    pub triggered_at: f64,
    /// Engine time automation started (equals `triggered_at` until started)
    pub started_at: f64,
    pub duration_secs: f64,
    pub current_bpm: f32,
    pub next_bpm: f32,
    pub phase: TransitionPhase,
    pub started: bool,
    pub completed: bool,
}

impl TransitionSession {
    /// Window progress 0.0 - 1.0 (0.0 until started)
    pub fn progress(&self, now: f64) -> f64 {
        if !self.started || self.duration_secs <= 0.0 {
            return if self.started { 1.0 } else { 0.0 };
        }
        ((now - self.started_at) / self.duration_secs).clamp(0.0, 1.0)
    }

    /// Engine time the window closes
    pub fn ends_at(&self) -> f64 {
        self.started_at + self.duration_secs
    }
}

/// Per-source volumes for the two slots
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Volumes {
    pub current: f32,
    pub next: f32,
}

/// Short-term band energy used to shape the delay build-up
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BandEnergy {
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
}

/// Outgoing volume: `cos(p * pi/2)`
pub fn current_volume(progress: f64) -> f32 {
    (progress.clamp(0.0, 1.0) * FRAC_PI_2).cos().max(0.0) as f32
}

/// Incoming volume: `sin(p * pi/2)`, never below the floor
pub fn next_volume(progress: f64) -> f32 {
    ((progress.clamp(0.0, 1.0) * FRAC_PI_2).sin() as f32).max(NEXT_VOLUME_FLOOR)
}

/// Seconds in one phrase at `bpm`
pub fn phrase_secs(bpm: f32) -> f64 {
    let bpm = if bpm > 0.0 { bpm } else { DEFAULT_BPM };
    f64::from(60.0 / bpm * BEATS_PER_PHRASE)
}

/// Last phrase boundary at or before `duration - window`
pub fn phrase_aligned_trigger(duration: f64, bpm: f32, window: f64) -> f64 {
    let latest = (duration - window).max(0.0);
    let phrase = phrase_secs(bpm);
    (latest / phrase).floor() * phrase
}

/// Whether the tempos are close enough to beatmatch
pub fn beatmatch_eligible(a: f32, b: f32) -> bool {
    let slower = a.min(b);
    slower > 0.0 && (a - b).abs() / slower < BEATMATCH_TOLERANCE
}

/// Resting place of the playing track: ahead, slightly raised, facing the listener
pub const FRONT_CENTER: SpatialPoint = point([0.0, 0.5, -2.0], [0.0, 0.0, 1.0]);

/// Outgoing panner path: front, sweeping left and behind
const CURRENT_PATH: [SpatialPoint; 5] = [
    FRONT_CENTER,
    point([-1.0, 0.7, -1.5], [0.35, 0.0, 0.85]),
    point([-2.0, 0.6, -0.5], [0.7, 0.0, 0.7]),
    point([-2.5, 0.3, 0.5], [0.35, 0.0, -0.15]),
    point([-3.0, 0.0, 1.0], [0.0, 0.0, -1.0]),
];

/// Incoming panner path: from behind right into the front
const NEXT_PATH: [SpatialPoint; 5] = [
    point([3.0, -0.3, 1.0], [-0.7, 0.0, -0.7]),
    point([2.0, 0.0, 0.5], [-0.5, 0.0, -0.825]),
    point([1.0, 0.2, 0.0], [-0.3, 0.0, -0.95]),
    point([0.5, 0.4, -1.0], [-0.15, 0.0, 0.025]),
    FRONT_CENTER,
];

const fn point(position: [f32; 3], orientation: [f32; 3]) -> SpatialPoint {
    SpatialPoint {
        position,
        orientation,
    }
}

/// Owns the at-most-one transition session and schedules its automation
#[derive(Debug)]
pub struct TransitionScheduler {
    window_secs: f64,
    session: Option<TransitionSession>,
}

impl Default for TransitionScheduler {
    fn default() -> Self {
        Self::new(TRANSITION_WINDOW_SECS)
    }
}

impl TransitionScheduler {
    pub fn new(window_secs: f64) -> Self {
        Self {
            window_secs: window_secs.max(0.0),
            session: None,
        }
    }

    pub fn window_secs(&self) -> f64 {
        self.window_secs
    }

    pub fn session(&self) -> Option<&TransitionSession> {
        self.session.as_ref()
    }

    /// A session exists and has not completed
    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.completed)
    }

    /// Open a pending session. No-op (returns false) while one is active.
    pub fn trigger(&mut self, now: f64, remaining: f64, current_bpm: f32, next_bpm: f32) -> bool {
        if self.is_active() {
            return false;
        }
        let duration_secs = remaining.clamp(0.0, self.window_secs);
        tracing::info!(
            remaining,
            duration = duration_secs,
            current_bpm,
            next_bpm,
            "transition triggered"
        );
        self.session = Some(TransitionSession {
            triggered_at: now,
            started_at: now,
            duration_secs,
            current_bpm,
            next_bpm,
            phase: TransitionPhase::Pending,
            started: false,
            completed: false,
        });
        true
    }

    /// Schedule every automation of the pending session.
    ///
    /// The window is recomputed from `remaining` so a late start still ends
    /// with the outgoing track. Returns false when there is nothing to start.
    pub fn start(
        &mut self,
        engine: &mut dyn AudioEngineHandle,
        current: &EffectGraph,
        next: &EffectGraph,
        remaining: f64,
        energy: BandEnergy,
    ) -> bool {
        let window = self.window_secs;
        let Some(session) = self.session.as_mut().filter(|s| !s.started && !s.completed) else {
            return false;
        };

        let t0 = engine.current_time();
        let d = remaining.clamp(0.0, window);
        session.started_at = t0;
        session.duration_secs = d;
        session.started = true;
        session.phase = TransitionPhase::Highs;

        if beatmatch_eligible(session.current_bpm, session.next_bpm) {
            tracing::info!(
                current_bpm = session.current_bpm,
                next_bpm = session.next_bpm,
                "tempos within beatmatch range"
            );
        }

        schedule_eq(engine, current, next, t0, d);
        schedule_spatial(engine, current, next, t0, d);
        schedule_delay_build(engine, current, next, t0, remaining, energy);

        tracing::info!(duration = d, "transition started");
        true
    }

    /// Advance the session phase; returns the new phase when it changed
    pub fn update(&mut self, now: f64) -> Option<TransitionPhase> {
        let session = self.session.as_mut().filter(|s| s.started && !s.completed)?;
        let phase = TransitionPhase::at_progress(session.progress(now));
        if phase == session.phase {
            return None;
        }
        tracing::debug!(?phase, "transition phase");
        session.phase = phase;
        Some(phase)
    }

    /// Volumes for the two slots at `now`, given the outgoing track's
    /// remaining time. `None` while no session has started.
    pub fn volumes(&self, now: f64, remaining: f64) -> Option<Volumes> {
        let session = self.session.as_ref().filter(|s| s.started && !s.completed)?;
        let p = session.progress(now);
        let next = if remaining < FULL_VOLUME_REMAINING_SECS {
            1.0
        } else {
            next_volume(p)
        };
        Some(Volumes {
            current: current_volume(p),
            next,
        })
    }

    /// Mark the session completed and clear it
    pub fn complete(&mut self) -> Option<TransitionSession> {
        let mut session = self.session.take()?;
        session.completed = true;
        session.phase = TransitionPhase::Done;
        Some(session)
    }
}

fn schedule_eq(
    engine: &mut dyn AudioEngineHandle,
    current: &EffectGraph,
    next: &EffectGraph,
    t0: f64,
    d: f64,
) {
    let quarter = d / 4.0;

    // Incoming: every band starts cut, highs come in first
    next.ramp_from(engine, Control::TransitionHigh, FULL_CUT_DB, 0.0, quarter, t0);
    next.ramp_from(engine, Control::TransitionMid, FULL_CUT_DB, FULL_CUT_DB, 0.0, t0);
    next.ramp_from(engine, Control::TransitionLow, FULL_CUT_DB, FULL_CUT_DB, 0.0, t0);
    next.ramp(engine, Control::TransitionMid, 0.0, quarter, t0 + quarter);
    next.ramp(engine, Control::TransitionLow, 0.0, quarter, t0 + 2.0 * quarter);

    // Outgoing: highs, then mids, then everything
    current.ramp(engine, Control::TransitionHigh, HALF_CUT_DB, quarter, t0 + quarter);
    current.ramp(engine, Control::TransitionMid, HALF_CUT_DB, quarter, t0 + 2.0 * quarter);
    let retire = t0 + 3.0 * quarter;
    current.ramp(engine, Control::TransitionLow, FULL_CUT_DB, quarter, retire);
    current.ramp(engine, Control::TransitionHigh, FULL_CUT_DB, quarter, retire);
    current.ramp(engine, Control::TransitionMid, FULL_CUT_DB, quarter, retire);
}

fn schedule_spatial(
    engine: &mut dyn AudioEngineHandle,
    current: &EffectGraph,
    next: &EffectGraph,
    t0: f64,
    d: f64,
) {
    let at = |i: usize| t0 + d * i as f64 / 4.0;
    let current_path: Vec<_> = CURRENT_PATH.iter().enumerate().map(|(i, p)| (at(i), *p)).collect();
    let next_path: Vec<_> = NEXT_PATH.iter().enumerate().map(|(i, p)| (at(i), *p)).collect();
    current.glide_in_space(engine, &current_path);
    next.glide_in_space(engine, &next_path);

    current.ramp_from(engine, Control::ReverbWet, 0.3, 0.5, d, t0);
    current.ramp_from(engine, Control::Dry, 0.7, 0.5, d, t0);
}

/// Delay build-up over the outgoing track's final seconds.
///
/// With `p = 1 - remaining / 20`: time `0.2 + 0.3p + 0.1 bass`, feedback
/// `0.1 + 0.3p + 0.1 mid`, wet `0.1 + 0.3p + 0.1 high`, dry `1 - wet / 2`.
/// All four are linear in `p`, so one ramp per control reproduces them.
fn schedule_delay_build(
    engine: &mut dyn AudioEngineHandle,
    current: &EffectGraph,
    next: &EffectGraph,
    t0: f64,
    remaining: f64,
    energy: BandEnergy,
) {
    let end = t0 + remaining.max(0.0);
    let start = (end - DELAY_BUILD_SECS).max(t0);
    let p_at = |t: f64| (1.0 - (end - t) / TRANSITION_WINDOW_SECS).clamp(0.0, 1.0) as f32;
    let values = |p: f32| {
        let wet = 0.1 + 0.3 * p + 0.1 * energy.high;
        [
            (Control::DelayTime, 0.2 + 0.3 * p + 0.1 * energy.bass),
            (Control::DelayFeedback, 0.1 + 0.3 * p + 0.1 * energy.mid),
            (Control::DelayWet, wet),
            (Control::Dry, 1.0 - wet / 2.0),
        ]
    };

    let from = values(p_at(start));
    let to = values(p_at(end));
    for ((control, a), (_, b)) in from.into_iter().zip(to) {
        current.ramp_from(engine, control, a, b, end - start, start);
    }

    // The incoming track stays dry
    next.ramp_from(engine, Control::DelayWet, 0.0, 0.0, 0.0, t0);
    next.ramp_from(engine, Control::Dry, 1.0, 1.0, 0.0, t0);
}
