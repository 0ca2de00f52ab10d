//! Scheduled transient filters on the dynamic pool
//!
//! Dynamics analysis asks for filters at absolute playback times. An entry
//! claims one of the chain's pool biquads when the playback clock reaches
//! `apply_at`, fades out after `duration`, and gives the biquad back once the
//! fade-out has finished. When every biquad is held, the live filter closest
//! to its end is evicted.

use autodj_analysis::advisor::TimedFilterSpec;
use autodj_analysis::FilterSpec;

use crate::graph::DYNAMIC_POOL_SIZE;

/// Most entries kept at once; the oldest pending entry gives way
pub const MAX_SCHEDULED_FILTERS: usize = 16;

/// Fade in and fade out time of a pool filter
pub const FILTER_FADE_SECS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledFilter {
    /// Pool biquad held by the entry, once applied
    pub slot: Option<usize>,
    pub filter: FilterSpec,
    /// Playback second to fade in at
    pub apply_at: f64,
    pub duration: f64,
    pub fading: bool,
}

impl ScheduledFilter {
    pub fn applied(&self) -> bool {
        self.slot.is_some()
    }

    pub fn fade_at(&self) -> f64 {
        self.apply_at + self.duration
    }

    pub fn expires_at(&self) -> f64 {
        self.fade_at() + FILTER_FADE_SECS
    }
}

/// What the chain should do now
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PoolAction {
    Apply { slot: usize, filter: FilterSpec },
    FadeOut { slot: usize },
}

#[derive(Debug, Default)]
pub struct DynamicFilterPool {
    entries: Vec<ScheduledFilter>,
    next_slot: usize,
}

impl DynamicFilterPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ScheduledFilter] {
        &self.entries
    }

    pub fn schedule(&mut self, filters: &[TimedFilterSpec]) {
        for timed in filters {
            if self.entries.len() >= MAX_SCHEDULED_FILTERS {
                let oldest = self.entries.iter().position(|e| !e.applied()).unwrap_or(0);
                self.entries.remove(oldest);
            }
            self.entries.push(ScheduledFilter {
                slot: None,
                filter: timed.filter,
                apply_at: timed.apply_at,
                duration: timed.duration.max(0.0),
                fading: false,
            });
        }
    }

    /// Advance to `position` (playback seconds) and collect due actions
    pub fn process(&mut self, position: f64) -> Vec<PoolAction> {
        let mut actions = Vec::new();
        for entry in self.entries.iter_mut() {
            if let Some(slot) = entry.slot {
                if !entry.fading && position >= entry.fade_at() {
                    entry.fading = true;
                    actions.push(PoolAction::FadeOut { slot });
                }
            }
        }
        // Finished fades, and pending entries whose hold time already passed
        self.entries.retain(|e| {
            if e.applied() {
                position < e.expires_at()
            } else {
                position < e.fade_at()
            }
        });

        while let Some(index) = self.next_due(position) {
            let mut entry = self.entries.remove(index);
            let slot = self.claim_slot();
            entry.slot = Some(slot);
            actions.push(PoolAction::Apply {
                slot,
                filter: entry.filter,
            });
            self.entries.push(entry);
        }
        actions
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.next_slot = 0;
    }

    /// Earliest pending entry that should be sounding
    fn next_due(&self, position: f64) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.applied() && position >= e.apply_at)
            .min_by(|a, b| a.1.apply_at.total_cmp(&b.1.apply_at))
            .map(|(i, _)| i)
    }

    /// A free biquad, or the one whose filter ends soonest
    fn claim_slot(&mut self) -> usize {
        let free = (0..DYNAMIC_POOL_SIZE)
            .map(|i| (self.next_slot + i) % DYNAMIC_POOL_SIZE)
            .find(|&slot| !self.entries.iter().any(|e| e.slot == Some(slot)));

        let slot = match free {
            Some(slot) => slot,
            None => {
                let victim = self
                    .entries
                    .iter()
                    .enumerate()
                    .filter_map(|(i, e)| e.slot.map(|slot| (i, slot, e.expires_at())))
                    .min_by(|a, b| a.2.total_cmp(&b.2));
                match victim {
                    Some((index, slot, _)) => {
                        self.entries.remove(index);
                        slot
                    }
                    None => self.next_slot,
                }
            }
        };
        self.next_slot = (slot + 1) % DYNAMIC_POOL_SIZE;
        slot
    }
}
