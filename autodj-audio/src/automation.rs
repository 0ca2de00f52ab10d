//! Parameter automation timelines
//!
//! Event-list automation in the style of Web Audio `AudioParam`:
//! a `SetValue` jumps at its time, a `LinearRamp` interpolates from the
//! previous event's value and time to its own. Both engines evaluate
//! parameters through this type so their schedules behave identically.

/// One scheduled automation event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AutomationEvent {
    SetValue { value: f32, time: f64 },
    LinearRamp { value: f32, time: f64 },
}

impl AutomationEvent {
    pub fn time(&self) -> f64 {
        match *self {
            AutomationEvent::SetValue { time, .. } | AutomationEvent::LinearRamp { time, .. } => time,
        }
    }

    /// Value held once the event has completed
    pub fn value(&self) -> f32 {
        match *self {
            AutomationEvent::SetValue { value, .. } | AutomationEvent::LinearRamp { value, .. } => {
                value
            }
        }
    }
}

/// Time-ordered automation events for one parameter
#[derive(Debug, Clone, PartialEq)]
pub struct AutomationTimeline {
    default: f32,
    events: Vec<AutomationEvent>,
}

impl AutomationTimeline {
    pub fn new(default: f32) -> Self {
        Self {
            default,
            events: Vec::new(),
        }
    }

    /// Scheduled events, sorted by time
    pub fn events(&self) -> &[AutomationEvent] {
        &self.events
    }

    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(AutomationEvent::SetValue { value, time });
    }

    /// Schedule a ramp ending at `time`.
    ///
    /// A ramp with no earlier event starts from the value held at `now`.
    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, time: f64, now: f64) {
        let has_start = self.events.iter().any(|e| e.time() <= time);
        if !has_start && now < time {
            let held = self.value_at(now);
            self.insert(AutomationEvent::SetValue { value: held, time: now });
        }
        self.insert(AutomationEvent::LinearRamp { value, time });
    }

    /// Remove every event at or after `from`
    pub fn cancel_scheduled_values(&mut self, from: f64) {
        self.events.retain(|e| e.time() < from);
    }

    /// Parameter value at `time`
    pub fn value_at(&self, time: f64) -> f32 {
        let Some(idx) = self.events.iter().rposition(|e| e.time() <= time) else {
            return self.default;
        };
        let prev = self.events[idx];
        match self.events.get(idx + 1) {
            Some(&AutomationEvent::LinearRamp { value, time: end }) if end > prev.time() => {
                let frac = ((time - prev.time()) / (end - prev.time())) as f32;
                prev.value() + (value - prev.value()) * frac
            }
            _ => prev.value(),
        }
    }

    /// Forget events that can no longer affect values at or after `time`
    pub fn prune_before(&mut self, time: f64) {
        let Some(idx) = self.events.iter().rposition(|e| e.time() <= time) else {
            return;
        };
        if idx == 0 {
            return;
        }
        let held = self.events[idx];
        self.events.drain(..idx);
        self.events[0] = AutomationEvent::SetValue {
            value: held.value(),
            time: held.time(),
        };
    }

    /// Events inserted after existing events with the same time
    fn insert(&mut self, event: AutomationEvent) {
        let pos = self
            .events
            .iter()
            .position(|e| e.time() > event.time())
            .unwrap_or(self.events.len());
        self.events.insert(pos, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_without_events() {
        let timeline = AutomationTimeline::new(0.5);
        assert_eq!(timeline.value_at(0.0), 0.5);
        assert_eq!(timeline.value_at(100.0), 0.5);
    }

    #[test]
    fn test_set_then_ramp() {
        let mut timeline = AutomationTimeline::new(0.0);
        timeline.set_value_at_time(-12.0, 10.0);
        timeline.linear_ramp_to_value_at_time(0.0, 15.0, 0.0);

        assert_eq!(timeline.value_at(5.0), 0.0);
        assert_eq!(timeline.value_at(10.0), -12.0);
        assert!((timeline.value_at(12.5) - -6.0).abs() < 1e-5);
        assert_eq!(timeline.value_at(15.0), 0.0);
        assert_eq!(timeline.value_at(30.0), 0.0);
    }

    #[test]
    fn test_unanchored_ramp_starts_now() {
        let mut timeline = AutomationTimeline::new(1.0);
        timeline.linear_ramp_to_value_at_time(0.0, 4.0, 2.0);
        assert_eq!(timeline.value_at(2.0), 1.0);
        assert!((timeline.value_at(3.0) - 0.5).abs() < 1e-6);
        assert_eq!(timeline.value_at(4.0), 0.0);
    }

    #[test]
    fn test_cancel_scheduled_values() {
        let mut timeline = AutomationTimeline::new(0.0);
        timeline.set_value_at_time(1.0, 1.0);
        timeline.linear_ramp_to_value_at_time(2.0, 3.0, 0.0);
        timeline.set_value_at_time(5.0, 4.0);

        timeline.cancel_scheduled_values(3.0);
        assert_eq!(timeline.events().len(), 1);
        assert_eq!(timeline.value_at(4.0), 1.0);
    }

    #[test]
    fn test_same_time_events_keep_order() {
        let mut timeline = AutomationTimeline::new(0.0);
        timeline.set_value_at_time(1.0, 2.0);
        timeline.set_value_at_time(3.0, 2.0);
        assert_eq!(timeline.value_at(2.0), 3.0);
    }

    #[test]
    fn test_prune_keeps_future_values() {
        let mut timeline = AutomationTimeline::new(0.0);
        timeline.set_value_at_time(1.0, 1.0);
        timeline.linear_ramp_to_value_at_time(3.0, 2.0, 0.0);
        timeline.linear_ramp_to_value_at_time(1.0, 6.0, 0.0);

        let before = timeline.value_at(4.0);
        timeline.prune_before(3.0);
        assert_eq!(timeline.events().len(), 2);
        assert!((timeline.value_at(4.0) - before).abs() < 1e-6);
        assert_eq!(timeline.value_at(6.0), 1.0);
    }
}
