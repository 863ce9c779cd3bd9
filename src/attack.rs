/// Stuff about attackers
use std::collections::{HashMap, VecDeque};

use chrono::{NaiveDateTime, TimeDelta};

use crate::authlog::FailureEvent;

/// Which count to keep for an IP that crosses the threshold more than once
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CountMode {
    /// The in-window count at the last event that met the threshold
    #[default]
    Last,
    /// The largest in-window count ever observed
    Max,
}

/// Recent failed attempts of one attacker, oldest first
#[derive(Clone, Debug, Default)]
pub struct AttemptWindow {
    attempts: VecDeque<NaiveDateTime>,
}

impl AttemptWindow {
    /// Record a new failed attempt
    pub fn record_attempt(&mut self, timestamp: NaiveDateTime) {
        self.attempts.push_back(timestamp);
    }

    /// Evict attempts more than `window` older than `now`
    pub fn evict_old_attempts(&mut self, now: NaiveDateTime, window: TimeDelta) {
        while let Some(&oldest) = self.attempts.front()
            && now - oldest > window
        {
            self.attempts.pop_front();
        }
    }

    /// Number of attempts currently in the window
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &NaiveDateTime> {
        self.attempts.iter()
    }
}

/// Single-pass sliding window counter over a time-ordered event stream
///
/// Events must arrive in chronological order. Out-of-order input is not
/// rejected, but the resulting counts no longer describe a sliding window.
#[derive(Debug)]
pub struct Detector {
    threshold: usize,
    window: TimeDelta,
    mode: CountMode,
    /// ip -> attempts still inside the window
    attackers: HashMap<String, AttemptWindow>,
    /// ip -> recorded count
    offenders: HashMap<String, usize>,
}

impl Detector {
    pub fn new(threshold: u32, window_minutes: u32, mode: CountMode) -> Self {
        Self {
            threshold: usize::try_from(threshold).unwrap_or(usize::MAX),
            window: TimeDelta::minutes(i64::from(window_minutes)),
            mode,
            attackers: HashMap::new(),
            offenders: HashMap::new(),
        }
    }

    /// Feed one event; returns the in-window count for its IP afterwards
    pub fn observe(&mut self, event: &FailureEvent) -> usize {
        let window = self
            .attackers
            .entry(event.source_ip.clone())
            .or_default();
        window.record_attempt(event.timestamp);
        window.evict_old_attempts(event.timestamp, self.window);
        let attempts = window.len();
        if attempts >= self.threshold {
            log::debug!(
                "{} has {attempts} failures in window at {}",
                event.source_ip,
                event.timestamp
            );
            let recorded = self.offenders.entry(event.source_ip.clone()).or_insert(0);
            *recorded = match self.mode {
                CountMode::Last => attempts,
                CountMode::Max => attempts.max(*recorded),
            };
        }
        attempts
    }

    /// The live window of `ip`, if it has been seen
    #[cfg(test)]
    pub fn window(&self, ip: &str) -> Option<&AttemptWindow> {
        self.attackers.get(ip)
    }

    /// Consume the detector and return ip -> recorded count
    pub fn finish(self) -> HashMap<String, usize> {
        self.offenders
    }
}

/// Find every IP with at least `threshold` failures inside some `window_minutes` window
pub fn detect(
    events: &[FailureEvent],
    threshold: u32,
    window_minutes: u32,
    mode: CountMode,
) -> HashMap<String, usize> {
    let mut detector = Detector::new(threshold, window_minutes, mode);
    for event in events {
        detector.observe(event);
    }
    let offenders = detector.finish();
    log::info!(
        "{} offenders among {} failure events",
        offenders.len(),
        events.len()
    );
    offenders
}
