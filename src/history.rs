use std::collections::VecDeque;
use std::time::{Duration, Instant};


/// Default amount of history kept.
pub const HISTORY_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub timestamp: Instant,
    pub heart_rate: u16,
}

impl Reading {
    pub fn new(timestamp: Instant, heart_rate: u16) -> Self {
        Reading { timestamp, heart_rate }
    }
}

/// Readings in insertion order, trimmed by age on every insertion.
///
/// The cutoff is measured from the timestamp of the reading just recorded, not from a fresh
/// clock sample, so the same sequence of timestamps always leaves the same contents.
#[derive(Debug, Clone)]
pub struct RetentionWindow {
    window: Duration,
    readings: VecDeque<Reading>,
}

impl RetentionWindow {
    pub fn new(window: Duration) -> Self {
        RetentionWindow {
            window,
            readings: VecDeque::new(),
        }
    }

    /// Appends `reading`, then drops everything older than `reading.timestamp - window`.
    /// Returns how many readings were evicted.
    pub fn record(&mut self, reading: Reading) -> usize {
        self.readings.push_back(reading);

        let newest = reading.timestamp;
        let window = self.window;
        let before = self.readings.len();
        // saturating_duration_since is zero for readings newer than `newest`, so an
        // out-of-order insertion never evicts anything after it.
        self.readings
            .retain(|r| newest.saturating_duration_since(r.timestamp) <= window);
        before - self.readings.len()
    }

    pub fn snapshot(&self) -> Vec<Reading> {
        self.readings.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.readings.back()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

impl Default for RetentionWindow {
    fn default() -> Self {
        RetentionWindow::new(HISTORY_WINDOW)
    }
}
