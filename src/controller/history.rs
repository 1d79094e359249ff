use super::reading::Reading;
use serde::Serialize;
use std::collections::VecDeque;

/// One "latest" slot plus twenty previous readings.
pub const HISTORY_CAPACITY: usize = 21;

/// Newest-first, bounded sequence of readings.
///
/// The length never exceeds [`HISTORY_CAPACITY`]; inserting into a full history drops
/// the oldest reading.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ReadingHistory {
    readings: VecDeque<Reading>,
}

impl ReadingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the history with `reading` in front and the tail cut at capacity.
    #[must_use]
    pub fn prepend_and_cap(mut self, reading: Reading) -> Self {
        self.readings.push_front(reading);
        self.readings.truncate(HISTORY_CAPACITY);
        self
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.readings.front()
    }

    /// Everything but the latest reading, newest first.
    pub fn previous(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter().skip(1)
    }

    pub fn get(&self, index: usize) -> Option<&Reading> {
        self.readings.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}
