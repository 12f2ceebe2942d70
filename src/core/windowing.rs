//! Bounded time-series of per-poll samples.
//!
//! One sample is appended per successful poll. The series keeps only the most
//! recent [`SERIES_CAPACITY`] samples, evicting the oldest first.

use crate::core::summary::SessionSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum number of samples retained.
pub const SERIES_CAPACITY: usize = 20;

/// Lowest value [`TimeSeries::max_value`] will report.
pub const MIN_SCALE: u64 = 5;

/// Aggregate counts captured at one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesSample {
    /// When the poll completed
    pub captured_at: DateTime<Utc>,
    pub total: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

impl TimeSeriesSample {
    pub fn new(captured_at: DateTime<Utc>, summary: &SessionSummary) -> Self {
        Self {
            captured_at,
            total: summary.total,
            high: summary.high,
            medium: summary.medium,
            low: summary.low,
        }
    }

    /// Largest of the four counts.
    pub fn peak(&self) -> u64 {
        self.total.max(self.high).max(self.medium).max(self.low)
    }
}

/// Fixed-capacity series in append order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSeries {
    samples: VecDeque<TimeSeriesSample>,
    capacity: usize,
}

impl Default for TimeSeries {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::with_capacity(SERIES_CAPACITY)
    }

    /// Series with a custom bound. A capacity of 0 is raised to 1.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting from the front while over capacity.
    pub fn append(&mut self, sample: TimeSeriesSample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Display scale: the largest count across all samples, never below
    /// [`MIN_SCALE`].
    pub fn max_value(&self) -> u64 {
        self.samples
            .iter()
            .map(TimeSeriesSample::peak)
            .fold(MIN_SCALE, u64::max)
    }

    pub fn latest(&self) -> Option<&TimeSeriesSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimeSeriesSample> {
        self.samples.iter()
    }

    pub fn to_vec(&self) -> Vec<TimeSeriesSample> {
        self.samples.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
