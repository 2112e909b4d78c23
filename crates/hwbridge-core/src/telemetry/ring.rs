//! Per-channel history
//!
//! Keeps the most recent readings of every channel seen on the link.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::protocol::TelemetryValue;

/// One reading received from the device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    /// Channel the reading arrived on
    pub channel: u16,
    /// Parsed value
    pub value: TelemetryValue,
    /// Host time at which the frame was parsed
    pub received_at: DateTime<Utc>,
}

impl TelemetryRecord {
    /// Record stamped with the current time
    pub fn new(channel: u16, value: TelemetryValue) -> Self {
        Self {
            channel,
            value,
            received_at: Utc::now(),
        }
    }
}

/// Fixed-capacity FIFO; the oldest record is evicted on overflow
#[derive(Debug, Clone)]
pub struct RingBuffer {
    capacity: usize,
    records: VecDeque<TelemetryRecord>,
}

impl RingBuffer {
    /// Create an empty ring holding at most `capacity` records (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    /// Append, evicting the oldest record when full
    pub fn push(&mut self, record: TelemetryRecord) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Maximum number of records held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records held
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Nothing recorded yet
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records, oldest first
    pub fn records(&self) -> impl Iterator<Item = &TelemetryRecord> {
        self.records.iter()
    }

    /// Most recent record
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.records.back()
    }
}

/// Rings for every channel seen so far, behind one lock.
///
/// The stream reader is the only writer. Queries copy out under the lock and
/// never wait on the link.
#[derive(Debug)]
pub struct TelemetryStore {
    capacity: usize,
    channels: Mutex<HashMap<u16, RingBuffer>>,
}

impl TelemetryStore {
    /// Store whose rings hold `capacity` records each
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u16, RingBuffer>> {
        // Every critical section leaves the map consistent, so a poisoned
        // lock is still safe to use
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Per-channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, creating the channel's ring on first sighting
    pub fn push(&self, record: TelemetryRecord) {
        let capacity = self.capacity;
        self.lock()
            .entry(record.channel)
            .or_insert_with(|| RingBuffer::new(capacity))
            .push(record);
    }

    /// Recent values of `channel`, most recent last; empty for unknown channels
    pub fn recent_values(&self, channel: u16) -> Vec<TelemetryValue> {
        self.lock()
            .get(&channel)
            .map(|ring| ring.records().map(|r| r.value.clone()).collect())
            .unwrap_or_default()
    }

    /// Recent records of `channel` with their timestamps, most recent last
    pub fn recent_records(&self, channel: u16) -> Vec<TelemetryRecord> {
        self.lock()
            .get(&channel)
            .map(|ring| ring.records().cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent record of `channel`
    pub fn latest(&self, channel: u16) -> Option<TelemetryRecord> {
        self.lock()
            .get(&channel)
            .and_then(|ring| ring.latest().cloned())
    }

    /// Channels seen so far, ascending
    pub fn channels(&self) -> Vec<u16> {
        let mut channels: Vec<u16> = self.lock().keys().copied().collect();
        channels.sort_unstable();
        channels
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(super::DEFAULT_RING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> TelemetryValue {
        TelemetryValue::Int(v)
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let mut ring = RingBuffer::new(3);
        for v in 0..5 {
            ring.push(TelemetryRecord::new(40, int(v)));
        }
        assert_eq!(ring.len(), 3);
        let values: Vec<_> = ring.records().map(|r| r.value.clone()).collect();
        assert_eq!(values, vec![int(2), int(3), int(4)]);
        assert_eq!(ring.latest().map(|r| r.value.clone()), Some(int(4)));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let ring = RingBuffer::new(0);
        assert_eq!(ring.capacity(), 1);
    }

    #[test]
    fn test_store_keeps_last_capacity_values() {
        let store = TelemetryStore::new(10);
        for v in 0..13 {
            store.push(TelemetryRecord::new(40, int(v)));
        }
        let expected: Vec<_> = (3..13).map(int).collect();
        assert_eq!(store.recent_values(40), expected);
    }

    #[test]
    fn test_unknown_channel_is_empty() {
        let store = TelemetryStore::default();
        assert!(store.recent_values(99).is_empty());
        assert!(store.latest(99).is_none());
    }

    #[test]
    fn test_channels_are_independent() {
        let store = TelemetryStore::new(2);
        store.push(TelemetryRecord::new(40, int(1)));
        store.push(TelemetryRecord::new(50, TelemetryValue::Float(21.5)));
        store.push(TelemetryRecord::new(40, int(2)));
        store.push(TelemetryRecord::new(40, int(3)));

        assert_eq!(store.channels(), vec![40, 50]);
        assert_eq!(store.recent_values(40), vec![int(2), int(3)]);
        assert_eq!(store.recent_values(50), vec![TelemetryValue::Float(21.5)]);

    }
}
