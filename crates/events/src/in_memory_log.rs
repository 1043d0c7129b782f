//! In-memory partitioned log for tests/dev.
//!
//! Behaves like the durable transport where it matters to consumers:
//! - records are partitioned by key hash and ordered within a partition
//! - each consumer group tracks its own committed offset per partition
//! - a fetched but uncommitted record is fetched again
//!
//! No persistence. Failure injection via [`InMemoryLog::set_unavailable`].

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::bus::{LogTransport, Record, TransportError};
use crate::catalog::CatalogEvent;
use crate::envelope::EventEnvelope;

pub const DEFAULT_PARTITIONS: u32 = 4;

type GroupPartition = (String, String, u32);

#[derive(Debug, Clone)]
struct StoredRecord {
    seq: u64,
    key: String,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct LogState {
    next_seq: u64,
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    /// Next offset to deliver, per (group, topic, partition).
    committed: HashMap<GroupPartition, u64>,
    /// Highest offset handed out, per (group, topic, partition).
    delivered: HashMap<GroupPartition, u64>,
    /// Partition to try first on the next fetch, per (group, topic).
    cursor: HashMap<(String, String), u32>,
    unavailable: bool,
}

#[derive(Debug)]
pub struct InMemoryLog {
    partitions: u32,
    state: Mutex<LogState>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    pub fn with_partitions(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            state: Mutex::new(LogState::default()),
        }
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Partition a key maps to.
    pub fn partition_for(&self, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % u64::from(self.partitions)) as u32
    }

    /// Make every operation fail with [`TransportError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.unavailable = unavailable;
        }
    }

    /// Raw payloads of `topic` in append order, across partitions.
    pub fn payloads(&self, topic: &str) -> Vec<Vec<u8>> {
        let Ok(state) = self.state.lock() else {
            return vec![];
        };
        let mut all: Vec<&StoredRecord> = state
            .topics
            .get(topic)
            .map(|parts| parts.iter().flatten().collect())
            .unwrap_or_default();
        all.sort_by_key(|r| r.seq);
        all.into_iter().map(|r| r.payload.clone()).collect()
    }

    /// Decoded envelopes of `E`'s topic in append order.
    pub fn envelopes<E: CatalogEvent>(&self) -> Vec<EventEnvelope<E>> {
        self.payloads(E::KIND.topic())
            .iter()
            .filter_map(|p| serde_json::from_slice(p).ok())
            .collect()
    }

    /// Records on `topic` that `group` has not committed yet.
    pub fn lag(&self, topic: &str, group: &str) -> u64 {
        let Ok(state) = self.state.lock() else {
            return 0;
        };
        let Some(parts) = state.topics.get(topic) else {
            return 0;
        };
        parts
            .iter()
            .enumerate()
            .map(|(p, records)| {
                let key = (group.to_string(), topic.to_string(), p as u32);
                let committed = state.committed.get(&key).copied().unwrap_or(0);
                (records.len() as u64).saturating_sub(committed)
            })
            .sum()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LogState>, TransportError> {
        let state = self
            .state
            .lock()
            .map_err(|_| TransportError::Unavailable("in-memory log lock poisoned".into()))?;
        if state.unavailable {
            return Err(TransportError::Unavailable("in-memory log marked unavailable".into()));
        }
        Ok(state)
    }
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogTransport for InMemoryLog {
    async fn append(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let partition = self.partition_for(key) as usize;
        let partitions = self.partitions as usize;
        let mut state = self.lock()?;

        let seq = state.next_seq;
        state.next_seq += 1;

        let parts = state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions]);
        parts[partition].push(StoredRecord {
            seq,
            key: key.to_string(),
            payload,
        });
        Ok(())
    }

    async fn fetch(&self, topic: &str, group: &str) -> Result<Option<Record>, TransportError> {
        let mut state = self.lock()?;
        let state = &mut *state;

        let Some(parts) = state.topics.get(topic) else {
            return Ok(None);
        };

        let cursor_key = (group.to_string(), topic.to_string());
        let start = state.cursor.get(&cursor_key).copied().unwrap_or(0);

        for i in 0..self.partitions {
            let partition = (start + i) % self.partitions;
            let gp = (group.to_string(), topic.to_string(), partition);
            let offset = state.committed.get(&gp).copied().unwrap_or(0);

            let Some(stored) = parts[partition as usize].get(offset as usize) else {
                continue;
            };

            let redelivered = state.delivered.get(&gp).is_some_and(|d| *d >= offset);
            state.delivered.insert(gp, offset);
            state.cursor.insert(cursor_key, (partition + 1) % self.partitions);

            return Ok(Some(Record {
                topic: topic.to_string(),
                partition,
                position: offset.to_string(),
                key: stored.key.clone(),
                payload: stored.payload.clone(),
                redelivered,
            }));
        }

        Ok(None)
    }

    async fn commit(&self, group: &str, record: &Record) -> Result<(), TransportError> {
        let offset: u64 = record
            .position
            .parse()
            .map_err(|_| TransportError::InvalidRecord(format!("bad offset {}", record.position)))?;

        let mut state = self.lock()?;
        let gp = (group.to_string(), record.topic.clone(), record.partition);
        let next = state.committed.entry(gp).or_insert(0);
        *next = (*next).max(offset + 1);
        Ok(())
    }
}
