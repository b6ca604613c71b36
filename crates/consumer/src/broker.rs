//! Message broker abstraction with manual offset commit.
//!
//! Messages are partitioned by key and each partition is an append-only
//! log. A consumer reads a partition sequentially and commits an offset
//! only after the message at that offset was processed. Seeking back to the
//! committed offset redelivers everything after it, in order. Committed
//! messages are dropped from the log; offsets keep counting from where the
//! log started.

use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::error::{ConsumerError, Result};

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub partition: usize,
    pub offset: u64,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

/// Publishes messages to a topic.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()>;
}

/// Source of partitioned messages with at-least-once delivery.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Number of partitions; valid partition numbers are `0..partitions()`.
    fn partitions(&self) -> usize;

    /// Waits for the next message on `partition`.
    async fn poll(&self, partition: usize) -> Result<Delivery>;

    /// Marks `delivery` and every earlier message of its partition processed.
    async fn commit(&self, delivery: &Delivery) -> Result<()>;

    /// Rewinds the partition to its committed offset so every uncommitted
    /// message is delivered again.
    async fn seek_to_committed(&self, partition: usize) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Record {
    topic: String,
    key: String,
    payload: Vec<u8>,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct PartitionLog {
    /// Uncommitted messages; `records[0]` sits at offset `base`.
    records: VecDeque<Record>,
    base: u64,
    /// Next offset handed to the consumer.
    position: u64,
    /// Offset of the first unprocessed message.
    committed: u64,
}

impl PartitionLog {
    /// Offset the next published message gets.
    fn end(&self) -> u64 {
        self.base + self.records.len() as u64
    }

    fn next(&mut self, partition: usize) -> Option<Delivery> {
        let offset = self.position.max(self.base);
        let record = self.records.get_mut((offset - self.base) as usize)?;
        record.deliveries += 1;
        self.position = offset + 1;
        Some(Delivery {
            topic: record.topic.clone(),
            key: record.key.clone(),
            payload: record.payload.clone(),
            partition,
            offset,
            attempt: record.deliveries,
        })
    }

    fn lag(&self) -> u64 {
        self.end() - self.committed
    }

    fn commit(&mut self, offset: u64) {
        self.committed = self.committed.max(offset + 1).min(self.end());
        while self.base < self.committed && self.records.pop_front().is_some() {
            self.base += 1;
        }
    }
}

#[derive(Debug, Default)]
struct Partition {
    log: Mutex<PartitionLog>,
    notify: Notify,
}

/// In-process broker with Kafka-style partitions and manual commit.
///
/// Used in tests and single-process runs. A partition must have a single
/// consumer at a time.
#[derive(Clone)]
pub struct InMemoryBroker {
    partitions: Arc<Vec<Partition>>,
}

impl InMemoryBroker {
    /// Creates a broker with `partitions` partitions (at least one).
    pub fn new(partitions: usize) -> Self {
        let partitions = (0..partitions.max(1)).map(|_| Partition::default()).collect();
        Self {
            partitions: Arc::new(partitions),
        }
    }

    /// Partition a key is routed to.
    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions.len() as u64) as usize
    }

    /// Messages published but not yet committed, across all partitions.
    pub async fn lag(&self) -> u64 {
        let mut total = 0;
        for partition in self.partitions.iter() {
            total += partition.log.lock().await.lag();
        }
        total
    }

    /// Messages published so far, across all partitions.
    pub async fn published(&self) -> usize {
        let mut total = 0;
        for partition in self.partitions.iter() {
            total += partition.log.lock().await.end() as usize;
        }
        total
    }

    /// Messages still held in memory, across all partitions.
    pub async fn retained(&self) -> usize {
        let mut total = 0;
        for partition in self.partitions.iter() {
            total += partition.log.lock().await.records.len();
        }
        total
    }

    fn partition(&self, partition: usize) -> Result<&Partition> {
        self.partitions
            .get(partition)
            .ok_or_else(|| ConsumerError::Broker(format!("no partition {partition}")))
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        let index = self.partition_for(key);
        let partition = self.partition(index)?;
        partition.log.lock().await.records.push_back(Record {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
            deliveries: 0,
        });
        partition.notify.notify_one();
        tracing::debug!(topic, key, partition = index, "message published");
        Ok(())
    }
}

#[async_trait]
impl EventSource for InMemoryBroker {
    fn partitions(&self) -> usize {
        self.partitions.len()
    }

    async fn poll(&self, partition: usize) -> Result<Delivery> {
        let part = self.partition(partition)?;
        loop {
            if let Some(delivery) = part.log.lock().await.next(partition) {
                return Ok(delivery);
            }
            part.notify.notified().await;
        }
    }

    async fn commit(&self, delivery: &Delivery) -> Result<()> {
        let part = self.partition(delivery.partition)?;
        part.log.lock().await.commit(delivery.offset);
        Ok(())
    }

    async fn seek_to_committed(&self, partition: usize) -> Result<()> {
        let part = self.partition(partition)?;
        let mut log = part.log.lock().await;
        log.position = log.committed;
        if log.position < log.end() {
            part.notify.notify_one();
        }
        Ok(())
    }
}
