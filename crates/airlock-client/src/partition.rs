//! Per-routing-key accumulation of records pending dispatch.

use airlock_core::error::{Error as CoreError, Result as CoreResult};
use airlock_core::Record;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Empty partitions idle past this are removed during a drain.
const IDLE_PARTITION_GRACE: Duration = Duration::from_secs(60);

struct Partition {
    records: Vec<Record>,
    bytes: usize,
    last_touch: Instant,
    /// Set under the partition mutex when a drain removes the entry, so a
    /// racing append re-registers instead of writing into an orphan.
    retired: bool,
}

impl Partition {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            bytes: 0,
            last_touch: Instant::now(),
            retired: false,
        }
    }
}

/// Keyed store of partitions with byte accounting against the ceiling.
///
/// Appends to different keys contend only on the map lock; within one key
/// the partition mutex serializes inserts so a drain never races a
/// half-appended record. `drain_all` detaches contents atomically and
/// leaves every partition immediately writable.
pub struct PartitionStore {
    partitions: RwLock<HashMap<String, Arc<Mutex<Partition>>>>,
    resident_bytes: AtomicUsize,
    memory_ceiling: usize,
    idle_grace: Duration,
}

impl PartitionStore {
    pub fn new(memory_ceiling: usize) -> Self {
        Self::with_idle_grace(memory_ceiling, IDLE_PARTITION_GRACE)
    }

    pub fn with_idle_grace(memory_ceiling: usize, idle_grace: Duration) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            resident_bytes: AtomicUsize::new(0),
            memory_ceiling,
            idle_grace,
        }
    }

    /// Append a record to its routing key's partition.
    ///
    /// Rejects with `CapacityExceeded` when accepting the record would pass
    /// the global ceiling or the partition's share of it (ceiling divided
    /// by live partitions, evaluated now). A rejected record is dropped
    /// here, returning its buffer to the arena.
    pub fn append(&self, routing_key: &str, record: Record) -> CoreResult<()> {
        let len = record.len();

        loop {
            let partition = {
                let map = self.partitions.read();
                map.get(routing_key).cloned()
            };
            let partition = match partition {
                Some(p) => p,
                None => {
                    let mut map = self.partitions.write();
                    map.entry(routing_key.to_string())
                        .or_insert_with(|| Arc::new(Mutex::new(Partition::new())))
                        .clone()
                }
            };

            let share = self.memory_ceiling / self.partition_count().max(1);

            let mut p = partition.lock();
            if p.retired {
                // A drain recycled this partition between lookup and lock.
                continue;
            }
            if p.bytes + len > share {
                return Err(CoreError::CapacityExceeded { requested: len });
            }
            if !self.try_reserve(len) {
                return Err(CoreError::CapacityExceeded { requested: len });
            }
            p.bytes += len;
            p.last_touch = Instant::now();
            p.records.push(record);
            return Ok(());
        }
    }

    /// Detach the contents of every non-empty partition.
    ///
    /// Partitions stay registered and writable; empty ones idle past the
    /// grace period are removed. Cross-key order of the result is
    /// unspecified, record order within a key is push order.
    pub fn drain_all(&self) -> Vec<(String, Vec<Record>)> {
        let mut drained = Vec::new();
        let mut map = self.partitions.write();
        map.retain(|key, slot| {
            let mut p = slot.lock();
            if p.records.is_empty() {
                if p.last_touch.elapsed() < self.idle_grace {
                    return true;
                }
                p.retired = true;
                return false;
            }
            let records = std::mem::take(&mut p.records);
            self.resident_bytes.fetch_sub(p.bytes, Ordering::AcqRel);
            p.bytes = 0;
            p.last_touch = Instant::now();
            drained.push((key.clone(), records));
            true
        });
        drained
    }

    /// Bytes currently resident across all partitions.
    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes.load(Ordering::Relaxed)
    }

    /// Number of live partitions.
    pub fn partition_count(&self) -> usize {
        self.partitions.read().len()
    }

    fn try_reserve(&self, bytes: usize) -> bool {
        let mut current = self.resident_bytes.load(Ordering::Relaxed);
        loop {
            let Some(next) = current.checked_add(bytes) else {
                return false;
            };
            if next > self.memory_ceiling {
                return false;
            }
            match self.resident_bytes.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}
