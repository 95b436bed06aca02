//! Pooled buffer arena with size-class bucketing and a hard memory ceiling.
//!
//! Buffers are checked out with [`BufferPool::acquire`] and return to the
//! arena when the [`PooledBuffer`] handle drops. Ownership of a checked-out
//! buffer is exclusive at every step; the arena never hands the same buffer
//! to two holders. Size classes are powers of two from 4 KB to 64 MB;
//! requests above the largest class are satisfied with an exact-size
//! allocation that is charged against the ceiling but never pooled.
//!
//! The ceiling is the single source of truth for bytes owned by the arena,
//! free or checked out. Once allocating another buffer would pass it,
//! acquisition fails and the caller is expected to fail closed. A
//! `dispatch_reserve` band at the top of the ceiling can be kept reachable
//! only through [`BufferPool::acquire_reserved`], so outbound batch
//! assembly still gets a buffer when intake has saturated the rest.

use bytes::BytesMut;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Smallest pooled size class.
const MIN_CLASS_SIZE: usize = 4 * 1024;
/// Largest pooled size class; bigger buffers are allocated ad hoc.
const MAX_CLASS_SIZE: usize = 64 * 1024 * 1024;
/// Number of power-of-two classes between the two bounds, inclusive.
const CLASS_COUNT: usize =
    (MAX_CLASS_SIZE.trailing_zeros() - MIN_CLASS_SIZE.trailing_zeros() + 1) as usize;

/// Per-class park limit: released buffers past this are freed instead.
const PARK_LIMIT: usize = 64;

/// Size class for a requested capacity, or `None` for the ad-hoc path.
fn class_index(size: usize) -> Option<usize> {
    if size > MAX_CLASS_SIZE {
        return None;
    }
    let rounded = size.max(MIN_CLASS_SIZE).next_power_of_two();
    Some((rounded.trailing_zeros() - MIN_CLASS_SIZE.trailing_zeros()) as usize)
}

/// Buffer capacity of a size class.
fn class_capacity(index: usize) -> usize {
    MIN_CLASS_SIZE << index
}

/// Arena configuration.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Capacity of each pre-warmed buffer (rounded up to its size class).
    pub initial_buffer_size: usize,
    /// Number of buffers to pre-warm the arena with.
    pub initial_buffers_count: usize,
    /// Hard ceiling on bytes owned by the arena, free or checked out.
    pub memory_ceiling: usize,
    /// Bytes at the top of the ceiling reachable only via `acquire_reserved`.
    pub dispatch_reserve: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            initial_buffer_size: 1024 * 1024,
            initial_buffers_count: 8,
            memory_ceiling: 128 * 1024 * 1024,
            dispatch_reserve: 0,
        }
    }
}

#[derive(Debug, Default)]
struct PoolStats {
    acquires: AtomicU64,
    reuses: AtomicU64,
    allocations: AtomicU64,
    refusals: AtomicU64,
    returns: AtomicU64,
    peak_bytes: AtomicUsize,
}

/// Point-in-time view of arena activity.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStatsSnapshot {
    /// Total acquire calls.
    pub acquires: u64,
    /// Acquires satisfied by a previously released buffer.
    pub reuses: u64,
    /// Acquires that allocated a fresh buffer.
    pub allocations: u64,
    /// Acquires refused at the memory ceiling.
    pub refusals: u64,
    /// Buffers returned to the arena.
    pub returns: u64,
    /// Bytes currently owned by the arena.
    pub resident_bytes: usize,
    /// High-water mark of owned bytes.
    pub peak_bytes: usize,
}

/// Size-class-bucketed checkout/return arena.
pub struct BufferPool {
    classes: Vec<(Sender<BytesMut>, Receiver<BytesMut>)>,
    total_bytes: AtomicUsize,
    memory_ceiling: usize,
    intake_limit: usize,
    stats: PoolStats,
    /// Self-handle so checked-out buffers can find their way home.
    this: Weak<BufferPool>,
}

impl BufferPool {
    /// Create an arena and pre-warm it per the configuration.
    ///
    /// Pre-warming stops early rather than charge past the ceiling.
    pub fn new(config: BufferPoolConfig) -> Arc<Self> {
        let pool = Arc::new_cyclic(|this| Self {
            classes: (0..CLASS_COUNT)
                .map(|_| bounded(PARK_LIMIT.max(config.initial_buffers_count)))
                .collect(),
            total_bytes: AtomicUsize::new(0),
            memory_ceiling: config.memory_ceiling,
            intake_limit: config.memory_ceiling.saturating_sub(config.dispatch_reserve),
            stats: PoolStats::default(),
            this: this.clone(),
        });

        let warm_size = config.initial_buffer_size.min(MAX_CLASS_SIZE);
        if let Some(idx) = class_index(warm_size) {
            let capacity = class_capacity(idx);
            for _ in 0..config.initial_buffers_count {
                if !pool.try_charge(capacity, pool.memory_ceiling) {
                    break;
                }
                let _ = pool.classes[idx].0.try_send(BytesMut::with_capacity(capacity));
            }
        }

        pool
    }

    /// Acquire a buffer of at least `min_size` capacity.
    ///
    /// Reuses a released buffer of sufficient size when one exists, else
    /// allocates, unless charging the new capacity would pass the portion
    /// of the ceiling open to intake, in which case `None`.
    pub fn acquire(&self, min_size: usize) -> Option<PooledBuffer> {
        self.acquire_limited(min_size, self.intake_limit)
    }

    /// Acquire with access to the dispatch reserve band.
    ///
    /// Same contract as [`acquire`](Self::acquire) but allowed to charge up
    /// to the full ceiling. Used for outbound batch assembly.
    pub fn acquire_reserved(&self, min_size: usize) -> Option<PooledBuffer> {
        self.acquire_limited(min_size, self.memory_ceiling)
    }

    fn acquire_limited(&self, min_size: usize, limit: usize) -> Option<PooledBuffer> {
        self.stats.acquires.fetch_add(1, Ordering::Relaxed);
        // Upgrading cannot fail: callers reach the pool through the Arc the
        // handle will hold.
        let pool = self.this.upgrade()?;

        let Some(idx) = class_index(min_size) else {
            // Ad-hoc path: exact-size allocation, never pooled.
            if !self.try_charge(min_size, limit) {
                self.stats.refusals.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            self.stats.allocations.fetch_add(1, Ordering::Relaxed);
            return Some(PooledBuffer {
                buf: Some(BytesMut::with_capacity(min_size)),
                charged: min_size,
                pooled: false,
                pool,
            });
        };

        // Any class at or above the request is "of sufficient size".
        for i in idx..CLASS_COUNT {
            if let Ok(mut buf) = self.classes[i].1.try_recv() {
                buf.clear();
                self.stats.reuses.fetch_add(1, Ordering::Relaxed);
                return Some(PooledBuffer {
                    buf: Some(buf),
                    charged: class_capacity(i),
                    pooled: true,
                    pool,
                });
            }
        }

        let capacity = class_capacity(idx);
        if !self.try_charge(capacity, limit) {
            self.stats.refusals.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        self.stats.allocations.fetch_add(1, Ordering::Relaxed);
        Some(PooledBuffer {
            buf: Some(BytesMut::with_capacity(capacity)),
            charged: capacity,
            pooled: true,
            pool,
        })
    }

    /// Bytes currently owned by the arena, free or checked out.
    pub fn resident_bytes(&self) -> usize {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Snapshot of arena activity.
    pub fn stats(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            acquires: self.stats.acquires.load(Ordering::Relaxed),
            reuses: self.stats.reuses.load(Ordering::Relaxed),
            allocations: self.stats.allocations.load(Ordering::Relaxed),
            refusals: self.stats.refusals.load(Ordering::Relaxed),
            returns: self.stats.returns.load(Ordering::Relaxed),
            resident_bytes: self.resident_bytes(),
            peak_bytes: self.stats.peak_bytes.load(Ordering::Relaxed),
        }
    }

    fn try_charge(&self, bytes: usize, limit: usize) -> bool {
        let mut current = self.total_bytes.load(Ordering::Relaxed);
        loop {
            let Some(next) = current.checked_add(bytes) else {
                return false;
            };
            if next > limit {
                return false;
            }
            match self.total_bytes.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.stats.peak_bytes.fetch_max(next, Ordering::Relaxed);
                    return true;
                }
                Err(observed) => current = observed,
            }
        }
    }

    fn uncharge(&self, bytes: usize) {
        self.total_bytes.fetch_sub(bytes, Ordering::AcqRel);
    }

    fn release(&self, mut buf: BytesMut, charged: usize, pooled: bool) {
        self.stats.returns.fetch_add(1, Ordering::Relaxed);
        if !pooled {
            self.uncharge(charged);
            return;
        }
        buf.clear();
        // A buffer that grew past its charged class would skew accounting;
        // free it instead of parking it.
        if buf.capacity() != charged {
            self.uncharge(charged);
            return;
        }
        let idx = (charged.trailing_zeros() - MIN_CLASS_SIZE.trailing_zeros()) as usize;
        if self.classes[idx].0.try_send(buf).is_err() {
            // Class list full: let the buffer drop for real.
            self.uncharge(charged);
        }
    }
}

/// Exclusive handle to a checked-out buffer; returns to the arena on drop.
///
/// Reuse leaves stale bytes in spare capacity; holders track their own
/// valid length, which `clear` resets on every checkout and return.
pub struct PooledBuffer {
    buf: Option<BytesMut>,
    charged: usize,
    pooled: bool,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.as_ref().map(|b| b.len()).unwrap_or(0)
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Usable capacity.
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().map(|b| b.capacity()).unwrap_or(0)
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &Self::Target {
        self.buf.as_ref().expect("buffer present until drop")
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.as_mut().expect("buffer present until drop")
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf, self.charged, self.pooled);
        }
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool(ceiling: usize, reserve: usize) -> Arc<BufferPool> {
        BufferPool::new(BufferPoolConfig {
            initial_buffer_size: MIN_CLASS_SIZE,
            initial_buffers_count: 2,
            memory_ceiling: ceiling,
            dispatch_reserve: reserve,
        })
    }

    #[test]
    fn class_index_rounds_up() {
        assert_eq!(class_index(0), Some(0));
        assert_eq!(class_index(4096), Some(0));
        assert_eq!(class_index(4097), Some(1));
        assert_eq!(class_index(64 * 1024), Some(4));
        assert_eq!(class_index(MAX_CLASS_SIZE), Some(CLASS_COUNT - 1));
        assert_eq!(class_index(MAX_CLASS_SIZE + 1), None);
    }

    #[test]
    fn prewarm_charges_ceiling() {
        let pool = small_pool(64 * 1024, 0);
        assert_eq!(pool.resident_bytes(), 2 * MIN_CLASS_SIZE);
    }

    #[test]
    fn acquire_reuses_released_buffer() {
        let pool = small_pool(64 * 1024, 0);
        let resident = pool.resident_bytes();

        let buf = pool.acquire(1000).expect("within ceiling");
        assert!(buf.capacity() >= 1000);
        drop(buf);

        // Round-trip through the free list, no new allocation.
        let _buf = pool.acquire(1000).expect("within ceiling");
        assert_eq!(pool.resident_bytes(), resident);
        assert!(pool.stats().reuses >= 2);
    }

    #[test]
    fn acquire_fails_at_ceiling() {
        let pool = small_pool(3 * MIN_CLASS_SIZE, 0);
        let a = pool.acquire(100).expect("prewarmed");
        let b = pool.acquire(100).expect("prewarmed");
        let c = pool.acquire(100).expect("one allocation left");
        assert!(pool.acquire(100).is_none());
        assert_eq!(pool.stats().refusals, 1);
        drop((a, b, c));
        assert!(pool.acquire(100).is_some());
    }

    #[test]
    fn dispatch_reserve_band() {
        let pool = small_pool(3 * MIN_CLASS_SIZE, MIN_CLASS_SIZE);
        let _a = pool.acquire(100).expect("prewarmed");
        let _b = pool.acquire(100).expect("prewarmed");
        // Intake is capped below the ceiling...
        assert!(pool.acquire(100).is_none());
        // ...but dispatch may use the reserved band.
        assert!(pool.acquire_reserved(100).is_some());
    }

    #[test]
    fn huge_buffers_are_not_pooled() {
        let pool = BufferPool::new(BufferPoolConfig {
            initial_buffer_size: MIN_CLASS_SIZE,
            initial_buffers_count: 0,
            memory_ceiling: MAX_CLASS_SIZE * 4,
            dispatch_reserve: 0,
        });
        let buf = pool.acquire(MAX_CLASS_SIZE + 1).expect("within ceiling");
        assert_eq!(pool.resident_bytes(), MAX_CLASS_SIZE + 1);
        drop(buf);
        assert_eq!(pool.resident_bytes(), 0);
    }

    #[test]
    fn stale_bytes_survive_reuse_but_length_resets() {
        let pool = small_pool(64 * 1024, 0);
        let mut buf = pool.acquire(16).expect("within ceiling");
        bytes::BufMut::put_slice(&mut *buf, b"sensitive");
        drop(buf);

        let buf = pool.acquire(16).expect("within ceiling");
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn stats_track_outcomes() {
        let pool = small_pool(64 * 1024, 0);
        let a = pool.acquire(100).expect("ok");
        drop(a);
        let snapshot = pool.stats();
        assert_eq!(snapshot.acquires, 1);
        assert_eq!(snapshot.returns, 1);
        assert!(snapshot.peak_bytes >= snapshot.resident_bytes);
    }
}
