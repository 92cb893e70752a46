//! Circular chunk buffer between the mixer thread and the audio callback
//!
//! Exactly one producer (the mixer thread) and one consumer (the host audio
//! callback). `clear()` may come from any thread.
//!
//! ```text
//!              read_idx            write_idx
//!                 │                    │
//!   [ . | . | A | B | C | D | . | . ]  │   A..D are queued chunks
//!                 └── pop ──►   ◄── push (blocks while all slots are queued)
//! ```
//!
//! # Discipline
//!
//! - The consumer never blocks. An empty buffer (or a slot being zeroed by
//!   a concurrent `clear`) makes `pop` return false and bumps the underflow
//!   counter.
//! - The producer waits on a condition variable while the buffer is full.
//!   The wait is sliced with a short timeout so a missed wake-up from the
//!   lock-free consumer side costs at most one slice.
//! - `clear` bumps a generation counter under the producer gate. A push
//!   that was waiting for space notices the new generation when it wakes and
//!   drops its chunk instead of writing it at coordinates that are no longer
//!   valid.
//! - Indices are published with release stores and read with acquire loads,
//!   so an advanced write index always implies the chunk data is visible.
//! - Read and write indices are running counters that only grow; the slot is
//!   the counter modulo the slot count. `clear` moves the read index forward
//!   to the write index, never back, so a consumer holding a stale read
//!   index can not win its compare-exchange after any number of clears.

use crate::types::{AudioChunk, CHUNK_SAMPLES};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Upper bound for one producer wait slice
const WAIT_SLICE: Duration = Duration::from_millis(1);

/// Result of [`AudioBuffer::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Chunk is queued
    Written,
    /// A `clear()` happened while waiting for space; the chunk was dropped
    Discarded,
    /// The buffer was closed; the chunk was dropped
    Closed,
}

/// Fixed-capacity SPSC ring of [`AudioChunk`]s
pub struct AudioBuffer {
    slots: Box<[Mutex<AudioChunk>]>,
    read_idx: AtomicUsize,
    write_idx: AtomicUsize,
    underflows: AtomicU64,
    generation: AtomicU64,
    closed: AtomicBool,
    /// Serializes the producer's copy-and-publish against `clear`
    gate: Mutex<()>,
    space: Condvar,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AudioBuffer {
    /// Create a buffer sized for `buffered_samples` frames of audio
    ///
    /// The ring has `ceil(buffered_samples / CHUNK_SAMPLES)` slots.
    ///
    /// # Panics
    ///
    /// Panics if `buffered_samples` is zero.
    pub fn new(buffered_samples: usize) -> Self {
        assert!(buffered_samples > 0, "audio buffer size must be positive");

        let slot_count = buffered_samples.div_ceil(CHUNK_SAMPLES);
        let slots = (0..slot_count)
            .map(|_| Mutex::new(AudioChunk::silence()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            read_idx: AtomicUsize::new(0),
            write_idx: AtomicUsize::new(0),
            underflows: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            gate: Mutex::new(()),
            space: Condvar::new(),
        }
    }

    #[inline]
    fn slot(&self, idx: usize) -> &Mutex<AudioChunk> {
        &self.slots[idx % self.slots.len()]
    }

    /// Number of chunks the buffer can hold
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of chunks currently queued
    pub fn len(&self) -> usize {
        let read = self.read_idx.load(Ordering::Acquire);
        let write = self.write_idx.load(Ordering::Acquire);
        write.wrapping_sub(read).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of `pop` calls that returned false
    pub fn underflow_count(&self) -> u64 {
        self.underflows.load(Ordering::Relaxed)
    }

    /// Number of `clear` calls so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Queue a chunk, waiting while the buffer is full
    pub fn push(&self, chunk: &AudioChunk) -> PushOutcome {
        let mut gate = lock(&self.gate);
        let generation = self.generation.load(Ordering::Acquire);

        let write = loop {
            if self.closed.load(Ordering::Acquire) {
                return PushOutcome::Closed;
            }
            if self.generation.load(Ordering::Acquire) != generation {
                log::debug!("AudioBuffer: push discarded by concurrent clear");
                return PushOutcome::Discarded;
            }

            let write = self.write_idx.load(Ordering::Relaxed);
            if write.wrapping_sub(self.read_idx.load(Ordering::Acquire)) < self.capacity() {
                break write;
            }

            gate = self
                .space
                .wait_timeout(gate, WAIT_SLICE)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        };

        *lock(self.slot(write)) = *chunk;
        self.write_idx.store(write.wrapping_add(1), Ordering::Release);
        drop(gate);

        PushOutcome::Written
    }

    /// Take the oldest chunk without blocking
    ///
    /// Returns false (and counts an underflow) when no chunk is available.
    /// `out` is left untouched in that case.
    pub fn pop(&self, out: &mut AudioChunk) -> bool {
        let read = self.read_idx.load(Ordering::Acquire);
        if read == self.write_idx.load(Ordering::Acquire) {
            return self.underflow();
        }

        // A clear() holding this slot is zeroing it; treat as empty
        let Ok(slot) = self.slot(read).try_lock() else {
            return self.underflow();
        };
        let chunk = *slot;
        drop(slot);

        if !self.advance_read(read) {
            return self.underflow();
        }

        *out = chunk;
        self.space.notify_one();
        true
    }

    /// Consume the chunk at `read`. Fails if a clear() moved the read index
    /// since it was loaded, in which case the copied chunk is stale.
    #[inline]
    fn advance_read(&self, read: usize) -> bool {
        self.read_idx
            .compare_exchange(read, read.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    fn underflow(&self) -> bool {
        self.underflows.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Drop everything queued and zero the storage
    ///
    /// A push blocked on a full buffer is abandoned. After `clear` returns,
    /// `pop` returns false until the producer pushes again.
    pub fn clear(&self) {
        let gate = lock(&self.gate);
        self.generation.fetch_add(1, Ordering::AcqRel);

        // Move the read index first so a consumer that copies a zeroed slot
        // always fails its compare-exchange
        let write = self.write_idx.load(Ordering::Acquire);
        self.read_idx.store(write, Ordering::Release);
        for slot in self.slots.iter() {
            lock(slot).clear();
        }

        drop(gate);
        self.space.notify_all();
    }

    /// Release a waiting producer for good. Subsequent pushes return `Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _gate = lock(&self.gate);
        self.space.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for AudioBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("underflows", &self.underflow_count())
            .field("generation", &self.generation())
            .finish()
    }
}
