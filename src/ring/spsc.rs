//! # Per-route SPSC ring over a linked ring of chunks.
//!
//! [`Ring`] is the data path between one producer and one consumer. It is a
//! fixed-slot queue that grows head room on demand: when the writer is about
//! to lap the reader it splices a fresh chunk between them instead of
//! blocking or overwriting.
//!
//! ## Rules
//! - The producer owns `wpos`/`wchunk`; the consumer owns `rpos`/`rchunk`.
//! - The two halves communicate only through the slot array and the
//!   release/acquire pairing on `wpos`.
//! - The ring never shrinks; chunks are reclaimed all at once on drop.

use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use super::chunk::{Chunk, CHUNK_MASK, CHUNK_SIZE};

/// Growable single-producer single-consumer queue.
///
/// Positions are 64-bit monotonic counters; the low `log2(1024)` bits index
/// into the current chunk. Wrap-around is not reachable at any realistic
/// rate.
///
/// # Safety
///
/// `Ring` itself performs no locking. Callers must uphold the SPSC
/// discipline: at most one thread calls [`Ring::push`] and at most one
/// thread calls [`Ring::pop`]/[`Ring::pop_run`] at any time. The `Route` and
/// `Peak` handles enforce this statically (neither is `Clone`, data
/// operations take `&mut self`).
pub(crate) struct Ring<T> {
    /// Producer cursor. Stored with release ordering after the slot write.
    wpos: CachePadded<AtomicU64>,
    /// Consumer cursor.
    rpos: CachePadded<AtomicU64>,
    /// Chunk the producer is writing into. Stored only by the producer.
    wchunk: AtomicPtr<Chunk<T>>,
    /// Chunk the consumer is reading from. Stored only by the consumer, but
    /// loaded by the producer for the lap check.
    rchunk: AtomicPtr<Chunk<T>>,
}

// SAFETY: slot access is coordinated by the wpos release/acquire pairing and
// the single-producer / single-consumer discipline documented on the type.
// Moving the ring (and the T values inside it) between threads is safe when
// T is Send.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    /// Creates a ring with a single chunk linked to itself.
    pub(crate) fn new() -> Self {
        let chunk = Chunk::alloc();
        // SAFETY: freshly allocated, not shared yet.
        unsafe { (*chunk).set_next(chunk, Ordering::Relaxed) };
        Ring {
            wpos: CachePadded::new(AtomicU64::new(0)),
            rpos: CachePadded::new(AtomicU64::new(0)),
            wchunk: AtomicPtr::new(chunk),
            rchunk: AtomicPtr::new(chunk),
        }
    }

    /// Appends a message (producer side).
    ///
    /// At the last slot of the write chunk the producer checks whether the
    /// following chunk still holds the reader; if so a fresh chunk is spliced
    /// in between, so unread slots are never overwritten.
    ///
    /// # Safety
    ///
    /// Must only be called by the single producer of this ring.
    pub(crate) unsafe fn push(&self, msg: T) {
        let wpos = self.wpos.load(Ordering::Relaxed);
        let slot = (wpos & CHUNK_MASK) as usize;
        let chunk = self.wchunk.load(Ordering::Relaxed);
        if slot as u64 == CHUNK_MASK {
            let next = (*chunk).next_ptr(Ordering::Relaxed);
            if next == self.rchunk.load(Ordering::Acquire) {
                let fresh = Chunk::alloc();
                (*fresh).set_next(next, Ordering::Relaxed);
                // Release publishes the fresh chunk to the consumer.
                (*chunk).set_next(fresh, Ordering::Release);
            }
        }
        (*chunk).write(slot, msg);
        // Release pairs with the consumer's acquire load of wpos.
        self.wpos.store(wpos + 1, Ordering::Release);
        if (wpos + 1) & CHUNK_MASK == 0 {
            self.wchunk
                .store((*chunk).next_ptr(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    /// Removes the oldest message, if any (consumer side).
    ///
    /// # Safety
    ///
    /// Must only be called by the single consumer of this ring.
    pub(crate) unsafe fn pop(&self) -> Option<T> {
        let rpos = self.rpos.load(Ordering::Relaxed);
        if rpos == self.wpos.load(Ordering::Acquire) {
            return None;
        }
        let chunk = self.rchunk.load(Ordering::Relaxed);
        let msg = (*chunk).read((rpos & CHUNK_MASK) as usize);
        // Release so the producer's lap check observes the slot as consumed
        // no earlier than the cursor update.
        self.rpos.store(rpos + 1, Ordering::Release);
        if (rpos + 1) & CHUNK_MASK == 0 {
            let next = (*chunk).next_ptr(Ordering::Acquire);
            self.rchunk.store(next, Ordering::Release);
        }
        Some(msg)
    }

    /// Moves out a contiguous run of at most `max` messages, never crossing a
    /// chunk boundary. Returns the run length (consumer side).
    ///
    /// # Safety
    ///
    /// Must only be called by the single consumer of this ring.
    pub(crate) unsafe fn pop_run(&self, out: &mut Vec<T>, max: usize) -> usize {
        let rpos = self.rpos.load(Ordering::Relaxed);
        let wpos = self.wpos.load(Ordering::Acquire);
        if max == 0 || rpos == wpos {
            return 0;
        }
        let slot = (rpos & CHUNK_MASK) as usize;
        let run = (wpos - rpos).min((CHUNK_SIZE - slot) as u64).min(max as u64) as usize;
        let chunk = self.rchunk.load(Ordering::Relaxed);
        out.reserve(run);
        for i in 0..run {
            out.push((*chunk).read(slot + i));
        }
        self.rpos.store(rpos + run as u64, Ordering::Release);
        if (rpos + run as u64) & CHUNK_MASK == 0 {
            let next = (*chunk).next_ptr(Ordering::Acquire);
            self.rchunk.store(next, Ordering::Release);
        }
        run
    }

    /// True when every published message has been consumed.
    ///
    /// Callable from either side; the answer is exact for the calling side's
    /// own cursor and conservative for the other.
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of published, not yet consumed messages.
    pub(crate) fn len(&self) -> usize {
        let wpos = self.wpos.load(Ordering::Acquire);
        let rpos = self.rpos.load(Ordering::Acquire);
        wpos.saturating_sub(rpos) as usize
    }

    /// Consumer cursor value, used by the fan-in fairness rule.
    #[inline]
    pub(crate) fn rpos(&self) -> u64 {
        self.rpos.load(Ordering::Relaxed)
    }

    /// Number of chunks currently linked into the ring.
    ///
    /// Only meaningful while the ring is quiescent; tests use it to observe
    /// splices.
    #[cfg(test)]
    pub(crate) fn chunk_count(&self) -> usize {
        let start = self.rchunk.load(Ordering::Acquire);
        let mut count = 1;
        // SAFETY: chunks are never unlinked while the ring is alive.
        let mut cur = unsafe { (*start).next_ptr(Ordering::Acquire) };
        while cur != start {
            count += 1;
            cur = unsafe { (*cur).next_ptr(Ordering::Acquire) };
        }
        count
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        // Exclusive access: drain undelivered messages, then free the ring
        // of chunks in one pass.
        // SAFETY: &mut self means both halves of the SPSC contract are held
        // by this thread.
        unsafe {
            while self.pop().is_some() {}
            let start = self.rchunk.load(Ordering::Relaxed);
            let mut cur = (*start).next_ptr(Ordering::Relaxed);
            while cur != start {
                let next = (*cur).next_ptr(Ordering::Relaxed);
                Chunk::free(cur);
                cur = next;
            }
            Chunk::free(start);
        }
    }
}
