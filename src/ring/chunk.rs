use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// log2 of the chunk capacity.
pub(crate) const CHUNK_SHIFT: u32 = 10;
/// Number of message slots per chunk.
pub(crate) const CHUNK_SIZE: usize = 1 << CHUNK_SHIFT;
/// Mask mapping a position to a slot index within its chunk.
pub(crate) const CHUNK_MASK: u64 = (CHUNK_SIZE as u64) - 1;

/// One fixed-size block of message slots plus a forward link.
///
/// Chunks are linked into a singly-linked ring per route. A slot holds a
/// message only for positions in the `[rpos, wpos)` window of the owning
/// ring; everything else is uninitialized.
///
/// # Safety
///
/// `Chunk` provides no synchronization of its own. Slot access is coordinated
/// entirely by the owning [`Ring`](super::Ring): the producer writes a slot
/// strictly before publishing it through the `wpos` release store, and the
/// consumer reads it strictly after the matching acquire load. The `next`
/// link is an atomic so that a splice performed by the producer is safely
/// visible to the consumer advancing its read chunk.
pub(crate) struct Chunk<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    next: AtomicPtr<Chunk<T>>,
}

impl<T> Chunk<T> {
    /// Heap-allocates a chunk with a null `next` link and leaks it to a raw
    /// pointer. The caller links it into a ring and eventually reclaims it
    /// with [`Chunk::free`].
    pub(crate) fn alloc() -> *mut Chunk<T> {
        let slots = (0..CHUNK_SIZE)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Box::into_raw(Box::new(Chunk {
            slots,
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    /// Reclaims a chunk previously produced by [`Chunk::alloc`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Chunk::alloc`, must not be freed twice, and all
    /// live messages in its slots must have been moved out already.
    pub(crate) unsafe fn free(ptr: *mut Chunk<T>) {
        drop(Box::from_raw(ptr));
    }

    /// Writes a message into `slot`.
    ///
    /// # Safety
    ///
    /// The caller must hold exclusive write access to this position: the slot
    /// lies at `wpos & CHUNK_MASK` of a position not yet published, and no
    /// concurrent access to the same slot exists.
    #[inline]
    pub(crate) unsafe fn write(&self, slot: usize, msg: T) {
        (*self.slots[slot].get()).write(msg);
    }

    /// Moves the message out of `slot`.
    ///
    /// # Safety
    ///
    /// The position must have been published (covered by an acquire load of
    /// `wpos`) and not read before; the slot is uninitialized afterwards.
    #[inline]
    pub(crate) unsafe fn read(&self, slot: usize) -> T {
        (*self.slots[slot].get()).assume_init_read()
    }

    #[inline]
    pub(crate) fn next_ptr(&self, order: Ordering) -> *mut Chunk<T> {
        self.next.load(order)
    }

    #[inline]
    pub(crate) fn set_next(&self, ptr: *mut Chunk<T>, order: Ordering) {
        self.next.store(ptr, order);
    }
}
