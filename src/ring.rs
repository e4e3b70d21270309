//! Lock-free single-producer / single-consumer ring buffer
//!
//! Hand-off queue between the transport thread and the engine thread.
//! Each slot carries a monotonically increasing sequence counter: a slot is
//! writable when its sequence equals the producer's tail and readable when it
//! equals head + 1, so empty/full discrimination never needs to read both
//! counters. Head and tail live on separate cache lines.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

struct RingInner<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

// SAFETY: slot access is serialized by the sequence-counter protocol; the
// Producer/Consumer handles guarantee at most one writer and one reader.
unsafe impl<T: Send> Send for RingInner<T> {}
unsafe impl<T: Send> Sync for RingInner<T> {}

impl<T> RingInner<T> {
    fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity > 0,
            "ring capacity must be a power of two"
        );

        let slots = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// SAFETY: must only be called from the single producer.
    unsafe fn try_push(&self, value: T) -> Result<(), T> {
        let pos = self.tail.load(Ordering::Relaxed);
        let slot = &self.slots[pos & self.mask];

        if slot.sequence.load(Ordering::Acquire) != pos {
            return Err(value);
        }

        (*slot.value.get()).write(value);

        slot.sequence.store(pos + 1, Ordering::Release);
        self.tail.store(pos + 1, Ordering::Relaxed);
        Ok(())
    }

    /// SAFETY: must only be called from the single consumer.
    unsafe fn try_pop(&self) -> Option<T> {
        let pos = self.head.load(Ordering::Relaxed);
        let slot = &self.slots[pos & self.mask];

        if slot.sequence.load(Ordering::Acquire) != pos + 1 {
            return None;
        }

        let value = (*slot.value.get()).assume_init_read();

        slot.sequence
            .store(pos + self.slots.len(), Ordering::Release);
        self.head.store(pos + 1, Ordering::Relaxed);
        Some(value)
    }

    fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head)
    }
}

impl<T> Drop for RingInner<T> {
    fn drop(&mut self) {
        // Drop has exclusive access; drain so element destructors run.
        while unsafe { self.try_pop() }.is_some() {}
    }
}

/// Create a bounded SPSC ring. `capacity` must be a power of two.
///
/// The returned handles are Send but not Clone, so the one-producer /
/// one-consumer contract holds statically.
pub fn channel<T: Send>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let inner = Arc::new(RingInner::new(capacity));
    (
        Producer {
            inner: Arc::clone(&inner),
        },
        Consumer { inner },
    )
}

/// Producer end of the ring. Owned by the transport thread.
pub struct Producer<T> {
    inner: Arc<RingInner<T>>,
}

impl<T: Send> Producer<T> {
    /// Push a value, or hand it back if the ring is full. Never blocks.
    pub fn try_push(&mut self, value: T) -> Result<(), T> {
        // SAFETY: &mut self makes this the only producer call site.
        unsafe { self.inner.try_push(value) }
    }

    /// Approximate number of queued elements.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }
}

/// Consumer end of the ring. Owned by the engine thread.
pub struct Consumer<T> {
    inner: Arc<RingInner<T>>,
}

impl<T: Send> Consumer<T> {
    /// Pop the oldest value, or None if the ring is empty. Never blocks.
    pub fn try_pop(&mut self) -> Option<T> {
        // SAFETY: &mut self makes this the only consumer call site.
        unsafe { self.inner.try_pop() }
    }

    /// Approximate number of queued elements.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }
}
