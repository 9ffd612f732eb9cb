//! Ring Buffer Implementation

use crate::error::RingBufferError;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default buffer capacity (8 KiB of serial traffic)
pub const DEFAULT_CAPACITY: usize = 8192;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a ring buffer instance
///
/// Assigned once at construction and never reused within the process, so it
/// can stand in for the buffer in registries without comparing contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// Storage and cursors, only touched with the buffer lock held
struct Slots<T> {
    storage: Box<[Option<T>]>,
    read_pos: usize,
    write_pos: usize,
    available: usize,
}

impl<T: Clone> Slots<T> {
    fn with_capacity(capacity: usize) -> Self {
        let storage: Vec<Option<T>> = (0..capacity).map(|_| None).collect();
        Self {
            storage: storage.into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
            available: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.storage.len()
    }

    fn free_space(&self) -> usize {
        self.capacity() - self.available
    }

    /// Copy the leading items that fit: first up to the end of storage, then
    /// the remainder from index 0
    fn push(&mut self, items: &[T]) -> usize {
        let count = items.len().min(self.free_space());
        if count == 0 {
            return 0;
        }

        let to_end = count.min(self.capacity() - self.write_pos);
        let (tail, head) = items[..count].split_at(to_end);
        let (low, high) = self.storage.split_at_mut(self.write_pos);

        for (slot, item) in high.iter_mut().zip(tail) {
            *slot = Some(item.clone());
        }
        for (slot, item) in low.iter_mut().zip(head) {
            *slot = Some(item.clone());
        }

        self.write_pos = (self.write_pos + count) % self.capacity();
        self.available += count;
        count
    }

    /// Split the oldest `count` elements into (up to end of storage, wrapped)
    fn ranges(&self, count: usize) -> (usize, usize) {
        let to_end = count.min(self.capacity() - self.read_pos);
        (to_end, count - to_end)
    }

    fn take(&mut self, count: usize) -> Vec<T> {
        let count = count.min(self.available);
        let (to_end, wrapped) = self.ranges(count);
        let (low, high) = self.storage.split_at_mut(self.read_pos);

        let items = high[..to_end]
            .iter_mut()
            .chain(low[..wrapped].iter_mut())
            .filter_map(Option::take)
            .collect();

        self.advance(count);
        items
    }

    fn copy(&self, count: usize) -> Vec<T> {
        let count = count.min(self.available);
        let (to_end, wrapped) = self.ranges(count);
        let start = self.read_pos;

        self.storage[start..start + to_end]
            .iter()
            .chain(self.storage[..wrapped].iter())
            .filter_map(|slot| slot.clone())
            .collect()
    }

    /// Release the oldest `count` slots and move the read cursor past them
    fn advance(&mut self, count: usize) {
        let (to_end, wrapped) = self.ranges(count);
        let (low, high) = self.storage.split_at_mut(self.read_pos);
        high[..to_end]
            .iter_mut()
            .chain(low[..wrapped].iter_mut())
            .for_each(|slot| *slot = None);

        self.read_pos = (self.read_pos + count) % self.capacity();
        self.available -= count;
    }

    fn reset(&mut self) {
        self.storage.iter_mut().for_each(|slot| *slot = None);
        self.read_pos = 0;
        self.write_pos = 0;
        self.available = 0;
    }
}

/// Fixed-capacity FIFO guarded by a single per-instance lock
///
/// Every operation takes the lock for its full duration, so operations on
/// the same buffer are atomic with respect to each other while separate
/// buffers never contend. Nothing blocks waiting for space or data.
pub struct RingBuffer<T> {
    id: BufferId,
    capacity: usize,
    slots: Mutex<Slots<T>>,
    /// Elements accepted over the buffer lifetime (for statistics)
    total_written: AtomicUsize,
    /// Elements rejected because the buffer was full
    total_dropped: AtomicUsize,
}

impl<T: Clone> RingBuffer<T> {
    /// Create a new ring buffer with the given capacity
    pub fn new(capacity: usize) -> Result<Self, RingBufferError> {
        if capacity == 0 {
            return Err(RingBufferError::ZeroCapacity);
        }
        Ok(Self::allocate(capacity))
    }

    /// Create a buffer with default capacity (8192 elements)
    pub fn with_default_capacity() -> Self {
        Self::allocate(DEFAULT_CAPACITY)
    }

    fn allocate(capacity: usize) -> Self {
        Self {
            id: BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed)),
            capacity,
            slots: Mutex::new(Slots::with_capacity(capacity)),
            total_written: AtomicUsize::new(0),
            total_dropped: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        // Cursors are only updated after the copy succeeds, so a poisoned
        // lock still guards consistent state.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identity token of this buffer
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append as many leading items as fit, returning the count written
    ///
    /// Writes nothing when the buffer is full. Never blocks, never grows.
    pub fn write(&self, items: &[T]) -> usize {
        let written = self.lock().push(items);
        self.total_written.fetch_add(written, Ordering::Relaxed);
        if written < items.len() {
            self.total_dropped
                .fetch_add(items.len() - written, Ordering::Relaxed);
        }
        written
    }

    /// Append all items or none of them
    ///
    /// Returns false, leaving the buffer untouched, if they do not all fit.
    pub fn try_write_all(&self, items: &[T]) -> bool {
        let mut slots = self.lock();
        if slots.free_space() < items.len() {
            self.total_dropped.fetch_add(items.len(), Ordering::Relaxed);
            return false;
        }
        let written = slots.push(items);
        self.total_written.fetch_add(written, Ordering::Relaxed);
        true
    }

    /// Remove and return up to `max` items in FIFO order
    pub fn read(&self, max: usize) -> Vec<T> {
        self.lock().take(max)
    }

    /// Remove and return everything currently buffered
    pub fn read_all(&self) -> Vec<T> {
        let mut slots = self.lock();
        let available = slots.available;
        slots.take(available)
    }

    /// Remove exactly `count` items, or nothing if fewer are available
    pub fn read_exact(&self, count: usize) -> Option<Vec<T>> {
        let mut slots = self.lock();
        if slots.available < count {
            return None;
        }
        Some(slots.take(count))
    }

    /// Remove and return the oldest item
    pub fn pop(&self) -> Option<T> {
        self.lock().take(1).pop()
    }

    /// Return up to `max` items without advancing the read cursor
    pub fn peek(&self, max: usize) -> Vec<T> {
        self.lock().copy(max)
    }

    /// Return everything currently buffered without consuming it
    pub fn peek_all(&self) -> Vec<T> {
        let slots = self.lock();
        slots.copy(slots.available)
    }

    /// Advance the read cursor by exactly `count` items
    ///
    /// Returns false without touching the buffer if `count` is zero or more
    /// than is available.
    pub fn consume(&self, count: usize) -> bool {
        let mut slots = self.lock();
        if count == 0 || slots.available < count {
            return false;
        }
        slots.advance(count);
        true
    }

    /// Number of buffered items
    pub fn available(&self) -> usize {
        self.lock().available
    }

    /// Remaining space before writes start truncating
    pub fn free_space(&self) -> usize {
        self.lock().free_space()
    }

    /// Discard all contents and reset both cursors
    pub fn clear(&self) {
        self.lock().reset();
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Check if buffer is full
    pub fn is_full(&self) -> bool {
        self.available() == self.capacity
    }

    /// Get fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        self.available() as f64 / self.capacity as f64
    }

    /// Get total items accepted (for statistics)
    pub fn total_written(&self) -> usize {
        self.total_written.load(Ordering::Relaxed)
    }

    /// Get total items dropped because the buffer was full
    pub fn total_dropped(&self) -> usize {
        self.total_dropped.load(Ordering::Relaxed)
    }
}

impl<T: Clone> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let available = self.available();
        f.debug_struct("RingBuffer")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("available", &available)
            .field("free", &(self.capacity - available))
            .finish()
    }
}
