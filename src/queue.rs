//! Lock-free line queue
//!
//! A fixed-capacity ring of [`LineRecord`] slots shared by exactly one
//! producer and one consumer. The producer fills a slot in place and then
//! publishes it; the consumer copies the oldest published slot out. One
//! slot always stays free so that equal cursors mean empty.
//!
//! Cursor stores use `Release` and the opposite side loads with `Acquire`,
//! so a record is never observed before every write into it.
//!
//! ## Example
//!
//! ```
//! use epdrive::queue::{LineQueue, LineRecord};
//!
//! let mut queue: LineQueue<4, 8> = LineQueue::new();
//! let (mut producer, mut consumer) = queue.split();
//!
//! let slot = producer.acquire_write_slot().unwrap();
//! slot.fill(3, true, &[0xF0; 8]);
//! producer.commit_write().unwrap();
//!
//! let mut record = LineRecord::new();
//! consumer.read(&mut record).unwrap();
//! assert_eq!(record.row, 3);
//! assert_eq!(record.line(), &[0xF0; 8]);
//! ```

#![allow(unsafe_code)]

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::QueueError;

/// One row of interlaced pixels on its way to the drive loop
///
/// `W` is the capacity in pixels; `len` of them are valid.
#[derive(Clone, Debug)]
pub struct LineRecord<const W: usize> {
    /// Panel row the data belongs to
    pub row: u16,
    /// Whether any pixel of the row changed
    pub dirty: bool,
    /// Number of valid pixels in `data`
    pub len: usize,
    /// One byte per pixel, `(new << 4) | old`
    pub data: [u8; W],
}

impl<const W: usize> LineRecord<W> {
    /// Create an empty clean record for row 0
    pub const fn new() -> Self {
        Self {
            row: 0,
            dirty: false,
            len: 0,
            data: [0; W],
        }
    }

    /// Valid pixels of the record
    pub fn line(&self) -> &[u8] {
        &self.data[..self.len.min(W)]
    }

    /// Overwrite the record
    ///
    /// Copies at most `W` pixels of `pixels`.
    pub fn fill(&mut self, row: u16, dirty: bool, pixels: &[u8]) {
        let len = pixels.len().min(W);
        self.row = row;
        self.dirty = dirty;
        self.len = len;
        self.data[..len].copy_from_slice(&pixels[..len]);
    }

    /// Mark the record as a clean row of `len` pixels
    ///
    /// Leaves the pixel data as it is; clean rows are never looked at.
    pub fn set_clean(&mut self, row: u16, len: usize) {
        self.row = row;
        self.dirty = false;
        self.len = len.min(W);
    }

    fn copy_from(&mut self, other: &Self) {
        self.row = other.row;
        self.dirty = other.dirty;
        self.len = other.len;
        let len = other.len.min(W);
        self.data[..len].copy_from_slice(&other.data[..len]);
    }
}

impl<const W: usize> Default for LineRecord<W> {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-producer single-consumer ring of `N` line records
///
/// Holds at most `N - 1` committed records.
pub struct LineQueue<const N: usize, const W: usize> {
    slots: [UnsafeCell<LineRecord<W>>; N],
    /// Next slot the producer fills
    write: AtomicUsize,
    /// Next slot the consumer reads
    read: AtomicUsize,
}

// SAFETY: a slot is only touched by the producer while it lies outside
// [read, write) and only by the consumer while it lies inside. The
// Release/Acquire cursor handoff orders those accesses.
unsafe impl<const N: usize, const W: usize> Sync for LineQueue<N, W> {}

impl<const N: usize, const W: usize> LineQueue<N, W> {
    const MIN_SLOTS: () = assert!(N >= 2, "a line queue needs at least two slots");

    /// Create an empty queue
    pub fn new() -> Self {
        let () = Self::MIN_SLOTS;
        Self {
            slots: core::array::from_fn(|_| UnsafeCell::new(LineRecord::new())),
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    /// Maximum number of committed records
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Number of committed, unread records
    pub fn len(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        (write + N - read) % N
    }

    /// True when nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every committed record
    ///
    /// Needs exclusive access, so neither half can be alive.
    pub fn reset(&mut self) {
        *self.write.get_mut() = 0;
        *self.read.get_mut() = 0;
    }

    /// Split into the producer and consumer halves
    ///
    /// The halves borrow the queue and may be moved to different threads.
    pub fn split(&mut self) -> (Producer<'_, N, W>, Consumer<'_, N, W>) {
        let queue: &Self = self;
        (
            Producer {
                queue,
                acquired: false,
            },
            Consumer { queue },
        )
    }
}

impl<const N: usize, const W: usize> Default for LineQueue<N, W> {
    fn default() -> Self {
        Self::new()
    }
}

/// Writing half of a [`LineQueue`]
pub struct Producer<'q, const N: usize, const W: usize> {
    queue: &'q LineQueue<N, W>,
    acquired: bool,
}

impl<const N: usize, const W: usize> Producer<'_, N, W> {
    /// Borrow the next free slot
    ///
    /// Acquiring again before committing hands out the same slot. Never
    /// blocks.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] when `N - 1` records are outstanding.
    pub fn acquire_write_slot(&mut self) -> Result<&mut LineRecord<W>, QueueError> {
        let write = self.queue.write.load(Ordering::Relaxed);
        let next = (write + 1) % N;
        if next == self.queue.read.load(Ordering::Acquire) {
            return Err(QueueError::Full);
        }
        self.acquired = true;
        // SAFETY: `write` is outside [read, write), so the consumer does not
        // touch it until `commit_write` publishes it, and the returned
        // borrow ends before this producer can commit.
        Ok(unsafe { &mut *self.queue.slots[write].get() })
    }

    /// Publish the slot from the last [`acquire_write_slot`](Self::acquire_write_slot)
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NothingAcquired`] when no slot is held.
    pub fn commit_write(&mut self) -> Result<(), QueueError> {
        if !self.acquired {
            return Err(QueueError::NothingAcquired);
        }
        self.acquired = false;
        let write = self.queue.write.load(Ordering::Relaxed);
        self.queue.write.store((write + 1) % N, Ordering::Release);
        Ok(())
    }

    /// Copy `record` into the next slot and publish it
    pub fn push(&mut self, record: &LineRecord<W>) -> Result<(), QueueError> {
        self.acquire_write_slot()?.copy_from(record);
        self.commit_write()
    }

    /// Number of committed, unread records
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Reading half of a [`LineQueue`]
pub struct Consumer<'q, const N: usize, const W: usize> {
    queue: &'q LineQueue<N, W>,
}

impl<const N: usize, const W: usize> Consumer<'_, N, W> {
    /// Copy the oldest committed record into `destination`
    ///
    /// Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Empty`] when nothing is committed.
    pub fn read(&mut self, destination: &mut LineRecord<W>) -> Result<(), QueueError> {
        let read = self.queue.read.load(Ordering::Relaxed);
        if read == self.queue.write.load(Ordering::Acquire) {
            return Err(QueueError::Empty);
        }
        // SAFETY: `read` is inside [read, write); the producer published it
        // with a Release store and does not reuse it until `read` moves on.
        let slot = unsafe { &*self.queue.slots[read].get() };
        destination.copy_from(slot);
        self.queue.read.store((read + 1) % N, Ordering::Release);
        Ok(())
    }

    /// Drop every committed record without reading it
    ///
    /// Returns how many were dropped.
    pub fn discard_all(&mut self) -> usize {
        let read = self.queue.read.load(Ordering::Relaxed);
        let write = self.queue.write.load(Ordering::Acquire);
        self.queue.read.store(write, Ordering::Release);
        (write + N - read) % N
    }

    /// Number of committed, unread records
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
