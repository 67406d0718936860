//! A circular byte queue over borrowed memory, with detached bookkeeping.
//!
//! The queue is split into two pieces:
//!
//! - [`RingState`], a small plain struct holding head/tail/count, which the
//!   owner embeds wherever is convenient (a kernel pipe object, a `static`,
//!   a test fixture);
//! - the backing memory, any `&mut [u8]`.
//!
//! An operation borrows both for its duration via [`RingQ::new`]. This split
//! exists because the natural owner of the state (a pipe) and the natural
//! owner of the storage (a memory pool) are different objects, and tying
//! them together with a lifetime would make the containing type
//! self-referential.
//!
//! # Design goals
//!
//! 1. `no_std`.
//! 2. Borrowed memory, so queues can live in named statics or pool ranges
//!    rather than somewhere random on the stack.
//! 3. Whole-slice enqueue/dequeue using slice copies, handling wraparound
//!    internally.
//! 4. Code clarity over arithmetical cleverness.
//!
//! Non-goals: concurrent access (always `&mut`), record framing (callers
//! that need message boundaries store an explicit length in the queue).

#![cfg_attr(not(test), no_std)]

/// Error returned when the queue lacks space for the bytes being enqueued.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QueueFull;

/// Error returned when the queue holds fewer bytes than requested.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QueueEmpty;

/// Head/tail bookkeeping for one queue. `Default` yields an empty queue.
///
/// The state does not record the storage length; it is re-supplied on each
/// operation and must be the same slice (or at least the same length) every
/// time, or the indices stop making sense.
#[derive(Copy, Clone, Debug, Default)]
pub struct RingState {
    /// Index of the next byte to write.
    head: usize,
    /// Index of the next byte to read.
    tail: usize,
    /// Bytes currently queued. Kept explicitly so that head == tail is not
    /// ambiguous between empty and full.
    count: usize,
}

impl RingState {
    pub const fn new() -> Self {
        RingState {
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    /// Number of bytes enqueued but not yet dequeued.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// A queue operation handle: state plus storage, borrowed together.
pub struct RingQ<'q> {
    state: &'q mut RingState,
    storage: &'q mut [u8],
}

impl<'q> RingQ<'q> {
    /// Binds `state` to `storage` for a sequence of operations.
    pub fn new(state: &'q mut RingState, storage: &'q mut [u8]) -> Self {
        debug_assert!(state.count <= storage.len());
        RingQ { state, storage }
    }

    /// Bytes currently queued.
    pub fn len(&self) -> usize {
        self.state.count
    }

    /// Bytes that can be enqueued before the queue fills.
    pub fn free(&self) -> usize {
        self.storage.len() - self.state.count
    }

    pub fn is_empty(&self) -> bool {
        self.state.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.free() == 0
    }

    /// Enqueues all of `data`, or nothing.
    ///
    /// The copy may wrap around the end of storage; callers never see the
    /// split.
    pub fn push(&mut self, data: &[u8]) -> Result<(), QueueFull> {
        if data.len() > self.free() {
            return Err(QueueFull);
        }

        let cap = self.storage.len();
        let head = self.state.head;
        let first_len = data.len().min(cap - head);
        let (d1, d2) = data.split_at(first_len);
        self.storage[head..head + first_len].copy_from_slice(d1);
        self.storage[..d2.len()].copy_from_slice(d2);

        self.state.head = wrapping_index_add(head, data.len(), cap);
        self.state.count += data.len();
        Ok(())
    }

    /// Enqueues a single byte (convenience function).
    pub fn push_byte(&mut self, byte: u8) -> Result<(), QueueFull> {
        self.push(core::slice::from_ref(&byte))
    }

    /// Dequeues exactly `dest.len()` bytes into `dest`, or nothing.
    pub fn pop_into(&mut self, dest: &mut [u8]) -> Result<(), QueueEmpty> {
        if dest.len() > self.state.count {
            return Err(QueueEmpty);
        }

        let cap = self.storage.len();
        let tail = self.state.tail;
        let first_len = dest.len().min(cap - tail);
        let (d1, d2) = dest.split_at_mut(first_len);
        d1.copy_from_slice(&self.storage[tail..tail + first_len]);
        d2.copy_from_slice(&self.storage[..d2.len()]);

        self.state.tail = wrapping_index_add(tail, dest.len(), cap);
        self.state.count -= dest.len();
        Ok(())
    }

    /// Dequeues one byte (convenience function).
    pub fn pop_byte(&mut self) -> Result<u8, QueueEmpty> {
        let mut b = 0;
        self.pop_into(core::slice::from_mut(&mut b))?;
        Ok(b)
    }

    /// Discards `n` queued bytes without copying them anywhere.
    pub fn discard(&mut self, n: usize) -> Result<(), QueueEmpty> {
        if n > self.state.count {
            return Err(QueueEmpty);
        }
        self.state.tail = wrapping_index_add(self.state.tail, n, self.storage.len());
        self.state.count -= n;
        Ok(())
    }
}

/// Circular index arithmetic without assuming a hardware divide.
///
/// Requires `a < limit` and `b <= limit`, which all callers uphold.
fn wrapping_index_add(a: usize, b: usize, limit: usize) -> usize {
    let n = a + b;
    // This slightly weird formulation avoids generating an overflow panic
    // that the compiler would have to optimize away.
    n.checked_sub(limit).unwrap_or(n)
}
