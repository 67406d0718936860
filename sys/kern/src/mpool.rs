// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel memory pool.
//!
//! One fixed byte buffer feeds every run-time allocation the kernel makes:
//! pipe rings, message-queue storage, reply FIFOs. Allocation just bumps a
//! pointer; there is no free path, because every object allocated here lives
//! until reset.
//!
//! Allocations are handed out as [`PoolRange`] values -- plain offset/length
//! pairs -- rather than references, so that an object owning storage (a
//! pipe, say) and the pool itself can both be fields of the kernel without
//! the borrow checker seeing a self-reference. Each operation that touches
//! the storage borrows it back through [`MemPool::bytes_mut`].

use abi::MEM_POOL_SIZE;

/// A range of bytes previously handed out by [`MemPool::alloc`].
#[derive(Copy, Clone, Debug)]
pub struct PoolRange {
    start: usize,
    len: usize,
}

impl PoolRange {
    pub fn len(&self) -> usize {
        self.len
    }
}

/// The pool: backing bytes plus a high-water mark.
pub struct MemPool {
    buf: [u8; MEM_POOL_SIZE],
    next: usize,
}

impl MemPool {
    pub const fn new() -> Self {
        MemPool {
            buf: [0; MEM_POOL_SIZE],
            next: 0,
        }
    }

    /// Carves `len` bytes off the pool, or returns `None` once the pool is
    /// exhausted. Results are 4-byte aligned so multi-byte records can be
    /// stored without byte-splitting.
    pub fn alloc(&mut self, len: usize) -> Option<PoolRange> {
        let start = (self.next + 3) & !3;
        let end = start.checked_add(len)?;
        if end > self.buf.len() {
            return None;
        }
        self.next = end;
        Some(PoolRange { start, len })
    }

    /// Borrows the bytes behind `range`.
    pub fn bytes_mut(&mut self, range: PoolRange) -> &mut [u8] {
        &mut self.buf[range.start..range.start + range.len]
    }

    /// Bytes remaining before exhaustion, ignoring alignment padding.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_disjoint_and_aligned() {
        let mut pool = Box::new(MemPool::new());
        let a = pool.alloc(10).unwrap();
        let b = pool.alloc(6).unwrap();

        assert_eq!(a.start % 4, 0);
        assert_eq!(b.start % 4, 0);
        assert!(a.start + a.len <= b.start);

        pool.bytes_mut(a).fill(0xAA);
        pool.bytes_mut(b).fill(0xBB);
        assert!(pool.bytes_mut(a).iter().all(|&x| x == 0xAA));
        assert!(pool.bytes_mut(b).iter().all(|&x| x == 0xBB));
    }

    #[test]
    fn exhaustion_returns_none_and_leaves_pool_usable() {
        let mut pool = Box::new(MemPool::new());
        assert!(pool.alloc(MEM_POOL_SIZE + 1).is_none());
        let remaining = pool.remaining();
        assert_eq!(remaining, MEM_POOL_SIZE);

        // A failed oversize allocation must not consume anything.
        let half = pool.alloc(MEM_POOL_SIZE / 2).unwrap();
        assert_eq!(half.len(), MEM_POOL_SIZE / 2);
        assert!(pool.alloc(MEM_POOL_SIZE).is_none());
        assert!(pool.alloc(16).is_some());
    }
}
