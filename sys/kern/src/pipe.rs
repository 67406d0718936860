// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel pipes: bounded byte queues with blocking endpoints.
//!
//! A pipe is a ring over memory-pool storage plus two wait queues. The
//! per-task reply FIFOs, FIFOs created through the file system, and the
//! rings inside message queues are all pipes; only the framing on top
//! differs.
//!
//! Blocking follows the pending-syscall discipline: an operation that
//! cannot complete parks the caller and sets its pending flag, and will be
//! re-run from scratch when a peer's completed operation wakes the task.
//! Exactly one waiter is woken per completed operation, in FIFO order.

use abi::{OpenFlags, TaskState, EAGAIN};
use ringq::{RingQ, RingState};

use crate::err::SysResult;
use crate::kernel::Kernel;
use crate::list::TaskQueue;
use crate::mpool::PoolRange;
use crate::umem::USlice;
use crate::wait;

pub struct Pipe {
    /// Backing storage in the memory pool.
    pub(crate) storage: PoolRange,
    pub(crate) ring: RingState,
    /// Flags stamped at creation; message queues park their `O_NONBLOCK`
    /// here.
    pub(crate) flags: OpenFlags,
    /// Tasks blocked until enough bytes arrive.
    pub(crate) readers: TaskQueue,
    /// Tasks blocked until enough space opens.
    pub(crate) writers: TaskQueue,
}

/// Resolves a pipe index that the kernel itself produced. A miss means the
/// pipe table has been corrupted, which is not a recoverable condition.
pub(crate) fn pipe_mut(pipes: &mut [Option<Pipe>], idx: usize) -> &mut Pipe {
    match pipes[idx].as_mut() {
        Some(p) => p,
        None => panic!("pipe table corrupted"),
    }
}

impl Kernel {
    /// Allocates pool storage and a pipe-table slot for a new pipe of
    /// `capacity` bytes.
    pub(crate) fn pipe_create(
        &mut self,
        capacity: usize,
        flags: OpenFlags,
    ) -> Option<usize> {
        let slot = self.pipes.iter().position(|p| p.is_none())?;
        let storage = self.pool.alloc(capacity)?;
        self.pipes[slot] = Some(Pipe {
            storage,
            ring: RingState::new(),
            flags,
            readers: TaskQueue::new(),
            writers: TaskQueue::new(),
        });
        Some(slot)
    }

    /// Reads exactly `dst.len()` bytes on behalf of the current task.
    ///
    /// Completes only once that many bytes are queued; otherwise the caller
    /// either gets `-EAGAIN` (non-blocking) or is parked on the readers
    /// queue with its syscall pending.
    pub(crate) fn pipe_read_bytes(
        &mut self,
        pidx: usize,
        dst: &mut [u8],
        nonblock: bool,
    ) -> SysResult {
        let Self {
            pipes,
            pool,
            tasks,
            ready,
            current,
            ..
        } = self;
        let pipe = pipe_mut(pipes, pidx);
        let mut q = RingQ::new(&mut pipe.ring, pool.bytes_mut(pipe.storage));

        if q.len() >= dst.len() {
            uassert!(q.pop_into(dst).is_ok());
            wait::wake_up(&mut pipe.writers, tasks, ready);
            tasks[*current].syscall_pending = false;
            SysResult::Done(dst.len() as i32)
        } else if nonblock {
            tasks[*current].syscall_pending = false;
            SysResult::Done(-EAGAIN)
        } else {
            wait::prepare_to_wait(&mut pipe.readers, tasks, *current, TaskState::Wait);
            tasks[*current].syscall_pending = true;
            SysResult::Pending
        }
    }

    /// Writes all of `src`, with blocking behavior symmetric to
    /// [`Kernel::pipe_read_bytes`].
    pub(crate) fn pipe_write_bytes(
        &mut self,
        pidx: usize,
        src: &[u8],
        nonblock: bool,
    ) -> SysResult {
        let Self {
            pipes,
            pool,
            tasks,
            ready,
            current,
            ..
        } = self;
        let pipe = pipe_mut(pipes, pidx);
        let mut q = RingQ::new(&mut pipe.ring, pool.bytes_mut(pipe.storage));

        if q.free() >= src.len() {
            uassert!(q.push(src).is_ok());
            wait::wake_up(&mut pipe.readers, tasks, ready);
            tasks[*current].syscall_pending = false;
            SysResult::Done(src.len() as i32)
        } else if nonblock {
            tasks[*current].syscall_pending = false;
            SysResult::Done(-EAGAIN)
        } else {
            wait::prepare_to_wait(&mut pipe.writers, tasks, *current, TaskState::Wait);
            tasks[*current].syscall_pending = true;
            SysResult::Pending
        }
    }

    /// User-buffer wrappers around the byte operations.
    pub(crate) fn pipe_read_user(
        &mut self,
        pidx: usize,
        mut dst: USlice<u8>,
        nonblock: bool,
    ) -> SysResult {
        // Safety: the slice was validated at the syscall boundary, and the
        // owning task stays suspended while we hold it.
        let dst = unsafe { dst.assume_writable() };
        self.pipe_read_bytes(pidx, dst, nonblock)
    }

    pub(crate) fn pipe_write_user(
        &mut self,
        pidx: usize,
        src: USlice<u8>,
        nonblock: bool,
    ) -> SysResult {
        // Safety: as above.
        let src = unsafe { src.assume_readable() };
        self.pipe_write_bytes(pidx, src, nonblock)
    }

    /// Single-byte enqueue from interrupt context. Never blocks; a full
    /// pipe drops the byte. Must run with kernel interrupts masked, via
    /// [`crate::arch::with_kernel`].
    pub fn pipe_isr_put(&mut self, pidx: usize, byte: u8) {
        let Self {
            pipes,
            pool,
            tasks,
            ready,
            ..
        } = self;
        let pipe = pipe_mut(pipes, pidx);
        let mut q = RingQ::new(&mut pipe.ring, pool.bytes_mut(pipe.storage));
        if q.push_byte(byte).is_ok() {
            wait::wake_up(&mut pipe.readers, tasks, ready);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::testutil::kernel_with_tasks;

    fn pipe(k: &mut Kernel, cap: usize) -> usize {
        k.pipe_create(cap, OpenFlags::empty()).unwrap()
    }

    #[test]
    fn read_blocks_until_bytes_arrive() {
        let mut k = kernel_with_tasks(2, 2);
        let p = pipe(&mut k, 16);
        let reader = k.current;

        let mut buf = [0u8; 5];
        assert_eq!(k.pipe_read_bytes(p, &mut buf, false), SysResult::Pending);
        assert!(k.tasks[reader].syscall_pending);
        assert_eq!(k.tasks[reader].state, TaskState::Wait);

        k.schedule();
        let writer = k.current;
        assert_ne!(writer, reader);

        assert_eq!(
            k.pipe_write_bytes(p, b"hello", false),
            SysResult::Done(5)
        );
        // The write woke the reader; let the writer's quantum expire so the
        // scheduler hands the CPU back, then the reader's retry completes.
        assert_eq!(k.tasks[reader].state, TaskState::Ready);
        k.tick_update();
        k.schedule();
        assert_eq!(k.current, reader);
        assert_eq!(k.pipe_read_bytes(p, &mut buf, false), SysResult::Done(5));
        assert_eq!(&buf, b"hello");
        assert!(!k.tasks[reader].syscall_pending);
    }

    #[test]
    fn short_read_waits_for_full_count() {
        let mut k = kernel_with_tasks(1, 2);
        let p = pipe(&mut k, 16);
        k.pipe_write_bytes(p, b"hi", false).let_done();

        let mut buf = [0u8; 5];
        // Two of five bytes present: still a blocking condition.
        assert_eq!(k.pipe_read_bytes(p, &mut buf, false), SysResult::Pending);
    }

    #[test]
    fn nonblocking_empty_and_full() {
        let mut k = kernel_with_tasks(1, 2);
        let p = pipe(&mut k, 4);
        let mut buf = [0u8; 1];

        assert_eq!(
            k.pipe_read_bytes(p, &mut buf, true),
            SysResult::Done(-EAGAIN)
        );
        assert!(!k.current_task().syscall_pending);

        k.pipe_write_bytes(p, b"abcd", false).let_done();
        assert_eq!(
            k.pipe_write_bytes(p, b"e", true),
            SysResult::Done(-EAGAIN)
        );
        // No wait-queue growth from the non-blocking paths.
        let pipe = k.pipes[p].as_ref().unwrap();
        assert!(pipe.readers.is_empty() && pipe.writers.is_empty());
    }

    #[test]
    fn write_blocks_on_full_and_resumes() {
        let mut k = kernel_with_tasks(2, 2);
        let p = pipe(&mut k, 4);
        let writer = k.current;

        k.pipe_write_bytes(p, b"abcd", false).let_done();
        assert_eq!(k.pipe_write_bytes(p, b"ef", false), SysResult::Pending);
        assert!(k.tasks[writer].syscall_pending);

        k.schedule();
        let mut buf = [0u8; 2];
        k.pipe_read_bytes(p, &mut buf, false).let_done();
        assert_eq!(&buf, b"ab");
        assert_eq!(k.tasks[writer].state, TaskState::Ready);
    }

    #[test]
    fn isr_put_drops_on_full() {
        let mut k = kernel_with_tasks(1, 2);
        let p = pipe(&mut k, 2);

        k.pipe_isr_put(p, b'x');
        k.pipe_isr_put(p, b'y');
        k.pipe_isr_put(p, b'z'); // dropped

        let mut buf = [0u8; 2];
        k.pipe_read_bytes(p, &mut buf, false).let_done();
        assert_eq!(&buf, b"xy");
        let mut one = [0u8; 1];
        assert_eq!(k.pipe_read_bytes(p, &mut one, true), SysResult::Done(-EAGAIN));
    }

    #[test]
    fn conservation_across_interleaved_io() {
        let mut k = kernel_with_tasks(1, 2);
        let p = pipe(&mut k, 8);
        let mut seen = Vec::new();
        let mut fed = Vec::new();

        for round in 0u8..16 {
            let chunk = [round, round.wrapping_mul(3)];
            if let SysResult::Done(n) = k.pipe_write_bytes(p, &chunk, true) {
                if n > 0 {
                    fed.extend_from_slice(&chunk);
                }
            }
            let mut out = [0u8; 2];
            if let SysResult::Done(n) = k.pipe_read_bytes(p, &mut out, true) {
                if n > 0 {
                    seen.extend_from_slice(&out);
                }
            }
        }
        let mut rest = vec![0u8; k.pipes[p].as_ref().unwrap().ring.len()];
        k.pipe_read_bytes(p, &mut rest, true).let_done();
        seen.extend_from_slice(&rest);
        assert_eq!(seen, fed);
    }

    impl SysResult {
        /// Test shorthand: assert completion, discard the value.
        fn let_done(self) {
            assert!(matches!(self, SysResult::Done(v) if v >= 0));
        }
    }
}
