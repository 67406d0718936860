// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The wait/wake core.
//!
//! Every blocking primitive in the kernel -- sleep, pipes, mutexes, message
//! queues, device reads -- suspends and resumes tasks through these two
//! operations and nothing else. `prepare_to_wait` parks the running task on
//! a wait queue; `wake_up` moves the queue's head back onto its ready queue.
//! Ordering is strictly FIFO per queue and there is no priority inheritance.
//!
//! `wake_up` is the only queue operation a driver may perform, and on the
//! real machine it must run with kernel interrupts masked (see
//! [`crate::arch::with_irqs_masked`]); the kernel-hosted wait queues handed
//! out by [`Kernel::alloc_waitq`] keep driver wait lists inside the kernel
//! where that discipline can be enforced.

use abi::TaskState;

use crate::kernel::Kernel;
use crate::list::TaskQueue;
use crate::sched::ReadyQueues;
use crate::task::Task;

/// Parks `idx` -- normally the running task, and hence on no queue -- at
/// the tail of `queue`, in the given state.
///
/// While `irq_off` suppresses rescheduling, a blocked task's syscall body
/// is re-entered with the task still parked from the previous attempt;
/// that call lands here a second time and must not re-link the node.
pub fn prepare_to_wait(
    queue: &mut TaskQueue,
    tasks: &mut [Task],
    idx: usize,
    state: TaskState,
) {
    if !tasks[idx].is_running() {
        return;
    }
    queue.push_back(tasks, idx);
    tasks[idx].state = state;
}

/// Pops the head of `queue`, marks it Ready, and appends it to the ready
/// queue for its priority. Returns the woken task's index, or `None` if the
/// queue was empty.
///
/// The woken task does not run immediately; it waits for the scheduler to
/// select it.
pub fn wake_up(
    queue: &mut TaskQueue,
    tasks: &mut [Task],
    ready: &mut ReadyQueues,
) -> Option<usize> {
    let idx = queue.pop_front(tasks)?;
    ready.enqueue(tasks, idx);
    Some(idx)
}

/// Handle for a kernel-hosted wait queue, as handed to drivers.
#[derive(Copy, Clone, Debug)]
pub struct WaitQId(pub(crate) usize);

impl Kernel {
    /// Reserves one of the kernel's driver wait queues. Called from driver
    /// init hooks at boot.
    pub fn alloc_waitq(&mut self) -> Option<WaitQId> {
        if self.waitq_cnt >= self.waitqs.len() {
            return None;
        }
        let id = WaitQId(self.waitq_cnt);
        self.waitq_cnt += 1;
        Some(id)
    }

    /// Suspends the current task on a driver wait queue and flags its
    /// syscall as pending. For use inside a blocking `CharDev` operation.
    pub fn block_current_on(&mut self, q: WaitQId) {
        let Self {
            waitqs,
            tasks,
            current,
            ..
        } = self;
        prepare_to_wait(&mut waitqs[q.0], tasks, *current, TaskState::Wait);
        tasks[*current].syscall_pending = true;
    }

    /// Wakes the head waiter of a driver wait queue, if any. This is the one
    /// kernel entry point a device ISR may call, via
    /// [`crate::arch::with_kernel`] under a raised interrupt mask.
    pub fn wake_one(&mut self, q: WaitQId) -> bool {
        let Self {
            waitqs,
            tasks,
            ready,
            ..
        } = self;
        wake_up(&mut waitqs[q.0], tasks, ready).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::testutil::kernel_with_tasks;

    #[test]
    fn prepare_then_wake_restores_ready() {
        let mut k = kernel_with_tasks(2, 2);
        let cur = k.current;
        let mut q = TaskQueue::new();

        prepare_to_wait(&mut q, &mut k.tasks, cur, TaskState::Wait);
        assert_eq!(k.tasks[cur].state, TaskState::Wait);
        assert!(q.contains(&k.tasks, cur));

        let woken = wake_up(&mut q, &mut k.tasks, &mut k.ready);
        assert_eq!(woken, Some(cur));
        assert_eq!(k.tasks[cur].state, TaskState::Ready);
        assert!(q.is_empty());
        assert!(k
            .ready
            .queue(k.tasks[cur].priority)
            .contains(&k.tasks, cur));
    }

    #[test]
    fn wake_order_is_fifo() {
        let mut k = kernel_with_tasks(4, 2);
        let mut q = TaskQueue::new();

        // Park tasks in a known order, driving each to Running first the
        // way the scheduler would.
        for _ in 0..3 {
            let cur = k.current;
            prepare_to_wait(&mut q, &mut k.tasks, cur, TaskState::Wait);
            k.schedule();
        }

        let first = wake_up(&mut q, &mut k.tasks, &mut k.ready);
        let second = wake_up(&mut q, &mut k.tasks, &mut k.ready);
        assert!(first.unwrap() < second.unwrap());
    }

    #[test]
    fn driver_waitq_block_and_wake() {
        let mut k = kernel_with_tasks(2, 2);
        let q = k.alloc_waitq().unwrap();
        let cur = k.current;

        k.block_current_on(q);
        assert!(k.tasks[cur].syscall_pending);
        k.schedule();
        assert_ne!(k.current, cur);

        assert!(k.wake_one(q));
        assert!(!k.wake_one(q));
        assert_eq!(k.tasks[cur].state, TaskState::Ready);
    }
}
