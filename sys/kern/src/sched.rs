// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The scheduler and the system tick.
//!
//! Selection is strictly by priority, FIFO within a priority, with no aging
//! and no time slicing: a compute-bound task at the highest occupied
//! priority runs until it blocks or something more important wakes. A task
//! preempted while Running goes to the *tail of its own ready queue*, so
//! equal-priority tasks round-robin on tick boundaries; the sleep queue
//! holds exactly the timed sleepers.

use abi::{Priority, TaskState, TASK_PRIORITY_MAX};

use crate::kernel::Kernel;
use crate::list::TaskQueue;
use crate::task::Task;

/// Number of distinct priorities, and hence of ready queues.
pub const PRIORITY_LEVELS: usize = TASK_PRIORITY_MAX as usize + 1;

/// The per-priority ready queues.
///
/// Invariant: `queues[p]` contains exactly the tasks with `priority == p`
/// and state Ready. `enqueue` maintains this by deriving the queue from the
/// task and stamping the state itself.
#[derive(Debug, Default)]
pub struct ReadyQueues {
    queues: [TaskQueue; PRIORITY_LEVELS],
}

impl ReadyQueues {
    pub const fn new() -> Self {
        ReadyQueues {
            queues: [TaskQueue::new(); PRIORITY_LEVELS],
        }
    }

    /// Marks `idx` Ready and appends it to the queue for its priority.
    pub fn enqueue(&mut self, tasks: &mut [Task], idx: usize) {
        let pri = usize::from(tasks[idx].priority.0);
        tasks[idx].state = TaskState::Ready;
        self.queues[pri].push_back(tasks, idx);
    }

    /// Most important priority with a non-empty queue.
    pub fn highest_occupied(&self) -> Option<Priority> {
        (0..PRIORITY_LEVELS)
            .rev()
            .find(|&p| !self.queues[p].is_empty())
            .map(|p| Priority(p as u8))
    }

    /// Pops the head of the queue for `pri`.
    pub fn pop_at(&mut self, tasks: &mut [Task], pri: Priority) -> Option<usize> {
        self.queues[usize::from(pri.0)].pop_front(tasks)
    }

    /// Unlinks a Ready task, for priority changes.
    pub fn remove(&mut self, tasks: &mut [Task], idx: usize) {
        let pri = usize::from(tasks[idx].priority.0);
        self.queues[pri].remove(tasks, idx);
    }

    /// Read access to one queue, for assertions and diagnostics.
    pub fn queue(&self, pri: Priority) -> &TaskQueue {
        &self.queues[usize::from(pri.0)]
    }
}

impl Kernel {
    /// Runs one scheduling pass. Called by the main loop after every trap.
    ///
    /// Protocol:
    ///
    /// 1. Bail out while `irq_off` is set; `set_irq` suppresses
    ///    rescheduling until interrupts are re-enabled.
    /// 2. Sweep the sleep queue: every sleeper whose ticks have run out
    ///    moves to the ready queue for its priority.
    /// 3. Find the most important occupied ready queue.
    /// 4. If the current task is still Running, it keeps the CPU unless a
    ///    strictly more important task is ready, in which case it is
    ///    requeued behind its own priority.
    /// 5. Pop the winner and make it Running.
    pub fn schedule(&mut self) {
        if self.irq_off {
            return;
        }

        // Sleep-queue sweep. The successor is read before each task is
        // (possibly) unlinked.
        let Self {
            sleep,
            tasks,
            ready,
            ..
        } = self;
        let mut cur = sleep.head();
        while let Some(i) = cur {
            let next = TaskQueue::next_of(tasks, i);
            if tasks[i].remaining_ticks == 0 {
                sleep.remove(tasks, i);
                ready.enqueue(tasks, i);
            }
            cur = next;
        }

        let Some(pri) = self.ready.highest_occupied() else {
            // Nothing else can run. The idle task is always runnable, so
            // the current task must still own the CPU.
            uassert!(self.tasks[self.current].is_running());
            return;
        };

        if self.tasks[self.current].is_running() {
            if pri.is_more_important_than(self.tasks[self.current].priority) {
                let Self {
                    tasks,
                    ready,
                    current,
                    ..
                } = self;
                ready.enqueue(tasks, *current);
            } else {
                return;
            }
        }

        let Self {
            tasks,
            ready,
            current,
            ..
        } = self;
        match ready.pop_at(tasks, pri) {
            Some(next) => {
                tasks[next].state = TaskState::Running;
                *current = next;
            }
            None => panic!("no runnable tasks"),
        }
    }

    /// Runs the tick bookkeeping. Called by the main loop when the trap was
    /// the system timer; never schedules by itself.
    ///
    /// The monotonic clock advances strictly before the sleep timers are
    /// decremented, which in turn happens strictly before the scheduling
    /// pass that follows this call.
    pub fn tick_update(&mut self) {
        self.ticks += 1;

        let Self {
            tasks,
            ready,
            current,
            sleep,
            ..
        } = self;

        // The running task's time quantum is spent; requeue it behind its
        // peers so equal-priority tasks share the CPU.
        if tasks[*current].is_running() {
            ready.enqueue(tasks, *current);
        }

        let mut cur = sleep.head();
        while let Some(i) = cur {
            let next = TaskQueue::next_of(tasks, i);
            if tasks[i].remaining_ticks > 0 {
                tasks[i].remaining_ticks -= 1;
            }
            cur = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::testutil::kernel_with_tasks;
    use crate::wait;

    #[test]
    fn equal_priority_round_robin_on_tick() {
        let mut k = kernel_with_tasks(2, 2);
        let first = k.current;

        let mut order = Vec::new();
        for _ in 0..6 {
            k.tick_update();
            k.schedule();
            order.push(k.current);
        }
        let other = 1 - first;
        assert_eq!(order, vec![other, first, other, first, other, first]);
    }

    #[test]
    fn higher_priority_ready_task_preempts() {
        let mut k = kernel_with_tasks(1, 1);
        let low = k.current;
        let high = k.task_create(0x2000, Priority(3)).unwrap() as usize;

        k.schedule();
        assert_eq!(k.current, high);
        // The preempted task went to its ready queue, not the sleep queue.
        assert_eq!(k.tasks[low].state, TaskState::Ready);
        assert!(k.ready.queue(Priority(1)).contains(&k.tasks, low));
        assert!(k.sleep.is_empty());
    }

    #[test]
    fn lower_priority_ready_task_does_not_preempt() {
        let mut k = kernel_with_tasks(1, 4);
        let top = k.current;
        k.task_create(0x2000, Priority(2)).unwrap();

        k.schedule();
        assert_eq!(k.current, top);
        assert_eq!(k.tasks[top].state, TaskState::Running);
    }

    #[test]
    fn sleeper_wakes_no_earlier_than_its_ticks() {
        let mut k = kernel_with_tasks(2, 1);
        let sleeper = k.current;

        // Put the current task to sleep for 3 ticks.
        k.tasks[sleeper].remaining_ticks = 3;
        let Kernel {
            sleep,
            tasks,
            current,
            ..
        } = &mut *k;
        wait::prepare_to_wait(sleep, tasks, *current, TaskState::Wait);
        k.schedule();
        assert_ne!(k.current, sleeper);

        for tick in 1..=3 {
            k.tick_update();
            k.schedule();
            if tick < 3 {
                assert_ne!(k.current, sleeper, "woke early at tick {tick}");
            }
        }
        // Equal priority: the sleeper is ready but need not run yet.
        assert_eq!(k.tasks[sleeper].state, TaskState::Ready);
    }

    #[test]
    fn irq_off_suppresses_rescheduling() {
        let mut k = kernel_with_tasks(1, 1);
        let low = k.current;
        k.irq_off = true;
        k.task_create(0x2000, Priority(5)).unwrap();

        k.schedule();
        assert_eq!(k.current, low);

        k.irq_off = false;
        k.schedule();
        assert_ne!(k.current, low);
    }

    #[test]
    fn monotonic_clock_counts_ticks() {
        let mut k = kernel_with_tasks(1, 1);
        let before = u64::from(k.now());
        for _ in 0..5 {
            k.tick_update();
            k.schedule();
        }
        assert_eq!(u64::from(k.now()), before + 5);
    }
}
