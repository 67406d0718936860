// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel state root and its main loop.
//!
//! All mutable kernel state -- task table, queues, pipes, files, message
//! queues, mutexes, the memory pool, the clock -- lives in one [`Kernel`]
//! value, and its methods (spread across the sibling modules) are the only
//! paths of mutation. On the real machine exactly one `Kernel` exists, in a
//! static initialized at boot; on a host, tests build as many as they like.

use abi::{
    Priority, FILE_CNT_MAX, MQUEUE_CNT_MAX, MUTEX_CNT_MAX, PIPE_CNT_MAX,
    TASK_CNT_MAX, WAITQ_CNT_MAX,
};

use crate::fd::File;
use crate::list::TaskQueue;
use crate::mpool::MemPool;
use crate::mqueue::MqEntry;
use crate::mutex::Mutex;
use crate::pipe::Pipe;
use crate::sched::ReadyQueues;
use crate::task::Task;
use crate::time::Timestamp;

/// Length of the global file table: the per-task reply FIFOs, then the
/// run-time registered files.
pub const FILE_TABLE_LEN: usize = TASK_CNT_MAX + FILE_CNT_MAX;

/// Why control returned from user mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trap {
    /// Supervisor call; the number is in the trapping task's saved frame.
    Syscall,
    /// System tick interrupt.
    Tick,
}

pub struct Kernel {
    pub(crate) tasks: [Task; TASK_CNT_MAX],
    pub(crate) task_cnt: usize,
    /// Index of the task whose state is Running.
    pub(crate) current: usize,

    pub(crate) ready: ReadyQueues,
    /// Timed sleepers only; everything else blocked waits on some
    /// primitive's own queue.
    pub(crate) sleep: TaskQueue,

    /// Monotonic tick count since boot.
    pub(crate) ticks: u64,
    /// While set, the scheduler refuses to switch tasks; flipped by the
    /// `set_irq` syscall together with the hardware interrupt mask.
    pub(crate) irq_off: bool,

    pub(crate) pool: MemPool,
    pub(crate) pipes: [Option<Pipe>; PIPE_CNT_MAX],
    pub(crate) files: [Option<File>; FILE_TABLE_LEN],
    pub(crate) mqueues: [Option<MqEntry>; MQUEUE_CNT_MAX],
    pub(crate) mutexes: [Option<Mutex>; MUTEX_CNT_MAX],

    /// Wait queues handed out to drivers, so that device wait lists stay
    /// kernel-visible.
    pub(crate) waitqs: [TaskQueue; WAITQ_CNT_MAX],
    pub(crate) waitq_cnt: usize,
}

impl Kernel {
    /// Builds a kernel with empty tables. [`Kernel::init_reply_fifos`] must
    /// run before any task interacts with the file layer.
    pub fn new() -> Self {
        Kernel {
            tasks: core::array::from_fn(|i| Task::new(i as u32)),
            task_cnt: 0,
            current: 0,
            ready: ReadyQueues::new(),
            sleep: TaskQueue::new(),
            ticks: 0,
            irq_off: false,
            pool: MemPool::new(),
            pipes: core::array::from_fn(|_| None),
            files: core::array::from_fn(|_| None),
            mqueues: core::array::from_fn(|_| None),
            mutexes: core::array::from_fn(|_| None),
            waitqs: [TaskQueue::new(); WAITQ_CNT_MAX],
            waitq_cnt: 0,
        }
    }

    /// Creates a task in the next free table slot and queues it to run.
    /// Returns the new pid, or `None` if the table is full.
    pub fn task_create(&mut self, entry: u32, priority: Priority) -> Option<u32> {
        if self.task_cnt >= TASK_CNT_MAX {
            return None;
        }
        let idx = self.task_cnt;
        self.tasks[idx].initialize(entry, crate::arch::task_return_addr(), priority);

        let Self { tasks, ready, .. } = self;
        ready.enqueue(tasks, idx);
        self.task_cnt += 1;
        Some(idx as u32)
    }

    pub fn current_task(&self) -> &Task {
        &self.tasks[self.current]
    }

    pub fn current_task_mut(&mut self) -> &mut Task {
        &mut self.tasks[self.current]
    }

    /// The monotonic clock, in ticks since boot.
    pub fn now(&self) -> Timestamp {
        Timestamp::from(self.ticks)
    }

    /// The loop that runs the machine. Never returns.
    ///
    /// The shape follows directly from the pending-syscall protocol: a task
    /// whose last syscall is still pending is *not* resumed into user mode;
    /// instead the dispatcher re-enters the same handler, which either
    /// completes (writing the saved `r0` and clearing the flag) or parks the
    /// task again.
    pub fn main_loop(&mut self) -> ! {
        uassert!(self.task_cnt > 0);
        self.schedule();
        loop {
            let trap = if self.current_task().syscall_pending {
                Trap::Syscall
            } else {
                crate::arch::enter_user(self)
            };

            match trap {
                Trap::Tick => self.tick_update(),
                Trap::Syscall => self.dispatch_syscall(),
            }

            self.schedule();
        }
    }

    /// Renders a pid/priority/name table for each live task, for the shell's
    /// process lister.
    pub fn sprint_tasks(&self, out: &mut dyn core::fmt::Write) -> core::fmt::Result {
        writeln!(out, "PID\tPR\tNAME")?;
        for task in &self.tasks[..self.task_cnt] {
            writeln!(out, "{}\t{}\t{}", task.pid, task.priority.0, task.name_str())?;
        }
        Ok(())
    }

    /// Counts queue memberships of a task across every kernel queue. Debug
    /// aid for the "at most one queue" invariant; O(everything).
    #[cfg(test)]
    pub(crate) fn queue_memberships(&self, idx: usize) -> usize {
        let mut n = 0;
        for p in 0..crate::sched::PRIORITY_LEVELS {
            if self.ready.queue(Priority(p as u8)).contains(&self.tasks, idx) {
                n += 1;
            }
        }
        if self.sleep.contains(&self.tasks, idx) {
            n += 1;
        }
        for pipe in self.pipes.iter().flatten() {
            if pipe.readers.contains(&self.tasks, idx) {
                n += 1;
            }
            if pipe.writers.contains(&self.tasks, idx) {
                n += 1;
            }
        }
        for m in self.mutexes.iter().flatten() {
            if m.waiters.contains(&self.tasks, idx) {
                n += 1;
            }
        }
        for q in &self.waitqs[..self.waitq_cnt] {
            if q.contains(&self.tasks, idx) {
                n += 1;
            }
        }
        n
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use abi::TaskState;

    /// A kernel with IPC plumbing up, ready for tasks.
    pub(crate) fn boxed_kernel() -> Box<Kernel> {
        let mut k = Box::new(Kernel::new());
        k.init_reply_fifos();
        k
    }

    /// A kernel running `n` fresh tasks of equal priority; the first one
    /// created holds the CPU.
    pub(crate) fn kernel_with_tasks(n: usize, pri: u8) -> Box<Kernel> {
        let mut k = boxed_kernel();
        for _ in 0..n {
            k.task_create(0x1000, Priority(pri)).unwrap();
        }
        k.schedule();
        k
    }

    /// Stages and dispatches a syscall from the current task, then runs the
    /// scheduler, mirroring one main-loop iteration. Only usable for
    /// syscalls whose arguments fit in 32 bits on the host.
    pub(crate) fn syscall(k: &mut Kernel, nr: abi::Sysnum, args: [u32; 4]) {
        let t = k.current_task_mut();
        t.set_syscall_num(nr as u32);
        for (i, &a) in args.iter().enumerate() {
            t.set_arg(i, a);
        }
        k.dispatch_syscall();
        k.schedule();
    }

    /// One main-loop step for a task resumed with its syscall still
    /// pending.
    pub(crate) fn retry_pending(k: &mut Kernel) {
        assert!(k.current_task().syscall_pending);
        k.dispatch_syscall();
        k.schedule();
    }

    #[test]
    fn exactly_one_running_task() {
        let mut k = kernel_with_tasks(3, 2);
        for _ in 0..5 {
            k.tick_update();
            k.schedule();
            let running: Vec<usize> = (0..k.task_cnt)
                .filter(|&i| k.tasks[i].state == TaskState::Running)
                .collect();
            assert_eq!(running, vec![k.current]);
        }
    }

    #[test]
    fn tasks_live_on_at_most_one_queue() {
        let mut k = kernel_with_tasks(3, 2);
        k.tick_update();
        k.schedule();
        for i in 0..k.task_cnt {
            let expected = if i == k.current { 0 } else { 1 };
            assert_eq!(k.queue_memberships(i), expected, "task {i}");
        }
    }

    #[test]
    fn task_lister_renders_pid_priority_name() {
        let mut k = kernel_with_tasks(2, 2);
        k.tasks[0].name[..4].copy_from_slice(b"idle");
        let mut out = String::new();
        k.sprint_tasks(&mut out).unwrap();
        assert!(out.starts_with("PID\tPR\tNAME"));
        assert!(out.contains("0\t2\tidle"));
        assert!(out.contains("1\t2\t"));
    }

    #[test]
    fn task_table_exhaustion() {
        let mut k = boxed_kernel();
        for _ in 0..TASK_CNT_MAX {
            assert!(k.task_create(0x1000, Priority(1)).is_some());
        }
        assert!(k.task_create(0x1000, Priority(1)).is_none());
    }
}
