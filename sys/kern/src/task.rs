// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of tasks.
//!
//! # The saved user frame
//!
//! A task's register file lives *in its own stack* while the task is not
//! running. The trap entry sequence (see `arch`) deposits a software-saved
//! block -- `r4..r11`, the EXC_RETURN word, and a copy of the syscall number
//! from `r11` -- directly below the hardware-stacked exception frame, and
//! hands the kernel the resulting stack top. Everything the kernel knows
//! about a suspended task's registers is index arithmetic from that top:
//!
//! ```text
//!   stack_top -> r4 r5 r6 r7 r8 r9 r10 r11 EXC_RETURN SYSNUM   (software)
//!                [s16..s31 when FPU state was stacked]
//!                r0 r1 r2 r3 r12 lr pc xpsr                    (hardware)
//! ```
//!
//! Bit 4 of the saved EXC_RETURN selects between the two layouts, exactly as
//! the processor's lazy FP stacking does. The four argument slots a syscall
//! may read, and the `r0` slot it writes a result into, are the hardware
//! `r0..r3` words; writing them in place is how a syscall "returns."
//!
//! Keeping the frame as plain indices into a `u32` array (rather than raw
//! pointers) is what lets `fork`'s stack copy and all of the syscall
//! marshalling run -- and be tested -- on a host.

use abi::{
    Priority, TaskState, TASK_NAME_LEN_MAX, TASK_STACK_WORDS,
};

use crate::fd::FdEntry;
use crate::list::{Linked, QueueLink};

/// Words in the software-saved block: r4..r11, EXC_RETURN, syscall number.
const FRAME_SW_WORDS: usize = 10;
/// Offset of the saved EXC_RETURN word within the software block.
const FRAME_EXC_RETURN: usize = 8;
/// Offset of the saved syscall number within the software block.
const FRAME_SYSNUM: usize = 9;
/// Words the FPU layout inserts between the software block and the hardware
/// frame (s16..s31).
const FRAME_FPU_EXTRA: usize = 16;
/// Words in the hardware-stacked exception frame: r0..r3, r12, lr, pc, xpsr.
const FRAME_HW_WORDS: usize = 8;

/// Size of a freshly fabricated (FPU-free) frame.
pub const INITIAL_FRAME_WORDS: usize = FRAME_SW_WORDS + FRAME_HW_WORDS;

/// EXC_RETURN bit 4: set means the standard (FPU-free) frame layout.
const EXC_RETURN_STD_FRAME: u32 = 1 << 4;
/// EXC_RETURN value for resuming a task: thread mode, process stack, no FPU
/// state.
pub const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Initial xPSR: just the Thumb bit, the minimum required.
const INITIAL_XPSR: u32 = 1 << 24;

// Hardware-frame slot offsets.
const HW_R0: usize = 0;
const HW_LR: usize = 5;
const HW_PC: usize = 6;
const HW_XPSR: usize = 7;

/// Internal representation of a task.
#[derive(Debug)]
pub struct Task {
    /// The task's stack. Also holds the saved register frame while the task
    /// is suspended.
    stack: [u32; TASK_STACK_WORDS],
    /// Word index of the saved frame base within `stack`. Always even (the
    /// hardware requires 8-byte stack alignment) and always leaves room for
    /// a full frame above it.
    stack_top: usize,

    /// Task id; equal to this task's index in the task table.
    pub(crate) pid: u32,
    /// Short name, NUL-terminated, set via `set_program_name`.
    pub(crate) name: [u8; TASK_NAME_LEN_MAX],
    /// State used to make scheduling decisions.
    pub(crate) state: TaskState,
    /// Current priority of the task.
    pub(crate) priority: Priority,
    /// Ticks left before a timed sleep expires. Nonzero exactly while the
    /// task is on the sleep queue.
    pub(crate) remaining_ticks: u32,
    /// True while the task's last syscall has produced no user-visible
    /// result; the dispatcher re-enters the same syscall body instead of
    /// resuming user code.
    pub(crate) syscall_pending: bool,

    /// Per-task file-descriptor table.
    pub(crate) fdtable: [FdEntry; abi::FILE_DESC_CNT_MAX],
    pub(crate) fd_cnt: usize,

    /// Queue membership; a task is on at most one queue at a time.
    pub(crate) link: QueueLink,
}

impl Task {
    /// Creates an empty table slot. The slot only becomes a live task once
    /// `initialize` or `fork_from` runs against it.
    pub fn new(pid: u32) -> Self {
        let mut task = Task {
            stack: [0; TASK_STACK_WORDS],
            stack_top: TASK_STACK_WORDS - INITIAL_FRAME_WORDS,
            pid,
            name: [0; TASK_NAME_LEN_MAX],
            state: TaskState::Wait,
            priority: Priority::IDLE,
            remaining_ticks: 0,
            syscall_pending: false,
            fdtable: Default::default(),
            fd_cnt: 0,
            link: QueueLink::default(),
        };
        // Even a dormant slot keeps a well-formed (standard-layout) frame,
        // so the accessors stay in bounds no matter who looks.
        task.stack[task.stack_top + FRAME_EXC_RETURN] = EXC_RETURN_THREAD_PSP;
        task
    }

    /// Fabricates the initial frame for a fresh task, so that the first
    /// resume drops into `entry` in unprivileged thread mode. A return from
    /// the task function lands on `return_to`.
    pub(crate) fn initialize(&mut self, entry: u32, return_to: u32, priority: Priority) {
        let top = TASK_STACK_WORDS - INITIAL_FRAME_WORDS;
        self.stack[top..].fill(0);
        self.stack[top + FRAME_EXC_RETURN] = EXC_RETURN_THREAD_PSP;

        let hw = top + FRAME_SW_WORDS;
        self.stack[hw + HW_PC] = entry | 1; // thumb
        self.stack[hw + HW_LR] = return_to | 1;
        self.stack[hw + HW_XPSR] = INITIAL_XPSR;

        self.stack_top = top;
        self.priority = priority;
        self.remaining_ticks = 0;
        self.syscall_pending = false;
    }

    /// Populates this slot as a copy of `parent`, per the `fork` contract:
    /// only the *used* portion of the parent's stack is copied, at the same
    /// offset from the stack base, so the child resumes at the parent's
    /// supervisor-call return site.
    ///
    /// The caller is responsible for the differing `r0` return values and
    /// for queueing the child.
    pub(crate) fn fork_from(&mut self, parent: &Task) {
        let top = parent.stack_top;
        self.stack[top..].copy_from_slice(&parent.stack[top..]);
        self.stack_top = top;

        // The child must never sink to the idle priority.
        self.priority = if parent.priority == Priority::IDLE {
            Priority::MIN
        } else {
            parent.priority
        };
        self.remaining_ticks = 0;
        self.syscall_pending = false;
        self.name = [0; TASK_NAME_LEN_MAX];
        self.fdtable = Default::default();
        self.fd_cnt = 0;
    }

    /// Base index of the hardware frame, accounting for stacked FPU state.
    fn hw_base(&self) -> usize {
        let base = self.stack_top + FRAME_SW_WORDS;
        if self.stack[self.stack_top + FRAME_EXC_RETURN] & EXC_RETURN_STD_FRAME != 0 {
            base
        } else {
            base + FRAME_FPU_EXTRA
        }
    }

    /// Reads syscall argument register 0.
    pub fn arg0(&self) -> u32 {
        self.stack[self.hw_base() + HW_R0]
    }
    /// Reads syscall argument register 1.
    pub fn arg1(&self) -> u32 {
        self.stack[self.hw_base() + HW_R0 + 1]
    }
    /// Reads syscall argument register 2.
    pub fn arg2(&self) -> u32 {
        self.stack[self.hw_base() + HW_R0 + 2]
    }
    /// Reads syscall argument register 3.
    pub fn arg3(&self) -> u32 {
        self.stack[self.hw_base() + HW_R0 + 3]
    }

    /// Writes the syscall return slot (saved `r0`); the value pops out into
    /// `r0` when the task next returns to user mode.
    pub fn set_ret0(&mut self, v: u32) {
        let hw = self.hw_base();
        self.stack[hw + HW_R0] = v;
    }

    /// Writes an argument slot. Used by tests to stage syscall arguments the
    /// way a trap would.
    pub(crate) fn set_arg(&mut self, n: usize, v: u32) {
        uassert!(n < 4);
        let hw = self.hw_base();
        self.stack[hw + HW_R0 + n] = v;
    }

    /// Reads the saved syscall number.
    pub fn syscall_num(&self) -> u32 {
        self.stack[self.stack_top + FRAME_SYSNUM]
    }

    pub(crate) fn set_syscall_num(&mut self, n: u32) {
        self.stack[self.stack_top + FRAME_SYSNUM] = n;
    }

    /// Current frame base, as a word index.
    pub fn stack_top(&self) -> usize {
        self.stack_top
    }

    /// Address of the frame base, for handoff to the resume sequence.
    pub fn stack_top_addr(&self) -> usize {
        self.stack.as_ptr() as usize + self.stack_top * 4
    }

    /// Records the frame base reported by the trap entry sequence.
    pub fn set_stack_top_addr(&mut self, addr: usize) {
        let base = self.stack.as_ptr() as usize;
        uassert!(addr >= base);
        let words = (addr - base) / 4;
        uassert!(words % 2 == 0);
        uassert!(words + INITIAL_FRAME_WORDS <= TASK_STACK_WORDS);
        self.stack_top = words;
    }

    /// The task's name as UTF-8, for diagnostics.
    pub fn name_str(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..len]).unwrap_or("<bad-name>")
    }

    /// Checks if this task could hold the CPU right now.
    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }
}

impl Linked for Task {
    fn link(&self) -> &QueueLink {
        &self.link
    }
    fn link_mut(&mut self) -> &mut QueueLink {
        &mut self.link
    }
}
