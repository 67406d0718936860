// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small preemptive kernel for ARM-M class microcontrollers.
//!
//! The kernel multiplexes a fixed table of tasks over one CPU. Tasks run
//! unprivileged and enter the kernel only through a supervisor-call trap or
//! the system tick; the kernel itself is not a task, it is the loop that sits
//! between traps ([`kernel::Kernel::main_loop`]) and drives scheduling.
//!
//! Blocking works by *re-entering* syscalls rather than by storing
//! continuations: a handler that cannot complete parks the caller on a wait
//! queue and sets the task's `syscall_pending` flag, and the main loop runs
//! the same handler again the next time the task is scheduled. Handler bodies
//! are therefore idempotent up to the point where they first suspend.
//!
//! # Design principles
//!
//! 1. Static configuration. The task table, pipe table, and every other
//!    kernel structure takes a single shape fixed at compile time; nothing is
//!    allocated after boot beyond bumping the memory pool.
//! 2. A strong preference for safe code. Task stacks are plain `u32` arrays
//!    and the saved user frame is index arithmetic over them, which keeps the
//!    scheduler, `fork`, and the syscall marshalling testable on a host.
//! 3. Simple and clear algorithms over fast and clever ones.

#![cfg_attr(not(test), no_std)]

/// Kernel diagnostic logging. Compiles to nothing unless the
/// `klog-semihosting` feature routes it to the debugger console.
#[cfg(feature = "klog-semihosting")]
macro_rules! klog {
    ($($tt:tt)*) => {
        { let _ = cortex_m_semihosting::hprintln!($($tt)*); }
    };
}

#[cfg(not(feature = "klog-semihosting"))]
macro_rules! klog {
    ($($tt:tt)*) => {{}};
}

/// Check for conditions that should never occur in a correct kernel, at a
/// smaller code-size cost than a formatted panic.
macro_rules! uassert {
    ($cond:expr) => {
        if !$cond {
            panic!("Assertion failed!");
        }
    };
}

pub mod arch;

pub mod err;
pub mod fd;
pub mod fs;
pub mod kernel;
pub mod list;
pub mod mpool;
pub mod mqueue;
pub mod mutex;
pub mod pipe;
pub mod sched;
pub mod startup;
pub mod syscalls;
pub mod task;
pub mod time;
pub mod umem;
pub mod wait;
