// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel, user tasks, and the
//! file-system task.
//!
//! Everything in here is part of the contract a task can observe: syscall
//! numbers, error codes, flag words, the records exchanged with the
//! file-system task over its request FIFO, and the compile-time sizing
//! constants that determine descriptor numbering.

#![no_std]

use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Number of slots in the task table. This also fixes the file-descriptor
/// numbering: descriptors below `TASK_CNT_MAX` address the per-task reply
/// FIFOs, descriptors at or above it address entries in the calling task's
/// own descriptor table.
pub const TASK_CNT_MAX: usize = 16;

/// Size of each task's stack, in 32-bit words.
pub const TASK_STACK_WORDS: usize = 256;

/// Maximum length of a task's short name, including the NUL terminator.
pub const TASK_NAME_LEN_MAX: usize = 16;

/// Maximum length of a file or message-queue name.
pub const FILE_NAME_LEN_MAX: usize = 32;

/// Maximum length of a path accepted from user code.
pub const PATH_LEN_MAX: usize = 64;

/// Per-task file-descriptor table capacity.
pub const FILE_DESC_CNT_MAX: usize = 8;

/// Number of global file slots beyond the per-task reply FIFOs.
pub const FILE_CNT_MAX: usize = 24;

/// Message-queue table capacity.
pub const MQUEUE_CNT_MAX: usize = 8;

/// Kernel mutex table capacity.
pub const MUTEX_CNT_MAX: usize = 16;

/// Number of wait queues the kernel can hand out to drivers.
pub const WAITQ_CNT_MAX: usize = 8;

/// Kernel pipe table capacity: one reply FIFO per task, plus FIFOs and
/// message-queue rings created at run time.
pub const PIPE_CNT_MAX: usize = TASK_CNT_MAX + FILE_CNT_MAX;

/// Size of the kernel memory pool that backs all pipe and message storage.
pub const MEM_POOL_SIZE: usize = 16 * 1024;

/// Capacity, in bytes, of each task's reply FIFO.
pub const REPLY_FIFO_SIZE: usize = 128;

/// Task index of the file-system task. The idle task forks it before any
/// other task, so it always lands in the slot after the idle task itself.
pub const FS_TASK_PID: u32 = 1;

/// `which` value accepted by `setpriority`; the process-granularity variants
/// of the POSIX call are the only ones this kernel implements.
pub const PRIO_PROCESS: u32 = 0;

// File type bits carried in `Stat::st_mode` and in the `dev` argument of
// `mknod`, matching the traditional POSIX encoding.
pub const S_IFIFO: u32 = 0o010000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFREG: u32 = 0o100000;

// Error numbers. File-flavored syscalls report failure as a negated error
// number (or a bare -1 for resource exhaustion); the `pthread_mutex_*` family
// returns these positively, as the POSIX thread functions do.
pub const EPERM: i32 = 1;
pub const ENOENT: i32 = 2;
pub const EBADF: i32 = 9;
pub const EAGAIN: i32 = 11;
pub const ENOMEM: i32 = 12;
pub const EINVAL: i32 = 22;
pub const ENFILE: i32 = 23;
pub const EMFILE: i32 = 24;
pub const ESPIPE: i32 = 29;
pub const EMSGSIZE: i32 = 90;

/// Indicates priority of a task.
///
/// Priorities are small numbers starting from zero. Numerically *greater*
/// priorities are more important; priority 0 is reserved for the idle task,
/// so `TASK_PRIORITY_MIN` is the least important priority a forked task can
/// carry.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`,
/// to keep us from confusing ourselves on whether `>` means more important or
/// merely numerically greater.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Default, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Priority of the idle task. Only the idle task may carry it.
    pub const IDLE: Self = Priority(0);

    /// Least important priority available to a normal task.
    pub const MIN: Self = Priority(TASK_PRIORITY_MIN);

    /// Most important priority.
    pub const MAX: Self = Priority(TASK_PRIORITY_MAX);

    /// Checks if `self` is strictly more important than `other`.
    ///
    /// This is easier to read than comparing the numeric values of the
    /// priorities directly.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 > other.0
    }
}

/// Greatest legal priority value; the ready queues are indexed `0..=MAX`.
pub const TASK_PRIORITY_MAX: u8 = 7;

/// Least priority a non-idle task may have.
pub const TASK_PRIORITY_MIN: u8 = 1;

/// Scheduling state of a task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// Blocked: sleeping on the timer or parked on some primitive's wait
    /// queue.
    Wait,
    /// Runnable, parked on the ready queue for its priority.
    Ready,
    /// Currently holding the CPU. At most one task is ever in this state.
    Running,
}

/// Flag bits accepted by `open` and carried in `mq_attr.mq_flags`.
///
/// The kernel keeps its own compact encoding rather than any particular
/// libc's; user-facing wrappers translate if they care.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct OpenFlags(pub u32);

bitflags::bitflags! {
    impl OpenFlags: u32 {
        /// Fail with `EAGAIN` instead of suspending the caller.
        const NONBLOCK = 1 << 0;
    }
}

/// Message-queue attributes, as passed to `mq_open`.
///
/// The layout is fixed because the kernel reads this record straight out of
/// the caller's memory.
#[derive(
    Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(C)]
pub struct MqAttr {
    /// 0 or `OpenFlags::NONBLOCK`.
    pub mq_flags: u32,
    /// Maximum number of messages resident in the queue.
    pub mq_maxmsg: u32,
    /// Maximum byte size of one message.
    pub mq_msgsize: u32,
    /// Number of messages currently queued. Ignored on `mq_open`.
    pub mq_curmsgs: u32,
}

/// File metadata record filled in by `fstat`.
#[derive(
    Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(C)]
pub struct Stat {
    pub st_mode: u32,
    pub st_ino: u32,
    pub st_rdev: u32,
    pub st_size: u32,
    pub st_blocks: u32,
}

/// Directory entry record filled in by the file-system task during `readdir`.
#[derive(Copy, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Dirent {
    pub d_name: [u8; FILE_NAME_LEN_MAX],
    pub d_type: u32,
}

impl Default for Dirent {
    fn default() -> Self {
        Dirent {
            d_name: [0; FILE_NAME_LEN_MAX],
            d_type: 0,
        }
    }
}

/// A path argument forwarded to the file-system task.
///
/// The kernel and the file-system task share one address space, so the path
/// travels as a (base, length) pair naming the caller's own buffer; the
/// file-system task reads it in place.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UserPath {
    pub addr: u32,
    pub len: u32,
}

/// One request record, as marshalled into the file-system task's inbox FIFO.
///
/// Every variant carries the requesting task's pid; the file-system task
/// writes its `i32` result into that task's reply FIFO (`files[pid]`).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FsRequest {
    /// Mount `source` at `target`. Reply: 0 or -1.
    Mount {
        pid: u32,
        source: UserPath,
        target: UserPath,
    },
    /// Resolve `path` to a global file index. Reply: file index or -1.
    Open { pid: u32, path: UserPath },
    /// Resolve `path` to a directory handle. Reply: handle or -1.
    OpenDir { pid: u32, path: UserPath },
    /// Create a node of type `dev` at `path`. Reply: file index or -1.
    Create { pid: u32, path: UserPath, dev: u32 },
    /// Write the next entry of directory `handle` into the caller's
    /// `Dirent` buffer. Reply: 0, or -1 at end of directory.
    ReadDir {
        pid: u32,
        handle: u32,
        dirent_addr: u32,
    },
}

/// Upper bound on the marshalled size of an [`FsRequest`], used to size the
/// encode buffer and the framing in the inbox FIFO.
pub const FS_REQUEST_MAX: usize = 32;

/// Enumeration of syscall numbers.
///
/// The numbering is stable; it is part of the ABI and the dispatcher's table
/// is keyed by it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Sysnum {
    SchedYield = 1,
    SetIrq = 2,
    SetProgramName = 3,
    Fork = 4,
    Sleep = 5,
    Mount = 6,
    Open = 7,
    Close = 8,
    Read = 9,
    Write = 10,
    Lseek = 11,
    Fstat = 12,
    Opendir = 13,
    Readdir = 14,
    Getpriority = 15,
    Setpriority = 16,
    Getpid = 17,
    Mknod = 18,
    Mkfifo = 19,
    MqOpen = 20,
    MqReceive = 21,
    MqSend = 22,
    MutexInit = 23,
    MutexUnlock = 24,
    MutexLock = 25,
}

/// We're using an explicit `TryFrom` impl for `Sysnum` instead of
/// `FromPrimitive` because the kernel doesn't currently depend on
/// `num-traits` and this seems okay.
impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            1 => Ok(Self::SchedYield),
            2 => Ok(Self::SetIrq),
            3 => Ok(Self::SetProgramName),
            4 => Ok(Self::Fork),
            5 => Ok(Self::Sleep),
            6 => Ok(Self::Mount),
            7 => Ok(Self::Open),
            8 => Ok(Self::Close),
            9 => Ok(Self::Read),
            10 => Ok(Self::Write),
            11 => Ok(Self::Lseek),
            12 => Ok(Self::Fstat),
            13 => Ok(Self::Opendir),
            14 => Ok(Self::Readdir),
            15 => Ok(Self::Getpriority),
            16 => Ok(Self::Setpriority),
            17 => Ok(Self::Getpid),
            18 => Ok(Self::Mknod),
            19 => Ok(Self::Mkfifo),
            20 => Ok(Self::MqOpen),
            21 => Ok(Self::MqReceive),
            22 => Ok(Self::MqSend),
            23 => Ok(Self::MutexInit),
            24 => Ok(Self::MutexUnlock),
            25 => Ok(Self::MutexLock),
            _ => Err(()),
        }
    }
}
