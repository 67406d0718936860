// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! User task support library.
//!
//! This contains the syscall stubs and the user-visible handle types, and
//! re-exports the contents of the `abi` crate that gets shared with the
//! kernel.
//!
//! # Syscall ABI
//!
//! Arguments travel in `r0..r3` and the syscall number in `r11`; `svc #0`
//! traps into the kernel, which reads the arguments from the
//! hardware-stacked frame and writes the result over the stacked `r0`, so
//! the value materializes in `r0` when the task resumes. One naked stub
//! serves every syscall, taking the number as a fifth (stack) argument.
//!
//! String arguments are NUL-terminated in a stack buffer before the trap;
//! the buffer stays live across a blocking syscall because the task's
//! stack does.

#![no_std]

pub use abi::*;

use core::cell::UnsafeCell;

#[cfg(target_os = "none")]
core::arch::global_asm!(
    "
    .section .text.syscall_raw
    .globl syscall_raw
    .type syscall_raw,function
    .thumb_func
    syscall_raw:
        push {{r11, lr}}
        ldr r11, [sp, #8]    @ fifth argument: the syscall number
        svc #0
        pop {{r11, pc}}
    ",
);

#[cfg(target_os = "none")]
extern "C" {
    fn syscall_raw(a0: u32, a1: u32, a2: u32, a3: u32, num: u32) -> i32;
}

/// Hosted builds have no supervisor to call.
#[cfg(not(target_os = "none"))]
unsafe fn syscall_raw(_a0: u32, _a1: u32, _a2: u32, _a3: u32, _num: u32) -> i32 {
    unimplemented!("syscalls require the target machine");
}

#[inline(always)]
fn syscall(num: Sysnum, args: [u32; 4]) -> i32 {
    // Safety: the kernel validates everything it dereferences; the stub
    // itself only moves registers.
    unsafe { syscall_raw(args[0], args[1], args[2], args[3], num as u32) }
}

/// Stages `s` as a NUL-terminated string in a stack buffer and passes its
/// address to `f`. Truncates silently at `PATH_LEN_MAX - 1`.
fn with_cstr<R>(s: &str, f: impl FnOnce(u32) -> R) -> R {
    let mut buf = [0u8; PATH_LEN_MAX];
    let n = s.len().min(PATH_LEN_MAX - 1);
    buf[..n].copy_from_slice(&s.as_bytes()[..n]);
    f(buf.as_ptr() as u32)
}

pub fn sched_yield() -> i32 {
    syscall(Sysnum::SchedYield, [0; 4])
}

/// Enables or disables interrupt-driven rescheduling. Produces no result;
/// the kernel leaves the registers alone.
pub fn set_irq(enable: bool) {
    let _ = syscall(Sysnum::SetIrq, [enable as u32, 0, 0, 0]);
}

pub fn set_program_name(name: &str) {
    with_cstr(name, |p| {
        let _ = syscall(Sysnum::SetProgramName, [p, 0, 0, 0]);
    })
}

/// Clones the calling task. Returns the child pid in the parent and 0 in
/// the child, or -1 if the task table is full.
pub fn fork() -> i32 {
    syscall(Sysnum::Fork, [0; 4])
}

/// Suspends the caller for `ticks` system ticks.
pub fn sleep(ticks: u32) -> i32 {
    syscall(Sysnum::Sleep, [ticks, 0, 0, 0])
}

pub fn mount(source: &str, target: &str) -> i32 {
    with_cstr(source, |s| {
        with_cstr(target, |t| syscall(Sysnum::Mount, [s, t, 0, 0]))
    })
}

pub fn open(path: &str, flags: OpenFlags) -> i32 {
    with_cstr(path, |p| syscall(Sysnum::Open, [p, flags.0, 0, 0]))
}

pub fn close(fd: i32) -> i32 {
    syscall(Sysnum::Close, [fd as u32, 0, 0, 0])
}

pub fn read(fd: i32, buf: &mut [u8]) -> i32 {
    syscall(
        Sysnum::Read,
        [fd as u32, buf.as_mut_ptr() as u32, buf.len() as u32, 0],
    )
}

pub fn write(fd: i32, buf: &[u8]) -> i32 {
    syscall(
        Sysnum::Write,
        [fd as u32, buf.as_ptr() as u32, buf.len() as u32, 0],
    )
}

pub const SEEK_SET: u32 = 0;
pub const SEEK_CUR: u32 = 1;
pub const SEEK_END: u32 = 2;

pub fn lseek(fd: i32, offset: i32, whence: u32) -> i32 {
    syscall(Sysnum::Lseek, [fd as u32, offset as u32, whence, 0])
}

pub fn fstat(fd: i32, statbuf: &mut Stat) -> i32 {
    syscall(
        Sysnum::Fstat,
        [fd as u32, statbuf as *mut Stat as u32, 0, 0],
    )
}

/// An open directory handle, filled in by [`opendir`].
#[repr(C)]
#[derive(Debug, Default)]
pub struct Dir {
    pub handle: u32,
}

pub fn opendir(path: &str, dir: &mut Dir) -> i32 {
    with_cstr(path, |p| {
        syscall(Sysnum::Opendir, [p, dir as *mut Dir as u32, 0, 0])
    })
}

pub fn readdir(dir: &mut Dir, entry: &mut Dirent) -> i32 {
    syscall(
        Sysnum::Readdir,
        [dir as *mut Dir as u32, entry as *mut Dirent as u32, 0, 0],
    )
}

pub fn getpriority() -> i32 {
    syscall(Sysnum::Getpriority, [0; 4])
}

pub fn setpriority(which: u32, who: u32, priority: u32) -> i32 {
    syscall(Sysnum::Setpriority, [which, who, priority, 0])
}

pub fn getpid() -> i32 {
    syscall(Sysnum::Getpid, [0; 4])
}

pub fn mknod(path: &str, mode: u32, dev: u32) -> i32 {
    with_cstr(path, |p| syscall(Sysnum::Mknod, [p, mode, dev, 0]))
}

pub fn mkfifo(path: &str, mode: u32) -> i32 {
    with_cstr(path, |p| syscall(Sysnum::Mkfifo, [p, mode, 0, 0]))
}

pub fn mq_open(name: &str, oflag: OpenFlags, attr: &MqAttr) -> i32 {
    with_cstr(name, |n| {
        syscall(
            Sysnum::MqOpen,
            [n, oflag.0, attr as *const MqAttr as u32, 0],
        )
    })
}

/// Receives one message; returns its byte size.
pub fn mq_receive(mqdes: i32, buf: &mut [u8]) -> i32 {
    syscall(
        Sysnum::MqReceive,
        [mqdes as u32, buf.as_mut_ptr() as u32, buf.len() as u32, 0],
    )
}

/// Sends one message; returns its byte size.
pub fn mq_send(mqdes: i32, msg: &[u8]) -> i32 {
    syscall(
        Sysnum::MqSend,
        [mqdes as u32, msg.as_ptr() as u32, msg.len() as u32, 0],
    )
}

/// A mutex handle: one word that `pthread_mutex_init` points at a kernel
/// mutex. Shared between tasks by virtue of the single address space.
#[repr(transparent)]
pub struct PthreadMutex(UnsafeCell<u32>);

// Safety: the word is only interpreted by the kernel, which serializes all
// access.
unsafe impl Sync for PthreadMutex {}

impl PthreadMutex {
    /// A not-yet-initialized mutex; call [`pthread_mutex_init`] before
    /// locking.
    pub const fn new() -> Self {
        PthreadMutex(UnsafeCell::new(u32::MAX))
    }

    fn addr(&self) -> u32 {
        self.0.get() as u32
    }
}

/// Errors follow the pthread convention: a positive error number, 0 on
/// success.
pub fn pthread_mutex_init(mutex: &PthreadMutex) -> i32 {
    syscall(Sysnum::MutexInit, [mutex.addr(), 0, 0, 0])
}

pub fn pthread_mutex_lock(mutex: &PthreadMutex) -> i32 {
    syscall(Sysnum::MutexLock, [mutex.addr(), 0, 0, 0])
}

pub fn pthread_mutex_unlock(mutex: &PthreadMutex) -> i32 {
    syscall(Sysnum::MutexUnlock, [mutex.addr(), 0, 0, 0])
}
