// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Files and descriptors.
//!
//! The global file table has two halves. Slots `0..TASK_CNT_MAX` are the
//! per-task FIFOs, created at boot: `files[i]` is task `i`'s inbox, used as
//! its reply channel for file-system requests (and, for the file-system
//! task itself, as the request channel everyone else writes into). Slots
//! above that hold run-time files: registered character devices and FIFOs
//! created on behalf of `mknod`/`mkfifo`.
//!
//! Descriptor numbering mirrors the split: a descriptor below
//! `TASK_CNT_MAX` names a task inbox directly and needs no table entry; a
//! descriptor at or above it indexes the calling task's own descriptor
//! table, whose entries point into the global table and carry the `open`
//! flags.

use abi::{
    OpenFlags, Stat, EBADF, ESPIPE, FILE_NAME_LEN_MAX, REPLY_FIFO_SIZE,
    S_IFIFO, TASK_CNT_MAX,
};

use crate::err::SysResult;
use crate::kernel::Kernel;
use crate::umem::USlice;

/// One slot of a task's descriptor table.
#[derive(Copy, Clone, Debug, Default)]
pub struct FdEntry {
    /// Global file-table index.
    pub(crate) file: usize,
    /// Flags given to `open`; re-applied on every operation.
    pub(crate) flags: OpenFlags,
    pub(crate) used: bool,
}

/// What a file handle dispatches to.
#[derive(Copy, Clone)]
pub enum FileKind {
    /// A kernel pipe, by pipe-table index.
    Fifo(usize),
    /// A registered character device.
    Device(&'static dyn CharDev),
}

/// A global file-table entry.
pub struct File {
    pub(crate) kind: FileKind,
    /// Metadata reported by `fstat`, when the file has any.
    pub(crate) inode: Option<Stat>,
    /// Registration name (device name or FIFO path tail); informational
    /// and used by the file-system task to bind paths to indices.
    pub(crate) name: [u8; FILE_NAME_LEN_MAX],
}

/// Operations a character-device driver supplies at registration.
///
/// `read` and `write` may suspend the caller with
/// [`Kernel::block_current_on`], returning [`SysResult::Pending`]; the
/// driver's ISR then uses [`Kernel::wake_one`] to resume it, and the
/// operation is re-entered. `seek` is optional and defaults to the
/// not-seekable error.
pub trait CharDev: Sync {
    fn read(&self, kernel: &mut Kernel, dst: USlice<u8>, flags: OpenFlags) -> SysResult;
    fn write(&self, kernel: &mut Kernel, src: USlice<u8>, flags: OpenFlags) -> SysResult;
    fn seek(&self, _kernel: &mut Kernel, _offset: i32, _whence: u32) -> i32 {
        -ESPIPE
    }
}

fn stored_name(name: &str) -> [u8; FILE_NAME_LEN_MAX] {
    let mut buf = [0u8; FILE_NAME_LEN_MAX];
    let n = name.len().min(FILE_NAME_LEN_MAX - 1);
    buf[..n].copy_from_slice(&name.as_bytes()[..n]);
    buf
}

impl Kernel {
    /// Creates the per-task inbox FIFOs. Runs once at boot, before any
    /// task.
    pub fn init_reply_fifos(&mut self) {
        for i in 0..TASK_CNT_MAX {
            let pipe = match self.pipe_create(REPLY_FIFO_SIZE, OpenFlags::empty()) {
                Some(p) => p,
                None => panic!("reply fifo allocation failed"),
            };
            self.files[i] = Some(File {
                kind: FileKind::Fifo(pipe),
                inode: None,
                name: [0; FILE_NAME_LEN_MAX],
            });
        }
    }

    /// Registers a character device under `name`, returning its global file
    /// index. The file-system task binds `/dev/<name>` to that index.
    pub fn register_chrdev(
        &mut self,
        name: &str,
        dev: &'static dyn CharDev,
    ) -> Option<usize> {
        let slot = self.free_file_slot()?;
        self.files[slot] = Some(File {
            kind: FileKind::Device(dev),
            inode: None,
            name: stored_name(name),
        });
        Some(slot)
    }

    /// Creates a named FIFO file backed by a fresh pipe. Invoked on behalf
    /// of the file-system task while it services `mknod`/`mkfifo`.
    pub fn create_fifo_file(&mut self, name: &str, capacity: usize) -> Option<usize> {
        let slot = self.free_file_slot()?;
        let pipe = self.pipe_create(capacity, OpenFlags::empty())?;
        self.files[slot] = Some(File {
            kind: FileKind::Fifo(pipe),
            inode: Some(Stat {
                st_mode: S_IFIFO,
                st_ino: slot as u32,
                ..Stat::default()
            }),
            name: stored_name(name),
        });
        Some(slot)
    }

    fn free_file_slot(&self) -> Option<usize> {
        self.files[TASK_CNT_MAX..]
            .iter()
            .position(|f| f.is_none())
            .map(|i| i + TASK_CNT_MAX)
    }

    /// Translates a descriptor from user code into a global file index plus
    /// the effective flags.
    pub(crate) fn resolve_fd(&self, fd: u32) -> Result<(usize, OpenFlags), i32> {
        let fd = fd as usize;
        if fd < TASK_CNT_MAX {
            // Task inbox; always unflagged.
            if self.files[fd].is_some() {
                return Ok((fd, OpenFlags::empty()));
            }
            return Err(-EBADF);
        }
        let slot = fd - TASK_CNT_MAX;
        if slot >= self.current_task().fdtable.len() {
            return Err(-EBADF);
        }
        let entry = self.current_task().fdtable[slot];
        if !entry.used {
            return Err(-EBADF);
        }
        Ok((entry.file, entry.flags))
    }

    /// Dispatches a read through a file's capability.
    pub(crate) fn file_read(
        &mut self,
        fidx: usize,
        flags: OpenFlags,
        dst: USlice<u8>,
    ) -> SysResult {
        let kind = match &self.files[fidx] {
            Some(f) => f.kind,
            None => {
                self.current_task_mut().syscall_pending = false;
                return SysResult::Done(-EBADF);
            }
        };
        match kind {
            FileKind::Fifo(p) => {
                self.pipe_read_user(p, dst, flags.contains(OpenFlags::NONBLOCK))
            }
            FileKind::Device(dev) => dev.read(self, dst, flags),
        }
    }

    /// Dispatches a write through a file's capability.
    pub(crate) fn file_write(
        &mut self,
        fidx: usize,
        flags: OpenFlags,
        src: USlice<u8>,
    ) -> SysResult {
        let kind = match &self.files[fidx] {
            Some(f) => f.kind,
            None => {
                self.current_task_mut().syscall_pending = false;
                return SysResult::Done(-EBADF);
            }
        };
        match kind {
            FileKind::Fifo(p) => {
                self.pipe_write_user(p, src, flags.contains(OpenFlags::NONBLOCK))
            }
            FileKind::Device(dev) => dev.write(self, src, flags),
        }
    }
}
