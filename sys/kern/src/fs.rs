// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel side of the file-system task protocol.
//!
//! Path resolution lives in a user task, not in the kernel. A path-flavored
//! syscall marshals an [`abi::FsRequest`] record into the file-system
//! task's inbox FIFO and then blocks reading its own inbox, where the
//! file-system task eventually writes a 4-byte `i32` reply (using the plain
//! `write` syscall with the requester's pid as the descriptor).
//!
//! The request is sent only on the *first* entry of the syscall body -- the
//! pending flag says whether we are a retry -- and the reply read uses the
//! ordinary pipe blocking path, so the whole exchange rides on the
//! pending-syscall protocol with no extra machinery.
//!
//! Requests are length-framed like message-queue records so the file-system
//! task can recover record boundaries from a byte FIFO.

use abi::{FsRequest, FS_REQUEST_MAX, FS_TASK_PID, EAGAIN, EINVAL, PATH_LEN_MAX};
use byteorder::{ByteOrder, LittleEndian};
use ringq::RingQ;

use crate::err::SysResult;
use crate::fd::FileKind;
use crate::kernel::Kernel;
use crate::pipe::pipe_mut;
use crate::umem;
use crate::wait;

impl Kernel {
    /// Pipe index of a task's inbox FIFO.
    fn inbox_pipe(&self, pid: usize) -> usize {
        match &self.files[pid] {
            Some(f) => match f.kind {
                FileKind::Fifo(p) => p,
                FileKind::Device(_) => panic!("inbox is not a fifo"),
            },
            None => panic!("inbox missing; init_reply_fifos not run"),
        }
    }

    /// Describes a NUL-terminated user path for forwarding. Fails with
    /// `-EINVAL` on a null pointer or an unterminated path.
    pub(crate) fn user_path(&self, addr: usize) -> Result<abi::UserPath, i32> {
        let len = umem::cstr_len(addr, PATH_LEN_MAX).ok_or(-EINVAL)?;
        Ok(abi::UserPath {
            addr: addr as u32,
            len: len as u32,
        })
    }

    /// Marshals `req` into the file-system task's inbox.
    ///
    /// This is a kernel-side write and never blocks; if the inbox cannot
    /// take the whole framed record the caller sees `-EAGAIN` without its
    /// pending flag set.
    pub(crate) fn fs_send_request(&mut self, req: &FsRequest) -> Result<(), i32> {
        let mut buf = [0u8; FS_REQUEST_MAX];
        let len = ssmarshal::serialize(&mut buf, req).map_err(|_| -EINVAL)?;

        let inbox = self.inbox_pipe(FS_TASK_PID as usize);
        let Self {
            pipes,
            pool,
            tasks,
            ready,
            ..
        } = self;
        let pipe = pipe_mut(pipes, inbox);
        let mut q = RingQ::new(&mut pipe.ring, pool.bytes_mut(pipe.storage));

        if q.free() < 2 + len {
            return Err(-EAGAIN);
        }
        let mut hdr = [0u8; 2];
        LittleEndian::write_u16(&mut hdr, len as u16);
        uassert!(q.push(&hdr).is_ok());
        uassert!(q.push(&buf[..len]).is_ok());

        // The file-system task blocks reading its inbox; hand it the work.
        wait::wake_up(&mut pipe.readers, tasks, ready);
        Ok(())
    }

    /// Blocking read of the current task's 4-byte reply. `Done` carries the
    /// decoded reply value.
    pub(crate) fn fs_read_reply(&mut self) -> SysResult {
        let inbox = self.inbox_pipe(self.current);
        let mut raw = [0u8; 4];
        match self.pipe_read_bytes(inbox, &mut raw, false) {
            SysResult::Done(_) => SysResult::Done(LittleEndian::read_i32(&raw)),
            SysResult::Pending => SysResult::Pending,
        }
    }
}

/// Decodes one framed request from a chunk of inbox bytes. The file-system
/// task links against the kernel crate for this; tests use it to play the
/// file-system role.
pub fn decode_request(frame: &[u8]) -> Option<(FsRequest, usize)> {
    if frame.len() < 2 {
        return None;
    }
    let len = usize::from(LittleEndian::read_u16(&frame[..2]));
    let body = frame.get(2..2 + len)?;
    let (req, _) = ssmarshal::deserialize::<FsRequest>(body).ok()?;
    Some((req, 2 + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::testutil::kernel_with_tasks;
    use abi::UserPath;

    /// Play the file-system task: drain one request from the inbox and
    /// push a reply into the requester's inbox.
    fn service_one(k: &mut Kernel, reply: i32) -> FsRequest {
        let inbox = k.inbox_pipe(FS_TASK_PID as usize);
        let pipe_len = k.pipes[inbox].as_ref().unwrap().ring.len();
        let mut raw = vec![0u8; pipe_len];
        k.pipe_read_bytes(inbox, &mut raw, true).must_complete();
        let (req, consumed) = decode_request(&raw).unwrap();
        assert_eq!(consumed, raw.len());

        let pid = match req {
            FsRequest::Mount { pid, .. }
            | FsRequest::Open { pid, .. }
            | FsRequest::OpenDir { pid, .. }
            | FsRequest::Create { pid, .. }
            | FsRequest::ReadDir { pid, .. } => pid,
        };
        let mut out = [0u8; 4];
        LittleEndian::write_i32(&mut out, reply);
        let reply_pipe = k.inbox_pipe(pid as usize);
        k.pipe_write_bytes(reply_pipe, &out, true).must_complete();
        req
    }

    #[test]
    fn request_round_trips_through_inbox() {
        let mut k = kernel_with_tasks(2, 2);
        let req = FsRequest::Open {
            pid: 0,
            path: UserPath { addr: 0x2000, len: 8 },
        };
        k.fs_send_request(&req).unwrap();

        let seen = service_one(&mut k, 7);
        match seen {
            FsRequest::Open { pid, path } => {
                assert_eq!(pid, 0);
                assert_eq!(path.addr, 0x2000);
                assert_eq!(path.len, 8);
            }
            other => panic!("wrong request decoded: {other:?}"),
        }
    }

    #[test]
    fn reply_read_blocks_until_fs_answers() {
        let mut k = kernel_with_tasks(2, 2);
        let requester = k.current;

        k.fs_send_request(&FsRequest::Mount {
            pid: requester as u32,
            source: UserPath { addr: 0x100, len: 4 },
            target: UserPath { addr: 0x200, len: 1 },
        })
        .unwrap();

        // No reply yet: the requester parks with its syscall pending.
        assert_eq!(k.fs_read_reply(), SysResult::Pending);
        assert!(k.tasks[requester].syscall_pending);
        k.schedule();

        service_one(&mut k, 0);
        assert_eq!(k.tasks[requester].state, abi::TaskState::Ready);

        // Retry completes with the decoded reply.
        k.tick_update();
        k.schedule();
        assert_eq!(k.current, requester);
        assert_eq!(k.fs_read_reply(), SysResult::Done(0));
        assert!(!k.tasks[requester].syscall_pending);
    }

    #[test]
    fn user_path_validation() {
        let k = kernel_with_tasks(1, 2);
        assert_eq!(k.user_path(0), Err(-EINVAL));
        let path = b"/dev/rom\0";
        let up = k.user_path(path.as_ptr() as usize).unwrap();
        assert_eq!(up.len, 8);
    }

    impl SysResult {
        fn must_complete(self) {
            assert!(matches!(self, SysResult::Done(v) if v >= 0), "{self:?}");
        }
    }
}
