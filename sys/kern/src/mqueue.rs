// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! POSIX-style message queues.
//!
//! Each table entry wraps a pipe sized `maxmsg * (msgsize + header)` plus
//! the queue attributes. Messages travel as length-framed records -- a
//! little-endian `u16` byte count followed by the payload -- so a receive
//! moves exactly one record and can report the sent size. `mq_curmsgs`
//! tracks occupancy against `mq_maxmsg`; the byte ring can never fill
//! before the record count does.
//!
//! Opening an existing name returns the existing descriptor rather than
//! erroring; names are never removed (there is no `mq_unlink` here).

use abi::{
    MqAttr, OpenFlags, TaskState, EAGAIN, EBADF, EINVAL, EMSGSIZE,
    FILE_NAME_LEN_MAX,
};
use byteorder::{ByteOrder, LittleEndian};
use ringq::RingQ;

use crate::err::SysResult;
use crate::kernel::Kernel;
use crate::pipe::pipe_mut;
use crate::wait;

/// Bytes of length framing ahead of each record.
const REC_HDR: usize = 2;

pub struct MqEntry {
    /// NUL-padded queue name; unique across live entries.
    pub(crate) name: [u8; FILE_NAME_LEN_MAX],
    pub(crate) attr: MqAttr,
    /// Index of the backing pipe.
    pub(crate) pipe: usize,
}

impl Kernel {
    /// `mq_open` body: returns a descriptor, the existing one for a known
    /// name, or a negative error.
    pub(crate) fn mq_open(
        &mut self,
        name: &[u8; FILE_NAME_LEN_MAX],
        oflag: OpenFlags,
        attr: MqAttr,
    ) -> i32 {
        for (i, entry) in self.mqueues.iter().enumerate() {
            if let Some(entry) = entry {
                if entry.name == *name {
                    return i as i32;
                }
            }
        }

        if attr.mq_maxmsg == 0
            || attr.mq_msgsize == 0
            || attr.mq_msgsize as usize > u16::MAX as usize
        {
            return -EINVAL;
        }
        let Some(slot) = self.mqueues.iter().position(|e| e.is_none()) else {
            return -1;
        };

        let capacity =
            attr.mq_maxmsg as usize * (attr.mq_msgsize as usize + REC_HDR);
        let flags = oflag | OpenFlags(attr.mq_flags);
        let Some(pipe) = self.pipe_create(capacity, flags) else {
            return -1;
        };

        self.mqueues[slot] = Some(MqEntry {
            name: *name,
            attr: MqAttr {
                mq_curmsgs: 0,
                ..attr
            },
            pipe,
        });
        slot as i32
    }

    /// `mq_send` body, re-entered on wake. Completes with the record's byte
    /// size.
    pub(crate) fn mq_send(&mut self, mqdes: usize, src: &[u8]) -> SysResult {
        let Self {
            mqueues,
            pipes,
            pool,
            tasks,
            ready,
            current,
            ..
        } = self;
        let Some(entry) = mqueues.get_mut(mqdes).and_then(|e| e.as_mut()) else {
            tasks[*current].syscall_pending = false;
            return SysResult::Done(-EBADF);
        };
        if src.len() > entry.attr.mq_msgsize as usize {
            tasks[*current].syscall_pending = false;
            return SysResult::Done(-EMSGSIZE);
        }

        let pipe = pipe_mut(pipes, entry.pipe);
        if entry.attr.mq_curmsgs >= entry.attr.mq_maxmsg {
            if pipe.flags.contains(OpenFlags::NONBLOCK) {
                tasks[*current].syscall_pending = false;
                return SysResult::Done(-EAGAIN);
            }
            wait::prepare_to_wait(&mut pipe.writers, tasks, *current, TaskState::Wait);
            tasks[*current].syscall_pending = true;
            return SysResult::Pending;
        }

        let mut q = RingQ::new(&mut pipe.ring, pool.bytes_mut(pipe.storage));
        let mut hdr = [0u8; REC_HDR];
        LittleEndian::write_u16(&mut hdr, src.len() as u16);
        // Sized so that `maxmsg` framed records always fit.
        uassert!(q.push(&hdr).is_ok());
        uassert!(q.push(src).is_ok());
        entry.attr.mq_curmsgs += 1;

        wait::wake_up(&mut pipe.readers, tasks, ready);
        tasks[*current].syscall_pending = false;
        SysResult::Done(src.len() as i32)
    }

    /// `mq_receive` body, re-entered on wake. Completes with the received
    /// record's byte size.
    pub(crate) fn mq_receive(&mut self, mqdes: usize, dst: &mut [u8]) -> SysResult {
        let Self {
            mqueues,
            pipes,
            pool,
            tasks,
            ready,
            current,
            ..
        } = self;
        let Some(entry) = mqueues.get_mut(mqdes).and_then(|e| e.as_mut()) else {
            tasks[*current].syscall_pending = false;
            return SysResult::Done(-EBADF);
        };
        // POSIX: the receive buffer must hold a maximum-sized message.
        if dst.len() < entry.attr.mq_msgsize as usize {
            tasks[*current].syscall_pending = false;
            return SysResult::Done(-EMSGSIZE);
        }

        let pipe = pipe_mut(pipes, entry.pipe);
        if entry.attr.mq_curmsgs == 0 {
            if pipe.flags.contains(OpenFlags::NONBLOCK) {
                tasks[*current].syscall_pending = false;
                return SysResult::Done(-EAGAIN);
            }
            wait::prepare_to_wait(&mut pipe.readers, tasks, *current, TaskState::Wait);
            tasks[*current].syscall_pending = true;
            return SysResult::Pending;
        }

        let mut q = RingQ::new(&mut pipe.ring, pool.bytes_mut(pipe.storage));
        let mut hdr = [0u8; REC_HDR];
        uassert!(q.pop_into(&mut hdr).is_ok());
        let len = usize::from(LittleEndian::read_u16(&hdr));
        uassert!(q.pop_into(&mut dst[..len]).is_ok());
        entry.attr.mq_curmsgs -= 1;

        wait::wake_up(&mut pipe.writers, tasks, ready);
        tasks[*current].syscall_pending = false;
        SysResult::Done(len as i32)
    }
}
