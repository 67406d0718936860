// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-independent syscall implementation.
//!
//! Handlers read their arguments from the current task's saved frame and
//! deliver results by writing the saved `r0` slot; nothing is passed in
//! kernel registers. A handler for a blocking operation must tolerate being
//! run twice (or more): once when the task traps, and again each time the
//! task is rescheduled with its syscall still pending. The `!pending`
//! guards below mark the effects that must happen only on first entry.
//!
//! An unknown syscall number is silently ignored: the task resumes with its
//! registers untouched.

use core::convert::TryFrom;

use abi::{
    FsRequest, MqAttr, OpenFlags, Priority, Stat, Sysnum, TaskState, EBADF,
    EINVAL, ENOMEM, ESPIPE, FILE_DESC_CNT_MAX, PRIO_PROCESS, S_IFIFO,
    TASK_CNT_MAX, TASK_NAME_LEN_MAX, TASK_PRIORITY_MAX,
};

use crate::err::SysResult;
use crate::fd::{FdEntry, FileKind};
use crate::kernel::{Kernel, FILE_TABLE_LEN};
use crate::umem::{self, USlice};
use crate::wait;

impl Kernel {
    /// Looks up the trapped syscall number and runs its handler.
    pub fn dispatch_syscall(&mut self) {
        let nr = self.current_task().syscall_num();
        let Ok(num) = Sysnum::try_from(nr) else {
            return;
        };
        match num {
            Sysnum::SchedYield => self.sys_sched_yield(),
            Sysnum::SetIrq => self.sys_set_irq(),
            Sysnum::SetProgramName => self.sys_set_program_name(),
            Sysnum::Fork => self.sys_fork(),
            Sysnum::Sleep => self.sys_sleep(),
            Sysnum::Mount => self.sys_mount(),
            Sysnum::Open => self.sys_open(),
            Sysnum::Close => self.sys_close(),
            Sysnum::Read => self.sys_read(),
            Sysnum::Write => self.sys_write(),
            Sysnum::Lseek => self.sys_lseek(),
            Sysnum::Fstat => self.sys_fstat(),
            Sysnum::Opendir => self.sys_opendir(),
            Sysnum::Readdir => self.sys_readdir(),
            Sysnum::Getpriority => self.sys_getpriority(),
            Sysnum::Setpriority => self.sys_setpriority(),
            Sysnum::Getpid => self.sys_getpid(),
            Sysnum::Mknod => self.sys_mknod(),
            Sysnum::Mkfifo => self.sys_mkfifo(),
            Sysnum::MqOpen => self.sys_mq_open(),
            Sysnum::MqReceive => self.sys_mq_receive(),
            Sysnum::MqSend => self.sys_mq_send(),
            Sysnum::MutexInit => self.sys_mutex_init(),
            Sysnum::MutexUnlock => self.sys_mutex_unlock(),
            Sysnum::MutexLock => self.sys_mutex_lock(),
        }
    }

    /// Finishes the current syscall: result into the saved `r0`, pending
    /// flag down.
    fn complete(&mut self, v: i32) {
        let t = self.current_task_mut();
        t.syscall_pending = false;
        t.set_ret0(v as u32);
    }

    /// Propagates a primitive's outcome; `Pending` leaves the frame alone.
    fn apply(&mut self, r: SysResult) {
        if let SysResult::Done(v) = r {
            self.complete(v);
        }
    }

    fn sys_sched_yield(&mut self) {
        let Self {
            tasks,
            ready,
            current,
            ..
        } = self;
        ready.enqueue(tasks, *current);
        self.complete(0);
    }

    fn sys_set_irq(&mut self) {
        if self.current_task().arg0() != 0 {
            crate::arch::unmask_kernel_irqs();
            self.irq_off = false;
        } else {
            crate::arch::mask_kernel_irqs();
            self.irq_off = true;
        }
    }

    fn sys_set_program_name(&mut self) {
        let addr = self.current_task().arg0() as usize;
        let mut buf = [0u8; TASK_NAME_LEN_MAX];
        if umem::read_cstr_into(addr, &mut buf).is_some() {
            self.current_task_mut().name = buf;
        }
    }

    fn sys_fork(&mut self) {
        if self.task_cnt >= TASK_CNT_MAX {
            self.complete(-1);
            return;
        }
        let child = self.task_cnt;
        uassert!(self.current < child);

        let (front, back) = self.tasks.split_at_mut(child);
        let parent = &mut front[self.current];
        let child_task = &mut back[0];

        child_task.fork_from(parent);
        // The one observable difference between the two: the child resumes
        // from this very syscall with 0, the parent with the child's pid.
        child_task.set_ret0(0);
        parent.set_ret0(child as u32);

        let Self { tasks, ready, .. } = self;
        ready.enqueue(tasks, child);
        self.task_cnt += 1;
    }

    fn sys_sleep(&mut self) {
        let ticks = self.current_task().arg0();
        // The return value is written now; the task simply isn't scheduled
        // again until its ticks run out. No pending-retry is involved.
        self.complete(0);

        let Self {
            tasks,
            ready,
            sleep,
            current,
            ..
        } = self;
        if ticks == 0 {
            ready.enqueue(tasks, *current);
            return;
        }
        tasks[*current].remaining_ticks = ticks;
        wait::prepare_to_wait(sleep, tasks, *current, TaskState::Wait);
    }

    fn sys_mount(&mut self) {
        if !self.current_task().syscall_pending {
            let t = self.current_task();
            let (src, dst) = (t.arg0() as usize, t.arg1() as usize);
            let req = match (self.user_path(src), self.user_path(dst)) {
                (Ok(source), Ok(target)) => FsRequest::Mount {
                    pid: self.current as u32,
                    source,
                    target,
                },
                _ => {
                    self.complete(-EINVAL);
                    return;
                }
            };
            if let Err(e) = self.fs_send_request(&req) {
                self.complete(e);
                return;
            }
        }
        let r = self.fs_read_reply();
        self.apply(r);
    }

    fn sys_open(&mut self) {
        if !self.current_task().syscall_pending {
            let addr = self.current_task().arg0() as usize;
            let req = match self.user_path(addr) {
                Ok(path) => FsRequest::Open {
                    pid: self.current as u32,
                    path,
                },
                Err(e) => {
                    self.complete(e);
                    return;
                }
            };
            if let Err(e) = self.fs_send_request(&req) {
                self.complete(e);
                return;
            }
        }
        match self.fs_read_reply() {
            SysResult::Pending => {}
            SysResult::Done(file_idx) => {
                let flags = OpenFlags(self.current_task().arg1());
                let fd = self.install_fd(file_idx, flags);
                self.complete(fd);
            }
        }
    }

    /// Binds a file index resolved by the file-system task into the
    /// caller's descriptor table. Returns the new descriptor or -1.
    fn install_fd(&mut self, file_idx: i32, flags: OpenFlags) -> i32 {
        if file_idx < 0 {
            return -1;
        }
        let fidx = file_idx as usize;
        if fidx >= FILE_TABLE_LEN || self.files[fidx].is_none() {
            return -1;
        }
        let t = self.current_task_mut();
        if t.fd_cnt >= FILE_DESC_CNT_MAX {
            return -1;
        }
        let Some(slot) = t.fdtable.iter().position(|e| !e.used) else {
            return -1;
        };
        t.fdtable[slot] = FdEntry {
            file: fidx,
            flags,
            used: true,
        };
        t.fd_cnt += 1;
        (slot + TASK_CNT_MAX) as i32
    }

    fn sys_close(&mut self) {
        let fd = self.current_task().arg0() as usize;
        // Descriptors below the split address task inboxes, which are not
        // closable.
        let Some(slot) = fd.checked_sub(TASK_CNT_MAX) else {
            self.complete(-EBADF);
            return;
        };
        let t = self.current_task_mut();
        if slot >= t.fdtable.len() || !t.fdtable[slot].used {
            self.complete(-EBADF);
            return;
        }
        t.fdtable[slot].used = false;
        t.fd_cnt -= 1;
        self.complete(0);
    }

    fn sys_read(&mut self) {
        let t = self.current_task();
        let (fd, addr, count) = (t.arg0(), t.arg1() as usize, t.arg2() as usize);
        let (fidx, flags) = match self.resolve_fd(fd) {
            Ok(x) => x,
            Err(e) => {
                self.complete(e);
                return;
            }
        };
        let dst = match USlice::from_raw(addr, count) {
            Ok(s) => s,
            Err(_) => {
                self.complete(-EINVAL);
                return;
            }
        };
        let r = self.file_read(fidx, flags, dst);
        self.apply(r);
    }

    fn sys_write(&mut self) {
        let t = self.current_task();
        let (fd, addr, count) = (t.arg0(), t.arg1() as usize, t.arg2() as usize);
        let (fidx, flags) = match self.resolve_fd(fd) {
            Ok(x) => x,
            Err(e) => {
                self.complete(e);
                return;
            }
        };
        let src = match USlice::from_raw(addr, count) {
            Ok(s) => s,
            Err(_) => {
                self.complete(-EINVAL);
                return;
            }
        };
        let r = self.file_write(fidx, flags, src);
        self.apply(r);
    }

    fn sys_lseek(&mut self) {
        let t = self.current_task();
        let (fd, offset, whence) = (t.arg0(), t.arg1() as i32, t.arg2());
        if (fd as usize) < TASK_CNT_MAX {
            self.complete(-EBADF);
            return;
        }
        let fidx = match self.resolve_fd(fd) {
            Ok((f, _)) => f,
            Err(e) => {
                self.complete(e);
                return;
            }
        };
        let kind = match &self.files[fidx] {
            Some(f) => f.kind,
            None => {
                self.complete(-EBADF);
                return;
            }
        };
        let v = match kind {
            FileKind::Fifo(_) => -ESPIPE,
            FileKind::Device(dev) => dev.seek(self, offset, whence),
        };
        self.complete(v);
    }

    fn sys_fstat(&mut self) {
        let t = self.current_task();
        let (fd, addr) = (t.arg0(), t.arg1() as usize);
        if (fd as usize) < TASK_CNT_MAX {
            self.complete(-EBADF);
            return;
        }
        let fidx = match self.resolve_fd(fd) {
            Ok((f, _)) => f,
            Err(e) => {
                self.complete(e);
                return;
            }
        };
        let mut statbuf = match USlice::<Stat>::from_raw(addr, 1) {
            Ok(s) => s,
            Err(_) => {
                self.complete(-EINVAL);
                return;
            }
        };
        if let Some(inode) = self.files[fidx].as_ref().and_then(|f| f.inode) {
            // Safety: validated slice; owner suspended while we write it.
            (unsafe { statbuf.assume_writable() })[0] = inode;
        }
        self.complete(0);
    }

    fn sys_opendir(&mut self) {
        let dirp = self.current_task().arg1() as usize;
        let mut dirp = match USlice::<u32>::from_raw(dirp, 1) {
            Ok(s) => s,
            Err(_) => {
                self.complete(-EINVAL);
                return;
            }
        };
        if !self.current_task().syscall_pending {
            let addr = self.current_task().arg0() as usize;
            let req = match self.user_path(addr) {
                Ok(path) => FsRequest::OpenDir {
                    pid: self.current as u32,
                    path,
                },
                Err(e) => {
                    self.complete(e);
                    return;
                }
            };
            if let Err(e) = self.fs_send_request(&req) {
                self.complete(e);
                return;
            }
        }
        match self.fs_read_reply() {
            SysResult::Pending => {}
            SysResult::Done(handle) => {
                if handle < 0 {
                    self.complete(-1);
                } else {
                    // Safety: validated above.
                    (unsafe { dirp.assume_writable() })[0] = handle as u32;
                    self.complete(0);
                }
            }
        }
    }

    fn sys_readdir(&mut self) {
        let t = self.current_task();
        let (dirp_addr, dirent_addr) = (t.arg0() as usize, t.arg1());
        let handle = match USlice::<u32>::from_raw(dirp_addr, 1) {
            // Safety: validated slice, read-only access.
            Ok(s) => (unsafe { s.assume_readable() })[0],
            Err(_) => {
                self.complete(-EINVAL);
                return;
            }
        };
        if !self.current_task().syscall_pending {
            let req = FsRequest::ReadDir {
                pid: self.current as u32,
                handle,
                dirent_addr,
            };
            if let Err(e) = self.fs_send_request(&req) {
                self.complete(e);
                return;
            }
        }
        let r = self.fs_read_reply();
        self.apply(r);
    }

    fn sys_getpriority(&mut self) {
        let v = i32::from(self.current_task().priority.0);
        self.complete(v);
    }

    fn sys_setpriority(&mut self) {
        let t = self.current_task();
        let (which, who, pri) = (t.arg0(), t.arg1() as usize, t.arg2());
        if which != PRIO_PROCESS
            || who >= self.task_cnt
            || pri > u32::from(TASK_PRIORITY_MAX)
        {
            self.complete(-1);
            return;
        }
        let new = Priority(pri as u8);
        if self.tasks[who].state == TaskState::Ready {
            // Keep the ready-queue/priority correspondence intact.
            let Self { tasks, ready, .. } = self;
            ready.remove(tasks, who);
            tasks[who].priority = new;
            ready.enqueue(tasks, who);
        } else {
            self.tasks[who].priority = new;
        }
        self.complete(0);
    }

    fn sys_getpid(&mut self) {
        let pid = self.current_task().pid as i32;
        self.complete(pid);
    }

    fn sys_mknod(&mut self) {
        if !self.current_task().syscall_pending {
            let t = self.current_task();
            let (addr, dev) = (t.arg0() as usize, t.arg2());
            let req = match self.user_path(addr) {
                Ok(path) => FsRequest::Create {
                    pid: self.current as u32,
                    path,
                    dev,
                },
                Err(e) => {
                    self.complete(e);
                    return;
                }
            };
            if let Err(e) = self.fs_send_request(&req) {
                self.complete(e);
                return;
            }
        }
        match self.fs_read_reply() {
            SysResult::Pending => {}
            SysResult::Done(file_idx) => {
                self.complete(if file_idx == -1 { -1 } else { 0 });
            }
        }
    }

    fn sys_mkfifo(&mut self) {
        if !self.current_task().syscall_pending {
            let addr = self.current_task().arg0() as usize;
            let req = match self.user_path(addr) {
                Ok(path) => FsRequest::Create {
                    pid: self.current as u32,
                    path,
                    dev: S_IFIFO,
                },
                Err(e) => {
                    self.complete(e);
                    return;
                }
            };
            if let Err(e) = self.fs_send_request(&req) {
                self.complete(e);
                return;
            }
        }
        match self.fs_read_reply() {
            SysResult::Pending => {}
            SysResult::Done(reply) => {
                // The returned file index lands in its own local; only
                // success or failure is reported to the caller.
                let file_idx = reply;
                self.complete(if file_idx == -1 { -1 } else { 0 });
            }
        }
    }

    fn sys_mq_open(&mut self) {
        let t = self.current_task();
        let (name_addr, oflag, attr_addr) =
            (t.arg0() as usize, OpenFlags(t.arg1()), t.arg2() as usize);

        let mut name = [0u8; abi::FILE_NAME_LEN_MAX];
        if umem::read_cstr_into(name_addr, &mut name).is_none() {
            self.complete(-EINVAL);
            return;
        }
        let attr = match USlice::<MqAttr>::from_raw(attr_addr, 1) {
            // Safety: validated slice, read-only access.
            Ok(s) => (unsafe { s.assume_readable() })[0],
            Err(_) => {
                self.complete(-EINVAL);
                return;
            }
        };
        let r = self.mq_open(&name, oflag, attr);
        self.complete(r);
    }

    fn sys_mq_receive(&mut self) {
        let t = self.current_task();
        let (mqdes, addr, len) =
            (t.arg0() as usize, t.arg1() as usize, t.arg2() as usize);
        let mut us = match USlice::<u8>::from_raw(addr, len) {
            Ok(s) => s,
            Err(_) => {
                self.complete(-EINVAL);
                return;
            }
        };
        // Safety: validated slice; owner suspended while we hold it.
        let dst = unsafe { us.assume_writable() };
        let r = self.mq_receive(mqdes, dst);
        self.apply(r);
    }

    fn sys_mq_send(&mut self) {
        let t = self.current_task();
        let (mqdes, addr, len) =
            (t.arg0() as usize, t.arg1() as usize, t.arg2() as usize);
        let us = match USlice::<u8>::from_raw(addr, len) {
            Ok(s) => s,
            Err(_) => {
                self.complete(-EINVAL);
                return;
            }
        };
        // Safety: validated slice; owner suspended while we hold it.
        let src = unsafe { us.assume_readable() };
        let r = self.mq_send(mqdes, src);
        self.apply(r);
    }

    fn sys_mutex_init(&mut self) {
        let addr = self.current_task().arg0() as usize;
        let mut us = match USlice::<u32>::from_raw(addr, 1) {
            Ok(s) => s,
            Err(_) => {
                self.complete(EINVAL);
                return;
            }
        };
        match self.mutex_create() {
            Some(idx) => {
                // Safety: validated slice; the mutex word is the caller's.
                (unsafe { us.assume_writable() })[0] = idx as u32;
                self.complete(0);
            }
            None => self.complete(ENOMEM),
        }
    }

    /// Reads the kernel mutex index out of the caller's mutex word.
    fn user_mutex_index(&self) -> Result<usize, i32> {
        let addr = self.current_task().arg0() as usize;
        let us = USlice::<u32>::from_raw(addr, 1).map_err(|_| EINVAL)?;
        // Safety: validated slice, read-only access.
        Ok((unsafe { us.assume_readable() })[0] as usize)
    }

    fn sys_mutex_lock(&mut self) {
        match self.user_mutex_index() {
            Ok(idx) => {
                let r = self.mutex_lock(idx);
                self.apply(r);
            }
            Err(e) => self.complete(e),
        }
    }

    fn sys_mutex_unlock(&mut self) {
        match self.user_mutex_index() {
            Ok(idx) => {
                let r = self.mutex_unlock(idx);
                self.apply(r);
            }
            Err(e) => self.complete(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::testutil::{
        boxed_kernel, kernel_with_tasks, retry_pending, syscall,
    };
    use byteorder::{ByteOrder, LittleEndian};

    #[test]
    fn yield_round_robins_equal_priorities() {
        let mut k = kernel_with_tasks(2, 2);
        let a = k.current;
        let b = 1 - a;

        let mut order = Vec::new();
        for _ in 0..6 {
            syscall(&mut k, Sysnum::SchedYield, [0; 4]);
            order.push(k.current);
        }
        assert_eq!(order, vec![b, a, b, a, b, a]);
        // Yield reports success into the saved frame.
        assert_eq!(k.tasks[a].arg0(), 0);
    }

    #[test]
    fn fork_returns_child_pid_to_parent_and_zero_to_child() {
        let mut k = kernel_with_tasks(1, 2);
        let parent = k.current;

        syscall(&mut k, Sysnum::Fork, [0; 4]);
        assert_eq!(k.task_cnt, 2);
        let child = 1;

        assert_eq!(k.tasks[parent].arg0(), child as u32);
        assert_eq!(k.tasks[child].arg0(), 0);
        assert_eq!(k.tasks[child].priority, k.tasks[parent].priority);
        assert_eq!(k.tasks[child].state, TaskState::Ready);
    }

    #[test]
    fn fork_exhaustion_reports_failure() {
        let mut k = kernel_with_tasks(1, 2);
        for _ in 0..TASK_CNT_MAX - 1 {
            syscall(&mut k, Sysnum::Fork, [0; 4]);
        }
        assert_eq!(k.task_cnt, TASK_CNT_MAX);
        let cur = k.current;
        syscall(&mut k, Sysnum::Fork, [0; 4]);
        assert_eq!(k.tasks[cur].arg0() as i32, -1);
    }

    #[test]
    fn sleeping_task_defers_to_lower_priority_until_expiry() {
        let mut k = boxed_kernel();
        let low = k.task_create(0x1000, Priority(1)).unwrap() as usize;
        let high = k.task_create(0x1000, Priority(3)).unwrap() as usize;
        k.schedule();
        assert_eq!(k.current, high);

        syscall(&mut k, Sysnum::Sleep, [10, 0, 0, 0]);
        assert_eq!(k.current, low);
        // The sleeper saw an immediate 0 return; it is just not scheduled.
        assert_eq!(k.tasks[high].arg0(), 0);
        assert!(!k.tasks[high].syscall_pending);

        for tick in 1..10 {
            k.tick_update();
            k.schedule();
            assert_eq!(k.current, low, "high woke early at tick {tick}");
        }
        k.tick_update();
        k.schedule();
        assert_eq!(k.current, high);
        // The preempted spinner is ready, not sleeping.
        assert_eq!(k.tasks[low].state, TaskState::Ready);
    }

    #[test]
    fn sleep_zero_behaves_like_yield() {
        let mut k = kernel_with_tasks(2, 2);
        let a = k.current;
        syscall(&mut k, Sysnum::Sleep, [0; 4]);
        assert_ne!(k.current, a);
        assert!(k.sleep.is_empty());
    }

    #[test]
    fn close_validates_descriptors() {
        let mut k = kernel_with_tasks(1, 2);
        let cur = k.current;

        // Inbox descriptors and empty slots are both EBADF.
        syscall(&mut k, Sysnum::Close, [0, 0, 0, 0]);
        assert_eq!(k.tasks[cur].arg0() as i32, -EBADF);
        syscall(&mut k, Sysnum::Close, [TASK_CNT_MAX as u32 + 1, 0, 0, 0]);
        assert_eq!(k.tasks[cur].arg0() as i32, -EBADF);

        // A real entry closes once, then turns stale.
        k.tasks[cur].fdtable[1] = FdEntry {
            file: 0,
            flags: OpenFlags::empty(),
            used: true,
        };
        k.tasks[cur].fd_cnt = 1;
        let fd = TASK_CNT_MAX as u32 + 1;
        syscall(&mut k, Sysnum::Close, [fd, 0, 0, 0]);
        assert_eq!(k.tasks[cur].arg0(), 0);
        assert_eq!(k.tasks[cur].fd_cnt, 0);
        syscall(&mut k, Sysnum::Close, [fd, 0, 0, 0]);
        assert_eq!(k.tasks[cur].arg0() as i32, -EBADF);
    }

    #[test]
    fn open_then_close_leaves_fd_count_unchanged() {
        let mut k = kernel_with_tasks(2, 2);
        let requester = k.current;
        let before = k.tasks[requester].fd_cnt;

        // `open` without a live file-system task: drive the kernel half
        // directly. The request is sent on first entry and the reply read
        // parks the caller.
        let file = k.create_fifo_file("data", 32).unwrap();
        k.fs_send_request(&FsRequest::Open {
            pid: requester as u32,
            path: abi::UserPath { addr: 0x4000, len: 5 },
        })
        .unwrap();
        assert_eq!(k.fs_read_reply(), SysResult::Pending);
        k.schedule();

        // Fake file-system task answers with the file index.
        let mut reply = [0u8; 4];
        LittleEndian::write_i32(&mut reply, file as i32);
        let inbox = match k.files[requester].as_ref().unwrap().kind {
            FileKind::Fifo(p) => p,
            _ => unreachable!(),
        };
        let r = k.pipe_write_bytes(inbox, &reply, true);
        assert_eq!(r, SysResult::Done(4));

        // Requester resumes; its retried reply read now completes and the
        // descriptor is installed.
        k.tick_update();
        k.schedule();
        assert_eq!(k.current, requester);
        let v = match k.fs_read_reply() {
            SysResult::Done(v) => v,
            SysResult::Pending => panic!("reply should be ready"),
        };
        let fd = k.install_fd(v, OpenFlags::empty());
        assert!(fd >= TASK_CNT_MAX as i32);
        assert_eq!(k.tasks[requester].fd_cnt, before + 1);

        syscall(&mut k, Sysnum::Close, [fd as u32, 0, 0, 0]);
        assert_eq!(k.tasks[requester].fd_cnt, before);
    }

    #[test]
    fn priorities_and_pids_report_and_update() {
        let mut k = kernel_with_tasks(2, 2);
        let cur = k.current;

        syscall(&mut k, Sysnum::Getpid, [0; 4]);
        assert_eq!(k.tasks[cur].arg0(), cur as u32);

        syscall(&mut k, Sysnum::Getpriority, [0; 4]);
        assert_eq!(k.tasks[cur].arg0(), 2);

        // Raise the *other* (Ready) task; the queues must follow.
        let other = 1 - cur;
        syscall(&mut k, Sysnum::Setpriority, [PRIO_PROCESS, other as u32, 5, 0]);
        assert_eq!(k.tasks[cur].arg0(), 0);
        assert_eq!(k.tasks[other].priority, Priority(5));
        assert!(k.ready.queue(Priority(5)).contains(&k.tasks, other));
        // And the next pass preempts.
        k.schedule();
        assert_eq!(k.current, other);

        // Bad `which`, unknown pid, out-of-range priority.
        let cur = k.current;
        syscall(&mut k, Sysnum::Setpriority, [1, 0, 3, 0]);
        assert_eq!(k.tasks[cur].arg0() as i32, -1);
        syscall(&mut k, Sysnum::Setpriority, [PRIO_PROCESS, 99, 3, 0]);
        assert_eq!(k.tasks[cur].arg0() as i32, -1);
        syscall(
            &mut k,
            Sysnum::Setpriority,
            [PRIO_PROCESS, 0, u32::from(TASK_PRIORITY_MAX) + 1, 0],
        );
        assert_eq!(k.tasks[cur].arg0() as i32, -1);
    }

    #[test]
    fn unknown_syscall_is_silently_ignored() {
        let mut k = kernel_with_tasks(1, 2);
        let cur = k.current;
        k.tasks[cur].set_arg(0, 0x1234);
        k.tasks[cur].set_syscall_num(99);
        k.dispatch_syscall();
        k.schedule();
        // Registers untouched, nothing pending, task still running.
        assert_eq!(k.tasks[cur].arg0(), 0x1234);
        assert!(!k.tasks[cur].syscall_pending);
        assert_eq!(k.current, cur);
    }

    #[test]
    fn set_irq_suppresses_preemption_until_reenabled() {
        let mut k = kernel_with_tasks(1, 1);
        let cur = k.current;
        syscall(&mut k, Sysnum::SetIrq, [0, 0, 0, 0]);
        assert!(k.irq_off);

        k.task_create(0x1000, Priority(6)).unwrap();
        k.tick_update();
        k.schedule();
        assert_eq!(k.current, cur);

        syscall(&mut k, Sysnum::SetIrq, [1, 0, 0, 0]);
        assert!(!k.irq_off);
        assert_ne!(k.current, cur);
    }

    #[test]
    fn pending_syscall_reenters_until_satisfied() {
        // End-to-end shape of the retry protocol using the inbox FIFO: a
        // task reads its own inbox before anything is there.
        let mut k = kernel_with_tasks(2, 2);
        let reader = k.current;

        let inbox = match k.files[reader].as_ref().unwrap().kind {
            FileKind::Fifo(p) => p,
            _ => unreachable!(),
        };
        let mut buf = [0u8; 3];
        assert_eq!(k.pipe_read_bytes(inbox, &mut buf, false), SysResult::Pending);
        assert!(k.tasks[reader].syscall_pending);
        k.schedule();

        // Peer writes; reader becomes ready with the flag still up.
        assert_eq!(k.pipe_write_bytes(inbox, b"abc", false), SysResult::Done(3));
        assert!(k.tasks[reader].syscall_pending);

        k.tick_update();
        k.schedule();
        assert_eq!(k.current, reader);
        // Main loop would re-enter the body rather than resume user mode.
        assert_eq!(k.pipe_read_bytes(inbox, &mut buf, false), SysResult::Done(3));
        assert_eq!(&buf, b"abc");
        assert!(!k.tasks[reader].syscall_pending);
    }

    #[test]
    fn fork_from_idle_raises_child_priority() {
        let mut k = boxed_kernel();
        k.task_create(0x1000, Priority::IDLE).unwrap();
        k.schedule();
        syscall(&mut k, Sysnum::Fork, [0; 4]);
        // The child outranks idle and takes over immediately.
        assert_eq!(k.current, 1);
        assert_eq!(k.tasks[1].priority, Priority::MIN);
    }

    #[test]
    fn retry_helper_matches_main_loop_shape() {
        let mut k = kernel_with_tasks(2, 2);
        let reader = k.current;
        // Stage a read of the reader's inbox through the real dispatcher
        // path: descriptors below TASK_CNT_MAX reach the inbox FIFO, but a
        // host test cannot pass a buffer pointer through the 32-bit frame,
        // so exercise dispatch with close (always completes) and the
        // pending path with the pipe layer (see tests above). Here we only
        // check that a pending task re-enters through dispatch_syscall.
        let inbox = match k.files[reader].as_ref().unwrap().kind {
            FileKind::Fifo(p) => p,
            _ => unreachable!(),
        };
        let mut tmp = [0u8; 1];
        assert_eq!(k.pipe_read_bytes(inbox, &mut tmp, false), SysResult::Pending);
        k.schedule();
        k.pipe_write_bytes(inbox, b"z", false).ignore();
        k.tick_update();
        k.schedule();
        assert_eq!(k.current, reader);
        assert!(k.current_task().syscall_pending);
        // A retried unknown number must leave the pending flag alone; the
        // real retry goes back into the blocked primitive instead.
        k.tasks[reader].set_syscall_num(99);
        retry_pending(&mut k);
        assert!(k.tasks[reader].syscall_pending);
    }

    impl SysResult {
        fn ignore(self) {}
    }
}
