// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stub architecture for hosted builds.
//!
//! The portable kernel -- scheduler, queues, pipes, syscall bodies -- runs
//! and is tested on a development host, where there is no unprivileged
//! mode to drop into. Everything here either does nothing (interrupt
//! masking) or panics (actually running a task), mirroring what a
//! simulator backend would flesh out.

use core::sync::atomic::{AtomicPtr, Ordering};

use crate::kernel::{Kernel, Trap};

static KERNEL_PTR: AtomicPtr<Kernel> = AtomicPtr::new(core::ptr::null_mut());

/// Records the kernel's address for ISR-style access.
///
/// # Safety
///
/// Call once, with a kernel that outlives all `with_kernel` uses.
pub unsafe fn set_kernel(kernel: &mut Kernel) {
    KERNEL_PTR.store(kernel, Ordering::Relaxed);
}

pub fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    let p = KERNEL_PTR.load(Ordering::Relaxed);
    uassert!(!p.is_null());
    // Safety: single-threaded by construction on this backend.
    unsafe { f(&mut *p) }
}

pub fn mask_kernel_irqs() {}

pub fn unmask_kernel_irqs() {}

pub fn with_irqs_masked<R>(f: impl FnOnce() -> R) -> R {
    f()
}

pub fn request_irq(_n: usize, _handler: fn()) -> Result<(), ()> {
    Ok(())
}

/// # Safety
///
/// Nothing to set up here; present for signature parity.
pub unsafe fn init(_tick_divisor: u32) {}

pub fn enter_user(_kernel: &mut Kernel) -> Trap {
    panic!("user-mode execution requires the target machine");
}

/// Placeholder return-site address; host frames are never resumed.
pub fn task_return_addr() -> u32 {
    0x0000_DEAC
}

pub fn halt() -> ! {
    panic!("kernel halted");
}
