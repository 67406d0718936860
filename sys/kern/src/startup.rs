// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup.
//!
//! An application hands [`start_kernel`] a [`BoardConfig`] naming its
//! driver init hooks and task entry points -- the build-time-array
//! equivalent of collecting them in dedicated linker sections. Boot order:
//! memory structures, per-task reply FIFOs, driver hooks, the idle task,
//! the tick timer, then the main loop. The idle task, in user mode, forks
//! the file-system task, mounts the ROM image at the root, forks every
//! hooked task, and settles into its spin.

use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicPtr, Ordering};

use abi::Priority;

use crate::kernel::Kernel;

/// Static description of what this board runs.
pub struct BoardConfig {
    /// Core-clock cycles per kernel tick.
    pub tick_divisor: u32,
    /// Driver init hooks, run in privileged mode before any task exists.
    /// Typical work: claim a wait queue, register a character device,
    /// request an interrupt line.
    pub drivers: &'static [fn(&mut Kernel)],
    /// Entry point of the file-system task. Forked before anything else so
    /// that it lands on the pid every requester addresses.
    pub fs_task: fn() -> !,
    /// Entry points of the application's tasks, each forked by the idle
    /// task in order.
    pub tasks: &'static [fn()],
}

static BOARD_CONFIG: AtomicPtr<BoardConfig> = AtomicPtr::new(core::ptr::null_mut());

static mut KERNEL_SPACE: MaybeUninit<Kernel> = MaybeUninit::uninit();

/// The main kernel entry point. The caller has done clock and memory
/// setup; everything from here on is ours.
///
/// # Safety
///
/// This can be called exactly once per boot.
pub unsafe fn start_kernel(config: &'static BoardConfig) -> ! {
    klog!("starting: queues");
    BOARD_CONFIG.store(config as *const _ as *mut _, Ordering::Relaxed);

    let kernel = (*core::ptr::addr_of_mut!(KERNEL_SPACE)).write(Kernel::new());
    kernel.init_reply_fifos();

    for hook in config.drivers {
        hook(kernel);
    }

    klog!("starting: tasks");
    // Only the idle task may carry priority zero.
    let idle = kernel.task_create(idle_main as usize as u32, Priority::IDLE);
    uassert!(idle.is_some());

    crate::arch::set_kernel(kernel);
    crate::arch::init(config.tick_divisor);

    klog!("starting: user mode");
    kernel.main_loop()
}

/// Body of the first task. Runs unprivileged; everything below is ordinary
/// syscalls.
extern "C" fn idle_main() -> ! {
    // Safety: stored before the first task could possibly run, never
    // changed after.
    let config = unsafe { &*BOARD_CONFIG.load(Ordering::Relaxed) };

    userlib::set_program_name("idle");

    if userlib::fork() == 0 {
        (config.fs_task)();
    }

    userlib::mount("/dev/rom", "/");

    for &task in config.tasks {
        if userlib::fork() == 0 {
            task();
            // A task function that returns has nothing left to do.
            loop {
                userlib::sched_yield();
            }
        }
    }

    // Nothing else to start; this is the idle loop the scheduler falls
    // back on when no other task is ready.
    loop {
        core::hint::spin_loop();
    }
}
