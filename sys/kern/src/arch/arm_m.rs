// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for ARMv7E-M (Cortex-M4/M7 class parts).
//!
//! # The two-stack trampoline
//!
//! The kernel's main loop runs as a privileged *thread* on the main stack
//! (MSP); tasks run unprivileged on the process stack (PSP). Handing the
//! CPU to a task and getting it back rides entirely on the exception
//! machinery:
//!
//! - `jump_to_user` pushes the kernel's callee-saved registers and executes
//!   `svc`. The handler sees the trap came from the main stack, loads the
//!   task's software-saved block from its frame, points PSP at the hardware
//!   half, and exception-returns into the task. The kernel's own exception
//!   frame stays parked on the MSP.
//! - When the task traps (SVC or SysTick), the handler -- back on the MSP,
//!   right on top of that parked frame -- deposits the task's registers
//!   below its hardware frame, writes the new frame base and the trap kind
//!   into the parked frame's `r0`/`r1` slots, and exception-returns to
//!   *thread-mode-on-MSP*: the kernel loop resumes just after its `svc`
//!   with both values in hand.
//!
//! A tick that lands while the kernel itself is running cannot unwind that
//! way; the handler just sets `TICK_PENDING` and the loop picks it up
//! before next entering user code.
//!
//! Kernel handlers (SVCall, SysTick) sit at `KERNEL_INT_PRI`; device
//! interrupts sit strictly below it, and the kernel keeps BASEPRI at the
//! kernel level except while user code runs. Device ISRs therefore never
//! observe half-updated queues, and [`with_kernel`] is safe to call from
//! them.

use core::arch::global_asm;
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};

use crate::kernel::{Kernel, Trap};

/// Exception priority (upper nibble) of the kernel's own handlers. Device
/// interrupts must register numerically above this.
pub const KERNEL_INT_PRI: u8 = 4;

/// Number of NVIC interrupt lines we track handlers for.
pub const IRQ_CNT_MAX: usize = 96;

/// The kernel singleton, recorded at boot so ISRs can find it.
static KERNEL_PTR: AtomicPtr<Kernel> = AtomicPtr::new(core::ptr::null_mut());

/// Set by the SysTick handler when the tick interrupted kernel code;
/// consumed by [`enter_user`].
#[no_mangle]
static TICK_PENDING: AtomicU32 = AtomicU32::new(0);

/// Registered device interrupt handlers, stored as raw fn addresses.
static IRQ_HANDLERS: [AtomicUsize; IRQ_CNT_MAX] = {
    #[allow(clippy::declare_interior_mutable_const)]
    const NONE: AtomicUsize = AtomicUsize::new(0);
    [NONE; IRQ_CNT_MAX]
};

/// Records the kernel's address for ISR access.
///
/// # Safety
///
/// Call once at boot, with a kernel that lives forever.
pub unsafe fn set_kernel(kernel: &mut Kernel) {
    KERNEL_PTR.store(kernel, Ordering::Relaxed);
}

/// Grants an ISR access to the kernel. Sound because device ISRs run below
/// `KERNEL_INT_PRI` and the kernel raises BASEPRI to that level whenever
/// its own code touches shared state.
pub fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    let p = KERNEL_PTR.load(Ordering::Relaxed);
    uassert!(!p.is_null());
    // Safety: set once at boot; exclusive by the priority discipline above.
    unsafe { f(&mut *p) }
}

/// Raises BASEPRI to the kernel level, shutting out device interrupts.
pub fn mask_kernel_irqs() {
    unsafe {
        core::arch::asm!(
            "msr BASEPRI, {}",
            in(reg) u32::from(KERNEL_INT_PRI << 4),
            options(nomem, nostack, preserves_flags),
        );
    }
}

/// Drops BASEPRI back to zero, admitting device interrupts.
pub fn unmask_kernel_irqs() {
    unsafe {
        core::arch::asm!(
            "msr BASEPRI, {}",
            in(reg) 0u32,
            options(nomem, nostack, preserves_flags),
        );
    }
}

/// Runs `f` with device interrupts masked, restoring the previous mask.
pub fn with_irqs_masked<R>(f: impl FnOnce() -> R) -> R {
    let prev: u32;
    unsafe {
        core::arch::asm!("mrs {}, BASEPRI", out(reg) prev, options(nomem, nostack));
    }
    mask_kernel_irqs();
    let r = f();
    if prev == 0 {
        unmask_kernel_irqs();
    }
    r
}

/// Registers `handler` for NVIC interrupt `n` and enables the line at a
/// priority below the kernel's handlers.
pub fn request_irq(n: usize, handler: fn()) -> Result<(), ()> {
    if n >= IRQ_CNT_MAX {
        return Err(());
    }
    IRQ_HANDLERS[n].store(handler as usize, Ordering::Relaxed);
    // Safety: straight register pokes; the vector table already routes this
    // line to DefaultHandler.
    unsafe {
        let nvic = &*cortex_m::peripheral::NVIC::PTR;
        // Device interrupts live one level below the kernel handlers.
        nvic.ipr[n].write((KERNEL_INT_PRI + 1) << 4);
        nvic.iser[n / 32].write(1 << (n % 32));
    }
    Ok(())
}

/// Shared vector for all device interrupts; dispatches through the
/// registration table. The vector table routes unhandled IRQs here.
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn DefaultHandler() {
    // IPSR holds the exception number; external interrupts start at 16.
    let ipsr: u32;
    core::arch::asm!("mrs {}, IPSR", out(reg) ipsr, options(nomem, nostack));
    let irq = (ipsr & 0x1FF).wrapping_sub(16) as usize;
    if irq < IRQ_CNT_MAX {
        let f = IRQ_HANDLERS[irq].load(Ordering::Relaxed);
        if f != 0 {
            let f: fn() = core::mem::transmute(f);
            f();
        }
    }
}

/// Configures handler priorities and starts the tick timer. `tick_divisor`
/// is core-clock cycles per kernel tick.
///
/// # Safety
///
/// Call once at boot, before `main_loop`.
pub unsafe fn init(tick_divisor: u32) {
    use cortex_m::peripheral::scb::SystemHandler;
    use cortex_m::peripheral::syst::SystClkSource;

    let mut p = cortex_m::Peripherals::steal();
    p.SCB.set_priority(SystemHandler::SVCall, KERNEL_INT_PRI << 4);
    p.SCB.set_priority(SystemHandler::SysTick, KERNEL_INT_PRI << 4);

    p.SYST.set_clock_source(SystClkSource::Core);
    p.SYST.set_reload(tick_divisor - 1);
    p.SYST.clear_current();
    p.SYST.enable_interrupt();
    p.SYST.enable_counter();

    // Kernel code runs masked; user entry lowers the mask.
    mask_kernel_irqs();
}

/// Resumes the current task in user mode and blocks (from the loop's point
/// of view) until it traps back. Returns why control came back.
pub fn enter_user(kernel: &mut Kernel) -> Trap {
    // A tick that landed while the kernel was working is processed before
    // any more user code runs.
    if TICK_PENDING.swap(0, Ordering::Relaxed) != 0 {
        return Trap::Tick;
    }

    let cur = kernel.current;
    let top = kernel.tasks[cur].stack_top_addr() as u32;

    if !kernel.irq_off {
        unmask_kernel_irqs();
    }
    // Safety: `top` is a valid frame base maintained by the trap protocol.
    let ret = unsafe { jump_to_user(top) };
    mask_kernel_irqs();

    kernel.tasks[cur].set_stack_top_addr(ret as u32 as usize);
    if (ret >> 32) as u32 == TRAP_KIND_TICK {
        Trap::Tick
    } else {
        Trap::Syscall
    }
}

const TRAP_KIND_TICK: u32 = 1;

extern "C" {
    /// Drops into the task whose frame starts at `stack_top`. Returns only
    /// when the task traps; the low word of the result is the new frame
    /// base, the high word the trap kind.
    fn jump_to_user(stack_top: u32) -> u64;
}

/// Landing site for a task function that returns. Runs unprivileged, so
/// all it can do is park the task forever; the supervisor sees a silent
/// task, which is the defined behavior for this fatal condition.
extern "C" fn task_return_trap() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// Address installed as the initial `lr` of every task frame.
pub fn task_return_addr() -> u32 {
    task_return_trap as usize as u32
}

/// Fatal stop: interrupts off, wait forever.
pub fn halt() -> ! {
    cortex_m::interrupt::disable();
    loop {
        cortex_m::asm::wfi();
    }
}

/// Hard faults are fatal; there is no isolation to recover behind.
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn HardFault() -> ! {
    klog!("hard fault");
    halt()
}

global_asm! {
    "
    .section .text.jump_to_user
    .globl jump_to_user
    .type jump_to_user,function
    .thumb_func
    jump_to_user:
        @ r0 = frame base of the task to resume.
        push {{r4-r11, lr}}
        svc #0
        @ We get back here only via ret_to_kernel, with r0 = new frame
        @ base and r1 = trap kind already in place.
        pop {{r4-r11, pc}}

    .section .text.SVCall
    .globl SVCall
    .type SVCall,function
    .thumb_func
    SVCall:
        tst lr, #4
        beq 1f

        @ Trap from a task: build the software-saved block under the
        @ hardware frame. With live FPU state, s16-s31 go in between.
        mrs r0, PSP
        tst lr, #0x10
        bne 2f
        vstmdb r0!, {{s16-s31}}
    2:  sub r0, #40
        stm r0!, {{r4-r11}}
        mov r2, lr
        mov r3, r11          @ syscall number rides in r11
        stm r0!, {{r2, r3}}
        sub r0, #40
        movs r1, #0          @ trap kind: syscall
        b ret_to_kernel

    1:  @ Request from jump_to_user: unpack the frame and drop into the
        @ task.
        ldr r0, [sp]
        ldm r0!, {{r4-r11}}
        ldm r0!, {{r2, r3}}  @ r2 = EXC_RETURN, r3 = saved syscall number
        tst r2, #0x10
        bne 3f
        vldm r0!, {{s16-s31}}
    3:  msr PSP, r0
        bx r2

    .section .text.SysTick
    .globl SysTick
    .type SysTick,function
    .thumb_func
    SysTick:
        tst lr, #4
        beq 4f

        @ Tick landed in user code: identical save path, tick trap kind.
        mrs r0, PSP
        tst lr, #0x10
        bne 5f
        vstmdb r0!, {{s16-s31}}
    5:  sub r0, #40
        stm r0!, {{r4-r11}}
        mov r2, lr
        mov r3, r11
        stm r0!, {{r2, r3}}
        sub r0, #40
        movs r1, #1          @ trap kind: tick
        b ret_to_kernel

    4:  @ Tick landed in the kernel loop: flag it and get out.
        ldr r0, =TICK_PENDING
        movs r1, #1
        str r1, [r0]
        bx lr

    .section .text.ret_to_kernel
    .type ret_to_kernel,function
    .thumb_func
    ret_to_kernel:
        @ The kernel's own exception frame from jump_to_user's svc is
        @ parked at the current MSP top. Plant the return values in its
        @ r0/r1 slots and pop it by returning to thread-mode-on-MSP.
        str r0, [sp, #0]
        str r1, [sp, #4]
        ldr lr, =0xFFFFFFF9
        bx lr
    ",
}
