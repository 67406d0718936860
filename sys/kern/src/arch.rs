// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture selection.
//!
//! The portable kernel sees one flat `arch` API: enter a task, mask or
//! unmask device interrupts, reach the kernel singleton from an ISR, start
//! the tick. Bare-metal builds get the ARM-M trampoline; everything else
//! (including the host-side test build) gets stubs that panic on the
//! operations that genuinely require the hardware.

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        mod arm_m;
        pub use arm_m::*;
    } else {
        mod hosted;
        pub use hosted::*;
    }
}
