// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Syscall handlers never unwind. A handler either produces a user-visible
//! result -- written into the caller's saved `r0` slot -- or it suspends the
//! caller and asks to be re-entered later. [`SysResult`] is how the two
//! outcomes travel between the primitives and the dispatcher.

/// Outcome of running (or re-running) a syscall body.
///
/// This is `must_use` because dropping one silently would either lose a
/// return value or strand a blocked task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum SysResult {
    /// The operation finished and this value belongs in the caller's saved
    /// `r0` slot. The caller's `syscall_pending` flag has been cleared.
    Done(i32),
    /// The operation parked the caller on a wait queue and set its
    /// `syscall_pending` flag; the dispatcher must not write a return value.
    Pending,
}

/// An argument error detected before a syscall touches anything.
///
/// These come from patently invalid user slices: unaligned for their type,
/// or wrapping the end of the address space. Handlers convert them to
/// `-EINVAL` in the saved `r0` slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UsageError {
    InvalidSlice,
}
