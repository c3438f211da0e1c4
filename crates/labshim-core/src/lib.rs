//! # labshim-core
//!
//! Interposition core shared by the `filsel` and `hwsf` preload libraries.
//!
//! - [`reals`]: the genuine libc functions every hook delegates to
//! - [`path`]: prefix rewriting and the sysfs descriptor scope matcher
//! - [`record`]: in-place view of a USB device descriptor
//! - [`state`]: per-process state, recursion guard and load-time install
//! - [`syscalls`]: the open/read/close logic behind the exported symbols

// Allow unsafe FFI functions without safety docs - these are inherently unsafe C ABI
#![allow(clippy::missing_safety_doc)]

// Macros must be defined before modules that use them
#[macro_use]
pub mod macros;

pub mod error;
pub mod path;
pub mod reals;
pub mod record;
pub mod state;
pub mod sync;
pub mod syscalls;

pub use error::InitError;
pub use libc;
pub use reals::RealFns;
pub use state::{GlobalShim, ShimState};
pub use syscalls::open::OpenCall;

pub(crate) use labshim_config::{log_hook_debug, log_hook_error};

pub(crate) fn errno() -> libc::c_int {
    unsafe { *libc::__errno_location() }
}

pub(crate) fn set_errno(e: libc::c_int) {
    unsafe { *libc::__errno_location() = e };
}

/// Restores the caller-visible errno when dropped.
pub(crate) struct ErrnoGuard(libc::c_int);

impl ErrnoGuard {
    pub(crate) fn save() -> Self {
        Self(errno())
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        set_errno(self.0);
    }
}
