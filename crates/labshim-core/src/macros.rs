//! Symbol export macros for the preload libraries.
//!
//! Each cdylib declares one `static` [`GlobalShim`](crate::GlobalShim) and
//! expands the macros for the entry points it intercepts:
//!
//! ```ignore
//! static SHIM: GlobalShim = GlobalShim::new(Variant::HardwareSpoof);
//!
//! labshim_core::export_constructor!(SHIM);
//! labshim_core::export_open_family!(SHIM);
//! labshim_core::export_read_close!(SHIM);
//! ```
//!
//! The open family is exported with a fixed `mode_t` third argument. On the
//! supported ABIs a variadic caller passes it in the same register, and
//! [`effective_mode`](crate::syscalls::open::effective_mode) zeroes it when
//! the flags say it was never supplied.

/// `.init_array` constructor installing the shim at load time.
#[macro_export]
macro_rules! export_constructor {
    ($shim:ident) => {
        #[cfg(target_os = "linux")]
        #[link_section = ".init_array"]
        #[used]
        static LABSHIM_INIT: unsafe extern "C" fn() = {
            unsafe extern "C" fn init() {
                $shim.install_or_exit();
            }
            init
        };
    };
}

/// `open`, `open64` and `openat`.
#[macro_export]
macro_rules! export_open_family {
    ($shim:ident) => {
        #[no_mangle]
        pub unsafe extern "C" fn open(
            path: *const $crate::libc::c_char,
            flags: $crate::libc::c_int,
            mode: $crate::libc::mode_t,
        ) -> $crate::libc::c_int {
            $shim.open($crate::OpenCall::Open, path, flags, mode)
        }

        #[no_mangle]
        pub unsafe extern "C" fn open64(
            path: *const $crate::libc::c_char,
            flags: $crate::libc::c_int,
            mode: $crate::libc::mode_t,
        ) -> $crate::libc::c_int {
            $shim.open($crate::OpenCall::Open64, path, flags, mode)
        }

        #[no_mangle]
        pub unsafe extern "C" fn openat(
            dirfd: $crate::libc::c_int,
            path: *const $crate::libc::c_char,
            flags: $crate::libc::c_int,
            mode: $crate::libc::mode_t,
        ) -> $crate::libc::c_int {
            $shim.open($crate::OpenCall::OpenAt(dirfd), path, flags, mode)
        }
    };
}

/// `read` and `close`, needed to spoof and forget tracked descriptors.
#[macro_export]
macro_rules! export_read_close {
    ($shim:ident) => {
        #[no_mangle]
        pub unsafe extern "C" fn read(
            fd: $crate::libc::c_int,
            buf: *mut $crate::libc::c_void,
            count: $crate::libc::size_t,
        ) -> $crate::libc::ssize_t {
            $shim.read(fd, buf, count)
        }

        #[no_mangle]
        pub unsafe extern "C" fn close(fd: $crate::libc::c_int) -> $crate::libc::c_int {
            $shim.close(fd)
        }
    };
}
