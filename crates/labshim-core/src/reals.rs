//! Real Symbol Storage
//!
//! Resolves the genuine libc implementations of every intercepted entry
//! point. Interception is only a wrapper: without these there is no
//! passthrough either.
//!
//! Lookup order per symbol: `dlsym(RTLD_NEXT)`, then an explicit
//! `dlopen("libc.so.6")`.

use crate::error::InitError;
use libc::{c_char, c_int, c_void, mode_t, size_t, ssize_t};
use std::ffi::CStr;
use std::sync::atomic::{AtomicPtr, Ordering};

pub type OpenFn = unsafe extern "C" fn(*const c_char, c_int, mode_t) -> c_int;
pub type OpenAtFn = unsafe extern "C" fn(c_int, *const c_char, c_int, mode_t) -> c_int;
pub type ReadFn = unsafe extern "C" fn(c_int, *mut c_void, size_t) -> ssize_t;
pub type CloseFn = unsafe extern "C" fn(c_int) -> c_int;

pub const LIBC_NAME: &CStr = c"libc.so.6";

/// Handle of the explicitly loaded libc, opened on first fallback.
static LIBC_HANDLE: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

unsafe fn libc_handle() -> Result<*mut c_void, InitError> {
    let h = LIBC_HANDLE.load(Ordering::Acquire);
    if !h.is_null() {
        return Ok(h);
    }
    let h = libc::dlopen(LIBC_NAME.as_ptr(), libc::RTLD_LAZY);
    if h.is_null() {
        return Err(InitError::LibraryLoad {
            library: LIBC_NAME.to_string_lossy().into_owned(),
            detail: dlerror_string(),
        });
    }
    // A racing thread may have stored its own handle; both refer to the same object
    LIBC_HANDLE.store(h, Ordering::Release);
    Ok(h)
}

unsafe fn dlerror_string() -> String {
    let e = libc::dlerror();
    if e.is_null() {
        "unknown dynamic loader error".to_string()
    } else {
        CStr::from_ptr(e).to_string_lossy().into_owned()
    }
}

/// Address of the next definition of `name` after this library.
pub fn lookup(name: &CStr) -> Result<*mut c_void, InitError> {
    unsafe {
        let f = libc::dlsym(libc::RTLD_NEXT, name.as_ptr());
        if !f.is_null() {
            return Ok(f);
        }
        let f = libc::dlsym(libc_handle()?, name.as_ptr());
        if !f.is_null() {
            return Ok(f);
        }
        Err(InitError::SymbolNotFound {
            symbol: name.to_string_lossy().into_owned(),
            detail: dlerror_string(),
        })
    }
}

/// The genuine implementations every interception delegates to.
#[derive(Clone, Copy)]
pub struct RealFns {
    pub open: OpenFn,
    pub open64: OpenFn,
    pub openat: OpenAtFn,
    pub read: ReadFn,
    pub close: CloseFn,
}

impl RealFns {
    pub fn resolve() -> Result<Self, InitError> {
        // Casting a non-null dlsym result to the matching signature is the
        // dynamic-loader contract
        unsafe {
            Ok(Self {
                open: std::mem::transmute::<*mut c_void, OpenFn>(lookup(c"open")?),
                open64: std::mem::transmute::<*mut c_void, OpenFn>(lookup(c"open64")?),
                openat: std::mem::transmute::<*mut c_void, OpenAtFn>(lookup(c"openat")?),
                read: std::mem::transmute::<*mut c_void, ReadFn>(lookup(c"read")?),
                close: std::mem::transmute::<*mut c_void, CloseFn>(lookup(c"close")?),
            })
        }
    }
}

impl std::fmt::Debug for RealFns {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealFns")
            .field("open", &(self.open as *const ()))
            .field("open64", &(self.open64 as *const ()))
            .field("openat", &(self.openat as *const ()))
            .field("read", &(self.read as *const ()))
            .field("close", &(self.close as *const ()))
            .finish()
    }
}
