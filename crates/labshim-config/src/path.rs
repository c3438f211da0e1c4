//! Program-name and library-path helpers.

use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Final `/`-separated component of `path`, or all of it.
pub fn basename(path: &[u8]) -> &[u8] {
    match path.iter().rposition(|&b| b == b'/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn glibc_invocation_name() -> Option<Vec<u8>> {
    extern "C" {
        static program_invocation_name: *const libc::c_char;
    }
    // Set by glibc before any constructor runs
    let ptr = unsafe { program_invocation_name };
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { std::ffi::CStr::from_ptr(ptr) }.to_bytes().to_vec())
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn glibc_invocation_name() -> Option<Vec<u8>> {
    None
}

/// Basename of the invoking program, as compared against the program filter.
pub fn invocation_name() -> String {
    let full = glibc_invocation_name().or_else(|| {
        std::env::args_os()
            .next()
            .map(|arg0| arg0.as_bytes().to_vec())
    });
    match full {
        Some(full) => String::from_utf8_lossy(basename(&full)).into_owned(),
        None => String::new(),
    }
}

/// Resolve a preload library path to an absolute one.
///
/// `LD_PRELOAD` entries are resolved against the target's working directory,
/// so relative paths must not leak into a child environment.
pub fn normalize_library_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    path.canonicalize()
        .with_context(|| format!("Failed to resolve preload library: {}", path.display()))
}

/// Prepend `lib` to an existing `LD_PRELOAD` value, dropping empty entries.
pub fn prepend_preload(lib: &Path, existing: Option<&OsStr>) -> String {
    let lib = lib.to_string_lossy();
    let existing = existing.map(|e| e.to_string_lossy());
    [Some(&*lib), existing.as_deref()]
        .into_iter()
        .flatten()
        .filter(|entry| !entry.is_empty())
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basename() {
        assert_eq!(basename(b"/opt/xilinx/bin/hw_server"), b"hw_server");
        assert_eq!(basename(b"hw_server"), b"hw_server");
        assert_eq!(basename(b"/trailing/"), b"");
    }

    #[test]
    fn test_invocation_name_is_basename() {
        let name = invocation_name();
        assert!(!name.is_empty());
        assert!(!name.contains('/'));
    }

    #[test]
    fn test_prepend_preload() {
        let lib = Path::new("/usr/lib/libhwsf.so");
        assert_eq!(prepend_preload(lib, None), "/usr/lib/libhwsf.so");
        assert_eq!(
            prepend_preload(lib, Some(OsStr::new("/usr/lib/libfoo.so"))),
            "/usr/lib/libhwsf.so:/usr/lib/libfoo.so"
        );
        assert_eq!(prepend_preload(lib, Some(OsStr::new(""))), "/usr/lib/libhwsf.so");
    }

    #[test]
    fn test_normalize_missing_library_fails() {
        let err = normalize_library_path("/nonexistent/libhwsf.so").unwrap_err();
        assert!(err.to_string().contains("libhwsf.so"));
    }
}
