use crate::reals::RealFns;
use crate::state::{Policy, ShimState};
use crate::{log_hook_debug, log_hook_error, ErrnoGuard};
use libc::{c_char, c_int, mode_t};
use std::ffi::CStr;

/// Which member of the open family was intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenCall {
    Open,
    Open64,
    OpenAt(c_int),
}

impl OpenCall {
    pub fn name(self) -> &'static str {
        match self {
            OpenCall::Open => "open",
            OpenCall::Open64 => "open64",
            OpenCall::OpenAt(_) => "openat",
        }
    }

    /// Forward to the same-named real function.
    pub unsafe fn invoke(
        self,
        reals: &RealFns,
        path: *const c_char,
        flags: c_int,
        mode: mode_t,
    ) -> c_int {
        let mode = effective_mode(flags, mode);
        match self {
            OpenCall::Open => (reals.open)(path, flags, mode),
            OpenCall::Open64 => (reals.open64)(path, flags, mode),
            OpenCall::OpenAt(dirfd) => (reals.openat)(dirfd, path, flags, mode),
        }
    }
}

/// The mode argument only exists when the call may create a file.
pub fn effective_mode(flags: c_int, mode: mode_t) -> mode_t {
    if flags & libc::O_CREAT != 0 || flags & libc::O_TMPFILE == libc::O_TMPFILE {
        mode
    } else {
        0
    }
}

impl ShimState {
    pub unsafe fn open(
        &self,
        call: OpenCall,
        path: *const c_char,
        flags: c_int,
        mode: mode_t,
    ) -> c_int {
        if path.is_null() {
            return call.invoke(&self.reals, path, flags, mode);
        }
        let cpath = CStr::from_ptr(path);

        match &self.policy {
            Policy::Passthrough => call.invoke(&self.reals, path, flags, mode),
            Policy::Rewrite(rewriter) => match rewriter.rewrite(cpath) {
                Some(dest) => {
                    log_hook_debug!(
                        call.name(),
                        "redirecting",
                        from = &*cpath.to_string_lossy(),
                        to = &*dest.to_string_lossy(),
                    );
                    call.invoke(&self.reals, dest.as_ptr(), flags, mode)
                }
                None => call.invoke(&self.reals, path, flags, mode),
            },
            Policy::Exception(matcher) => {
                let in_scope = {
                    let _errno = ErrnoGuard::save();
                    matcher.is_in_scope(cpath, &self.reals)
                };
                let fd = call.invoke(&self.reals, path, flags, mode);
                if fd >= 0 {
                    let _errno = ErrnoGuard::save();
                    if in_scope {
                        self.track(call, fd, cpath);
                    } else if self.untrack(fd) {
                        // Its previous close bypassed us (dup2, close_range, raw syscall)
                        log_hook_debug!(
                            call.name(),
                            "dropping stale tracking of reused descriptor",
                            fd = fd,
                            path = &*cpath.to_string_lossy(),
                        );
                    }
                }
                fd
            }
        }
    }

    pub(crate) fn track(&self, call: OpenCall, fd: c_int, path: &CStr) {
        if !self.tracked.insert(fd) {
            if self.tracked.contains(fd) {
                log_hook_error!(call.name(), "descriptor already tracked", fd = fd);
            } else {
                log_hook_error!(call.name(), "descriptor out of range, reads not spoofed", fd = fd);
            }
            return;
        }

        let tracked = self.tracked.len();
        if tracked > 1 {
            log_hook_debug!(
                call.name(),
                "tracking alongside other descriptors",
                fd = fd,
                tracked = tracked,
            );
        }
        log_hook_debug!(call.name(), "spoofing reads", fd = fd, path = &*path.to_string_lossy());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::fd_table::MAX_FDS;
    use labshim_config::{ProcessConfig, Variant};

    fn exception_state() -> ShimState {
        let config = ProcessConfig::from_lookup(Variant::HardwareSpoof, "prog", |name| {
            (name == "HWSF_DEV").then(|| "path:1-1".into())
        });
        ShimState::new(config, RealFns::resolve().unwrap())
    }

    #[test]
    fn test_track_same_descriptor_twice_keeps_it() {
        let state = exception_state();
        state.track(OpenCall::Open, 9, c"/sys/bus/usb/devices/1-2/descriptors");
        state.track(OpenCall::Open64, 9, c"/sys/bus/usb/devices/1-3/descriptors");
        assert!(state.is_tracked(9));
        assert_eq!(state.tracked_count(), 1);
    }

    #[test]
    fn test_track_out_of_range_descriptor_ignored() {
        let state = exception_state();
        state.track(OpenCall::Open, MAX_FDS as c_int, c"/sys/bus/usb/devices/1-2/descriptors");
        assert!(!state.is_tracked(MAX_FDS as c_int));
        assert_eq!(state.tracked_count(), 0);
    }

    #[test]
    fn test_effective_mode() {
        assert_eq!(effective_mode(libc::O_RDONLY, 0o644), 0);
        assert_eq!(effective_mode(libc::O_WRONLY | libc::O_CREAT, 0o644), 0o644);
        assert_eq!(effective_mode(libc::O_RDWR | libc::O_TMPFILE, 0o600), 0o600);
        // O_TMPFILE includes O_DIRECTORY; the latter alone carries no mode
        assert_eq!(effective_mode(libc::O_DIRECTORY, 0o600), 0);
    }

    #[test]
    fn test_call_names() {
        assert_eq!(OpenCall::Open.name(), "open");
        assert_eq!(OpenCall::Open64.name(), "open64");
        assert_eq!(OpenCall::OpenAt(libc::AT_FDCWD).name(), "openat");
    }

    #[test]
    fn test_invoke_openat_uses_dirfd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let dir_path = std::ffi::CString::new(dir.path().to_str().unwrap()).unwrap();
        let reals = RealFns::resolve().unwrap();

        unsafe {
            let dirfd = (reals.open)(dir_path.as_ptr(), libc::O_RDONLY | libc::O_DIRECTORY, 0);
            assert!(dirfd >= 0);
            let fd = OpenCall::OpenAt(dirfd).invoke(&reals, c"f".as_ptr(), libc::O_RDONLY, 0);
            assert!(fd >= 0);
            // Relative to the cwd the file does not exist
            let missing = OpenCall::Open.invoke(&reals, c"f".as_ptr(), libc::O_RDONLY, 0);
            assert_eq!(missing, -1);
            (reals.close)(fd);
            (reals.close)(dirfd);
        }
    }
}
