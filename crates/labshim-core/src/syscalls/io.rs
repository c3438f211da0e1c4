use crate::record::DeviceDescriptor;
use crate::state::ShimState;
use crate::{log_hook_debug, log_hook_error, ErrnoGuard};
use libc::{c_int, c_void, size_t, ssize_t};

impl ShimState {
    /// Real read, then spoof the descriptor record if `fd` is tracked.
    pub unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
        if self.tracked.is_empty() || !self.tracked.contains(fd) {
            return (self.reals.read)(fd, buf, count);
        }

        let n = (self.reals.read)(fd, buf, count);
        if n < 0 {
            return n;
        }

        let _errno = ErrnoGuard::save();
        let bytes: &mut [u8] = if buf.is_null() || n == 0 {
            &mut []
        } else {
            std::slice::from_raw_parts_mut(buf.cast::<u8>(), n as usize)
        };
        match DeviceDescriptor::new(bytes) {
            Ok(mut desc) => {
                let (vendor, product) = (desc.id_vendor(), desc.id_product());
                desc.anonymize();
                log_hook_debug!(
                    "read",
                    "spoofed descriptor",
                    fd = fd,
                    id_vendor = format_args!("{:04x}", vendor),
                    id_product = format_args!("{:04x}", product),
                );
            }
            Err(err) => {
                log_hook_error!(
                    "read",
                    "short read, skip spoofing",
                    fd = fd,
                    error = tracing::field::display(err),
                );
            }
        }
        n
    }

    /// Forget `fd`, then close it for real.
    pub unsafe fn close(&self, fd: c_int) -> c_int {
        if self.untrack(fd) {
            log_hook_debug!("close", "stop spoofing reads", fd = fd);
        }
        (self.reals.close)(fd)
    }

    /// Must run before the real close, after which the number can be reused.
    pub(crate) fn untrack(&self, fd: c_int) -> bool {
        !self.tracked.is_empty() && self.tracked.remove(fd)
    }
}
