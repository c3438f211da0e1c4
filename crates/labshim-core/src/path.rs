//! Per-call path decisions.
//!
//! - [`PathRewriter`]: literal prefix match, substitute the destination path.
//! - [`ScopeMatcher`]: is this `<root>/<device>/descriptors` attribute one
//!   whose reads must be spoofed? Exactly one device is excluded.

use crate::reals::RealFns;
use crate::{errno, log_hook_debug, log_hook_error};
use labshim_config::{ExceptionRule, MatcherKind, RewriteRule};
use libc::c_int;
use std::ffi::{CStr, CString};

/// sysfs directory holding one entry per bus-attached USB device.
pub const USB_DEVICES_ROOT: &[u8] = b"/sys/bus/usb/devices/";
/// Final segment of the binary device-descriptor attribute.
pub const DESCRIPTOR_ATTR: &[u8] = b"descriptors";

pub struct PathRewriter {
    rule: RewriteRule,
}

impl PathRewriter {
    pub fn new(rule: RewriteRule) -> Self {
        Self { rule }
    }

    pub fn rule(&self) -> &RewriteRule {
        &self.rule
    }

    /// The destination path if `path` starts with the source prefix.
    ///
    /// Compares `len(source)` bytes only, so longer candidate paths still match.
    pub fn rewrite(&self, path: &CStr) -> Option<&CStr> {
        path.to_bytes()
            .starts_with(self.rule.source())
            .then(|| self.rule.dest())
    }
}

/// A path of the shape `<root><...>/<device>/descriptors`.
#[derive(Debug, PartialEq, Eq)]
pub struct DescriptorPath<'p> {
    /// Directory of the attribute, including its trailing `/`
    pub dir: &'p [u8],
    /// Final directory segment, e.g. `1-1.4`
    pub device: &'p [u8],
}

/// Structural match: under `root`, at least one segment below it, and
/// ending in the `descriptors` attribute.
pub fn split_descriptor_path<'p>(root: &[u8], path: &'p [u8]) -> Option<DescriptorPath<'p>> {
    if !path.starts_with(root) || path.len() <= root.len() {
        return None;
    }
    let last = path.iter().rposition(|&b| b == b'/')?;
    if last < root.len() || &path[last + 1..] != DESCRIPTOR_ATTR {
        return None;
    }
    let device_start = path[..last]
        .iter()
        .rposition(|&b| b == b'/')
        .map_or(0, |i| i + 1);
    let device = &path[device_start..last];
    if device.is_empty() {
        return None;
    }
    Some(DescriptorPath {
        dir: &path[..=last],
        device,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiblingError {
    /// The attribute does not exist (ENOENT)
    Missing,
    /// Any other open/read failure, with its errno
    Io(c_int),
}

fn matcher_label(kind: MatcherKind) -> &'static str {
    match kind {
        MatcherKind::BySerial => "dev_serial",
        MatcherKind::ByPathSegment => "dev_path",
        MatcherKind::ByDeviceNumber => "dev_num",
    }
}

/// Read a sibling attribute of a descriptor path through the real libc
/// calls. One read of at most `cap` bytes; a trailing newline is stripped.
pub fn read_sibling(
    reals: &RealFns,
    dir: &[u8],
    name: &str,
    cap: usize,
) -> Result<Vec<u8>, SiblingError> {
    let mut raw = Vec::with_capacity(dir.len() + name.len());
    raw.extend_from_slice(dir);
    raw.extend_from_slice(name.as_bytes());
    let path = CString::new(raw).map_err(|_| SiblingError::Io(libc::EINVAL))?;

    let fd = unsafe { (reals.open)(path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC, 0) };
    if fd < 0 {
        let e = errno();
        if e == libc::ENOENT {
            return Err(SiblingError::Missing);
        }
        log_hook_error!(
            "read_desc_sibling",
            "failed to open sibling for reading",
            path = &*path.to_string_lossy(),
            errno = e,
            reason = tracing::field::display(std::io::Error::from_raw_os_error(e)),
        );
        return Err(SiblingError::Io(e));
    }

    let mut buf = vec![0u8; cap];
    let n = unsafe { (reals.read)(fd, buf.as_mut_ptr().cast(), buf.len()) };
    let read_errno = errno();
    unsafe { (reals.close)(fd) };

    if n < 0 {
        log_hook_error!(
            "read_desc_sibling",
            "failed to read from sibling",
            path = &*path.to_string_lossy(),
            errno = read_errno,
            reason = tracing::field::display(std::io::Error::from_raw_os_error(read_errno)),
        );
        return Err(SiblingError::Io(read_errno));
    }
    buf.truncate(n as usize);
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    Ok(buf)
}

pub struct ScopeMatcher {
    root: Vec<u8>,
    rule: ExceptionRule,
}

impl ScopeMatcher {
    pub fn new(rule: ExceptionRule) -> Self {
        Self::with_root(USB_DEVICES_ROOT, rule)
    }

    /// Match under another device root; a trailing `/` is added if missing.
    pub fn with_root(root: impl Into<Vec<u8>>, rule: ExceptionRule) -> Self {
        let mut root = root.into();
        if root.last() != Some(&b'/') {
            root.push(b'/');
        }
        Self { root, rule }
    }

    pub fn root(&self) -> &[u8] {
        &self.root
    }

    pub fn rule(&self) -> &ExceptionRule {
        &self.rule
    }

    /// Whether reads of `path` must be spoofed.
    ///
    /// Non-descriptor paths are never in scope. A descriptor is in scope
    /// unless its device is the excluded one; when the identity cannot be
    /// read the device is spoofed.
    pub fn is_in_scope(&self, path: &CStr, reals: &RealFns) -> bool {
        let Some(desc) = split_descriptor_path(&self.root, path.to_bytes()) else {
            return false;
        };

        let kind = self.rule.kind();
        let identity = match kind.sibling() {
            None => Ok(desc.device.to_vec()),
            Some(sibling) => read_sibling(reals, desc.dir, sibling, kind.max_len() + 1),
        }
        .map(|mut id| {
            // The configured value was cut to the same width
            id.truncate(kind.max_len());
            id
        });

        let label = matcher_label(kind);
        let path_str = path.to_string_lossy();
        match identity {
            Ok(id) if id == self.rule.value() => {
                log_hook_debug!("match_desc_except", "match", matcher = label, path = &*path_str);
                false
            }
            Ok(_) => {
                log_hook_debug!("match_desc_except", "spoof", matcher = label, path = &*path_str);
                true
            }
            Err(err) => {
                log_hook_debug!(
                    "match_desc_except",
                    "identity unavailable, spoof",
                    matcher = label,
                    path = &*path_str,
                    error = tracing::field::debug(err),
                );
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labshim_config::testing::{sample_descriptor, FakeSysfs};
    use std::os::unix::ffi::OsStrExt;

    fn cpath(p: &std::path::Path) -> CString {
        CString::new(p.as_os_str().as_bytes()).unwrap()
    }

    fn reals() -> RealFns {
        RealFns::resolve().unwrap()
    }

    #[test]
    fn test_rewrite_prefix_match() {
        let rewriter = PathRewriter::new(RewriteRule::new(
            CString::new("/home/lab/.jtag.conf").unwrap(),
            CString::new("/tmp/jtag.conf").unwrap(),
        ));
        assert_eq!(
            rewriter.rewrite(c"/home/lab/.jtag.conf"),
            Some(c"/tmp/jtag.conf")
        );
        // Longer candidate, same prefix
        assert_eq!(
            rewriter.rewrite(c"/home/lab/.jtag.conf.lock"),
            Some(c"/tmp/jtag.conf")
        );
        assert_eq!(rewriter.rewrite(c"/home/lab/.jtag"), None);
        assert_eq!(rewriter.rewrite(c"/etc/passwd"), None);
    }

    #[test]
    fn test_split_descriptor_path() {
        let root = USB_DEVICES_ROOT;
        assert_eq!(
            split_descriptor_path(root, b"/sys/bus/usb/devices/1-1.4/descriptors"),
            Some(DescriptorPath {
                dir: b"/sys/bus/usb/devices/1-1.4/",
                device: b"1-1.4",
            })
        );
        assert_eq!(
            split_descriptor_path(root, b"/sys/bus/usb/devices/usb1/1-1/descriptors")
                .map(|d| d.device),
            Some(&b"1-1"[..])
        );
    }

    #[test]
    fn test_split_rejects_non_descriptor_paths() {
        let root = USB_DEVICES_ROOT;
        for path in [
            &b"/sys/bus/usb/devices/"[..],
            b"/sys/bus/usb/devices/descriptors",
            b"/sys/bus/usb/devices/1-1/serial",
            b"/sys/bus/usb/devices/1-1/descriptors.bak",
            b"/sys/bus/pci/devices/0000:00:14.0/descriptors",
            b"sys/bus/usb/devices/1-1/descriptors",
            b"/etc/passwd",
        ] {
            assert_eq!(split_descriptor_path(root, path), None, "{:?}", path);
        }
    }

    #[test]
    fn test_non_descriptor_never_in_scope() {
        let matcher = ScopeMatcher::new(ExceptionRule::new(MatcherKind::BySerial, "X"));
        assert!(!matcher.is_in_scope(c"/etc/hostname", &reals()));
        assert!(!matcher.is_in_scope(c"/sys/bus/usb/devices/1-1/serial", &reals()));
    }

    #[test]
    fn test_by_serial() {
        let sysfs = FakeSysfs::new().unwrap();
        let excluded = sysfs.add_device("1-1", &sample_descriptor(0x0403, 0x6010)).unwrap();
        let other = sysfs.add_device("1-2", &sample_descriptor(0x0403, 0x6014)).unwrap();
        sysfs.set_serial("1-1", "210249A0B3C1").unwrap();
        sysfs.set_serial("1-2", "FT9XYZ").unwrap();

        let matcher = ScopeMatcher::with_root(
            sysfs.root_prefix(),
            ExceptionRule::new(MatcherKind::BySerial, "210249A0B3C1"),
        );
        assert!(!matcher.is_in_scope(&cpath(&excluded), &reals()));
        assert!(matcher.is_in_scope(&cpath(&other), &reals()));
    }

    #[test]
    fn test_by_path_segment() {
        let sysfs = FakeSysfs::new().unwrap();
        let excluded = sysfs.add_device("3-2", &sample_descriptor(1, 2)).unwrap();
        let prefix_of = sysfs.add_device("3-2.1", &sample_descriptor(1, 2)).unwrap();
        let shorter = sysfs.add_device("3-", &sample_descriptor(1, 2)).unwrap();

        // No trailing slash on purpose
        let matcher = ScopeMatcher::with_root(
            sysfs.root.as_os_str().as_bytes(),
            ExceptionRule::new(MatcherKind::ByPathSegment, "3-2"),
        );
        assert!(!matcher.is_in_scope(&cpath(&excluded), &reals()));
        assert!(matcher.is_in_scope(&cpath(&prefix_of), &reals()));
        assert!(matcher.is_in_scope(&cpath(&shorter), &reals()));
    }

    #[test]
    fn test_by_device_number() {
        let sysfs = FakeSysfs::new().unwrap();
        let excluded = sysfs.add_device("2-1", &sample_descriptor(1, 2)).unwrap();
        let other = sysfs.add_device("2-2", &sample_descriptor(1, 2)).unwrap();
        sysfs.set_devnum("2-1", "12").unwrap();
        sysfs.set_devnum("2-2", "121").unwrap();

        let matcher = ScopeMatcher::with_root(
            sysfs.root_prefix(),
            ExceptionRule::new(MatcherKind::ByDeviceNumber, "12"),
        );
        assert!(!matcher.is_in_scope(&cpath(&excluded), &reals()));
        assert!(matcher.is_in_scope(&cpath(&other), &reals()));
    }

    /// Spoof-by-default when the sibling attribute is absent. This mirrors
    /// long-standing behavior; whether "absent" should mean "excluded" is
    /// still an open policy question, so the test pins it explicitly.
    #[test]
    fn test_missing_sibling_is_in_scope() {
        let sysfs = FakeSysfs::new().unwrap();
        let desc = sysfs.add_device("4-1", &sample_descriptor(1, 2)).unwrap();

        for kind in [MatcherKind::BySerial, MatcherKind::ByDeviceNumber] {
            let matcher = ScopeMatcher::with_root(sysfs.root_prefix(), ExceptionRule::new(kind, "1"));
            assert!(matcher.is_in_scope(&cpath(&desc), &reals()), "{:?}", kind);
        }
    }

    #[test]
    fn test_read_sibling_strips_newline_only() {
        let sysfs = FakeSysfs::new().unwrap();
        sysfs.set_serial("5-1", "ABC").unwrap();
        let dir = sysfs.root_prefix().into_iter().chain(b"5-1/".iter().copied()).collect::<Vec<_>>();

        assert_eq!(read_sibling(&reals(), &dir, "serial", 256), Ok(b"ABC".to_vec()));
        assert_eq!(read_sibling(&reals(), &dir, "devnum", 4), Err(SiblingError::Missing));

        std::fs::write(sysfs.root.join("5-1/serial"), b"NONL").unwrap();
        assert_eq!(read_sibling(&reals(), &dir, "serial", 256), Ok(b"NONL".to_vec()));
    }

    #[test]
    fn test_overlong_serial_compared_at_field_width() {
        let sysfs = FakeSysfs::new().unwrap();
        let long_serial = "S".repeat(300);
        let excluded = sysfs.add_device("1-9", &sample_descriptor(1, 2)).unwrap();
        let other = sysfs.add_device("1-8", &sample_descriptor(1, 2)).unwrap();
        sysfs.set_serial("1-9", &long_serial).unwrap();
        sysfs.set_serial("1-8", &"S".repeat(254)).unwrap();

        let rule = ExceptionRule::new(MatcherKind::BySerial, long_serial.as_bytes());
        assert_eq!(rule.value().len(), 255);
        let matcher = ScopeMatcher::with_root(sysfs.root_prefix(), rule);
        assert!(!matcher.is_in_scope(&cpath(&excluded), &reals()));
        assert!(matcher.is_in_scope(&cpath(&other), &reals()));
    }

    #[test]
    fn test_unreadable_sibling_is_io_error() {
        let sysfs = FakeSysfs::new().unwrap();
        sysfs.add_device("6-1", &sample_descriptor(1, 2)).unwrap();
        // A directory opens fine but read() fails with EISDIR
        std::fs::create_dir_all(sysfs.root.join("6-1/serial")).unwrap();
        let dir = sysfs.root_prefix().into_iter().chain(b"6-1/".iter().copied()).collect::<Vec<_>>();

        assert_eq!(
            read_sibling(&reals(), &dir, "serial", 256),
            Err(SiblingError::Io(libc::EISDIR))
        );
    }
}
