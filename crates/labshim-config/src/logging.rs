//! Structured logging for the preload libraries.
//!
//! Events are ordinary `tracing` events carrying an `op` field (the
//! intercepted operation). [`SyslogLayer`] renders them to `syslog(3)`:
//!
//! ```text
//! [libhwsf: DBG  pid  4711 p  4700            hw_server] open() dev_serial spoof path=/sys/...
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use labshim_config::logging::*;
//!
//! log_hook_debug!("open", "redirecting", from = src, to = dst);
//! log_hook_error!("read", "short read, skip spoofing", len = n);
//! ```

use crate::Variant;
use std::ffi::{CStr, CString};
use std::fmt::{self, Write as _};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

#[macro_export]
macro_rules! log_hook_debug {
    ($op:expr, $msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::tracing::debug!(op = $op, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_hook_warn {
    ($op:expr, $msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::tracing::warn!(op = $op, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_hook_error {
    ($op:expr, $msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::tracing::error!(op = $op, $($key = $value,)* $msg)
    };
}

/// Fixed-width level tag used in every line.
pub fn level_tag(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERR ",
        Level::WARN => "WARN",
        Level::INFO => "INFO",
        Level::DEBUG | Level::TRACE => "DBG ",
    }
}

fn syslog_priority(level: &Level) -> libc::c_int {
    let severity = match *level {
        Level::ERROR => libc::LOG_ERR,
        Level::WARN => libc::LOG_WARNING,
        Level::INFO => libc::LOG_INFO,
        Level::DEBUG | Level::TRACE => libc::LOG_DEBUG,
    };
    libc::LOG_USER | severity
}

/// `tracing` layer writing one syslog line per event.
pub struct SyslogLayer {
    lib_name: &'static str,
    pid: libc::pid_t,
    ppid: libc::pid_t,
    program: String,
}

impl SyslogLayer {
    pub fn new(variant: Variant, program: &str) -> Self {
        let (pid, ppid) = unsafe { (libc::getpid(), libc::getppid()) };
        Self {
            lib_name: variant.lib_name(),
            pid,
            ppid,
            program: program.to_string(),
        }
    }

    /// Open the syslog connection under `ident`.
    ///
    /// A host program calling `openlog` later replaces the ident for all of
    /// its lines, ours included.
    pub fn open(ident: &'static CStr) {
        unsafe { libc::openlog(ident.as_ptr(), libc::LOG_PID, libc::LOG_USER) };
    }

    pub fn format_line(&self, level: &Level, op: &str, message: &str, fields: &str) -> String {
        let mut line = String::with_capacity(96 + message.len() + fields.len());
        let _ = write!(
            line,
            "[{}: {} pid {:>5} p {:>5} {:>20}] {}() {}",
            self.lib_name,
            level_tag(level),
            self.pid,
            self.ppid,
            self.program,
            op,
            message
        );
        if !fields.is_empty() {
            line.push(' ');
            line.push_str(fields);
        }
        line
    }
}

impl<S: Subscriber> Layer<S> for SyslogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        let op = visitor.op.as_deref().unwrap_or_else(|| metadata.target());
        let line = self.format_line(metadata.level(), op, &visitor.message, &visitor.fields);

        // Interior NULs cannot be sent through syslog(3)
        if let Ok(line) = CString::new(line) {
            unsafe {
                libc::syslog(syslog_priority(metadata.level()), c"%s".as_ptr(), line.as_ptr())
            };
        }
    }
}

#[derive(Default)]
struct EventVisitor {
    op: Option<String>,
    message: String,
    fields: String,
}

impl EventVisitor {
    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "op" => self.op = Some(value.to_string()),
            "message" => self.message.push_str(value),
            name => self.push_field(name, format_args!("{}", value)),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "op" => self.op = Some(format!("{:?}", value)),
            "message" => {
                let _ = write!(self.message, "{:?}", value);
            }
            name => self.push_field(name, format_args!("{:?}", value)),
        }
    }
}

/// Initialize logging for a preload library.
///
/// Debug events are only emitted when `debug` is set; warnings and errors
/// always are. Safe to call more than once.
pub fn init_logging(variant: Variant, debug: bool, program: &str) {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(if debug { "debug" } else { "warn" });

    SyslogLayer::open(variant.syslog_ident());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(SyslogLayer::new(variant, program))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer() -> SyslogLayer {
        SyslogLayer {
            lib_name: "libhwsf",
            pid: 4711,
            ppid: 1,
            program: "hw_server".to_string(),
        }
    }

    #[test]
    fn test_level_tags() {
        assert_eq!(level_tag(&Level::DEBUG), "DBG ");
        assert_eq!(level_tag(&Level::WARN), "WARN");
        assert_eq!(level_tag(&Level::ERROR), "ERR ");
    }

    #[test]
    fn test_format_line_layout() {
        let line = layer().format_line(&Level::ERROR, "read", "short read, skip spoofing", "");
        assert_eq!(
            line,
            "[libhwsf: ERR  pid  4711 p     1            hw_server] read() short read, skip spoofing"
        );
    }

    #[test]
    fn test_format_line_fields() {
        let line = layer().format_line(&Level::DEBUG, "open", "dev_serial spoof", "fd=3 path=/x");
        assert!(line.starts_with("[libhwsf: DBG  pid"));
        assert!(line.ends_with("open() dev_serial spoof fd=3 path=/x"));
    }

    #[test]
    fn test_priority_keeps_user_facility() {
        assert_eq!(syslog_priority(&Level::ERROR), libc::LOG_USER | libc::LOG_ERR);
        assert_eq!(syslog_priority(&Level::DEBUG), libc::LOG_USER | libc::LOG_DEBUG);
    }
}
