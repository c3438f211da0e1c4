//! # labshim-config
//!
//! Activation and configuration for the labshim preload libraries.
//!
//! Configuration is read exactly once, when the library is loaded, from
//! environment variables:
//! 1. `<PREFIX>_DBG` enables debug logging (presence is enough)
//! 2. the program-name filter restricts interposition to one executable
//! 3. the mode values (`FILSEL_ORG_PATH`/`FILSEL_DEST_PATH` or `HWSF_DEV`)
//!
//! The resulting [`ProcessConfig`] is immutable for the lifetime of the process.

// Macros must be defined before modules that use them
#[macro_use]
pub mod logging;

pub mod path;
pub mod preload;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use preload::PreloadEnv;
pub use tracing;

use std::ffi::{CStr, CString, OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

pub const FILSEL_DBG: &str = "FILSEL_DBG";
pub const FILSEL_PROG_NAME: &str = "FILSEL_PROG_NAME";
pub const FILSEL_ORG_PATH: &str = "FILSEL_ORG_PATH";
pub const FILSEL_DEST_PATH: &str = "FILSEL_DEST_PATH";

pub const HWSF_DBG: &str = "HWSF_DBG";
pub const HWSF_PRG_NAME: &str = "HWSF_PRG_NAME";
pub const HWSF_DEV: &str = "HWSF_DEV";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is unset")]
    Missing(&'static str),
    #[error("{0} is empty")]
    Empty(&'static str),
    #[error("unknown matcher tag in {0:?} (expected id:, path: or num:)")]
    UnknownMatcherTag(String),
    #[error("{0} contains an interior NUL byte")]
    InteriorNul(&'static str),
}

/// Which preload library is being configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// `libfilsel`: redirect opens of one path prefix to another file
    FileSelect,
    /// `libhwsf`: spoof USB descriptors of every device but one
    HardwareSpoof,
}

impl Variant {
    pub const fn debug_var(self) -> &'static str {
        match self {
            Variant::FileSelect => FILSEL_DBG,
            Variant::HardwareSpoof => HWSF_DBG,
        }
    }

    pub const fn program_var(self) -> &'static str {
        match self {
            Variant::FileSelect => FILSEL_PROG_NAME,
            Variant::HardwareSpoof => HWSF_PRG_NAME,
        }
    }

    /// Ident passed to `openlog(3)`. Must be 'static: syslog keeps the pointer.
    pub const fn syslog_ident(self) -> &'static CStr {
        match self {
            Variant::FileSelect => c"filsel",
            Variant::HardwareSpoof => c"hwsf",
        }
    }

    pub const fn lib_name(self) -> &'static str {
        match self {
            Variant::FileSelect => "libfilsel",
            Variant::HardwareSpoof => "libhwsf",
        }
    }
}

/// Rewrite mode: opens of paths prefixed by `source` are served from `dest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    source: CString,
    dest: CString,
}

impl RewriteRule {
    pub fn new(source: CString, dest: CString) -> Self {
        Self { source, dest }
    }

    /// Literal prefix, without the trailing NUL.
    pub fn source(&self) -> &[u8] {
        self.source.as_bytes()
    }

    pub fn dest(&self) -> &CStr {
        &self.dest
    }
}

/// How the single excluded USB device is identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    /// `id:<serial>`, compared against the sibling `serial` attribute
    BySerial,
    /// `path:<segment>`, compared against the device directory name
    ByPathSegment,
    /// `num:<devnum>`, compared against the sibling `devnum` attribute
    ByDeviceNumber,
}

impl MatcherKind {
    pub const ALL: [MatcherKind; 3] = [
        MatcherKind::BySerial,
        MatcherKind::ByPathSegment,
        MatcherKind::ByDeviceNumber,
    ];

    pub const fn tag(self) -> &'static str {
        match self {
            MatcherKind::BySerial => "id:",
            MatcherKind::ByPathSegment => "path:",
            MatcherKind::ByDeviceNumber => "num:",
        }
    }

    /// Longest parameter kept; longer values are truncated.
    pub const fn max_len(self) -> usize {
        match self {
            MatcherKind::BySerial | MatcherKind::ByPathSegment => 255,
            // devnum is at most three decimal digits
            MatcherKind::ByDeviceNumber => 3,
        }
    }

    /// Sibling attribute file consulted for the device identity, if any.
    pub const fn sibling(self) -> Option<&'static str> {
        match self {
            MatcherKind::BySerial => Some("serial"),
            MatcherKind::ByPathSegment => None,
            MatcherKind::ByDeviceNumber => Some("devnum"),
        }
    }
}

/// Exception mode: every USB device is spoofed except the one this rule names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRule {
    kind: MatcherKind,
    value: Vec<u8>,
}

impl ExceptionRule {
    pub fn new(kind: MatcherKind, value: impl Into<Vec<u8>>) -> Self {
        let mut value = value.into();
        value.truncate(kind.max_len());
        Self { kind, value }
    }

    /// Parse an `HWSF_DEV` value such as `id:A1B2C3`, `path:1-1.4` or `num:7`.
    pub fn parse(raw: &[u8]) -> Result<Self, ConfigError> {
        let (kind, param) = MatcherKind::ALL
            .iter()
            .find_map(|kind| {
                raw.strip_prefix(kind.tag().as_bytes())
                    .map(|param| (*kind, param))
            })
            .ok_or_else(|| {
                ConfigError::UnknownMatcherTag(String::from_utf8_lossy(raw).into_owned())
            })?;

        if param.is_empty() {
            return Err(ConfigError::Empty(HWSF_DEV));
        }
        if param.contains(&0) {
            return Err(ConfigError::InteriorNul(HWSF_DEV));
        }
        Ok(Self::new(kind, param))
    }

    pub fn kind(&self) -> MatcherKind {
        self.kind
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn to_env_value(&self) -> String {
        format!(
            "{}{}",
            self.kind.tag(),
            String::from_utf8_lossy(&self.value)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InactiveReason {
    /// The program-name filter is set and names another executable
    ProgramMismatch { expected: String },
    /// A required value is missing or malformed
    Misconfigured(ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// Pure passthrough, as if the library was not loaded
    Inactive(InactiveReason),
    Rewrite(RewriteRule),
    Exception(ExceptionRule),
}

/// Process-wide configuration, built once at load time.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    variant: Variant,
    debug: bool,
    program_name: String,
    activation: Activation,
}

impl ProcessConfig {
    /// Build from the real process environment and invocation name.
    pub fn from_env(variant: Variant) -> Self {
        Self::from_lookup(variant, &path::invocation_name(), |name| {
            std::env::var_os(name)
        })
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(variant: Variant, program_name: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let debug = lookup(variant.debug_var()).is_some();
        let activation = Self::activation_from(variant, program_name, &lookup);
        Self {
            variant,
            debug,
            program_name: program_name.to_string(),
            activation,
        }
    }

    /// A configuration that never interposes.
    pub fn inactive(variant: Variant, reason: InactiveReason) -> Self {
        Self {
            variant,
            debug: false,
            program_name: String::new(),
            activation: Activation::Inactive(reason),
        }
    }

    fn activation_from<F>(variant: Variant, program_name: &str, lookup: &F) -> Activation
    where
        F: Fn(&str) -> Option<OsString>,
    {
        if let Some(expected) = lookup(variant.program_var()) {
            if expected.as_os_str() != OsStr::new(program_name) {
                return Activation::Inactive(InactiveReason::ProgramMismatch {
                    expected: expected.to_string_lossy().into_owned(),
                });
            }
        }

        let result = match variant {
            Variant::FileSelect => Self::rewrite_from(lookup).map(Activation::Rewrite),
            Variant::HardwareSpoof => Self::exception_from(lookup).map(Activation::Exception),
        };
        result.unwrap_or_else(|e| Activation::Inactive(InactiveReason::Misconfigured(e)))
    }

    fn rewrite_from<F>(lookup: &F) -> Result<RewriteRule, ConfigError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let source = required(lookup, FILSEL_ORG_PATH)?;
        let dest = required(lookup, FILSEL_DEST_PATH)?;
        Ok(RewriteRule::new(source, dest))
    }

    fn exception_from<F>(lookup: &F) -> Result<ExceptionRule, ConfigError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let raw = lookup(HWSF_DEV).ok_or(ConfigError::Missing(HWSF_DEV))?;
        ExceptionRule::parse(raw.as_bytes())
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    pub fn activation(&self) -> &Activation {
        &self.activation
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.activation, Activation::Inactive(_))
    }

    /// Emit the activation decision. Call after logging is initialized.
    pub fn log_activation(&self) {
        log_hook_debug!("init", "program_invocation_name", program = self.program_name.as_str());
        match &self.activation {
            Activation::Inactive(InactiveReason::ProgramMismatch { expected }) => {
                log_hook_debug!("init", "program filter mismatch, passthrough", expected = expected.as_str());
            }
            Activation::Inactive(InactiveReason::Misconfigured(err)) => {
                log_hook_warn!("init", "interposition disabled", reason = tracing::field::display(err));
            }
            Activation::Rewrite(rule) => {
                log_hook_debug!(
                    "init",
                    "rewrite mode",
                    source = &*String::from_utf8_lossy(rule.source()),
                    dest = &*rule.dest().to_string_lossy(),
                );
            }
            Activation::Exception(rule) => {
                log_hook_debug!("init", "exception mode", device = rule.to_env_value().as_str());
            }
        }
    }
}

fn required<F>(lookup: &F, name: &'static str) -> Result<CString, ConfigError>
where
    F: Fn(&str) -> Option<OsString>,
{
    let value = lookup(name).ok_or(ConfigError::Missing(name))?;
    if value.is_empty() {
        return Err(ConfigError::Empty(name));
    }
    CString::new(value.into_vec()).map_err(|_| ConfigError::InteriorNul(name))
}
