//! Process-wide interposition state.
//!
//! [`GlobalShim`] lives in a `static` of each preload library. The load-time
//! constructor installs a [`ShimState`]; until then, and for any call that
//! re-enters the layer, every hook is a plain passthrough to the real libc.

use crate::error::InitError;
use crate::path::{PathRewriter, ScopeMatcher};
use crate::reals::RealFns;
use crate::sync::FdTable;
use crate::syscalls::open::OpenCall;
use crate::log_hook_error;
use labshim_config::logging::init_logging;
use labshim_config::{Activation, ProcessConfig, Variant};
use libc::{c_char, c_int, c_void, mode_t, size_t, ssize_t};
use std::cell::Cell;
use std::sync::OnceLock;

/// What an open call does with its path.
pub enum Policy {
    Passthrough,
    Rewrite(PathRewriter),
    Exception(ScopeMatcher),
}

impl Policy {
    fn from_activation(activation: &Activation, sysfs_root: Option<&[u8]>) -> Self {
        match activation {
            Activation::Inactive(_) => Policy::Passthrough,
            Activation::Rewrite(rule) => Policy::Rewrite(PathRewriter::new(rule.clone())),
            Activation::Exception(rule) => Policy::Exception(match sysfs_root {
                Some(root) => ScopeMatcher::with_root(root, rule.clone()),
                None => ScopeMatcher::new(rule.clone()),
            }),
        }
    }
}

pub struct ShimState {
    config: ProcessConfig,
    pub(crate) reals: RealFns,
    pub(crate) policy: Policy,
    /// Descriptors whose reads are spoofed
    pub(crate) tracked: FdTable,
}

impl ShimState {
    pub fn new(config: ProcessConfig, reals: RealFns) -> Self {
        let policy = Policy::from_activation(config.activation(), None);
        Self {
            config,
            reals,
            policy,
            tracked: FdTable::new(),
        }
    }

    /// Like [`ShimState::new`], with device paths matched under `root`
    /// instead of `/sys/bus/usb/devices/`.
    pub fn with_sysfs_root(config: ProcessConfig, reals: RealFns, root: &[u8]) -> Self {
        let policy = Policy::from_activation(config.activation(), Some(root));
        Self {
            config,
            reals,
            policy,
            tracked: FdTable::new(),
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    pub fn reals(&self) -> &RealFns {
        &self.reals
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn is_tracked(&self, fd: c_int) -> bool {
        self.tracked.contains(fd)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }
}

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// Per-thread recursion guard. Only one hook per thread runs its own logic;
/// nested calls (e.g. from the logging backend) pass straight through.
pub(crate) struct HookGuard(());

impl HookGuard {
    pub(crate) fn enter() -> Option<Self> {
        // TLS may already be torn down during thread exit
        IN_HOOK
            .try_with(|flag| (!flag.replace(true)).then_some(HookGuard(())))
            .ok()
            .flatten()
    }
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        let _ = IN_HOOK.try_with(|flag| flag.set(false));
    }
}

/// Load-time slot for one preload library.
pub struct GlobalShim {
    variant: Variant,
    reals: OnceLock<RealFns>,
    state: OnceLock<ShimState>,
}

impl GlobalShim {
    pub const fn new(variant: Variant) -> Self {
        Self {
            variant,
            reals: OnceLock::new(),
            state: OnceLock::new(),
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Read the environment, start logging, resolve the real functions and
    /// publish the state. Idempotent.
    pub fn install(&self) -> Result<&ShimState, InitError> {
        if let Some(state) = self.state.get() {
            return Ok(state);
        }

        let config = ProcessConfig::from_env(self.variant);
        init_logging(self.variant, config.debug(), config.program_name());

        let reals = match self.reals.get() {
            Some(reals) => *reals,
            None => {
                let reals = RealFns::resolve()?;
                *self.reals.get_or_init(|| reals)
            }
        };
        config.log_activation();

        Ok(self.state.get_or_init(|| ShimState::new(config, reals)))
    }

    /// [`GlobalShim::install`], terminating the process on failure. Used
    /// from the load-time constructor.
    pub fn install_or_exit(&self) {
        if let Err(err) = self.install() {
            fatal(&err);
        }
    }

    pub fn state(&self) -> Option<&ShimState> {
        self.state.get()
    }

    /// The real functions, resolved on first use if a hook fires before
    /// the constructor ran.
    fn reals(&self) -> RealFns {
        if let Some(reals) = self.reals.get() {
            return *reals;
        }
        match RealFns::resolve() {
            Ok(reals) => *self.reals.get_or_init(|| reals),
            Err(err) => fatal(&err),
        }
    }

    pub unsafe fn open(
        &self,
        call: OpenCall,
        path: *const c_char,
        flags: c_int,
        mode: mode_t,
    ) -> c_int {
        match (self.state.get(), HookGuard::enter()) {
            (Some(state), Some(_guard)) => state.open(call, path, flags, mode),
            _ => call.invoke(&self.reals(), path, flags, mode),
        }
    }

    pub unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
        match (self.state.get(), HookGuard::enter()) {
            (Some(state), Some(_guard)) => state.read(fd, buf, count),
            _ => (self.reals().read)(fd, buf, count),
        }
    }

    pub unsafe fn close(&self, fd: c_int) -> c_int {
        match (self.state.get(), HookGuard::enter()) {
            (Some(state), Some(_guard)) => state.close(fd),
            (Some(state), None) => {
                // Re-entered: still forget the descriptor, just quietly
                state.untrack(fd);
                (state.reals.close)(fd)
            }
            (None, _) => (self.reals().close)(fd),
        }
    }
}

fn fatal(err: &InitError) -> ! {
    log_hook_error!("init", "cannot start interposition", error = tracing::field::display(err));
    std::process::exit(libc::EXIT_FAILURE)
}
