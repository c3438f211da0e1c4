//! Environment for launching a program under one of the preload libraries.
//!
//! Mirrors what lab drivers do before spawning a vendor tool: prepend the
//! library to `LD_PRELOAD` and export the mode variables.

use crate::{path, ExceptionRule, Variant};
use crate::{FILSEL_DEST_PATH, FILSEL_ORG_PATH, HWSF_DEV};
use anyhow::Result;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
enum ModeVars {
    None,
    Rewrite { source: PathBuf, dest: PathBuf },
    Exception(ExceptionRule),
}

/// Builder for the `(name, value)` pairs a child process needs.
#[derive(Debug, Clone)]
pub struct PreloadEnv {
    variant: Variant,
    library: PathBuf,
    program: Option<String>,
    debug: bool,
    mode: ModeVars,
}

impl PreloadEnv {
    pub fn new(variant: Variant, library: impl Into<PathBuf>) -> Self {
        Self {
            variant,
            library: library.into(),
            program: None,
            debug: false,
            mode: ModeVars::None,
        }
    }

    /// Only interpose when the child's basename is `name`.
    pub fn program(mut self, name: impl Into<String>) -> Self {
        self.program = Some(name.into());
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn rewrite(mut self, source: impl AsRef<Path>, dest: impl AsRef<Path>) -> Self {
        self.mode = ModeVars::Rewrite {
            source: source.as_ref().to_path_buf(),
            dest: dest.as_ref().to_path_buf(),
        };
        self
    }

    pub fn exception(mut self, rule: ExceptionRule) -> Self {
        self.mode = ModeVars::Exception(rule);
        self
    }

    /// Render the variables, prepending the (canonicalized) library to
    /// `existing_preload`.
    pub fn build(&self, existing_preload: Option<OsString>) -> Result<Vec<(String, String)>> {
        let library = path::normalize_library_path(&self.library)?;
        let mut vars = vec![(
            "LD_PRELOAD".to_string(),
            path::prepend_preload(&library, existing_preload.as_deref()),
        )];

        if self.debug {
            vars.push((self.variant.debug_var().to_string(), "1".to_string()));
        }
        if let Some(program) = &self.program {
            vars.push((self.variant.program_var().to_string(), program.clone()));
        }

        match &self.mode {
            ModeVars::None => {}
            ModeVars::Rewrite { source, dest } => {
                vars.push((FILSEL_ORG_PATH.to_string(), source.to_string_lossy().into_owned()));
                vars.push((FILSEL_DEST_PATH.to_string(), dest.to_string_lossy().into_owned()));
            }
            ModeVars::Exception(rule) => {
                vars.push((HWSF_DEV.to_string(), rule.to_env_value()));
            }
        }
        Ok(vars)
    }

    /// Like [`build`](Self::build), reading the current `LD_PRELOAD`.
    pub fn build_from_current(&self) -> Result<Vec<(String, String)>> {
        self.build(std::env::var_os("LD_PRELOAD"))
    }
}
