// src/environment/mod.rs

//! Isolated environment management
//!
//! An [`Environment`] is a directory produced by an external creator
//! (virtualenv) holding its own interpreter and `site-packages`. This module
//! decides whether an existing one can be reused, rebuilds it when it
//! cannot, and signals freshness to timestamp-based build tools through the
//! directory's modification time.

mod bootstrap;
mod fingerprint;
mod python;

pub use bootstrap::{Bootstrap, BootstrapOutcome, BootstrapState, InstallStep};
pub use fingerprint::{EnvironmentFingerprint, TOOL_VERSION};
pub use python::{PythonProbe, SelfExec, VirtualenvCreator};

use crate::cache::CompatTag;
use crate::config::FINGERPRINT_FILE;
use crate::error::Result;
use crate::requirement::MarkerEnvironment;
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info};

/// How far before the requirements file a failed environment is dated
const STALE_OFFSET: Duration = Duration::from_secs(24 * 60 * 60);

/// Minimum lead of a fresh environment over its newest requirements file
const FRESH_MARGIN: Duration = Duration::from_secs(1);

/// A target environment directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    root: PathBuf,
}

impl Environment {
    /// Wrap a path, made absolute against the working directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            root: std::path::absolute(root.as_ref())?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    /// The environment's own interpreter
    pub fn python(&self) -> PathBuf {
        self.bin_dir().join("python")
    }

    pub fn fingerprint_path(&self) -> PathBuf {
        self.root.join(FINGERPRINT_FILE)
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// `lib/python*/site-packages` directories, sorted
    pub fn site_packages(&self) -> Vec<PathBuf> {
        let pattern = format!(
            "{}/lib/python*/site-packages",
            glob::Pattern::escape(&self.root.to_string_lossy())
        );
        let mut dirs: Vec<PathBuf> = match glob::glob(&pattern) {
            Ok(paths) => paths.filter_map(|p| p.ok()).filter(|p| p.is_dir()).collect(),
            Err(e) => {
                debug!("Bad site-packages pattern {}: {}", pattern, e);
                Vec::new()
            }
        };
        dirs.sort();
        dirs
    }

    /// Delete the whole environment directory
    pub fn remove(&self) -> Result<()> {
        if self.root.exists() {
            info!("> rm -rf {}", self.root.display());
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.root.display())
    }
}

/// Creates an empty environment at a path
pub trait EnvironmentCreator {
    fn create(&self, target: &Path, args: &[String]) -> Result<()>;
}

/// Facts about an interpreter
pub trait RuntimeProbe {
    /// Full version string (`3.12.1`)
    fn runtime_version(&self, python: &Path) -> Result<String>;
    fn marker_environment(&self, python: &Path) -> Result<MarkerEnvironment>;
    /// Supported artifact tags, most preferred first
    fn supported_tags(&self, python: &Path) -> Result<Vec<CompatTag>>;
}

/// The running process, as seen by the self-exec step
pub trait ProcessImage {
    /// Whether this process was started by a previous self-exec
    fn is_reexecuted(&self) -> bool;
    /// Interpreter that `python` resolves to for this process
    fn active_interpreter(&self) -> Result<PathBuf>;
    /// Replace this process with itself running inside `env`
    ///
    /// Only returns on failure, except in test doubles.
    fn exec(&self, env: &Environment) -> Result<()>;
    /// Block until every child process has exited
    fn wait_for_children(&self);
}

/// Mark the environment fresh for timestamp-based build tools
///
/// The directory ends up strictly newer than every requirements file, even
/// one dated in the future.
pub fn mark_valid(env: &Environment, requirement_files: &[PathBuf]) -> Result<()> {
    if !env.exists() {
        return Ok(());
    }
    let newest = requirement_files
        .iter()
        .filter_map(|path| fs::metadata(path).and_then(|m| m.modified()).ok())
        .max();
    let now = SystemTime::now();
    let stamp = match newest.map(|newest| newest + FRESH_MARGIN) {
        Some(after) if after > now => after,
        _ => now,
    };
    filetime::set_file_mtime(env.root(), FileTime::from_system_time(stamp))?;
    debug!("Marked {} valid", env);
    Ok(())
}

/// Date the environment before the first requirements file so it reads as stale
pub fn mark_invalid(env: &Environment, requirement_files: &[PathBuf]) -> Result<()> {
    if !env.exists() {
        return Ok(());
    }
    error!(
        "Something went wrong! Sending '{}' back in time, so make knows it's invalid.",
        env
    );

    let reference = requirement_files
        .first()
        .and_then(|path| fs::metadata(path).and_then(|m| m.modified()).ok())
        .unwrap_or_else(SystemTime::now);
    let stale = reference.checked_sub(STALE_OFFSET).unwrap_or(SystemTime::UNIX_EPOCH);
    filetime::set_file_mtime(env.root(), FileTime::from_system_time(stale))?;
    Ok(())
}
