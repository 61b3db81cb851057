// src/config.rs

//! Run configuration
//!
//! Built from compile-time defaults, then the process environment. Index
//! options found in requirement files override the environment for the run.
//!
//! Environment variables:
//! - `VENV_UPDATE_CACHE_DIR`: artifact cache root
//! - `PIP_INDEX_URL`: primary source index
//! - `PIP_EXTRA_INDEX_URL`: whitespace-separated extra indexes
//! - `VENV_UPDATE_CREATOR`: environment creator executable
//! - `VENV_UPDATE_PYTHON`: interpreter used when creation args name none

use crate::cache::SourceIndex;
use crate::error::{Error, Result};
use crate::requirement::RequirementSet;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::warn;

/// Default environment directory
pub const DEFAULT_TARGET: &str = "virtualenv_run";
/// Default requirements file
pub const DEFAULT_REQUIREMENTS: &str = "requirements.txt";
/// Fingerprint file kept inside the environment
pub const FINGERPRINT_FILE: &str = ".venv-update.json";
pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/simple/";
pub const DEFAULT_CREATOR: &str = "virtualenv";
pub const DEFAULT_PYTHON: &str = "python3";

pub const ENV_CACHE_DIR: &str = "VENV_UPDATE_CACHE_DIR";
pub const ENV_INDEX_URL: &str = "PIP_INDEX_URL";
pub const ENV_EXTRA_INDEX_URL: &str = "PIP_EXTRA_INDEX_URL";
pub const ENV_CREATOR: &str = "VENV_UPDATE_CREATOR";
pub const ENV_PYTHON: &str = "VENV_UPDATE_PYTHON";

const KNOWN_VARS: [&str; 5] = [
    ENV_CACHE_DIR,
    ENV_INDEX_URL,
    ENV_EXTRA_INDEX_URL,
    ENV_CREATOR,
    ENV_PYTHON,
];

/// Settings that are not part of the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub index_url: String,
    pub extra_index_urls: Vec<String>,
    pub creator: String,
    pub python: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            index_url: DEFAULT_INDEX_URL.to_string(),
            extra_index_urls: Vec::new(),
            creator: DEFAULT_CREATOR.to_string(),
            python: DEFAULT_PYTHON.to_string(),
        }
    }
}

impl Config {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    /// Like [`from_vars`](Self::from_vars); values that are not UTF-8 count as unset
    pub fn from_os_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter_map(|(key, value)| {
                let key = key.into_string().ok()?;
                match value.into_string() {
                    Ok(value) => Some((key, value)),
                    Err(raw) => {
                        if KNOWN_VARS.contains(&key.as_str()) {
                            warn!("Ignoring {}: value is not UTF-8 ({:?})", key, raw);
                        }
                        None
                    }
                }
            })
            .collect();
        Self::from_vars(&vars)
    }

    /// Defaults overridden by the given variables
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(dir) = get(ENV_CACHE_DIR) {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(url) = get(ENV_INDEX_URL) {
            config.index_url = url.to_string();
        }
        if let Some(urls) = get(ENV_EXTRA_INDEX_URL) {
            config.extra_index_urls = urls.split_whitespace().map(str::to_string).collect();
        }
        if let Some(creator) = get(ENV_CREATOR) {
            config.creator = creator.to_string();
        }
        if let Some(python) = get(ENV_PYTHON) {
            config.python = python.to_string();
        }

        config
    }

    /// Apply index options read from requirement files
    pub fn apply_requirement_options(&mut self, set: &RequirementSet) {
        if let Some(url) = &set.index_url {
            self.index_url = url.clone();
        }
        for url in &set.extra_index_urls {
            if !self.extra_index_urls.contains(url) {
                self.extra_index_urls.push(url.clone());
            }
        }
    }

    /// Primary index followed by extras, in search order
    pub fn source_indexes(&self) -> Result<Vec<SourceIndex>> {
        std::iter::once(&self.index_url)
            .chain(&self.extra_index_urls)
            .map(|url| SourceIndex::new(url))
            .collect()
    }

    /// Fail early on settings that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.creator.trim().is_empty() {
            return Err(Error::Config("environment creator must not be empty".into()));
        }
        self.source_indexes().map(|_| ())
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".cache")))
        .unwrap_or_else(std::env::temp_dir)
        .join("venv-update")
        .join("wheelhouse")
}
