// src/environment/fingerprint.rs

//! Persisted environment fingerprint
//!
//! A small JSON record stored inside the environment describing what it was
//! created from. An environment is reused only while a freshly computed
//! fingerprint still matches the stored one.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Version of this tool, recorded so an upgrade forces a rebuild
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// What an environment was created from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentFingerprint {
    /// Version reported by the requested interpreter (`3.12.1`)
    pub runtime_version: String,
    pub tool_version: String,
    /// Arguments given to the environment creator, in order
    pub creation_args: Vec<String>,
    /// Absolute environment path
    pub target: PathBuf,
    /// Informational only; not compared
    pub created_at: DateTime<Utc>,
}

impl EnvironmentFingerprint {
    pub fn new(runtime_version: &str, creation_args: &[String], target: &Path) -> Self {
        Self {
            runtime_version: runtime_version.to_string(),
            tool_version: TOOL_VERSION.to_string(),
            creation_args: creation_args.to_vec(),
            target: target.to_path_buf(),
            created_at: Utc::now(),
        }
    }

    /// Field-by-field comparison, ignoring the creation time
    pub fn matches(&self, other: &Self) -> bool {
        self.mismatch(other).is_none()
    }

    /// Name of the first field that differs
    pub fn mismatch(&self, other: &Self) -> Option<&'static str> {
        if self.runtime_version != other.runtime_version {
            Some("runtime_version")
        } else if self.tool_version != other.tool_version {
            Some("tool_version")
        } else if self.creation_args != other.creation_args {
            Some("creation_args")
        } else if self.target != other.target {
            Some("target")
        } else {
            None
        }
    }

    /// Read a stored fingerprint; missing or unreadable files yield `None`
    pub fn load(path: &Path) -> Option<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                debug!("No fingerprint at {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(fingerprint) => Some(fingerprint),
            Err(e) => {
                warn!("Ignoring unreadable fingerprint {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write atomically next to its final location
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        let dir = path.parent().unwrap_or(Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut temp, content.as_bytes())?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}
