// src/cache/mod.rs

//! Binary artifact cache
//!
//! Prebuilt artifacts are kept under one subdirectory per source index so
//! that the same name and version fetched from two indexes never collide:
//!
//! ```text
//! <cache_dir>/<index namespace>/<name>-<version>-<tags>.whl
//! ```
//!
//! Lookups are a glob over the namespace directory and only apply to
//! requirements pinned to an exact version. Stores go through a temporary
//! file in the same directory followed by an atomic rename, so a concurrent
//! lookup never sees a partial artifact. Entries are never evicted.

mod wheel;

pub use wheel::{CompatTag, WheelFilename};

use crate::distribution::DistributionGraph;
use crate::error::{Error, Result};
use crate::requirement::{PackageName, Requirement};
use crate::version::Version;
use glob::{MatchOptions, Pattern};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

/// Configuration for the artifact cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory for cached artifacts
    pub cache_dir: PathBuf,
    /// Tags the target interpreter accepts, most preferred first
    ///
    /// Empty means every tag is accepted.
    pub supported_tags: Vec<CompatTag>,
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            supported_tags: Vec::new(),
        }
    }

    pub fn with_supported_tags(mut self, tags: Vec<CompatTag>) -> Self {
        self.supported_tags = tags;
        self
    }
}

/// A package index that artifacts can come from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceIndex {
    url: String,
    namespace: String,
}

impl SourceIndex {
    /// Parse an index URL and derive its cache namespace
    pub fn new(url: &str) -> Result<Self> {
        let parsed = Url::parse(url.trim())
            .map_err(|e| Error::Config(format!("invalid index URL '{}': {}", url, e)))?;

        let readable: String = format!("{}{}", parsed.host_str().unwrap_or("local"), parsed.path())
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
            .collect();
        let readable = readable.trim_matches('_');

        // the digest keeps look-alike URLs (scheme, port, credentials) apart
        let digest = hex::encode(Sha256::digest(parsed.as_str().as_bytes()));
        let namespace = format!("{}-{}", readable, &digest[..12]);

        Ok(Self {
            url: parsed.to_string(),
            namespace,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Directory name for this index's artifacts
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl std::fmt::Display for SourceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// A cached artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Path to the artifact inside the cache
    pub path: PathBuf,
    pub wheel: WheelFilename,
    /// Index the artifact was obtained from
    pub index: SourceIndex,
}

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// A compatible artifact is cached
    Found(CacheEntry),
    /// Nothing usable; the caller must go to the network
    NotFound,
    /// The installed version already satisfies the pin; nothing to do
    AlreadySatisfied,
}

/// Artifact cache rooted at one directory
#[derive(Debug)]
pub struct ArtifactCache {
    config: CacheConfig,
}

impl ArtifactCache {
    /// Create a cache, making sure the root directory exists
    pub fn new(config: CacheConfig) -> Result<Self> {
        fs::create_dir_all(&config.cache_dir)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Directory holding one index's artifacts
    pub fn namespace_dir(&self, index: &SourceIndex) -> PathBuf {
        self.config.cache_dir.join(index.namespace())
    }

    /// Look for a cached artifact satisfying a pinned requirement
    ///
    /// Indexes are searched in order. Unpinned, editable, URL, VCS and
    /// local-path requirements always miss.
    pub fn lookup(&self, req: &Requirement, indexes: &[SourceIndex]) -> Result<LookupOutcome> {
        let (Some(name), Some(pin)) = (req.name.as_ref(), req.constraint.pinned()) else {
            return Ok(LookupOutcome::NotFound);
        };
        if !req.is_cacheable() {
            return Ok(LookupOutcome::NotFound);
        }

        for index in indexes {
            let dir = self.namespace_dir(index);
            if !dir.is_dir() {
                continue;
            }

            let pattern = format!(
                "{}/{}-*.whl",
                Pattern::escape(&dir.to_string_lossy()),
                name_glob(name)
            );
            let options = MatchOptions {
                case_sensitive: false,
                require_literal_separator: true,
                require_literal_leading_dot: true,
            };
            let paths = glob::glob_with(&pattern, options)
                .map_err(|e| Error::Consistency(format!("bad cache glob '{}': {}", pattern, e)))?;

            let mut best: Option<(usize, Version, CacheEntry)> = None;
            for path in paths {
                let path = match path {
                    Ok(path) => path,
                    Err(e) => {
                        warn!("Unreadable cache entry: {}", e);
                        continue;
                    }
                };
                let Some(wheel) = parse_artifact_name(&path) else {
                    continue;
                };
                if &wheel.name != name || !req.constraint.satisfies(&wheel.version) {
                    continue;
                }
                let Some(priority) = wheel.tag_priority(&self.config.supported_tags) else {
                    debug!("Skipping incompatible artifact {}", path.display());
                    continue;
                };

                let better = best.as_ref().is_none_or(|(best_priority, best_version, _)| {
                    wheel.version > *best_version
                        || (wheel.version == *best_version && priority < *best_priority)
                });
                if better {
                    let version = wheel.version.clone();
                    let entry = CacheEntry {
                        path,
                        wheel,
                        index: index.clone(),
                    };
                    best = Some((priority, version, entry));
                }
            }

            if let Some((_, _, entry)) = best {
                info!("Cache hit: {} -> {}", req.spec(), entry.path.display());
                return Ok(LookupOutcome::Found(entry));
            }
        }

        debug!("Cache miss: {} (wanted {})", req.spec(), pin);
        Ok(LookupOutcome::NotFound)
    }

    /// Like [`lookup`](Self::lookup), but first checks the installed version
    pub fn lookup_for(
        &self,
        req: &Requirement,
        indexes: &[SourceIndex],
        graph: &DistributionGraph,
    ) -> Result<LookupOutcome> {
        if req.is_pinned()
            && let Some(name) = &req.name
            && let Some(installed) = graph.get(name)
            && req.constraint.satisfies(&installed.version)
        {
            debug!("{} already satisfied by {}", req.spec(), installed);
            return Ok(LookupOutcome::AlreadySatisfied);
        }
        self.lookup(req, indexes)
    }

    /// Copy an artifact into `index`'s namespace, atomically
    ///
    /// The file is written to a temporary name in the destination directory,
    /// synced, then renamed into place. Storing an artifact that is already
    /// cached replaces it with identical content.
    pub fn store(&self, artifact: &Path, index: &SourceIndex) -> Result<CacheEntry> {
        let filename = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidArtifact {
                path: artifact.to_path_buf(),
                reason: "no file name".to_string(),
            })?;
        let wheel = WheelFilename::parse(&filename).map_err(|reason| Error::InvalidArtifact {
            path: artifact.to_path_buf(),
            reason,
        })?;

        let dir = self.namespace_dir(index);
        fs::create_dir_all(&dir)?;
        let final_path = dir.join(&filename);

        let mut temp = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(&dir)?;
        let mut source = File::open(artifact)?;
        let size = io::copy(&mut source, temp.as_file_mut())?;
        temp.as_file().sync_all()?;
        temp.persist(&final_path).map_err(|e| Error::Io(e.error))?;

        info!(
            "Cached: {} {} from {} ({} bytes)",
            wheel.name, wheel.version, index, size
        );

        Ok(CacheEntry {
            path: final_path,
            wheel,
            index: index.clone(),
        })
    }
}

/// Glob for a project name spelled with any of `-`, `_` or `.` between words
fn name_glob(name: &PackageName) -> String {
    name.as_str()
        .split('-')
        .map(Pattern::escape)
        .collect::<Vec<_>>()
        .join("[-_.]")
}

fn parse_artifact_name(path: &Path) -> Option<WheelFilename> {
    let filename = path.file_name()?.to_string_lossy();
    match WheelFilename::parse(&filename) {
        Ok(wheel) => Some(wheel),
        Err(e) => {
            debug!("Ignoring cache file {}: {}", path.display(), e);
            None
        }
    }
}
