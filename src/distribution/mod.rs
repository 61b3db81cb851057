// src/distribution/mod.rs

//! Installed-distribution graph
//!
//! A read-only snapshot of what is installed in an environment: each
//! distribution's exact version, where it lives, and the requirements it
//! declares. Snapshots are taken fresh for every resolver run and never
//! updated in place.

mod metadata;

pub use metadata::{parse_metadata, parse_requires_txt};

use crate::error::Result;
use crate::requirement::{MarkerEnvironment, Origin, PackageName, Requirement};
use crate::version::Version;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One installed distribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledDistribution {
    pub name: PackageName,
    /// Project name as spelled in its metadata
    pub display_name: String,
    pub version: Version,
    /// Directory the distribution was found in (its site-packages or project dir)
    pub location: PathBuf,
    /// Declared requirements, possibly gated by `extra == ...` markers
    pub requires: Vec<Requirement>,
}

impl InstalledDistribution {
    pub fn new(name: &str, version: Version) -> Self {
        Self {
            name: PackageName::new(name),
            display_name: name.to_string(),
            version,
            location: PathBuf::new(),
            requires: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_requires(mut self, requires: Vec<Requirement>) -> Self {
        self.requires = requires;
        self
    }

    /// Requirements that apply for the given extras, sorted by name
    pub fn requirements_for(&self, extras: &[String], env: &MarkerEnvironment) -> Vec<&Requirement> {
        let mut reqs: Vec<&Requirement> = self
            .requires
            .iter()
            .filter(|req| req.applies_to(env, extras))
            .collect();
        reqs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.spec().cmp(&b.spec())));
        reqs
    }

    /// `name==version`, the pinned form of this distribution
    pub fn as_pin(&self) -> String {
        format!("{}=={}", self.display_name, self.version)
    }
}

impl std::fmt::Display for InstalledDistribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.display_name, self.version)
    }
}

/// Snapshot of installed distributions, keyed by normalized name
#[derive(Debug, Clone, Default)]
pub struct DistributionGraph {
    distributions: BTreeMap<PackageName, InstalledDistribution>,
    marker_env: MarkerEnvironment,
}

impl DistributionGraph {
    /// Create a new empty graph
    pub fn new(marker_env: MarkerEnvironment) -> Self {
        Self {
            distributions: BTreeMap::new(),
            marker_env,
        }
    }

    /// Add a distribution; the first one seen for a name wins
    pub fn add(&mut self, dist: InstalledDistribution) {
        self.distributions.entry(dist.name.clone()).or_insert(dist);
    }

    pub fn get(&self, name: &PackageName) -> Option<&InstalledDistribution> {
        self.distributions.get(name)
    }

    pub fn contains(&self, name: &PackageName) -> bool {
        self.distributions.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstalledDistribution> {
        self.distributions.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &PackageName> {
        self.distributions.keys()
    }

    pub fn len(&self) -> usize {
        self.distributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distributions.is_empty()
    }

    pub fn marker_env(&self) -> &MarkerEnvironment {
        &self.marker_env
    }

    /// Build a snapshot from site-packages directories, in search-path order
    ///
    /// Reads `*.dist-info`, `*.egg-info` and `*.egg-link` (editable) entries.
    /// Unreadable metadata is logged and skipped.
    pub fn scan(site_dirs: &[PathBuf], marker_env: MarkerEnvironment) -> Result<Self> {
        let mut graph = Self::new(marker_env);

        for dir in site_dirs {
            if !dir.is_dir() {
                debug!("Skipping missing site directory {}", dir.display());
                continue;
            }

            let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .collect();
            entries.sort();

            for entry in entries {
                match load_entry(dir, &entry) {
                    Ok(Some(dist)) => graph.add(dist),
                    Ok(None) => {}
                    Err(e) => warn!("Ignoring unreadable metadata {}: {}", entry.display(), e),
                }
            }
        }

        debug!("Scanned {} installed distributions", graph.len());
        Ok(graph)
    }
}

fn load_entry(site_dir: &Path, entry: &Path) -> std::result::Result<Option<InstalledDistribution>, String> {
    let file_name = entry
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if file_name.ends_with(".dist-info") && entry.is_dir() {
        let text = read(&entry.join("METADATA"))?;
        return parse_metadata(&text, None).map(|dist| Some(dist.with_location(site_dir)));
    }

    if file_name.ends_with(".egg-info") {
        let dist = load_egg_info(entry)?;
        return Ok(Some(dist.with_location(site_dir)));
    }

    if file_name.ends_with(".egg-link") {
        let text = read(entry)?;
        let project = text
            .lines()
            .next()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or("empty egg-link")?;
        let project = site_dir.join(project);
        let egg_info = fs::read_dir(&project)
            .map_err(|e| e.to_string())?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .find(|p| p.extension().is_some_and(|ext| ext == "egg-info"))
            .ok_or_else(|| format!("no .egg-info under {}", project.display()))?;
        return Ok(Some(load_egg_info(&egg_info)?.with_location(&project)));
    }

    Ok(None)
}

fn load_egg_info(path: &Path) -> std::result::Result<InstalledDistribution, String> {
    if path.is_dir() {
        let text = read(&path.join("PKG-INFO"))?;
        let requires = match fs::read_to_string(path.join("requires.txt")) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.to_string()),
        };
        parse_metadata(&text, requires.as_deref())
    } else {
        parse_metadata(&read(path)?, None)
    }
}

fn read(path: &Path) -> std::result::Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))
}

/// Placeholder origin for declared requirements; the resolver re-tags them
pub(crate) fn declared_origin() -> Origin {
    Origin::CommandLine
}
