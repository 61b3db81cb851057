// src/resolver/conflict.rs

//! Conflict types for requirement resolution
//!
//! Defines the problems the resolver can find while tracing requirements
//! through the installed-distribution graph.

use crate::distribution::InstalledDistribution;
use crate::requirement::{Origin, Requirement};
use std::path::Path;

/// A problem found while tracing requirements
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// The installed version does not satisfy the requirement's constraint
    VersionConflict {
        installed: InstalledDistribution,
        requirement: Requirement,
    },
    /// Nothing with the required name is installed
    UnmetDependency { requirement: Requirement },
}

impl Conflict {
    /// The requirement that could not be satisfied
    pub fn requirement(&self) -> &Requirement {
        match self {
            Conflict::VersionConflict { requirement, .. }
            | Conflict::UnmetDependency { requirement } => requirement,
        }
    }

    /// Spec of the requirer, if this was pulled in by another package
    pub fn required_by(&self) -> Option<String> {
        match &self.requirement().origin {
            Origin::Requirement(parent) => Some(parent.spec()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conflict::VersionConflict {
                installed,
                requirement,
            } => {
                write!(f, "version conflict: {}", installed)?;
                if !installed.location.as_os_str().is_empty() {
                    write!(f, " ({})", relative_location(&installed.location))?;
                }
                write!(f, " <-> {}", requirement)
            }
            Conflict::UnmetDependency { requirement } => {
                write!(f, "unmet dependency: {}", requirement)
            }
        }
    }
}

/// Show a location relative to the working directory when it is below it
fn relative_location(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(&cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}

/// All conflicts from one resolver run, sorted by message text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct ResolutionFailure {
    conflicts: Vec<Conflict>,
}

impl ResolutionFailure {
    pub fn new(mut conflicts: Vec<Conflict>) -> Self {
        conflicts.sort_by_cached_key(|c| c.to_string());
        Self { conflicts }
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }
}

impl std::fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lines: Vec<String> = self
            .conflicts
            .iter()
            .map(|c| format!("Error: {}", c))
            .collect();
        write!(f, "{}", lines.join("\n"))
    }
}
