// src/lib.rs

//! venv-update
//!
//! Keeps a Python virtual environment in sync with its requirements files.
//! After a successful run the environment holds exactly what a fresh build
//! from those files would hold, and nothing more.
//!
//! # Architecture
//!
//! - Requirements: requirement-file parsing, markers and version constraints
//! - Resolver: breadth-first walk over installed metadata, collecting every
//!   conflict instead of stopping at the first
//! - Cache: built artifacts stored per source index, written atomically
//! - Environment: a bootstrap state machine that validates or recreates the
//!   environment, re-executes inside it once, and leaves a timestamp that
//!   build tools can trust
//! - Installer: installs through the package-index client and prunes what
//!   is no longer required

pub mod cache;
pub mod cli;
pub mod config;
pub mod distribution;
pub mod environment;
mod error;
pub mod installer;
pub mod process;
pub mod requirement;
pub mod resolver;
pub mod version;

pub use cache::{ArtifactCache, CacheConfig, CompatTag, LookupOutcome, SourceIndex};
pub use config::Config;
pub use distribution::{DistributionGraph, InstalledDistribution};
pub use environment::{Bootstrap, BootstrapOutcome, BootstrapState, Environment};
pub use error::{EXIT_INTERRUPTED, Error, Result};
pub use installer::{InstallReport, Installer, PackageIndexClient};
pub use requirement::{PackageName, Requirement, RequirementSet};
pub use resolver::{Conflict, ResolutionResult, Resolver};
pub use version::Version;
