// src/installer/mod.rs

//! Install and prune
//!
//! Brings an environment to exactly the required package set:
//!
//! 1. Snapshot what is installed.
//! 2. For every direct requirement, skip it when the installed version
//!    already satisfies it, use a cached artifact when one matches a pin,
//!    and otherwise have the index client build or download artifacts,
//!    which are stored in the cache under the index that produced them.
//! 3. Install, take a fresh snapshot and resolve it. Any conflict fails
//!    the run even if the install itself succeeded.
//! 4. Uninstall, in one batch, everything that was installed before, is
//!    not required now, was not just installed and is not protected.

mod pip;

pub use pip::{PipClient, parse_installed};

use crate::cache::{ArtifactCache, CacheConfig, LookupOutcome, SourceIndex};
use crate::config::Config;
use crate::distribution::DistributionGraph;
use crate::environment::{Environment, InstallStep, RuntimeProbe};
use crate::error::{Error, Result};
use crate::process::check_interrupted;
use crate::requirement::{MarkerEnvironment, Origin, PackageName, Requirement, RequirementSet};
use crate::resolver::Resolver;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Installed ahead of everything else so artifact builds work
pub const BOOTSTRAP_REQUIREMENTS: &[&str] = &["wheel==0.45.1"];

/// Never pruned, whether required or not
pub const PROTECTED_PACKAGES: &[&str] = &["pip", "setuptools", "wheel", "venv-update"];

/// The package-index client: resolves, fetches, builds, installs, uninstalls
pub trait PackageIndexClient {
    /// Install targets (requirement specs, `-e` pairs or artifact paths)
    /// and return the names that were newly installed
    fn install(
        &self,
        env: &Environment,
        targets: &[String],
        indexes: &[SourceIndex],
        find_links: &[String],
    ) -> Result<Vec<PackageName>>;

    /// Build or download the artifact for `spec` into `dest`, using `index`
    /// and nothing else: no other index, no find-links, no dependencies
    fn fetch(
        &self,
        env: &Environment,
        spec: &str,
        index: &SourceIndex,
        dest: &Path,
    ) -> Result<Vec<PathBuf>>;

    /// Remove installed packages, all in one call
    fn uninstall(&self, env: &Environment, names: &[PackageName]) -> Result<()>;
}

/// What one install run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Names the index client reported as newly installed
    pub installed: Vec<PackageName>,
    /// The resolved closure after install
    pub required: BTreeSet<PackageName>,
    /// Names that were uninstalled as extraneous
    pub pruned: Vec<PackageName>,
    /// Requirements served from the artifact cache
    pub from_cache: usize,
    /// Requirements the installed version already satisfied
    pub satisfied: usize,
}

/// Work decided for one batch of requirements
#[derive(Debug, Default)]
struct InstallPlan {
    targets: Vec<String>,
    fetch: Vec<Requirement>,
    from_cache: usize,
    satisfied: usize,
}

/// Installs requirements into an environment and prunes what is left over
pub struct Installer<'a> {
    client: &'a dyn PackageIndexClient,
    probe: &'a dyn RuntimeProbe,
    requirements: RequirementSet,
    indexes: Vec<SourceIndex>,
    cache_dir: PathBuf,
}

impl<'a> Installer<'a> {
    /// `config` should already carry index options from the requirement files
    pub fn new(
        client: &'a dyn PackageIndexClient,
        probe: &'a dyn RuntimeProbe,
        requirements: RequirementSet,
        config: &Config,
    ) -> Result<Self> {
        Ok(Self {
            client,
            probe,
            requirements,
            indexes: config.source_indexes()?,
            cache_dir: config.cache_dir.clone(),
        })
    }

    /// Install, verify and prune
    pub fn run(&self, env: &Environment) -> Result<InstallReport> {
        let python = env.python();
        let marker_env = self.probe.marker_environment(&python)?;
        let tags = self.probe.supported_tags(&python)?;
        let cache =
            ArtifactCache::new(CacheConfig::new(&self.cache_dir).with_supported_tags(tags))?;

        let previously = snapshot(env, &marker_env)?;
        let before = Resolver::new(&previously).trace(&self.requirements.requirements);
        debug!(
            "Before install: {} installed, {} required, {} problems",
            previously.len(),
            before.distributions.len(),
            before.conflicts.len()
        );

        let mut report = InstallReport::default();

        let bootstrap = bootstrap_requirements()?;
        for batch in [bootstrap.as_slice(), self.requirements.requirements.as_slice()] {
            let plan = self.plan(&cache, &previously, batch)?;
            let installed = self.execute(env, &cache, plan, &mut report)?;
            report.installed.extend(installed);
        }

        check_interrupted()?;

        let after = snapshot(env, &marker_env)?;
        let resolution = Resolver::new(&after).resolve(&self.requirements.requirements)?;
        report.required = resolution.names();
        info!(
            "Required: {}",
            resolution
                .distributions
                .iter()
                .map(|d| d.as_pin())
                .collect::<Vec<_>>()
                .join(" ")
        );

        report.pruned = extraneous(&previously, &after, &report.required, &report.installed);
        if report.pruned.is_empty() {
            debug!("Nothing to prune");
        } else {
            info!(
                "Removing extraneous packages: {}",
                report
                    .pruned
                    .iter()
                    .map(PackageName::as_str)
                    .collect::<Vec<_>>()
                    .join(" ")
            );
            self.client.uninstall(env, &report.pruned)?;
        }

        Ok(report)
    }

    /// Sort requirements into satisfied, cached, fetch and pass-through
    fn plan(
        &self,
        cache: &ArtifactCache,
        graph: &DistributionGraph,
        requirements: &[Requirement],
    ) -> Result<InstallPlan> {
        let mut plan = InstallPlan::default();

        for req in requirements {
            if !req.applies_to(graph.marker_env(), &[]) {
                debug!("Skipping {}: marker does not apply", req);
                continue;
            }

            if !req.is_cacheable() {
                if req.editable {
                    plan.targets.push("-e".to_string());
                }
                plan.targets.push(req.spec());
                continue;
            }

            // pins go through the cache, which reports them as already satisfied
            if !req.is_pinned()
                && let Some(name) = &req.name
                && let Some(installed) = graph.get(name)
                && req.constraint.satisfies(&installed.version)
            {
                debug!("{} already satisfied by {}", req.spec(), installed);
                plan.satisfied += 1;
                continue;
            }

            match cache.lookup_for(req, &self.indexes, graph)? {
                LookupOutcome::AlreadySatisfied => plan.satisfied += 1,
                LookupOutcome::Found(entry) => {
                    plan.from_cache += 1;
                    plan.targets.push(entry.path.display().to_string());
                }
                LookupOutcome::NotFound => plan.fetch.push(req.clone()),
            }
        }

        Ok(plan)
    }

    fn execute(
        &self,
        env: &Environment,
        cache: &ArtifactCache,
        plan: InstallPlan,
        report: &mut InstallReport,
    ) -> Result<Vec<PackageName>> {
        report.from_cache += plan.from_cache;
        report.satisfied += plan.satisfied;

        let mut targets = plan.targets;
        if !plan.fetch.is_empty() {
            targets.extend(self.fetch_and_store(env, cache, &plan.fetch)?);
        }
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        check_interrupted()?;
        self.client
            .install(env, &targets, &self.indexes, &self.find_links(cache))
    }

    /// Fetch each requirement from the primary index, then each extra in turn
    ///
    /// Every attempt names a single index, so whatever it produces is stored
    /// under that index. Returns install targets: cached artifact paths, or
    /// the plain spec for requirements no index could produce alone, which
    /// the install step then resolves with every index and find-link.
    fn fetch_and_store(
        &self,
        env: &Environment,
        cache: &ArtifactCache,
        requirements: &[Requirement],
    ) -> Result<Vec<String>> {
        let workdir = tempfile::TempDir::new()?;
        let mut targets = Vec::new();

        for (n, req) in requirements.iter().enumerate() {
            let spec = req.spec();
            let mut stored = None;

            for index in &self.indexes {
                check_interrupted()?;
                let dest = workdir.path().join(format!("{}-{}", n, index.namespace()));
                std::fs::create_dir_all(&dest)?;

                match self.client.fetch(env, &spec, index, &dest) {
                    Ok(artifacts) => {
                        let mut paths = Vec::new();
                        for artifact in artifacts {
                            paths.push(cache.store(&artifact, index)?.path);
                        }
                        stored = Some(paths);
                        break;
                    }
                    Err(Error::Interrupted) => return Err(Error::Interrupted),
                    Err(e) => debug!("{} not available from {}: {}", spec, index, e),
                }
            }

            match stored {
                Some(paths) => targets.extend(paths.iter().map(|p| p.display().to_string())),
                None => {
                    warn!("No single index provides {}; installing it uncached", spec);
                    targets.push(spec);
                }
            }
        }

        Ok(targets)
    }

    /// Requirement-file find-links plus every cache namespace that exists
    fn find_links(&self, cache: &ArtifactCache) -> Vec<String> {
        let mut links = self.requirements.find_links.clone();
        for index in &self.indexes {
            let dir = cache.namespace_dir(index);
            if dir.is_dir() {
                links.push(dir.display().to_string());
            }
        }
        links
    }
}

impl InstallStep for Installer<'_> {
    fn install(&mut self, env: &Environment) -> Result<()> {
        let report = self.run(env)?;
        info!(
            "Installed {}, pruned {}, {} from cache, {} already satisfied",
            report.installed.len(),
            report.pruned.len(),
            report.from_cache,
            report.satisfied
        );
        Ok(())
    }
}

fn snapshot(env: &Environment, marker_env: &MarkerEnvironment) -> Result<DistributionGraph> {
    DistributionGraph::scan(&env.site_packages(), marker_env.clone())
}

fn bootstrap_requirements() -> Result<Vec<Requirement>> {
    BOOTSTRAP_REQUIREMENTS
        .iter()
        .map(|spec| {
            Requirement::parse(spec, Origin::CommandLine)
                .map_err(|message| Error::Consistency(format!("bad bootstrap pin: {}", message)))
        })
        .collect()
}

/// Installed before and still installed, but neither required, just
/// installed, nor protected; sorted
pub fn extraneous(
    previously: &DistributionGraph,
    after: &DistributionGraph,
    required: &BTreeSet<PackageName>,
    installed: &[PackageName],
) -> Vec<PackageName> {
    let protected: BTreeSet<PackageName> =
        PROTECTED_PACKAGES.iter().map(|name| PackageName::new(name)).collect();

    previously
        .names()
        .filter(|name| after.contains(name))
        .filter(|name| !required.contains(*name))
        .filter(|name| !installed.contains(*name))
        .filter(|name| !protected.contains(*name))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::InstalledDistribution;
    use crate::version::Version;

    fn graph(names: &[&str]) -> DistributionGraph {
        let mut graph = DistributionGraph::default();
        for name in names {
            graph.add(InstalledDistribution::new(name, Version::parse("1.0").unwrap()));
        }
        graph
    }

    fn names(list: &[&str]) -> Vec<PackageName> {
        list.iter().map(|n| PackageName::new(n)).collect()
    }

    #[test]
    fn test_extraneous_set_difference() {
        let previously = graph(&["a", "b", "c", "d", "pip", "setuptools", "wheel", "old"]);
        let after = graph(&["a", "b", "c", "d", "pip", "setuptools", "wheel", "new"]);
        let required: BTreeSet<PackageName> = names(&["a", "b"]).into_iter().collect();

        let pruned = extraneous(&previously, &after, &required, &names(&["c"]));
        assert_eq!(pruned, names(&["d"]));
    }

    #[test]
    fn test_bootstrap_requirements_are_pinned() {
        for req in bootstrap_requirements().unwrap() {
            assert!(req.is_pinned(), "{req}");
            let name = req.name.unwrap();
            assert!(PROTECTED_PACKAGES.contains(&name.as_str()));
        }
    }
}
