// src/resolver/mod.rs

//! Transitive requirement resolution and conflict detection
//!
//! The resolver never chooses versions. It walks the installed-distribution
//! graph breadth-first from the direct requirements, accepting whatever is
//! installed when it satisfies the requirement and recording a conflict
//! when it does not. All conflicts from one run are reported together.

mod conflict;

pub use conflict::{Conflict, ResolutionFailure};

use crate::distribution::{DistributionGraph, InstalledDistribution};
use crate::error::Result;
use crate::requirement::{Origin, PackageName, Requirement};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Outcome of one traversal: what was accepted and what went wrong
#[derive(Debug, Clone, Default)]
pub struct ResolutionResult {
    /// Required distributions in the order they were accepted
    pub distributions: Vec<InstalledDistribution>,
    pub conflicts: Vec<Conflict>,
}

impl ResolutionResult {
    /// Normalized names of every accepted distribution
    pub fn names(&self) -> BTreeSet<PackageName> {
        self.distributions.iter().map(|d| d.name.clone()).collect()
    }

    /// Fail with every conflict aggregated, or return the accepted set
    pub fn into_result(self) -> Result<Self> {
        if self.conflicts.is_empty() {
            Ok(self)
        } else {
            Err(ResolutionFailure::new(self.conflicts).into())
        }
    }
}

/// Breadth-first resolver over one graph snapshot
pub struct Resolver<'a> {
    graph: &'a DistributionGraph,
}

impl<'a> Resolver<'a> {
    pub fn new(graph: &'a DistributionGraph) -> Self {
        Self { graph }
    }

    /// Trace the closure of `direct`, collecting conflicts instead of failing
    pub fn trace(&self, direct: &[Requirement]) -> ResolutionResult {
        let env = self.graph.marker_env();
        let mut result = ResolutionResult::default();
        let mut visited: HashSet<((Option<PackageName>, String), Vec<String>)> = HashSet::new();
        // extras already expanded for each accepted name
        let mut expanded: HashMap<PackageName, BTreeSet<String>> = HashMap::new();

        let mut queue: VecDeque<Requirement> = direct
            .iter()
            .filter(|req| req.applies_to(env, &[]))
            .cloned()
            .collect();

        while let Some(req) = queue.pop_front() {
            let Some(name) = req.name.clone() else {
                debug!("Not tracing unnamed requirement {}", req);
                continue;
            };

            if !visited.insert((req.identity(), req.extras.clone())) {
                continue;
            }

            let Some(dist) = self.graph.get(&name) else {
                result.conflicts.push(Conflict::UnmetDependency { requirement: req });
                continue;
            };

            if !req.constraint.satisfies(&dist.version) {
                // children of a bad match would only add spurious errors
                result.conflicts.push(Conflict::VersionConflict {
                    installed: dist.clone(),
                    requirement: req,
                });
                continue;
            }

            let new_extras: Vec<String> = match expanded.get(&name) {
                None => {
                    result.distributions.push(dist.clone());
                    req.extras.clone()
                }
                Some(seen) => req
                    .extras
                    .iter()
                    .filter(|extra| !seen.contains(*extra))
                    .cloned()
                    .collect(),
            };
            let first_visit = !expanded.contains_key(&name);
            expanded
                .entry(name.clone())
                .or_default()
                .extend(new_extras.iter().cloned());
            if !first_visit && new_extras.is_empty() {
                continue;
            }

            let parent = Arc::new(req);
            for child in dist.requirements_for(&new_extras, env) {
                let Some(child_name) = &child.name else {
                    continue;
                };
                let tagged = child.with_origin(Origin::Requirement(Arc::clone(&parent)));
                if tagged.has_ancestor(child_name) {
                    debug!("Ignoring circular requirement {}", tagged);
                    continue;
                }
                queue.push_back(tagged);
            }
        }

        result
    }

    /// Resolve `direct`, failing with every conflict found
    pub fn resolve(&self, direct: &[Requirement]) -> Result<ResolutionResult> {
        self.trace(direct).into_result()
    }
}

/// Resolve `direct` against a graph snapshot
pub fn resolve(direct: &[Requirement], graph: &DistributionGraph) -> Result<ResolutionResult> {
    Resolver::new(graph).resolve(direct)
}
