// src/installer/pip.rs

//! pip as the package-index client

use super::PackageIndexClient;
use crate::cache::SourceIndex;
use crate::environment::Environment;
use crate::error::Result;
use crate::process::ProcessRunner;
use crate::requirement::PackageName;
use std::fs;
use std::path::{Path, PathBuf};

/// Runs `<env>/bin/python -m pip ...`
#[derive(Debug, Clone)]
pub struct PipClient {
    runner: ProcessRunner,
}

impl Default for PipClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PipClient {
    pub fn new() -> Self {
        Self {
            runner: ProcessRunner::new().env("PIP_DISABLE_PIP_VERSION_CHECK", "1"),
        }
    }

    fn pip(&self, env: &Environment, args: Vec<String>) -> Result<String> {
        let mut full = vec!["-m".to_string(), "pip".to_string()];
        full.extend(args);
        let output = self.runner.run(&env.python().to_string_lossy(), &full)?;
        Ok(output.stdout)
    }
}

impl PackageIndexClient for PipClient {
    fn install(
        &self,
        env: &Environment,
        targets: &[String],
        indexes: &[SourceIndex],
        find_links: &[String],
    ) -> Result<Vec<PackageName>> {
        let mut args = vec!["install".to_string()];
        args.extend(index_args(indexes));
        args.extend(find_links.iter().map(|link| format!("--find-links={}", link)));
        args.extend(targets.iter().cloned());

        let stdout = self.pip(env, args)?;
        Ok(parse_installed(&stdout))
    }

    fn fetch(
        &self,
        env: &Environment,
        spec: &str,
        index: &SourceIndex,
        dest: &Path,
    ) -> Result<Vec<PathBuf>> {
        self.pip(env, fetch_args(spec, index, dest))?;

        let mut artifacts: Vec<PathBuf> = fs::read_dir(dest)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "whl"))
            .collect();
        artifacts.sort();
        Ok(artifacts)
    }

    fn uninstall(&self, env: &Environment, names: &[PackageName]) -> Result<()> {
        let mut args = vec!["uninstall".to_string(), "--yes".to_string()];
        args.extend(names.iter().map(|name| name.to_string()));
        self.pip(env, args)?;
        Ok(())
    }
}

fn index_args(indexes: &[SourceIndex]) -> Vec<String> {
    let mut args = Vec::new();
    let mut iter = indexes.iter();
    if let Some(primary) = iter.next() {
        args.push(format!("--index-url={}", primary.url()));
    }
    args.extend(iter.map(|extra| format!("--extra-index-url={}", extra.url())));
    args
}

/// `pip wheel` restricted to one index, with no find-links and no dependencies
///
/// Anything it leaves in `dest` can only have come from `index`.
fn fetch_args(spec: &str, index: &SourceIndex, dest: &Path) -> Vec<String> {
    vec![
        "wheel".to_string(),
        "--no-deps".to_string(),
        format!("--wheel-dir={}", dest.display()),
        format!("--index-url={}", index.url()),
        spec.to_string(),
    ]
}

/// Names from pip's `Successfully installed a-1.0 b_c-2.0` line
pub fn parse_installed(stdout: &str) -> Vec<PackageName> {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Successfully installed "))
        .flat_map(|rest| rest.split_whitespace())
        .map(|item| match item.rsplit_once('-') {
            Some((name, _version)) => PackageName::new(name),
            None => PackageName::new(item),
        })
        .collect()
}
