// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! The fakes stand in for virtualenv, the interpreter and pip. The fake
//! index client serves packages from an in-memory catalog per index URL and
//! installs them by writing `.dist-info` metadata into site-packages, which
//! is all the scanner reads.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use venv_update::cache::WheelFilename;
use venv_update::config::Config;
use venv_update::environment::{
    EnvironmentCreator, ProcessImage, RuntimeProbe,
};
use venv_update::requirement::{MarkerEnvironment, PackageName, Requirement};
use venv_update::{
    Bootstrap, BootstrapOutcome, CompatTag, Environment, Error, Installer, PackageIndexClient,
    RequirementSet, Result, SourceIndex, Version,
};

pub const PRIMARY_INDEX: &str = "https://pypi.example/simple/";
pub const EXTRA_INDEX: &str = "https://extra.example/simple/";
pub const PYTHON_VERSION: &str = "3.12.1";

/// A package one fake index can serve
#[derive(Debug, Clone)]
pub struct FakePackage {
    pub name: String,
    pub version: String,
    pub requires: Vec<String>,
}

pub fn package(name: &str, version: &str, requires: &[&str]) -> FakePackage {
    FakePackage {
        name: name.to_string(),
        version: version.to_string(),
        requires: requires.iter().map(|r| r.to_string()).collect(),
    }
}

/// Calls made to the fake index client, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCall {
    Install(Vec<String>),
    Fetch { index: String, spec: String },
    Uninstall(Vec<String>),
}

/// In-memory package indexes
#[derive(Default)]
pub struct FakeIndexClient {
    catalogs: BTreeMap<String, Vec<FakePackage>>,
    pub calls: RefCell<Vec<ClientCall>>,
}

impl FakeIndexClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(mut self, index_url: &str, packages: Vec<FakePackage>) -> Self {
        let url = SourceIndex::new(index_url).unwrap().url().to_string();
        self.catalogs.entry(url).or_default().extend(packages);
        self
    }

    /// `(index url, spec)` for every fetch, in order
    pub fn fetches(&self) -> Vec<(String, String)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                ClientCall::Fetch { index, spec } => Some((index.clone(), spec.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn installs(&self) -> Vec<Vec<String>> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                ClientCall::Install(targets) => Some(targets.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn uninstalls(&self) -> Vec<Vec<String>> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                ClientCall::Uninstall(names) => Some(names.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn reset(&self) {
        self.calls.borrow_mut().clear();
    }

    fn find(&self, indexes: &[&str], req: &Requirement) -> Option<&FakePackage> {
        let name = req.name.as_ref()?;
        indexes
            .iter()
            .filter_map(|url| self.catalogs.get(*url))
            .flatten()
            .find(|pkg| {
                PackageName::new(&pkg.name) == *name
                    && req
                        .constraint
                        .satisfies(&Version::parse(&pkg.version).unwrap())
            })
    }

    fn lookup(&self, name: &PackageName, version: &Version) -> Option<&FakePackage> {
        self.catalogs.values().flatten().find(|pkg| {
            PackageName::new(&pkg.name) == *name && Version::parse(&pkg.version).unwrap() == *version
        })
    }

    /// Install a package and, like pip, any missing dependency
    fn install_package(
        &self,
        site: &Path,
        indexes: &[&str],
        pkg: &FakePackage,
        installed: &mut Vec<PackageName>,
    ) -> Result<()> {
        let name = PackageName::new(&pkg.name);
        if let Some(existing) = installed_version(site, &name) {
            if existing == pkg.version {
                return Ok(());
            }
            remove_dist(site, &name);
        }
        write_dist(site, &pkg.name, &pkg.version, &pkg.requires);
        installed.push(name);

        for spec in &pkg.requires {
            let req = Requirement::from_spec(spec)?;
            let Some(dep_name) = &req.name else { continue };
            if installed_version(site, dep_name).is_some() {
                continue;
            }
            let dep = self.find(indexes, &req).ok_or(pip_failure())?.clone();
            self.install_package(site, indexes, &dep, installed)?;
        }
        Ok(())
    }
}

impl PackageIndexClient for FakeIndexClient {
    fn install(
        &self,
        env: &Environment,
        targets: &[String],
        indexes: &[SourceIndex],
        _find_links: &[String],
    ) -> Result<Vec<PackageName>> {
        self.calls
            .borrow_mut()
            .push(ClientCall::Install(targets.to_vec()));

        let site = site_packages(env);
        let urls: Vec<&str> = indexes.iter().map(SourceIndex::url).collect();
        let mut installed = Vec::new();

        for target in targets.iter().filter(|t| t.as_str() != "-e") {
            let pkg = if target.ends_with(".whl") {
                let file_name = Path::new(target).file_name().unwrap().to_string_lossy();
                let wheel = WheelFilename::parse(&file_name).unwrap();
                self.lookup(&wheel.name, &wheel.version)
                    .ok_or(pip_failure())?
                    .clone()
            } else {
                let req = Requirement::from_spec(target)?;
                self.find(&urls, &req).ok_or(pip_failure())?.clone()
            };
            self.install_package(&site, &urls, &pkg, &mut installed)?;
        }

        Ok(installed)
    }

    fn fetch(
        &self,
        _env: &Environment,
        spec: &str,
        index: &SourceIndex,
        dest: &Path,
    ) -> Result<Vec<PathBuf>> {
        self.calls.borrow_mut().push(ClientCall::Fetch {
            index: index.url().to_string(),
            spec: spec.to_string(),
        });

        let req = Requirement::from_spec(spec)?;
        let pkg = self.find(&[index.url()], &req).ok_or(pip_failure())?;
        let path = dest.join(format!(
            "{}-{}-py3-none-any.whl",
            pkg.name.replace('-', "_"),
            pkg.version
        ));
        fs::write(&path, b"PK\x03\x04").unwrap();
        Ok(vec![path])
    }

    fn uninstall(&self, env: &Environment, names: &[PackageName]) -> Result<()> {
        self.calls.borrow_mut().push(ClientCall::Uninstall(
            names.iter().map(|n| n.to_string()).collect(),
        ));
        let site = site_packages(env);
        for name in names {
            remove_dist(&site, name);
        }
        Ok(())
    }
}

fn pip_failure() -> Error {
    Error::ExternalTool {
        program: "pip".to_string(),
        code: 1,
    }
}

/// Creates the directory layout virtualenv would, with pip and setuptools
#[derive(Default)]
pub struct FakeCreator {
    pub calls: Cell<usize>,
    pub last_args: RefCell<Vec<String>>,
}

impl EnvironmentCreator for FakeCreator {
    fn create(&self, target: &Path, args: &[String]) -> Result<()> {
        self.calls.set(self.calls.get() + 1);
        *self.last_args.borrow_mut() = args.to_vec();

        fs::create_dir_all(target.join("bin"))?;
        fs::write(target.join("bin/python"), "")?;
        let site = target.join("lib/python3.12/site-packages");
        fs::create_dir_all(&site)?;
        write_dist(&site, "pip", "24.0", &[]);
        write_dist(&site, "setuptools", "69.0.0", &[]);
        Ok(())
    }
}

/// Every interpreter reports the same version and accepts every tag
pub struct FakeProbe;

impl RuntimeProbe for FakeProbe {
    fn runtime_version(&self, _python: &Path) -> Result<String> {
        Ok(PYTHON_VERSION.to_string())
    }

    fn marker_environment(&self, _python: &Path) -> Result<MarkerEnvironment> {
        Ok(MarkerEnvironment::default())
    }

    fn supported_tags(&self, _python: &Path) -> Result<Vec<CompatTag>> {
        Ok(vec![CompatTag::new("py3", "none", "any")])
    }
}

/// Records self-exec instead of replacing the test process
pub struct FakeImage {
    pub reexecuted: bool,
    pub interpreter: PathBuf,
    pub execs: Cell<usize>,
}

impl FakeImage {
    pub fn new(reexecuted: bool, env: &Environment) -> Self {
        Self {
            reexecuted,
            interpreter: env.python(),
            execs: Cell::new(0),
        }
    }
}

impl ProcessImage for FakeImage {
    fn is_reexecuted(&self) -> bool {
        self.reexecuted
    }

    fn active_interpreter(&self) -> Result<PathBuf> {
        Ok(self.interpreter.clone())
    }

    fn exec(&self, _env: &Environment) -> Result<()> {
        self.execs.set(self.execs.get() + 1);
        Ok(())
    }

    fn wait_for_children(&self) {}
}

/// Write `<name>-<version>.dist-info/METADATA`
pub fn write_dist(site: &Path, name: &str, version: &str, requires: &[String]) {
    let dir = site.join(format!("{}-{}.dist-info", name.replace('-', "_"), version));
    fs::create_dir_all(&dir).unwrap();
    let mut metadata = format!("Metadata-Version: 2.1\nName: {}\nVersion: {}\n", name, version);
    for req in requires {
        metadata.push_str(&format!("Requires-Dist: {}\n", req));
    }
    fs::write(dir.join("METADATA"), metadata).unwrap();
}

fn dist_dirs(site: &Path) -> Vec<(PathBuf, PackageName, String)> {
    let Ok(entries) = fs::read_dir(site) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter_map(|path| {
            let stem = path.file_name()?.to_str()?.strip_suffix(".dist-info")?.to_string();
            let (name, version) = stem.rsplit_once('-')?;
            Some((path.clone(), PackageName::new(name), version.to_string()))
        })
        .collect()
}

fn installed_version(site: &Path, name: &PackageName) -> Option<String> {
    dist_dirs(site)
        .into_iter()
        .find(|(_, n, _)| n == name)
        .map(|(_, _, v)| v)
}

fn remove_dist(site: &Path, name: &PackageName) {
    for (path, n, _) in dist_dirs(site) {
        if n == *name {
            fs::remove_dir_all(path).unwrap();
        }
    }
}

pub fn site_packages(env: &Environment) -> PathBuf {
    env.root().join("lib/python3.12/site-packages")
}

/// Installed `name==version` pins, sorted
pub fn installed(env: &Environment) -> Vec<String> {
    let mut pins: Vec<String> = dist_dirs(&site_packages(env))
        .into_iter()
        .map(|(_, name, version)| format!("{}=={}", name, version))
        .collect();
    pins.sort();
    pins
}

/// A workspace with a requirements file, a cache and an environment path
pub struct Workspace {
    pub temp: TempDir,
    pub env: Environment,
    pub requirements: PathBuf,
    pub config: Config,
}

impl Workspace {
    pub fn new(requirements: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let env = Environment::new(temp.path().join("venv")).unwrap();
        let req_path = temp.path().join("requirements.txt");
        fs::write(&req_path, requirements).unwrap();
        let config = Config {
            cache_dir: temp.path().join("cache"),
            index_url: PRIMARY_INDEX.to_string(),
            extra_index_urls: Vec::new(),
            ..Config::default()
        };
        Self {
            temp,
            env,
            requirements: req_path,
            config,
        }
    }

    pub fn write_requirements(&self, content: &str) {
        fs::write(&self.requirements, content).unwrap();
    }

    pub fn requirement_set(&self) -> RequirementSet {
        venv_update::requirement::parse_requirement_files(std::slice::from_ref(&self.requirements))
            .unwrap()
    }

    /// One process's worth of bootstrap: returns its outcome and self-exec count
    pub fn stage(
        &self,
        reexecuted: bool,
        creation_args: &[&str],
        creator: &FakeCreator,
        client: &FakeIndexClient,
    ) -> (Result<BootstrapOutcome>, usize) {
        let probe = FakeProbe;
        let image = FakeImage::new(reexecuted, &self.env);
        let args: Vec<String> = creation_args.iter().map(|a| a.to_string()).collect();

        let mut bootstrap = Bootstrap::new(
            self.env.clone(),
            &args,
            "python3",
            std::slice::from_ref(&self.requirements),
            creator,
            &probe,
            &image,
        );
        let mut installer =
            Installer::new(client, &probe, self.requirement_set(), &self.config).unwrap();
        let outcome = bootstrap.run(&mut installer);
        (outcome, image.execs.get())
    }

    /// A full invocation: the first process hands off, the second installs
    pub fn update(
        &self,
        creation_args: &[&str],
        creator: &FakeCreator,
        client: &FakeIndexClient,
    ) -> Result<BootstrapOutcome> {
        let (outcome, execs) = self.stage(false, creation_args, creator, client);
        assert_eq!(outcome?, BootstrapOutcome::HandedOff);
        assert_eq!(execs, 1);
        self.stage(true, creation_args, creator, client).0
    }
}
