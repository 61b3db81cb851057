// src/environment/bootstrap.rs

//! Bootstrap state machine
//!
//! ```text
//! NoEnvironment -> Validating -> Keep ---------------> SelfExec -> Installing -> MarkValid -> Done
//!                            \-> Invalidate -> Recreate -/     \-> Done (handed off)
//! any failure -> MarkInvalid
//! ```
//!
//! The first process ends at `SelfExec` by replacing itself with a copy
//! running inside the environment. That copy starts at `SelfExec`, checks
//! that it really is inside the environment, and carries on to install.

use super::{
    Environment, EnvironmentCreator, EnvironmentFingerprint, ProcessImage, RuntimeProbe,
    mark_invalid, mark_valid,
};
use crate::error::{Error, Result};
use crate::process::check_interrupted;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Bootstrap states, in the order a full run visits them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    NoEnvironment,
    Validating,
    Keep,
    Invalidate,
    Recreate,
    SelfExec,
    Installing,
    MarkValid,
    MarkInvalid,
    Done,
}

/// How a successful bootstrap ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Requirements were installed and the environment marked valid
    Updated,
    /// Control passed to a re-executed copy of this process
    HandedOff,
}

/// The work done once running inside the environment
pub trait InstallStep {
    fn install(&mut self, env: &Environment) -> Result<()>;
}

/// Drives one environment through the bootstrap states
pub struct Bootstrap<'a> {
    env: Environment,
    creation_args: Vec<String>,
    python: String,
    requirement_files: Vec<PathBuf>,
    creator: &'a dyn EnvironmentCreator,
    probe: &'a dyn RuntimeProbe,
    image: &'a dyn ProcessImage,
    fresh: Option<EnvironmentFingerprint>,
    exec_attempted: bool,
    handed_off: bool,
    history: Vec<BootstrapState>,
}

impl<'a> Bootstrap<'a> {
    /// `default_python` is used unless the creation args name an interpreter
    pub fn new(
        env: Environment,
        creation_args: &[String],
        default_python: &str,
        requirement_files: &[PathBuf],
        creator: &'a dyn EnvironmentCreator,
        probe: &'a dyn RuntimeProbe,
        image: &'a dyn ProcessImage,
    ) -> Self {
        let (python, creation_args) = effective_creation_args(creation_args, default_python);
        Self {
            env,
            creation_args,
            python,
            requirement_files: requirement_files.to_vec(),
            creator,
            probe,
            image,
            fresh: None,
            exec_attempted: false,
            handed_off: false,
            history: Vec::new(),
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Arguments passed to the creator, including the interpreter choice
    pub fn creation_args(&self) -> &[String] {
        &self.creation_args
    }

    /// States visited so far
    pub fn history(&self) -> &[BootstrapState] {
        &self.history
    }

    /// Run to completion, marking the environment invalid on any failure
    pub fn run(&mut self, installer: &mut dyn InstallStep) -> Result<BootstrapOutcome> {
        let mut state = if self.image.is_reexecuted() {
            BootstrapState::SelfExec
        } else {
            BootstrapState::NoEnvironment
        };

        loop {
            self.history.push(state);
            if state == BootstrapState::Done {
                return Ok(if self.handed_off {
                    BootstrapOutcome::HandedOff
                } else {
                    BootstrapOutcome::Updated
                });
            }

            match check_interrupted().and_then(|()| self.step(state, installer)) {
                Ok(next) => {
                    debug!("Bootstrap: {:?} -> {:?}", state, next);
                    state = next;
                }
                Err(err) => {
                    self.history.push(BootstrapState::MarkInvalid);
                    self.image.wait_for_children();
                    if let Err(mark_err) = mark_invalid(&self.env, &self.requirement_files) {
                        warn!("Could not mark {} invalid: {}", self.env, mark_err);
                    }
                    return Err(err);
                }
            }
        }
    }

    fn step(
        &mut self,
        state: BootstrapState,
        installer: &mut dyn InstallStep,
    ) -> Result<BootstrapState> {
        use BootstrapState::*;

        Ok(match state {
            NoEnvironment => Validating,
            Validating => self.validate()?,
            Keep => {
                info!("Keeping valid environment {}", self.env);
                SelfExec
            }
            Invalidate => {
                self.env.remove()?;
                Recreate
            }
            Recreate => {
                self.creator.create(self.env.root(), &self.creation_args)?;
                let fresh = self.fresh_fingerprint()?;
                fresh.save(&self.env.fingerprint_path())?;
                SelfExec
            }
            SelfExec => self.self_exec()?,
            Installing => {
                installer.install(&self.env)?;
                MarkValid
            }
            MarkValid => {
                mark_valid(&self.env, &self.requirement_files)?;
                Done
            }
            MarkInvalid | Done => Done,
        })
    }

    fn validate(&mut self) -> Result<BootstrapState> {
        if !self.env.exists() {
            info!("Creating new environment {}", self.env);
            return Ok(BootstrapState::Invalidate);
        }

        let fresh = self.fresh_fingerprint()?;
        let Some(stored) = EnvironmentFingerprint::load(&self.env.fingerprint_path()) else {
            info!("No usable fingerprint in {}, rebuilding", self.env);
            return Ok(BootstrapState::Invalidate);
        };
        if let Some(field) = stored.mismatch(&fresh) {
            info!("Environment {} is stale ({} changed), rebuilding", self.env, field);
            return Ok(BootstrapState::Invalidate);
        }

        // the fingerprint alone cannot tell if the env's interpreter was swapped
        match self.probe.runtime_version(&self.env.python()) {
            Ok(actual) if actual == fresh.runtime_version => Ok(BootstrapState::Keep),
            Ok(actual) => {
                info!(
                    "Environment {} runs {} but {} was requested, rebuilding",
                    self.env, actual, fresh.runtime_version
                );
                Ok(BootstrapState::Invalidate)
            }
            Err(e) => {
                info!("Environment interpreter unusable ({}), rebuilding", e);
                Ok(BootstrapState::Invalidate)
            }
        }
    }

    fn self_exec(&mut self) -> Result<BootstrapState> {
        if self.image.is_reexecuted() {
            let active = self.image.active_interpreter()?;
            if !same_directory(active.parent(), &self.env.bin_dir()) {
                return Err(Error::Consistency(format!(
                    "expected to run under {} but python is {}",
                    self.env.python().display(),
                    active.display()
                )));
            }
            return Ok(BootstrapState::Installing);
        }

        if self.exec_attempted {
            return Err(Error::Consistency(
                "self-exec already attempted in this process".to_string(),
            ));
        }
        self.exec_attempted = true;
        self.image.exec(&self.env)?;
        self.handed_off = true;
        Ok(BootstrapState::Done)
    }

    fn fresh_fingerprint(&mut self) -> Result<EnvironmentFingerprint> {
        if let Some(fresh) = &self.fresh {
            return Ok(fresh.clone());
        }
        let version = self.probe.runtime_version(Path::new(&self.python))?;
        let fresh = EnvironmentFingerprint::new(&version, &self.creation_args, self.env.root());
        self.fresh = Some(fresh.clone());
        Ok(fresh)
    }
}

/// The requested interpreter and the creator args, with the interpreter made explicit
pub fn effective_creation_args(args: &[String], default_python: &str) -> (String, Vec<String>) {
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--python=") {
            return (value.to_string(), args.to_vec());
        }
        if arg == "-p" || arg == "--python" {
            if let Some(value) = iter.peek() {
                return (value.to_string(), args.to_vec());
            }
        } else if let Some(value) = arg.strip_prefix("-p")
            && !value.is_empty()
        {
            return (value.to_string(), args.to_vec());
        }
    }

    let mut args = args.to_vec();
    args.push(format!("--python={}", default_python));
    (default_python.to_string(), args)
}

fn same_directory(a: Option<&Path>, b: &Path) -> bool {
    let Some(a) = a else { return false };
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
