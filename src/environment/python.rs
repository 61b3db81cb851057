// src/environment/python.rs

//! Real collaborators: virtualenv, the Python interpreter, and self-exec

use super::{Environment, EnvironmentCreator, ProcessImage, RuntimeProbe};
use crate::cache::CompatTag;
use crate::error::{Error, Result};
use crate::process::{self, ProcessRunner, display_command};
use crate::requirement::MarkerEnvironment;
use std::ffi::{CString, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Set in the re-executed process
pub const STAGE_VAR: &str = "VENV_UPDATE_STAGE";
const REEXECUTED_STAGE: &str = "2";

const VERSION_SCRIPT: &str = "import platform; print(platform.python_version())";

const MARKER_SCRIPT: &str = r#"import json, os, platform, sys
print(json.dumps({
    "python_version": ".".join(platform.python_version_tuple()[:2]),
    "python_full_version": platform.python_version(),
    "sys_platform": sys.platform,
    "platform_system": platform.system(),
    "platform_machine": platform.machine(),
    "os_name": os.name,
    "implementation_name": sys.implementation.name,
}))"#;

const TAGS_SCRIPT: &str = r#"import json
try:
    from packaging import tags
except ImportError:
    from pip._vendor.packaging import tags
print(json.dumps([str(tag) for tag in tags.sys_tags()]))"#;

/// Creates environments by running `virtualenv <target> <args...>`
#[derive(Debug, Clone)]
pub struct VirtualenvCreator {
    program: String,
    runner: ProcessRunner,
}

impl VirtualenvCreator {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            runner: ProcessRunner::new(),
        }
    }
}

impl EnvironmentCreator for VirtualenvCreator {
    fn create(&self, target: &Path, args: &[String]) -> Result<()> {
        let mut full: Vec<OsString> = vec![target.as_os_str().to_owned()];
        full.extend(args.iter().map(OsString::from));
        self.runner.run(&self.program, &full)?;
        Ok(())
    }
}

/// Asks an interpreter about itself
#[derive(Debug, Clone)]
pub struct PythonProbe {
    runner: ProcessRunner,
}

impl Default for PythonProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl PythonProbe {
    pub fn new() -> Self {
        Self {
            runner: ProcessRunner::new().quiet(),
        }
    }

    fn run_script(&self, python: &Path, script: &str) -> Result<String> {
        let python = python.to_string_lossy();
        let output = self.runner.run(&python, &["-c", script])?;
        Ok(output.stdout.trim().to_string())
    }
}

impl RuntimeProbe for PythonProbe {
    fn runtime_version(&self, python: &Path) -> Result<String> {
        self.run_script(python, VERSION_SCRIPT)
    }

    fn marker_environment(&self, python: &Path) -> Result<MarkerEnvironment> {
        let json = self.run_script(python, MARKER_SCRIPT)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Falls back to an empty list, which accepts every cached artifact,
    /// when the interpreter cannot report its tags
    fn supported_tags(&self, python: &Path) -> Result<Vec<CompatTag>> {
        let raw = match self.run_script(python, TAGS_SCRIPT).and_then(|json| {
            serde_json::from_str::<Vec<String>>(&json).map_err(Error::from)
        }) {
            Ok(raw) => raw,
            Err(Error::Interrupted) => return Err(Error::Interrupted),
            Err(e) => {
                warn!(
                    "Could not read artifact tags from {} ({}); accepting any cached artifact",
                    python.display(),
                    e
                );
                return Ok(Vec::new());
            }
        };
        let tags: Vec<CompatTag> = raw.iter().filter_map(|t| CompatTag::parse(t)).collect();
        debug!("{} supports {} artifact tags", python.display(), tags.len());
        Ok(tags)
    }
}

/// The running venv-update process
#[derive(Debug, Clone)]
pub struct SelfExec {
    args: Vec<OsString>,
}

impl SelfExec {
    /// `args` are this process's arguments, without the program name
    pub fn new(args: Vec<OsString>) -> Self {
        Self { args }
    }

    fn environment_for(&self, env: &Environment) -> Result<Vec<CString>> {
        let path = std::env::var_os("PATH").unwrap_or_default();
        let path = std::env::join_paths(
            std::iter::once(env.bin_dir()).chain(std::env::split_paths(&path)),
        )
        .map_err(|e| Error::Config(format!("cannot extend PATH: {}", e)))?;

        let overrides: [(&str, OsString); 3] = [
            ("PATH", path),
            ("VIRTUAL_ENV", env.root().as_os_str().to_owned()),
            (STAGE_VAR, OsString::from(REEXECUTED_STAGE)),
        ];

        let mut vars: Vec<CString> = Vec::new();
        for (key, value) in std::env::vars_os() {
            if overrides.iter().any(|(k, _)| key == *k) || key == "PYTHONHOME" {
                continue;
            }
            vars.push(env_entry(&key, &value)?);
        }
        for (key, value) in &overrides {
            vars.push(env_entry(&OsString::from(key), value)?);
        }
        Ok(vars)
    }
}

impl ProcessImage for SelfExec {
    fn is_reexecuted(&self) -> bool {
        std::env::var(STAGE_VAR).is_ok_and(|stage| stage == REEXECUTED_STAGE)
    }

    fn active_interpreter(&self) -> Result<PathBuf> {
        which::which("python")
            .map_err(|e| Error::Consistency(format!("python is not on PATH: {}", e)))
    }

    fn exec(&self, env: &Environment) -> Result<()> {
        let exe = std::env::current_exe()?;
        info!("> {}", display_command(&exe.to_string_lossy(), &self.args));

        let program = c_string(exe.as_os_str())?;
        let mut argv = vec![program.clone()];
        for arg in &self.args {
            argv.push(c_string(arg)?);
        }
        let envp = self.environment_for(env)?;

        match nix::unistd::execve(&program, &argv, &envp) {
            Ok(never) => match never {},
            Err(errno) => Err(Error::Spawn {
                program: exe.display().to_string(),
                source: std::io::Error::from(errno),
            }),
        }
    }

    fn wait_for_children(&self) {
        process::wait_for_children();
    }
}

fn c_string(value: &std::ffi::OsStr) -> Result<CString> {
    CString::new(value.as_bytes())
        .map_err(|_| Error::Config(format!("argument contains a NUL byte: {:?}", value)))
}

fn env_entry(key: &std::ffi::OsStr, value: &std::ffi::OsStr) -> Result<CString> {
    let mut entry = key.to_owned();
    entry.push("=");
    entry.push(value);
    c_string(&entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_exec_environment() {
        let env = Environment::new("/work/venv").unwrap();
        let vars = SelfExec::new(Vec::new()).environment_for(&env).unwrap();
        let vars: Vec<String> = vars
            .into_iter()
            .map(|v| v.into_string().unwrap())
            .collect();

        let path = vars.iter().find(|v| v.starts_with("PATH=")).unwrap();
        assert!(path.starts_with("PATH=/work/venv/bin"));
        assert!(vars.contains(&"VIRTUAL_ENV=/work/venv".to_string()));
        assert!(vars.contains(&format!("{}=2", STAGE_VAR)));
        assert_eq!(vars.iter().filter(|v| v.starts_with("PATH=")).count(), 1);
    }

    #[test]
    fn test_unreadable_tags_accept_everything() {
        let probe = PythonProbe::new();
        assert!(probe.supported_tags(Path::new("false")).unwrap().is_empty());
        assert!(
            probe
                .supported_tags(Path::new("/nonexistent/venv-update-test-python"))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_creator_failure_propagates_exit_code() {
        let creator = VirtualenvCreator::new("false");
        let err = creator.create(Path::new("/tmp/unused"), &[]).unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(matches!(err, Error::ExternalTool { .. }));
    }
}
