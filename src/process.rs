// src/process.rs

//! Child process execution
//!
//! Every external tool (environment creator, index client) runs through
//! [`ProcessRunner`]. Commands are echoed as `> program args` before they
//! start, their output is streamed into the log, and a non-zero exit turns
//! into [`Error::ExternalTool`] carrying the child's exit code.
//!
//! SIGINT and SIGTERM only set a flag. A running child is killed and reaped
//! when the flag is seen, so the failure path never races a live installer.

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_: nix::libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Trap SIGINT and SIGTERM so the failure path can still run
pub fn install_signal_handlers() -> Result<()> {
    let action = SigAction::new(SigHandler::Handler(on_signal), SaFlags::empty(), SigSet::empty());
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic
        unsafe { signal::sigaction(sig, &action) }
            .map_err(|e| Error::Consistency(format!("cannot trap {}: {}", sig, e)))?;
    }
    Ok(())
}

/// Whether a termination signal has arrived
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Fail with [`Error::Interrupted`] once a termination signal has arrived
pub fn check_interrupted() -> Result<()> {
    if interrupted() {
        Err(Error::Interrupted)
    } else {
        Ok(())
    }
}

/// Block until every child of this process has exited
pub fn wait_for_children() {
    loop {
        match waitpid(Pid::from_raw(-1), None) {
            Ok(status) => debug!("Reaped child: {:?}", status),
            Err(Errno::EINTR) => continue,
            // ECHILD: nothing left to wait for
            Err(_) => break,
        }
    }
}

/// Captured output of a successful command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs external commands synchronously
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    envs: Vec<(String, String)>,
    poll_interval: Duration,
    quiet: bool,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            envs: Vec::new(),
            poll_interval: Duration::from_millis(100),
            quiet: false,
        }
    }

    /// Set an environment variable for every command
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Log the command and its output at debug level only
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Run `program args...` to completion
    pub fn run<S: AsRef<OsStr>>(&self, program: &str, args: &[S]) -> Result<CommandOutput> {
        check_interrupted()?;
        if self.quiet {
            debug!("> {}", display_command(program, args));
        } else {
            info!("> {}", display_command(program, args));
        }

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.envs {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| Error::Spawn {
            program: program.to_string(),
            source,
        })?;

        let quiet = self.quiet;
        let stdout = child.stdout.take().map(|out| forward(out, false, quiet));
        let stderr = child.stderr.take().map(|err| forward(err, true, quiet));

        let status = loop {
            if interrupted() {
                warn!("Interrupted, stopping {}", program);
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Interrupted);
            }
            if let Some(status) = child.wait_timeout(self.poll_interval)? {
                break status;
            }
        };

        let output = CommandOutput {
            stdout: stdout.and_then(|h| h.join().ok()).unwrap_or_default(),
            stderr: stderr.and_then(|h| h.join().ok()).unwrap_or_default(),
        };

        if status.success() {
            Ok(output)
        } else {
            let code = status.code().unwrap_or(1);
            Err(Error::ExternalTool {
                program: program.to_string(),
                code,
            })
        }
    }
}

/// Log a child's stream line by line and collect it
fn forward<R: Read + Send + 'static>(
    stream: R,
    is_stderr: bool,
    quiet: bool,
) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut collected = String::new();
        for line in BufReader::new(stream).lines() {
            let Ok(line) = line else { break };
            match (quiet, is_stderr) {
                (true, _) => debug!("{}", line),
                (false, true) => warn!("{}", line),
                (false, false) => info!("{}", line),
            }
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    })
}

/// Shell-ish rendering of a command line for the log
pub fn display_command<S: AsRef<OsStr>>(program: &str, args: &[S]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().map(|a| a.as_ref().to_string_lossy().into_owned()))
        .map(|arg| quote(&arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
