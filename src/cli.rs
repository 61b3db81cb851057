// src/cli.rs

//! Command-line interface
//!
//! `venv-update [virtualenv_dir] [requirements ...] [virtualenv options ...]`
//!
//! Every argument starting with `-` goes to the environment creator, and so
//! does the value after `-p`, `--python` or `--prompt`. Of the rest, the
//! first names the environment and the others are requirement files.

use crate::config::{DEFAULT_REQUIREMENTS, DEFAULT_TARGET};
use clap::Parser;
use std::path::PathBuf;

const AFTER_HELP: &str = "\
Update a (possibly non-existent) virtualenv directory using a requirements.txt
listing. When this script completes, the virtualenv should have the same
packages as if it were removed then rebuilt.

Options starting with '-' are passed through to virtualenv, along with the
value following -p, --python or --prompt. The default
environment directory is 'virtualenv_run' and the default requirements file
is 'requirements.txt'.

Environment:
  VENV_UPDATE_CACHE_DIR  artifact cache directory
  PIP_INDEX_URL          primary package index
  PIP_EXTRA_INDEX_URL    extra package indexes, whitespace separated
  VENV_UPDATE_CREATOR    environment creator (default: virtualenv)
  VENV_UPDATE_PYTHON     interpreter used unless --python is given
  RUST_LOG               log filter (default: info)";

#[derive(Parser, Debug)]
#[command(name = "venv-update")]
#[command(version)]
#[command(about = "Keep a virtualenv in sync with its requirements files")]
#[command(after_help = AFTER_HELP)]
pub struct Cli {
    /// [virtualenv_dir] [requirements ...] [virtualenv options ...]
    #[arg(
        value_name = "ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub args: Vec<String>,
}

/// The command line, split into its three parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub target: PathBuf,
    pub requirements: Vec<PathBuf>,
    pub creation_args: Vec<String>,
}

impl Cli {
    /// `-h`/`--help` anywhere asks for help, even after positional args
    pub fn wants_help(&self) -> bool {
        self.args.iter().any(|arg| arg == "-h" || arg == "--help")
    }

    pub fn invocation(&self) -> Invocation {
        partition(&self.args)
    }
}

/// Creator options whose value may follow as a separate argument
const VALUE_OPTIONS: &[&str] = &["-p", "--python", "--prompt"];

/// Split raw arguments into target, requirement files and creator args
pub fn partition(args: &[String]) -> Invocation {
    let mut target = None;
    let mut requirements = Vec::new();
    let mut creation_args = Vec::new();

    let mut args = args.iter();
    while let Some(arg) = args.next() {
        if arg.starts_with('-') {
            creation_args.push(arg.clone());
            if VALUE_OPTIONS.contains(&arg.as_str())
                && let Some(value) = args.next()
            {
                creation_args.push(value.clone());
            }
        } else if target.is_none() {
            target = Some(PathBuf::from(arg));
        } else {
            requirements.push(PathBuf::from(arg));
        }
    }

    if requirements.is_empty() {
        requirements.push(PathBuf::from(DEFAULT_REQUIREMENTS));
    }

    Invocation {
        target: target.unwrap_or_else(|| PathBuf::from(DEFAULT_TARGET)),
        requirements,
        creation_args,
    }
}
