// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Mirrors the derive definition in src/cli.rs
fn build_cli() -> Command {
    Command::new("venv-update")
        .version(env!("CARGO_PKG_VERSION"))
        .author("venv-update Contributors")
        .about("Keep a virtualenv in sync with its requirements files")
        .long_about(
            "Update a (possibly non-existent) virtualenv directory using a requirements.txt \
             listing. When this completes, the virtualenv has the same packages as if it were \
             removed then rebuilt. Arguments starting with '-' are passed to virtualenv; the \
             first other argument names the environment (default: virtualenv_run) and the \
             rest are requirements files (default: requirements.txt).",
        )
        .arg(
            Arg::new("args")
                .value_name("ARGS")
                .action(ArgAction::Append)
                .trailing_var_arg(true)
                .allow_hyphen_values(true)
                .help("[virtualenv_dir] [requirements ...] [virtualenv options ...]"),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("venv-update.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
