// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser};
use std::process::ExitCode;
use tracing::{error, info, warn};
use venv_update::cli::{Cli, Invocation};
use venv_update::config::Config;
use venv_update::environment::{
    self, Bootstrap, BootstrapOutcome, Environment, PythonProbe, SelfExec, VirtualenvCreator,
};
use venv_update::installer::{Installer, PipClient};
use venv_update::process::install_signal_handlers;
use venv_update::requirement::{RequirementSet, parse_requirement_files};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if cli.wants_help() {
        if let Err(e) = Cli::command().print_help() {
            error!("Failed to print help: {}", e);
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    let invocation = cli.invocation();
    match run(&invocation) {
        Ok(BootstrapOutcome::Updated) => {
            info!("{} is up to date", invocation.target.display());
            ExitCode::SUCCESS
        }
        Ok(BootstrapOutcome::HandedOff) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(invocation: &Invocation) -> Result<BootstrapOutcome> {
    install_signal_handlers()?;

    let env = Environment::new(&invocation.target)?;

    // failures before the bootstrap starts still invalidate the environment
    let (config, requirements) = match prepare(invocation) {
        Ok(prepared) => prepared,
        Err(e) => {
            if let Err(mark) = environment::mark_invalid(&env, &invocation.requirements) {
                warn!("Could not mark {} invalid: {}", env, mark);
            }
            return Err(e);
        }
    };

    let creator = VirtualenvCreator::new(&config.creator);
    let probe = PythonProbe::new();
    let image = SelfExec::new(std::env::args_os().skip(1).collect());
    let client = PipClient::new();

    let mut bootstrap = Bootstrap::new(
        env,
        &invocation.creation_args,
        &config.python,
        &invocation.requirements,
        &creator,
        &probe,
        &image,
    );
    let mut installer = Installer::new(&client, &probe, requirements, &config)?;
    Ok(bootstrap.run(&mut installer)?)
}

fn prepare(invocation: &Invocation) -> Result<(Config, RequirementSet)> {
    let requirements = parse_requirement_files(&invocation.requirements)?;
    let mut config = Config::from_env();
    config.apply_requirement_options(&requirements);
    config.validate()?;
    Ok((config, requirements))
}

/// One log line per line of the message, so multi-conflict reports stay readable
fn report(err: &anyhow::Error) {
    for line in err.to_string().lines() {
        error!("{}", line);
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    let code = err
        .downcast_ref::<venv_update::Error>()
        .map(venv_update::Error::exit_code)
        .unwrap_or(1);
    u8::try_from(code).unwrap_or(1)
}
