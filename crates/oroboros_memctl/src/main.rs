//! # OROBOROS Memory Host
//!
//! Brings up the memory subsystem the way the engine does at startup and
//! runs console commands against it.
//!
//! ```text
//! oroboros_memctl [-config memory.toml] [-zone <kb>] [+command ...]
//! ```
//!
//! With no `+command` arguments, commands are read from stdin one per line
//! until end of input or `quit`. Any memory error is fatal: it is logged and
//! the process exits with status 1.

mod console;

use std::io::BufRead;
use std::process::ExitCode;

use oroboros_memory::{MemoryConfig, MemoryError, MemorySystem};
use tracing_subscriber::EnvFilter;

use crate::console::{Console, ConsoleError};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("fatal: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> Result<(), ConsoleError> {
    let config = startup_config(args)?;
    let mut memory = MemorySystem::new(&config)?;
    let console = Console::with_memory_commands()?;

    let scripted: Vec<&str> = args
        .iter()
        .filter_map(|arg| arg.strip_prefix('+'))
        .collect();
    if !scripted.is_empty() {
        for command in scripted {
            console.execute(&mut memory, command)?;
        }
        return Ok(());
    }

    console.list();
    for line in std::io::stdin().lock().lines() {
        let line = line.map_err(MemoryError::from)?;
        let command = line.trim();
        match command {
            "" => {}
            "quit" => break,
            "help" => console.list(),
            _ => match console.execute(&mut memory, command) {
                Err(ConsoleError::Unknown(name)) => tracing::warn!("unknown command {name:?}"),
                other => other?,
            },
        }
    }
    Ok(())
}

/// Defaults, then `-config <path>`, then `-zone <kb>`.
fn startup_config(args: &[String]) -> Result<MemoryConfig, MemoryError> {
    let mut config = match args.iter().position(|arg| arg == "-config") {
        Some(at) => {
            let path = args.get(at + 1).ok_or_else(|| {
                MemoryError::InvalidConfig("you must specify a file after -config".into())
            })?;
            MemoryConfig::load(path)?
        }
        None => MemoryConfig::default(),
    };
    config.apply_args(args)?;
    config.validate()?;
    Ok(config)
}
