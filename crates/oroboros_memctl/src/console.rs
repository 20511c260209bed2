//! # Console Commands
//!
//! A registration table mapping command names to operations on the
//! [`MemorySystem`]. Command output goes through `tracing` at `info` level.

use oroboros_memory::{MemoryError, MemorySystem};
use thiserror::Error;

/// Signature of a console command.
pub type CommandFn = fn(&mut MemorySystem) -> Result<(), MemoryError>;

/// Errors raised by the console.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// A command with this name is already registered.
    #[error("command {0:?} is already registered")]
    Duplicate(String),

    /// No command with this name exists.
    #[error("unknown command {0:?}")]
    Unknown(String),

    /// The command itself failed.
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

struct Command {
    name: &'static str,
    help: &'static str,
    run: CommandFn,
}

/// The command table.
pub struct Console {
    commands: Vec<Command>,
}

impl Console {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// A table holding every memory inspection command.
    ///
    /// # Errors
    ///
    /// Only fails if two built-in commands share a name.
    pub fn with_memory_commands() -> Result<Self, ConsoleError> {
        let mut console = Self::new();
        console.register("flush", "release every cache entry", |memory| {
            memory.cache_flush()
        })?;
        console.register("hunk_print", "list the hunk, totalling runs", |memory| {
            memory.hunk_dump(false).map(drop)
        })?;
        console.register("hunk_print_all", "list every hunk record", |memory| {
            memory.hunk_dump(true).map(drop)
        })?;
        console.register("zone_print", "list every zone block", |memory| {
            memory.zone_dump().map(drop)
        })?;
        console.register("cache_print", "list cache entries by address", |memory| {
            memory.cache_dump().map(drop)
        })?;
        console.register("cache_report", "size of the data cache", |memory| {
            let _megabytes = memory.cache_report();
            Ok(())
        })?;
        console.register("check", "validate zone, hunk and cache", |memory| {
            memory.check_integrity()?;
            tracing::info!("memory check passed");
            Ok(())
        })?;
        Ok(console)
    }

    /// Adds a command.
    ///
    /// # Errors
    ///
    /// `Duplicate` if the name is taken.
    pub fn register(
        &mut self,
        name: &'static str,
        help: &'static str,
        run: CommandFn,
    ) -> Result<(), ConsoleError> {
        if self.commands.iter().any(|command| command.name == name) {
            return Err(ConsoleError::Duplicate(name.to_string()));
        }
        self.commands.push(Command { name, help, run });
        Ok(())
    }

    /// Runs the named command.
    ///
    /// # Errors
    ///
    /// `Unknown` for an unregistered name, `Memory` if the command fails.
    pub fn execute(&self, memory: &mut MemorySystem, name: &str) -> Result<(), ConsoleError> {
        let command = self
            .commands
            .iter()
            .find(|command| command.name == name.trim())
            .ok_or_else(|| ConsoleError::Unknown(name.trim().to_string()))?;
        tracing::debug!(command = command.name, "console");
        (command.run)(memory)?;
        Ok(())
    }

    /// Logs every command with its help line.
    pub fn list(&self) {
        for command in &self.commands {
            tracing::info!("{:16} {}", command.name, command.help);
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}
