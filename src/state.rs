use std::sync::Arc;

use crate::background::ProcessTable;
use crate::config::RelayConfig;
use crate::shell::{LoginShell, ShellAdapter};

/// Logical key of the single background slot.
pub const BACKGROUND_KEY: &str = "serve";

pub(crate) const MISSING_COMMAND: &str = "Command is required";

/// Why a command was refused before anything was spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRejection {
    Missing,
    /// Does not start with the allow-listed prefix
    Disallowed(String),
}

impl CommandRejection {
    pub fn message(&self) -> String {
        match self {
            Self::Missing => MISSING_COMMAND.to_string(),
            Self::Disallowed(prefix) => format!("Only {prefix} commands are allowed"),
        }
    }
}

/// Shared state for the relay server: config, the shell adapter and the
/// background process table. Lives as long as the server does.
pub struct RelayState {
    pub(crate) config: RelayConfig,
    pub(crate) shell: Arc<dyn ShellAdapter>,
    pub(crate) background: ProcessTable,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        let shell = LoginShell::new(config.exec_timeout(), config.max_output_bytes);
        tracing::info!(shell = shell.shell(), "relay commands will run under login shell");
        Self::with_adapter(config, Arc::new(shell))
    }

    pub fn with_adapter(config: RelayConfig, shell: Arc<dyn ShellAdapter>) -> Self {
        Self {
            config,
            shell,
            background: ProcessTable::new(),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn background(&self) -> &ProcessTable {
        &self.background
    }

    /// The allow-list check. This is the only authorization gate: anything
    /// after the prefix (including `;`, `&&`, `$(...)`) reaches the shell.
    pub fn validate_command(&self, command: Option<&str>) -> Result<String, CommandRejection> {
        let command = match command {
            Some(c) if !c.is_empty() => c,
            _ => return Err(CommandRejection::Missing),
        };
        if !command.trim().starts_with(self.config.command_prefix.as_str()) {
            return Err(CommandRejection::Disallowed(self.config.command_prefix.clone()));
        }
        Ok(command.to_string())
    }

    /// True when the command's leading words are the configured background command.
    pub fn is_background_command(&self, command: &str) -> bool {
        let pattern: Vec<&str> = self.config.background_command.split_whitespace().collect();
        if pattern.is_empty() {
            return false;
        }
        let words: Vec<&str> = command.split_whitespace().take(pattern.len()).collect();
        words == pattern
    }
}
