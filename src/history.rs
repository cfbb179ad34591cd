use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{load_json_file, save_json_file};

pub const HISTORY_FILE: &str = "command_history.json";
pub const MAX_HISTORY: usize = 50;

const DISPLAY_PREFIX: &str = "vervids ";

/// Most-recent-first list of full command strings, without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandHistory {
    entries: Vec<String>,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from disk, dropping blanks and duplicates and applying the cap,
    /// in case the file was edited by hand.
    pub fn load_from(path: &Path) -> Self {
        let raw: Vec<String> = load_json_file(path);
        let mut entries: Vec<String> = Vec::new();
        for entry in raw {
            let entry = entry.trim();
            if !entry.is_empty() && !entries.iter().any(|e| e == entry) {
                entries.push(entry.to_string());
            }
        }
        entries.truncate(MAX_HISTORY);
        Self { entries }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        save_json_file(path, self)
    }

    /// Record a command. Returns false when it was already present; the
    /// existing entry keeps its position.
    pub fn push(&mut self, command: &str) -> bool {
        let command = command.trim();
        if command.is_empty() || self.entries.iter().any(|e| e == command) {
            return false;
        }
        self.entries.insert(0, command.to_string());
        self.entries.truncate(MAX_HISTORY);
        true
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// History entries are shown without the leading `vervids `.
pub fn display_command(command: &str) -> &str {
    command.strip_prefix(DISPLAY_PREFIX).unwrap_or(command)
}
