//! Table of detached long-running processes, one slot per logical key.
//!
//! The check-then-spawn sequence runs under the map's entry lock, so two
//! concurrent requests for the same key can never start two processes. A
//! watcher task removes the slot when the process exits, but only if the slot
//! still belongs to that pid.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::shell::ShellAdapter;

/// A live detached process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundHandle {
    pub pid: u32,
    pub command: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    /// A handle already exists for the key; nothing was spawned.
    AlreadyRunning { pid: u32, since: DateTime<Utc> },
}

impl StartOutcome {
    pub fn pid(&self) -> u32 {
        match self {
            Self::Started { pid } | Self::AlreadyRunning { pid, .. } => *pid,
        }
    }
}

#[derive(Clone, Default)]
pub struct ProcessTable {
    handles: Arc<DashMap<String, BackgroundHandle>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `command` under `key` unless a live handle already exists.
    ///
    /// Must be called from within a tokio runtime (the exit watcher is a task).
    pub fn ensure_running(
        &self,
        key: &str,
        command: &str,
        adapter: &dyn ShellAdapter,
    ) -> Result<StartOutcome, String> {
        let child = match self.handles.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                let handle = existing.get();
                return Ok(StartOutcome::AlreadyRunning {
                    pid: handle.pid,
                    since: handle.started_at,
                });
            }
            Entry::Vacant(slot) => {
                let child = adapter.spawn_detached(command)?;
                slot.insert(BackgroundHandle {
                    pid: child.pid,
                    command: command.to_string(),
                    started_at: Utc::now(),
                });
                child
            }
        };

        let pid = child.pid;
        tracing::info!(key, pid, "started background command: {command}");

        let handles = self.handles.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            child.exited.await;
            handles.remove_if(&key, |_, handle| handle.pid == pid);
            tracing::info!(key = %key, pid, "background command exited");
        });

        Ok(StartOutcome::Started { pid })
    }

    pub fn get(&self, key: &str) -> Option<BackgroundHandle> {
        self.handles.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
