//! Bringing the relay and the background API up when probes find nothing.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::client::RelayClient;
use crate::config::PanelConfig;

/// File name of the relay binary, without the platform suffix.
pub const RELAY_BINARY: &str = "vervids-relay";

/// Environment override for the extension install directory.
pub const EXTENSION_DIR_ENV: &str = "VERVIDS_EXTENSION_DIR";

pub fn relay_binary_name() -> String {
    format!("{RELAY_BINARY}{}", std::env::consts::EXE_SUFFIX)
}

/// Extension install directory: config first, then `VERVIDS_EXTENSION_DIR`.
pub fn resolve_extension_dir(config: &PanelConfig) -> Option<PathBuf> {
    config
        .extension_dir
        .clone()
        .or_else(|| std::env::var_os(EXTENSION_DIR_ENV).map(PathBuf::from))
        .filter(|p| !p.as_os_str().is_empty())
}

/// Launch candidates for the relay, in the order they are tried.
///
/// The last entry is the bare binary name, left to `PATH` lookup.
pub fn relay_candidates(
    extension_dir: Option<&Path>,
    exe_dir: Option<&Path>,
    cwd: Option<&Path>,
) -> Vec<PathBuf> {
    let name = relay_binary_name();
    let mut out: Vec<PathBuf> = Vec::new();
    let mut push = |p: PathBuf| {
        if !out.contains(&p) {
            out.push(p);
        }
    };

    if let Some(ext) = extension_dir {
        push(ext.join(&name));
        push(ext.join("bin").join(&name));
    }
    if let Some(dir) = exe_dir {
        push(dir.join(&name));
    }
    if let Some(cwd) = cwd {
        push(cwd.join(&name));
        push(cwd.join("bin").join(&name));
        push(cwd.join("server").join(&name));
    }
    push(PathBuf::from(name));
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedRelay {
    pub path: PathBuf,
    pub pid: Option<u32>,
}

/// Starts the relay as a detached child of the panel.
pub struct RelayLauncher {
    candidates: Vec<PathBuf>,
    working_dir: Option<PathBuf>,
}

impl RelayLauncher {
    pub fn new(candidates: Vec<PathBuf>, working_dir: Option<PathBuf>) -> Self {
        Self {
            candidates,
            working_dir,
        }
    }

    pub fn from_config(config: &PanelConfig) -> Self {
        let ext = resolve_extension_dir(config);
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf));
        let cwd = std::env::current_dir().ok();
        let candidates = relay_candidates(ext.as_deref(), exe_dir.as_deref(), cwd.as_deref());
        Self::new(candidates, ext)
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// Try each candidate until one spawns. Path-qualified candidates that do
    /// not exist are skipped without an attempt.
    pub fn launch(&self) -> Result<LaunchedRelay, String> {
        let mut errors = Vec::new();
        for candidate in &self.candidates {
            if candidate.components().count() > 1 && !candidate.is_file() {
                continue;
            }
            match self.spawn(candidate) {
                Ok(pid) => {
                    tracing::info!(path = %candidate.display(), ?pid, "launched relay");
                    return Ok(LaunchedRelay {
                        path: candidate.clone(),
                        pid,
                    });
                }
                Err(e) => {
                    tracing::debug!(path = %candidate.display(), "relay launch failed: {e}");
                    errors.push(format!("{}: {e}", candidate.display()));
                }
            }
        }
        if errors.is_empty() {
            Err(format!("No {RELAY_BINARY} binary found"))
        } else {
            Err(format!("Could not launch {RELAY_BINARY} ({})", errors.join("; ")))
        }
    }

    fn spawn(&self, program: &Path) -> Result<Option<u32>, String> {
        let mut cmd = tokio::process::Command::new(program);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = self.working_dir.as_deref().filter(|d| d.is_dir()) {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| e.to_string())?;
        let pid = child.id();
        // Reap the relay if it exits while the panel is still around
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        Ok(pid)
    }
}

/// Ask the relay to start the background API, then give it time to bind.
pub async fn start_background_api(
    relay: &RelayClient,
    command: &str,
    settle: std::time::Duration,
) -> Result<(), String> {
    let resp = relay.execute(command).await.map_err(|e| e.to_string())?;
    if !resp.success {
        return Err(resp
            .error
            .unwrap_or_else(|| format!("Relay could not start `{command}`")));
    }
    tokio::time::sleep(settle).await;
    Ok(())
}

/// Shown once the relay cycle gives up.
pub fn relay_manual_instructions(extension_dir: Option<&Path>) -> Vec<String> {
    let mut lines = vec![
        "Could not connect to the vervids relay.".to_string(),
        "To start it manually:".to_string(),
        "  1. Open a terminal".to_string(),
    ];
    match extension_dir {
        Some(dir) => {
            lines.push(format!("  2. Run: cd \"{}\"", dir.display()));
            lines.push(format!("  3. Run: ./{}", relay_binary_name()));
        }
        None => lines.push(format!("  2. Run: {RELAY_BINARY}")),
    }
    lines.push("Then type :reconnect".to_string());
    lines
}

/// Shown once the background API cycle gives up.
pub fn api_manual_instructions(api_url: &str, serve_command: &str) -> Vec<String> {
    vec![
        format!("Could not reach the vervids API at {api_url}."),
        "To start it manually:".to_string(),
        "  1. Open a terminal".to_string(),
        format!("  2. Run: {serve_command}"),
        "Then type :reconnect".to_string(),
    ]
}
