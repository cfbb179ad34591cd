//! Panel front end: input handling, result rendering and the session that
//! ties the clients, the liveness cycles and the history together.
//!
//! Everything here produces [`OutputLine`]s; the binary only prints them.

use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

use crate::bootstrap::{
    api_manual_instructions, relay_manual_instructions, resolve_extension_dir,
    start_background_api, RelayLauncher, RELAY_BINARY,
};
use crate::client::{ApiClient, ClientError, RelayClient};
use crate::config::PanelConfig;
use crate::error_classification::failure_hint;
use crate::history::{display_command, CommandHistory};
use crate::liveness::{CycleOutcome, LivenessCycle, LivenessState};
use crate::project_path::ProjectPath;
use crate::relay::types::{ExecuteResponse, NO_OUTPUT_SENTINEL};

pub const COMMAND_PREFIX: &str = "vervids";
pub const SERVE_COMMAND: &str = "vervids serve";
pub const STATUS_COMMAND: &str = "vervids status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub kind: LineKind,
    pub text: String,
}

impl OutputLine {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Info,
            text: text.into(),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Success,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Error,
            text: text.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Trim the input and prepend `vervids ` unless it already starts with it
/// (case-insensitively).
pub fn normalize_command(input: &str) -> Result<String, &'static str> {
    let input = input.trim();
    if input.is_empty() {
        return Err("Please enter a command");
    }
    if input.to_lowercase().starts_with(COMMAND_PREFIX) {
        Ok(input.to_string())
    } else {
        Ok(format!("{COMMAND_PREFIX} {input}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaCommand {
    Help,
    History,
    Refresh,
    Reconnect,
    Projects,
    Commits(Option<String>),
    Project,
    Quit,
    Unknown(String),
}

/// Parse `:name [arg]`. Returns None for ordinary commands.
pub fn parse_meta(input: &str) -> Option<MetaCommand> {
    let rest = input.trim().strip_prefix(':')?;
    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default().to_lowercase();
    let meta = match name.as_str() {
        "help" | "h" | "?" => MetaCommand::Help,
        "history" => MetaCommand::History,
        "refresh" => MetaCommand::Refresh,
        "reconnect" => MetaCommand::Reconnect,
        "projects" => MetaCommand::Projects,
        "commits" => MetaCommand::Commits(parts.next().map(str::to_string)),
        "project" => MetaCommand::Project,
        "quit" | "q" | "exit" => MetaCommand::Quit,
        _ => MetaCommand::Unknown(name),
    };
    Some(meta)
}

pub fn help_lines() -> Vec<OutputLine> {
    [
        "Type a vervids command (the `vervids` prefix is optional), e.g. `status` or `commit -m \"intro\"`.",
        "  :history          recent commands",
        "  :refresh          run `vervids status`",
        "  :reconnect        re-check the relay and the API",
        "  :projects         projects known to the API",
        "  :commits <id>     commits of one project",
        "  :project          current project path",
        "  :quit             leave the panel",
    ]
    .into_iter()
    .map(OutputLine::info)
    .collect()
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Lines for one `/execute` result, followed by the change list when the
/// result carried one.
pub fn render_result(resp: &ExecuteResponse) -> Vec<OutputLine> {
    let mut lines = Vec::new();

    if !resp.success {
        lines.push(OutputLine::error(format!(
            "Command failed: {}",
            resp.error.as_deref().unwrap_or("Unknown error")
        )));
        if let Some(code) = resp.code {
            lines.push(OutputLine::error(format!("Exit code: {code}")));
        }
        if let Some(signal) = &resp.signal {
            lines.push(OutputLine::error(format!("Signal: {signal}")));
        }
        let output = resp.output.as_deref().unwrap_or_default();
        if !output.trim().is_empty() {
            lines.push(OutputLine::error(output.trim_end()));
        }
        if let Some(hint) = failure_hint(output, resp.code) {
            lines.push(OutputLine::info(hint));
        }
        return lines;
    }

    match resp.output.as_deref() {
        Some(output) if output.contains(NO_OUTPUT_SENTINEL) => {
            lines.push(OutputLine::info(output.trim_end()));
            lines.push(OutputLine::info(
                "This is normal if the command completed without output.",
            ));
        }
        Some(output) if !output.is_empty() => {
            lines.push(OutputLine::success(output.trim_end()));
        }
        _ => lines.push(OutputLine::success("Command executed successfully (no output)")),
    }

    if let Some(stderr) = resp.stderr.as_deref()
        && !stderr.trim().is_empty()
        && Some(stderr) != resp.stdout.as_deref()
    {
        lines.push(OutputLine::info("--- stderr ---"));
        lines.push(OutputLine::error(stderr.trim_end()));
    }

    if let Some(changes) = &resp.changes {
        lines.extend(render_changes(&parse_changes(changes)));
    }
    lines
}

/// Lines for a request that got no usable answer.
pub fn render_client_error(err: &ClientError) -> Vec<OutputLine> {
    let text = match err {
        ClientError::Timeout => "Connection error: Request timed out".to_string(),
        ClientError::Connect(e) => format!(
            "Connection error: Cannot connect to server. Make sure the server is running. ({e})"
        ),
        ClientError::Http {
            status,
            error: Some(e),
        } => format!("Connection error: HTTP {status} - {e}"),
        ClientError::Http {
            status,
            error: None,
        } => format!("Connection error: HTTP {status}"),
        ClientError::Malformed(e) => format!("Connection error: unexpected response ({e})"),
    };
    let mut lines = vec![OutputLine::error(text)];
    if err.is_connectivity() {
        lines.push(OutputLine::info(format!(
            "Start the server with: {RELAY_BINARY}"
        )));
    }
    lines
}

/// One entry of a `changes` list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl Change {
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.path.as_deref())
            .unwrap_or("(unnamed)")
    }

    pub fn status(&self) -> &str {
        self.status.as_deref().unwrap_or("modified")
    }
}

/// Best-effort: entries that are not objects are skipped, and a bare string
/// is taken as a path.
pub fn parse_changes(value: &Value) -> Vec<Change> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(path) => Some(Change {
                path: Some(path.clone()),
                ..Change::default()
            }),
            Value::Object(_) => serde_json::from_value(item.clone()).ok(),
            _ => None,
        })
        .collect()
}

pub fn change_glyph(status: &str) -> char {
    match status.to_lowercase().as_str() {
        "added" | "new" => '+',
        "deleted" | "removed" => '-',
        "modified" | "changed" => '~',
        "renamed" => '>',
        _ => '*',
    }
}

pub fn render_changes(changes: &[Change]) -> Vec<OutputLine> {
    if changes.is_empty() {
        return vec![
            OutputLine::info("No changes detected"),
            OutputLine::info("Initialize a project to start tracking changes"),
        ];
    }
    let mut lines = vec![OutputLine::info(format!("Changes ({}):", changes.len()))];
    for change in changes {
        lines.push(OutputLine::info(format!(
            "  {} {}  [{}]",
            change_glyph(change.status()),
            change.label(),
            change.status()
        )));
    }
    lines
}

pub fn render_history(history: &CommandHistory) -> Vec<OutputLine> {
    if history.is_empty() {
        return vec![OutputLine::info("No commands yet")];
    }
    history
        .entries()
        .iter()
        .enumerate()
        .map(|(i, cmd)| OutputLine::info(format!("{:>3}  {}", i + 1, display_command(cmd))))
        .collect()
}

/// Opaque API payloads are shown as pretty JSON under a title.
pub fn render_json(title: &str, value: &Value) -> Vec<OutputLine> {
    let mut lines = vec![OutputLine::info(title)];
    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    lines.extend(pretty.lines().map(OutputLine::info));
    lines
}

pub fn render_project(project: &ProjectPath) -> Vec<OutputLine> {
    match project {
        ProjectPath::Saved(path) => {
            let mut lines = vec![OutputLine::info(format!("Project: {}", path.display()))];
            if let Some(xml) = project.xml_path() {
                lines.push(OutputLine::info(format!("XML project: {}", xml.display())));
            }
            lines
        }
        ProjectPath::Unsaved => vec![OutputLine::info(project.to_string())],
        ProjectPath::Error(_) => vec![OutputLine::error(project.to_string())],
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Result of one line of input.
#[derive(Debug, Default)]
pub struct Reply {
    pub lines: Vec<OutputLine>,
    pub quit: bool,
}

impl From<Vec<OutputLine>> for Reply {
    fn from(lines: Vec<OutputLine>) -> Self {
        Self { lines, quit: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connectivity {
    pub relay: bool,
    pub api: bool,
}

pub struct PanelSession {
    config: PanelConfig,
    relay: RelayClient,
    api: ApiClient,
    launcher: RelayLauncher,
    relay_cycle: LivenessCycle,
    api_cycle: LivenessCycle,
    history: CommandHistory,
    history_path: Option<PathBuf>,
    project: ProjectPath,
    changes: Vec<Change>,
}

impl PanelSession {
    pub fn new(
        config: PanelConfig,
        project: ProjectPath,
        history_path: Option<PathBuf>,
    ) -> Result<Self, String> {
        let relay = RelayClient::new(
            &config.relay_url,
            config.probe_timeout(),
            config.execute_timeout(),
        )?;
        let api = ApiClient::new(&config.api_url, config.probe_timeout())?;
        let history = history_path
            .as_deref()
            .map(CommandHistory::load_from)
            .unwrap_or_default();
        Ok(Self {
            launcher: RelayLauncher::from_config(&config),
            relay_cycle: LivenessCycle::new("relay", config.retry_policy()),
            api_cycle: LivenessCycle::new("api", config.retry_policy()),
            config,
            relay,
            api,
            history,
            history_path,
            project,
            changes: Vec::new(),
        })
    }

    pub fn with_launcher(mut self, launcher: RelayLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn relay_state(&self) -> LivenessState {
        self.relay_cycle.state()
    }

    pub fn api_state(&self) -> LivenessState {
        self.api_cycle.state()
    }

    /// Run the relay cycle, then (if the relay is up) the background API cycle.
    pub async fn connect(&mut self) -> (Connectivity, Vec<OutputLine>) {
        let mut lines = vec![OutputLine::info("Checking server connection...")];

        let relay = &self.relay;
        let launcher = &self.launcher;
        let outcome = self
            .relay_cycle
            .run(
                || async move { relay.ping().await.map(|_| ()).map_err(|e| e.to_string()) },
                |_| async move { launcher.launch().map(|_| ()) },
            )
            .await;
        if let CycleOutcome::Exhausted { attempts, .. } = outcome {
            lines.push(OutputLine::error(format!(
                "Relay not reachable after {attempts} attempts"
            )));
            let ext = resolve_extension_dir(&self.config);
            lines.extend(relay_manual_instructions(ext.as_deref()).into_iter().map(OutputLine::info));
            return (
                Connectivity {
                    relay: false,
                    api: false,
                },
                lines,
            );
        }
        lines.push(OutputLine::success("Server connected"));

        let api = &self.api;
        let settle = self.config.serve_settle();
        let outcome = self
            .api_cycle
            .run(
                || async move { api.health().await.map_err(|e| e.to_string()) },
                |_| async move { start_background_api(relay, SERVE_COMMAND, settle).await },
            )
            .await;
        let api_ok = outcome.is_available();
        if api_ok {
            lines.push(OutputLine::success("API connected"));
        } else {
            lines.extend(
                api_manual_instructions(&self.config.api_url, SERVE_COMMAND)
                    .into_iter()
                    .map(OutputLine::error),
            );
        }
        (
            Connectivity {
                relay: true,
                api: api_ok,
            },
            lines,
        )
    }

    /// Handle one line of user input.
    pub async fn submit(&mut self, input: &str) -> Reply {
        if let Some(meta) = parse_meta(input) {
            return self.handle_meta(meta).await;
        }
        let command = match normalize_command(input) {
            Ok(c) => c,
            Err(msg) => return vec![OutputLine::error(msg)].into(),
        };
        self.remember(&command);
        self.execute(&command).await.into()
    }

    /// Send a command to the relay without recording it in history.
    pub async fn execute(&mut self, command: &str) -> Vec<OutputLine> {
        let mut lines = vec![OutputLine::info(format!("> {command}"))];
        match self.relay.execute(command).await {
            Ok(resp) => {
                if resp.success
                    && let Some(changes) = &resp.changes
                {
                    self.changes = parse_changes(changes);
                }
                lines.extend(render_result(&resp));
            }
            Err(e) => {
                tracing::warn!("execute failed: {e}");
                lines.extend(render_client_error(&e));
            }
        }
        lines
    }

    fn remember(&mut self, command: &str) {
        if !self.history.push(command) {
            return;
        }
        if let Some(path) = &self.history_path
            && let Err(e) = self.history.save_to(path)
        {
            tracing::warn!("Failed to save command history: {e}");
        }
    }

    async fn handle_meta(&mut self, meta: MetaCommand) -> Reply {
        let lines = match meta {
            MetaCommand::Quit => {
                return Reply {
                    lines: Vec::new(),
                    quit: true,
                };
            }
            MetaCommand::Help => help_lines(),
            MetaCommand::History => render_history(&self.history),
            MetaCommand::Refresh => self.execute(STATUS_COMMAND).await,
            MetaCommand::Reconnect => self.connect().await.1,
            MetaCommand::Project => render_project(&self.project),
            MetaCommand::Projects => match self.api.projects().await {
                Ok(v) => render_json("Projects:", &v),
                Err(e) => render_client_error(&e),
            },
            MetaCommand::Commits(None) => vec![OutputLine::error("Usage: :commits <project-id>")],
            MetaCommand::Commits(Some(id)) => match self.api.commits(&id).await {
                Ok(v) => render_json(&format!("Commits for {id}:"), &v),
                Err(e) => render_client_error(&e),
            },
            MetaCommand::Unknown(name) => vec![OutputLine::error(format!(
                "Unknown command :{name} (try :help)"
            ))],
        };
        lines.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn texts(lines: &[OutputLine]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn normalizes_input() {
        assert_eq!(normalize_command("status").unwrap(), "vervids status");
        assert_eq!(normalize_command("  vervids log ").unwrap(), "vervids log");
        assert_eq!(normalize_command("VERVIDS status").unwrap(), "VERVIDS status");
        assert_eq!(normalize_command("   "), Err("Please enter a command"));
    }

    #[test]
    fn parses_meta_commands() {
        assert_eq!(parse_meta("status"), None);
        assert_eq!(parse_meta(":help"), Some(MetaCommand::Help));
        assert_eq!(parse_meta(" :Refresh "), Some(MetaCommand::Refresh));
        assert_eq!(
            parse_meta(":commits p-1"),
            Some(MetaCommand::Commits(Some("p-1".into())))
        );
        assert_eq!(parse_meta(":commits"), Some(MetaCommand::Commits(None)));
        assert_eq!(parse_meta(":q"), Some(MetaCommand::Quit));
        assert_eq!(parse_meta(":wat"), Some(MetaCommand::Unknown("wat".into())));
    }

    #[test]
    fn renders_plain_success() {
        let resp = ExecuteResponse {
            success: true,
            output: Some("clean\n".into()),
            stdout: Some("clean\n".into()),
            stderr: Some(String::new()),
            ..ExecuteResponse::default()
        };
        assert_eq!(render_result(&resp), vec![OutputLine::success("clean")]);
    }

    #[test]
    fn renders_sentinel_as_info_with_reassurance() {
        let resp = ExecuteResponse {
            success: true,
            output: Some(NO_OUTPUT_SENTINEL.into()),
            ..ExecuteResponse::default()
        };
        let lines = render_result(&resp);
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.kind == LineKind::Info));
        assert_eq!(lines[0].text, NO_OUTPUT_SENTINEL);
    }

    #[test]
    fn renders_distinct_stderr_section() {
        let resp = ExecuteResponse {
            success: true,
            output: Some("done\nwarning: large file".into()),
            stdout: Some("done".into()),
            stderr: Some("warning: large file".into()),
            ..ExecuteResponse::default()
        };
        let lines = render_result(&resp);
        assert_eq!(
            texts(&lines),
            vec!["done\nwarning: large file", "--- stderr ---", "warning: large file"]
        );
        assert_eq!(lines[2].kind, LineKind::Error);
    }

    #[test]
    fn renders_failure_with_code_signal_and_hint() {
        let resp = ExecuteResponse {
            success: false,
            error: Some("Command failed with exit code 127: vervids status".into()),
            output: Some("zsh: command not found: vervids\n".into()),
            code: Some(127),
            ..ExecuteResponse::default()
        };
        let lines = render_result(&resp);
        assert_eq!(
            lines[0].text,
            "Command failed: Command failed with exit code 127: vervids status"
        );
        assert_eq!(lines[1].text, "Exit code: 127");
        assert_eq!(lines[2].text, "zsh: command not found: vervids");
        assert_eq!(lines[3].kind, LineKind::Info);
        assert!(lines[3].text.starts_with("Hint:"));
    }

    #[test]
    fn renders_rejection() {
        let resp = ExecuteResponse::rejected("Only vervids commands are allowed".into());
        assert_eq!(
            texts(&render_result(&resp)),
            vec!["Command failed: Only vervids commands are allowed"]
        );
    }

    #[test]
    fn renders_timeout_signal() {
        let resp = ExecuteResponse {
            success: false,
            error: Some("Command timed out after 300s: vervids sync".into()),
            signal: Some("SIGKILL".into()),
            ..ExecuteResponse::default()
        };
        let t = render_result(&resp);
        assert_eq!(t[1].text, "Signal: SIGKILL");
    }

    #[test]
    fn client_errors() {
        let lines = render_client_error(&ClientError::Connect("refused".into()));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].text, "Start the server with: vervids-relay");

        let lines = render_client_error(&ClientError::Http {
            status: 502,
            error: Some("upstream".into()),
        });
        assert_eq!(texts(&lines), vec!["Connection error: HTTP 502 - upstream"]);

        let lines = render_client_error(&ClientError::Timeout);
        assert_eq!(lines[0].text, "Connection error: Request timed out");
    }

    #[test]
    fn change_list_rendering() {
        let value = serde_json::json!([
            {"name": "project.aepx", "path": "/p/project.aepx", "status": "modified"},
            {"path": "/p/assets/a.jpg", "status": "added"},
            {"name": "old.mov", "status": "Deleted"},
            {"name": "b.wav", "status": "renamed"},
            {"name": "c.psd", "status": "conflict"},
            {"name": "d.png"},
            "/p/e.aep",
            42
        ]);
        let changes = parse_changes(&value);
        assert_eq!(changes.len(), 7);
        let t = texts(&render_changes(&changes))
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        assert_eq!(t[0], "Changes (7):");
        assert_eq!(t[1], "  ~ project.aepx  [modified]");
        assert_eq!(t[2], "  + /p/assets/a.jpg  [added]");
        assert_eq!(t[3], "  - old.mov  [Deleted]");
        assert_eq!(t[4], "  > b.wav  [renamed]");
        assert_eq!(t[5], "  * c.psd  [conflict]");
        assert_eq!(t[6], "  ~ d.png  [modified]");
        assert_eq!(t[7], "  ~ /p/e.aep  [modified]");
    }

    #[test]
    fn empty_change_list() {
        assert_eq!(render_changes(&[])[0].text, "No changes detected");
        assert!(parse_changes(&serde_json::json!({"not": "a list"})).is_empty());
    }

    #[test]
    fn history_display_strips_prefix() {
        let mut h = CommandHistory::new();
        h.push("vervids status");
        h.push("vervids commit -m intro");
        let t = render_history(&h);
        assert_eq!(t[0].text, "  1  commit -m intro");
        assert_eq!(t[1].text, "  2  status");
    }

    #[test]
    fn project_rendering() {
        let lines = render_project(&ProjectPath::parse("/p/promo.aep"));
        assert_eq!(texts(&lines), vec!["Project: /p/promo.aep", "XML project: /p/promo.aepx"]);
        let lines = render_project(&ProjectPath::parse("Error: no project"));
        assert_eq!(lines[0].kind, LineKind::Error);
    }

    // --- session against mock relay / API ---

    fn fast_config(relay_url: String, api_url: String) -> PanelConfig {
        PanelConfig {
            relay_url,
            api_url,
            max_attempts: 2,
            retry_delay_ms: 10,
            probe_timeout_ms: 1_000,
            serve_settle_ms: 0,
            execute_timeout_secs: 5,
            ..PanelConfig::default()
        }
    }

    fn dead_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{port}")
    }

    fn session(config: PanelConfig, history: Option<PathBuf>) -> PanelSession {
        PanelSession::new(config, ProjectPath::Unsaved, history)
            .unwrap()
            .with_launcher(RelayLauncher::new(Vec::new(), None))
    }

    #[tokio::test]
    async fn submit_prefixes_executes_and_records_history() {
        let dir = TempDir::new().unwrap();
        let history_path = dir.path().join("command_history.json");
        let mut relay = mockito::Server::new_async().await;
        let mock = relay
            .mock("POST", "/execute")
            .match_body(mockito::Matcher::Json(
                serde_json::json!({"command": "vervids status"}),
            ))
            .with_status(200)
            .with_body(
                r#"{"success":true,"output":"{\"changes\":[{\"name\":\"a.aepx\",\"status\":\"added\"}]}","stdout":"","stderr":"","changes":[{"name":"a.aepx","status":"added"}]}"#,
            )
            .create_async()
            .await;

        let mut s = session(
            fast_config(relay.url(), dead_url()),
            Some(history_path.clone()),
        );
        let reply = s.submit("status").await;
        assert!(!reply.quit);
        assert_eq!(reply.lines[0].text, "> vervids status");
        assert!(reply.lines.iter().any(|l| l.text == "Changes (1):"));
        assert_eq!(s.changes().len(), 1);
        assert_eq!(s.history().entries(), ["vervids status"]);
        assert_eq!(
            CommandHistory::load_from(&history_path).entries(),
            ["vervids status"]
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn empty_input_is_not_sent() {
        let mut s = session(fast_config(dead_url(), dead_url()), None);
        let reply = s.submit("   ").await;
        assert_eq!(texts(&reply.lines), vec!["Please enter a command"]);
        assert!(s.history().is_empty());
    }

    #[tokio::test]
    async fn quit_meta() {
        let mut s = session(fast_config(dead_url(), dead_url()), None);
        assert!(s.submit(":quit").await.quit);
    }

    #[tokio::test]
    async fn connect_gives_up_with_manual_instructions() {
        let mut s = session(fast_config(dead_url(), dead_url()), None);
        let (conn, lines) = s.connect().await;
        assert_eq!(
            conn,
            Connectivity {
                relay: false,
                api: false
            }
        );
        assert_eq!(s.relay_state(), LivenessState::Exhausted);
        let text = texts(&lines).join("\n");
        assert!(text.contains("Relay not reachable after 2 attempts"));
        assert!(text.contains("vervids-relay"));
    }

    /// Health endpoint that answers 503 once, then `{success: true}`.
    async fn flaky_api() -> String {
        use axum::http::StatusCode;
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let hits = Arc::new(AtomicU32::new(0));
        let app = axum::Router::new().route(
            "/health",
            axum::routing::get(move || {
                let hits = hits.clone();
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        (
                            StatusCode::SERVICE_UNAVAILABLE,
                            axum::Json(serde_json::json!({"success": false})),
                        )
                    } else {
                        (StatusCode::OK, axum::Json(serde_json::json!({"success": true})))
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn connect_starts_background_api_through_relay() {
        let mut relay = mockito::Server::new_async().await;
        relay
            .mock("GET", "/test")
            .with_status(200)
            .with_body(r#"{"message":"Welcome to the server."}"#)
            .create_async()
            .await;
        let serve = relay
            .mock("POST", "/execute")
            .match_body(mockito::Matcher::Json(
                serde_json::json!({"command": "vervids serve"}),
            ))
            .with_status(200)
            .with_body(r#"{"success":true,"output":"started","pid":4242}"#)
            .expect(1)
            .create_async()
            .await;

        let mut s = session(fast_config(relay.url(), flaky_api().await), None);
        let (conn, lines) = s.connect().await;
        assert_eq!(
            conn,
            Connectivity {
                relay: true,
                api: true
            }
        );
        assert_eq!(s.relay_state(), LivenessState::Available);
        assert_eq!(s.api_state(), LivenessState::Available);
        assert!(texts(&lines).contains(&"API connected"));
        serve.assert_async().await;
    }

    #[tokio::test]
    async fn commits_requires_id() {
        let mut s = session(fast_config(dead_url(), dead_url()), None);
        let reply = s.submit(":commits").await;
        assert_eq!(texts(&reply.lines), vec!["Usage: :commits <project-id>"]);
    }
}
