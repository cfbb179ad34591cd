use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

use crate::background::StartOutcome;
use crate::changes::extract_changes;
use crate::shell::{ExecError, ShellOutput};
use crate::state::{RelayState, BACKGROUND_KEY};

use super::types::*;

pub(super) async fn test_connection() -> Json<TestResponse> {
    Json(TestResponse {
        message: "Welcome to the server.".to_string(),
    })
}

/// Validate, dispatch and shape one command.
///
/// The body is parsed by hand so that a missing body, bad JSON or a
/// non-string `command` all get the same structured 400 instead of axum's
/// plain-text extractor rejection.
pub(super) async fn execute(
    State(state): State<Arc<RelayState>>,
    body: Bytes,
) -> (StatusCode, Json<ExecuteResponse>) {
    let payload: Option<serde_json::Value> = serde_json::from_slice(&body).ok();
    let raw = payload
        .as_ref()
        .and_then(|v| v.get("command"))
        .and_then(|c| c.as_str());

    let command = match state.validate_command(raw) {
        Ok(c) => c,
        Err(rejection) => {
            tracing::warn!(command = raw.unwrap_or_default(), "rejected command");
            return (
                StatusCode::BAD_REQUEST,
                Json(ExecuteResponse::rejected(rejection.message())),
            );
        }
    };

    if state.is_background_command(&command) {
        return start_background(&state, &command);
    }

    tracing::info!("Executing command: {command}");
    tracing::debug!("Full execution command: {}", state.shell.describe(&command));

    match state.shell.run(&command).await {
        Ok(output) => (StatusCode::OK, Json(success_response(output))),
        Err(e) => {
            tracing::error!(
                code = ?e.code,
                signal = ?e.signal,
                "Command execution error: {}",
                e.message
            );
            (StatusCode::INTERNAL_SERVER_ERROR, Json(failure_response(e)))
        }
    }
}

fn start_background(state: &RelayState, command: &str) -> (StatusCode, Json<ExecuteResponse>) {
    match state
        .background
        .ensure_running(BACKGROUND_KEY, command, state.shell.as_ref())
    {
        Ok(outcome) => {
            let output = match &outcome {
                StartOutcome::Started { pid } => {
                    format!("Started `{command}` in the background (pid {pid})")
                }
                StartOutcome::AlreadyRunning { pid, since } => format!(
                    "`{command}` is already running (pid {pid}, since {})",
                    since.format("%H:%M:%S")
                ),
            };
            (
                StatusCode::OK,
                Json(ExecuteResponse {
                    success: true,
                    output: Some(output),
                    stdout: Some(String::new()),
                    stderr: Some(String::new()),
                    pid: Some(outcome.pid()),
                    ..ExecuteResponse::default()
                }),
            )
        }
        Err(e) => {
            tracing::error!("Failed to start background command: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ExecuteResponse {
                    success: false,
                    output: Some(e.clone()),
                    error: Some(e),
                    ..ExecuteResponse::default()
                }),
            )
        }
    }
}

pub(crate) fn success_response(out: ShellOutput) -> ExecuteResponse {
    let mut output = combine_output(&out.stdout, &out.stderr);
    if output.trim().is_empty() {
        output = NO_OUTPUT_SENTINEL.to_string();
    }
    let changes = extract_changes(&output);

    ExecuteResponse {
        success: true,
        output: Some(output),
        stdout: Some(out.stdout),
        stderr: Some(out.stderr),
        changes,
        ..ExecuteResponse::default()
    }
}

pub(crate) fn failure_response(e: ExecError) -> ExecuteResponse {
    let mut output = combine_output(&e.stdout, &e.stderr);
    if output.is_empty() {
        output = e.message.clone();
    }

    ExecuteResponse {
        success: false,
        output: Some(output),
        stdout: Some(e.stdout),
        stderr: Some(e.stderr),
        error: Some(e.message),
        code: e.code,
        signal: e.signal,
        ..ExecuteResponse::default()
    }
}
