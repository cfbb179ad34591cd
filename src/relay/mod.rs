//! HTTP front of the relay: `GET /test` and `POST /execute`.
//!
//! The panel's UI runs in a different origin than the relay, so every
//! response carries permissive CORS headers and preflights are answered by
//! the CORS layer.

mod execute_routes;
pub mod types;

use axum::http::header::CONTENT_TYPE;
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::RelayState;

/// Build the router (exposed for testing).
pub fn build_router(state: Arc<RelayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/test", get(execute_routes::test_connection))
        .route("/execute", post(execute_routes::execute))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn start_server(
    state: Arc<RelayState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), String> {
    let bind_addr = state.config().bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| format!("Failed to bind {bind_addr}: {e}"))?;
    let addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {e}"))?;
    tracing::info!("Listening on {} port {}", addr.ip(), addr.port());

    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| format!("Relay server error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::types::{ExecuteResponse, NO_OUTPUT_SENTINEL};
    use super::*;
    use crate::config::RelayConfig;
    use crate::shell::{BackgroundChild, ExecError, ExecFailureKind, ShellAdapter, ShellOutput};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures_util::future::BoxFuture;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tower::ServiceExt;

    /// Adapter that records every call and replies from a script.
    #[derive(Default)]
    struct ScriptedShell {
        ran: Mutex<Vec<String>>,
        spawned: AtomicU32,
        reply: Mutex<Option<Result<ShellOutput, ExecError>>>,
    }

    impl ScriptedShell {
        fn replying(reply: Result<ShellOutput, ExecError>) -> Arc<Self> {
            let shell = Self::default();
            *shell.reply.lock() = Some(reply);
            Arc::new(shell)
        }

        fn ran(&self) -> Vec<String> {
            self.ran.lock().clone()
        }
    }

    impl ShellAdapter for ScriptedShell {
        fn run(&self, command: &str) -> BoxFuture<'_, Result<ShellOutput, ExecError>> {
            self.ran.lock().push(command.to_string());
            let reply = self
                .reply
                .lock()
                .clone()
                .unwrap_or_else(|| Ok(ShellOutput::default()));
            Box::pin(async move { reply })
        }

        fn spawn_detached(&self, _command: &str) -> Result<BackgroundChild, String> {
            let n = self.spawned.fetch_add(1, Ordering::SeqCst);
            Ok(BackgroundChild {
                pid: 7000 + n,
                exited: Box::pin(futures_util::future::pending()),
            })
        }
    }

    fn router_with(shell: Arc<ScriptedShell>) -> Router {
        let state = RelayState::with_adapter(RelayConfig::default(), shell);
        build_router(Arc::new(state))
    }

    fn execute_req(body: &str) -> Request<Body> {
        Request::post("/execute")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("build POST request")
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_endpoint_welcomes() {
        let app = router_with(Arc::new(ScriptedShell::default()));
        let (status, json) = send(app, Request::get("/test").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Welcome to the server.");
    }

    #[tokio::test]
    async fn status_scenario_returns_clean_output() {
        let shell = ScriptedShell::replying(Ok(ShellOutput {
            stdout: "clean\n".into(),
            stderr: String::new(),
        }));
        let app = router_with(shell.clone());

        let (status, json) = send(app, execute_req(r#"{"command":"vervids status"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json,
            serde_json::json!({
                "success": true,
                "output": "clean\n",
                "stdout": "clean\n",
                "stderr": ""
            })
        );
        assert_eq!(shell.ran(), vec!["vervids status"]);
    }

    #[tokio::test]
    async fn disallowed_command_is_rejected_without_running() {
        let shell = Arc::new(ScriptedShell::default());
        let app = router_with(shell.clone());

        let (status, json) = send(app, execute_req(r#"{"command":"rm -rf /"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            json,
            serde_json::json!({"success": false, "error": "Only vervids commands are allowed"})
        );
        assert!(shell.ran().is_empty());
        assert_eq!(shell.spawned.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_bodies_are_rejected() {
        let bodies = [
            "",
            "not json",
            "{}",
            r#"{"command": 42}"#,
            r#"{"command": null}"#,
            r#"{"command": ""}"#,
        ];
        for body in bodies {
            let shell = Arc::new(ScriptedShell::default());
            let (status, json) = send(router_with(shell.clone()), execute_req(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {body:?}");
            assert_eq!(json["error"], "Command is required", "body {body:?}");
            assert!(shell.ran().is_empty());
        }
    }

    #[tokio::test]
    async fn whitespace_command_fails_prefix_check() {
        let shell = Arc::new(ScriptedShell::default());
        let (status, json) = send(router_with(shell), execute_req(r#"{"command":"   "}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Only vervids commands are allowed");
    }

    #[tokio::test]
    async fn empty_output_gets_sentinel() {
        let shell = ScriptedShell::replying(Ok(ShellOutput::default()));
        let (status, json) =
            send(router_with(shell), execute_req(r#"{"command":"vervids add comp.aepx"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["output"], NO_OUTPUT_SENTINEL);
        assert!(json.get("changes").is_none());
    }

    #[tokio::test]
    async fn execution_failure_is_500_with_details() {
        let shell = ScriptedShell::replying(Err(ExecError {
            kind: ExecFailureKind::NonZeroExit,
            message: "Command failed with exit code 1: vervids commit".into(),
            stdout: String::new(),
            stderr: "fatal: not a vervids project\n".into(),
            code: Some(1),
            signal: None,
        }));
        let (status, json) =
            send(router_with(shell), execute_req(r#"{"command":"vervids commit"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let resp: ExecuteResponse = serde_json::from_value(json).unwrap();
        assert!(!resp.success);
        assert_eq!(resp.code, Some(1));
        assert_eq!(resp.output.as_deref(), Some("fatal: not a vervids project\n"));
        assert_eq!(
            resp.error.as_deref(),
            Some("Command failed with exit code 1: vervids commit")
        );
    }

    #[tokio::test]
    async fn serve_twice_spawns_once_with_same_pid() {
        let shell = Arc::new(ScriptedShell::default());
        let state = Arc::new(RelayState::with_adapter(RelayConfig::default(), shell.clone()));

        let (s1, first) = send(
            build_router(state.clone()),
            execute_req(r#"{"command":"vervids serve"}"#),
        )
        .await;
        let (s2, second) = send(
            build_router(state.clone()),
            execute_req(r#"{"command":"vervids serve"}"#),
        )
        .await;

        assert_eq!(s1, StatusCode::OK);
        assert_eq!(s2, StatusCode::OK);
        assert_eq!(first["success"], true);
        assert_eq!(second["success"], true);
        assert_eq!(first["pid"], 7000);
        assert_eq!(second["pid"], 7000);
        assert_eq!(shell.spawned.load(Ordering::SeqCst), 1);
        assert!(shell.ran().is_empty(), "serve must not run in the foreground");
        assert!(second["output"].as_str().unwrap().contains("already running"));
    }

    #[tokio::test]
    async fn cors_preflight_allows_any_origin() {
        let app = router_with(Arc::new(ScriptedShell::default()));
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/execute")
            .header("origin", "file://")
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "content-type")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let headers = resp.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        let methods = headers["access-control-allow-methods"].to_str().unwrap();
        assert!(methods.contains("POST"));
        assert!(methods.contains("OPTIONS"));
        let allowed = headers["access-control-allow-headers"].to_str().unwrap();
        assert!(allowed.eq_ignore_ascii_case("content-type"));
    }

    #[tokio::test]
    async fn simple_responses_carry_cors_header() {
        let app = router_with(Arc::new(ScriptedShell::default()));
        let req = Request::get("/test")
            .header("origin", "file://")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial_test::serial]
    async fn real_shell_reports_missing_binary_as_failure() {
        let shell = crate::shell::LoginShell::new(std::time::Duration::from_secs(20), 1024 * 1024)
            .with_shell("/bin/sh");
        let config = RelayConfig {
            command_prefix: "vervids-not-installed".into(),
            ..RelayConfig::default()
        };
        let state = Arc::new(RelayState::with_adapter(config, Arc::new(shell)));
        let (status, json) = send(
            build_router(state),
            execute_req(r#"{"command":"vervids-not-installed status"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], 127);
        assert!(!json["output"].as_str().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial_test::serial]
    async fn slow_command_times_out_with_partial_output() {
        let shell = crate::shell::LoginShell::new(std::time::Duration::from_millis(300), 1024 * 1024)
            .with_shell("/bin/sh");
        let config = RelayConfig {
            command_prefix: "echo".into(),
            ..RelayConfig::default()
        };
        let state = Arc::new(RelayState::with_adapter(config, Arc::new(shell)));

        let start = std::time::Instant::now();
        let (status, json) = send(
            build_router(state),
            execute_req(r#"{"command":"echo syncing; sleep 30"}"#),
        )
        .await;
        let elapsed = start.elapsed();

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["success"], false);
        assert_eq!(json["signal"], "SIGKILL");
        assert_eq!(json["stdout"], "syncing\n");
        assert!(json["output"].as_str().unwrap().contains("syncing"));
        assert!(json["error"].as_str().unwrap().contains("timed out"));
        assert!(elapsed < std::time::Duration::from_secs(5), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn server_binds_and_shuts_down() {
        let config = RelayConfig {
            port: 0,
            ..RelayConfig::default()
        };
        let state = Arc::new(RelayState::with_adapter(
            config,
            Arc::new(ScriptedShell::default()),
        ));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(start_server(state, async {
            let _ = rx.await;
        }));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(()).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .expect("server should stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
