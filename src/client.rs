//! HTTP clients the panel uses: one for the relay, one for the background
//! API that `vervids serve` brings up.

use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::relay::types::{ExecuteRequest, ExecuteResponse, TestResponse};

/// Why a request to the relay or the background API produced no usable answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// No response within the request timeout
    Timeout,
    /// Connection refused, DNS failure, reset mid-body and the like
    Connect(String),
    /// Non-2xx status without a structured result; `error` comes from the body when present
    Http { status: u16, error: Option<String> },
    /// A 2xx body that is not the expected JSON
    Malformed(String),
}

impl ClientError {
    /// Errors that mean "nothing is listening", which drive the retry cycle.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connect(_))
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timed out"),
            Self::Connect(e) => write!(f, "connection failed: {e}"),
            Self::Http {
                status,
                error: Some(e),
            } => write!(f, "HTTP {status}: {e}"),
            Self::Http {
                status,
                error: None,
            } => write!(f, "HTTP {status}"),
            Self::Malformed(e) => write!(f, "malformed response: {e}"),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Connect(e.to_string())
        }
    }
}

fn build_http() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {e}"))
}

fn parse_base(base_url: &str) -> Result<Url, String> {
    let url = Url::parse(base_url).map_err(|e| format!("Invalid URL '{base_url}': {e}"))?;
    if url.cannot_be_a_base() {
        return Err(format!("Invalid URL '{base_url}': cannot be a base"));
    }
    Ok(url)
}

/// Append path segments to `base`, percent-encoding each one.
fn join_segments(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Pull `error` out of a JSON body, if there is one.
fn body_error(body: &[u8]) -> Option<String> {
    let v: Value = serde_json::from_slice(body).ok()?;
    v.get("error")?.as_str().map(str::to_string)
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

pub struct RelayClient {
    base: Url,
    http: reqwest::Client,
    probe_timeout: Duration,
    execute_timeout: Duration,
}

impl RelayClient {
    pub fn new(
        base_url: &str,
        probe_timeout: Duration,
        execute_timeout: Duration,
    ) -> Result<Self, String> {
        Ok(Self {
            base: parse_base(base_url)?,
            http: build_http()?,
            probe_timeout,
            execute_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    /// `GET /test` with the short probe timeout.
    pub async fn ping(&self) -> Result<TestResponse, ClientError> {
        let resp = self
            .http
            .get(join_segments(&self.base, &["test"]))
            .timeout(self.probe_timeout)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                error: body_error(&body),
            });
        }
        serde_json::from_slice(&body).map_err(|e| ClientError::Malformed(e.to_string()))
    }

    /// `POST /execute`.
    ///
    /// Rejections (400) and execution failures (500) come back as `Ok` with
    /// `success: false`, since the relay shapes those into a full result.
    /// Only a non-2xx status without such a body becomes [`ClientError::Http`].
    pub async fn execute(&self, command: &str) -> Result<ExecuteResponse, ClientError> {
        let resp = self
            .http
            .post(join_segments(&self.base, &["execute"]))
            .timeout(self.execute_timeout)
            .json(&ExecuteRequest {
                command: command.to_string(),
            })
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;

        match serde_json::from_slice::<ExecuteResponse>(&body) {
            Ok(result) if status.is_success() || !result.success => Ok(result),
            Ok(_) => Err(ClientError::Http {
                status: status.as_u16(),
                error: body_error(&body),
            }),
            Err(e) if status.is_success() => Err(ClientError::Malformed(e.to_string())),
            Err(_) => Err(ClientError::Http {
                status: status.as_u16(),
                error: body_error(&body),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Background API
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    success: bool,
}

pub struct ApiClient {
    base: Url,
    http: reqwest::Client,
    probe_timeout: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str, probe_timeout: Duration) -> Result<Self, String> {
        Ok(Self {
            base: parse_base(base_url)?,
            http: build_http()?,
            probe_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    /// `GET /health`; only `{ "success": true }` counts as healthy.
    pub async fn health(&self) -> Result<(), ClientError> {
        let resp = self
            .http
            .get(join_segments(&self.base, &["health"]))
            .timeout(self.probe_timeout)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                error: body_error(&body),
            });
        }
        let health: HealthResponse =
            serde_json::from_slice(&body).map_err(|e| ClientError::Malformed(e.to_string()))?;
        if health.success {
            Ok(())
        } else {
            Err(ClientError::Http {
                status: status.as_u16(),
                error: Some("health check reported success=false".to_string()),
            })
        }
    }

    /// `GET /api/projects`, as opaque JSON.
    pub async fn projects(&self) -> Result<Value, ClientError> {
        self.get_json(&["api", "projects"]).await
    }

    /// `GET /api/projects/:id/commits`, as opaque JSON.
    pub async fn commits(&self, project_id: &str) -> Result<Value, ClientError> {
        self.get_json(&["api", "projects", project_id, "commits"])
            .await
    }

    async fn get_json(&self, segments: &[&str]) -> Result<Value, ClientError> {
        let resp = self
            .http
            .get(join_segments(&self.base, segments))
            .timeout(self.probe_timeout * 4)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                error: body_error(&body),
            });
        }
        serde_json::from_slice(&body).map_err(|e| ClientError::Malformed(e.to_string()))
    }
}
