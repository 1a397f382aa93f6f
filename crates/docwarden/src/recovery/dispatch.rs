//! Continuation worker client.
//!
//! The worker resumes a job from its first pending task. It must tolerate
//! duplicate resume calls for the same job, since overlapping detector runs
//! may both dispatch.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::loader::resolve_worker_token;
use crate::config::WorkerConfig;
use crate::error::{DispatchError, DocwardenError};

/// Maximum length for error bodies kept in reports and logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Truncates a worker error body so a misbehaving endpoint cannot flood
/// logs or operator reports.
fn sanitize_error_body(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(MAX_ERROR_BODY_LENGTH).collect();
    if chars.next().is_some() {
        format!("{}... (truncated)", head)
    } else {
        head
    }
}

/// Something that can be asked to resume processing a job.
#[async_trait]
pub trait ContinuationWorker: Send + Sync {
    async fn resume(&self, job_id: &str) -> Result<(), DispatchError>;

    /// Whether a dispatch can succeed at all. The detector leaves leases in
    /// place when this is false.
    fn is_configured(&self) -> bool {
        true
    }
}

#[derive(Serialize)]
struct ResumeRequest<'a> {
    job_id: &'a str,
}

/// HTTP client for the next-prompt processor endpoint.
pub struct HttpContinuationWorker {
    client: Client,
    endpoint: String,
    token: Option<SecretString>,
}

impl fmt::Debug for HttpContinuationWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpContinuationWorker")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpContinuationWorker {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
        })
    }

    /// Builds a client from the `worker` config section, resolving the token.
    pub fn from_config(config: &WorkerConfig) -> Result<Self, DocwardenError> {
        let endpoint = config.endpoint().ok_or(DispatchError::NotConfigured)?;
        let token = resolve_worker_token(config)?;
        Ok(Self::new(endpoint, token, config.timeout())?)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ContinuationWorker for HttpContinuationWorker {
    async fn resume(&self, job_id: &str) -> Result<(), DispatchError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&ResumeRequest { job_id });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(job_id, status = status.as_u16(), "Continuation worker accepted job");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DispatchError::Rejected {
            status: status.as_u16(),
            body: sanitize_error_body(&body),
        })
    }
}

/// Worker used when no endpoint is configured. The detector sees
/// `is_configured() == false` and reports stuck jobs without releasing them.
#[derive(Debug, Default)]
pub struct UnconfiguredWorker;

#[async_trait]
impl ContinuationWorker for UnconfiguredWorker {
    async fn resume(&self, _job_id: &str) -> Result<(), DispatchError> {
        Err(DispatchError::NotConfigured)
    }

    fn is_configured(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Seen {
        calls: Arc<Mutex<Vec<(String, Option<String>)>>>,
    }

    async fn accept(
        State(seen): State<Seen>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> StatusCode {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let job_id = body["job_id"].as_str().unwrap_or_default().to_string();
        seen.calls.lock().unwrap().push((job_id, auth));
        StatusCode::OK
    }

    async fn reject() -> (StatusCode, String) {
        (StatusCode::INTERNAL_SERVER_ERROR, "x".repeat(500))
    }

    async fn spawn_worker(seen: Seen) -> String {
        let app = Router::new()
            .route("/functions/v1/process-next-prompt", post(accept))
            .route("/broken", post(reject))
            .with_state(seen);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_sanitize_error_body() {
        assert_eq!(sanitize_error_body("short"), "short");
        let long = "é".repeat(250);
        let sanitized = sanitize_error_body(&long);
        assert!(sanitized.ends_with("... (truncated)"));
        assert_eq!(sanitized.chars().filter(|c| *c == 'é').count(), 200);
    }

    #[tokio::test]
    async fn test_resume_posts_job_id_with_bearer_token() {
        let seen = Seen::default();
        let base = spawn_worker(seen.clone()).await;
        let worker = HttpContinuationWorker::new(
            format!("{}/functions/v1/process-next-prompt", base),
            Some(SecretString::from("service-key")),
            Duration::from_secs(5),
        )
        .unwrap();

        worker.resume("job-42").await.unwrap();

        let calls = seen.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![("job-42".to_string(), Some("Bearer service-key".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_non_success_status_is_rejection() {
        let base = spawn_worker(Seen::default()).await;
        let worker =
            HttpContinuationWorker::new(format!("{}/broken", base), None, Duration::from_secs(5))
                .unwrap();

        match worker.resume("job-1").await {
            Err(DispatchError::Rejected { status, body }) => {
                assert_eq!(status, 500);
                assert!(body.ends_with("(truncated)"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_worker_is_http_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let worker =
            HttpContinuationWorker::new(format!("http://{}/x", addr), None, Duration::from_secs(2))
                .unwrap();
        assert!(matches!(
            worker.resume("job-1").await,
            Err(DispatchError::Http(_))
        ));
    }

    #[test]
    fn test_from_config_requires_endpoint() {
        let config = WorkerConfig::default();
        assert!(matches!(
            HttpContinuationWorker::from_config(&config),
            Err(DocwardenError::Dispatch(DispatchError::NotConfigured))
        ));

        let config = WorkerConfig {
            base_url: Some("http://127.0.0.1:9".to_string()),
            token: Some("secret-token".to_string()),
            ..WorkerConfig::default()
        };
        let worker = HttpContinuationWorker::from_config(&config).unwrap();
        assert_eq!(
            worker.endpoint(),
            "http://127.0.0.1:9/functions/v1/process-next-prompt"
        );
        assert!(!format!("{:?}", worker).contains("secret-token"));
    }

    #[tokio::test]
    async fn test_unconfigured_worker_always_fails() {
        assert!(matches!(
            UnconfiguredWorker.resume("j").await,
            Err(DispatchError::NotConfigured)
        ));
        assert!(!UnconfiguredWorker.is_configured());
        let http = HttpContinuationWorker::new("http://127.0.0.1:9/x", None, Duration::from_secs(1)).unwrap();
        assert!(http.is_configured());
    }
}
