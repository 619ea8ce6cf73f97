pub mod contents;
pub mod transfer;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, header::HeaderMap};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::sleep;
use url::Url;

/// Uniform error shape for every remote call: a human-readable message plus
/// the upstream status code when one was received.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    pub message: String,
    pub status: Option<u16>,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), status: None }
    }

    fn upstream(status: StatusCode, body: &str) -> Self {
        // GitHub error bodies carry a "message" field; fall back to raw text.
        let detail = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| body.trim().to_string());
        Self {
            message: format!("GitHub API Error: {} (Status: {})", detail, status.as_u16()),
            status: Some(status.as_u16()),
        }
    }

    pub fn is_not_found(&self) -> bool { self.status == Some(404) }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            message: format!("GitHub API request failed: {err}"),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

/// Explicit retry policy for the client: capped exponential backoff over
/// rate limits and server errors. Client errors are never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay: Duration::from_secs(1), max_delay: Duration::from_secs(60) }
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1 << attempt.min(16)).min(self.max_delay)
    }

    pub fn allows_retry(&self, attempt: u32) -> bool { attempt + 1 < self.max_attempts }
}

fn is_retryable(status: StatusCode, headers: &HeaderMap) -> bool {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    // 403 doubles as GitHub's legacy rate-limit status.
    status == StatusCode::FORBIDDEN
        && headers.get("x-ratelimit-remaining").and_then(|v| v.to_str().ok()) == Some("0")
}

const USER_AGENT: &str = concat!("repopush/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    base: Url,
    retry: RetryPolicy,
}

impl GitHubClient {
    pub fn new(api_base: &str) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()?;
        let mut base = Url::parse(api_base)
            .map_err(|e| ApiError::new(format!("Invalid API base URL: {e}")))?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Ok(Self { http, base, retry: RetryPolicy::default() })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Single entry point for every REST call. The credential is passed per
    /// call; `expect` treats one specific status (e.g. 204 for DELETE) as a
    /// bodyless success.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        token: &str,
        body: Option<&Value>,
        expect: Option<StatusCode>,
    ) -> Result<Value, ApiError> {
        let url = self
            .base
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::new(format!("Invalid API path {path:?}: {e}")))?;
        let mut attempt = 0;
        loop {
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .header("Authorization", format!("token {token}"))
                .header("Accept", "application/vnd.github+json");
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await?;
            let status = response.status();
            if expect == Some(status) {
                return Ok(Value::Null);
            }
            if status.is_success() {
                let text = response.text().await?;
                if text.is_empty() {
                    return Ok(Value::Null);
                }
                return serde_json::from_str(&text)
                    .map_err(|e| ApiError::new(format!("Invalid JSON from GitHub: {e}")));
            }
            let retryable = is_retryable(status, response.headers());
            let text = response.text().await.unwrap_or_default();
            if retryable && self.retry.allows_retry(attempt) {
                let delay = self.retry.delay(attempt);
                tracing::warn!(
                    "GitHub returned {} for {}, retrying in {:?} (attempt {}/{})",
                    status,
                    path,
                    delay,
                    attempt + 1,
                    self.retry.max_attempts
                );
                sleep(delay).await;
                attempt += 1;
                continue;
            }
            return Err(ApiError::upstream(status, &text));
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatedRepo {
    pub owner: String,
    pub name: String,
    pub html_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sha: String,
}

impl TreeEntry {
    pub fn blob(path: String, sha: String) -> Self {
        Self { path, mode: "100644".to_string(), kind: "blob".to_string(), sha }
    }
}

/// Git data primitives needed by the publish engine. The engine depends on
/// this trait rather than the concrete client so tests can run against an
/// in-memory remote.
#[async_trait]
pub trait RepoApi: Send + Sync {
    /// Resolve the login of the token's user.
    async fn current_user(&self, token: &str) -> Result<String, ApiError>;

    async fn create_repo(
        &self,
        token: &str,
        name: &str,
        description: &str,
        private: bool,
        auto_init: bool,
    ) -> Result<CreatedRepo, ApiError>;

    async fn delete_repo(&self, token: &str, owner: &str, repo: &str) -> Result<(), ApiError>;

    /// Create a blob from base64 content, returning its sha.
    async fn create_blob(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        content_base64: &str,
    ) -> Result<String, ApiError>;

    async fn create_tree(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        entries: &[TreeEntry],
    ) -> Result<String, ApiError>;

    async fn create_commit(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        message: &str,
        tree_sha: &str,
        parents: &[String],
    ) -> Result<String, ApiError>;

    /// Current sha of a reference like `heads/main`.
    async fn get_ref_sha(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> Result<String, ApiError>;

    /// Create a fully qualified reference like `refs/heads/main`.
    async fn create_ref(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        reference: &str,
        sha: &str,
    ) -> Result<(), ApiError>;

    /// Force-advance an existing reference like `heads/main`.
    async fn update_ref(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        reference: &str,
        sha: &str,
    ) -> Result<(), ApiError>;
}

fn str_field<'a>(value: &'a Value, pointer: &str) -> Result<&'a str, ApiError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::new(format!("Missing field {pointer} in GitHub response")))
}

#[async_trait]
impl RepoApi for GitHubClient {
    async fn current_user(&self, token: &str) -> Result<String, ApiError> {
        let value = self.request(Method::GET, "user", token, None, None).await?;
        Ok(str_field(&value, "/login")?.to_string())
    }

    async fn create_repo(
        &self,
        token: &str,
        name: &str,
        description: &str,
        private: bool,
        auto_init: bool,
    ) -> Result<CreatedRepo, ApiError> {
        let body = json!({
            "name": name,
            "description": description,
            "private": private,
            "auto_init": auto_init,
        });
        let value = self.request(Method::POST, "user/repos", token, Some(&body), None).await?;
        Ok(CreatedRepo {
            owner: str_field(&value, "/owner/login")?.to_string(),
            name: str_field(&value, "/name")?.to_string(),
            html_url: str_field(&value, "/html_url")?.to_string(),
        })
    }

    async fn delete_repo(&self, token: &str, owner: &str, repo: &str) -> Result<(), ApiError> {
        self.request(
            Method::DELETE,
            &format!("repos/{owner}/{repo}"),
            token,
            None,
            Some(StatusCode::NO_CONTENT),
        )
        .await?;
        Ok(())
    }

    async fn create_blob(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        content_base64: &str,
    ) -> Result<String, ApiError> {
        let body = json!({ "content": content_base64, "encoding": "base64" });
        let value = self
            .request(Method::POST, &format!("repos/{owner}/{repo}/git/blobs"), token, Some(&body), None)
            .await?;
        Ok(str_field(&value, "/sha")?.to_string())
    }

    async fn create_tree(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        entries: &[TreeEntry],
    ) -> Result<String, ApiError> {
        let body = json!({ "tree": entries });
        let value = self
            .request(Method::POST, &format!("repos/{owner}/{repo}/git/trees"), token, Some(&body), None)
            .await?;
        Ok(str_field(&value, "/sha")?.to_string())
    }

    async fn create_commit(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        message: &str,
        tree_sha: &str,
        parents: &[String],
    ) -> Result<String, ApiError> {
        let body = json!({ "message": message, "tree": tree_sha, "parents": parents });
        let value = self
            .request(Method::POST, &format!("repos/{owner}/{repo}/git/commits"), token, Some(&body), None)
            .await?;
        Ok(str_field(&value, "/sha")?.to_string())
    }

    async fn get_ref_sha(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> Result<String, ApiError> {
        let value = self
            .request(Method::GET, &format!("repos/{owner}/{repo}/git/ref/{reference}"), token, None, None)
            .await?;
        Ok(str_field(&value, "/object/sha")?.to_string())
    }

    async fn create_ref(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        reference: &str,
        sha: &str,
    ) -> Result<(), ApiError> {
        let body = json!({ "ref": reference, "sha": sha });
        self.request(Method::POST, &format!("repos/{owner}/{repo}/git/refs"), token, Some(&body), None)
            .await?;
        Ok(())
    }

    async fn update_ref(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        reference: &str,
        sha: &str,
    ) -> Result<(), ApiError> {
        let body = json!({ "sha": sha, "force": true });
        self.request(
            Method::PATCH,
            &format!("repos/{owner}/{repo}/git/refs/{reference}"),
            token,
            Some(&body),
            None,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn test_retry_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        // Capped at max_delay for deep retries.
        assert_eq!(policy.delay(10), Duration::from_secs(60));
        assert!(policy.allows_retry(3));
        assert!(!policy.allows_retry(4));
    }

    #[test]
    fn test_retryable_statuses() {
        let empty = HeaderMap::new();
        assert!(is_retryable(StatusCode::INTERNAL_SERVER_ERROR, &empty));
        assert!(is_retryable(StatusCode::BAD_GATEWAY, &empty));
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS, &empty));
        assert!(!is_retryable(StatusCode::NOT_FOUND, &empty));
        assert!(!is_retryable(StatusCode::UNPROCESSABLE_ENTITY, &empty));
        assert!(!is_retryable(StatusCode::FORBIDDEN, &empty));

        let mut rate_limited = HeaderMap::new();
        rate_limited.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        assert!(is_retryable(StatusCode::FORBIDDEN, &rate_limited));
        let mut remaining = HeaderMap::new();
        remaining.insert("x-ratelimit-remaining", HeaderValue::from_static("12"));
        assert!(!is_retryable(StatusCode::FORBIDDEN, &remaining));
    }

    fn serve_responses(
        listener: tokio::net::TcpListener,
        responses: Vec<&'static [u8]>,
    ) -> tokio::task::JoinHandle<usize> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        tokio::spawn(async move {
            let mut served = 0;
            for response in responses {
                let Ok((mut stream, _)) = listener.accept().await else { break };
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(response).await;
                served += 1;
            }
            served
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_request_retries_server_errors() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = serve_responses(listener, vec![
            b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
            b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 19\r\nconnection: close\r\n\r\n{\"login\":\"octocat\"}",
        ]);
        let client = GitHubClient::new(&format!("http://{addr}")).unwrap().with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        });
        let login = client.current_user("token").await.unwrap();
        assert_eq!(login, "octocat");
        assert_eq!(server.await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_client_errors_fail_without_retry() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = serve_responses(listener, vec![
            b"HTTP/1.1 404 Not Found\r\ncontent-type: application/json\r\ncontent-length: 23\r\nconnection: close\r\n\r\n{\"message\":\"Not Found\"}",
            b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        ]);
        let client = GitHubClient::new(&format!("http://{addr}")).unwrap();
        let err = client.current_user("token").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.message, "GitHub API Error: Not Found (Status: 404)");
        // Only the first canned response was consumed.
        drop(client);
        server.abort();
    }

    #[test]
    fn test_upstream_error_prefers_message_body() {
        let err = ApiError::upstream(StatusCode::UNPROCESSABLE_ENTITY, r#"{"message":"name already exists"}"#);
        assert_eq!(err.message, "GitHub API Error: name already exists (Status: 422)");
        assert_eq!(err.status, Some(422));

        let plain = ApiError::upstream(StatusCode::BAD_GATEWAY, "upstream timeout");
        assert_eq!(plain.message, "GitHub API Error: upstream timeout (Status: 502)");
    }
}
