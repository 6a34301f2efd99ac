//! API client for the storefront REST backend.
//!
//! Reads go through `get` with rate-limit backoff and are normalized into
//! plain vectors. Writes go through `send_ladder`, which walks a
//! `VerbLadder` until one request shape is accepted.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ApiError, LadderSuccess, VerbLadder};
use crate::models::{BlogPost, Course, EnrollmentRequest, ListPayload, Notification, Product};
use crate::mutation::FlagBackend;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for the storefront backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a new API client rooted at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, header::InvalidHeaderValue> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        if let Some(ref token) = self.token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(&url)
                .headers(self.auth_headers()?)
                .query(query)
                .send()
                .await
                .with_context(|| format!("Failed to send GET request to {}", url))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    return response
                        .json()
                        .await
                        .with_context(|| format!("Failed to parse JSON response from {}", url));
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<T>> {
        let payload: ListPayload<T> = self.get(path, query).await?;
        let items = payload.into_vec();
        debug!(path, count = items.len(), "Fetched list");
        Ok(items)
    }

    /// Send one logical write, falling back through `ladder` on rejection.
    ///
    /// Each attempt is a fresh request; `body` is attached only on steps
    /// that carry one.
    pub async fn send_ladder(
        &self,
        path: &str,
        ladder: &VerbLadder,
        body: &Value,
    ) -> Result<LadderSuccess, ApiError> {
        let url = self.url(path);
        let headers = self
            .auth_headers()
            .map_err(|e| ApiError::InvalidResponse(format!("Invalid bearer token: {}", e)))?;

        let result = ladder
            .run(|step| {
                let mut request = self
                    .client
                    .request(step.method.clone(), &url)
                    .headers(headers.clone());
                if step.with_body {
                    request = request.json(body);
                }
                let step = step.clone();
                let url = url.clone();

                async move {
                    let response = request.send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        let error = ApiError::from_status(status, &body);
                        debug!(url = %url, %step, status = status.as_u16(), error = %error, "Request variant failed");
                    }
                    Ok::<u16, ApiError>(status.as_u16())
                }
            })
            .await;

        match &result {
            Ok(success) if success.attempts > 1 => {
                debug!(url = %url, step = %ladder.steps()[success.step], attempts = success.attempts, "Write accepted after fallback");
            }
            Ok(_) => {}
            Err(e) => warn!(url = %url, error = %e, "Write rejected"),
        }
        result
    }

    // ===== Data Fetching Methods =====

    pub async fn fetch_notifications(&self) -> Result<Vec<Notification>> {
        self.get_list("notifications", &[])
            .await
            .context("Failed to fetch notifications")
    }

    pub async fn fetch_products(&self) -> Result<Vec<Product>> {
        self.get_list("products", &[])
            .await
            .context("Failed to fetch products")
    }

    pub async fn fetch_courses(&self) -> Result<Vec<Course>> {
        self.get_list("courses", &[])
            .await
            .context("Failed to fetch courses")
    }

    pub async fn fetch_blog_posts(&self) -> Result<Vec<BlogPost>> {
        self.get_list("blogs", &[])
            .await
            .context("Failed to fetch blog posts")
    }

    pub async fn fetch_blog_post(&self, id: &str) -> Result<BlogPost> {
        self.get(&format!("blogs/{}", id), &[])
            .await
            .with_context(|| format!("Failed to fetch blog post {}", id))
    }

    /// Enrollment request history for one course.
    pub async fn fetch_enrollments(&self, course_id: &str) -> Result<Vec<EnrollmentRequest>> {
        self.get_list("enrollments", &[("courseId", course_id)])
            .await
            .with_context(|| format!("Failed to fetch enrollments for course {}", course_id))
    }
}

// ===== Notification writes =====

impl FlagBackend for ApiClient {
    async fn mark(&self, id: &str) -> Result<(), ApiError> {
        let ladder = VerbLadder::standard(reqwest::Method::PUT);
        self.send_ladder(&format!("notifications/{}/read", id), &ladder, &json!({ "read": true }))
            .await
            .map(|_| ())
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let ladder = VerbLadder::standard(reqwest::Method::DELETE);
        self.send_ladder(&format!("notifications/{}", id), &ladder, &json!({ "id": id }))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// What the fake server saw for one request.
    #[derive(Debug, Clone, PartialEq)]
    struct Seen {
        method: String,
        path: String,
        body: String,
    }

    /// Minimal HTTP/1.1 server answering each request with the next scripted
    /// status and body, one request per connection.
    async fn serve(script: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<Seen>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            for (status, body) in script {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                log.lock().unwrap().push(request);
                let response = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        (format!("http://{}", addr), seen)
    }

    async fn read_request(socket: &mut TcpStream) -> Seen {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            if n == 0 {
                break buf.len();
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let content_length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        while buf.len() < head_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let mut request_line = head.lines().next().unwrap_or_default().split(' ');
        Seen {
            method: request_line.next().unwrap_or_default().to_string(),
            path: request_line.next().unwrap_or_default().to_string(),
            body: String::from_utf8_lossy(&buf[head_end..]).to_string(),
        }
    }

    fn client(base_url: &str) -> ApiClient {
        ApiClient::new(base_url, Duration::from_secs(5))
            .unwrap()
            .with_token("secret".to_string())
    }

    #[test]
    fn test_url_joining() {
        let api = ApiClient::new("https://api.example.com/v1/", Duration::from_secs(1)).unwrap();
        assert_eq!(api.base_url(), "https://api.example.com/v1");
        assert_eq!(api.url("/products"), "https://api.example.com/v1/products");
        assert_eq!(api.url("blogs/7"), "https://api.example.com/v1/blogs/7");
    }

    #[test]
    fn test_auth_headers() {
        let api = client("http://localhost");
        let headers = api.auth_headers().unwrap();
        assert_eq!(headers[header::AUTHORIZATION], "Bearer secret");

        let anonymous = ApiClient::new("http://localhost", Duration::from_secs(1)).unwrap();
        assert!(!anonymous.auth_headers().unwrap().contains_key(header::AUTHORIZATION));
    }

    #[tokio::test]
    async fn test_fetch_products_unwraps_envelope() {
        let (base, seen) = serve(vec![(
            200,
            r#"{"data": [{"id": 1, "name": "Mug", "price": 9.5}]}"#,
        )])
        .await;

        let products = client(&base).fetch_products().await.unwrap();

        assert_eq!(products.len(), 1);
        assert_eq!(products[0].id, "1");
        assert_eq!(seen.lock().unwrap()[0].path, "/products");
    }

    #[tokio::test]
    async fn test_fetch_enrollments_sends_course_filter() {
        let (base, seen) = serve(vec![(200, r#"[]"#)]).await;

        let requests = client(&base).fetch_enrollments("c42").await.unwrap();

        assert!(requests.is_empty());
        assert_eq!(seen.lock().unwrap()[0].path, "/enrollments?courseId=c42");
    }

    #[tokio::test]
    async fn test_fetch_maps_error_status() {
        let (base, _) = serve(vec![(404, r#"{"message": "gone"}"#)]).await;

        let err = client(&base).fetch_blog_post("9").await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_read_falls_back_without_body() {
        let (base, seen) = serve(vec![(415, ""), (200, "{}")]).await;

        FlagBackend::mark(&client(&base), "n1").await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].method, "PUT");
        assert_eq!(seen[0].path, "/notifications/n1/read");
        assert_eq!(seen[0].body, r#"{"read":true}"#);
        assert_eq!(seen[1].method, "PUT");
        assert!(seen[1].body.is_empty());
    }

    #[tokio::test]
    async fn test_delete_switches_to_post_on_405() {
        let (base, seen) = serve(vec![(405, ""), (204, "")]).await;

        FlagBackend::delete(&client(&base), "n3").await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen[0].method, "DELETE");
        assert_eq!(seen[1].method, "POST");
        assert_eq!(seen[1].path, "/notifications/n3");
        assert_eq!(seen[1].body, r#"{"id":"n3"}"#);
    }

    #[tokio::test]
    async fn test_ladder_exhausted_over_http() {
        let (base, seen) = serve(vec![(415, ""), (405, ""), (500, "boom")]).await;

        let err = FlagBackend::mark(&client(&base), "n2").await.unwrap_err();

        assert!(matches!(
            err,
            ApiError::LadderExhausted {
                attempts: 3,
                last_status: 500
            }
        ));
        assert_eq!(seen.lock().unwrap().len(), 3);
    }
}
