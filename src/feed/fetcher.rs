use async_trait::async_trait;
use futures::StreamExt;
use reqwest::redirect::Policy;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default per-fetch ceiling.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
/// Default response body limit.
pub const MAX_DOCUMENT_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while retrieving a feed document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// The fetch did not finish within the ceiling
    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Received fewer bytes than Content-Length
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Transport failure reported by a non-HTTP fetcher
    #[error("Fetch failed: {0}")]
    Other(String),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }
}

/// Retrieves raw feed bytes for a URL. No retries at this layer.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Supplies the bearer credential for outgoing fetches.
///
/// Queried on every request so the owner can refresh the token in place.
pub trait CredentialSource: Send + Sync {
    fn bearer_token(&self) -> Option<SecretString>;
}

/// A fixed credential (config file or environment).
pub struct StaticCredential(SecretString);

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }
}

impl From<SecretString> for StaticCredential {
    fn from(token: SecretString) -> Self {
        Self(token)
    }
}

impl CredentialSource for StaticCredential {
    fn bearer_token(&self) -> Option<SecretString> {
        Some(self.0.clone())
    }
}

/// Runs `fetch` under `ceiling`, mapping expiry to [`FetchError::Timeout`].
pub async fn fetch_with_timeout(
    fetcher: &dyn DocumentFetcher,
    url: &str,
    ceiling: Duration,
) -> Result<Vec<u8>, FetchError> {
    tokio::time::timeout(ceiling, fetcher.fetch(url))
        .await
        .map_err(|_| FetchError::Timeout(ceiling))?
}

/// Builds the HTTP client used for feed fetches.
///
/// `timeout` is the client-side request timeout; the pipeline still applies
/// its own ceiling around every fetch.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .redirect(redirect_policy())
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .timeout(timeout)
        .build()
}

/// At most 3 redirect hops, failing on a loop.
fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

/// reqwest-backed fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
    credentials: Option<Arc<dyn CredentialSource>>,
    max_size: usize,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            credentials: None,
            max_size: MAX_DOCUMENT_SIZE,
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(url);
        if let Some(token) = self.credentials.as_ref().and_then(|c| c.bearer_token()) {
            tracing::trace!("Bearer authentication configured");
            request = request.header("Authorization", format!("Bearer {}", token.expose_secret()));
        }

        let response = request.send().await.map_err(FetchError::Network)?;

        // 4xx and 5xx fail immediately; retry is a pipeline-level decision
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, self.max_size).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // EDGE-005: connection dropped mid-body
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
