//! Keep-alive HTTP session for the connection pool, built on `reqwest`

use std::time::Duration;
use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use tracing::{debug, warn};
use crate::config::ConnectionPoolConfig;
use crate::error::{NetworkError, PerfError, PerfResult};
use super::connection_pool::{Session, SessionFactory};

/// Largest response body a session will buffer by default: 10 MiB
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Path (or URL) resolved against the factory's base URL
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: &str, target: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            target: target.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new("GET", target)
    }

    pub fn post(target: &str, body: impl Into<Vec<u8>>) -> Self {
        Self::new("POST", target).with_body(body)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn request_failed(message: impl Into<String>) -> PerfError {
    NetworkError::RequestFailed { message: message.into() }.into()
}

fn invalid_response(message: impl Into<String>) -> PerfError {
    NetworkError::InvalidResponse { message: message.into() }.into()
}

fn classify(error: reqwest::Error, request_timeout: Duration) -> PerfError {
    if error.is_timeout() {
        PerfError::timeout("http.request", request_timeout)
    } else if error.is_connect() {
        NetworkError::ConnectionFailed { message: error.to_string() }.into()
    } else if error.is_body() || error.is_decode() {
        invalid_response(error.to_string())
    } else {
        request_failed(error.to_string())
    }
}

/// One `reqwest` client holding at most one idle keep-alive connection.
///
/// Transport failures close the session so the pool retires it on release
/// instead of reissuing it.
#[derive(Debug)]
pub struct HttpSession {
    client: Option<Client>,
    base_url: Url,
    request_timeout: Duration,
    max_body_bytes: usize,
}

impl HttpSession {
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn send(&self, client: &Client, request: HttpRequest) -> PerfResult<HttpResponse> {
        let url = self
            .base_url
            .join(&request.target)
            .map_err(|e| PerfError::invalid_argument("target", format!("{}: {}", request.target, e)))?;
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| PerfError::invalid_argument("method", format!("invalid HTTP method {}", request.method)))?;

        let mut builder = client.request(method, url).body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let mut response = builder
            .send()
            .await
            .map_err(|e| classify(e, self.request_timeout))?;

        if let Some(length) = response.content_length() {
            if length > self.max_body_bytes as u64 {
                return Err(invalid_response(format!(
                    "declared body of {} bytes exceeds limit of {}",
                    length, self.max_body_bytes
                )));
            }
        }

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
            .collect();

        // Chunked or undeclared bodies are bounded as they stream in
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| classify(e, self.request_timeout))? {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(invalid_response(format!("body exceeds limit of {} bytes", self.max_body_bytes)));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

#[async_trait]
impl Session for HttpSession {
    type Request = HttpRequest;
    type Response = HttpResponse;

    fn is_open(&self) -> bool {
        self.client.is_some()
    }

    async fn execute(&mut self, request: HttpRequest) -> PerfResult<HttpResponse> {
        let client = self.client.clone().ok_or_else(|| request_failed("session is closed"))?;

        match self.send(&client, request).await {
            Ok(response) => Ok(response),
            // Bad input leaves the connection usable
            Err(e @ PerfError::InvalidArgument { .. }) => Err(e),
            Err(e) => {
                warn!(base_url = %self.base_url, error = %e, "HTTP request failed, closing session");
                self.close();
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        if self.client.take().is_some() {
            debug!(base_url = %self.base_url, "HTTP session closed");
        }
    }
}

/// Creates sessions against one base URL (`http://` or `https://`)
#[derive(Debug, Clone)]
pub struct HttpSessionFactory {
    base_url: Url,
    connect_timeout: Duration,
    request_timeout: Duration,
    idle_timeout: Duration,
    max_body_bytes: usize,
}

impl HttpSessionFactory {
    pub fn new(base_url: &str) -> PerfResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PerfError::invalid_argument("base_url", format!("{}: {}", base_url, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(PerfError::invalid_argument(
                "base_url",
                format!("unsupported scheme {}", base_url.scheme()),
            ));
        }

        Ok(Self {
            base_url,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        })
    }

    /// Request and idle timeouts taken from the pool settings
    pub fn from_config(base_url: &str, config: &ConnectionPoolConfig) -> PerfResult<Self> {
        let mut factory = Self::new(base_url)?;
        factory.request_timeout = config.timeout();
        factory.idle_timeout = config.max_idle_time();
        Ok(factory)
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, request_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    type Session = HttpSession;

    async fn create(&self) -> PerfResult<HttpSession> {
        let client = Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .pool_max_idle_per_host(1)
            .pool_idle_timeout(self.idle_timeout)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| NetworkError::ConnectionFailed {
                message: format!("{}: {}", self.base_url, e),
            })?;

        Ok(HttpSession {
            client: Some(client),
            base_url: self.base_url.clone(),
            request_timeout: self.request_timeout,
            max_body_bytes: self.max_body_bytes,
        })
    }
}
