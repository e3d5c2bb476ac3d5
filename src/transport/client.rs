//! HTTP transport for the listing and object endpoints.
//!
//! [`HttpTransport`] issues exactly one POST per call and turns the response
//! into a JSON document or a [`TransportError`]. It knows nothing about
//! pagination, identifiers or retries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::{debug, instrument, trace};
use url::Url;

use super::constants::{
    BROWSER_USER_AGENT, CONNECT_TIMEOUT_SECS, LISTING_PATH, OBJECT_PATH, POOL_MAX_IDLE_PER_HOST,
    REQUEST_TIMEOUT_SECS,
};
use super::error::TransportError;

/// One request to the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// Endpoint path relative to the base URL (e.g. `/get/page`).
    pub path: String,
    /// JSON body.
    pub payload: Value,
}

impl ApiRequest {
    /// Creates a request for `path` with a JSON body.
    #[must_use]
    pub fn new(path: impl Into<String>, payload: Value) -> Self {
        Self {
            path: path.into(),
            payload,
        }
    }

    /// Builds a listing page request.
    #[must_use]
    pub fn listing(entity: &str, page: u64, length: u32, filter: &Value) -> Self {
        Self::new(
            LISTING_PATH,
            json!({
                "page": page,
                "entity": entity,
                "length": length,
                "filter": filter,
            }),
        )
    }

    /// Builds a full-object request.
    #[must_use]
    pub fn object(entity: &str, uuid: &str) -> Self {
        Self::new(OBJECT_PATH, json!({ "entity": entity, "uuid": uuid }))
    }
}

/// Issues single requests against the remote service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` once and returns the parsed JSON object.
    async fn request(&self, request: &ApiRequest) -> Result<Value, TransportError>;
}

/// Reqwest-backed [`Transport`].
///
/// Created once and shared (it is cheap to clone) so all requests reuse one
/// connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Creates a transport with default timeouts and no cookie.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidRequest`] if the base URL is not a
    /// valid absolute URL or the client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        Self::with_options(base_url, None, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    /// Creates a transport with an optional cookie header and request timeout.
    ///
    /// The cookie is attached to every request, listing and object alike.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidRequest`] if the base URL is invalid,
    /// the cookie is not a valid header value, or the client cannot be built.
    #[instrument(level = "debug", skip(cookie))]
    pub fn with_options(
        base_url: &str,
        cookie: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        Url::parse(base_url).map_err(|e| {
            TransportError::invalid_request(base_url, format!("invalid base URL: {e}"))
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        if let Some(cookie) = cookie.filter(|c| !c.trim().is_empty()) {
            let value = HeaderValue::from_str(cookie.trim()).map_err(|e| {
                TransportError::invalid_request(base_url, format!("invalid cookie header: {e}"))
            })?;
            headers.insert(COOKIE, value);
        }

        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(timeout)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .gzip(true)
            .build()
            .map_err(|e| TransportError::invalid_request(base_url, e.to_string()))?;

        debug!(timeout_secs = timeout.as_secs(), "created HTTP transport");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Returns the base URL with any trailing slash removed.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(level = "trace", skip(self, request), fields(path = %request.path))]
    async fn request(&self, request: &ApiRequest) -> Result<Value, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);

        let response = self
            .client
            .post(&url)
            .json(&request.payload)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&request.path, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::http_status(&request.path, status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(&request.path, e))?;
        trace!(bytes = body.len(), "received response body");

        parse_document(&request.path, &body)
    }
}

/// Parses a response body into a JSON object.
///
/// # Errors
///
/// Returns a parse-kind [`TransportError`] for empty, malformed, or
/// non-object bodies.
pub fn parse_document(path: &str, body: &[u8]) -> Result<Value, TransportError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(TransportError::empty_body(path));
    }
    let value: Value =
        serde_json::from_slice(body).map_err(|e| TransportError::malformed(path, e))?;
    if !value.is_object() {
        return Err(TransportError::not_an_object(path));
    }
    Ok(value)
}
