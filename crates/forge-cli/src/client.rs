//! Blocking HTTP client for the forge server.
//!
//! All endpoints speak JSON. Input errors arrive as `{ok:false, error}`
//! with a 4xx status; those become `anyhow` errors carrying the server's
//! message. Semantic outcomes (conflicted submissions) are 200 bodies and
//! are returned to the caller untouched.

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

/// Thin wrapper over `reqwest::blocking` with the server base URL.
pub struct ApiClient {
    base: String,
    http: reqwest::blocking::Client,
}

impl ApiClient {
    /// Build a client for the given base URL.
    ///
    /// # Errors
    /// Fails when the underlying HTTP client cannot be constructed.
    pub fn new(base: &str) -> Result<Self> {
        Ok(Self {
            base: base.trim_end_matches('/').to_owned(),
            http: reqwest::blocking::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .context("build http client")?,
        })
    }

    /// Percent-encode a state name for use in a path segment.
    #[must_use]
    pub fn encode_state(name: &str) -> String {
        name.replace('/', "%2F")
    }

    /// GET a JSON document.
    ///
    /// # Errors
    /// Network failures and `{ok:false}` responses.
    pub fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{path}", self.base);
        let response = self
            .http
            .get(&url)
            .send()
            .with_context(|| format!("GET {url}"))?;
        Self::decode(response, &url)
    }

    /// POST a JSON body, returning the JSON response.
    ///
    /// # Errors
    /// Network failures and `{ok:false}` responses with non-2xx status.
    pub fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{path}", self.base);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .with_context(|| format!("POST {url}"))?;
        Self::decode(response, &url)
    }

    fn decode(response: reqwest::blocking::Response, url: &str) -> Result<Value> {
        let status = response.status();
        let body: Value = response
            .json()
            .with_context(|| format!("decode response from {url}"))?;
        if status.is_success() {
            return Ok(body);
        }
        let detail = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        Err(anyhow!("{url} failed ({status}): {detail}"))
    }
}
