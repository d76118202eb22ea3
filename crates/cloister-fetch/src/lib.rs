//! `fetchDelegate`: an async capability performing HTTP GET requests on the
//! host on behalf of sandboxed code.
//!
//! The sandbox receives a plain object:
//!
//! ```text
//! { ok, status, statusText, headers: { name: value }, data }
//! ```
//!
//! where `data` is the response body parsed as JSON. Transport errors and
//! bodies that are not JSON settle the sandbox promise as a failure.

mod error;
mod guard;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use cloister::{AsyncHostFn, BoxError, Capability, CapabilityKind, Value};
use reqwest::{Client, header::HeaderMap};
use url::Url;

pub use crate::error::{Error, Result};

/// Name the delegate is bound under.
pub const CAPABILITY_NAME: &str = "fetchDelegate";

const DEFAULT_USER_AGENT: &str = concat!("cloister-fetch/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct FetchDelegate {
    client: Client,
    deny_private: bool,
}

impl FetchDelegate {
    #[must_use]
    pub fn builder() -> FetchDelegateBuilder {
        FetchDelegateBuilder::default()
    }

    /// Wrap the delegate as a registry entry named [`CAPABILITY_NAME`].
    #[must_use]
    pub fn into_capability(self) -> Capability {
        Capability::new(CAPABILITY_NAME, CapabilityKind::Async(Arc::new(self)))
    }

    /// GET `url` and describe the response.
    ///
    /// # Errors
    /// Fails on invalid or disallowed URLs, transport errors, and response
    /// bodies that are not JSON.
    pub async fn fetch(&self, url: &str) -> Result<serde_json::Value> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(Error::UnsupportedScheme(other.to_string())),
        }
        if self.deny_private {
            guard::check_public(&url).await?;
        }

        tracing::debug!(%url, "delegate: starting fetch");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        tracing::debug!(status = status.as_u16(), "delegate: response status");

        let headers = header_object(response.headers());
        let body = response.bytes().await?;
        let data: serde_json::Value = serde_json::from_slice(&body).map_err(Error::InvalidJson)?;

        Ok(serde_json::json!({
            "ok": status.is_success(),
            "status": status.as_u16(),
            "statusText": status.canonical_reason().unwrap_or_default(),
            "headers": headers,
            "data": data,
        }))
    }
}

#[async_trait]
impl AsyncHostFn for FetchDelegate {
    async fn call(&self, args: Vec<Value>) -> core::result::Result<Value, BoxError> {
        let url: String = args
            .first()
            .ok_or(Error::InvalidArgument(None))?
            .to_serde()
            .map_err(|e| Error::InvalidArgument(Some(e)))?;
        let response = self.fetch(&url).await.inspect_err(|err| {
            tracing::debug!(%url, error = %err, "delegate: fetch failed");
        })?;
        Ok(Value::from_json_value(&response).map_err(Error::from)?)
    }
}

/// Repeated headers are joined with `", "`.
fn header_object(headers: &HeaderMap) -> serde_json::Map<String, serde_json::Value> {
    let mut out = serde_json::Map::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        match out.get_mut(name.as_str()) {
            Some(serde_json::Value::String(existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            _ => {
                out.insert(name.as_str().to_string(), value.into_owned().into());
            }
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct FetchDelegateBuilder {
    user_agent: String,
    timeout: Option<Duration>,
    deny_private: bool,
}

impl Default for FetchDelegateBuilder {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Some(Duration::from_secs(30)),
            deny_private: false,
        }
    }
}

impl FetchDelegateBuilder {
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Per-request timeout; `None` waits indefinitely.
    #[must_use]
    pub const fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Refuse URLs that point at loopback, private or link-local addresses.
    #[must_use]
    pub const fn deny_private_addresses(mut self, deny: bool) -> Self {
        self.deny_private = deny;
        self
    }

    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn build(self) -> Result<FetchDelegate> {
        let mut builder = Client::builder().user_agent(self.user_agent);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(FetchDelegate {
            client: builder.build()?,
            deny_private: self.deny_private,
        })
    }
}
