//! HTTP transport abstraction.
//!
//! The dispatcher talks to the network through the [`Transport`] trait
//! so its retry logic stays testable without sockets. The production
//! implementation is [`HttpTransport`], which keeps one cached
//! `reqwest` client per `(host, port, scheme)` tuple and rebuilds it
//! after a transport-level failure.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;

/// Default per-request timeout for the production transport
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// User agent string sent with every request
const USER_AGENT: &str = concat!("strato-client/", env!("CARGO_PKG_VERSION"));

/// URL scheme of a request target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(Error::Protocol(format!("unsupported URL scheme '{other}'"))),
        }
    }
}

/// Which auth header family the target service expects.
///
/// Storage-class services authenticate with `X-Storage-Token`;
/// everything else uses `X-Auth-Token`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServiceFamily {
    #[default]
    Default,
    Storage,
}

/// Key under which the transport caches one live connection.
///
/// The full tuple matters: reusing a connection across schemes or ports
/// against the same hostname hands back a stale channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
}

/// One logical HTTP call, immutable per attempt.
///
/// `attempt` is incremented by the dispatcher on each transport retry
/// of the same descriptor.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    pub method: Method,
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
    /// Path including any query string
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub family: ServiceFamily,
    pub attempt: u32,
}

impl RequestDescriptor {
    pub fn new(
        method: Method,
        host: impl Into<String>,
        port: u16,
        scheme: Scheme,
        path: impl Into<String>,
    ) -> Self {
        Self {
            method,
            host: host.into(),
            port,
            scheme,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            family: ServiceFamily::Default,
            attempt: 0,
        }
    }

    /// Build a descriptor from an absolute URL, carrying its query
    /// string along with the path.
    pub fn from_url(method: Method, url: &Url) -> Result<Self, Error> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::Protocol(format!("URL '{url}' has no host")))?;
        let scheme = Scheme::parse(url.scheme())?;
        let port = url.port().unwrap_or_else(|| scheme.default_port());
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        Ok(Self::new(method, host, port, scheme, path))
    }

    /// Set a header; last write wins and names compare
    /// case-insensitively (HeaderMap semantics).
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn json(self, value: &Value) -> Self {
        self.body(value.to_string().into_bytes())
    }

    pub fn family(mut self, family: ServiceFamily) -> Self {
        self.family = family;
        self
    }

    pub fn connection_key(&self) -> ConnectionKey {
        ConnectionKey {
            host: self.host.clone(),
            port: self.port,
            scheme: self.scheme,
        }
    }

    /// Absolute target URL of this descriptor
    pub fn url_string(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme.as_str(),
            self.host,
            self.port,
            self.path
        )
    }
}

/// The single explicit response interface handed back by a transport:
/// status, headers, body. Nothing downstream inspects transport
/// internals.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, lossily
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON
    pub fn json(&self) -> Result<Value, Error> {
        serde_json::from_slice(&self.body).map_err(|e| {
            Error::Protocol(format!(
                "response body is not valid JSON ({e}): {}",
                self.text()
            ))
        })
    }
}

/// A connection-level fault: timeout, reset, truncated stream.
///
/// Transport errors are always considered transient; the dispatcher
/// retries them with a fresh connection up to its attempt bound.
#[derive(Debug, Error)]
#[error("transport failure talking to {host}: {message}")]
pub struct TransportError {
    pub host: String,
    pub message: String,
}

/// Sends one request and returns the raw response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, descriptor: &RequestDescriptor) -> Result<RawResponse, TransportError>;

    /// Drop any cached connection for `key`; the next send reconnects.
    fn reset(&self, key: &ConnectionKey);
}

/// Production transport over `reqwest`, one cached client per
/// connection key.
pub struct HttpTransport {
    clients: Mutex<HashMap<ConnectionKey, reqwest::Client>>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn client_for(&self, key: &ConnectionKey) -> Result<reqwest::Client, TransportError> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(key) {
            return Ok(client.clone());
        }
        debug!(host = %key.host, port = key.port, scheme = key.scheme.as_str(), "opening connection");
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout)
            .build()
            .map_err(|e| TransportError {
                host: key.host.clone(),
                message: format!("unable to connect: {e}"),
            })?;
        clients.insert(key.clone(), client.clone());
        Ok(client)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, descriptor: &RequestDescriptor) -> Result<RawResponse, TransportError> {
        let key = descriptor.connection_key();
        let client = self.client_for(&key)?;

        let url = descriptor.url_string();
        trace!(method = %descriptor.method, %url, attempt = descriptor.attempt, "sending request");

        let mut request = client
            .request(descriptor.method.clone(), &url)
            .headers(descriptor.headers.clone());
        if let Some(body) = &descriptor.body {
            request = request.body(body.clone());
        }

        let response = request.send().await.map_err(|e| TransportError {
            host: descriptor.host.clone(),
            message: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError {
                host: descriptor.host.clone(),
                message: format!("truncated response body: {e}"),
            })?
            .to_vec();

        trace!(%url, status, bytes = body.len(), "received response");
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    fn reset(&self, key: &ConnectionKey) {
        debug!(host = %key.host, "dropping cached connection");
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.remove(key);
    }
}
