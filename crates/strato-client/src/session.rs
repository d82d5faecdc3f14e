//! Authentication session and service catalog.
//!
//! A [`Session`] holds the current token, the service catalog returned
//! at login, and the expiry-retry policy. It is mutated only by
//! [`Session::login`]; the dispatcher reads it on every call.

use std::collections::HashMap;

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::transport::{RequestDescriptor, Transport};

/// Credentials exchanged for a token at the auth endpoint.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub api_key: String,
    /// Full URL of the login endpoint, e.g. `https://auth.example.com/v1.1/auth`
    pub auth_url: Url,
}

/// One regional entry in the service catalog.
#[derive(Clone, Debug, Deserialize)]
pub struct CatalogEndpoint {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(rename = "publicURL")]
    pub public_url: String,
    #[serde(rename = "v1Default", default)]
    pub v1_default: bool,
}

/// Per-session mapping from service name to regional base URLs.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServiceCatalog(HashMap<String, Vec<CatalogEndpoint>>);

impl ServiceCatalog {
    /// All `(region, base URL)` pairs for a service, optionally
    /// filtered by region. Unknown services yield an empty list.
    pub fn endpoints(
        &self,
        service: &str,
        region: Option<&str>,
    ) -> Result<Vec<(Option<String>, Url)>> {
        let entries = match self.0.get(service) {
            Some(entries) => entries,
            None => return Ok(Vec::new()),
        };
        let mut out = Vec::new();
        for entry in entries {
            if let Some(wanted) = region {
                if entry.region.as_deref() != Some(wanted) {
                    continue;
                }
            }
            let url = Url::parse(&entry.public_url).map_err(|e| {
                Error::Protocol(format!(
                    "catalog entry for '{service}' has invalid URL '{}': {e}",
                    entry.public_url
                ))
            })?;
            out.push((entry.region.clone(), url));
        }
        Ok(out)
    }

    /// The single base URL for a service, available only when no region
    /// was requested and exactly one catalog entry exists.
    pub fn default_endpoint(&self, service: &str) -> Result<Option<Url>> {
        let all = self.endpoints(service, None)?;
        match all.as_slice() {
            [(_, url)] => Ok(Some(url.clone())),
            _ => Ok(None),
        }
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Authenticated session state.
///
/// Invariant: `token_valid()` implies the token is non-empty and was
/// accepted by the server in the last login exchange.
#[derive(Debug)]
pub struct Session {
    credentials: Credentials,
    token: Option<String>,
    token_valid: bool,
    catalog: ServiceCatalog,
    retry_on_expiry: bool,
}

impl Session {
    pub fn new(credentials: Credentials, retry_on_expiry: bool) -> Self {
        Self {
            credentials,
            token: None,
            token_valid: false,
            catalog: ServiceCatalog::default(),
            retry_on_expiry,
        }
    }

    /// Exchange the credentials for a token and service catalog.
    ///
    /// A single POST to the auth endpoint; never retries internally.
    /// Retry-on-expiry is the dispatcher's responsibility.
    pub async fn login<T: Transport + ?Sized>(&mut self, transport: &T) -> Result<()> {
        debug!(auth_url = %self.credentials.auth_url, user = %self.credentials.username, "logging in");
        let body = json!({
            "credentials": {
                "username": self.credentials.username,
                "key": self.credentials.api_key,
            }
        });
        let descriptor = RequestDescriptor::from_url(Method::POST, &self.credentials.auth_url)?
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .json(&body);

        let response = match transport.send(&descriptor).await {
            Ok(response) => response,
            Err(e) => {
                self.token_valid = false;
                return Err(Error::AuthenticationFailed {
                    status: 0,
                    body: format!("unable to reach auth endpoint: {e}"),
                });
            }
        };

        if !response.is_success() {
            self.token_valid = false;
            return Err(Error::AuthenticationFailed {
                status: response.status,
                body: response.text(),
            });
        }

        let parsed = response.json()?;
        let token = parsed
            .pointer("/auth/token/id")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Protocol("login response is missing auth.token.id".into()))?
            .to_string();
        let catalog_value = parsed
            .pointer("/auth/serviceCatalog")
            .cloned()
            .ok_or_else(|| Error::Protocol("login response is missing auth.serviceCatalog".into()))?;
        let catalog: ServiceCatalog = serde_json::from_value(catalog_value)
            .map_err(|e| Error::Protocol(format!("malformed service catalog: {e}")))?;

        info!(services = catalog.0.len(), "authenticated");
        self.token = Some(token);
        self.catalog = catalog;
        self.token_valid = true;
        Ok(())
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn token_valid(&self) -> bool {
        self.token_valid
    }

    /// Mark the current token as rejected by the server.
    pub(crate) fn invalidate_token(&mut self) {
        self.token_valid = false;
    }

    pub fn retry_on_expiry(&self) -> bool {
        self.retry_on_expiry
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }
}
