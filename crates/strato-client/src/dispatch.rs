//! Request dispatch with bounded retry and transparent reauthentication.
//!
//! The dispatcher owns the session and the transport. Its resilience
//! policy has two independent retry classes:
//!
//! - transport-level faults (timeout, reset, truncated stream) are
//!   retried on a fresh connection up to [`MAX_TRANSPORT_ATTEMPTS`]
//!   sends of the same descriptor;
//! - an expired auth token triggers exactly one re-login per call,
//!   after which the original descriptor is retried with its attempt
//!   counter untouched. A second rejection fails the call instead of
//!   recursing.

use reqwest::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use url::Url;

use crate::error::{classify, classify_bad_request, Error, Result};
use crate::job::AsyncJob;
use crate::session::{Credentials, Session};
use crate::transport::{
    HttpTransport, RawResponse, RequestDescriptor, ServiceFamily, Transport,
};

/// Total sends of one descriptor before giving up on transport faults
pub const MAX_TRANSPORT_ATTEMPTS: u32 = 5;

const X_AUTH_TOKEN: HeaderName = HeaderName::from_static("x-auth-token");
const X_STORAGE_TOKEN: HeaderName = HeaderName::from_static("x-storage-token");

/// What a successful dispatch hands back to a resource wrapper.
#[derive(Debug)]
pub enum Outcome {
    /// 200 (or another 2xx with a parseable body): the parsed payload
    Body(Value),
    /// 202: a pollable handle for the asynchronous operation
    Job(AsyncJob),
    /// 204 or a bodyless 2xx
    NoContent,
}

impl Outcome {
    /// The parsed body, failing on job handles and empty responses.
    pub fn into_body(self) -> Result<Value> {
        match self {
            Outcome::Body(value) => Ok(value),
            Outcome::Job(job) => Err(Error::Protocol(format!(
                "expected an immediate result, got async job '{}'",
                job.job_id()
            ))),
            Outcome::NoContent => {
                Err(Error::Protocol("expected a body, got an empty response".into()))
            }
        }
    }
}

/// Issues logical HTTP calls against the session's services.
pub struct Dispatcher<T: Transport = HttpTransport> {
    transport: T,
    session: Mutex<Session>,
}

/// Builder for [`Dispatcher`]: configure, then build.
pub struct DispatcherBuilder<T: Transport = HttpTransport> {
    credentials: Credentials,
    retry_on_expiry: bool,
    transport: T,
}

impl Dispatcher<HttpTransport> {
    pub fn builder(credentials: Credentials) -> DispatcherBuilder<HttpTransport> {
        DispatcherBuilder {
            credentials,
            retry_on_expiry: true,
            transport: HttpTransport::new(),
        }
    }

    /// Build a dispatcher over the production transport and log in.
    pub async fn connect(credentials: Credentials) -> Result<Self> {
        let dispatcher = Self::builder(credentials).build();
        dispatcher.login().await?;
        Ok(dispatcher)
    }
}

impl<T: Transport> DispatcherBuilder<T> {
    /// Whether an expired token is healed by re-login (default) or
    /// fails the call immediately.
    pub fn retry_on_expiry(mut self, retry: bool) -> Self {
        self.retry_on_expiry = retry;
        self
    }

    /// Swap in a different transport (tests inject scripted ones here).
    pub fn transport<U: Transport>(self, transport: U) -> DispatcherBuilder<U> {
        DispatcherBuilder {
            credentials: self.credentials,
            retry_on_expiry: self.retry_on_expiry,
            transport,
        }
    }

    pub fn build(self) -> Dispatcher<T> {
        Dispatcher {
            transport: self.transport,
            session: Mutex::new(Session::new(self.credentials, self.retry_on_expiry)),
        }
    }
}

impl<T: Transport> Dispatcher<T> {
    /// Exchange credentials for a fresh token and service catalog.
    pub async fn login(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        session.login(&self.transport).await
    }

    /// Read access to the session (token state, service catalog).
    pub async fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().await
    }

    /// All `(region, base URL)` pairs for a catalog service.
    pub async fn endpoints(
        &self,
        service: &str,
        region: Option<&str>,
    ) -> Result<Vec<(Option<String>, Url)>> {
        self.session.lock().await.catalog().endpoints(service, region)
    }

    /// The single base URL for a service with exactly one catalog entry.
    pub async fn default_endpoint(&self, service: &str) -> Result<Option<Url>> {
        self.session.lock().await.catalog().default_endpoint(service)
    }

    /// Send one logical call, retrying per the dual policy, and return
    /// the raw response once it is outside the dispatcher's own status
    /// mapping (401/500/503/413).
    pub async fn execute(&self, descriptor: &RequestDescriptor) -> Result<RawResponse> {
        let mut descriptor = descriptor.clone();
        prepare_headers(&mut descriptor);
        let mut reauthenticated = false;

        loop {
            self.attach_token(&mut descriptor).await;

            let sent = self.transport.send(&descriptor).await;
            let raw = match sent {
                Ok(raw) => raw,
                Err(fault) => {
                    if descriptor.attempt + 1 >= MAX_TRANSPORT_ATTEMPTS {
                        return Err(Error::Connection {
                            message: format!(
                                "unable to reconnect to {} after {} attempts: {fault}",
                                descriptor.host, MAX_TRANSPORT_ATTEMPTS
                            ),
                        });
                    }
                    warn!(
                        host = %descriptor.host,
                        attempt = descriptor.attempt,
                        error = %fault,
                        "transport fault, reconnecting"
                    );
                    self.transport.reset(&descriptor.connection_key());
                    descriptor.attempt += 1;
                    continue;
                }
            };

            match check_status(raw) {
                Ok(raw) => return Ok(raw),
                Err(Error::ExpiredAuthToken) => {
                    let retry = {
                        let mut session = self.session.lock().await;
                        session.invalidate_token();
                        session.retry_on_expiry()
                    };
                    if !retry {
                        return Err(Error::Connection {
                            message: "authentication token expired and reauthentication is disabled"
                                .into(),
                        });
                    }
                    if reauthenticated {
                        // A fresh token was rejected too; recursing
                        // further cannot terminate.
                        return Err(Error::Connection {
                            message: "authentication token rejected again after re-login".into(),
                        });
                    }
                    debug!(host = %descriptor.host, "token expired, re-authenticating");
                    self.login().await?;
                    reauthenticated = true;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Branch a vetted raw response into the caller-facing outcome.
    pub fn handle_result(&self, raw: RawResponse) -> Result<Outcome> {
        match raw.status {
            200 => Ok(Outcome::Body(raw.json()?)),
            // Action endpoints (reboot, delete, node changes) answer
            // 202 with an empty or non-job body; only a payload
            // carrying a jobId starts the poller.
            202 => match serde_json::from_slice::<Value>(&raw.body) {
                Ok(body) if body.get("jobId").is_some() => {
                    Ok(Outcome::Job(AsyncJob::from_response(&raw)?))
                }
                _ => Ok(Outcome::NoContent),
            },
            204 => Ok(Outcome::NoContent),
            404 => Err(Error::NotFound {
                message: "resource was not found".into(),
                status: raw.status,
                body: raw.text(),
            }),
            400 => Err(classify_bad_request(raw.status, &raw.body)),
            status if raw.is_success() => {
                // The original treats every 20x as success; keep the
                // body when one is present.
                debug!(status, "success status outside the documented envelope");
                Ok(raw.json().map(Outcome::Body).unwrap_or(Outcome::NoContent))
            }
            status => Err(classify(status, &raw.body)),
        }
    }

    /// `execute` + `handle_result`: the collaborator interface used by
    /// every resource wrapper.
    pub async fn dispatch(&self, descriptor: &RequestDescriptor) -> Result<Outcome> {
        let raw = self.execute(descriptor).await?;
        self.handle_result(raw)
    }

    pub async fn get(&self, url: &Url) -> Result<Outcome> {
        self.dispatch(&RequestDescriptor::from_url(Method::GET, url)?)
            .await
    }

    pub async fn post(&self, url: &Url, body: &Value) -> Result<Outcome> {
        self.dispatch(&RequestDescriptor::from_url(Method::POST, url)?.json(body))
            .await
    }

    pub async fn put(&self, url: &Url, body: &Value) -> Result<Outcome> {
        self.dispatch(&RequestDescriptor::from_url(Method::PUT, url)?.json(body))
            .await
    }

    pub async fn delete(&self, url: &Url) -> Result<Outcome> {
        self.dispatch(&RequestDescriptor::from_url(Method::DELETE, url)?)
            .await
    }

    async fn attach_token(&self, descriptor: &mut RequestDescriptor) {
        let session = self.session.lock().await;
        if !session.token_valid() {
            return;
        }
        let Some(token) = session.token() else { return };
        let Ok(value) = HeaderValue::from_str(token) else {
            return;
        };
        let name = match descriptor.family {
            ServiceFamily::Default => X_AUTH_TOKEN,
            ServiceFamily::Storage => X_STORAGE_TOKEN,
        };
        descriptor.headers.insert(name, value);
    }
}

fn prepare_headers(descriptor: &mut RequestDescriptor) {
    if descriptor.body.is_some() && !descriptor.headers.contains_key(CONTENT_TYPE) {
        descriptor
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    if !descriptor.headers.contains_key(ACCEPT) {
        descriptor
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
    }
}

/// Map the statuses the dispatcher owns; everything else passes through.
fn check_status(raw: RawResponse) -> Result<RawResponse> {
    match raw.status {
        401 => Err(Error::ExpiredAuthToken),
        500 => Err(Error::ServerFault {
            status: raw.status,
            body: raw.text(),
        }),
        503 => Err(Error::ServiceUnavailable {
            status: raw.status,
            body: raw.text(),
        }),
        413 => Err(Error::OverLimit {
            status: raw.status,
            body: raw.text(),
        }),
        _ => Ok(raw),
    }
}
