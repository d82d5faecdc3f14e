//! Shared helpers for the crate's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::json;
use url::Url;

use crate::dispatch::Dispatcher;
use crate::session::Credentials;
use crate::transport::{ConnectionKey, RawResponse, RequestDescriptor, Transport, TransportError};

/// Replays a fixed sequence of transport results and records every
/// request it saw.
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    requests: Mutex<Vec<RequestDescriptor>>,
    pub(crate) resets: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Result<RawResponse, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            resets: AtomicUsize::new(0),
        }
    }

    pub(crate) fn requests(&self) -> Vec<RequestDescriptor> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for &ScriptedTransport {
    async fn send(&self, descriptor: &RequestDescriptor) -> Result<RawResponse, TransportError> {
        self.requests.lock().unwrap().push(descriptor.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .expect("script exhausted")
    }

    fn reset(&self, _key: &ConnectionKey) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn response(status: u16, body: &str) -> RawResponse {
    RawResponse {
        status,
        headers: HeaderMap::new(),
        body: body.as_bytes().to_vec(),
    }
}

pub(crate) fn fault() -> TransportError {
    TransportError {
        host: "compute.example.com".into(),
        message: "connection reset by peer".into(),
    }
}

pub(crate) fn login_ok() -> RawResponse {
    response(
        200,
        &json!({
            "auth": {
                "token": {"id": "tok-123"},
                "serviceCatalog": {
                    "cloudServersOpenStack": [
                        {"region": "ORD", "publicURL": "https://ord.servers.example.com/v2/1"}
                    ]
                }
            }
        })
        .to_string(),
    )
}

pub(crate) fn credentials() -> Credentials {
    Credentials {
        username: "user".into(),
        api_key: "key".into(),
        auth_url: Url::parse("https://auth.example.com/v1.1/auth").unwrap(),
    }
}

pub(crate) fn dispatcher(transport: &ScriptedTransport) -> Dispatcher<&ScriptedTransport> {
    Dispatcher::builder(credentials()).transport(transport).build()
}
