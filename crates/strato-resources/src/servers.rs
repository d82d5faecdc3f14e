//! Compute instances: listing, creation, actions, and status waits.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use strato_client::{fetch_all, Dispatcher, HttpTransport, Transport};
use tracing::debug;
use url::Url;

use crate::error::{ResourceError, Result};
use crate::{join_path, lenient_id, self_link, Link, COMPUTE_SERVICES};

/// Server metadata is capped at this many key/value pairs.
pub const MAX_METADATA_ITEMS: usize = 5;
/// At most this many personality files per create request.
pub const MAX_PERSONALITY_ITEMS: usize = 5;
/// Per-file payload cap in bytes, before base64 encoding.
pub const MAX_PERSONALITY_FILE_SIZE: usize = 10_000;
/// Server-side path length cap for a personality file.
pub const MAX_SERVER_PATH_LENGTH: usize = 255;

/// One compute instance as the API reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    pub name: String,
    pub status: Option<String>,
    pub progress: Option<i64>,
    #[serde(rename = "adminPass")]
    pub admin_pass: Option<String>,
    #[serde(rename = "hostId")]
    pub host_id: Option<String>,
    pub metadata: Option<Map<String, Value>>,
    pub addresses: Option<Value>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Server {
    /// The canonical URL for this server, from its `self` link.
    pub fn url(&self) -> Option<Url> {
        self_link(&self.links)
    }
}

/// A file injected into the instance at boot.
#[derive(Debug, Clone)]
pub struct PersonalityFile {
    pub remote_path: String,
    pub contents: Vec<u8>,
}

/// Region and attribute filters for [`ServerHandler::list`].
#[derive(Debug, Clone, Default)]
pub struct ServerFilter {
    region: Option<String>,
    name: Option<String>,
    status: Option<String>,
}

impl ServerFilter {
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    fn apply(&self, url: &mut Url) {
        let mut query = url.query_pairs_mut();
        if let Some(name) = &self.name {
            query.append_pair("name", name);
        }
        if let Some(status) = &self.status {
            query.append_pair("status", status);
        }
    }
}

/// Parameters for creating a server. `name`, `image_ref`, and
/// `flavor_ref` are required; metadata and personality files are
/// validated against the API caps before anything is sent.
#[derive(Debug, Clone)]
pub struct CreateServerRequest {
    name: String,
    image_ref: String,
    flavor_ref: String,
    metadata: BTreeMap<String, String>,
    personality: Vec<PersonalityFile>,
}

impl CreateServerRequest {
    pub fn new(
        name: impl Into<String>,
        image_ref: impl Into<String>,
        flavor_ref: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            image_ref: image_ref.into(),
            flavor_ref: flavor_ref.into(),
            metadata: BTreeMap::new(),
            personality: Vec::new(),
        }
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn personality_file(mut self, remote_path: impl Into<String>, contents: Vec<u8>) -> Self {
        self.personality.push(PersonalityFile {
            remote_path: remote_path.into(),
            contents,
        });
        self
    }

    fn validate(&self) -> Result<()> {
        if self.metadata.len() > MAX_METADATA_ITEMS {
            return Err(ResourceError::Validation(format!(
                "metadata is limited to a total of {MAX_METADATA_ITEMS} key/value pairs"
            )));
        }
        if self.personality.len() > MAX_PERSONALITY_ITEMS {
            return Err(ResourceError::Validation(format!(
                "personality files are limited to a total of {MAX_PERSONALITY_ITEMS} items"
            )));
        }
        for file in &self.personality {
            if file.contents.len() > MAX_PERSONALITY_FILE_SIZE {
                return Err(ResourceError::Validation(format!(
                    "data for {} exceeds the maximum size of {MAX_PERSONALITY_FILE_SIZE} bytes",
                    file.remote_path
                )));
            }
            if file.remote_path.len() > MAX_SERVER_PATH_LENGTH {
                return Err(ResourceError::Validation(format!(
                    "server-side path of {} exceeds the maximum length of {MAX_SERVER_PATH_LENGTH} characters",
                    file.remote_path
                )));
            }
        }
        Ok(())
    }

    fn to_body(&self) -> Result<Value> {
        self.validate()?;
        let mut server = json!({
            "name": self.name,
            "imageRef": self.image_ref,
            "flavorRef": self.flavor_ref,
        });
        if !self.metadata.is_empty() {
            server["metadata"] = json!(self.metadata);
        }
        if !self.personality.is_empty() {
            let files: Vec<Value> = self
                .personality
                .iter()
                .map(|file| {
                    json!({
                        "path": file.remote_path,
                        "contents": BASE64.encode(&file.contents),
                    })
                })
                .collect();
            server["personality"] = Value::Array(files);
        }
        Ok(json!({ "server": server }))
    }
}

/// Soft shutdown or power cycle, for [`ServerHandler::reboot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootKind {
    Soft,
    Hard,
}

impl RebootKind {
    fn as_str(self) -> &'static str {
        match self {
            RebootKind::Soft => "SOFT",
            RebootKind::Hard => "HARD",
        }
    }
}

pub struct ServerHandler<'a, T: Transport = HttpTransport> {
    dispatcher: &'a Dispatcher<T>,
}

impl<'a, T: Transport> ServerHandler<'a, T> {
    pub fn new(dispatcher: &'a Dispatcher<T>) -> Self {
        Self { dispatcher }
    }

    /// Every compute endpoint matching the filter's region, across both
    /// catalog service names.
    async fn bases(&self, region: Option<&str>) -> Result<Vec<Url>> {
        let mut bases = Vec::new();
        for service in COMPUTE_SERVICES {
            for (_, url) in self.dispatcher.endpoints(service, region).await? {
                bases.push(url);
            }
        }
        Ok(bases)
    }

    /// List servers across every matching region, following pagination
    /// links on each endpoint.
    pub async fn list(&self, filter: &ServerFilter) -> Result<Vec<Server>> {
        let bases = self.bases(filter.region.as_deref()).await?;
        let mut servers = Vec::new();
        for base in bases {
            let mut url = join_path(&base, &["servers", "detail"])?;
            filter.apply(&mut url);
            let merged = fetch_all(self.dispatcher, &url).await?;
            let Some(page) = merged.get("servers") else { continue };
            let mut parsed: Vec<Server> = serde_json::from_value(page.clone())
                .map_err(|e| strato_client::Error::Protocol(e.to_string()))?;
            servers.append(&mut parsed);
        }
        debug!(count = servers.len(), "listed servers");
        Ok(servers)
    }

    /// Fetch one server by its canonical URL.
    pub async fn get(&self, url: &Url) -> Result<Server> {
        let body = self.dispatcher.get(url).await?.into_body()?;
        parse_server(&body)
    }

    /// Create a server in the first compute endpoint of `region`. The
    /// admin password is only ever present in this response.
    pub async fn create(&self, region: Option<&str>, request: &CreateServerRequest) -> Result<Server> {
        let base = self
            .bases(region)
            .await?
            .into_iter()
            .next()
            .ok_or(ResourceError::NoEndpoint { service: "cloudServersOpenStack" })?;
        let url = join_path(&base, &["servers"])?;
        let body = self.dispatcher.post(&url, &request.to_body()?).await?.into_body()?;
        let server = parse_server(&body)?;
        debug!(id = %server.id, "created server");
        Ok(server)
    }

    pub async fn delete(&self, url: &Url) -> Result<()> {
        self.dispatcher.delete(url).await?;
        Ok(())
    }

    /// Set a new admin password. The API schedules a reboot for this.
    pub async fn change_password(&self, url: &Url, new_pass: &str) -> Result<()> {
        let action = join_path(url, &["action"])?;
        let body = json!({ "changePassword": { "adminPass": new_pass } });
        self.dispatcher.post(&action, &body).await?;
        Ok(())
    }

    pub async fn reboot(&self, url: &Url, kind: RebootKind) -> Result<()> {
        let action = join_path(url, &["action"])?;
        let body = json!({ "reboot": { "type": kind.as_str() } });
        self.dispatcher.post(&action, &body).await?;
        Ok(())
    }

    /// Re-fetch the server until its status matches `desired`.
    pub async fn wait_for_status(
        &self,
        url: &Url,
        desired: &str,
        poll_interval: Duration,
    ) -> Result<Server> {
        loop {
            let server = self.get(url).await?;
            if server.status.as_deref() == Some(desired) {
                return Ok(server);
            }
            debug!(
                id = %server.id,
                status = server.status.as_deref().unwrap_or("unknown"),
                desired,
                "waiting for server status"
            );
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Account resource limits (absolute caps and rate windows).
    pub async fn limits(&self, region: Option<&str>) -> Result<Value> {
        let base = self
            .bases(region)
            .await?
            .into_iter()
            .next()
            .ok_or(ResourceError::NoEndpoint { service: "cloudServersOpenStack" })?;
        let url = join_path(&base, &["limits"])?;
        let body = self.dispatcher.get(&url).await?.into_body()?;
        body.get("limits")
            .cloned()
            .ok_or(ResourceError::MissingField { field: "limits", context: "limits" })
    }
}

fn parse_server(body: &Value) -> Result<Server> {
    let payload = body
        .get("server")
        .ok_or(ResourceError::MissingField { field: "server", context: "server" })?;
    serde_json::from_value(payload.clone())
        .map_err(|e| strato_client::Error::Protocol(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn create_body_encodes_personality_contents() {
        let request = CreateServerRequest::new("web-1", "img-9", "flavor-2")
            .metadata("role", "frontend")
            .personality_file("/etc/motd", b"welcome".to_vec());
        let body = request.to_body().unwrap();

        assert_eq!(body["server"]["name"], "web-1");
        assert_eq!(body["server"]["metadata"]["role"], "frontend");
        assert_eq!(body["server"]["personality"][0]["path"], "/etc/motd");
        assert_eq!(body["server"]["personality"][0]["contents"], "d2VsY29tZQ==");
    }

    #[test]
    fn create_rejects_too_many_metadata_pairs() {
        let mut request = CreateServerRequest::new("web-1", "img-9", "flavor-2");
        for i in 0..6 {
            request = request.metadata(format!("k{i}"), "v");
        }
        let err = request.to_body().unwrap_err();
        assert!(err.to_string().contains("limited to a total of 5 key/value pairs"));
    }

    #[test]
    fn create_rejects_oversized_personality_file() {
        let request = CreateServerRequest::new("web-1", "img-9", "flavor-2")
            .personality_file("/etc/blob", vec![0u8; MAX_PERSONALITY_FILE_SIZE + 1]);
        let err = request.to_body().unwrap_err();
        assert!(err.to_string().contains("exceeds the maximum size"));
    }

    #[test]
    fn create_rejects_too_many_personality_files() {
        let mut request = CreateServerRequest::new("web-1", "img-9", "flavor-2");
        for i in 0..=MAX_PERSONALITY_ITEMS {
            request = request.personality_file(format!("/etc/f{i}"), vec![0u8; 4]);
        }
        let err = request.to_body().unwrap_err();
        assert!(err.to_string().contains("limited to a total of 5 items"));
    }

    #[test]
    fn create_rejects_overlong_remote_path() {
        let request = CreateServerRequest::new("web-1", "img-9", "flavor-2")
            .personality_file("/".repeat(MAX_SERVER_PATH_LENGTH + 1), vec![1]);
        let err = request.to_body().unwrap_err();
        assert!(err.to_string().contains("maximum length of 255 characters"));
    }

    #[test]
    fn server_parses_numeric_and_string_ids() {
        let legacy: Server = serde_json::from_value(json!({
            "id": 110917, "name": "MyServer", "status": "ACTIVE", "hostId": "36143b"
        }))
        .unwrap();
        assert_eq!(legacy.id, "110917");

        let openstack: Server = serde_json::from_value(json!({
            "id": "9bd3-41", "name": "web", "links": [{"rel": "self", "href": "https://x/v2/1/servers/9bd3-41"}]
        }))
        .unwrap();
        assert_eq!(openstack.url().unwrap().path(), "/v2/1/servers/9bd3-41");
    }
}
