//! Server images: stock OS images plus snapshots taken from servers.

use serde::Deserialize;
use serde_json::{json, Value};
use strato_client::{fetch_all, Dispatcher, HttpTransport, Transport};
use tracing::debug;
use url::Url;

use crate::error::{ResourceError, Result};
use crate::{join_path, lenient_id, self_link, Link, COMPUTE_SERVICES};

#[derive(Debug, Clone, Deserialize)]
pub struct Image {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    pub name: Option<String>,
    pub status: Option<String>,
    pub progress: Option<i64>,
    #[serde(rename = "serverId")]
    pub server_id: Option<Value>,
    pub created: Option<String>,
    pub updated: Option<String>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Image {
    pub fn url(&self) -> Option<Url> {
        self_link(&self.links)
    }
}

/// Region and attribute filters for [`ImageHandler::list`].
#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
    region: Option<String>,
    name: Option<String>,
    status: Option<String>,
}

impl ImageFilter {
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

pub struct ImageHandler<'a, T: Transport = HttpTransport> {
    dispatcher: &'a Dispatcher<T>,
}

impl<'a, T: Transport> ImageHandler<'a, T> {
    pub fn new(dispatcher: &'a Dispatcher<T>) -> Self {
        Self { dispatcher }
    }

    async fn bases(&self, region: Option<&str>) -> Result<Vec<Url>> {
        let mut bases = Vec::new();
        for service in COMPUTE_SERVICES {
            for (_, url) in self.dispatcher.endpoints(service, region).await? {
                bases.push(url);
            }
        }
        Ok(bases)
    }

    /// List images across every matching compute endpoint, following
    /// pagination links on each one.
    pub async fn list(&self, filter: &ImageFilter) -> Result<Vec<Image>> {
        let bases = self.bases(filter.region.as_deref()).await?;
        let mut images = Vec::new();
        for base in bases {
            let mut url = join_path(&base, &["images", "detail"])?;
            filter.apply(&mut url);
            let merged = fetch_all(self.dispatcher, &url).await?;
            let Some(page) = merged.get("images") else { continue };
            let mut parsed: Vec<Image> = serde_json::from_value(page.clone())
                .map_err(|e| strato_client::Error::Protocol(e.to_string()))?;
            images.append(&mut parsed);
        }
        debug!(count = images.len(), "listed images");
        Ok(images)
    }

    pub async fn get(&self, url: &Url) -> Result<Image> {
        let body = self.dispatcher.get(url).await?.into_body()?;
        parse_image(&body)
    }

    /// Snapshot a server into a new image. The image builds
    /// asynchronously; poll its status until ACTIVE before using it.
    pub async fn create_from_server(
        &self,
        region: Option<&str>,
        server_id: &str,
        name: &str,
    ) -> Result<Image> {
        let base = self
            .bases(region)
            .await?
            .into_iter()
            .next()
            .ok_or(ResourceError::NoEndpoint { service: "cloudServersOpenStack" })?;
        let url = join_path(&base, &["images"])?;
        let body = json!({ "image": { "serverId": server_id, "name": name } });
        let response = self.dispatcher.post(&url, &body).await?.into_body()?;
        let image = parse_image(&response)?;
        debug!(id = %image.id, "created image from server");
        Ok(image)
    }

    pub async fn delete(&self, url: &Url) -> Result<()> {
        self.dispatcher.delete(url).await?;
        Ok(())
    }
}

fn parse_image(body: &Value) -> Result<Image> {
    let payload = body
        .get("image")
        .ok_or(ResourceError::MissingField { field: "image", context: "image" })?;
    serde_json::from_value(payload.clone())
        .map_err(|e| strato_client::Error::Protocol(e.to_string()).into())
}
