//! Server flavors: the RAM/disk sizing presets a server is built from.

use serde::Deserialize;
use serde_json::Value;
use strato_client::{fetch_all, Dispatcher, HttpTransport, Transport};
use url::Url;

use crate::error::{ResourceError, Result};
use crate::{join_path, lenient_id, self_link, Link};

/// Flavors only exist on the OpenStack compute service.
const FLAVOR_SERVICE: &str = "cloudServersOpenStack";

/// A sizing preset. `ram` is in MB, `disk` in GB.
#[derive(Debug, Clone, Deserialize)]
pub struct Flavor {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    pub name: Option<String>,
    pub ram: Option<u64>,
    pub disk: Option<u64>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Flavor {
    pub fn url(&self) -> Option<Url> {
        self_link(&self.links)
    }
}

pub struct FlavorHandler<'a, T: Transport = HttpTransport> {
    dispatcher: &'a Dispatcher<T>,
}

impl<'a, T: Transport> FlavorHandler<'a, T> {
    pub fn new(dispatcher: &'a Dispatcher<T>) -> Self {
        Self { dispatcher }
    }

    /// Flavors from every matching endpoint, pagination links followed.
    pub async fn list(&self, region: Option<&str>) -> Result<Vec<Flavor>> {
        let endpoints = self.dispatcher.endpoints(FLAVOR_SERVICE, region).await?;
        let mut flavors = Vec::new();
        for (_, base) in endpoints {
            let url = join_path(&base, &["flavors", "detail"])?;
            let merged = fetch_all(self.dispatcher, &url).await?;
            let Some(page) = merged.get("flavors") else { continue };
            let mut parsed: Vec<Flavor> = serde_json::from_value(page.clone())
                .map_err(|e| strato_client::Error::Protocol(e.to_string()))?;
            flavors.append(&mut parsed);
        }
        Ok(flavors)
    }

    pub async fn get(&self, url: &Url) -> Result<Flavor> {
        let body = self.dispatcher.get(url).await?.into_body()?;
        parse_flavor(&body)
    }
}

fn parse_flavor(body: &Value) -> Result<Flavor> {
    let payload = body
        .get("flavor")
        .ok_or(ResourceError::MissingField { field: "flavor", context: "flavor" })?;
    serde_json::from_value(payload.clone())
        .map_err(|e| strato_client::Error::Protocol(e.to_string()).into())
}
