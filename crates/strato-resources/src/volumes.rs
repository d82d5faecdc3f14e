//! Block-storage volumes and their snapshots.

use serde::Deserialize;
use serde_json::json;
use strato_client::{Dispatcher, HttpTransport, Transport};
use tracing::debug;
use url::Url;

use crate::error::{ResourceError, Result};
use crate::{join_path, lenient_id};

const BLOCK_STORAGE_SERVICE: &str = "cloudBlockStorage";

/// A volume, tagged with the endpoint it was listed from so snapshot
/// calls go back to the same region.
#[derive(Debug, Clone, Deserialize)]
pub struct Volume {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(rename = "display_name")]
    pub name: Option<String>,
    #[serde(rename = "display_description")]
    pub description: Option<String>,
    pub size: Option<i64>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<String>,
    #[serde(skip)]
    base: Option<Url>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    pub volume_id: Option<String>,
    pub display_name: Option<String>,
    pub status: Option<String>,
}

pub struct VolumeHandler<'a, T: Transport = HttpTransport> {
    dispatcher: &'a Dispatcher<T>,
}

impl<'a, T: Transport> VolumeHandler<'a, T> {
    pub fn new(dispatcher: &'a Dispatcher<T>) -> Self {
        Self { dispatcher }
    }

    /// Volumes from every block-storage endpoint matching `region`.
    pub async fn list(&self, region: Option<&str>) -> Result<Vec<Volume>> {
        let endpoints = self
            .dispatcher
            .endpoints(BLOCK_STORAGE_SERVICE, region)
            .await?;
        let mut volumes = Vec::new();
        for (_, base) in endpoints {
            let url = join_path(&base, &["volumes"])?;
            let body = self.dispatcher.get(&url).await?.into_body()?;
            let Some(page) = body.get("volumes") else { continue };
            let mut parsed: Vec<Volume> = serde_json::from_value(page.clone())
                .map_err(|e| strato_client::Error::Protocol(e.to_string()))?;
            for volume in &mut parsed {
                volume.base = Some(base.clone());
            }
            volumes.append(&mut parsed);
        }
        debug!(count = volumes.len(), "listed volumes");
        Ok(volumes)
    }

    /// Force-snapshot a volume under the given name.
    pub async fn snapshot(&self, volume: &Volume, name: &str) -> Result<()> {
        let base = volume_base(volume)?;
        let url = join_path(base, &["snapshots"])?;
        let payload = json!({
            "snapshot": {
                "display_name": name,
                "volume_id": volume.id,
                "force": true,
            }
        });
        self.dispatcher.post(&url, &payload).await?;
        debug!(volume_id = %volume.id, name, "requested volume snapshot");
        Ok(())
    }

    /// Snapshots of this volume, filtered from the endpoint's full list.
    pub async fn snapshots(&self, volume: &Volume) -> Result<Vec<Snapshot>> {
        let base = volume_base(volume)?;
        let url = join_path(base, &["snapshots"])?;
        let body = self.dispatcher.get(&url).await?.into_body()?;
        let Some(page) = body.get("snapshots") else {
            return Ok(Vec::new());
        };
        let all: Vec<Snapshot> = serde_json::from_value(page.clone())
            .map_err(|e| strato_client::Error::Protocol(e.to_string()))?;
        Ok(all
            .into_iter()
            .filter(|snapshot| snapshot.volume_id.as_deref() == Some(volume.id.as_str()))
            .collect())
    }
}

fn volume_base(volume: &Volume) -> Result<&Url> {
    volume
        .base
        .as_ref()
        .ok_or(ResourceError::MissingField { field: "endpoint", context: "volume" })
}
