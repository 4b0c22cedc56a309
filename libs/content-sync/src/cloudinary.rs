//! HTTP asset store backed by the Cloudinary admin API
//!
//! `DELETE {api}/v1_1/{cloud}/resources/{type}/upload?public_ids[]={id}`
//! answers `{"deleted": {"<id>": "deleted" | "not_found"}}`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use errors::{asset_error, SyncResult};
use serde::Deserialize;
use tracing::debug;

use crate::config::{AssetCredentials, AssetStoreConfig};
use crate::reconciler::{AssetStore, DeleteOutcome, ResourceType};

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    deleted: HashMap<String, String>,
}

pub struct CloudinaryStore {
    client: reqwest::Client,
    api_base_url: String,
    credentials: AssetCredentials,
}

impl CloudinaryStore {
    pub fn new(config: &AssetStoreConfig, credentials: AssetCredentials) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn delete_url(&self, resource_type: ResourceType) -> String {
        format!(
            "{}/v1_1/{}/resources/{}/upload",
            self.api_base_url, self.credentials.cloud_name, resource_type
        )
    }
}

/// Read the per-id status out of a delete response body
fn parse_delete_response(body: &str, public_id: &str) -> SyncResult<DeleteOutcome> {
    let response: DeleteResponse = serde_json::from_str(body)
        .map_err(|e| asset_error!("unexpected delete response: {}", e))?;

    match response.deleted.get(public_id).map(String::as_str) {
        Some("deleted") => Ok(DeleteOutcome::Deleted),
        _ => Ok(DeleteOutcome::NotFound),
    }
}

#[async_trait]
impl AssetStore for CloudinaryStore {
    async fn delete(&self, public_id: &str, resource_type: ResourceType) -> SyncResult<DeleteOutcome> {
        let url = self.delete_url(resource_type);
        debug!("DELETE {} public_id={}", url, public_id);

        let response = self
            .client
            .delete(&url)
            .basic_auth(&self.credentials.api_key, Some(&self.credentials.api_secret))
            .query(&[("public_ids[]", public_id)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(DeleteOutcome::NotFound);
        }
        if !status.is_success() {
            return Err(asset_error!(
                "{} {}: {}",
                status.as_u16(),
                resource_type,
                body.chars().take(200).collect::<String>()
            ));
        }

        parse_delete_response(&body, public_id)
    }
}
