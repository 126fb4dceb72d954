use anyhow::Context;
use remote_proto::protocol::{
    DeviceSummary, RenameRequest, RenameResponse, DEVICES_PATH, RENAME_PATH,
};
use reqwest::header::COOKIE;

use crate::connection::HubEndpoint;

/// REST side of the hub: device listing and renaming.
#[derive(Debug, Clone)]
pub struct DeviceApi {
    http: reqwest::Client,
    endpoint: HubEndpoint,
}

impl DeviceApi {
    pub fn new(endpoint: HubEndpoint) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    pub async fn list(&self) -> anyhow::Result<Vec<DeviceSummary>> {
        let response = self
            .http
            .get(self.endpoint.http_url(DEVICES_PATH))
            .header(COOKIE, self.endpoint.cookie())
            .send()
            .await
            .context("device list request failed")?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn rename(&self, device_name: &str) -> anyhow::Result<String> {
        let response = self
            .http
            .post(self.endpoint.http_url(RENAME_PATH))
            .header(COOKIE, self.endpoint.cookie())
            .json(&RenameRequest {
                device_name: device_name.to_string(),
            })
            .send()
            .await
            .context("rename request failed")?
            .error_for_status()?;
        let body: RenameResponse = response.json().await?;
        Ok(body.device_name)
    }
}
