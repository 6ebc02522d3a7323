use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use cast_proto::protocol::{Endpoints, MetadataResponse};
use reqwest::Client;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of now-playing data for `(channel, offset)`.
pub trait MetadataClient: Send + Sync + 'static {
    fn now_playing(
        &self,
        channel: &str,
        offset: u16,
    ) -> impl Future<Output = Result<MetadataResponse>> + Send;
}

/// `GET {base}/metadata/{channel}/{offset}` over a shared reqwest client.
#[derive(Clone)]
pub struct HttpMetadataClient {
    client: Client,
    endpoints: Endpoints,
}

impl HttpMetadataClient {
    pub fn new(client: Client, endpoints: Endpoints) -> Self {
        Self { client, endpoints }
    }

    pub fn build_client() -> Result<Client> {
        Client::builder()
            .timeout(METADATA_TIMEOUT)
            .user_agent(concat!("seriouscast/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")
    }
}

impl MetadataClient for HttpMetadataClient {
    async fn now_playing(&self, channel: &str, offset: u16) -> Result<MetadataResponse> {
        let url = self.endpoints.metadata(channel, offset);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("metadata request for {} failed", channel))?;

        if !response.status().is_success() {
            anyhow::bail!("metadata for {} returned status: {}", channel, response.status());
        }

        response
            .json()
            .await
            .with_context(|| format!("failed to parse metadata for {}", channel))
    }
}
