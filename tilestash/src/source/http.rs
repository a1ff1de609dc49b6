//! HTTP tile source.
//!
//! Fetches map resources from a tile server speaking the classic
//! hosted-map URL scheme:
//!
//! ```text
//! {base}/{map_id}/{z}/{x}/{y}{@2x}.{ext}   raster tiles
//! {base}/{map_id}.json                     TileJSON metadata
//! {base}/{map_id}/markers.geojson          marker overlay
//! {base}/marker/{name}                     marker icon images
//! ```

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tracing::trace;

use super::{FetchError, ImageQuality, TileSource};
use crate::coord::TileAddress;

/// Tile source backed by an HTTP tile server.
#[derive(Debug, Clone)]
pub struct HttpTileSource {
    client: reqwest::Client,
    base_url: String,
    map_id: String,
    quality: ImageQuality,
}

impl HttpTileSource {
    /// Creates a source for one hosted map.
    ///
    /// `base_url` may carry a trailing slash; it is normalized away.
    /// The timeout applies per request.
    pub fn new(
        base_url: &str,
        map_id: &str,
        quality: ImageQuality,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Connect(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            map_id: map_id.to_string(),
            quality,
        })
    }

    /// The map identifier this source serves.
    pub fn map_id(&self) -> &str {
        &self.map_id
    }

    fn tile_url(&self, address: &TileAddress) -> String {
        format!(
            "{}/{}/{}/{}/{}{}.{}",
            self.base_url,
            self.map_id,
            address.z,
            address.x,
            address.y,
            address.scale.suffix(),
            self.quality.file_extension()
        )
    }

    fn metadata_url(&self) -> String {
        format!("{}/{}.json", self.base_url, self.map_id)
    }

    fn marker_index_url(&self) -> String {
        format!("{}/{}/markers.geojson", self.base_url, self.map_id)
    }

    fn marker_icon_url(&self, name: &str) -> String {
        format!("{}/marker/{}", self.base_url, name)
    }

    async fn get_bytes(&self, url: String) -> Result<Bytes, FetchError> {
        trace!(%url, "fetching");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify(e, &url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                url,
            });
        }

        response.bytes().await.map_err(|e| classify(e, &url))
    }
}

/// Maps a transport error onto the fetch error taxonomy.
fn classify(error: reqwest::Error, url: &str) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_body() || error.is_decode() {
        FetchError::Malformed(error.to_string())
    } else {
        FetchError::Connect(error.to_string())
    }
}

impl TileSource for HttpTileSource {
    fn fetch_tile<'a>(&'a self, address: TileAddress) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(async move { self.get_bytes(self.tile_url(&address)).await })
    }

    fn fetch_metadata<'a>(&'a self) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(async move { self.get_bytes(self.metadata_url()).await })
    }

    fn fetch_marker_index<'a>(&'a self) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(async move { self.get_bytes(self.marker_index_url()).await })
    }

    fn fetch_marker_icon<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(async move { self.get_bytes(self.marker_icon_url(name)).await })
    }
}
