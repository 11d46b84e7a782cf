//! Fetching raw bytes by URL.
//!
//! The loader only ever sees the [`Fetch`] trait. [`AssetFetcher`] is the
//! real implementation: `http(s)` URLs go through `reqwest`, everything else
//! is read from the asset directory (natively) or requested relative to the
//! page origin (on the web).

#[cfg(not(target_arch = "wasm32"))]
use std::path::PathBuf;

use crate::error::{Result, ViewerError};

/// `Send + Sync` natively, nothing on the web where futures stay on the
/// main thread.
#[cfg(not(target_arch = "wasm32"))]
pub trait MaybeSend: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync + ?Sized> MaybeSend for T {}

#[cfg(target_arch = "wasm32")]
pub trait MaybeSend {}
#[cfg(target_arch = "wasm32")]
impl<T: ?Sized> MaybeSend for T {}

#[cfg(not(target_arch = "wasm32"))]
pub type FetchFuture<'a, T> = futures::future::BoxFuture<'a, T>;
#[cfg(target_arch = "wasm32")]
pub type FetchFuture<'a, T> = futures::future::LocalBoxFuture<'a, T>;

pub trait Fetch: MaybeSend {
    /// Fetches the whole resource at `url`. Failures are
    /// [`ViewerError::FetchFailure`].
    fn fetch_bytes<'a>(&'a self, url: &'a str) -> FetchFuture<'a, Result<Vec<u8>>>;
}

pub fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Fetches decoded RGBA8 images through any [`Fetch`].
pub async fn fetch_image(fetcher: &dyn Fetch, url: &str) -> Result<image::RgbaImage> {
    let bytes = fetcher.fetch_bytes(url).await?;
    decode_image(&bytes, url)
}

pub fn decode_image(bytes: &[u8], source: &str) -> Result<image::RgbaImage> {
    image::load_from_memory(bytes)
        .map(|image| image.to_rgba8())
        .map_err(|e| ViewerError::fetch(source, format!("could not decode image: {}", e)))
}

#[derive(Debug, Clone)]
pub struct AssetFetcher {
    client: reqwest::Client,
    #[cfg(not(target_arch = "wasm32"))]
    asset_root: PathBuf,
    #[cfg(target_arch = "wasm32")]
    asset_root: String,
}

impl AssetFetcher {
    #[cfg(not(target_arch = "wasm32"))]
    pub fn new(asset_root: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            asset_root: asset_root.into(),
        }
    }

    #[cfg(target_arch = "wasm32")]
    pub fn new(asset_root: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            asset_root: asset_root.into(),
        }
    }

    async fn fetch_remote(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ViewerError::fetch(url, e))?;
        let bytes = response.bytes().await.map_err(|e| ViewerError::fetch(url, e))?;
        Ok(bytes.to_vec())
    }

    #[cfg(not(target_arch = "wasm32"))]
    async fn fetch_local(&self, url: &str) -> Result<Vec<u8>> {
        let path = self.asset_root.join(url);
        tokio::fs::read(&path)
            .await
            .map_err(|e| ViewerError::fetch(&path.display().to_string(), e))
    }

    #[cfg(target_arch = "wasm32")]
    async fn fetch_local(&self, url: &str) -> Result<Vec<u8>> {
        let origin = web_sys::window()
            .ok_or_else(|| ViewerError::fetch(url, "no window"))?
            .location()
            .origin()
            .map_err(|e| ViewerError::fetch(url, format!("{:?}", e)))?;
        let base = reqwest::Url::parse(&format!("{}/{}/", origin, self.asset_root))
            .map_err(|e| ViewerError::fetch(url, e))?;
        let resolved = base.join(url).map_err(|e| ViewerError::fetch(url, e))?;
        self.fetch_remote(resolved.as_str()).await
    }
}

impl Fetch for AssetFetcher {
    fn fetch_bytes<'a>(&'a self, url: &'a str) -> FetchFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let bytes = if is_remote(url) {
                self.fetch_remote(url).await?
            } else {
                self.fetch_local(url).await?
            };
            log::debug!("Fetched {} ({} bytes)", url, bytes.len());
            Ok(bytes)
        })
    }
}
