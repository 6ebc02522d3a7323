//! Versioned on-disk asset cache.
//!
//! Layout: `<cache_root>/<CACHE_NAME>/<hash of url>`.  Stream, segment and
//! metadata paths are never cached; `/static/` is served cache-first; anything
//! else goes to the network first and falls back to the cache.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use axum::body::Bytes;
use cast_proto::protocol::Endpoints;
use futures_util::future::join_all;
use reqwest::{Client, Url};
use tracing::{debug, info, warn};

pub const CACHE_NAME: &str = "seriouscast-v1";

/// Fetched by [`AssetCache::install`].
pub const STATIC_ASSETS: &[&str] = &[
    "/static/channel-art/404.webp",
    "/static/img/play.svg",
    "/static/img/pause.svg",
    "/static/img/plus.svg",
    "/static/img/minus.svg",
    "/static/img/volume-high.svg",
    "/static/img/volume-mute.svg",
];

const BYPASS_PREFIXES: &[&str] = &["/hls/", "/segment/", "/key/", "/metadata/", "/channel/", "/vlc/"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    Bypass,
    CacheFirst,
    NetworkFirst,
}

pub fn policy_for(url: &str) -> FetchPolicy {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    if BYPASS_PREFIXES.iter().any(|p| path.starts_with(p)) {
        FetchPolicy::Bypass
    } else if path.starts_with("/static/") {
        FetchPolicy::CacheFirst
    } else {
        FetchPolicy::NetworkFirst
    }
}

pub struct AssetCache {
    root: PathBuf,
    endpoints: Endpoints,
    client: Client,
}

impl AssetCache {
    pub fn new(cache_root: impl Into<PathBuf>, endpoints: Endpoints, client: Client) -> Self {
        Self {
            root: cache_root.into(),
            endpoints,
            client,
        }
    }

    pub fn dir(&self) -> PathBuf {
        self.root.join(CACHE_NAME)
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        self.dir().join(format!("{:016x}", hasher.finish()))
    }

    /// Pre-cache every static asset.  Fails if any of them can't be fetched.
    pub async fn install(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.dir()).await?;
        let urls: Vec<String> = STATIC_ASSETS
            .iter()
            .map(|p| self.endpoints.resolve(p))
            .collect();
        let results = join_all(urls.iter().map(|u| self.download(u))).await;

        let mut failed = 0;
        for (url, result) in urls.iter().zip(results) {
            match result {
                Ok(bytes) => self.store(url, &bytes).await,
                Err(e) => {
                    warn!("assets: pre-cache of {} failed: {:#}", url, e);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            anyhow::bail!("{} of {} static assets failed to download", failed, urls.len());
        }
        info!("assets: installed {} assets into {:?}", urls.len(), self.dir());
        Ok(())
    }

    /// Delete every cache generation other than the current one.
    pub fn activate(&self) -> Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_name() == CACHE_NAME || !entry.file_type()?.is_dir() {
                continue;
            }
            std::fs::remove_dir_all(entry.path())
                .with_context(|| format!("removing stale cache {:?}", entry.path()))?;
            info!("assets: removed stale cache {:?}", entry.file_name());
            removed += 1;
        }
        Ok(removed)
    }

    /// Fetch `url` (absolute or server-relative) under its path's policy.
    pub async fn fetch(&self, url: &str) -> Result<Bytes> {
        let url = self.endpoints.resolve(url);
        match policy_for(&url) {
            FetchPolicy::Bypass => self.download(&url).await,
            FetchPolicy::CacheFirst => {
                if let Some(hit) = self.lookup(&url).await {
                    debug!("assets: cache hit {}", url);
                    return Ok(hit);
                }
                let bytes = self.download(&url).await?;
                self.store(&url, &bytes).await;
                Ok(bytes)
            }
            FetchPolicy::NetworkFirst => match self.download(&url).await {
                Ok(bytes) => Ok(bytes),
                Err(e) => {
                    debug!("assets: network failed for {}, trying cache: {:#}", url, e);
                    self.lookup(&url).await.ok_or(e)
                }
            },
        }
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .error_for_status()?;
        Ok(response.bytes().await?)
    }

    async fn lookup(&self, url: &str) -> Option<Bytes> {
        tokio::fs::read(self.entry_path(url)).await.ok().map(Bytes::from)
    }

    async fn store(&self, url: &str, bytes: &[u8]) {
        if let Err(e) = write_entry(&self.entry_path(url), bytes).await {
            warn!("assets: caching {} failed: {}", url, e);
        }
    }
}

async fn write_entry(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}
