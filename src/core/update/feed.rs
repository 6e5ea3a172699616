// ─── Release Feed ───
// Where the manager learns about and downloads its own newer releases.

use std::path::Path;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::core::downloader::Downloader;
use crate::core::error::{NovmError, NovmResult};

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const GITHUB_API_VERSION: &str = "2022-11-28";

/// The "latest release" document: a tag plus downloadable assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerRelease {
    #[serde(rename = "tag_name")]
    pub tag: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub url: String,
}

impl ManagerRelease {
    pub fn version(&self) -> Option<Version> {
        let raw = self.tag.strip_prefix('v').unwrap_or(&self.tag);
        Version::parse(raw).ok()
    }

    pub fn asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|asset| asset.name == name)
    }
}

#[async_trait]
pub trait ReleaseFeed: Send + Sync {
    async fn latest(&self) -> NovmResult<ManagerRelease>;
    async fn download(&self, asset: &ReleaseAsset, dest: &Path) -> NovmResult<()>;
}

/// GitHub's `releases/latest` REST endpoint.
pub struct GithubReleaseFeed {
    downloader: Downloader,
    url: String,
}

impl GithubReleaseFeed {
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self {
            downloader: Downloader::new(client),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl ReleaseFeed for GithubReleaseFeed {
    async fn latest(&self) -> NovmResult<ManagerRelease> {
        let response = self
            .downloader
            .client()
            .get(&self.url)
            .header(ACCEPT, GITHUB_ACCEPT)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NovmError::DownloadFailed {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    async fn download(&self, asset: &ReleaseAsset, dest: &Path) -> NovmResult<()> {
        self.downloader.download_file(&asset.url, dest).await?;
        Ok(())
    }
}
