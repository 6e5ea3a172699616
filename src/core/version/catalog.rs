// ─── Release Catalog ───
// Cached snapshot of the Node.js release index (`<mirror>/index.json`).

use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, instrument};

use crate::core::error::{NovmError, NovmResult};
use crate::core::paths::RootLayout;

/// Cache older than this is refetched before resolving.
pub const CATALOG_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// A single release in the index. Newest releases come first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub version: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub files: Vec<String>,
    /// LTS code name (`"Hydrogen"`); the index uses `false` for non-LTS lines.
    #[serde(default, deserialize_with = "lts_code_name")]
    pub lts: Option<String>,
    #[serde(default)]
    pub security: bool,
}

impl CatalogEntry {
    pub fn new<I, S>(version: &str, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            version: version.to_string(),
            date: String::new(),
            files: files.into_iter().map(Into::into).collect(),
            lts: None,
            security: false,
        }
    }

    pub fn with_lts(mut self, code_name: &str) -> Self {
        self.lts = Some(code_name.to_string());
        self
    }

    /// The entry's version without its `v` prefix, if it is valid semver.
    pub fn semver(&self) -> Option<Version> {
        let raw = self.version.strip_prefix('v').unwrap_or(&self.version);
        Version::parse(raw).ok()
    }

    pub fn is_lts(&self) -> bool {
        self.lts.is_some()
    }
}

fn lts_code_name<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lts {
        Name(String),
        Flag(bool),
    }

    Ok(match Option::<Lts>::deserialize(deserializer)? {
        Some(Lts::Name(name)) if !name.is_empty() => Some(name),
        _ => None,
    })
}

/// Every known release, newest first. Never empty.
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    fetched_at: DateTime<Utc>,
}

impl Catalog {
    pub fn from_entries(entries: Vec<CatalogEntry>, fetched_at: DateTime<Utc>) -> NovmResult<Self> {
        if entries.is_empty() {
            return Err(NovmError::CatalogFetch {
                location: "<memory>".into(),
                reason: "release index is empty".into(),
            });
        }
        Ok(Self {
            entries,
            fetched_at,
        })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Load the cached index, refetching it when missing or older than
    /// [`CATALOG_MAX_AGE`]. A fresh but unparsable cache is an error.
    #[instrument(skip(layout, client))]
    pub async fn load(
        layout: &RootLayout,
        client: &reqwest::Client,
        index_url: &str,
    ) -> NovmResult<Self> {
        layout.ensure_root()?;
        let cache_path = layout.catalog_cache();

        if let Some(modified) = cache_modified(&cache_path).await? {
            if is_fresh(modified, SystemTime::now()) {
                debug!("Using cached release index at {:?}", cache_path);
                let bytes = tokio::fs::read(&cache_path)
                    .await
                    .map_err(|source| NovmError::io(&cache_path, source))?;
                return Self::parse(&bytes, &cache_path.to_string_lossy(), modified.into());
            }
        }

        info!("Fetching Node.js release index from {}", index_url);
        let bytes = fetch_index(client, index_url).await?;
        let catalog = Self::parse(&bytes, index_url, Utc::now())?;
        persist_cache(&cache_path, &bytes).await?;

        info!("Loaded {} releases from index", catalog.entries.len());
        Ok(catalog)
    }

    fn parse(bytes: &[u8], location: &str, fetched_at: DateTime<Utc>) -> NovmResult<Self> {
        let entries: Vec<CatalogEntry> =
            serde_json::from_slice(bytes).map_err(|e| NovmError::CatalogFetch {
                location: location.to_string(),
                reason: e.to_string(),
            })?;

        Self::from_entries(entries, fetched_at).map_err(|_| NovmError::CatalogFetch {
            location: location.to_string(),
            reason: "release index is empty".into(),
        })
    }
}

fn is_fresh(modified: SystemTime, now: SystemTime) -> bool {
    now.duration_since(modified)
        .map(|age| age < CATALOG_MAX_AGE)
        .unwrap_or(true)
}

async fn cache_modified(path: &Path) -> NovmResult<Option<SystemTime>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta
            .modified()
            .map(Some)
            .map_err(|source| NovmError::io(path, source)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(NovmError::io(path, source)),
    }
}

async fn fetch_index(client: &reqwest::Client, url: &str) -> NovmResult<Vec<u8>> {
    let fetch_error = |reason: String| NovmError::CatalogFetch {
        location: url.to_string(),
        reason,
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| fetch_error(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(fetch_error(format!("HTTP {}", status.as_u16())));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| fetch_error(e.to_string()))?;
    Ok(bytes.to_vec())
}

/// Replace the cache in one rename so readers never see a half-written file.
async fn persist_cache(cache_path: &Path, bytes: &[u8]) -> NovmResult<()> {
    let staging = cache_path.with_extension("json.partial");
    tokio::fs::write(&staging, bytes)
        .await
        .map_err(|source| NovmError::io(&staging, source))?;
    tokio::fs::rename(&staging, cache_path)
        .await
        .map_err(|source| NovmError::io(cache_path, source))
}
