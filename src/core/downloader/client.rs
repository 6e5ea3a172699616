use std::path::Path;

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::core::error::{NovmError, NovmResult};

/// Single-attempt streaming downloader that hashes while it writes.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    /// Draw a progress bar on stderr for large transfers.
    show_progress: bool,
}

impl Downloader {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    // ── Single file download ────────────────────────────

    /// Stream `url` into `dest`, returning the lowercase hex SHA-256 of the
    /// bytes written. Parent directories are created as needed.
    pub async fn download_file(&self, url: &str, dest: &Path) -> NovmResult<String> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| NovmError::io(parent, source))?;
        }

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NovmError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bar = self.progress_bar(response.content_length(), dest);
        let mut hasher = Sha256::new();

        // Scoped so the handle is closed before callers rename or exec the file
        {
            let mut file = tokio::fs::File::create(dest)
                .await
                .map_err(|source| NovmError::io(dest, source))?;

            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                hasher.update(&chunk);
                file.write_all(&chunk)
                    .await
                    .map_err(|source| NovmError::io(dest, source))?;
                bar.inc(chunk.len() as u64);
            }

            file.flush()
                .await
                .map_err(|source| NovmError::io(dest, source))?;
        }

        bar.finish_and_clear();
        debug!("Downloaded: {} -> {:?}", url, dest);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Fetch a small text document (checksum lists, release metadata).
    pub async fn fetch_text(&self, url: &str) -> NovmResult<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NovmError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }

    fn progress_bar(&self, total: Option<u64>, dest: &Path) -> ProgressBar {
        let Some(total) = total.filter(|len| self.show_progress && *len > 0) else {
            return ProgressBar::hidden();
        };

        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{bar:40.cyan/blue} {bytes}/{total_bytes} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        if let Some(name) = dest.file_name() {
            bar.set_message(name.to_string_lossy().into_owned());
        }
        bar
    }
}

/// Compare a computed digest against the published one.
pub fn verify_sha256(file: &str, expected: &str, actual: &str) -> NovmResult<()> {
    if actual.eq_ignore_ascii_case(expected.trim()) {
        return Ok(());
    }
    Err(NovmError::ChecksumMismatch {
        file: file.to_string(),
        expected: expected.trim().to_string(),
        actual: actual.to_string(),
    })
}
