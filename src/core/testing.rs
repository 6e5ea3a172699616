//! Test fixtures: a tiny loopback HTTP server, a fake Node.js tarball and
//! an in-memory release feed.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::core::error::{NovmError, NovmResult};
use crate::core::platform::{archive_file_name, archive_root_dir, Arch, Os};
use crate::core::update::feed::{ManagerRelease, ReleaseAsset, ReleaseFeed};

/// Serves fixed bodies by request path; anything else is a 404.
pub struct StaticServer {
    base: String,
    hits: Arc<AtomicUsize>,
    handle: tokio::task::JoinHandle<()>,
}

impl StaticServer {
    pub async fn start(routes: Vec<(String, Vec<u8>)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Arc<HashMap<String, Vec<u8>>> = Arc::new(routes.into_iter().collect());
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let handle = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let routes = Arc::clone(&routes);
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&chunk[..n]),
                        }
                    }
                    counter.fetch_add(1, Ordering::SeqCst);

                    let text = String::from_utf8_lossy(&request);
                    let path = text.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let (status, body) = match routes.get(&path) {
                        Some(body) => ("200 OK", body.clone()),
                        None => ("404 Not Found", Vec::new()),
                    };
                    let head = format!(
                        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            base: format!("http://{addr}"),
            hits,
            handle,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Requests answered so far, 404s included.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for StaticServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A distribution tarball laid out like the real thing, with a `bin/node`
/// shell script that reports `version`.
pub fn node_archive(version: &str, os: Os, arch: Arch) -> Vec<u8> {
    let root = archive_root_dir(version, os, arch);
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut add_file = |path: String, data: &[u8], mode: u32| {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(mode);
        builder.append_data(&mut header, path, data).unwrap();
    };

    let node = format!("#!/bin/sh\necho {version}\n");
    add_file(format!("{root}/bin/node"), node.as_bytes(), 0o755);
    add_file(
        format!("{root}/lib/node_modules/npm/bin/npm-cli.js"),
        b"#!/bin/sh\necho npm\n",
        0o755,
    );
    add_file(format!("{root}/include/node/node.h"), b"// header\n", 0o644);
    add_file(format!("{root}/share/doc/node/README"), b"docs\n", 0o644);
    add_file(format!("{root}/README.md"), b"not copied\n", 0o644);

    let mut link = tar::Header::new_gnu();
    link.set_entry_type(tar::EntryType::Symlink);
    link.set_size(0);
    link.set_mode(0o777);
    builder
        .append_link(
            &mut link,
            format!("{root}/bin/npm"),
            "../lib/node_modules/npm/bin/npm-cli.js",
        )
        .unwrap();

    builder.into_inner().unwrap().finish().unwrap()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Routes for one version on a fake mirror: the tarball plus its SHASUMS256.
pub fn mirror_routes(version: &str, os: Os, arch: Arch) -> Vec<(String, Vec<u8>)> {
    let archive = node_archive(version, os, arch);
    let name = archive_file_name(version, os, arch);
    let sums = format!(
        "{}  node-{version}-headers.tar.gz\n{}  {name}\n",
        "0".repeat(64),
        sha256_hex(&archive)
    );

    vec![
        (format!("/{version}/{name}"), archive),
        (format!("/{version}/SHASUMS256.txt"), sums.into_bytes()),
    ]
}

/// Serialises tests that install signal handlers or send signals to the
/// test process, since handlers are process-wide.
pub fn signal_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory release feed for coordinator runs.
pub struct FakeFeed {
    pub release: Option<ManagerRelease>,
    pub payload: Vec<u8>,
    pub fail_download: bool,
    pub calls: AtomicUsize,
}

impl FakeFeed {
    /// Publishes `tag` with one asset whose body is a tiny shell script.
    pub fn serving(tag: &str, asset: &str) -> Arc<Self> {
        Arc::new(Self {
            release: Some(ManagerRelease {
                tag: tag.to_string(),
                assets: vec![ReleaseAsset {
                    name: asset.to_string(),
                    url: format!("memory://{asset}"),
                }],
            }),
            payload: b"#!/bin/sh\necho new\n".to_vec(),
            fail_download: false,
            calls: AtomicUsize::new(0),
        })
    }

    /// Lists the release but every download fails.
    pub fn broken_download(tag: &str, asset: &str) -> Arc<Self> {
        let mut feed = Self::serving(tag, asset);
        if let Some(inner) = Arc::get_mut(&mut feed) {
            inner.fail_download = true;
        }
        feed
    }

    pub fn offline() -> Arc<Self> {
        Arc::new(Self {
            release: None,
            payload: Vec::new(),
            fail_download: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseFeed for FakeFeed {
    async fn latest(&self) -> NovmResult<ManagerRelease> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.release
            .clone()
            .ok_or_else(|| NovmError::Other("offline".into()))
    }

    async fn download(&self, asset: &ReleaseAsset, dest: &Path) -> NovmResult<()> {
        if self.fail_download {
            return Err(NovmError::DownloadFailed {
                url: asset.url.clone(),
                status: 502,
            });
        }
        tokio::fs::write(dest, &self.payload)
            .await
            .map_err(|source| NovmError::io(dest, source))
    }
}
