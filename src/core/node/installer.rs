// ─── Node Installer ───
// Download, verify, unpack and copy a release into its install directory.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::core::downloader::{verify_sha256, Downloader};
use crate::core::error::{NovmError, NovmResult};
use crate::core::platform::{archive_file_name, archive_root_dir, archive_url, shasums_url};
use crate::core::version::ResolvedVersion;

/// Refuse to start an install with less free space than this.
pub const MIN_FREE_DISK_BYTES: u64 = 256 * 1024 * 1024;
/// System prefix used by global installs.
pub const GLOBAL_PREFIX: &str = "/usr/local";
/// Top-level subtrees copied out of the unpacked archive.
const INSTALL_SUBTREES: [&str; 4] = ["share", "lib", "include", "bin"];

#[derive(Debug, Clone)]
pub struct Installer {
    downloader: Downloader,
    mirror: String,
}

impl Installer {
    pub fn new(downloader: Downloader, mirror: &str) -> Self {
        Self {
            downloader,
            mirror: mirror.trim_end_matches('/').to_string(),
        }
    }

    /// Install `resolved` into its own install directory, or into
    /// [`GLOBAL_PREFIX`] when `global` is set.
    pub async fn install(&self, resolved: &ResolvedVersion, global: bool) -> NovmResult<PathBuf> {
        let dest = if global {
            PathBuf::from(GLOBAL_PREFIX)
        } else {
            resolved.install_dir.clone()
        };
        self.install_into(resolved, &dest).await?;
        Ok(dest)
    }

    #[instrument(skip(self, resolved), fields(version = %resolved.version))]
    pub async fn install_into(&self, resolved: &ResolvedVersion, dest: &Path) -> NovmResult<()> {
        let version = resolved.version.as_str();
        let archive_name = archive_file_name(version, resolved.os, resolved.arch);

        let staging = tempfile::Builder::new()
            .prefix("novm-install-")
            .tempdir()
            .map_err(|source| {
                extraction_error(
                    Path::new(&archive_name),
                    NovmError::io(std::env::temp_dir(), source),
                )
            })?;
        let archive_path = staging.path().join(&archive_name);

        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|source| extraction_error(&archive_path, NovmError::io(dest, source)))?;
        ensure_min_disk_space(dest, MIN_FREE_DISK_BYTES)?;

        let url = archive_url(&self.mirror, version, resolved.os, resolved.arch);
        let download_start = Instant::now();
        info!("Downloading node {} from {}", version, url);
        let actual = self
            .downloader
            .download_file(&url, &archive_path)
            .await
            .map_err(|e| extraction_error(&archive_path, e))?;
        debug!("Download finished in {:?}", download_start.elapsed());

        let sums = self
            .downloader
            .fetch_text(&shasums_url(&self.mirror, version))
            .await
            .map_err(|e| extraction_error(&archive_path, e))?;
        let expected = find_checksum(&sums, &archive_name).ok_or_else(|| {
            NovmError::ArchiveExtraction {
                archive: archive_path.clone(),
                reason: "no published checksum for archive".into(),
            }
        })?;
        verify_sha256(&archive_name, expected, &actual)?;

        let extract_start = Instant::now();
        let unpacked = staging.path().join("unpacked");
        let archive = archive_path.clone();
        let unpack_dir = unpacked.clone();
        tokio::task::spawn_blocking(move || extract::unpack_tar_gz(&archive, &unpack_dir))
            .await
            .map_err(|e| NovmError::Other(format!("Task join error: {e}")))?
            .map_err(|e| extraction_error(&archive_path, e))?;
        debug!("Extraction finished in {:?}", extract_start.elapsed());

        let tree = unpacked.join(archive_root_dir(version, resolved.os, resolved.arch));
        let target = dest.to_path_buf();
        tokio::task::spawn_blocking(move || copy_subtrees(&tree, &target))
            .await
            .map_err(|e| NovmError::Other(format!("Task join error: {e}")))?
            .map_err(|e| extraction_error(&archive_path, e))?;

        info!("Installed node {} into {:?}", version, dest);
        Ok(())
    }
}

/// Everything that goes wrong between download and copy is reported as an
/// extraction failure; already classified errors pass through.
fn extraction_error(archive: &Path, err: NovmError) -> NovmError {
    match err {
        err @ NovmError::ArchiveExtraction { .. } => err,
        other => NovmError::ArchiveExtraction {
            archive: archive.to_path_buf(),
            reason: other.to_string(),
        },
    }
}

/// Look up `file_name` in a `SHASUMS256.txt` body (`<hex>  <name>` lines).
pub fn find_checksum<'a>(sums: &'a str, file_name: &str) -> Option<&'a str> {
    sums.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let digest = parts.next()?;
        let name = parts.next()?;
        (name == file_name).then_some(digest)
    })
}

/// Copy every known subtree that exists in `tree` into `dest`. No rollback:
/// a failure part way through leaves whatever was already copied.
fn copy_subtrees(tree: &Path, dest: &Path) -> NovmResult<()> {
    if !tree.is_dir() {
        return Err(NovmError::ArchiveExtraction {
            archive: tree.to_path_buf(),
            reason: "archive root directory missing".into(),
        });
    }

    for name in INSTALL_SUBTREES {
        let src = tree.join(name);
        if !src.exists() {
            warn!("Archive has no {} directory, skipping", name);
            continue;
        }
        copy_tree(&src, &dest.join(name))?;
    }
    Ok(())
}

/// Recursive overwrite copy that recreates symlinks instead of following them.
fn copy_tree(src: &Path, dest: &Path) -> NovmResult<()> {
    std::fs::create_dir_all(dest).map_err(|source| NovmError::io(dest, source))?;

    let entries = std::fs::read_dir(src).map_err(|source| NovmError::io(src, source))?;
    for entry in entries {
        let entry = entry.map_err(|source| NovmError::io(src, source))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|source| NovmError::io(&from, source))?;

        if file_type.is_dir() {
            copy_tree(&from, &to)?;
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(&from).map_err(|source| NovmError::io(&from, source))?;
            remove_existing(&to)?;
            make_symlink(&target, &to)?;
        } else {
            remove_existing(&to)?;
            // std::fs::copy carries the permission bits along
            std::fs::copy(&from, &to).map_err(|source| NovmError::io(&to, source))?;
        }
    }
    Ok(())
}

fn remove_existing(path: &Path) -> NovmResult<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            std::fs::remove_dir_all(path).map_err(|source| NovmError::io(path, source))
        }
        Ok(_) => std::fs::remove_file(path).map_err(|source| NovmError::io(path, source)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(NovmError::io(path, source)),
    }
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> NovmResult<()> {
    std::os::unix::fs::symlink(target, link).map_err(|source| NovmError::io(link, source))
}

#[cfg(not(unix))]
fn make_symlink(target: &Path, link: &Path) -> NovmResult<()> {
    let resolved = link.parent().map(|p| p.join(target)).unwrap_or_default();
    std::fs::copy(&resolved, link)
        .map(|_| ())
        .map_err(|source| NovmError::io(link, source))
}

fn ensure_min_disk_space(path: &Path, minimum_bytes: u64) -> NovmResult<()> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut best_len = 0usize;
    let mut available = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if canonical.starts_with(mount) {
            let len = mount.as_os_str().len();
            if len >= best_len {
                best_len = len;
                available = Some(disk.available_space());
            }
        }
    }

    match available {
        Some(bytes) if bytes < minimum_bytes => Err(NovmError::InsufficientDiskSpace {
            path: canonical,
            available: bytes,
            required: minimum_bytes,
        }),
        _ => Ok(()),
    }
}

mod extract {
    use std::fs::File;
    use std::io::BufReader;
    use std::path::Path;

    use flate2::read::GzDecoder;

    use crate::core::error::{NovmError, NovmResult};

    /// Two explicit passes: gunzip to a sibling `.tar`, then unpack that.
    pub fn unpack_tar_gz(archive: &Path, dest: &Path) -> NovmResult<()> {
        let tar_path = archive.with_extension("");
        gunzip(archive, &tar_path)?;
        untar(&tar_path, dest)?;
        let _ = std::fs::remove_file(&tar_path);
        Ok(())
    }

    fn gunzip(archive: &Path, tar_path: &Path) -> NovmResult<()> {
        let input = File::open(archive).map_err(|source| NovmError::io(archive, source))?;
        let mut decoder = GzDecoder::new(BufReader::new(input));
        let mut output =
            File::create(tar_path).map_err(|source| NovmError::io(tar_path, source))?;
        std::io::copy(&mut decoder, &mut output).map_err(|e| NovmError::ArchiveExtraction {
            archive: archive.to_path_buf(),
            reason: format!("gzip: {e}"),
        })?;
        Ok(())
    }

    fn untar(tar_path: &Path, dest: &Path) -> NovmResult<()> {
        let input = File::open(tar_path).map_err(|source| NovmError::io(tar_path, source))?;
        let mut archive = tar::Archive::new(BufReader::new(input));
        archive.set_preserve_permissions(true);
        archive.unpack(dest).map_err(|e| NovmError::ArchiveExtraction {
            archive: tar_path.to_path_buf(),
            reason: format!("tar: {e}"),
        })
    }
}
