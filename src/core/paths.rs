use std::path::{Path, PathBuf};

use crate::core::error::{NovmError, NovmResult};

pub const NOVM_DIR: &str = ".novm";
pub const BIN_NAME: &str = "novm";

const ROOT_ENV: &str = "NOVM_DIR";
const CATALOG_CACHE_FILE: &str = "node_versions.json";
const STATE_FILE: &str = "state.json";
const CONFIG_FILE: &str = "config.json";

/// On-disk layout under the manager's root directory.
///
/// ```text
/// root/
///   bin/                 node, npm, npx shims
///   versions/<v>/<os>/<arch>/bin/node
///   node_versions.json   release catalog cache
///   state.json           self-update throttle
///   config.json          optional settings
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootLayout {
    root: PathBuf,
}

impl RootLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$NOVM_DIR`, else `~/.novm`.
    pub fn from_env() -> NovmResult<Self> {
        if let Some(dir) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(dir));
        }

        let home = dirs::home_dir()
            .ok_or_else(|| NovmError::Other("failed to detect home directory".into()))?;
        Ok(Self::new(home.join(NOVM_DIR)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.root.join("versions")
    }

    pub fn catalog_cache(&self) -> PathBuf {
        self.root.join(CATALOG_CACHE_FILE)
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Create the root directory, refusing to continue if something other
    /// than a directory already sits there.
    pub fn ensure_root(&self) -> NovmResult<()> {
        match std::fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(NovmError::Other(format!(
                "expected {:?} to be a directory",
                self.root
            ))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                std::fs::create_dir_all(&self.root).map_err(|source| NovmError::Io {
                    path: self.root.clone(),
                    source,
                })
            }
            Err(source) => Err(NovmError::Io {
                path: self.root.clone(),
                source,
            }),
        }
    }
}

/// Look a program up on `PATH` the way a shell would.
pub fn find_on_path(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
