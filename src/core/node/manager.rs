// ─── Node Manager ───
// Owns one resolved Node.js version: makes sure it is installed and runs it
// (or a sibling tool from the same bin directory) with the pinned environment.

use std::ffi::OsStr;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output, Stdio};

use tokio::process::Command;
use tracing::{debug, info};

use crate::core::config::NovmConfig;
use crate::core::downloader::Downloader;
use crate::core::error::{NovmError, NovmResult};
use crate::core::paths::{find_on_path, RootLayout};
use crate::core::platform::PlatformTarget;
use crate::core::version::{resolve, Catalog, ResolvedVersion, VersionSpec};

use super::installer::Installer;

#[derive(Debug, Clone)]
pub struct NodeManager {
    resolved: ResolvedVersion,
    /// The `node` binary whose `--version` decides whether to install.
    node_path: PathBuf,
    /// The binary `run` executes; differs from `node_path` for siblings.
    bin_path: PathBuf,
    global: bool,
    installer: Installer,
}

impl NodeManager {
    /// Resolve `request` against the release catalog for this host.
    pub async fn new(
        request: &str,
        global: bool,
        layout: &RootLayout,
        config: &NovmConfig,
        client: reqwest::Client,
    ) -> NovmResult<Self> {
        let spec = VersionSpec::parse(request)?;
        let platform = PlatformTarget::detect()?;
        let catalog = Catalog::load(layout, &client, &config.release_index_url()).await?;
        let resolved = resolve(&spec, &catalog, &platform, layout)?;

        let downloader = Downloader::new(client).with_progress(std::io::stderr().is_terminal());
        Self::from_resolved(resolved, Installer::new(downloader, config.mirror()), global)
    }

    /// Global mode runs the `node` already on `PATH` and fails with
    /// [`NovmError::NotInstalled`] when there is none.
    pub fn from_resolved(
        resolved: ResolvedVersion,
        installer: Installer,
        global: bool,
    ) -> NovmResult<Self> {
        let node_path = if global {
            find_on_path("node").ok_or(NovmError::NotInstalled)?
        } else {
            resolved.bin_path.clone()
        };

        Ok(Self {
            bin_path: node_path.clone(),
            node_path,
            resolved,
            global,
            installer,
        })
    }

    pub fn resolved(&self) -> &ResolvedVersion {
        &self.resolved
    }

    pub fn version(&self) -> &str {
        &self.resolved.version
    }

    pub fn bin_path(&self) -> &Path {
        &self.bin_path
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    /// Same version and environment, pointed at another tool next to `node`.
    pub fn sibling(&self, tool: &str) -> Self {
        let dir = self.node_path.parent().unwrap_or(Path::new(""));
        Self {
            bin_path: dir.join(tool),
            ..self.clone()
        }
    }

    pub fn npm(&self) -> Self {
        self.sibling("npm")
    }

    /// What the installed `node` reports, or `None` if it cannot be run.
    pub async fn installed_version(&self) -> Option<String> {
        let output = Command::new(&self.node_path)
            .arg("--version")
            .env_clear()
            .envs(self.environment())
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            return None;
        }
        let reported = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("{:?} reports {}", self.node_path, reported);
        Some(reported)
    }

    /// Install when the binary is missing or reports another version.
    /// Returns whether an install happened.
    pub async fn ensure_installed(&self) -> NovmResult<bool> {
        if self.installed_version().await.as_deref() == Some(self.version()) {
            return Ok(false);
        }

        info!("Installing node {}", self.version());
        self.installer.install(&self.resolved, self.global).await?;
        Ok(true)
    }

    /// Run with inherited stdio and wait for the exit status.
    pub async fn run<I, S>(&self, args: I) -> NovmResult<ExitStatus>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        debug!("Running {:?}", self.bin_path);
        self.command(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| NovmError::ProcessStart {
                binary: self.bin_path.clone(),
                source,
            })
    }

    /// Run and collect stdout/stderr instead of inheriting them.
    pub async fn capture_output<I, S>(&self, args: I) -> NovmResult<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.command(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| NovmError::ProcessStart {
                binary: self.bin_path.clone(),
                source,
            })
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.bin_path);
        cmd.args(args).env_clear().envs(self.environment());
        cmd
    }

    fn environment(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> + '_ {
        self.resolved
            .environment
            .iter()
            .map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }
}
