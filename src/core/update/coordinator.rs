// ─── Self-Update Coordinator ───
// Background task that checks for a newer manager release, stages it, and
// swaps it in only after the primary command has finished.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use semver::Version;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::error::{NovmError, NovmResult};
use crate::core::paths::{find_on_path, RootLayout, BIN_NAME};
use crate::core::platform::PlatformTarget;
use crate::core::state::UpdateState;

use super::barrier::PrimaryWait;
use super::feed::ReleaseFeed;
use super::signals::SignalGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Idle,
    Checking,
    NoUpdate,
    Staged,
    AwaitingBarrier,
    Swapping,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Nested invocation or updates disabled.
    Skipped,
    /// Checked too recently.
    Throttled,
    UpToDate,
    Updated { tag: String },
}

pub struct UpdateCoordinator {
    feed: Arc<dyn ReleaseFeed>,
    state_path: PathBuf,
    current_version: Version,
    asset_name: String,
    launch_path: Option<PathBuf>,
    skip: bool,
    phase: UpdatePhase,
}

impl UpdateCoordinator {
    pub fn new(
        feed: Arc<dyn ReleaseFeed>,
        layout: &RootLayout,
        platform: &PlatformTarget,
    ) -> NovmResult<Self> {
        let current_version = Version::parse(env!("CARGO_PKG_VERSION"))
            .map_err(|e| NovmError::Other(format!("invalid package version: {e}")))?;

        Ok(Self {
            feed,
            state_path: layout.state_file(),
            current_version,
            asset_name: platform.manager_asset_name(),
            launch_path: None,
            skip: false,
            phase: UpdatePhase::Idle,
        })
    }

    pub fn with_current_version(mut self, version: Version) -> Self {
        self.current_version = version;
        self
    }

    /// Replace this path instead of the running executable.
    pub fn with_launch_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.launch_path = Some(path.into());
        self
    }

    /// Go straight to `Done` when `skip` is set.
    pub fn skip_when(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    pub fn spawn(self, primary: PrimaryWait) -> JoinHandle<NovmResult<UpdateOutcome>> {
        tokio::spawn(self.run(primary))
    }

    /// Errors before the swap come back as [`NovmError::UpdateCheck`]; a
    /// failed swap is [`NovmError::Swap`].
    pub async fn run(mut self, mut primary: PrimaryWait) -> NovmResult<UpdateOutcome> {
        if self.skip {
            self.enter(UpdatePhase::Done);
            return Ok(UpdateOutcome::Skipped);
        }

        self.enter(UpdatePhase::Checking);
        let mut state = UpdateState::load(&self.state_path)
            .await
            .map_err(check_failed)?;
        let now = Utc::now();
        if !state.should_check(now) {
            self.enter(UpdatePhase::Done);
            return Ok(UpdateOutcome::Throttled);
        }

        // Persist before going to the network so a crash cannot cause a check storm
        state.record_check(now);
        state.save(&self.state_path).await.map_err(check_failed)?;

        let release = self.feed.latest().await.map_err(check_failed)?;
        let latest = release.version().ok_or_else(|| {
            check_failed(NovmError::Other(format!(
                "release tag {:?} is not a version",
                release.tag
            )))
        })?;
        if latest <= self.current_version {
            self.enter(UpdatePhase::NoUpdate);
            self.enter(UpdatePhase::Done);
            return Ok(UpdateOutcome::UpToDate);
        }

        let asset = release.asset(&self.asset_name).cloned().ok_or_else(|| {
            check_failed(NovmError::Other(format!(
                "release {} has no asset named {}",
                release.tag, self.asset_name
            )))
        })?;

        let staging = tempfile::Builder::new()
            .prefix("novm-update-")
            .tempdir()
            .map_err(|source| check_failed(NovmError::io(std::env::temp_dir(), source)))?;
        let staged = staging.path().join(BIN_NAME);

        let guard = SignalGuard::install(primary.clone()).map_err(check_failed)?;
        self.feed
            .download(&asset, &staged)
            .await
            .map_err(check_failed)?;
        self.enter(UpdatePhase::Staged);

        self.enter(UpdatePhase::AwaitingBarrier);
        primary.wait().await;

        self.enter(UpdatePhase::Swapping);
        info!("Updating novm to {}", release.tag);
        let launch = self.launch_path.clone();
        tokio::task::spawn_blocking(move || {
            let target = match launch {
                Some(path) => SwapTarget::resolve(&path)?,
                None => SwapTarget::current()?,
            };
            swap_binary(&staged, &target)
        })
        .await
        .map_err(|e| NovmError::Other(format!("Task join error: {e}")))??;
        drop(guard);
        drop(staging);

        self.enter(UpdatePhase::Done);
        Ok(UpdateOutcome::Updated { tag: release.tag })
    }

    fn enter(&mut self, phase: UpdatePhase) {
        debug!("update phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

fn check_failed(err: NovmError) -> NovmError {
    NovmError::UpdateCheck(Box::new(err))
}

/// The path the manager was launched through and the file behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapTarget {
    pub launch: PathBuf,
    pub real: PathBuf,
}

impl SwapTarget {
    pub fn resolve(launch: &Path) -> NovmResult<Self> {
        let real = std::fs::canonicalize(launch).map_err(|source| NovmError::Swap {
            path: launch.to_path_buf(),
            source,
        })?;
        Ok(Self {
            launch: launch.to_path_buf(),
            real,
        })
    }

    /// The running executable, falling back to the `node` shim on `PATH`.
    pub fn current() -> NovmResult<Self> {
        let launch = std::env::current_exe()
            .ok()
            .or_else(|| find_on_path("node"))
            .ok_or_else(|| NovmError::Swap {
                path: PathBuf::from(BIN_NAME),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "cannot locate the running novm binary",
                ),
            })?;
        Self::resolve(&launch)
    }
}

/// Copy `staged` next to the real binary, rename it over the original and
/// point the launch symlink back at it.
pub fn swap_binary(staged: &Path, target: &SwapTarget) -> NovmResult<()> {
    let swap_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| NovmError::Swap { path, source }
    };

    let dir = target.real.parent().unwrap_or(Path::new("."));
    let incoming = dir.join(format!(".{BIN_NAME}-{}", Uuid::new_v4()));

    std::fs::copy(staged, &incoming).map_err(swap_err(&incoming))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&incoming, std::fs::Permissions::from_mode(0o755))
            .map_err(swap_err(&incoming))?;
    }

    if let Err(source) = std::fs::rename(&incoming, &target.real) {
        let _ = std::fs::remove_file(&incoming);
        return Err(NovmError::Swap {
            path: target.real.clone(),
            source,
        });
    }

    relink(target)
}

#[cfg(unix)]
fn relink(target: &SwapTarget) -> NovmResult<()> {
    let is_link = std::fs::symlink_metadata(&target.launch)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false);
    if !is_link || target.launch == target.real {
        return Ok(());
    }

    let swap_err = |source: std::io::Error| NovmError::Swap {
        path: target.launch.clone(),
        source,
    };
    std::fs::remove_file(&target.launch).map_err(swap_err)?;
    std::os::unix::fs::symlink(&target.real, &target.launch).map_err(swap_err)
}

#[cfg(not(unix))]
fn relink(_target: &SwapTarget) -> NovmResult<()> {
    Ok(())
}
