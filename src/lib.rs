mod commands;
pub mod core;

use std::ffi::{OsStr, OsString};
use std::future::Future;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::commands::{Cli, CommandContext};
use crate::core::config::NovmConfig;
use crate::core::detect::resolve_request;
use crate::core::error::{NovmError, NovmResult};
use crate::core::http::build_http_client;
use crate::core::node::NodeManager;
use crate::core::paths::{RootLayout, BIN_NAME};
use crate::core::platform::PlatformTarget;
use crate::core::update::{barrier, GithubReleaseFeed, UpdateCoordinator, UpdateOutcome};
use crate::core::version::NESTED_INVOCATION_ENV;

/// Forces the manager CLI whatever name the binary was started under.
const WAKE_ENV: &str = "NOVM_WAKE";

/// What argv[0] asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Invocation {
    Manager,
    Node,
    /// `npm`, `npx` or `corepack` from the resolved install.
    Sibling(&'static str),
}

fn invocation(argv0: &OsStr, wake: bool) -> Invocation {
    if wake {
        return Invocation::Manager;
    }
    let name = Path::new(argv0)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match name.as_str() {
        "node" => Invocation::Node,
        "npm" => Invocation::Sibling("npm"),
        "npx" => Invocation::Sibling("npx"),
        "corepack" => Invocation::Sibling("corepack"),
        _ => Invocation::Manager,
    }
}

/// Entry point for the binary. Returns the process exit code.
pub async fn run() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,novm_lib=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<OsString> = std::env::args_os().collect();
    let argv0 = args.first().cloned().unwrap_or_else(|| OsString::from(BIN_NAME));
    let wake = std::env::var_os(WAKE_ENV).is_some();

    let result = match invocation(&argv0, wake) {
        Invocation::Manager => run_manager(&args).await,
        other => run_proxied(other, args.get(1..).unwrap_or_default()).await,
    };

    result.unwrap_or_else(|e| {
        error!("{}", e);
        1
    })
}

async fn run_manager(args: &[OsString]) -> NovmResult<i32> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return Ok(e.exit_code());
        }
    };

    let layout = RootLayout::from_env()?;
    let ctx = CommandContext {
        config: NovmConfig::load(&layout),
        client: build_http_client()?,
        layout,
    };
    commands::execute(cli.command, &ctx).await?;
    Ok(0)
}

// ── Proxied runtime ──

async fn run_proxied(invocation: Invocation, args: &[OsString]) -> NovmResult<i32> {
    let layout = RootLayout::from_env()?;
    layout.ensure_root()?;
    let config = NovmConfig::load(&layout);
    let client = build_http_client()?;
    let platform = PlatformTarget::detect()?;

    let nested = std::env::var_os(NESTED_INVOCATION_ENV).is_some();
    let feed = Arc::new(GithubReleaseFeed::new(client.clone(), &config.update_url));
    let updater =
        UpdateCoordinator::new(feed, &layout, &platform)?.skip_when(nested || !config.auto_update);

    let primary = run_primary(invocation, args, &layout, &config, client);
    Ok(supervise(updater, primary).await)
}

/// Run `primary` next to the self-update task and return the process exit
/// code. "Primary done" is raised whether `primary` succeeds or fails, and
/// update diagnostics are only logged after it has finished.
async fn supervise<F>(updater: UpdateCoordinator, primary: F) -> i32
where
    F: Future<Output = NovmResult<ExitStatus>>,
{
    let (done, wait) = barrier();
    let handle = updater.spawn(wait);

    let outcome = primary.await;
    done.signal();

    let code = match outcome {
        Ok(status) => exit_code(status),
        Err(e) => {
            error!("{}", e);
            1
        }
    };

    match handle.await {
        Ok(Ok(UpdateOutcome::Updated { tag })) => info!("novm updated to {}", tag),
        Ok(Ok(UpdateOutcome::UpToDate)) => debug!("novm is up to date"),
        Ok(Ok(_)) => {}
        Ok(Err(e @ NovmError::Swap { .. })) => {
            error!("failed to replace the novm executable: {}", e);
            return 1;
        }
        Ok(Err(e)) => warn!("{}", e),
        Err(e) => warn!("update task stopped: {}", e),
    }

    code
}

async fn run_primary(
    invocation: Invocation,
    args: &[OsString],
    layout: &RootLayout,
    config: &NovmConfig,
    client: reqwest::Client,
) -> NovmResult<ExitStatus> {
    let cwd = std::env::current_dir().map_err(|source| NovmError::io(".", source))?;
    let request = resolve_request(&cwd, &layout.versions_dir(), |key| std::env::var(key).ok())?;
    debug!("Requested node {} via {}", request.request, request.source);

    let node = NodeManager::new(&request.request, false, layout, config, client).await?;
    node.ensure_installed().await?;

    let target = match invocation {
        Invocation::Sibling(tool) => node.sibling(tool),
        Invocation::Node | Invocation::Manager => node,
    };
    target.run(args).await
}

/// Child exit code, or `128 + signo` when it was killed by a signal.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv0_selects_invocation() {
        assert_eq!(invocation(OsStr::new("/home/dev/.novm/bin/node"), false), Invocation::Node);
        assert_eq!(invocation(OsStr::new("npx"), false), Invocation::Sibling("npx"));
        assert_eq!(invocation(OsStr::new("corepack"), false), Invocation::Sibling("corepack"));
        assert_eq!(invocation(OsStr::new("/usr/bin/novm"), false), Invocation::Manager);
        assert_eq!(invocation(OsStr::new("node"), true), Invocation::Manager);
    }

    #[cfg(unix)]
    #[test]
    fn signal_deaths_map_above_128() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(2)), 130);
        assert_eq!(exit_code(ExitStatus::from_raw(15)), 143);
    }

    #[cfg(unix)]
    mod rendezvous {
        use std::os::unix::process::ExitStatusExt;

        use semver::Version;

        use super::*;
        use crate::core::platform::{Arch, Os};
        use crate::core::testing::{signal_lock, FakeFeed};

        fn updater(feed: Arc<FakeFeed>, layout: &RootLayout) -> UpdateCoordinator {
            UpdateCoordinator::new(feed, layout, &PlatformTarget::new(Os::Linux, Arch::X64))
                .unwrap()
                .with_current_version(Version::new(0, 4, 0))
        }

        #[tokio::test]
        async fn offline_feed_keeps_the_child_exit_code() {
            let tmp = tempfile::tempdir().unwrap();
            let layout = RootLayout::new(tmp.path());

            let code = supervise(updater(FakeFeed::offline(), &layout), async {
                Ok(ExitStatus::from_raw(3 << 8))
            })
            .await;
            assert_eq!(code, 3);
        }

        #[tokio::test]
        async fn failed_swap_exits_with_one() {
            let _lock = signal_lock();
            let tmp = tempfile::tempdir().unwrap();
            let layout = RootLayout::new(tmp.path());
            let updater = updater(FakeFeed::serving("v0.5.0", "novm-linux-x64"), &layout)
                .with_launch_path(tmp.path().join("gone"));

            let code = supervise(updater, async { Ok(ExitStatus::from_raw(0)) }).await;
            assert_eq!(code, 1);
        }

        #[tokio::test]
        async fn updater_finishes_when_the_primary_fails() {
            let _lock = signal_lock();
            let tmp = tempfile::tempdir().unwrap();
            let layout = RootLayout::new(tmp.path().join(".novm"));
            layout.ensure_root().unwrap();

            let real = tmp.path().join("novm-real");
            std::fs::write(&real, b"old").unwrap();
            let launch = tmp.path().join("node");
            std::os::unix::fs::symlink(&real, &launch).unwrap();

            let updater = updater(FakeFeed::serving("v0.5.0", "novm-linux-x64"), &layout)
                .with_launch_path(&launch);
            let code = supervise(updater, async { Err(NovmError::NotInstalled) }).await;

            assert_eq!(code, 1);
            assert_eq!(std::fs::read(&real).unwrap(), b"#!/bin/sh\necho new\n");
        }
    }
}
