// ─── Manager CLI ───
// What `novm` does when it is invoked under its own name.

use std::path::Path;

use clap::{Parser, Subcommand};
use semver::Version;
use tracing::{info, warn};

use crate::core::config::NovmConfig;
use crate::core::error::{NovmError, NovmResult};
use crate::core::node::NodeManager;
use crate::core::paths::RootLayout;
use crate::core::platform::PlatformTarget;
use crate::core::setup;
use crate::core::version::{resolve, Catalog, VersionSpec};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_COMMIT: &str = match option_env!("NOVM_GIT_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};
pub const BUILD_TIME: &str = match option_env!("NOVM_BUILD_TIME") {
    Some(time) => time,
    None => "unknown",
};

#[derive(Parser, Debug)]
#[command(
    name = "novm",
    about = "Node.js version manager that stands in for node and npm",
    disable_version_flag = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Print version, commit and build time
    Version,

    /// Link node, npm and npx to this executable and set npm's global prefix
    Install,

    /// Resolve a version and install it if needed
    Ensure {
        /// Exact version, range, `latest` or `lts`
        version: String,

        /// Use the node on PATH and install into /usr/local
        #[arg(long)]
        global: bool,
    },

    /// Show which release a version resolves to, without installing
    Resolve {
        version: String,
    },

    /// List installed versions, newest first
    Ls,
}

/// Shared handles for every subcommand.
pub struct CommandContext {
    pub layout: RootLayout,
    pub config: NovmConfig,
    pub client: reqwest::Client,
}

pub async fn execute(command: Command, ctx: &CommandContext) -> NovmResult<()> {
    match command {
        Command::Version => {
            println!("Version: {VERSION}\nGitCommit: {GIT_COMMIT}\nBuildTime: {BUILD_TIME}");
            Ok(())
        }
        Command::Install => install(ctx),
        Command::Ensure { version, global } => ensure(ctx, &version, global).await,
        Command::Resolve { version } => resolve_only(ctx, &version).await,
        Command::Ls => {
            for (version, platforms) in list_installed(&ctx.layout.versions_dir())? {
                println!("v{version}\t{}", platforms.join(" "));
            }
            Ok(())
        }
    }
}

fn install(ctx: &CommandContext) -> NovmResult<()> {
    ctx.layout.ensure_root()?;
    let exe = std::env::current_exe().map_err(|source| NovmError::io("current_exe", source))?;
    setup::install_shims(&ctx.layout, &exe)?;

    let home = dirs::home_dir()
        .ok_or_else(|| NovmError::Other("failed to detect home directory".into()))?;
    setup::set_npm_prefix(&home.join(".npmrc"), ctx.layout.root())?;

    info!(
        "Installed shims; add {:?} to PATH ahead of any other node",
        ctx.layout.bin_dir()
    );
    Ok(())
}

async fn ensure(ctx: &CommandContext, request: &str, global: bool) -> NovmResult<()> {
    let node = NodeManager::new(
        request,
        global,
        &ctx.layout,
        &ctx.config,
        ctx.client.clone(),
    )
    .await?;

    if node.ensure_installed().await? {
        info!("Installed node {}", node.version());
    }
    println!("{}", node.bin_path().display());
    Ok(())
}

async fn resolve_only(ctx: &CommandContext, request: &str) -> NovmResult<()> {
    let spec = VersionSpec::parse(request)?;
    let platform = PlatformTarget::detect()?;
    let catalog = Catalog::load(&ctx.layout, &ctx.client, &ctx.config.release_index_url()).await?;
    let resolved = resolve(&spec, &catalog, &platform, &ctx.layout)?;

    println!(
        "{} {}-{} {}",
        resolved.version,
        resolved.os.as_str(),
        resolved.arch.as_str(),
        resolved.install_dir.display()
    );
    Ok(())
}

/// `versions/<v>/<os>/<arch>` trees on disk, newest version first, with
/// their `<os>-<arch>` pairs.
pub fn list_installed(versions_dir: &Path) -> NovmResult<Vec<(Version, Vec<String>)>> {
    let entries = match std::fs::read_dir(versions_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(NovmError::io(versions_dir, source)),
    };

    let mut installed = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| NovmError::io(versions_dir, source))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(version) = name.strip_prefix('v').and_then(|v| Version::parse(v).ok()) else {
            warn!("Skipping unknown entry {:?} in {:?}", name, versions_dir);
            continue;
        };

        let mut platforms = Vec::new();
        for os in subdirs(&entry.path())? {
            for arch in subdirs(&entry.path().join(&os))? {
                platforms.push(format!("{os}-{arch}"));
            }
        }
        platforms.sort();
        installed.push((version, platforms));
    }

    installed.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(installed)
}

fn subdirs(dir: &Path) -> NovmResult<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|source| NovmError::io(dir, source))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| NovmError::io(dir, source))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["novm", "ensure", "^18", "--global"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Ensure {
                version: "^18".into(),
                global: true
            }
        );

        let cli = Cli::try_parse_from(["novm", "resolve", "lts"]).unwrap();
        assert_eq!(cli.command, Command::Resolve { version: "lts".into() });

        assert!(Cli::try_parse_from(["novm", "ensure"]).is_err());
    }

    #[test]
    fn lists_newest_first_with_platforms() {
        let tmp = tempfile::tempdir().unwrap();
        let versions = tmp.path().join("versions");
        for dir in [
            "v16.20.2/linux/x64",
            "v18.16.0/darwin/arm64",
            "v18.16.0/darwin/x64",
            "v9.0.0/linux/x64",
        ] {
            std::fs::create_dir_all(versions.join(dir)).unwrap();
        }
        std::fs::write(versions.join("stray.txt"), b"x").unwrap();

        let listed = list_installed(&versions).unwrap();
        let names: Vec<String> = listed.iter().map(|(v, _)| v.to_string()).collect();
        assert_eq!(names, vec!["18.16.0", "16.20.2", "9.0.0"]);
        assert_eq!(listed[0].1, vec!["darwin-arm64", "darwin-x64"]);
    }

    #[test]
    fn missing_versions_dir_lists_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(list_installed(&tmp.path().join("versions")).unwrap().is_empty());
    }
}
