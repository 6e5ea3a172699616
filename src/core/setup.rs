// ─── First-run Setup ───
// Puts `node`/`npm`/`npx` shims in `root/bin` and points npm's global
// prefix at the root so globally installed tools land next to them.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::core::error::{NovmError, NovmResult};
use crate::core::paths::{find_on_path, RootLayout};

pub const SHIM_NAMES: [&str; 3] = ["node", "npm", "npx"];

/// Force-link every shim in `root/bin` to `exe`, replacing what is there.
pub fn install_shims(layout: &RootLayout, exe: &Path) -> NovmResult<Vec<PathBuf>> {
    let bin_dir = layout.bin_dir();
    std::fs::create_dir_all(&bin_dir).map_err(|source| NovmError::io(&bin_dir, source))?;

    if let Some(existing) = find_on_path("node") {
        if !existing.starts_with(&bin_dir) {
            warn!(
                "node is already installed at {:?}; put {:?} first on PATH",
                existing, bin_dir
            );
        }
    }

    let mut created = Vec::with_capacity(SHIM_NAMES.len());
    for name in SHIM_NAMES {
        let link = bin_dir.join(name);
        force_symlink(exe, &link)?;
        info!("Linked {:?} -> {:?}", link, exe);
        created.push(link);
    }
    Ok(created)
}

fn force_symlink(target: &Path, link: &Path) -> NovmResult<()> {
    match std::fs::symlink_metadata(link) {
        Ok(_) => std::fs::remove_file(link).map_err(|source| NovmError::io(link, source))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => return Err(NovmError::io(link, source)),
    }
    symlink(target, link)
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> NovmResult<()> {
    std::os::unix::fs::symlink(target, link).map_err(|source| NovmError::io(link, source))
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> NovmResult<()> {
    std::fs::copy(target, link)
        .map(|_| ())
        .map_err(|source| NovmError::io(link, source))
}

/// Rewrite every `prefix=` line of an npmrc, or append one.
pub fn update_npm_prefix(contents: &str, prefix: &str) -> String {
    let line = format!("prefix={prefix}");
    let mut replaced = false;

    let mut lines: Vec<String> = contents
        .lines()
        .map(|current| {
            if is_prefix_line(current) {
                replaced = true;
                line.clone()
            } else {
                current.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(line);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn is_prefix_line(line: &str) -> bool {
    line.trim_start()
        .strip_prefix("prefix")
        .map(|rest| rest.trim_start().starts_with('='))
        .unwrap_or(false)
}

/// Apply [`update_npm_prefix`] to the npmrc at `npmrc`, creating it if needed.
pub fn set_npm_prefix(npmrc: &Path, prefix: &Path) -> NovmResult<()> {
    let current = match std::fs::read_to_string(npmrc) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(source) => return Err(NovmError::io(npmrc, source)),
    };

    let updated = update_npm_prefix(&current, &prefix.to_string_lossy());
    std::fs::write(npmrc, updated).map_err(|source| NovmError::io(npmrc, source))
}
