// ─── Version Detection ───
// Works out which Node.js version the current project asks for.

use std::fmt;
use std::path::Path;

use semver::Version;
use serde::Deserialize;
use tracing::warn;

use crate::core::error::{NovmError, NovmResult};
use crate::core::version::VERSION_OVERRIDE_ENV;

const DEPRECATED_OVERRIDE_ENV: &str = "NP_NODE_VERSION";
const PACKAGE_JSON: &str = "package.json";
const NVMRC: &str = ".nvmrc";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSource {
    Environment,
    PackageJson,
    Nvmrc,
    /// Nothing requested; newest version already on disk.
    Installed,
}

impl fmt::Display for RequestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestSource::Environment => "environment",
            RequestSource::PackageJson => PACKAGE_JSON,
            RequestSource::Nvmrc => NVMRC,
            RequestSource::Installed => "installed versions",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRequest {
    pub request: String,
    pub source: RequestSource,
}

impl VersionRequest {
    fn new(request: impl Into<String>, source: RequestSource) -> Self {
        Self {
            request: request.into(),
            source,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PackageJson {
    #[serde(default)]
    engines: NodeField,
    #[serde(default)]
    volta: NodeField,
}

#[derive(Debug, Default, Deserialize)]
struct NodeField {
    #[serde(default)]
    node: Option<String>,
}

/// Environment first, then `package.json` (`engines.node`, `volta.node`),
/// then `.nvmrc`, all looked up in `dir`.
pub fn detect_version_request(
    dir: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> NovmResult<Option<VersionRequest>> {
    if let Some(request) = env(VERSION_OVERRIDE_ENV).filter(|v| !v.trim().is_empty()) {
        return Ok(Some(VersionRequest::new(request, RequestSource::Environment)));
    }
    if let Some(request) = env(DEPRECATED_OVERRIDE_ENV).filter(|v| !v.trim().is_empty()) {
        warn!("{DEPRECATED_OVERRIDE_ENV} is deprecated, use {VERSION_OVERRIDE_ENV} instead");
        return Ok(Some(VersionRequest::new(request, RequestSource::Environment)));
    }

    if let Some(request) = from_package_json(&dir.join(PACKAGE_JSON))? {
        return Ok(Some(VersionRequest::new(request, RequestSource::PackageJson)));
    }

    if let Some(request) = from_nvmrc(&dir.join(NVMRC))? {
        return Ok(Some(VersionRequest::new(request, RequestSource::Nvmrc)));
    }

    Ok(None)
}

fn from_package_json(path: &Path) -> NovmResult<Option<String>> {
    let Some(raw) = read_optional(path)? else {
        return Ok(None);
    };
    let manifest: PackageJson = serde_json::from_str(&raw)
        .map_err(|e| NovmError::Other(format!("failed to read {}: {e}", path.display())))?;

    Ok([manifest.engines.node, manifest.volta.node]
        .into_iter()
        .flatten()
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty()))
}

fn from_nvmrc(path: &Path) -> NovmResult<Option<String>> {
    Ok(read_optional(path)?.and_then(|raw| normalize_nvmrc(&raw)))
}

/// First non-comment line of an `.nvmrc`, with nvm aliases mapped onto
/// the manager's sentinels.
pub fn normalize_nvmrc(raw: &str) -> Option<String> {
    let line = raw
        .lines()
        .map(|l| l.split('#').next().unwrap_or("").trim())
        .find(|l| !l.is_empty())?;

    let lower = line.to_ascii_lowercase();
    let mapped = if lower.starts_with("lts/") {
        "lts"
    } else if lower == "node" || lower == "latest" || lower == "current" {
        "latest"
    } else {
        line
    };
    Some(mapped.to_string())
}

fn read_optional(path: &Path) -> NovmResult<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(NovmError::io(path, source)),
    }
}

/// Newest `v*` directory under `versions_dir`; `latest` when there is none.
pub fn find_max_installed_version(versions_dir: &Path) -> NovmResult<String> {
    let entries = match std::fs::read_dir(versions_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok("latest".into()),
        Err(source) => return Err(NovmError::io(versions_dir, source)),
    };

    let mut newest: Option<(Version, String)> = None;
    for entry in entries {
        let entry = entry.map_err(|source| NovmError::io(versions_dir, source))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let version = name
            .strip_prefix('v')
            .and_then(|raw| Version::parse(raw).ok())
            .ok_or_else(|| {
                NovmError::Other(format!(
                    "install directory {} is polluted with unknown entry {name}",
                    versions_dir.display()
                ))
            })?;

        if newest.as_ref().map_or(true, |(max, _)| version > *max) {
            newest = Some((version, name));
        }
    }

    Ok(newest.map(|(_, name)| name).unwrap_or_else(|| "latest".into()))
}

/// Detected request, else the newest installed version.
pub fn resolve_request(
    dir: &Path,
    versions_dir: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> NovmResult<VersionRequest> {
    if let Some(found) = detect_version_request(dir, env)? {
        return Ok(found);
    }
    let installed = find_max_installed_version(versions_dir)?;
    Ok(VersionRequest::new(installed, RequestSource::Installed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn environment_wins_over_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(NVMRC), "16\n").unwrap();

        let found = detect_version_request(tmp.path(), |key| {
            (key == "NOVM_NODE_VERSION").then(|| "18.2.0".to_string())
        })
        .unwrap()
        .unwrap();
        assert_eq!(found, VersionRequest::new("18.2.0", RequestSource::Environment));

        let deprecated = detect_version_request(tmp.path(), |key| {
            (key == "NP_NODE_VERSION").then(|| "14".to_string())
        })
        .unwrap()
        .unwrap();
        assert_eq!(deprecated.request, "14");
    }

    #[test]
    fn image_wide_node_version_is_not_a_request() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(NVMRC), "16\n").unwrap();

        let found = detect_version_request(tmp.path(), |key| {
            (key == "NODE_VERSION").then(|| "20.11.1".to_string())
        })
        .unwrap()
        .unwrap();
        assert_eq!(found, VersionRequest::new("16", RequestSource::Nvmrc));
    }

    #[test]
    fn package_json_prefers_engines_then_volta() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(PACKAGE_JSON);

        std::fs::write(&path, r#"{"engines":{"node":">=18"},"volta":{"node":"20.1.0"}}"#).unwrap();
        let found = detect_version_request(tmp.path(), no_env).unwrap().unwrap();
        assert_eq!(found, VersionRequest::new(">=18", RequestSource::PackageJson));

        std::fs::write(&path, r#"{"name":"app","volta":{"node":"20.1.0"}}"#).unwrap();
        let found = detect_version_request(tmp.path(), no_env).unwrap().unwrap();
        assert_eq!(found.request, "20.1.0");
    }

    #[test]
    fn package_json_without_node_falls_through_to_nvmrc() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(PACKAGE_JSON), r#"{"name":"app"}"#).unwrap();
        std::fs::write(tmp.path().join(NVMRC), "lts/hydrogen\n").unwrap();

        let found = detect_version_request(tmp.path(), no_env).unwrap().unwrap();
        assert_eq!(found, VersionRequest::new("lts", RequestSource::Nvmrc));
    }

    #[test]
    fn broken_package_json_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(PACKAGE_JSON), "{ not json").unwrap();
        assert!(detect_version_request(tmp.path(), no_env).is_err());
    }

    #[test]
    fn nvmrc_aliases() {
        assert_eq!(normalize_nvmrc("v18.16.0\n").as_deref(), Some("v18.16.0"));
        assert_eq!(normalize_nvmrc("lts/*").as_deref(), Some("lts"));
        assert_eq!(normalize_nvmrc("node").as_deref(), Some("latest"));
        assert_eq!(normalize_nvmrc("# pinned\n20 # current LTS\n").as_deref(), Some("20"));
        assert_eq!(normalize_nvmrc("\n\n"), None);
    }

    #[test]
    fn max_installed_version() {
        let tmp = tempfile::tempdir().unwrap();
        let versions = tmp.path().join("versions");
        assert_eq!(find_max_installed_version(&versions).unwrap(), "latest");

        std::fs::create_dir_all(&versions).unwrap();
        assert_eq!(find_max_installed_version(&versions).unwrap(), "latest");

        for v in ["v16.20.2", "v18.9.0", "v18.16.0"] {
            std::fs::create_dir_all(versions.join(v)).unwrap();
        }
        assert_eq!(find_max_installed_version(&versions).unwrap(), "v18.16.0");

        std::fs::write(versions.join("notes.txt"), b"x").unwrap();
        assert!(find_max_installed_version(&versions).is_err());
    }

    #[test]
    fn fallback_reports_installed_source() {
        let tmp = tempfile::tempdir().unwrap();
        let found = resolve_request(tmp.path(), &tmp.path().join("versions"), no_env).unwrap();
        assert_eq!(found, VersionRequest::new("latest", RequestSource::Installed));
    }
}
