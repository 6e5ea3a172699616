// ─── Version Resolver ───
// Picks the single catalog entry a spec resolves to on this platform and
// derives the install paths and runtime environment for it.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::core::error::{NovmError, NovmResult};
use crate::core::paths::RootLayout;
use crate::core::platform::{Arch, Os, PlatformTarget};

use super::catalog::{Catalog, CatalogEntry};
use super::spec::{Comparison, VersionSpec};

/// Pins the resolved version for nested invocations (lifecycle scripts,
/// `npm` spawning `node`, ...).
pub const VERSION_OVERRIDE_ENV: &str = "NOVM_NODE_VERSION";
/// Set for processes spawned through the manager; nested runs skip self-update.
pub const NESTED_INVOCATION_ENV: &str = "NOVM_NESTED";

/// A catalog entry plus the architecture whose artifact will be installed.
#[derive(Debug, Clone, Copy)]
pub struct Selection<'c> {
    pub entry: &'c CatalogEntry,
    pub arch: Arch,
}

/// Concrete version chosen for this invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub version: String,
    pub os: Os,
    pub arch: Arch,
    pub install_dir: PathBuf,
    pub bin_path: PathBuf,
    /// Full environment for the runtime, `PATH` first. Values are kept as
    /// `OsString` so non-UTF-8 variables reach the child untouched.
    pub environment: Vec<(OsString, OsString)>,
}

impl ResolvedVersion {
    pub fn new<I, K, V>(
        version: &str,
        os: Os,
        arch: Arch,
        layout: &RootLayout,
        base_env: I,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let install_dir = layout
            .versions_dir()
            .join(version)
            .join(os.as_str())
            .join(arch.as_str());
        let bin_path = install_dir.join("bin").join("node");
        let environment = runtime_environment(version, &install_dir.join("bin"), base_env);

        Self {
            version: version.to_string(),
            os,
            arch,
            install_dir,
            bin_path,
            environment,
        }
    }

    pub fn bin_dir(&self) -> &Path {
        self.bin_path.parent().unwrap_or(&self.install_dir)
    }

    pub fn env_var(&self, key: &str) -> Option<&OsStr> {
        self.environment
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_os_str())
    }
}

/// Resolve against the current process environment.
pub fn resolve(
    spec: &VersionSpec,
    catalog: &Catalog,
    platform: &PlatformTarget,
    layout: &RootLayout,
) -> NovmResult<ResolvedVersion> {
    resolve_with_env(spec, catalog, platform, layout, std::env::vars_os())
}

#[instrument(skip(catalog, layout, base_env))]
pub fn resolve_with_env<I, K, V>(
    spec: &VersionSpec,
    catalog: &Catalog,
    platform: &PlatformTarget,
    layout: &RootLayout,
    base_env: I,
) -> NovmResult<ResolvedVersion>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<OsString>,
    V: Into<OsString>,
{
    let selection = select(spec, catalog, platform)?;
    debug!(
        "Resolved {} to {} ({})",
        spec, selection.entry.version, selection.arch
    );

    Ok(ResolvedVersion::new(
        &selection.entry.version,
        platform.os(),
        selection.arch,
        layout,
        base_env,
    ))
}

/// Choose the entry for `spec`, scanning the catalog newest first.
pub fn select<'c>(
    spec: &VersionSpec,
    catalog: &'c Catalog,
    platform: &PlatformTarget,
) -> NovmResult<Selection<'c>> {
    if spec.is_sentinel() {
        let arch = platform.arch();
        return catalog
            .entries()
            .iter()
            .filter(|entry| spec.compare(entry).is_match())
            .find(|entry| platform.is_published(arch, &entry.files))
            .map(|entry| Selection { entry, arch })
            .ok_or_else(|| {
                NovmError::VersionNotFound(format!(
                    "{spec} ({})",
                    platform.file_type(arch)
                ))
            });
    }

    let mut candidates: Vec<&CatalogEntry> = Vec::new();
    for entry in catalog.entries() {
        match spec.compare(entry) {
            Comparison::Equal => {
                candidates.push(entry);
                break;
            }
            Comparison::Satisfies => candidates.push(entry),
            _ => {}
        }
    }

    let Some(first) = candidates.first() else {
        return Err(NovmError::VersionNotFound(spec.to_string()));
    };

    candidates
        .iter()
        .copied()
        .find_map(|entry| {
            let version = entry.semver()?;
            let arch = platform.arch_for_release(&version);
            platform
                .is_published(arch, &entry.files)
                .then_some(Selection { entry, arch })
        })
        .ok_or_else(|| {
            let arch = first
                .semver()
                .map(|v| platform.arch_for_release(&v))
                .unwrap_or_else(|| platform.arch());
            NovmError::VersionNotForPlatform {
                version: if candidates.len() == 1 {
                    first.version.clone()
                } else {
                    spec.to_string()
                },
                file_type: platform.file_type(arch),
            }
        })
}

fn runtime_environment<I, K, V>(
    version: &str,
    bin_dir: &Path,
    base_env: I,
) -> Vec<(OsString, OsString)>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<OsString>,
    V: Into<OsString>,
{
    let mut inherited_path: Option<OsString> = None;
    let mut environment: Vec<(OsString, OsString)> = Vec::new();

    for (key, value) in base_env {
        let (key, value) = (key.into(), value.into());
        if key == "PATH" {
            inherited_path = Some(value);
        } else if key != VERSION_OVERRIDE_ENV && key != NESTED_INVOCATION_ENV {
            environment.push((key, value));
        }
    }

    let mut dirs: Vec<PathBuf> = vec![bin_dir.to_path_buf()];
    if let Some(path) = &inherited_path {
        dirs.extend(std::env::split_paths(path));
    }
    let path = std::env::join_paths(&dirs).unwrap_or_else(|_| {
        let mut joined = bin_dir.as_os_str().to_os_string();
        if let Some(rest) = &inherited_path {
            joined.push(":");
            joined.push(rest);
        }
        joined
    });

    environment.insert(0, ("PATH".into(), path));
    environment.push((VERSION_OVERRIDE_ENV.into(), version.into()));
    environment.push((NESTED_INVOCATION_ENV.into(), "1".into()));
    environment
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;

    fn catalog(entries: Vec<CatalogEntry>) -> Catalog {
        Catalog::from_entries(entries, Utc::now()).unwrap()
    }

    fn spec(input: &str) -> VersionSpec {
        VersionSpec::parse(input).unwrap()
    }

    fn layout() -> RootLayout {
        RootLayout::new("/root/.novm")
    }

    const LINUX_X64: PlatformTarget = PlatformTarget::new(Os::Linux, Arch::X64);
    const MAC_ARM: PlatformTarget = PlatformTarget::new(Os::Darwin, Arch::Arm64);

    fn mixed_catalog() -> Catalog {
        catalog(vec![
            CatalogEntry::new("v21.0.0", ["linux-arm64"]),
            CatalogEntry::new("v20.1.0", ["linux-x64", "osx-arm64-tar", "osx-x64-tar"]),
            CatalogEntry::new("v18.16.0", ["linux-x64", "osx-arm64-tar", "osx-x64-tar"])
                .with_lts("Hydrogen"),
            CatalogEntry::new("v18.0.0", ["linux-x64", "osx-arm64-tar", "osx-x64-tar"]),
            CatalogEntry::new("v16.9.0", ["linux-x64"]).with_lts("Gallium"),
            CatalogEntry::new("v14.0.0", ["linux-x64", "osx-x64-tar"]),
        ])
    }

    #[test]
    fn latest_is_first_entry_for_platform() {
        let catalog = mixed_catalog();
        let selection = select(&VersionSpec::Latest, &catalog, &LINUX_X64).unwrap();
        assert_eq!(selection.entry.version, "v20.1.0");
    }

    #[test]
    fn latest_without_platform_match_is_not_found() {
        let only_arm = catalog(vec![CatalogEntry::new("v21.0.0", ["linux-arm64"])]);
        let err = select(&VersionSpec::Latest, &only_arm, &LINUX_X64).unwrap_err();
        assert!(matches!(err, NovmError::VersionNotFound(_)));
    }

    #[test]
    fn lts_skips_entries_without_code_name() {
        let catalog = mixed_catalog();
        let selection = select(&VersionSpec::Lts, &catalog, &LINUX_X64).unwrap();
        assert_eq!(selection.entry.version, "v18.16.0");
        assert!(selection.entry.is_lts());
    }

    #[test]
    fn range_picks_newest_satisfying_entry() {
        let catalog = mixed_catalog();
        let selection = select(&spec("^18"), &catalog, &LINUX_X64).unwrap();
        assert_eq!(selection.entry.version, "v18.16.0");
    }

    #[test]
    fn unknown_version_and_wrong_platform_are_distinct() {
        let err = select(&spec("19.0.0"), &mixed_catalog(), &LINUX_X64).unwrap_err();
        assert!(matches!(err, NovmError::VersionNotFound(_)));

        let err = select(&spec("21.0.0"), &mixed_catalog(), &LINUX_X64).unwrap_err();
        match err {
            NovmError::VersionNotForPlatform { version, file_type } => {
                assert_eq!(version, "v21.0.0");
                assert_eq!(file_type, "linux-x64");
            }
            other => panic!("expected VersionNotForPlatform, got {other:?}"),
        }
    }

    #[test]
    fn darwin_arm_override_applies_to_old_exact_versions_only() {
        let catalog = mixed_catalog();

        let old = select(&spec("14.0.0"), &catalog, &MAC_ARM).unwrap();
        assert_eq!(old.arch, Arch::X64);

        let new = select(&spec("18.0.0"), &catalog, &MAC_ARM).unwrap();
        assert_eq!(new.arch, Arch::Arm64);

        let latest = select(&VersionSpec::Latest, &catalog, &MAC_ARM).unwrap();
        assert_eq!(latest.arch, Arch::Arm64);
        assert_eq!(latest.entry.version, "v20.1.0");
    }

    #[test]
    fn end_to_end_darwin_x64() {
        let catalog = catalog(vec![
            CatalogEntry::new("v20.0.0", ["linux-x64"]),
            CatalogEntry::new("v18.0.0", ["linux-x64", "darwin-x64-tar"]),
        ]);
        let platform = PlatformTarget::new(Os::Darwin, Arch::X64);

        let resolved = resolve_with_env(
            &spec("18.0.0"),
            &catalog,
            &platform,
            &layout(),
            Vec::<(String, String)>::new(),
        )
        .unwrap();

        assert_eq!(resolved.version, "v18.0.0");
        assert_eq!(
            resolved.install_dir,
            PathBuf::from("/root/.novm/versions/v18.0.0/darwin/x64")
        );
        assert_eq!(
            resolved.bin_path,
            PathBuf::from("/root/.novm/versions/v18.0.0/darwin/x64/bin/node")
        );
    }

    #[test]
    fn environment_pins_version_and_prefixes_path() {
        let base = vec![
            ("HOME".to_string(), "/home/dev".to_string()),
            ("PATH".to_string(), "/usr/bin:/bin".to_string()),
            ("NODE_VERSION".to_string(), "16.20.2".to_string()),
            (VERSION_OVERRIDE_ENV.to_string(), "16".to_string()),
        ];
        let resolved =
            resolve_with_env(&spec("^18"), &mixed_catalog(), &LINUX_X64, &layout(), base).unwrap();

        assert_eq!(resolved.environment[0].0, "PATH");
        assert_eq!(
            resolved.env_var("PATH"),
            Some(OsStr::new("/root/.novm/versions/v18.16.0/linux/x64/bin:/usr/bin:/bin"))
        );
        assert_eq!(resolved.env_var(VERSION_OVERRIDE_ENV), Some(OsStr::new("v18.16.0")));
        assert_eq!(resolved.env_var(NESTED_INVOCATION_ENV), Some(OsStr::new("1")));
        assert_eq!(resolved.env_var("HOME"), Some(OsStr::new("/home/dev")));
        // A Docker-style NODE_VERSION is passed through untouched.
        assert_eq!(resolved.env_var("NODE_VERSION"), Some(OsStr::new("16.20.2")));
        assert_eq!(
            resolved
                .environment
                .iter()
                .filter(|(k, _)| k == VERSION_OVERRIDE_ENV)
                .count(),
            1
        );
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_variables_are_carried_through() {
        use std::os::unix::ffi::OsStrExt;

        let raw = OsStr::from_bytes(b"\xff\xfe").to_os_string();
        let base = vec![
            (OsString::from("PATH"), OsString::from("/usr/bin")),
            (OsString::from("LEGACY_BYTES"), raw.clone()),
        ];
        let resolved =
            resolve_with_env(&spec("^18"), &mixed_catalog(), &LINUX_X64, &layout(), base).unwrap();

        assert_eq!(resolved.env_var("LEGACY_BYTES"), Some(raw.as_os_str()));
    }
}
