//! Host platform detection and the mapping from (OS, architecture, version)
//! to the release catalog's file-type tags and download names.

use std::fmt;

use semver::Version;

use crate::core::error::{NovmError, NovmResult};
use crate::core::paths::BIN_NAME;

/// First release line with native Apple Silicon builds.
const DARWIN_NATIVE_ARM_SINCE: Version = Version::new(16, 0, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    Darwin,
}

impl Os {
    /// Name used in archive names and install paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X64,
    Arm64,
    Armv7l,
    Ppc64le,
    S390x,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X64 => "x64",
            Arch::Arm64 => "arm64",
            Arch::Armv7l => "armv7l",
            Arch::Ppc64le => "ppc64le",
            Arch::S390x => "s390x",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The host, normalised to the tags the Node.js distribution uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformTarget {
    os: Os,
    arch: Arch,
}

impl PlatformTarget {
    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    pub fn detect() -> NovmResult<Self> {
        Self::from_consts(std::env::consts::OS, std::env::consts::ARCH)
    }

    fn from_consts(os: &str, arch: &str) -> NovmResult<Self> {
        let unsupported = || NovmError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        };

        let os_tag = match os {
            "linux" => Os::Linux,
            "macos" => Os::Darwin,
            _ => return Err(unsupported()),
        };
        let arch_tag = match arch {
            "x86_64" => Arch::X64,
            "aarch64" => Arch::Arm64,
            "arm" => Arch::Armv7l,
            "powerpc64" => Arch::Ppc64le,
            "s390x" => Arch::S390x,
            _ => return Err(unsupported()),
        };

        Ok(Self::new(os_tag, arch_tag))
    }

    pub fn os(&self) -> Os {
        self.os
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Architecture to download for a specific release.
    ///
    /// macOS never shipped native arm64 builds before v16, so older releases
    /// run under Rosetta as x64.
    pub fn arch_for_release(&self, version: &Version) -> Arch {
        if self.os == Os::Darwin && *version < DARWIN_NATIVE_ARM_SINCE {
            Arch::X64
        } else {
            self.arch
        }
    }

    /// Canonical catalog tag for an architecture on this OS.
    ///
    /// Linux uses `<os>-<arch>`; macOS uses `osx-<arch>-tar` for tarballs.
    pub fn file_type(&self, arch: Arch) -> String {
        match self.os {
            Os::Linux => format!("linux-{arch}"),
            Os::Darwin => format!("osx-{arch}-tar"),
        }
    }

    /// Whether a catalog entry's file list carries an artifact for `arch`.
    /// Some indexes spell the macOS tarball tag with `darwin-` instead of `osx-`.
    pub fn is_published(&self, arch: Arch, files: &[String]) -> bool {
        let primary = self.file_type(arch);
        let alias = match self.os {
            Os::Darwin => Some(format!("darwin-{arch}-tar")),
            Os::Linux => None,
        };

        files
            .iter()
            .any(|tag| *tag == primary || alias.as_deref() == Some(tag.as_str()))
    }

    /// Release asset name of the manager binary for this host.
    pub fn manager_asset_name(&self) -> String {
        format!("{BIN_NAME}-{}-{}", self.os, self.arch)
    }
}

impl fmt::Display for PlatformTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

/// `node-v18.0.0-linux-x64.tar.gz`
pub fn archive_file_name(version: &str, os: Os, arch: Arch) -> String {
    format!("node-{version}-{os}-{arch}.tar.gz")
}

/// Top-level directory inside the archive.
pub fn archive_root_dir(version: &str, os: Os, arch: Arch) -> String {
    format!("node-{version}-{os}-{arch}")
}

pub fn archive_url(mirror: &str, version: &str, os: Os, arch: Arch) -> String {
    format!(
        "{}/{}/{}",
        mirror.trim_end_matches('/'),
        version,
        archive_file_name(version, os, arch)
    )
}

pub fn shasums_url(mirror: &str, version: &str) -> String {
    format!("{}/{}/SHASUMS256.txt", mirror.trim_end_matches('/'), version)
}
