// ─── Settings ───
// Optional `config.json` under the root directory, overridden by environment.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::paths::RootLayout;

pub const DEFAULT_NODE_MIRROR: &str = "https://nodejs.org/dist";
pub const DEFAULT_UPDATE_URL: &str = "https://api.github.com/repos/debdutdeb/novm/releases/latest";

const MIRROR_ENV: &str = "NOVM_NODE_MIRROR";
const UPDATE_URL_ENV: &str = "NOVM_UPDATE_URL";
const AUTO_UPDATE_ENV: &str = "NOVM_AUTO_UPDATE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NovmConfig {
    /// Base URL of the Node.js distribution tree (`<mirror>/index.json`,
    /// `<mirror>/<version>/node-<version>-<os>-<arch>.tar.gz`).
    pub node_mirror: String,
    /// "Latest release" endpoint for the manager itself.
    pub update_url: String,
    pub auto_update: bool,
}

impl Default for NovmConfig {
    fn default() -> Self {
        Self {
            node_mirror: DEFAULT_NODE_MIRROR.to_string(),
            update_url: DEFAULT_UPDATE_URL.to_string(),
            auto_update: true,
        }
    }
}

impl NovmConfig {
    /// Read `config.json` (missing or broken files fall back to defaults) and
    /// apply environment overrides.
    pub fn load(layout: &RootLayout) -> Self {
        let mut config = load_from_disk(layout).unwrap_or_default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(mirror) = lookup(MIRROR_ENV).filter(|v| !v.is_empty()) {
            self.node_mirror = mirror;
        }
        if let Some(url) = lookup(UPDATE_URL_ENV).filter(|v| !v.is_empty()) {
            self.update_url = url;
        }
        if let Some(flag) = lookup(AUTO_UPDATE_ENV) {
            self.auto_update = !matches!(flag.trim(), "0" | "false" | "no" | "off");
        }
    }

    pub fn mirror(&self) -> &str {
        self.node_mirror.trim_end_matches('/')
    }

    pub fn release_index_url(&self) -> String {
        format!("{}/index.json", self.mirror())
    }
}

fn load_from_disk(layout: &RootLayout) -> Option<NovmConfig> {
    let path = layout.config_file();
    let raw = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!("Ignoring unreadable settings at {:?}: {}", path, e);
            None
        }
    }
}
