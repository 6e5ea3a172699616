// ─── novm Core ───
// Node.js version manager that stands in for `node`, `npm` and `npx`.
//
// Architecture:
//   core/
//     version/    Release catalog, version specs, resolution
//     node/       Installer + runtime manager (ensure installed, run)
//     downloader/ Streaming downloads with SHA-256
//     update/     Self-update coordinator, release feed, signal intercept
//     state/      Persisted self-update throttle
//     detect      Version request from env, package.json, .nvmrc
//     setup       Shims and npm prefix

pub mod config;
pub mod detect;
pub mod downloader;
pub mod error;
pub mod http;
pub mod node;
pub mod paths;
pub mod platform;
pub mod setup;
pub mod state;
pub mod update;
pub mod version;

#[cfg(test)]
pub mod testing;
