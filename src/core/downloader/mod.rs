pub mod client;

pub use client::{verify_sha256, Downloader};
