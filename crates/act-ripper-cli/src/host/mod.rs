//! Chromium-backed execution host.

pub mod bridge;
pub mod chromium;
pub mod document;

pub use chromium::{find_chromium, ChromiumHost};
pub use document::{prepare, PreparedDocument};
