//! act-ripper CLI internals: the Chromium execution host, the HTTP fetcher
//! and the `doctor` check.

pub mod doctor;
pub mod fetch;
pub mod host;

pub use fetch::HttpFetcher;
pub use host::ChromiumHost;
