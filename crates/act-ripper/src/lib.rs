//! act-ripper: pulls spine animations, manifest assets and static resources
//! out of bundled event pages and packs them into one zip per event.
//!
//! The pipeline loads a page through an [`ExecutionHost`] with module
//! interception in place, acquires the bundler's module table, executes the
//! manifest-bearing modules under an observing [`Loader`] and hands the
//! resulting plan to the [`assembler`].

pub mod acquisition;
pub mod assembler;
pub mod config;
pub mod error;
pub mod event;
pub mod host;
pub mod loader;
pub mod manifest;
pub mod miner;
pub mod pipeline;
pub mod resolver;
pub mod status;

pub use acquisition::{
    acquire, AcquiredTable, Chunk, DiscoveryStrategy, HostSnapshot, InterceptedModuleBuffer,
    TableLayout,
};
pub use assembler::{assemble, decode_data_uri, Archive, ArchiveWriter, Fetcher, ZipArchiveWriter};
pub use config::RipperConfig;
pub use error::{
    AcquisitionError, AssembleError, FactoryError, FetchError, HostError, LoaderError, MineError,
    RipError,
};
pub use host::ExecutionHost;
pub use loader::{Export, Exports, Loader, ModuleFactory, ModuleId, ModuleTable};
pub use manifest::{JsonSource, MainManifestEntry, SpineManifestEntry, SpineManifestMap};
pub use miner::Manifests;
pub use pipeline::{Extraction, Ripper};
pub use resolver::StaticResourceEntry;
pub use status::{Stage, StatusEvent, StatusKind};
