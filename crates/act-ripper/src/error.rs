//! Error types for every stage of an extraction run.

use crate::acquisition::DiscoveryStrategy;
use crate::loader::ModuleId;

/// Failure raised from inside a module factory body.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{message}")]
pub struct FactoryError {
    pub message: String,
}

impl FactoryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<LoaderError> for FactoryError {
    fn from(err: LoaderError) -> Self {
        Self::new(err.to_string())
    }
}

/// Errors from the module loader shim.
#[derive(thiserror::Error, Debug, Clone)]
pub enum LoaderError {
    #[error("module {id} failed: {source}")]
    Factory {
        id: ModuleId,
        #[source]
        source: FactoryError,
    },
}

/// No usable module table could be located in the host.
#[derive(thiserror::Error, Debug)]
pub enum AcquisitionError {
    #[error("no modules found for event '{label}' (tried {tried:?}; scripts seen: {scripts:?})")]
    NoModulesFound {
        label: String,
        tried: Vec<DiscoveryStrategy>,
        scripts: Vec<String>,
    },

    #[error("chunk array '{property}' has no {layer} layer")]
    MissingLayer {
        property: String,
        layer: &'static str,
    },
}

/// Failure while mining manifests or static exports.
#[derive(thiserror::Error, Debug)]
pub enum MineError {
    #[error("executing candidate module {id}: {source}")]
    Module {
        id: ModuleId,
        #[source]
        source: LoaderError,
    },

    #[error("mining worker failed: {0}")]
    Worker(String),
}

/// A single resource fetch failed.
#[derive(thiserror::Error, Debug, Clone)]
pub enum FetchError {
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("malformed data URI: {0}")]
    DataUri(String),
}

/// Errors from archive assembly.
#[derive(thiserror::Error, Debug)]
pub enum AssembleError {
    #[error("fetch failed, archive aborted: {0}")]
    Fetch(#[from] FetchError),

    #[error("archive write failed for {path}: {message}")]
    Write { path: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by an execution host.
#[derive(thiserror::Error, Debug)]
pub enum HostError {
    #[error("host unavailable: {0}")]
    Unavailable(String),

    #[error("page load failed: {0}")]
    Load(String),

    #[error("page did not signal readiness within {0}ms")]
    NotReady(u64),

    #[error("host script failed: {0}")]
    Script(String),
}

/// Top-level error for one extraction run.
#[derive(thiserror::Error, Debug)]
pub enum RipError {
    #[error("URL is not an accepted event page: {0}")]
    InvalidUrl(String),

    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error("acquisition failed: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("extraction failed: {0}")]
    Extraction(#[from] MineError),

    #[error("assembly failed: {0}")]
    Assemble(#[from] AssembleError),
}

impl RipError {
    /// Whether this failure happened before any fetch was dispatched.
    pub fn is_early(&self) -> bool {
        !matches!(self, RipError::Assemble(_))
    }
}
