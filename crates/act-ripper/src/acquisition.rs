//! Module table acquisition.
//!
//! Different builds of the event pages ship different bundler runtime
//! layouts. Each known layout is a [`DiscoveryStrategy`]; they are tried in a
//! fixed order against the [`HostSnapshot`] taken after the page settled, and
//! the first one that matches yields the run's [`ModuleTable`].

use crate::error::AcquisitionError;
use crate::loader::ModuleTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Property-name prefixes of the chunk arrays the bundler pushes into.
pub const CHUNK_ARRAY_PREFIXES: &[&str] = &["webpackJsonp", "webpackChunk"];

/// One pushed chunk: `[chunkIds, moduleMap, ...]`.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub ids: Vec<String>,
    pub modules: ModuleTable,
}

impl Chunk {
    pub fn new(ids: Vec<String>, modules: ModuleTable) -> Self {
        Self { ids, modules }
    }

    fn is_named(&self, name: &str) -> bool {
        self.ids.iter().any(|id| id.contains(name))
    }
}

/// Everything the host's interception proxy captured before page scripts ran.
#[derive(Debug, Clone, Default)]
pub struct InterceptedModuleBuffer {
    /// Chunks pushed through the proxied chunk array, in push order.
    pub cached: Vec<Chunk>,
    /// The runtime's own module map, when the runtime executed.
    pub loaded: Option<ModuleTable>,
}

impl InterceptedModuleBuffer {
    pub fn is_empty(&self) -> bool {
        self.cached.is_empty()
    }
}

/// What an execution host exposes once the page has loaded.
#[derive(Debug, Clone, Default)]
pub struct HostSnapshot {
    /// Base URL relative asset paths resolve against.
    pub base_url: String,
    pub intercepted: InterceptedModuleBuffer,
    /// Global chunk arrays keyed by property name.
    pub chunk_arrays: BTreeMap<String, Vec<Chunk>>,
    /// Script URLs present in the document, for diagnostics.
    pub script_urls: Vec<String>,
}

/// A known module-table layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryStrategy {
    /// Chunks captured by the interception proxy plus the runtime module map.
    InterceptedCache,
    /// A global chunk array named after the event, split into
    /// vendor / application / runtime layers.
    NamedChunkArray,
}

impl DiscoveryStrategy {
    /// Preference order.
    pub const ORDER: [DiscoveryStrategy; 2] = [
        DiscoveryStrategy::InterceptedCache,
        DiscoveryStrategy::NamedChunkArray,
    ];

    /// Try this layout. `Ok(None)` means the layout is not present.
    pub fn discover(
        self,
        snapshot: &HostSnapshot,
        event_label: &str,
    ) -> Result<Option<AcquiredTable>, AcquisitionError> {
        match self {
            DiscoveryStrategy::InterceptedCache => Ok(from_intercepted(&snapshot.intercepted)),
            DiscoveryStrategy::NamedChunkArray => from_chunk_array(snapshot, event_label),
        }
    }
}

impl std::fmt::Display for DiscoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InterceptedCache => write!(f, "intercepted cache"),
            Self::NamedChunkArray => write!(f, "named chunk array"),
        }
    }
}

/// Where an acquired table came from, so a host can rebuild it in-page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableLayout {
    Intercepted,
    ChunkArray {
        property: String,
        /// Chunk indices merged in order (vendor, application, runtime).
        layers: Vec<usize>,
    },
}

/// The run's module table and its provenance.
#[derive(Debug, Clone)]
pub struct AcquiredTable {
    pub table: ModuleTable,
    pub strategy: DiscoveryStrategy,
    pub layout: TableLayout,
}

/// Obtain the module table, trying each layout in preference order.
pub fn acquire(
    snapshot: &HostSnapshot,
    event_label: &str,
) -> Result<AcquiredTable, AcquisitionError> {
    for strategy in DiscoveryStrategy::ORDER {
        if let Some(acquired) = strategy.discover(snapshot, event_label)? {
            info!(
                "acquired {} modules via {}",
                acquired.table.len(),
                strategy
            );
            return Ok(acquired);
        }
        debug!("layout not present: {strategy}");
    }

    Err(AcquisitionError::NoModulesFound {
        label: event_label.to_string(),
        tried: DiscoveryStrategy::ORDER.to_vec(),
        scripts: bundle_scripts(&snapshot.script_urls),
    })
}

fn from_intercepted(buffer: &InterceptedModuleBuffer) -> Option<AcquiredTable> {
    if buffer.is_empty() {
        return None;
    }
    let mut table = buffer.loaded.clone().unwrap_or_default();
    for chunk in &buffer.cached {
        table.extend(&chunk.modules);
    }
    Some(AcquiredTable {
        table,
        strategy: DiscoveryStrategy::InterceptedCache,
        layout: TableLayout::Intercepted,
    })
}

fn from_chunk_array(
    snapshot: &HostSnapshot,
    event_label: &str,
) -> Result<Option<AcquiredTable>, AcquisitionError> {
    let Some((property, chunks)) = find_chunk_array(&snapshot.chunk_arrays, event_label) else {
        return Ok(None);
    };
    if chunks.is_empty() {
        return Ok(None);
    }

    let named = chunks.iter().any(|c| {
        ["vendors", "index", "runtime"]
            .iter()
            .any(|name| c.is_named(name))
    });
    let locate = |name: &str, position: usize| -> Option<usize> {
        if named {
            chunks.iter().position(|c| c.is_named(name))
        } else if position < chunks.len() {
            Some(position)
        } else {
            None
        }
    };

    let vendor = locate("vendors", 0).ok_or_else(|| AcquisitionError::MissingLayer {
        property: property.clone(),
        layer: "vendor",
    })?;
    let app = locate("index", 1).ok_or_else(|| AcquisitionError::MissingLayer {
        property: property.clone(),
        layer: "application",
    })?;
    let runtime = locate("runtime", 2);

    let mut layers = vec![vendor, app];
    layers.extend(runtime);

    let mut table = ModuleTable::new();
    for &i in &layers {
        table.extend(&chunks[i].modules);
    }

    Ok(Some(AcquiredTable {
        table,
        strategy: DiscoveryStrategy::NamedChunkArray,
        layout: TableLayout::ChunkArray {
            property: property.clone(),
            layers,
        },
    }))
}

fn find_chunk_array<'a>(
    arrays: &'a BTreeMap<String, Vec<Chunk>>,
    event_label: &str,
) -> Option<(&'a String, &'a Vec<Chunk>)> {
    if event_label.is_empty() {
        return None;
    }
    arrays.iter().find(|(name, _)| {
        CHUNK_ARRAY_PREFIXES.iter().any(|p| name.starts_with(p)) && name.contains(event_label)
    })
}

fn bundle_scripts(urls: &[String]) -> Vec<String> {
    urls.iter()
        .filter(|u| ["vendors", "index", "runtime"].iter().any(|n| u.contains(n)))
        .cloned()
        .collect()
}
