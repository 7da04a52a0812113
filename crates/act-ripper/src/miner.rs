//! Manifest miner.
//!
//! Manifest data usually hangs off internal sub-exports rather than a
//! module's top-level export, and nothing in the source says which ones. The
//! miner therefore executes the modules whose text mentions both `atlas:` and
//! `json:`, records every exports object marked as an ES module along the way
//! (dependencies included), and classifies the `*_MANIFEST` keys it finds.

use crate::error::MineError;
use crate::loader::{Exports, Loader, ModuleId, ModuleTable};
use crate::manifest::{
    classify_export, Classified, MainManifestEntry, SpineManifestMap, MANIFEST_MARKER,
};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, info};

const ATLAS_MARKER: &str = "atlas:";
const JSON_MARKER: &str = "json:";

/// The two canonical manifest tables of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifests {
    pub spine: SpineManifestMap,
    pub main: Vec<MainManifestEntry>,
}

/// Ids of modules whose source carries both manifest markers.
pub fn select_candidates(table: &ModuleTable) -> Vec<ModuleId> {
    table
        .iter()
        .filter(|(_, f)| {
            let src = f.source();
            src.contains(ATLAS_MARKER) && src.contains(JSON_MARKER)
        })
        .map(|(id, _)| id.clone())
        .collect()
}

/// Mine the module table for spine and main manifests.
pub fn mine(table: &ModuleTable, base_url: &str) -> Result<Manifests, MineError> {
    let candidates = select_candidates(table);
    info!("{} manifest candidate modules", candidates.len());

    let loader = Loader::new(table).with_public_path(base_url);
    let sub_modules = execute_observed(&loader, &candidates)?;
    debug!("observed {} ES module exports", sub_modules.len());

    let mut spine_manifests: Vec<SpineManifestMap> = Vec::new();
    let mut main_manifests: Vec<Vec<MainManifestEntry>> = Vec::new();

    for module in &sub_modules {
        for key in module.keys() {
            if !key.contains(MANIFEST_MARKER) {
                continue;
            }
            let Some(value) = module.get(&key) else {
                continue;
            };
            for classified in classify_export(&key, &value) {
                match classified {
                    Classified::Spine(map) => {
                        debug!("{key}: spine manifest with {} entries", map.len());
                        spine_manifests.push(map);
                    }
                    Classified::Main(entries) => {
                        debug!("{key}: main manifest with {} entries", entries.len());
                        main_manifests.push(entries);
                    }
                    Classified::Discarded => debug!("{key}: not resource data"),
                }
            }
        }
    }

    let manifests = Manifests {
        spine: merge_spine(spine_manifests),
        main: dedupe_main(flatten_main(main_manifests)),
    };
    info!(
        "mined {} spine and {} main entries",
        manifests.spine.len(),
        manifests.main.len()
    );
    Ok(manifests)
}

/// Require every candidate while recording ES-module exports objects.
fn execute_observed(loader: &Loader<'_>, candidates: &[ModuleId]) -> Result<Vec<Exports>, MineError> {
    let recorded: Rc<RefCell<Vec<Exports>>> = Rc::new(RefCell::new(Vec::new()));
    {
        let sink = Rc::clone(&recorded);
        let _observer = loader.observe(move |exports: &Exports| {
            let mut seen = sink.borrow_mut();
            if !seen.iter().any(|e| e.ptr_eq(exports)) {
                seen.push(exports.clone());
            }
        });
        for id in candidates {
            debug!("executing candidate module {id}");
            loader
                .require(id)
                .map_err(|source| MineError::Module {
                    id: id.clone(),
                    source,
                })?;
        }
    }
    let recorded = recorded.borrow().clone();
    Ok(recorded)
}

/// Flatten main manifests; each later manifest goes ahead of the ones
/// collected so far.
pub fn flatten_main(manifests: Vec<Vec<MainManifestEntry>>) -> Vec<MainManifestEntry> {
    let mut flat: Vec<MainManifestEntry> = Vec::new();
    for mut manifest in manifests {
        manifest.append(&mut flat);
        flat = manifest;
    }
    flat
}

/// Drop internal (underscore-group) duplicates of an already kept URL, and
/// let a public entry replace an internal one kept earlier.
pub fn dedupe_main(entries: Vec<MainManifestEntry>) -> Vec<MainManifestEntry> {
    let mut kept: Vec<MainManifestEntry> = Vec::with_capacity(entries.len());
    let mut first_by_url: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        match first_by_url.get(&entry.source_url) {
            None => {
                first_by_url.insert(entry.source_url.clone(), kept.len());
                kept.push(entry);
            }
            Some(_) if entry.is_internal() => {}
            Some(&i) if kept[i].is_internal() => kept[i] = entry,
            Some(_) => kept.push(entry),
        }
    }
    kept
}

/// Fold spine manifests together; later keys overwrite earlier ones.
pub fn merge_spine(manifests: Vec<SpineManifestMap>) -> SpineManifestMap {
    let mut merged = SpineManifestMap::new();
    for manifest in manifests {
        merged.extend(manifest);
    }
    merged
}
