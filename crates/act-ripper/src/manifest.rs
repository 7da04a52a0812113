//! Canonical manifest shapes and the classifier that maps the many shapes
//! found in bundles onto them.
//!
//! Upstream bundles export manifests under `<NAME>_MANIFEST` keys. They come
//! as sequences or mappings, as a single resource or a collection, with or
//! without their own group label. Every shape ends up as either spine entries
//! (atlas + companion JSON) or main entries (one fetchable asset); anything
//! else is dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Marker every manifest export key carries.
pub const MANIFEST_MARKER: &str = "_MANIFEST";

/// Field an entry may use to carry its own group label.
pub const GROUP_FIELD: &str = "moduleGroup";

/// Companion structured data of a spine resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum JsonSource {
    /// A URL to fetch.
    Remote(String),
    /// Data embedded in the bundle.
    Inline(Value),
}

/// A skeletal animation resource: atlas text plus companion JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpineManifestEntry {
    pub atlas: String,
    pub json: JsonSource,
    pub module_group: String,
}

/// One directly fetchable asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainManifestEntry {
    pub resource_id: String,
    pub source_url: String,
    pub resource_kind: String,
    pub module_group: String,
}

impl MainManifestEntry {
    /// Entries under an underscore-prefixed group come from internal
    /// re-exports and lose to any other entry for the same URL.
    pub fn is_internal(&self) -> bool {
        self.module_group.starts_with('_')
    }
}

/// Spine entries keyed by resource id.
pub type SpineManifestMap = BTreeMap<String, SpineManifestEntry>;

/// Outcome of classifying one candidate value.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Spine(SpineManifestMap),
    Main(Vec<MainManifestEntry>),
    /// Not resource data.
    Discarded,
}

/// Group label for a manifest export key (`CHARS_MANIFEST` -> `CHARS`).
pub fn group_label(key: &str) -> String {
    key.replacen(MANIFEST_MARKER, "", 1)
}

/// Classify one `*_MANIFEST` export into zero or more manifests.
pub fn classify_export(key: &str, value: &Value) -> Vec<Classified> {
    let group = group_label(key);
    match value {
        Value::Array(_) => vec![classify(value, &format!("_{group}"))],
        Value::Object(map) => {
            if is_spine_shaped(value) {
                vec![classify(value, &group)]
            } else {
                map.values().map(|v| classify(v, &group)).collect()
            }
        }
        _ => vec![Classified::Discarded],
    }
}

/// Classify a candidate value under `group`.
///
/// The first element (index 0 of a sequence, first value of a mapping) is
/// inspected; when it is not a mapping the value itself is inspected and
/// treated as a single entry.
pub fn classify(value: &Value, group: &str) -> Classified {
    let (target, collection) = match first_element(value) {
        Some(first @ Value::Object(_)) => (first, true),
        _ => (value, false),
    };

    if has_fields(target, &["atlas", "json"]) {
        let mut out = SpineManifestMap::new();
        for (key, entry) in entries(value, collection) {
            let id = entry_id(&key, entry, group);
            if let Some(spine) = spine_entry(entry, group) {
                out.insert(id, spine);
            }
        }
        Classified::Spine(out)
    } else if has_fields(target, &["id", "src", "type"]) {
        let main = entries(value, collection)
            .into_iter()
            .filter_map(|(_, entry)| main_entry(entry, group))
            .collect();
        Classified::Main(main)
    } else {
        Classified::Discarded
    }
}

/// Whether the value (or its first element) looks like a spine entry.
pub fn is_spine_shaped(value: &Value) -> bool {
    match first_element(value) {
        Some(first @ Value::Object(_)) => has_fields(first, &["atlas", "json"]),
        _ => has_fields(value, &["atlas", "json"]),
    }
}

fn first_element(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.first(),
        Value::Object(map) => map.values().next(),
        _ => None,
    }
}

fn has_fields(value: &Value, fields: &[&str]) -> bool {
    value
        .as_object()
        .map(|m| fields.iter().all(|f| m.contains_key(*f)))
        .unwrap_or(false)
}

enum EntryKey {
    Named(String),
    Index(usize),
    Single,
}

fn entries(value: &Value, collection: bool) -> Vec<(EntryKey, &Value)> {
    if !collection {
        return vec![(EntryKey::Single, value)];
    }
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (EntryKey::Index(i), v))
            .collect(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (EntryKey::Named(k.clone()), v))
            .collect(),
        _ => Vec::new(),
    }
}

fn entry_id(key: &EntryKey, entry: &Value, group: &str) -> String {
    match key {
        EntryKey::Named(name) => name.clone(),
        EntryKey::Index(i) => own_id(entry).unwrap_or_else(|| format!("{group}_{i}")),
        EntryKey::Single => own_id(entry).unwrap_or_else(|| group.to_string()),
    }
}

fn own_id(entry: &Value) -> Option<String> {
    entry
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// The entry's own group label, or `group` when it has none.
fn entry_group(entry: &Map<String, Value>, group: &str) -> String {
    entry
        .get(GROUP_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| group.to_string())
}

fn spine_entry(entry: &Value, group: &str) -> Option<SpineManifestEntry> {
    let map = entry.as_object()?;
    let atlas = map.get("atlas")?.as_str()?.to_string();
    let json = match map.get("json")? {
        Value::String(url) => JsonSource::Remote(url.clone()),
        other => JsonSource::Inline(other.clone()),
    };
    Some(SpineManifestEntry {
        atlas,
        json,
        module_group: entry_group(map, group),
    })
}

fn main_entry(entry: &Value, group: &str) -> Option<MainManifestEntry> {
    let map = entry.as_object()?;
    let resource_id = scalar_text(map.get("id")?)?;
    let source_url = map.get("src")?.as_str()?.to_string();
    let resource_kind = scalar_text(map.get("type")?).unwrap_or_default();
    Some(MainManifestEntry {
        resource_id,
        source_url,
        resource_kind,
        module_group: entry_group(map, group),
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
