//! Static resource discovery and archive planning.
//!
//! Besides manifests, bundles carry asset modules whose whole body is
//! `e.exports = n.p + "img/foo.3a5b.png"` or an inlined data URI. Those are
//! found by text matching alone. [`plan_archive`] then merges manifests and
//! static finds into one flat list where every physical URL appears once.

use crate::loader::{ModuleId, ModuleTable};
use crate::manifest::{JsonSource, MainManifestEntry, SpineManifestMap};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::debug;

/// Archive directory for assets found outside any manifest.
pub const STATIC_GROUP: &str = "other_resources";

fn export_literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"[\w$]+\.exports\s*=\s*(?:([\w$]+\.[\w$]+)\s*\+\s*)?(?:"([^"]*)"|'([^']*)')"#,
        )
        .expect("valid regex")
    })
}

/// An asset discovered from a literal string export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticResourceEntry {
    pub id: String,
    /// Absolute URL or data URI.
    pub src: String,
    pub origin_module_id: ModuleId,
}

/// Scan every module source for literal asset exports.
pub fn extract_static(table: &ModuleTable, base_url: &str) -> Vec<StaticResourceEntry> {
    let mut found = Vec::new();
    for (id, factory) in table.iter() {
        let Some(caps) = export_literal_re().captures(factory.source()) else {
            continue;
        };
        let concatenated = caps.get(1).is_some();
        let Some(literal) = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str()) else {
            continue;
        };
        let is_data = is_data_uri(literal);
        if !is_data && !concatenated {
            continue;
        }
        if literal.is_empty() {
            continue;
        }

        let file = basename(literal);
        let resource_id = if file.is_empty() {
            id.file_stem()
        } else {
            resource_id_from_filename(file)
        };
        let src = resolve_url(base_url, literal);
        debug!("static resource {resource_id} from module {id}");
        found.push(StaticResourceEntry {
            id: resource_id,
            src,
            origin_module_id: id.clone(),
        });
    }
    found
}

pub fn is_data_uri(src: &str) -> bool {
    src.starts_with("data:")
}

/// Last path component; empty for data URIs.
pub fn basename(src: &str) -> &str {
    if is_data_uri(src) {
        return "";
    }
    let path = src.split(['?', '#']).next().unwrap_or(src);
    path.rsplit('/').next().unwrap_or(path)
}

/// File stem without extension and without the bundler's content hash:
/// `hero.3a5b9c.png` -> `hero`, `logo.png` -> `logo`.
pub fn resource_id_from_filename(file: &str) -> String {
    let mut segments: Vec<&str> = file.split('.').collect();
    if segments.len() > 1 {
        segments.pop();
    }
    if segments.len() >= 2 {
        segments.pop();
    }
    segments.join(".")
}

/// Resolve a literal against the page base; data URIs pass through.
pub fn resolve_url(base: &str, literal: &str) -> String {
    if is_data_uri(literal) {
        return literal.to_string();
    }
    match url::Url::parse(base).and_then(|b| b.join(literal)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => literal.to_string(),
    }
}

/// File extension for a source: the MIME subtype of a data URI, otherwise
/// the trailing dot-segment of the URL path.
pub fn extension(src: &str) -> String {
    if is_data_uri(src) {
        let mime = src["data:".len()..]
            .split([';', ','])
            .next()
            .unwrap_or_default();
        let subtype = mime.split('/').nth(1).unwrap_or(mime);
        return subtype.split('+').next().unwrap_or(subtype).to_string();
    }
    let file = basename(src);
    match file.rsplit_once('.') {
        Some((_, ext)) => ext.to_string(),
        None => String::new(),
    }
}

/// Check-and-mark set of source URLs already scheduled for the archive.
#[derive(Debug, Default)]
pub struct ResolvedAssetSet {
    seen: HashSet<String>,
}

impl ResolvedAssetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `url`; returns `false` when it was already marked.
    pub fn insert(&mut self, url: &str) -> bool {
        self.seen.insert(url.to_string())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(url)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// How an archive entry's bytes are obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedContent {
    Text(String),
    Json(Value),
    FetchText(String),
    FetchBlob(String),
}

impl PlannedContent {
    /// URL to fetch, if any.
    pub fn fetch_url(&self) -> Option<&str> {
        match self {
            PlannedContent::FetchText(u) | PlannedContent::FetchBlob(u) => Some(u),
            _ => None,
        }
    }
}

/// One archive entry to produce.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedEntry {
    pub path: String,
    pub content: PlannedContent,
}

/// Every entry of the archive, with at most one fetch per URL and no two
/// entries on the same path.
#[derive(Debug, Default)]
pub struct ArchivePlan {
    pub entries: Vec<PlannedEntry>,
    pub assets: ResolvedAssetSet,
    pub skipped: usize,
    /// Entries moved to a `_{n}` name because their path was taken.
    pub renamed: usize,
    paths: HashSet<String>,
}

impl ArchivePlan {
    /// Number of distinct URLs to fetch.
    pub fn fetch_count(&self) -> usize {
        self.entries
            .iter()
            .filter_map(|e| e.content.fetch_url())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Reserve `{dir}/{id}.{ext}` for every `ext` and return the stem used.
    /// When any of those paths is taken the stem becomes `{id}_{n}`, `n`
    /// counting from 2.
    fn claim(&mut self, dir: &str, id: &str, exts: &[&str]) -> String {
        let mut stem = id.to_string();
        let mut n = 1;
        while exts
            .iter()
            .any(|ext| self.paths.contains(&entry_path(dir, &stem, ext)))
        {
            n += 1;
            stem = format!("{id}_{n}");
        }
        for ext in exts {
            self.paths.insert(entry_path(dir, &stem, ext));
        }
        if n > 1 {
            debug!("{dir}/{id} already taken, using {stem}");
            self.renamed += 1;
        }
        stem
    }

    fn push(&mut self, path: String, content: PlannedContent) {
        self.entries.push(PlannedEntry { path, content });
    }
}

/// Plan the archive from the manifest tables and static finds.
///
/// Spine entries come first, then main entries with public groups, then
/// internal main entries, then static resources. Main and static entries
/// whose URL is already marked are skipped, so an internal entry never wins
/// over a public duplicate. Every spine entry keeps its `.json`, even when
/// its URL is shared; the assembler fetches it once.
pub fn plan_archive(
    spine: &SpineManifestMap,
    main: &[MainManifestEntry],
    statics: &[StaticResourceEntry],
    base_url: &str,
) -> ArchivePlan {
    let mut plan = ArchivePlan::default();

    for (id, entry) in spine {
        let dir = &entry.module_group;
        let stem = plan.claim(dir, id, &["atlas", "json"]);
        plan.push(
            entry_path(dir, &stem, "atlas"),
            PlannedContent::Text(entry.atlas.clone()),
        );
        let json_path = entry_path(dir, &stem, "json");
        match &entry.json {
            JsonSource::Remote(url) => {
                let url = resolve_url(base_url, url);
                plan.assets.insert(&url);
                plan.push(json_path, PlannedContent::FetchText(url));
            }
            JsonSource::Inline(value) => plan.push(json_path, PlannedContent::Json(value.clone())),
        }
    }

    let (public, internal): (Vec<&MainManifestEntry>, Vec<&MainManifestEntry>) =
        main.iter().partition(|e| !e.is_internal());
    for entry in public.into_iter().chain(internal) {
        let url = resolve_url(base_url, &entry.source_url);
        if !plan.assets.insert(&url) {
            plan.skipped += 1;
            continue;
        }
        let ext = extension(&url);
        let stem = plan.claim(&entry.module_group, &entry.resource_id, &[ext.as_str()]);
        plan.push(
            entry_path(&entry.module_group, &stem, &ext),
            PlannedContent::FetchBlob(url),
        );
    }

    for entry in statics {
        if !plan.assets.insert(&entry.src) {
            plan.skipped += 1;
            continue;
        }
        let ext = extension(&entry.src);
        let stem = plan.claim(STATIC_GROUP, &entry.id, &[ext.as_str()]);
        plan.push(
            entry_path(STATIC_GROUP, &stem, &ext),
            PlannedContent::FetchBlob(entry.src.clone()),
        );
    }

    debug!(
        "planned {} archive entries ({} duplicate URLs skipped, {} renamed)",
        plan.entries.len(),
        plan.skipped,
        plan.renamed
    );
    plan
}

fn entry_path(dir: &str, id: &str, ext: &str) -> String {
    let file = if ext.is_empty() {
        id.to_string()
    } else {
        format!("{id}.{ext}")
    };
    if dir.is_empty() {
        file
    } else {
        format!("{dir}/{file}")
    }
}
