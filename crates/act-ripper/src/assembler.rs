//! Archive assembly.
//!
//! Executes an [`ArchivePlan`]: literal and inline entries are written
//! directly, every fetch is dispatched concurrently, and the archive is only
//! finalised once all of them succeeded. One failed fetch aborts the whole
//! archive.

use crate::error::{AssembleError, FetchError};
use crate::manifest::{MainManifestEntry, SpineManifestMap};
use crate::resolver::{plan_archive, PlannedContent, StaticResourceEntry};
use async_trait::async_trait;
use base64::Engine;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use tracing::{debug, info};

/// Network fetch primitive.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Content handed to an archive writer.
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveContent {
    Text(String),
    Json(Value),
    Blob(Vec<u8>),
}

/// Serialises `(path, content)` pairs into an archive.
pub trait ArchiveWriter {
    fn add(&mut self, path: &str, content: ArchiveContent) -> Result<(), AssembleError>;
    fn finish(self) -> Result<Vec<u8>, AssembleError>;
}

/// Serialise JSON with four-space indentation.
pub fn to_json_text(value: &Value) -> Result<String, AssembleError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Zip archive writer (deflate).
pub struct ZipArchiveWriter {
    zip: zip::ZipWriter<Cursor<Vec<u8>>>,
}

impl ZipArchiveWriter {
    pub fn new() -> Self {
        Self {
            zip: zip::ZipWriter::new(Cursor::new(Vec::new())),
        }
    }
}

impl Default for ZipArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveWriter for ZipArchiveWriter {
    fn add(&mut self, path: &str, content: ArchiveContent) -> Result<(), AssembleError> {
        let bytes = match content {
            ArchiveContent::Text(text) => text.into_bytes(),
            ArchiveContent::Json(value) => to_json_text(&value)?.into_bytes(),
            ArchiveContent::Blob(bytes) => bytes,
        };
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        self.zip
            .start_file(path, options)
            .map_err(|e| AssembleError::Write {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        self.zip.write_all(&bytes)?;
        Ok(())
    }

    fn finish(self) -> Result<Vec<u8>, AssembleError> {
        let cursor = self.zip.finish().map_err(|e| AssembleError::Write {
            path: String::new(),
            message: e.to_string(),
        })?;
        Ok(cursor.into_inner())
    }
}

/// Decode a `data:` URI into bytes (base64 or percent-encoded payloads).
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, FetchError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| FetchError::DataUri(truncate(uri)))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| FetchError::DataUri(truncate(uri)))?;
    if meta.split(';').any(|p| p.eq_ignore_ascii_case("base64")) {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| FetchError::DataUri(format!("{}: {e}", truncate(uri))))
    } else {
        Ok(urlencoding::decode_binary(payload.as_bytes()).into_owned())
    }
}

fn truncate(s: &str) -> String {
    s.chars().take(48).collect()
}

/// Knobs for one assembly.
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub base_url: String,
    /// Upper bound on in-flight fetches.
    pub concurrency: usize,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            concurrency: 128,
        }
    }
}

/// Summary of a finished archive.
#[derive(Debug, Clone)]
pub struct Archive {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Archive paths in write order.
    pub entries: Vec<String>,
    pub fetched: usize,
    pub skipped_duplicates: usize,
}

/// Fetch and package every resolved resource into `{event_id}.zip`.
pub async fn assemble<F, W>(
    event_id: &str,
    spine: &SpineManifestMap,
    main: &[MainManifestEntry],
    statics: &[StaticResourceEntry],
    fetcher: &F,
    mut writer: W,
    options: &AssembleOptions,
) -> Result<Archive, AssembleError>
where
    F: Fetcher + ?Sized,
    W: ArchiveWriter,
{
    let plan = plan_archive(spine, main, statics, &options.base_url);
    info!(
        "assembling {}: {} entries, {} fetches",
        event_id,
        plan.entries.len(),
        plan.fetch_count()
    );

    let mut written = Vec::with_capacity(plan.entries.len());
    // One fetch per URL; every path planned for it receives the bytes.
    let mut fetches: Vec<(String, bool, Vec<String>)> = Vec::new();
    let mut by_url: HashMap<String, usize> = HashMap::new();
    for entry in plan.entries {
        let (url, text) = match entry.content {
            PlannedContent::Text(text) => {
                writer.add(&entry.path, ArchiveContent::Text(text))?;
                written.push(entry.path);
                continue;
            }
            PlannedContent::Json(value) => {
                writer.add(&entry.path, ArchiveContent::Json(value))?;
                written.push(entry.path);
                continue;
            }
            PlannedContent::FetchText(url) => (url, true),
            PlannedContent::FetchBlob(url) => (url, false),
        };
        match by_url.get(&url) {
            Some(&i) => fetches[i].2.push(entry.path),
            None => {
                by_url.insert(url.clone(), fetches.len());
                fetches.push((url, text, vec![entry.path]));
            }
        }
    }

    let fetched_count = fetches.len();
    let fetched: Vec<(bool, Vec<String>, Vec<u8>)> = stream::iter(fetches)
        .map(|(url, text, paths)| async move {
            debug!("fetching {url}");
            let bytes = fetcher.fetch(&url).await?;
            Ok::<_, FetchError>((text, paths, bytes))
        })
        .buffer_unordered(options.concurrency.max(1))
        .try_collect()
        .await?;

    for (text, paths, bytes) in fetched {
        for path in paths {
            let content = if text {
                ArchiveContent::Text(String::from_utf8_lossy(&bytes).into_owned())
            } else {
                ArchiveContent::Blob(bytes.clone())
            };
            writer.add(&path, content)?;
            written.push(path);
        }
    }

    let bytes = writer.finish()?;
    info!("archive {event_id}.zip ready ({} bytes)", bytes.len());
    Ok(Archive {
        file_name: format!("{event_id}.zip"),
        bytes,
        entries: written,
        fetched: fetched_count,
        skipped_duplicates: plan.skipped,
    })
}
