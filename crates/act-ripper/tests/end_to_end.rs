//! Full runs over synthetic module tables: acquisition, mining, planning and
//! zip output, with an in-memory fetcher.

use act_ripper::acquisition::{Chunk, HostSnapshot};
use act_ripper::host::StaticHost;
use act_ripper::loader::Getter;
use act_ripper::{
    decode_data_uri, DiscoveryStrategy, FetchError, Fetcher, ModuleTable, RipError, Ripper,
    RipperConfig,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use std::rc::Rc;
use std::sync::Mutex;

const PAGE: &str = "https://act.hoyoverse.com/zzz/event/e1foo-summer/index.html";
const BASE: &str = "https://act.hoyoverse.com/zzz/event/e1foo-summer/";

struct MemoryFetcher {
    files: HashMap<String, Vec<u8>>,
    requested: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    fn new(files: &[(&str, &[u8])]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_vec()))
                .collect(),
            requested: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if url.starts_with("data:") {
            return decode_data_uri(url);
        }
        self.requested.lock().unwrap().push(url.to_string());
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

/// Application layer: one manifest-bearing module whose manifests live on
/// its dependencies' exports.
fn app_layer() -> ModuleTable {
    ModuleTable::new()
        .with(100u64, "var a={atlas:t.a,json:t.b};n(200);n(300)", |_, exports, require| {
            require.mark_es_module(exports);
            require.require(&200u64.into())?;
            require.require(&300u64.into())?;
            Ok(())
        })
        .with(200u64, "n.d(t,{chars_MANIFEST:()=>r,BG_MANIFEST:()=>o})", |_, exports, require| {
            require.mark_es_module(exports);
            let chars: Getter = Rc::new(|| {
                json!({"hero01": {"atlas": "hero01.png\nsize: 64,64", "json": {"bones": []}}})
            });
            let bg: Getter = Rc::new(|| json!([{"id": "bg", "src": "./img/bg.png", "type": "image"}]));
            require.define_all(exports, [("chars_MANIFEST".to_string(), chars), ("BG_MANIFEST".to_string(), bg)]);
            Ok(())
        })
        .with(300u64, "n.d(t,{SCENE_MANIFEST:()=>s})", |_, exports, require| {
            require.mark_es_module(exports);
            let scene: Getter = Rc::new(|| {
                json!({"main": {"id": "bg-main", "src": "./img/bg.png", "type": "image"}})
            });
            require.define(exports, "SCENE_MANIFEST", scene);
            Ok(())
        })
        .with(400u64, r#"function(e,t,n){e.exports=n.p+"img/logo.77aa.png"}"#, |_, _, _| Ok(()))
        .with(500u64, r#"function(e,t){e.exports="data:image/png;base64,aGk="}"#, |_, _, _| Ok(()))
}

fn snapshot() -> HostSnapshot {
    let mut arrays = BTreeMap::new();
    arrays.insert(
        "webpackJsonp_e1foo".to_string(),
        vec![
            Chunk::new(vec!["chunk-vendors".into()], ModuleTable::new().with(1u64, "vendor", |_, _, _| Ok(()))),
            Chunk::new(vec!["index".into()], app_layer()),
        ],
    );
    HostSnapshot {
        base_url: BASE.to_string(),
        chunk_arrays: arrays,
        ..Default::default()
    }
}

fn read_zip(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut files = BTreeMap::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).unwrap();
        files.insert(file.name().to_string(), buf);
    }
    files
}

#[tokio::test]
async fn test_rip_writes_every_resource_once() {
    let fetcher = MemoryFetcher::new(&[
        ("https://act.hoyoverse.com/zzz/event/e1foo-summer/img/bg.png", &b"BG"[..]),
        ("https://act.hoyoverse.com/zzz/event/e1foo-summer/img/logo.77aa.png", &b"LOGO"[..]),
    ]);
    let ripper = Ripper::new(StaticHost::new(snapshot()), fetcher, RipperConfig::default());

    let archive = ripper.rip(PAGE).await.unwrap();
    assert_eq!(archive.file_name, "e1foo.zip");
    assert_eq!(archive.skipped_duplicates, 0);

    let files = read_zip(&archive.bytes);
    let names: Vec<&str> = files.keys().map(String::as_str).collect();
    assert_eq!(
        names,
        vec![
            "SCENE/bg-main.png",
            "chars/hero01.atlas",
            "chars/hero01.json",
            "other_resources/500.png",
            "other_resources/logo.png",
        ]
    );
    assert_eq!(files["chars/hero01.atlas"], b"hero01.png\nsize: 64,64");
    assert_eq!(
        String::from_utf8(files["chars/hero01.json"].clone()).unwrap(),
        "{\n    \"bones\": []\n}"
    );
    assert_eq!(files["SCENE/bg-main.png"], b"BG");
    assert_eq!(files["other_resources/500.png"], b"hi");

    let requested = ripper_requests(&ripper);
    assert_eq!(requested.len(), 2);
}

fn ripper_requests(ripper: &Ripper<StaticHost, MemoryFetcher>) -> Vec<String> {
    ripper.fetcher().requested.lock().unwrap().clone()
}

#[tokio::test]
async fn test_inspect_reports_manifests() {
    let ripper = Ripper::new(
        StaticHost::new(snapshot()),
        MemoryFetcher::new(&[]),
        RipperConfig::default(),
    );
    let extraction = ripper.inspect(PAGE).await.unwrap();
    assert_eq!(extraction.strategy, DiscoveryStrategy::NamedChunkArray);
    assert_eq!(extraction.module_count, 6);
    assert_eq!(extraction.manifests.spine.len(), 1);
    let main_ids: Vec<&str> = extraction
        .manifests
        .main
        .iter()
        .map(|e| e.resource_id.as_str())
        .collect();
    assert_eq!(main_ids, vec!["bg-main"]);
    assert_eq!(extraction.statics.len(), 2);
    assert!(ripper.fetcher().requested.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_asset_aborts_archive() {
    let ripper = Ripper::new(
        StaticHost::new(snapshot()),
        MemoryFetcher::new(&[]),
        RipperConfig::default(),
    );
    let err = ripper.rip(PAGE).await.unwrap_err();
    assert!(matches!(err, RipError::Assemble(_)));
}

#[tokio::test]
async fn test_archive_lands_in_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = RipperConfig {
        output_dir: dir.path().to_path_buf(),
        fetch_concurrency: 1,
        ..Default::default()
    };
    let fetcher = MemoryFetcher::new(&[
        ("https://act.hoyoverse.com/zzz/event/e1foo-summer/img/bg.png", &b"BG"[..]),
        ("https://act.hoyoverse.com/zzz/event/e1foo-summer/img/logo.77aa.png", &b"LOGO"[..]),
    ]);
    let ripper = Ripper::new(StaticHost::new(snapshot()), fetcher, config);

    let archive = ripper.rip(PAGE).await.unwrap();
    let path = ripper.config().archive_path(&archive.file_name);
    std::fs::write(&path, &archive.bytes).unwrap();

    let on_disk = std::fs::read(dir.path().join("e1foo.zip")).unwrap();
    assert_eq!(read_zip(&on_disk).len(), 5);
}
