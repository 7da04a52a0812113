//! Run orchestration: validate, load, acquire, mine, assemble.

use crate::acquisition::{acquire, AcquiredTable, DiscoveryStrategy};
use crate::assembler::{assemble, Archive, AssembleOptions, Fetcher, ZipArchiveWriter};
use crate::config::RipperConfig;
use crate::error::{MineError, RipError};
use crate::event::{event_id, event_label, validate_url};
use crate::host::ExecutionHost;
use crate::miner::{mine, Manifests};
use crate::resolver::{extract_static, StaticResourceEntry};
use crate::status::{emit, Stage, StatusKind, StatusSender};
use serde::Serialize;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Everything mined from one page, before any fetch.
#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    pub event_id: String,
    pub base_url: String,
    pub strategy: DiscoveryStrategy,
    pub module_count: usize,
    pub manifests: Manifests,
    pub statics: Vec<StaticResourceEntry>,
}

/// Drives one host and one fetcher through extraction runs.
pub struct Ripper<H, F> {
    host: H,
    fetcher: F,
    config: RipperConfig,
    status: Option<StatusSender>,
    seq: Mutex<u64>,
}

impl<H, F> Ripper<H, F>
where
    H: ExecutionHost,
    F: Fetcher,
{
    pub fn new(host: H, fetcher: F, config: RipperConfig) -> Self {
        Self {
            host,
            fetcher,
            config,
            status: None,
            seq: Mutex::new(0),
        }
    }

    /// Publish status events on `sender`.
    pub fn with_status(mut self, sender: StatusSender) -> Self {
        self.status = Some(sender);
        self
    }

    pub fn config(&self) -> &RipperConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Extract every resource of the event page at `url` into
    /// `{eventId}.zip`.
    #[instrument(skip(self))]
    pub async fn rip(&self, url: &str) -> Result<Archive, RipError> {
        let extraction = self.inspect(url).await?;
        let id = extraction.event_id.clone();

        self.stage_started(&id, Stage::Assemble).await;
        let started = Instant::now();
        let options = AssembleOptions {
            base_url: extraction.base_url.clone(),
            concurrency: self.config.fetch_concurrency,
        };
        let result = assemble(
            &id,
            &extraction.manifests.spine,
            &extraction.manifests.main,
            &extraction.statics,
            &self.fetcher,
            ZipArchiveWriter::new(),
            &options,
        )
        .await;

        match result {
            Ok(archive) => {
                self.stage_completed(&id, Stage::Assemble, started).await;
                self.send(
                    &id,
                    StatusKind::Finished {
                        file_name: archive.file_name.clone(),
                        entries: archive.entries.len(),
                    },
                )
                .await;
                Ok(archive)
            }
            Err(e) => {
                self.alert(&id, Stage::Assemble, &e.to_string()).await;
                Err(e.into())
            }
        }
    }

    /// Run everything up to and including mining; nothing is fetched.
    #[instrument(skip(self))]
    pub async fn inspect(&self, url: &str) -> Result<Extraction, RipError> {
        validate_url(url, &self.config.accepted_prefixes)?;
        let id = event_id(url);
        let label = event_label(url).unwrap_or_default();
        info!("event {id} ({url})");

        self.stage_started(&id, Stage::Load).await;
        let started = Instant::now();
        let snapshot = match self.host.open(url).await {
            Ok(s) => s,
            Err(e) => {
                self.alert(&id, Stage::Load, &e.to_string()).await;
                return Err(e.into());
            }
        };
        self.stage_completed(&id, Stage::Load, started).await;

        self.stage_started(&id, Stage::Acquire).await;
        let started = Instant::now();
        let acquired = match acquire(&snapshot, &label) {
            Ok(a) => a,
            Err(e) => {
                self.alert(&id, Stage::Acquire, &e.to_string()).await;
                return Err(e.into());
            }
        };
        if let Err(e) = self.host.bind(&acquired).await {
            self.alert(&id, Stage::Acquire, &e.to_string()).await;
            return Err(e.into());
        }
        self.stage_completed(&id, Stage::Acquire, started).await;

        self.stage_started(&id, Stage::Mine).await;
        let started = Instant::now();
        let strategy = acquired.strategy;
        let module_count = acquired.table.len();
        let base_url = snapshot.base_url.clone();
        let (manifests, statics) = match mine_blocking(acquired, base_url.clone()).await {
            Ok(found) => found,
            Err(e) => {
                self.alert(&id, Stage::Mine, &e.to_string()).await;
                return Err(e.into());
            }
        };
        self.stage_completed(&id, Stage::Mine, started).await;
        self.send(
            &id,
            StatusKind::Mined {
                spine: manifests.spine.len(),
                main: manifests.main.len(),
                statics: statics.len(),
            },
        )
        .await;
        if manifests.spine.is_empty() && manifests.main.is_empty() && statics.is_empty() {
            warn!("event {id}: no resources found");
            self.send(
                &id,
                StatusKind::Warning {
                    message: "no resources found".to_string(),
                },
            )
            .await;
        }

        Ok(Extraction {
            event_id: id,
            base_url,
            strategy,
            module_count,
            manifests,
            statics,
        })
    }

    /// Tear down the host.
    pub async fn clear(&self) -> Result<(), RipError> {
        self.host.teardown().await?;
        Ok(())
    }

    async fn send(&self, id: &str, kind: StatusKind) {
        let mut seq = self.seq.lock().await;
        emit(&self.status, id, &mut *seq, kind);
    }

    async fn stage_started(&self, id: &str, stage: Stage) {
        info!("{stage}");
        self.send(id, StatusKind::StageStarted { stage }).await;
    }

    async fn stage_completed(&self, id: &str, stage: Stage, started: Instant) {
        let duration_ms = started.elapsed().as_millis() as u64;
        self.send(id, StatusKind::StageCompleted { stage, duration_ms })
            .await;
    }

    async fn alert(&self, id: &str, stage: Stage, message: &str) {
        warn!("{stage} failed: {message}");
        self.send(
            id,
            StatusKind::Alert {
                stage,
                message: message.to_string(),
            },
        )
        .await;
    }
}

/// Mine manifests and static exports on a blocking worker. Factories may
/// block on the host while they execute.
async fn mine_blocking(
    acquired: AcquiredTable,
    base_url: String,
) -> Result<(Manifests, Vec<StaticResourceEntry>), MineError> {
    tokio::task::spawn_blocking(move || {
        let manifests = mine(&acquired.table, &base_url)?;
        let statics = extract_static(&acquired.table, &base_url);
        Ok::<_, MineError>((manifests, statics))
    })
    .await
    .map_err(|e| MineError::Worker(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{Chunk, HostSnapshot, InterceptedModuleBuffer};
    use crate::error::{FetchError, HostError};
    use crate::host::StaticHost;
    use crate::loader::ModuleTable;
    use crate::status::channel;
    use async_trait::async_trait;

    struct NoFetch;

    #[async_trait]
    impl Fetcher for NoFetch {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            Err(FetchError::Transport {
                url: url.to_string(),
                message: "offline".into(),
            })
        }
    }

    struct BrokenHost;

    #[async_trait]
    impl ExecutionHost for BrokenHost {
        async fn open(&self, _url: &str) -> Result<HostSnapshot, HostError> {
            Err(HostError::NotReady(10))
        }
        async fn teardown(&self) -> Result<(), HostError> {
            Ok(())
        }
    }

    const URL: &str = "https://act.hoyoverse.com/zzz/event/e1foo-x/index.html";

    fn snapshot(table: ModuleTable) -> HostSnapshot {
        HostSnapshot {
            base_url: "https://act.hoyoverse.com/zzz/event/e1foo-x/".into(),
            intercepted: InterceptedModuleBuffer {
                cached: vec![Chunk::new(vec!["index".into()], table)],
                loaded: None,
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_rejects_foreign_url() {
        let ripper = Ripper::new(StaticHost::default(), NoFetch, RipperConfig::default());
        let err = ripper.rip("https://example.com/event/e1/").await.unwrap_err();
        assert!(matches!(err, RipError::InvalidUrl(_)));
        assert!(err.is_early());
    }

    #[tokio::test]
    async fn test_inspect_collects_statics_without_fetching() {
        let table = ModuleTable::new().with(7u64, r#"function(e,t,n){e.exports=n.p+"img/bg.1f2e.png"}"#, |_, _, _| Ok(()));
        let ripper = Ripper::new(StaticHost::new(snapshot(table)), NoFetch, RipperConfig::default());
        let extraction = ripper.inspect(URL).await.unwrap();
        assert_eq!(extraction.event_id, "e1foo");
        assert_eq!(extraction.strategy, DiscoveryStrategy::InterceptedCache);
        assert_eq!(extraction.statics.len(), 1);
        assert_eq!(extraction.statics[0].id, "bg");
        assert_eq!(
            extraction.statics[0].src,
            "https://act.hoyoverse.com/zzz/event/e1foo-x/img/bg.1f2e.png"
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_raises_alert() {
        let table = ModuleTable::new().with(7u64, r#"e.exports=n.p+"img/bg.png""#, |_, _, _| Ok(()));
        let (tx, mut rx) = channel();
        let ripper = Ripper::new(StaticHost::new(snapshot(table)), NoFetch, RipperConfig::default())
            .with_status(tx);

        let err = ripper.rip(URL).await.unwrap_err();
        assert!(!err.is_early());

        let mut alerts = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let StatusKind::Alert { stage, .. } = event.kind {
                alerts.push(stage);
            }
        }
        assert_eq!(alerts, vec![Stage::Assemble]);
    }

    #[tokio::test]
    async fn test_host_failure_is_early() {
        let ripper = Ripper::new(BrokenHost, NoFetch, RipperConfig::default());
        let err = ripper.inspect(URL).await.unwrap_err();
        assert!(matches!(err, RipError::Host(HostError::NotReady(10))));
        assert!(err.is_early());
        ripper.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_modules_is_acquisition_error() {
        let ripper = Ripper::new(StaticHost::default(), NoFetch, RipperConfig::default());
        let err = ripper.inspect(URL).await.unwrap_err();
        assert!(matches!(err, RipError::Acquisition(_)));
    }
}
