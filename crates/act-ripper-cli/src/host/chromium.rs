//! Chromium execution host using chromiumoxide.

use super::bridge::{bind_expression, setup_script, LivePage, PageEval, PageFactory, RawSnapshot};
use super::bridge::{BRIDGE_SCRIPT, SNAPSHOT_SCRIPT};
use super::document::prepare;
use crate::fetch::HttpFetcher;
use act_ripper::acquisition::{AcquiredTable, HostSnapshot};
use act_ripper::{ExecutionHost, Fetcher, HostError, ModuleFactory, RipperConfig};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Environment variable pointing at a Chromium binary.
pub const CHROMIUM_PATH_ENV: &str = "ACT_RIPPER_CHROMIUM_PATH";

/// Browser builds unpacked under `~/.act-ripper/chromium`.
#[cfg(target_os = "macos")]
const BUNDLED_LAYOUTS: &[&str] = &[
    "chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
    "chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
    "chrome",
];
#[cfg(not(target_os = "macos"))]
const BUNDLED_LAYOUTS: &[&str] = &["chrome-linux64/chrome", "chrome"];

/// Executable names looked up on `PATH`.
const SYSTEM_NAMES: &[&str] = &["google-chrome", "chromium", "chromium-browser"];

#[cfg(target_os = "macos")]
const APP_BUNDLES: &[&str] = &["/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"];
#[cfg(not(target_os = "macos"))]
const APP_BUNDLES: &[&str] = &[];

/// Candidate binaries in lookup order: the explicit override, a bundled
/// build under `home`, `PATH` hits, then installed app bundles.
fn chromium_candidates(explicit: Option<OsString>, home: Option<PathBuf>) -> Vec<PathBuf> {
    let bundled_root = home.map(|h| h.join(".act-ripper").join("chromium"));
    explicit
        .map(PathBuf::from)
        .into_iter()
        .chain(
            bundled_root
                .iter()
                .flat_map(|root| BUNDLED_LAYOUTS.iter().map(move |rel| root.join(rel))),
        )
        .chain(SYSTEM_NAMES.iter().filter_map(|name| which::which(name).ok()))
        .chain(APP_BUNDLES.iter().map(PathBuf::from))
        .collect()
}

/// Locate a Chromium binary; `ACT_RIPPER_CHROMIUM_PATH` wins when it exists.
pub fn find_chromium() -> Option<PathBuf> {
    chromium_candidates(std::env::var_os(CHROMIUM_PATH_ENV), dirs::home_dir())
        .into_iter()
        .find(|p| p.is_file())
}

/// Loads event pages in one headless Chromium instance.
pub struct ChromiumHost {
    browser: Browser,
    fetcher: HttpFetcher,
    ready_timeout: Duration,
    settle_ms: u64,
    page: Mutex<Option<Page>>,
}

impl ChromiumHost {
    /// Launch Chromium.
    pub async fn launch(config: &RipperConfig) -> Result<Self, HostError> {
        let chrome_path = find_chromium().ok_or_else(|| {
            HostError::Unavailable(format!(
                "Chromium not found; install Chrome or set {CHROMIUM_PATH_ENV}"
            ))
        })?;

        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);
        if config.headful {
            builder = builder.with_head();
        } else {
            builder = builder.arg("--headless=new");
        }
        let browser_config = builder
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .build()
            .map_err(|e| HostError::Unavailable(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| HostError::Unavailable(format!("failed to launch Chromium: {e}")))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self {
            browser,
            fetcher: HttpFetcher::new(config.fetch_timeout_ms),
            ready_timeout: Duration::from_millis(config.ready_timeout_ms),
            settle_ms: config.settle_ms,
            page: Mutex::new(None),
        })
    }

    async fn current_page(&self) -> Result<Page, HostError> {
        self.page
            .lock()
            .await
            .clone()
            .ok_or_else(|| HostError::Script("no page loaded".to_string()))
    }
}

async fn eval_string(page: &Page, expression: &str) -> Result<String, HostError> {
    page.evaluate(expression)
        .await
        .map_err(|e| HostError::Script(e.to_string()))?
        .into_value::<String>()
        .map_err(|e| HostError::Script(format!("unexpected result: {e}")))
}

#[async_trait]
impl ExecutionHost for ChromiumHost {
    async fn open(&self, url: &str) -> Result<HostSnapshot, HostError> {
        self.teardown().await?;

        let bytes = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|e| HostError::Load(e.to_string()))?;
        let html = String::from_utf8_lossy(&bytes);
        let doc = prepare(&html, url, |global| setup_script(global, self.settle_ms));
        info!(
            "prepared page: base {}, chunk global {:?}, {} scripts disabled",
            doc.base_url, doc.chunk_global, doc.neutralised
        );

        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| HostError::Load(format!("failed to create page: {e}")))?;
        *self.page.lock().await = Some(page.clone());

        let start = Instant::now();
        page.set_content(doc.html)
            .await
            .map_err(|e| HostError::Load(e.to_string()))?;

        let ready = tokio::time::timeout(
            self.ready_timeout,
            page.evaluate("window.__actRipper.ready"),
        )
        .await;
        match ready {
            Ok(Ok(_)) => debug!("page ready after {}ms", start.elapsed().as_millis()),
            Ok(Err(e)) => return Err(HostError::Script(e.to_string())),
            Err(_) => return Err(HostError::NotReady(self.ready_timeout.as_millis() as u64)),
        }

        let raw = eval_string(&page, SNAPSHOT_SCRIPT).await?;
        let raw: RawSnapshot = serde_json::from_str(&raw)
            .map_err(|e| HostError::Script(format!("bad snapshot: {e}")))?;

        let live: Arc<dyn PageEval> = Arc::new(LivePage::new(
            page,
            tokio::runtime::Handle::current(),
            self.ready_timeout,
        ));
        Ok(raw.into_snapshot(&doc.base_url, |id, source| {
            let factory: Arc<dyn ModuleFactory> =
                Arc::new(PageFactory::new(id, source, Arc::clone(&live)));
            factory
        }))
    }

    async fn bind(&self, table: &AcquiredTable) -> Result<(), HostError> {
        let page = self.current_page().await?;
        page.evaluate(BRIDGE_SCRIPT)
            .await
            .map_err(|e| HostError::Script(e.to_string()))?;
        let expression =
            bind_expression(&table.layout).map_err(|e| HostError::Script(e.to_string()))?;
        let bound: usize = page
            .evaluate(expression.as_str())
            .await
            .map_err(|e| HostError::Script(e.to_string()))?
            .into_value()
            .map_err(|e| HostError::Script(format!("unexpected bind result: {e}")))?;
        debug!("bound {bound} modules in page");
        Ok(())
    }

    async fn teardown(&self) -> Result<(), HostError> {
        if let Some(page) = self.page.lock().await.take() {
            let _ = page.close().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_is_tried_first() {
        let dir = tempfile::tempdir().unwrap();
        let custom = dir.path().join("my-chrome");
        std::fs::write(&custom, b"").unwrap();

        let candidates = chromium_candidates(Some(custom.clone().into()), Some(dir.path().into()));
        assert_eq!(candidates[0], custom);
        assert_eq!(
            candidates[1],
            dir.path().join(".act-ripper/chromium").join(BUNDLED_LAYOUTS[0])
        );
        assert_eq!(candidates.iter().find(|p| p.is_file()), Some(&custom));
    }

    #[test]
    fn test_bundled_build_found_without_override() {
        let home = tempfile::tempdir().unwrap();
        let bundled = home.path().join(".act-ripper/chromium/chrome");
        std::fs::create_dir_all(bundled.parent().unwrap()).unwrap();
        std::fs::write(&bundled, b"").unwrap();

        let candidates = chromium_candidates(None, Some(home.path().into()));
        assert!(candidates.contains(&bundled));
        assert!(!candidates.is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_setup_captures_pushed_chunks() {
        let host = ChromiumHost::launch(&RipperConfig::default())
            .await
            .expect("failed to launch");
        let page = host.browser.new_page("about:blank").await.unwrap();
        let html = format!(
            "<html><head><script>{}</script><script>(self.webpackJsonp_t = self.webpackJsonp_t || []).push([[\"index\"], {{1: function(m, e) {{ m.exports = 'x'; }}}}]);</script></head></html>",
            setup_script(Some("webpackJsonp_t"), 0)
        );
        page.set_content(html).await.unwrap();
        page.evaluate("window.__actRipper.ready").await.unwrap();
        let raw: String = page.evaluate(SNAPSHOT_SCRIPT).await.unwrap().into_value().unwrap();
        let raw: RawSnapshot = serde_json::from_str(&raw).unwrap();
        let snapshot = raw.into_snapshot("", |_, src| {
            let f: Arc<dyn ModuleFactory> = Arc::new(act_ripper::loader::FnFactory::inert(src));
            f
        });
        assert_eq!(snapshot.intercepted.cached.len(), 1);
    }
}
