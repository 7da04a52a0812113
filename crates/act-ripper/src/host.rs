//! Execution host contract.
//!
//! A host loads the event page with the interception setup in place, waits
//! for the page to settle and hands back a [`HostSnapshot`]. The Chromium
//! host lives in the CLI crate; tests use in-memory hosts.

use crate::acquisition::{AcquiredTable, HostSnapshot};
use crate::error::HostError;
use async_trait::async_trait;

#[async_trait]
pub trait ExecutionHost: Send + Sync {
    /// Load `url`, install interception before page scripts run and wait
    /// until the page reports readiness.
    async fn open(&self, url: &str) -> Result<HostSnapshot, HostError>;

    /// Mirror the acquired layout inside the host, for hosts whose factories
    /// execute remotely.
    async fn bind(&self, _table: &AcquiredTable) -> Result<(), HostError> {
        Ok(())
    }

    /// Tear down the loaded page and everything it captured.
    async fn teardown(&self) -> Result<(), HostError>;
}

/// Host serving a fixed snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticHost {
    snapshot: HostSnapshot,
}

impl StaticHost {
    pub fn new(snapshot: HostSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl ExecutionHost for StaticHost {
    async fn open(&self, _url: &str) -> Result<HostSnapshot, HostError> {
        Ok(self.snapshot.clone())
    }

    async fn teardown(&self) -> Result<(), HostError> {
        Ok(())
    }
}
