use fieldsync_core::{ids::TenantId, operations::PushBatch, revision::Revision};
use fieldsync_engine::{CallerScope, EngineConfig, EngineError, OpOutcome, SyncEngine};
use fieldsync_storage::{PullEntry, SqliteStore, StorageError};

use crate::TestDevice;

/// In-memory central store wrapping a [`SyncEngine`], as tests see it.
pub struct TestServer {
    pub engine: SyncEngine,
}

impl TestServer {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            engine: SyncEngine::new(SqliteStore::open_in_memory()?),
        })
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, StorageError> {
        Ok(Self {
            engine: SyncEngine::with_config(SqliteStore::open_in_memory()?, config),
        })
    }

    pub fn open(path: &str) -> Result<Self, StorageError> {
        Ok(Self {
            engine: SyncEngine::new(SqliteStore::open(path)?),
        })
    }

    pub fn push(
        &mut self,
        scope: &CallerScope,
        batch: &PushBatch,
    ) -> Result<Vec<OpOutcome>, EngineError> {
        self.engine.ingest_batch(scope, batch)
    }

    pub fn pull(
        &self,
        scope: &CallerScope,
        tenant_id: TenantId,
        after: Revision,
        limit: Option<usize>,
    ) -> Result<Vec<PullEntry>, EngineError> {
        self.engine.pull(scope, tenant_id, after, limit)
    }

    /// Pull pages from the device's cursor until the feed is drained,
    /// applying each page to the device's local view.
    pub fn sync_device(
        &self,
        scope: &CallerScope,
        tenant_id: TenantId,
        device: &mut TestDevice,
    ) -> Result<Vec<PullEntry>, EngineError> {
        let mut all = Vec::new();
        loop {
            let page = self.pull(scope, tenant_id, device.cursor(), None)?;
            if page.is_empty() {
                break;
            }
            device.apply_pull(&page);
            all.extend(page);
        }
        Ok(all)
    }
}
