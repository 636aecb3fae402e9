//! Persistence chain run by the queue workers after sanitization.
//!
//! Each stage implements [`ProcessLog`]; a [`ChainedProcessLog`] awaits them in
//! order. The processor builds the chain as: pre-save hook, save, count (when
//! enabled), then any stages supplied by the embedding application.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::model::LogRecord;
use crate::options::PreSave;
use crate::stats::{CapacityStats, ProcessorMetrics};
use crate::storage::StorageWriter;

/// One step of the persistence chain.
#[async_trait]
pub trait ProcessLog: Send + Sync {
    async fn process(&self, record: &LogRecord, tenant: &str);
}

/// Runs its stages one after another.
#[derive(Clone, Default)]
pub struct ChainedProcessLog {
    stages: Vec<Arc<dyn ProcessLog>>,
}

impl ChainedProcessLog {
    pub fn new(stages: Vec<Arc<dyn ProcessLog>>) -> Self {
        Self { stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[async_trait]
impl ProcessLog for ChainedProcessLog {
    async fn process(&self, record: &LogRecord, tenant: &str) {
        for stage in &self.stages {
            stage.process(record, tenant).await;
        }
    }
}

/// Calls the configured pre-save hook.
pub(crate) struct PreSaveStage {
    pub(crate) hook: PreSave,
}

#[async_trait]
impl ProcessLog for PreSaveStage {
    async fn process(&self, record: &LogRecord, tenant: &str) {
        (self.hook)(record, tenant);
    }
}

/// Persists the record through the storage writer.
///
/// Failures are logged and counted here; they never reach the batch caller.
pub(crate) struct SaveStage {
    pub(crate) writer: Arc<dyn StorageWriter>,
    pub(crate) metrics: Arc<ProcessorMetrics>,
}

#[async_trait]
impl ProcessLog for SaveStage {
    async fn process(&self, record: &LogRecord, tenant: &str) {
        let Some(service_name) = record.service_name() else {
            error!(tenant, "Process is empty for the log, not saving");
            ProcessorMetrics::incr(&self.metrics.malformed);
            return;
        };

        match self.writer.write_log(tenant, record).await {
            Ok(()) => {
                ProcessorMetrics::incr(&self.metrics.saved);
                debug!(tenant, service_name, "Log record written to storage");
            }
            Err(e) => {
                ProcessorMetrics::incr(&self.metrics.save_failures);
                error!(error = %e, tenant, service_name, "Failed to save log");
            }
        }
    }
}

/// Feeds record sizes into the capacity counters.
pub(crate) struct CountStage {
    pub(crate) stats: Arc<CapacityStats>,
}

#[async_trait]
impl ProcessLog for CountStage {
    async fn process(&self, record: &LogRecord, _tenant: &str) {
        self.stats.record(record.encoded_len() as u64);
    }
}
