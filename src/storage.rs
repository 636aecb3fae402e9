//! Storage boundary for persisted log records.
//!
//! The processor only knows about [`StorageWriter`]; retries, batching and schema
//! are the writer's business.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::client::ClientError;
use crate::model::LogRecord;

/// Errors returned by a storage writer.
#[derive(Debug)]
pub enum StorageError {
    /// The remote storage endpoint could not be reached or refused the record
    Transport(ClientError),

    /// The backend rejected the write
    Backend(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Transport(e) => write!(f, "Storage transport error: {}", e),
            StorageError::Backend(message) => write!(f, "Storage backend error: {}", message),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Transport(e) => Some(e),
            StorageError::Backend(_) => None,
        }
    }
}

impl From<ClientError> for StorageError {
    fn from(err: ClientError) -> Self {
        StorageError::Transport(err)
    }
}

/// Sink for processed log records, scoped by tenant.
#[async_trait]
pub trait StorageWriter: Send + Sync {
    async fn write_log(&self, tenant: &str, record: &LogRecord) -> Result<(), StorageError>;
}

/// A stored record together with the tenant it was written for.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLog {
    pub tenant: String,
    pub record: LogRecord,
}

/// Keeps every written record in memory.
///
/// Meant for tests and for embedding the processor where records are inspected
/// in-process.
#[derive(Debug, Default)]
pub struct MemoryLogWriter {
    logs: Mutex<Vec<StoredLog>>,
}

impl MemoryLogWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far, in write order.
    pub fn logs(&self) -> Vec<StoredLog> {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageWriter for MemoryLogWriter {
    async fn write_log(&self, tenant: &str, record: &LogRecord) -> Result<(), StorageError> {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(StoredLog {
                tenant: tenant.to_string(),
                record: record.clone(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Process, Severity};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_writer_keeps_tenant_and_order() {
        let writer = MemoryLogWriter::new();
        let process = Arc::new(Process::new("svc"));

        writer
            .write_log("acme", &LogRecord::new(process.clone(), Severity::Info, "one"))
            .await
            .unwrap();
        writer
            .write_log("globex", &LogRecord::new(process, Severity::Error, "two"))
            .await
            .unwrap();

        let logs = writer.logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].tenant, "acme");
        assert_eq!(logs[1].tenant, "globex");
        assert_eq!(logs[1].record.severity_text, "ERROR");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Backend("disk full".to_string());
        assert_eq!(format!("{}", err), "Storage backend error: disk full");

        let err = StorageError::from(ClientError::Timeout);
        assert_eq!(format!("{}", err), "Storage transport error: Request timed out");
    }
}
