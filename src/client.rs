//! HTTP storage writer.
//!
//! [`HttpLogWriter`] posts each processed record as JSON to a remote log store,
//! scoped by tenant header, retrying transient failures with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::model::LogRecord;
use crate::storage::{StorageError, StorageWriter};

/// Header carrying the tenant a record belongs to.
pub const TENANT_HEADER: &str = "X-Tenant";

/// Header carrying a per-write id so the store can deduplicate retries.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Path of the record ingestion endpoint, relative to the storage URL.
const LOGS_PATH: &str = "/api/v1/logs";

const DEFAULT_BASE_DELAY_MS: u64 = 500;

const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Errors that can occur while talking to the storage endpoint.
#[derive(Debug)]
pub enum ClientError {
    /// HTTP request failed
    Request(reqwest::Error),

    /// Server returned an error status code
    Status { code: StatusCode, message: String },

    /// All retry attempts exhausted
    RetriesExhausted { attempts: u32, last_error: String },

    /// Request timeout
    Timeout,

    /// Client configuration error
    Config(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::Status { code, message } => {
                write!(f, "Server error ({}): {}", code, message)
            }
            ClientError::RetriesExhausted {
                attempts,
                last_error,
            } => write!(
                f,
                "All {} attempts exhausted. Last error: {}",
                attempts, last_error
            ),
            ClientError::Timeout => write!(f, "Request timed out"),
            ClientError::Config(e) => write!(f, "Client configuration error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

/// [`StorageWriter`] backed by an HTTP log store.
pub struct HttpLogWriter {
    /// Reused across writes for connection pooling
    client: Client,

    logs_url: String,

    max_retries: u32,

    timeout: Duration,
}

impl HttpLogWriter {
    /// Create a writer for the store configured in `config`.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Self::with_settings(&config.storage_url, config.request_timeout, config.max_retries)
    }

    /// Create a writer for an explicit storage base URL.
    pub fn with_settings(
        storage_url: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            client,
            logs_url: format!("{}{}", storage_url.trim_end_matches('/'), LOGS_PATH),
            max_retries,
            timeout,
        })
    }

    /// Post one record, retrying transient failures.
    pub async fn send(&self, tenant: &str, record: &LogRecord) -> Result<(), ClientError> {
        let request_id = Uuid::new_v4();
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                let delay = self.calculate_backoff_delay(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %request_id,
                    "Retrying log write"
                );
                tokio::time::sleep(delay).await;
            }

            let err = match self.send_request(tenant, record, request_id).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if !Self::is_retryable_error(&err) {
                return Err(err);
            }
            if attempt >= self.max_retries {
                return Err(ClientError::RetriesExhausted {
                    attempts: attempt + 1,
                    last_error: err.to_string(),
                });
            }

            warn!(
                error = %err,
                attempt = attempt + 1,
                max_retries = self.max_retries,
                "Log write failed, will retry"
            );
            attempt += 1;
        }
    }

    async fn send_request(
        &self,
        tenant: &str,
        record: &LogRecord,
        request_id: Uuid,
    ) -> Result<(), ClientError> {
        let response = self
            .client
            .post(&self.logs_url)
            .timeout(self.timeout)
            .header(TENANT_HEADER, tenant)
            .header(REQUEST_ID_HEADER, request_id.to_string())
            .json(record)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ClientError::Status {
            code: status,
            message,
        })
    }

    /// Exponential backoff with up to 25% jitter, capped at `MAX_RETRY_DELAY_MS`.
    fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let exponential_delay = DEFAULT_BASE_DELAY_MS.saturating_mul(1 << attempt.min(10));
        let jitter = rand::random::<u64>() % (exponential_delay / 4 + 1);
        let total_delay = exponential_delay
            .saturating_add(jitter)
            .min(MAX_RETRY_DELAY_MS);

        Duration::from_millis(total_delay)
    }

    /// Connection errors, timeouts, 5xx and 429 are worth retrying.
    fn is_retryable_error(error: &ClientError) -> bool {
        match error {
            ClientError::Request(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            ClientError::Timeout => true,
            ClientError::Status { code, .. } => {
                code.is_server_error() || *code == StatusCode::TOO_MANY_REQUESTS
            }
            ClientError::RetriesExhausted { .. } | ClientError::Config(_) => false,
        }
    }

    pub fn logs_url(&self) -> &str {
        &self.logs_url
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl StorageWriter for HttpLogWriter {
    async fn write_log(&self, tenant: &str, record: &LogRecord) -> Result<(), StorageError> {
        self.send(tenant, record).await.map_err(StorageError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Process, Severity};
    use std::sync::Arc;

    #[test]
    fn test_client_error_display() {
        assert_eq!(format!("{}", ClientError::Timeout), "Request timed out");

        let err = ClientError::Status {
            code: StatusCode::BAD_REQUEST,
            message: "Invalid JSON".to_string(),
        };
        assert!(format!("{}", err).contains("400"));
        assert!(format!("{}", err).contains("Invalid JSON"));

        let err = ClientError::RetriesExhausted {
            attempts: 4,
            last_error: "Connection refused".to_string(),
        };
        assert!(format!("{}", err).contains("4"));
        assert!(format!("{}", err).contains("Connection refused"));
    }

    #[test]
    fn test_writer_from_config() {
        let config = Config::default();
        let writer = HttpLogWriter::new(&config).unwrap();

        assert_eq!(writer.logs_url(), "http://localhost:8000/api/v1/logs");
        assert_eq!(writer.max_retries(), 3);
        assert_eq!(writer.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_writer_trims_trailing_slash() {
        let writer =
            HttpLogWriter::with_settings("http://store:9000/", Duration::from_secs(5), 0).unwrap();
        assert_eq!(writer.logs_url(), "http://store:9000/api/v1/logs");
    }

    #[test]
    fn test_backoff_delay_increases_and_caps() {
        let writer = HttpLogWriter::new(&Config::default()).unwrap();

        let delay1 = writer.calculate_backoff_delay(1);
        let delay2 = writer.calculate_backoff_delay(2);
        assert!(delay1.as_millis() >= 1000 && delay1.as_millis() <= 1250);
        assert!(delay2.as_millis() >= 2000 && delay2.as_millis() <= 2500);

        let delay = writer.calculate_backoff_delay(20);
        assert!(delay.as_millis() <= MAX_RETRY_DELAY_MS as u128);
    }

    #[test]
    fn test_retryable_error_detection() {
        assert!(HttpLogWriter::is_retryable_error(&ClientError::Timeout));
        assert!(HttpLogWriter::is_retryable_error(&ClientError::Status {
            code: StatusCode::SERVICE_UNAVAILABLE,
            message: String::new(),
        }));
        assert!(HttpLogWriter::is_retryable_error(&ClientError::Status {
            code: StatusCode::TOO_MANY_REQUESTS,
            message: String::new(),
        }));
        assert!(!HttpLogWriter::is_retryable_error(&ClientError::Status {
            code: StatusCode::BAD_REQUEST,
            message: String::new(),
        }));
        assert!(!HttpLogWriter::is_retryable_error(&ClientError::Config(
            "bad".to_string()
        )));
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_without_retries() {
        // Reserve a free port, then release it so nothing is listening there.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let writer = HttpLogWriter::with_settings(
            &format!("http://{}", addr),
            Duration::from_millis(200),
            0,
        )
        .unwrap();
        let record = LogRecord::new(Arc::new(Process::new("svc")), Severity::Info, "x");

        let result = writer.write_log("acme", &record).await;
        assert!(matches!(result, Err(StorageError::Transport(_))));
    }
}
