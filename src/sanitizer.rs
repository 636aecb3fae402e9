//! Record sanitizers applied by the queue workers before persistence.
//!
//! A [`ChainedSanitizer`] runs its sanitizers in order, feeding each one's output
//! to the next. The built-in sanitizers always come first so that user-supplied
//! transforms, and every stage after sanitization, see normalized records.

use std::sync::Arc;

use crate::model::{LogRecord, Process};

/// Service name assigned when a record's process has an empty service name.
pub const SERVICE_NAME_REPLACEMENT: &str = "empty-service-name";

/// Service name of the placeholder process created for records without one.
pub const NULL_PROCESS_SERVICE_NAME: &str = "null-process-and-service-name";

/// A transform over a single record.
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, record: LogRecord) -> LogRecord;
}

impl<F> Sanitizer for F
where
    F: Fn(LogRecord) -> LogRecord + Send + Sync,
{
    fn sanitize(&self, record: LogRecord) -> LogRecord {
        self(record)
    }
}

/// Replaces a missing process or an empty service name with a sentinel.
///
/// A shared process is never written in place: `Arc::make_mut` gives this record
/// its own copy when the process is aliased.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyServiceNameSanitizer;

impl Sanitizer for EmptyServiceNameSanitizer {
    fn sanitize(&self, mut record: LogRecord) -> LogRecord {
        match record.process.as_mut() {
            None => {
                record.process = Some(Arc::new(Process::new(NULL_PROCESS_SERVICE_NAME)));
            }
            Some(process) if process.service_name.is_empty() => {
                Arc::make_mut(process).service_name = SERVICE_NAME_REPLACEMENT.to_string();
            }
            Some(_) => {}
        }
        record
    }
}

/// The sanitizers every processor runs, in order.
pub fn standard_sanitizers() -> Vec<Arc<dyn Sanitizer>> {
    vec![Arc::new(EmptyServiceNameSanitizer)]
}

/// Ordered composition of sanitizers.
#[derive(Clone, Default)]
pub struct ChainedSanitizer {
    sanitizers: Vec<Arc<dyn Sanitizer>>,
}

impl ChainedSanitizer {
    pub fn new(sanitizers: Vec<Arc<dyn Sanitizer>>) -> Self {
        Self { sanitizers }
    }

    /// Number of sanitizers in the chain.
    pub fn len(&self) -> usize {
        self.sanitizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sanitizers.is_empty()
    }
}

impl Sanitizer for ChainedSanitizer {
    fn sanitize(&self, record: LogRecord) -> LogRecord {
        self.sanitizers
            .iter()
            .fold(record, |record, sanitizer| sanitizer.sanitize(record))
    }
}

impl std::fmt::Debug for ChainedSanitizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainedSanitizer")
            .field("len", &self.sanitizers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{KeyValue, Severity};

    fn record_with(process: Option<Arc<Process>>) -> LogRecord {
        LogRecord {
            process,
            ..LogRecord::default()
        }
    }

    #[test]
    fn test_missing_process_gets_placeholder() {
        let record = EmptyServiceNameSanitizer.sanitize(record_with(None));
        assert_eq!(record.service_name(), Some(NULL_PROCESS_SERVICE_NAME));
    }

    #[test]
    fn test_empty_service_name_replaced() {
        let process = Arc::new(Process::new("").with_attributes(vec![KeyValue::string("host", "a")]));
        let record = EmptyServiceNameSanitizer.sanitize(record_with(Some(process)));

        let sanitized = record.process.unwrap();
        assert_eq!(sanitized.service_name, SERVICE_NAME_REPLACEMENT);
        assert!(sanitized.has_string_attribute("host", "a"));
    }

    #[test]
    fn test_named_service_untouched() {
        let process = Arc::new(Process::new("billing"));
        let record = EmptyServiceNameSanitizer.sanitize(record_with(Some(process.clone())));

        assert!(Arc::ptr_eq(record.process.as_ref().unwrap(), &process));
    }

    #[test]
    fn test_shared_process_is_not_mutated_in_place() {
        let shared = Arc::new(Process::new(""));
        let first = record_with(Some(shared.clone()));
        let second = record_with(Some(shared.clone()));

        let first = EmptyServiceNameSanitizer.sanitize(first);
        let second = EmptyServiceNameSanitizer.sanitize(second);

        assert_eq!(first.service_name(), Some(SERVICE_NAME_REPLACEMENT));
        assert_eq!(second.service_name(), Some(SERVICE_NAME_REPLACEMENT));
        assert_eq!(shared.service_name, "");
    }

    #[test]
    fn test_chain_applies_in_order() {
        let append_a: Arc<dyn Sanitizer> = Arc::new(|mut r: LogRecord| {
            r.severity_text.push('a');
            r
        });
        let append_b: Arc<dyn Sanitizer> = Arc::new(|mut r: LogRecord| {
            r.severity_text.push('b');
            r
        });
        let chain = ChainedSanitizer::new(vec![append_a, append_b]);

        let record = chain.sanitize(LogRecord::default());
        assert_eq!(record.severity_text, "ab");
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_custom_sanitizer_sees_normalized_record() {
        let mut sanitizers = standard_sanitizers();
        sanitizers.push(Arc::new(|mut r: LogRecord| {
            let name = r.service_name().unwrap_or_default().to_uppercase();
            r.severity_text = name;
            r
        }));
        let chain = ChainedSanitizer::new(sanitizers);

        let process = Arc::new(Process::new(""));
        let record = chain.sanitize(LogRecord::new(process, Severity::Info, "x"));
        assert_eq!(record.severity_text, "EMPTY-SERVICE-NAME");
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let chain = ChainedSanitizer::default();
        let record = LogRecord::new(Arc::new(Process::new("svc")), Severity::Debug, "x");
        assert_eq!(chain.sanitize(record.clone()), record);
        assert!(chain.is_empty());
    }
}
