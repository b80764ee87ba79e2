use connectors::error::EnrichError;
use engine_core::retry::RetryDisposition;

/// Only transient failures are retried in place. Rate limits leave the row
/// for a later invocation; the rest will not improve with another attempt.
pub fn classify_enrich_error(err: &EnrichError) -> RetryDisposition {
    match err {
        EnrichError::Transient(_) => RetryDisposition::Retry,
        EnrichError::RateLimited { .. } => RetryDisposition::Stop,
        EnrichError::Malformed(_) => RetryDisposition::Stop,
        EnrichError::Rejected { .. } => RetryDisposition::Stop,
    }
}
