//! Bounded retry for storage commands.

use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::{CommerceError, Result};

const BASE_DELAY_MS: u64 = 10;

/// Run `attempt` until it succeeds, fails for a non-retryable reason, or has
/// been retried `max_retries` times.
///
/// Each attempt must re-read whatever it depends on: a lost optimistic race
/// is retried like a transient failure.
pub async fn with_retries<T, F, Fut>(op: &'static str, max_retries: u32, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0;
    loop {
        match attempt().await {
            Err(err) if err.is_retryable() => {
                if retries >= max_retries {
                    error!(op, attempts = retries + 1, error = %err, "storage retries exhausted");
                    return Err(CommerceError::ServiceUnavailable(format!(
                        "{op} failed after {} attempts",
                        retries + 1
                    )));
                }
                retries += 1;
                warn!(op, attempt = retries, error = %err, "retrying storage command");
                tokio::time::sleep(backoff(retries)).await;
            }
            other => return other,
        }
    }
}

fn backoff(retry: u32) -> Duration {
    Duration::from_millis(BASE_DELAY_MS << retry.min(6))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_recovers_from_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out = with_retries("op", 3, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CommerceError::Storage(StoreError::Transient("blip".into())))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_service_unavailable() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out: Result<()> = with_retries("op", 2, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CommerceError::Storage(StoreError::Conflict("raced".into())))
        })
        .await;
        assert!(matches!(out, Err(CommerceError::ServiceUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_business_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out: Result<()> = with_retries("op", 5, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CommerceError::NotFound("order".into()))
        })
        .await;
        assert!(matches!(out, Err(CommerceError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
