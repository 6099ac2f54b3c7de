use crate::utils::error::ApiError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry an idempotent upstream call (embed, search) up to `max_attempts`
/// with exponential backoff. Non-retryable errors surface immediately.
pub async fn with_backoff<T, F, Fut>(
    op: &'static str,
    max_attempts: u32,
    f: F,
) -> Result<T, ApiError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut delay = Duration::from_millis(200);

    for attempt in 1..=max_attempts {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                warn!(op, attempt, error = %e, "retryable upstream failure, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    unreachable!("retry loop exits via return")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_backoff("embed", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ApiError::EmbeddingUnavailable("transient".into()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_surfaces_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = with_backoff("embed", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::EmbeddingBadRequest("bad input".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = with_backoff("search", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::VectorStoreUnavailable("down".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
