//! Retry-with-backoff for SQLite busy errors.
//!
//! Evidence loss is a correctness concern, so a mutation that keeps hitting
//! `SQLITE_BUSY` is retried up to 5 times (100 ms base delay, doubling,
//! up to 50 ms of jitter) before surfacing [`StoreError::BusyExhausted`].
//! Any non-busy error propagates immediately. The backoff yields to the
//! scheduler; this is the store's only suspension point.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::{Result, StoreError};

const MAX_ATTEMPTS: u32 = 5;
const BASE_DELAY_MS: u64 = 100;
const MAX_JITTER_MS: u64 = 50;

pub(crate) async fn with_busy_retry<T>(op: &str, mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let mut delay_ms = BASE_DELAY_MS;
    let mut attempt = 1;

    loop {
        match f() {
            Err(StoreError::Sqlite(e)) if is_busy(&e) => {
                if attempt >= MAX_ATTEMPTS {
                    return Err(StoreError::BusyExhausted {
                        attempts: MAX_ATTEMPTS,
                    });
                }
                let jitter = rand::thread_rng().gen_range(0..=MAX_JITTER_MS);
                debug!(op, attempt, delay_ms, jitter, "store busy, backing off");
                tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                delay_ms *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn is_busy(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy_error() -> StoreError {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_busy() {
        let mut failures_left = 2;
        let result = with_busy_retry("test", || {
            if failures_left > 0 {
                failures_left -= 1;
                Err(busy_error())
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts() {
        let mut calls = 0;
        let result: Result<()> = with_busy_retry("test", || {
            calls += 1;
            Err(busy_error())
        })
        .await;
        assert!(matches!(
            result,
            Err(StoreError::BusyExhausted { attempts: 5 })
        ));
        assert_eq!(calls, 5);
    }

    #[tokio::test]
    async fn test_non_busy_error_propagates_immediately() {
        let mut calls = 0;
        let result: Result<()> = with_busy_retry("test", || {
            calls += 1;
            Err(StoreError::NotFound)
        })
        .await;
        assert!(matches!(result, Err(StoreError::NotFound)));
        assert_eq!(calls, 1);
    }
}
