//! # Call Deadlines
//!
//! Every remote call is bounded so a stalled node cannot hang bootstrap.

use crate::domain::SyncError;
use std::future::Future;
use std::time::Duration;

/// Run a remote call with a deadline.
pub async fn bounded_call<T, F>(call: &'static str, timeout: Duration, fut: F) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, SyncError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout {
            call,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
