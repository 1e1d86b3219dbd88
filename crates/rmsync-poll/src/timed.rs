//! Bounded driver calls.
//!
//! Each call runs on its own task so a hung backend cannot stall the
//! iteration. When the deadline passes the task is aborted and the call is
//! reported as timed out, whatever the driver was doing.

use std::future::Future;
use std::time::Duration;

use rmsync_core::StatusCode;
use tracing::warn;

use crate::driver::{DriverError, DriverResult};

#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    Completed(T),
    Failed(DriverError),
    TimedOut,
}

/// Run `call` on a fresh task, waiting at most `timeout`.
pub async fn call_with_timeout<T, F>(timeout: Duration, call: F) -> CallOutcome<T>
where
    F: Future<Output = DriverResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::spawn(call);
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(Ok(value))) => CallOutcome::Completed(value),
        Ok(Ok(Err(e))) => CallOutcome::Failed(e),
        Ok(Err(join_error)) => {
            warn!(error = %join_error, "driver task did not complete");
            CallOutcome::Failed(DriverError::silent(StatusCode::SysFailure))
        }
        Err(_) => {
            handle.abort();
            CallOutcome::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn fast_call_completes() {
        let out =
            call_with_timeout(Duration::from_secs(1), async { Ok::<_, DriverError>(7u32) }).await;
        assert_eq!(out, CallOutcome::Completed(7));
    }

    #[tokio::test]
    async fn driver_error_is_passed_through() {
        let out: CallOutcome<u32> = call_with_timeout(Duration::from_secs(1), async {
            Err::<u32, _>(DriverError::new(StatusCode::NoAuth, "bad token"))
        })
        .await;
        assert_eq!(
            out,
            CallOutcome::Failed(DriverError::new(StatusCode::NoAuth, "bad token"))
        );
    }

    #[tokio::test]
    async fn slow_call_times_out_and_is_aborted() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let out: CallOutcome<u32> = call_with_timeout(Duration::from_millis(50), async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<_, DriverError>(1u32)
        })
        .await;
        assert_eq!(out, CallOutcome::TimedOut);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_driver_is_a_failure() {
        let out: CallOutcome<u32> = call_with_timeout(Duration::from_secs(1), async {
            if true {
                panic!("driver bug");
            }
            Ok::<_, DriverError>(0u32)
        })
        .await;
        assert_eq!(
            out,
            CallOutcome::Failed(DriverError::silent(StatusCode::SysFailure))
        );
    }
}
