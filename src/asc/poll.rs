use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::error::AscError;

/// Runs `check` immediately and then once per `interval` until it yields a
/// value, fails, or `cancel` fires.
pub async fn poll_until<T, F, Fut>(
    interval: Duration,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, AscError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, AscError>>,
{
    if interval.is_zero() {
        return Err(AscError::Config(
            "poll interval must be greater than zero".to_string(),
        ));
    }
    if cancel.is_cancelled() {
        return Err(AscError::Cancelled);
    }
    if let Some(value) = check().await? {
        return Ok(value);
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(AscError::Cancelled),
            _ = ticker.tick() => {
                if let Some(value) = check().await? {
                    return Ok(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn returns_on_first_successful_check() {
        let calls = Cell::new(0);
        let cancel = CancellationToken::new();
        let got = poll_until(Duration::from_millis(1), &cancel, || {
            calls.set(calls.get() + 1);
            async { Ok(Some(42)) }
        })
        .await
        .unwrap();
        assert_eq!(got, 42);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn polls_until_done() {
        let calls = Cell::new(0);
        let cancel = CancellationToken::new();
        let got = poll_until(Duration::from_millis(1), &cancel, || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { Ok((n >= 3).then_some("done")) }
        })
        .await
        .unwrap();
        assert_eq!(got, "done");
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn propagates_check_error() {
        let cancel = CancellationToken::new();
        let err = poll_until(Duration::from_millis(1), &cancel, || async {
            Err::<Option<()>, _>(AscError::MissingArgument("buildRunID"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AscError::MissingArgument("buildRunID")));
    }

    #[tokio::test]
    async fn cancelled_before_first_check() {
        let calls = Cell::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = poll_until(Duration::from_millis(1), &cancel, || {
            calls.set(calls.get() + 1);
            async { Ok(Some(1)) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AscError::Cancelled));
        assert_eq!(calls.get(), 0);
    }

    #[tokio::test]
    async fn rejects_zero_interval() {
        let cancel = CancellationToken::new();
        let err = poll_until(Duration::ZERO, &cancel, || async { Ok(Some(())) })
            .await
            .unwrap_err();
        assert!(matches!(err, AscError::Config(_)));
    }

    #[tokio::test]
    async fn cancellation_stops_pending_poll() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = poll_until(Duration::from_millis(5), &cancel, || async {
            Ok(None::<()>)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AscError::Cancelled));
    }
}
