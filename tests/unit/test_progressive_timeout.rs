use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use toolgate::core::{
    execute_with_progressive_timeout, ProgressiveTimeoutConfig, ProgressiveTimeoutError,
};

fn config(max_retries: u32) -> ProgressiveTimeoutConfig {
    ProgressiveTimeoutConfig {
        initial_timeout_ms: 1_000,
        multiplier: 2.0,
        max_timeout_ms: 10_000,
        max_retries,
        retry_delay_ms: 0,
    }
}

async fn hang() -> Result<&'static str, String> {
    tokio::time::sleep(Duration::from_secs(3_600)).await;
    Ok("too late")
}

#[tokio::test(start_paused = true)]
async fn test_first_attempt_success_returns_value() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result = execute_with_progressive_timeout(
        move |_token| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(42) }
        },
        &config(3),
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_attempts_are_retried_with_longer_timeouts() {
    let tokens = Arc::new(Mutex::new(Vec::new()));
    let seen = tokens.clone();
    let started = Instant::now();

    let result = execute_with_progressive_timeout(
        move |token: CancellationToken| {
            let attempt = {
                let mut seen = seen.lock().unwrap();
                seen.push(token);
                seen.len()
            };
            async move {
                if attempt < 3 {
                    hang().await
                } else {
                    Ok("third time lucky")
                }
            }
        },
        &config(3),
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(result.unwrap(), "third time lucky");
    // 1s for the first attempt, 2s for the second.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(3_000), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(4_000), "{elapsed:?}");

    let tokens = tokens.lock().unwrap();
    assert_eq!(tokens.len(), 3);
    assert!(tokens[0].is_cancelled());
    assert!(tokens[1].is_cancelled());
    assert!(!tokens[2].is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_report_attempt_count() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let err = execute_with_progressive_timeout(
        move |_token| {
            counter.fetch_add(1, Ordering::SeqCst);
            hang()
        },
        &config(2),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(err.is_exhausted());
    match err {
        ProgressiveTimeoutError::MaxRetriesExceeded {
            attempts,
            elapsed_ms,
        } => {
            assert_eq!(attempts, 3);
            assert!(elapsed_ms >= 7_000, "{elapsed_ms}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_operation_error_is_not_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let err = execute_with_progressive_timeout(
        move |_token| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("fatal: bad revision".to_string()) }
        },
        &config(3),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    match err {
        ProgressiveTimeoutError::Operation(message) => {
            assert_eq!(message, "fatal: bad revision")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_external_cancel_is_not_a_timeout() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });
    let attempt_token = Arc::new(Mutex::new(None));
    let slot = attempt_token.clone();

    let err = execute_with_progressive_timeout(
        move |token: CancellationToken| {
            *slot.lock().unwrap() = Some(token);
            hang()
        },
        &config(3),
        &cancel,
    )
    .await
    .unwrap_err();

    assert!(err.is_cancelled());
    assert!(!err.is_exhausted());
    match err {
        ProgressiveTimeoutError::Cancelled {
            attempt,
            elapsed_ms,
        } => {
            assert_eq!(attempt, 0);
            assert!(elapsed_ms < 1_000, "{elapsed_ms}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let token = attempt_token.lock().unwrap().take().unwrap();
    assert!(token.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_retry_delay_stops_before_next_attempt() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        trigger.cancel();
    });
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let config = ProgressiveTimeoutConfig {
        retry_delay_ms: 5_000,
        ..config(3)
    };

    let err = execute_with_progressive_timeout(
        move |_token| {
            counter.fetch_add(1, Ordering::SeqCst);
            hang()
        },
        &config,
        &cancel,
    )
    .await
    .unwrap_err();

    match err {
        ProgressiveTimeoutError::Cancelled { attempt, .. } => assert_eq!(attempt, 1),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_already_cancelled_token_never_runs_operation() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let err = execute_with_progressive_timeout(
        move |_token| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(()) }
        },
        &config(3),
        &cancel,
    )
    .await
    .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_is_rejected_before_running() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let invalid = ProgressiveTimeoutConfig {
        multiplier: 0.5,
        ..config(3)
    };

    let err = execute_with_progressive_timeout(
        move |_token| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(()) }
        },
        &invalid,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ProgressiveTimeoutError::InvalidConfig(_)));
    assert!(err.to_string().contains("multiplier"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
