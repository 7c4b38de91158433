use super::*;
use shared::config::QueueGroupConfig;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

fn fast_config() -> QueueGroupConfig {
    QueueGroupConfig {
        queue_min_interval_sec: 0.0,
        queue_jitter_sec: 0.0,
        queue_max_retries: 2,
        queue_retry_backoff_sec: 0.01,
    }
}

#[tokio::test]
async fn submit_runs_call_and_returns_its_value() {
    let mut cfg = HashMap::new();
    cfg.insert("test".to_string(), fast_config());
    let queues = ProviderQueues::new(cfg);

    let call: QueuedFn = Arc::new(|| Box::pin(async { Ok(serde_json::json!({"ok": true})) }));
    let outcome = queues.submit("test", "call-1", call).await.unwrap();

    assert_eq!(outcome.result.unwrap(), serde_json::json!({"ok": true}));
    assert_eq!(outcome.attempts, 1);
}

#[tokio::test]
async fn submit_retries_transient_failures_then_succeeds() {
    let mut cfg = HashMap::new();
    cfg.insert("test".to_string(), fast_config());
    let queues = ProviderQueues::new(cfg);

    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_clone = attempts.clone();
    let call: QueuedFn = Arc::new(move || {
        let attempts = attempts_clone.clone();
        Box::pin(async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(transient_err("not yet"))
            } else {
                Ok(serde_json::json!(n))
            }
        })
    });

    let outcome = queues.submit("test", "call-retry", call).await.unwrap();

    assert_eq!(outcome.result.unwrap(), serde_json::json!(3));
    assert_eq!(outcome.attempts, 3);
}

#[tokio::test]
async fn submit_gives_up_after_max_retries() {
    let mut cfg = HashMap::new();
    cfg.insert("test".to_string(), fast_config());
    let queues = ProviderQueues::new(cfg);

    let call: QueuedFn = Arc::new(|| Box::pin(async { Err(transient_err("always fails")) }));
    let outcome = queues.submit("test", "call-fail", call).await.unwrap();

    assert!(outcome.result.is_err());
    assert_eq!(outcome.attempts, 3); // 1 initial + 2 retries
}

#[tokio::test]
async fn submit_does_not_retry_permanent_failures() {
    let mut cfg = HashMap::new();
    cfg.insert("test".to_string(), fast_config());
    let queues = ProviderQueues::new(cfg);

    let call: QueuedFn = Arc::new(|| Box::pin(async { Err(permanent_err("bad request")) }));
    let outcome = queues.submit("test", "call-permanent", call).await.unwrap();

    assert!(outcome.result.is_err());
    assert_eq!(outcome.attempts, 1);
}

#[tokio::test]
async fn calls_in_one_group_are_spaced_by_min_interval() {
    let mut cfg = HashMap::new();
    cfg.insert(
        "paced".to_string(),
        QueueGroupConfig {
            queue_min_interval_sec: 0.05,
            queue_jitter_sec: 0.0,
            queue_max_retries: 0,
            queue_retry_backoff_sec: 0.01,
        },
    );
    let queues = ProviderQueues::new(cfg);

    let start = Instant::now();
    for i in 0..3 {
        let call: QueuedFn = Arc::new(move || Box::pin(async move { Ok(serde_json::json!(i)) }));
        queues.submit("paced", format!("call-{i}"), call).await.unwrap();
    }
    let elapsed = start.elapsed();

    // Three calls with ~50ms pacing between them take at least ~100ms.
    assert!(elapsed.as_millis() >= 90, "elapsed={:?}", elapsed);
}

#[tokio::test]
async fn stats_reflect_successes_and_failures() {
    let mut cfg = HashMap::new();
    cfg.insert("test".to_string(), fast_config());
    let queues = ProviderQueues::new(cfg);

    let ok_call: QueuedFn = Arc::new(|| Box::pin(async { Ok(serde_json::json!(1)) }));
    queues.submit("test", "ok", ok_call).await.unwrap();

    let fail_call: QueuedFn = Arc::new(|| Box::pin(async { Err(permanent_err("nope")) }));
    queues.submit("test", "fail", fail_call).await.unwrap();

    let stats = queues.stats();
    let group_stats = stats.get("test").unwrap();
    assert_eq!(group_stats.calls_total, 2);
    assert_eq!(group_stats.calls_success, 1);
    assert_eq!(group_stats.calls_failed, 1);
    assert_eq!(group_stats.pending, 0);
}
