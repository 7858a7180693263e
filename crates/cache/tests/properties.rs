//! 缓存、单飞与限流的行为性质

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use lumen_cache::testing::{InMemoryRateWindow, InMemoryRemoteCache};
use lumen_cache::{
    CacheCoordinator, ClientKey, ComputationOrchestrator, EndpointLimit, Fingerprint,
    ManualClock, NamespacePolicy, NamespaceTable, RateLimitPolicy, SlidingWindowLimiter,
    SourceTag,
};
use lumen_errors::AppError;

const START_MS: i64 = 1_700_000_000_000;

struct Fixture {
    clock: ManualClock,
    remote: Arc<InMemoryRemoteCache>,
    coordinator: Arc<CacheCoordinator>,
    orchestrator: Arc<ComputationOrchestrator>,
}

fn fixture() -> Fixture {
    let clock = ManualClock::new(START_MS);
    let remote = Arc::new(InMemoryRemoteCache::new(Arc::new(clock.clone())));
    let table = NamespaceTable::new(NamespacePolicy::new(Duration::from_secs(60), 100))
        .with("lessons", NamespacePolicy::new(Duration::from_secs(86_400), 500));
    let coordinator = Arc::new(CacheCoordinator::new(
        remote.clone(),
        table,
        Duration::ZERO,
        Arc::new(clock.clone()),
    ));
    let orchestrator = Arc::new(ComputationOrchestrator::new(coordinator.clone()));
    Fixture {
        clock,
        remote,
        coordinator,
        orchestrator,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_flight_runs_compute_once_for_concurrent_misses() {
    let fx = fixture();
    let fp = Fingerprint::of("lessons", "photosynthesis");
    let executions = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let orchestrator = fx.orchestrator.clone();
        let fp = fp.clone();
        let executions = executions.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .get_or_compute(&fp, "lessons", move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(vec!["light".to_string(), "water".to_string()])
                })
                .await
        }));
    }

    for handle in handles {
        let (value, source) = handle.await.unwrap().unwrap();
        assert_eq!(value, vec!["light".to_string(), "water".to_string()]);
        assert_eq!(source, SourceTag::Computed);
    }
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_flight_shares_identical_error() {
    let fx = fixture();
    let fp = Fingerprint::of("math", "divide by zero");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let orchestrator = fx.orchestrator.clone();
        let fp = fp.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .get_or_compute::<String, _, _>(&fp, "math", || async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Err(AppError::compute("solver crashed"))
                })
                .await
        }));
    }

    let mut messages = Vec::new();
    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, AppError::Compute(_)));
        messages.push(err.to_string());
    }
    messages.dedup();
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn set_then_get_holds_regardless_of_remote_availability() {
    let fx = fixture();

    fx.coordinator.set("up", "1", None, "lessons").await.unwrap();
    assert_eq!(
        fx.coordinator.get("up", "lessons").await.unwrap().as_deref(),
        Some("1")
    );

    fx.remote.set_failing(true);
    fx.coordinator.set("down", "2", None, "lessons").await.unwrap();
    assert_eq!(
        fx.coordinator.get("down", "lessons").await.unwrap().as_deref(),
        Some("2")
    );
}

#[tokio::test]
async fn ttl_expiry_applies_to_both_tiers() {
    let fx = fixture();
    fx.coordinator
        .set("k", "v", Some(Duration::from_secs(10)), "lessons")
        .await
        .unwrap();

    fx.clock.advance(Duration::from_secs(11));
    // 远程层
    assert_eq!(fx.coordinator.get("k", "lessons").await.unwrap(), None);

    // 本地层
    fx.remote.set_failing(true);
    assert_eq!(fx.coordinator.get("k", "lessons").await.unwrap(), None);
    assert!(!fx.coordinator.exists("k", "lessons").await.unwrap());
}

#[tokio::test]
async fn failing_remote_never_surfaces_errors() {
    let fx = fixture();
    fx.remote.set_failing(true);

    fx.coordinator.set("k", "v", None, "history").await.unwrap();
    assert!(fx.coordinator.exists("k", "history").await.unwrap());
    assert_eq!(
        fx.coordinator.get("k", "history").await.unwrap().as_deref(),
        Some("v")
    );
    fx.coordinator.delete("k", "history").await.unwrap();
    assert!(!fx.coordinator.exists("k", "history").await.unwrap());

    let stats = fx.coordinator.stats();
    assert_eq!(stats.errors, 5);
    assert_eq!(stats.local_fallbacks, 5);
    assert!(!fx.coordinator.circuit().remote_available);
}

#[tokio::test]
async fn sliding_window_allows_limit_then_rejects_then_recovers() {
    let clock = ManualClock::new(START_MS);
    let limiter = SlidingWindowLimiter::new(
        Arc::new(InMemoryRateWindow::new()),
        RateLimitPolicy::new(EndpointLimit::new(3, 1_000)),
        Arc::new(clock.clone()),
    );
    let client = ClientKey::ip("10.0.0.7");

    for _ in 0..3 {
        assert!(limiter.check_and_record(&client, "/x").await.unwrap().allowed());
        clock.advance(Duration::from_secs(1));
    }
    let rejected = limiter.check_and_record(&client, "/x").await.unwrap();
    assert!(!rejected.allowed());
    assert_eq!(rejected.minute_count, 3);

    // 窗口完整滑过
    clock.advance(Duration::from_secs(60));
    let decision = limiter.check_and_record(&client, "/x").await.unwrap();
    assert!(decision.allowed());
    assert_eq!(decision.minute_count, 1);
    assert_eq!(decision.hour_count, 4);
}

#[tokio::test]
async fn equivalent_inputs_share_one_entry_and_one_execution() {
    let fx = fixture();
    let executions = Arc::new(AtomicUsize::new(0));

    let a = Fingerprint::builder("lessons")
        .field("topic", "  Gravity ")
        .field("age", "10")
        .finish();
    let b = Fingerprint::builder("lessons")
        .field("age", "10")
        .field("topic", "GRAVITY")
        .finish();

    for fp in [&a, &b] {
        let executions = executions.clone();
        fx.orchestrator
            .get_or_compute(fp, "lessons", move || async move {
                executions.fetch_add(1, Ordering::SeqCst);
                Ok("lesson body".to_string())
            })
            .await
            .unwrap();
    }

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(fx.coordinator.local().len("lessons"), 1);
}

#[tokio::test]
async fn failed_computation_is_retried_on_next_call() {
    let fx = fixture();
    let fp = Fingerprint::of("tts", "good morning");
    let executions = Arc::new(AtomicUsize::new(0));

    let counter = executions.clone();
    let first = fx
        .orchestrator
        .get_or_compute::<String, _, _>(&fp, "tts", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AppError::external_service("speech engine timeout"))
        })
        .await;
    assert!(first.is_err());

    let counter = executions.clone();
    let (value, source) = fx
        .orchestrator
        .get_or_compute(&fp, "tts", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("audio-bytes".to_string())
        })
        .await
        .unwrap();

    assert_eq!(value, "audio-bytes");
    assert_eq!(source, SourceTag::Computed);
    assert_eq!(executions.load(Ordering::SeqCst), 2);
}
