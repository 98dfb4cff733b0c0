use naver_content_engine::api::{EndpointKey, RateGovernor, RateLimitConfig};
use naver_content_engine::testing::MockClock;
use naver_content_engine::utils::Clock;
use proptest::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn dispatch_concurrently(
    governor: RateGovernor,
    clock: MockClock,
    endpoint: EndpointKey,
    callers: usize,
) -> Vec<Instant> {
    let times = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();

    for _ in 0..callers {
        let governor = governor.clone();
        let clock = clock.clone();
        let times = times.clone();
        handles.push(tokio::spawn(async move {
            let permit = governor.acquire(endpoint).await;
            times.lock().unwrap().push(clock.now());
            permit.record_dispatch();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut times = times.lock().unwrap().clone();
    times.sort();
    times
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_never_dispatch_closer_than_min_interval() {
    init_logging();
    let clock = MockClock::new();
    let min_interval = Duration::from_millis(200);
    let governor = RateGovernor::uniform(
        RateLimitConfig {
            min_interval,
            window: Duration::from_secs(3600),
            window_ceiling: 1000,
        },
        Arc::new(clock.clone()),
    )
    .unwrap();

    let times = dispatch_concurrently(governor.clone(), clock.clone(), EndpointKey::News, 20).await;

    assert_eq!(times.len(), 20);
    for pair in times.windows(2) {
        assert!(
            pair[1].duration_since(pair[0]) >= min_interval,
            "dispatches {:?} apart",
            pair[1].duration_since(pair[0])
        );
    }
    assert_eq!(governor.stats(EndpointKey::News).await.window_count, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn window_ceiling_holds_and_resets() {
    init_logging();
    let clock = MockClock::new();
    let window = Duration::from_secs(10);
    let governor = RateGovernor::uniform(
        RateLimitConfig {
            min_interval: Duration::ZERO,
            window,
            window_ceiling: 3,
        },
        Arc::new(clock.clone()),
    )
    .unwrap();
    let start = clock.now();

    let times = dispatch_concurrently(governor, clock.clone(), EndpointKey::Blog, 10).await;

    let mut per_window = std::collections::BTreeMap::new();
    for t in &times {
        let bucket = t.duration_since(start).as_secs() / window.as_secs();
        *per_window.entry(bucket).or_insert(0u32) += 1;
    }
    assert_eq!(per_window.values().copied().collect::<Vec<_>>(), vec![3, 3, 3, 1]);
    assert_eq!(clock.elapsed(), Duration::from_secs(30));
}

#[tokio::test]
async fn different_endpoints_do_not_wait_on_each_other() {
    init_logging();
    let clock = MockClock::new();
    let governor = RateGovernor::uniform(
        RateLimitConfig {
            min_interval: Duration::from_secs(5),
            ..RateLimitConfig::default()
        },
        Arc::new(clock.clone()),
    )
    .unwrap();

    for endpoint in EndpointKey::ALL {
        governor.acquire(endpoint).await.record_dispatch();
    }

    assert!(clock.sleeps().is_empty());
    assert_eq!(governor.snapshot().await.len(), 4);
}

#[tokio::test]
async fn cancelled_waiter_releases_the_endpoint_without_credit() {
    init_logging();
    let clock = MockClock::new();
    let governor = RateGovernor::uniform(RateLimitConfig::default(), Arc::new(clock.clone())).unwrap();

    let held = governor.acquire(EndpointKey::Trending).await;
    let waiter = {
        let governor = governor.clone();
        tokio::spawn(async move { governor.acquire(EndpointKey::Trending).await.record_dispatch() })
    };
    tokio::task::yield_now().await;
    waiter.abort();
    let _ = waiter.await;
    drop(held);

    let stats = governor.stats(EndpointKey::Trending).await;
    assert_eq!(stats.window_count, 0);
    assert_eq!(stats.since_last_dispatch, None);
}

/// One caller: yields before queueing, simulated response time while holding
/// the permit, and whether the call succeeds.
type CallerPlan = (u8, u64, bool);

async fn run_plans(
    governor: RateGovernor,
    clock: MockClock,
    plans: Vec<CallerPlan>,
) -> Vec<Instant> {
    let times = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();

    for (yields, hold_ms, succeeds) in plans {
        let governor = governor.clone();
        let clock = clock.clone();
        let times = times.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..yields {
                tokio::task::yield_now().await;
            }
            let mut permit = governor.acquire(EndpointKey::News).await;
            permit.mark_attempt();
            times.lock().unwrap().push(clock.now());
            clock.sleep(Duration::from_millis(hold_ms)).await;
            if succeeds {
                permit.record_dispatch();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut times = times.lock().unwrap().clone();
    times.sort();
    times
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn dispatches_stay_spaced_under_random_interleavings(
        min_interval_ms in 1u64..500,
        plans in prop::collection::vec((0u8..4, 0u64..300, any::<bool>()), 1..12),
    ) {
        init_logging();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        let clock = MockClock::new();
        let min_interval = Duration::from_millis(min_interval_ms);
        let governor = RateGovernor::uniform(
            RateLimitConfig {
                min_interval,
                window: Duration::from_secs(3600),
                window_ceiling: 1000,
            },
            Arc::new(clock.clone()),
        )
        .unwrap();

        let times = runtime.block_on(run_plans(governor.clone(), clock, plans.clone()));
        let window_count = runtime.block_on(governor.stats(EndpointKey::News)).window_count;

        prop_assert_eq!(times.len(), plans.len());
        for pair in times.windows(2) {
            prop_assert!(pair[1].duration_since(pair[0]) >= min_interval);
        }
        let successes = plans.iter().filter(|(_, _, succeeds)| *succeeds).count();
        prop_assert_eq!(window_count as usize, successes);
    }

    #[test]
    fn window_ceiling_is_never_exceeded(
        ceiling in 1u32..5,
        callers in 1usize..15,
    ) {
        init_logging();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        let clock = MockClock::new();
        let window = Duration::from_secs(10);
        let governor = RateGovernor::uniform(
            RateLimitConfig {
                min_interval: Duration::ZERO,
                window,
                window_ceiling: ceiling,
            },
            Arc::new(clock.clone()),
        )
        .unwrap();
        let start = clock.now();

        let times = runtime.block_on(dispatch_concurrently(
            governor,
            clock,
            EndpointKey::Blog,
            callers,
        ));

        let mut per_window = std::collections::BTreeMap::new();
        for t in &times {
            let bucket = t.duration_since(start).as_secs() / window.as_secs();
            *per_window.entry(bucket).or_insert(0u32) += 1;
        }
        prop_assert!(per_window.values().all(|&count| count <= ceiling));
        prop_assert_eq!(per_window.values().sum::<u32>() as usize, callers);
    }
}
