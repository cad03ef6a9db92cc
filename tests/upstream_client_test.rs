//! Behavior of the throttled, caching, retrying analytics client, driven
//! through a scripted transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use replenish_engine::config::UpstreamConfig;
use replenish_engine::errors::EngineError;
use replenish_engine::upstream::{
    backoff_pause, AnalyticsClient, AnalyticsQuery, AnalyticsTransport, TransportError,
};
use serde_json::{json, Value};

struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<Value, TransportError>>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    fn new(responses: Vec<Result<Value, TransportError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalyticsTransport for ScriptedTransport {
    async fn post(&self, _query: &AnalyticsQuery) -> Result<Value, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({"result": {"data": []}})))
    }
}

fn fast_config() -> UpstreamConfig {
    UpstreamConfig {
        min_interval_secs: 0,
        max_retries: 3,
        base_pause_secs: 0.01,
        max_pause_secs: 0.05,
        jitter_factor: 0.0,
        overall_deadline_secs: 30,
        ..UpstreamConfig::default()
    }
}

fn query(offset: u32) -> AnalyticsQuery {
    let mut q = AnalyticsQuery::daily_sales(
        &[42],
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 5, 31).unwrap(),
    );
    q.offset = offset;
    q
}

fn client(
    responses: Vec<Result<Value, TransportError>>,
    config: UpstreamConfig,
) -> AnalyticsClient<ScriptedTransport> {
    AnalyticsClient::new(ScriptedTransport::new(responses), config)
}

#[tokio::test]
async fn identical_queries_are_served_from_cache() {
    let client = client(vec![Ok(json!({"result": {"data": [1]}}))], fast_config());

    let first = client.fetch(&query(0)).await.unwrap();
    let second = client.fetch(&query(0)).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(client_calls(&client), 1);
}

#[tokio::test]
async fn distinct_queries_hit_the_transport_separately() {
    let client = client(
        vec![Ok(json!({"page": 0})), Ok(json!({"page": 1}))],
        fast_config(),
    );

    let first = client.fetch(&query(0)).await.unwrap();
    let second = client.fetch(&query(1000)).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(client_calls(&client), 2);
}

#[tokio::test]
async fn rate_limiting_is_absorbed_by_the_backoff_loop() {
    let client = client(
        vec![
            Err(TransportError::RateLimited {
                retry_after: Some(Duration::from_millis(10)),
            }),
            Ok(json!({"ok": true})),
        ],
        fast_config(),
    );

    let value = client.fetch(&query(0)).await.unwrap();
    assert_eq!(value, json!({"ok": true}));
    assert_eq!(client_calls(&client), 2);
}

#[tokio::test]
async fn a_retry_after_hint_is_capped_at_max_pause() {
    // A 60 s hint against a 50 ms cap: the fetch must not actually wait.
    let started = std::time::Instant::now();
    let client = client(
        vec![
            Err(TransportError::RateLimited {
                retry_after: Some(Duration::from_secs(60)),
            }),
            Ok(json!({"ok": true})),
        ],
        fast_config(),
    );

    client.fetch(&query(0)).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn exhausting_the_retry_bound_surfaces_an_upstream_error() {
    let client = client(
        vec![
            Err(TransportError::Http { status: 500 }),
            Err(TransportError::Http { status: 502 }),
            Err(TransportError::Http { status: 503 }),
        ],
        fast_config(),
    );

    let error = client.fetch(&query(0)).await.unwrap_err();
    assert!(matches!(error, EngineError::Upstream(_)));
    assert_eq!(client_calls(&client), 3);
}

#[tokio::test]
async fn a_final_timeout_surfaces_as_timeout() {
    let client = client(
        vec![
            Err(TransportError::Http { status: 500 }),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
        ],
        fast_config(),
    );

    let error = client.fetch(&query(0)).await.unwrap_err();
    assert!(matches!(error, EngineError::Timeout(_)));
}

#[tokio::test(start_paused = true)]
async fn requests_respect_the_minimum_interval() {
    let config = UpstreamConfig {
        min_interval_secs: 65,
        max_retries: 1,
        jitter_factor: 0.0,
        ..UpstreamConfig::default()
    };
    let client = client(vec![Ok(json!({"a": 1})), Ok(json!({"b": 2}))], config);

    let started = tokio::time::Instant::now();
    client.fetch(&query(0)).await.unwrap();
    client.fetch(&query(1000)).await.unwrap();
    // The second (uncached) request waits out the 65 s interval measured from
    // the end of the first.
    assert!(started.elapsed() >= Duration::from_secs(65));
}

#[tokio::test(start_paused = true)]
async fn the_overall_deadline_stops_retrying_early() {
    let config = UpstreamConfig {
        min_interval_secs: 0,
        max_retries: 5,
        base_pause_secs: 10.0,
        max_pause_secs: 10.0,
        jitter_factor: 0.0,
        overall_deadline_secs: 15,
        ..UpstreamConfig::default()
    };
    let client = client(
        vec![
            Err(TransportError::Http { status: 500 }),
            Err(TransportError::Http { status: 500 }),
            Err(TransportError::Http { status: 500 }),
            Err(TransportError::Http { status: 500 }),
            Err(TransportError::Http { status: 500 }),
        ],
        config,
    );

    let error = client.fetch(&query(0)).await.unwrap_err();
    assert!(matches!(error, EngineError::Upstream(_)));
    // Attempt 1 fails, one 10 s pause fits the 15 s deadline, attempt 2
    // fails, the next pause would cross it: no third attempt.
    assert_eq!(client_calls(&client), 2);
}

#[test]
fn base_backoff_is_non_decreasing_and_capped() {
    let base = Duration::from_millis(600);
    let max = Duration::from_secs(5);
    let pauses: Vec<_> = (1..=5).map(|a| backoff_pause(base, max, a)).collect();
    for pair in pauses.windows(2) {
        assert!(pair[0] <= pair[1]);
    }
    assert!(pauses.iter().all(|p| *p <= max));
    assert_eq!(pauses[4], max);
}

#[tokio::test]
async fn fetch_series_pages_until_a_short_page() {
    let page = |rows: Vec<Value>| json!({"result": {"data": rows}});
    let row = |day: &str, units: f64| {
        json!({
            "dimensions": [{"id": day}, {"id": "42"}],
            "metrics": [units, units * 10.0],
        })
    };

    // First page exactly at the limit (1000 rows), second page short.
    let mut first_rows = Vec::new();
    for i in 0..1000 {
        // Distinct synthetic days keep the facts from collapsing.
        let day = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap() + chrono::Duration::days(i % 365);
        first_rows.push(row(&day.to_string(), 1.0));
    }
    let second_rows = vec![row("2024-05-30", 3.0)];

    let client = client(
        vec![Ok(page(first_rows)), Ok(page(second_rows))],
        fast_config(),
    );

    let series = client
        .fetch_series(&[42], 60, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
        .await
        .unwrap();
    assert_eq!(client_calls(&client), 2);
    let facts = &series[&42];
    assert!(facts.windows(2).all(|w| w[0].date <= w[1].date));
    assert!(facts.iter().any(|f| f.date.to_string() == "2024-05-30"));
}

fn client_calls(client: &AnalyticsClient<ScriptedTransport>) -> usize {
    client.transport().calls()
}
