//! Rate-limited client for the external sales-analytics data source.
//!
//! Owns the request throttle (minimum inter-request interval measured from
//! the end of the previous request), the bounded retry/backoff loop, and a
//! small process-lifetime response cache. Rate limiting is absorbed here: the
//! caller only ever sees `Timeout` or `Upstream` once the retry bound or the
//! overall deadline is exhausted.

pub mod cache;

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use metrics::counter;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::UpstreamConfig;
use crate::errors::{EngineError, EngineResult};
use crate::models::{SalesFact, SalesSeries, Sku};
use cache::ResponseCache;

const PAGE_LIMIT: u32 = 1000;
const METRIC_ORDERED_UNITS: &str = "ordered_units";
const METRIC_REVENUE: &str = "revenue";

/// Transport-level failure, before retry policy is applied.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("request timed out")]
    Timeout,
    #[error("http status {status}")]
    Http { status: u16 },
    #[error("network error: {0}")]
    Network(String),
}

/// One analytics request in the upstream wire shape.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsQuery {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub metrics: Vec<String>,
    pub dimension: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<AnalyticsFilter>,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsFilter {
    pub key: String,
    pub value: String,
}

impl AnalyticsQuery {
    /// Daily sales query for a set of SKUs over an inclusive date range.
    pub fn daily_sales(skus: &[Sku], date_from: NaiveDate, date_to: NaiveDate) -> Self {
        let filters = if skus.is_empty() {
            Vec::new()
        } else {
            vec![AnalyticsFilter {
                key: "sku".to_string(),
                value: skus
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            }]
        };
        Self {
            date_from,
            date_to,
            metrics: vec![
                METRIC_ORDERED_UNITS.to_string(),
                METRIC_REVENUE.to_string(),
            ],
            dimension: vec!["day".to_string(), "sku".to_string()],
            filters,
            limit: PAGE_LIMIT,
            offset: 0,
        }
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("query serialization is infallible")
    }
}

/// Raw transport seam, implemented over HTTP in production and scripted in
/// tests.
#[async_trait]
pub trait AnalyticsTransport: Send + Sync {
    async fn post(&self, query: &AnalyticsQuery) -> Result<Value, TransportError>;
}

/// `reqwest`-backed transport against the analytics endpoint.
#[derive(Debug, Clone)]
pub struct HttpAnalyticsTransport {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    api_key: String,
}

impl HttpAnalyticsTransport {
    pub fn new(config: &UpstreamConfig) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EngineError::Config(format!("http client: {}", e)))?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            client_id: config.client_id.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl AnalyticsTransport for HttpAnalyticsTransport {
    async fn post(&self, query: &AnalyticsQuery) -> Result<Value, TransportError> {
        let response = self
            .http
            .post(&self.base_url)
            .header("Client-Id", &self.client_id)
            .header("Api-Key", &self.api_key)
            .json(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<f64>().ok())
                .map(Duration::from_secs_f64);
            return Err(TransportError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))
    }
}

/// Base backoff pause (pre-jitter) for a 1-based attempt number:
/// `min(base * 2^(attempt-1), max)`.
pub fn backoff_pause(base_pause: Duration, max_pause: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(30));
    base_pause.saturating_mul(factor).min(max_pause)
}

#[derive(Debug, Default)]
struct ThrottleState {
    /// End of the most recent transport call, successful or not. The minimum
    /// interval is measured from here, not from the request start, so clock
    /// drift cannot amplify overlap.
    last_request_end: Option<Instant>,
}

/// Throttled, caching, retrying analytics accessor.
pub struct AnalyticsClient<T> {
    transport: T,
    config: UpstreamConfig,
    cache: Mutex<ResponseCache>,
    throttle: tokio::sync::Mutex<ThrottleState>,
}

impl<T: AnalyticsTransport> AnalyticsClient<T> {
    pub fn new(transport: T, config: UpstreamConfig) -> Self {
        let cache = Mutex::new(ResponseCache::new(config.cache_capacity));
        Self {
            transport,
            config,
            cache,
            throttle: tokio::sync::Mutex::new(ThrottleState::default()),
        }
    }

    /// Fetches one analytics response, serving from cache when the normalized
    /// query was already answered this process lifetime.
    #[instrument(skip(self, query), fields(offset = query.offset))]
    pub async fn fetch(&self, query: &AnalyticsQuery) -> EngineResult<Value> {
        let body = query.to_value();
        let key = ResponseCache::key_for(&body);

        if let Some(hit) = self.cache.lock().expect("cache lock").get(&key) {
            counter!("replenish.upstream.cache_hits", 1);
            debug!("analytics cache hit");
            return Ok(hit);
        }
        counter!("replenish.upstream.cache_misses", 1);

        // One fetch at a time: the throttle interval is bookkept across the
        // whole retry loop.
        let mut throttle = self.throttle.lock().await;
        let deadline = Instant::now() + Duration::from_secs(self.config.overall_deadline_secs);
        let min_interval = Duration::from_secs(self.config.min_interval_secs);
        let base_pause = Duration::from_secs_f64(self.config.base_pause_secs);
        let max_pause = Duration::from_secs_f64(self.config.max_pause_secs);

        let mut last_error: Option<TransportError> = None;
        for attempt in 1..=self.config.max_retries {
            if let Some(previous_end) = throttle.last_request_end {
                let since = previous_end.elapsed();
                if since < min_interval {
                    sleep(min_interval - since).await;
                }
            }

            let result = self.transport.post(query).await;
            throttle.last_request_end = Some(Instant::now());

            let error = match result {
                Ok(value) => {
                    self.cache
                        .lock()
                        .expect("cache lock")
                        .insert(key, value.clone());
                    info!(attempt, "analytics fetch succeeded");
                    return Ok(value);
                }
                Err(error) => error,
            };

            counter!("replenish.upstream.retries", 1);
            let pause = match &error {
                TransportError::RateLimited {
                    retry_after: Some(hint),
                } => (*hint).min(max_pause),
                _ => {
                    let base = backoff_pause(base_pause, max_pause, attempt);
                    base + self.jitter(base)
                }
            };
            warn!(attempt, pause_ms = pause.as_millis() as u64, error = %error, "analytics fetch attempt failed");
            last_error = Some(error);

            if attempt == self.config.max_retries {
                break;
            }
            if Instant::now() + pause >= deadline {
                warn!("analytics fetch deadline exhausted");
                break;
            }
            sleep(pause).await;
        }

        Err(match last_error {
            Some(TransportError::Timeout) => {
                EngineError::Timeout("analytics request timed out".to_string())
            }
            Some(error) => EngineError::Upstream(format!(
                "analytics fetch failed after {} attempts: {}",
                self.config.max_retries, error
            )),
            None => EngineError::Upstream("analytics fetch failed".to_string()),
        })
    }

    /// Pages through daily sales for `skus` over the `days_back` window ending
    /// yesterday, returning a date-sorted series per SKU. This is the
    /// ingestion path that feeds the sales facts store.
    pub async fn fetch_series(
        &self,
        skus: &[Sku],
        days_back: u32,
        today: NaiveDate,
    ) -> EngineResult<std::collections::HashMap<Sku, SalesSeries>> {
        let end = today - ChronoDuration::days(1);
        let start = end - ChronoDuration::days(i64::from(days_back.max(1)) - 1);

        // Duplicate (sku, day) rows across pages are summed, mirroring how
        // the upstream splits one day over several dimension rows.
        let mut matrix: std::collections::HashMap<Sku, std::collections::BTreeMap<NaiveDate, (f64, f64)>> =
            std::collections::HashMap::new();
        let mut query = AnalyticsQuery::daily_sales(skus, start, end);

        loop {
            let page = self.fetch(&query).await?;
            let rows = extract_rows(&page);
            if rows.is_empty() {
                break;
            }
            let row_count = rows.len();

            for row in rows {
                let Some((sku, date, units, revenue)) = parse_row(row) else {
                    continue;
                };
                let day = matrix.entry(sku).or_default().entry(date).or_insert((0.0, 0.0));
                day.0 += units;
                day.1 += revenue;
            }

            if row_count < query.limit as usize {
                break;
            }
            query.offset += query.limit;
        }

        let series = matrix
            .into_iter()
            .map(|(sku, days)| {
                let facts = days
                    .into_iter()
                    .map(|(date, (units, revenue))| SalesFact::new(sku, date, units, revenue))
                    .collect();
                (sku, facts)
            })
            .collect();
        Ok(series)
    }

    /// The underlying transport, for callers that need its identity.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn jitter(&self, base: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return Duration::ZERO;
        }
        let cap = base.as_secs_f64() * self.config.jitter_factor;
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=cap))
    }
}

fn extract_rows(page: &Value) -> Vec<&Value> {
    page.pointer("/result/data")
        .or_else(|| page.get("data"))
        .and_then(Value::as_array)
        .map(|rows| rows.iter().collect())
        .unwrap_or_default()
}

/// Parses one `{dimensions: [...], metrics: [units, revenue]}` row. Dimension
/// ids carry either the date or the SKU; order is not guaranteed upstream.
fn parse_row(row: &Value) -> Option<(Sku, NaiveDate, f64, f64)> {
    let dimensions = row.get("dimensions")?.as_array()?;
    let mut sku = None;
    let mut date = None;
    for dim in dimensions {
        let id = match dim.get("id").or_else(|| dim.get("value")) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => continue,
        };
        if let Ok(parsed) = id.parse::<NaiveDate>() {
            date = Some(parsed);
        } else if let Ok(parsed) = id.parse::<Sku>() {
            sku = Some(parsed);
        }
    }

    let metrics = row.get("metrics")?.as_array()?;
    let units = metrics.first().and_then(Value::as_f64).unwrap_or(0.0);
    let revenue = metrics.get(1).and_then(Value::as_f64).unwrap_or(0.0);
    Some((sku?, date?, units, revenue))
}
