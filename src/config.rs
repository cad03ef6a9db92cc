use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationErrors};

use crate::models::{DemandMethod, ForecastMethod, Sku};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_MIN_INTERVAL_SECS: u64 = 65;
const DEFAULT_MAX_RETRIES: u32 = 6;
const DEFAULT_BASE_PAUSE_SECS: f64 = 0.6;
const DEFAULT_MAX_PAUSE_SECS: f64 = 5.0;
const DEFAULT_JITTER_FACTOR: f64 = 0.35;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_OVERALL_DEADLINE_SECS: u64 = 120;
const DEFAULT_CACHE_CAPACITY: usize = 128;
const DEFAULT_ES_ALPHA: f64 = 0.3;
const DEFAULT_DEMAND_LOOKBACK_DAYS: u32 = 180;
const DEFAULT_HYBRID_SATURATION_WEEKS: u32 = 8;
const DEFAULT_BUY_COEF: f64 = 5.0;
const DEFAULT_BUY_RED_FACTOR: f64 = 4.0;
const DEFAULT_BUY_SURPLUS_FACTOR: f64 = 0.5;
const DEFAULT_SHIP_SAFETY_COEF: f64 = 2.0;
const DEFAULT_SHIP_ROUND_STEP: u32 = 2;
const DEFAULT_SHIP_RED_FACTOR: f64 = 1.5;
const DEFAULT_SHIP_SURPLUS_FACTOR: f64 = 0.25;

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

/// Sales facts store configuration.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory holding the persisted facts partition and method preferences.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Upstream analytics client configuration: throttle, retry policy and
/// response-cache sizing.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Analytics endpoint URL.
    #[serde(default)]
    pub base_url: String,

    /// Upstream client identifier header value.
    #[serde(default)]
    pub client_id: String,

    /// Upstream API key header value.
    #[serde(default)]
    pub api_key: String,

    /// Minimum interval between requests, measured from the end of the
    /// previous request (seconds).
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,

    /// Maximum retry attempts before surfacing an upstream error.
    #[serde(default = "default_max_retries")]
    #[validate(range(min = 1, max = 20))]
    pub max_retries: u32,

    /// Base backoff pause (seconds).
    #[serde(default = "default_base_pause_secs")]
    #[validate(range(min = 0.01))]
    pub base_pause_secs: f64,

    /// Backoff pause cap (seconds).
    #[serde(default = "default_max_pause_secs")]
    #[validate(range(min = 0.01))]
    pub max_pause_secs: f64,

    /// Uniform jitter factor applied on top of the base pause.
    #[serde(default = "default_jitter_factor")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter_factor: f64,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Overall deadline for one fetch including retries (seconds).
    #[serde(default = "default_overall_deadline_secs")]
    pub overall_deadline_secs: u64,

    /// Response cache capacity; on overflow the oldest half is evicted.
    #[serde(default = "default_cache_capacity")]
    #[validate(range(min = 2))]
    pub cache_capacity: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            client_id: String::new(),
            api_key: String::new(),
            min_interval_secs: default_min_interval_secs(),
            max_retries: default_max_retries(),
            base_pause_secs: default_base_pause_secs(),
            max_pause_secs: default_max_pause_secs(),
            jitter_factor: default_jitter_factor(),
            request_timeout_secs: default_request_timeout_secs(),
            overall_deadline_secs: default_overall_deadline_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// Forecast engine configuration.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ForecastConfig {
    /// Method used when no persisted preference exists yet.
    #[serde(default = "default_forecast_method")]
    pub default_method: ForecastMethod,

    /// Exponential smoothing factor, strictly inside (0, 1).
    #[serde(default = "default_es_alpha")]
    #[validate(range(min = 0.0001, max = 0.9999))]
    pub es_alpha: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            default_method: default_forecast_method(),
            es_alpha: default_es_alpha(),
        }
    }
}

/// Demand estimator configuration.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DemandConfig {
    /// Methodology used when no persisted preference exists yet.
    #[serde(default = "default_demand_method")]
    pub default_method: DemandMethod,

    /// Lookback window for demand estimation (days).
    #[serde(default = "default_demand_lookback_days")]
    #[validate(range(min = 1))]
    pub lookback_days: u32,

    /// Number of full observed weeks at which the hybrid blend weighs
    /// dynamics at 100%.
    #[serde(default = "default_hybrid_saturation_weeks")]
    #[validate(range(min = 1))]
    pub hybrid_saturation_weeks: u32,
}

impl Default for DemandConfig {
    fn default() -> Self {
        Self {
            default_method: default_demand_method(),
            lookback_days: default_demand_lookback_days(),
            hybrid_saturation_weeks: default_hybrid_saturation_weeks(),
        }
    }
}

/// Purchase need calculator thresholds.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PurchaseConfig {
    /// Buyout coefficient applied to the 30-day plan.
    #[serde(default = "default_buy_coef")]
    #[validate(range(min = 0.01))]
    pub buy_coef: f64,

    /// Deficit threshold factor: DEFICIT below `plan * (1 - buy_red_factor)`.
    #[serde(default = "default_buy_red_factor")]
    #[validate(range(min = 0.0))]
    pub buy_red_factor: f64,

    /// Surplus threshold factor: SURPLUS above `plan * (1 + surplus_factor)`.
    #[serde(default = "default_buy_surplus_factor")]
    #[validate(range(min = 0.0))]
    pub surplus_factor: f64,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            buy_coef: default_buy_coef(),
            buy_red_factor: default_buy_red_factor(),
            surplus_factor: default_buy_surplus_factor(),
        }
    }
}

/// Shipment need calculator thresholds and rounding.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ShipmentConfig {
    /// Safety coefficient applied to the destination plan.
    #[serde(default = "default_ship_safety_coef")]
    #[validate(range(min = 0.01))]
    pub safety_coef: f64,

    /// Recommended quantities are rounded to multiples of this step.
    #[serde(default = "default_ship_round_step")]
    pub round_step: u32,

    /// Deficit threshold factor for shipment classification.
    #[serde(default = "default_ship_red_factor")]
    #[validate(range(min = 0.0))]
    pub red_factor: f64,

    /// Surplus threshold factor for shipment classification.
    #[serde(default = "default_ship_surplus_factor")]
    #[validate(range(min = 0.0))]
    pub surplus_factor: f64,

    /// Traffic-light coefficient applied to the base need per status.
    #[serde(default = "default_light_coef")]
    #[validate(range(min = 0.01))]
    pub deficit_coef: f64,
    #[serde(default = "default_light_coef")]
    #[validate(range(min = 0.01))]
    pub enough_coef: f64,
    #[serde(default = "default_light_coef")]
    #[validate(range(min = 0.01))]
    pub surplus_coef: f64,
}

impl Default for ShipmentConfig {
    fn default() -> Self {
        Self {
            safety_coef: default_ship_safety_coef(),
            round_step: default_ship_round_step(),
            red_factor: default_ship_red_factor(),
            surplus_factor: default_ship_surplus_factor(),
            deficit_coef: default_light_coef(),
            enough_coef: default_light_coef(),
            surplus_coef: default_light_coef(),
        }
    }
}

/// Watched SKU list in the `sku[:alias],...` wire format.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    /// Comma- or newline-separated `sku` or `sku:alias` tokens.
    #[serde(default)]
    pub skus: String,
}

impl WatchConfig {
    pub fn parsed(&self) -> WatchList {
        WatchList::parse(&self.skus)
    }
}

/// Ordered watch list with optional aliases, parsed from [`WatchConfig`].
///
/// Order is the order of first mention; duplicates are dropped. A SKU without
/// an alias falls back to its numeric form when rendered.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WatchList {
    order: Vec<Sku>,
    aliases: HashMap<Sku, String>,
}

impl WatchList {
    pub fn parse(raw: &str) -> Self {
        let mut order = Vec::new();
        let mut aliases = HashMap::new();
        for token in raw.replace('\n', ",").split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let (left, alias) = match token.split_once(':') {
                Some((l, a)) => (l.trim(), Some(a.trim())),
                None => (token, None),
            };
            let Ok(sku) = left.parse::<Sku>() else {
                continue;
            };
            if !order.contains(&sku) {
                order.push(sku);
            }
            if let Some(alias) = alias.filter(|a| !a.is_empty()) {
                aliases.entry(sku).or_insert_with(|| alias.to_string());
            }
        }
        Self { order, aliases }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn skus(&self) -> &[Sku] {
        &self.order
    }

    /// Whether the SKU is observed; an empty watch list observes everything.
    pub fn contains(&self, sku: Sku) -> bool {
        self.order.is_empty() || self.order.contains(&sku)
    }

    /// Position in the watch order, used for stable report ordering.
    pub fn position(&self, sku: Sku) -> usize {
        self.order
            .iter()
            .position(|s| *s == sku)
            .unwrap_or(usize::MAX)
    }

    pub fn alias(&self, sku: Sku) -> String {
        self.aliases
            .get(&sku)
            .cloned()
            .unwrap_or_else(|| sku.to_string())
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    #[validate]
    pub store: StoreConfig,

    #[serde(default)]
    #[validate]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    #[validate]
    pub forecast: ForecastConfig,

    #[serde(default)]
    #[validate]
    pub demand: DemandConfig,

    #[serde(default)]
    #[validate]
    pub purchase: PurchaseConfig,

    #[serde(default)]
    #[validate]
    pub shipment: ShipmentConfig,

    #[serde(default)]
    #[validate]
    pub watch: WatchConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            store: StoreConfig::default(),
            upstream: UpstreamConfig::default(),
            forecast: ForecastConfig::default(),
            demand: DemandConfig::default(),
            purchase: PurchaseConfig::default(),
            shipment: ShipmentConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}
fn default_min_interval_secs() -> u64 {
    DEFAULT_MIN_INTERVAL_SECS
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_base_pause_secs() -> f64 {
    DEFAULT_BASE_PAUSE_SECS
}
fn default_max_pause_secs() -> f64 {
    DEFAULT_MAX_PAUSE_SECS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}
fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_overall_deadline_secs() -> u64 {
    DEFAULT_OVERALL_DEADLINE_SECS
}
fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}
fn default_forecast_method() -> ForecastMethod {
    ForecastMethod::Ma30
}
fn default_es_alpha() -> f64 {
    DEFAULT_ES_ALPHA
}
fn default_demand_method() -> DemandMethod {
    DemandMethod::Hybrid
}
fn default_demand_lookback_days() -> u32 {
    DEFAULT_DEMAND_LOOKBACK_DAYS
}
fn default_hybrid_saturation_weeks() -> u32 {
    DEFAULT_HYBRID_SATURATION_WEEKS
}
fn default_buy_coef() -> f64 {
    DEFAULT_BUY_COEF
}
fn default_buy_red_factor() -> f64 {
    DEFAULT_BUY_RED_FACTOR
}
fn default_buy_surplus_factor() -> f64 {
    DEFAULT_BUY_SURPLUS_FACTOR
}
fn default_ship_safety_coef() -> f64 {
    DEFAULT_SHIP_SAFETY_COEF
}
fn default_ship_round_step() -> u32 {
    DEFAULT_SHIP_ROUND_STEP
}
fn default_ship_red_factor() -> f64 {
    DEFAULT_SHIP_RED_FACTOR
}
fn default_ship_surplus_factor() -> f64 {
    DEFAULT_SHIP_SURPLUS_FACTOR
}
fn default_light_coef() -> f64 {
    1.0
}

/// Loads configuration from `config/{default,<env>}.toml` overlaid with
/// `REPLENISH__`-prefixed environment variables, then validates it.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    let config = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("REPLENISH").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        e
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

/// Initializes the tracing subscriber from the configured level, honoring a
/// non-empty `RUST_LOG` override. Call once at startup.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("replenish_engine={}", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let registry = tracing_subscriber::registry().with(EnvFilter::new(filter_directive));
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
