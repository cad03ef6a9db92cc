//! Sales forecast engine: moving-average and exponential-smoothing models
//! over historical daily series, plus the persisted active-method selection.

use std::path::Path;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use tracing::{instrument, warn};

use crate::config::ForecastConfig;
use crate::errors::{EngineError, EngineResult};
use crate::models::{ForecastMethod, ForecastResult, SalesSeries, Sku};
use crate::prefs::JsonPrefs;

const METHOD_PREFS_FILE: &str = "forecast_method.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MethodPrefs {
    method: ForecastMethod,
}

/// Produces forward-looking unit/revenue estimates per SKU.
///
/// The model itself is a pure function of `(series, horizon, method)`; the
/// only state here is the persisted method preference, read once per call.
#[derive(Debug)]
pub struct ForecastingService {
    config: ForecastConfig,
    method_prefs: JsonPrefs<MethodPrefs>,
}

impl ForecastingService {
    pub fn new(data_dir: &Path, config: ForecastConfig) -> EngineResult<Self> {
        let method_prefs = JsonPrefs::load_or(
            data_dir.join(METHOD_PREFS_FILE),
            MethodPrefs {
                method: config.default_method,
            },
        )?;
        Ok(Self {
            config,
            method_prefs,
        })
    }

    /// The currently selected forecast method.
    pub fn active_method(&self) -> ForecastMethod {
        self.method_prefs.get().method
    }

    /// Selects and persists a new method. Takes effect on the next forecast
    /// call; in-flight calls keep the method they were invoked with.
    pub fn set_method(&self, method: ForecastMethod) -> EngineResult<()> {
        self.method_prefs.set(MethodPrefs { method })
    }

    /// All selectable methods in menu order with human-readable titles.
    pub fn list_methods(&self) -> Vec<(ForecastMethod, String)> {
        ForecastMethod::iter()
            .map(|m| (m, m.title(self.config.es_alpha)))
            .collect()
    }

    /// Forecasts with the persisted active method.
    pub fn forecast_active(
        &self,
        sku: Sku,
        series: &SalesSeries,
        horizon_days: u32,
    ) -> EngineResult<ForecastResult> {
        self.forecast(sku, series, horizon_days, self.active_method())
    }

    /// Forecasts `horizon_days` ahead with an explicit method.
    ///
    /// An empty series produces a zero forecast (the method is still
    /// reported); a zero horizon is a caller contract violation.
    #[instrument(skip(self, series), fields(len = series.len()))]
    pub fn forecast(
        &self,
        sku: Sku,
        series: &SalesSeries,
        horizon_days: u32,
        method: ForecastMethod,
    ) -> EngineResult<ForecastResult> {
        if horizon_days == 0 {
            return Err(EngineError::invalid_argument(
                "forecast horizon must be positive",
            ));
        }

        let units: Vec<f64> = series.iter().map(|f| f.units).collect();
        let revenue: Vec<f64> = series.iter().map(|f| f.revenue).collect();

        let (daily_units, daily_revenue) = match method.window_days() {
            Some(window) => {
                if !units.is_empty() && units.len() < window {
                    warn!(
                        sku,
                        window,
                        available = units.len(),
                        "short history for moving average; degrading to available days"
                    );
                }
                (
                    moving_average(&units, window),
                    moving_average(&revenue, window),
                )
            }
            None => (
                exponential_smoothing(&units, self.config.es_alpha),
                exponential_smoothing(&revenue, self.config.es_alpha),
            ),
        };

        Ok(ForecastResult {
            sku,
            units_forecast: daily_units * f64::from(horizon_days),
            revenue_forecast: daily_revenue * f64::from(horizon_days),
            method,
            period_days: horizon_days,
        })
    }
}

/// Average of the last `min(window, len)` values; 0 for an empty slice.
fn moving_average(values: &[f64], window: usize) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let w = window.clamp(1, values.len());
    values[values.len() - w..].iter().sum::<f64>() / w as f64
}

/// Simple exponential smoothing seeded with the first observation:
/// `s_0 = x_0; s_t = alpha * x_t + (1 - alpha) * s_{t-1}`. The final level is
/// projected flat over the horizon; no trend extrapolation.
fn exponential_smoothing(values: &[f64], alpha: f64) -> f64 {
    let Some((first, rest)) = values.split_first() else {
        return 0.0;
    };
    rest.iter()
        .fold(*first, |s, x| alpha * x + (1.0 - alpha) * s)
}
