//! Demand estimation for shipment planning: three interchangeable
//! methodologies over a SKU's historical series, plus the capability seam
//! (`DemandProfileSource`) that lets the shipment calculator degrade to zero
//! demand when no profile data is available.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::DemandConfig;
use crate::errors::EngineResult;
use crate::models::{DemandMethod, DemandProfile, SalesSeries, Sku, WarehouseId};
use crate::prefs::JsonPrefs;
use crate::store::SalesFactsStore;

const DEMAND_PREFS_FILE: &str = "demand_prefs.json";

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DemandPrefs {
    method: DemandMethod,
    period_days: u32,
}

/// Estimates expected daily demand per SKU per destination.
///
/// Each methodology is a pure function of the historical series; the
/// persisted method/period preference mirrors the forecast method store and
/// switching it never recomputes anything retroactively.
#[derive(Debug)]
pub struct DemandEstimator {
    config: DemandConfig,
    prefs: JsonPrefs<DemandPrefs>,
}

impl DemandEstimator {
    pub fn new(data_dir: &Path, config: DemandConfig) -> EngineResult<Self> {
        let prefs = JsonPrefs::load_or(
            data_dir.join(DEMAND_PREFS_FILE),
            DemandPrefs {
                method: config.default_method,
                period_days: config.lookback_days,
            },
        )?;
        Ok(Self { config, prefs })
    }

    pub fn active_method(&self) -> DemandMethod {
        self.prefs.get().method
    }

    pub fn lookback_days(&self) -> u32 {
        self.prefs.get().period_days.max(1)
    }

    /// Selects and persists the methodology and lookback period.
    pub fn set_method(&self, method: DemandMethod, period_days: u32) -> EngineResult<()> {
        self.prefs.set(DemandPrefs {
            method,
            period_days: period_days.max(1),
        })
    }

    /// Estimates the demand profile with the persisted active method.
    pub fn estimate_active(
        &self,
        sku: Sku,
        destination: WarehouseId,
        series: &SalesSeries,
    ) -> DemandProfile {
        self.estimate(sku, destination, series, self.active_method())
    }

    /// Estimates the daily demand profile for one SKU at one destination.
    #[instrument(skip(self, series), fields(len = series.len()))]
    pub fn estimate(
        &self,
        sku: Sku,
        destination: WarehouseId,
        series: &SalesSeries,
        method: DemandMethod,
    ) -> DemandProfile {
        let lookback = self.lookback_days();
        let profile = match method {
            DemandMethod::Average => average_profile(series, lookback),
            DemandMethod::Dynamics => dynamics_profile(series, lookback),
            DemandMethod::Hybrid => {
                let average = average_profile(series, lookback);
                let dynamics = dynamics_profile(series, lookback);
                let weight = self.hybrid_weight(series);
                blend(&dynamics, &average, weight)
            }
        };
        debug!(sku, destination, %method, rate = profile.daily_mean(), "demand estimated");
        profile
    }

    /// Blend weight toward the dynamics profile: grows linearly with the
    /// number of full observed weeks and saturates at
    /// `hybrid_saturation_weeks`.
    fn hybrid_weight(&self, series: &SalesSeries) -> f64 {
        let weeks = full_weeks_observed(series);
        (weeks as f64 / f64::from(self.config.hybrid_saturation_weeks.max(1))).min(1.0)
    }
}

/// Uniform profile: total units over the lookback window divided by the
/// window length. Days without sales count as zero-demand days.
fn average_profile(series: &SalesSeries, lookback_days: u32) -> DemandProfile {
    let Some(last) = series.iter().map(|f| f.date).max() else {
        return DemandProfile::zero();
    };
    let start = last - Duration::days(i64::from(lookback_days.max(1)) - 1);
    let total: f64 = series
        .iter()
        .filter(|f| f.date >= start)
        .map(|f| f.units)
        .sum();
    DemandProfile::flat(total / f64::from(lookback_days.max(1)))
}

/// Day-of-week-aware profile: each weekday bucket averages the units sold on
/// that weekday over the number of times it occurs in the lookback window.
fn dynamics_profile(series: &SalesSeries, lookback_days: u32) -> DemandProfile {
    let Some(last) = series.iter().map(|f| f.date).max() else {
        return DemandProfile::zero();
    };
    let start = last - Duration::days(i64::from(lookback_days.max(1)) - 1);

    let mut sums = [0.0f64; 7];
    for fact in series {
        if fact.date < start {
            continue;
        }
        sums[fact.date.weekday().num_days_from_monday() as usize] += fact.units;
    }

    let mut per_weekday = [0.0f64; 7];
    for (slot, sum) in sums.iter().enumerate() {
        let occurrences = weekday_occurrences(start, last, WEEKDAYS[slot]);
        if occurrences > 0 {
            per_weekday[slot] = sum / occurrences as f64;
        }
    }
    DemandProfile { per_weekday }
}

fn blend(dynamics: &DemandProfile, average: &DemandProfile, weight: f64) -> DemandProfile {
    let w = weight.clamp(0.0, 1.0);
    let mut per_weekday = [0.0f64; 7];
    for slot in 0..7 {
        per_weekday[slot] = w * dynamics.per_weekday[slot] + (1.0 - w) * average.per_weekday[slot];
    }
    DemandProfile { per_weekday }
}

/// Number of complete weeks covered by the observed date span.
fn full_weeks_observed(series: &SalesSeries) -> u32 {
    let (Some(first), Some(last)) = (
        series.iter().map(|f| f.date).min(),
        series.iter().map(|f| f.date).max(),
    ) else {
        return 0;
    };
    (((last - first).num_days() + 1) / 7).max(0) as u32
}

/// How many times `weekday` falls inside the inclusive `[start, end]` range.
fn weekday_occurrences(start: NaiveDate, end: NaiveDate, weekday: Weekday) -> u32 {
    if end < start {
        return 0;
    }
    let span = (end - start).num_days() + 1;
    let full_weeks = span / 7;
    let mut count = full_weeks;
    let mut day = start + Duration::days(full_weeks * 7);
    while day <= end {
        if day.weekday() == weekday {
            count += 1;
        }
        day += Duration::days(1);
    }
    count as u32
}

/// Capability seam for per-destination demand profiles. A deployment without
/// destination-level sales data plugs in the null implementation and the
/// shipment calculator degrades to zero demand instead of failing the batch.
#[async_trait]
pub trait DemandProfileSource: Send + Sync {
    async fn profile(&self, sku: Sku, destination: WarehouseId) -> EngineResult<DemandProfile>;
}

/// Null object: always zero demand.
#[derive(Debug, Default, Clone)]
pub struct NullDemandProfileSource;

#[async_trait]
impl DemandProfileSource for NullDemandProfileSource {
    async fn profile(&self, _sku: Sku, _destination: WarehouseId) -> EngineResult<DemandProfile> {
        Ok(DemandProfile::zero())
    }
}

/// Profile source backed by the SKU-level facts store. Destination-level
/// granularity is not available in the store, so every destination of a SKU
/// sees the same SKU-level profile; demand shares then degenerate to an even
/// split, which is the conservative choice.
pub struct StoreDemandProfileSource {
    store: Arc<SalesFactsStore>,
    estimator: Arc<DemandEstimator>,
    today: fn() -> NaiveDate,
}

impl StoreDemandProfileSource {
    pub fn new(store: Arc<SalesFactsStore>, estimator: Arc<DemandEstimator>) -> Self {
        Self {
            store,
            estimator,
            today: default_today,
        }
    }
}

fn default_today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

#[async_trait]
impl DemandProfileSource for StoreDemandProfileSource {
    async fn profile(&self, sku: Sku, destination: WarehouseId) -> EngineResult<DemandProfile> {
        let end = (self.today)() - Duration::days(1);
        let start = end - Duration::days(i64::from(self.estimator.lookback_days()) - 1);
        let series = self.store.read(sku, start, end).await?;
        Ok(self.estimator.estimate_active(sku, destination, &series))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SalesFact;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn estimator(config: DemandConfig) -> (TempDir, DemandEstimator) {
        let dir = tempfile::tempdir().unwrap();
        let est = DemandEstimator::new(dir.path(), config).unwrap();
        (dir, est)
    }

    #[test]
    fn average_divides_by_the_window_not_observed_days() {
        // 70 units over a 14-day window: 5/day even though only 2 days sold.
        let series = vec![
            SalesFact::new(1, date(2024, 5, 1), 30.0, 0.0),
            SalesFact::new(1, date(2024, 5, 10), 40.0, 0.0),
        ];
        let profile = average_profile(&series, 14);
        assert_eq!(profile.daily_mean(), 5.0);
        assert_eq!(profile.per_weekday[0], 5.0);
    }

    #[test]
    fn dynamics_buckets_by_weekday() {
        // Two Mondays at 10 and 20 units inside a two-week window ending
        // Sunday 2024-05-19; all other days silent.
        let series = vec![
            SalesFact::new(1, date(2024, 5, 6), 10.0, 0.0),  // Monday
            SalesFact::new(1, date(2024, 5, 13), 20.0, 0.0), // Monday
            SalesFact::new(1, date(2024, 5, 19), 7.0, 0.0),  // Sunday
        ];
        let profile = dynamics_profile(&series, 14);
        assert_eq!(profile.per_weekday[0], 15.0); // Mondays average
        assert_eq!(profile.per_weekday[6], 3.5); // one sold Sunday of two
        assert_eq!(profile.per_weekday[2], 0.0);
    }

    #[test]
    fn hybrid_leans_on_average_when_history_is_sparse() {
        let config = DemandConfig {
            hybrid_saturation_weeks: 8,
            ..DemandConfig::default()
        };
        let (_dir, est) = estimator(config);

        // Three days of history: zero full weeks, so hybrid == average.
        let sparse = vec![
            SalesFact::new(1, date(2024, 5, 6), 10.0, 0.0),
            SalesFact::new(1, date(2024, 5, 7), 10.0, 0.0),
            SalesFact::new(1, date(2024, 5, 8), 10.0, 0.0),
        ];
        let hybrid = est.estimate(1, 7, &sparse, DemandMethod::Hybrid);
        let average = est.estimate(1, 7, &sparse, DemandMethod::Average);
        assert_eq!(hybrid, average);
    }

    #[test]
    fn hybrid_reaches_dynamics_at_saturation() {
        let config = DemandConfig {
            hybrid_saturation_weeks: 2,
            ..DemandConfig::default()
        };
        let (_dir, est) = estimator(config);

        // 14 consecutive days → two full weeks → weight 1.0.
        let mut series = Vec::new();
        for offset in 0..14 {
            series.push(SalesFact::new(
                1,
                date(2024, 5, 6) + Duration::days(offset),
                if offset % 7 == 0 { 14.0 } else { 0.0 },
                0.0,
            ));
        }
        let hybrid = est.estimate(1, 7, &series, DemandMethod::Hybrid);
        let dynamics = est.estimate(1, 7, &series, DemandMethod::Dynamics);
        assert_eq!(hybrid, dynamics);
    }

    #[test]
    fn weekday_occurrence_counting() {
        // 2024-05-06 (Mon) through 2024-05-19 (Sun): every weekday twice.
        for weekday in WEEKDAYS {
            assert_eq!(
                weekday_occurrences(date(2024, 5, 6), date(2024, 5, 19), weekday),
                2
            );
        }
        // Mon..Wed window contains one Monday, no Sunday.
        assert_eq!(
            weekday_occurrences(date(2024, 5, 6), date(2024, 5, 8), Weekday::Mon),
            1
        );
        assert_eq!(
            weekday_occurrences(date(2024, 5, 6), date(2024, 5, 8), Weekday::Sun),
            0
        );
    }

    #[tokio::test]
    async fn null_source_returns_zero_profiles() {
        let source = NullDemandProfileSource;
        let profile = source.profile(1, 77).await.unwrap();
        assert!(profile.is_zero());
    }

    #[test]
    fn method_prefs_persist_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let est = DemandEstimator::new(dir.path(), DemandConfig::default()).unwrap();
        assert_eq!(est.active_method(), DemandMethod::Hybrid);
        est.set_method(DemandMethod::Dynamics, 90).unwrap();

        let reopened = DemandEstimator::new(dir.path(), DemandConfig::default()).unwrap();
        assert_eq!(reopened.active_method(), DemandMethod::Dynamics);
        assert_eq!(reopened.lookback_days(), 90);
    }
}
