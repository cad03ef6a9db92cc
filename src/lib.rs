//! Replenish Engine Library
//!
//! Demand forecasting and replenishment recommendations for a marketplace
//! seller: a persisted sales-fact store, a rate-limited upstream analytics
//! client, selectable forecast models, and purchase/shipment need calculators
//! with traffic-light status classification. The engine exposes plain data;
//! presentation, scheduling and stock snapshots are external collaborators.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod errors;
pub mod models;
pub mod prefs;
pub mod services;
pub mod store;
pub mod upstream;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Local, NaiveDate};
use tracing::instrument;

use config::{AppConfig, WatchList};
use errors::EngineResult;
use models::{
    DestinationStock, FactTotals, FactsPeriod, ForecastResult, PurchaseRecommendation,
    ShipmentRecommendation, Sku, StockSnapshot, WarehouseId,
};
use services::{
    DemandEstimator, DemandProfileSource, ForecastingService, PurchaseInput, PurchaseNeedService,
    ShipmentBatchItem, ShipmentNeedService, StoreDemandProfileSource,
};
use store::SalesFactsStore;
use upstream::{AnalyticsClient, HttpAnalyticsTransport};

pub use config::load_config;
pub use errors::EngineError;

/// Longest history any forecast model consumes (the MA-360 window).
const FORECAST_LOOKBACK_DAYS: i64 = 360;

/// Composition root: the store, the upstream client and the calculators wired
/// from one validated configuration.
pub struct Engine {
    config: AppConfig,
    watch: WatchList,
    store: Arc<SalesFactsStore>,
    analytics: Arc<AnalyticsClient<HttpAnalyticsTransport>>,
    forecasting: Arc<ForecastingService>,
    demand: Arc<DemandEstimator>,
    purchasing: PurchaseNeedService,
    shipments: ShipmentNeedService,
}

impl Engine {
    pub fn from_config(config: AppConfig) -> EngineResult<Self> {
        let watch = config.watch.parsed();
        let store = Arc::new(SalesFactsStore::open(&config.store.data_dir)?);
        let transport = HttpAnalyticsTransport::new(&config.upstream)?;
        let analytics = Arc::new(AnalyticsClient::new(transport, config.upstream.clone()));
        let forecasting = Arc::new(ForecastingService::new(
            &config.store.data_dir,
            config.forecast.clone(),
        )?);
        let demand = Arc::new(DemandEstimator::new(
            &config.store.data_dir,
            config.demand.clone(),
        )?);
        let demand_source: Arc<dyn DemandProfileSource> =
            Arc::new(StoreDemandProfileSource::new(store.clone(), demand.clone()));
        let purchasing = PurchaseNeedService::new(config.purchase.clone(), watch.clone());
        let shipments =
            ShipmentNeedService::new(config.shipment.clone(), watch.clone(), demand_source);

        Ok(Self {
            config,
            watch,
            store,
            analytics,
            forecasting,
            demand,
            purchasing,
            shipments,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn watch(&self) -> &WatchList {
        &self.watch
    }

    pub fn store(&self) -> &SalesFactsStore {
        &self.store
    }

    pub fn analytics(&self) -> &AnalyticsClient<HttpAnalyticsTransport> {
        &self.analytics
    }

    pub fn forecasting(&self) -> &ForecastingService {
        &self.forecasting
    }

    pub fn demand(&self) -> &DemandEstimator {
        &self.demand
    }

    pub fn purchasing(&self) -> &PurchaseNeedService {
        &self.purchasing
    }

    pub fn shipments(&self) -> &ShipmentNeedService {
        &self.shipments
    }

    /// Pulls recent daily sales from the upstream analytics source into the
    /// facts store. Returns how many facts were inserted or changed.
    #[instrument(skip(self))]
    pub async fn ingest_recent(&self, days_back: u32) -> EngineResult<usize> {
        let series = self
            .analytics
            .fetch_series(self.watch.skus(), days_back, today())
            .await?;
        let mut facts = Vec::new();
        for (sku, sku_series) in series {
            if self.watch.contains(sku) {
                facts.extend(sku_series);
            }
        }
        self.store.upsert(&facts).await
    }

    /// Forecast for one SKU with the persisted active method, over the full
    /// history any model can consume.
    pub async fn forecast_sku(&self, sku: Sku, horizon_days: u32) -> EngineResult<ForecastResult> {
        let end = today() - Duration::days(1);
        let start = end - Duration::days(FORECAST_LOOKBACK_DAYS - 1);
        let series = self.store.read(sku, start, end).await?;
        self.forecasting.forecast_active(sku, &series, horizon_days)
    }

    /// Purchase recommendations for the watched SKUs against a stock
    /// snapshot. SKUs absent from the snapshot count as out of stock.
    pub async fn purchase_recommendations(
        &self,
        stock: &HashMap<Sku, StockSnapshot>,
        horizon_days: u32,
    ) -> EngineResult<Vec<PurchaseRecommendation>> {
        let mut inputs = Vec::new();
        for sku in self.target_skus(stock.keys().copied()) {
            let forecast = self.forecast_sku(sku, horizon_days).await?;
            let snapshot = stock.get(&sku).copied().unwrap_or_default();
            inputs.push(PurchaseInput {
                sku,
                forecast,
                seller_stock: snapshot.seller_stock,
                ozon_stock: snapshot.ozon_stock,
            });
        }
        Ok(self.purchasing.compute_batch(&inputs))
    }

    /// Shipment recommendations for the watched SKUs against per-destination
    /// stock levels, rolled up to cluster and SKU level and sorted by
    /// urgency.
    pub async fn shipment_recommendations(
        &self,
        stocks_by_sku: &HashMap<Sku, Vec<DestinationStock>>,
        lead_times: &HashMap<WarehouseId, u32>,
    ) -> EngineResult<Vec<ShipmentRecommendation>> {
        let mut items = Vec::new();
        for sku in self.target_skus(stocks_by_sku.keys().copied()) {
            let Some(stocks) = stocks_by_sku.get(&sku) else {
                continue;
            };
            let forecast = self.forecast_sku(sku, 30).await?;
            items.push(ShipmentBatchItem {
                sku,
                plan_30d: forecast.units_forecast,
                stocks: stocks.clone(),
                lead_times: lead_times.clone(),
            });
        }
        Ok(self.shipments.compute_for_skus(&items).await)
    }

    /// Summed sales facts per watched SKU over a reporting window.
    pub async fn facts_totals(
        &self,
        period: FactsPeriod,
    ) -> EngineResult<HashMap<Sku, FactTotals>> {
        let skus = if self.watch.is_empty() {
            self.store.skus()
        } else {
            self.watch.skus().to_vec()
        };
        self.store.aggregate(&skus, period, today()).await
    }

    /// Watched SKUs, or every SKU seen in the caller-supplied inputs when no
    /// watch list is configured.
    fn target_skus(&self, fallback: impl Iterator<Item = Sku>) -> Vec<Sku> {
        if self.watch.is_empty() {
            let mut skus: Vec<Sku> = fallback.collect();
            skus.sort_unstable();
            skus.dedup();
            skus
        } else {
            self.watch.skus().to_vec()
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}
