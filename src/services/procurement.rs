//! Purchase need calculator: combines a 30-day forecast with the current
//! stock snapshot into a traffic-light purchase recommendation.

use tracing::instrument;

use crate::config::{PurchaseConfig, WatchList};
use crate::errors::{EngineError, EngineResult};
use crate::models::{
    ForecastResult, PurchaseAction, PurchaseRecommendation, Sku, StockStatus,
};

/// One SKU's inputs for a batch computation.
#[derive(Debug, Clone)]
pub struct PurchaseInput {
    pub sku: Sku,
    pub forecast: ForecastResult,
    pub seller_stock: f64,
    pub ozon_stock: f64,
}

/// Classifies how the needed quantity relates to the plan.
///
/// The operators are a correctness-sensitive contract: both band edges
/// resolve to `Enough`, deficit and surplus only strictly outside them.
pub fn classify_purchase(need_qty: f64, plan_30d: f64, config: &PurchaseConfig) -> StockStatus {
    if need_qty < plan_30d * (1.0 - config.buy_red_factor) {
        StockStatus::Deficit
    } else if need_qty > plan_30d * (1.0 + config.surplus_factor) {
        StockStatus::Surplus
    } else {
        StockStatus::Enough
    }
}

fn action_for(status: StockStatus) -> PurchaseAction {
    match status {
        StockStatus::Deficit => PurchaseAction::Buy,
        StockStatus::Surplus => PurchaseAction::Sell,
        StockStatus::Enough => PurchaseAction::Maintain,
    }
}

/// Computes purchase recommendations. Stateless per call: the status is a
/// pure function of `(need_qty, plan)` and the configured thresholds.
#[derive(Debug, Clone)]
pub struct PurchaseNeedService {
    config: PurchaseConfig,
    watch: WatchList,
}

impl PurchaseNeedService {
    pub fn new(config: PurchaseConfig, watch: WatchList) -> Self {
        Self { config, watch }
    }

    /// Computes the recommendation for one SKU.
    ///
    /// The forecast supplies the 30-day plan; stock counts must be
    /// non-negative (the snapshot provider owns their freshness).
    #[instrument(skip(self, forecast))]
    pub fn compute(
        &self,
        sku: Sku,
        forecast: &ForecastResult,
        seller_stock: f64,
        ozon_stock: f64,
    ) -> EngineResult<PurchaseRecommendation> {
        if seller_stock < 0.0 || ozon_stock < 0.0 {
            return Err(EngineError::invalid_argument(format!(
                "negative stock snapshot for sku {}",
                sku
            )));
        }

        let plan_30d = forecast.units_forecast.max(0.0);
        let need_qty = plan_30d * self.config.buy_coef - (seller_stock + ozon_stock);
        let status = classify_purchase(need_qty, plan_30d, &self.config);

        Ok(PurchaseRecommendation {
            sku,
            alias: self.watch.alias(sku),
            seller_stock,
            ozon_stock,
            plan_30d,
            need_qty,
            status,
            action: action_for(status),
        })
    }

    /// Computes a batch in watch-list order, skipping SKUs with a zero plan.
    ///
    /// A single invalid input fails only its own row, never the batch:
    /// partial results beat no results for multi-SKU requests.
    pub fn compute_batch(&self, inputs: &[PurchaseInput]) -> Vec<PurchaseRecommendation> {
        let mut rows: Vec<PurchaseRecommendation> = inputs
            .iter()
            .filter(|input| input.forecast.units_forecast > 0.0)
            .filter_map(|input| {
                self.compute(
                    input.sku,
                    &input.forecast,
                    input.seller_stock,
                    input.ozon_stock,
                )
                .map_err(|error| {
                    tracing::warn!(sku = input.sku, %error, "skipping purchase row");
                    error
                })
                .ok()
            })
            .collect();
        rows.sort_by_key(|row| self.watch.position(row.sku));
        rows
    }
}
