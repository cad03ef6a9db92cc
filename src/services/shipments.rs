//! Shipment need calculator: plan-first recommendations per warehouse with
//! cluster and SKU rollups, driven by a demand profile source and the
//! configured traffic-light thresholds.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::config::{ShipmentConfig, WatchList};
use crate::errors::{EngineError, EngineResult};
use crate::models::{
    ClusterId, DestinationKind, DestinationStock, ShipmentAction, ShipmentRecommendation, Sku,
    StockStatus, WarehouseId,
};
use crate::services::demand::DemandProfileSource;

const PLAN_HORIZON_DAYS: f64 = 30.0;

/// Rounds to the nearest multiple of `step`; ties round up, away from zero
/// need, biasing toward avoiding stockouts over avoiding overstock.
/// Non-positive values round to zero; a zero step is treated as one.
pub fn round_to_step(value: f64, step: u32) -> i64 {
    let step = step.max(1) as f64;
    if value <= 0.0 {
        return 0;
    }
    let multiples = (value / step + 0.5).floor();
    (multiples * step) as i64
}

/// Traffic-light classification for shipments; same shape as the purchase
/// classifier, with shipment-specific thresholds. Both band edges resolve to
/// `Enough`.
pub fn classify_shipment(need_qty: f64, plan: f64, config: &ShipmentConfig) -> StockStatus {
    if need_qty < plan * (1.0 - config.red_factor) {
        StockStatus::Deficit
    } else if need_qty > plan * (1.0 + config.surplus_factor) {
        StockStatus::Surplus
    } else {
        StockStatus::Enough
    }
}

fn action_for(status: StockStatus) -> ShipmentAction {
    match status {
        StockStatus::Deficit => ShipmentAction::Ship,
        StockStatus::Surplus => ShipmentAction::Clear,
        StockStatus::Enough => ShipmentAction::Maintain,
    }
}

/// Inputs for one SKU in a batch shipment computation.
#[derive(Debug, Clone)]
pub struct ShipmentBatchItem {
    pub sku: Sku,
    pub plan_30d: f64,
    pub stocks: Vec<DestinationStock>,
    pub lead_times: HashMap<WarehouseId, u32>,
}

/// Computes shipment recommendations aggregated over warehouses, clusters and
/// the SKU itself.
pub struct ShipmentNeedService {
    config: ShipmentConfig,
    watch: WatchList,
    demand_source: Arc<dyn DemandProfileSource>,
}

impl ShipmentNeedService {
    pub fn new(
        config: ShipmentConfig,
        watch: WatchList,
        demand_source: Arc<dyn DemandProfileSource>,
    ) -> Self {
        Self {
            config,
            watch,
            demand_source,
        }
    }

    fn light_coefficient(&self, status: StockStatus) -> f64 {
        match status {
            StockStatus::Deficit => self.config.deficit_coef,
            StockStatus::Enough => self.config.enough_coef,
            StockStatus::Surplus => self.config.surplus_coef,
        }
    }

    /// Computes recommendations for one SKU across its destinations.
    ///
    /// The 30-day plan is apportioned to warehouses by demand share; each
    /// warehouse's lead time extends its planning horizon. Cluster rows and
    /// the SKU row sum their constituents' quantities and re-derive status
    /// from the rolled-up need, so quantities are conserved across levels.
    #[instrument(skip(self, stocks, lead_times), fields(destinations = stocks.len()))]
    pub async fn compute_need(
        &self,
        sku: Sku,
        plan_30d: f64,
        stocks: &[DestinationStock],
        lead_times: &HashMap<WarehouseId, u32>,
    ) -> EngineResult<Vec<ShipmentRecommendation>> {
        if plan_30d < 0.0 {
            return Err(EngineError::invalid_argument("negative 30-day plan"));
        }
        if let Some(bad) = stocks.iter().find(|s| s.stock < 0.0) {
            return Err(EngineError::invalid_argument(format!(
                "negative stock at warehouse {}",
                bad.warehouse_id
            )));
        }
        if stocks.is_empty() {
            return Ok(Vec::new());
        }

        let alias = self.watch.alias(sku);
        let rates = self.demand_rates(sku, stocks).await;
        let total_rate: f64 = rates.values().sum();
        if total_rate <= 0.0 {
            warn!(sku, "no destination demand; splitting plan evenly");
        }

        let mut rows = Vec::with_capacity(stocks.len() + 2);
        let mut clusters: BTreeMap<ClusterId, ClusterAccumulator> = BTreeMap::new();
        let mut sku_rollup = RollupAccumulator::default();

        for destination in stocks {
            let share = if total_rate > 0.0 {
                rates
                    .get(&destination.warehouse_id)
                    .copied()
                    .unwrap_or(0.0)
                    / total_rate
            } else {
                1.0 / stocks.len() as f64
            };
            let plan_w = plan_30d * share;
            let lead_days = lead_times
                .get(&destination.warehouse_id)
                .copied()
                .unwrap_or(0);

            // Plan-first card: the lead time stretches the horizon the stock
            // has to cover before a dispatched shipment lands.
            let effective_plan = plan_w * (PLAN_HORIZON_DAYS + f64::from(lead_days)) / PLAN_HORIZON_DAYS;
            let base_need = effective_plan * self.config.safety_coef;
            let need_qty = base_need - destination.stock;
            let status = classify_shipment(need_qty, plan_w, &self.config);
            let upper_need = base_need * self.light_coefficient(status);
            let action = action_for(status);
            let qty = match action {
                ShipmentAction::Ship => {
                    round_to_step(upper_need - destination.stock, self.config.round_step)
                }
                ShipmentAction::Clear => {
                    round_to_step(destination.stock - upper_need, self.config.round_step)
                }
                ShipmentAction::Maintain => 0,
            };

            debug!(
                sku,
                warehouse = destination.warehouse_id,
                plan = plan_w,
                need = need_qty,
                %status,
                qty,
                "warehouse need computed"
            );

            let cluster = clusters
                .entry(destination.cluster_id)
                .or_insert_with(|| ClusterAccumulator::named(destination.cluster_name.clone()));
            cluster.rollup.add(plan_w, destination.stock, need_qty, qty);
            sku_rollup.add(plan_w, destination.stock, need_qty, qty);

            rows.push(ShipmentRecommendation {
                sku,
                alias: alias.clone(),
                title: destination.warehouse_name.clone(),
                destination_kind: DestinationKind::Warehouse,
                plan_30d: plan_w,
                stock: destination.stock,
                need_qty,
                qty,
                status,
                action,
            });
        }

        for (_, cluster) in clusters {
            rows.push(cluster.rollup.into_row(
                sku,
                alias.clone(),
                cluster.name,
                DestinationKind::Cluster,
                &self.config,
            ));
        }
        rows.push(sku_rollup.into_row(
            sku,
            alias.clone(),
            alias.clone(),
            DestinationKind::Sku,
            &self.config,
        ));

        sort_by_urgency(&mut rows);
        Ok(rows)
    }

    /// Batch computation over many SKUs. A failing SKU degrades to a warning
    /// instead of aborting the batch; zero-plan SKUs are skipped.
    pub async fn compute_for_skus(
        &self,
        items: &[ShipmentBatchItem],
    ) -> Vec<ShipmentRecommendation> {
        let mut rows = Vec::new();
        for item in items {
            if item.plan_30d <= 0.0 {
                debug!(sku = item.sku, "skipping shipment row without a plan");
                continue;
            }
            match self
                .compute_need(item.sku, item.plan_30d, &item.stocks, &item.lead_times)
                .await
            {
                Ok(sku_rows) => rows.extend(sku_rows),
                Err(error) => {
                    warn!(sku = item.sku, %error, "skipping shipment rows for sku")
                }
            }
        }
        sort_by_urgency(&mut rows);
        rows
    }

    /// Daily demand rate per warehouse. A failing profile source degrades to
    /// zero demand for that destination so one missing collaborator cannot
    /// abort a whole recommendation batch.
    async fn demand_rates(
        &self,
        sku: Sku,
        stocks: &[DestinationStock],
    ) -> HashMap<WarehouseId, f64> {
        let mut rates = HashMap::with_capacity(stocks.len());
        for destination in stocks {
            let rate = match self
                .demand_source
                .profile(sku, destination.warehouse_id)
                .await
            {
                Ok(profile) => profile.daily_mean(),
                Err(error) => {
                    warn!(
                        sku,
                        warehouse = destination.warehouse_id,
                        %error,
                        "demand profile unavailable; assuming zero demand"
                    );
                    0.0
                }
            };
            rates.insert(destination.warehouse_id, rate.max(0.0));
        }
        rates
    }
}

#[derive(Debug, Default)]
struct RollupAccumulator {
    plan: f64,
    stock: f64,
    need: f64,
    qty: i64,
}

impl RollupAccumulator {
    fn add(&mut self, plan: f64, stock: f64, need: f64, qty: i64) {
        self.plan += plan;
        self.stock += stock;
        self.need += need;
        self.qty += qty;
    }

    fn into_row(
        self,
        sku: Sku,
        alias: String,
        title: String,
        kind: DestinationKind,
        config: &ShipmentConfig,
    ) -> ShipmentRecommendation {
        // Quantities are summed from constituents; only the status is
        // re-derived, from the rolled-up need.
        let status = classify_shipment(self.need, self.plan, config);
        ShipmentRecommendation {
            sku,
            alias,
            title,
            destination_kind: kind,
            plan_30d: self.plan,
            stock: self.stock,
            need_qty: self.need,
            qty: self.qty,
            status,
            action: action_for(status),
        }
    }
}

#[derive(Debug)]
struct ClusterAccumulator {
    name: String,
    rollup: RollupAccumulator,
}

impl ClusterAccumulator {
    fn named(name: String) -> Self {
        Self {
            name,
            rollup: RollupAccumulator::default(),
        }
    }
}

/// Deficits first, then enough, then surplus; ties by descending need
/// magnitude.
fn sort_by_urgency(rows: &mut [ShipmentRecommendation]) {
    rows.sort_by(|a, b| {
        a.status
            .cmp(&b.status)
            .then_with(|| b.need_qty.abs().total_cmp(&a.need_qty.abs()))
    });
}
