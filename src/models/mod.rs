use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Marketplace stock-keeping unit identifier.
pub type Sku = i64;
/// Logistics warehouse identifier.
pub type WarehouseId = i64;
/// Cluster identifier (a group of warehouses treated as one demand pool).
pub type ClusterId = i64;

/// A single (sku, day) sales observation: ordered units and revenue.
///
/// Uniquely keyed by `(sku, date)`; later writes for the same key overwrite
/// earlier ones. Immutable once returned by a store read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesFact {
    pub sku: Sku,
    pub date: NaiveDate,
    pub units: f64,
    pub revenue: f64,
}

impl SalesFact {
    pub fn new(sku: Sku, date: NaiveDate, units: f64, revenue: f64) -> Self {
        Self {
            sku,
            date,
            units,
            revenue,
        }
    }
}

/// Date-ascending sequence of facts for one SKU; derived on read, never stored.
pub type SalesSeries = Vec<SalesFact>;

/// Forecast model selector. Closed set: an unrecognized persisted value fails
/// parsing instead of silently defaulting.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ForecastMethod {
    Ma7,
    Ma14,
    Ma30,
    Ma60,
    Ma90,
    Ma180,
    Ma360,
    Es,
}

impl ForecastMethod {
    /// Moving-average window length in days; `None` for exponential smoothing.
    pub fn window_days(&self) -> Option<usize> {
        match self {
            Self::Ma7 => Some(7),
            Self::Ma14 => Some(14),
            Self::Ma30 => Some(30),
            Self::Ma60 => Some(60),
            Self::Ma90 => Some(90),
            Self::Ma180 => Some(180),
            Self::Ma360 => Some(360),
            Self::Es => None,
        }
    }

    /// Human-readable label for method pickers.
    pub fn title(&self, es_alpha: f64) -> String {
        match self.window_days() {
            Some(days) => format!("Moving average, {} days", days),
            None => format!("Exponential smoothing (alpha {})", es_alpha),
        }
    }
}

/// Forward-looking units/revenue estimate for one SKU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub sku: Sku,
    pub units_forecast: f64,
    pub revenue_forecast: f64,
    pub method: ForecastMethod,
    pub period_days: u32,
}

/// Traffic-light classification driving the recommended action.
///
/// Variant order doubles as urgency order: deficits sort first.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    Deficit,
    Enough,
    Surplus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseAction {
    Buy,
    Sell,
    Maintain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentAction {
    Ship,
    Maintain,
    Clear,
}

/// What a shipment recommendation row refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DestinationKind {
    Sku,
    Cluster,
    Warehouse,
}

/// Purchase recommendation for one SKU, derived from a 30-day forecast plus a
/// current stock snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecommendation {
    pub sku: Sku,
    pub alias: String,
    pub seller_stock: f64,
    pub ozon_stock: f64,
    pub plan_30d: f64,
    pub need_qty: f64,
    pub status: StockStatus,
    pub action: PurchaseAction,
}

/// Shipment recommendation for one SKU at one aggregation level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRecommendation {
    pub sku: Sku,
    pub alias: String,
    pub title: String,
    pub destination_kind: DestinationKind,
    pub plan_30d: f64,
    pub stock: f64,
    pub need_qty: f64,
    pub qty: i64,
    pub status: StockStatus,
    pub action: ShipmentAction,
}

/// Demand-estimation methodology for shipment planning.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DemandMethod {
    Average,
    Dynamics,
    Hybrid,
}

/// Per-weekday daily demand profile, Monday through Sunday.
///
/// The `Average` methodology produces a uniform profile; `Dynamics` a
/// weekday-shaped one; `Hybrid` a blend of the two. Callers that only need a
/// scalar rate use [`DemandProfile::daily_mean`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DemandProfile {
    pub per_weekday: [f64; 7],
}

impl DemandProfile {
    pub fn flat(rate: f64) -> Self {
        Self {
            per_weekday: [rate; 7],
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn daily_mean(&self) -> f64 {
        self.per_weekday.iter().sum::<f64>() / 7.0
    }

    /// Demand rate for a specific calendar day.
    pub fn for_date(&self, date: NaiveDate) -> f64 {
        self.per_weekday[date.weekday().num_days_from_monday() as usize]
    }

    pub fn is_zero(&self) -> bool {
        self.per_weekday.iter().all(|d| *d == 0.0)
    }
}

/// Aggregation window for historical facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactsPeriod {
    Today,
    Yesterday,
    LastDays(u32),
}

/// Summed facts for one SKU over a period.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FactTotals {
    pub units: f64,
    pub revenue: f64,
    pub avg_price: f64,
}

/// Seller-held and marketplace-held stock for one SKU, as supplied by the
/// external stock snapshot provider at call time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub seller_stock: f64,
    pub ozon_stock: f64,
}

/// Current stock at one warehouse, tagged with its cluster, as supplied by the
/// external stock snapshot provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationStock {
    pub warehouse_id: WarehouseId,
    pub warehouse_name: String,
    pub cluster_id: ClusterId,
    pub cluster_name: String,
    pub stock: f64,
}
