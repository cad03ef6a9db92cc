//! Business capabilities of the replenishment engine, one module per
//! calculator.

pub mod demand;
pub mod forecasting;
pub mod procurement;
pub mod shipments;

pub use demand::{
    DemandEstimator, DemandProfileSource, NullDemandProfileSource, StoreDemandProfileSource,
};
pub use forecasting::ForecastingService;
pub use procurement::{PurchaseInput, PurchaseNeedService};
pub use shipments::{ShipmentBatchItem, ShipmentNeedService};
