//! Property-based tests for the replenishment engine core.
//!
//! These use proptest to verify invariants across a wide range of inputs,
//! catching edge cases the scenario tests miss.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use proptest::prelude::*;
use replenish_engine::config::{PurchaseConfig, ShipmentConfig, WatchList};
use replenish_engine::models::{DestinationKind, DestinationStock, SalesFact};
use replenish_engine::services::procurement::classify_purchase;
use replenish_engine::services::shipments::{round_to_step, ShipmentNeedService};
use replenish_engine::services::NullDemandProfileSource;

fn series_strategy() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((0.0f64..500.0, 0.0f64..50_000.0), 0..40)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn purchase_status_is_monotone_in_need(
        plan in 1.0f64..10_000.0,
        red in 0.0f64..6.0,
        surplus in 0.0f64..2.0,
        need_a in -50_000.0f64..50_000.0,
        need_b in -50_000.0f64..50_000.0,
    ) {
        let config = PurchaseConfig {
            buy_coef: 5.0,
            buy_red_factor: red,
            surplus_factor: surplus,
        };
        let (lo, hi) = if need_a <= need_b { (need_a, need_b) } else { (need_b, need_a) };
        let status_lo = classify_purchase(lo, plan, &config);
        let status_hi = classify_purchase(hi, plan, &config);
        // Sweeping need upward can only move DEFICIT → ENOUGH → SURPLUS.
        prop_assert!(status_lo <= status_hi);
    }

    #[test]
    fn rounded_quantities_are_multiples_of_the_step(
        value in -100.0f64..10_000.0,
        step in 1u32..50,
    ) {
        let rounded = round_to_step(value, step);
        prop_assert_eq!(rounded % i64::from(step), 0);
        if value <= 0.0 {
            prop_assert_eq!(rounded, 0);
        } else {
            // Nearest multiple, ties away from zero need.
            let diff = rounded as f64 - value;
            prop_assert!(diff > -(f64::from(step)) / 2.0 - 1e-9);
            prop_assert!(diff <= f64::from(step) / 2.0 + 1e-9);
        }
    }

    #[test]
    fn moving_average_forecast_matches_the_definition(
        points in series_strategy(),
        horizon in 1u32..120,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let svc = replenish_engine::services::ForecastingService::new(
            dir.path(),
            replenish_engine::config::ForecastConfig::default(),
        ).unwrap();

        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let series: Vec<SalesFact> = points
            .iter()
            .enumerate()
            .map(|(i, (units, revenue))| {
                SalesFact::new(7, start + chrono::Duration::days(i as i64), *units, *revenue)
            })
            .collect();

        let result = svc
            .forecast(7, &series, horizon, replenish_engine::models::ForecastMethod::Ma30)
            .unwrap();

        let window = 30usize.min(series.len());
        let expected = if window == 0 {
            0.0
        } else {
            let tail = &points[points.len() - window..];
            tail.iter().map(|(u, _)| u).sum::<f64>() / window as f64 * f64::from(horizon)
        };
        prop_assert!((result.units_forecast - expected).abs() < 1e-6);
    }

    #[test]
    fn smoothed_level_stays_inside_the_observed_range(
        points in prop::collection::vec(0.0f64..1000.0, 1..50),
        horizon in 1u32..60,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let svc = replenish_engine::services::ForecastingService::new(
            dir.path(),
            replenish_engine::config::ForecastConfig::default(),
        ).unwrap();

        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let series: Vec<SalesFact> = points
            .iter()
            .enumerate()
            .map(|(i, units)| {
                SalesFact::new(7, start + chrono::Duration::days(i as i64), *units, 0.0)
            })
            .collect();

        let result = svc
            .forecast(7, &series, horizon, replenish_engine::models::ForecastMethod::Es)
            .unwrap();

        let min = points.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = points.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let level = result.units_forecast / f64::from(horizon);
        prop_assert!(level >= min - 1e-9 && level <= max + 1e-9);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn rollup_quantities_are_conserved(
        plan in 0.0f64..5_000.0,
        stocks in prop::collection::vec((1i64..5, 0.0f64..2_000.0), 1..8),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let destinations: Vec<DestinationStock> = stocks
            .iter()
            .enumerate()
            .map(|(i, (cluster, stock))| DestinationStock {
                warehouse_id: i as i64 + 1,
                warehouse_name: format!("wh-{}", i + 1),
                cluster_id: *cluster,
                cluster_name: format!("cluster-{}", cluster),
                stock: *stock,
            })
            .collect();

        let svc = ShipmentNeedService::new(
            ShipmentConfig::default(),
            WatchList::default(),
            Arc::new(NullDemandProfileSource),
        );

        let rows = runtime
            .block_on(svc.compute_need(42, plan, &destinations, &HashMap::new()))
            .unwrap();

        let qty_of = |kind: DestinationKind| -> i64 {
            rows.iter()
                .filter(|r| r.destination_kind == kind)
                .map(|r| r.qty)
                .sum()
        };
        let sku_qty = qty_of(DestinationKind::Sku);
        prop_assert_eq!(qty_of(DestinationKind::Warehouse), sku_qty);
        prop_assert_eq!(qty_of(DestinationKind::Cluster), sku_qty);

        let need_of = |kind: DestinationKind| -> f64 {
            rows.iter()
                .filter(|r| r.destination_kind == kind)
                .map(|r| r.need_qty)
                .sum()
        };
        prop_assert!((need_of(DestinationKind::Warehouse) - need_of(DestinationKind::Sku)).abs() < 1e-6);
    }
}
