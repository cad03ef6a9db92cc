//! Partitioned, persisted store of historical daily sales facts.
//!
//! Partition key is the SKU; within a partition facts are kept in a
//! `BTreeMap` by date so reads come out date-sorted regardless of insertion
//! order. The whole partition set is persisted as one JSON document written
//! atomically (temp file + rename), so a concurrent reader sees either the
//! pre- or post-upsert state of a key, never a torn file.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::errors::{EngineError, EngineResult};
use crate::models::{FactTotals, FactsPeriod, SalesFact, SalesSeries, Sku};

const FACTS_FILE: &str = "facts.json";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct DayFact {
    units: f64,
    revenue: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedFact {
    date: NaiveDate,
    units: f64,
    revenue: f64,
}

/// Source of truth for all forecasting. Facts have no automatic expiry; they
/// persist until overwritten by a later ingestion.
#[derive(Debug)]
pub struct SalesFactsStore {
    path: PathBuf,
    partitions: DashMap<Sku, BTreeMap<NaiveDate, DayFact>>,
}

impl SalesFactsStore {
    /// Opens the store in `data_dir`, restoring any persisted partition.
    ///
    /// A missing facts file is an empty store; a corrupt one fails loudly with
    /// a serialization error rather than silently starting fresh.
    pub fn open(data_dir: &Path) -> EngineResult<Self> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(FACTS_FILE);
        let partitions = DashMap::new();

        if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if !raw.trim().is_empty() {
                let persisted: BTreeMap<Sku, Vec<PersistedFact>> = serde_json::from_str(&raw)?;
                for (sku, rows) in persisted {
                    let mut partition = BTreeMap::new();
                    for row in rows {
                        partition.insert(
                            row.date,
                            DayFact {
                                units: row.units,
                                revenue: row.revenue,
                            },
                        );
                    }
                    partitions.insert(sku, partition);
                }
            }
        }

        info!(
            path = %path.display(),
            partitions = partitions.len(),
            "sales facts store opened"
        );
        Ok(Self { path, partitions })
    }

    /// Upserts a batch of facts, returning how many entries were inserted or
    /// changed. Re-upserting an identical fact is a no-op and does not touch
    /// the disk.
    #[instrument(skip(self, facts), fields(batch = facts.len()))]
    pub async fn upsert(&self, facts: &[SalesFact]) -> EngineResult<usize> {
        for fact in facts {
            validate_fact(fact)?;
        }

        let mut written = 0usize;
        for fact in facts {
            let day = DayFact {
                units: fact.units,
                revenue: fact.revenue,
            };
            let mut partition = self.partitions.entry(fact.sku).or_default();
            match partition.insert(fact.date, day) {
                Some(previous) if previous == day => {}
                _ => written += 1,
            }
        }

        if written > 0 {
            self.persist()?;
            debug!(written, "sales facts upserted");
        }
        Ok(written)
    }

    /// Reads the date-ascending series for one SKU inside an inclusive window.
    pub async fn read(
        &self,
        sku: Sku,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> EngineResult<SalesSeries> {
        let Some(partition) = self.partitions.get(&sku) else {
            return Ok(Vec::new());
        };
        Ok(partition
            .range(date_from..=date_to)
            .map(|(date, day)| SalesFact::new(sku, *date, day.units, day.revenue))
            .collect())
    }

    /// Reads series for many SKUs at once.
    pub async fn read_many(
        &self,
        skus: &[Sku],
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> EngineResult<HashMap<Sku, SalesSeries>> {
        let mut out = HashMap::with_capacity(skus.len());
        for &sku in skus {
            out.insert(sku, self.read(sku, date_from, date_to).await?);
        }
        Ok(out)
    }

    /// Sums facts per SKU over a reporting window.
    ///
    /// Windows anchor on the latest date present in the data rather than the
    /// wall clock, so a store that is a day behind still produces a sensible
    /// "today" report. `Yesterday` falls back to the latest available date at
    /// or before yesterday. SKUs with nothing sold in the window are omitted.
    pub async fn aggregate(
        &self,
        skus: &[Sku],
        period: FactsPeriod,
        today: NaiveDate,
    ) -> EngineResult<HashMap<Sku, FactTotals>> {
        let mut all_dates: Vec<NaiveDate> = Vec::new();
        for &sku in skus {
            if let Some(partition) = self.partitions.get(&sku) {
                all_dates.extend(partition.keys().copied());
            }
        }
        let Some(&last_available) = all_dates.iter().max() else {
            return Ok(HashMap::new());
        };

        let (start, end) = match period {
            FactsPeriod::Today => (last_available, last_available),
            FactsPeriod::Yesterday => {
                let yesterday = today - Duration::days(1);
                let anchor = all_dates
                    .iter()
                    .copied()
                    .filter(|d| *d <= yesterday)
                    .max()
                    .unwrap_or(last_available);
                (anchor, anchor)
            }
            FactsPeriod::LastDays(days) => {
                let days = days.max(1) as i64;
                (last_available - Duration::days(days - 1), last_available)
            }
        };

        let mut totals = HashMap::new();
        for &sku in skus {
            let series = self.read(sku, start, end).await?;
            let units: f64 = series.iter().map(|f| f.units).sum();
            let revenue: f64 = series.iter().map(|f| f.revenue).sum();
            if units > 0.0 || revenue > 0.0 {
                let avg_price = if units > 0.0 { revenue / units } else { 0.0 };
                totals.insert(
                    sku,
                    FactTotals {
                        units,
                        revenue,
                        avg_price,
                    },
                );
            }
        }
        Ok(totals)
    }

    /// Number of SKU partitions currently held.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// SKUs with at least one stored fact, in ascending order.
    pub fn skus(&self) -> Vec<Sku> {
        let mut skus: Vec<Sku> = self.partitions.iter().map(|e| *e.key()).collect();
        skus.sort_unstable();
        skus
    }

    fn persist(&self) -> EngineResult<()> {
        let mut snapshot: BTreeMap<Sku, Vec<PersistedFact>> = BTreeMap::new();
        for entry in self.partitions.iter() {
            let rows = entry
                .value()
                .iter()
                .map(|(date, day)| PersistedFact {
                    date: *date,
                    units: day.units,
                    revenue: day.revenue,
                })
                .collect();
            snapshot.insert(*entry.key(), rows);
        }

        let payload = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn validate_fact(fact: &SalesFact) -> EngineResult<()> {
    if !fact.units.is_finite() || !fact.revenue.is_finite() {
        return Err(EngineError::validation(format!(
            "non-finite fact for sku {} on {}",
            fact.sku, fact.date
        )));
    }
    if fact.units < 0.0 || fact.revenue < 0.0 {
        warn!(sku = fact.sku, date = %fact.date, "rejecting negative sales fact");
        return Err(EngineError::validation(format!(
            "negative units/revenue for sku {} on {}",
            fact.sku, fact.date
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn reads_come_out_date_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = SalesFactsStore::open(dir.path()).unwrap();
        store
            .upsert(&[
                SalesFact::new(1, date(2024, 5, 3), 3.0, 30.0),
                SalesFact::new(1, date(2024, 5, 1), 1.0, 10.0),
                SalesFact::new(1, date(2024, 5, 2), 2.0, 20.0),
            ])
            .await
            .unwrap();

        let series = store
            .read(1, date(2024, 5, 1), date(2024, 5, 31))
            .await
            .unwrap();
        let dates: Vec<_> = series.iter().map(|f| f.date).collect();
        assert_eq!(
            dates,
            vec![date(2024, 5, 1), date(2024, 5, 2), date(2024, 5, 3)]
        );
    }

    #[tokio::test]
    async fn identical_upsert_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = SalesFactsStore::open(dir.path()).unwrap();
        let fact = SalesFact::new(1, date(2024, 5, 1), 1.0, 10.0);

        assert_eq!(store.upsert(std::slice::from_ref(&fact)).await.unwrap(), 1);
        assert_eq!(store.upsert(std::slice::from_ref(&fact)).await.unwrap(), 0);

        let changed = SalesFact::new(1, date(2024, 5, 1), 2.0, 10.0);
        assert_eq!(store.upsert(&[changed]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn negative_facts_are_rejected_not_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SalesFactsStore::open(dir.path()).unwrap();
        let err = store
            .upsert(&[SalesFact::new(1, date(2024, 5, 1), -1.0, 10.0)])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(store.partition_count(), 0);
    }
}
