use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;

use forgecast_core::Sku;
use forgecast_engine::{
    ConfirmedOrderLine, InventorySnapshot, PipelineDemandLine, SalesHistoryPoint, SupplyParameters,
};

use super::{DemandFeeds, FeedError, FeedKind, ReadContext, TrackedSku};

/// Injected misbehaviour for a feed, optionally scoped to one SKU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFault {
    Unavailable(String),
    /// Block for this long (bounded by the read deadline) before answering.
    Latency(Duration),
    Malformed(String),
}

type FaultKey = (FeedKind, Option<Sku>);

fn poisoned(feed: FeedKind) -> FeedError {
    FeedError::unavailable(feed, "lock poisoned")
}

/// In-memory signal feeds.
///
/// Intended for tests/dev and for replaying a captured dataset.
#[derive(Debug, Default)]
pub struct InMemoryFeeds {
    tracked: RwLock<BTreeMap<Sku, SupplyParameters>>,
    sales: RwLock<HashMap<Sku, Vec<SalesHistoryPoint>>>,
    pipeline: RwLock<HashMap<Sku, Vec<PipelineDemandLine>>>,
    orders: RwLock<HashMap<Sku, Vec<ConfirmedOrderLine>>>,
    inventory: RwLock<HashMap<Sku, InventorySnapshot>>,
    faults: RwLock<HashMap<FaultKey, FeedFault>>,
}

impl InMemoryFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, sku: impl Into<Sku>, supply: SupplyParameters) {
        self.tracked.write().unwrap_or_else(PoisonError::into_inner).insert(sku.into(), supply);
    }

    pub fn add_sales(&self, points: impl IntoIterator<Item = SalesHistoryPoint>) {
        let mut sales = self.sales.write().unwrap_or_else(PoisonError::into_inner);
        for p in points {
            sales.entry(p.sku.clone()).or_default().push(p);
        }
    }

    pub fn add_pipeline(&self, lines: impl IntoIterator<Item = PipelineDemandLine>) {
        let mut pipeline = self.pipeline.write().unwrap_or_else(PoisonError::into_inner);
        for l in lines {
            pipeline.entry(l.sku.clone()).or_default().push(l);
        }
    }

    pub fn add_orders(&self, lines: impl IntoIterator<Item = ConfirmedOrderLine>) {
        let mut orders = self.orders.write().unwrap_or_else(PoisonError::into_inner);
        for l in lines {
            orders.entry(l.sku.clone()).or_default().push(l);
        }
    }

    pub fn set_inventory(&self, snapshot: InventorySnapshot) {
        self.inventory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.sku.clone(), snapshot);
    }

    /// Fault every read of `feed`.
    pub fn inject_fault(&self, feed: FeedKind, fault: FeedFault) {
        self.faults.write().unwrap_or_else(PoisonError::into_inner).insert((feed, None), fault);
    }

    /// Fault reads of `feed` for one SKU only.
    pub fn inject_sku_fault(&self, feed: FeedKind, sku: impl Into<Sku>, fault: FeedFault) {
        self.faults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((feed, Some(sku.into())), fault);
    }

    pub fn clear_faults(&self) {
        self.faults.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn apply_fault(&self, feed: FeedKind, sku: Option<&Sku>, ctx: &ReadContext) -> Result<(), FeedError> {
        ctx.check(feed)?;

        let fault = {
            let faults = self.faults.read().map_err(|_| poisoned(feed))?;
            sku.and_then(|s| faults.get(&(feed, Some(s.clone()))))
                .or_else(|| faults.get(&(feed, None)))
                .cloned()
        };

        match fault {
            None => Ok(()),
            Some(FeedFault::Unavailable(message)) => Err(FeedError::unavailable(feed, message)),
            Some(FeedFault::Malformed(message)) => Err(FeedError::malformed(feed, message)),
            Some(FeedFault::Latency(latency)) => {
                thread::sleep(latency.min(ctx.remaining()));
                ctx.check(feed)
            }
        }
    }
}

impl DemandFeeds for InMemoryFeeds {
    fn tracked_skus(&self, ctx: &ReadContext) -> Result<Vec<TrackedSku>, FeedError> {
        self.apply_fault(FeedKind::Catalog, None, ctx)?;
        Ok(self
            .tracked
            .read()
            .map_err(|_| poisoned(FeedKind::Catalog))?
            .iter()
            .map(|(sku, supply)| TrackedSku::new(sku.clone(), *supply))
            .collect())
    }

    fn sales_history(
        &self,
        sku: &Sku,
        from: NaiveDate,
        to: NaiveDate,
        ctx: &ReadContext,
    ) -> Result<Vec<SalesHistoryPoint>, FeedError> {
        self.apply_fault(FeedKind::SalesHistory, Some(sku), ctx)?;
        let mut points: Vec<_> = self
            .sales
            .read()
            .map_err(|_| poisoned(FeedKind::SalesHistory))?
            .get(sku)
            .map(|all| {
                all.iter()
                    .filter(|p| p.date >= from && p.date <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        points.sort_by_key(|p| p.date);
        Ok(points)
    }

    fn pipeline(&self, sku: &Sku, ctx: &ReadContext) -> Result<Vec<PipelineDemandLine>, FeedError> {
        self.apply_fault(FeedKind::Pipeline, Some(sku), ctx)?;
        Ok(self
            .pipeline
            .read()
            .map_err(|_| poisoned(FeedKind::Pipeline))?
            .get(sku)
            .cloned()
            .unwrap_or_default())
    }

    fn confirmed_orders(
        &self,
        sku: &Sku,
        ctx: &ReadContext,
    ) -> Result<Vec<ConfirmedOrderLine>, FeedError> {
        self.apply_fault(FeedKind::ConfirmedOrders, Some(sku), ctx)?;
        Ok(self
            .orders
            .read()
            .map_err(|_| poisoned(FeedKind::ConfirmedOrders))?
            .get(sku)
            .cloned()
            .unwrap_or_default())
    }

    fn inventory(&self, sku: &Sku, ctx: &ReadContext) -> Result<Option<InventorySnapshot>, FeedError> {
        self.apply_fault(FeedKind::Inventory, Some(sku), ctx)?;
        let inventory = self
            .inventory
            .read()
            .map_err(|_| poisoned(FeedKind::Inventory))?;
        Ok(inventory.get(sku).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::CancellationFlag;
    use std::time::Instant;

    fn ctx() -> ReadContext {
        ReadContext::with_timeout(Duration::from_secs(5), CancellationFlag::new())
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn sales_are_filtered_to_the_requested_range() {
        let feeds = InMemoryFeeds::new();
        let sku = Sku::new("A");
        feeds.add_sales((1..=10).map(|d| SalesHistoryPoint {
            sku: sku.clone(),
            date: day(d),
            units_sold: 1,
        }));

        let points = feeds.sales_history(&sku, day(3), day(5), &ctx()).unwrap();
        assert_eq!(points.iter().map(|p| p.date).collect::<Vec<_>>(), vec![day(3), day(4), day(5)]);
        assert!(feeds.sales_history(&Sku::new("B"), day(1), day(10), &ctx()).unwrap().is_empty());
    }

    #[test]
    fn tracked_skus_are_listed_in_order() {
        let feeds = InMemoryFeeds::new();
        feeds.track("B", SupplyParameters::default());
        feeds.track("A", SupplyParameters::default());
        let skus: Vec<_> = feeds
            .tracked_skus(&ctx())
            .unwrap()
            .into_iter()
            .map(|t| t.sku)
            .collect();
        assert_eq!(skus, vec![Sku::new("A"), Sku::new("B")]);
    }

    #[test]
    fn sku_fault_overrides_only_that_sku() {
        let feeds = InMemoryFeeds::new();
        feeds.inject_sku_fault(FeedKind::Pipeline, "A", FeedFault::Malformed("bad stage".into()));

        assert!(matches!(
            feeds.pipeline(&Sku::new("A"), &ctx()),
            Err(FeedError::Malformed { feed: FeedKind::Pipeline, .. })
        ));
        assert!(feeds.pipeline(&Sku::new("B"), &ctx()).is_ok());

        feeds.clear_faults();
        assert!(feeds.pipeline(&Sku::new("A"), &ctx()).is_ok());
    }

    #[test]
    fn latency_is_cut_short_by_the_deadline() {
        let feeds = InMemoryFeeds::new();
        feeds.inject_fault(FeedKind::Inventory, FeedFault::Latency(Duration::from_secs(30)));
        let ctx = ReadContext::with_timeout(Duration::from_millis(20), CancellationFlag::new());

        let started = Instant::now();
        let err = feeds.inventory(&Sku::new("A"), &ctx).unwrap_err();
        assert_eq!(err, FeedError::DeadlineExceeded { feed: FeedKind::Inventory });
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
