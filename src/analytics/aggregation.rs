//! Folds sale records into per-day totals, optionally split by campaign or product.

use std::collections::{BTreeMap, HashMap};

use time::Date;

use crate::analytics::{range::DateWindow, records::SaleRecord};

/// What a set of daily totals belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) enum DimensionKey {
    /// A campaign ID or product ID.
    Attributed(String),
    /// Sales without a campaign or product, and the single key used when
    /// records are not grouped.
    Unattributed,
}

impl From<Option<String>> for DimensionKey {
    fn from(key: Option<String>) -> Self {
        match key {
            Some(key) => DimensionKey::Attributed(key),
            None => DimensionKey::Unattributed,
        }
    }
}

/// Revenue and units sold on one day.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(super) struct DailyTotals {
    pub revenue: f64,
    pub count: u64,
}

/// Totals for each day that had at least one sale.
pub(super) type DailyBucket = BTreeMap<Date, DailyTotals>;

/// Whether to split totals by the records' dimension key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum GroupBy {
    None,
    Dimension,
}

/// Daily buckets per dimension key, in the order the keys were first seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub(super) struct DimensionBuckets {
    buckets: Vec<(DimensionKey, DailyBucket)>,
    positions: HashMap<DimensionKey, usize>,
}

impl DimensionBuckets {
    fn bucket_mut(&mut self, key: DimensionKey) -> &mut DailyBucket {
        let position = match self.positions.get(&key) {
            Some(&position) => position,
            None => {
                self.buckets.push((key.clone(), DailyBucket::new()));
                self.positions.insert(key, self.buckets.len() - 1);
                self.buckets.len() - 1
            }
        };

        &mut self.buckets[position].1
    }

    pub fn iter(&self) -> impl Iterator<Item = &(DimensionKey, DailyBucket)> {
        self.buckets.iter()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// The earliest and latest day with a sale across all buckets.
    pub fn date_span(&self) -> Option<(Date, Date)> {
        let first = self
            .buckets
            .iter()
            .filter_map(|(_, bucket)| bucket.keys().next())
            .min()?;
        let last = self
            .buckets
            .iter()
            .filter_map(|(_, bucket)| bucket.keys().next_back())
            .max()?;

        Some((*first, *last))
    }
}

/// Sum revenue and quantity per day for the records inside `window`.
///
/// With [GroupBy::None] every record lands in a single
/// [DimensionKey::Unattributed] bucket. With [GroupBy::Dimension] there is
/// one bucket per distinct dimension key, and records without a key share
/// the [DimensionKey::Unattributed] bucket.
///
/// Returns an empty mapping if no record falls inside the window.
pub(super) fn aggregate(
    records: &[SaleRecord],
    window: &DateWindow,
    group_by: GroupBy,
) -> DimensionBuckets {
    let mut buckets = DimensionBuckets::default();

    for record in records.iter().filter(|record| window.contains(record.date)) {
        let key = match group_by {
            GroupBy::None => DimensionKey::Unattributed,
            GroupBy::Dimension => DimensionKey::from(record.dimension_key.clone()),
        };

        let totals = buckets.bucket_mut(key).entry(record.date).or_default();
        totals.revenue += record.amount;
        totals.count += record.quantity.max(1);
    }

    buckets
}
