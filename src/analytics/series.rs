//! Turns sparse daily buckets into dense, gap-filled series with one value per day.

use serde::Deserialize;
use time::Date;

use crate::analytics::{
    aggregation::{DimensionBuckets, DimensionKey, GroupBy},
    range::DateWindow,
};

/// The quantity plotted on the chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Money taken.
    #[default]
    Revenue,
    /// Units sold.
    Quantity,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::Revenue, Metric::Quantity];

    pub fn as_query_value(self) -> &'static str {
        match self {
            Self::Revenue => "revenue",
            Self::Quantity => "quantity",
        }
    }

    /// The short label used on the metric toggle.
    pub fn label(self) -> &'static str {
        match self {
            Self::Revenue => "$",
            Self::Quantity => "Qty",
        }
    }
}

/// One value per day for every dimension key.
#[derive(Debug, Clone, Default, PartialEq)]
pub(super) struct MaterializedSeries {
    /// Every day of the effective window, in order, without gaps.
    pub dates: Vec<Date>,
    /// Values per dimension key, each the same length as `dates`.
    pub series: Vec<(DimensionKey, Vec<f64>)>,
}

/// Expand `buckets` into a value for every day, filling days without sales with 0.
///
/// The days covered are the bounded `window` if there is one, otherwise the
/// span from the first to the last day with a sale. With no window and no
/// sales the result is empty.
///
/// An ungrouped series always has its single line when there are days to
/// show, even if nothing was sold on any of them.
pub(super) fn materialize(
    buckets: &DimensionBuckets,
    window: &DateWindow,
    metric: Metric,
    group_by: GroupBy,
) -> MaterializedSeries {
    let (start, end) = match *window {
        DateWindow::Bounded { start, end } => (start, end),
        DateWindow::Unbounded => match buckets.date_span() {
            Some(span) => span,
            None => return MaterializedSeries::default(),
        },
    };

    let dates = days_between(start, end);

    let mut series: Vec<_> = buckets
        .iter()
        .map(|(key, bucket)| {
            let values = dates
                .iter()
                .map(|date| match (bucket.get(date), metric) {
                    (Some(totals), Metric::Revenue) => totals.revenue,
                    (Some(totals), Metric::Quantity) => totals.count as f64,
                    (None, _) => 0.0,
                })
                .collect();

            (key.clone(), values)
        })
        .collect();

    if series.is_empty() && group_by == GroupBy::None && !dates.is_empty() {
        series.push((DimensionKey::Unattributed, vec![0.0; dates.len()]));
    }

    MaterializedSeries { dates, series }
}

/// Every day from `start` to `end` inclusive.
fn days_between(start: Date, end: Date) -> Vec<Date> {
    std::iter::successors(Some(start), |date| date.next_day())
        .take_while(|date| *date <= end)
        .collect()
}
