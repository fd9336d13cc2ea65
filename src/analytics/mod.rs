//! Sales analytics.
//!
//! Turns the stored sales into daily time series for a chosen date range,
//! metric and breakdown (all sales, by campaign or by product), and serves
//! them as an ECharts line chart.

mod aggregation;
mod charts;
mod handlers;
mod range;
mod records;
mod report;
mod series;

pub use charts::DateFormat;
pub use handlers::{get_analytics_chart, get_analytics_page};
pub use report::ReportTracker;
