//! Chart datasets and ECharts rendering for the analytics page.
//!
//! Gap-filled series are turned into labelled, coloured datasets, which are
//! then rendered as the JSON option document of an ECharts line chart.

use std::{collections::HashMap, fmt, str::FromStr};

use charming::{
    Chart,
    component::{Axis, Grid, Legend, Title},
    element::{
        AxisLabel, AxisPointer, AxisPointerType, AxisType, ItemStyle, JsFunction, LineStyle,
        NameLocation, Tooltip, Trigger,
    },
    series::Line,
};
use maud::{Markup, PreEscaped, html};
use serde::Deserialize;
use time::{Date, format_description::BorrowedFormatItem, macros::format_description};

use crate::analytics::{aggregation::DimensionKey, series::MaterializedSeries, series::Metric};

/// Line colours, assigned to datasets in order and reused once exhausted.
pub(super) const PALETTE: [&str; 6] = [
    "rgb(75, 192, 192)",
    "rgb(255, 99, 132)",
    "rgb(54, 162, 235)",
    "rgb(255, 206, 86)",
    "rgb(153, 102, 255)",
    "rgb(255, 159, 64)",
];

/// How dates are written on the chart's date axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateFormat {
    /// `MM/DD/YYYY`
    #[default]
    MonthFirst,
    /// `DD/MM/YYYY`
    DayFirst,
}

const MONTH_FIRST_FORMAT: &[BorrowedFormatItem] =
    format_description!("[month padding:zero]/[day padding:zero]/[year]");
const DAY_FIRST_FORMAT: &[BorrowedFormatItem] =
    format_description!("[day padding:zero]/[month padding:zero]/[year]");

impl DateFormat {
    pub(super) fn format(self, date: Date) -> String {
        let format = match self {
            DateFormat::MonthFirst => MONTH_FIRST_FORMAT,
            DateFormat::DayFirst => DAY_FIRST_FORMAT,
        };

        date.format(format).unwrap_or_else(|_| date.to_string())
    }
}

impl FromStr for DateFormat {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "month-first" => Ok(DateFormat::MonthFirst),
            "day-first" => Ok(DateFormat::DayFirst),
            other => Err(format!(
                "unknown date format \"{other}\", expected \"month-first\" or \"day-first\""
            )),
        }
    }
}

impl fmt::Display for DateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateFormat::MonthFirst => write!(f, "month-first"),
            DateFormat::DayFirst => write!(f, "day-first"),
        }
    }
}

/// What to call a dimension key that has no entry in the reference list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Fallback {
    /// Show the key itself.
    RawKey,
    /// Show the key after a prefix, e.g. "Product 42".
    Prefixed(&'static str),
}

/// Resolves dimension keys to the names shown in the legend.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum DimensionLabels {
    /// A single dataset named after the metric.
    Ungrouped,
    Grouped {
        names: HashMap<String, String>,
        fallback: Fallback,
        unattributed: &'static str,
    },
}

impl DimensionLabels {
    /// Labels for sales grouped by campaign, from `(id, name)` pairs.
    pub fn campaigns(names: Vec<(String, String)>) -> Self {
        DimensionLabels::Grouped {
            names: names.into_iter().collect(),
            fallback: Fallback::RawKey,
            unattributed: "Organic",
        }
    }

    /// Labels for sales grouped by product, from `(id, name)` pairs.
    pub fn products(names: Vec<(String, String)>) -> Self {
        DimensionLabels::Grouped {
            names: names.into_iter().collect(),
            fallback: Fallback::Prefixed("Product"),
            unattributed: "Unknown",
        }
    }

    fn label(&self, key: &DimensionKey, metric: Metric) -> String {
        match self {
            DimensionLabels::Ungrouped => match metric {
                Metric::Revenue => "Daily Sales ($)".to_owned(),
                Metric::Quantity => "Daily Sales (Qty)".to_owned(),
            },
            DimensionLabels::Grouped {
                names,
                fallback,
                unattributed,
            } => match key {
                DimensionKey::Unattributed => (*unattributed).to_owned(),
                DimensionKey::Attributed(id) => match (names.get(id), fallback) {
                    (Some(name), _) => name.clone(),
                    (None, Fallback::RawKey) => id.clone(),
                    (None, Fallback::Prefixed(prefix)) => format!("{prefix} {id}"),
                },
            },
        }
    }

    fn is_grouped(&self) -> bool {
        matches!(self, DimensionLabels::Grouped { .. })
    }
}

/// One line on the chart.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct ChartDataset {
    pub key: DimensionKey,
    pub label: String,
    pub color: &'static str,
    pub values: Vec<f64>,
}

/// Everything needed to draw the sales chart.
///
/// Every dataset has exactly one value per entry in `labels`.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct ChartSeries {
    /// One formatted date per day of the window.
    pub labels: Vec<String>,
    pub datasets: Vec<ChartDataset>,
    pub metric: Metric,
    /// Whether datasets are split by campaign or product.
    pub grouped: bool,
}

impl ChartSeries {
    /// The sum of each dataset's values, in dataset order.
    pub fn totals(&self) -> Vec<(&str, f64)> {
        self.datasets
            .iter()
            .map(|dataset| (dataset.label.as_str(), dataset.values.iter().sum()))
            .collect()
    }

    /// Whether nothing was sold in the window, i.e. every plotted value is 0.
    pub fn is_empty(&self) -> bool {
        self.datasets
            .iter()
            .all(|dataset| dataset.values.iter().all(|value| *value == 0.0))
    }
}

/// Attach display labels and colours to a materialized series.
pub(super) fn build_chart_series(
    series: &MaterializedSeries,
    labels: &DimensionLabels,
    metric: Metric,
    date_format: DateFormat,
) -> ChartSeries {
    let datasets = series
        .series
        .iter()
        .enumerate()
        .map(|(index, (key, values))| ChartDataset {
            key: key.clone(),
            label: labels.label(key, metric),
            color: PALETTE[index % PALETTE.len()],
            values: values.clone(),
        })
        .collect();

    ChartSeries {
        labels: series
            .dates
            .iter()
            .map(|date| date_format.format(*date))
            .collect(),
        datasets,
        metric,
        grouped: labels.is_grouped(),
    }
}

/// Build the ECharts options for a line chart of `series`.
pub(super) fn chart_options(series: &ChartSeries, title: &str) -> Chart {
    let (y_axis_name, y_axis_label, tooltip) = match series.metric {
        Metric::Revenue => (
            "Sales ($)",
            AxisLabel::new().formatter(currency_formatter()),
            Tooltip::new()
                .trigger(Trigger::Axis)
                .value_formatter(currency_formatter())
                .axis_pointer(AxisPointer::new().type_(AxisPointerType::Line)),
        ),
        Metric::Quantity => (
            "Quantity",
            AxisLabel::new(),
            Tooltip::new()
                .trigger(Trigger::Axis)
                .axis_pointer(AxisPointer::new().type_(AxisPointerType::Line)),
        ),
    };

    let mut chart = Chart::new()
        .title(Title::new().text(title).left(20).top("1%"))
        .tooltip(tooltip)
        .grid(
            Grid::new()
                .left("3%")
                .right("4%")
                .bottom("8%")
                .top(90)
                .contain_label(true),
        )
        .x_axis(
            Axis::new()
                .type_(AxisType::Category)
                .name("Date")
                .name_location(NameLocation::Middle)
                .name_gap(30)
                .data(series.labels.clone()),
        )
        .y_axis(
            Axis::new()
                .type_(AxisType::Value)
                .name(y_axis_name)
                .axis_label(y_axis_label),
        );

    if series.grouped {
        chart = chart.legend(Legend::new().left(250).top("1%"));
    }

    for dataset in &series.datasets {
        chart = chart.series(
            Line::new()
                .name(dataset.label.as_str())
                .item_style(ItemStyle::new().color(dataset.color))
                .line_style(LineStyle::new().color(dataset.color))
                .data(dataset.values.clone()),
        );
    }

    chart
}

/// Renders the chart container and the script that draws `options` into it.
///
/// The script runs where it is placed, so the same markup works for a full
/// page load and for an htmx swap.
pub(super) fn chart_view(id: &str, options: &Chart) -> Markup {
    // Campaign and product names come from upstream data and end up inside a
    // script element.
    let options = options.to_string().replace("</", "<\\/");
    let script = format!(
        r#"(function() {{
            const chartDom = document.getElementById("{id}");
            const chart = echarts.init(chartDom);
            chart.setOption({options});

            window.addEventListener('resize', chart.resize);

            const darkModeMediaQuery = window.matchMedia('(prefers-color-scheme: dark)');
            const updateTheme = () => {{
                chart.setTheme(darkModeMediaQuery.matches ? 'dark' : 'default');
            }};
            darkModeMediaQuery.addEventListener('change', updateTheme);
            updateTheme();
        }})();"#
    );

    html!(
        div
            id=(id)
            class="min-h-[380px] w-full rounded dark:bg-gray-100"
        {}

        script { (PreEscaped(script)) }
    )
}

#[inline]
fn currency_formatter() -> JsFunction {
    JsFunction::new_with_args(
        "number",
        "const currencyFormatter = new Intl.NumberFormat('en-US', {
              style: 'currency',
              currency: 'USD'
            });
            return currencyFormatter.format(number);",
    )
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use crate::analytics::{
        aggregation::{DimensionKey, GroupBy, aggregate},
        range::DateWindow,
        records::SaleRecord,
        series::{MaterializedSeries, Metric, materialize},
    };

    use super::{
        ChartSeries, DateFormat, DimensionLabels, PALETTE, build_chart_series, chart_options,
        chart_view,
    };

    fn attributed(key: &str) -> DimensionKey {
        DimensionKey::Attributed(key.to_owned())
    }

    fn grouped_series(keys: &[DimensionKey]) -> MaterializedSeries {
        MaterializedSeries {
            dates: vec![date!(2024 - 03 - 01)],
            series: keys.iter().map(|key| (key.clone(), vec![1.0])).collect(),
        }
    }

    #[test]
    fn dates_follow_date_format() {
        let series = MaterializedSeries {
            dates: vec![date!(2024 - 03 - 09)],
            series: vec![],
        };

        let month_first = build_chart_series(
            &series,
            &DimensionLabels::Ungrouped,
            Metric::Revenue,
            DateFormat::MonthFirst,
        );
        let day_first = build_chart_series(
            &series,
            &DimensionLabels::Ungrouped,
            Metric::Revenue,
            DateFormat::DayFirst,
        );

        assert_eq!(month_first.labels, vec!["03/09/2024"]);
        assert_eq!(day_first.labels, vec!["09/03/2024"]);
    }

    #[test]
    fn colors_cycle_through_palette() {
        let keys: Vec<_> = (0..8).map(|i| attributed(&i.to_string())).collect();

        let chart = build_chart_series(
            &grouped_series(&keys),
            &DimensionLabels::campaigns(vec![]),
            Metric::Revenue,
            DateFormat::MonthFirst,
        );

        let colors: Vec<_> = chart.datasets.iter().map(|dataset| dataset.color).collect();
        assert_eq!(&colors[..6], &PALETTE[..]);
        assert_eq!(colors[6], PALETTE[0]);
        assert_eq!(colors[7], PALETTE[1]);
    }

    #[test]
    fn campaign_labels_fall_back_to_raw_id() {
        let keys = [attributed("c1"), attributed("c2"), DimensionKey::Unattributed];
        let labels =
            DimensionLabels::campaigns(vec![("c1".to_owned(), "Spring Launch".to_owned())]);

        let chart = build_chart_series(
            &grouped_series(&keys),
            &labels,
            Metric::Revenue,
            DateFormat::MonthFirst,
        );

        let names: Vec<_> = chart.datasets.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(names, vec!["Spring Launch", "c2", "Organic"]);
        assert!(chart.grouped);
    }

    #[test]
    fn product_labels_fall_back_to_prefixed_id() {
        let keys = [attributed("7"), attributed("42"), DimensionKey::Unattributed];
        let labels = DimensionLabels::products(vec![("7".to_owned(), "Mug".to_owned())]);

        let chart = build_chart_series(
            &grouped_series(&keys),
            &labels,
            Metric::Quantity,
            DateFormat::MonthFirst,
        );

        let names: Vec<_> = chart.datasets.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(names, vec!["Mug", "Product 42", "Unknown"]);
    }

    #[test]
    fn ungrouped_label_names_the_metric() {
        let keys = [DimensionKey::Unattributed];

        let revenue = build_chart_series(
            &grouped_series(&keys),
            &DimensionLabels::Ungrouped,
            Metric::Revenue,
            DateFormat::MonthFirst,
        );
        let quantity = build_chart_series(
            &grouped_series(&keys),
            &DimensionLabels::Ungrouped,
            Metric::Quantity,
            DateFormat::MonthFirst,
        );

        assert_eq!(revenue.datasets[0].label, "Daily Sales ($)");
        assert_eq!(quantity.datasets[0].label, "Daily Sales (Qty)");
        assert!(!revenue.grouped);
    }

    #[test]
    fn two_campaigns_on_one_day_give_two_datasets() {
        let records = [
            SaleRecord {
                date: date!(2024 - 03 - 01),
                amount: 30.0,
                quantity: 1,
                dimension_key: Some("A".to_owned()),
            },
            SaleRecord {
                date: date!(2024 - 03 - 01),
                amount: 20.0,
                quantity: 1,
                dimension_key: Some("B".to_owned()),
            },
        ];

        let grouped = build_chart_series(
            &materialize(
                &aggregate(&records, &DateWindow::Unbounded, GroupBy::Dimension),
                &DateWindow::Unbounded,
                Metric::Revenue,
                GroupBy::Dimension,
            ),
            &DimensionLabels::campaigns(vec![]),
            Metric::Revenue,
            DateFormat::MonthFirst,
        );
        let ungrouped = build_chart_series(
            &materialize(
                &aggregate(&records, &DateWindow::Unbounded, GroupBy::None),
                &DateWindow::Unbounded,
                Metric::Revenue,
                GroupBy::None,
            ),
            &DimensionLabels::Ungrouped,
            Metric::Revenue,
            DateFormat::MonthFirst,
        );

        assert_eq!(grouped.datasets.len(), 2);
        assert_eq!(ungrouped.datasets.len(), 1);
        assert_eq!(ungrouped.datasets[0].values, vec![50.0]);
    }

    #[test]
    fn totals_sum_each_dataset() {
        let chart = ChartSeries {
            labels: vec!["a".to_owned(), "b".to_owned()],
            datasets: vec![super::ChartDataset {
                key: DimensionKey::Unattributed,
                label: "Daily Sales ($)".to_owned(),
                color: PALETTE[0],
                values: vec![12.5, 7.5],
            }],
            metric: Metric::Revenue,
            grouped: false,
        };

        assert_eq!(chart.totals(), vec![("Daily Sales ($)", 20.0)]);
    }

    #[test]
    fn chart_options_name_axes_and_hide_legend_when_ungrouped() {
        let chart = build_chart_series(
            &grouped_series(&[DimensionKey::Unattributed]),
            &DimensionLabels::Ungrouped,
            Metric::Quantity,
            DateFormat::MonthFirst,
        );

        let options: serde_json::Value =
            serde_json::from_str(&chart_options(&chart, "Sales").to_string()).unwrap();

        // A chart with one axis of each kind writes them as objects, not arrays.
        assert_eq!(options["xAxis"]["name"], "Date");
        assert_eq!(options["yAxis"]["name"], "Quantity");
        assert!(options.get("legend").is_none());
        assert_eq!(options["series"][0]["name"], "Daily Sales (Qty)");
    }

    #[test]
    fn chart_options_show_legend_when_grouped() {
        let chart = build_chart_series(
            &grouped_series(&[attributed("c1")]),
            &DimensionLabels::campaigns(vec![]),
            Metric::Revenue,
            DateFormat::MonthFirst,
        );

        let options = chart_options(&chart, "Sales by Campaign").to_string();

        assert!(options.contains("\"legend\""));
        assert!(options.contains("Sales ($)"));
    }

    #[test]
    fn chart_view_escapes_closing_script_tags() {
        let chart = build_chart_series(
            &grouped_series(&[attributed("c1")]),
            &DimensionLabels::campaigns(vec![(
                "c1".to_owned(),
                "</script><b>bold</b>".to_owned(),
            )]),
            Metric::Revenue,
            DateFormat::MonthFirst,
        );

        let markup = chart_view("sales-chart", &chart_options(&chart, "Sales")).into_string();

        assert!(!markup.contains("</script><b>"));
        assert!(markup.contains("id=\"sales-chart\""));
    }

    #[test]
    fn labels_and_values_have_equal_length() {
        let series = MaterializedSeries {
            dates: vec![date!(2024 - 03 - 01), date!(2024 - 03 - 02)],
            series: vec![
                (attributed("a"), vec![1.0, 0.0]),
                (attributed("b"), vec![0.0, 2.0]),
            ],
        };

        let chart = build_chart_series(
            &series,
            &DimensionLabels::products(Vec::new()),
            Metric::Revenue,
            DateFormat::DayFirst,
        );

        for dataset in &chart.datasets {
            assert_eq!(dataset.values.len(), chart.labels.len());
        }
    }
}
