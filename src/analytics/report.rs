//! The sales report pipeline and the lifecycle of the report shown on the page.
//!
//! A report is rebuilt from scratch for every selection: the records are
//! fetched, aggregated, gap-filled and labelled without reusing anything
//! from a previous report. [ReportTracker] decides which of several
//! overlapping builds gets to be the current report.

use std::{collections::BTreeMap, sync::Arc};

use rusqlite::Connection;
use serde::Deserialize;
use time::Date;

use crate::{
    Error,
    analytics::{
        aggregation::{GroupBy, aggregate},
        charts::{ChartSeries, DateFormat, DimensionLabels, build_chart_series},
        range::{CustomRange, DateWindow, TimeRange, resolve_window},
        records::{SaleRecord, get_sale_item_records, get_sale_records},
        series::{Metric, materialize},
    },
    campaign::get_campaign_names,
    product::get_product_names,
};

/// Which breakdown of sales the chart shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportTab {
    /// Every sale in one series.
    #[default]
    AllSales,
    /// One series per campaign, plus organic sales.
    ByCampaign,
    /// One series per product, from the sales' line items.
    ByProduct,
}

impl ReportTab {
    pub const ALL: [ReportTab; 3] = [
        ReportTab::AllSales,
        ReportTab::ByCampaign,
        ReportTab::ByProduct,
    ];

    pub fn as_query_value(self) -> &'static str {
        match self {
            Self::AllSales => "all-sales",
            Self::ByCampaign => "by-campaign",
            Self::ByProduct => "by-product",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::AllSales => "All Sales",
            Self::ByCampaign => "By Campaign",
            Self::ByProduct => "By Product",
        }
    }

    pub fn chart_title(self) -> &'static str {
        match self {
            Self::AllSales => "Daily Sales",
            Self::ByCampaign => "Sales by Campaign",
            Self::ByProduct => "Sales by Product",
        }
    }
}

/// Every selector that affects the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) struct ReportRequest {
    pub range: TimeRange,
    pub custom: CustomRange,
    pub metric: Metric,
    pub tab: ReportTab,
    pub date_format: DateFormat,
}

/// A finished report, ready to render.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct Report {
    pub request: ReportRequest,
    pub window: DateWindow,
    pub chart: ChartSeries,
}

/// Build the report for `request` from the current database contents.
///
/// `today` is the last day of the preset time ranges.
///
/// # Errors
/// Returns [Error::InvalidSelection] if the custom date range is incomplete,
/// or [Error::FetchFailure] if the sales or their reference data could not
/// be read. Nothing is returned for a failed fetch, not even a partial chart.
pub(super) fn build_report(
    request: &ReportRequest,
    today: Date,
    connection: &Connection,
) -> Result<Report, Error> {
    let window = resolve_window(request.range, request.custom, today)?;

    let (records, labels, group_by) =
        fetch_records(request.tab, &window, connection).map_err(|error| {
            tracing::error!("could not fetch sale records: {error}");
            Error::FetchFailure(error.to_string())
        })?;

    let buckets = aggregate(&records, &window, group_by);
    let series = materialize(&buckets, &window, request.metric, group_by);
    let chart = build_chart_series(&series, &labels, request.metric, request.date_format);

    Ok(Report {
        request: *request,
        window,
        chart,
    })
}

fn fetch_records(
    tab: ReportTab,
    window: &DateWindow,
    connection: &Connection,
) -> Result<(Vec<SaleRecord>, DimensionLabels, GroupBy), Error> {
    match tab {
        ReportTab::AllSales => Ok((
            get_sale_records(window, connection)?,
            DimensionLabels::Ungrouped,
            GroupBy::None,
        )),
        ReportTab::ByCampaign => Ok((
            get_sale_records(window, connection)?,
            DimensionLabels::campaigns(get_campaign_names(connection)?),
            GroupBy::Dimension,
        )),
        ReportTab::ByProduct => Ok((
            get_sale_item_records(window, connection)?,
            DimensionLabels::products(get_product_names(connection)?),
            GroupBy::Dimension,
        )),
    }
}

/// Identifies the analytics page a browser tab loaded. Chart requests echo
/// it back so that builds are only compared with builds from the same tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(super) struct SessionId(pub u64);

/// Identifies one report build. Later builds of a session have larger numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Generation {
    pub session: SessionId,
    pub number: u64,
}

/// Where the current report of a session is in its lifecycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub(super) enum ReportState {
    /// No report has been requested yet.
    #[default]
    Idle,
    Loading {
        generation: Generation,
    },
    Ready {
        generation: Generation,
        report: Arc<Report>,
    },
    Error {
        generation: Generation,
        message: String,
    },
}

/// What happened to a finished build.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Finish {
    /// The build was the latest and its report is now current.
    Ready(Arc<Report>),
    /// The build was the latest and failed with this message.
    Failed(String),
    /// A newer build for the same session started in the meantime, the
    /// result was dropped.
    Superseded,
}

#[derive(Debug, Default)]
struct Session {
    latest: u64,
    state: ReportState,
}

/// The most sessions kept at once. The oldest session is forgotten first.
const MAX_SESSIONS: usize = 1024;

/// Owns the current report of every open analytics page and hands out
/// generations so that a slow build can never replace the result of a
/// build that the same page started after it.
///
/// Sessions are independent: a build in one tab never supersedes a build
/// in another.
#[derive(Debug)]
pub struct ReportTracker {
    next_session: u64,
    sessions: BTreeMap<SessionId, Session>,
}

impl Default for ReportTracker {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl ReportTracker {
    /// Create a tracker whose first session ID is `first_session`.
    ///
    /// Starting from a clock reading keeps IDs from a previous server run
    /// from colliding with new ones.
    pub fn starting_at(first_session: u64) -> Self {
        Self {
            next_session: first_session,
            sessions: BTreeMap::new(),
        }
    }

    /// Register a newly loaded page and the report it was rendered with.
    pub(super) fn open_session(&mut self, report: Option<Arc<Report>>) -> SessionId {
        let session = SessionId(self.next_session);
        self.next_session = self.next_session.wrapping_add(1);

        let generation = Generation { session, number: 0 };
        let state = match report {
            Some(report) => ReportState::Ready { generation, report },
            None => ReportState::Idle,
        };
        self.sessions.insert(session, Session { latest: 0, state });
        self.evict_except(session);

        session
    }

    /// Start a new build for `session`, superseding any build of that
    /// session still in progress.
    ///
    /// Unknown sessions, e.g. from before a restart, are registered on the fly.
    pub(super) fn begin(&mut self, session: SessionId) -> Generation {
        let entry = self.sessions.entry(session).or_default();
        entry.latest += 1;
        let generation = Generation {
            session,
            number: entry.latest,
        };
        entry.state = ReportState::Loading { generation };

        self.evict_except(session);

        generation
    }

    /// Record the result of the build started as `generation`.
    ///
    /// The result only becomes the session's current state if the session
    /// has not started another build since.
    pub(super) fn finish(&mut self, generation: Generation, result: Result<Report, Error>) -> Finish {
        let Some(entry) = self.sessions.get_mut(&generation.session) else {
            tracing::debug!("dropping report {generation:?}, its session was evicted");
            return Finish::Superseded;
        };

        if generation.number != entry.latest {
            tracing::debug!(
                "dropping report {generation:?}, superseded by generation {}",
                entry.latest
            );
            return Finish::Superseded;
        }

        match result {
            Ok(report) => {
                let report = Arc::new(report);
                entry.state = ReportState::Ready {
                    generation,
                    report: report.clone(),
                };
                Finish::Ready(report)
            }
            Err(error) => {
                let message = error.to_string();
                entry.state = ReportState::Error {
                    generation,
                    message: message.clone(),
                };
                Finish::Failed(message)
            }
        }
    }

    /// The state of `session`, [ReportState::Idle] if the session is unknown.
    pub(super) fn state(&self, session: SessionId) -> &ReportState {
        static IDLE: ReportState = ReportState::Idle;

        self.sessions
            .get(&session)
            .map(|entry| &entry.state)
            .unwrap_or(&IDLE)
    }

    /// Forget the oldest sessions until at most [MAX_SESSIONS] are left,
    /// never forgetting `keep`.
    fn evict_except(&mut self, keep: SessionId) {
        while self.sessions.len() > MAX_SESSIONS {
            let Some(oldest) = self
                .sessions
                .keys()
                .copied()
                .find(|session| *session != keep)
            else {
                break;
            };
            self.sessions.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rusqlite::Connection;
    use time::{Date, macros::date};

    use crate::{
        Error,
        analytics::{
            charts::DateFormat,
            range::{CustomRange, DateWindow, TimeRange},
            series::Metric,
        },
        campaign::{Campaign, upsert_campaign},
        db::initialize,
        product::{Product, upsert_product},
        sale::{Attribution, Sale, SaleItem, upsert_sale},
    };

    use super::{
        Finish, MAX_SESSIONS, ReportRequest, ReportState, ReportTab, ReportTracker, SessionId,
        build_report,
    };

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    fn create_campaign(id: &str, name: &str, conn: &Connection) {
        upsert_campaign(
            &Campaign {
                id: id.to_owned(),
                name: name.to_owned(),
                budget: None,
                spend: 0.0,
                impressions: 0,
                clicks: 0,
                purchases: 0,
                purchase_value: 0.0,
                start_date: None,
                end_date: None,
            },
            conn,
        )
        .unwrap();
    }

    fn create_sale(
        id: i64,
        date: Date,
        total: f64,
        campaign_id: Option<&str>,
        items: Vec<SaleItem>,
        conn: &Connection,
    ) {
        upsert_sale(
            &Sale {
                id,
                date_created: date,
                order_status: "completed".to_owned(),
                order_total: total,
                campaign_id: campaign_id.map(str::to_owned),
                attribution: Attribution::default(),
                has_bump: false,
                items,
            },
            conn,
        )
        .unwrap();
    }

    fn custom_request(tab: ReportTab, metric: Metric, start: Date, end: Date) -> ReportRequest {
        ReportRequest {
            range: TimeRange::Custom,
            custom: CustomRange {
                start: Some(start),
                end: Some(end),
            },
            metric,
            tab,
            date_format: DateFormat::MonthFirst,
        }
    }

    #[test]
    fn campaign_report_end_to_end() {
        let conn = get_test_connection();
        create_campaign("A", "Campaign A", &conn);
        create_campaign("B", "Campaign B", &conn);
        create_sale(1, date!(2024 - 03 - 01), 100.0, Some("A"), vec![], &conn);
        create_sale(2, date!(2024 - 03 - 03), 200.0, Some("B"), vec![], &conn);
        let request = custom_request(
            ReportTab::ByCampaign,
            Metric::Revenue,
            date!(2024 - 03 - 01),
            date!(2024 - 03 - 03),
        );

        let report = build_report(&request, date!(2024 - 06 - 01), &conn).unwrap();

        assert_eq!(
            report.chart.labels,
            vec!["03/01/2024", "03/02/2024", "03/03/2024"]
        );
        assert_eq!(report.chart.datasets.len(), 2);
        assert_eq!(report.chart.datasets[0].label, "Campaign A");
        assert_eq!(report.chart.datasets[0].values, vec![100.0, 0.0, 0.0]);
        assert_eq!(report.chart.datasets[1].label, "Campaign B");
        assert_eq!(report.chart.datasets[1].values, vec![0.0, 0.0, 200.0]);
    }

    #[test]
    fn product_report_counts_line_item_quantities() {
        let conn = get_test_connection();
        upsert_product(
            &Product {
                id: 7,
                name: "Mug".to_owned(),
                price: Some(12.5),
            },
            &conn,
        )
        .unwrap();
        create_sale(
            1,
            date!(2024 - 03 - 02),
            25.0,
            None,
            vec![SaleItem {
                id: 1,
                product_id: Some(7),
                product_name: "Mug".to_owned(),
                quantity: 2,
                unit_price: 12.5,
                line_total: 25.0,
                is_bump: false,
            }],
            &conn,
        );
        let request = custom_request(
            ReportTab::ByProduct,
            Metric::Quantity,
            date!(2024 - 03 - 01),
            date!(2024 - 03 - 02),
        );

        let report = build_report(&request, date!(2024 - 06 - 01), &conn).unwrap();

        assert_eq!(report.chart.datasets[0].label, "Mug");
        assert_eq!(report.chart.datasets[0].values, vec![0.0, 2.0]);
    }

    #[test]
    fn all_time_report_spans_first_to_last_sale() {
        let conn = get_test_connection();
        create_sale(1, date!(2024 - 03 - 01), 10.0, None, vec![], &conn);
        create_sale(2, date!(2024 - 03 - 04), 20.0, None, vec![], &conn);
        let request = ReportRequest::default();

        let report = build_report(&request, date!(2024 - 06 - 01), &conn).unwrap();

        assert_eq!(report.window, DateWindow::Unbounded);
        assert_eq!(report.chart.labels.len(), 4);
        assert_eq!(report.chart.datasets[0].label, "Daily Sales ($)");
        assert_eq!(report.chart.datasets[0].values, vec![10.0, 0.0, 0.0, 20.0]);
    }

    #[test]
    fn labels_stay_inside_bounded_window_without_gaps() {
        let conn = get_test_connection();
        create_sale(1, date!(2024 - 02 - 20), 10.0, None, vec![], &conn);
        create_sale(2, date!(2024 - 03 - 09), 20.0, None, vec![], &conn);
        let request = ReportRequest {
            range: TimeRange::Last7Days,
            ..ReportRequest::default()
        };

        let report = build_report(&request, date!(2024 - 03 - 10), &conn).unwrap();

        let expected: Vec<String> = (3..=10).map(|day| format!("03/{day:02}/2024")).collect();
        assert_eq!(report.chart.labels, expected);
        assert_eq!(report.chart.datasets[0].values.len(), expected.len());
    }

    #[test]
    fn building_twice_gives_identical_reports() {
        let conn = get_test_connection();
        create_campaign("A", "Campaign A", &conn);
        create_sale(1, date!(2024 - 03 - 01), 100.0, Some("A"), vec![], &conn);
        create_sale(2, date!(2024 - 03 - 02), 50.0, None, vec![], &conn);
        let request = ReportRequest {
            tab: ReportTab::ByCampaign,
            ..ReportRequest::default()
        };

        let first = build_report(&request, date!(2024 - 06 - 01), &conn).unwrap();
        let second = build_report(&request, date!(2024 - 06 - 01), &conn).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn incomplete_custom_range_is_invalid_selection() {
        let conn = get_test_connection();
        let request = ReportRequest {
            range: TimeRange::Custom,
            custom: CustomRange {
                start: None,
                end: Some(date!(2024 - 03 - 01)),
            },
            ..ReportRequest::default()
        };

        let result = build_report(&request, date!(2024 - 06 - 01), &conn);

        assert!(matches!(result, Err(Error::InvalidSelection(_))));
    }

    #[test]
    fn fetch_errors_become_fetch_failures() {
        let conn = Connection::open_in_memory().unwrap();

        let result = build_report(&ReportRequest::default(), date!(2024 - 06 - 01), &conn);

        assert!(matches!(result, Err(Error::FetchFailure(_))));
    }

    #[test]
    fn empty_database_gives_empty_chart() {
        let conn = get_test_connection();

        let report =
            build_report(&ReportRequest::default(), date!(2024 - 06 - 01), &conn).unwrap();

        assert!(report.chart.labels.is_empty());
        assert!(report.chart.is_empty());
    }

    #[test]
    fn bounded_window_without_sales_plots_a_flat_line() {
        let conn = get_test_connection();
        let request = ReportRequest {
            range: TimeRange::Last7Days,
            ..ReportRequest::default()
        };

        let report = build_report(&request, date!(2024 - 03 - 10), &conn).unwrap();

        assert_eq!(report.chart.datasets.len(), 1);
        assert_eq!(report.chart.datasets[0].label, "Daily Sales ($)");
        assert!(report.chart.datasets[0].values.iter().all(|value| *value == 0.0));
        assert_eq!(
            report.chart.datasets[0].values.len(),
            report.chart.labels.len()
        );
        assert!(report.chart.is_empty());
    }

    #[test]
    fn tracker_moves_from_idle_to_loading_to_ready() {
        let conn = get_test_connection();
        let mut tracker = ReportTracker::default();
        let session = tracker.open_session(None);
        assert_eq!(*tracker.state(session), ReportState::Idle);

        let generation = tracker.begin(session);
        assert_eq!(*tracker.state(session), ReportState::Loading { generation });

        let result = build_report(&ReportRequest::default(), date!(2024 - 06 - 01), &conn);
        let finish = tracker.finish(generation, result);

        assert!(matches!(finish, Finish::Ready(_)));
        assert!(matches!(tracker.state(session), ReportState::Ready { .. }));
    }

    #[test]
    fn tracker_records_errors() {
        let mut tracker = ReportTracker::default();
        let session = tracker.open_session(None);
        let generation = tracker.begin(session);

        let finish = tracker.finish(
            generation,
            Err(Error::FetchFailure("connection reset".to_owned())),
        );

        assert_eq!(
            finish,
            Finish::Failed("could not load sales data: connection reset".to_owned())
        );
        assert!(matches!(tracker.state(session), ReportState::Error { .. }));
    }

    #[test]
    fn stale_result_does_not_replace_newer_one() {
        let conn = get_test_connection();
        let mut tracker = ReportTracker::default();
        let session = tracker.open_session(None);
        let stale = tracker.begin(session);
        let latest = tracker.begin(session);

        let latest_result =
            build_report(&ReportRequest::default(), date!(2024 - 06 - 01), &conn);
        assert!(matches!(
            tracker.finish(latest, latest_result),
            Finish::Ready(_)
        ));

        let stale_finish = tracker.finish(
            stale,
            Err(Error::FetchFailure("slow request timed out".to_owned())),
        );

        assert_eq!(stale_finish, Finish::Superseded);
        assert!(matches!(
            tracker.state(session),
            ReportState::Ready { generation, .. } if *generation == latest
        ));
    }

    #[test]
    fn sessions_do_not_supersede_each_other() {
        let conn = get_test_connection();
        let mut tracker = ReportTracker::default();
        let first_tab = tracker.open_session(None);
        let second_tab = tracker.open_session(None);

        let first = tracker.begin(first_tab);
        let second = tracker.begin(second_tab);

        let today = date!(2024 - 06 - 01);
        let first_result = build_report(&ReportRequest::default(), today, &conn);
        let second_result = build_report(&ReportRequest::default(), today, &conn);

        assert!(matches!(tracker.finish(second, second_result), Finish::Ready(_)));
        assert!(matches!(tracker.finish(first, first_result), Finish::Ready(_)));
    }

    #[test]
    fn opened_session_starts_with_its_page_report() {
        let conn = get_test_connection();
        let mut tracker = ReportTracker::default();
        let report = build_report(&ReportRequest::default(), date!(2024 - 06 - 01), &conn)
            .map(Arc::new)
            .unwrap();

        let session = tracker.open_session(Some(report.clone()));
        let other = tracker.open_session(None);

        assert_ne!(session, other);
        assert!(matches!(
            tracker.state(session),
            ReportState::Ready { report: current, .. } if *current == report
        ));
        assert_eq!(*tracker.state(other), ReportState::Idle);
    }

    #[test]
    fn unknown_session_is_registered_on_first_build() {
        let mut tracker = ReportTracker::starting_at(100);

        let generation = tracker.begin(SessionId(7));

        assert_eq!(generation.session, SessionId(7));
        assert_eq!(
            *tracker.state(SessionId(7)),
            ReportState::Loading { generation }
        );
    }

    #[test]
    fn oldest_sessions_are_forgotten_first() {
        let mut tracker = ReportTracker::default();
        let first = tracker.open_session(None);
        let first_build = tracker.begin(first);

        for _ in 0..MAX_SESSIONS {
            tracker.open_session(None);
        }

        assert_eq!(*tracker.state(first), ReportState::Idle);
        assert_eq!(
            tracker.finish(first_build, Err(Error::NotFound)),
            Finish::Superseded
        );
    }
}
