//! Analytics HTTP handlers and view rendering.
//!
//! The full page renders the selector form and the chart for the selection
//! in the query string. Every change to the form asks the chart endpoint for
//! a freshly built report, which htmx swaps into the chart section.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    extract::{FromRef, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_htmx::HxPushUrl;
use maud::{Markup, html};
use rusqlite::Connection;
use serde::Deserialize;
use time::Date;

use crate::{
    AppState, Error,
    analytics::{
        charts::{DateFormat, chart_options, chart_view},
        range::{CustomRange, DateWindow, TimeRange, deserialize_optional_date, resolve_window},
        report::{
            Finish, Report, ReportRequest, ReportState, ReportTab, ReportTracker, SessionId,
            build_report,
        },
        series::Metric,
    },
    endpoints,
    html::{
        FORM_LABEL_STYLE, FORM_RADIO_INPUT_STYLE, FORM_RADIO_LABEL_STYLE, FORM_SELECT_STYLE,
        PAGE_CONTAINER_STYLE, TABLE_CELL_STYLE, TABLE_HEADER_STYLE, TABLE_ROW_STYLE, alert, base,
        format_currency,
    },
    navigation::NavBar,
    timezone::local_today,
};

const CHART_ID: &str = "sales-chart";
const CHART_SECTION_ID: &str = "analytics-chart";

/// The state needed for the analytics page.
#[derive(Debug, Clone)]
pub struct AnalyticsState {
    /// The database connection for reading sales.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The local timezone as a canonical timezone name, e.g. "Pacific/Auckland".
    pub local_timezone: String,
    /// How dates are written on the chart.
    pub date_format: DateFormat,
    /// The current report and its generation counter.
    pub report_tracker: Arc<Mutex<ReportTracker>>,
}

impl FromRef<AppState> for AnalyticsState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            local_timezone: state.local_timezone.clone(),
            date_format: state.date_format,
            report_tracker: state.report_tracker.clone(),
        }
    }
}

/// The selectors of the analytics form. Missing selectors use their defaults.
#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    #[serde(default)]
    range: TimeRange,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    start: Option<Date>,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    end: Option<Date>,
    #[serde(default)]
    metric: Metric,
    #[serde(default)]
    tab: ReportTab,
    /// The page session that sent a chart request, see [SessionId].
    #[serde(default)]
    session: Option<u64>,
}

impl AnalyticsQuery {
    fn to_request(&self, date_format: DateFormat) -> ReportRequest {
        ReportRequest {
            range: self.range,
            custom: CustomRange {
                start: self.start,
                end: self.end,
            },
            metric: self.metric,
            tab: self.tab,
            date_format,
        }
    }
}

/// The result of asking for a new report.
enum ChartOutcome {
    /// The custom range is incomplete. The last report, if any, stays on screen.
    Prompt {
        message: String,
        previous: Option<Arc<Report>>,
    },
    Ready(Arc<Report>),
    Failed(String),
    /// A newer request replaced this one while it was being built.
    Superseded,
}

/// Display the analytics page for the selection in the query string.
///
/// The page always shows the report built for this request. It also opens a
/// new session in the report tracker, which the page's chart requests echo
/// back so they are only ever superseded by requests from the same page.
pub async fn get_analytics_page(
    State(state): State<AnalyticsState>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Response, Error> {
    let request = query.to_request(state.date_format);
    let today = local_today(&state.local_timezone)?;

    let outcome = build_page_report(&state, &request, today);
    let page_report = match &outcome {
        ChartOutcome::Ready(report) => Some(report.clone()),
        _ => None,
    };
    let session = lock_tracker(&state).open_session(page_report);

    let status = match outcome {
        ChartOutcome::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };

    Ok((status, analytics_view(&request, session, &outcome)).into_response())
}

/// Render the chart section for the selection in the query string.
///
/// Responds with 204 No Content if the same page made a newer request while
/// this one was being built, so htmx keeps the newer chart.
pub async fn get_analytics_chart(
    State(state): State<AnalyticsState>,
    Query(query): Query<AnalyticsQuery>,
) -> Response {
    let request = query.to_request(state.date_format);
    let session = match query.session {
        Some(session) => SessionId(session),
        None => lock_tracker(&state).open_session(None),
    };

    match refresh_report(&state, session, &request) {
        Ok(outcome) => chart_response(&request, &outcome),
        Err(error) => error.into_alert_response(),
    }
}

fn chart_response(request: &ReportRequest, outcome: &ChartOutcome) -> Response {
    match outcome {
        ChartOutcome::Superseded => StatusCode::NO_CONTENT.into_response(),
        outcome => (
            HxPushUrl(page_url(request)),
            chart_section_content(outcome),
        )
            .into_response(),
    }
}

/// Build the report for a full page load, outside of any session.
fn build_page_report(state: &AnalyticsState, request: &ReportRequest, today: Date) -> ChartOutcome {
    if let Err(Error::InvalidSelection(message)) =
        resolve_window(request.range, request.custom, today)
    {
        return ChartOutcome::Prompt {
            message,
            previous: None,
        };
    }

    let result = state
        .db_connection
        .lock()
        .inspect_err(|error| tracing::error!("could not acquire database lock: {error}"))
        .map_err(|_| Error::DatabaseLockError)
        .and_then(|connection| build_report(request, today, &connection));

    match result {
        Ok(report) => ChartOutcome::Ready(Arc::new(report)),
        Err(error) => ChartOutcome::Failed(error.to_string()),
    }
}

/// Build the report for `request` and make it the current report of
/// `session`, unless the session made a newer request in the meantime.
///
/// # Errors
/// Returns an error if the timezone is invalid.
fn refresh_report(
    state: &AnalyticsState,
    session: SessionId,
    request: &ReportRequest,
) -> Result<ChartOutcome, Error> {
    let today = local_today(&state.local_timezone)?;

    if let Err(error) = resolve_window(request.range, request.custom, today) {
        return match error {
            Error::InvalidSelection(message) => {
                let previous = match lock_tracker(state).state(session) {
                    ReportState::Ready { report, .. } => Some(report.clone()),
                    _ => None,
                };
                Ok(ChartOutcome::Prompt { message, previous })
            }
            error => Err(error),
        };
    }

    let generation = lock_tracker(state).begin(session);

    // The tracker is not locked while the report is built so newer requests
    // can start in the meantime.
    let result = state
        .db_connection
        .lock()
        .inspect_err(|error| tracing::error!("could not acquire database lock: {error}"))
        .map_err(|_| Error::DatabaseLockError)
        .and_then(|connection| build_report(request, today, &connection));

    let outcome = match lock_tracker(state).finish(generation, result) {
        Finish::Ready(report) => ChartOutcome::Ready(report),
        Finish::Failed(message) => ChartOutcome::Failed(message),
        Finish::Superseded => ChartOutcome::Superseded,
    };

    Ok(outcome)
}

fn lock_tracker(state: &AnalyticsState) -> MutexGuard<'_, ReportTracker> {
    // Every update leaves the tracker in a valid state, so a poisoned lock is safe to reuse.
    state
        .report_tracker
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn page_url(request: &ReportRequest) -> String {
    let optional_date =
        |date: Option<Date>| date.map(|date| date.to_string()).unwrap_or_default();

    format!(
        "{}?range={}&start={}&end={}&metric={}&tab={}",
        endpoints::ANALYTICS_VIEW,
        request.range.as_query_value(),
        optional_date(request.custom.start),
        optional_date(request.custom.end),
        request.metric.as_query_value(),
        request.tab.as_query_value(),
    )
}

fn analytics_view(request: &ReportRequest, session: SessionId, outcome: &ChartOutcome) -> Markup {
    let nav_bar = NavBar::new(endpoints::ANALYTICS_VIEW).into_html();

    let content = html!(
        (nav_bar)

        div class=(PAGE_CONTAINER_STYLE)
        {
            div class="w-full max-w-screen-xl"
            {
                h1 class="text-2xl font-bold mb-4" { "Sales Analytics" }

                (selection_form(request, session))

                section
                    id=(CHART_SECTION_ID)
                    class="w-full mx-auto mt-4 mb-4"
                {
                    (chart_section_content(outcome))
                }
            }
        }
    );

    base("Analytics", &content)
}

fn selection_form(request: &ReportRequest, session: SessionId) -> Markup {
    let optional_date =
        |date: Option<Date>| date.map(|date| date.to_string()).unwrap_or_default();

    html!(
        form
            id="analytics-form"
            hx-get=(endpoints::ANALYTICS_CHART)
            hx-target={ "#" (CHART_SECTION_ID) }
            hx-target-error="#alert-container"
            hx-swap="innerHTML"
            hx-trigger="change"
            class="grid grid-cols-1 md:grid-cols-2 xl:grid-cols-4 gap-4
                bg-gray-50 dark:bg-gray-800 p-4 rounded-lg"
        {
            input type="hidden" name="session" value=(session.0);

            div
            {
                label for="range" class=(FORM_LABEL_STYLE) { "Time range" }

                select id="range" name="range" class=(FORM_SELECT_STYLE)
                {
                    @for range in TimeRange::ALL {
                        option
                            value=(range.as_query_value())
                            selected[range == request.range]
                        {
                            (range.label())
                        }
                    }
                }
            }

            div class="flex gap-2"
            {
                div class="w-full"
                {
                    label for="start" class=(FORM_LABEL_STYLE) { "From" }
                    input
                        id="start"
                        name="start"
                        type="date"
                        value=(optional_date(request.custom.start))
                        class=(FORM_SELECT_STYLE);
                }

                div class="w-full"
                {
                    label for="end" class=(FORM_LABEL_STYLE) { "To" }
                    input
                        id="end"
                        name="end"
                        type="date"
                        value=(optional_date(request.custom.end))
                        class=(FORM_SELECT_STYLE);
                }
            }

            fieldset
            {
                legend class=(FORM_LABEL_STYLE) { "Metric" }

                div class="flex gap-2"
                {
                    @for metric in Metric::ALL {
                        label
                        {
                            input
                                type="radio"
                                name="metric"
                                value=(metric.as_query_value())
                                checked[metric == request.metric]
                                class=(FORM_RADIO_INPUT_STYLE);
                            span class=(FORM_RADIO_LABEL_STYLE) { (metric.label()) }
                        }
                    }
                }
            }

            fieldset
            {
                legend class=(FORM_LABEL_STYLE) { "View" }

                div class="flex flex-wrap gap-2"
                {
                    @for tab in ReportTab::ALL {
                        label
                        {
                            input
                                type="radio"
                                name="tab"
                                value=(tab.as_query_value())
                                checked[tab == request.tab]
                                class=(FORM_RADIO_INPUT_STYLE);
                            span class=(FORM_RADIO_LABEL_STYLE) { (tab.label()) }
                        }
                    }
                }
            }
        }
    )
}

fn chart_section_content(outcome: &ChartOutcome) -> Markup {
    match outcome {
        ChartOutcome::Ready(report) => report_view(report),
        ChartOutcome::Prompt { message, previous } => html!(
            p
                id="selection-prompt"
                class="p-4 mb-4 text-sm text-blue-800 rounded-lg bg-blue-50
                    dark:bg-gray-800 dark:text-blue-400"
            {
                "Waiting for a complete date range: " (message) "."
            }

            @if let Some(report) = previous {
                (report_view(report))
            }
        ),
        ChartOutcome::Failed(message) => {
            alert(message, "Try again later or check the server logs.")
        }
        ChartOutcome::Superseded => html!(),
    }
}

fn report_view(report: &Report) -> Markup {
    let chart = &report.chart;
    let options = chart_options(chart, report.request.tab.chart_title());

    let date_format = report.request.date_format;

    html!(
        @if let DateWindow::Bounded { start, end } = report.window {
            p id="window-caption" class="mb-2 text-sm text-gray-600 dark:text-gray-400"
            {
                (date_format.format(start)) " to " (date_format.format(end))
            }
        }

        (chart_view(CHART_ID, &options))

        @if chart.is_empty() {
            p id="no-sales" class="mt-4 text-center text-gray-600 dark:text-gray-400"
            {
                "No sales in this range."
            }
        } @else {
            div class="relative overflow-x-auto shadow-md sm:rounded-lg mt-4"
            {
                table class="w-full text-sm text-left rtl:text-right text-gray-500 dark:text-gray-400"
                {
                    thead class=(TABLE_HEADER_STYLE)
                    {
                        tr
                        {
                            th scope="col" class=(TABLE_CELL_STYLE) { "Series" }
                            th scope="col" class=(TABLE_CELL_STYLE) { "Total" }
                        }
                    }

                    tbody
                    {
                        @for (label, total) in chart.totals() {
                            tr class=(TABLE_ROW_STYLE)
                            {
                                td class=(TABLE_CELL_STYLE) { (label) }
                                td class=(TABLE_CELL_STYLE)
                                {
                                    @match chart.metric {
                                        Metric::Revenue => { (format_currency(total)) }
                                        Metric::Quantity => { (total) }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    )
}
