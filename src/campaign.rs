//! Ad campaigns: storage, status and return on ad spend, and the campaigns page.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{FromRef, State},
    response::{IntoResponse, Response},
};
use maud::{Markup, html};
use rusqlite::{Connection, Row};
use time::Date;

use crate::{
    AppState, Error, endpoints,
    html::{
        BADGE_STYLE, PAGE_CONTAINER_STYLE, TABLE_CELL_STYLE, TABLE_HEADER_STYLE, TABLE_ROW_STYLE,
        base, format_currency,
    },
    navigation::NavBar,
    timezone::local_today,
};

/// An ad campaign with the lifetime performance figures reported by the ad platform.
#[derive(Debug, Clone, PartialEq)]
pub struct Campaign {
    /// The ID assigned by the ad platform.
    pub id: String,
    /// The display name of the campaign.
    pub name: String,
    /// The daily or lifetime budget, in currency units.
    pub budget: Option<f64>,
    /// Total amount spent.
    pub spend: f64,
    /// Number of times an ad was shown.
    pub impressions: i64,
    /// Number of clicks on an ad.
    pub clicks: i64,
    /// Number of purchases attributed to the campaign by the ad platform.
    pub purchases: i64,
    /// Value of the purchases attributed to the campaign by the ad platform.
    pub purchase_value: f64,
    /// The day the campaign started.
    pub start_date: Option<Date>,
    /// The day the campaign stopped, if it has a scheduled end.
    pub end_date: Option<Date>,
}

impl Campaign {
    /// Return on ad spend: purchase value divided by spend.
    ///
    /// Returns `None` when nothing has been spent.
    pub fn roas(&self) -> Option<f64> {
        if self.spend == 0.0 {
            None
        } else {
            Some(self.purchase_value / self.spend)
        }
    }

    /// Whether the campaign is yet to start, running or over on `today`.
    pub fn status(&self, today: Date) -> CampaignStatus {
        match (self.start_date, self.end_date) {
            (Some(start), _) if today < start => CampaignStatus::Upcoming,
            (_, Some(end)) if today > end => CampaignStatus::Completed,
            _ => CampaignStatus::Active,
        }
    }
}

/// Where a campaign is in its schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignStatus {
    /// The start date is in the future.
    Upcoming,
    /// The campaign has started and not yet ended.
    Active,
    /// The end date has passed.
    Completed,
}

impl CampaignStatus {
    fn label(self) -> &'static str {
        match self {
            Self::Upcoming => "Upcoming",
            Self::Active => "Active",
            Self::Completed => "Completed",
        }
    }
}

/// Format a return on ad spend value, e.g. "2.50x".
pub fn format_roas(roas: Option<f64>) -> String {
    match roas {
        Some(roas) => format!("{roas:.2}x"),
        None => "N/A".to_owned(),
    }
}

/// Create the campaign table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_campaign_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS campaign (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            budget REAL,
            spend REAL NOT NULL DEFAULT 0,
            impressions INTEGER NOT NULL DEFAULT 0,
            clicks INTEGER NOT NULL DEFAULT 0,
            purchases INTEGER NOT NULL DEFAULT 0,
            purchase_value REAL NOT NULL DEFAULT 0,
            start_date TEXT,
            end_date TEXT,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        (),
    )?;

    Ok(())
}

/// Insert a campaign, or replace the stored figures if the ID already exists.
///
/// # Errors
/// Returns [Error::SqlError] if the SQL query fails.
pub fn upsert_campaign(campaign: &Campaign, connection: &Connection) -> Result<(), Error> {
    connection.execute(
        "INSERT INTO campaign (
            id, name, budget, spend, impressions, clicks, purchases, purchase_value,
            start_date, end_date, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, CURRENT_TIMESTAMP)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            budget = excluded.budget,
            spend = excluded.spend,
            impressions = excluded.impressions,
            clicks = excluded.clicks,
            purchases = excluded.purchases,
            purchase_value = excluded.purchase_value,
            start_date = excluded.start_date,
            end_date = excluded.end_date,
            updated_at = CURRENT_TIMESTAMP",
        (
            &campaign.id,
            &campaign.name,
            campaign.budget,
            campaign.spend,
            campaign.impressions,
            campaign.clicks,
            campaign.purchases,
            campaign.purchase_value,
            campaign.start_date,
            campaign.end_date,
        ),
    )?;

    Ok(())
}

/// Get all campaigns, most recently started first.
///
/// # Errors
/// Returns [Error::SqlError] if the SQL query fails.
pub fn get_all_campaigns(connection: &Connection) -> Result<Vec<Campaign>, Error> {
    connection
        .prepare(
            "SELECT id, name, budget, spend, impressions, clicks, purchases, purchase_value,
                start_date, end_date
            FROM campaign
            ORDER BY start_date DESC, name ASC",
        )?
        .query_map([], map_campaign_row)?
        .collect::<Result<Vec<Campaign>, rusqlite::Error>>()
        .map_err(|error| error.into())
}

/// Get the `(id, name)` pairs used to label campaigns in charts.
///
/// # Errors
/// Returns [Error::SqlError] if the SQL query fails.
pub fn get_campaign_names(connection: &Connection) -> Result<Vec<(String, String)>, Error> {
    connection
        .prepare("SELECT id, name FROM campaign")?
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<(String, String)>, rusqlite::Error>>()
        .map_err(|error| error.into())
}

fn map_campaign_row(row: &Row) -> Result<Campaign, rusqlite::Error> {
    Ok(Campaign {
        id: row.get(0)?,
        name: row.get(1)?,
        budget: row.get(2)?,
        spend: row.get(3)?,
        impressions: row.get(4)?,
        clicks: row.get(5)?,
        purchases: row.get(6)?,
        purchase_value: row.get(7)?,
        start_date: row.get(8)?,
        end_date: row.get(9)?,
    })
}

/// The state needed for the campaigns page.
#[derive(Debug, Clone)]
pub struct CampaignsState {
    /// The database connection for reading campaigns.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The local timezone as a canonical timezone name, e.g. "Pacific/Auckland".
    pub local_timezone: String,
}

impl FromRef<AppState> for CampaignsState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            local_timezone: state.local_timezone.clone(),
        }
    }
}

/// Display a table of campaigns with their status and return on ad spend.
pub async fn get_campaigns_page(State(state): State<CampaignsState>) -> Result<Response, Error> {
    let today = local_today(&state.local_timezone)?;

    let campaigns = {
        let connection = state
            .db_connection
            .lock()
            .inspect_err(|error| tracing::error!("could not acquire database lock: {error}"))
            .map_err(|_| Error::DatabaseLockError)?;

        get_all_campaigns(&connection)
            .inspect_err(|error| tracing::error!("could not get campaigns: {error}"))?
    };

    Ok(campaigns_view(&campaigns, today).into_response())
}

fn campaigns_view(campaigns: &[Campaign], today: Date) -> Markup {
    let nav_bar = NavBar::new(endpoints::CAMPAIGNS_VIEW).into_html();

    let content = html!(
        (nav_bar)

        div class=(PAGE_CONTAINER_STYLE)
        {
            h1 class="text-2xl font-bold mb-4" { "Campaigns" }

            @if campaigns.is_empty() {
                p { "No campaigns yet. Import campaigns from your ad account to see them here." }
            } @else {
                div class="relative overflow-x-auto shadow-md sm:rounded-lg w-full max-w-screen-xl"
                {
                    table class="w-full text-sm text-left rtl:text-right text-gray-500 dark:text-gray-400"
                    {
                        thead class=(TABLE_HEADER_STYLE)
                        {
                            tr
                            {
                                th scope="col" class=(TABLE_CELL_STYLE) { "Name" }
                                th scope="col" class=(TABLE_CELL_STYLE) { "Status" }
                                th scope="col" class=(TABLE_CELL_STYLE) { "Start" }
                                th scope="col" class=(TABLE_CELL_STYLE) { "End" }
                                th scope="col" class=(TABLE_CELL_STYLE) { "Spend" }
                                th scope="col" class=(TABLE_CELL_STYLE) { "Purchases" }
                                th scope="col" class=(TABLE_CELL_STYLE) { "Purchase Value" }
                                th scope="col" class=(TABLE_CELL_STYLE) { "ROAS" }
                            }
                        }

                        tbody
                        {
                            @for campaign in campaigns {
                                tr class=(TABLE_ROW_STYLE) data-campaign-id=(campaign.id)
                                {
                                    td class=(TABLE_CELL_STYLE) { (campaign.name) }
                                    td class=(TABLE_CELL_STYLE)
                                    {
                                        span class=(BADGE_STYLE) { (campaign.status(today).label()) }
                                    }
                                    td class=(TABLE_CELL_STYLE) { (optional_date(campaign.start_date)) }
                                    td class=(TABLE_CELL_STYLE) { (optional_date(campaign.end_date)) }
                                    td class=(TABLE_CELL_STYLE) { (format_currency(campaign.spend)) }
                                    td class=(TABLE_CELL_STYLE) { (campaign.purchases) }
                                    td class=(TABLE_CELL_STYLE) { (format_currency(campaign.purchase_value)) }
                                    td class=(TABLE_CELL_STYLE) { (format_roas(campaign.roas())) }
                                }
                            }
                        }
                    }
                }
            }
        }
    );

    base("Campaigns", &content)
}

fn optional_date(date: Option<Date>) -> String {
    date.map(|date| date.to_string()).unwrap_or_else(|| "-".to_owned())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{body::Body, extract::State, http::Response, http::StatusCode};
    use rusqlite::Connection;
    use scraper::{Html, Selector};
    use time::macros::date;

    use crate::db::initialize;

    use super::{
        Campaign, CampaignStatus, CampaignsState, format_roas, get_all_campaigns,
        get_campaign_names, get_campaigns_page, upsert_campaign,
    };

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    fn create_test_campaign(id: &str, name: &str) -> Campaign {
        Campaign {
            id: id.to_owned(),
            name: name.to_owned(),
            budget: Some(25.0),
            spend: 200.0,
            impressions: 10_000,
            clicks: 300,
            purchases: 12,
            purchase_value: 500.0,
            start_date: Some(date!(2024 - 03 - 01)),
            end_date: Some(date!(2024 - 03 - 31)),
        }
    }

    #[test]
    fn roas_divides_purchase_value_by_spend() {
        let campaign = create_test_campaign("1", "Spring");

        assert_eq!(campaign.roas(), Some(2.5));
        assert_eq!(format_roas(campaign.roas()), "2.50x");
    }

    #[test]
    fn roas_is_not_available_without_spend() {
        let campaign = Campaign {
            spend: 0.0,
            ..create_test_campaign("1", "Spring")
        };

        assert_eq!(campaign.roas(), None);
        assert_eq!(format_roas(campaign.roas()), "N/A");
    }

    #[test]
    fn status_follows_schedule() {
        let campaign = create_test_campaign("1", "Spring");

        assert_eq!(campaign.status(date!(2024 - 02 - 29)), CampaignStatus::Upcoming);
        assert_eq!(campaign.status(date!(2024 - 03 - 01)), CampaignStatus::Active);
        assert_eq!(campaign.status(date!(2024 - 03 - 31)), CampaignStatus::Active);
        assert_eq!(campaign.status(date!(2024 - 04 - 01)), CampaignStatus::Completed);
    }

    #[test]
    fn campaign_without_end_date_stays_active() {
        let campaign = Campaign {
            end_date: None,
            ..create_test_campaign("1", "Evergreen")
        };

        assert_eq!(campaign.status(date!(2030 - 01 - 01)), CampaignStatus::Active);
    }

    #[test]
    fn upsert_replaces_existing_campaign() {
        let conn = get_test_connection();
        let campaign = create_test_campaign("120", "Spring");
        upsert_campaign(&campaign, &conn).unwrap();

        let updated = Campaign {
            name: "Spring Sale".to_owned(),
            spend: 250.0,
            ..campaign
        };
        upsert_campaign(&updated, &conn).unwrap();

        let campaigns = get_all_campaigns(&conn).unwrap();
        assert_eq!(campaigns, vec![updated]);
    }

    #[test]
    fn get_campaign_names_returns_id_name_pairs() {
        let conn = get_test_connection();
        upsert_campaign(&create_test_campaign("1", "Spring"), &conn).unwrap();
        upsert_campaign(&create_test_campaign("2", "Summer"), &conn).unwrap();

        let mut names = get_campaign_names(&conn).unwrap();
        names.sort();

        assert_eq!(
            names,
            vec![
                ("1".to_owned(), "Spring".to_owned()),
                ("2".to_owned(), "Summer".to_owned())
            ]
        );
    }

    #[tokio::test]
    async fn campaigns_page_lists_campaigns() {
        let conn = get_test_connection();
        upsert_campaign(&create_test_campaign("1", "Spring"), &conn).unwrap();
        upsert_campaign(&create_test_campaign("2", "Summer"), &conn).unwrap();
        let state = CampaignsState {
            db_connection: Arc::new(Mutex::new(conn)),
            local_timezone: "Etc/UTC".to_owned(),
        };

        let response = get_campaigns_page(State(state)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let html = parse_html(response).await;
        let row_selector = Selector::parse("tbody tr").unwrap();
        let rows: Vec<_> = html.select(&row_selector).collect();
        assert_eq!(rows.len(), 2);
        let row_text = rows[0].text().collect::<String>();
        assert!(row_text.contains("2.50x"), "got row text {row_text}");
    }

    async fn parse_html(response: Response<Body>) -> Html {
        let body = response.into_body();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&body).to_string();

        Html::parse_document(&text)
    }
}
