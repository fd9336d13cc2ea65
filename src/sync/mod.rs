//! Import of campaign and order data fetched from upstream platforms.
//!
//! The ad account (Meta) and the web store (WooCommerce) are queried
//! elsewhere; this module receives their JSON payloads, validates every
//! element and upserts the result into the database.

mod meta;
mod woo;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use axum::{
    Json,
    extract::{FromRef, State, rejection::JsonRejection},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::{
    AppState, Error,
    campaign::{Campaign, get_all_campaigns, upsert_campaign},
    product::upsert_product,
    sale::upsert_sale,
};

use meta::{MetaCampaign, MetaCampaignInsight, to_campaign};
use woo::{OrderSummary, WooOrder, to_products, to_sale};

/// A payload from one upstream platform, tagged by its `source` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "source")]
pub enum UpstreamPayload {
    /// Campaigns and their lifetime insights from the ad account.
    #[serde(rename = "meta")]
    Meta {
        /// The campaigns to upsert.
        campaigns: Vec<MetaCampaign>,
        /// Insights keyed by `campaign_id`. Campaigns without one have not spent anything.
        #[serde(default)]
        insights: Vec<MetaCampaignInsight>,
    },
    /// Orders from the web store.
    #[serde(rename = "woocommerce")]
    WooCommerce {
        /// The orders to upsert.
        orders: Vec<WooOrder>,
    },
}

/// What an import wrote to the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    /// The number of campaigns inserted or updated.
    pub campaigns_synced: usize,
    /// The number of orders inserted or updated.
    pub orders_synced: usize,
    /// Counts describing the imported orders, only set for order imports.
    pub summary: Option<OrderSummary>,
}

/// Validate `payload` and upsert its contents.
///
/// Every element is converted before anything is written, and all writes
/// happen in one transaction, so an invalid payload leaves the database
/// untouched.
///
/// # Errors
/// Returns [Error::InvalidPayload] if any element fails validation, or
/// [Error::SqlError] if the database could not be updated.
pub fn import_payload(
    payload: UpstreamPayload,
    connection: &Connection,
) -> Result<SyncReport, Error> {
    match payload {
        UpstreamPayload::Meta {
            campaigns,
            insights,
        } => import_campaigns(&campaigns, &insights, connection),
        UpstreamPayload::WooCommerce { orders } => import_orders(&orders, connection),
    }
}

fn import_campaigns(
    campaigns: &[MetaCampaign],
    insights: &[MetaCampaignInsight],
    connection: &Connection,
) -> Result<SyncReport, Error> {
    let insights: HashMap<&str, &MetaCampaignInsight> = insights
        .iter()
        .map(|insight| (insight.campaign_id.as_str(), insight))
        .collect();

    let campaigns = campaigns
        .iter()
        .map(|campaign| to_campaign(campaign, insights.get(campaign.id.as_str()).copied()))
        .collect::<Result<Vec<Campaign>, Error>>()?;

    let transaction = connection.unchecked_transaction()?;

    for campaign in &campaigns {
        upsert_campaign(campaign, &transaction)?;
    }

    transaction.commit()?;

    tracing::info!("Imported {} campaigns", campaigns.len());

    Ok(SyncReport {
        campaigns_synced: campaigns.len(),
        orders_synced: 0,
        summary: None,
    })
}

fn import_orders(orders: &[WooOrder], connection: &Connection) -> Result<SyncReport, Error> {
    let campaigns = get_all_campaigns(connection)?;

    let sales = orders
        .iter()
        .map(|order| to_sale(order, &campaigns))
        .collect::<Result<Vec<_>, Error>>()?;

    let transaction = connection.unchecked_transaction()?;

    // Line items reference products, so products go in first.
    for product in orders.iter().flat_map(to_products) {
        upsert_product(&product, &transaction)?;
    }

    for sale in &sales {
        upsert_sale(sale, &transaction)?;
    }

    transaction.commit()?;

    let summary = OrderSummary::from_sales(&sales);
    tracing::info!(
        "Imported {} orders, {} with UTM parameters",
        summary.total_orders,
        summary.orders_with_utm
    );

    Ok(SyncReport {
        campaigns_synced: 0,
        orders_synced: sales.len(),
        summary: Some(summary),
    })
}

/// The state needed for importing upstream payloads.
#[derive(Debug, Clone)]
pub struct SyncState {
    /// The database connection the payload is written to.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for SyncState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// Route handler for importing a campaign or order payload.
///
/// Responds with a JSON [SyncReport], or with status 422 and a JSON error
/// message if the body is not a known payload or fails validation.
pub async fn post_sync(
    State(state): State<SyncState>,
    payload: Result<Json<UpstreamPayload>, JsonRejection>,
) -> Result<Json<SyncReport>, Error> {
    let Json(payload) = payload.map_err(|rejection| {
        tracing::error!("could not read sync payload: {rejection}");
        Error::InvalidPayload(rejection.body_text())
    })?;

    let connection = state
        .db_connection
        .lock()
        .inspect_err(|error| tracing::error!("could not acquire database lock: {error}"))
        .map_err(|_| Error::DatabaseLockError)?;

    import_payload(payload, &connection)
        .inspect_err(|error| tracing::error!("could not import sync payload: {error}"))
        .map(Json)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
    use rusqlite::Connection;
    use serde_json::json;

    use crate::{
        Error,
        campaign::get_all_campaigns,
        db::initialize,
        product::get_product_names,
        sale::count_sales,
    };

    use super::{SyncState, UpstreamPayload, import_payload, post_sync};

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    fn meta_payload() -> UpstreamPayload {
        serde_json::from_value(json!({
            "source": "meta",
            "campaigns": [
                {
                    "id": "120200",
                    "name": "Spring Launch",
                    "status": "ACTIVE",
                    "daily_budget": "2500",
                    "start_time": "2024-03-01T09:30:00+1300"
                },
                { "id": "120300", "name": "Winter Sale" }
            ],
            "insights": [
                {
                    "campaign_id": "120200",
                    "spend": "40.00",
                    "impressions": "1200",
                    "clicks": "37",
                    "actions": [{ "action_type": "purchase", "value": "2" }],
                    "action_values": [{ "action_type": "purchase", "value": "100" }]
                }
            ]
        }))
        .unwrap()
    }

    fn woo_payload(utm_campaign: &str) -> UpstreamPayload {
        serde_json::from_value(json!({
            "source": "woocommerce",
            "orders": [
                {
                    "id": 501,
                    "date_created": "2024-03-02T10:15:00",
                    "status": "completed",
                    "total": "40.00",
                    "line_items": [
                        { "id": 1, "product_id": 7, "name": "Mug", "quantity": 2, "price": 20.0, "total": "40.00" }
                    ],
                    "meta_data": [
                        { "key": "_wc_order_attribution_utm_campaign", "value": utm_campaign }
                    ]
                },
                {
                    "id": 502,
                    "date_created": "2024-03-03T11:00:00",
                    "status": "processing",
                    "total": "15.50",
                    "line_items": [
                        { "id": 2, "product_id": 8, "name": "Tea Towel", "quantity": 1, "price": 15.5, "total": "15.50" }
                    ]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn imports_meta_campaigns() {
        let conn = get_test_connection();

        let report = import_payload(meta_payload(), &conn).unwrap();

        assert_eq!(report.campaigns_synced, 2);
        assert_eq!(report.summary, None);
        let campaigns = get_all_campaigns(&conn).unwrap();
        let spring = campaigns
            .iter()
            .find(|campaign| campaign.id == "120200")
            .unwrap();
        assert_eq!(spring.roas(), Some(2.5));
    }

    #[test]
    fn imports_orders_with_products_and_attribution() {
        let conn = get_test_connection();
        import_payload(meta_payload(), &conn).unwrap();

        let report = import_payload(woo_payload("Spring Launch"), &conn).unwrap();

        assert_eq!(report.orders_synced, 2);
        let summary = report.summary.unwrap();
        assert_eq!(summary.orders_with_utm, 1);
        assert_eq!(summary.orders_without_utm, 1);
        assert_eq!(count_sales(&conn).unwrap(), 2);

        let mut products = get_product_names(&conn).unwrap();
        products.sort();
        assert_eq!(
            products,
            vec![
                ("7".to_owned(), "Mug".to_owned()),
                ("8".to_owned(), "Tea Towel".to_owned())
            ]
        );

        let campaign_id: Option<String> = conn
            .query_row("SELECT campaign_id FROM sale WHERE id = 501", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(campaign_id.as_deref(), Some("120200"));
    }

    #[test]
    fn reimporting_orders_updates_in_place() {
        let conn = get_test_connection();

        import_payload(woo_payload("newsletter"), &conn).unwrap();
        import_payload(woo_payload("newsletter"), &conn).unwrap();

        assert_eq!(count_sales(&conn).unwrap(), 2);
    }

    #[test]
    fn invalid_element_writes_nothing() {
        let conn = get_test_connection();
        let payload: UpstreamPayload = serde_json::from_value(json!({
            "source": "meta",
            "campaigns": [
                { "id": "1", "name": "Good" },
                { "id": "2", "name": "Bad", "daily_budget": "a lot" }
            ]
        }))
        .unwrap();

        let result = import_payload(payload, &conn);

        assert!(matches!(result, Err(Error::InvalidPayload(_))));
        assert!(get_all_campaigns(&conn).unwrap().is_empty());
    }

    #[test]
    fn unknown_source_is_rejected() {
        let result = serde_json::from_value::<UpstreamPayload>(json!({
            "source": "shopify",
            "orders": []
        }));

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn post_sync_returns_report() {
        let state = SyncState {
            db_connection: Arc::new(Mutex::new(get_test_connection())),
        };

        let Json(report) = post_sync(State(state), Ok(Json(meta_payload())))
            .await
            .unwrap();

        assert_eq!(report.campaigns_synced, 2);
    }

    #[tokio::test]
    async fn post_sync_rejects_invalid_payload_with_422() {
        let state = SyncState {
            db_connection: Arc::new(Mutex::new(get_test_connection())),
        };
        let payload: UpstreamPayload = serde_json::from_value(json!({
            "source": "woocommerce",
            "orders": [
                { "id": 1, "date_created": "not a date", "status": "completed", "total": "1.00" }
            ]
        }))
        .unwrap();

        let response = post_sync(State(state), Ok(Json(payload)))
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
