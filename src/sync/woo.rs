//! Orders exported from the WooCommerce REST API.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    Error,
    campaign::Campaign,
    product::Product,
    sale::{Attribution, Sale, SaleItem},
    sync::meta::parse_date,
};

/// An order as returned by the orders endpoint of the store API.
#[derive(Debug, Clone, Deserialize)]
pub struct WooOrder {
    pub id: i64,
    /// Local timestamp, e.g. "2024-03-01T10:15:00".
    pub date_created: String,
    pub status: String,
    pub total: String,
    #[serde(default)]
    pub line_items: Vec<WooLineItem>,
    #[serde(default)]
    pub meta_data: Vec<WooMeta>,
}

/// A product line of a [WooOrder].
#[derive(Debug, Clone, Deserialize)]
pub struct WooLineItem {
    pub id: i64,
    /// Zero when the product has since been deleted from the store.
    #[serde(default)]
    pub product_id: i64,
    pub name: String,
    pub quantity: i64,
    pub price: f64,
    pub total: String,
    #[serde(default)]
    pub meta_data: Vec<WooMeta>,
}

/// A key-value pair attached to an order or line item by the store or its plugins.
#[derive(Debug, Clone, Deserialize)]
pub struct WooMeta {
    pub key: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

const ATTRIBUTION_PREFIX: &str = "_wc_order_attribution_";
const BUMP_PURCHASE_KEY: &str = "_bump_purchase";

time::serde::format_description!(summary_date, Date, "[year]-[month]-[day]");

/// Counts describing a batch of imported orders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderSummary {
    pub total_orders: usize,
    pub orders_with_utm: usize,
    pub orders_without_utm: usize,
    /// The number of distinct `utm_campaign` values.
    pub unique_campaigns: usize,
    #[serde(with = "summary_date::option")]
    pub first_order_date: Option<Date>,
    #[serde(with = "summary_date::option")]
    pub last_order_date: Option<Date>,
}

impl OrderSummary {
    /// Summarize `sales` that have already been converted from orders.
    pub fn from_sales(sales: &[Sale]) -> Self {
        let orders_with_utm = sales
            .iter()
            .filter(|sale| sale.attribution.utm_campaign.is_some())
            .count();
        let unique_campaigns = sales
            .iter()
            .filter_map(|sale| sale.attribution.utm_campaign.as_deref())
            .collect::<HashSet<_>>()
            .len();

        Self {
            total_orders: sales.len(),
            orders_with_utm,
            orders_without_utm: sales.len() - orders_with_utm,
            unique_campaigns,
            first_order_date: sales.iter().map(|sale| sale.date_created).min(),
            last_order_date: sales.iter().map(|sale| sale.date_created).max(),
        }
    }
}

/// Convert an order into a [Sale], attributing it to one of `campaigns`.
///
/// The order's `utm_campaign` is matched against the campaign IDs first and
/// then, ignoring case, against the campaign names. Orders without a match
/// are stored as organic sales.
///
/// # Errors
/// Returns [Error::InvalidPayload] if the order date or a total cannot be
/// parsed, or if a line item has a negative quantity.
pub fn to_sale(order: &WooOrder, campaigns: &[Campaign]) -> Result<Sale, Error> {
    let attribution = extract_attribution(&order.meta_data);
    let campaign_id = attribution
        .utm_campaign
        .as_deref()
        .and_then(|utm_campaign| match_campaign(utm_campaign, campaigns))
        .map(|campaign| campaign.id.clone());

    let items = order
        .line_items
        .iter()
        .map(to_sale_item)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| match error {
            Error::InvalidPayload(message) => {
                Error::InvalidPayload(format!("order {}: {message}", order.id))
            }
            error => error,
        })?;

    Ok(Sale {
        id: order.id,
        date_created: parse_date(&order.date_created)?,
        order_status: order.status.clone(),
        order_total: parse_amount(&order.total)
            .map_err(|message| Error::InvalidPayload(format!("order {}: {message}", order.id)))?,
        campaign_id,
        attribution,
        has_bump: items.iter().any(|item| item.is_bump),
        items,
    })
}

/// The products referenced by an order's line items.
///
/// Line items for deleted products have no product ID and are skipped.
pub fn to_products(order: &WooOrder) -> impl Iterator<Item = Product> + '_ {
    order
        .line_items
        .iter()
        .filter(|item| item.product_id > 0)
        .map(|item| Product {
            id: item.product_id,
            name: item.name.clone(),
            price: Some(item.price),
        })
}

fn to_sale_item(item: &WooLineItem) -> Result<SaleItem, Error> {
    if item.quantity < 0 {
        return Err(Error::InvalidPayload(format!(
            "line item {} has a negative quantity",
            item.id
        )));
    }

    Ok(SaleItem {
        id: item.id,
        product_id: (item.product_id > 0).then_some(item.product_id),
        product_name: item.name.clone(),
        quantity: item.quantity,
        unit_price: item.price,
        line_total: parse_amount(&item.total).map_err(Error::InvalidPayload)?,
        is_bump: item
            .meta_data
            .iter()
            .any(|meta| meta.key == BUMP_PURCHASE_KEY),
    })
}

/// Read the order attribution meta data the store records at checkout.
fn extract_attribution(meta_data: &[WooMeta]) -> Attribution {
    let mut attribution = Attribution::default();

    for meta in meta_data {
        let Some(name) = meta.key.strip_prefix(ATTRIBUTION_PREFIX) else {
            continue;
        };

        let field = match name {
            "utm_campaign" => &mut attribution.utm_campaign,
            "utm_source" => &mut attribution.utm_source,
            "utm_medium" => &mut attribution.utm_medium,
            "utm_content" => &mut attribution.utm_content,
            "utm_term" => &mut attribution.utm_term,
            "source_type" => &mut attribution.traffic_source_type,
            "device_type" => &mut attribution.device_type,
            "referrer" => &mut attribution.referrer,
            _ => continue,
        };

        *field = meta_text(&meta.value);
    }

    attribution
}

fn meta_text(value: &serde_json::Value) -> Option<String> {
    let text = match value {
        serde_json::Value::String(text) => text.trim().to_owned(),
        serde_json::Value::Number(number) => number.to_string(),
        _ => return None,
    };

    (!text.is_empty()).then_some(text)
}

fn match_campaign<'a>(utm_campaign: &str, campaigns: &'a [Campaign]) -> Option<&'a Campaign> {
    campaigns
        .iter()
        .find(|campaign| campaign.id == utm_campaign)
        .or_else(|| {
            let utm_campaign = utm_campaign.to_lowercase();
            campaigns
                .iter()
                .find(|campaign| campaign.name.to_lowercase() == utm_campaign)
        })
}

fn parse_amount(text: &str) -> Result<f64, String> {
    text.trim()
        .parse()
        .ok()
        .filter(|amount: &f64| amount.is_finite())
        .ok_or_else(|| format!("amount \"{text}\" is not a number"))
}
