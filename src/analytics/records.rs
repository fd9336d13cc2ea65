//! Database queries for the sale records the analytics charts are built from.
//!
//! Records are a flattened view of sales (or their line items) containing
//! only what the aggregation needs: the day, the amount, the quantity and
//! the campaign or product the sale is attributed to.

use rusqlite::{Connection, params_from_iter};
use time::Date;

use crate::{Error, analytics::range::DateWindow};

/// One observed sale event.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleRecord {
    pub date: Date,
    /// Money taken, in currency units.
    pub amount: f64,
    /// Units sold, at least 1.
    pub quantity: u64,
    /// Campaign ID or product ID, depending on the query.
    /// `None` if the sale is not attributed to one.
    pub dimension_key: Option<String>,
}

/// Gets one record per sale in `window`, keyed by the campaign the sale is
/// attributed to.
///
/// Each sale counts as a quantity of 1. Records are ordered by date and
/// then by order ID.
///
/// # Errors
/// Returns [Error::SqlError] if the SQL query fails.
pub fn get_sale_records(
    window: &DateWindow,
    connection: &Connection,
) -> Result<Vec<SaleRecord>, Error> {
    let (filter, params) = window_filter("date_created", window);
    let query = format!(
        "SELECT date_created, order_total, campaign_id
        FROM sale
        {filter}
        ORDER BY date_created ASC, id ASC"
    );

    let mut stmt = connection.prepare(&query)?;
    stmt.query_map(params_from_iter(params), |row| {
        Ok(SaleRecord {
            date: row.get(0)?,
            amount: row.get(1)?,
            quantity: 1,
            dimension_key: row.get(2)?,
        })
    })?
    .collect::<Result<Vec<SaleRecord>, rusqlite::Error>>()
    .map_err(|error| error.into())
}

/// Gets one record per sale line item in `window`, keyed by product ID.
///
/// The amount is `unit_price × quantity` and the date is the date of the
/// sale the item belongs to.
///
/// # Errors
/// Returns [Error::SqlError] if the SQL query fails.
pub fn get_sale_item_records(
    window: &DateWindow,
    connection: &Connection,
) -> Result<Vec<SaleRecord>, Error> {
    let (filter, params) = window_filter("s.date_created", window);
    let query = format!(
        "SELECT s.date_created, i.unit_price, i.quantity, i.product_id
        FROM sale_item i
        INNER JOIN sale s ON s.id = i.sale_id
        {filter}
        ORDER BY s.date_created ASC, s.id ASC, i.id ASC"
    );

    let mut stmt = connection.prepare(&query)?;
    stmt.query_map(params_from_iter(params), |row| {
        let unit_price: f64 = row.get(1)?;
        let quantity: i64 = row.get(2)?;
        let product_id: Option<i64> = row.get(3)?;

        Ok(SaleRecord {
            date: row.get(0)?,
            amount: unit_price * quantity as f64,
            quantity: quantity.max(1) as u64,
            dimension_key: product_id.map(|id| id.to_string()),
        })
    })?
    .collect::<Result<Vec<SaleRecord>, rusqlite::Error>>()
    .map_err(|error| error.into())
}

fn window_filter(column: &str, window: &DateWindow) -> (String, Vec<Date>) {
    match *window {
        DateWindow::Bounded { start, end } => {
            (format!("WHERE {column} BETWEEN ?1 AND ?2"), vec![start, end])
        }
        DateWindow::Unbounded => (String::new(), Vec::new()),
    }
}
