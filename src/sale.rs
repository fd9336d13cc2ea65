//! Orders placed in the web store and their line items.

use rusqlite::Connection;
use time::Date;

use crate::Error;

/// Where an order came from, as recorded by the web store's order attribution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribution {
    /// The `utm_campaign` parameter, usually a campaign ID or name.
    pub utm_campaign: Option<String>,
    /// The `utm_source` parameter, e.g. "facebook".
    pub utm_source: Option<String>,
    /// The `utm_medium` parameter, e.g. "paid".
    pub utm_medium: Option<String>,
    /// The `utm_content` parameter, usually the ad.
    pub utm_content: Option<String>,
    /// The `utm_term` parameter.
    pub utm_term: Option<String>,
    /// How the visitor arrived, e.g. "utm", "organic" or "typein".
    pub traffic_source_type: Option<String>,
    /// "Mobile", "Desktop" or "Tablet".
    pub device_type: Option<String>,
    /// The referring URL.
    pub referrer: Option<String>,
}

/// A completed checkout in the web store.
#[derive(Debug, Clone, PartialEq)]
pub struct Sale {
    /// The order ID assigned by the web store.
    pub id: i64,
    /// The day the order was placed.
    pub date_created: Date,
    /// The web store's order status, e.g. "completed".
    pub order_status: String,
    /// The order total, in currency units.
    pub order_total: f64,
    /// The campaign the order is attributed to, `None` for organic orders.
    pub campaign_id: Option<String>,
    /// UTM parameters and traffic source of the order.
    pub attribution: Attribution,
    /// Whether any line item was an order bump.
    pub has_bump: bool,
    /// The products bought in this order.
    pub items: Vec<SaleItem>,
}

/// One product line of a [Sale].
#[derive(Debug, Clone, PartialEq)]
pub struct SaleItem {
    /// The line item ID assigned by the web store.
    pub id: i64,
    /// The product bought, if it still exists in the store.
    pub product_id: Option<i64>,
    /// The product name at the time of purchase.
    pub product_name: String,
    /// How many units were bought.
    pub quantity: i64,
    /// The price of a single unit.
    pub unit_price: f64,
    /// The total for the line, as charged.
    pub line_total: f64,
    /// Whether the line was added as an order bump.
    pub is_bump: bool,
}

/// Create the sale and sale_item tables in the database.
///
/// # Errors
/// Returns an error if the tables cannot be created or if there is an SQL error.
pub fn create_sale_tables(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS sale (
            id INTEGER PRIMARY KEY,
            date_created TEXT NOT NULL,
            order_status TEXT NOT NULL,
            order_total REAL NOT NULL,
            campaign_id TEXT,
            utm_campaign TEXT,
            utm_source TEXT,
            utm_medium TEXT,
            utm_content TEXT,
            utm_term TEXT,
            traffic_source_type TEXT,
            device_type TEXT,
            referrer TEXT,
            has_bump INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(campaign_id) REFERENCES campaign(id) ON UPDATE CASCADE ON DELETE SET NULL
        )",
        (),
    )?;

    connection.execute(
        "CREATE INDEX IF NOT EXISTS sale_date_created ON sale(date_created)",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS sale_item (
            id INTEGER PRIMARY KEY,
            sale_id INTEGER NOT NULL,
            product_id INTEGER,
            product_name TEXT NOT NULL,
            quantity INTEGER NOT NULL DEFAULT 1,
            unit_price REAL NOT NULL,
            line_total REAL NOT NULL,
            is_bump INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(sale_id) REFERENCES sale(id) ON UPDATE CASCADE ON DELETE CASCADE,
            FOREIGN KEY(product_id) REFERENCES product(id) ON UPDATE CASCADE ON DELETE SET NULL
        )",
        (),
    )?;

    Ok(())
}

/// Insert a sale, or update it if the order ID already exists.
///
/// The sale's line items are replaced with `sale.items`. Callers importing
/// many sales should wrap the calls in a single transaction.
///
/// # Errors
/// Returns [Error::SqlError] if any SQL query fails, e.g. when `campaign_id`
/// or a line item's `product_id` does not refer to a stored row.
pub fn upsert_sale(sale: &Sale, connection: &Connection) -> Result<(), Error> {
    let attribution = &sale.attribution;

    connection.execute(
        "INSERT INTO sale (
            id, date_created, order_status, order_total, campaign_id,
            utm_campaign, utm_source, utm_medium, utm_content, utm_term,
            traffic_source_type, device_type, referrer, has_bump
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        ON CONFLICT(id) DO UPDATE SET
            date_created = excluded.date_created,
            order_status = excluded.order_status,
            order_total = excluded.order_total,
            campaign_id = excluded.campaign_id,
            utm_campaign = excluded.utm_campaign,
            utm_source = excluded.utm_source,
            utm_medium = excluded.utm_medium,
            utm_content = excluded.utm_content,
            utm_term = excluded.utm_term,
            traffic_source_type = excluded.traffic_source_type,
            device_type = excluded.device_type,
            referrer = excluded.referrer,
            has_bump = excluded.has_bump",
        rusqlite::params![
            sale.id,
            sale.date_created,
            sale.order_status,
            sale.order_total,
            sale.campaign_id,
            attribution.utm_campaign,
            attribution.utm_source,
            attribution.utm_medium,
            attribution.utm_content,
            attribution.utm_term,
            attribution.traffic_source_type,
            attribution.device_type,
            attribution.referrer,
            sale.has_bump,
        ],
    )?;

    connection.execute("DELETE FROM sale_item WHERE sale_id = ?1", [sale.id])?;

    let mut stmt = connection.prepare(
        "INSERT INTO sale_item (
            id, sale_id, product_id, product_name, quantity, unit_price, line_total, is_bump
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;

    for item in &sale.items {
        stmt.execute(rusqlite::params![
            item.id,
            sale.id,
            item.product_id,
            item.product_name,
            item.quantity,
            item.unit_price,
            item.line_total,
            item.is_bump,
        ])?;
    }

    Ok(())
}

/// Count the stored sales.
///
/// # Errors
/// Returns [Error::SqlError] if the SQL query fails.
pub fn count_sales(connection: &Connection) -> Result<i64, Error> {
    let count: i64 = connection.query_row("SELECT COUNT(*) FROM sale", [], |row| row.get(0))?;

    Ok(count)
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use time::macros::date;

    use crate::{
        db::initialize,
        product::{Product, upsert_product},
    };

    use super::{Attribution, Sale, SaleItem, count_sales, upsert_sale};

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        upsert_product(
            &Product {
                id: 1,
                name: "Mug".to_owned(),
                price: Some(10.0),
            },
            &conn,
        )
        .unwrap();
        conn
    }

    fn create_test_sale(items: Vec<SaleItem>) -> Sale {
        Sale {
            id: 1001,
            date_created: date!(2024 - 03 - 01),
            order_status: "completed".to_owned(),
            order_total: 30.0,
            campaign_id: None,
            attribution: Attribution::default(),
            has_bump: false,
            items,
        }
    }

    fn create_test_item(id: i64, quantity: i64) -> SaleItem {
        SaleItem {
            id,
            product_id: Some(1),
            product_name: "Mug".to_owned(),
            quantity,
            unit_price: 10.0,
            line_total: 10.0 * quantity as f64,
            is_bump: false,
        }
    }

    fn count_items(conn: &Connection) -> i64 {
        conn.query_row("SELECT SUM(quantity) FROM sale_item", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn upsert_sale_inserts_sale_and_items() {
        let conn = get_test_connection();

        upsert_sale(&create_test_sale(vec![create_test_item(1, 3)]), &conn).unwrap();

        assert_eq!(count_sales(&conn).unwrap(), 1);
        assert_eq!(count_items(&conn), 3);
    }

    #[test]
    fn upsert_sale_replaces_line_items() {
        let conn = get_test_connection();
        upsert_sale(
            &create_test_sale(vec![create_test_item(1, 3), create_test_item(2, 1)]),
            &conn,
        )
        .unwrap();

        upsert_sale(&create_test_sale(vec![create_test_item(1, 2)]), &conn).unwrap();

        assert_eq!(count_sales(&conn).unwrap(), 1);
        assert_eq!(count_items(&conn), 2);
    }

    #[test]
    fn upsert_sale_rejects_unknown_campaign() {
        let conn = get_test_connection();
        let sale = Sale {
            campaign_id: Some("does-not-exist".to_owned()),
            ..create_test_sale(vec![])
        };

        let result = upsert_sale(&sale, &conn);

        assert!(result.is_err());
    }
}
