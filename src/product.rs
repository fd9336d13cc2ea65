//! Products sold in the web store, their price history and the products pages.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{FromRef, Path, State},
    response::{IntoResponse, Response},
};
use maud::{Markup, html};
use rusqlite::{Connection, Row};
use time::Date;

use crate::{
    AppState, Error,
    endpoints::{self, format_endpoint},
    html::{
        LINK_STYLE, PAGE_CONTAINER_STYLE, TABLE_CELL_STYLE, TABLE_HEADER_STYLE, TABLE_ROW_STYLE,
        base, format_currency,
    },
    navigation::NavBar,
};

/// A product as listed in the web store.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    /// The ID assigned by the web store.
    pub id: i64,
    /// The display name of the product.
    pub name: String,
    /// The current list price, if known.
    pub price: Option<f64>,
}

/// A product with how much of it has been sold.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductSummary {
    pub product: Product,
    /// Units sold over all stored sales. A line item with a quantity of 0
    /// counts as one unit, as in the sales charts.
    pub units_sold: i64,
    /// Unit price times quantity over all stored line items.
    pub revenue: f64,
}

/// A recorded list price of a product.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductPrice {
    pub price: f64,
    /// The day the price was first seen.
    pub recorded_on: Date,
}

/// Create the product and product price tables in the database.
///
/// # Errors
/// Returns an error if the tables cannot be created or if there is an SQL error.
pub fn create_product_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS product (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            price REAL
        )",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS product_price (
            id INTEGER PRIMARY KEY,
            product_id INTEGER NOT NULL,
            price REAL NOT NULL,
            recorded_on TEXT NOT NULL DEFAULT (date('now')),
            FOREIGN KEY(product_id) REFERENCES product(id) ON UPDATE CASCADE ON DELETE CASCADE
        )",
        (),
    )?;

    Ok(())
}

/// Insert a product, or update it if the ID already exists.
///
/// An empty name or missing price never overwrites a stored value, since
/// order line items only carry a snapshot of the product. A price that
/// differs from the last recorded one is added to the price history.
///
/// # Errors
/// Returns [Error::SqlError] if the SQL query fails.
pub fn upsert_product(product: &Product, connection: &Connection) -> Result<(), Error> {
    connection.execute(
        "INSERT INTO product (id, name, price) VALUES (?1, ?2, ?3)
        ON CONFLICT(id) DO UPDATE SET
            name = CASE WHEN excluded.name = '' THEN product.name ELSE excluded.name END,
            price = COALESCE(excluded.price, product.price)",
        (product.id, &product.name, product.price),
    )?;

    if let Some(price) = product.price {
        connection.execute(
            "INSERT INTO product_price (product_id, price)
            SELECT ?1, ?2
            WHERE ?2 IS NOT (
                SELECT price FROM product_price WHERE product_id = ?1 ORDER BY id DESC LIMIT 1
            )",
            (product.id, price),
        )?;
    }

    Ok(())
}

/// Get the product with `id`.
///
/// # Errors
/// Returns [Error::NotFound] if there is no such product, or
/// [Error::SqlError] if the SQL query fails.
pub fn get_product(id: i64, connection: &Connection) -> Result<Product, Error> {
    connection
        .query_row(
            "SELECT id, name, price FROM product WHERE id = ?1",
            [id],
            map_product_row,
        )
        .map_err(|error| error.into())
}

/// Get the `(id, name)` pairs used to label products in charts.
///
/// IDs are returned as strings so they can be matched against chart dimension keys.
///
/// # Errors
/// Returns [Error::SqlError] if the SQL query fails.
pub fn get_product_names(connection: &Connection) -> Result<Vec<(String, String)>, Error> {
    connection
        .prepare("SELECT id, name FROM product")?
        .query_map([], |row| {
            Ok((row.get::<_, i64>(0)?.to_string(), row.get(1)?))
        })?
        .collect::<Result<Vec<(String, String)>, rusqlite::Error>>()
        .map_err(|error| error.into())
}

/// Get every product with its units sold and revenue, ordered by name.
///
/// # Errors
/// Returns [Error::SqlError] if the SQL query fails.
pub fn get_product_summaries(connection: &Connection) -> Result<Vec<ProductSummary>, Error> {
    connection
        .prepare(
            "SELECT p.id, p.name, p.price,
                COALESCE(SUM(MAX(i.quantity, 1)), 0),
                COALESCE(SUM(i.unit_price * i.quantity), 0.0)
            FROM product p
            LEFT JOIN sale_item i ON i.product_id = p.id
            GROUP BY p.id
            ORDER BY p.name ASC, p.id ASC",
        )?
        .query_map([], |row| {
            Ok(ProductSummary {
                product: map_product_row(row)?,
                units_sold: row.get(3)?,
                revenue: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<ProductSummary>, rusqlite::Error>>()
        .map_err(|error| error.into())
}

/// Get the recorded prices of a product, newest first.
///
/// # Errors
/// Returns [Error::SqlError] if the SQL query fails.
pub fn get_price_history(
    product_id: i64,
    connection: &Connection,
) -> Result<Vec<ProductPrice>, Error> {
    connection
        .prepare(
            "SELECT price, recorded_on FROM product_price
            WHERE product_id = ?1
            ORDER BY id DESC",
        )?
        .query_map([product_id], |row| {
            Ok(ProductPrice {
                price: row.get(0)?,
                recorded_on: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<ProductPrice>, rusqlite::Error>>()
        .map_err(|error| error.into())
}

fn map_product_row(row: &Row) -> Result<Product, rusqlite::Error> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        price: row.get(2)?,
    })
}

/// The state needed for the products pages.
#[derive(Debug, Clone)]
pub struct ProductsState {
    /// The database connection for reading products and sales.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for ProductsState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// Display a table of products with their price and units sold.
pub async fn get_products_page(State(state): State<ProductsState>) -> Result<Response, Error> {
    let products = {
        let connection = state
            .db_connection
            .lock()
            .inspect_err(|error| tracing::error!("could not acquire database lock: {error}"))
            .map_err(|_| Error::DatabaseLockError)?;

        get_product_summaries(&connection)
            .inspect_err(|error| tracing::error!("could not get products: {error}"))?
    };

    Ok(products_view(&products).into_response())
}

/// Display the price history of one product.
pub async fn get_product_prices_page(
    State(state): State<ProductsState>,
    Path(product_id): Path<i64>,
) -> Result<Response, Error> {
    let (product, prices) = {
        let connection = state
            .db_connection
            .lock()
            .inspect_err(|error| tracing::error!("could not acquire database lock: {error}"))
            .map_err(|_| Error::DatabaseLockError)?;

        let product = get_product(product_id, &connection)?;
        let prices = get_price_history(product_id, &connection).inspect_err(|error| {
            tracing::error!("could not get prices of product {product_id}: {error}")
        })?;

        (product, prices)
    };

    Ok(price_history_view(&product, &prices).into_response())
}

fn optional_price(price: Option<f64>) -> String {
    price.map(format_currency).unwrap_or_else(|| "-".to_owned())
}

fn products_view(products: &[ProductSummary]) -> Markup {
    let nav_bar = NavBar::new(endpoints::PRODUCTS_VIEW).into_html();

    let content = html!(
        (nav_bar)

        div class=(PAGE_CONTAINER_STYLE)
        {
            h1 class="text-2xl font-bold mb-4" { "Products" }

            @if products.is_empty() {
                p { "No products yet. Import orders from your web store to see them here." }
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
                                th scope="col" class=(TABLE_CELL_STYLE) { "Price" }
                                th scope="col" class=(TABLE_CELL_STYLE) { "Units Sold" }
                                th scope="col" class=(TABLE_CELL_STYLE) { "Revenue" }
                            }
                        }

                        tbody
                        {
                            @for summary in products {
                                @let product = &summary.product;
                                tr class=(TABLE_ROW_STYLE) data-product-id=(product.id)
                                {
                                    td class=(TABLE_CELL_STYLE)
                                    {
                                        a
                                            href=(format_endpoint(endpoints::PRODUCT_PRICES_VIEW, product.id))
                                            class=(LINK_STYLE)
                                        {
                                            (product.name)
                                        }
                                    }
                                    td class=(TABLE_CELL_STYLE) { (optional_price(product.price)) }
                                    td class=(TABLE_CELL_STYLE) { (summary.units_sold) }
                                    td class=(TABLE_CELL_STYLE) { (format_currency(summary.revenue)) }
                                }
                            }
                        }
                    }
                }
            }
        }
    );

    base("Products", &content)
}

fn price_history_view(product: &Product, prices: &[ProductPrice]) -> Markup {
    let nav_bar = NavBar::new(endpoints::PRODUCTS_VIEW).into_html();

    let content = html!(
        (nav_bar)

        div class=(PAGE_CONTAINER_STYLE)
        {
            h1 class="text-2xl font-bold mb-4" { (product.name) " Prices" }

            @if prices.is_empty() {
                p { "No prices have been recorded for this product." }
            } @else {
                div class="relative overflow-x-auto shadow-md sm:rounded-lg w-full max-w-screen-md"
                {
                    table class="w-full text-sm text-left rtl:text-right text-gray-500 dark:text-gray-400"
                    {
                        thead class=(TABLE_HEADER_STYLE)
                        {
                            tr
                            {
                                th scope="col" class=(TABLE_CELL_STYLE) { "Since" }
                                th scope="col" class=(TABLE_CELL_STYLE) { "Price" }
                            }
                        }

                        tbody
                        {
                            @for price in prices {
                                tr class=(TABLE_ROW_STYLE)
                                {
                                    td class=(TABLE_CELL_STYLE) { (price.recorded_on) }
                                    td class=(TABLE_CELL_STYLE) { (format_currency(price.price)) }
                                }
                            }
                        }
                    }
                }
            }

            a href=(endpoints::PRODUCTS_VIEW) class={ "mt-4 " (LINK_STYLE) } { "Back to products" }
        }
    );

    base("Product Prices", &content)
}
