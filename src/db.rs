//! Database schema setup for the application's SQLite database.

use rusqlite::{Connection, Transaction as SqlTransaction};

use crate::{
    Error, campaign::create_campaign_table, product::create_product_table,
    sale::create_sale_tables,
};

/// Create the tables for the domain models if they do not exist yet.
///
/// Tables are created in a single exclusive transaction so a partially
/// initialized database is never left behind.
///
/// # Errors
/// Returns an [Error::SqlError] if any of the tables could not be created.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    // Has no effect inside a transaction.
    connection.execute("PRAGMA foreign_keys = ON", ())?;

    let transaction =
        SqlTransaction::new_unchecked(connection, rusqlite::TransactionBehavior::Exclusive)?;

    create_campaign_table(&transaction)?;
    create_product_table(&transaction)?;
    create_sale_tables(&transaction)?;

    transaction.commit()?;

    Ok(())
}
