//! Implements a struct that holds the state of the REST server.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use time::OffsetDateTime;

use crate::{
    Error,
    analytics::{DateFormat, ReportTracker},
    db::initialize,
};

/// The state of the REST server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The local timezone as a canonical timezone name, e.g. "Pacific/Auckland".
    pub local_timezone: String,

    /// How dates are written on chart axes.
    pub date_format: DateFormat,

    /// The database connection
    pub db_connection: Arc<Mutex<Connection>>,

    /// The current sales report of each open analytics page and the
    /// generation counters used to drop results from superseded requests.
    pub report_tracker: Arc<Mutex<ReportTracker>>,
}

impl AppState {
    /// Create a new [AppState] with a SQLite database connection.
    ///
    /// This function will initialize the database by adding the tables for the domain models.
    /// `local_timezone` should be a valid, canonical timezone name, e.g. "Pacific/Auckland".
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub fn new(
        db_connection: Connection,
        local_timezone: &str,
        date_format: DateFormat,
    ) -> Result<Self, Error> {
        initialize(&db_connection)?;

        // Sessions handed out before a restart should not collide with new ones.
        let first_session =
            u64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos()).unwrap_or_default();

        Ok(Self {
            local_timezone: local_timezone.to_owned(),
            date_format,
            db_connection: Arc::new(Mutex::new(db_connection)),
            report_tracker: Arc::new(Mutex::new(ReportTracker::starting_at(first_session))),
        })
    }
}
