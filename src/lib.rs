//! Salesboard is a web app for tracking ad campaigns, products and sales.
//!
//! This library provides a REST API that directly serves HTML pages, the
//! sales analytics engine behind the charts, and the import boundary for
//! campaign and order data fetched from upstream platforms.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use axum_server::Handle;
use tokio::signal;

mod analytics;
mod app_state;
mod campaign;
mod db;
mod endpoints;
mod html;
mod logging;
mod navigation;
mod not_found;
mod product;
mod routing;
mod sale;
mod sync;
mod timezone;

pub use analytics::DateFormat;
pub use app_state::AppState;
pub use campaign::{Campaign, upsert_campaign};
pub use db::initialize as initialize_db;
pub use logging::{LOG_BODY_LENGTH_LIMIT, logging_middleware};
pub use product::{Product, upsert_product};
pub use routing::build_router;
pub use sale::{Attribution, Sale, SaleItem, count_sales, upsert_sale};
pub use sync::{SyncReport, UpstreamPayload, import_payload};
pub use timezone::get_local_offset;

use crate::html::{alert, error_view};

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The sales or reference data for a report could not be fetched.
    ///
    /// The message is shown to the user and no partial chart is rendered.
    #[error("could not load sales data: {0}")]
    FetchFailure(String),

    /// The date range selection cannot be turned into a date window yet, e.g.
    /// a custom range with only one of its two dates picked.
    ///
    /// This is not a failure from the user's point of view: the page should
    /// wait for a complete selection instead of building a report.
    #[error("incomplete date range: {0}")]
    InvalidSelection(String),

    /// A payload from an upstream platform (ad account or web store) did not
    /// pass validation.
    #[error("invalid sync payload: {0}")]
    InvalidPayload(String),

    /// The requested resource was not found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// An error occurred while getting the local timezone from a canonical timezone string.
    #[error("invalid timezone {0}")]
    InvalidTimezoneError(String),

    /// Could not acquire the database lock
    #[error("could not acquire the database lock")]
    DatabaseLockError,
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::NotFound => not_found::get_404_not_found_response(),
            Error::InvalidPayload(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({ "error": message })),
            )
                .into_response(),
            Error::InvalidTimezoneError(timezone) => internal_server_error(
                "Invalid Timezone Settings",
                &format!(
                    "Could not get local timezone \"{timezone}\". Check your server settings and \
                    ensure the timezone has been set to valid, canonical timezone string"
                ),
            ),
            Error::FetchFailure(message) => {
                internal_server_error("Could not load sales data", &message)
            }
            // Any errors that are not handled above are not intended to be shown to the client.
            error => {
                tracing::error!("An unexpected error occurred: {}", error);
                internal_server_error(
                    "Sorry, something went wrong.",
                    "Try again later or check the server logs",
                )
            }
        }
    }
}

impl Error {
    /// Render the error as an alert fragment for htmx partial responses.
    fn into_alert_response(self) -> Response {
        match self {
            Error::FetchFailure(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                alert("Could not load sales data", &message),
            )
                .into_response(),
            Error::InvalidTimezoneError(timezone) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                alert(
                    "Invalid Timezone Settings",
                    &format!(
                        "Could not get local timezone \"{timezone}\". Check your server settings and \
                        ensure the timezone has been set to valid, canonical timezone string"
                    ),
                ),
            )
                .into_response(),
            error => {
                tracing::error!("An unexpected error occurred: {}", error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    alert(
                        "Something went wrong",
                        "An unexpected error occurred, check the server logs for more details.",
                    ),
                )
                    .into_response()
            }
        }
    }
}

fn internal_server_error(description: &str, fix: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(error_view("Internal Server Error", "500", description, fix).into_string()),
    )
        .into_response()
}
