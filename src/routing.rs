//! Application router configuration.

use axum::{
    Router,
    response::Redirect,
    routing::{get, post},
};
use tower_http::services::ServeDir;

use crate::{
    AppState,
    analytics::{get_analytics_chart, get_analytics_page},
    campaign::get_campaigns_page,
    endpoints,
    not_found::get_404_not_found,
    product::{get_product_prices_page, get_products_page},
    sync::post_sync,
};

/// Return a router with all the app's routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::ROOT, get(get_index_page))
        .route(endpoints::ANALYTICS_VIEW, get(get_analytics_page))
        .route(endpoints::CAMPAIGNS_VIEW, get(get_campaigns_page))
        .route(endpoints::PRODUCTS_VIEW, get(get_products_page))
        .route(endpoints::PRODUCT_PRICES_VIEW, get(get_product_prices_page))
        .route(endpoints::ANALYTICS_CHART, get(get_analytics_chart))
        .route(endpoints::SYNC, post(post_sync))
        .nest_service(endpoints::STATIC, ServeDir::new("static/"))
        .fallback(get_404_not_found)
        .with_state(state)
}

/// The root path '/' redirects to the analytics page.
async fn get_index_page() -> Redirect {
    Redirect::to(endpoints::ANALYTICS_VIEW)
}
