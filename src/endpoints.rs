//! The API endpoints URIs.
//!
//! For endpoints that take a parameter, e.g. '/products/{product_id}/prices', use [format_endpoint].

/// The root route which redirects to the analytics page.
pub const ROOT: &str = "/";
/// The page with the sales charts.
pub const ANALYTICS_VIEW: &str = "/analytics";
/// The page listing ad campaigns and their return on ad spend.
pub const CAMPAIGNS_VIEW: &str = "/campaigns";
/// The page listing products with their price and units sold.
pub const PRODUCTS_VIEW: &str = "/products";
/// The page showing the price history of one product.
pub const PRODUCT_PRICES_VIEW: &str = "/products/{product_id}/prices";
/// The route for static files.
pub const STATIC: &str = "/static";

/// The route that re-renders the sales chart for a new selection.
pub const ANALYTICS_CHART: &str = "/api/analytics/chart";
/// The route for importing campaign and order payloads from upstream platforms.
pub const SYNC: &str = "/api/sync";

/// Replace the `{...}` parameter in `endpoint_path` with `id`.
///
/// Assumes the path holds at most one parameter. A path without a
/// parameter is returned unchanged.
pub fn format_endpoint(endpoint_path: &str, id: i64) -> String {
    let Some(start) = endpoint_path.find('{') else {
        return endpoint_path.to_owned();
    };
    let end = endpoint_path[start..]
        .find('}')
        .map_or(endpoint_path.len(), |offset| start + offset + 1);

    format!("{}{id}{}", &endpoint_path[..start], &endpoint_path[end..])
}
