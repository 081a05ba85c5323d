use axum::Router;

pub mod items;
pub mod movements;
pub mod purchases;
pub mod reservations;
pub mod sales;
pub mod stock;
pub mod system;
pub mod warehouses;

/// Router for everything under `/inventory`.
pub fn router() -> Router {
    Router::new()
        .nest("/items", items::router())
        .nest("/warehouses", warehouses::router())
        .nest("/movements", movements::router())
        .nest("/stock", stock::router())
        .nest("/reservations", reservations::router())
        .nest("/purchaseOrders", purchases::router())
        .nest("/salesOrder", sales::router())
}
