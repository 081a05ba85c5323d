use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    response::Response,
    routing::{get, post},
    Json, Router,
};

use taller_core::AggregateId;
use taller_sales::SalesOrderId;

use crate::app::dto::{
    self, CancelRequest, ConfirmRequest, CreateSalesOrderRequest, Deleted, SalesOrderQuery,
    ShipRequest, UpdateSalesOrderRequest,
};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_sales_orders).post(create_sales_order))
        .route(
            "/:id",
            get(get_sales_order)
                .put(update_sales_order)
                .delete(delete_sales_order),
        )
        .route("/:id/submit", post(submit_sales_order))
        .route("/:id/confirm", post(confirm_sales_order))
        .route("/:id/ship", post(ship_sales_order))
        .route("/:id/cancel", post(cancel_sales_order))
}

fn order_id(raw: &str) -> Result<SalesOrderId, ApiError> {
    dto::parse_id::<AggregateId>(raw).map(SalesOrderId::new)
}

pub async fn list_sales_orders(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<SalesOrderQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let (page, filter) = query.split();
    let orders = services.run(move |svc| Ok(svc.sales.list(&filter))).await?;
    Ok(dto::page(orders, page))
}

pub async fn get_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = order_id(&id)?;
    let order = services.run(move |svc| svc.sales.get(id)).await?;
    Ok(dto::ok(order))
}

pub async fn create_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<CreateSalesOrderRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let input = body.into_input()?;
    let order = services.run(move |svc| svc.sales.create(input)).await?;
    Ok(dto::created(order))
}

pub async fn update_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<UpdateSalesOrderRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = order_id(&id)?;
    let Json(body) = body?;
    let order = services
        .run(move |svc| svc.sales.update(id, body.lines, body.notes))
        .await?;
    Ok(dto::ok(order))
}

pub async fn delete_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = order_id(&id)?;
    services.run(move |svc| svc.sales.delete(id)).await?;
    Ok(dto::ok(Deleted { id: id.0 }))
}

/// `borrador -> pendiente`.
pub async fn submit_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = order_id(&id)?;
    let order = services.run(move |svc| svc.sales.submit(id)).await?;
    Ok(dto::ok(order))
}

pub async fn confirm_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<ConfirmRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = order_id(&id)?;
    let Json(body) = body?;
    let warehouse = body.warehouse()?;
    let order = services
        .run(move |svc| svc.sales.confirm(id, warehouse, body.idempotency_key))
        .await?;
    Ok(dto::ok(order))
}

pub async fn ship_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<ShipRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = order_id(&id)?;
    let Json(body) = body?;
    let order = services
        .run(move |svc| svc.sales.ship(id, body.items, body.idempotency_key))
        .await?;
    Ok(dto::ok(order))
}

pub async fn cancel_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<CancelRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = order_id(&id)?;
    let Json(body) = body?;
    let order = services
        .run(move |svc| svc.sales.cancel(id, body.idempotency_key))
        .await?;
    Ok(dto::ok(order))
}
