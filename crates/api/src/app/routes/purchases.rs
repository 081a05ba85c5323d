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
use taller_purchasing::PurchaseOrderId;

use crate::app::dto::{
    self, CancelRequest, CreatePurchaseOrderRequest, Deleted, PurchaseOrderQuery, ReceiveRequest,
    UpdatePurchaseOrderRequest,
};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_purchase_orders).post(create_purchase_order))
        .route(
            "/:id",
            get(get_purchase_order)
                .put(update_purchase_order)
                .delete(delete_purchase_order),
        )
        .route("/:id/receive", post(receive_purchase_order))
        .route("/:id/cancel", post(cancel_purchase_order))
}

fn order_id(raw: &str) -> Result<PurchaseOrderId, ApiError> {
    dto::parse_id::<AggregateId>(raw).map(PurchaseOrderId::new)
}

pub async fn list_purchase_orders(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<PurchaseOrderQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let (page, filter) = query.split();
    let orders = services
        .run(move |svc| Ok(svc.purchasing.list(&filter)))
        .await?;
    Ok(dto::page(orders, page))
}

pub async fn get_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = order_id(&id)?;
    let order = services.run(move |svc| svc.purchasing.get(id)).await?;
    Ok(dto::ok(order))
}

pub async fn create_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<CreatePurchaseOrderRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let input = body.into_input()?;
    let order = services.run(move |svc| svc.purchasing.create(input)).await?;
    Ok(dto::created(order))
}

/// Lines and notes are editable until the first receipt.
pub async fn update_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<UpdatePurchaseOrderRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = order_id(&id)?;
    let Json(body) = body?;
    let order = services
        .run(move |svc| svc.purchasing.update(id, body.lines, body.notes))
        .await?;
    Ok(dto::ok(order))
}

pub async fn delete_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = order_id(&id)?;
    services.run(move |svc| svc.purchasing.delete(id)).await?;
    Ok(dto::ok(Deleted { id: id.0 }))
}

pub async fn receive_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<ReceiveRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = order_id(&id)?;
    let Json(body) = body?;
    let warehouse = body.warehouse()?;
    let order = services
        .run(move |svc| {
            svc.purchasing
                .receive(id, warehouse, body.items, body.idempotency_key)
        })
        .await?;
    Ok(dto::ok(order))
}

pub async fn cancel_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<CancelRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = order_id(&id)?;
    let Json(body) = body?;
    let order = services
        .run(move |svc| svc.purchasing.cancel(id, body.idempotency_key))
        .await?;
    Ok(dto::ok(order))
}
