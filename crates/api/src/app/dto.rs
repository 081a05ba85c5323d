use core::str::FromStr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use taller_core::{AggregateId, DomainError, ItemId, ReservationId, SupplierId, CustomerId, WarehouseId};
use taller_infra::ledger::{ItemFilter, MovementFilter, ReservationFilter, StockFilter};
use taller_infra::workflows::{
    NewPurchaseOrder, NewSalesOrder, PurchaseOrderFilter, SalesOrderFilter,
};
use taller_inventory::{MovementKind, ReservationStatus};
use taller_purchasing::{NewLine, PurchaseOrderStatus, ReceiptItem};
use taller_sales::{PartyRef, SalesLineInput, SalesOrderStatus, ShipItem};

use crate::app::errors::ApiError;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

// -------------------------
// Response envelopes
// -------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: usize,
    pub total_pages: usize,
}

#[derive(Debug, Serialize)]
struct Envelope<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pagination: Option<Pagination>,
}

pub fn ok<T: Serialize>(data: T) -> Response {
    respond(StatusCode::OK, data, None)
}

pub fn created<T: Serialize>(data: T) -> Response {
    respond(StatusCode::CREATED, data, None)
}

/// One page of an already newest-first collection.
pub fn page<T: Serialize>(items: Vec<T>, query: PageQuery) -> Response {
    let (items, pagination) = paginate(items, query);
    respond(StatusCode::OK, items, Some(pagination))
}

fn respond<T: Serialize>(status: StatusCode, data: T, pagination: Option<Pagination>) -> Response {
    (
        status,
        Json(Envelope {
            success: true,
            data,
            pagination,
        }),
    )
        .into_response()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// `page` below 1 reads as 1; `limit` is clamped to `1..=100`.
pub fn paginate<T>(items: Vec<T>, query: PageQuery) -> (Vec<T>, Pagination) {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let total = items.len();
    let total_pages = total.div_ceil(limit as usize);

    let skip = (page as usize - 1).saturating_mul(limit as usize);
    let items = items.into_iter().skip(skip).take(limit as usize).collect();
    (
        items,
        Pagination {
            page,
            limit,
            total,
            total_pages,
        },
    )
}

/// Body of a successful DELETE on an order.
#[derive(Debug, Serialize)]
pub struct Deleted<I> {
    pub id: I,
}

pub fn parse_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse().map_err(ApiError::from)
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, DomainError> {
    value.ok_or_else(|| DomainError::validation(format!("{field} is required")))
}

// -------------------------
// Query DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub category: Option<String>,
    pub search: Option<String>,
    pub include_deleted: Option<bool>,
}

impl ItemQuery {
    pub fn split(self) -> (PageQuery, ItemFilter) {
        (
            PageQuery {
                page: self.page,
                limit: self.limit,
            },
            ItemFilter {
                category: self.category,
                search: self.search,
                include_deleted: self.include_deleted.unwrap_or(false),
            },
        )
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub item: Option<ItemId>,
    pub warehouse: Option<WarehouseId>,
    #[serde(rename = "type")]
    pub kind: Option<MovementKind>,
    pub reservation: Option<ReservationId>,
}

impl MovementQuery {
    pub fn split(self) -> (PageQuery, MovementFilter) {
        (
            PageQuery {
                page: self.page,
                limit: self.limit,
            },
            MovementFilter {
                item: self.item,
                warehouse: self.warehouse,
                kind: self.kind,
                reservation: self.reservation,
            },
        )
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub item: Option<ItemId>,
    pub warehouse: Option<WarehouseId>,
    pub low_stock: Option<bool>,
}

impl StockQuery {
    pub fn split(self) -> (PageQuery, StockFilter) {
        (
            PageQuery {
                page: self.page,
                limit: self.limit,
            },
            StockFilter {
                item: self.item,
                warehouse: self.warehouse,
                low_stock: self.low_stock.unwrap_or(false),
            },
        )
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub item: Option<ItemId>,
    pub warehouse: Option<WarehouseId>,
    pub status: Option<ReservationStatus>,
    pub sales_order: Option<AggregateId>,
}

impl ReservationQuery {
    pub fn split(self) -> (PageQuery, ReservationFilter) {
        (
            PageQuery {
                page: self.page,
                limit: self.limit,
            },
            ReservationFilter {
                item: self.item,
                warehouse: self.warehouse,
                status: self.status,
                sales_order: self.sales_order,
            },
        )
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<PurchaseOrderStatus>,
    #[serde(alias = "proveedor")]
    pub supplier: Option<SupplierId>,
}

impl PurchaseOrderQuery {
    pub fn split(self) -> (PageQuery, PurchaseOrderFilter) {
        (
            PageQuery {
                page: self.page,
                limit: self.limit,
            },
            PurchaseOrderFilter {
                status: self.status,
                supplier: self.supplier,
            },
        )
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesOrderQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<SalesOrderStatus>,
    #[serde(alias = "cliente")]
    pub customer: Option<CustomerId>,
}

impl SalesOrderQuery {
    pub fn split(self) -> (PageQuery, SalesOrderFilter) {
        (
            PageQuery {
                page: self.page,
                limit: self.limit,
            },
            SalesOrderFilter {
                status: self.status,
                customer: self.customer,
            },
        )
    }
}

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    pub item: Option<ItemId>,
    pub warehouse: Option<WarehouseId>,
    #[serde(alias = "cantidad")]
    pub quantity: Option<i64>,
}

impl ReserveRequest {
    pub fn validate(self) -> Result<(ItemId, WarehouseId, i64), DomainError> {
        Ok((
            required(self.item, "item")?,
            required(self.warehouse, "warehouse")?,
            required(self.quantity, "quantity")?,
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    #[serde(default, alias = "cantidad")]
    pub quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePurchaseOrderRequest {
    #[serde(alias = "proveedor")]
    pub supplier: Option<PartyRef>,
    #[serde(rename = "items", alias = "lines", default)]
    pub lines: Vec<NewLine>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CreatePurchaseOrderRequest {
    pub fn into_input(self) -> Result<NewPurchaseOrder, DomainError> {
        Ok(NewPurchaseOrder {
            supplier: required(self.supplier, "supplier")?.resolve()?,
            lines: self.lines,
            notes: self.notes,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePurchaseOrderRequest {
    #[serde(rename = "items", alias = "lines", default)]
    pub lines: Option<Vec<NewLine>>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveRequest {
    pub warehouse: Option<WarehouseId>,
    #[serde(default)]
    pub items: Vec<ReceiptItem>,
    #[serde(default)]
    pub idempotency_key: String,
}

impl ReceiveRequest {
    pub fn warehouse(&self) -> Result<WarehouseId, DomainError> {
        required(self.warehouse, "warehouse")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSalesOrderRequest {
    #[serde(alias = "cliente")]
    pub customer: Option<PartyRef>,
    #[serde(rename = "items", alias = "lines", default)]
    pub lines: Vec<SalesLineInput>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CreateSalesOrderRequest {
    pub fn into_input(self) -> Result<NewSalesOrder, DomainError> {
        Ok(NewSalesOrder {
            customer: required(self.customer, "customer")?.resolve()?,
            lines: self.lines,
            notes: self.notes,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSalesOrderRequest {
    #[serde(rename = "items", alias = "lines", default)]
    pub lines: Option<Vec<SalesLineInput>>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub warehouse: Option<WarehouseId>,
    #[serde(default)]
    pub idempotency_key: String,
}

impl ConfirmRequest {
    pub fn warehouse(&self) -> Result<WarehouseId, DomainError> {
        required(self.warehouse, "warehouse")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipRequest {
    #[serde(default)]
    pub items: Option<Vec<ShipItem>>,
    #[serde(default)]
    pub idempotency_key: String,
}

/// Body of the cancel actions.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    #[serde(default)]
    pub idempotency_key: String,
}
