use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taller_core::{DomainError, DomainResult, ItemId, MovementId, ReservationId, WarehouseId};

use crate::stock::StockKey;

/// Movement type (wire values are the dashboard's Spanish names).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementKind {
    #[serde(rename = "entrada")]
    Inbound,
    #[serde(rename = "salida")]
    Outbound,
    #[serde(rename = "transferencia")]
    Transfer,
    #[serde(rename = "ajuste")]
    Adjustment,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Inbound => "entrada",
            MovementKind::Outbound => "salida",
            MovementKind::Transfer => "transferencia",
            MovementKind::Adjustment => "ajuste",
        }
    }
}

impl core::str::FromStr for MovementKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "entrada" => Ok(MovementKind::Inbound),
            "salida" => Ok(MovementKind::Outbound),
            "transferencia" => Ok(MovementKind::Transfer),
            "ajuste" => Ok(MovementKind::Adjustment),
            other => Err(DomainError::validation(format!(
                "unknown movement type '{other}' (expected entrada, salida, transferencia or ajuste)"
            ))),
        }
    }
}

/// Which stock rows a movement touches, derived from its type and warehouses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementRoute {
    Into(WarehouseId),
    OutOf(WarehouseId),
    Between { from: WarehouseId, to: WarehouseId },
}

impl MovementRoute {
    pub fn keys(&self, item: ItemId) -> Vec<StockKey> {
        match *self {
            MovementRoute::Into(wh) | MovementRoute::OutOf(wh) => vec![StockKey::new(item, wh)],
            MovementRoute::Between { from, to } => {
                vec![StockKey::new(item, from), StockKey::new(item, to)]
            }
        }
    }
}

/// Request to record a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementRequest {
    #[serde(rename = "type")]
    pub kind: MovementKind,
    pub item: ItemId,
    pub quantity: i64,
    #[serde(default)]
    pub warehouse_from: Option<WarehouseId>,
    #[serde(default)]
    pub warehouse_to: Option<WarehouseId>,
    /// Defaults to the item's cost price (inbound) or the source row's average cost.
    #[serde(default)]
    pub unit_cost: Option<u64>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl MovementRequest {
    pub fn inbound(item: ItemId, warehouse: WarehouseId, quantity: i64) -> Self {
        Self {
            kind: MovementKind::Inbound,
            item,
            quantity,
            warehouse_from: None,
            warehouse_to: Some(warehouse),
            unit_cost: None,
            reference: None,
            note: None,
        }
    }

    pub fn outbound(item: ItemId, warehouse: WarehouseId, quantity: i64) -> Self {
        Self {
            kind: MovementKind::Outbound,
            warehouse_from: Some(warehouse),
            warehouse_to: None,
            ..Self::inbound(item, warehouse, quantity)
        }
    }

    pub fn transfer(item: ItemId, from: WarehouseId, to: WarehouseId, quantity: i64) -> Self {
        Self {
            kind: MovementKind::Transfer,
            warehouse_from: Some(from),
            warehouse_to: Some(to),
            ..Self::inbound(item, to, quantity)
        }
    }

    pub fn with_unit_cost(mut self, unit_cost: u64) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Validate the request and resolve the stock rows it touches.
    pub fn route(&self) -> DomainResult<MovementRoute> {
        if self.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let kind = self.kind.as_str();
        match (self.kind, self.warehouse_from, self.warehouse_to) {
            (MovementKind::Inbound, _, Some(to)) => Ok(MovementRoute::Into(to)),
            (MovementKind::Inbound, _, None) => Err(DomainError::validation(format!(
                "{kind} requires warehouseTo"
            ))),
            (MovementKind::Outbound, Some(from), _) => Ok(MovementRoute::OutOf(from)),
            (MovementKind::Outbound, None, _) => Err(DomainError::validation(format!(
                "{kind} requires warehouseFrom"
            ))),
            (MovementKind::Transfer, Some(from), Some(to)) if from == to => Err(
                DomainError::validation("transferencia requires different source and destination"),
            ),
            (MovementKind::Transfer, Some(from), Some(to)) => {
                Ok(MovementRoute::Between { from, to })
            }
            (MovementKind::Transfer, _, _) => Err(DomainError::validation(
                "transferencia requires warehouseFrom and warehouseTo",
            )),
            (MovementKind::Adjustment, Some(from), None) => Ok(MovementRoute::OutOf(from)),
            (MovementKind::Adjustment, None, Some(to)) => Ok(MovementRoute::Into(to)),
            (MovementKind::Adjustment, _, _) => Err(DomainError::validation(
                "ajuste requires exactly one of warehouseFrom (decrease) or warehouseTo (increase)",
            )),
        }
    }
}

/// Immutable movement log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movement {
    pub id: MovementId,
    #[serde(rename = "type")]
    pub kind: MovementKind,
    pub item: ItemId,
    pub quantity: i64,
    pub warehouse_from: Option<WarehouseId>,
    pub warehouse_to: Option<WarehouseId>,
    pub unit_cost: u64,
    pub reference: Option<String>,
    pub note: Option<String>,
    /// Set when the movement is the consumption of a reservation.
    pub reservation: Option<ReservationId>,
    pub occurred_at: DateTime<Utc>,
}

impl Movement {
    /// Signed quantity change this movement applies to a stock row.
    pub fn delta_for(&self, key: StockKey) -> i64 {
        if key.item != self.item {
            return 0;
        }
        let mut delta = 0;
        if self.warehouse_to == Some(key.warehouse) {
            delta += self.quantity;
        }
        if self.warehouse_from == Some(key.warehouse) {
            delta -= self.quantity;
        }
        delta
    }

    pub fn touches(&self, warehouse: WarehouseId) -> bool {
        self.warehouse_from == Some(warehouse) || self.warehouse_to == Some(warehouse)
    }
}
