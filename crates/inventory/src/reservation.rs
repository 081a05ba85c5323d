use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taller_core::{AggregateId, DomainError, DomainResult, ItemId, ReservationId, WarehouseId};

use crate::stock::StockKey;

/// Reservation lifecycle: `activo` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    #[serde(rename = "activo")]
    Active,
    #[serde(rename = "liberado")]
    Released,
    #[serde(rename = "consumido")]
    Consumed,
    #[serde(rename = "cancelado")]
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "activo",
            ReservationStatus::Released => "liberado",
            ReservationStatus::Consumed => "consumido",
            ReservationStatus::Cancelled => "cancelado",
        }
    }
}

impl core::str::FromStr for ReservationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "activo" => Ok(ReservationStatus::Active),
            "liberado" => Ok(ReservationStatus::Released),
            "consumido" => Ok(ReservationStatus::Consumed),
            "cancelado" => Ok(ReservationStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown reservation status '{other}'"
            ))),
        }
    }
}

/// Hold of stock at one (item, warehouse) row.
///
/// `consumed` grows with partial shipments; only the outstanding part
/// (`quantity - consumed`) counts against `Stock.reserved`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    id: ReservationId,
    item: ItemId,
    warehouse: WarehouseId,
    quantity: i64,
    consumed: i64,
    status: ReservationStatus,
    sales_order: Option<AggregateId>,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn open(
        id: ReservationId,
        key: StockKey,
        quantity: i64,
        sales_order: Option<AggregateId>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity <= 0 {
            return Err(DomainError::validation("reservation quantity must be positive"));
        }
        Ok(Self {
            id,
            item: key.item,
            warehouse: key.warehouse,
            quantity,
            consumed: 0,
            status: ReservationStatus::Active,
            sales_order,
            created_at: now,
            closed_at: None,
        })
    }

    pub fn id(&self) -> ReservationId {
        self.id
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.item, self.warehouse)
    }

    pub fn item(&self) -> ItemId {
        self.item
    }

    pub fn warehouse(&self) -> WarehouseId {
        self.warehouse
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn consumed(&self) -> i64 {
        self.consumed
    }

    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn sales_order(&self) -> Option<AggregateId> {
        self.sales_order
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// Quantity still held against stock.
    pub fn outstanding(&self) -> i64 {
        if self.is_active() {
            self.quantity - self.consumed
        } else {
            0
        }
    }

    /// `activo -> liberado`. Returns the quantity to unreserve.
    pub fn release(&mut self, now: DateTime<Utc>) -> DomainResult<i64> {
        self.close(ReservationStatus::Released, now)
    }

    /// `activo -> cancelado`. Returns the quantity to unreserve.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<i64> {
        self.close(ReservationStatus::Cancelled, now)
    }

    /// Consume `quantity` (default: everything outstanding).
    ///
    /// Reaching zero outstanding moves the reservation to `consumido`.
    /// Returns the quantity consumed.
    pub fn consume(&mut self, quantity: Option<i64>, now: DateTime<Utc>) -> DomainResult<i64> {
        self.ensure_active("consume")?;

        let outstanding = self.outstanding();
        let quantity = quantity.unwrap_or(outstanding);
        if quantity <= 0 {
            return Err(DomainError::validation("consume quantity must be positive"));
        }
        if quantity > outstanding {
            return Err(DomainError::validation(format!(
                "cannot consume {quantity} from reservation {} (outstanding {outstanding})",
                self.id
            )));
        }

        self.consumed += quantity;
        if self.consumed == self.quantity {
            self.status = ReservationStatus::Consumed;
            self.closed_at = Some(now);
        }
        Ok(quantity)
    }

    fn close(&mut self, to: ReservationStatus, now: DateTime<Utc>) -> DomainResult<i64> {
        let action = match to {
            ReservationStatus::Released => "release",
            _ => "cancel",
        };
        self.ensure_active(action)?;

        let outstanding = self.outstanding();
        self.status = to;
        self.closed_at = Some(now);
        Ok(outstanding)
    }

    fn ensure_active(&self, action: &str) -> DomainResult<()> {
        if !self.is_active() {
            return Err(DomainError::invalid_transition(format!(
                "cannot {action} reservation {}: status is {}",
                self.id,
                self.status.as_str()
            )));
        }
        Ok(())
    }
}
