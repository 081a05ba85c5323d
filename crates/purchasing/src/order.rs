use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taller_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ItemId, SupplierId, WarehouseId};
use taller_events::Event;

/// Purchase order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub AggregateId);

impl PurchaseOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Purchase order status lifecycle.
///
/// `pendiente -> parcial -> recibido`, or `cancelado` from either open state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderStatus {
    #[serde(rename = "pendiente")]
    Pending,
    #[serde(rename = "parcial")]
    PartiallyReceived,
    #[serde(rename = "recibido")]
    Received,
    #[serde(rename = "cancelado")]
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOrderStatus::Pending => "pendiente",
            PurchaseOrderStatus::PartiallyReceived => "parcial",
            PurchaseOrderStatus::Received => "recibido",
            PurchaseOrderStatus::Cancelled => "cancelado",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Pending | PurchaseOrderStatus::PartiallyReceived
        )
    }
}

impl core::str::FromStr for PurchaseOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pendiente" => Ok(PurchaseOrderStatus::Pending),
            "parcial" => Ok(PurchaseOrderStatus::PartiallyReceived),
            "recibido" => Ok(PurchaseOrderStatus::Received),
            "cancelado" => Ok(PurchaseOrderStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown purchase order status '{other}'"
            ))),
        }
    }
}

/// Requested line (create/update input).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLine {
    pub item: ItemId,
    #[serde(rename = "cantidad")]
    pub quantity: i64,
    /// Unit cost in smallest currency unit (e.g., cents).
    #[serde(rename = "precioUnitario")]
    pub unit_price: u64,
}

/// Purchase order line item. Invariant: `0 <= received <= quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(rename = "lineNo")]
    pub line_no: u32,
    pub item: ItemId,
    #[serde(rename = "cantidad")]
    pub quantity: i64,
    #[serde(rename = "precioUnitario")]
    pub unit_price: u64,
    #[serde(rename = "recibido")]
    pub received: i64,
}

impl LineItem {
    pub fn outstanding(&self) -> i64 {
        self.quantity - self.received
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.quantity
    }
}

/// One entry of a receipt: how much of an ordered item arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptItem {
    pub item: ItemId,
    #[serde(rename = "cantidad")]
    pub quantity: i64,
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    supplier: Option<SupplierId>,
    status: PurchaseOrderStatus,
    lines: Vec<LineItem>,
    notes: Option<String>,
    created_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    receipt_keys: Vec<String>,
    cancel_key: Option<String>,
    version: u64,
    created: bool,
    deleted: bool,
}

impl PurchaseOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            supplier: None,
            status: PurchaseOrderStatus::Pending,
            lines: Vec::new(),
            notes: None,
            created_at: None,
            received_at: None,
            cancelled_at: None,
            receipt_keys: Vec::new(),
            cancel_key: None,
            version: 0,
            created: false,
            deleted: false,
        }
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn supplier(&self) -> Option<SupplierId> {
        self.supplier
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn exists(&self) -> bool {
        self.created && !self.deleted
    }

    pub fn receipt_keys(&self) -> &[String] {
        &self.receipt_keys
    }

    pub fn cancel_key(&self) -> Option<&str> {
        self.cancel_key.as_deref()
    }

    fn nothing_received(&self) -> bool {
        self.lines.iter().all(|l| l.received == 0)
    }

    fn derive_status(lines: &[LineItem]) -> PurchaseOrderStatus {
        if lines.iter().all(LineItem::is_complete) {
            PurchaseOrderStatus::Received
        } else if lines.iter().any(|l| l.received > 0) {
            PurchaseOrderStatus::PartiallyReceived
        } else {
            PurchaseOrderStatus::Pending
        }
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub supplier: SupplierId,
    pub lines: Vec<NewLine>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePurchaseOrder (replace lines/notes while nothing was received).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub lines: Option<Vec<NewLine>>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveGoods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveGoods {
    pub order_id: PurchaseOrderId,
    pub warehouse: WarehouseId,
    pub items: Vec<ReceiptItem>,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelPurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeletePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    CreatePurchaseOrder(CreatePurchaseOrder),
    UpdatePurchaseOrder(UpdatePurchaseOrder),
    ReceiveGoods(ReceiveGoods),
    CancelPurchaseOrder(CancelPurchaseOrder),
    DeletePurchaseOrder(DeletePurchaseOrder),
}

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub order_id: PurchaseOrderId,
    pub supplier: SupplierId,
    pub lines: Vec<LineItem>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderUpdated {
    pub order_id: PurchaseOrderId,
    pub lines: Vec<LineItem>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// A received quantity for one line, at the line's unit cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedLine {
    pub line_no: u32,
    pub item: ItemId,
    pub quantity: i64,
    pub unit_cost: u64,
}

/// Event: GoodsReceived.
///
/// Carries everything the ledger needs to post one `entrada` movement per line
/// into `warehouse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceived {
    pub order_id: PurchaseOrderId,
    pub warehouse: WarehouseId,
    pub lines: Vec<ReceivedLine>,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCancelled {
    pub order_id: PurchaseOrderId,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderDeleted {
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    PurchaseOrderCreated(PurchaseOrderCreated),
    PurchaseOrderUpdated(PurchaseOrderUpdated),
    GoodsReceived(GoodsReceived),
    PurchaseOrderCancelled(PurchaseOrderCancelled),
    PurchaseOrderDeleted(PurchaseOrderDeleted),
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => "purchasing.order.created",
            PurchaseOrderEvent::PurchaseOrderUpdated(_) => "purchasing.order.updated",
            PurchaseOrderEvent::GoodsReceived(_) => "purchasing.order.goods_received",
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => "purchasing.order.cancelled",
            PurchaseOrderEvent::PurchaseOrderDeleted(_) => "purchasing.order.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderUpdated(e) => e.occurred_at,
            PurchaseOrderEvent::GoodsReceived(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.id = e.order_id;
                self.supplier = Some(e.supplier);
                self.status = PurchaseOrderStatus::Pending;
                self.lines = e.lines.clone();
                self.notes = e.notes.clone();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            PurchaseOrderEvent::PurchaseOrderUpdated(e) => {
                self.lines = e.lines.clone();
                self.notes = e.notes.clone();
            }
            PurchaseOrderEvent::GoodsReceived(e) => {
                for received in &e.lines {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == received.line_no) {
                        line.received += received.quantity;
                    }
                }
                self.receipt_keys.push(e.idempotency_key.clone());
                self.status = Self::derive_status(&self.lines);
                if self.status == PurchaseOrderStatus::Received {
                    self.received_at = Some(e.occurred_at);
                }
            }
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => {
                self.cancel_key = Some(e.idempotency_key.clone());
                self.status = PurchaseOrderStatus::Cancelled;
                self.cancelled_at = Some(e.occurred_at);
            }
            PurchaseOrderEvent::PurchaseOrderDeleted(_) => {
                self.deleted = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::CreatePurchaseOrder(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::UpdatePurchaseOrder(cmd) => self.handle_update(cmd),
            PurchaseOrderCommand::ReceiveGoods(cmd) => self.handle_receive(cmd),
            PurchaseOrderCommand::CancelPurchaseOrder(cmd) => self.handle_cancel(cmd),
            PurchaseOrderCommand::DeletePurchaseOrder(cmd) => self.handle_delete(cmd),
        }
    }
}

/// Validate requested lines and number them from 1.
fn build_lines(lines: &[NewLine]) -> Result<Vec<LineItem>, DomainError> {
    if lines.is_empty() {
        return Err(DomainError::validation("purchase order needs at least one line"));
    }

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        if line.quantity <= 0 {
            return Err(DomainError::validation(format!(
                "line {}: cantidad must be positive",
                idx + 1
            )));
        }
        if !seen.insert(line.item) {
            return Err(DomainError::validation(format!(
                "item {} appears on more than one line",
                line.item
            )));
        }
        out.push(LineItem {
            line_no: (idx as u32) + 1,
            item: line.item,
            quantity: line.quantity,
            unit_price: line.unit_price,
            received: 0,
        });
    }
    Ok(out)
}

impl PurchaseOrder {
    fn ensure_exists(&self, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found(format!("purchase order {order_id}")));
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreatePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }
        let lines = build_lines(&cmd.lines)?;

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCreated(
            PurchaseOrderCreated {
                order_id: cmd.order_id,
                supplier: cmd.supplier,
                lines,
                notes: cmd.notes.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_update(
        &self,
        cmd: &UpdatePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;

        if self.status != PurchaseOrderStatus::Pending || !self.nothing_received() {
            return Err(DomainError::invalid_transition(format!(
                "purchase order can only be edited while pendiente with nothing received (status: {})",
                self.status.as_str()
            )));
        }

        let lines = match &cmd.lines {
            Some(lines) => build_lines(lines)?,
            None => self.lines.clone(),
        };

        Ok(vec![PurchaseOrderEvent::PurchaseOrderUpdated(
            PurchaseOrderUpdated {
                order_id: cmd.order_id,
                lines,
                notes: cmd.notes.clone().or_else(|| self.notes.clone()),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_receive(&self, cmd: &ReceiveGoods) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        if self.receipt_keys.contains(&cmd.idempotency_key) {
            return Ok(vec![]);
        }

        if !self.status.is_open() {
            return Err(DomainError::invalid_transition(format!(
                "cannot receive goods on a purchase order that is {}",
                self.status.as_str()
            )));
        }
        if cmd.idempotency_key.trim().is_empty() {
            return Err(DomainError::validation("idempotencyKey is required"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("receipt must list at least one item"));
        }

        let mut seen = HashSet::new();
        let mut received = Vec::with_capacity(cmd.items.len());
        for entry in &cmd.items {
            if entry.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "item {}: cantidad must be positive",
                    entry.item
                )));
            }
            if !seen.insert(entry.item) {
                return Err(DomainError::validation(format!(
                    "item {} listed more than once in the receipt",
                    entry.item
                )));
            }
            let line = self
                .lines
                .iter()
                .find(|l| l.item == entry.item)
                .ok_or_else(|| {
                    DomainError::validation(format!(
                        "item {} is not on purchase order {}",
                        entry.item, self.id
                    ))
                })?;
            if entry.quantity > line.outstanding() {
                return Err(DomainError::validation(format!(
                    "item {}: receiving {} exceeds ordered quantity (cantidad {}, recibido {})",
                    entry.item, entry.quantity, line.quantity, line.received
                )));
            }
            received.push(ReceivedLine {
                line_no: line.line_no,
                item: line.item,
                quantity: entry.quantity,
                unit_cost: line.unit_price,
            });
        }

        Ok(vec![PurchaseOrderEvent::GoodsReceived(GoodsReceived {
            order_id: cmd.order_id,
            warehouse: cmd.warehouse,
            lines: received,
            idempotency_key: cmd.idempotency_key.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(
        &self,
        cmd: &CancelPurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        if self.cancel_key.as_deref() == Some(cmd.idempotency_key.as_str()) {
            return Ok(vec![]);
        }

        if !self.status.is_open() {
            return Err(DomainError::invalid_transition(format!(
                "cannot cancel a purchase order that is {}",
                self.status.as_str()
            )));
        }
        if cmd.idempotency_key.trim().is_empty() {
            return Err(DomainError::validation("idempotencyKey is required"));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCancelled(
            PurchaseOrderCancelled {
                order_id: cmd.order_id,
                idempotency_key: cmd.idempotency_key.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_delete(
        &self,
        cmd: &DeletePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;

        if self.status != PurchaseOrderStatus::Pending || !self.nothing_received() {
            return Err(DomainError::invalid_transition(format!(
                "only pendiente purchase orders with nothing received can be deleted (status: {})",
                self.status.as_str()
            )));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderDeleted(
            PurchaseOrderDeleted {
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}
