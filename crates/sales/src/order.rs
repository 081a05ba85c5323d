use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taller_core::{
    Aggregate, AggregateId, AggregateRoot, CustomerId, DomainError, ItemId, ReservationId,
    WarehouseId,
};
use taller_events::Event;

/// Sales order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesOrderId(pub AggregateId);

impl SalesOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SalesOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Sales order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderStatus {
    #[serde(rename = "borrador")]
    Draft,
    #[serde(rename = "pendiente")]
    Pending,
    #[serde(rename = "confirmada")]
    Confirmed,
    #[serde(rename = "parcial")]
    PartiallyShipped,
    #[serde(rename = "despachada")]
    Shipped,
    #[serde(rename = "cancelada")]
    Cancelled,
}

impl SalesOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SalesOrderStatus::Draft => "borrador",
            SalesOrderStatus::Pending => "pendiente",
            SalesOrderStatus::Confirmed => "confirmada",
            SalesOrderStatus::PartiallyShipped => "parcial",
            SalesOrderStatus::Shipped => "despachada",
            SalesOrderStatus::Cancelled => "cancelada",
        }
    }

    /// Before confirmation: lines are still editable, nothing is reserved.
    pub fn is_open_for_edit(&self) -> bool {
        matches!(self, SalesOrderStatus::Draft | SalesOrderStatus::Pending)
    }

    pub fn is_shippable(&self) -> bool {
        matches!(
            self,
            SalesOrderStatus::Confirmed | SalesOrderStatus::PartiallyShipped
        )
    }
}

impl core::str::FromStr for SalesOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "borrador" => Ok(SalesOrderStatus::Draft),
            "pendiente" => Ok(SalesOrderStatus::Pending),
            "confirmada" => Ok(SalesOrderStatus::Confirmed),
            "parcial" => Ok(SalesOrderStatus::PartiallyShipped),
            "despachada" => Ok(SalesOrderStatus::Shipped),
            "cancelada" => Ok(SalesOrderStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown sales order status '{other}'"
            ))),
        }
    }
}

/// Requested line (create/update input).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesLineInput {
    pub item: ItemId,
    #[serde(rename = "cantidad")]
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents).
    #[serde(rename = "precioUnitario")]
    pub unit_price: u64,
}

/// Order line. Invariant: `0 <= delivered <= reserved <= quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesLine {
    #[serde(rename = "lineNo")]
    pub line_no: u32,
    pub item: ItemId,
    #[serde(rename = "cantidad")]
    pub quantity: i64,
    #[serde(rename = "precioUnitario")]
    pub unit_price: u64,
    #[serde(rename = "reservado")]
    pub reserved: i64,
    #[serde(rename = "entregado")]
    pub delivered: i64,
    #[serde(rename = "reservation")]
    pub reservation: Option<ReservationId>,
}

impl SalesLine {
    /// Reserved but not yet shipped.
    pub fn outstanding(&self) -> i64 {
        self.reserved - self.delivered
    }
}

/// Aggregate root: SalesOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesOrder {
    id: SalesOrderId,
    customer: Option<CustomerId>,
    status: SalesOrderStatus,
    lines: Vec<SalesLine>,
    notes: Option<String>,
    warehouse: Option<WarehouseId>,
    confirm_key: Option<String>,
    ship_keys: Vec<String>,
    cancel_key: Option<String>,
    confirmed_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
    deleted: bool,
}

impl SalesOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SalesOrderId) -> Self {
        Self {
            id,
            customer: None,
            status: SalesOrderStatus::Draft,
            lines: Vec::new(),
            notes: None,
            warehouse: None,
            confirm_key: None,
            ship_keys: Vec::new(),
            cancel_key: None,
            confirmed_at: None,
            shipped_at: None,
            cancelled_at: None,
            version: 0,
            created: false,
            deleted: false,
        }
    }

    pub fn id_typed(&self) -> SalesOrderId {
        self.id
    }

    pub fn customer(&self) -> Option<CustomerId> {
        self.customer
    }

    pub fn status(&self) -> SalesOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[SalesLine] {
        &self.lines
    }

    pub fn warehouse(&self) -> Option<WarehouseId> {
        self.warehouse
    }

    pub fn confirm_key(&self) -> Option<&str> {
        self.confirm_key.as_deref()
    }

    pub fn ship_keys(&self) -> &[String] {
        &self.ship_keys
    }

    pub fn cancel_key(&self) -> Option<&str> {
        self.cancel_key.as_deref()
    }

    pub fn exists(&self) -> bool {
        self.created && !self.deleted
    }
}

impl AggregateRoot for SalesOrder {
    type Id = SalesOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateSalesOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSalesOrder {
    pub order_id: SalesOrderId,
    pub customer: CustomerId,
    pub lines: Vec<SalesLineInput>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateSalesOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSalesOrder {
    pub order_id: SalesOrderId,
    pub lines: Option<Vec<SalesLineInput>>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitSalesOrder (`borrador -> pendiente`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitSalesOrder {
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmSalesOrder.
///
/// `reservation_ids` holds one pre-allocated id per line, in line order, so
/// the decision stays deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmSalesOrder {
    pub order_id: SalesOrderId,
    pub warehouse: WarehouseId,
    pub reservation_ids: Vec<ReservationId>,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

/// What to ship of one item; `quantity` defaults to everything outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipItem {
    pub item: ItemId,
    #[serde(rename = "cantidad", default)]
    pub quantity: Option<i64>,
}

/// Command: ShipSalesOrder. `items: None` ships every outstanding line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipSalesOrder {
    pub order_id: SalesOrderId,
    pub items: Option<Vec<ShipItem>>,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelSalesOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSalesOrder {
    pub order_id: SalesOrderId,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteSalesOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSalesOrder {
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderCommand {
    CreateSalesOrder(CreateSalesOrder),
    UpdateSalesOrder(UpdateSalesOrder),
    SubmitSalesOrder(SubmitSalesOrder),
    ConfirmSalesOrder(ConfirmSalesOrder),
    ShipSalesOrder(ShipSalesOrder),
    CancelSalesOrder(CancelSalesOrder),
    DeleteSalesOrder(DeleteSalesOrder),
}

/// Event: SalesOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderCreated {
    pub order_id: SalesOrderId,
    pub customer: CustomerId,
    pub lines: Vec<SalesLine>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SalesOrderUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderUpdated {
    pub order_id: SalesOrderId,
    pub lines: Vec<SalesLine>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SalesOrderSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderSubmitted {
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReservation {
    pub line_no: u32,
    pub reservation_id: ReservationId,
    pub item: ItemId,
    pub quantity: i64,
}

/// Event: OrderConfirmed. One reservation per line, all in `warehouse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub order_id: SalesOrderId,
    pub warehouse: WarehouseId,
    pub reservations: Vec<LineReservation>,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineShipment {
    pub line_no: u32,
    pub reservation_id: ReservationId,
    pub item: ItemId,
    pub quantity: i64,
}

/// Event: OrderShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShipped {
    pub order_id: SalesOrderId,
    pub shipments: Vec<LineShipment>,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRelease {
    pub line_no: u32,
    pub reservation_id: ReservationId,
    pub quantity: i64,
}

/// Event: OrderCancelled. `released` lists the holds still active at cancel time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: SalesOrderId,
    pub released: Vec<LineRelease>,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SalesOrderDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderDeleted {
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderEvent {
    SalesOrderCreated(SalesOrderCreated),
    SalesOrderUpdated(SalesOrderUpdated),
    SalesOrderSubmitted(SalesOrderSubmitted),
    OrderConfirmed(OrderConfirmed),
    OrderShipped(OrderShipped),
    OrderCancelled(OrderCancelled),
    SalesOrderDeleted(SalesOrderDeleted),
}

impl Event for SalesOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SalesOrderEvent::SalesOrderCreated(_) => "sales.order.created",
            SalesOrderEvent::SalesOrderUpdated(_) => "sales.order.updated",
            SalesOrderEvent::SalesOrderSubmitted(_) => "sales.order.submitted",
            SalesOrderEvent::OrderConfirmed(_) => "sales.order.confirmed",
            SalesOrderEvent::OrderShipped(_) => "sales.order.shipped",
            SalesOrderEvent::OrderCancelled(_) => "sales.order.cancelled",
            SalesOrderEvent::SalesOrderDeleted(_) => "sales.order.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SalesOrderEvent::SalesOrderCreated(e) => e.occurred_at,
            SalesOrderEvent::SalesOrderUpdated(e) => e.occurred_at,
            SalesOrderEvent::SalesOrderSubmitted(e) => e.occurred_at,
            SalesOrderEvent::OrderConfirmed(e) => e.occurred_at,
            SalesOrderEvent::OrderShipped(e) => e.occurred_at,
            SalesOrderEvent::OrderCancelled(e) => e.occurred_at,
            SalesOrderEvent::SalesOrderDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SalesOrder {
    type Command = SalesOrderCommand;
    type Event = SalesOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SalesOrderEvent::SalesOrderCreated(e) => {
                self.id = e.order_id;
                self.customer = Some(e.customer);
                self.status = SalesOrderStatus::Draft;
                self.lines = e.lines.clone();
                self.notes = e.notes.clone();
                self.created = true;
            }
            SalesOrderEvent::SalesOrderUpdated(e) => {
                self.lines = e.lines.clone();
                self.notes = e.notes.clone();
            }
            SalesOrderEvent::SalesOrderSubmitted(_) => {
                self.status = SalesOrderStatus::Pending;
            }
            SalesOrderEvent::OrderConfirmed(e) => {
                for r in &e.reservations {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == r.line_no) {
                        line.reserved = r.quantity;
                        line.reservation = Some(r.reservation_id);
                    }
                }
                self.warehouse = Some(e.warehouse);
                self.confirm_key = Some(e.idempotency_key.clone());
                self.confirmed_at = Some(e.occurred_at);
                self.status = SalesOrderStatus::Confirmed;
            }
            SalesOrderEvent::OrderShipped(e) => {
                for s in &e.shipments {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == s.line_no) {
                        line.delivered += s.quantity;
                    }
                }
                self.ship_keys.push(e.idempotency_key.clone());
                if self.lines.iter().all(|l| l.delivered == l.quantity) {
                    self.status = SalesOrderStatus::Shipped;
                    self.shipped_at = Some(e.occurred_at);
                } else {
                    self.status = SalesOrderStatus::PartiallyShipped;
                }
            }
            SalesOrderEvent::OrderCancelled(e) => {
                // Released holds no longer count as reserved for the line.
                for r in &e.released {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == r.line_no) {
                        line.reserved = line.delivered;
                    }
                }
                self.cancel_key = Some(e.idempotency_key.clone());
                self.cancelled_at = Some(e.occurred_at);
                self.status = SalesOrderStatus::Cancelled;
            }
            SalesOrderEvent::SalesOrderDeleted(_) => {
                self.deleted = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SalesOrderCommand::CreateSalesOrder(cmd) => self.handle_create(cmd),
            SalesOrderCommand::UpdateSalesOrder(cmd) => self.handle_update(cmd),
            SalesOrderCommand::SubmitSalesOrder(cmd) => self.handle_submit(cmd),
            SalesOrderCommand::ConfirmSalesOrder(cmd) => self.handle_confirm(cmd),
            SalesOrderCommand::ShipSalesOrder(cmd) => self.handle_ship(cmd),
            SalesOrderCommand::CancelSalesOrder(cmd) => self.handle_cancel(cmd),
            SalesOrderCommand::DeleteSalesOrder(cmd) => self.handle_delete(cmd),
        }
    }
}

fn build_lines(lines: &[SalesLineInput]) -> Result<Vec<SalesLine>, DomainError> {
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
        out.push(SalesLine {
            line_no: (idx as u32) + 1,
            item: line.item,
            quantity: line.quantity,
            unit_price: line.unit_price,
            reserved: 0,
            delivered: 0,
            reservation: None,
        });
    }
    Ok(out)
}

fn require_key(key: &str) -> Result<(), DomainError> {
    if key.trim().is_empty() {
        return Err(DomainError::validation("idempotencyKey is required"));
    }
    Ok(())
}

impl SalesOrder {
    fn ensure_exists(&self, order_id: SalesOrderId) -> Result<(), DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found(format!("sales order {order_id}")));
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn transition_error(&self, action: &str) -> DomainError {
        DomainError::invalid_transition(format!(
            "cannot {action} a sales order that is {}",
            self.status.as_str()
        ))
    }

    fn handle_create(&self, cmd: &CreateSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("sales order already exists"));
        }

        Ok(vec![SalesOrderEvent::SalesOrderCreated(SalesOrderCreated {
            order_id: cmd.order_id,
            customer: cmd.customer,
            lines: build_lines(&cmd.lines)?,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        if !self.status.is_open_for_edit() {
            return Err(self.transition_error("edit"));
        }

        let lines = match &cmd.lines {
            Some(lines) => build_lines(lines)?,
            None => self.lines.clone(),
        };

        Ok(vec![SalesOrderEvent::SalesOrderUpdated(SalesOrderUpdated {
            order_id: cmd.order_id,
            lines,
            notes: cmd.notes.clone().or_else(|| self.notes.clone()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &SubmitSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        if self.status != SalesOrderStatus::Draft {
            return Err(self.transition_error("submit"));
        }

        Ok(vec![SalesOrderEvent::SalesOrderSubmitted(
            SalesOrderSubmitted {
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_confirm(&self, cmd: &ConfirmSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        if self.confirm_key.as_deref() == Some(cmd.idempotency_key.as_str()) {
            return Ok(vec![]);
        }
        if !self.status.is_open_for_edit() {
            return Err(self.transition_error("confirm"));
        }
        require_key(&cmd.idempotency_key)?;
        if self.lines.is_empty() {
            return Err(DomainError::validation("cannot confirm order without lines"));
        }
        if cmd.reservation_ids.len() != self.lines.len() {
            return Err(DomainError::invariant(
                "one reservation id is required per order line",
            ));
        }

        let reservations = self
            .lines
            .iter()
            .zip(&cmd.reservation_ids)
            .map(|(line, reservation_id)| LineReservation {
                line_no: line.line_no,
                reservation_id: *reservation_id,
                item: line.item,
                quantity: line.quantity,
            })
            .collect();

        Ok(vec![SalesOrderEvent::OrderConfirmed(OrderConfirmed {
            order_id: cmd.order_id,
            warehouse: cmd.warehouse,
            reservations,
            idempotency_key: cmd.idempotency_key.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_ship(&self, cmd: &ShipSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        if self.ship_keys.contains(&cmd.idempotency_key) {
            return Ok(vec![]);
        }
        if !self.status.is_shippable() {
            return Err(self.transition_error("ship"));
        }
        require_key(&cmd.idempotency_key)?;

        let shipments = match &cmd.items {
            None => self
                .lines
                .iter()
                .filter(|l| l.outstanding() > 0)
                .filter_map(|l| {
                    l.reservation.map(|reservation_id| LineShipment {
                        line_no: l.line_no,
                        reservation_id,
                        item: l.item,
                        quantity: l.outstanding(),
                    })
                })
                .collect::<Vec<_>>(),
            Some(items) => self.select_shipments(items)?,
        };

        if shipments.is_empty() {
            return Err(DomainError::validation("nothing left to ship"));
        }

        Ok(vec![SalesOrderEvent::OrderShipped(OrderShipped {
            order_id: cmd.order_id,
            shipments,
            idempotency_key: cmd.idempotency_key.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn select_shipments(&self, items: &[ShipItem]) -> Result<Vec<LineShipment>, DomainError> {
        if items.is_empty() {
            return Err(DomainError::validation("items cannot be an empty list"));
        }

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(items.len());
        for entry in items {
            if !seen.insert(entry.item) {
                return Err(DomainError::validation(format!(
                    "item {} listed more than once",
                    entry.item
                )));
            }
            let line = self
                .lines
                .iter()
                .find(|l| l.item == entry.item)
                .ok_or_else(|| {
                    DomainError::validation(format!(
                        "item {} is not on sales order {}",
                        entry.item, self.id
                    ))
                })?;
            let outstanding = line.outstanding();
            let quantity = entry.quantity.unwrap_or(outstanding);
            if quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "item {}: nothing to ship (outstanding {outstanding})",
                    entry.item
                )));
            }
            if quantity > outstanding {
                return Err(DomainError::validation(format!(
                    "item {}: shipping {quantity} exceeds reserved outstanding {outstanding}",
                    entry.item
                )));
            }
            let reservation_id = line.reservation.ok_or_else(|| {
                DomainError::invariant(format!("line {} has no reservation", line.line_no))
            })?;
            out.push(LineShipment {
                line_no: line.line_no,
                reservation_id,
                item: line.item,
                quantity,
            });
        }
        Ok(out)
    }

    fn handle_cancel(&self, cmd: &CancelSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        if self.cancel_key.as_deref() == Some(cmd.idempotency_key.as_str()) {
            return Ok(vec![]);
        }
        if matches!(
            self.status,
            SalesOrderStatus::Shipped | SalesOrderStatus::Cancelled
        ) {
            return Err(self.transition_error("cancel"));
        }
        require_key(&cmd.idempotency_key)?;

        let released = self
            .lines
            .iter()
            .filter(|l| l.outstanding() > 0)
            .filter_map(|l| {
                l.reservation.map(|reservation_id| LineRelease {
                    line_no: l.line_no,
                    reservation_id,
                    quantity: l.outstanding(),
                })
            })
            .collect();

        Ok(vec![SalesOrderEvent::OrderCancelled(OrderCancelled {
            order_id: cmd.order_id,
            released,
            idempotency_key: cmd.idempotency_key.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        if self.status != SalesOrderStatus::Draft {
            return Err(self.transition_error("delete"));
        }

        Ok(vec![SalesOrderEvent::SalesOrderDeleted(SalesOrderDeleted {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
