use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use taller_core::{AggregateId, CustomerId, DomainError, ReservationId, WarehouseId};
use taller_inventory::StockKey;
use taller_sales::{
    CancelSalesOrder, ConfirmSalesOrder, CreateSalesOrder, DeleteSalesOrder, SalesLineInput,
    SalesOrder, SalesOrderCommand, SalesOrderEvent, SalesOrderId, SalesOrderStatus, ShipItem,
    ShipSalesOrder, SubmitSalesOrder, UpdateSalesOrder,
};

use super::{OrderContext, envelopes, fingerprint, require_key};
use crate::command_dispatcher::{Decision, DispatchError};
use crate::event_store::{EventStore, StoredEvent};
use crate::idempotency::IdempotencyKey;
use crate::projections::{SALES_ORDER_AGGREGATE, SalesOrderReadModel, SalesOrdersProjection};
use crate::read_model::InMemoryReadStore;

pub type SalesOrderReadStore = Arc<InMemoryReadStore<SalesOrderId, SalesOrderReadModel>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSalesOrder {
    pub customer: CustomerId,
    #[serde(default)]
    pub lines: Vec<SalesLineInput>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SalesOrderFilter {
    pub status: Option<SalesOrderStatus>,
    pub customer: Option<CustomerId>,
}

#[derive(Serialize)]
struct ConfirmRequest {
    warehouse: WarehouseId,
}

#[derive(Serialize)]
struct ShipRequest<'a> {
    items: Option<&'a [ShipItem]>,
}

fn empty(id: AggregateId) -> SalesOrder {
    SalesOrder::empty(SalesOrderId::new(id))
}

fn resource(order_id: SalesOrderId) -> String {
    format!("salesOrder:{order_id}")
}

/// Stock row every line of a decided order action touches.
fn order_keys(decision: &Decision<SalesOrder>) -> Result<Vec<StockKey>, DispatchError> {
    let mut keys = Vec::new();
    for ev in &decision.events {
        match ev {
            SalesOrderEvent::OrderConfirmed(e) => {
                keys.extend(e.reservations.iter().map(|r| StockKey::new(r.item, e.warehouse)));
            }
            SalesOrderEvent::OrderShipped(e) => {
                let warehouse = confirmed_warehouse(&decision.aggregate)?;
                keys.extend(e.shipments.iter().map(|s| StockKey::new(s.item, warehouse)));
            }
            SalesOrderEvent::OrderCancelled(e) if !e.released.is_empty() => {
                let warehouse = confirmed_warehouse(&decision.aggregate)?;
                let order = &decision.aggregate;
                keys.extend(e.released.iter().filter_map(|r| {
                    order
                        .lines()
                        .iter()
                        .find(|l| l.line_no == r.line_no)
                        .map(|l| StockKey::new(l.item, warehouse))
                }));
            }
            _ => {}
        }
    }
    Ok(keys)
}

fn confirmed_warehouse(order: &SalesOrder) -> Result<WarehouseId, DispatchError> {
    order.warehouse().ok_or_else(|| {
        DomainError::invariant(format!(
            "sales order {} holds reservations but has no warehouse",
            order.id_typed()
        ))
        .into()
    })
}

#[derive(Debug)]
pub struct SalesOrderService {
    ctx: OrderContext,
    projection: SalesOrdersProjection<SalesOrderReadStore>,
}

impl SalesOrderService {
    pub fn new(ctx: OrderContext, store: SalesOrderReadStore) -> Self {
        Self {
            ctx,
            projection: SalesOrdersProjection::new(store),
        }
    }

    pub fn get(&self, order_id: SalesOrderId) -> Result<SalesOrderReadModel, DispatchError> {
        self.projection
            .get(&order_id)
            .ok_or_else(|| DomainError::not_found(format!("sales order {order_id}")).into())
    }

    /// Newest first.
    pub fn list(&self, filter: &SalesOrderFilter) -> Vec<SalesOrderReadModel> {
        self.projection
            .list()
            .into_iter()
            .filter(|o| filter.status.is_none_or(|s| o.status == s))
            .filter(|o| filter.customer.is_none_or(|c| o.customer == c))
            .collect()
    }

    pub fn create(&self, input: NewSalesOrder) -> Result<SalesOrderReadModel, DispatchError> {
        let order_id = SalesOrderId::new(AggregateId::new());
        let out = self.ctx.dispatcher.dispatch(
            order_id.0,
            SALES_ORDER_AGGREGATE,
            SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
                order_id,
                customer: input.customer,
                lines: input.lines,
                notes: input.notes,
                occurred_at: Utc::now(),
            }),
            empty,
        )?;
        let rm = self.project(order_id, &out.committed)?;
        info!(order_id = %order_id, customer = %rm.customer, lines = rm.lines.len(), "sales order created");
        Ok(rm)
    }

    pub fn update(
        &self,
        order_id: SalesOrderId,
        lines: Option<Vec<SalesLineInput>>,
        notes: Option<String>,
    ) -> Result<SalesOrderReadModel, DispatchError> {
        let _order = self.ctx.lock_order(order_id.0)?;
        let out = self.ctx.dispatcher.dispatch(
            order_id.0,
            SALES_ORDER_AGGREGATE,
            SalesOrderCommand::UpdateSalesOrder(UpdateSalesOrder {
                order_id,
                lines,
                notes,
                occurred_at: Utc::now(),
            }),
            empty,
        )?;
        let rm = self.project(order_id, &out.committed)?;
        info!(order_id = %order_id, "sales order updated");
        Ok(rm)
    }

    /// `borrador -> pendiente`.
    pub fn submit(&self, order_id: SalesOrderId) -> Result<SalesOrderReadModel, DispatchError> {
        let _order = self.ctx.lock_order(order_id.0)?;
        let out = self.ctx.dispatcher.dispatch(
            order_id.0,
            SALES_ORDER_AGGREGATE,
            SalesOrderCommand::SubmitSalesOrder(SubmitSalesOrder {
                order_id,
                occurred_at: Utc::now(),
            }),
            empty,
        )?;
        let rm = self.project(order_id, &out.committed)?;
        info!(order_id = %order_id, "sales order submitted");
        Ok(rm)
    }

    pub fn delete(&self, order_id: SalesOrderId) -> Result<(), DispatchError> {
        let _order = self.ctx.lock_order(order_id.0)?;
        let out = self.ctx.dispatcher.dispatch(
            order_id.0,
            SALES_ORDER_AGGREGATE,
            SalesOrderCommand::DeleteSalesOrder(DeleteSalesOrder {
                order_id,
                occurred_at: Utc::now(),
            }),
            empty,
        )?;
        for env in envelopes(&out.committed) {
            self.projection.apply_envelope(&env)?;
        }
        info!(order_id = %order_id, "sales order deleted");
        Ok(())
    }

    /// Reserve every line in `warehouse`, all or nothing.
    ///
    /// When a line cannot be reserved, the holds already taken for earlier
    /// lines are cancelled in the same transaction and the order is left as it was.
    pub fn confirm(
        &self,
        order_id: SalesOrderId,
        warehouse: WarehouseId,
        idempotency_key: String,
    ) -> Result<SalesOrderReadModel, DispatchError> {
        require_key(&idempotency_key)?;
        let _order = self.ctx.lock_order(order_id.0)?;

        let key = IdempotencyKey::new(resource(order_id), "confirm", idempotency_key.clone());
        let fp = fingerprint(&ConfirmRequest { warehouse })?;
        if let Some(previous) = self.ctx.replay(&key, &fp)? {
            return Ok(previous);
        }

        let decision = self.ctx.dispatcher.decide_with(
            order_id.0,
            SALES_ORDER_AGGREGATE,
            empty,
            |order: &SalesOrder| {
                SalesOrderCommand::ConfirmSalesOrder(ConfirmSalesOrder {
                    order_id,
                    warehouse,
                    reservation_ids: order.lines().iter().map(|_| ReservationId::new()).collect(),
                    idempotency_key,
                    occurred_at: Utc::now(),
                })
            },
        )?;
        if decision.events.is_empty() {
            return self.already_applied(order_id, &key);
        }

        let holds: Vec<(ReservationId, StockKey, i64)> = decision
            .events
            .iter()
            .flat_map(|ev| match ev {
                SalesOrderEvent::OrderConfirmed(e) => e
                    .reservations
                    .iter()
                    .map(|r| (r.reservation_id, StockKey::new(r.item, e.warehouse), r.quantity))
                    .collect(),
                _ => vec![],
            })
            .collect();
        let keys = order_keys(&decision)?;

        let dispatcher = &self.ctx.dispatcher;
        let outcome = self.ctx.ledger.transaction(keys, |tx| {
            let mut taken = Vec::with_capacity(holds.len());
            for (id, stock_key, quantity) in &holds {
                match tx.reserve(*id, *stock_key, *quantity, Some(order_id.0)) {
                    Ok(_) => taken.push(*id),
                    Err(e) => {
                        for earlier in taken {
                            tx.cancel(earlier)?;
                        }
                        return Ok(Err(e));
                    }
                }
            }
            dispatcher.commit(decision).map(Ok)
        })?;

        let dispatched = outcome.inspect_err(|e| {
            warn!(order_id = %order_id, warehouse = %warehouse, error = %e, "confirmation rolled back");
        })?;

        let rm = self.project(order_id, &dispatched.committed)?;
        self.ctx.remember(key, fp, &rm);
        info!(
            order_id = %order_id,
            warehouse = %warehouse,
            reservations = holds.len(),
            quantity = holds.iter().map(|h| h.2).sum::<i64>(),
            "sales order confirmed"
        );
        Ok(rm)
    }

    /// Consume the reservations of the given lines (all outstanding lines when `items` is `None`).
    pub fn ship(
        &self,
        order_id: SalesOrderId,
        items: Option<Vec<ShipItem>>,
        idempotency_key: String,
    ) -> Result<SalesOrderReadModel, DispatchError> {
        require_key(&idempotency_key)?;
        let _order = self.ctx.lock_order(order_id.0)?;

        let key = IdempotencyKey::new(resource(order_id), "ship", idempotency_key.clone());
        let fp = fingerprint(&ShipRequest {
            items: items.as_deref(),
        })?;
        if let Some(previous) = self.ctx.replay(&key, &fp)? {
            return Ok(previous);
        }

        let decision = self.ctx.dispatcher.decide(
            order_id.0,
            SALES_ORDER_AGGREGATE,
            empty,
            SalesOrderCommand::ShipSalesOrder(ShipSalesOrder {
                order_id,
                items,
                idempotency_key,
                occurred_at: Utc::now(),
            }),
        )?;
        if decision.events.is_empty() {
            return self.already_applied(order_id, &key);
        }

        let consumptions: Vec<(ReservationId, i64)> = decision
            .events
            .iter()
            .flat_map(|ev| match ev {
                SalesOrderEvent::OrderShipped(e) => e
                    .shipments
                    .iter()
                    .map(|s| (s.reservation_id, s.quantity))
                    .collect(),
                _ => vec![],
            })
            .collect();
        let keys = order_keys(&decision)?;
        let reference = resource(order_id);

        let dispatcher = &self.ctx.dispatcher;
        let dispatched = self
            .ctx
            .ledger
            .transaction(keys, |tx| {
                for (reservation, quantity) in &consumptions {
                    tx.consume(*reservation, Some(*quantity), Some(reference.clone()))?;
                }
                dispatcher.commit(decision)
            })
            .inspect_err(|e| warn!(order_id = %order_id, error = %e, "shipment rejected"))?;

        let rm = self.project(order_id, &dispatched.committed)?;
        self.ctx.remember(key, fp, &rm);
        info!(
            order_id = %order_id,
            lines = consumptions.len(),
            quantity = consumptions.iter().map(|c| c.1).sum::<i64>(),
            status = rm.status.as_str(),
            "sales order shipped"
        );
        Ok(rm)
    }

    /// Release the unshipped part of every reservation and close the order.
    pub fn cancel(
        &self,
        order_id: SalesOrderId,
        idempotency_key: String,
    ) -> Result<SalesOrderReadModel, DispatchError> {
        require_key(&idempotency_key)?;
        let _order = self.ctx.lock_order(order_id.0)?;

        let key = IdempotencyKey::new(resource(order_id), "cancel", idempotency_key.clone());
        let fp = fingerprint(&())?;
        if let Some(previous) = self.ctx.replay(&key, &fp)? {
            return Ok(previous);
        }

        let decision = self.ctx.dispatcher.decide(
            order_id.0,
            SALES_ORDER_AGGREGATE,
            empty,
            SalesOrderCommand::CancelSalesOrder(CancelSalesOrder {
                order_id,
                idempotency_key,
                occurred_at: Utc::now(),
            }),
        )?;
        if decision.events.is_empty() {
            return self.already_applied(order_id, &key);
        }

        let releases: Vec<ReservationId> = decision
            .events
            .iter()
            .flat_map(|ev| match ev {
                SalesOrderEvent::OrderCancelled(e) => {
                    e.released.iter().map(|r| r.reservation_id).collect()
                }
                _ => vec![],
            })
            .collect();
        let keys = order_keys(&decision)?;

        let dispatcher = &self.ctx.dispatcher;
        let dispatched = self
            .ctx
            .ledger
            .transaction(keys, |tx| {
                for reservation in &releases {
                    tx.release(*reservation)?;
                }
                dispatcher.commit(decision)
            })
            .inspect_err(|e| warn!(order_id = %order_id, error = %e, "cancellation rejected"))?;

        let rm = self.project(order_id, &dispatched.committed)?;
        self.ctx.remember(key, fp, &rm);
        info!(order_id = %order_id, released = releases.len(), "sales order cancelled");
        Ok(rm)
    }

    /// Rebuild the read model from the event store.
    pub fn rebuild(&self) -> Result<(), DispatchError> {
        let events = self.ctx.dispatcher.store().load_all(SALES_ORDER_AGGREGATE)?;
        self.projection
            .rebuild_from_scratch(events.iter().map(StoredEvent::to_envelope))?;
        Ok(())
    }

    /// The order already recorded this key for the action: return it as it stands.
    fn already_applied(
        &self,
        order_id: SalesOrderId,
        key: &IdempotencyKey,
    ) -> Result<SalesOrderReadModel, DispatchError> {
        debug!(order_id = %order_id, action = %key.action, key = %key.key, "key already applied to order");
        self.get(order_id)
    }

    fn project(
        &self,
        order_id: SalesOrderId,
        committed: &[StoredEvent],
    ) -> Result<SalesOrderReadModel, DispatchError> {
        for env in envelopes(committed) {
            self.projection.apply_envelope(&env)?;
        }
        self.projection.get(&order_id).ok_or_else(|| {
            DispatchError::Projection(format!("sales order {order_id} missing from read model"))
        })
    }
}
