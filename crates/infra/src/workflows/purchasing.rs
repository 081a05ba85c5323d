use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use taller_core::{AggregateId, DomainError, SupplierId, WarehouseId};
use taller_inventory::{MovementRequest, StockKey};
use taller_purchasing::{
    CancelPurchaseOrder, CreatePurchaseOrder, DeletePurchaseOrder, NewLine, PurchaseOrder,
    PurchaseOrderCommand, PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderStatus, ReceiptItem,
    ReceiveGoods, UpdatePurchaseOrder,
};

use super::{OrderContext, envelopes, fingerprint, require_key};
use crate::command_dispatcher::DispatchError;
use crate::event_store::{EventStore, StoredEvent};
use crate::idempotency::IdempotencyKey;
use crate::projections::{PURCHASE_ORDER_AGGREGATE, PurchaseOrderReadModel, PurchaseOrdersProjection};
use crate::read_model::InMemoryReadStore;

pub type PurchaseOrderReadStore = Arc<InMemoryReadStore<PurchaseOrderId, PurchaseOrderReadModel>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub supplier: SupplierId,
    pub lines: Vec<NewLine>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurchaseOrderFilter {
    pub status: Option<PurchaseOrderStatus>,
    pub supplier: Option<SupplierId>,
}

#[derive(Serialize)]
struct ReceiptRequest<'a> {
    warehouse: WarehouseId,
    items: &'a [ReceiptItem],
}

fn empty(id: AggregateId) -> PurchaseOrder {
    PurchaseOrder::empty(PurchaseOrderId::new(id))
}

fn resource(order_id: PurchaseOrderId) -> String {
    format!("purchaseOrder:{order_id}")
}

#[derive(Debug)]
pub struct PurchaseOrderService {
    ctx: OrderContext,
    projection: PurchaseOrdersProjection<PurchaseOrderReadStore>,
}

impl PurchaseOrderService {
    pub fn new(ctx: OrderContext, store: PurchaseOrderReadStore) -> Self {
        Self {
            ctx,
            projection: PurchaseOrdersProjection::new(store),
        }
    }

    pub fn get(&self, order_id: PurchaseOrderId) -> Result<PurchaseOrderReadModel, DispatchError> {
        self.projection
            .get(&order_id)
            .ok_or_else(|| DomainError::not_found(format!("purchase order {order_id}")).into())
    }

    /// Newest first.
    pub fn list(&self, filter: &PurchaseOrderFilter) -> Vec<PurchaseOrderReadModel> {
        self.projection
            .list()
            .into_iter()
            .filter(|o| filter.status.is_none_or(|s| o.status == s))
            .filter(|o| filter.supplier.is_none_or(|s| o.supplier == s))
            .collect()
    }

    pub fn create(&self, input: NewPurchaseOrder) -> Result<PurchaseOrderReadModel, DispatchError> {
        let order_id = PurchaseOrderId::new(AggregateId::new());
        let out = self.ctx.dispatcher.dispatch(
            order_id.0,
            PURCHASE_ORDER_AGGREGATE,
            PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                order_id,
                supplier: input.supplier,
                lines: input.lines,
                notes: input.notes,
                occurred_at: Utc::now(),
            }),
            empty,
        )?;
        let rm = self.project(order_id, &out.committed)?;
        info!(order_id = %order_id, supplier = %rm.supplier, lines = rm.lines.len(), "purchase order created");
        Ok(rm)
    }

    pub fn update(
        &self,
        order_id: PurchaseOrderId,
        lines: Option<Vec<NewLine>>,
        notes: Option<String>,
    ) -> Result<PurchaseOrderReadModel, DispatchError> {
        let _order = self.ctx.lock_order(order_id.0)?;
        let out = self.ctx.dispatcher.dispatch(
            order_id.0,
            PURCHASE_ORDER_AGGREGATE,
            PurchaseOrderCommand::UpdatePurchaseOrder(UpdatePurchaseOrder {
                order_id,
                lines,
                notes,
                occurred_at: Utc::now(),
            }),
            empty,
        )?;
        let rm = self.project(order_id, &out.committed)?;
        info!(order_id = %order_id, "purchase order updated");
        Ok(rm)
    }

    pub fn delete(&self, order_id: PurchaseOrderId) -> Result<(), DispatchError> {
        let _order = self.ctx.lock_order(order_id.0)?;
        let out = self.ctx.dispatcher.dispatch(
            order_id.0,
            PURCHASE_ORDER_AGGREGATE,
            PurchaseOrderCommand::DeletePurchaseOrder(DeletePurchaseOrder {
                order_id,
                occurred_at: Utc::now(),
            }),
            empty,
        )?;
        for env in envelopes(&out.committed) {
            self.projection.apply_envelope(&env)?;
        }
        info!(order_id = %order_id, "purchase order deleted");
        Ok(())
    }

    /// Book received goods into `warehouse` as `entrada` movements at the line price.
    pub fn receive(
        &self,
        order_id: PurchaseOrderId,
        warehouse: WarehouseId,
        items: Vec<ReceiptItem>,
        idempotency_key: String,
    ) -> Result<PurchaseOrderReadModel, DispatchError> {
        require_key(&idempotency_key)?;
        let _order = self.ctx.lock_order(order_id.0)?;

        let key = IdempotencyKey::new(resource(order_id), "receive", idempotency_key.clone());
        let fp = fingerprint(&ReceiptRequest {
            warehouse,
            items: &items,
        })?;
        if let Some(previous) = self.ctx.replay(&key, &fp)? {
            return Ok(previous);
        }

        let decision = self.ctx.dispatcher.decide(
            order_id.0,
            PURCHASE_ORDER_AGGREGATE,
            empty,
            PurchaseOrderCommand::ReceiveGoods(ReceiveGoods {
                order_id,
                warehouse,
                items,
                idempotency_key,
                occurred_at: Utc::now(),
            }),
        )?;
        if decision.events.is_empty() {
            return self.already_applied(order_id, &key);
        }

        let reference = resource(order_id);
        let requests: Vec<MovementRequest> = decision
            .events
            .iter()
            .flat_map(|ev| match ev {
                PurchaseOrderEvent::GoodsReceived(e) => e
                    .lines
                    .iter()
                    .map(|l| {
                        MovementRequest::inbound(l.item, e.warehouse, l.quantity)
                            .with_unit_cost(l.unit_cost)
                            .with_reference(reference.clone())
                    })
                    .collect(),
                _ => vec![],
            })
            .collect();
        let keys: Vec<StockKey> = requests
            .iter()
            .map(|r| StockKey::new(r.item, warehouse))
            .collect();
        let units: i64 = requests.iter().map(|r| r.quantity).sum();

        let dispatcher = &self.ctx.dispatcher;
        let dispatched = self
            .ctx
            .ledger
            .transaction(keys, |tx| {
                for request in &requests {
                    tx.record(request)?;
                }
                dispatcher.commit(decision)
            })
            .inspect_err(|e| warn!(order_id = %order_id, error = %e, "receipt rejected"))?;

        let rm = self.project(order_id, &dispatched.committed)?;
        self.ctx.remember(key, fp, &rm);
        info!(
            order_id = %order_id,
            warehouse = %warehouse,
            lines = requests.len(),
            quantity = units,
            status = rm.status.as_str(),
            "goods received"
        );
        Ok(rm)
    }

    /// Close the order; quantities already received stay in stock.
    pub fn cancel(
        &self,
        order_id: PurchaseOrderId,
        idempotency_key: String,
    ) -> Result<PurchaseOrderReadModel, DispatchError> {
        require_key(&idempotency_key)?;
        let _order = self.ctx.lock_order(order_id.0)?;

        let key = IdempotencyKey::new(resource(order_id), "cancel", idempotency_key.clone());
        let fp = fingerprint(&())?;
        if let Some(previous) = self.ctx.replay(&key, &fp)? {
            return Ok(previous);
        }

        let out = self.ctx.dispatcher.dispatch(
            order_id.0,
            PURCHASE_ORDER_AGGREGATE,
            PurchaseOrderCommand::CancelPurchaseOrder(CancelPurchaseOrder {
                order_id,
                idempotency_key,
                occurred_at: Utc::now(),
            }),
            empty,
        )?;
        if out.committed.is_empty() {
            return self.already_applied(order_id, &key);
        }
        let rm = self.project(order_id, &out.committed)?;
        self.ctx.remember(key, fp, &rm);
        info!(order_id = %order_id, "purchase order cancelled");
        Ok(rm)
    }

    /// Rebuild the read model from the event store.
    pub fn rebuild(&self) -> Result<(), DispatchError> {
        let events = self.ctx.dispatcher.store().load_all(PURCHASE_ORDER_AGGREGATE)?;
        self.projection
            .rebuild_from_scratch(events.iter().map(StoredEvent::to_envelope))?;
        Ok(())
    }

    /// The order already recorded this key for the action: return it as it stands.
    fn already_applied(
        &self,
        order_id: PurchaseOrderId,
        key: &IdempotencyKey,
    ) -> Result<PurchaseOrderReadModel, DispatchError> {
        debug!(order_id = %order_id, action = %key.action, key = %key.key, "key already applied to order");
        self.get(order_id)
    }

    fn project(
        &self,
        order_id: PurchaseOrderId,
        committed: &[StoredEvent],
    ) -> Result<PurchaseOrderReadModel, DispatchError> {
        for env in envelopes(committed) {
            self.projection.apply_envelope(&env)?;
        }
        self.projection.get(&order_id).ok_or_else(|| {
            DispatchError::Projection(format!("purchase order {order_id} missing from read model"))
        })
    }
}
