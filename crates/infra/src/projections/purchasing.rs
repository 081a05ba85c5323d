use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::RwLock;

use taller_core::{AggregateId, SupplierId};
use taller_events::EventEnvelope;
use taller_purchasing::{LineItem, PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderStatus};

use super::ProjectionError;
use crate::read_model::ReadStore;

pub const PURCHASE_ORDER_AGGREGATE: &str = "purchasing.order";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderReadModel {
    pub id: PurchaseOrderId,
    pub supplier: SupplierId,
    pub status: PurchaseOrderStatus,
    #[serde(rename = "items")]
    pub lines: Vec<LineItem>,
    pub notes: Option<String>,
    pub total: u64,
    /// Keys of every receipt applied, oldest first.
    pub receipt_idempotency_keys: Vec<String>,
    pub cancel_idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "fechaRecepcion")]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(rename = "fechaCancelacion")]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub version: u64,
}

fn order_total(lines: &[LineItem]) -> u64 {
    lines
        .iter()
        .map(|l| l.unit_price.saturating_mul(l.quantity.max(0) as u64))
        .sum()
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

#[derive(Debug)]
pub struct PurchaseOrdersProjection<S>
where
    S: ReadStore<PurchaseOrderId, PurchaseOrderReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> PurchaseOrdersProjection<S>
where
    S: ReadStore<PurchaseOrderId, PurchaseOrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    fn cursor(&self, aggregate_id: AggregateId) -> u64 {
        match self.cursors.read() {
            Ok(c) => c.get(&aggregate_id).copied().unwrap_or(0),
            Err(_) => 0,
        }
    }

    fn advance(&self, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut c) = self.cursors.write() {
            c.insert(aggregate_id, seq);
        }
    }

    pub fn get(&self, order_id: &PurchaseOrderId) -> Option<PurchaseOrderReadModel> {
        self.store.get(order_id)
    }

    /// Newest first.
    pub fn list(&self) -> Vec<PurchaseOrderReadModel> {
        let mut out = self.store.list();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.0.cmp(&a.id.0)));
        out
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != PURCHASE_ORDER_AGGREGATE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let last = self.cursor(aggregate_id);
        if seq == 0 || (seq > last + 1) {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }

        let ev: PurchaseOrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let order_id = match &ev {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.order_id,
            PurchaseOrderEvent::PurchaseOrderUpdated(e) => e.order_id,
            PurchaseOrderEvent::GoodsReceived(e) => e.order_id,
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => e.order_id,
            PurchaseOrderEvent::PurchaseOrderDeleted(e) => e.order_id,
        };
        if order_id.0 != aggregate_id {
            return Err(ProjectionError::StreamMismatch(
                "event order_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.store.upsert(
                    e.order_id,
                    PurchaseOrderReadModel {
                        id: e.order_id,
                        supplier: e.supplier,
                        status: PurchaseOrderStatus::Pending,
                        total: order_total(&e.lines),
                        lines: e.lines,
                        notes: e.notes,
                        receipt_idempotency_keys: vec![],
                        cancel_idempotency_key: None,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                        received_at: None,
                        cancelled_at: None,
                        version: seq,
                    },
                );
            }
            PurchaseOrderEvent::PurchaseOrderUpdated(e) => {
                let mut rm = self.existing(&e.order_id)?;
                rm.total = order_total(&e.lines);
                rm.lines = e.lines;
                rm.notes = e.notes;
                rm.updated_at = e.occurred_at;
                rm.version = seq;
                self.store.upsert(e.order_id, rm);
            }
            PurchaseOrderEvent::GoodsReceived(e) => {
                let mut rm = self.existing(&e.order_id)?;
                for received in &e.lines {
                    if let Some(line) = rm.lines.iter_mut().find(|l| l.line_no == received.line_no) {
                        line.received += received.quantity;
                    }
                }
                rm.status = derive_status(&rm.lines);
                if rm.status == PurchaseOrderStatus::Received {
                    rm.received_at = Some(e.occurred_at);
                }
                rm.receipt_idempotency_keys.push(e.idempotency_key);
                rm.updated_at = e.occurred_at;
                rm.version = seq;
                self.store.upsert(e.order_id, rm);
            }
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => {
                let mut rm = self.existing(&e.order_id)?;
                rm.status = PurchaseOrderStatus::Cancelled;
                rm.cancel_idempotency_key = Some(e.idempotency_key);
                rm.cancelled_at = Some(e.occurred_at);
                rm.updated_at = e.occurred_at;
                rm.version = seq;
                self.store.upsert(e.order_id, rm);
            }
            PurchaseOrderEvent::PurchaseOrderDeleted(e) => {
                self.store.remove(&e.order_id);
            }
        }

        self.advance(aggregate_id, seq);
        Ok(())
    }

    fn existing(&self, order_id: &PurchaseOrderId) -> Result<PurchaseOrderReadModel, ProjectionError> {
        self.store
            .get(order_id)
            .ok_or_else(|| ProjectionError::MissingRecord(format!("purchase order {order_id}")))
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        self.store.clear();
        if let Ok(mut c) = self.cursors.write() {
            c.clear();
        }

        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
