use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use taller_core::{AggregateId, CustomerId, WarehouseId};
use taller_events::EventEnvelope;
use taller_sales::{SalesLine, SalesOrderEvent, SalesOrderId, SalesOrderStatus};

use super::ProjectionError;
use crate::read_model::ReadStore;

pub const SALES_ORDER_AGGREGATE: &str = "sales.order";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesOrderReadModel {
    pub id: SalesOrderId,
    pub customer: CustomerId,
    pub status: SalesOrderStatus,
    #[serde(rename = "items")]
    pub lines: Vec<SalesLine>,
    pub notes: Option<String>,
    pub warehouse: Option<WarehouseId>,
    pub total: u64,
    pub confirm_idempotency_key: Option<String>,
    pub ship_idempotency_keys: Vec<String>,
    pub cancel_idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "fechaConfirmacion")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(rename = "fechaDespacho")]
    pub shipped_at: Option<DateTime<Utc>>,
    #[serde(rename = "fechaCancelacion")]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub version: u64,
}

fn order_total(lines: &[SalesLine]) -> u64 {
    lines
        .iter()
        .map(|l| l.unit_price.saturating_mul(l.quantity.max(0) as u64))
        .sum()
}

#[derive(Debug)]
pub struct SalesOrdersProjection<S>
where
    S: ReadStore<SalesOrderId, SalesOrderReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> SalesOrdersProjection<S>
where
    S: ReadStore<SalesOrderId, SalesOrderReadModel>,
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

    pub fn get(&self, order_id: &SalesOrderId) -> Option<SalesOrderReadModel> {
        self.store.get(order_id)
    }

    /// Newest first.
    pub fn list(&self) -> Vec<SalesOrderReadModel> {
        let mut out = self.store.list();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.0.cmp(&a.id.0)));
        out
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != SALES_ORDER_AGGREGATE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let last = self.cursor(aggregate_id);
        if seq == 0 || seq > last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }

        let ev: SalesOrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let order_id = match &ev {
            SalesOrderEvent::SalesOrderCreated(e) => e.order_id,
            SalesOrderEvent::SalesOrderUpdated(e) => e.order_id,
            SalesOrderEvent::SalesOrderSubmitted(e) => e.order_id,
            SalesOrderEvent::OrderConfirmed(e) => e.order_id,
            SalesOrderEvent::OrderShipped(e) => e.order_id,
            SalesOrderEvent::OrderCancelled(e) => e.order_id,
            SalesOrderEvent::SalesOrderDeleted(e) => e.order_id,
        };
        if order_id.0 != aggregate_id {
            return Err(ProjectionError::StreamMismatch(
                "event order_id does not match envelope aggregate_id".to_string(),
            ));
        }

        let ev = match ev {
            SalesOrderEvent::SalesOrderCreated(e) => {
                self.store.upsert(
                    e.order_id,
                    SalesOrderReadModel {
                        id: e.order_id,
                        customer: e.customer,
                        status: SalesOrderStatus::Draft,
                        total: order_total(&e.lines),
                        lines: e.lines,
                        notes: e.notes,
                        warehouse: None,
                        confirm_idempotency_key: None,
                        ship_idempotency_keys: vec![],
                        cancel_idempotency_key: None,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                        confirmed_at: None,
                        shipped_at: None,
                        cancelled_at: None,
                        version: seq,
                    },
                );
                self.advance(aggregate_id, seq);
                return Ok(());
            }
            SalesOrderEvent::SalesOrderDeleted(e) => {
                self.store.remove(&e.order_id);
                self.advance(aggregate_id, seq);
                return Ok(());
            }
            other => other,
        };

        let mut rm = self
            .store
            .get(&order_id)
            .ok_or_else(|| ProjectionError::MissingRecord(format!("sales order {order_id}")))?;

        match ev {
            SalesOrderEvent::SalesOrderUpdated(e) => {
                rm.total = order_total(&e.lines);
                rm.lines = e.lines;
                rm.notes = e.notes;
                rm.updated_at = e.occurred_at;
            }
            SalesOrderEvent::SalesOrderSubmitted(e) => {
                rm.status = SalesOrderStatus::Pending;
                rm.updated_at = e.occurred_at;
            }
            SalesOrderEvent::OrderConfirmed(e) => {
                for r in &e.reservations {
                    if let Some(line) = rm.lines.iter_mut().find(|l| l.line_no == r.line_no) {
                        line.reserved = r.quantity;
                        line.reservation = Some(r.reservation_id);
                    }
                }
                rm.status = SalesOrderStatus::Confirmed;
                rm.warehouse = Some(e.warehouse);
                rm.confirm_idempotency_key = Some(e.idempotency_key);
                rm.confirmed_at = Some(e.occurred_at);
                rm.updated_at = e.occurred_at;
            }
            SalesOrderEvent::OrderShipped(e) => {
                for s in &e.shipments {
                    if let Some(line) = rm.lines.iter_mut().find(|l| l.line_no == s.line_no) {
                        line.delivered += s.quantity;
                    }
                }
                if rm.lines.iter().all(|l| l.delivered == l.quantity) {
                    rm.status = SalesOrderStatus::Shipped;
                    rm.shipped_at = Some(e.occurred_at);
                } else {
                    rm.status = SalesOrderStatus::PartiallyShipped;
                }
                rm.ship_idempotency_keys.push(e.idempotency_key);
                rm.updated_at = e.occurred_at;
            }
            SalesOrderEvent::OrderCancelled(e) => {
                for r in &e.released {
                    if let Some(line) = rm.lines.iter_mut().find(|l| l.line_no == r.line_no) {
                        line.reserved = line.delivered;
                    }
                }
                rm.status = SalesOrderStatus::Cancelled;
                rm.cancel_idempotency_key = Some(e.idempotency_key);
                rm.cancelled_at = Some(e.occurred_at);
                rm.updated_at = e.occurred_at;
            }
            SalesOrderEvent::SalesOrderCreated(_) | SalesOrderEvent::SalesOrderDeleted(_) => {}
        }

        rm.version = seq;
        self.store.upsert(order_id, rm);
        self.advance(aggregate_id, seq);
        Ok(())
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
