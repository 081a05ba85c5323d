//! End-to-end tests for the order workflows.
//!
//! Tests: order action → ledger transaction + event store → read model
//!
//! Verifies:
//! - Receipts, confirmations, shipments and cancellations move stock correctly
//! - Retries with the same idempotency key never re-apply effects
//! - Failed confirmations leave no hold behind
//! - Concurrent orders never over-reserve a stock row

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use taller_core::{CustomerId, ItemId, SupplierId, WarehouseId};
    use taller_inventory::{
        MovementKind, MovementRequest, NewItem, NewWarehouse, ReservationStatus, StockKey,
        WarehouseKind, WarehouseStatus,
    };
    use taller_purchasing::{NewLine, PurchaseOrderId, PurchaseOrderStatus, ReceiptItem};
    use taller_sales::{SalesLineInput, SalesOrderId, SalesOrderStatus, ShipItem};

    use crate::command_dispatcher::DispatchError;
    use crate::config::ServiceConfig;
    use crate::ledger::{MovementFilter, ReservationFilter};
    use crate::workflows::{InventoryServices, NewPurchaseOrder, NewSalesOrder};

    fn services() -> InventoryServices {
        InventoryServices::in_memory(ServiceConfig::default())
    }

    fn item(svc: &InventoryServices, code: &str) -> ItemId {
        svc.ledger
            .create_item(NewItem {
                code: code.to_string(),
                name: format!("Repuesto {code}"),
                brand: None,
                model: None,
                category: Some("motor".to_string()),
                unit: None,
                cost_price: 500,
                sale_price: 900,
                min_stock: 0,
                max_stock: None,
            })
            .unwrap()
            .id
    }

    fn warehouse(svc: &InventoryServices, name: &str) -> WarehouseId {
        svc.ledger
            .create_warehouse(NewWarehouse {
                name: name.to_string(),
                kind: WarehouseKind::Workshop,
                capacity: Some(1000),
                location: None,
                status: WarehouseStatus::Active,
            })
            .unwrap()
            .id
    }

    fn stock(svc: &InventoryServices, item: ItemId, wh: WarehouseId) -> (i64, i64) {
        let row = svc.ledger.get_stock(StockKey::new(item, wh)).unwrap();
        (row.quantity(), row.reserved())
    }

    fn sales_order(svc: &InventoryServices, lines: &[(ItemId, i64)]) -> SalesOrderId {
        svc.sales
            .create(NewSalesOrder {
                customer: CustomerId::new(),
                lines: lines
                    .iter()
                    .map(|(item, q)| SalesLineInput {
                        item: *item,
                        quantity: *q,
                        unit_price: 900,
                    })
                    .collect(),
                notes: None,
            })
            .unwrap()
            .id
    }

    #[test]
    fn scenario_b_partial_receipt_is_idempotent() {
        let svc = services();
        let (x, w) = (item(&svc, "X"), warehouse(&svc, "W"));

        let po = svc
            .purchasing
            .create(NewPurchaseOrder {
                supplier: SupplierId::new(),
                lines: vec![NewLine {
                    item: x,
                    quantity: 20,
                    unit_price: 450,
                }],
                notes: None,
            })
            .unwrap();
        assert_eq!(po.status, PurchaseOrderStatus::Pending);

        let items = vec![ReceiptItem { item: x, quantity: 12 }];
        let first = svc
            .purchasing
            .receive(po.id, w, items.clone(), "rcv-1".to_string())
            .unwrap();
        assert_eq!(first.status, PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(first.lines[0].received, 12);

        let again = svc
            .purchasing
            .receive(po.id, w, items, "rcv-1".to_string())
            .unwrap();
        assert_eq!(again, first);

        assert_eq!(stock(&svc, x, w), (12, 0));
        let moves = svc.ledger.list_movements(&MovementFilter::default());
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].kind, MovementKind::Inbound);
        assert_eq!(moves[0].quantity, 12);
        assert_eq!(moves[0].unit_cost, 450);
        assert_eq!(moves[0].reference.as_deref(), Some(format!("purchaseOrder:{}", po.id).as_str()));
    }

    #[test]
    fn over_receipt_is_rejected_and_full_receipt_closes_order() {
        let svc = services();
        let (x, w) = (item(&svc, "X"), warehouse(&svc, "W"));
        let po = svc
            .purchasing
            .create(NewPurchaseOrder {
                supplier: SupplierId::new(),
                lines: vec![NewLine { item: x, quantity: 5, unit_price: 100 }],
                notes: None,
            })
            .unwrap();

        let err = svc
            .purchasing
            .receive(po.id, w, vec![ReceiptItem { item: x, quantity: 6 }], "k1".to_string())
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
        assert_eq!(stock(&svc, x, w), (0, 0));

        let done = svc
            .purchasing
            .receive(po.id, w, vec![ReceiptItem { item: x, quantity: 5 }], "k2".to_string())
            .unwrap();
        assert_eq!(done.status, PurchaseOrderStatus::Received);
        assert!(done.received_at.is_some());

        assert!(matches!(
            svc.purchasing.cancel(po.id, "c1".to_string()),
            Err(DispatchError::InvalidTransition(_))
        ));
    }

    #[test]
    fn receipt_key_reused_with_different_payload_is_conflict() {
        let svc = services();
        let (x, w) = (item(&svc, "X"), warehouse(&svc, "W"));
        let po = svc
            .purchasing
            .create(NewPurchaseOrder {
                supplier: SupplierId::new(),
                lines: vec![NewLine { item: x, quantity: 10, unit_price: 100 }],
                notes: None,
            })
            .unwrap();

        svc.purchasing
            .receive(po.id, w, vec![ReceiptItem { item: x, quantity: 2 }], "k".to_string())
            .unwrap();
        let err = svc
            .purchasing
            .receive(po.id, w, vec![ReceiptItem { item: x, quantity: 3 }], "k".to_string())
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
        assert_eq!(stock(&svc, x, w), (2, 0));
    }

    #[test]
    fn receipt_into_inactive_warehouse_changes_nothing() {
        let svc = services();
        let (x, w) = (item(&svc, "X"), warehouse(&svc, "W"));
        svc.ledger
            .update_warehouse(
                w,
                taller_inventory::WarehousePatch {
                    status: Some(WarehouseStatus::Inactive),
                    ..Default::default()
                },
            )
            .unwrap();
        let po = svc
            .purchasing
            .create(NewPurchaseOrder {
                supplier: SupplierId::new(),
                lines: vec![NewLine { item: x, quantity: 10, unit_price: 100 }],
                notes: None,
            })
            .unwrap();

        let err = svc
            .purchasing
            .receive(po.id, w, vec![ReceiptItem { item: x, quantity: 2 }], "k".to_string())
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        // Neither the order stream nor the ledger moved.
        let rm = svc.purchasing.get(po.id).unwrap();
        assert_eq!(rm.lines[0].received, 0);
        assert_eq!(rm.version, 1);
        assert!(svc.ledger.list_movements(&MovementFilter::default()).is_empty());
    }

    #[test]
    fn scenario_c_ship_all_consumes_every_reservation() {
        let svc = services();
        let (a, b, w) = (item(&svc, "A"), item(&svc, "B"), warehouse(&svc, "W"));
        svc.ledger.record_movement(MovementRequest::inbound(a, w, 10)).unwrap();
        svc.ledger.record_movement(MovementRequest::inbound(b, w, 10)).unwrap();

        let so = sales_order(&svc, &[(a, 3), (b, 4)]);
        let confirmed = svc.sales.confirm(so, w, "conf-1".to_string()).unwrap();
        assert_eq!(confirmed.status, SalesOrderStatus::Confirmed);
        assert!(confirmed.confirmed_at.is_some());
        assert_eq!(stock(&svc, a, w), (10, 3));
        assert_eq!(stock(&svc, b, w), (10, 4));

        let shipped = svc.sales.ship(so, None, "ship-1".to_string()).unwrap();
        assert_eq!(shipped.status, SalesOrderStatus::Shipped);
        assert!(shipped.shipped_at.is_some());
        assert!(shipped.lines.iter().all(|l| l.delivered == l.quantity));

        assert_eq!(stock(&svc, a, w), (7, 0));
        assert_eq!(stock(&svc, b, w), (6, 0));
        let holds = svc.ledger.list_reservations(&ReservationFilter {
            sales_order: Some(so.0),
            ..Default::default()
        });
        assert_eq!(holds.len(), 2);
        assert!(holds.iter().all(|r| r.status() == ReservationStatus::Consumed));
        assert!(svc.ledger.audit().is_empty());
    }

    #[test]
    fn partial_shipment_then_cancel_releases_only_the_rest() {
        let svc = services();
        let (a, w) = (item(&svc, "A"), warehouse(&svc, "W"));
        svc.ledger.record_movement(MovementRequest::inbound(a, w, 10)).unwrap();

        let so = sales_order(&svc, &[(a, 6)]);
        svc.sales.submit(so).unwrap();
        svc.sales.confirm(so, w, "c".to_string()).unwrap();

        let partial = svc
            .sales
            .ship(so, Some(vec![ShipItem { item: a, quantity: Some(2) }]), "s1".to_string())
            .unwrap();
        assert_eq!(partial.status, SalesOrderStatus::PartiallyShipped);
        assert_eq!(stock(&svc, a, w), (8, 4));

        let cancelled = svc.sales.cancel(so, "x".to_string()).unwrap();
        assert_eq!(cancelled.status, SalesOrderStatus::Cancelled);
        assert_eq!(cancelled.lines[0].delivered, 2);
        assert_eq!(stock(&svc, a, w), (8, 0));
    }

    #[test]
    fn scenario_d_cancel_releases_and_blocks_shipping() {
        let svc = services();
        let (a, w) = (item(&svc, "A"), warehouse(&svc, "W"));
        svc.ledger.record_movement(MovementRequest::inbound(a, w, 10)).unwrap();
        let before = stock(&svc, a, w);

        let so = sales_order(&svc, &[(a, 7)]);
        svc.sales.confirm(so, w, "c".to_string()).unwrap();
        assert_eq!(stock(&svc, a, w), (10, 7));

        let cancelled = svc.sales.cancel(so, "x".to_string()).unwrap();
        assert_eq!(cancelled.status, SalesOrderStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());
        assert_eq!(stock(&svc, a, w), before);

        let holds = svc.ledger.list_reservations(&ReservationFilter {
            sales_order: Some(so.0),
            ..Default::default()
        });
        assert!(holds.iter().all(|r| r.status() == ReservationStatus::Released));

        assert!(matches!(
            svc.sales.ship(so, None, "s".to_string()),
            Err(DispatchError::InvalidTransition(_))
        ));
    }

    #[test]
    fn order_actions_replay_with_same_key() {
        let svc = services();
        let (a, w) = (item(&svc, "A"), warehouse(&svc, "W"));
        svc.ledger.record_movement(MovementRequest::inbound(a, w, 10)).unwrap();
        let so = sales_order(&svc, &[(a, 4)]);

        let c1 = svc.sales.confirm(so, w, "c".to_string()).unwrap();
        let c2 = svc.sales.confirm(so, w, "c".to_string()).unwrap();
        assert_eq!(c1, c2);
        assert_eq!(stock(&svc, a, w), (10, 4));

        let s1 = svc.sales.ship(so, None, "s".to_string()).unwrap();
        let s2 = svc.sales.ship(so, None, "s".to_string()).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(stock(&svc, a, w), (6, 0));

        // Same key, different warehouse.
        let other = warehouse(&svc, "Otro");
        assert!(matches!(
            svc.sales.confirm(so, other, "c".to_string()),
            Err(DispatchError::Conflict(_))
        ));

        let so2 = sales_order(&svc, &[(a, 1)]);
        let x1 = svc.sales.cancel(so2, "k".to_string()).unwrap();
        let x2 = svc.sales.cancel(so2, "k".to_string()).unwrap();
        assert_eq!(x1, x2);
    }

    #[test]
    fn failed_confirmation_rolls_back_earlier_lines() {
        let svc = services();
        let (a, b, w) = (item(&svc, "A"), item(&svc, "B"), warehouse(&svc, "W"));
        svc.ledger.record_movement(MovementRequest::inbound(a, w, 10)).unwrap();
        svc.ledger.record_movement(MovementRequest::inbound(b, w, 1)).unwrap();

        let so = sales_order(&svc, &[(a, 5), (b, 3)]);
        let err = svc.sales.confirm(so, w, "c".to_string()).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::InsufficientStock { requested: 3, available: 1, .. }
        ));

        assert_eq!(stock(&svc, a, w), (10, 0));
        assert_eq!(stock(&svc, b, w), (1, 0));
        let holds = svc.ledger.list_reservations(&ReservationFilter {
            sales_order: Some(so.0),
            ..Default::default()
        });
        assert_eq!(holds.len(), 1);
        assert_eq!(holds[0].status(), ReservationStatus::Cancelled);
        assert_eq!(svc.sales.get(so).unwrap().status, SalesOrderStatus::Draft);

        // Failures are not remembered: the same key works once stock arrives.
        svc.ledger.record_movement(MovementRequest::inbound(b, w, 5)).unwrap();
        let ok = svc.sales.confirm(so, w, "c".to_string()).unwrap();
        assert_eq!(ok.status, SalesOrderStatus::Confirmed);
        assert_eq!(stock(&svc, b, w), (6, 3));
    }

    #[test]
    fn order_reservations_are_driven_only_by_the_order() {
        let svc = services();
        let (a, w) = (item(&svc, "A"), warehouse(&svc, "W"));
        svc.ledger.record_movement(MovementRequest::inbound(a, w, 10)).unwrap();
        let so = sales_order(&svc, &[(a, 2)]);
        svc.sales.confirm(so, w, "c".to_string()).unwrap();

        let hold = svc.ledger.list_reservations(&ReservationFilter {
            sales_order: Some(so.0),
            ..Default::default()
        })[0]
            .clone();
        assert!(matches!(
            svc.ledger.consume_reservation(hold.id(), None),
            Err(DispatchError::Conflict(_))
        ));
    }

    #[test]
    fn concurrent_confirmations_never_over_reserve() {
        let svc = Arc::new(InventoryServices::in_memory(ServiceConfig {
            lock_timeout: Duration::from_secs(10),
            ..ServiceConfig::default()
        }));
        let (a, w) = (item(&svc, "A"), warehouse(&svc, "W"));
        svc.ledger.record_movement(MovementRequest::inbound(a, w, 20)).unwrap();

        let orders: Vec<SalesOrderId> = (0..12).map(|_| sales_order(&svc, &[(a, 3)])).collect();
        let handles: Vec<_> = orders
            .into_iter()
            .map(|so| {
                let svc = svc.clone();
                std::thread::spawn(move || svc.sales.confirm(so, w, format!("c-{so}")).is_ok())
            })
            .collect();
        let confirmed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(confirmed, 6);
        assert_eq!(stock(&svc, a, w), (20, 18));
    }

    #[test]
    fn transfer_is_atomic_across_rows() {
        let svc = services();
        let a = item(&svc, "A");
        let (from, to) = (warehouse(&svc, "Principal"), warehouse(&svc, "Taller"));
        svc.ledger.record_movement(MovementRequest::inbound(a, from, 4)).unwrap();

        svc.ledger
            .record_movement(MovementRequest::transfer(a, from, to, 3))
            .unwrap();
        assert_eq!(stock(&svc, a, from), (1, 0));
        assert_eq!(stock(&svc, a, to), (3, 0));

        assert!(svc
            .ledger
            .record_movement(MovementRequest::transfer(a, from, to, 2))
            .is_err());
        assert_eq!(stock(&svc, a, from), (1, 0));
        assert_eq!(stock(&svc, a, to), (3, 0));
        assert!(svc.ledger.audit().is_empty());
    }

    #[test]
    fn read_models_rebuild_from_the_event_store() {
        let svc = services();
        let (a, w) = (item(&svc, "A"), warehouse(&svc, "W"));
        svc.ledger.record_movement(MovementRequest::inbound(a, w, 10)).unwrap();
        let so = sales_order(&svc, &[(a, 2)]);
        let live = svc.sales.confirm(so, w, "c".to_string()).unwrap();

        svc.sales.rebuild().unwrap();
        assert_eq!(svc.sales.get(so).unwrap(), live);

        svc.purchasing.rebuild().unwrap();
        assert!(svc.purchasing.list(&Default::default()).is_empty());
    }

    #[test]
    fn keys_already_applied_to_the_order_survive_expiry() {
        let svc = InventoryServices::in_memory(ServiceConfig {
            idempotency_ttl: Duration::ZERO,
            ..ServiceConfig::default()
        });
        let (a, w) = (item(&svc, "A"), warehouse(&svc, "W"));
        svc.ledger.record_movement(MovementRequest::inbound(a, w, 10)).unwrap();
        let so = sales_order(&svc, &[(a, 6)]);

        let confirmed = svc.sales.confirm(so, w, "c".to_string()).unwrap();
        assert_eq!(svc.sales.confirm(so, w, "c".to_string()).unwrap(), confirmed);
        assert!(matches!(
            svc.sales.confirm(so, w, "c2".to_string()),
            Err(DispatchError::InvalidTransition(_))
        ));
        assert_eq!(stock(&svc, a, w), (10, 6));

        let items = Some(vec![ShipItem { item: a, quantity: Some(2) }]);
        let shipped = svc.sales.ship(so, items.clone(), "s1".to_string()).unwrap();
        assert_eq!(svc.sales.ship(so, items, "s1".to_string()).unwrap(), shipped);
        assert_eq!(stock(&svc, a, w), (8, 4));

        let cancelled = svc.sales.cancel(so, "x1".to_string()).unwrap();
        assert_eq!(svc.sales.cancel(so, "x1".to_string()).unwrap(), cancelled);
        assert_eq!(stock(&svc, a, w), (8, 0));
        assert!(svc.ledger.audit().is_empty());
    }

    #[test]
    fn receipt_key_survives_expiry() {
        let svc = InventoryServices::in_memory(ServiceConfig {
            idempotency_ttl: Duration::ZERO,
            ..ServiceConfig::default()
        });
        let (x, w) = (item(&svc, "X"), warehouse(&svc, "W"));
        let po = svc
            .purchasing
            .create(NewPurchaseOrder {
                supplier: SupplierId::new(),
                lines: vec![NewLine { item: x, quantity: 5, unit_price: 100 }],
                notes: None,
            })
            .unwrap();

        let items = vec![ReceiptItem { item: x, quantity: 2 }];
        let first = svc.purchasing.receive(po.id, w, items.clone(), "r1".to_string()).unwrap();
        assert_eq!(svc.purchasing.receive(po.id, w, items, "r1".to_string()).unwrap(), first);
        assert_eq!(stock(&svc, x, w), (2, 0));
        assert_eq!(svc.ledger.list_movements(&MovementFilter::default()).len(), 1);
    }

    #[test]
    fn order_ids_do_not_cross_order_kinds() {
        let svc = services();
        let (x, w) = (item(&svc, "X"), warehouse(&svc, "W"));
        let po = svc
            .purchasing
            .create(NewPurchaseOrder {
                supplier: SupplierId::new(),
                lines: vec![NewLine { item: x, quantity: 5, unit_price: 100 }],
                notes: None,
            })
            .unwrap();
        let as_sales = SalesOrderId::new(po.id.0);

        assert!(matches!(
            svc.sales.confirm(as_sales, w, "k".to_string()),
            Err(DispatchError::NotFound(_))
        ));
        assert!(matches!(
            svc.sales.update(as_sales, None, Some("nota".to_string())),
            Err(DispatchError::NotFound(_))
        ));
        assert!(matches!(svc.sales.get(as_sales), Err(DispatchError::NotFound(_))));

        svc.ledger.record_movement(MovementRequest::inbound(x, w, 5)).unwrap();
        let so = sales_order(&svc, &[(x, 1)]);
        let as_purchase = PurchaseOrderId::new(so.0);
        assert!(matches!(
            svc.purchasing.receive(
                as_purchase,
                w,
                vec![ReceiptItem { item: x, quantity: 1 }],
                "r".to_string()
            ),
            Err(DispatchError::NotFound(_))
        ));
        assert!(matches!(
            svc.purchasing.cancel(as_purchase, "c".to_string()),
            Err(DispatchError::NotFound(_))
        ));
        assert_eq!(stock(&svc, x, w), (5, 0));
    }
}
