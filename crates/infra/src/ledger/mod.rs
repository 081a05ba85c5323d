//! Inventory ledger: catalog, stock rows, movement log and reservations.
//!
//! Stock rows only change through a [`LedgerTx`] run under [`KeyedLocks`]
//! for every row it touches. A transaction works on staged copies and the
//! books are written in one step when its closure returns `Ok`.
//!
//! Lock order is always: stock keys, then catalog (read), then books.

pub mod locks;
pub mod tx;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use taller_core::{AggregateId, DomainError, ItemId, MovementId, ReservationId, WarehouseId};
use taller_inventory::{
    Item, ItemPatch, Movement, MovementKind, MovementRequest, NewItem, NewWarehouse, Reservation,
    ReservationStatus, Stock, StockKey, Warehouse, WarehousePatch,
};

use crate::command_dispatcher::DispatchError;
use crate::config::ServiceConfig;

pub use locks::{KeyGuard, KeyedLocks, LockTimeout};
pub use tx::LedgerTx;

#[derive(Debug, Default)]
pub(crate) struct Catalog {
    pub items: HashMap<ItemId, Item>,
    pub warehouses: HashMap<WarehouseId, Warehouse>,
}

#[derive(Debug, Default)]
pub(crate) struct Books {
    pub stock: BTreeMap<StockKey, Stock>,
    pub reservations: HashMap<ReservationId, Reservation>,
    pub movements: Vec<Movement>,
}

// Books are only written by `commit`, which cannot panic halfway through a row,
// so a poisoned mutex still guards consistent data.
pub(crate) fn lock_books(books: &Mutex<Books>) -> MutexGuard<'_, Books> {
    books.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ItemFilter {
    pub category: Option<String>,
    /// Case-insensitive match on code or name.
    pub search: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MovementFilter {
    pub item: Option<ItemId>,
    pub warehouse: Option<WarehouseId>,
    pub kind: Option<MovementKind>,
    pub reservation: Option<ReservationId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StockFilter {
    pub item: Option<ItemId>,
    pub warehouse: Option<WarehouseId>,
    /// Only rows at or below the item's `minStock`.
    #[serde(default)]
    pub low_stock: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReservationFilter {
    pub item: Option<ItemId>,
    pub warehouse: Option<WarehouseId>,
    pub status: Option<ReservationStatus>,
    pub sales_order: Option<AggregateId>,
}

/// A stock row whose quantity disagrees with a replay of the movement log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditMismatch {
    pub item: ItemId,
    pub warehouse: WarehouseId,
    pub recorded: i64,
    pub replayed: i64,
}

#[derive(Debug)]
pub struct Ledger {
    catalog: RwLock<Catalog>,
    books: Mutex<Books>,
    locks: KeyedLocks<StockKey>,
    config: ServiceConfig,
}

impl Ledger {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            catalog: RwLock::new(Catalog::default()),
            books: Mutex::new(Books::default()),
            locks: KeyedLocks::new(),
            config,
        }
    }

    /// Run `f` with exclusive access to `keys` and commit what it staged.
    ///
    /// Nothing is written when `f` fails.
    pub fn transaction<T>(
        &self,
        keys: impl IntoIterator<Item = StockKey>,
        f: impl FnOnce(&mut LedgerTx<'_>) -> Result<T, DispatchError>,
    ) -> Result<T, DispatchError> {
        let guard = self.locks.lock_all(keys, self.config.lock_timeout)?;
        let locked: BTreeSet<StockKey> = guard.keys().iter().copied().collect();

        let catalog = self.read_catalog()?;
        let mut tx = LedgerTx::begin(&catalog, &self.books, locked, Utc::now());
        let out = f(&mut tx)?;
        let staged = tx.into_staged();

        let mut books = lock_books(&self.books);
        for (key, row) in staged.rows {
            books.stock.insert(key, row);
        }
        books.reservations.extend(staged.reservations);
        books.movements.extend(staged.movements);
        Ok(out)
    }

    fn read_catalog(&self) -> Result<RwLockReadGuard<'_, Catalog>, DispatchError> {
        self.catalog
            .read()
            .map_err(|_| DispatchError::InvariantViolation("catalog lock poisoned".to_string()))
    }

    fn write_catalog(&self) -> Result<RwLockWriteGuard<'_, Catalog>, DispatchError> {
        self.catalog
            .write()
            .map_err(|_| DispatchError::InvariantViolation("catalog lock poisoned".to_string()))
    }

    // ---- catalog: items ----------------------------------------------------

    pub fn create_item(&self, input: NewItem) -> Result<Item, DispatchError> {
        let item = input.into_item(ItemId::new(), Utc::now())?;
        let mut catalog = self.write_catalog()?;
        ensure_unique_code(&catalog, &item.code, None)?;
        catalog.items.insert(item.id, item.clone());
        info!(item = %item.id, code = %item.code, "item created");
        Ok(item)
    }

    pub fn update_item(&self, id: ItemId, patch: ItemPatch) -> Result<Item, DispatchError> {
        let mut catalog = self.write_catalog()?;
        if let Some(code) = &patch.code {
            ensure_unique_code(&catalog, code, Some(id))?;
        }
        let item = catalog
            .items
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(format!("item {id}")))?;
        item.apply_patch(patch, Utc::now())?;
        Ok(item.clone())
    }

    /// Soft delete: the record stays so movements and reservations keep resolving.
    pub fn delete_item(&self, id: ItemId) -> Result<Item, DispatchError> {
        let mut catalog = self.write_catalog()?;
        let item = catalog
            .items
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(format!("item {id}")))?;
        item.mark_deleted(Utc::now())?;
        info!(item = %id, "item deleted");
        Ok(item.clone())
    }

    pub fn get_item(&self, id: ItemId) -> Result<Item, DispatchError> {
        let catalog = self.read_catalog()?;
        catalog
            .items
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("item {id}")).into())
    }

    pub fn list_items(&self, filter: &ItemFilter) -> Result<Vec<Item>, DispatchError> {
        let catalog = self.read_catalog()?;
        let search = filter.search.as_deref().map(str::to_lowercase);
        let mut items: Vec<Item> = catalog
            .items
            .values()
            .filter(|i| filter.include_deleted || i.is_active())
            .filter(|i| {
                filter
                    .category
                    .as_deref()
                    .is_none_or(|c| i.category.as_deref() == Some(c))
            })
            .filter(|i| {
                search.as_deref().is_none_or(|s| {
                    i.code.to_lowercase().contains(s) || i.name.to_lowercase().contains(s)
                })
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(items)
    }

    // ---- catalog: warehouses -----------------------------------------------

    pub fn create_warehouse(&self, input: NewWarehouse) -> Result<Warehouse, DispatchError> {
        let wh = input.into_warehouse(WarehouseId::new(), Utc::now())?;
        let mut catalog = self.write_catalog()?;
        ensure_unique_name(&catalog, &wh.name, None)?;
        catalog.warehouses.insert(wh.id, wh.clone());
        info!(warehouse = %wh.id, name = %wh.name, "warehouse created");
        Ok(wh)
    }

    pub fn update_warehouse(
        &self,
        id: WarehouseId,
        patch: WarehousePatch,
    ) -> Result<Warehouse, DispatchError> {
        let mut catalog = self.write_catalog()?;
        if let Some(name) = &patch.name {
            ensure_unique_name(&catalog, name, Some(id))?;
        }
        let wh = catalog
            .warehouses
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(format!("warehouse {id}")))?;
        wh.apply_patch(patch, Utc::now())?;
        Ok(wh.clone())
    }

    /// Remove a warehouse that holds nothing.
    pub fn delete_warehouse(&self, id: WarehouseId) -> Result<Warehouse, DispatchError> {
        let mut catalog = self.write_catalog()?;
        if !catalog.warehouses.contains_key(&id) {
            return Err(DomainError::not_found(format!("warehouse {id}")).into());
        }
        {
            let books = lock_books(&self.books);
            let occupied = books
                .stock
                .values()
                .any(|s| s.warehouse() == id && !s.is_empty());
            if occupied {
                warn!(warehouse = %id, "refusing to delete warehouse with stock");
                return Err(DomainError::conflict(format!(
                    "warehouse {id} still holds stock or reservations"
                ))
                .into());
            }
        }
        let removed = catalog
            .warehouses
            .remove(&id)
            .ok_or_else(|| DomainError::not_found(format!("warehouse {id}")))?;
        info!(warehouse = %id, "warehouse deleted");
        Ok(removed)
    }

    pub fn get_warehouse(&self, id: WarehouseId) -> Result<Warehouse, DispatchError> {
        let catalog = self.read_catalog()?;
        catalog
            .warehouses
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("warehouse {id}")).into())
    }

    pub fn list_warehouses(&self) -> Result<Vec<Warehouse>, DispatchError> {
        let catalog = self.read_catalog()?;
        let mut out: Vec<Warehouse> = catalog.warehouses.values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    // ---- movements ---------------------------------------------------------

    pub fn record_movement(&self, request: MovementRequest) -> Result<Movement, DispatchError> {
        let keys = request.route()?.keys(request.item);
        let movement = self.transaction(keys, |tx| tx.record(&request))?;
        info!(
            movement = %movement.id,
            kind = movement.kind.as_str(),
            item = %movement.item,
            quantity = movement.quantity,
            "movement recorded"
        );
        Ok(movement)
    }

    pub fn get_movement(&self, id: MovementId) -> Result<Movement, DispatchError> {
        lock_books(&self.books)
            .movements
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("movement {id}")).into())
    }

    /// Newest first.
    pub fn list_movements(&self, filter: &MovementFilter) -> Vec<Movement> {
        let books = lock_books(&self.books);
        books
            .movements
            .iter()
            .rev()
            .filter(|m| filter.item.is_none_or(|i| m.item == i))
            .filter(|m| filter.warehouse.is_none_or(|w| m.touches(w)))
            .filter(|m| filter.kind.is_none_or(|k| m.kind == k))
            .filter(|m| filter.reservation.is_none_or(|r| m.reservation == Some(r)))
            .cloned()
            .collect()
    }

    // ---- stock -------------------------------------------------------------

    /// Stock of an item at a warehouse; a pair that never moved reads as empty.
    pub fn get_stock(&self, key: StockKey) -> Result<Stock, DispatchError> {
        {
            let catalog = self.read_catalog()?;
            if !catalog.items.contains_key(&key.item) {
                return Err(DomainError::not_found(format!("item {}", key.item)).into());
            }
            if !catalog.warehouses.contains_key(&key.warehouse) {
                return Err(DomainError::not_found(format!("warehouse {}", key.warehouse)).into());
            }
        }
        Ok(lock_books(&self.books)
            .stock
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Stock::empty(key)))
    }

    pub fn list_stock(&self, filter: &StockFilter) -> Result<Vec<Stock>, DispatchError> {
        let catalog = self.read_catalog()?;
        let books = lock_books(&self.books);
        let mut rows: Vec<Stock> = books
            .stock
            .values()
            .filter(|s| filter.item.is_none_or(|i| s.item() == i))
            .filter(|s| filter.warehouse.is_none_or(|w| s.warehouse() == w))
            .filter(|s| {
                !filter.low_stock
                    || catalog
                        .items
                        .get(&s.item())
                        .is_some_and(|i| s.quantity() <= i.min_stock)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()).then(a.key().cmp(&b.key())));
        Ok(rows)
    }

    /// Replay the movement log and report every row it does not reproduce.
    pub fn audit(&self) -> Vec<AuditMismatch> {
        let books = lock_books(&self.books);

        let mut replayed: BTreeMap<StockKey, i64> = BTreeMap::new();
        for m in &books.movements {
            if let Some(from) = m.warehouse_from {
                *replayed.entry(StockKey::new(m.item, from)).or_default() -= m.quantity;
            }
            if let Some(to) = m.warehouse_to {
                *replayed.entry(StockKey::new(m.item, to)).or_default() += m.quantity;
            }
        }

        let keys: BTreeSet<StockKey> = books
            .stock
            .keys()
            .chain(replayed.keys())
            .copied()
            .collect();

        let mismatches: Vec<AuditMismatch> = keys
            .into_iter()
            .filter_map(|key| {
                let recorded = books.stock.get(&key).map(Stock::quantity).unwrap_or(0);
                let replay = replayed.get(&key).copied().unwrap_or(0);
                (recorded != replay).then_some(AuditMismatch {
                    item: key.item,
                    warehouse: key.warehouse,
                    recorded,
                    replayed: replay,
                })
            })
            .collect();

        if !mismatches.is_empty() {
            warn!(rows = mismatches.len(), "stock disagrees with movement log");
        }
        mismatches
    }

    // ---- reservations ------------------------------------------------------

    pub fn reserve(&self, key: StockKey, quantity: i64) -> Result<Reservation, DispatchError> {
        let reservation =
            self.transaction([key], |tx| tx.reserve(ReservationId::new(), key, quantity, None))?;
        info!(
            reservation = %reservation.id(),
            item = %key.item,
            warehouse = %key.warehouse,
            quantity,
            "stock reserved"
        );
        Ok(reservation)
    }

    pub fn release_reservation(&self, id: ReservationId) -> Result<Reservation, DispatchError> {
        let key = self.standalone_reservation_key(id)?;
        let r = self.transaction([key], |tx| tx.release(id))?;
        info!(reservation = %id, "reservation released");
        Ok(r)
    }

    pub fn cancel_reservation(&self, id: ReservationId) -> Result<Reservation, DispatchError> {
        let key = self.standalone_reservation_key(id)?;
        let r = self.transaction([key], |tx| tx.cancel(id))?;
        info!(reservation = %id, "reservation cancelled");
        Ok(r)
    }

    pub fn consume_reservation(
        &self,
        id: ReservationId,
        quantity: Option<i64>,
    ) -> Result<(Reservation, Movement), DispatchError> {
        let key = self.standalone_reservation_key(id)?;
        let reference = format!("reservation:{id}");
        let out = self.transaction([key], |tx| tx.consume(id, quantity, Some(reference)))?;
        info!(reservation = %id, quantity = out.1.quantity, "reservation consumed");
        Ok(out)
    }

    pub fn get_reservation(&self, id: ReservationId) -> Result<Reservation, DispatchError> {
        lock_books(&self.books)
            .reservations
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("reservation {id}")).into())
    }

    pub fn list_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        let books = lock_books(&self.books);
        let mut out: Vec<Reservation> = books
            .reservations
            .values()
            .filter(|r| filter.item.is_none_or(|i| r.item() == i))
            .filter(|r| filter.warehouse.is_none_or(|w| r.warehouse() == w))
            .filter(|r| filter.status.is_none_or(|s| r.status() == s))
            .filter(|r| filter.sales_order.is_none_or(|o| r.sales_order() == Some(o)))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then(b.id().cmp(&a.id())));
        out
    }

    /// Key of a reservation that the caller may act on directly.
    fn standalone_reservation_key(&self, id: ReservationId) -> Result<StockKey, DispatchError> {
        let r = self.get_reservation(id)?;
        if let Some(order) = r.sales_order() {
            debug!(reservation = %id, order = %order, "direct access to order reservation refused");
            return Err(DomainError::conflict(format!(
                "reservation {id} belongs to sales order {order}; use the order actions"
            ))
            .into());
        }
        Ok(r.key())
    }
}

fn ensure_unique_code(
    catalog: &Catalog,
    code: &str,
    except: Option<ItemId>,
) -> Result<(), DispatchError> {
    let code = code.trim();
    let taken = catalog.items.values().any(|i| {
        i.is_active() && Some(i.id) != except && i.code.eq_ignore_ascii_case(code)
    });
    if taken {
        return Err(DomainError::conflict(format!("item code '{code}' is already in use")).into());
    }
    Ok(())
}

fn ensure_unique_name(
    catalog: &Catalog,
    name: &str,
    except: Option<WarehouseId>,
) -> Result<(), DispatchError> {
    let taken = catalog
        .warehouses
        .values()
        .any(|w| Some(w.id) != except && w.has_name(name));
    if taken {
        return Err(DomainError::conflict(format!(
            "warehouse name '{}' is already in use",
            name.trim()
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use taller_inventory::{WarehouseKind, WarehouseStatus};

    pub(crate) fn item(ledger: &Ledger, code: &str, cost: u64) -> ItemId {
        ledger
            .create_item(NewItem {
                code: code.to_string(),
                name: format!("Repuesto {code}"),
                brand: None,
                model: None,
                category: None,
                unit: None,
                cost_price: cost,
                sale_price: cost * 2,
                min_stock: 2,
                max_stock: None,
            })
            .unwrap()
            .id
    }

    pub(crate) fn warehouse(ledger: &Ledger, name: &str) -> WarehouseId {
        ledger
            .create_warehouse(NewWarehouse {
                name: name.to_string(),
                kind: WarehouseKind::Storage,
                capacity: None,
                location: None,
                status: WarehouseStatus::Active,
            })
            .unwrap()
            .id
    }

    fn ledger() -> Ledger {
        Ledger::new(ServiceConfig::default())
    }

    #[test]
    fn scenario_a_second_reservation_exceeds_available() {
        let ledger = ledger();
        let (x, w) = (item(&ledger, "X", 100), warehouse(&ledger, "W"));
        ledger.record_movement(MovementRequest::inbound(x, w, 10)).unwrap();

        let key = StockKey::new(x, w);
        ledger.reserve(key, 7).unwrap();
        assert_eq!(ledger.get_stock(key).unwrap().reserved(), 7);

        let err = ledger.reserve(key, 5).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::InsufficientStock { requested: 5, available: 3, .. }
        ));
        assert_eq!(ledger.get_stock(key).unwrap().reserved(), 7);
    }

    #[test]
    fn reserve_then_release_restores_reserved() {
        let ledger = ledger();
        let (x, w) = (item(&ledger, "X", 100), warehouse(&ledger, "W"));
        ledger.record_movement(MovementRequest::inbound(x, w, 10)).unwrap();
        let key = StockKey::new(x, w);

        let r = ledger.reserve(key, 4).unwrap();
        let released = ledger.release_reservation(r.id()).unwrap();
        assert_eq!(released.status(), ReservationStatus::Released);
        assert_eq!(ledger.get_stock(key).unwrap().reserved(), 0);

        // Terminal reservations report instead of re-executing.
        assert!(matches!(
            ledger.release_reservation(r.id()),
            Err(DispatchError::InvalidTransition(_))
        ));
        assert!(matches!(
            ledger.consume_reservation(r.id(), None),
            Err(DispatchError::InvalidTransition(_))
        ));
    }

    #[test]
    fn consume_removes_stock_and_logs_salida() {
        let ledger = ledger();
        let (x, w) = (item(&ledger, "X", 100), warehouse(&ledger, "W"));
        ledger.record_movement(MovementRequest::inbound(x, w, 10)).unwrap();
        let key = StockKey::new(x, w);

        let r = ledger.reserve(key, 6).unwrap();
        let (r, mv) = ledger.consume_reservation(r.id(), Some(2)).unwrap();
        assert_eq!(r.status(), ReservationStatus::Active);
        assert_eq!(mv.kind, MovementKind::Outbound);
        assert_eq!(mv.reservation, Some(r.id()));

        let (r, _) = ledger.consume_reservation(r.id(), None).unwrap();
        assert_eq!(r.status(), ReservationStatus::Consumed);

        let row = ledger.get_stock(key).unwrap();
        assert_eq!((row.quantity(), row.reserved()), (4, 0));
        assert!(ledger.audit().is_empty());
    }

    #[test]
    fn failed_transfer_changes_nothing() {
        let ledger = ledger();
        let x = item(&ledger, "X", 100);
        let (a, b) = (warehouse(&ledger, "A"), warehouse(&ledger, "B"));
        ledger.record_movement(MovementRequest::inbound(x, a, 3)).unwrap();

        let err = ledger
            .record_movement(MovementRequest::transfer(x, a, b, 5))
            .unwrap_err();
        assert!(matches!(err, DispatchError::InsufficientStock { .. }));
        assert_eq!(ledger.get_stock(StockKey::new(x, a)).unwrap().quantity(), 3);
        assert_eq!(ledger.get_stock(StockKey::new(x, b)).unwrap().quantity(), 0);
        assert_eq!(ledger.list_movements(&MovementFilter::default()).len(), 1);
    }

    #[test]
    fn transfer_carries_source_average_cost() {
        let ledger = ledger();
        let x = item(&ledger, "X", 100);
        let (a, b) = (warehouse(&ledger, "A"), warehouse(&ledger, "B"));
        ledger
            .record_movement(MovementRequest::inbound(x, a, 4).with_unit_cost(250))
            .unwrap();
        let mv = ledger
            .record_movement(MovementRequest::transfer(x, a, b, 4))
            .unwrap();
        assert_eq!(mv.unit_cost, 250);
        assert_eq!(ledger.get_stock(StockKey::new(x, b)).unwrap().average_cost(), 250);
    }

    #[test]
    fn withdraw_cannot_take_reserved_units() {
        let ledger = ledger();
        let (x, w) = (item(&ledger, "X", 100), warehouse(&ledger, "W"));
        ledger.record_movement(MovementRequest::inbound(x, w, 5)).unwrap();
        ledger.reserve(StockKey::new(x, w), 4).unwrap();

        let err = ledger
            .record_movement(MovementRequest::outbound(x, w, 2))
            .unwrap_err();
        assert!(matches!(err, DispatchError::InsufficientStock { available: 1, .. }));
    }

    #[test]
    fn inactive_warehouse_rejects_movements() {
        let ledger = ledger();
        let (x, w) = (item(&ledger, "X", 100), warehouse(&ledger, "W"));
        ledger
            .update_warehouse(
                w,
                WarehousePatch {
                    status: Some(WarehouseStatus::Inactive),
                    ..WarehousePatch::default()
                },
            )
            .unwrap();
        assert!(matches!(
            ledger.record_movement(MovementRequest::inbound(x, w, 1)),
            Err(DispatchError::Validation(_))
        ));
    }

    #[test]
    fn catalog_uniqueness_and_soft_delete() {
        let ledger = ledger();
        let x = item(&ledger, "FIL-001", 100);
        let dup = ledger.create_item(NewItem {
            code: "fil-001".to_string(),
            name: "Filtro".to_string(),
            brand: None,
            model: None,
            category: None,
            unit: None,
            cost_price: 0,
            sale_price: 0,
            min_stock: 0,
            max_stock: None,
        });
        assert!(matches!(dup, Err(DispatchError::Conflict(_))));

        ledger.delete_item(x).unwrap();
        assert!(ledger.get_item(x).unwrap().deleted);
        assert!(ledger.list_items(&ItemFilter::default()).unwrap().is_empty());
        assert!(matches!(ledger.delete_item(x), Err(DispatchError::NotFound(_))));

        // Code is free again once the holder is deleted.
        item(&ledger, "FIL-001", 100);

        warehouse(&ledger, "Principal");
        let wh = ledger.create_warehouse(NewWarehouse {
            name: "PRINCIPAL".to_string(),
            kind: WarehouseKind::Depot,
            capacity: None,
            location: None,
            status: WarehouseStatus::Active,
        });
        assert!(matches!(wh, Err(DispatchError::Conflict(_))));
    }

    #[test]
    fn warehouse_with_stock_cannot_be_deleted() {
        let ledger = ledger();
        let (x, w) = (item(&ledger, "X", 100), warehouse(&ledger, "W"));
        ledger.record_movement(MovementRequest::inbound(x, w, 1)).unwrap();
        assert!(matches!(
            ledger.delete_warehouse(w),
            Err(DispatchError::Conflict(_))
        ));

        ledger.record_movement(MovementRequest::outbound(x, w, 1)).unwrap();
        ledger.delete_warehouse(w).unwrap();
        assert!(matches!(ledger.get_warehouse(w), Err(DispatchError::NotFound(_))));
    }

    #[test]
    fn concurrent_reservations_never_over_reserve() {
        let ledger = Arc::new(Ledger::new(ServiceConfig {
            lock_timeout: Duration::from_secs(10),
            ..ServiceConfig::default()
        }));
        let (x, w) = (item(&ledger, "X", 100), warehouse(&ledger, "W"));
        ledger.record_movement(MovementRequest::inbound(x, w, 50)).unwrap();
        let key = StockKey::new(x, w);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    (0..5).filter(|_| ledger.reserve(key, 1).is_ok()).count()
                })
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        let row = ledger.get_stock(key).unwrap();
        assert_eq!(granted, 50);
        assert_eq!(row.reserved(), 50);
        assert!(row.check_invariants().is_ok());
    }

    #[test]
    fn order_owned_reservation_is_not_directly_releasable() {
        let ledger = ledger();
        let (x, w) = (item(&ledger, "X", 100), warehouse(&ledger, "W"));
        ledger.record_movement(MovementRequest::inbound(x, w, 5)).unwrap();
        let key = StockKey::new(x, w);
        let id = ReservationId::new();
        ledger
            .transaction([key], |tx| tx.reserve(id, key, 2, Some(AggregateId::new())))
            .unwrap();

        assert!(matches!(
            ledger.release_reservation(id),
            Err(DispatchError::Conflict(_))
        ));
    }

    #[test]
    fn low_stock_filter_uses_item_minimum() {
        let ledger = ledger();
        let (x, y, w) = (
            item(&ledger, "X", 100),
            item(&ledger, "Y", 100),
            warehouse(&ledger, "W"),
        );
        ledger.record_movement(MovementRequest::inbound(x, w, 1)).unwrap();
        ledger.record_movement(MovementRequest::inbound(y, w, 9)).unwrap();

        let low = ledger
            .list_stock(&StockFilter {
                low_stock: true,
                ..StockFilter::default()
            })
            .unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].item(), x);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            In(usize, i64),
            Out(usize, i64),
            Move(usize, usize, i64),
            Reserve(usize, i64),
            Release(usize),
            Consume(usize, i64),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0usize..2, 1i64..20).prop_map(|(w, q)| Op::In(w, q)),
                (0usize..2, 1i64..20).prop_map(|(w, q)| Op::Out(w, q)),
                (0usize..2, 0usize..2, 1i64..20).prop_map(|(a, b, q)| Op::Move(a, b, q)),
                (0usize..2, 1i64..20).prop_map(|(w, q)| Op::Reserve(w, q)),
                (0usize..8).prop_map(Op::Release),
                (0usize..8, 1i64..10).prop_map(|(r, q)| Op::Consume(r, q)),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 64,
                ..ProptestConfig::default()
            })]

            #[test]
            fn movement_log_reproduces_stock(ops in prop::collection::vec(op(), 1..40)) {
                let ledger = ledger();
                let x = item(&ledger, "X", 100);
                let whs = [warehouse(&ledger, "A"), warehouse(&ledger, "B")];
                let mut reservations: Vec<ReservationId> = Vec::new();

                for op in ops {
                    let _ = match op {
                        Op::In(w, q) => ledger.record_movement(MovementRequest::inbound(x, whs[w], q)).map(|_| ()),
                        Op::Out(w, q) => ledger.record_movement(MovementRequest::outbound(x, whs[w], q)).map(|_| ()),
                        Op::Move(a, b, q) => ledger.record_movement(MovementRequest::transfer(x, whs[a], whs[b], q)).map(|_| ()),
                        Op::Reserve(w, q) => ledger.reserve(StockKey::new(x, whs[w]), q).map(|r| reservations.push(r.id())),
                        Op::Release(i) => match reservations.get(i) {
                            Some(id) => ledger.release_reservation(*id).map(|_| ()),
                            None => Ok(()),
                        },
                        Op::Consume(i, q) => match reservations.get(i) {
                            Some(id) => ledger.consume_reservation(*id, Some(q)).map(|_| ()),
                            None => Ok(()),
                        },
                    };

                    for wh in whs {
                        let row = ledger.get_stock(StockKey::new(x, wh)).unwrap();
                        prop_assert!(row.check_invariants().is_ok());
                        prop_assert!(row.quantity() >= 0);
                    }
                }
                prop_assert!(ledger.audit().is_empty());
            }
        }
    }
}
