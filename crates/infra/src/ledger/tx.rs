use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use taller_core::{AggregateId, DomainError, ItemId, MovementId, ReservationId, WarehouseId};
use taller_inventory::{
    Item, Movement, MovementKind, MovementRequest, MovementRoute, Reservation, Stock, StockKey,
    Warehouse,
};

use super::{Books, Catalog, lock_books};
use crate::command_dispatcher::DispatchError;

/// Staged unit of work over a locked set of stock rows.
///
/// Reads come from the committed books; every write lands in the staged copies
/// and reaches the books only when the surrounding transaction commits.
pub struct LedgerTx<'a> {
    now: DateTime<Utc>,
    catalog: &'a Catalog,
    books: &'a Mutex<Books>,
    locked: BTreeSet<StockKey>,
    rows: BTreeMap<StockKey, Stock>,
    dirty: BTreeSet<StockKey>,
    reservations: HashMap<ReservationId, Reservation>,
    movements: Vec<Movement>,
}

/// Everything a transaction wants written.
pub(super) struct Staged {
    pub rows: BTreeMap<StockKey, Stock>,
    pub reservations: HashMap<ReservationId, Reservation>,
    pub movements: Vec<Movement>,
}

impl<'a> LedgerTx<'a> {
    pub(super) fn begin(
        catalog: &'a Catalog,
        books: &'a Mutex<Books>,
        locked: BTreeSet<StockKey>,
        now: DateTime<Utc>,
    ) -> Self {
        let rows = {
            let committed = lock_books(books);
            locked
                .iter()
                .map(|k| {
                    let row = committed
                        .stock
                        .get(k)
                        .cloned()
                        .unwrap_or_else(|| Stock::empty(*k));
                    (*k, row)
                })
                .collect()
        };

        Self {
            now,
            catalog,
            books,
            locked,
            rows,
            dirty: BTreeSet::new(),
            reservations: HashMap::new(),
            movements: Vec::new(),
        }
    }

    pub(super) fn into_staged(self) -> Staged {
        let mut rows = self.rows;
        rows.retain(|k, _| self.dirty.contains(k));
        Staged {
            rows,
            reservations: self.reservations,
            movements: self.movements,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Current (staged) state of a locked row.
    pub fn stock(&self, key: StockKey) -> Option<&Stock> {
        self.rows.get(&key)
    }

    /// Record a movement and apply it to the stock rows it touches.
    pub fn record(&mut self, request: &MovementRequest) -> Result<Movement, DispatchError> {
        let route = request.route()?;
        let item = self.active_item(request.item)?;
        let default_cost = item.cost_price;
        for key in route.keys(request.item) {
            self.active_warehouse(key.warehouse)?;
        }

        let unit_cost = match route {
            MovementRoute::Into(to) => {
                let cost = request.unit_cost.unwrap_or(default_cost);
                self.row_mut(StockKey::new(request.item, to))?
                    .receive(request.quantity, cost)?;
                cost
            }
            MovementRoute::OutOf(from) => {
                let row = self.row_mut(StockKey::new(request.item, from))?;
                row.withdraw(request.quantity)?;
                row.average_cost()
            }
            MovementRoute::Between { from, to } => {
                let source = self.row_mut(StockKey::new(request.item, from))?;
                source.withdraw(request.quantity)?;
                let cost = source.average_cost();
                self.row_mut(StockKey::new(request.item, to))?
                    .receive(request.quantity, cost)?;
                cost
            }
        };

        let movement = Movement {
            id: MovementId::new(),
            kind: request.kind,
            item: request.item,
            quantity: request.quantity,
            warehouse_from: request.warehouse_from.filter(|_| {
                matches!(route, MovementRoute::OutOf(_) | MovementRoute::Between { .. })
            }),
            warehouse_to: request.warehouse_to.filter(|_| {
                matches!(route, MovementRoute::Into(_) | MovementRoute::Between { .. })
            }),
            unit_cost,
            reference: request.reference.clone(),
            note: request.note.clone(),
            reservation: None,
            occurred_at: self.now,
        };
        self.movements.push(movement.clone());
        Ok(movement)
    }

    /// Hold `quantity` of the available stock at `key`.
    pub fn reserve(
        &mut self,
        id: ReservationId,
        key: StockKey,
        quantity: i64,
        sales_order: Option<AggregateId>,
    ) -> Result<Reservation, DispatchError> {
        if quantity <= 0 {
            return Err(DomainError::validation("reservation quantity must be positive").into());
        }
        self.active_item(key.item)?;
        self.active_warehouse(key.warehouse)?;
        if self.reservations.contains_key(&id) || lock_books(self.books).reservations.contains_key(&id) {
            return Err(DomainError::conflict(format!("reservation {id} already exists")).into());
        }

        self.row_mut(key)?.reserve(quantity)?;
        let reservation = Reservation::open(id, key, quantity, sales_order, self.now)?;
        self.reservations.insert(id, reservation.clone());
        Ok(reservation)
    }

    /// `activo -> liberado`, returning the hold to available stock.
    pub fn release(&mut self, id: ReservationId) -> Result<Reservation, DispatchError> {
        let now = self.now;
        let (reservation, freed) = {
            let r = self.reservation_mut(id)?;
            let freed = r.release(now)?;
            (r.clone(), freed)
        };
        if freed > 0 {
            self.row_mut(reservation.key())?.unreserve(freed)?;
        }
        Ok(reservation)
    }

    /// `activo -> cancelado`; same stock effect as a release.
    pub fn cancel(&mut self, id: ReservationId) -> Result<Reservation, DispatchError> {
        let now = self.now;
        let (reservation, freed) = {
            let r = self.reservation_mut(id)?;
            let freed = r.cancel(now)?;
            (r.clone(), freed)
        };
        if freed > 0 {
            self.row_mut(reservation.key())?.unreserve(freed)?;
        }
        Ok(reservation)
    }

    /// Physically remove held stock and log it as a `salida` linked to the reservation.
    pub fn consume(
        &mut self,
        id: ReservationId,
        quantity: Option<i64>,
        reference: Option<String>,
    ) -> Result<(Reservation, Movement), DispatchError> {
        let now = self.now;
        let (reservation, consumed) = {
            let r = self.reservation_mut(id)?;
            let consumed = r.consume(quantity, now)?;
            (r.clone(), consumed)
        };

        let key = reservation.key();
        let row = self.row_mut(key)?;
        row.consume_reserved(consumed)?;
        let unit_cost = row.average_cost();

        let movement = Movement {
            id: MovementId::new(),
            kind: MovementKind::Outbound,
            item: key.item,
            quantity: consumed,
            warehouse_from: Some(key.warehouse),
            warehouse_to: None,
            unit_cost,
            reference,
            note: None,
            reservation: Some(id),
            occurred_at: now,
        };
        self.movements.push(movement.clone());
        Ok((reservation, movement))
    }

    fn row_mut(&mut self, key: StockKey) -> Result<&mut Stock, DispatchError> {
        let now = self.now;
        match self.rows.get_mut(&key) {
            Some(row) => {
                row.touch(now);
                self.dirty.insert(key);
                Ok(row)
            }
            None => Err(DomainError::invariant(format!(
                "stock row {key} is not locked by this transaction"
            ))
            .into()),
        }
    }

    fn reservation_mut(&mut self, id: ReservationId) -> Result<&mut Reservation, DispatchError> {
        if !self.reservations.contains_key(&id) {
            let committed = lock_books(self.books)
                .reservations
                .get(&id)
                .cloned()
                .ok_or_else(|| DomainError::not_found(format!("reservation {id}")))?;
            if !self.locked.contains(&committed.key()) {
                return Err(DomainError::invariant(format!(
                    "reservation {id} belongs to stock row {} which is not locked",
                    committed.key()
                ))
                .into());
            }
            self.reservations.insert(id, committed);
        }
        self.reservations
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(format!("reservation {id}")).into())
    }

    fn active_item(&self, id: ItemId) -> Result<&Item, DispatchError> {
        let item = self
            .catalog
            .items
            .get(&id)
            .ok_or_else(|| DomainError::not_found(format!("item {id}")))?;
        if !item.is_active() {
            return Err(DomainError::validation(format!("item {id} is deleted")).into());
        }
        Ok(item)
    }

    fn active_warehouse(&self, id: WarehouseId) -> Result<&Warehouse, DispatchError> {
        let wh = self
            .catalog
            .warehouses
            .get(&id)
            .ok_or_else(|| DomainError::not_found(format!("warehouse {id}")))?;
        if !wh.is_active() {
            return Err(DomainError::validation(format!("warehouse {id} is inactive")).into());
        }
        Ok(wh)
    }
}
