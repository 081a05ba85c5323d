use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taller_core::{DomainError, DomainResult, ItemId, WarehouseId};

/// Identity of a stock row: one item at one warehouse.
///
/// Ordered so a set of keys can always be locked in the same order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub item: ItemId,
    pub warehouse: WarehouseId,
}

impl StockKey {
    pub fn new(item: ItemId, warehouse: WarehouseId) -> Self {
        Self { item, warehouse }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.item, self.warehouse)
    }
}

/// Stock row: quantity on hand and the part of it held by reservations.
///
/// Invariant: `0 <= reserved <= quantity`. Every mutator checks before it
/// writes, so a failed call leaves the row unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stock {
    item: ItemId,
    warehouse: WarehouseId,
    quantity: i64,
    reserved: i64,
    /// Weighted average unit cost in smallest currency unit.
    average_cost: u64,
    pub lot: Option<String>,
    pub zone: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

impl Stock {
    pub fn empty(key: StockKey) -> Self {
        Self {
            item: key.item,
            warehouse: key.warehouse,
            quantity: 0,
            reserved: 0,
            average_cost: 0,
            lot: None,
            zone: None,
            updated_at: None,
        }
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

    pub fn reserved(&self) -> i64 {
        self.reserved
    }

    pub fn available(&self) -> i64 {
        self.quantity - self.reserved
    }

    pub fn average_cost(&self) -> u64 {
        self.average_cost
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// True when nothing is on hand or held (row can be ignored by deletes).
    pub fn is_empty(&self) -> bool {
        self.quantity == 0 && self.reserved == 0
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = Some(now);
    }

    /// Add stock at `unit_cost`, folding it into the weighted average cost.
    pub fn receive(&mut self, quantity: i64, unit_cost: u64) -> DomainResult<()> {
        ensure_positive(quantity)?;

        let on_hand = self.quantity as u128;
        let incoming = quantity as u128;
        let total = on_hand + incoming;
        let value = on_hand * self.average_cost as u128 + incoming * unit_cost as u128;
        // Rounded half-up.
        self.average_cost = ((value + total / 2) / total) as u64;
        self.quantity += quantity;
        Ok(())
    }

    /// Remove unreserved stock.
    pub fn withdraw(&mut self, quantity: i64) -> DomainResult<()> {
        ensure_positive(quantity)?;
        if quantity > self.available() {
            return Err(self.insufficient(quantity));
        }
        self.quantity -= quantity;
        Ok(())
    }

    /// Hold `quantity` of the available stock.
    pub fn reserve(&mut self, quantity: i64) -> DomainResult<()> {
        ensure_positive(quantity)?;
        if quantity > self.available() {
            return Err(self.insufficient(quantity));
        }
        self.reserved += quantity;
        Ok(())
    }

    /// Drop a hold without touching the quantity on hand.
    pub fn unreserve(&mut self, quantity: i64) -> DomainResult<()> {
        ensure_positive(quantity)?;
        if quantity > self.reserved {
            return Err(DomainError::invariant(format!(
                "cannot unreserve {quantity} from {} (reserved {})",
                self.key(),
                self.reserved
            )));
        }
        self.reserved -= quantity;
        Ok(())
    }

    /// Physically remove held stock: both the hold and the quantity shrink.
    pub fn consume_reserved(&mut self, quantity: i64) -> DomainResult<()> {
        ensure_positive(quantity)?;
        if quantity > self.reserved {
            return Err(DomainError::invariant(format!(
                "cannot consume {quantity} from {} (reserved {})",
                self.key(),
                self.reserved
            )));
        }
        self.reserved -= quantity;
        self.quantity -= quantity;
        Ok(())
    }

    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.reserved < 0 || self.reserved > self.quantity {
            return Err(DomainError::invariant(format!(
                "stock row {} out of bounds (quantity {}, reserved {})",
                self.key(),
                self.quantity,
                self.reserved
            )));
        }
        Ok(())
    }

    fn insufficient(&self, requested: i64) -> DomainError {
        DomainError::InsufficientStock {
            item: self.item,
            warehouse: self.warehouse,
            requested,
            available: self.available(),
        }
    }
}

fn ensure_positive(quantity: i64) -> DomainResult<()> {
    if quantity <= 0 {
        return Err(DomainError::validation("quantity must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_with(quantity: i64) -> Stock {
        let mut s = Stock::empty(StockKey::new(ItemId::new(), WarehouseId::new()));
        if quantity > 0 {
            s.receive(quantity, 100).unwrap();
        }
        s
    }

    #[test]
    fn reserve_beyond_available_is_insufficient_stock() {
        let mut s = row_with(10);
        s.reserve(7).unwrap();
        assert_eq!(s.reserved(), 7);

        let err = s.reserve(5).unwrap_err();
        match err {
            DomainError::InsufficientStock {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, 5);
                assert_eq!(available, 3);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(s.reserved(), 7);
    }

    #[test]
    fn withdraw_cannot_touch_reserved_stock() {
        let mut s = row_with(10);
        s.reserve(8).unwrap();
        assert!(s.withdraw(3).is_err());
        s.withdraw(2).unwrap();
        assert_eq!(s.quantity(), 8);
        assert_eq!(s.available(), 0);
    }

    #[test]
    fn consume_reduces_quantity_and_hold() {
        let mut s = row_with(10);
        s.reserve(4).unwrap();
        s.consume_reserved(4).unwrap();
        assert_eq!(s.quantity(), 6);
        assert_eq!(s.reserved(), 0);
    }

    #[test]
    fn receive_updates_weighted_average_cost() {
        let mut s = row_with(0);
        s.receive(10, 100).unwrap();
        s.receive(30, 200).unwrap();
        // (10*100 + 30*200) / 40 = 175
        assert_eq!(s.average_cost(), 175);

        s.receive(1, 0).unwrap();
        // 7000 / 41 = 170.73 -> 171
        assert_eq!(s.average_cost(), 171);
    }

    #[test]
    fn non_positive_quantities_are_validation_errors() {
        let mut s = row_with(5);
        for q in [0, -3] {
            assert!(matches!(s.receive(q, 1), Err(DomainError::Validation(_))));
            assert!(matches!(s.reserve(q), Err(DomainError::Validation(_))));
            assert!(matches!(s.withdraw(q), Err(DomainError::Validation(_))));
        }
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Receive(i64),
            Withdraw(i64),
            Reserve(i64),
            Unreserve(i64),
            Consume(i64),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (-2i64..50).prop_map(Op::Receive),
                (-2i64..50).prop_map(Op::Withdraw),
                (-2i64..50).prop_map(Op::Reserve),
                (-2i64..50).prop_map(Op::Unreserve),
                (-2i64..50).prop_map(Op::Consume),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            #[test]
            fn reserved_never_exceeds_quantity(ops in prop::collection::vec(op(), 1..60)) {
                let mut s = Stock::empty(StockKey::new(ItemId::new(), WarehouseId::new()));
                for op in ops {
                    let before = s.clone();
                    let result = match op {
                        Op::Receive(q) => s.receive(q, 120),
                        Op::Withdraw(q) => s.withdraw(q),
                        Op::Reserve(q) => s.reserve(q),
                        Op::Unreserve(q) => s.unreserve(q),
                        Op::Consume(q) => s.consume_reserved(q),
                    };
                    if result.is_err() {
                        prop_assert_eq!(&s, &before);
                    }
                    prop_assert!(s.check_invariants().is_ok());
                    prop_assert!(s.reserved() >= 0);
                }
            }

            #[test]
            fn reserve_then_unreserve_restores_hold(start in 1i64..100, q in 1i64..100) {
                let mut s = Stock::empty(StockKey::new(ItemId::new(), WarehouseId::new()));
                s.receive(start, 10).unwrap();
                let before = s.reserved();
                if s.reserve(q).is_ok() {
                    s.unreserve(q).unwrap();
                }
                prop_assert_eq!(s.reserved(), before);
            }
        }
    }
}
