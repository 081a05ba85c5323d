//! Inventory domain module.
//!
//! This crate contains the business rules of the inventory ledger (catalog,
//! stock rows, movements, reservations), implemented purely as deterministic
//! domain logic (no IO, no HTTP, no storage).

pub mod item;
pub mod movement;
pub mod reservation;
pub mod stock;
pub mod warehouse;

pub use item::{Item, ItemPatch, NewItem};
pub use movement::{Movement, MovementKind, MovementRequest, MovementRoute};
pub use reservation::{Reservation, ReservationStatus};
pub use stock::{Stock, StockKey};
pub use warehouse::{NewWarehouse, Warehouse, WarehouseKind, WarehousePatch, WarehouseStatus};
