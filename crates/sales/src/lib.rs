//! Sales Orders domain module (event-sourced).
//!
//! This crate contains business rules for sales orders, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage). Confirmation,
//! shipment and cancellation decide which reservations to open, consume or
//! release; the inventory ledger carries those effects out.

pub mod order;
pub mod party;

pub use order::{
    CancelSalesOrder, ConfirmSalesOrder, CreateSalesOrder, DeleteSalesOrder, LineRelease,
    LineReservation, LineShipment, OrderCancelled, OrderConfirmed, OrderShipped, SalesLine,
    SalesLineInput, SalesOrder, SalesOrderCommand, SalesOrderCreated, SalesOrderDeleted,
    SalesOrderEvent, SalesOrderId, SalesOrderStatus, SalesOrderSubmitted, SalesOrderUpdated,
    ShipItem, ShipSalesOrder, SubmitSalesOrder, UpdateSalesOrder,
};
pub use party::PartyRef;
