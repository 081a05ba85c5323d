//! Purchasing domain module (Purchase Orders, event-sourced).
//!
//! This crate contains business rules for purchase orders, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage). Stock effects of a
//! receipt are decided here and carried out by the inventory ledger.

pub mod order;

pub use order::{
    CancelPurchaseOrder, CreatePurchaseOrder, DeletePurchaseOrder, GoodsReceived, LineItem,
    NewLine, PurchaseOrder, PurchaseOrderCancelled, PurchaseOrderCommand, PurchaseOrderCreated,
    PurchaseOrderDeleted, PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderStatus,
    PurchaseOrderUpdated, ReceiptItem, ReceiveGoods, ReceivedLine, UpdatePurchaseOrder,
};
