//! Procurement: request approval, partial receiving and completion into stock.
//!
//! Pure domain logic over the inventory structures; the infra crate wraps every
//! operation in a store transaction.

pub mod completion;
pub mod line_item;
pub mod receiving;
pub mod request;

pub use completion::{Completion, CompletionError, CompletionReport, SkippedUnit, complete};
pub use line_item::{DeliveryRecord, ItemRef, LineItem, LineItemId, NewLine};
pub use receiving::{Delivery, LineDelivery, LineReceipt, ReceiptReport, receive_delivery};
pub use request::{
    NewRequest, ProcurementAction, ProcurementRequest, ProcurementStatus, RequestId,
};
