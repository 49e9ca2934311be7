//! Inventory domain: catalog, per-warehouse stock ledger with its movement
//! log, and the system-wide item-instance registry.
//!
//! Pure, deterministic domain logic (no IO, no storage). The infra crate owns
//! these structures inside a transactional store.

pub mod catalog;
pub mod instance;
pub mod ledger;
pub mod serial_unit;

pub use catalog::{Catalog, CatalogItem, CatalogItemId, NewItemDescriptor};
pub use instance::{
    Binding, InstanceId, InstanceRegistry, ItemInstance, ItemStatus, Location, NewInstance,
    RegistryError, UnitMovement,
};
pub use ledger::{LedgerError, MovementId, MovementKind, StockLedger, StockLevel, StockMovement};
pub use serial_unit::SerialUnitSequence;
