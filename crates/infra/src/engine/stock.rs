//! Manual stock transactions, and read-side queries over the stock ledger
//! and the unit registry.

use assetflow_core::{Clock, Outcome, UserId, WarehouseId};
use assetflow_events::{EntityKind, EventBus, WorkflowEvent};
use assetflow_inventory::{
    CatalogItem, CatalogItemId, InstanceId, ItemInstance, LedgerError, MovementKind, StockLevel,
    StockMovement, UnitMovement,
};

use super::{Engine, EngineError, Step, WorkflowEnvelope, missing};
use crate::store::Store;

/// A manual stock change entered by warehouse staff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockTransaction {
    pub item: CatalogItemId,
    pub warehouse: WarehouseId,
    pub kind: MovementKind,
    pub quantity: u64,
    pub note: String,
}

impl<S, B, C> Engine<S, B, C>
where
    S: Store,
    B: EventBus<WorkflowEnvelope>,
    C: Clock,
{
    /// Record a manual `IN` or `OUT`.
    ///
    /// Taking out more than is on hand, or moving nothing, is rejected.
    pub fn record_stock_transaction(
        &self,
        tx: StockTransaction,
        actor: UserId,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("stock.transaction", tx.item.get(), |t| {
            let Some(item) = t.catalog.get(tx.item) else {
                return Ok(Step::new(missing(format_args!("catalog item {}", tx.item))));
            };
            let name = item.name().to_string();
            let note = format!("{} (by {})", tx.note, stamp.actor);
            let recorded = match tx.kind {
                MovementKind::In => t.ledger.add(tx.item, tx.warehouse, tx.quantity, note, stamp.at),
                MovementKind::Out => {
                    t.ledger
                        .remove(tx.item, tx.warehouse, tx.quantity, note, stamp.at)
                }
            }
            .map(|_| ());
            let outcome = match recorded {
                Ok(_) => Outcome::applied(format!(
                    "{} {} x {name} in warehouse {}; on hand {}",
                    tx.kind,
                    tx.quantity,
                    tx.warehouse,
                    t.ledger.quantity(tx.item, tx.warehouse)
                )),
                Err(err @ (LedgerError::InsufficientStock { .. } | LedgerError::ZeroQuantity)) => {
                    Outcome::rejected(err.to_string())
                }
                Err(err) => return Err(err.into()),
            };
            let event = WorkflowEvent::new(
                EntityKind::Stock,
                tx.item.get(),
                "recorded",
                tx.kind,
                stamp,
                outcome.message(),
            );
            Ok(Step::new(outcome).with_events([event]))
        })
    }

    pub fn get_quantity(
        &self,
        item: CatalogItemId,
        warehouse: WarehouseId,
    ) -> Result<u64, EngineError> {
        self.read(|t| t.ledger.quantity(item, warehouse))
    }

    /// Rows strictly below `threshold`.
    pub fn list_low_stock(&self, threshold: u64) -> Result<Vec<StockLevel>, EngineError> {
        self.read(|t| t.ledger.low_stock(threshold))
    }

    /// Rows below the configured threshold.
    pub fn low_stock(&self) -> Result<Vec<StockLevel>, EngineError> {
        self.list_low_stock(self.config().low_stock_threshold)
    }

    pub fn movements_for(
        &self,
        item: CatalogItemId,
        warehouse: WarehouseId,
    ) -> Result<Vec<StockMovement>, EngineError> {
        self.read(|t| t.ledger.movements_for(item, warehouse).cloned().collect())
    }

    /// Check that every ledger row equals the sum of its movements.
    pub fn verify_ledger(&self) -> Result<(), EngineError> {
        self.read(|t| t.ledger.verify())?.map_err(EngineError::from)
    }

    pub fn catalog_item(&self, id: CatalogItemId) -> Result<Option<CatalogItem>, EngineError> {
        self.read(|t| t.catalog.get(id).cloned())
    }

    pub fn instance(&self, id: InstanceId) -> Result<Option<ItemInstance>, EngineError> {
        self.read(|t| t.registry.get(id).cloned())
    }

    pub fn find_by_serial(&self, serial: &str) -> Result<Option<ItemInstance>, EngineError> {
        self.read(|t| t.registry.find_by_serial(serial).cloned())
    }

    pub fn find_by_serial_unit(&self, code: &str) -> Result<Option<ItemInstance>, EngineError> {
        self.read(|t| t.registry.find_by_serial_unit(code).cloned())
    }

    /// Movement trail of one unit, oldest first.
    pub fn unit_history(&self, id: InstanceId) -> Result<Vec<UnitMovement>, EngineError> {
        self.read(|t| t.registry.history(id).cloned().collect())
    }
}
