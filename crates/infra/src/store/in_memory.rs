use std::sync::RwLock;

use super::{Store, StoreError, Tables};

/// In-memory transactional store.
///
/// A transaction works on a copy of the tables and swaps it in on success,
/// so every write costs a full clone of the state. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tables(tables: Tables) -> Self {
        Self {
            tables: RwLock::new(tables),
        }
    }
}

impl Store for InMemoryStore {
    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(f(&tables))
    }

    fn transaction<T, E>(&self, f: impl FnOnce(&mut Tables) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;

        let mut working = tables.clone();
        let value = f(&mut working)?;
        *tables = working;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetflow_core::WarehouseId;
    use assetflow_inventory::CatalogItemId;
    use chrono::Utc;

    #[test]
    fn failed_transaction_leaves_tables_untouched() {
        let store = InMemoryStore::new();
        let item = CatalogItemId::new(1);
        let wh = WarehouseId::new(1);

        let result: Result<(), StoreError> = store.transaction(|t| {
            t.ledger.add(item, wh, 5, "seed", Utc::now()).map_err(|e| {
                StoreError::Unavailable(e.to_string())
            })?;
            Err(StoreError::Unavailable("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.read(|t| t.ledger.quantity(item, wh)).unwrap(), 0);

        let committed: Result<(), StoreError> = store.transaction(|t| {
            t.ledger
                .add(item, wh, 5, "seed", Utc::now())
                .map(|_| ())
                .map_err(|e| StoreError::Unavailable(e.to_string()))
        });
        assert!(committed.is_ok());
        assert_eq!(store.read(|t| t.ledger.quantity(item, wh)).unwrap(), 5);
    }
}
