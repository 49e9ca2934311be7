//! Transactional state store boundary.
//!
//! Every guarded transition runs inside [`Store::transaction`]: the guard, the
//! status change and all side effects on the shared tables either commit
//! together or not at all.

pub mod in_memory;
pub mod tables;

pub use in_memory::InMemoryStore;
pub use tables::Tables;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing storage cannot be reached (or its lock is poisoned).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Storage backend of the engine.
///
/// The contract is atomicity and writer isolation, not a particular way of
/// getting there. [`InMemoryStore`] copies every table per transaction, which
/// costs time proportional to the whole state; a SQL backend maps
/// [`Store::transaction`] onto a database transaction instead.
pub trait Store: Send + Sync {
    /// Run `f` against a consistent snapshot of the tables.
    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, StoreError>;

    /// Run `f` as one transaction.
    ///
    /// Changes made by `f` are committed only if it returns `Ok`. Writers are
    /// serialized; readers never observe a partially applied transaction.
    fn transaction<T, E>(&self, f: impl FnOnce(&mut Tables) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>;
}

impl<S> Store for std::sync::Arc<S>
where
    S: Store + ?Sized,
{
    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, StoreError> {
        (**self).read(f)
    }

    fn transaction<T, E>(&self, f: impl FnOnce(&mut Tables) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        (**self).transaction(f)
    }
}
