//! In-process engine API consumed by the web layer.
//!
//! Each public operation stamps the caller and the current time, runs the
//! domain transition inside one store transaction and, once committed,
//! announces applied transitions on the event bus.
//!
//! ```text
//! caller
//!   ↓
//! 1. Stamp actor + clock time
//!   ↓
//! 2. Store transaction: guard, mutate, side effects
//!   ↓  (Rejected outcome or error → rollback)
//! 3. Commit
//!   ↓
//! 4. Publish WorkflowEvent envelopes (best effort)
//! ```

pub mod asset_requests;
pub mod distribution;
pub mod loans;
pub mod procurement;
pub mod returns;
pub mod stock;

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use assetflow_core::{Clock, DomainError, Outcome, Stamp, SystemClock, UserId};
use assetflow_events::{EventBus, EventEnvelope, WorkflowEvent};
use assetflow_inventory::{LedgerError, RegistryError};
use assetflow_purchasing::{CompletionError, ReceiptReport};

use crate::config::EngineConfig;
use crate::store::{Store, StoreError, Tables};

pub type WorkflowEnvelope = EventEnvelope<WorkflowEvent>;

/// Failures that are not ordinary guard rejections.
///
/// Every variant aborts the enclosing transaction.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<CompletionError> for EngineError {
    fn from(value: CompletionError) -> Self {
        match value {
            CompletionError::Integrity(e) => EngineError::Domain(e),
            CompletionError::Ledger(e) => EngineError::Ledger(e),
            CompletionError::Registry(e) => EngineError::Registry(e),
        }
    }
}

/// A result that carries a guarded-transition [`Outcome`].
pub trait Reported {
    fn outcome(&self) -> &Outcome;
}

impl Reported for Outcome {
    fn outcome(&self) -> &Outcome {
        self
    }
}

impl Reported for ReceiptReport {
    fn outcome(&self) -> &Outcome {
        &self.outcome
    }
}

/// What one transition produced inside its transaction.
pub(crate) struct Step<R> {
    report: R,
    events: Vec<WorkflowEvent>,
}

impl<R: Reported> Step<R> {
    pub(crate) fn new(report: R) -> Self {
        Self {
            report,
            events: Vec::new(),
        }
    }

    /// Attach an event; it is only built if the report is applied.
    pub(crate) fn announce(mut self, event: impl FnOnce(&R) -> WorkflowEvent) -> Self {
        if self.report.outcome().is_applied() {
            let event = event(&self.report);
            self.events.push(event);
        }
        self
    }

    /// Attach already built events; they are dropped unless the report is applied.
    pub(crate) fn with_events(mut self, events: impl IntoIterator<Item = WorkflowEvent>) -> Self {
        if self.report.outcome().is_applied() {
            self.events.extend(events);
        }
        self
    }
}

enum Abort<R> {
    Rejected(R),
    Failed(EngineError),
}

impl<R> From<StoreError> for Abort<R> {
    fn from(value: StoreError) -> Self {
        Abort::Failed(value.into())
    }
}

/// Rejection used when an operation names an entity that does not exist.
pub(crate) fn missing(what: impl core::fmt::Display) -> Outcome {
    Outcome::rejected(format!("{what} not found"))
}

#[derive(Debug)]
pub struct Engine<S, B, C = SystemClock> {
    store: S,
    bus: B,
    clock: C,
    config: EngineConfig,
    sequence: AtomicU64,
}

impl<S, B, C> Engine<S, B, C> {
    pub fn new(store: S, bus: B, clock: C, config: EngineConfig) -> Self {
        Self {
            store,
            bus,
            clock,
            config,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<S, B, C> Engine<S, B, C>
where
    S: Store,
    B: EventBus<WorkflowEnvelope>,
    C: Clock,
{
    pub(crate) fn stamp(&self, actor: UserId) -> Stamp {
        Stamp::new(actor, self.clock.now())
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, EngineError> {
        Ok(self.store.read(f)?)
    }

    /// Run one guarded transition.
    ///
    /// A rejected report rolls the transaction back like an error does, but is
    /// returned to the caller as a value.
    pub(crate) fn transition<R: Reported>(
        &self,
        op: &'static str,
        entity: u64,
        f: impl FnOnce(&mut Tables) -> Result<Step<R>, EngineError>,
    ) -> Result<R, EngineError> {
        let result = self.store.transaction(|tables| {
            let step = f(tables).map_err(Abort::Failed)?;
            if step.report.outcome().is_rejected() {
                return Err(Abort::Rejected(step.report));
            }
            Ok(step)
        });

        match result {
            Ok(step) => {
                info!(op, entity, message = step.report.outcome().message(), "transition applied");
                self.publish(step.events);
                Ok(step.report)
            }
            Err(Abort::Rejected(report)) => {
                debug!(op, entity, reason = report.outcome().message(), "transition rejected");
                Ok(report)
            }
            Err(Abort::Failed(err)) => {
                log_failure(op, entity, &err);
                Err(err)
            }
        }
    }

    /// Insert a new entity in one transaction and announce it.
    pub(crate) fn create<K>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut Tables) -> Result<(K, WorkflowEvent), EngineError>,
    ) -> Result<K, EngineError>
    where
        K: Copy + Into<u64>,
    {
        match self.store.transaction(f) {
            Ok((key, event)) => {
                let entity: u64 = key.into();
                info!(op, entity, "created");
                self.publish(vec![event]);
                Ok(key)
            }
            Err(err) => {
                log_failure(op, 0, &err);
                Err(err)
            }
        }
    }

    fn publish(&self, events: Vec<WorkflowEvent>) {
        for event in events {
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            let envelope = EventEnvelope::new(
                Uuid::now_v7(),
                event.entity_id(),
                event.kind().as_str(),
                sequence,
                event,
            );
            // Publication is best effort; the transition is already committed.
            if let Err(e) = self.bus.publish(envelope) {
                warn!(sequence, error = %e, "failed to publish workflow event");
            }
        }
    }
}

fn log_failure(op: &'static str, entity: u64, err: &EngineError) {
    match err {
        EngineError::Domain(DomainError::Validation(_) | DomainError::NotFound(_)) => {
            warn!(op, entity, error = %err, "operation refused");
        }
        _ => error!(op, entity, error = %err, "transaction rolled back"),
    }
}
