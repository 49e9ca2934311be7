use assetflow_core::{Clock, Entity, Outcome, Stamp, UserId, Workflow};
use assetflow_distribution::{NewReturnBatch, ReturnBatch, ReturnBatchId};
use assetflow_events::{EntityKind, EventBus, WorkflowEvent};

use super::{Engine, EngineError, Step, WorkflowEnvelope, missing};
use crate::store::{Store, tables::next_key};

fn event(batch: &ReturnBatch, action: &str, stamp: Stamp, outcome: &Outcome) -> WorkflowEvent {
    WorkflowEvent::new(
        EntityKind::ReturnBatch,
        batch.id().get(),
        action,
        batch.status(),
        stamp,
        outcome.message(),
    )
}

impl<S, B, C> Engine<S, B, C>
where
    S: Store,
    B: EventBus<WorkflowEnvelope>,
    C: Clock,
{
    pub fn create_return_batch(&self, input: NewReturnBatch) -> Result<ReturnBatchId, EngineError> {
        let stamp = self.stamp(input.created_by);
        self.create("returns.create", |t| {
            let id = next_key(&t.return_batches);
            let code = ReturnBatch::next_code(
                input.warehouse,
                input.return_date,
                t.return_batches.values().map(ReturnBatch::batch_code),
            );
            let batch = ReturnBatch::new(id, code, input, &t.registry, stamp.at)?;
            let event = WorkflowEvent::new(
                EntityKind::ReturnBatch,
                id.get(),
                "created",
                batch.status(),
                stamp,
                format!(
                    "Return batch {} created with {} items",
                    batch.batch_code(),
                    batch.items().len()
                ),
            );
            t.return_batches.insert(id, batch);
            Ok((id, event))
        })
    }

    pub fn return_batch(&self, id: ReturnBatchId) -> Result<Option<ReturnBatch>, EngineError> {
        self.read(|t| t.return_batches.get(&id).cloned())
    }

    pub fn confirm_return_batch(
        &self,
        id: ReturnBatchId,
        actor: UserId,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("returns.confirm", id.get(), |t| {
            let Some(batch) = t.return_batches.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("return batch #{id}"))));
            };
            let outcome = batch.confirm(stamp, &mut t.registry)?;
            Ok(Step::new(outcome).announce(|o| event(batch, "confirmed", stamp, o)))
        })
    }

    pub fn cancel_return_batch(
        &self,
        id: ReturnBatchId,
        actor: UserId,
        reason: Option<String>,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("returns.cancel", id.get(), |t| {
            let Some(batch) = t.return_batches.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("return batch #{id}"))));
            };
            let outcome = batch.cancel(stamp, reason);
            Ok(Step::new(outcome).announce(|o| event(batch, "cancelled", stamp, o)))
        })
    }
}
