//! Distribution batches and their field tasks.
//!
//! Task events are keyed by the batch id: distribution ids are only unique
//! within their batch.

use assetflow_core::{Clock, Entity, Outcome, Stamp, UserId, Workflow};
use assetflow_distribution::{
    BatchId, DistributionBatch, DistributionId, NewBatch, RejectedDistribution,
};
use assetflow_events::{EntityKind, EventBus, WorkflowEvent};

use super::{Engine, EngineError, Step, WorkflowEnvelope, missing};
use crate::store::{Store, Tables, tables::next_key};

fn batch_event(
    batch: &DistributionBatch,
    action: &str,
    stamp: Stamp,
    outcome: &Outcome,
) -> WorkflowEvent {
    WorkflowEvent::new(
        EntityKind::DistributionBatch,
        batch.id().get(),
        action,
        batch.status(),
        stamp,
        outcome.message(),
    )
}

fn task_event(
    batch: &DistributionBatch,
    task: DistributionId,
    action: &str,
    stamp: Stamp,
    outcome: &Outcome,
) -> Option<WorkflowEvent> {
    let distribution = batch.distribution(task)?;
    Some(WorkflowEvent::new(
        EntityKind::Distribution,
        batch.id().get(),
        action,
        distribution.status(),
        stamp,
        outcome.message(),
    ))
}

/// A fresh batch code not yet used by any batch.
fn unique_code(t: &Tables) -> String {
    loop {
        let code = DistributionBatch::generate_code();
        if !t.batches.values().any(|b| b.batch_code() == code) {
            return code;
        }
    }
}

impl<S, B, C> Engine<S, B, C>
where
    S: Store,
    B: EventBus<WorkflowEnvelope>,
    C: Clock,
{
    /// Create a batch of drafts; every listed unit is reserved.
    pub fn create_batch(&self, input: NewBatch) -> Result<BatchId, EngineError> {
        let stamp = self.stamp(input.created_by);
        self.create("distribution.create", |t| {
            let id = next_key(&t.batches);
            let code = unique_code(t);
            let batch = DistributionBatch::new(id, code, input, &mut t.registry, stamp)?;
            let event = WorkflowEvent::new(
                EntityKind::DistributionBatch,
                id.get(),
                "created",
                batch.status(),
                stamp,
                format!(
                    "Batch {} created with {} distributions",
                    batch.batch_code(),
                    batch.distributions().len()
                ),
            );
            t.batches.insert(id, batch);
            Ok((id, event))
        })
    }

    pub fn batch(&self, id: BatchId) -> Result<Option<DistributionBatch>, EngineError> {
        self.read(|t| t.batches.get(&id).cloned())
    }

    /// Archived drafts of a rejected batch, in rejection order.
    pub fn rejected_distributions(
        &self,
        batch: BatchId,
    ) -> Result<Vec<RejectedDistribution>, EngineError> {
        self.read(|t| {
            t.rejected_distributions
                .values()
                .filter(|r| r.batch() == batch)
                .cloned()
                .collect()
        })
    }

    pub fn approve_batch(&self, id: BatchId, actor: UserId) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("distribution.approve", id.get(), |t| {
            let Some(batch) = t.batches.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("distribution batch #{id}"))));
            };
            let outcome = batch.approve(stamp, &mut t.registry)?;
            Ok(Step::new(outcome).announce(|o| batch_event(batch, "approved", stamp, o)))
        })
    }

    /// Reject a batch; its drafts are moved to the rejected archive.
    pub fn reject_batch(
        &self,
        id: BatchId,
        actor: UserId,
        reason: Option<String>,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("distribution.reject", id.get(), |t| {
            let Some(batch) = t.batches.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("distribution batch #{id}"))));
            };
            let (outcome, removed) = batch.reject(stamp, reason, &mut t.registry)?;
            for snapshot in removed {
                let key = next_key(&t.rejected_distributions);
                let archived = RejectedDistribution::archive(key, batch, snapshot)?;
                t.rejected_distributions.insert(key, archived);
            }
            Ok(Step::new(outcome).announce(|o| batch_event(batch, "rejected", stamp, o)))
        })
    }

    pub fn mark_batch_distributed(
        &self,
        id: BatchId,
        actor: UserId,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("distribution.mark_distributed", id.get(), |t| {
            let Some(batch) = t.batches.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("distribution batch #{id}"))));
            };
            let outcome = batch.mark_distributed(stamp);
            Ok(Step::new(outcome).announce(|o| batch_event(batch, "distributed", stamp, o)))
        })
    }

    /// Field staff report a task as done.
    pub fn submit_task_verification(
        &self,
        id: BatchId,
        task: DistributionId,
        notes: Option<String>,
        actor: UserId,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("distribution.submit_verification", id.get(), |t| {
            let Some(batch) = t.batches.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("distribution batch #{id}"))));
            };
            let Some(distribution) = batch.distribution_mut(task) else {
                return Ok(Step::new(missing(format_args!("distribution {task} in batch #{id}"))));
            };
            let outcome = distribution.submit_verification(notes, stamp);
            let event = task_event(batch, task, "verification_submitted", stamp, &outcome);
            Ok(Step::new(outcome).with_events(event))
        })
    }

    /// Accept a submitted task: the unit is installed at its destination.
    pub fn verify_task(
        &self,
        id: BatchId,
        task: DistributionId,
        actor: UserId,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("distribution.verify_task", id.get(), |t| {
            let Some(batch) = t.batches.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("distribution batch #{id}"))));
            };
            let Some(distribution) = batch.distribution_mut(task) else {
                return Ok(Step::new(missing(format_args!("distribution {task} in batch #{id}"))));
            };
            let outcome = distribution.verify_task(stamp, &mut t.registry)?;
            let event = task_event(batch, task, "verified", stamp, &outcome);
            Ok(Step::new(outcome).with_events(event))
        })
    }

    pub fn reject_task_verification(
        &self,
        id: BatchId,
        task: DistributionId,
        actor: UserId,
        reason: Option<String>,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("distribution.reject_verification", id.get(), |t| {
            let Some(batch) = t.batches.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("distribution batch #{id}"))));
            };
            let Some(distribution) = batch.distribution_mut(task) else {
                return Ok(Step::new(missing(format_args!("distribution {task} in batch #{id}"))));
            };
            let outcome = distribution.reject_verification(stamp, reason);
            let event = task_event(batch, task, "verification_rejected", stamp, &outcome);
            Ok(Step::new(outcome).with_events(event))
        })
    }
}
