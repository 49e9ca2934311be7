//! Asset requests raised by organisational units.

use assetflow_core::{Clock, DomainError, Entity, Outcome, Stamp, UserId, Workflow};
use assetflow_distribution::{
    AssetRequest, AssetRequestId, BatchId, BatchStatus, NewAssetRequest,
};
use assetflow_events::{EntityKind, EventBus, WorkflowEvent};

use super::{Engine, EngineError, Step, WorkflowEnvelope, missing};
use crate::store::{Store, tables::next_key};

fn event(request: &AssetRequest, action: &str, stamp: Stamp, outcome: &Outcome) -> WorkflowEvent {
    WorkflowEvent::new(
        EntityKind::AssetRequest,
        request.id().get(),
        action,
        request.status(),
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
    /// Open a request in `pending`. Requested catalog items must exist.
    pub fn create_asset_request(
        &self,
        input: NewAssetRequest,
    ) -> Result<AssetRequestId, EngineError> {
        let stamp = self.stamp(input.requested_by);
        self.create("asset_request.create", |t| {
            if let Some(item) = input.items.iter().find(|i| t.catalog.get(i.item).is_none()) {
                return Err(DomainError::not_found(format!("catalog item {}", item.item)).into());
            }
            let id = next_key(&t.asset_requests);
            let request = AssetRequest::new(id, input, stamp.at)?;
            let event = WorkflowEvent::new(
                EntityKind::AssetRequest,
                id.get(),
                "created",
                request.status(),
                stamp,
                format!(
                    "Asset request #{id} created for unit {} ({} units)",
                    request.unit(),
                    request.total_quantity()
                ),
            );
            t.asset_requests.insert(id, request);
            Ok((id, event))
        })
    }

    pub fn asset_request(&self, id: AssetRequestId) -> Result<Option<AssetRequest>, EngineError> {
        self.read(|t| t.asset_requests.get(&id).cloned())
    }

    pub fn verify_asset_request(
        &self,
        id: AssetRequestId,
        actor: UserId,
        notes: Option<String>,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("asset_request.verify", id.get(), |t| {
            let Some(request) = t.asset_requests.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("asset request #{id}"))));
            };
            let outcome = request.verify(stamp, notes);
            Ok(Step::new(outcome).announce(|o| event(request, "verified", stamp, o)))
        })
    }

    pub fn reject_asset_request(
        &self,
        id: AssetRequestId,
        actor: UserId,
        reason: Option<String>,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("asset_request.reject", id.get(), |t| {
            let Some(request) = t.asset_requests.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("asset request #{id}"))));
            };
            let outcome = request.reject(stamp, reason);
            Ok(Step::new(outcome).announce(|o| event(request, "rejected", stamp, o)))
        })
    }

    /// Close a verified request with the batch that delivered it.
    ///
    /// The batch must target the requesting unit and be approved or
    /// distributed.
    pub fn complete_asset_request(
        &self,
        id: AssetRequestId,
        actor: UserId,
        batch: BatchId,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("asset_request.complete", id.get(), |t| {
            let Some(fulfilling) = t.batches.get(&batch) else {
                return Ok(Step::new(missing(format_args!("distribution batch #{batch}"))));
            };
            let Some(request) = t.asset_requests.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("asset request #{id}"))));
            };
            if fulfilling.unit() != request.unit() {
                return Ok(Step::new(Outcome::rejected(format!(
                    "distribution batch #{batch} goes to unit {}, not to the requesting unit {}",
                    fulfilling.unit(),
                    request.unit()
                ))));
            }
            if !matches!(
                fulfilling.status(),
                BatchStatus::Approved | BatchStatus::Distributed
            ) {
                return Ok(Step::new(Outcome::rejected(format!(
                    "distribution batch #{batch} has not been approved (current status: {})",
                    fulfilling.status()
                ))));
            }
            let outcome = request.complete(batch, stamp);
            Ok(Step::new(outcome).announce(|o| event(request, "completed", stamp, o)))
        })
    }
}
