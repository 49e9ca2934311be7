use tracing::warn;

use assetflow_core::{
    Clock, DomainError, Entity, Outcome, Stamp, UserId, WarehouseId, Workflow,
};
use assetflow_events::{EntityKind, EventBus, WorkflowEvent};
use assetflow_inventory::{CatalogItemId, NewItemDescriptor};
use assetflow_purchasing::{
    self as purchasing, Delivery, ItemRef, LineItemId, NewRequest, ProcurementRequest,
    ReceiptReport, RequestId,
};

use super::{Engine, EngineError, Step, WorkflowEnvelope, missing};
use crate::store::{Store, tables::next_key};

fn event(
    request: &ProcurementRequest,
    action: &str,
    stamp: Stamp,
    outcome: &Outcome,
) -> WorkflowEvent {
    WorkflowEvent::new(
        EntityKind::ProcurementRequest,
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
    pub fn register_catalog_item(
        &self,
        descriptor: &NewItemDescriptor,
    ) -> Result<CatalogItemId, EngineError> {
        let result = self
            .store()
            .transaction(|t| t.catalog.register(descriptor).map_err(EngineError::from));
        if let Err(err) = &result {
            warn!(name = %descriptor.name, error = %err, "catalog item not registered");
        }
        result
    }

    /// Open a new request in `pending`. Catalog references must exist.
    pub fn create_request(&self, input: NewRequest) -> Result<RequestId, EngineError> {
        let stamp = self.stamp(input.requester);
        self.create("procurement.create", |t| {
            for line in &input.lines {
                if let ItemRef::Catalog(item) = &line.item {
                    if t.catalog.get(*item).is_none() {
                        return Err(DomainError::not_found(format!("catalog item {item}")).into());
                    }
                }
            }
            let id = next_key(&t.requests);
            let request = ProcurementRequest::new(id, input, stamp.at)?;
            let event = WorkflowEvent::new(
                EntityKind::ProcurementRequest,
                id.get(),
                "created",
                request.status(),
                stamp,
                format!(
                    "Procurement request #{id} created with {} line items",
                    request.lines().len()
                ),
            );
            t.requests.insert(id, request);
            Ok((id, event))
        })
    }

    pub fn request(&self, id: RequestId) -> Result<Option<ProcurementRequest>, EngineError> {
        self.read(|t| t.requests.get(&id).cloned())
    }

    pub fn approve_request(&self, id: RequestId, actor: UserId) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("procurement.approve", id.get(), |t| {
            let Some(request) = t.requests.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("procurement request #{id}"))));
            };
            let outcome = request.approve(stamp);
            Ok(Step::new(outcome).announce(|o| event(request, "approved", stamp, o)))
        })
    }

    pub fn reject_request(
        &self,
        id: RequestId,
        actor: UserId,
        reason: Option<String>,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("procurement.reject", id.get(), |t| {
            let Some(request) = t.requests.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("procurement request #{id}"))));
            };
            let outcome = request.reject(stamp, reason);
            Ok(Step::new(outcome).announce(|o| event(request, "rejected", stamp, o)))
        })
    }

    pub fn cancel_request(
        &self,
        id: RequestId,
        actor: UserId,
        reason: Option<String>,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("procurement.cancel", id.get(), |t| {
            let Some(request) = t.requests.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("procurement request #{id}"))));
            };
            let outcome = request.cancel(stamp, reason);
            Ok(Step::new(outcome).announce(|o| event(request, "cancelled", stamp, o)))
        })
    }

    /// Resolve a placeholder line to an existing catalog item.
    pub fn bind_line_item(
        &self,
        id: RequestId,
        line: LineItemId,
        item: CatalogItemId,
        actor: UserId,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("procurement.bind_item", id.get(), |t| {
            if t.catalog.get(item).is_none() {
                return Ok(Step::new(missing(format_args!("catalog item {item}"))));
            }
            let Some(request) = t.requests.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("procurement request #{id}"))));
            };
            let outcome = request.bind_item(line, item);
            Ok(Step::new(outcome).announce(|o| event(request, "item_bound", stamp, o)))
        })
    }

    /// Create the catalog entry described by a placeholder line and bind it.
    pub fn register_pending_item(
        &self,
        id: RequestId,
        line: LineItemId,
        actor: UserId,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("procurement.register_pending_item", id.get(), |t| {
            let Some(request) = t.requests.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("procurement request #{id}"))));
            };
            let descriptor = match request.line(line).map(|l| l.item()) {
                Some(ItemRef::Pending(descriptor)) => descriptor.clone(),
                Some(ItemRef::Catalog(existing)) => {
                    return Ok(Step::new(Outcome::rejected(format!(
                        "line {line} is already bound to catalog item {existing}"
                    ))));
                }
                None => {
                    return Ok(Step::new(Outcome::rejected(format!(
                        "line {line} not found on request #{id}"
                    ))));
                }
            };
            let item = t.catalog.register(&descriptor)?;
            let outcome = request.bind_item(line, item);
            Ok(Step::new(outcome).announce(|o| event(request, "item_bound", stamp, o)))
        })
    }

    pub fn receive_delivery(
        &self,
        id: RequestId,
        actor: UserId,
        delivery: &Delivery,
    ) -> Result<ReceiptReport, EngineError> {
        let stamp = self.stamp(actor);
        let prefix = &self.config().serial_unit_prefix;
        self.transition("procurement.receive", id.get(), |t| {
            let Some(request) = t.requests.get_mut(&id) else {
                return Ok(Step::new(ReceiptReport::rejected(format!(
                    "procurement request #{id} not found"
                ))));
            };
            // Codes carry the configured prefix whatever the store was seeded with.
            t.serial_units.set_prefix(prefix);
            let report = purchasing::receive_delivery(
                request,
                delivery,
                &t.catalog,
                &mut t.registry,
                &mut t.serial_units,
                stamp,
            );
            Ok(Step::new(report).announce(|r| event(request, "received", stamp, &r.outcome)))
        })
    }

    /// Bind received units to `warehouse` and add the stock.
    pub fn complete_request(
        &self,
        id: RequestId,
        actor: UserId,
        warehouse: WarehouseId,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("procurement.complete", id.get(), |t| {
            let Some(request) = t.requests.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("procurement request #{id}"))));
            };
            let completion =
                purchasing::complete(request, warehouse, &mut t.registry, &mut t.ledger, stamp)?;
            if let purchasing::Completion::Completed(report) = &completion {
                for unit in &report.skipped {
                    warn!(
                        request_id = id.get(),
                        warehouse_id = warehouse.get(),
                        serial_unit = %unit.serial_unit,
                        "unit already located elsewhere; skipped"
                    );
                }
            }
            let outcome = completion.into_outcome(id);
            Ok(Step::new(outcome).announce(|o| event(request, "completed", stamp, o)))
        })
    }
}
