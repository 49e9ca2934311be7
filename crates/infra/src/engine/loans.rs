use assetflow_core::{Clock, Entity, Outcome, Stamp, UserId, Workflow};
use assetflow_events::{EntityKind, EventBus, WorkflowEvent};
use assetflow_loans::{
    AssetLoan, AssetLoanId, AssetLoanStatus, LoanItemId, NewAssetLoan, NewVenueLoan, VenueLoan, VenueLoanId,
};

use super::{Engine, EngineError, Step, WorkflowEnvelope, missing};
use crate::store::{Store, tables::next_key};

fn loan_event(loan: &AssetLoan, action: &str, stamp: Stamp, outcome: &Outcome) -> WorkflowEvent {
    WorkflowEvent::new(
        EntityKind::AssetLoan,
        loan.id().get(),
        action,
        loan.status(),
        stamp,
        outcome.message(),
    )
}

fn venue_event(loan: &VenueLoan, action: &str, stamp: Stamp, outcome: &Outcome) -> WorkflowEvent {
    WorkflowEvent::new(
        EntityKind::VenueLoan,
        loan.id().get(),
        action,
        loan.status(),
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
    pub fn create_asset_loan(&self, input: NewAssetLoan) -> Result<AssetLoanId, EngineError> {
        let stamp = self.stamp(input.requester);
        self.create("asset_loan.create", |t| {
            let id = next_key(&t.asset_loans);
            let loan = AssetLoan::new(id, input, &t.registry, stamp.at)?;
            let event = WorkflowEvent::new(
                EntityKind::AssetLoan,
                id.get(),
                "created",
                loan.status(),
                stamp,
                format!("Asset loan #{id} requested for {} items", loan.items().len()),
            );
            t.asset_loans.insert(id, loan);
            Ok((id, event))
        })
    }

    pub fn asset_loan(&self, id: AssetLoanId) -> Result<Option<AssetLoan>, EngineError> {
        self.read(|t| t.asset_loans.get(&id).cloned())
    }

    pub fn approve_asset_loan(
        &self,
        id: AssetLoanId,
        actor: UserId,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("asset_loan.approve", id.get(), |t| {
            let Some(loan) = t.asset_loans.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("asset loan #{id}"))));
            };
            let outcome = loan.approve(stamp);
            Ok(Step::new(outcome).announce(|o| loan_event(loan, "approved", stamp, o)))
        })
    }

    pub fn reject_asset_loan(
        &self,
        id: AssetLoanId,
        actor: UserId,
        reason: Option<String>,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("asset_loan.reject", id.get(), |t| {
            let Some(loan) = t.asset_loans.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("asset loan #{id}"))));
            };
            let outcome = loan.reject(stamp, reason);
            Ok(Step::new(outcome).announce(|o| loan_event(loan, "rejected", stamp, o)))
        })
    }

    pub fn ship_asset_loan(&self, id: AssetLoanId, actor: UserId) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("asset_loan.ship", id.get(), |t| {
            let Some(loan) = t.asset_loans.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("asset loan #{id}"))));
            };
            let outcome = loan.ship(stamp, &mut t.registry)?;
            Ok(Step::new(outcome).announce(|o| loan_event(loan, "shipped", stamp, o)))
        })
    }

    /// The borrowing unit confirms it has the goods.
    pub fn receive_asset_loan(
        &self,
        id: AssetLoanId,
        actor: UserId,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("asset_loan.receive", id.get(), |t| {
            let Some(loan) = t.asset_loans.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("asset loan #{id}"))));
            };
            let outcome = loan.receive_by_unit(stamp, &mut t.registry)?;
            Ok(Step::new(outcome).announce(|o| loan_event(loan, "received", stamp, o)))
        })
    }

    pub fn request_asset_loan_return(
        &self,
        id: AssetLoanId,
        actor: UserId,
        reason: Option<String>,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("asset_loan.request_return", id.get(), |t| {
            let Some(loan) = t.asset_loans.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("asset loan #{id}"))));
            };
            let outcome = loan.request_return(stamp, reason);
            Ok(Step::new(outcome).announce(|o| loan_event(loan, "return_requested", stamp, o)))
        })
    }

    pub fn approve_asset_loan_return(
        &self,
        id: AssetLoanId,
        actor: UserId,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("asset_loan.approve_return", id.get(), |t| {
            let Some(loan) = t.asset_loans.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("asset loan #{id}"))));
            };
            let outcome = loan.approve_return(stamp);
            Ok(Step::new(outcome).announce(|o| loan_event(loan, "return_approved", stamp, o)))
        })
    }

    pub fn submit_return_proof(
        &self,
        id: AssetLoanId,
        item: LoanItemId,
        proof: impl Into<String>,
        actor: UserId,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        let proof = proof.into();
        self.transition("asset_loan.submit_return_proof", id.get(), |t| {
            let Some(loan) = t.asset_loans.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("asset loan #{id}"))));
            };
            let outcome = loan.submit_return_proof(item, proof, stamp);
            Ok(Step::new(outcome)
                .announce(|o| loan_event(loan, "return_proof_submitted", stamp, o)))
        })
    }

    /// Verify one returned item; the last verified item completes the loan.
    pub fn verify_return_item(
        &self,
        id: AssetLoanId,
        item: LoanItemId,
        approve: bool,
        reason: Option<String>,
        actor: UserId,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("asset_loan.verify_return_item", id.get(), |t| {
            let Some(loan) = t.asset_loans.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("asset loan #{id}"))));
            };
            let outcome = loan.verify_return_item(item, approve, reason, stamp, &mut t.registry)?;
            let step = Step::new(outcome)
                .announce(|o| loan_event(loan, "return_item_verified", stamp, o));
            let step = if loan.status() == AssetLoanStatus::Completed {
                step.announce(|o| loan_event(loan, "completed", stamp, o))
            } else {
                step
            };
            Ok(step)
        })
    }

    pub fn create_venue_loan(&self, input: NewVenueLoan) -> Result<VenueLoanId, EngineError> {
        let stamp = self.stamp(input.borrower);
        self.create("venue_loan.create", |t| {
            let id = next_key(&t.venue_loans);
            let loan = VenueLoan::new(id, input)?;
            let event = WorkflowEvent::new(
                EntityKind::VenueLoan,
                id.get(),
                "created",
                loan.status(),
                stamp,
                format!("Venue loan #{id} requested for {}", loan.event_name()),
            );
            t.venue_loans.insert(id, loan);
            Ok((id, event))
        })
    }

    pub fn venue_loan(&self, id: VenueLoanId) -> Result<Option<VenueLoan>, EngineError> {
        self.read(|t| t.venue_loans.get(&id).cloned())
    }

    pub fn approve_venue_loan(
        &self,
        id: VenueLoanId,
        actor: UserId,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("venue_loan.approve", id.get(), |t| {
            let Some(loan) = t.venue_loans.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("venue loan #{id}"))));
            };
            let outcome = loan.approve(stamp);
            Ok(Step::new(outcome).announce(|o| venue_event(loan, "approved", stamp, o)))
        })
    }

    pub fn reject_venue_loan(
        &self,
        id: VenueLoanId,
        actor: UserId,
        reason: Option<String>,
    ) -> Result<Outcome, EngineError> {
        let stamp = self.stamp(actor);
        self.transition("venue_loan.reject", id.get(), |t| {
            let Some(loan) = t.venue_loans.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("venue loan #{id}"))));
            };
            let outcome = loan.reject(stamp, reason);
            Ok(Step::new(outcome).announce(|o| venue_event(loan, "rejected", stamp, o)))
        })
    }

    /// Manual completion; legal any time while the loan is active.
    pub fn complete_venue_loan(
        &self,
        id: VenueLoanId,
        actor: UserId,
    ) -> Result<Outcome, EngineError> {
        self.complete_venue_loan_as(id, self.stamp(actor))
    }

    pub(crate) fn start_venue_loan_as(
        &self,
        id: VenueLoanId,
        stamp: Stamp,
    ) -> Result<Outcome, EngineError> {
        self.transition("venue_loan.start", id.get(), |t| {
            let Some(loan) = t.venue_loans.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("venue loan #{id}"))));
            };
            let outcome = loan.start(stamp, &mut t.registry)?;
            Ok(Step::new(outcome).announce(|o| venue_event(loan, "started", stamp, o)))
        })
    }

    pub(crate) fn complete_venue_loan_as(
        &self,
        id: VenueLoanId,
        stamp: Stamp,
    ) -> Result<Outcome, EngineError> {
        self.transition("venue_loan.complete", id.get(), |t| {
            let Some(loan) = t.venue_loans.get_mut(&id) else {
                return Ok(Step::new(missing(format_args!("venue loan #{id}"))));
            };
            let outcome = loan.complete(stamp, &mut t.registry)?;
            Ok(Step::new(outcome).announce(|o| venue_event(loan, "completed", stamp, o)))
        })
    }
}
