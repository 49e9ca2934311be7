//! Venue (room) loans.
//!
//! Approval is manual; starting and finishing are driven by time. The
//! scheduler calls [`VenueLoan::start`] and [`VenueLoan::complete`] with
//! [`Actor::Scheduler`](assetflow_core::Actor) stamps, exactly as a user would.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use assetflow_core::{
    DomainError, DomainResult, Entity, Outcome, RoomId, Rule, Stamp, UnitId, UserId, Workflow,
    WorkflowStatus, define_id,
};
use assetflow_inventory::{InstanceId, InstanceRegistry, ItemStatus, RegistryError};

define_id!(VenueLoanId, "VenueLoanId");

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueLoanStatus {
    Pending,
    Approved,
    Active,
    Completed,
    Rejected,
}

impl core::fmt::Display for VenueLoanStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            VenueLoanStatus::Pending => "pending",
            VenueLoanStatus::Approved => "approved",
            VenueLoanStatus::Active => "active",
            VenueLoanStatus::Completed => "completed",
            VenueLoanStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

impl WorkflowStatus for VenueLoanStatus {
    fn is_terminal(self) -> bool {
        matches!(self, VenueLoanStatus::Completed | VenueLoanStatus::Rejected)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueLoanAction {
    Approve,
    Reject,
    Start,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVenueLoan {
    pub room: RoomId,
    pub borrower_unit: UnitId,
    pub borrower: UserId,
    pub event_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueLoan {
    id: VenueLoanId,
    room: RoomId,
    borrower_unit: UnitId,
    borrower: UserId,
    event_name: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    notes: String,
    status: VenueLoanStatus,

    approved: Option<Stamp>,
    rejected: Option<Stamp>,
    rejection_reason: Option<String>,
    started: Option<Stamp>,
    completed: Option<Stamp>,

    /// Units this loan marked `loaned`; exactly these are restored.
    loaned_units: Vec<InstanceId>,
}

impl VenueLoan {
    pub fn new(id: VenueLoanId, input: NewVenueLoan) -> DomainResult<Self> {
        let event_name = input.event_name.trim();
        if event_name.is_empty() {
            return Err(DomainError::validation("event name cannot be empty"));
        }
        if input.start >= input.end {
            return Err(DomainError::validation(
                "venue loan must start before it ends",
            ));
        }

        Ok(Self {
            id,
            room: input.room,
            borrower_unit: input.borrower_unit,
            borrower: input.borrower,
            event_name: event_name.to_string(),
            start: input.start,
            end: input.end,
            notes: input.notes,
            status: VenueLoanStatus::Pending,
            approved: None,
            rejected: None,
            rejection_reason: None,
            started: None,
            completed: None,
            loaned_units: Vec::new(),
        })
    }

    pub fn room(&self) -> RoomId {
        self.room
    }

    pub fn borrower_unit(&self) -> UnitId {
        self.borrower_unit
    }

    pub fn borrower(&self) -> UserId {
        self.borrower
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn start_at(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end_at(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn approved(&self) -> Option<Stamp> {
        self.approved
    }

    pub fn rejected(&self) -> Option<Stamp> {
        self.rejected
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn started(&self) -> Option<Stamp> {
        self.started
    }

    pub fn completed(&self) -> Option<Stamp> {
        self.completed
    }

    pub fn loaned_units(&self) -> &[InstanceId] {
        &self.loaned_units
    }

    /// Approved and its start time has come.
    pub fn is_due_to_start(&self, now: DateTime<Utc>) -> bool {
        self.status == VenueLoanStatus::Approved && self.start <= now
    }

    /// Active and its end time has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == VenueLoanStatus::Active && now > self.end
    }

    /// Approval leaves the room's units untouched.
    pub fn approve(&mut self, stamp: Stamp) -> Outcome {
        if let Err(rejection) = self.advance(VenueLoanAction::Approve) {
            return rejection.into();
        }
        self.approved = Some(stamp);
        Outcome::applied(format!(
            "Venue loan #{} approved; it starts at {}",
            self.id, self.start
        ))
    }

    pub fn reject(&mut self, stamp: Stamp, reason: Option<String>) -> Outcome {
        if let Err(rejection) = self.advance(VenueLoanAction::Reject) {
            return rejection.into();
        }
        self.rejected = Some(stamp);
        self.rejection_reason = reason;
        Outcome::applied(format!("Venue loan #{} rejected", self.id))
    }

    /// Begin the loan: every unit in the room becomes `loaned`.
    pub fn start(
        &mut self,
        stamp: Stamp,
        registry: &mut InstanceRegistry,
    ) -> Result<Outcome, RegistryError> {
        if let Err(rejection) = self.guard(VenueLoanAction::Start) {
            return Ok(rejection.into());
        }
        if stamp.at < self.start {
            return Ok(Outcome::rejected(format!(
                "venue loan #{} cannot start before {}",
                self.id, self.start
            )));
        }

        let units: Vec<InstanceId> = registry.in_room(self.room).map(|i| i.id()).collect();
        for id in &units {
            registry.set_status(
                *id,
                ItemStatus::Loaned,
                stamp,
                format!("loaned with room {} for venue loan #{}", self.room, self.id),
            )?;
        }

        self.status = VenueLoanStatus::Active;
        self.started = Some(stamp);
        self.loaned_units = units;
        Ok(Outcome::applied(format!(
            "Venue loan #{} started; {} units in room {} marked loaned",
            self.id,
            self.loaned_units.len(),
            self.room
        )))
    }

    /// Finish the loan; units it marked `loaned` go back to `used`.
    ///
    /// Allowed any time while active: the scheduler calls it once the end
    /// time has passed, a user may call it earlier.
    pub fn complete(
        &mut self,
        stamp: Stamp,
        registry: &mut InstanceRegistry,
    ) -> Result<Outcome, RegistryError> {
        if let Err(rejection) = self.guard(VenueLoanAction::Complete) {
            return Ok(rejection.into());
        }

        let mut restored = 0usize;
        for id in &self.loaned_units {
            let note = format!("venue loan #{} ended", self.id);
            let was_loaned = registry.update(*id, stamp, note, |unit| {
                let loaned = unit.status() == ItemStatus::Loaned;
                if loaned {
                    unit.set_status(ItemStatus::InUse);
                }
                loaned
            })?;
            if was_loaned {
                restored += 1;
            }
        }

        self.status = VenueLoanStatus::Completed;
        self.completed = Some(stamp);
        Ok(Outcome::applied(format!(
            "Venue loan #{} completed; {restored} units restored to used",
            self.id
        )))
    }
}

impl Entity for VenueLoan {
    type Id = VenueLoanId;

    fn id(&self) -> VenueLoanId {
        self.id
    }
}

impl Workflow for VenueLoan {
    type Status = VenueLoanStatus;
    type Action = VenueLoanAction;

    const ACTIONS: &'static [VenueLoanAction] = &[
        VenueLoanAction::Approve,
        VenueLoanAction::Reject,
        VenueLoanAction::Start,
        VenueLoanAction::Complete,
    ];

    fn status(&self) -> VenueLoanStatus {
        self.status
    }

    fn set_status(&mut self, status: VenueLoanStatus) {
        self.status = status;
    }

    fn rule(action: VenueLoanAction) -> Rule<VenueLoanStatus> {
        use VenueLoanStatus::*;
        match action {
            VenueLoanAction::Approve => Rule {
                from: &[Pending],
                to: Approved,
                rejection: "only pending venue loans can be approved",
            },
            VenueLoanAction::Reject => Rule {
                from: &[Pending],
                to: Rejected,
                rejection: "only pending venue loans can be rejected",
            },
            VenueLoanAction::Start => Rule {
                from: &[Approved],
                to: Active,
                rejection: "only approved venue loans can start",
            },
            VenueLoanAction::Complete => Rule {
                from: &[Active],
                to: Completed,
                rejection: "only active venue loans can be completed",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetflow_core::ensure_acyclic;
    use assetflow_inventory::{Location, NewInstance};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 8, 0, 0).unwrap()
    }

    fn user_stamp(at: DateTime<Utc>) -> Stamp {
        Stamp::new(UserId::new(), at)
    }

    fn room_with_units(n: usize) -> (InstanceRegistry, Vec<InstanceId>) {
        let mut registry = InstanceRegistry::new();
        let ids = registry
            .register_batch(
                (0..n)
                    .map(|i| NewInstance {
                        serial_number: None,
                        serial_unit: format!("SU-{i}"),
                        catalog_item: None,
                    })
                    .collect(),
                user_stamp(t0()),
                "received",
            )
            .unwrap();
        for id in &ids {
            registry
                .update(*id, user_stamp(t0()), "installed", |unit| {
                    unit.set_status(ItemStatus::InUse);
                    unit.relocate(Location::Unit {
                        unit: UnitId::new(1),
                        room: Some(RoomId::new(9)),
                    });
                })
                .unwrap();
        }
        (registry, ids)
    }

    fn approved_loan() -> VenueLoan {
        let mut loan = VenueLoan::new(
            VenueLoanId::new(1),
            NewVenueLoan {
                room: RoomId::new(9),
                borrower_unit: UnitId::new(2),
                borrower: UserId::new(),
                event_name: "Workshop".into(),
                start: t0() + Duration::hours(1),
                end: t0() + Duration::hours(3),
                notes: String::new(),
            },
        )
        .unwrap();
        let _ = loan.approve(user_stamp(t0()));
        loan
    }

    #[test]
    fn transition_table_is_a_dag() {
        assert!(ensure_acyclic::<VenueLoan>().is_ok());
    }

    #[test]
    fn start_must_precede_end() {
        let err = VenueLoan::new(
            VenueLoanId::new(1),
            NewVenueLoan {
                room: RoomId::new(1),
                borrower_unit: UnitId::new(1),
                borrower: UserId::new(),
                event_name: "Seminar".into(),
                start: t0(),
                end: t0(),
                notes: String::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn approval_does_not_touch_units() {
        let (registry, ids) = room_with_units(2);
        let loan = approved_loan();
        assert_eq!(loan.status(), VenueLoanStatus::Approved);
        assert_eq!(registry.get(ids[0]).unwrap().status(), ItemStatus::InUse);
    }

    #[test]
    fn cannot_start_early() {
        let (mut registry, ids) = room_with_units(1);
        let mut loan = approved_loan();

        let outcome = loan.start(Stamp::scheduler(t0()), &mut registry).unwrap();
        assert!(outcome.is_rejected());
        assert_eq!(loan.status(), VenueLoanStatus::Approved);
        assert_eq!(registry.get(ids[0]).unwrap().status(), ItemStatus::InUse);
        assert!(!loan.is_due_to_start(t0()));
        assert!(loan.is_due_to_start(t0() + Duration::hours(1)));
    }

    #[test]
    fn start_and_complete_toggle_room_units() {
        let (mut registry, ids) = room_with_units(3);
        let mut loan = approved_loan();

        let started = loan
            .start(Stamp::scheduler(t0() + Duration::hours(1)), &mut registry)
            .unwrap();
        assert!(started.is_applied());
        assert_eq!(loan.loaned_units().len(), 3);
        assert!(ids.iter().all(|id| registry.get(*id).unwrap().status() == ItemStatus::Loaned));

        // One unit went to maintenance during the event; it stays there.
        registry.set_status(ids[2], ItemStatus::Maintenance, user_stamp(t0()), "repair").unwrap();

        let now = t0() + Duration::hours(4);
        assert!(loan.is_expired(now));
        let done = loan.complete(Stamp::scheduler(now), &mut registry).unwrap();
        assert!(done.message().contains("2 units restored"));
        assert_eq!(registry.get(ids[0]).unwrap().status(), ItemStatus::InUse);
        assert_eq!(registry.get(ids[2]).unwrap().status(), ItemStatus::Maintenance);
        assert!(loan.completed().unwrap().actor.is_scheduler());
    }

    #[test]
    fn second_completion_is_rejected() {
        let (mut registry, _) = room_with_units(1);
        let mut loan = approved_loan();
        let _ = loan.start(user_stamp(t0() + Duration::hours(1)), &mut registry).unwrap();
        let _ = loan.complete(user_stamp(t0() + Duration::hours(2)), &mut registry).unwrap();

        let again = loan
            .complete(Stamp::scheduler(t0() + Duration::hours(5)), &mut registry)
            .unwrap();
        assert!(again.is_rejected());
        assert!(!loan.completed().unwrap().actor.is_scheduler());
    }
}
