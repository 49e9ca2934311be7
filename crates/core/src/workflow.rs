//! Guarded state-machine contract shared by every workflow entity.
//!
//! Each workflow entity (procurement request, asset loan, venue loan,
//! distribution batch, return batch, ...) supplies:
//!
//! - a small status enum ([`WorkflowStatus`]),
//! - an action enum and a per-action [`Rule`] (legal source statuses, target
//!   status, human-readable rejection text),
//! - optionally a child-iteration hook ([`Cascade`]) when a parent transition
//!   forces the same transition on its line items.
//!
//! Transitions report expected failures as [`Outcome::Rejected`]; they are
//! never errors. A rejected guard performs no mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::UserId;

/// Result of a guarded transition.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "message", rename_all = "snake_case")]
pub enum Outcome {
    /// The transition happened; the message is suitable for display.
    Applied(String),
    /// The guard refused the transition; nothing was mutated.
    Rejected(String),
}

impl Outcome {
    pub fn applied(msg: impl Into<String>) -> Self {
        Self::Applied(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Outcome::Rejected(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Outcome::Applied(m) | Outcome::Rejected(m) => m,
        }
    }

    /// `(ok, message)` pair for callers that surface the result directly.
    pub fn into_parts(self) -> (bool, String) {
        match self {
            Outcome::Applied(m) => (true, m),
            Outcome::Rejected(m) => (false, m),
        }
    }
}

/// A refused guard, convertible into [`Outcome::Rejected`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection(String);

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    pub fn reason(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Rejection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Rejection> for Outcome {
    fn from(value: Rejection) -> Self {
        Outcome::Rejected(value.0)
    }
}

/// Who triggered a transition.
///
/// The scheduler is modelled as one more actor, driven by a clock instead of
/// a user action.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    User(UserId),
    Scheduler,
}

impl Actor {
    pub fn user(&self) -> Option<UserId> {
        match self {
            Actor::User(id) => Some(*id),
            Actor::Scheduler => None,
        }
    }

    pub fn is_scheduler(&self) -> bool {
        matches!(self, Actor::Scheduler)
    }
}

impl From<UserId> for Actor {
    fn from(value: UserId) -> Self {
        Actor::User(value)
    }
}

impl core::fmt::Display for Actor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Actor::User(id) => write!(f, "user:{id}"),
            Actor::Scheduler => f.write_str("scheduler"),
        }
    }
}

/// Actor + timestamp pair recorded for each transition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

impl Stamp {
    pub fn new(actor: impl Into<Actor>, at: DateTime<Utc>) -> Self {
        Self {
            actor: actor.into(),
            at,
        }
    }

    pub fn scheduler(at: DateTime<Utc>) -> Self {
        Self {
            actor: Actor::Scheduler,
            at,
        }
    }
}

/// Status enum of a workflow entity.
pub trait WorkflowStatus: Copy + Eq + core::fmt::Debug + core::fmt::Display + 'static {
    /// Terminal statuses accept no further transition.
    fn is_terminal(self) -> bool;
}

/// Transition rule for one action.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Rule<S: 'static> {
    /// Statuses from which the action is legal.
    pub from: &'static [S],
    /// Status after the action.
    pub to: S,
    /// Reason reported when the guard refuses.
    pub rejection: &'static str,
}

impl<S: PartialEq> Rule<S> {
    pub fn admits(&self, status: S) -> bool {
        self.from.contains(&status)
    }
}

/// Guarded transition contract.
pub trait Workflow {
    type Status: WorkflowStatus;
    type Action: Copy + Eq + core::fmt::Debug + 'static;

    /// Every action of this workflow (drives [`ensure_acyclic`]).
    const ACTIONS: &'static [Self::Action];

    fn status(&self) -> Self::Status;

    fn set_status(&mut self, status: Self::Status);

    fn rule(action: Self::Action) -> Rule<Self::Status>;

    /// Whether the guard for `action` currently admits the entity.
    fn can(&self, action: Self::Action) -> bool {
        Self::rule(action).admits(self.status())
    }

    /// Check the status guard without mutating anything.
    fn guard(&self, action: Self::Action) -> Result<Rule<Self::Status>, Rejection> {
        let rule = Self::rule(action);
        let status = self.status();
        if rule.admits(status) {
            Ok(rule)
        } else {
            Err(Rejection::new(format!(
                "{} (current status: {status})",
                rule.rejection
            )))
        }
    }

    /// Guard, then move to the rule's target status. Returns the new status.
    fn advance(&mut self, action: Self::Action) -> Result<Self::Status, Rejection> {
        let rule = self.guard(action)?;
        self.set_status(rule.to);
        Ok(rule.to)
    }
}

/// How many children a cascade touched.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeReport {
    pub applied: usize,
    pub skipped: usize,
}

/// Parent workflow whose transitions force the same transition on children.
pub trait Cascade: Workflow {
    type Child: Workflow;

    fn children_mut(&mut self) -> &mut [Self::Child];

    /// Child action forced on `child` by a parent action, if any.
    fn child_action(
        action: Self::Action,
        child: &Self::Child,
    ) -> Option<<Self::Child as Workflow>::Action>;

    /// Apply the mapped child action to every child whose guard admits it.
    ///
    /// Children already finalized (guard refuses) are skipped, never failed.
    /// Children the action does not map to are left out of the report.
    fn cascade<F>(&mut self, action: Self::Action, mut apply: F) -> CascadeReport
    where
        F: FnMut(&mut Self::Child, <Self::Child as Workflow>::Action) -> Outcome,
    {
        let mut report = CascadeReport::default();

        for child in self.children_mut() {
            let Some(child_action) = Self::child_action(action, child) else {
                continue;
            };
            if !child.can(child_action) {
                report.skipped += 1;
                continue;
            }
            if apply(child, child_action).is_applied() {
                report.applied += 1;
            } else {
                report.skipped += 1;
            }
        }
        report
    }
}

/// Verify that a workflow's transition table is a DAG.
///
/// Self-loops (e.g. a further partial delivery while already `received`) are
/// staying in place, not re-entry, and are allowed on non-terminal statuses.
/// Terminal statuses must have no outgoing transition at all.
pub fn ensure_acyclic<W: Workflow>() -> DomainResult<()> {
    let mut edges: Vec<(W::Status, W::Status)> = Vec::new();

    for &action in W::ACTIONS {
        let rule = W::rule(action);
        for &from in rule.from {
            if from.is_terminal() {
                return Err(DomainError::invariant(format!(
                    "terminal status {from} has an outgoing transition ({action:?} -> {})",
                    rule.to
                )));
            }
            if from != rule.to {
                edges.push((from, rule.to));
            }
        }
    }

    let mut nodes: Vec<W::Status> = Vec::new();
    for &(from, to) in &edges {
        for s in [from, to] {
            if !nodes.contains(&s) {
                nodes.push(s);
            }
        }
    }

    // Kahn's algorithm: anything left after peeling zero in-degree nodes sits on a cycle.
    let index = |s: W::Status, nodes: &[W::Status]| nodes.iter().position(|n| *n == s);
    let mut in_degree = vec![0usize; nodes.len()];
    for &(_, to) in &edges {
        if let Some(i) = index(to, &nodes) {
            in_degree[i] += 1;
        }
    }

    let mut ready: Vec<usize> = (0..nodes.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut visited = 0usize;
    while let Some(i) = ready.pop() {
        visited += 1;
        for &(from, to) in &edges {
            if from != nodes[i] {
                continue;
            }
            if let Some(j) = index(to, &nodes) {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    ready.push(j);
                }
            }
        }
    }

    if visited != nodes.len() {
        let cyclic: Vec<String> = nodes
            .iter()
            .zip(in_degree.iter())
            .filter(|(_, d)| **d > 0)
            .map(|(s, _)| s.to_string())
            .collect();
        return Err(DomainError::invariant(format!(
            "transition table contains a cycle through: {}",
            cyclic.join(", ")
        )));
    }

    Ok(())
}
