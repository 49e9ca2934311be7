use serde::{Deserialize, Serialize};

use assetflow_core::{DomainError, DomainResult, Entity, Stamp, Workflow, define_id};

use crate::batch::{BatchId, Distribution, DistributionBatch, DistributionStatus};

define_id!(
    /// Archive key of a rejected distribution.
    RejectedDistributionId,
    "RejectedDistributionId"
);

/// Snapshot of a draft distribution taken when its batch was rejected.
///
/// The live batch no longer lists it; this record keeps the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedDistribution {
    id: RejectedDistributionId,
    batch: BatchId,
    batch_code: String,
    snapshot: Distribution,
    reason: Option<String>,
    rejected: Stamp,
}

impl RejectedDistribution {
    pub fn archive(
        id: RejectedDistributionId,
        batch: &DistributionBatch,
        snapshot: Distribution,
    ) -> DomainResult<Self> {
        let rejected = match (snapshot.status(), snapshot.rejected()) {
            (DistributionStatus::Rejected, Some(stamp)) => stamp,
            (status, _) => {
                return Err(DomainError::invariant(format!(
                    "cannot archive distribution {} in status {status}",
                    snapshot.id()
                )));
            }
        };
        Ok(Self {
            id,
            batch: batch.id(),
            batch_code: batch.batch_code().to_string(),
            reason: snapshot.rejection_reason().map(str::to_string),
            snapshot,
            rejected,
        })
    }

    pub fn batch(&self) -> BatchId {
        self.batch
    }

    pub fn batch_code(&self) -> &str {
        &self.batch_code
    }

    pub fn snapshot(&self) -> &Distribution {
        &self.snapshot
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn rejected(&self) -> Stamp {
        self.rejected
    }
}

impl Entity for RejectedDistribution {
    type Id = RejectedDistributionId;

    fn id(&self) -> RejectedDistributionId {
        self.id
    }
}
