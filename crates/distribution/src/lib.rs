//! Distribution of units from warehouses to organisational units, and their
//! return.
//!
//! Asset requests are the units' side of it: a verified request is closed by
//! the distribution batch that fulfilled it.
//!
//! Both batch types are headers over many line items; header transitions
//! cascade onto the items through [`assetflow_core::Cascade`].

pub mod asset_request;
pub mod batch;
pub mod rejected;
pub mod returns;

pub use asset_request::{
    AssetRequest, AssetRequestAction, AssetRequestId, AssetRequestStatus, NewAssetRequest,
    RequestedAsset,
};
pub use batch::{
    BatchAction, BatchId, BatchStatus, Distribution, DistributionAction, DistributionBatch,
    DistributionId, DistributionStatus, NewBatch, NewDistribution, TaskType, TaskVerification,
};
pub use rejected::{RejectedDistribution, RejectedDistributionId};
pub use returns::{
    Condition, NewReturnBatch, NewReturnItem, ReturnBatch, ReturnBatchAction, ReturnBatchId,
    ReturnBatchStatus, ReturnItem, ReturnItemAction, ReturnItemId, ReturnItemStatus,
};
