//! The relational state the engine works on: one ordered map per entity table
//! plus the shared inventory structures.

use std::collections::BTreeMap;

use assetflow_distribution::{
    AssetRequest, AssetRequestId, BatchId, DistributionBatch, RejectedDistribution, RejectedDistributionId, ReturnBatch,
    ReturnBatchId,
};
use assetflow_inventory::{Catalog, InstanceRegistry, SerialUnitSequence, StockLedger};
use assetflow_loans::{AssetLoan, AssetLoanId, VenueLoan, VenueLoanId};
use assetflow_purchasing::{ProcurementRequest, RequestId};

#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub catalog: Catalog,
    pub ledger: StockLedger,
    pub registry: InstanceRegistry,
    pub serial_units: SerialUnitSequence,
    pub requests: BTreeMap<RequestId, ProcurementRequest>,
    pub asset_loans: BTreeMap<AssetLoanId, AssetLoan>,
    pub venue_loans: BTreeMap<VenueLoanId, VenueLoan>,
    pub batches: BTreeMap<BatchId, DistributionBatch>,
    pub rejected_distributions: BTreeMap<RejectedDistributionId, RejectedDistribution>,
    pub return_batches: BTreeMap<ReturnBatchId, ReturnBatch>,
    pub asset_requests: BTreeMap<AssetRequestId, AssetRequest>,
}

/// Next surrogate key of a table: one past the highest key in use.
pub fn next_key<K, V>(table: &BTreeMap<K, V>) -> K
where
    K: Copy + Ord + From<u64> + Into<u64>,
{
    let last = table.keys().next_back().map(|k| (*k).into()).unwrap_or(0);
    K::from(last + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_continue_after_the_highest() {
        let mut table: BTreeMap<RequestId, ()> = BTreeMap::new();
        assert_eq!(next_key(&table), RequestId::new(1));
        table.insert(RequestId::new(1), ());
        table.insert(RequestId::new(7), ());
        assert_eq!(next_key(&table), RequestId::new(8));
    }
}
