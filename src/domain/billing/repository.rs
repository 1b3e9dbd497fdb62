use async_trait::async_trait;

use super::model::{SettlementOutcome, SettlementRecord};
use crate::domain::DomainResult;

#[async_trait]
pub trait BillingRepository: Send + Sync {
    /// Close a `started` session in one atomic unit:
    ///
    /// 1. conditional debit `balance = balance - amount WHERE balance >= amount`
    ///    on the session's user;
    /// 2. session update to `stopped` (debited) or `error` (not debited),
    ///    conditional on `status = 'started'`.
    ///
    /// When step 2 matches no row the unit rolls back and the outcome is
    /// [`SettlementOutcome::AlreadySettled`].
    async fn settle(&self, record: SettlementRecord) -> DomainResult<SettlementOutcome>;
}
