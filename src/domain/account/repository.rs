use async_trait::async_trait;

use super::model::Account;
use crate::domain::DomainResult;

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn create(&self, username: &str, balance: i64) -> DomainResult<Account>;
    async fn find_by_id(&self, id: i32) -> DomainResult<Option<Account>>;
}
