//! SeaORM implementation of AccountRepository

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, NotSet, Set};

use crate::domain::{Account, AccountRepository, DomainResult};
use crate::infrastructure::database::entities::user;

fn entity_to_domain(u: user::Model) -> Account {
    Account {
        id: u.id,
        username: u.username,
        balance: u.balance,
        updated_at: u.updated_at,
    }
}

pub struct SeaOrmAccountRepository {
    db: DatabaseConnection,
}

impl SeaOrmAccountRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccountRepository for SeaOrmAccountRepository {
    async fn create(&self, username: &str, balance: i64) -> DomainResult<Account> {
        let model = user::ActiveModel {
            id: NotSet,
            username: Set(username.to_string()),
            balance: Set(balance),
            updated_at: Set(Utc::now()),
        };
        Ok(entity_to_domain(model.insert(&self.db).await?))
    }

    async fn find_by_id(&self, id: i32) -> DomainResult<Option<Account>> {
        let found = user::Entity::find_by_id(id).one(&self.db).await?;
        Ok(found.map(entity_to_domain))
    }
}
