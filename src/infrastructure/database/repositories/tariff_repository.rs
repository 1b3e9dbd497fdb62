//! SeaORM implementation of TariffRepository

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, NotSet, QueryFilter,
    QueryOrder, Set,
};

use crate::domain::{DomainResult, Tariff, TariffRepository};
use crate::infrastructure::database::entities::tariff;

fn entity_to_domain(t: tariff::Model) -> Tariff {
    Tariff {
        id: t.id,
        station_id: t.station_id,
        price_per_kwh: t.price_per_kwh,
        currency: t.currency,
        created_at: t.created_at,
    }
}

pub struct SeaOrmTariffRepository {
    db: DatabaseConnection,
}

impl SeaOrmTariffRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TariffRepository for SeaOrmTariffRepository {
    async fn find_for_station(&self, station_id: &str) -> DomainResult<Option<Tariff>> {
        let found = tariff::Entity::find()
            .filter(tariff::Column::StationId.eq(station_id))
            .order_by_asc(tariff::Column::Id)
            .one(&self.db)
            .await?;
        Ok(found.map(entity_to_domain))
    }

    async fn save(&self, t: Tariff) -> DomainResult<Tariff> {
        let model = tariff::ActiveModel {
            id: if t.id > 0 { Set(t.id) } else { NotSet },
            station_id: Set(t.station_id),
            price_per_kwh: Set(t.price_per_kwh),
            currency: Set(t.currency),
            created_at: Set(t.created_at),
        };
        let saved = if t.id > 0 {
            model.update(&self.db).await?
        } else {
            model.insert(&self.db).await?
        };
        Ok(entity_to_domain(saved))
    }
}
