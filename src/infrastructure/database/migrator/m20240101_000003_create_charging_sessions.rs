//! Create charging_sessions table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChargingSessions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChargingSessions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ChargingSessions::StationId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChargingSessions::UserId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ChargingSessions::TransactionId).integer())
                    .col(ColumnDef::new(ChargingSessions::EnergyLimit).double())
                    .col(ColumnDef::new(ChargingSessions::StartTime).timestamp_with_time_zone())
                    .col(ColumnDef::new(ChargingSessions::StopTime).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(ChargingSessions::Energy)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ChargingSessions::Amount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ChargingSessions::Status)
                            .string()
                            .not_null()
                            .default("initiated"),
                    )
                    .col(
                        ColumnDef::new(ChargingSessions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_charging_sessions_station_id")
                    .table(ChargingSessions::Table)
                    .col(ChargingSessions::StationId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ChargingSessions::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum ChargingSessions {
    Table,
    Id,
    StationId,
    UserId,
    TransactionId,
    EnergyLimit,
    StartTime,
    StopTime,
    Energy,
    Amount,
    Status,
    CreatedAt,
}
