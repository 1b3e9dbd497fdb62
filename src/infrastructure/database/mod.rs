//! SeaORM persistence for sessions, tariffs and balances

pub mod entities;
pub mod migrator;
pub mod repositories;

pub use repositories::SeaOrmRepositoryProvider;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use migrator::Migrator;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://./gateway.db?mode=rwc")
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./gateway.db?mode=rwc".to_string(),
        }
    }
}

/// Connect and bring the schema up to date.
pub async fn init_database(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    info!(url = config.url.as_str(), "Connecting to database");

    let mut options = ConnectOptions::new(config.url.clone());
    options.sqlx_logging(false);
    if config.url.contains(":memory:") {
        // Every pooled connection would get its own empty database.
        options.max_connections(1);
    }

    let db = Database::connect(options).await?;
    Migrator::up(&db, None).await?;
    info!("Database connected and migrated");
    Ok(db)
}
