//! User account (balance holder)

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: i32,
    pub username: String,
    /// Balance in smallest currency unit; settlement never takes it below zero
    pub balance: i64,
    pub updated_at: DateTime<Utc>,
}
