pub mod commands;
pub mod health;
pub mod sessions;
pub mod stations;
