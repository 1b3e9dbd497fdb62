//! Database entities module

pub mod charging_session;
pub mod tariff;
pub mod user;

pub use charging_session::Entity as ChargingSession;
pub use tariff::Entity as Tariff;
pub use user::Entity as User;
