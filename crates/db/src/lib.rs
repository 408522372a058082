pub mod connection;
pub mod engine;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect_with_settings, DbPool};
pub use engine::{EngineError, ReservationEngine};
pub use fixtures::{ReservationSeedDataset, SeedResult, VerificationResult};
pub use repositories::{
    InMemoryReservationStore, RepositoryError, ReservationStore, ReservationTransaction,
    SqlReservationStore,
};
