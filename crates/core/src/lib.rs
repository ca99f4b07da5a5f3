#![warn(clippy::unwrap_used)]

pub mod config;
pub mod error;
pub mod rewards;
pub mod store;

pub use config::AppConfig;
pub use error::{RevisitError, RevisitResult};
pub use store::RewardStore;
