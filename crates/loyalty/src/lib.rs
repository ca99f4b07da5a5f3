#![warn(clippy::unwrap_used)]

pub mod clock;
pub mod confirmation;
pub mod coordinator;
pub mod engine;
pub mod history;

pub use clock::{ClockSource, FixedClock, SystemClock};
pub use confirmation::ConfirmationHandler;
pub use coordinator::RedemptionCoordinator;
pub use engine::{RewardDecayEngine, RewardInputs, ENGINE_VERSION};
pub use history::{StoreHistoryProvider, VisitHistoryProvider};
