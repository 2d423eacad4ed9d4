//! Title Rotation Module
//!
//! The domain core of the engine: rotation execution, analytics
//! polling, winner selection, and the error taxonomy they share.

pub mod error;
pub mod executor;
pub mod poller;
pub mod types;
pub mod winner;

pub use error::RotationError;
pub use executor::{RotationExecutor, RotationOutcome};
pub use poller::{next_poll_delay, AnalyticsPoller, PollCadence, PollOutcome};
pub use types::*;
pub use winner::{pick_winner, select_winner};
