//! # Meridian Execution Crate
//!
//! This crate implements the order-execution engine: the algorithms that turn
//! a trading intent into a sequence of venue orders, and the campaign
//! machinery that runs the long-lived ones.
//!
//! ## Architectural Principles
//!
//! - **One task per campaign:** Every started TWAP or grid campaign owns a
//!   single background task. Cancellation is cooperative through an atomic
//!   flag the task checkpoints at least once a second, so a stop request is
//!   honored promptly without aborting mid-submission.
//! - **Registry as the lifecycle authority:** `CampaignRegistry` is the only
//!   place a campaign moves between the active and completed maps. Its lock is
//!   never held across a network call.
//! - **Partial progress is reported, not rolled back:** a rejected ladder rung
//!   or TWAP slice is recorded and the rest of the work continues.
//!
//! ## Public API
//!
//! - `ExecutionHandler`: The facade front ends drive.
//! - `ScaledOrderDriver` / `LadderRequest`: One-shot order ladders.
//! - `TwapManager` / `TwapParams`: Time-sliced campaigns.
//! - `GridManager` / `GridParams`: Self-replenishing grid campaigns.
//! - `ExecutionError`: The specific error types returned from this crate.

pub mod distribution;
pub mod error;
pub mod grid;
pub mod handler;
pub mod normalize;
pub mod registry;
pub mod scaled;
pub mod twap;

mod util;

#[cfg(test)]
pub(crate) mod mock;

pub use distribution::{distribute_size, price_levels};
pub use error::ExecutionError;
pub use grid::{GridManager, GridParams, GridSnapshot, GridStatus, GridStopReport};
pub use handler::ExecutionHandler;
pub use normalize::Normalizer;
pub use registry::CampaignRegistry;
pub use scaled::{LadderReport, LadderRequest, ScaledOrderDriver};
pub use twap::{TwapManager, TwapParams, TwapSnapshot};
