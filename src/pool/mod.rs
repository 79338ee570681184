//! Account pool and proxy rotation
//!
//! The central allocator: matches work units to capacity-constrained,
//! stateful resources under concurrent access. See [`core::AccountPool`]
//! for the claim/release contract.

pub mod config;
pub mod core;
pub mod rotator;
pub mod strategy;

pub use config::PoolConfig;
pub use core::{AccountClaim, AccountPool, AcquireResult, ClaimOutcome, PoolStats, UnavailableReason};
pub use rotator::ProxyRotator;
pub use strategy::SelectionStrategy;
