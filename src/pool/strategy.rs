//! Selection strategies
//!
//! One tagged variant dispatched inside a single selection function, shared
//! by the account pool and the proxy rotator. Keeping selection out of the
//! claim critical path's control flow makes that section easy to audit.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Account/proxy selection policy, caller-selectable per job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Cyclic pointer over the eligible set, fair distribution
    #[default]
    RoundRobin,
    /// Uniform pick, reduces correlated timing patterns
    Random,
    /// Minimum usage count, balances quota consumption
    LeastUsed,
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "round-robin"),
            Self::Random => write!(f, "random"),
            Self::LeastUsed => write!(f, "least-used"),
        }
    }
}

impl std::str::FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            "least-used" => Ok(Self::LeastUsed),
            _ => Err(format!("Unknown strategy: {} (round-robin, random, least-used)", s)),
        }
    }
}

/// Pick one index out of `len` candidates.
///
/// `eligible` filters candidates, `usage` ranks them for least-used.
/// `cursor` is the round-robin pointer; it advances past the pick so
/// repeated calls walk the eligible set cyclically. Least-used ties break
/// to the first candidate in iteration order, which keeps selection
/// deterministic and stable.
pub fn select_index(
    strategy: SelectionStrategy,
    len: usize,
    cursor: &mut usize,
    eligible: impl Fn(usize) -> bool,
    usage: impl Fn(usize) -> u64,
) -> Option<usize> {
    if len == 0 {
        return None;
    }

    match strategy {
        SelectionStrategy::RoundRobin => {
            for offset in 0..len {
                let idx = (*cursor + offset) % len;
                if eligible(idx) {
                    *cursor = (idx + 1) % len;
                    return Some(idx);
                }
            }
            None
        }
        SelectionStrategy::Random => {
            let candidates: Vec<usize> = (0..len).filter(|&i| eligible(i)).collect();
            if candidates.is_empty() {
                return None;
            }
            let pick = rand::rng().random_range(0..candidates.len());
            Some(candidates[pick])
        }
        SelectionStrategy::LeastUsed => (0..len).filter(|&i| eligible(i)).min_by_key(|&i| usage(i)),
    }
}
