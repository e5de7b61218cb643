//! Health State
//!
//! Health is explicit-probe-only: a state changes when someone calls a
//! health check, never as a side effect of a failed request. There is no
//! circuit breaker.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// ============================================================================
// Health State
// ============================================================================

/// Last known availability of a Client
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Never probed
    #[default]
    Unknown,
    /// Last probe succeeded
    Healthy,
    /// Last probe (or initialization) failed
    Unhealthy,
}

impl HealthState {
    /// Whether requests may be routed to this Client.
    ///
    /// Unknown counts as available.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self, Self::Unhealthy)
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Healthy => 1,
            Self::Unhealthy => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Healthy,
            2 => Self::Unhealthy,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

// ============================================================================
// Health Cell
// ============================================================================

/// Lock-free holder for one Client's health state
#[derive(Debug, Default)]
pub struct HealthCell {
    state: AtomicU8,
    last_checked: Mutex<Option<Instant>>,
}

impl HealthCell {
    /// Fresh cell in the `Unknown` state
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn get(&self) -> HealthState {
        HealthState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Record a probe result
    pub fn set(&self, state: HealthState) {
        self.state.store(state.to_u8(), Ordering::Release);
        *self.last_checked.lock() = Some(Instant::now());
    }

    /// When the state was last recorded
    pub fn last_checked(&self) -> Option<Instant> {
        *self.last_checked.lock()
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Per-model health of one vendor
pub type ModelHealth = BTreeMap<String, HealthState>;

/// Health outcome for one vendor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorHealth {
    /// Every model of the vendor was probed
    Checked(ModelHealth),
    /// The vendor could not be checked at all
    Failed(String),
}

impl VendorHealth {
    /// Models that probed healthy
    pub fn healthy_models(&self) -> Vec<&str> {
        match self {
            Self::Checked(models) => models
                .iter()
                .filter(|(_, state)| **state == HealthState::Healthy)
                .map(|(name, _)| name.as_str())
                .collect(),
            Self::Failed(_) => Vec::new(),
        }
    }
}

/// Health of every vendor, keyed by vendor name
pub type HealthReport = BTreeMap<String, VendorHealth>;
