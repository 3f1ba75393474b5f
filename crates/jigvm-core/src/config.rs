//! Engine configuration.

use anyhow::{Context, Result};
use jigvm_types::PackageId;
use serde::{Deserialize, Serialize};

/// Default fuel available to one transaction.
pub const DEFAULT_FUEL_LIMIT: u64 = 50_000_000;

/// Default maximum depth of the host call stack.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

/// Smallest coin amount FUND accepts.
pub const DEFAULT_MIN_FUND_AMOUNT: u64 = 100;

/// Default cap on a single guest linear memory (32 MiB).
pub const DEFAULT_MAX_MEMORY_BYTES: usize = 32 * 1024 * 1024;

/// Configuration for transaction execution.
///
/// All fields are consensus-relevant except `log_guest_output`: nodes that
/// must agree on results must run with identical values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Fuel granted to each transaction (default: 50 million units).
    ///
    /// Every guest instruction consumes fuel. Running out aborts the
    /// transaction with an execution error.
    pub fuel_limit: u64,

    /// Maximum depth of nested host-call frames (default: 64).
    pub max_call_depth: usize,

    /// Minimum coin amount that a FUND instruction accepts (default: 100).
    pub min_fund_amount: u64,

    /// Class name a jig must have to be usable by FUND (default: "Coin").
    pub coin_class_name: String,

    /// Package the coin class must come from.
    ///
    /// When `None`, any class named `coin_class_name` with a `u64 amount`
    /// field is accepted. Minting requires this to be set.
    pub coin_package: Option<PackageId>,

    /// Upper bound for each guest linear memory in bytes (default: 32 MiB).
    pub max_memory_bytes: usize,

    /// Forward guest `debug_str` output to tracing (default: true).
    pub log_guest_output: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            fuel_limit: DEFAULT_FUEL_LIMIT,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            min_fund_amount: DEFAULT_MIN_FUND_AMOUNT,
            coin_class_name: "Coin".to_string(),
            coin_package: None,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            log_guest_output: true,
        }
    }
}

impl ExecConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("parse exec config")
    }

    /// Builder method: set the per-transaction fuel limit.
    pub fn with_fuel_limit(mut self, fuel: u64) -> Self {
        self.fuel_limit = fuel;
        self
    }

    /// Builder method: set the maximum call depth.
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Builder method: set the minimum FUND amount.
    pub fn with_min_fund_amount(mut self, amount: u64) -> Self {
        self.min_fund_amount = amount;
        self
    }

    /// Builder method: pin the coin class to a package.
    pub fn with_coin_package(mut self, pkg: PackageId) -> Self {
        self.coin_package = Some(pkg);
        self
    }

    /// Builder method: set the coin class name.
    pub fn with_coin_class_name(mut self, name: impl Into<String>) -> Self {
        self.coin_class_name = name.into();
        self
    }

    /// Builder method: set the guest memory cap.
    pub fn with_max_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Builder method: toggle guest debug logging.
    pub fn with_guest_output(mut self, enabled: bool) -> Self {
        self.log_guest_output = enabled;
        self
    }
}
