//! Outcome of a successful transaction.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jigvm_types::{Output, PackageId, Pointer};
use uuid::Uuid;

use crate::registry::Package;
use crate::state::Spend;

/// Everything a caller needs to commit a transaction.
///
/// Only `outputs`, the spent origins and the deployed package ids are
/// consensus relevant; [`ExecutionResult::to_bytes`] encodes exactly those.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub tx_hash: [u8; 32],
    /// New and updated jigs, in the order they were first touched.
    pub outputs: Vec<Output>,
    /// Previous outputs consumed, with the locations they were read from.
    pub spends: Vec<Spend>,
    /// Packages deployed by the transaction, not yet registered.
    pub deploys: Vec<Arc<Package>>,
    pub fuel_used: u64,
    /// Fuel consumed by each instruction.
    pub instruction_fuel: Vec<u64>,
    /// Sum of the coins that funded the transaction.
    pub funded_amount: u64,
    pub executed_at: DateTime<Utc>,
    pub execution_id: Uuid,
}

impl ExecutionResult {
    pub fn deploy_ids(&self) -> Vec<PackageId> {
        self.deploys.iter().map(|p| *p.id()).collect()
    }

    /// Origins of the consumed outputs, in spend order.
    pub fn spent_origins(&self) -> Vec<Pointer> {
        self.spends.iter().map(|s| s.origin).collect()
    }

    /// Output whose origin is `origin`, if the transaction produced one.
    pub fn output_for(&self, origin: &Pointer) -> Option<&Output> {
        self.outputs.iter().find(|o| o.origin == *origin)
    }

    /// Canonical encoding of the consensus-relevant parts.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bcs::to_bytes(&(&self.outputs, self.spent_origins(), self.deploy_ids()))
            .context("encode execution result")
    }
}
