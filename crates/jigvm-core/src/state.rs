//! State provider collaborators.
//!
//! The engine only reads prior outputs through [`StateProvider`]. Writes go
//! through [`StateStore::apply`] when a caller commits an execution result,
//! never during execution.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use jigvm_types::{LockKind, Output, Pointer, SerializedLock};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// An output consumed by a transaction.
///
/// `location` is where the jig lived in the snapshot the transaction ran
/// against. A spend only applies while the jig is still there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spend {
    pub origin: Pointer,
    pub location: Pointer,
}

/// Read access to committed outputs.
pub trait StateProvider: Send + Sync {
    /// Unspent output at `location`.
    fn output_by_location(&self, location: &Pointer) -> Result<Option<Output>>;

    /// Latest output of the jig with `origin`.
    fn output_by_origin(&self, origin: &Pointer) -> Result<Option<Output>>;
}

/// A provider that can also be written.
pub trait StateStore: StateProvider {
    /// Add an output outside of any transaction (genesis, minting).
    fn insert(&self, output: Output) -> Result<()>;

    /// Consume `spends` and add `outputs`. Fails when any spent output is no
    /// longer the jig's current one. Either everything is applied or nothing is.
    fn apply(&self, spends: &[Spend], outputs: &[Output]) -> Result<()>;
}

#[derive(Default)]
struct Tables {
    /// Unspent outputs by location.
    live: BTreeMap<Pointer, Output>,
    /// Origin to current location.
    origins: BTreeMap<Pointer, Pointer>,
    /// Last output of destroyed jigs, relocked as frozen.
    destroyed: BTreeMap<Pointer, Output>,
}

/// In-memory state store.
///
/// Destroyed jigs stay resolvable by origin as frozen tombstones, so a later
/// attempt to load them is a permission failure rather than a missing object.
#[derive(Default)]
pub struct MemoryStateStore {
    tables: RwLock<Tables>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unspent outputs.
    pub fn len(&self) -> usize {
        self.tables.read().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().live.is_empty()
    }

    /// Canonical encoding of the whole store.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let tables = self.tables.read();
        let live: Vec<&Output> = tables.live.values().collect();
        let destroyed: Vec<&Output> = tables.destroyed.values().collect();
        bcs::to_bytes(&(live, &tables.origins, destroyed)).context("encode state snapshot")
    }
}

impl StateProvider for MemoryStateStore {
    fn output_by_location(&self, location: &Pointer) -> Result<Option<Output>> {
        Ok(self.tables.read().live.get(location).cloned())
    }

    fn output_by_origin(&self, origin: &Pointer) -> Result<Option<Output>> {
        let tables = self.tables.read();
        if let Some(location) = tables.origins.get(origin) {
            return Ok(tables.live.get(location).cloned());
        }
        Ok(tables.destroyed.get(origin).cloned())
    }
}

impl StateStore for MemoryStateStore {
    fn insert(&self, output: Output) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.origins.contains_key(&output.origin)
            || tables.destroyed.contains_key(&output.origin)
        {
            bail!("jig {} already exists", output.origin);
        }
        if tables.live.contains_key(&output.location) {
            bail!("location {} already used", output.location);
        }
        tables.origins.insert(output.origin, output.location);
        tables.live.insert(output.location, output);
        Ok(())
    }

    fn apply(&self, spends: &[Spend], outputs: &[Output]) -> Result<()> {
        let mut tables = self.tables.write();

        for spend in spends {
            match tables.origins.get(&spend.origin) {
                Some(current) if *current == spend.location => {}
                Some(current) => bail!(
                    "output {} of jig {} is already spent, current location is {}",
                    spend.location,
                    spend.origin,
                    current
                ),
                None => bail!("cannot spend unknown or destroyed jig {}", spend.origin),
            }
        }
        for output in outputs {
            if tables.live.contains_key(&output.location) {
                bail!("location {} already used", output.location);
            }
            let known = tables.origins.contains_key(&output.origin)
                || tables.destroyed.contains_key(&output.origin);
            if known && !spends.iter().any(|s| s.origin == output.origin) {
                bail!("output for {} does not spend its previous output", output.origin);
            }
        }

        for spend in spends {
            tables.origins.remove(&spend.origin);
            let Some(mut last) = tables.live.remove(&spend.location) else {
                continue;
            };
            if !outputs.iter().any(|o| o.origin == spend.origin) {
                last.lock = SerializedLock::new(spend.origin, LockKind::Frozen, Vec::new());
                tables.destroyed.insert(spend.origin, last);
            }
        }
        for output in outputs {
            tables.origins.insert(output.origin, output.location);
            tables.live.insert(output.location, output.clone());
        }
        trace!(spends = spends.len(), outputs = outputs.len(), "applied state changes");
        Ok(())
    }
}
