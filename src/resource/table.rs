//! In-memory reference-counted resource table.
//!
//! Used by the command-line front end (populated from a TOML manifest) and
//! by tests. Access goes through [`InMemoryResourceTable::lock`], which
//! returns the [`TableGuard`] capability.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{ResourceAccess, ResourceId, ResourceInfo, ResourceKind, VmemSymbol};

#[derive(Debug, Clone)]
enum Resource {
    Dram { iova: u64, size: u64 },
    Executable { symbols: BTreeMap<u32, VmemSymbol> },
}

#[derive(Debug, Clone)]
struct Entry {
    resource: Resource,
    refcount: u32,
}

#[derive(Debug, Default)]
struct TableState {
    entries: BTreeMap<ResourceId, Entry>,
}

/// Resource table backed by a `BTreeMap` behind a mutex.
#[derive(Debug, Default)]
pub struct InMemoryResourceTable {
    state: Mutex<TableState>,
}

impl InMemoryResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, TableState> {
        // A panic while holding the lock cannot leave refcounts half-updated:
        // every mutation is a single field write.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a DRAM buffer. Replaces any resource with the same id.
    pub fn insert_dram(&self, id: ResourceId, iova: u64, size: u64) {
        self.state().entries.insert(
            id,
            Entry { resource: Resource::Dram { iova, size }, refcount: 0 },
        );
    }

    /// Register a VPU executable and its symbol table.
    pub fn insert_executable(
        &self,
        id: ResourceId,
        symbols: impl IntoIterator<Item = (u32, VmemSymbol)>,
    ) {
        let symbols = symbols.into_iter().collect();
        self.state().entries.insert(
            id,
            Entry { resource: Resource::Executable { symbols }, refcount: 0 },
        );
    }

    /// Current reference count of a resource.
    pub fn refcount(&self, id: ResourceId) -> Option<u32> {
        self.state().entries.get(&id).map(|e| e.refcount)
    }

    /// Snapshot of every reference count, for symmetry checks.
    pub fn refcounts(&self) -> Vec<(ResourceId, u32)> {
        self.state().entries.iter().map(|(id, e)| (*id, e.refcount)).collect()
    }

    /// Take the table lock.
    pub fn lock(&self) -> TableGuard<'_> {
        TableGuard { state: self.state() }
    }
}

/// Holds the table lock; the only way to acquire or release resources.
pub struct TableGuard<'a> {
    state: MutexGuard<'a, TableState>,
}

impl ResourceAccess for TableGuard<'_> {
    fn acquire(&mut self, id: ResourceId) -> Option<ResourceInfo> {
        let entry = self.state.entries.get_mut(&id)?;
        entry.refcount = entry.refcount.checked_add(1)?;
        let info = match &entry.resource {
            Resource::Dram { iova, size } => {
                ResourceInfo { kind: ResourceKind::Dram, iova: *iova, size: *size }
            }
            Resource::Executable { .. } => {
                ResourceInfo { kind: ResourceKind::VpuExecutable, iova: 0, size: 0 }
            }
        };
        log::trace!("acquire resource {} -> refcount {}", id, entry.refcount);
        Some(info)
    }

    fn release(&mut self, id: ResourceId) {
        match self.state.entries.get_mut(&id) {
            Some(entry) if entry.refcount > 0 => {
                entry.refcount -= 1;
                log::trace!("release resource {} -> refcount {}", id, entry.refcount);
            }
            Some(_) => log::warn!("release of resource {} with no references", id),
            None => log::warn!("release of unknown resource {}", id),
        }
    }

    fn lookup_symbol(&self, exec: ResourceId, symbol: u32) -> Option<VmemSymbol> {
        match &self.state.entries.get(&exec)?.resource {
            Resource::Executable { symbols } => symbols.get(&symbol).copied(),
            Resource::Dram { .. } => None,
        }
    }
}
