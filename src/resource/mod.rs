//! Resource-table collaborator interface.
//!
//! The resource table owns DRAM buffers and VPU executables and counts
//! references to them. The loader never talks to the table directly: it is
//! handed something implementing [`ResourceAccess`], and the only
//! implementations are lock guards (see [`TableGuard`]). Holding the
//! capability therefore means holding the table lock for the whole
//! acquire-or-roll-back sequence.

pub mod manifest;
pub mod table;

pub use manifest::ResourceManifest;
pub use table::{InMemoryResourceTable, TableGuard};

/// Resource-table handle.
pub type ResourceId = u32;

/// What a resource is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A DRAM buffer mapped for the accelerator.
    Dram,
    /// A VPU executable with a symbol table describing its VMEM layout.
    VpuExecutable,
}

/// What `acquire` reports about a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceInfo {
    pub kind: ResourceKind,
    /// Device address of the buffer (zero for executables).
    pub iova: u64,
    /// Size in bytes.
    pub size: u64,
}

/// A VMEM symbol published by a VPU executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmemSymbol {
    /// VMEM address of the symbol.
    pub addr: u64,
    /// Size in bytes.
    pub size: u64,
}

/// Capability to use the resource table while its lock is held.
pub trait ResourceAccess {
    /// Take one reference. `None` if the id does not exist.
    fn acquire(&mut self, id: ResourceId) -> Option<ResourceInfo>;

    /// Drop one reference taken by [`acquire`](Self::acquire).
    fn release(&mut self, id: ResourceId);

    /// Look up a symbol in an executable's symbol table.
    fn lookup_symbol(&self, exec: ResourceId, symbol: u32) -> Option<VmemSymbol>;
}
