//! Static slot binding.
//!
//! Takes a reference on the program's VPU executable and on every DRAM
//! buffer named by a static binding, resolves each static slot to a device
//! address and checks the slot's access envelope against the real size of
//! what it is bound to. References are held by [`PendingAcquisitions`]
//! until the whole load succeeds; dropping it on any error path releases
//! them in reverse order.

use std::mem;

use smallvec::SmallVec;

use super::reloc::RelocTables;
use super::types::{BindingTarget, DescField, DmaConfig, SlotRef};
use crate::error::DmaError;
use crate::hw;
use crate::math::Offset;
use crate::resource::{ResourceAccess, ResourceId, ResourceInfo, ResourceKind};

/// Resources referenced by one loaded program.
///
/// Must be handed back to [`super::loader::unload`]; dropping it leaks the
/// references.
#[must_use = "resources stay referenced until the aux is unloaded"]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ResourceAux {
    ids: SmallVec<[ResourceId; 8]>,
}

impl ResourceAux {
    /// Acquired ids, in acquisition order.
    pub fn ids(&self) -> &[ResourceId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Release every reference, newest first.
    pub fn release_all<A: ResourceAccess + ?Sized>(self, access: &mut A) {
        for &id in self.ids.iter().rev() {
            access.release(id);
        }
    }
}

/// References taken so far by a load in progress.
pub struct PendingAcquisitions<'g, A: ResourceAccess + ?Sized> {
    access: &'g mut A,
    ids: SmallVec<[ResourceId; 8]>,
}

impl<'g, A: ResourceAccess + ?Sized> PendingAcquisitions<'g, A> {
    pub fn new(access: &'g mut A) -> Self {
        Self { access, ids: SmallVec::new() }
    }

    /// Take a reference and remember it for rollback.
    pub fn acquire(&mut self, id: ResourceId) -> Result<ResourceInfo, DmaError> {
        let info = self.access.acquire(id).ok_or(DmaError::ResourceNotFound { id })?;
        self.ids.push(id);
        Ok(info)
    }

    /// Acquire `id` and require it to be of kind `expected`.
    fn acquire_kind(
        &mut self,
        id: ResourceId,
        expected: ResourceKind,
    ) -> Result<ResourceInfo, DmaError> {
        let info = self.acquire(id)?;
        if info.kind != expected {
            return Err(DmaError::WrongResourceType { id, expected, found: info.kind });
        }
        Ok(info)
    }

    pub fn access(&self) -> &A {
        &*self.access
    }

    /// Keep the references: they now belong to the returned aux.
    pub fn commit(mut self) -> ResourceAux {
        ResourceAux { ids: mem::take(&mut self.ids) }
    }
}

impl<A: ResourceAccess + ?Sized> Drop for PendingAcquisitions<'_, A> {
    fn drop(&mut self) {
        if self.ids.is_empty() {
            return;
        }
        log::debug!("rolling back {} resource references", self.ids.len());
        for &id in self.ids.iter().rev() {
            self.access.release(id);
        }
    }
}

/// Resolved addresses of a bound program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundConfig {
    /// Base device address of each static slot.
    pub static_addresses: Vec<u64>,
    /// Per descriptor, the value patched into src, dst and dst2: the full
    /// address for static slots, the slot-relative offset otherwise.
    pub addresses: Vec<[u64; 3]>,
}

fn add(base: u64, offset: u64) -> Result<u64, DmaError> {
    Ok((Offset::from_u64(base)? + Offset::from_u64(offset)?)?.to_u64()?)
}

/// Bind the VPU executable and every static slot of `config`.
pub fn bind<A: ResourceAccess + ?Sized>(
    pending: &mut PendingAcquisitions<'_, A>,
    config: &DmaConfig,
    relocs: &RelocTables,
) -> Result<BoundConfig, DmaError> {
    let exec = match config.header.vpu_exec {
        Some(id) => {
            pending.acquire_kind(id, ResourceKind::VpuExecutable)?;
            Some(id)
        }
        None => None,
    };

    let mut static_addresses = Vec::with_capacity(config.static_bindings.len());
    for (i, binding) in config.static_bindings.iter().enumerate() {
        let slot = i as u16;
        let (base, size) = match binding.target {
            BindingTarget::Dram(id) => {
                let info = pending.acquire_kind(id, ResourceKind::Dram)?;
                (info.iova, info.size)
            }
            BindingTarget::Vmem(symbol) => {
                let exec = exec.ok_or(DmaError::MissingExecutable { slot })?;
                let sym = pending
                    .access()
                    .lookup_symbol(exec, symbol)
                    .ok_or(DmaError::SymbolNotFound { exec, symbol })?;
                (sym.addr, sym.size)
            }
        };
        let limit = size.checked_sub(binding.offset).ok_or(DmaError::InvalidBinding {
            slot,
            reason: "offset is past the end of the resource",
        })?;

        if let Some(envelope) = relocs.static_slots.get(i).and_then(|s| s.envelope) {
            let fits = envelope.is_empty()
                || (!envelope.start.is_negative() && envelope.end <= Offset::from_u64(limit)?);
            if !fits {
                return Err(DmaError::AccessOutOfRange {
                    slot,
                    start: envelope.start.get(),
                    end: envelope.end.get(),
                    limit,
                });
            }
        }

        let address = add(base, binding.offset)?;
        log::trace!("static slot {} -> 0x{:x} ({} bytes usable)", slot, address, limit);
        static_addresses.push(address);
    }

    let mut addresses = Vec::with_capacity(config.descriptors.len());
    for (i, desc) in config.descriptors.iter().enumerate() {
        let mut resolved = [0u64; 3];
        for field in DescField::ALL {
            let attr = desc.attr(field);
            resolved[usize::from(field.raw())] = match attr.slot {
                SlotRef::Static(id) => {
                    let base = static_addresses.get(usize::from(id)).copied().unwrap_or(0);
                    add(base, attr.offset)?
                }
                SlotRef::Dynamic(_) | SlotRef::None => attr.offset,
            };
        }
        for field in desc.active_fields() {
            let address = resolved[usize::from(field.raw())];
            if address >= hw::ADDRESS_LIMIT {
                return Err(DmaError::AddressTooWide { index: i as u8, field, address });
            }
        }
        addresses.push(resolved);
    }

    log::debug!(
        "bound {} static slots, {} resources referenced",
        static_addresses.len(),
        pending.ids.len()
    );
    Ok(BoundConfig { static_addresses, addresses })
}
