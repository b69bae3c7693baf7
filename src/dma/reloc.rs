//! Relocation collection.
//!
//! Every descriptor field that names a slot becomes one [`Reloc`]. Relocs are
//! grouped per slot so each [`RelocSlot`] owns a contiguous run of them:
//!
//! ```text
//!   dynamic_slots:  [ s0: start 0, count 2 ][ s1: start 2, count 0 ][ s2: start 2, count 1 ]
//!   dynamic_relocs: [ d0.src, d3.dst, d1.dst2 ]
//! ```
//!
//! Static and dynamic slots are numbered independently and get separate
//! tables. Each slot also carries the union of every access entry made
//! through it, which the binder checks against the bound resource and the
//! firmware checks against the buffer supplied at submission.

use bitflags::bitflags;

use super::trace::DescriptorTrace;
use super::types::{AccessEntry, AccessSet, DescField, DescIndex, DmaConfig, MemoryKind, SlotRef};
use crate::error::{DescriptorFault, DmaError};

bitflags! {
    /// Memory kind and access direction of a slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SlotFlags: u16 {
        const DRAM = 1 << 0;
        const VMEM = 1 << 1;
        const L2SRAM = 1 << 2;
        const READ = 1 << 8;
        const WRITE = 1 << 9;
    }
}

impl SlotFlags {
    pub fn from_kind(kind: MemoryKind) -> Self {
        match kind {
            MemoryKind::Dram => Self::DRAM,
            MemoryKind::Vmem => Self::VMEM,
            MemoryKind::L2Sram => Self::L2SRAM,
        }
    }

    pub fn memory_kind(self) -> Option<MemoryKind> {
        if self.contains(Self::DRAM) {
            Some(MemoryKind::Dram)
        } else if self.contains(Self::VMEM) {
            Some(MemoryKind::Vmem)
        } else if self.contains(Self::L2SRAM) {
            Some(MemoryKind::L2Sram)
        } else {
            None
        }
    }
}

/// Per-slot summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelocSlot {
    pub flags: SlotFlags,
    /// Union of every access through this slot, `None` if unused.
    pub envelope: Option<AccessEntry>,
    /// First reloc of this slot in its namespace's reloc table.
    pub reloc_start: u16,
    pub reloc_count: u16,
    /// One bit per hardware channel id that reaches this slot.
    pub channels: u16,
}

impl RelocSlot {
    #[inline]
    pub fn is_used(&self) -> bool {
        self.reloc_count > 0
    }

    fn relocs(&self) -> std::ops::Range<usize> {
        let start = usize::from(self.reloc_start);
        start..start + usize::from(self.reloc_count)
    }
}

/// One descriptor field to patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reloc {
    pub desc: DescIndex,
    pub field: DescField,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelocTables {
    pub static_slots: Vec<RelocSlot>,
    pub dynamic_slots: Vec<RelocSlot>,
    pub static_relocs: Vec<Reloc>,
    pub dynamic_relocs: Vec<Reloc>,
}

impl RelocTables {
    pub fn slot(&self, slot: SlotRef) -> Option<&RelocSlot> {
        match slot {
            SlotRef::None => None,
            SlotRef::Static(id) => self.static_slots.get(usize::from(id)),
            SlotRef::Dynamic(id) => self.dynamic_slots.get(usize::from(id)),
        }
    }

    /// Relocs recorded against `slot`, in descriptor order.
    pub fn relocs_of(&self, slot: SlotRef) -> &[Reloc] {
        let relocs = match slot {
            SlotRef::None => return &[],
            SlotRef::Static(_) => &self.static_relocs,
            SlotRef::Dynamic(_) => &self.dynamic_relocs,
        };
        self.slot(slot).map_or(&[], |s| &relocs[s.relocs()])
    }
}

fn slot_mut<'a>(
    tables: &'a mut RelocTables,
    index: DescIndex,
    field: DescField,
    slot: SlotRef,
) -> Result<Option<&'a mut RelocSlot>, DmaError> {
    let (table, id) = match slot {
        SlotRef::None => return Ok(None),
        SlotRef::Static(id) => (&mut tables.static_slots, id),
        SlotRef::Dynamic(id) => (&mut tables.dynamic_slots, id),
    };
    table
        .get_mut(usize::from(id))
        .map(Some)
        .ok_or_else(|| DmaError::descriptor(index, DescriptorFault::SlotOutOfRange { field, slot }))
}

/// Build the slot and reloc tables.
pub fn collect_relocs(
    config: &DmaConfig,
    access: &[AccessSet],
    trace: &DescriptorTrace,
) -> Result<RelocTables, DmaError> {
    let mut tables = RelocTables {
        static_slots: vec![RelocSlot::default(); usize::from(config.header.num_static_slots)],
        dynamic_slots: vec![RelocSlot::default(); usize::from(config.header.num_dynamic_slots)],
        ..Default::default()
    };

    // Count references, merge envelopes and record touching channels.
    for (i, desc) in config.descriptors.iter().enumerate() {
        let index = i as DescIndex;
        let channel_bit = trace
            .owner(index)
            .map_or(0, |ch| 1u16.checked_shl(u32::from(config.hw_channel_id(ch))).unwrap_or(0));

        for field in desc.active_fields() {
            let attr = desc.attr(field);
            let Some(kind) = attr.mode.memory_kind() else {
                continue;
            };
            let Some(slot) = slot_mut(&mut tables, index, field, attr.slot)? else {
                continue;
            };
            if let Some(first) = slot.flags.memory_kind() {
                if first != kind {
                    return Err(DmaError::SlotKindConflict { slot: attr.slot, first, second: kind });
                }
            }
            slot.flags |= SlotFlags::from_kind(kind);
            slot.flags |= if field.is_write() { SlotFlags::WRITE } else { SlotFlags::READ };
            slot.reloc_count += 1;
            slot.channels |= channel_bit;
            if let Some(entry) = access.get(i).and_then(|set| set.get(field)) {
                slot.envelope = Some(match slot.envelope {
                    Some(envelope) => envelope.union(entry),
                    None => entry,
                });
            }
        }
    }

    // A static slot's use must agree with what it is bound to.
    let bindings = tables.static_slots.iter().zip(&config.static_bindings);
    for (id, (slot, binding)) in bindings.enumerate() {
        let bound = binding.target.memory_kind();
        if let Some(used) = slot.flags.memory_kind() {
            if used != bound {
                return Err(DmaError::SlotKindConflict {
                    slot: SlotRef::Static(id as u16),
                    first: bound,
                    second: used,
                });
            }
        }
    }

    // Contiguous start indices, then fill in descriptor order.
    for slots in [&mut tables.static_slots, &mut tables.dynamic_slots] {
        let mut next = 0u16;
        for slot in slots.iter_mut() {
            slot.reloc_start = next;
            next += slot.reloc_count;
        }
    }
    let mut static_fill = vec![0u16; tables.static_slots.len()];
    let mut dynamic_fill = vec![0u16; tables.dynamic_slots.len()];
    let blank = Reloc { desc: 0, field: DescField::Src };
    tables.static_relocs = vec![blank; total(&tables.static_slots)];
    tables.dynamic_relocs = vec![blank; total(&tables.dynamic_slots)];

    for (i, desc) in config.descriptors.iter().enumerate() {
        for field in desc.active_fields() {
            let attr = desc.attr(field);
            if attr.mode.memory_kind().is_none() {
                continue;
            }
            let (slots, relocs, fill, id) = match attr.slot {
                SlotRef::None => continue,
                SlotRef::Static(id) => {
                    (&tables.static_slots, &mut tables.static_relocs, &mut static_fill, id)
                }
                SlotRef::Dynamic(id) => {
                    (&tables.dynamic_slots, &mut tables.dynamic_relocs, &mut dynamic_fill, id)
                }
            };
            let id = usize::from(id);
            let at = usize::from(slots[id].reloc_start + fill[id]);
            relocs[at] = Reloc { desc: i as DescIndex, field };
            fill[id] += 1;
        }
    }

    log::debug!(
        "relocs: {} static over {} slots, {} dynamic over {} slots",
        tables.static_relocs.len(),
        tables.static_slots.iter().filter(|s| s.is_used()).count(),
        tables.dynamic_relocs.len(),
        tables.dynamic_slots.iter().filter(|s| s.is_used()).count()
    );
    Ok(tables)
}

fn total(slots: &[RelocSlot]) -> usize {
    slots.iter().map(|s| usize::from(s.reloc_count)).sum()
}
