//! Per-descriptor access ranges.
//!
//! Every slot-bearing side of a descriptor gets a half-open byte interval
//! relative to its slot base. A plain descriptor's footprint is one tile
//! widened by its repeat/advance loops:
//!
//! ```text
//!   offset
//!     v
//!     [ tile: (ty-1)*pitch + tx*elem ]
//!     <-- sum of negative adv*rpt --|-- sum of positive adv*rpt -->
//! ```
//!
//! Descriptors replayed by a frame-mode program take their memory side from
//! the frame box; RRA descriptors are replayed at every column offset.

use super::hwseq::HwseqUsage;
use super::types::{
    AccessEntry, AccessSet, DescField, DescIndex, Descriptor, DmaConfig, TransferAttr,
};
use crate::error::{DescriptorFault, DmaError};
use crate::math::Offset;

/// Attributes that shape a side's footprint. dst2 mirrors the dst geometry
/// and only brings its own offset and slot.
fn geometry_attr(desc: &Descriptor, field: DescField) -> &TransferAttr {
    match field {
        DescField::Dst2 => &desc.dst,
        _ => desc.attr(field),
    }
}

/// Footprint of one side without any sequencer replay.
fn direct_entry(
    index: DescIndex,
    desc: &Descriptor,
    field: DescField,
    sequenced: bool,
) -> Result<AccessEntry, DmaError> {
    let offset = Offset::from_u64(desc.attr(field).offset)?;
    if desc.tx == 0 || desc.ty == 0 {
        return Ok(AccessEntry::empty_at(offset));
    }
    let geom = geometry_attr(desc, field);
    if !sequenced && geom.rpt[2] == 0 && geom.adv[2] != 0 {
        return Err(DmaError::descriptor(index, DescriptorFault::DanglingAdvance { field }));
    }

    // Padding is produced by the engine, not read from the source.
    let (tx, ty) = match field {
        DescField::Src => (
            desc.tx.saturating_sub(desc.px.into()),
            desc.ty.saturating_sub(desc.py.into()),
        ),
        _ => (desc.tx, desc.ty),
    };
    let lines = Offset::from(ty.saturating_sub(1));
    let extent = ((lines * Offset::from(geom.line_pitch))?
        + (Offset::from(tx) * Offset::from(desc.elem_size()))?)?;

    if geom.cb_enable {
        if extent > Offset::from(geom.cb_size) {
            return Err(DmaError::descriptor(
                index,
                DescriptorFault::TileExceedsCircular {
                    field,
                    extent: extent.get(),
                    cb_size: geom.cb_size,
                },
            ));
        }
        let attr = desc.attr(field);
        if attr.offset >= u64::from(geom.cb_size) {
            return Err(DmaError::descriptor(
                index,
                DescriptorFault::CircularOffset {
                    field,
                    offset: attr.offset,
                    cb_size: geom.cb_size,
                },
            ));
        }
        // The engine wraps inside the buffer; the offset only picks the start.
        return Ok(AccessEntry::new(Offset::ZERO, Offset::from(geom.cb_size)));
    }

    let (mut start, mut end) = (Offset::ZERO, extent);
    for (&rpt, &adv) in geom.rpt.iter().zip(&geom.adv) {
        let span = (Offset::from(adv) * Offset::from(rpt))?;
        start = (start + span.min(Offset::ZERO))?;
        end = (end + span.max(Offset::ZERO))?;
    }
    Ok(AccessEntry::new(start, end).shift(offset)?)
}

/// Widen a direct entry by the frame box and RRA columns replaying it.
fn replayed(
    direct: AccessEntry,
    base: Offset,
    frame: Option<AccessEntry>,
    columns: &[u16],
) -> Result<AccessEntry, DmaError> {
    let mut entry = direct;
    if let Some(frame) = frame {
        entry = entry.union(frame.shift(base)?);
    }
    for &column in columns {
        entry = entry.union(direct.shift(Offset::from(column))?);
    }
    Ok(entry)
}

/// Compute the access set of every descriptor.
pub fn compute_access(config: &DmaConfig, hwseq: &HwseqUsage) -> Result<Vec<AccessSet>, DmaError> {
    let mut sets = Vec::with_capacity(config.descriptors.len());
    for (i, desc) in config.descriptors.iter().enumerate() {
        let index = i as DescIndex;
        let sequenced = hwseq.used.contains(index);
        let mut set = AccessSet::default();

        for field in desc.active_fields() {
            if desc.attr(field).mode.memory_kind().is_none() {
                continue;
            }
            *set.get_mut(field) = Some(direct_entry(index, desc, field, sequenced)?);
        }

        if let Some((_, mem_field)) = desc.vmem_pair() {
            let frame = hwseq.frame_boxes.get(i).copied().flatten();
            let columns = hwseq.rra_offsets.get(i).map_or(&[][..], |c| c.as_slice());
            // dst2 is written with the dst geometry, so it is replayed with it.
            let mirrored = (mem_field == DescField::Dst).then_some(DescField::Dst2);
            for field in std::iter::once(mem_field).chain(mirrored) {
                if let Some(direct) = set.get(field) {
                    let base = Offset::from_u64(desc.attr(field).offset)?;
                    *set.get_mut(field) = Some(replayed(direct, base, frame, columns)?);
                }
            }
        }

        log::trace!(
            "descriptor {}: src {:?} dst {:?} dst2 {:?}",
            index,
            set.src.map(|e| e.to_string()),
            set.dst.map(|e| e.to_string()),
            set.dst2.map(|e| e.to_string())
        );
        sets.push(set);
    }
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::types::{SlotRef, TransferMode};
    use crate::math::MathError;

    fn entry(start: i64, end: i64) -> AccessEntry {
        AccessEntry::new(Offset::new(start), Offset::new(end))
    }

    fn read(tx: u16, ty: u16) -> Descriptor {
        Descriptor::new(
            tx,
            ty,
            TransferAttr::new(TransferMode::Dram, SlotRef::Dynamic(0)).with_line_pitch(256),
            TransferAttr::new(TransferMode::Vmem, SlotRef::Static(0)).with_line_pitch(64),
        )
    }

    fn config(descriptors: Vec<Descriptor>) -> DmaConfig {
        let mut config = DmaConfig { descriptors, ..Default::default() };
        config.header.num_descriptors = config.descriptors.len() as u8;
        config
    }

    fn usage(n: usize) -> HwseqUsage {
        HwseqUsage {
            frame_boxes: vec![None; n],
            rra_offsets: vec![Default::default(); n],
            ..Default::default()
        }
    }

    fn compute_one(desc: Descriptor) -> Result<AccessSet, DmaError> {
        compute_access(&config(vec![desc]), &usage(1)).map(|mut sets| sets.remove(0))
    }

    #[test]
    fn test_tile_extent_and_offset() {
        let mut desc = read(16, 4);
        desc.src.offset = 100;
        desc.log2_elem_size = 1;
        let set = compute_one(desc).unwrap();
        assert_eq!(set.src, Some(entry(100, 100 + 3 * 256 + 32)));
        assert_eq!(set.dst, Some(entry(0, 3 * 64 + 32)));
        assert_eq!(set.dst2, None);
    }

    #[test]
    fn test_empty_tile_gives_empty_entry() {
        let mut desc = read(0, 4);
        desc.src.offset = 40;
        let set = compute_one(desc).unwrap();
        let src = set.src.unwrap();
        assert!(src.is_empty());
        assert_eq!(src, AccessEntry::empty_at(Offset::new(40)));

        // Empty tiles are not widened by their loops either.
        let desc = Descriptor { ty: 0, ..read(8, 8) };
        let desc = Descriptor { src: desc.src.with_repeat(0, 3, 100), ..desc };
        assert!(compute_one(desc).unwrap().src.unwrap().is_empty());
    }

    #[test]
    fn test_source_skips_padding() {
        let desc = read(16, 4).with_padding(4, 1);
        let set = compute_one(desc).unwrap();
        assert_eq!(set.src, Some(entry(0, 2 * 256 + 12)));
        assert_eq!(set.dst, Some(entry(0, 3 * 64 + 16)));
    }

    #[test]
    fn test_advances_widen_both_ways() {
        let mut desc = read(8, 1);
        desc.src = desc.src.with_offset(1000).with_repeat(0, 2, 100).with_repeat(1, 3, -50);
        let set = compute_one(desc).unwrap();
        assert_eq!(set.src, Some(entry(1000 - 150, 1000 + 8 + 200)));
    }

    #[test]
    fn test_circular_side() {
        let mut desc = read(16, 4);
        desc.dst = desc.dst.with_offset(32).with_circular(1024).with_repeat(0, 7, 512);
        // The whole buffer, wherever inside it the tile starts.
        assert_eq!(compute_one(desc).unwrap().dst, Some(entry(0, 1024)));

        desc.dst.offset = 1024;
        assert_eq!(
            compute_one(desc),
            Err(DmaError::descriptor(
                0,
                DescriptorFault::CircularOffset { field: DescField::Dst, offset: 1024, cb_size: 1024 }
            ))
        );
        desc.dst.offset = 32;

        desc.dst.cb_size = 200;
        assert_eq!(
            compute_one(desc),
            Err(DmaError::descriptor(
                0,
                DescriptorFault::TileExceedsCircular { field: DescField::Dst, extent: 208, cb_size: 200 }
            ))
        );
    }

    #[test]
    fn test_dangling_third_advance() {
        let mut desc = read(8, 8);
        desc.src.adv[2] = 64;
        assert_eq!(
            compute_one(desc),
            Err(DmaError::descriptor(0, DescriptorFault::DanglingAdvance { field: DescField::Src }))
        );

        // Sequencer-replayed descriptors are exempt.
        let mut hwseq = usage(1);
        hwseq.used.insert(0);
        assert!(compute_access(&config(vec![desc]), &hwseq).is_ok());
    }

    #[test]
    fn test_dst2_mirrors_dst_geometry() {
        let desc = read(16, 4)
            .with_dst2(TransferAttr::new(TransferMode::Vmem, SlotRef::Static(1)).with_offset(4096));
        let set = compute_one(desc).unwrap();
        assert_eq!(set.dst2, Some(entry(4096, 4096 + 3 * 64 + 16)));
    }

    #[test]
    fn test_frame_box_replaces_memory_side() {
        let mut desc = read(16, 4);
        desc.src.offset = 1024;
        let mut hwseq = usage(1);
        hwseq.used.insert(0);
        hwseq.frame_boxes[0] = Some(entry(-512, 8192));
        let set = compute_access(&config(vec![desc]), &hwseq).unwrap().remove(0);
        assert_eq!(set.src, Some(entry(512, 1024 + 8192)));
        // The VMEM side keeps its own footprint.
        assert_eq!(set.dst, Some(entry(0, 3 * 64 + 16)));
    }

    #[test]
    fn test_rra_columns_shift_external_side() {
        let mut hwseq = usage(1);
        hwseq.used.insert(0);
        hwseq.rra_offsets[0].extend([0u16, 1024, 2048]);
        let set = compute_access(&config(vec![read(16, 1)]), &hwseq).unwrap().remove(0);
        assert_eq!(set.src, Some(entry(0, 2048 + 16)));
        assert_eq!(set.dst, Some(entry(0, 16)));
    }

    /// VMEM tile written out to DRAM, with a DRAM copy on dst2.
    fn write_with_copy() -> Descriptor {
        Descriptor::new(
            16,
            1,
            TransferAttr::new(TransferMode::Vmem, SlotRef::Static(0)),
            TransferAttr::new(TransferMode::Dram, SlotRef::Dynamic(1)).with_line_pitch(16),
        )
        .with_dst2(TransferAttr::new(TransferMode::Dram, SlotRef::Dynamic(2)).with_offset(64))
    }

    #[test]
    fn test_frame_box_widens_dst2() {
        let mut hwseq = usage(1);
        hwseq.used.insert(0);
        hwseq.frame_boxes[0] = Some(entry(0, 128));
        let set = compute_access(&config(vec![write_with_copy()]), &hwseq).unwrap().remove(0);
        assert_eq!(set.dst, Some(entry(0, 128)));
        assert_eq!(set.dst2, Some(entry(64, 64 + 128)));
        assert_eq!(set.src, Some(entry(0, 16)));
    }

    #[test]
    fn test_rra_columns_widen_dst2() {
        let mut hwseq = usage(1);
        hwseq.used.insert(0);
        hwseq.rra_offsets[0].extend([0u16, 256]);
        let set = compute_access(&config(vec![write_with_copy()]), &hwseq).unwrap().remove(0);
        assert_eq!(set.dst, Some(entry(0, 256 + 16)));
        assert_eq!(set.dst2, Some(entry(64, 64 + 256 + 16)));
    }

    #[test]
    fn test_offset_too_large() {
        let mut desc = read(8, 8);
        desc.src.offset = u64::MAX;
        assert_eq!(compute_one(desc), Err(DmaError::Math(MathError::TooLarge(u64::MAX))));
    }
}
