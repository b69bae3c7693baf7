//! Sequencer program validation.

use smallvec::SmallVec;

use super::geometry::{self, GroupGeometry, LineGeometry, TileRun};
use super::program::{HwseqGroup, HwseqProgram, RraColumn};
use crate::dma::types::{
    AccessEntry, DescField, DescIndex, Descriptor, DescriptorSet, DmaConfig, HwseqSettings,
    Traversal,
};
use crate::dma::validate::{resolve_desc_id, IdFault};
use crate::error::{DmaError, HwseqFault};
use crate::hw;
use crate::math::Offset;

/// What the sequencer programs of one config replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HwseqUsage {
    /// Descriptors replayed by any program.
    pub used: DescriptorSet,
    /// Decoded program per channel index, `None` when sequencing is off.
    pub programs: Vec<Option<HwseqProgram>>,
    /// Descriptors each channel's program replays.
    pub per_channel: Vec<DescriptorSet>,
    /// Frame-mode box of each descriptor's memory side, relative to that
    /// side's offset.
    pub frame_boxes: Vec<Option<AccessEntry>>,
    /// RRA column offsets each descriptor is replayed at.
    pub rra_offsets: Vec<SmallVec<[u16; 4]>>,
}

impl HwseqUsage {
    pub fn any_enabled(&self) -> bool {
        self.programs.iter().any(Option::is_some)
    }
}

/// Per-channel validation state.
struct ChannelCheck<'a> {
    config: &'a DmaConfig,
    channel: u8,
    settings: HwseqSettings,
    usage: &'a mut HwseqUsage,
}

impl<'a> ChannelCheck<'a> {
    fn fault(&self, reason: HwseqFault) -> DmaError {
        DmaError::hwseq(self.channel, reason)
    }

    fn resolve(&mut self, id: u8) -> Result<(DescIndex, &'a Descriptor), DmaError> {
        let config = self.config;
        let index = resolve_desc_id(&config.header, id).map_err(|e| {
            self.fault(match e {
                IdFault::Null => HwseqFault::NullDescriptor,
                IdFault::OutOfRange(id) => HwseqFault::DescriptorOutOfRange(id),
                IdFault::Reserved(hw_id) => HwseqFault::DescriptorReserved(hw_id),
            })
        })?;
        let desc = config
            .descriptor(index)
            .ok_or_else(|| self.fault(HwseqFault::DescriptorOutOfRange(id)))?;
        self.usage.used.insert(index);
        self.usage.per_channel[usize::from(self.channel)].insert(index);
        Ok((index, desc))
    }

    fn check_descriptor_mode(&mut self, groups: &[HwseqGroup]) -> Result<(), DmaError> {
        for (group, g) in groups.iter().enumerate() {
            if g.offset != 0 {
                return Err(self.fault(HwseqFault::GroupOffset { group }));
            }
            for entry in &g.entries {
                self.resolve(entry.desc_id)?;
            }
        }
        Ok(())
    }

    fn check_rra_mode(&mut self, frame_repeat: u8, columns: &[RraColumn]) -> Result<(), DmaError> {
        if columns.len() > hw::MAX_RRA_COLUMNS as usize {
            return Err(self.fault(HwseqFault::TooManyColumns(columns.len() as u8)));
        }
        if u32::from(frame_repeat) > hw::MAX_RRA_FRAME_REPEAT {
            return Err(self.fault(HwseqFault::FrameRepeatTooLarge(frame_repeat)));
        }
        for column in columns {
            let (index, desc) = self.resolve(column.desc_id)?;
            if desc.vmem_pair().is_none() {
                return Err(self.fault(HwseqFault::NoVmemSide { desc: index }));
            }
            self.usage.rra_offsets[usize::from(index)].push(column.offset);
        }
        Ok(())
    }

    fn check_frame_mode(
        &mut self,
        frame_repeat: u8,
        tile_step: i32,
        frame_step: i32,
        groups: &[HwseqGroup],
    ) -> Result<(), DmaError> {
        let mut geometries: SmallVec<[(GroupGeometry, DescIndex, Option<DescIndex>); 4]> =
            SmallVec::new();
        // Descriptors whose VMEM side advances, with the tiles it lays out.
        let mut advancing: SmallVec<[(DescIndex, u64); 4]> = SmallVec::new();

        for (group, g) in groups.iter().enumerate() {
            if !(1..=2).contains(&g.entries.len()) {
                let entries = g.entries.len();
                return Err(self.fault(HwseqFault::FrameGroupSize { group, entries }));
            }
            let head_entry = g.entries[0];
            let (head_index, head) = self.resolve(head_entry.desc_id)?;
            let head = *head;
            if head.tx == 0 || head.ty == 0 {
                return Err(self.fault(HwseqFault::TileEmpty { desc: head_index }));
            }
            if head.px != 0 || head.py != 0 {
                return Err(self.fault(HwseqFault::HeadPadded { desc: head_index }));
            }
            let (vmem_field, mem_field) = head
                .vmem_pair()
                .ok_or_else(|| self.fault(HwseqFault::NoVmemSide { desc: head_index }))?;

            let tail = match g.entries.get(1) {
                Some(entry) => {
                    let (tail_index, tail) = self.resolve(entry.desc_id)?;
                    let tail = *tail;
                    if tail.tx == 0 || tail.ty == 0 {
                        return Err(self.fault(HwseqFault::TileEmpty { desc: tail_index }));
                    }
                    if !tail_matches(&head, &tail, mem_field) {
                        return Err(self.fault(HwseqFault::TailMismatch {
                            head: head_index,
                            tail: tail_index,
                        }));
                    }
                    Some((tail_index, tail, entry.repeat))
                }
                None => None,
            };

            self.check_vmem_side(head_index, &head, vmem_field)?;
            if let Some((tail_index, tail, _)) = &tail {
                self.check_vmem_side(*tail_index, tail, vmem_field)?;
            }
            let sides = std::iter::once((head_index, &head))
                .chain(tail.as_ref().map(|(i, t, _)| (*i, t)));
            for (index, desc) in sides {
                let vmem = desc.attr(vmem_field);
                if !vmem.is_stationary() {
                    advancing.push((index, vmem.tile_count()));
                }
            }

            let line = LineGeometry {
                order: self.settings.order,
                padding: self.settings.padding,
                elem_size: head.elem_size(),
                line_pitch: head.attr(mem_field).line_pitch,
                tile_step,
                head: TileRun { tx: head.tx, ty: head.ty, repeat: head_entry.repeat },
                tail: tail.map(|(_, t, repeat)| TileRun { tx: t.tx, ty: t.ty, repeat }),
                tail_pad: tail.map_or(0, |(_, t, _)| match self.settings.order {
                    Traversal::Raster => t.px,
                    Traversal::VerticalMining => t.py,
                }),
            };
            let (lead, trail) = line.padding_parts();
            let head_len = line.axis_len(&line.head);
            if lead >= head_len {
                return Err(self.fault(HwseqFault::PaddingTooLarge { pad: lead, len: head_len }));
            }
            if let Some(run) = &line.tail {
                let tail_len = line.axis_len(run);
                if trail >= tail_len {
                    return Err(
                        self.fault(HwseqFault::PaddingTooLarge { pad: trail, len: tail_len })
                    );
                }
            }

            geometries.push((
                GroupGeometry { line, repeat: g.repeat, offset: g.offset },
                head_index,
                tail.map(|(i, _, _)| i),
            ));
        }

        let all: SmallVec<[GroupGeometry; 4]> = geometries.iter().map(|(g, _, _)| *g).collect();
        let tiles = geometry::tile_count(&all, frame_repeat);
        if tiles == 0 || tiles > hw::MAX_HWSEQ_TILES {
            return Err(self.fault(HwseqFault::TooManyTiles(tiles)));
        }
        // Every replayed tile takes the next VMEM tile, and the VMEM layout
        // must be walked exactly once.
        for &(desc, vmem) in &advancing {
            if tiles % vmem != 0 || tiles > vmem {
                let fault = HwseqFault::VmemTileMismatch { desc, replayed: tiles, vmem };
                return Err(self.fault(fault));
            }
        }

        for (group, head_index, tail_index) in &geometries {
            let frame = geometry::frame_box(std::slice::from_ref(group), frame_repeat, frame_step)?;
            if frame.is_empty() {
                return Err(self.fault(HwseqFault::EmptyFrame));
            }
            log::trace!(
                "channel {}: frame box {} for descriptors {} / {:?}",
                self.channel,
                frame,
                head_index,
                tail_index
            );
            for index in std::iter::once(*head_index).chain(*tail_index) {
                let slot = &mut self.usage.frame_boxes[usize::from(index)];
                *slot = Some(match *slot {
                    Some(existing) => existing.union(frame),
                    None => frame,
                });
            }
        }
        Ok(())
    }

    /// Looping and circular-buffer rules for the VMEM side of a frame tile.
    fn check_vmem_side(
        &self,
        index: DescIndex,
        desc: &Descriptor,
        vmem_field: DescField,
    ) -> Result<(), DmaError> {
        let vmem = desc.attr(vmem_field);
        if !self.settings.looping && !vmem.is_stationary() {
            return Err(self.fault(HwseqFault::VmemAdvance { desc: index }));
        }
        if vmem.cb_enable {
            let lines = Offset::from(desc.ty.saturating_sub(1));
            let extent = ((lines * Offset::from(vmem.line_pitch))?
                + (Offset::from(desc.tx) * Offset::from(desc.elem_size()))?)?;
            if extent > Offset::from(vmem.cb_size) {
                return Err(self.fault(HwseqFault::CircularTooSmall {
                    desc: index,
                    extent: extent.get(),
                    cb_size: vmem.cb_size,
                }));
            }
        }
        Ok(())
    }
}

/// Tail must move data the same way through the same memory window.
fn tail_matches(head: &Descriptor, tail: &Descriptor, mem_field: DescField) -> bool {
    let (h, t) = (head.attr(mem_field), tail.attr(mem_field));
    head.vmem_pair() == tail.vmem_pair()
        && h.slot == t.slot
        && h.offset == t.offset
        && h.line_pitch == t.line_pitch
        && head.log2_elem_size == tail.log2_elem_size
}

/// Validate every enabled channel window and the program inside it.
pub fn validate_hwseq(config: &DmaConfig) -> Result<HwseqUsage, DmaError> {
    let num_desc = config.descriptors.len();
    let mut usage = HwseqUsage {
        programs: vec![None; config.channels.len()],
        per_channel: vec![DescriptorSet::default(); config.channels.len()],
        frame_boxes: vec![None; num_desc],
        rra_offsets: vec![SmallVec::new(); num_desc],
        ..Default::default()
    };
    let mut windows: SmallVec<[(u8, u16, u16); 16]> = SmallVec::new();
    let num_words = config.header.num_hwseq_words;

    for (i, ch) in config.channels.iter().enumerate() {
        let channel = i as u8;
        let settings = ch.hwseq;
        if !settings.enabled {
            continue;
        }
        let fault = |reason| DmaError::hwseq(channel, reason);

        let (start, end) = (settings.start, settings.end);
        if end < start {
            return Err(fault(HwseqFault::WindowReversed { start, end }));
        }
        if end >= num_words {
            return Err(fault(HwseqFault::WindowOutOfRange { end, words: num_words }));
        }
        if let Some((other, _, _)) = windows.iter().find(|(_, s, e)| start <= *e && *s <= end) {
            return Err(fault(HwseqFault::WindowOverlap { other: *other }));
        }
        windows.push((channel, start, end));

        let words = config
            .hwseq_words
            .get(usize::from(start)..=usize::from(end))
            .ok_or_else(|| fault(HwseqFault::Truncated { at: u32::from(end) }))?;
        let program = HwseqProgram::parse(words, u32::from(start)).map_err(fault)?;

        let mut check = ChannelCheck { config, channel, settings, usage: &mut usage };
        match &program {
            HwseqProgram::Descriptor { groups, .. } => check.check_descriptor_mode(groups)?,
            HwseqProgram::Frame { frame_repeat, tile_step, frame_step, groups } => {
                check.check_frame_mode(*frame_repeat, *tile_step, *frame_step, groups)?
            }
            HwseqProgram::Rra { frame_repeat, columns } => {
                check.check_rra_mode(*frame_repeat, columns)?
            }
        }
        log::debug!(
            "channel {}: hwseq words {}..={} validated, {} descriptors replayed",
            channel,
            start,
            end,
            usage.per_channel[i].len()
        );
        usage.programs[i] = Some(program);
    }
    Ok(usage)
}
