//! Raw record decoding.
//!
//! Records are read field by field with `byteorder`, then converted into the
//! typed model. Encodings that cannot be represented by the typed model
//! (unknown enum values, the illegal slot tag) are reported here against the
//! record that carries them.

use std::io::{self, Cursor};

use byteorder::{LittleEndian, ReadBytesExt};

use super::header::SectionLayout;
use super::types::{
    BindingTarget, Channel, ConfigHeader, DescField, Descriptor, DmaConfig, HwseqFlags,
    HwseqSettings, ReplicationFactor, SlotRef, StaticBinding, TransferAttr, TransferMode,
    TriggerMode,
};
use crate::error::{ChannelFault, DescriptorFault, DmaError, Section};
use crate::hw;

pub const CHANNEL_RECORD_SIZE: usize = 32;
pub const DESCRIPTOR_RECORD_SIZE: usize = 136;
pub const TRANSFER_ATTR_SIZE: usize = 40;
pub const BINDING_RECORD_SIZE: usize = 16;
pub const HWSEQ_WORD_SIZE: usize = 4;

/// Offset of the src attribute inside a descriptor record.
pub const DESCRIPTOR_ATTR_OFFSET: usize = 16;

#[derive(Debug, Default)]
struct RawChannel {
    desc_index: u8,
    vdb_offset: u8,
    vdb_count: u8,
    rep_factor: u8,
    hwseq_flags: u8,
    req_per_grant: u8,
    prefetch: u8,
    hwseq_start: u16,
    hwseq_end: u16,
    adb_offset: u16,
    adb_count: u16,
    output_enable_mask: u32,
    pad_value: u32,
}

impl RawChannel {
    fn read(r: &mut Cursor<&[u8]>) -> io::Result<Self> {
        let desc_index = r.read_u8()?;
        let vdb_offset = r.read_u8()?;
        let vdb_count = r.read_u8()?;
        let rep_factor = r.read_u8()?;
        let hwseq_flags = r.read_u8()?;
        let req_per_grant = r.read_u8()?;
        let prefetch = r.read_u8()?;
        let _reserved = r.read_u8()?;
        Ok(Self {
            desc_index,
            vdb_offset,
            vdb_count,
            rep_factor,
            hwseq_flags,
            req_per_grant,
            prefetch,
            hwseq_start: r.read_u16::<LittleEndian>()?,
            hwseq_end: r.read_u16::<LittleEndian>()?,
            adb_offset: r.read_u16::<LittleEndian>()?,
            adb_count: r.read_u16::<LittleEndian>()?,
            output_enable_mask: r.read_u32::<LittleEndian>()?,
            pad_value: r.read_u32::<LittleEndian>()?,
        })
    }
}

#[derive(Debug, Default)]
struct RawTransferAttr {
    mode: u8,
    cb_enable: u8,
    rpt: [u8; 3],
    slot: u16,
    line_pitch: u32,
    adv: [i32; 3],
    cb_size: u32,
    offset: u64,
}

impl RawTransferAttr {
    fn read(r: &mut Cursor<&[u8]>) -> io::Result<Self> {
        let mode = r.read_u8()?;
        let cb_enable = r.read_u8()?;
        let rpt = [r.read_u8()?, r.read_u8()?, r.read_u8()?];
        let _reserved = r.read_u8()?;
        let slot = r.read_u16::<LittleEndian>()?;
        let line_pitch = r.read_u32::<LittleEndian>()?;
        let adv = [
            r.read_i32::<LittleEndian>()?,
            r.read_i32::<LittleEndian>()?,
            r.read_i32::<LittleEndian>()?,
        ];
        let cb_size = r.read_u32::<LittleEndian>()?;
        let _reserved = r.read_u32::<LittleEndian>()?;
        let offset = r.read_u64::<LittleEndian>()?;
        Ok(Self { mode, cb_enable, rpt, slot, line_pitch, adv, cb_size, offset })
    }

    fn decode(&self, index: u8, field: DescField) -> Result<TransferAttr, DmaError> {
        let mode = TransferMode::from_raw(self.mode).ok_or_else(|| {
            let fault = DescriptorFault::UnknownTransferMode { field, raw: self.mode };
            DmaError::descriptor(index, fault)
        })?;
        let slot = SlotRef::decode(self.slot).ok_or_else(|| {
            DmaError::descriptor(index, DescriptorFault::IllegalSlotTag { field, raw: self.slot })
        })?;
        Ok(TransferAttr {
            mode,
            cb_enable: self.cb_enable != 0,
            cb_size: self.cb_size,
            rpt: self.rpt,
            adv: self.adv,
            line_pitch: self.line_pitch,
            slot,
            offset: self.offset,
        })
    }
}

#[derive(Debug, Default)]
struct RawDescriptor {
    tx: u16,
    ty: u16,
    px: u8,
    py: u8,
    link_desc_id: u8,
    trigger_mode: u8,
    trigger_select: u8,
    prefetch: u8,
    log2_elem_size: u8,
    attrs: [RawTransferAttr; 3],
}

impl RawDescriptor {
    fn read(r: &mut Cursor<&[u8]>) -> io::Result<Self> {
        let tx = r.read_u16::<LittleEndian>()?;
        let ty = r.read_u16::<LittleEndian>()?;
        let px = r.read_u8()?;
        let py = r.read_u8()?;
        let link_desc_id = r.read_u8()?;
        let trigger_mode = r.read_u8()?;
        let trigger_select = r.read_u8()?;
        let prefetch = r.read_u8()?;
        let log2_elem_size = r.read_u8()?;
        r.set_position(DESCRIPTOR_ATTR_OFFSET as u64);
        let attrs = [
            RawTransferAttr::read(r)?,
            RawTransferAttr::read(r)?,
            RawTransferAttr::read(r)?,
        ];
        Ok(Self {
            tx,
            ty,
            px,
            py,
            link_desc_id,
            trigger_mode,
            trigger_select,
            prefetch,
            log2_elem_size,
            attrs,
        })
    }
}

/// Slice record `index` of `record_size` bytes out of a checked section.
fn record<'a>(
    raw: &'a [u8],
    range: &std::ops::Range<usize>,
    index: usize,
    record_size: usize,
    section: Section,
) -> Result<&'a [u8], DmaError> {
    let start = range.start + index * record_size;
    raw.get(start..start + record_size).ok_or(DmaError::BufferTooSmall {
        section,
        needed: (start + record_size) as u64,
        available: raw.len() as u64,
    })
}

fn short_record(
    section: Section,
    needed: usize,
    data: &[u8],
) -> impl FnOnce(io::Error) -> DmaError {
    let available = data.len() as u64;
    move |_| DmaError::BufferTooSmall { section, needed: needed as u64, available }
}

fn decode_channel(index: u8, data: &[u8]) -> Result<Channel, DmaError> {
    let raw = RawChannel::read(&mut Cursor::new(data))
        .map_err(short_record(Section::Channels, CHANNEL_RECORD_SIZE, data))?;

    let rep_factor = match raw.rep_factor {
        hw::REP_FACTOR_NONE => ReplicationFactor::None,
        hw::REP_FACTOR_FULL => ReplicationFactor::Full,
        partial @ 1..=6 => {
            return Err(DmaError::channel(index, ChannelFault::PartialReplication(partial)))
        }
        other => return Err(DmaError::channel(index, ChannelFault::UnknownReplication(other))),
    };
    let hwseq_flags = HwseqFlags::from_bits(raw.hwseq_flags).ok_or_else(|| {
        DmaError::channel(index, ChannelFault::UnknownHwseqFlags(raw.hwseq_flags))
    })?;

    Ok(Channel {
        desc_index: raw.desc_index,
        vdb_offset: raw.vdb_offset,
        vdb_count: raw.vdb_count,
        rep_factor,
        req_per_grant: raw.req_per_grant,
        prefetch: raw.prefetch != 0,
        hwseq: HwseqSettings::from_flags(hwseq_flags, raw.hwseq_start, raw.hwseq_end),
        adb_offset: raw.adb_offset,
        adb_count: raw.adb_count,
        output_enable_mask: raw.output_enable_mask,
        pad_value: raw.pad_value,
    })
}

fn decode_descriptor(index: u8, data: &[u8]) -> Result<Descriptor, DmaError> {
    let raw = RawDescriptor::read(&mut Cursor::new(data))
        .map_err(short_record(Section::Descriptors, DESCRIPTOR_RECORD_SIZE, data))?;

    let trigger_mode = TriggerMode::from_raw(raw.trigger_mode).ok_or_else(|| {
        DmaError::descriptor(index, DescriptorFault::UnknownTriggerMode(raw.trigger_mode))
    })?;

    Ok(Descriptor {
        tx: raw.tx,
        ty: raw.ty,
        px: raw.px,
        py: raw.py,
        link_id: raw.link_desc_id,
        trigger_mode,
        trigger_select: raw.trigger_select,
        prefetch: raw.prefetch != 0,
        log2_elem_size: raw.log2_elem_size,
        src: raw.attrs[0].decode(index, DescField::Src)?,
        dst: raw.attrs[1].decode(index, DescField::Dst)?,
        dst2: raw.attrs[2].decode(index, DescField::Dst2)?,
    })
}

fn decode_binding(slot: u16, data: &[u8]) -> Result<StaticBinding, DmaError> {
    let mut r = Cursor::new(data);
    let read = |r: &mut Cursor<&[u8]>| -> io::Result<(u8, u32, u64)> {
        let kind = r.read_u8()?;
        r.set_position(4);
        Ok((kind, r.read_u32::<LittleEndian>()?, r.read_u64::<LittleEndian>()?))
    };
    let (kind, target, offset) =
        read(&mut r).map_err(short_record(Section::StaticBindings, BINDING_RECORD_SIZE, data))?;

    let target = match kind {
        BindingTarget::RAW_DRAM => BindingTarget::Dram(target),
        BindingTarget::RAW_VMEM => BindingTarget::Vmem(target),
        _ => return Err(DmaError::InvalidBinding { slot, reason: "unknown binding kind" }),
    };
    Ok(StaticBinding { target, offset })
}

/// Decode every section located by [`super::header::check_header`].
pub fn parse_config(
    raw: &[u8],
    header: ConfigHeader,
    layout: &SectionLayout,
) -> Result<DmaConfig, DmaError> {
    let channels = (0..header.num_channels)
        .map(|i| {
            let data =
                record(raw, &layout.channels, i.into(), CHANNEL_RECORD_SIZE, Section::Channels)?;
            decode_channel(i, data)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let descriptors = (0..header.num_descriptors)
        .map(|i| {
            let data = record(
                raw,
                &layout.descriptors,
                i.into(),
                DESCRIPTOR_RECORD_SIZE,
                Section::Descriptors,
            )?;
            decode_descriptor(i, data)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let hwseq_words = (0..usize::from(header.num_hwseq_words))
        .map(|i| {
            let data = record(raw, &layout.hwseq_words, i, HWSEQ_WORD_SIZE, Section::HwseqWords)?;
            Cursor::new(data)
                .read_u32::<LittleEndian>()
                .map_err(short_record(Section::HwseqWords, HWSEQ_WORD_SIZE, data))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let static_bindings = (0..header.num_static_slots)
        .map(|i| {
            let data = record(
                raw,
                &layout.static_bindings,
                i.into(),
                BINDING_RECORD_SIZE,
                Section::StaticBindings,
            )?;
            decode_binding(i, data)
        })
        .collect::<Result<Vec<_>, _>>()?;

    log::trace!(
        "Parsed {} channels, {} descriptors, {} hwseq words, {} static bindings",
        channels.len(),
        descriptors.len(),
        hwseq_words.len(),
        static_bindings.len()
    );

    Ok(DmaConfig { header, channels, descriptors, hwseq_words, static_bindings })
}
