//! Firmware blob layout.
//!
//! ```text
//!   +-------------------+  0
//!   | header      16 B  |
//!   +-------------------+
//!   | dyn slots   24 B  |  x num_dynamic_slots
//!   +-------------------+
//!   | dyn relocs   2 B  |  x num_relocs, padded to 8
//!   +-------------------+
//!   | channels    16 B  |  x num_channels
//!   +-------------------+
//!   | descriptors 80 B  |  x num_descriptors
//!   +-------------------+
//!   | triggers    16 B  |  one u16 per lane
//!   +-------------------+  <- fetch_size
//!   | hwseq words  4 B  |  x num_hwseq_words, padded to 8
//!   +-------------------+
//! ```
//!
//! Firmware fetches everything up to `fetch_size` when the program is
//! submitted and reads the sequencer words on demand.

use std::io::{self, Cursor};
use std::ops::Range;

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use super::binding::BoundConfig;
use super::reloc::{Reloc, RelocTables, SlotFlags};
use super::types::{
    Channel, DescField, Descriptor, DmaConfig, HwseqFlags, HwseqSettings, TransferMode,
    TriggerMode,
};
use crate::error::{DmaError, Section};
use crate::hw;

pub const FW_HEADER_SIZE: usize = 16;
pub const FW_DYN_SLOT_SIZE: usize = 24;
pub const FW_RELOC_SIZE: usize = 2;
pub const FW_CHANNEL_SIZE: usize = 16;
pub const FW_DESCRIPTOR_SIZE: usize = 80;
pub const FW_TRIGGER_SIZE: usize = 2 * hw::NUM_TRIGGER_LANES as usize;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BlobFlags: u32 {
        /// At least one channel runs a sequencer program.
        const HWSEQ = 1 << 0;
        /// A VPU executable is bound.
        const VPU_EXEC = 1 << 1;
    }
}

// Channel control word bits.
const CNTL0_REP_SHIFT: u32 = 24;
const CNTL0_PREFETCH: u32 = 1 << 27;
const CNTL0_RPG_SHIFT: u32 = 28;
const CNTL1_ADB_COUNT_SHIFT: u32 = 10;
const CNTL1_TRIGGER_DONE: u32 = 1 << 27;
const CNTL1_LOOP: u32 = 1 << 28;
const CNTL1_SPLIT_PAD: u32 = 1 << 29;
const CNTL1_VERTICAL: u32 = 1 << 30;
const CNTL1_HWSEQ_ENABLE: u32 = 1 << 31;

fn align(n: usize) -> usize {
    let a = hw::SECTION_ALIGN as usize;
    (n + a - 1) & !(a - 1)
}

/// Byte ranges of every blob section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLayout {
    pub dynamic_slots: Range<usize>,
    pub relocs: Range<usize>,
    pub channels: Range<usize>,
    pub descriptors: Range<usize>,
    pub triggers: Range<usize>,
    pub hwseq_words: Range<usize>,
}

impl BlobLayout {
    pub fn new(
        num_dynamic_slots: usize,
        num_relocs: usize,
        num_channels: usize,
        num_descriptors: usize,
        num_words: usize,
    ) -> Self {
        let section = |start: usize, len: usize| start..start + len;
        let dynamic_slots = section(FW_HEADER_SIZE, num_dynamic_slots * FW_DYN_SLOT_SIZE);
        let relocs = section(dynamic_slots.end, align(num_relocs * FW_RELOC_SIZE));
        let channels = section(relocs.end, num_channels * FW_CHANNEL_SIZE);
        let descriptors = section(channels.end, num_descriptors * FW_DESCRIPTOR_SIZE);
        let triggers = section(descriptors.end, FW_TRIGGER_SIZE);
        let hwseq_words = section(triggers.end, align(num_words * 4));
        Self { dynamic_slots, relocs, channels, descriptors, triggers, hwseq_words }
    }

    pub fn for_config(config: &DmaConfig, relocs: &RelocTables) -> Self {
        Self::new(
            relocs.dynamic_slots.len(),
            relocs.dynamic_relocs.len(),
            config.channels.len(),
            config.descriptors.len(),
            config.hwseq_words.len(),
        )
    }

    /// Bytes firmware fetches at submission.
    pub fn fetch_size(&self) -> usize {
        self.hwseq_words.start
    }

    pub fn total_size(&self) -> usize {
        self.hwseq_words.end
    }
}

fn channel_words(config: &DmaConfig, channel: &Channel) -> [u32; 4] {
    let first_desc_id = config.hw_descriptor_id(channel.desc_index) & 0xFF;
    let cntl0 = first_desc_id
        | u32::from(channel.vdb_count) << 8
        | u32::from(channel.vdb_offset) << 16
        | u32::from(channel.rep_factor.raw() & 0x7) << CNTL0_REP_SHIFT
        | if channel.prefetch { CNTL0_PREFETCH } else { 0 }
        | u32::from(channel.req_per_grant & 0xF) << CNTL0_RPG_SHIFT;

    let seq = &channel.hwseq;
    let mut cntl1 = u32::from(channel.adb_offset & 0x3FF)
        | u32::from(channel.adb_count & 0x3FF) << CNTL1_ADB_COUNT_SHIFT;
    let mut window = 0;
    if seq.enabled {
        let flags = seq.flags();
        for (flag, bit) in [
            (HwseqFlags::TRIGGER_DONE, CNTL1_TRIGGER_DONE),
            (HwseqFlags::LOOPING, CNTL1_LOOP),
            (HwseqFlags::SPLIT_PADDING, CNTL1_SPLIT_PAD),
            (HwseqFlags::VERTICAL_MINING, CNTL1_VERTICAL),
        ] {
            if flags.contains(flag) {
                cntl1 |= bit;
            }
        }
        cntl1 |= CNTL1_HWSEQ_ENABLE;
        let base = config.header.base_hwseq_word;
        window = u32::from(base.wrapping_add(seq.start))
            | u32::from(base.wrapping_add(seq.end)) << 16;
    }
    [cntl0, cntl1, window, channel.pad_value]
}

fn xfer_word(config: &DmaConfig, desc: &Descriptor) -> u32 {
    let mode = |m: TransferMode| u32::from(m.raw() & 0x7);
    let dst2_mode = if desc.dst2_enabled() { mode(desc.dst2.mode) } else { 0 };
    let link = match desc.link() {
        Some(index) => config.hw_descriptor_id(index) & 0xFF,
        None => 0,
    };
    let byte0 = mode(desc.src.mode)
        | u32::from(desc.src.cb_enable) << 3
        | mode(desc.dst.mode) << 4
        | u32::from(desc.dst.cb_enable) << 7;
    let byte1 = dst2_mode
        | u32::from(desc.prefetch) << 3
        | u32::from(desc.log2_elem_size & 0x3) << 4
        | u32::from(desc.trigger_mode.raw() & 0x3) << 6;
    byte0 | byte1 << 8 | link << 16 | u32::from(desc.trigger_select) << 24
}

fn write_descriptor(config: &DmaConfig, desc: &Descriptor, addresses: &[u64; 3], out: &mut [u8]) {
    let lo = |a: u64| a as u32;
    let hi = |a: u64| ((a >> 32) & 0xFF) as u32;
    let rpt = |r: &[u8; 3]| u32::from(r[0]) | u32::from(r[1]) << 8 | u32::from(r[2]) << 16;

    let mut words = [0u32; FW_DESCRIPTOR_SIZE / 4];
    words[0] = lo(addresses[0]);
    words[1] = lo(addresses[1]);
    words[2] = lo(addresses[2]);
    words[3] = hi(addresses[0]) | hi(addresses[1]) << 8 | hi(addresses[2]) << 16;
    words[4] = xfer_word(config, desc);
    words[5] = u32::from(desc.tx) | u32::from(desc.ty) << 16;
    words[6] = u32::from(desc.px) | u32::from(desc.py) << 8;
    words[7] = desc.src.line_pitch;
    words[8] = desc.dst.line_pitch;
    words[9] = desc.src.cb_size;
    words[10] = desc.dst.cb_size;
    words[11] = rpt(&desc.src.rpt);
    words[12] = rpt(&desc.dst.rpt);
    for k in 0..3 {
        words[13 + k] = desc.src.adv[k] as u32;
        words[16 + k] = desc.dst.adv[k] as u32;
    }
    LittleEndian::write_u32_into(&words, out);
}

/// Lay the bound program out in `out`.
///
/// Nothing is written unless `out` can hold the whole blob.
pub fn write_blob(
    config: &DmaConfig,
    relocs: &RelocTables,
    bound: &BoundConfig,
    out: &mut [u8],
) -> Result<BlobLayout, DmaError> {
    let layout = BlobLayout::for_config(config, relocs);
    let total = layout.total_size();
    if out.len() < total {
        return Err(DmaError::BufferTooSmall {
            section: Section::Blob,
            needed: total as u64,
            available: out.len() as u64,
        });
    }
    let out = &mut out[..total];
    out.fill(0);

    let h = &config.header;
    let mut flags = BlobFlags::empty();
    flags.set(BlobFlags::HWSEQ, config.channels.iter().any(|c| c.hwseq.enabled));
    flags.set(BlobFlags::VPU_EXEC, h.vpu_exec.is_some());
    out[0] = h.base_channel;
    out[1] = h.num_channels;
    out[2] = h.base_descriptor;
    out[3] = h.num_descriptors;
    LittleEndian::write_u16(&mut out[4..], h.base_hwseq_word);
    LittleEndian::write_u16(&mut out[6..], h.num_hwseq_words);
    LittleEndian::write_u16(&mut out[8..], h.num_dynamic_slots);
    LittleEndian::write_u16(&mut out[10..], relocs.dynamic_relocs.len() as u16);
    LittleEndian::write_u32(&mut out[12..], flags.bits());

    for (i, slot) in relocs.dynamic_slots.iter().enumerate() {
        let at = layout.dynamic_slots.start + i * FW_DYN_SLOT_SIZE;
        let rec = &mut out[at..at + FW_DYN_SLOT_SIZE];
        LittleEndian::write_u16(&mut rec[0..], slot.flags.bits());
        LittleEndian::write_u16(&mut rec[2..], slot.reloc_start);
        LittleEndian::write_u16(&mut rec[4..], slot.reloc_count);
        let (start, end) = slot.envelope.map_or((0, 0), |e| (e.start.get(), e.end.get()));
        LittleEndian::write_i64(&mut rec[8..], start);
        LittleEndian::write_i64(&mut rec[16..], end);
    }

    for (i, reloc) in relocs.dynamic_relocs.iter().enumerate() {
        let at = layout.relocs.start + i * FW_RELOC_SIZE;
        out[at] = reloc.desc;
        out[at + 1] = reloc.field.raw();
    }

    for (i, channel) in config.channels.iter().enumerate() {
        let at = layout.channels.start + i * FW_CHANNEL_SIZE;
        LittleEndian::write_u32_into(
            &channel_words(config, channel),
            &mut out[at..at + FW_CHANNEL_SIZE],
        );
    }

    for (i, desc) in config.descriptors.iter().enumerate() {
        let at = layout.descriptors.start + i * FW_DESCRIPTOR_SIZE;
        let addresses = bound.addresses.get(i).copied().unwrap_or_default();
        write_descriptor(config, desc, &addresses, &mut out[at..at + FW_DESCRIPTOR_SIZE]);
    }

    let mut lanes = [0u16; hw::NUM_TRIGGER_LANES as usize];
    for (i, channel) in config.channels.iter().enumerate() {
        let bit = 1u16.checked_shl(u32::from(config.hw_channel_id(i as u8))).unwrap_or(0);
        for (lane, mask) in lanes.iter_mut().enumerate() {
            if channel.output_enable_mask & (1 << lane) != 0 {
                *mask |= bit;
            }
        }
    }
    LittleEndian::write_u16_into(&lanes, &mut out[layout.triggers.clone()]);

    let words = layout.hwseq_words.start;
    LittleEndian::write_u32_into(
        &config.hwseq_words,
        &mut out[words..words + config.hwseq_words.len() * 4],
    );

    log::debug!(
        "wrote {} byte blob, fetch {} bytes, {} dynamic relocs",
        total,
        layout.fetch_size(),
        relocs.dynamic_relocs.len()
    );
    Ok(layout)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FwHeader {
    pub base_channel: u8,
    pub num_channels: u8,
    pub base_descriptor: u8,
    pub num_descriptors: u8,
    pub base_hwseq_word: u16,
    pub num_hwseq_words: u16,
    pub num_dynamic_slots: u16,
    pub num_relocs: u16,
    pub flags: BlobFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FwDynSlot {
    pub flags: SlotFlags,
    pub reloc_start: u16,
    pub reloc_count: u16,
    pub access_start: i64,
    pub access_end: i64,
}

/// Channel record with its control words unpacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FwChannel {
    pub first_desc_id: u8,
    pub vdb_count: u8,
    pub vdb_offset: u8,
    pub rep_factor: u8,
    pub prefetch: bool,
    pub req_per_grant: u8,
    pub adb_offset: u16,
    pub adb_count: u16,
    /// Absolute sequencer window, when enabled.
    pub hwseq: Option<(u16, u16)>,
    pub vertical_mining: bool,
    pub split_padding: bool,
    pub looping: bool,
    pub trigger_done: bool,
    pub pad_value: u32,
}

/// Descriptor record with its transfer word unpacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FwDescriptor {
    /// src, dst and dst2 addresses.
    pub addresses: [u64; 3],
    /// Raw src, dst and dst2 transfer modes.
    pub modes: [u8; 3],
    pub src_circular: bool,
    pub dst_circular: bool,
    pub prefetch: bool,
    pub log2_elem_size: u8,
    pub trigger_mode: u8,
    /// Hardware id of the next descriptor, 0 at the end of a chain.
    pub link_hw_id: u8,
    pub trigger_select: u8,
    pub tx: u16,
    pub ty: u16,
    pub px: u8,
    pub py: u8,
    pub line_pitch: [u32; 2],
    pub cb_size: [u32; 2],
    pub rpt: [[u8; 3]; 2],
    pub adv: [[i32; 3]; 2],
}

impl FwDescriptor {
    pub fn mode(&self, field: DescField) -> Option<TransferMode> {
        TransferMode::from_raw(self.modes[usize::from(field.raw())])
    }

    pub fn trigger(&self) -> Option<TriggerMode> {
        TriggerMode::from_raw(self.trigger_mode)
    }
}

/// A decoded firmware blob, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FirmwareBlob {
    pub header: FwHeader,
    pub dynamic_slots: Vec<FwDynSlot>,
    /// Raw `(desc_index, field)` pairs; the field is checked by `Reloc`.
    pub relocs: Vec<(u8, u8)>,
    pub channels: Vec<FwChannel>,
    pub descriptors: Vec<FwDescriptor>,
    pub triggers: [u16; hw::NUM_TRIGGER_LANES as usize],
    pub hwseq_words: Vec<u32>,
}

fn read_words<const N: usize>(r: &mut Cursor<&[u8]>) -> io::Result<[u32; N]> {
    let mut words = [0u32; N];
    r.read_u32_into::<LittleEndian>(&mut words)?;
    Ok(words)
}

fn unpack_channel(words: [u32; 4]) -> FwChannel {
    let [cntl0, cntl1, window, pad_value] = words;
    let enabled = cntl1 & CNTL1_HWSEQ_ENABLE != 0;
    FwChannel {
        first_desc_id: cntl0 as u8,
        vdb_count: (cntl0 >> 8) as u8,
        vdb_offset: (cntl0 >> 16) as u8,
        rep_factor: ((cntl0 >> CNTL0_REP_SHIFT) & 0x7) as u8,
        prefetch: cntl0 & CNTL0_PREFETCH != 0,
        req_per_grant: (cntl0 >> CNTL0_RPG_SHIFT) as u8,
        adb_offset: (cntl1 & 0x3FF) as u16,
        adb_count: ((cntl1 >> CNTL1_ADB_COUNT_SHIFT) & 0x3FF) as u16,
        hwseq: enabled.then(|| (window as u16, (window >> 16) as u16)),
        vertical_mining: cntl1 & CNTL1_VERTICAL != 0,
        split_padding: cntl1 & CNTL1_SPLIT_PAD != 0,
        looping: cntl1 & CNTL1_LOOP != 0,
        trigger_done: cntl1 & CNTL1_TRIGGER_DONE != 0,
        pad_value,
    }
}

fn unpack_descriptor(w: [u32; FW_DESCRIPTOR_SIZE / 4]) -> FwDescriptor {
    let addr = |lo: u32, shift: u32| u64::from(lo) | u64::from((w[3] >> shift) & 0xFF) << 32;
    let rpt = |r: u32| [r as u8, (r >> 8) as u8, (r >> 16) as u8];
    let adv = |at: usize| [w[at] as i32, w[at + 1] as i32, w[at + 2] as i32];
    let xfer = w[4];
    FwDescriptor {
        addresses: [addr(w[0], 0), addr(w[1], 8), addr(w[2], 16)],
        modes: [(xfer & 0x7) as u8, ((xfer >> 4) & 0x7) as u8, ((xfer >> 8) & 0x7) as u8],
        src_circular: xfer & (1 << 3) != 0,
        dst_circular: xfer & (1 << 7) != 0,
        prefetch: xfer & (1 << 11) != 0,
        log2_elem_size: ((xfer >> 12) & 0x3) as u8,
        trigger_mode: ((xfer >> 14) & 0x3) as u8,
        link_hw_id: (xfer >> 16) as u8,
        trigger_select: (xfer >> 24) as u8,
        tx: w[5] as u16,
        ty: (w[5] >> 16) as u16,
        px: w[6] as u8,
        py: (w[6] >> 8) as u8,
        line_pitch: [w[7], w[8]],
        cb_size: [w[9], w[10]],
        rpt: [rpt(w[11]), rpt(w[12])],
        adv: [adv(13), adv(16)],
    }
}

impl FirmwareBlob {
    pub fn decode(blob: &[u8]) -> Result<Self, DmaError> {
        let truncated = |needed: usize| DmaError::BufferTooSmall {
            section: Section::Blob,
            needed: needed as u64,
            available: blob.len() as u64,
        };
        let mut r = Cursor::new(blob);
        let header = (|| -> io::Result<FwHeader> {
            Ok(FwHeader {
                base_channel: r.read_u8()?,
                num_channels: r.read_u8()?,
                base_descriptor: r.read_u8()?,
                num_descriptors: r.read_u8()?,
                base_hwseq_word: r.read_u16::<LittleEndian>()?,
                num_hwseq_words: r.read_u16::<LittleEndian>()?,
                num_dynamic_slots: r.read_u16::<LittleEndian>()?,
                num_relocs: r.read_u16::<LittleEndian>()?,
                flags: BlobFlags::from_bits_retain(r.read_u32::<LittleEndian>()?),
            })
        })()
        .map_err(|_| truncated(FW_HEADER_SIZE))?;

        let layout = BlobLayout::new(
            header.num_dynamic_slots.into(),
            header.num_relocs.into(),
            header.num_channels.into(),
            header.num_descriptors.into(),
            header.num_hwseq_words.into(),
        );
        if blob.len() < layout.total_size() {
            return Err(truncated(layout.total_size()));
        }
        let body = |r: &mut Cursor<&[u8]>| -> io::Result<FirmwareBlob> {
            let mut dynamic_slots = Vec::with_capacity(header.num_dynamic_slots.into());
            for _ in 0..header.num_dynamic_slots {
                let flags = SlotFlags::from_bits_retain(r.read_u16::<LittleEndian>()?);
                let reloc_start = r.read_u16::<LittleEndian>()?;
                let reloc_count = r.read_u16::<LittleEndian>()?;
                let _reserved = r.read_u16::<LittleEndian>()?;
                dynamic_slots.push(FwDynSlot {
                    flags,
                    reloc_start,
                    reloc_count,
                    access_start: r.read_i64::<LittleEndian>()?,
                    access_end: r.read_i64::<LittleEndian>()?,
                });
            }

            r.set_position(layout.relocs.start as u64);
            let relocs = (0..header.num_relocs)
                .map(|_| -> io::Result<(u8, u8)> { Ok((r.read_u8()?, r.read_u8()?)) })
                .collect::<io::Result<_>>()?;

            r.set_position(layout.channels.start as u64);
            let channels = (0..header.num_channels)
                .map(|_| read_words::<4>(r).map(unpack_channel))
                .collect::<io::Result<_>>()?;
            let descriptors = (0..header.num_descriptors)
                .map(|_| read_words::<{ FW_DESCRIPTOR_SIZE / 4 }>(r).map(unpack_descriptor))
                .collect::<io::Result<_>>()?;

            let mut triggers = [0u16; hw::NUM_TRIGGER_LANES as usize];
            r.read_u16_into::<LittleEndian>(&mut triggers)?;
            let mut hwseq_words = vec![0u32; header.num_hwseq_words.into()];
            r.read_u32_into::<LittleEndian>(&mut hwseq_words)?;

            Ok(FirmwareBlob {
                header,
                dynamic_slots,
                relocs,
                channels,
                descriptors,
                triggers,
                hwseq_words,
            })
        };
        body(&mut r).map_err(|_| truncated(layout.total_size()))
    }

    /// Relocs with their field decoded; `None` for an unknown field.
    pub fn typed_relocs(&self) -> impl Iterator<Item = Option<Reloc>> + '_ {
        self.relocs
            .iter()
            .map(|&(desc, field)| DescField::from_raw(field).map(|field| Reloc { desc, field }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::reloc::RelocSlot;
    use crate::dma::types::{AccessEntry, ReplicationFactor, SlotRef, TransferAttr};
    use crate::math::Offset;

    fn sample() -> (DmaConfig, RelocTables, BoundConfig) {
        let mut config = DmaConfig::default();
        config.header.base_channel = 2;
        config.header.base_descriptor = 4;
        config.header.base_hwseq_word = 100;
        config.header.num_dynamic_slots = 1;

        let mut ch = Channel::starting_at(1).with_hwseq(HwseqSettings {
            looping: true,
            ..HwseqSettings::window(0, 2)
        });
        ch.vdb_count = 8;
        ch.vdb_offset = 16;
        ch.adb_offset = 200;
        ch.adb_count = 56;
        ch.rep_factor = ReplicationFactor::Full;
        ch.req_per_grant = 3;
        ch.output_enable_mask = 0b101;
        ch.pad_value = 0xDEAD;
        config.channels.push(ch);

        let mut desc = Descriptor::new(
            32,
            8,
            TransferAttr::new(TransferMode::Dram, SlotRef::Dynamic(0)).with_line_pitch(4096),
            TransferAttr::new(TransferMode::Vmem, SlotRef::Static(0)).with_line_pitch(32).with_circular(512),
        )
        .with_link(2)
        .with_padding(2, 1)
        .with_trigger(TriggerMode::Dim4, 5);
        desc.src = desc.src.with_repeat(0, 3, -64).with_repeat(1, 1, 128);
        desc.log2_elem_size = 2;
        desc.prefetch = true;
        config.descriptors.push(desc);
        config.descriptors.push(Descriptor::new(
            1,
            1,
            TransferAttr::new(TransferMode::VpuConfig, SlotRef::None),
            TransferAttr::new(TransferMode::Vmem, SlotRef::Static(0)),
        ));
        config.hwseq_words = vec![0x0100_C0DE, 0x0000_0001, 0x0000_0001];
        config.header.num_channels = 1;
        config.header.num_descriptors = 2;
        config.header.num_hwseq_words = 3;

        let relocs = RelocTables {
            dynamic_slots: vec![RelocSlot {
                flags: SlotFlags::DRAM | SlotFlags::READ,
                envelope: Some(AccessEntry::new(Offset::new(-192), Offset::new(28800))),
                reloc_start: 0,
                reloc_count: 1,
                channels: 1 << 2,
            }],
            dynamic_relocs: vec![Reloc { desc: 0, field: DescField::Src }],
            ..Default::default()
        };
        let bound = BoundConfig {
            static_addresses: vec![0x12_3456_7890],
            addresses: vec![[0, 0x12_3456_7890, 0], [0, 0x12_3456_7890, 0]],
        };
        (config, relocs, bound)
    }

    #[test]
    fn test_layout() {
        let layout = BlobLayout::new(1, 3, 2, 4, 3);
        assert_eq!(layout.dynamic_slots, 16..40);
        // Three relocs take 6 bytes, padded to 8.
        assert_eq!(layout.relocs, 40..48);
        assert_eq!(layout.channels, 48..80);
        assert_eq!(layout.descriptors, 80..400);
        assert_eq!(layout.triggers, 400..416);
        assert_eq!(layout.fetch_size(), 416);
        assert_eq!(layout.total_size(), 416 + 16);
    }

    #[test]
    fn test_blob_round_trip() {
        let (config, relocs, bound) = sample();
        let layout = BlobLayout::for_config(&config, &relocs);
        let mut out = vec![0xAA; layout.total_size() + 8];
        assert_eq!(write_blob(&config, &relocs, &bound, &mut out).unwrap(), layout);
        // Bytes past the blob are left alone.
        assert_eq!(out[layout.total_size()], 0xAA);

        let blob = FirmwareBlob::decode(&out).unwrap();
        assert_eq!(blob.header.base_channel, 2);
        assert_eq!(blob.header.num_relocs, 1);
        assert_eq!(blob.header.flags, BlobFlags::HWSEQ);

        assert_eq!(blob.dynamic_slots[0].access_start, -192);
        assert_eq!(blob.dynamic_slots[0].access_end, 28800);
        assert_eq!(blob.typed_relocs().collect::<Vec<_>>(), vec![Some(relocs.dynamic_relocs[0])]);

        let ch = &blob.channels[0];
        assert_eq!(ch.first_desc_id, 4 + 1 + 1);
        assert_eq!((ch.vdb_count, ch.vdb_offset), (8, 16));
        assert_eq!((ch.adb_offset, ch.adb_count), (200, 56));
        assert_eq!(ch.rep_factor, hw::REP_FACTOR_FULL);
        assert_eq!(ch.req_per_grant, 3);
        assert_eq!(ch.hwseq, Some((100, 102)));
        assert!(ch.looping && !ch.vertical_mining && !ch.split_padding && !ch.trigger_done);
        assert_eq!(ch.pad_value, 0xDEAD);

        let d = &blob.descriptors[0];
        assert_eq!(d.mode(DescField::Src), Some(TransferMode::Dram));
        assert_eq!(d.mode(DescField::Dst), Some(TransferMode::Vmem));
        assert_eq!(d.mode(DescField::Dst2), Some(TransferMode::Invalid));
        assert_eq!(d.addresses[1], 0x12_3456_7890);
        assert!(!d.src_circular && d.dst_circular);
        assert!(d.prefetch);
        assert_eq!(d.log2_elem_size, 2);
        assert_eq!(d.trigger(), Some(TriggerMode::Dim4));
        assert_eq!(d.trigger_select, 5);
        // Link to index 1 is hardware id base + 2.
        assert_eq!(d.link_hw_id, 4 + 2);
        assert_eq!((d.tx, d.ty, d.px, d.py), (32, 8, 2, 1));
        assert_eq!(d.line_pitch, [4096, 32]);
        assert_eq!(d.cb_size, [0, 512]);
        assert_eq!(d.rpt[0], [3, 1, 0]);
        assert_eq!(d.adv[0], [-64, 128, 0]);

        assert_eq!(blob.descriptors[1].mode(DescField::Src), Some(TransferMode::VpuConfig));
        assert_eq!(blob.descriptors[1].link_hw_id, 0);

        // Lanes 0 and 2 fire for hardware channel 2.
        assert_eq!(blob.triggers, [1 << 2, 0, 1 << 2, 0, 0, 0, 0, 0]);
        assert_eq!(blob.hwseq_words, config.hwseq_words);
    }

    #[test]
    fn test_short_output_untouched() {
        let (config, relocs, bound) = sample();
        let total = BlobLayout::for_config(&config, &relocs).total_size();
        let mut out = vec![0xAA; total - 1];
        assert_eq!(
            write_blob(&config, &relocs, &bound, &mut out),
            Err(DmaError::BufferTooSmall {
                section: Section::Blob,
                needed: total as u64,
                available: (total - 1) as u64,
            })
        );
        assert!(out.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_decode_truncated() {
        let (config, relocs, bound) = sample();
        let mut out = vec![0; BlobLayout::for_config(&config, &relocs).total_size()];
        write_blob(&config, &relocs, &bound, &mut out).unwrap();
        assert!(matches!(
            FirmwareBlob::decode(&out[..out.len() - 8]),
            Err(DmaError::BufferTooSmall { section: Section::Blob, .. })
        ));
        assert!(FirmwareBlob::decode(&out[..4]).is_err());
    }
}
