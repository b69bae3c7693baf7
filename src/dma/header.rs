//! Bounds and header checking.
//!
//! The raw buffer starts with a fixed 32-byte header. Four variable-length
//! sections follow at header-declared offsets:
//!
//! ```text
//! +--------------------+ 0
//! | RawConfigHeader    |
//! +--------------------+ channels_offset        (8-byte aligned)
//! | channel x N        |  32 bytes each
//! +--------------------+ descriptors_offset     (8-byte aligned)
//! | descriptor x N     |  136 bytes each
//! +--------------------+ hwseq_words_offset     (8-byte aligned)
//! | u32 x N            |
//! +--------------------+ static_bindings_offset (8-byte aligned)
//! | binding x N        |  16 bytes each
//! +--------------------+
//! ```
//!
//! Nothing past this module touches the buffer without a range produced
//! here.

use std::ops::Range;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::parse::{
    BINDING_RECORD_SIZE, CHANNEL_RECORD_SIZE, DESCRIPTOR_RECORD_SIZE, HWSEQ_WORD_SIZE,
};
use super::types::ConfigHeader;
use crate::error::{DmaError, Section};
use crate::hw;
use crate::math::Offset;

/// On-wire header (32 bytes, little-endian).
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RawConfigHeader {
    pub base_channel: u8,
    pub num_channels: u8,
    pub base_descriptor: u8,
    pub num_descriptors: u8,
    pub base_hwseq_word: u16,
    pub num_hwseq_words: u16,
    pub num_static_slots: u16,
    pub num_dynamic_slots: u16,
    /// 0 when the program has no VPU executable.
    pub vpu_exec_resource_id: u32,
    pub channels_offset: u32,
    pub descriptors_offset: u32,
    pub hwseq_words_offset: u32,
    pub static_bindings_offset: u32,
}

pub const HEADER_SIZE: usize = std::mem::size_of::<RawConfigHeader>();

const _: () = assert!(HEADER_SIZE == 32);

impl RawConfigHeader {
    fn decode(&self) -> ConfigHeader {
        ConfigHeader {
            base_channel: self.base_channel,
            num_channels: self.num_channels,
            base_descriptor: self.base_descriptor,
            num_descriptors: self.num_descriptors,
            base_hwseq_word: u16::from_le(self.base_hwseq_word),
            num_hwseq_words: u16::from_le(self.num_hwseq_words),
            num_static_slots: u16::from_le(self.num_static_slots),
            num_dynamic_slots: u16::from_le(self.num_dynamic_slots),
            vpu_exec: match u32::from_le(self.vpu_exec_resource_id) {
                0 => None,
                id => Some(id),
            },
        }
    }
}

/// Byte ranges of the four sections inside the raw buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SectionLayout {
    pub channels: Range<usize>,
    pub descriptors: Range<usize>,
    pub hwseq_words: Range<usize>,
    pub static_bindings: Range<usize>,
}

/// Check the header against hardware limits and locate every section.
pub fn check_header(raw: &[u8]) -> Result<(ConfigHeader, SectionLayout), DmaError> {
    let (raw_header, _) = RawConfigHeader::read_from_prefix(raw).map_err(|_| {
        DmaError::BufferTooSmall {
            section: Section::Header,
            needed: HEADER_SIZE as u64,
            available: raw.len() as u64,
        }
    })?;
    let header = raw_header.decode();

    if header.base_channel == hw::RESERVED_CHANNEL {
        return Err(DmaError::ReservedBaseChannel);
    }
    check_limit(
        "num_channels",
        u64::from(header.base_channel) + u64::from(header.num_channels),
        hw::MAX_CHANNELS,
    )?;
    check_limit(
        "num_descriptors",
        u64::from(header.base_descriptor) + u64::from(header.num_descriptors),
        hw::MAX_DESCRIPTORS,
    )?;
    check_limit(
        "num_hwseq_words",
        u64::from(header.base_hwseq_word) + u64::from(header.num_hwseq_words),
        hw::MAX_HWSEQ_WORDS,
    )?;
    check_limit("num_static_slots", u64::from(header.num_static_slots), hw::MAX_STATIC_SLOTS)?;
    check_limit("num_dynamic_slots", u64::from(header.num_dynamic_slots), hw::MAX_DYNAMIC_SLOTS)?;

    let size = Offset::from_u64(raw.len() as u64)?;
    let layout = SectionLayout {
        channels: section_range(
            Section::Channels,
            raw_header.channels_offset,
            header.num_channels.into(),
            CHANNEL_RECORD_SIZE,
            size,
        )?,
        descriptors: section_range(
            Section::Descriptors,
            raw_header.descriptors_offset,
            header.num_descriptors.into(),
            DESCRIPTOR_RECORD_SIZE,
            size,
        )?,
        hwseq_words: section_range(
            Section::HwseqWords,
            raw_header.hwseq_words_offset,
            header.num_hwseq_words.into(),
            HWSEQ_WORD_SIZE,
            size,
        )?,
        static_bindings: section_range(
            Section::StaticBindings,
            raw_header.static_bindings_offset,
            header.num_static_slots.into(),
            BINDING_RECORD_SIZE,
            size,
        )?,
    };

    log::debug!(
        "Header accepted: {} channels from {}, {} descriptors from {}, {} hwseq words, \
         {} static / {} dynamic slots",
        header.num_channels,
        header.base_channel,
        header.num_descriptors,
        header.base_descriptor,
        header.num_hwseq_words,
        header.num_static_slots,
        header.num_dynamic_slots
    );
    Ok((header, layout))
}

fn check_limit(field: &'static str, value: u64, limit: u32) -> Result<(), DmaError> {
    if value > u64::from(limit) {
        return Err(DmaError::HeaderOutOfRange { field, value, limit: limit.into() });
    }
    Ok(())
}

fn section_range(
    section: Section,
    offset: u32,
    count: u32,
    record_size: usize,
    size: Offset,
) -> Result<Range<usize>, DmaError> {
    let start = Offset::from(u32::from_le(offset));
    if !start.is_aligned(hw::SECTION_ALIGN) {
        return Err(DmaError::Misaligned { section, offset: start.to_u64()? });
    }
    let len = (Offset::from(count) * Offset::from_u64(record_size as u64)?)?;
    let end = (start + len)?;
    if end > size {
        return Err(DmaError::SectionOutOfBounds {
            section,
            end: end.to_u64()?,
            size: size.to_u64()?,
        });
    }
    Ok(start.to_usize()?..end.to_usize()?)
}
