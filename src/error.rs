//! Error taxonomy for DMA program validation and loading.
//!
//! Every failure is terminal for the load call. [`DmaError::kind`] sorts
//! errors into the four classes callers care about: structural damage to
//! the buffer, semantically illegal programs, arithmetic overflow in the
//! range model, and resource failures (which also roll back acquisitions).

use std::fmt;

use thiserror::Error;

use crate::dma::types::{DescField, MemoryKind, SlotRef, TransferMode, TriggerMode};
use crate::math::MathError;
use crate::resource::{ResourceId, ResourceKind};

/// Coarse error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Header or section bounds violated, misalignment, short buffer.
    Structural,
    /// Illegal program contents.
    Semantic,
    /// Checked arithmetic overflowed.
    Arithmetic,
    /// Resource lookup, type or size failure.
    Resource,
}

/// Variable-length section of the raw config buffer or the output blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Header,
    Channels,
    Descriptors,
    HwseqWords,
    StaticBindings,
    Blob,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Header => "header",
            Self::Channels => "channel",
            Self::Descriptors => "descriptor",
            Self::HwseqWords => "hwseq word",
            Self::StaticBindings => "static binding",
            Self::Blob => "firmware blob",
        })
    }
}

/// Why a channel was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelFault {
    #[error("starting descriptor index {0} is out of range")]
    DescriptorOutOfRange(u8),
    #[error("starting descriptor id {0} is reserved")]
    DescriptorReserved(u32),
    #[error("VDB range {offset}+{count} exceeds the VDB budget")]
    VdbOverflow { offset: u8, count: u8 },
    #[error("ADB range {offset}+{count} exceeds the ADB budget")]
    AdbOverflow { offset: u16, count: u16 },
    #[error("partial replication factor {0} is not supported")]
    PartialReplication(u8),
    #[error("unknown replication factor {0}")]
    UnknownReplication(u8),
    #[error("requests per grant {0} does not fit 4 bits")]
    RequestsPerGrant(u8),
    #[error("output enable mask 0x{0:x} uses lanes beyond the trigger bitmap")]
    TriggerMaskOutOfRange(u32),
    #[error("sequencer fields set on a channel without sequencing")]
    StrayHwseqFields,
    #[error("unknown sequencer flags 0x{0:02x}")]
    UnknownHwseqFlags(u8),
}

/// Why a descriptor was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorFault {
    #[error("padding {pad} on axis {axis} is not smaller than the tile ({tile})")]
    PaddingTooLarge { axis: char, pad: u8, tile: u16 },
    #[error("padding requires a VMEM destination")]
    PaddingNotToVmem,
    #[error("trigger {trigger:?} is incompatible with {src:?} -> {dst:?}")]
    TriggerMismatch { trigger: TriggerMode, src: TransferMode, dst: TransferMode },
    #[error("{field} repeat {rpt} and advance {adv} must both be zero or both be non-zero")]
    PartialGatedRepeat { field: DescField, rpt: u8, adv: i32 },
    #[error("illegal transfer {src:?} -> {dst:?}")]
    IllegalTransfer { src: TransferMode, dst: TransferMode },
    #[error("TCM destination is only allowed in test configurations")]
    TcmNotAllowed,
    #[error("prefetch requires a non-empty DRAM -> VMEM transfer")]
    PrefetchNotAllowed,
    #[error("linked descriptor id {0} is out of range")]
    LinkOutOfRange(u8),
    #[error("linked descriptor id {0} is reserved")]
    LinkReserved(u32),
    #[error("{field} circular buffer requires VMEM")]
    CircularNotVmem { field: DescField },
    #[error("{field} circular buffer has zero size")]
    CircularSizeZero { field: DescField },
    #[error("{field} tile footprint {extent} does not fit circular buffer of {cb_size} bytes")]
    TileExceedsCircular { field: DescField, extent: i64, cb_size: u32 },
    #[error("{field} offset {offset} lies outside its circular buffer of {cb_size} bytes")]
    CircularOffset { field: DescField, offset: u64, cb_size: u32 },
    #[error("{field} transfer mode {mode:?} needs a slot")]
    MissingSlot { field: DescField, mode: TransferMode },
    #[error("{field} transfer mode {mode:?} cannot reference slot {slot}")]
    UnexpectedSlot { field: DescField, mode: TransferMode, slot: SlotRef },
    #[error("dst2 mode {dst2:?} differs from dst mode {dst:?}")]
    Dst2ModeMismatch { dst: TransferMode, dst2: TransferMode },
    #[error("element size 2^{0} is not supported")]
    ElementSizeTooLarge(u8),
    #[error("{field} references {slot} beyond the slot table")]
    SlotOutOfRange { field: DescField, slot: SlotRef },
    #[error("{field} slot field 0x{raw:04x} has an illegal tag")]
    IllegalSlotTag { field: DescField, raw: u16 },
    #[error("{field} has unknown transfer mode {raw}")]
    UnknownTransferMode { field: DescField, raw: u8 },
    #[error("unknown trigger mode {0}")]
    UnknownTriggerMode(u8),
    #[error("{field} advances in dimension 5 without repeating it")]
    DanglingAdvance { field: DescField },
}

/// Why a sequencer program was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HwseqFault {
    #[error("window end {end} precedes start {start}")]
    WindowReversed { start: u16, end: u16 },
    #[error("window end {end} is beyond the {words} supplied words")]
    WindowOutOfRange { end: u16, words: u16 },
    #[error("window overlaps the program of channel {other}")]
    WindowOverlap { other: u8 },
    #[error("program reads past its window at word {at}")]
    Truncated { at: u32 },
    #[error("unknown program tag 0x{0:04x}")]
    UnknownTag(u16),
    #[error("program declares no groups or columns")]
    EmptyProgram,
    #[error("group {group} has no descriptor entries")]
    EmptyGroup { group: usize },
    #[error("descriptor-mode group {group} carries an address offset")]
    GroupOffset { group: usize },
    #[error("descriptor id 0 is not a descriptor")]
    NullDescriptor,
    #[error("descriptor id {0} is out of range")]
    DescriptorOutOfRange(u8),
    #[error("descriptor id {0} is reserved")]
    DescriptorReserved(u32),
    #[error("frame group {group} has {entries} entries, expected head and optional tail")]
    FrameGroupSize { group: usize, entries: usize },
    #[error("descriptor {desc} has an empty tile")]
    TileEmpty { desc: u8 },
    #[error("head descriptor {desc} is padded")]
    HeadPadded { desc: u8 },
    #[error("descriptor {desc} does not move data between VMEM and memory")]
    NoVmemSide { desc: u8 },
    #[error("tail descriptor {tail} disagrees with head {head} on direction or geometry")]
    TailMismatch { head: u8, tail: u8 },
    #[error("descriptor {desc} advances its VMEM side but looping is disabled")]
    VmemAdvance { desc: u8 },
    #[error("descriptor {desc} tile footprint {extent} exceeds circular buffer of {cb_size} bytes")]
    CircularTooSmall { desc: u8, extent: i64, cb_size: u32 },
    #[error("program replays {replayed} tiles but descriptor {desc} lays out {vmem} VMEM tiles")]
    VmemTileMismatch { desc: u8, replayed: u64, vmem: u64 },
    #[error("frame padding {pad} leaves no data in a tile of {len}")]
    PaddingTooLarge { pad: u32, len: u32 },
    #[error("program replays {0} tiles")]
    TooManyTiles(u64),
    #[error("frame bounding box is empty")]
    EmptyFrame,
    #[error("RRA program has {0} columns")]
    TooManyColumns(u8),
    #[error("RRA frame repeat {0} exceeds the limit")]
    FrameRepeatTooLarge(u8),
}

/// Failure of a validation or load call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DmaError {
    // Structural
    #[error("buffer too small for {section}: need {needed} bytes, have {available}")]
    BufferTooSmall { section: Section, needed: u64, available: u64 },

    #[error("base channel 0 is reserved for firmware")]
    ReservedBaseChannel,

    #[error("header field {field} = {value} exceeds limit {limit}")]
    HeaderOutOfRange { field: &'static str, value: u64, limit: u64 },

    #[error("{section} section offset 0x{offset:x} is not 8-byte aligned")]
    Misaligned { section: Section, offset: u64 },

    #[error("{section} section ends at 0x{end:x}, past buffer size 0x{size:x}")]
    SectionOutOfBounds { section: Section, end: u64, size: u64 },

    // Semantic
    #[error("invalid DMA configuration: channel {channel}: {reason}")]
    InvalidChannel { channel: u8, reason: ChannelFault },

    #[error("invalid DMA configuration: descriptor {index}: {reason}")]
    InvalidDescriptor { index: u8, reason: DescriptorFault },

    #[error("hwseq invalid: channel {channel}: {reason}")]
    HwseqInvalid { channel: u8, reason: HwseqFault },

    #[error("slot {slot} is used as both {first:?} and {second:?}")]
    SlotKindConflict { slot: SlotRef, first: MemoryKind, second: MemoryKind },

    #[error("static binding {slot}: {reason}")]
    InvalidBinding { slot: u16, reason: &'static str },

    // Arithmetic
    #[error("arithmetic error: {0}")]
    Math(#[from] MathError),

    // Resource
    #[error("resource {id} not found")]
    ResourceNotFound { id: ResourceId },

    #[error("resource {id} is {found:?}, expected {expected:?}")]
    WrongResourceType { id: ResourceId, expected: ResourceKind, found: ResourceKind },

    #[error("VMEM binding for slot {slot} without a VPU executable")]
    MissingExecutable { slot: u16 },

    #[error("symbol {symbol} not found in executable {exec}")]
    SymbolNotFound { exec: ResourceId, symbol: u32 },

    #[error("static slot {slot} access [{start}, {end}) exceeds resource size {limit}")]
    AccessOutOfRange { slot: u16, start: i64, end: i64, limit: u64 },

    #[error("descriptor {index} {field} address 0x{address:x} exceeds the hardware address width")]
    AddressTooWide { index: u8, field: DescField, address: u64 },
}

impl DmaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BufferTooSmall { .. }
            | Self::ReservedBaseChannel
            | Self::HeaderOutOfRange { .. }
            | Self::Misaligned { .. }
            | Self::SectionOutOfBounds { .. } => ErrorKind::Structural,

            Self::InvalidChannel { .. }
            | Self::InvalidDescriptor { .. }
            | Self::HwseqInvalid { .. }
            | Self::SlotKindConflict { .. }
            | Self::InvalidBinding { .. } => ErrorKind::Semantic,

            Self::Math(_) => ErrorKind::Arithmetic,

            Self::ResourceNotFound { .. }
            | Self::WrongResourceType { .. }
            | Self::MissingExecutable { .. }
            | Self::SymbolNotFound { .. }
            | Self::AccessOutOfRange { .. }
            | Self::AddressTooWide { .. } => ErrorKind::Resource,
        }
    }

    pub(crate) fn channel(channel: u8, reason: ChannelFault) -> Self {
        Self::InvalidChannel { channel, reason }
    }

    pub(crate) fn descriptor(index: u8, reason: DescriptorFault) -> Self {
        Self::InvalidDescriptor { index, reason }
    }

    pub(crate) fn hwseq(channel: u8, reason: HwseqFault) -> Self {
        Self::HwseqInvalid { channel, reason }
    }
}
