//! Typed model of a parsed DMA program.
//!
//! Descriptors live in a flat arena (`DmaConfig::descriptors`) and refer to
//! each other by [`DescIndex`], never by pointer. Raw hardware encodings are
//! decoded into enums by [`super::parse`]; everything in this module is
//! already well-formed at the encoding level but not yet validated.

use std::fmt;

use bitflags::bitflags;

use crate::hw;
use crate::math::{MathError, Offset};
use crate::resource::ResourceId;

/// 0-based index into `DmaConfig::descriptors`.
pub type DescIndex = u8;

/// Memory a transfer side can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TransferMode {
    /// Side unused.
    #[default]
    Invalid = 0,
    /// External DRAM through the memory controller.
    Dram = 1,
    /// VPU vector memory.
    Vmem = 2,
    /// On-chip L2 SRAM.
    L2Sram = 3,
    /// Tightly coupled memory (test configurations only).
    Tcm = 4,
    /// Register space; only reachable from a VPU-config source.
    Mmio = 5,
    /// VPU configuration table fetch.
    VpuConfig = 6,
}

impl TransferMode {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::Invalid,
            1 => Self::Dram,
            2 => Self::Vmem,
            3 => Self::L2Sram,
            4 => Self::Tcm,
            5 => Self::Mmio,
            6 => Self::VpuConfig,
            _ => return None,
        })
    }

    #[inline]
    pub fn raw(self) -> u8 {
        self as u8
    }

    /// Memory kind of a slot this side points into, if the side uses slots.
    pub fn memory_kind(self) -> Option<MemoryKind> {
        match self {
            Self::Dram => Some(MemoryKind::Dram),
            Self::Vmem => Some(MemoryKind::Vmem),
            Self::L2Sram => Some(MemoryKind::L2Sram),
            _ => None,
        }
    }

    /// DRAM or L2: memory outside the VPU.
    #[inline]
    pub fn is_external(self) -> bool {
        matches!(self, Self::Dram | Self::L2Sram)
    }
}

/// Kind of memory behind a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    Dram,
    Vmem,
    L2Sram,
}

/// When a descriptor raises its trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TriggerMode {
    #[default]
    None = 0,
    /// After every third-dimension iteration (`rpt1` loop).
    Dim3 = 1,
    /// After every fourth-dimension iteration (`rpt2` loop).
    Dim4 = 2,
    /// On completion of a VPU configuration fetch.
    VpuConfig = 3,
}

impl TriggerMode {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::None,
            1 => Self::Dim3,
            2 => Self::Dim4,
            3 => Self::VpuConfig,
            _ => return None,
        })
    }

    #[inline]
    pub fn raw(self) -> u8 {
        self as u8
    }
}

/// One of the three address-carrying fields of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DescField {
    Src = 0,
    Dst = 1,
    Dst2 = 2,
}

impl DescField {
    pub const ALL: [DescField; 3] = [DescField::Src, DescField::Dst, DescField::Dst2];

    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    #[inline]
    pub fn raw(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn is_write(self) -> bool {
        !matches!(self, Self::Src)
    }
}

impl fmt::Display for DescField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Src => "src",
            Self::Dst => "dst",
            Self::Dst2 => "dst2",
        })
    }
}

/// Symbolic buffer reference.
///
/// Encoded in 16 bits: bits 15..14 are the tag (`00` none, `01` static,
/// `10` dynamic) and bits 13..0 are the slot id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SlotRef {
    #[default]
    None,
    /// Resolved at load time from a static binding.
    Static(u16),
    /// Resolved by firmware at submission time.
    Dynamic(u16),
}

impl SlotRef {
    const TAG_SHIFT: u16 = 14;
    const ID_MASK: u16 = (1 << Self::TAG_SHIFT) - 1;

    /// Decode a raw slot field. Returns `None` for the illegal `11` tag.
    pub fn decode(raw: u16) -> Option<Self> {
        let id = raw & Self::ID_MASK;
        match raw >> Self::TAG_SHIFT {
            0b00 if id == 0 => Some(Self::None),
            0b01 => Some(Self::Static(id)),
            0b10 => Some(Self::Dynamic(id)),
            _ => None,
        }
    }

    pub fn encode(self) -> u16 {
        match self {
            Self::None => 0,
            Self::Static(id) => (0b01 << Self::TAG_SHIFT) | (id & Self::ID_MASK),
            Self::Dynamic(id) => (0b10 << Self::TAG_SHIFT) | (id & Self::ID_MASK),
        }
    }

    #[inline]
    pub fn is_none(self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Static(id) => write!(f, "static:{id}"),
            Self::Dynamic(id) => write!(f, "dynamic:{id}"),
        }
    }
}

/// Per-direction transfer attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferAttr {
    pub mode: TransferMode,
    /// Circular buffer addressing (VMEM only).
    pub cb_enable: bool,
    /// Circular buffer extent in bytes.
    pub cb_size: u32,
    /// Additional iterations of dimensions 3, 4 and 5.
    pub rpt: [u8; 3],
    /// Signed byte advance applied per iteration of dimensions 3, 4 and 5.
    pub adv: [i32; 3],
    /// Bytes between tile lines.
    pub line_pitch: u32,
    pub slot: SlotRef,
    /// Byte offset from the slot base.
    pub offset: u64,
}

impl TransferAttr {
    pub fn new(mode: TransferMode, slot: SlotRef) -> Self {
        Self { mode, slot, ..Default::default() }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_line_pitch(mut self, line_pitch: u32) -> Self {
        self.line_pitch = line_pitch;
        self
    }

    /// Set the repeat count and advance of dimension `dim` (0, 1 or 2).
    pub fn with_repeat(mut self, dim: usize, rpt: u8, adv: i32) -> Self {
        self.rpt[dim] = rpt;
        self.adv[dim] = adv;
        self
    }

    pub fn with_circular(mut self, cb_size: u32) -> Self {
        self.cb_enable = true;
        self.cb_size = cb_size;
        self
    }

    /// True if every repeat and advance is zero.
    pub fn is_stationary(&self) -> bool {
        self.rpt.iter().all(|&r| r == 0) && self.adv.iter().all(|&a| a == 0)
    }

    /// Tiles laid out by the three repeat loops.
    pub fn tile_count(&self) -> u64 {
        self.rpt.iter().map(|&r| u64::from(r) + 1).product()
    }
}

/// One DMA transfer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Descriptor {
    /// Tile width in elements.
    pub tx: u16,
    /// Tile height in lines.
    pub ty: u16,
    /// Horizontal padding in elements.
    pub px: u8,
    /// Vertical padding in lines.
    pub py: u8,
    /// Raw link: 0 terminates the chain, otherwise `index + 1`.
    pub link_id: u8,
    pub trigger_mode: TriggerMode,
    pub trigger_select: u8,
    pub prefetch: bool,
    pub log2_elem_size: u8,
    pub src: TransferAttr,
    pub dst: TransferAttr,
    /// Secondary destination; mirrors the dst geometry.
    pub dst2: TransferAttr,
}

impl Descriptor {
    /// A `tx` x `ty` transfer between two sides.
    pub fn new(tx: u16, ty: u16, src: TransferAttr, dst: TransferAttr) -> Self {
        Self { tx, ty, src, dst, ..Default::default() }
    }

    pub fn with_link(mut self, link_id: u8) -> Self {
        self.link_id = link_id;
        self
    }

    pub fn with_padding(mut self, px: u8, py: u8) -> Self {
        self.px = px;
        self.py = py;
        self
    }

    pub fn with_trigger(mut self, mode: TriggerMode, select: u8) -> Self {
        self.trigger_mode = mode;
        self.trigger_select = select;
        self
    }

    pub fn with_dst2(mut self, dst2: TransferAttr) -> Self {
        self.dst2 = dst2;
        self
    }

    /// Index of the next descriptor in the chain.
    #[inline]
    pub fn link(&self) -> Option<DescIndex> {
        self.link_id.checked_sub(1)
    }

    #[inline]
    pub fn attr(&self, field: DescField) -> &TransferAttr {
        match field {
            DescField::Src => &self.src,
            DescField::Dst => &self.dst,
            DescField::Dst2 => &self.dst2,
        }
    }

    #[inline]
    pub fn elem_size(&self) -> u32 {
        1 << self.log2_elem_size.min(hw::MAX_LOG2_ELEM_SIZE)
    }

    #[inline]
    pub fn dst2_enabled(&self) -> bool {
        !self.dst2.slot.is_none()
    }

    /// Fields that address memory: src, dst and dst2 when enabled.
    pub fn active_fields(&self) -> impl Iterator<Item = DescField> + '_ {
        DescField::ALL
            .into_iter()
            .filter(move |f| *f != DescField::Dst2 || self.dst2_enabled())
    }

    /// The VMEM side of a VMEM<->external transfer, with the external side.
    pub fn vmem_pair(&self) -> Option<(DescField, DescField)> {
        match (self.src.mode, self.dst.mode) {
            (TransferMode::Vmem, m) if m.is_external() => Some((DescField::Src, DescField::Dst)),
            (m, TransferMode::Vmem) if m.is_external() => Some((DescField::Dst, DescField::Src)),
            _ => None,
        }
    }
}

/// Channel replication factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicationFactor {
    #[default]
    None,
    Full,
}

impl ReplicationFactor {
    pub fn raw(self) -> u8 {
        match self {
            Self::None => hw::REP_FACTOR_NONE,
            Self::Full => hw::REP_FACTOR_FULL,
        }
    }
}

/// Tile traversal order of a frame-mode sequencer program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Traversal {
    /// Tiles advance along a line, `tile_step` counted in elements.
    #[default]
    Raster,
    /// Tiles advance down a column strip, `tile_step` counted in lines.
    VerticalMining,
}

/// Where frame padding is applied along the traversal axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaddingMode {
    /// All padding on the last tile.
    #[default]
    Joined,
    /// Half on the leading edge of the first tile, the rest on the last.
    Split,
}

/// Sequencer settings of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HwseqSettings {
    pub enabled: bool,
    pub order: Traversal,
    pub padding: PaddingMode,
    /// Allow the VMEM side to advance between replays.
    pub looping: bool,
    pub trigger_done: bool,
    /// First word of the program, relative to the config's word array.
    pub start: u16,
    /// Last word of the program (inclusive).
    pub end: u16,
}

bitflags! {
    /// On-wire sequencer flag byte of a channel record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HwseqFlags: u8 {
        const ENABLE = 1 << 0;
        const VERTICAL_MINING = 1 << 1;
        const SPLIT_PADDING = 1 << 2;
        const LOOPING = 1 << 3;
        const TRIGGER_DONE = 1 << 4;
    }
}

impl HwseqSettings {
    /// A sequencer window covering words `start..=end`.
    pub fn window(start: u16, end: u16) -> Self {
        Self { enabled: true, start, end, ..Default::default() }
    }

    pub fn flags(&self) -> HwseqFlags {
        let mut flags = HwseqFlags::empty();
        flags.set(HwseqFlags::ENABLE, self.enabled);
        flags.set(HwseqFlags::VERTICAL_MINING, self.order == Traversal::VerticalMining);
        flags.set(HwseqFlags::SPLIT_PADDING, self.padding == PaddingMode::Split);
        flags.set(HwseqFlags::LOOPING, self.looping);
        flags.set(HwseqFlags::TRIGGER_DONE, self.trigger_done);
        flags
    }

    pub fn from_flags(flags: HwseqFlags, start: u16, end: u16) -> Self {
        Self {
            enabled: flags.contains(HwseqFlags::ENABLE),
            order: if flags.contains(HwseqFlags::VERTICAL_MINING) {
                Traversal::VerticalMining
            } else {
                Traversal::Raster
            },
            padding: if flags.contains(HwseqFlags::SPLIT_PADDING) {
                PaddingMode::Split
            } else {
                PaddingMode::Joined
            },
            looping: flags.contains(HwseqFlags::LOOPING),
            trigger_done: flags.contains(HwseqFlags::TRIGGER_DONE),
            start,
            end,
        }
    }
}

/// A hardware DMA lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Channel {
    /// Starting descriptor, 0-based within the config.
    pub desc_index: u8,
    pub vdb_offset: u8,
    pub vdb_count: u8,
    pub rep_factor: ReplicationFactor,
    pub req_per_grant: u8,
    pub prefetch: bool,
    pub hwseq: HwseqSettings,
    pub adb_offset: u16,
    pub adb_count: u16,
    /// One bit per trigger lane.
    pub output_enable_mask: u32,
    pub pad_value: u32,
}

impl Channel {
    pub fn starting_at(desc_index: u8) -> Self {
        Self { desc_index, ..Default::default() }
    }

    pub fn with_hwseq(mut self, hwseq: HwseqSettings) -> Self {
        self.hwseq = hwseq;
        self
    }
}

/// Where a static slot points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingTarget {
    /// A DRAM buffer from the resource table.
    Dram(ResourceId),
    /// A symbol of the program's VPU executable.
    Vmem(u32),
}

impl BindingTarget {
    pub const RAW_DRAM: u8 = 1;
    pub const RAW_VMEM: u8 = 2;

    pub fn memory_kind(self) -> MemoryKind {
        match self {
            Self::Dram(_) => MemoryKind::Dram,
            Self::Vmem(_) => MemoryKind::Vmem,
        }
    }
}

/// Load-time binding of one static slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticBinding {
    pub target: BindingTarget,
    /// Byte offset into the target.
    pub offset: u64,
}

/// Decoded config header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigHeader {
    pub base_channel: u8,
    pub num_channels: u8,
    pub base_descriptor: u8,
    pub num_descriptors: u8,
    pub base_hwseq_word: u16,
    pub num_hwseq_words: u16,
    pub num_static_slots: u16,
    pub num_dynamic_slots: u16,
    pub vpu_exec: Option<ResourceId>,
}

/// A parsed DMA program.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DmaConfig {
    pub header: ConfigHeader,
    pub channels: Vec<Channel>,
    pub descriptors: Vec<Descriptor>,
    pub hwseq_words: Vec<u32>,
    pub static_bindings: Vec<StaticBinding>,
}

impl DmaConfig {
    #[inline]
    pub fn descriptor(&self, index: DescIndex) -> Option<&Descriptor> {
        self.descriptors.get(index as usize)
    }

    /// Hardware id (1-based) of a descriptor index.
    #[inline]
    pub fn hw_descriptor_id(&self, index: DescIndex) -> u32 {
        u32::from(self.header.base_descriptor) + u32::from(index) + 1
    }

    /// Hardware channel id of a channel index.
    #[inline]
    pub fn hw_channel_id(&self, channel: u8) -> u8 {
        self.header.base_channel.saturating_add(channel)
    }
}

/// Signed half-open byte interval relative to a slot base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessEntry {
    pub start: Offset,
    pub end: Offset,
}

impl AccessEntry {
    pub fn new(start: Offset, end: Offset) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Zero-width entry at `at`.
    pub fn empty_at(at: Offset) -> Self {
        Self { start: at, end: at }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn len(&self) -> Result<Offset, MathError> {
        self.end - self.start
    }

    pub fn shift(self, by: Offset) -> Result<Self, MathError> {
        Ok(Self { start: (self.start + by)?, end: (self.end + by)? })
    }

    /// Smallest entry covering both. Empty entries do not widen anything.
    pub fn union(self, other: Self) -> Self {
        if other.is_empty() {
            return self;
        }
        if self.is_empty() {
            return other;
        }
        Self { start: self.start.min(other.start), end: self.end.max(other.end) }
    }
}

impl fmt::Display for AccessEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Computed entries of one descriptor. `None` for unused sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessSet {
    pub src: Option<AccessEntry>,
    pub dst: Option<AccessEntry>,
    pub dst2: Option<AccessEntry>,
}

impl AccessSet {
    pub fn get(&self, field: DescField) -> Option<AccessEntry> {
        match field {
            DescField::Src => self.src,
            DescField::Dst => self.dst,
            DescField::Dst2 => self.dst2,
        }
    }

    pub fn get_mut(&mut self, field: DescField) -> &mut Option<AccessEntry> {
        match field {
            DescField::Src => &mut self.src,
            DescField::Dst => &mut self.dst,
            DescField::Dst2 => &mut self.dst2,
        }
    }
}

/// One bit per descriptor index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescriptorSet(u128);

impl DescriptorSet {
    #[inline]
    pub fn insert(&mut self, index: DescIndex) -> bool {
        let bit = 1u128 << (index as u32 % 128);
        let fresh = self.0 & bit == 0;
        self.0 |= bit;
        fresh
    }

    #[inline]
    pub fn contains(&self, index: DescIndex) -> bool {
        index < 128 && self.0 & (1u128 << index) != 0
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.0.count_ones()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = DescIndex> + '_ {
        (0..128u8).filter(move |&i| self.contains(i))
    }
}
