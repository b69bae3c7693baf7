//! Client-side encoder for raw config buffers.
//!
//! The inverse of [`super::parse`]: lays a [`DmaConfig`] out in the raw
//! format with every section 8-byte aligned. Used by tools that produce
//! programs and by the tests, which patch the resulting bytes to build
//! malformed inputs.

use byteorder::{ByteOrder, LittleEndian};
use zerocopy::IntoBytes;

use super::header::{RawConfigHeader, HEADER_SIZE};
use super::parse::{
    BINDING_RECORD_SIZE, CHANNEL_RECORD_SIZE, DESCRIPTOR_ATTR_OFFSET, DESCRIPTOR_RECORD_SIZE,
    HWSEQ_WORD_SIZE, TRANSFER_ATTR_SIZE,
};
use super::types::{
    BindingTarget, Channel, Descriptor, DmaConfig, StaticBinding, TransferAttr,
};
use crate::hw;
use crate::resource::ResourceId;

fn align(n: usize) -> usize {
    let a = hw::SECTION_ALIGN as usize;
    (n + a - 1) & !(a - 1)
}

fn encode_channel(channel: &Channel, out: &mut [u8]) {
    out[0] = channel.desc_index;
    out[1] = channel.vdb_offset;
    out[2] = channel.vdb_count;
    out[3] = channel.rep_factor.raw();
    out[4] = channel.hwseq.flags().bits();
    out[5] = channel.req_per_grant;
    out[6] = channel.prefetch as u8;
    LittleEndian::write_u16(&mut out[8..], channel.hwseq.start);
    LittleEndian::write_u16(&mut out[10..], channel.hwseq.end);
    LittleEndian::write_u16(&mut out[12..], channel.adb_offset);
    LittleEndian::write_u16(&mut out[14..], channel.adb_count);
    LittleEndian::write_u32(&mut out[16..], channel.output_enable_mask);
    LittleEndian::write_u32(&mut out[20..], channel.pad_value);
}

fn encode_attr(attr: &TransferAttr, out: &mut [u8]) {
    out[0] = attr.mode.raw();
    out[1] = attr.cb_enable as u8;
    out[2..5].copy_from_slice(&attr.rpt);
    LittleEndian::write_u16(&mut out[6..], attr.slot.encode());
    LittleEndian::write_u32(&mut out[8..], attr.line_pitch);
    LittleEndian::write_i32_into(&attr.adv, &mut out[12..24]);
    LittleEndian::write_u32(&mut out[24..], attr.cb_size);
    LittleEndian::write_u64(&mut out[32..], attr.offset);
}

fn encode_descriptor(desc: &Descriptor, out: &mut [u8]) {
    LittleEndian::write_u16(&mut out[0..], desc.tx);
    LittleEndian::write_u16(&mut out[2..], desc.ty);
    out[4] = desc.px;
    out[5] = desc.py;
    out[6] = desc.link_id;
    out[7] = desc.trigger_mode.raw();
    out[8] = desc.trigger_select;
    out[9] = desc.prefetch as u8;
    out[10] = desc.log2_elem_size;
    for (i, attr) in [&desc.src, &desc.dst, &desc.dst2].into_iter().enumerate() {
        let at = DESCRIPTOR_ATTR_OFFSET + i * TRANSFER_ATTR_SIZE;
        encode_attr(attr, &mut out[at..at + TRANSFER_ATTR_SIZE]);
    }
}

fn encode_binding(binding: &StaticBinding, out: &mut [u8]) {
    let (kind, target) = match binding.target {
        BindingTarget::Dram(id) => (BindingTarget::RAW_DRAM, id),
        BindingTarget::Vmem(symbol) => (BindingTarget::RAW_VMEM, symbol),
    };
    out[0] = kind;
    LittleEndian::write_u32(&mut out[4..], target);
    LittleEndian::write_u64(&mut out[8..], binding.offset);
}

/// Lay `config` out as a raw buffer.
///
/// Section counts come from `config.header`, not from the vector lengths,
/// so a header that disagrees with its arrays is encoded as given.
pub fn encode(config: &DmaConfig) -> Vec<u8> {
    let h = &config.header;
    let channels_offset = HEADER_SIZE;
    let descriptors_offset = align(channels_offset + config.channels.len() * CHANNEL_RECORD_SIZE);
    let hwseq_offset =
        align(descriptors_offset + config.descriptors.len() * DESCRIPTOR_RECORD_SIZE);
    let bindings_offset = align(hwseq_offset + config.hwseq_words.len() * HWSEQ_WORD_SIZE);
    let total = align(bindings_offset + config.static_bindings.len() * BINDING_RECORD_SIZE);

    let mut out = vec![0u8; total];
    let raw_header = RawConfigHeader {
        base_channel: h.base_channel,
        num_channels: h.num_channels,
        base_descriptor: h.base_descriptor,
        num_descriptors: h.num_descriptors,
        base_hwseq_word: h.base_hwseq_word.to_le(),
        num_hwseq_words: h.num_hwseq_words.to_le(),
        num_static_slots: h.num_static_slots.to_le(),
        num_dynamic_slots: h.num_dynamic_slots.to_le(),
        vpu_exec_resource_id: h.vpu_exec.unwrap_or(0).to_le(),
        channels_offset: (channels_offset as u32).to_le(),
        descriptors_offset: (descriptors_offset as u32).to_le(),
        hwseq_words_offset: (hwseq_offset as u32).to_le(),
        static_bindings_offset: (bindings_offset as u32).to_le(),
    };
    out[..HEADER_SIZE].copy_from_slice(raw_header.as_bytes());

    for (i, channel) in config.channels.iter().enumerate() {
        let at = channels_offset + i * CHANNEL_RECORD_SIZE;
        encode_channel(channel, &mut out[at..at + CHANNEL_RECORD_SIZE]);
    }
    for (i, desc) in config.descriptors.iter().enumerate() {
        let at = descriptors_offset + i * DESCRIPTOR_RECORD_SIZE;
        encode_descriptor(desc, &mut out[at..at + DESCRIPTOR_RECORD_SIZE]);
    }
    LittleEndian::write_u32_into(
        &config.hwseq_words,
        &mut out[hwseq_offset..hwseq_offset + config.hwseq_words.len() * HWSEQ_WORD_SIZE],
    );
    for (i, binding) in config.static_bindings.iter().enumerate() {
        let at = bindings_offset + i * BINDING_RECORD_SIZE;
        encode_binding(binding, &mut out[at..at + BINDING_RECORD_SIZE]);
    }
    out
}

/// Builder for well-formed raw config buffers.
///
/// ```
/// use pva_dma::dma::encode::ConfigBuilder;
/// use pva_dma::dma::types::{Channel, Descriptor, SlotRef, TransferAttr, TransferMode};
///
/// let raw = ConfigBuilder::new()
///     .dynamic_slots(1)
///     .channel(Channel::starting_at(0))
///     .descriptor(Descriptor::new(
///         16,
///         1,
///         TransferAttr::new(TransferMode::Dram, SlotRef::Dynamic(0)),
///         TransferAttr::new(TransferMode::Vmem, SlotRef::Dynamic(0)),
///     ))
///     .build();
/// assert_eq!(raw.len() % 8, 0);
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: DmaConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Empty program on channel 1, descriptor base 0.
    pub fn new() -> Self {
        let mut config = DmaConfig::default();
        config.header.base_channel = 1;
        Self { config }
    }

    pub fn base_channel(mut self, base: u8) -> Self {
        self.config.header.base_channel = base;
        self
    }

    pub fn base_descriptor(mut self, base: u8) -> Self {
        self.config.header.base_descriptor = base;
        self
    }

    pub fn base_hwseq_word(mut self, base: u16) -> Self {
        self.config.header.base_hwseq_word = base;
        self
    }

    pub fn vpu_exec(mut self, id: ResourceId) -> Self {
        self.config.header.vpu_exec = Some(id);
        self
    }

    pub fn dynamic_slots(mut self, count: u16) -> Self {
        self.config.header.num_dynamic_slots = count;
        self
    }

    pub fn channel(mut self, channel: Channel) -> Self {
        self.config.channels.push(channel);
        self
    }

    pub fn descriptor(mut self, desc: Descriptor) -> Self {
        self.config.descriptors.push(desc);
        self
    }

    pub fn hwseq_words(mut self, words: impl IntoIterator<Item = u32>) -> Self {
        self.config.hwseq_words.extend(words);
        self
    }

    /// Append a binding for the next static slot id.
    pub fn static_binding(mut self, binding: StaticBinding) -> Self {
        self.config.static_bindings.push(binding);
        self
    }

    /// The typed config with header counts taken from the arrays.
    pub fn config(&self) -> DmaConfig {
        let mut config = self.config.clone();
        let h = &mut config.header;
        h.num_channels = u8::try_from(config.channels.len()).unwrap_or(u8::MAX);
        h.num_descriptors = u8::try_from(config.descriptors.len()).unwrap_or(u8::MAX);
        h.num_hwseq_words = u16::try_from(config.hwseq_words.len()).unwrap_or(u16::MAX);
        h.num_static_slots = u16::try_from(config.static_bindings.len()).unwrap_or(u16::MAX);
        config
    }

    pub fn build(&self) -> Vec<u8> {
        encode(&self.config())
    }
}
