//! Channel and descriptor validation.
//!
//! Both passes are fail-fast: the first offending channel or descriptor is
//! reported and nothing after it is looked at.

use super::loader::ValidationOptions;
use super::types::{
    Channel, ConfigHeader, DescField, DescIndex, Descriptor, DmaConfig, SlotRef, TransferMode,
    TriggerMode,
};
use crate::error::{ChannelFault, DescriptorFault, DmaError};
use crate::hw;

/// Why a 1-based relative descriptor id failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdFault {
    /// Id 0 where a descriptor is required.
    Null,
    OutOfRange(u8),
    /// Hardware id inside the firmware-reserved range.
    Reserved(u32),
}

/// Resolve a 1-based relative descriptor id (link or sequencer entry).
pub(crate) fn resolve_desc_id(header: &ConfigHeader, id: u8) -> Result<DescIndex, IdFault> {
    let index = id.checked_sub(1).ok_or(IdFault::Null)?;
    if index >= header.num_descriptors {
        return Err(IdFault::OutOfRange(id));
    }
    let hw_id = u32::from(header.base_descriptor) + u32::from(id);
    if hw::is_reserved_descriptor(hw_id) {
        return Err(IdFault::Reserved(hw_id));
    }
    Ok(index)
}

pub fn validate_channels(config: &DmaConfig) -> Result<(), DmaError> {
    for (i, channel) in config.channels.iter().enumerate() {
        // num_channels is a u8, so the index is too.
        let index = i as u8;
        check_channel(config, channel).map_err(|reason| DmaError::channel(index, reason))?;
    }
    log::debug!("{} channels validated", config.channels.len());
    Ok(())
}

fn check_channel(config: &DmaConfig, channel: &Channel) -> Result<(), ChannelFault> {
    // Starting index is 0-based, so its id is index + 1.
    let start_id = channel.desc_index.saturating_add(1);
    match resolve_desc_id(&config.header, start_id) {
        Ok(_) => {}
        Err(IdFault::Reserved(hw_id)) => return Err(ChannelFault::DescriptorReserved(hw_id)),
        Err(_) => return Err(ChannelFault::DescriptorOutOfRange(channel.desc_index)),
    }

    if u32::from(channel.vdb_offset) + u32::from(channel.vdb_count) > hw::MAX_VDB {
        return Err(ChannelFault::VdbOverflow {
            offset: channel.vdb_offset,
            count: channel.vdb_count,
        });
    }
    if u32::from(channel.adb_offset) + u32::from(channel.adb_count) > hw::MAX_ADB {
        return Err(ChannelFault::AdbOverflow {
            offset: channel.adb_offset,
            count: channel.adb_count,
        });
    }
    if channel.req_per_grant > 0xF {
        return Err(ChannelFault::RequestsPerGrant(channel.req_per_grant));
    }
    if channel.output_enable_mask >> hw::NUM_TRIGGER_LANES != 0 {
        return Err(ChannelFault::TriggerMaskOutOfRange(channel.output_enable_mask));
    }

    let hwseq = &channel.hwseq;
    if !hwseq.enabled && (!hwseq.flags().is_empty() || hwseq.start != 0 || hwseq.end != 0) {
        return Err(ChannelFault::StrayHwseqFields);
    }
    Ok(())
}

pub fn validate_descriptors(
    config: &DmaConfig,
    options: &ValidationOptions,
) -> Result<(), DmaError> {
    for (i, desc) in config.descriptors.iter().enumerate() {
        let index = i as DescIndex;
        check_descriptor(&config.header, desc, options)
            .map_err(|reason| DmaError::descriptor(index, reason))?;
        log::trace!(
            "descriptor {}: {:?} -> {:?} {}x{} link {}",
            index,
            desc.src.mode,
            desc.dst.mode,
            desc.tx,
            desc.ty,
            desc.link_id
        );
    }
    log::debug!("{} descriptors validated", config.descriptors.len());
    Ok(())
}

fn check_descriptor(
    header: &ConfigHeader,
    desc: &Descriptor,
    options: &ValidationOptions,
) -> Result<(), DescriptorFault> {
    if desc.log2_elem_size > hw::MAX_LOG2_ELEM_SIZE {
        return Err(DescriptorFault::ElementSizeTooLarge(desc.log2_elem_size));
    }
    check_slots(header, desc)?;
    check_transfer(desc.src.mode, desc.dst.mode, options)?;
    check_padding(desc)?;
    check_trigger(desc)?;

    if desc.prefetch
        && !(desc.src.mode == TransferMode::Dram
            && desc.dst.mode == TransferMode::Vmem
            && desc.tx > 0
            && desc.ty > 0)
    {
        return Err(DescriptorFault::PrefetchNotAllowed);
    }

    for field in desc.active_fields() {
        let attr = desc.attr(field);
        if !attr.cb_enable {
            continue;
        }
        if attr.mode != TransferMode::Vmem {
            return Err(DescriptorFault::CircularNotVmem { field });
        }
        if attr.cb_size == 0 {
            return Err(DescriptorFault::CircularSizeZero { field });
        }
    }

    if desc.link_id != 0 {
        match resolve_desc_id(header, desc.link_id) {
            Ok(_) => {}
            Err(IdFault::Reserved(hw_id)) => return Err(DescriptorFault::LinkReserved(hw_id)),
            Err(_) => return Err(DescriptorFault::LinkOutOfRange(desc.link_id)),
        }
    }
    Ok(())
}

/// Slot presence, dst2 pairing and namespace bounds.
fn check_slots(header: &ConfigHeader, desc: &Descriptor) -> Result<(), DescriptorFault> {
    if desc.dst2_enabled() {
        if desc.dst2.mode != desc.dst.mode {
            return Err(DescriptorFault::Dst2ModeMismatch {
                dst: desc.dst.mode,
                dst2: desc.dst2.mode,
            });
        }
    } else if desc.dst2.mode != TransferMode::Invalid {
        return Err(DescriptorFault::MissingSlot { field: DescField::Dst2, mode: desc.dst2.mode });
    }

    for field in desc.active_fields() {
        let attr = desc.attr(field);
        match (attr.mode.memory_kind(), attr.slot) {
            (Some(_), SlotRef::None) => {
                return Err(DescriptorFault::MissingSlot { field, mode: attr.mode })
            }
            (None, slot @ (SlotRef::Static(_) | SlotRef::Dynamic(_))) => {
                return Err(DescriptorFault::UnexpectedSlot { field, mode: attr.mode, slot })
            }
            (_, slot @ SlotRef::Static(id)) if id >= header.num_static_slots => {
                return Err(DescriptorFault::SlotOutOfRange { field, slot })
            }
            (_, slot @ SlotRef::Dynamic(id)) if id >= header.num_dynamic_slots => {
                return Err(DescriptorFault::SlotOutOfRange { field, slot })
            }
            _ => {}
        }
    }
    Ok(())
}

/// Hardware-legal src/dst pairs.
fn check_transfer(
    src: TransferMode,
    dst: TransferMode,
    options: &ValidationOptions,
) -> Result<(), DescriptorFault> {
    use TransferMode::*;

    match (src, dst) {
        (_, Tcm) if !options.allow_tcm => Err(DescriptorFault::TcmNotAllowed),
        (Vmem, Tcm) => Ok(()),
        (Dram, Dram) | (L2Sram, L2Sram) | (Dram, L2Sram) | (L2Sram, Dram) => {
            Err(DescriptorFault::IllegalTransfer { src, dst })
        }
        (Vmem | Dram | L2Sram, Vmem | Dram | L2Sram) => Ok(()),
        (VpuConfig, Mmio | Vmem) => Ok(()),
        _ => Err(DescriptorFault::IllegalTransfer { src, dst }),
    }
}

fn check_padding(desc: &Descriptor) -> Result<(), DescriptorFault> {
    if desc.px != 0 && u16::from(desc.px) >= desc.tx {
        return Err(DescriptorFault::PaddingTooLarge { axis: 'x', pad: desc.px, tile: desc.tx });
    }
    if desc.py != 0 && u16::from(desc.py) >= desc.ty {
        return Err(DescriptorFault::PaddingTooLarge { axis: 'y', pad: desc.py, tile: desc.ty });
    }
    if (desc.px != 0 || desc.py != 0) && desc.dst.mode != TransferMode::Vmem {
        return Err(DescriptorFault::PaddingNotToVmem);
    }
    Ok(())
}

fn check_trigger(desc: &Descriptor) -> Result<(), DescriptorFault> {
    let (src, dst) = (desc.src.mode, desc.dst.mode);
    let mismatch = DescriptorFault::TriggerMismatch { trigger: desc.trigger_mode, src, dst };

    let gated_dim = match desc.trigger_mode {
        TriggerMode::None => return Ok(()),
        TriggerMode::VpuConfig => {
            return if src == TransferMode::VpuConfig { Ok(()) } else { Err(mismatch) };
        }
        TriggerMode::Dim3 => 0,
        TriggerMode::Dim4 => 1,
    };

    let register_side = |m: TransferMode| matches!(m, TransferMode::Mmio | TransferMode::VpuConfig);
    if register_side(src) || register_side(dst) {
        return Err(mismatch);
    }
    if src != TransferMode::Vmem && dst != TransferMode::Vmem {
        return Err(mismatch);
    }

    for field in [DescField::Src, DescField::Dst] {
        let attr = desc.attr(field);
        if attr.mode != TransferMode::Vmem {
            continue;
        }
        let (rpt, adv) = (attr.rpt[gated_dim], attr.adv[gated_dim]);
        if (rpt == 0) != (adv == 0) {
            return Err(DescriptorFault::PartialGatedRepeat { field, rpt, adv });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::types::{HwseqSettings, TransferAttr};

    fn dram_to_vmem() -> Descriptor {
        Descriptor::new(
            8,
            8,
            TransferAttr::new(TransferMode::Dram, SlotRef::Dynamic(0)).with_line_pitch(8),
            TransferAttr::new(TransferMode::Vmem, SlotRef::Static(0)).with_line_pitch(8),
        )
    }

    fn config_with(descriptors: Vec<Descriptor>, channels: Vec<Channel>) -> DmaConfig {
        let mut config = DmaConfig { channels, descriptors, ..Default::default() };
        config.header.base_channel = 1;
        config.header.num_channels = config.channels.len() as u8;
        config.header.num_descriptors = config.descriptors.len() as u8;
        config.header.num_static_slots = 1;
        config.header.num_dynamic_slots = 1;
        config
    }

    fn check(desc: Descriptor) -> Result<(), DescriptorFault> {
        let config = config_with(vec![desc, dram_to_vmem()], vec![]);
        check_descriptor(&config.header, &desc, &ValidationOptions::default())
    }

    #[test]
    fn test_resolve_desc_id() {
        let mut header = ConfigHeader { num_descriptors: 10, ..Default::default() };
        assert_eq!(resolve_desc_id(&header, 0), Err(IdFault::Null));
        assert_eq!(resolve_desc_id(&header, 1), Ok(0));
        assert_eq!(resolve_desc_id(&header, 10), Ok(9));
        assert_eq!(resolve_desc_id(&header, 11), Err(IdFault::OutOfRange(11)));

        header.base_descriptor = 58;
        // Relative id 3 is hardware id 61.
        assert_eq!(resolve_desc_id(&header, 2), Ok(1));
        assert_eq!(resolve_desc_id(&header, 3), Err(IdFault::Reserved(61)));
    }

    #[test]
    fn test_channel_rules() {
        let desc = dram_to_vmem();
        let config = config_with(vec![desc], vec![Channel::starting_at(1)]);
        assert_eq!(
            validate_channels(&config),
            Err(DmaError::channel(0, ChannelFault::DescriptorOutOfRange(1)))
        );

        let mut channel = Channel::starting_at(0);
        channel.vdb_offset = 120;
        channel.vdb_count = 9;
        let config = config_with(vec![desc], vec![channel]);
        assert!(matches!(
            validate_channels(&config),
            Err(DmaError::InvalidChannel { reason: ChannelFault::VdbOverflow { .. }, .. })
        ));

        let mut channel = Channel::starting_at(0);
        channel.adb_offset = 200;
        channel.adb_count = 57;
        let config = config_with(vec![desc], vec![channel]);
        assert_eq!(
            validate_channels(&config),
            Err(DmaError::channel(0, ChannelFault::AdbOverflow { offset: 200, count: 57 }))
        );
        channel.adb_count = 56;
        let config = config_with(vec![desc], vec![channel]);
        assert_eq!(validate_channels(&config), Ok(()));

        let mut channel = Channel::starting_at(0);
        channel.output_enable_mask = 0x100;
        let config = config_with(vec![desc], vec![channel]);
        assert!(matches!(
            validate_channels(&config),
            Err(DmaError::InvalidChannel { reason: ChannelFault::TriggerMaskOutOfRange(0x100), .. })
        ));

        let mut channel = Channel::starting_at(0);
        channel.hwseq = HwseqSettings { start: 3, ..Default::default() };
        let config = config_with(vec![desc], vec![channel]);
        assert!(matches!(
            validate_channels(&config),
            Err(DmaError::InvalidChannel { reason: ChannelFault::StrayHwseqFields, .. })
        ));
    }

    #[test]
    fn test_channel_reserved_start() {
        let mut config = config_with(vec![dram_to_vmem(); 4], vec![Channel::starting_at(2)]);
        config.header.base_descriptor = 58;
        assert_eq!(
            validate_channels(&config),
            Err(DmaError::channel(0, ChannelFault::DescriptorReserved(61)))
        );
    }

    #[test]
    fn test_first_offending_channel_reported() {
        let desc = dram_to_vmem();
        let mut bad = Channel::starting_at(0);
        bad.req_per_grant = 16;
        let config = config_with(vec![desc], vec![Channel::starting_at(0), bad, Channel::starting_at(5)]);
        assert_eq!(
            validate_channels(&config),
            Err(DmaError::channel(1, ChannelFault::RequestsPerGrant(16)))
        );
    }

    #[test]
    fn test_padding_rules() {
        assert!(check(dram_to_vmem().with_padding(2, 2)).is_ok());
        assert_eq!(
            check(dram_to_vmem().with_padding(8, 0)),
            Err(DescriptorFault::PaddingTooLarge { axis: 'x', pad: 8, tile: 8 })
        );

        let mut to_dram = dram_to_vmem();
        std::mem::swap(&mut to_dram.src, &mut to_dram.dst);
        assert_eq!(check(to_dram.with_padding(1, 0)), Err(DescriptorFault::PaddingNotToVmem));
    }

    #[test]
    fn test_transfer_table() {
        use TransferMode::*;
        let opts = ValidationOptions::default();
        assert!(check_transfer(Dram, Vmem, &opts).is_ok());
        assert!(check_transfer(Vmem, L2Sram, &opts).is_ok());
        assert!(check_transfer(Vmem, Vmem, &opts).is_ok());
        assert!(check_transfer(VpuConfig, Mmio, &opts).is_ok());
        assert!(check_transfer(VpuConfig, Vmem, &opts).is_ok());
        assert!(check_transfer(Dram, Dram, &opts).is_err());
        assert!(check_transfer(Dram, L2Sram, &opts).is_err());
        assert!(check_transfer(L2Sram, Dram, &opts).is_err());
        assert!(check_transfer(Dram, Mmio, &opts).is_err());
        assert!(check_transfer(Invalid, Vmem, &opts).is_err());

        assert_eq!(check_transfer(Vmem, Tcm, &opts), Err(DescriptorFault::TcmNotAllowed));
        let test_opts = ValidationOptions { allow_tcm: true };
        assert!(check_transfer(Vmem, Tcm, &test_opts).is_ok());
        assert!(check_transfer(Dram, Tcm, &test_opts).is_err());
    }

    #[test]
    fn test_trigger_table() {
        let vpu_cfg = Descriptor::new(
            4,
            1,
            TransferAttr::new(TransferMode::VpuConfig, SlotRef::None),
            TransferAttr::new(TransferMode::Mmio, SlotRef::None),
        );
        assert!(check(vpu_cfg.with_trigger(TriggerMode::VpuConfig, 0)).is_ok());
        assert!(matches!(
            check(vpu_cfg.with_trigger(TriggerMode::Dim3, 0)),
            Err(DescriptorFault::TriggerMismatch { .. })
        ));
        assert!(matches!(
            check(dram_to_vmem().with_trigger(TriggerMode::VpuConfig, 0)),
            Err(DescriptorFault::TriggerMismatch { .. })
        ));
        assert!(check(dram_to_vmem().with_trigger(TriggerMode::Dim4, 1)).is_ok());
    }

    #[test]
    fn test_gated_repeat_must_be_joint() {
        let mut desc = dram_to_vmem().with_trigger(TriggerMode::Dim3, 0);
        desc.dst = desc.dst.with_repeat(0, 4, 0);
        assert_eq!(
            check(desc),
            Err(DescriptorFault::PartialGatedRepeat { field: DescField::Dst, rpt: 4, adv: 0 })
        );

        desc.dst = desc.dst.with_repeat(0, 4, 64);
        assert!(check(desc).is_ok());

        // Dim4 gates the second dimension; the first is free.
        let mut desc = dram_to_vmem().with_trigger(TriggerMode::Dim4, 0);
        desc.dst = desc.dst.with_repeat(0, 4, 0).with_repeat(1, 0, 32);
        assert_eq!(
            check(desc),
            Err(DescriptorFault::PartialGatedRepeat { field: DescField::Dst, rpt: 0, adv: 32 })
        );
    }

    #[test]
    fn test_prefetch() {
        let mut desc = dram_to_vmem();
        desc.prefetch = true;
        assert!(check(desc).is_ok());

        desc.tx = 0;
        assert_eq!(check(desc), Err(DescriptorFault::PrefetchNotAllowed));

        let mut to_l2 = dram_to_vmem();
        to_l2.src = TransferAttr::new(TransferMode::L2Sram, SlotRef::Dynamic(0));
        to_l2.prefetch = true;
        assert_eq!(check(to_l2), Err(DescriptorFault::PrefetchNotAllowed));
    }

    #[test]
    fn test_link_rules() {
        assert!(check(dram_to_vmem().with_link(2)).is_ok());
        assert_eq!(check(dram_to_vmem().with_link(3)), Err(DescriptorFault::LinkOutOfRange(3)));

        let mut config = config_with(vec![dram_to_vmem(); 4], vec![]);
        config.header.base_descriptor = 58;
        let desc = dram_to_vmem().with_link(3);
        assert_eq!(
            check_descriptor(&config.header, &desc, &ValidationOptions::default()),
            Err(DescriptorFault::LinkReserved(61))
        );
    }

    #[test]
    fn test_slot_rules() {
        let mut desc = dram_to_vmem();
        desc.src.slot = SlotRef::None;
        assert_eq!(
            check(desc),
            Err(DescriptorFault::MissingSlot { field: DescField::Src, mode: TransferMode::Dram })
        );

        let mut desc = dram_to_vmem();
        desc.dst.slot = SlotRef::Static(1);
        assert_eq!(
            check(desc),
            Err(DescriptorFault::SlotOutOfRange { field: DescField::Dst, slot: SlotRef::Static(1) })
        );

        let cfg = Descriptor::new(
            4,
            1,
            TransferAttr::new(TransferMode::VpuConfig, SlotRef::Dynamic(0)),
            TransferAttr::new(TransferMode::Mmio, SlotRef::None),
        );
        assert!(matches!(check(cfg), Err(DescriptorFault::UnexpectedSlot { field: DescField::Src, .. })));

        let dst2 = dram_to_vmem().with_dst2(TransferAttr::new(TransferMode::Dram, SlotRef::Dynamic(0)));
        assert_eq!(
            check(dst2),
            Err(DescriptorFault::Dst2ModeMismatch { dst: TransferMode::Vmem, dst2: TransferMode::Dram })
        );
        let dst2 = dram_to_vmem().with_dst2(TransferAttr::new(TransferMode::Vmem, SlotRef::Dynamic(0)));
        assert!(check(dst2).is_ok());
    }

    #[test]
    fn test_circular_rules() {
        let mut desc = dram_to_vmem();
        desc.dst = desc.dst.with_circular(256);
        assert!(check(desc).is_ok());

        desc.dst.cb_size = 0;
        assert_eq!(check(desc), Err(DescriptorFault::CircularSizeZero { field: DescField::Dst }));

        let mut desc = dram_to_vmem();
        desc.src = desc.src.with_circular(256);
        assert_eq!(check(desc), Err(DescriptorFault::CircularNotVmem { field: DescField::Src }));
    }

    #[test]
    fn test_element_size() {
        let mut desc = dram_to_vmem();
        desc.log2_elem_size = 3;
        assert_eq!(check(desc), Err(DescriptorFault::ElementSizeTooLarge(3)));
    }

    #[test]
    fn test_first_offending_descriptor_reported() {
        let config = config_with(
            vec![dram_to_vmem(), dram_to_vmem().with_link(9), dram_to_vmem().with_padding(9, 0)],
            vec![],
        );
        assert_eq!(
            validate_descriptors(&config, &ValidationOptions::default()),
            Err(DmaError::descriptor(1, DescriptorFault::LinkOutOfRange(9)))
        );
    }
}
