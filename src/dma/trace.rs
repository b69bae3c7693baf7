//! Descriptor-to-channel tracing.
//!
//! Follows each channel's link chain from its starting descriptor and
//! records which channel first reaches each descriptor. The walk is bounded
//! twice: a descriptor is visited at most once across all channels, and a
//! single chain stops after `MAX_DESCRIPTORS` steps.

use super::hwseq::HwseqUsage;
use super::types::{DescIndex, DescriptorSet, DmaConfig};
use crate::hw;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorTrace {
    /// Owning channel index per descriptor.
    pub owners: Vec<Option<u8>>,
    /// Chain steps taken, for diagnostics.
    pub visits: u32,
}

impl DescriptorTrace {
    #[inline]
    pub fn owner(&self, index: DescIndex) -> Option<u8> {
        self.owners.get(usize::from(index)).copied().flatten()
    }

    /// Number of descriptors reached by some channel.
    pub fn owned(&self) -> usize {
        self.owners.iter().filter(|o| o.is_some()).count()
    }
}

pub fn trace_descriptors(config: &DmaConfig, hwseq: &HwseqUsage) -> DescriptorTrace {
    let mut trace = DescriptorTrace { owners: vec![None; config.descriptors.len()], visits: 0 };

    // Sequencer programs claim their descriptors before any chain walk.
    for (channel, used) in hwseq.per_channel.iter().enumerate() {
        for index in used.iter() {
            let owner = &mut trace.owners[usize::from(index)];
            if owner.is_none() {
                *owner = Some(channel as u8);
            }
        }
    }

    let mut visited = DescriptorSet::default();
    for (i, channel) in config.channels.iter().enumerate() {
        let mut next = Some(channel.desc_index);
        let mut steps = 0;
        while let Some(index) = next {
            if steps >= hw::MAX_DESCRIPTORS || !visited.insert(index) {
                break;
            }
            let Some(desc) = config.descriptor(index) else {
                break;
            };
            steps += 1;
            let owner = &mut trace.owners[usize::from(index)];
            if owner.is_none() {
                *owner = Some(i as u8);
            }
            next = desc.link();
        }
        log::trace!("channel {}: chain of {} descriptors", i, steps);
        trace.visits += steps;
    }

    log::debug!(
        "traced {} of {} descriptors in {} steps",
        trace.owned(),
        config.descriptors.len(),
        trace.visits
    );
    trace
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::types::{Channel, Descriptor, SlotRef, TransferAttr, TransferMode};

    fn desc(link_id: u8) -> Descriptor {
        Descriptor::new(
            8,
            8,
            TransferAttr::new(TransferMode::Dram, SlotRef::Dynamic(0)),
            TransferAttr::new(TransferMode::Vmem, SlotRef::Dynamic(1)),
        )
        .with_link(link_id)
    }

    fn config(descriptors: Vec<Descriptor>, starts: &[u8]) -> DmaConfig {
        DmaConfig {
            descriptors,
            channels: starts.iter().map(|&s| Channel::starting_at(s)).collect(),
            ..Default::default()
        }
    }

    fn no_hwseq(config: &DmaConfig) -> HwseqUsage {
        HwseqUsage { per_channel: vec![DescriptorSet::default(); config.channels.len()], ..Default::default() }
    }

    #[test]
    fn test_chains_assign_owners() {
        // ch0: 0 -> 1, ch1: 2, descriptor 3 unreachable.
        let cfg = config(vec![desc(2), desc(0), desc(0), desc(0)], &[0, 2]);
        let trace = trace_descriptors(&cfg, &no_hwseq(&cfg));
        assert_eq!(trace.owners, vec![Some(0), Some(0), Some(1), None]);
        assert_eq!(trace.visits, 3);
        assert_eq!(trace.owned(), 3);
    }

    #[test]
    fn test_cycle_terminates() {
        // 0 -> 1 -> 2 -> 0
        let cfg = config(vec![desc(2), desc(3), desc(1)], &[0]);
        let trace = trace_descriptors(&cfg, &no_hwseq(&cfg));
        assert_eq!(trace.owners, vec![Some(0); 3]);
        assert_eq!(trace.visits, 3);

        // Self loop.
        let cfg = config(vec![desc(1)], &[0]);
        assert_eq!(trace_descriptors(&cfg, &no_hwseq(&cfg)).visits, 1);
    }

    #[test]
    fn test_shared_tail_keeps_first_owner() {
        // ch0: 0 -> 2, ch1: 1 -> 2
        let cfg = config(vec![desc(3), desc(3), desc(0)], &[0, 1]);
        let trace = trace_descriptors(&cfg, &no_hwseq(&cfg));
        assert_eq!(trace.owners, vec![Some(0), Some(1), Some(0)]);
        // Descriptor 2 is not walked twice.
        assert_eq!(trace.visits, 3);
    }

    #[test]
    fn test_sequencer_claims_descriptors() {
        // ch0 walks 0 -> 1, but ch1's program replays descriptor 1.
        let cfg = config(vec![desc(2), desc(0), desc(0)], &[0, 2]);
        let mut hwseq = no_hwseq(&cfg);
        hwseq.per_channel[1].insert(1);
        let trace = trace_descriptors(&cfg, &hwseq);
        assert_eq!(trace.owners, vec![Some(0), Some(1), Some(1)]);
        assert_eq!(trace.owner(1), Some(1));
        assert_eq!(trace.owner(200), None);
    }

    #[test]
    fn test_longest_chain_is_bounded() {
        let n = hw::MAX_DESCRIPTORS as usize;
        let descriptors = (0..n).map(|i| desc(((i + 1) % n + 1) as u8)).collect();
        let cfg = config(descriptors, &[0]);
        let trace = trace_descriptors(&cfg, &no_hwseq(&cfg));
        assert_eq!(trace.visits, hw::MAX_DESCRIPTORS);
        assert!(trace.owners.iter().all(|o| *o == Some(0)));
    }
}
