//! Sequencer program decoding.
//!
//! Word 0 of a channel's window selects the mode:
//!
//! ```text
//!  31      24 23      16 15                0
//! +----------+----------+-------------------+
//! |  count   | f_repeat |        tag        |
//! +----------+----------+-------------------+
//! ```
//!
//! Descriptor and frame mode bodies are `count` groups. Each group is a
//! header word followed by packed 16-bit entries, two per word:
//!
//! ```text
//! header:  offset (i16) [31:16] | repeat [15:8] | entries [7:0]
//! entries: (repeat << 8 | desc_id) [15:0], next entry [31:16]
//! ```
//!
//! Frame mode has two extra words before the groups: the tile step and the
//! frame step. RRA mode is a flat list of `offset [15:0] | desc_id [23:16]`
//! column words.

use smallvec::SmallVec;

use crate::error::HwseqFault;

pub const TAG_DESCRIPTOR: u16 = 0xC0DE;
pub const TAG_FRAME: u16 = 0xC0F0;
pub const TAG_RRA: u16 = 0xC0AA;

/// One replayed descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwseqEntry {
    /// 1-based relative descriptor id.
    pub desc_id: u8,
    /// Extra replays of this descriptor.
    pub repeat: u8,
}

/// A column (raster) or row (vertical mining) of entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwseqGroup {
    /// Extra replays of the whole group.
    pub repeat: u8,
    /// Byte offset applied per group replay.
    pub offset: i16,
    pub entries: SmallVec<[HwseqEntry; 2]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RraColumn {
    /// Byte offset of the column.
    pub offset: u16,
    /// 1-based relative descriptor id.
    pub desc_id: u8,
}

/// A decoded sequencer program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwseqProgram {
    /// Explicit descriptor list.
    Descriptor { frame_repeat: u8, groups: Vec<HwseqGroup> },
    /// Head/tail tiles replayed over a grid.
    Frame { frame_repeat: u8, tile_step: i32, frame_step: i32, groups: Vec<HwseqGroup> },
    /// Rectangular region, one descriptor per column.
    Rra { frame_repeat: u8, columns: SmallVec<[RraColumn; 8]> },
}

/// Cursor over one channel's window. Positions are reported relative to the
/// config's word array.
struct WordReader<'a> {
    words: &'a [u32],
    pos: usize,
    base: u32,
}

impl<'a> WordReader<'a> {
    fn next(&mut self) -> Result<u32, HwseqFault> {
        let word = self
            .words
            .get(self.pos)
            .copied()
            .ok_or(HwseqFault::Truncated { at: self.base + self.pos as u32 })?;
        self.pos += 1;
        Ok(word)
    }
}

impl HwseqProgram {
    /// Decode the program in `words`, the channel's window starting at
    /// config word `base`.
    pub fn parse(words: &[u32], base: u32) -> Result<Self, HwseqFault> {
        let mut r = WordReader { words, pos: 0, base };
        let head = r.next()?;
        let tag = head as u16;
        let frame_repeat = (head >> 16) as u8;
        let count = (head >> 24) as u8;

        let program = match tag {
            TAG_DESCRIPTOR => {
                if count == 0 {
                    return Err(HwseqFault::EmptyProgram);
                }
                Self::Descriptor { frame_repeat, groups: parse_groups(&mut r, count)? }
            }
            TAG_FRAME => {
                let tile_step = r.next()? as i32;
                let frame_step = r.next()? as i32;
                if count == 0 {
                    return Err(HwseqFault::EmptyProgram);
                }
                let groups = parse_groups(&mut r, count)?;
                Self::Frame { frame_repeat, tile_step, frame_step, groups }
            }
            TAG_RRA => {
                if count == 0 {
                    return Err(HwseqFault::EmptyProgram);
                }
                let columns = (0..count)
                    .map(|_| {
                        let word = r.next()?;
                        Ok(RraColumn { offset: word as u16, desc_id: (word >> 16) as u8 })
                    })
                    .collect::<Result<_, HwseqFault>>()?;
                Self::Rra { frame_repeat, columns }
            }
            other => return Err(HwseqFault::UnknownTag(other)),
        };

        if r.pos < words.len() {
            log::trace!("hwseq program ignores {} trailing words", words.len() - r.pos);
        }
        Ok(program)
    }

    pub fn frame_repeat(&self) -> u8 {
        match self {
            Self::Descriptor { frame_repeat, .. }
            | Self::Frame { frame_repeat, .. }
            | Self::Rra { frame_repeat, .. } => *frame_repeat,
        }
    }

    /// Every descriptor id the program names, in program order.
    pub fn desc_ids(&self) -> impl Iterator<Item = u8> + '_ {
        let (groups, columns): (&[HwseqGroup], &[RraColumn]) = match self {
            Self::Descriptor { groups, .. } | Self::Frame { groups, .. } => {
                (groups.as_slice(), &[][..])
            }
            Self::Rra { columns, .. } => (&[][..], columns.as_slice()),
        };
        groups
            .iter()
            .flat_map(|g| g.entries.iter().map(|e| e.desc_id))
            .chain(columns.iter().map(|c| c.desc_id))
    }

    /// Encode back into sequencer words.
    pub fn to_words(&self) -> Vec<u32> {
        let head = |tag: u16, count: usize| {
            u32::from(tag) | u32::from(self.frame_repeat()) << 16 | (count as u32 & 0xFF) << 24
        };
        let mut words = Vec::new();
        match self {
            Self::Descriptor { groups, .. } => {
                words.push(head(TAG_DESCRIPTOR, groups.len()));
                groups_to_words(groups, &mut words);
            }
            Self::Frame { tile_step, frame_step, groups, .. } => {
                words.push(head(TAG_FRAME, groups.len()));
                words.push(*tile_step as u32);
                words.push(*frame_step as u32);
                groups_to_words(groups, &mut words);
            }
            Self::Rra { columns, .. } => {
                words.push(head(TAG_RRA, columns.len()));
                words.extend(
                    columns.iter().map(|c| u32::from(c.offset) | u32::from(c.desc_id) << 16),
                );
            }
        }
        words
    }
}

fn parse_groups(r: &mut WordReader<'_>, count: u8) -> Result<Vec<HwseqGroup>, HwseqFault> {
    let mut groups = Vec::with_capacity(count.into());
    for group in 0..usize::from(count) {
        let header = r.next()?;
        let num_entries = (header & 0xFF) as usize;
        if num_entries == 0 {
            return Err(HwseqFault::EmptyGroup { group });
        }
        let mut entries = SmallVec::with_capacity(num_entries);
        let mut word = 0;
        for i in 0..num_entries {
            // Odd counts leave the upper half of the last word as padding.
            let half = if i % 2 == 0 {
                word = r.next()?;
                word as u16
            } else {
                (word >> 16) as u16
            };
            entries.push(HwseqEntry { desc_id: half as u8, repeat: (half >> 8) as u8 });
        }
        groups.push(HwseqGroup {
            repeat: (header >> 8) as u8,
            offset: (header >> 16) as u16 as i16,
            entries,
        });
    }
    Ok(groups)
}

fn groups_to_words(groups: &[HwseqGroup], words: &mut Vec<u32>) {
    for g in groups {
        words.push(
            (g.entries.len() as u32 & 0xFF)
                | u32::from(g.repeat) << 8
                | u32::from(g.offset as u16) << 16,
        );
        for pair in g.entries.chunks(2) {
            let half = |e: &HwseqEntry| u32::from(e.desc_id) | u32::from(e.repeat) << 8;
            let lo = half(&pair[0]);
            let hi = pair.get(1).map(half).unwrap_or(0);
            words.push(lo | hi << 16);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn entry(desc_id: u8, repeat: u8) -> HwseqEntry {
        HwseqEntry { desc_id, repeat }
    }

    #[test]
    fn test_parse_descriptor_mode() {
        // Two groups: [1x3, 2] and [3].
        let words = [
            0x0200_C0DE,
            0x0000_0002,
            0x0002_0301,
            0x0000_0001,
            0x0000_0003,
        ];
        let program = HwseqProgram::parse(&words, 0).unwrap();
        let HwseqProgram::Descriptor { frame_repeat, groups } = &program else {
            panic!("expected descriptor mode, got {:?}", program);
        };
        assert_eq!(*frame_repeat, 0);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].entries.as_slice(), &[entry(1, 3), entry(2, 0)]);
        assert_eq!(groups[1].repeat, 0);
        assert_eq!(groups[1].entries.as_slice(), &[entry(3, 0)]);
        assert_eq!(program.desc_ids().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_odd_entry_count_consumes_padding() {
        // Three entries need two entry words; the fourth half is padding.
        let words = [0x0100_C0DE, 0x0000_0003, 0x0002_0001, 0xFFFF_0003];
        let program = HwseqProgram::parse(&words, 0).unwrap();
        let HwseqProgram::Descriptor { groups, .. } = program else { unreachable!() };
        assert_eq!(groups[0].entries.len(), 3);
        assert_eq!(groups[0].entries[2], entry(3, 0));
    }

    #[test]
    fn test_parse_frame_mode() {
        let program = HwseqProgram::Frame {
            frame_repeat: 1,
            tile_step: 16,
            frame_step: -4096,
            groups: vec![HwseqGroup {
                repeat: 3,
                offset: -256,
                entries: smallvec![entry(1, 5), entry(2, 0)],
            }],
        };
        let words = program.to_words();
        assert_eq!(words[0], 0x0101_C0F0);
        assert_eq!(words[2] as i32, -4096);
        assert_eq!(HwseqProgram::parse(&words, 0).unwrap(), program);
    }

    #[test]
    fn test_parse_rra_mode() {
        let words = [0x0200_C0AA, 0x0001_0040, 0x0002_0080];
        let program = HwseqProgram::parse(&words, 0).unwrap();
        assert_eq!(
            program,
            HwseqProgram::Rra {
                frame_repeat: 0,
                columns: smallvec![
                    RraColumn { offset: 0x40, desc_id: 1 },
                    RraColumn { offset: 0x80, desc_id: 2 },
                ],
            }
        );
        assert_eq!(program.to_words(), words);
    }

    #[test]
    fn test_truncation_is_reported_at_absolute_word() {
        // Group claims two entries but the window ends after the header.
        let words = [0x0100_C0DE, 0x0000_0002];
        assert_eq!(HwseqProgram::parse(&words, 10), Err(HwseqFault::Truncated { at: 12 }));

        // Frame mode needs the two step words.
        assert_eq!(
            HwseqProgram::parse(&[0x0100_C0F0, 0x10], 0),
            Err(HwseqFault::Truncated { at: 2 })
        );
    }

    #[test]
    fn test_malformed_programs() {
        assert_eq!(HwseqProgram::parse(&[0x0100_BEEF], 0), Err(HwseqFault::UnknownTag(0xBEEF)));
        assert_eq!(HwseqProgram::parse(&[0x0000_C0DE], 0), Err(HwseqFault::EmptyProgram));
        assert_eq!(
            HwseqProgram::parse(&[0x0100_C0DE, 0x0000_0000], 0),
            Err(HwseqFault::EmptyGroup { group: 0 })
        );
        assert_eq!(HwseqProgram::parse(&[], 3), Err(HwseqFault::Truncated { at: 3 }));
    }
}
