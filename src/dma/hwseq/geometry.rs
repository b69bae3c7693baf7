//! Frame-mode bounding box.
//!
//! A frame-mode program replays a head tile and an optional tail tile
//! along one axis, then repeats that line per group and per frame:
//!
//! ```text
//!            step      step            step
//!         |<------->|<------->|     |<------->|
//!   line: [ head 0  ][ head 1  ] ... [ tail 0  ] ... [ tail n ]
//!          ^ lead pad (split mode)                          ^ trail pad
//!
//!   group g: line shifted by r * offset_g,  r = 0..=repeat_g
//!   frame f: all groups shifted by f * frame_step, f = 0..=frame_repeat
//! ```
//!
//! Raster traversal steps along a line in elements; vertical mining steps
//! down a column strip in lines. The tail's padding along the traversal
//! axis is not fetched from memory: joined mode removes all of it from the
//! last tile, split mode takes half off the front of the first tile and the
//! rest off the end of the last tile.
//!
//! Tile positions are linear in the tile index and every tile of a run has
//! the same footprint, so the extremes of a run are at its first and last
//! tile. The box only needs those endpoints, never the full enumeration.

use crate::dma::types::{AccessEntry, PaddingMode, Traversal};
use crate::math::{MathError, Offset};

/// A run of identical tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TileRun {
    pub tx: u16,
    pub ty: u16,
    /// Extra tiles after the first.
    pub repeat: u8,
}

/// One line of a frame: head run, then optional tail run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineGeometry {
    pub order: Traversal,
    pub padding: PaddingMode,
    pub elem_size: u32,
    /// Memory-side line pitch in bytes.
    pub line_pitch: u32,
    /// Elements (raster) or lines (vertical mining) between tiles.
    pub tile_step: i32,
    pub head: TileRun,
    pub tail: Option<TileRun>,
    /// Tail padding along the traversal axis.
    pub tail_pad: u8,
}

/// A line replayed `repeat + 1` times, `offset` bytes apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupGeometry {
    pub line: LineGeometry,
    pub repeat: u8,
    pub offset: i16,
}

impl LineGeometry {
    /// Bytes per step along the traversal axis.
    pub fn unit(&self) -> u32 {
        match self.order {
            Traversal::Raster => self.elem_size,
            Traversal::VerticalMining => self.line_pitch,
        }
    }

    /// Length of a tile along the traversal axis.
    pub fn axis_len(&self, run: &TileRun) -> u32 {
        match self.order {
            Traversal::Raster => run.tx.into(),
            Traversal::VerticalMining => run.ty.into(),
        }
    }

    /// Padding taken off the first tile's front and the last tile's end.
    pub fn padding_parts(&self) -> (u32, u32) {
        let pad = if self.tail.is_some() { u32::from(self.tail_pad) } else { 0 };
        match self.padding {
            PaddingMode::Joined => (0, pad),
            PaddingMode::Split => (pad / 2, pad - pad / 2),
        }
    }

    fn extent(&self, run: &TileRun) -> Result<Offset, MathError> {
        if run.tx == 0 || run.ty == 0 {
            return Ok(Offset::ZERO);
        }
        let lines = Offset::from(run.ty - 1);
        let last_line = (lines * Offset::from(self.line_pitch))?;
        last_line + (Offset::from(run.tx) * Offset::from(self.elem_size))?
    }

    pub fn tile_count(&self) -> u64 {
        u64::from(self.head.repeat) + 1 + self.tail.map_or(0, |t| u64::from(t.repeat) + 1)
    }
}

#[derive(Default)]
struct Bounds(Option<(Offset, Offset)>);

impl Bounds {
    fn add(&mut self, start: Offset, end: Offset) {
        self.0 = Some(match self.0 {
            None => (start, end),
            Some((lo, hi)) => (lo.min(start), hi.max(end)),
        });
    }

    fn entry(self) -> AccessEntry {
        match self.0 {
            Some((start, end)) => AccessEntry { start, end },
            None => AccessEntry::empty_at(Offset::ZERO),
        }
    }
}

/// Bounding box of one line, relative to the first tile's position.
pub fn line_box(g: &LineGeometry) -> Result<AccessEntry, MathError> {
    let unit = Offset::from(g.unit());
    let step = (Offset::from(g.tile_step) * unit)?;
    let (lead, trail) = g.padding_parts();
    let lead = (Offset::from(lead) * unit)?;
    let trail = (Offset::from(trail) * unit)?;

    let mut bounds = Bounds::default();
    let mut tile = |k: u32, extent: Offset, front: Offset, back: Offset| -> Result<(), MathError> {
        let pos = (Offset::from(k) * step)?;
        bounds.add((pos + front)?, ((pos + extent)? - back)?);
        Ok(())
    };

    let head_ext = g.extent(&g.head)?;
    let heads = u32::from(g.head.repeat);
    tile(0, head_ext, lead, Offset::ZERO)?;
    if heads >= 1 {
        tile(1, head_ext, Offset::ZERO, Offset::ZERO)?;
        tile(heads, head_ext, Offset::ZERO, Offset::ZERO)?;
    }

    if let Some(tail) = &g.tail {
        let tail_ext = g.extent(tail)?;
        let first = heads + 1;
        let last = first + u32::from(tail.repeat);
        if last > first {
            tile(first, tail_ext, Offset::ZERO, Offset::ZERO)?;
            tile(last - 1, tail_ext, Offset::ZERO, Offset::ZERO)?;
        }
        tile(last, tail_ext, Offset::ZERO, trail)?;
    }

    Ok(bounds.entry())
}

/// Widen `b` to cover `repeat` extra copies spaced `offset` bytes apart.
pub fn repeat_box(b: AccessEntry, repeat: u8, offset: Offset) -> Result<AccessEntry, MathError> {
    let span = (Offset::from(repeat) * offset)?;
    Ok(AccessEntry {
        start: (b.start + span.min(Offset::ZERO))?,
        end: (b.end + span.max(Offset::ZERO))?,
    })
}

/// Bounding box of every tile a frame-mode program replays, relative to the
/// memory side's base offset.
pub fn frame_box(
    groups: &[GroupGeometry],
    frame_repeat: u8,
    frame_step: i32,
) -> Result<AccessEntry, MathError> {
    let mut program: Option<AccessEntry> = None;
    for group in groups {
        let line = line_box(&group.line)?;
        let b = repeat_box(line, group.repeat, Offset::from(group.offset))?;
        program = Some(match program {
            Some(p) => p.union(b),
            None => b,
        });
    }
    let program = program.unwrap_or(AccessEntry::empty_at(Offset::ZERO));
    repeat_box(program, frame_repeat, Offset::from(frame_step))
}

/// Number of tiles a frame-mode program replays.
pub fn tile_count(groups: &[GroupGeometry], frame_repeat: u8) -> u64 {
    let per_frame: u64 = groups
        .iter()
        .map(|g| (u64::from(g.repeat) + 1) * g.line.tile_count())
        .sum();
    per_frame * (u64::from(frame_repeat) + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every tile footprint of a line, in order.
    fn tiles(g: &LineGeometry) -> Vec<(i64, i64)> {
        let unit = i64::from(g.unit());
        let step = i64::from(g.tile_step) * unit;
        let (lead, trail) = g.padding_parts();
        let extent = |r: &TileRun| {
            (i64::from(r.ty) - 1) * i64::from(g.line_pitch) + i64::from(r.tx) * i64::from(g.elem_size)
        };

        let mut runs = vec![(g.head, extent(&g.head))];
        if let Some(t) = g.tail {
            runs.push((t, extent(&t)));
        }
        let mut out = Vec::new();
        let mut k = 0i64;
        for (run, ext) in runs {
            for _ in 0..=run.repeat {
                out.push((k * step, k * step + ext));
                k += 1;
            }
        }
        out[0].0 += i64::from(lead) * unit;
        let last = out.len() - 1;
        out[last].1 -= i64::from(trail) * unit;
        out
    }

    fn brute_frame(groups: &[GroupGeometry], frame_repeat: u8, frame_step: i32) -> (i64, i64) {
        let (mut lo, mut hi) = (i64::MAX, i64::MIN);
        for f in 0..=i64::from(frame_repeat) {
            for g in groups {
                for r in 0..=i64::from(g.repeat) {
                    let shift = f * i64::from(frame_step) + r * i64::from(g.offset);
                    for (s, e) in tiles(&g.line) {
                        lo = lo.min(s + shift);
                        hi = hi.max(e + shift);
                    }
                }
            }
        }
        (lo, hi)
    }

    fn padding_legal(g: &LineGeometry) -> bool {
        let (lead, trail) = g.padding_parts();
        lead < g.axis_len(&g.head) && g.tail.map_or(true, |t| trail < g.axis_len(&t))
    }

    fn as_pair(e: AccessEntry) -> (i64, i64) {
        (e.start.get(), e.end.get())
    }

    /// Small deterministic generator so the sweep needs no extra crates.
    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }

        fn range(&mut self, lo: i64, hi: i64) -> i64 {
            lo + (self.next() % (hi - lo + 1) as u64) as i64
        }
    }

    #[test]
    fn test_line_box_matches_enumeration_exhaustively() {
        let mut checked = 0u32;
        for order in [Traversal::Raster, Traversal::VerticalMining] {
            for padding in [PaddingMode::Joined, PaddingMode::Split] {
                for tile_step in -3..=3 {
                    for (htx, hty) in [(1, 1), (2, 3), (3, 2)] {
                        for head_rep in 0..=2u8 {
                            let head = TileRun { tx: htx, ty: hty, repeat: head_rep };
                            let tails = std::iter::once(None).chain(
                                [(1u16, 1u16), (3, 3), (2, 1)].into_iter().flat_map(|(tx, ty)| {
                                    (0..=2u8).map(move |repeat| Some(TileRun { tx, ty, repeat }))
                                }),
                            );
                            for tail in tails {
                                for tail_pad in 0..=3u8 {
                                    let g = LineGeometry {
                                        order,
                                        padding,
                                        elem_size: 2,
                                        line_pitch: 16,
                                        tile_step,
                                        head,
                                        tail,
                                        tail_pad,
                                    };
                                    if !padding_legal(&g) {
                                        continue;
                                    }
                                    let group = GroupGeometry { line: g, repeat: 0, offset: 0 };
                                    assert_eq!(
                                        as_pair(line_box(&g).unwrap()),
                                        brute_frame(&[group], 0, 0),
                                        "{:?}",
                                        g
                                    );
                                    checked += 1;
                                }
                            }
                        }
                    }
                }
            }
        }
        assert!(checked > 1000);
    }

    #[test]
    fn test_frame_box_matches_enumeration_randomized() {
        let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
        let mut checked = 0;
        while checked < 2000 {
            let num_groups = rng.range(1, 3) as usize;
            let order = if rng.next() & 1 == 0 { Traversal::Raster } else { Traversal::VerticalMining };
            let padding = if rng.next() & 1 == 0 { PaddingMode::Joined } else { PaddingMode::Split };
            let groups: Vec<GroupGeometry> = (0..num_groups)
                .map(|_| {
                    let head = TileRun {
                        tx: rng.range(1, 8) as u16,
                        ty: rng.range(1, 8) as u16,
                        repeat: rng.range(0, 6) as u8,
                    };
                    let tail = (rng.next() % 3 != 0).then(|| TileRun {
                        tx: rng.range(1, 8) as u16,
                        ty: rng.range(1, 8) as u16,
                        repeat: rng.range(0, 4) as u8,
                    });
                    GroupGeometry {
                        line: LineGeometry {
                            order,
                            padding,
                            elem_size: 1 << rng.range(0, 2),
                            line_pitch: rng.range(8, 64) as u32,
                            tile_step: rng.range(-16, 16) as i32,
                            head,
                            tail,
                            tail_pad: rng.range(0, 7) as u8,
                        },
                        repeat: rng.range(0, 4) as u8,
                        offset: rng.range(-512, 512) as i16,
                    }
                })
                .collect();
            if !groups.iter().all(|g| padding_legal(&g.line)) {
                continue;
            }
            let frame_repeat = rng.range(0, 3) as u8;
            let frame_step = rng.range(-4096, 4096) as i32;

            let computed = frame_box(&groups, frame_repeat, frame_step).unwrap();
            assert_eq!(
                as_pair(computed),
                brute_frame(&groups, frame_repeat, frame_step),
                "{:?} x{} step {}",
                groups,
                frame_repeat,
                frame_step
            );
            checked += 1;
        }
    }

    #[test]
    fn test_split_padding_shrinks_both_ends() {
        let g = LineGeometry {
            order: Traversal::Raster,
            padding: PaddingMode::Split,
            elem_size: 1,
            line_pitch: 64,
            tile_step: 16,
            head: TileRun { tx: 16, ty: 1, repeat: 1 },
            tail: Some(TileRun { tx: 16, ty: 1, repeat: 0 }),
            tail_pad: 5,
        };
        // Tiles at 0, 16, 32; 2 elements off the front, 3 off the end.
        assert_eq!(as_pair(line_box(&g).unwrap()), (2, 45));

        let joined = LineGeometry { padding: PaddingMode::Joined, ..g };
        assert_eq!(as_pair(line_box(&joined).unwrap()), (0, 43));
    }

    #[test]
    fn test_vertical_mining_steps_in_lines() {
        let g = LineGeometry {
            order: Traversal::VerticalMining,
            padding: PaddingMode::Joined,
            elem_size: 4,
            line_pitch: 256,
            tile_step: 8,
            head: TileRun { tx: 16, ty: 8, repeat: 3 },
            tail: None,
            tail_pad: 0,
        };
        // Four 8-line tiles stacked: last starts at 3 * 8 * 256.
        let expected_end = 3 * 8 * 256 + 7 * 256 + 16 * 4;
        assert_eq!(as_pair(line_box(&g).unwrap()), (0, expected_end));
        assert_eq!(g.tile_count(), 4);
    }

    #[test]
    fn test_negative_offsets_extend_start() {
        let b = AccessEntry::new(Offset::new(0), Offset::new(100));
        assert_eq!(as_pair(repeat_box(b, 3, Offset::new(-50)).unwrap()), (-150, 100));
        assert_eq!(as_pair(repeat_box(b, 3, Offset::new(50)).unwrap()), (0, 250));
        assert_eq!(as_pair(repeat_box(b, 0, Offset::new(50)).unwrap()), (0, 100));
    }

    #[test]
    fn test_tile_count() {
        let line = LineGeometry {
            order: Traversal::Raster,
            padding: PaddingMode::Joined,
            elem_size: 1,
            line_pitch: 0,
            tile_step: 1,
            head: TileRun { tx: 1, ty: 1, repeat: 4 },
            tail: Some(TileRun { tx: 1, ty: 1, repeat: 0 }),
            tail_pad: 0,
        };
        let groups = [GroupGeometry { line, repeat: 2, offset: 0 }];
        assert_eq!(tile_count(&groups, 1), 6 * 3 * 2);
    }

    #[test]
    fn test_overflow_is_math_error() {
        let g = LineGeometry {
            order: Traversal::VerticalMining,
            padding: PaddingMode::Joined,
            elem_size: 4,
            line_pitch: u32::MAX,
            tile_step: i32::MAX,
            head: TileRun { tx: 1, ty: 1, repeat: 2 },
            tail: None,
            tail_pad: 0,
        };
        // One step fits in i64, two do not.
        assert!(matches!(line_box(&g), Err(MathError::Overflow { .. })));

        let huge = AccessEntry::new(Offset::new(0), Offset::MAX);
        assert!(repeat_box(huge, 1, Offset::new(1)).is_err());
    }
}
