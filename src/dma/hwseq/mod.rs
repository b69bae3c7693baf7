//! Hardware sequencer programs.
//!
//! A channel with its sequencer enabled owns a window of the config's word
//! array. The window holds one program in one of three modes:
//!
//! - descriptor mode: explicit lists of descriptors with repeat counts
//! - frame mode: head and tail tiles replayed over a 2-D grid
//! - RRA mode: one descriptor per column of a rectangular region
//!
//! [`program`] decodes the words, [`validate`] checks the decoded program
//! against the descriptors it names and [`geometry`] computes the memory
//! footprint of frame-mode programs.

pub mod geometry;
pub mod program;
pub mod validate;

pub use program::{HwseqEntry, HwseqGroup, HwseqProgram, RraColumn};
pub use validate::{validate_hwseq, HwseqUsage};
