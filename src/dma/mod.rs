//! DMA program validation and loading.
//!
//! The raw buffer layout is described in [`header`]; sequencer programs in
//! [`hwseq::program`]; the firmware blob in [`writer`].
//!
//! [`loader::validate`] turns a raw buffer into a [`ValidatedConfig`] without touching
//! any resource. [`loader::load`] additionally binds static slots against the
//! resource table and writes the firmware blob.

pub mod access;
pub mod binding;
pub mod encode;
pub mod header;
pub mod hwseq;
pub mod loader;
pub mod parse;
pub mod reloc;
pub mod trace;
pub mod types;
pub mod validate;
pub mod writer;

pub use binding::{BoundConfig, ResourceAux};
pub use encode::ConfigBuilder;
pub use loader::{
    load, load_into, unload, validate, LoadSummary, LoadedDmaConfig, ValidatedConfig,
    ValidationOptions,
};
pub use reloc::{RelocSlot, RelocTables, SlotFlags};
pub use types::{AccessEntry, AccessSet, Channel, Descriptor, DmaConfig, SlotRef, TransferMode};
pub use writer::{BlobLayout, FirmwareBlob};
