//! Load pipeline.
//!
//! ```text
//!   raw bytes
//!     -> check_header -> parse_config
//!     -> validate_channels -> validate_descriptors -> validate_hwseq
//!     -> compute_access -> trace_descriptors -> collect_relocs     (validate)
//!     -> bind -> write_blob                                         (load)
//! ```
//!
//! Validation is pure. Binding takes references on the resource table
//! through a held [`ResourceAccess`] capability; any failure after the
//! first reference rolls all of them back. The blob is written only once
//! every earlier stage has succeeded.

use std::fmt;

use super::access::compute_access;
use super::binding::{bind, PendingAcquisitions, ResourceAux};
use super::header::check_header;
use super::hwseq::{validate_hwseq, HwseqUsage};
use super::parse::parse_config;
use super::reloc::{collect_relocs, RelocTables};
use super::trace::{trace_descriptors, DescriptorTrace};
use super::types::{AccessSet, DmaConfig};
use super::validate::{validate_channels, validate_descriptors};
use super::writer::{write_blob, BlobLayout};
use crate::error::DmaError;
use crate::resource::ResourceAccess;

/// Switches for configurations only some deployments accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidationOptions {
    /// Accept VMEM -> TCM transfers.
    pub allow_tcm: bool,
}

/// Everything validation derives from one raw config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    pub config: DmaConfig,
    pub hwseq: HwseqUsage,
    /// Access set per descriptor.
    pub access: Vec<AccessSet>,
    pub trace: DescriptorTrace,
    pub relocs: RelocTables,
}

fn run_validation(raw: &[u8], options: &ValidationOptions) -> Result<ValidatedConfig, DmaError> {
    let (header, layout) = check_header(raw)?;
    let config = parse_config(raw, header, &layout)?;
    validate_channels(&config)?;
    validate_descriptors(&config, options)?;
    let hwseq = validate_hwseq(&config)?;
    let access = compute_access(&config, &hwseq)?;
    let trace = trace_descriptors(&config, &hwseq);
    let relocs = collect_relocs(&config, &access, &trace)?;
    Ok(ValidatedConfig { config, hwseq, access, trace, relocs })
}

/// Run every check that needs no resources.
pub fn validate(raw: &[u8], options: &ValidationOptions) -> Result<ValidatedConfig, DmaError> {
    run_validation(raw, options).map_err(|e| {
        log::warn!("rejected DMA config ({:?}): {}", e.kind(), e);
        e
    })
}

/// Counts reported after a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSummary {
    pub channels: usize,
    pub sequenced_channels: usize,
    pub descriptors: usize,
    pub static_slots: usize,
    pub dynamic_slots: usize,
    pub static_relocs: usize,
    pub dynamic_relocs: usize,
    pub resources: usize,
    pub fetch_size: usize,
    pub blob_size: usize,
}

impl LoadSummary {
    pub fn new(validated: &ValidatedConfig, layout: &BlobLayout, resources: usize) -> Self {
        let config = &validated.config;
        Self {
            channels: config.channels.len(),
            sequenced_channels: validated.hwseq.programs.iter().filter(|p| p.is_some()).count(),
            descriptors: config.descriptors.len(),
            static_slots: validated.relocs.static_slots.len(),
            dynamic_slots: validated.relocs.dynamic_slots.len(),
            static_relocs: validated.relocs.static_relocs.len(),
            dynamic_relocs: validated.relocs.dynamic_relocs.len(),
            resources,
            fetch_size: layout.fetch_size(),
            blob_size: layout.total_size(),
        }
    }
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Channels:     {} ({} sequenced)", self.channels, self.sequenced_channels)?;
        writeln!(f, "Descriptors:  {}", self.descriptors)?;
        writeln!(
            f,
            "Slots:        {} static, {} dynamic",
            self.static_slots, self.dynamic_slots
        )?;
        writeln!(
            f,
            "Relocs:       {} static, {} dynamic",
            self.static_relocs, self.dynamic_relocs
        )?;
        writeln!(f, "Resources:    {}", self.resources)?;
        write!(f, "Blob:         {} bytes ({} fetched)", self.blob_size, self.fetch_size)
    }
}

/// A bound program and the references it holds.
#[derive(Debug)]
pub struct LoadedDmaConfig {
    pub aux: ResourceAux,
    pub blob: Vec<u8>,
    pub fetch_size: usize,
    pub summary: LoadSummary,
}

fn bind_and_write<A: ResourceAccess + ?Sized>(
    access: &mut A,
    validated: &ValidatedConfig,
    out: &mut [u8],
) -> Result<(ResourceAux, BlobLayout), DmaError> {
    let mut pending = PendingAcquisitions::new(access);
    let bound = bind(&mut pending, &validated.config, &validated.relocs)?;
    let layout = write_blob(&validated.config, &validated.relocs, &bound, out)?;
    Ok((pending.commit(), layout))
}

/// Validate, bind and serialize `raw` into a freshly allocated blob.
pub fn load<A: ResourceAccess + ?Sized>(
    access: &mut A,
    raw: &[u8],
    options: &ValidationOptions,
) -> Result<LoadedDmaConfig, DmaError> {
    let validated = validate(raw, options)?;
    let size = BlobLayout::for_config(&validated.config, &validated.relocs).total_size();
    let mut blob = vec![0u8; size];
    let (aux, layout) = bind_and_write(access, &validated, &mut blob).map_err(|e| {
        log::warn!("DMA config load failed ({:?}): {}", e.kind(), e);
        e
    })?;
    let summary = LoadSummary::new(&validated, &layout, aux.len());
    log::info!(
        "loaded DMA config: {} channels, {} descriptors, {} byte blob",
        summary.channels,
        summary.descriptors,
        summary.blob_size
    );
    Ok(LoadedDmaConfig { aux, blob, fetch_size: layout.fetch_size(), summary })
}

/// Like [`load`], writing the blob into a caller-provided buffer.
///
/// Returns the aux, the fetch size and the number of bytes written.
pub fn load_into<A: ResourceAccess + ?Sized>(
    access: &mut A,
    raw: &[u8],
    options: &ValidationOptions,
    out: &mut [u8],
) -> Result<(ResourceAux, usize, usize), DmaError> {
    let validated = validate(raw, options)?;
    let (aux, layout) = bind_and_write(access, &validated, out).map_err(|e| {
        log::warn!("DMA config load failed ({:?}): {}", e.kind(), e);
        e
    })?;
    log::info!("loaded DMA config into caller buffer: {} bytes", layout.total_size());
    Ok((aux, layout.fetch_size(), layout.total_size()))
}

/// Drop every reference taken by a successful load.
pub fn unload<A: ResourceAccess + ?Sized>(access: &mut A, aux: ResourceAux) {
    log::info!("unloading DMA config, releasing {} resources", aux.len());
    aux.release_all(access);
}
