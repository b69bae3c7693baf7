//! pva-dma: validate and load accelerator DMA programs

use std::env;
use std::path::Path;

use anyhow::{bail, Context};
use pva_dma::config::Config;
use pva_dma::dma::types::DescField;
use pva_dma::dma::{self, FirmwareBlob, ValidatedConfig};
use pva_dma::resource::ResourceManifest;

const USAGE: &str = "usage: pva-dma <config.bin> [--resources manifest.toml] [--out blob.bin]
                     [--allow-tcm] [--dump]
       pva-dma --sample-config";

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let config = Config::get();

    let mut path = None;
    let mut resources = config.resource_manifest.clone();
    let mut out = None;
    let mut options = config.validation_options();
    let mut dump = false;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--resources" => {
                resources = Some(iter.next().context("--resources needs a path")?.clone());
            }
            "--out" | "-o" => {
                out = Some(iter.next().context("--out needs a path")?.clone());
            }
            "--allow-tcm" => options.allow_tcm = true,
            "--dump" => dump = true,
            "--sample-config" => {
                print!("{}", Config::sample_config());
                return Ok(());
            }
            "--help" | "-h" => {
                println!("{}", USAGE);
                return Ok(());
            }
            other if other.starts_with('-') => bail!("unknown option {}\n{}", other, USAGE),
            other => path = Some(other.to_string()),
        }
    }

    let Some(path) = path else {
        bail!("{}", USAGE);
    };

    let raw = std::fs::read(&path).with_context(|| format!("Failed to read {}", path))?;
    println!("Loading: {} ({} bytes)", path, raw.len());
    println!();

    let validated = dma::validate(&raw, &options).with_context(|| format!("{} rejected", path))?;
    if dump {
        print_validated(&validated);
        println!();
    }

    let manifest = match &resources {
        Some(manifest) => ResourceManifest::from_file(Path::new(manifest))?,
        None => {
            log::warn!("No resource manifest given, binding against an empty table");
            ResourceManifest::default()
        }
    };
    let table = manifest.build_table();
    let before = table.refcounts();

    let mut guard = table.lock();
    let loaded = dma::load(&mut guard, &raw, &options)
        .with_context(|| format!("Failed to load {}", path))?;
    println!("{}", loaded.summary);

    if dump {
        let blob = FirmwareBlob::decode(&loaded.blob).context("Failed to decode the written blob")?;
        print_blob(&blob);
    }

    let written = match &out {
        Some(out) if loaded.blob.len() > config.max_blob_size() => {
            let len = loaded.blob.len();
            dma::unload(&mut guard, loaded.aux);
            bail!(
                "blob is {} bytes, over the {} byte limit; not writing {}",
                len,
                config.max_blob_size(),
                out
            );
        }
        Some(out) => {
            std::fs::write(out, &loaded.blob).with_context(|| format!("Failed to write {}", out))?;
            Some(out)
        }
        None => None,
    };

    dma::unload(&mut guard, loaded.aux);
    drop(guard);

    if let Some(out) = written {
        println!("Wrote {}", out);
    }
    let after = table.refcounts();
    if before != after {
        bail!("reference counts changed across load/unload: {:?} -> {:?}", before, after);
    }
    println!("Reference counts restored");

    Ok(())
}

/// Per-descriptor access sets and slot envelopes.
fn print_validated(v: &ValidatedConfig) {
    println!("Descriptors");
    println!("===========");
    for (i, desc) in v.config.descriptors.iter().enumerate() {
        let index = i as u8;
        let owner = v
            .trace
            .owner(index)
            .map_or_else(|| "-".to_string(), |c| format!("ch{}", c));
        println!(
            "  [{:2}] id {:3} {:>4} {:?} -> {:?} {}x{}",
            i,
            v.config.hw_descriptor_id(index),
            owner,
            desc.src.mode,
            desc.dst.mode,
            desc.tx,
            desc.ty
        );
        for field in DescField::ALL {
            if let Some(entry) = v.access[i].get(field) {
                println!("         {:?} {}", field, entry);
            }
        }
    }

    println!();
    println!("Slots");
    println!("=====");
    let tables = [("static", &v.relocs.static_slots), ("dynamic", &v.relocs.dynamic_slots)];
    for (kind, slots) in tables {
        for (i, slot) in slots.iter().enumerate().filter(|(_, s)| s.is_used()) {
            let envelope = slot.envelope.map_or_else(|| "-".to_string(), |e| e.to_string());
            println!(
                "  {:7} {:2} {:?} {} ({} relocs, channels 0x{:04X})",
                kind, i, slot.flags, envelope, slot.reloc_count, slot.channels
            );
        }
    }
}

/// Firmware-facing view of the blob.
fn print_blob(blob: &FirmwareBlob) {
    println!();
    println!("Firmware blob");
    println!("=============");
    println!("Flags: {:?}", blob.header.flags);
    for (i, ch) in blob.channels.iter().enumerate() {
        let hwseq = ch
            .hwseq
            .map_or_else(|| "off".to_string(), |(start, end)| format!("{}..={}", start, end));
        println!("  ch[{:2}] first desc {:3}, hwseq {}", i, ch.first_desc_id, hwseq);
    }
    for (i, d) in blob.descriptors.iter().enumerate() {
        println!(
            "  desc[{:2}] src 0x{:010X} dst 0x{:010X} link {}",
            i, d.addresses[0], d.addresses[1], d.link_hw_id
        );
    }
    for (desc, field) in &blob.relocs {
        println!("  reloc desc {} field {}", desc, field);
    }
}
