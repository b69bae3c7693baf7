//! TOML description of a resource table.
//!
//! ```toml
//! [[dram]]
//! id = 1
//! iova = 0x8000_0000
//! size = 65536
//!
//! [[executable]]
//! id = 2
//! symbols = [ { id = 0, addr = 0x0, size = 4096 } ]
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{InMemoryResourceTable, ResourceId, VmemSymbol};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceManifest {
    pub dram: Vec<DramEntry>,
    pub executable: Vec<ExecutableEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DramEntry {
    pub id: ResourceId,
    pub iova: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableEntry {
    pub id: ResourceId,
    #[serde(default)]
    pub symbols: Vec<SymbolEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolEntry {
    pub id: u32,
    pub addr: u64,
    pub size: u64,
}

impl ResourceManifest {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Build an in-memory table with every listed resource at refcount 0.
    pub fn build_table(&self) -> InMemoryResourceTable {
        let table = InMemoryResourceTable::new();
        for dram in &self.dram {
            table.insert_dram(dram.id, dram.iova, dram.size);
        }
        for exec in &self.executable {
            table.insert_executable(
                exec.id,
                exec.symbols
                    .iter()
                    .map(|s| (s.id, VmemSymbol { addr: s.addr, size: s.size })),
            );
        }
        log::debug!(
            "Resource manifest: {} DRAM buffers, {} executables",
            self.dram.len(),
            self.executable.len()
        );
        table
    }
}
