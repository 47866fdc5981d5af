// src/store/seed.rs
//! TOML seed for the in-memory stores: stations, packet types with their
//! descriptors, and CAPs queued out of band.
use super::memory::*;
use super::StationCredential;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default, rename = "station")]
    pub stations: Vec<StationCredential>,
    #[serde(default, rename = "packet_type")]
    pub packet_types: Vec<PacketTypeSeed>,
    #[serde(default, rename = "command")]
    pub commands: Vec<CommandSeed>,
}

#[derive(Debug, Deserialize)]
pub struct PacketTypeSeed {
    pub tag: String,
    #[serde(default, rename = "descriptor")]
    pub descriptors: Vec<DescriptorSeed>,
}

#[derive(Debug, Deserialize)]
pub struct DescriptorSeed {
    pub h: Value,
    #[serde(default)]
    pub p: Value,
}

#[derive(Debug, Deserialize)]
pub struct CommandSeed {
    pub h: Value,
    #[serde(default)]
    pub p: Value,
}

impl SeedFile {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid seed file")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading seed {}", path.display()))?;
        Self::parse(&text)
    }
}

/// Concrete in-memory collaborators, kept typed so seeding and tests can
/// reach the extra inspection helpers.
#[derive(Clone, Default)]
pub struct MemoryStores {
    pub secrets: Arc<MemorySecretStore>,
    pub ledger: Arc<MemoryLedger>,
    pub packets: Arc<MemoryPacketStore>,
    pub commands: Arc<MemoryCommandStore>,
    pub descriptors: Arc<MemoryDescriptorCatalog>,
}

impl MemoryStores {
    pub fn from_seed(seed: SeedFile) -> Result<Self> {
        let stores = Self::default();
        for st in seed.stations {
            stores.secrets.insert(st);
        }
        for pt in seed.packet_types {
            stores.packets.register_type(&pt.tag);
            for d in pt.descriptors {
                stores.descriptors.add(&pt.tag, d.h, d.p);
            }
        }
        for c in seed.commands {
            stores
                .commands
                .enqueue(c.h, c.p)
                .map_err(|e| anyhow::anyhow!("seed command: {e}"))?;
        }
        info!(stations = stores.secrets.len(), "stores seeded");
        Ok(stores)
    }
}
