// src/store/mod.rs
//! Collaborator seams consumed by the handshake and the relay.
//!
//! Each trait is the abstract interface of one external collaborator;
//! `memory` provides the in-process implementations the binary runs with.
pub mod memory;
pub mod seed;

use crate::errors::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use station_protocol::{Descriptor, TelemetryPacket, Timestamp};
use std::sync::Arc;
use uuid::Uuid;

// ------------------------------- records ------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationCredential {
    pub id: String,
    pub key: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

impl StationCredential {
    pub fn secret(&self) -> &[u8] {
        self.key.as_bytes()
    }
}

/// Input to `AccessLedger::record`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessAttempt {
    pub station: String,
    pub peer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessLogEntry {
    pub id: Uuid,
    pub station: String,
    pub peer: String,
    pub authenticated: bool,
    pub created_at: Timestamp,
}

impl AccessLogEntry {
    pub fn new(attempt: AccessAttempt) -> Self {
        Self {
            id: Uuid::new_v4(),
            station: attempt.station,
            peer: attempt.peer,
            authenticated: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub id: Uuid,
    pub key: String,
    pub packet: TelemetryPacket,
    pub stored_at: Timestamp,
}

impl TelemetryRecord {
    pub fn mid(&self) -> &str {
        &self.packet.h.mid
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Stored(TelemetryRecord),
    Duplicate,
}

/// Queued CAP. Created out of band with `delivered_at = None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandRecord {
    pub id: Uuid,
    pub mid: String,
    pub h: Value,
    pub p: Value,
    pub created_at: Timestamp,
    pub delivered_at: Option<Timestamp>,
}

impl CommandRecord {
    pub fn descriptor(&self) -> Descriptor {
        Descriptor { h: self.h.clone(), p: self.p.clone() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkOutcome {
    Marked(CommandRecord),
    AlreadyDelivered,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDescriptor {
    pub id: Uuid,
    pub t: String,
    pub revision: u32,
    pub h: Value,
    pub p: Value,
}

impl StoredDescriptor {
    pub fn strip(self) -> Descriptor {
        Descriptor { h: self.h, p: self.p }
    }
}

// ------------------------------- seams --------------------------------------

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn lookup(&self, id: &str) -> Result<Option<StationCredential>, StoreError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessLedger: Send + Sync {
    async fn record(&self, attempt: AccessAttempt) -> Result<AccessLogEntry, StoreError>;
    async fn mark_authenticated(&self, entry: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TelemetryCollection: Send + Sync {
    fn name(&self) -> &str;
    /// Exactly one concurrent insert of the same logical packet succeeds.
    async fn insert_unique(&self, packet: &TelemetryPacket) -> Result<InsertOutcome, StoreError>;
}

#[async_trait]
pub trait PacketStore: Send + Sync {
    async fn resolve_collection(&self, type_tag: &str) -> Option<Arc<dyn TelemetryCollection>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandStore: Send + Sync {
    async fn find_undelivered(&self, mid: &str) -> Result<Vec<CommandRecord>, StoreError>;
    /// Compare-and-set: only succeeds while `delivered_at` is still unset.
    async fn mark_delivered(&self, id: Uuid, at: Timestamp) -> Result<MarkOutcome, StoreError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DescriptorCatalog: Send + Sync {
    async fn find(&self, type_tag: &str) -> Result<Vec<StoredDescriptor>, StoreError>;
}
