// src/store/memory.rs
use super::*;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

// ------------------------------ secrets -------------------------------------

#[derive(Default)]
pub struct MemorySecretStore {
    stations: DashMap<String, StationCredential>,
}

impl MemorySecretStore {
    pub fn insert(&self, cred: StationCredential) {
        self.stations.insert(cred.id.clone(), cred);
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn lookup(&self, id: &str) -> Result<Option<StationCredential>, StoreError> {
        Ok(self.stations.get(id).map(|c| c.clone()))
    }
}

// ------------------------------ ledger --------------------------------------

#[derive(Default)]
pub struct MemoryLedger {
    entries: DashMap<Uuid, AccessLogEntry>,
}

impl MemoryLedger {
    pub fn get(&self, id: &Uuid) -> Option<AccessLogEntry> {
        self.entries.get(id).map(|e| e.clone())
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<AccessLogEntry> {
        let mut all: Vec<_> = self.entries.iter().map(|e| e.clone()).collect();
        all.sort_by_key(|e| e.created_at);
        all
    }
}

#[async_trait]
impl AccessLedger for MemoryLedger {
    async fn record(&self, attempt: AccessAttempt) -> Result<AccessLogEntry, StoreError> {
        let entry = AccessLogEntry::new(attempt);
        self.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn mark_authenticated(&self, entry: Uuid) -> Result<(), StoreError> {
        match self.entries.get_mut(&entry) {
            Some(mut e) => {
                e.authenticated = true;
                Ok(())
            }
            None => Err(StoreError::Corrupt(format!("no ledger entry {entry}"))),
        }
    }
}

// ----------------------------- telemetry ------------------------------------

pub struct MemoryCollection {
    name: String,
    records: DashMap<String, TelemetryRecord>,
}

impl MemoryCollection {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), records: DashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl TelemetryCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_unique(&self, packet: &TelemetryPacket) -> Result<InsertOutcome, StoreError> {
        let key = packet.unique_key();
        // entry() holds the shard lock, so racing inserts of one key serialize here
        match self.records.entry(key.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::Duplicate),
            Entry::Vacant(slot) => {
                let rec = TelemetryRecord {
                    id: Uuid::new_v4(),
                    key,
                    packet: packet.clone(),
                    stored_at: Utc::now(),
                };
                slot.insert(rec.clone());
                Ok(InsertOutcome::Stored(rec))
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryPacketStore {
    collections: DashMap<String, Arc<MemoryCollection>>,
}

impl MemoryPacketStore {
    pub fn register_type(&self, type_tag: &str) -> Arc<MemoryCollection> {
        self.collections
            .entry(type_tag.to_string())
            .or_insert_with(|| Arc::new(MemoryCollection::new(type_tag)))
            .clone()
    }

    pub fn collection(&self, type_tag: &str) -> Option<Arc<MemoryCollection>> {
        self.collections.get(type_tag).map(|c| c.clone())
    }
}

#[async_trait]
impl PacketStore for MemoryPacketStore {
    async fn resolve_collection(&self, type_tag: &str) -> Option<Arc<dyn TelemetryCollection>> {
        self.collections
            .get(type_tag)
            .map(|c| c.clone() as Arc<dyn TelemetryCollection>)
    }
}

// ----------------------------- commands -------------------------------------

#[derive(Default)]
pub struct MemoryCommandStore {
    commands: DashMap<Uuid, CommandRecord>,
}

impl MemoryCommandStore {
    /// Queue an undelivered CAP. `h.mid` must be a non-empty string.
    pub fn enqueue(&self, h: Value, p: Value) -> Result<CommandRecord, StoreError> {
        let mid = match h.get("mid").and_then(Value::as_str) {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => return Err(StoreError::Corrupt("command header without mid".into())),
        };
        let rec = CommandRecord {
            id: Uuid::new_v4(),
            mid,
            h,
            p,
            created_at: Utc::now(),
            delivered_at: None,
        };
        debug!(cmd = %rec.id, mid = %rec.mid, "command queued");
        self.commands.insert(rec.id, rec.clone());
        Ok(rec)
    }

    pub fn get(&self, id: &Uuid) -> Option<CommandRecord> {
        self.commands.get(id).map(|c| c.clone())
    }
}

#[async_trait]
impl CommandStore for MemoryCommandStore {
    async fn find_undelivered(&self, mid: &str) -> Result<Vec<CommandRecord>, StoreError> {
        let mut found: Vec<_> = self
            .commands
            .iter()
            .filter(|c| c.mid == mid && c.delivered_at.is_none())
            .map(|c| c.clone())
            .collect();
        found.sort_by_key(|c| c.created_at);
        Ok(found)
    }

    async fn mark_delivered(&self, id: Uuid, at: Timestamp) -> Result<MarkOutcome, StoreError> {
        let Some(mut rec) = self.commands.get_mut(&id) else {
            return Err(StoreError::Corrupt(format!("no command {id}")));
        };
        if rec.delivered_at.is_some() {
            return Ok(MarkOutcome::AlreadyDelivered);
        }
        rec.delivered_at = Some(at);
        Ok(MarkOutcome::Marked(rec.clone()))
    }
}

// ---------------------------- descriptors -----------------------------------

#[derive(Default)]
pub struct MemoryDescriptorCatalog {
    by_type: DashMap<String, Vec<StoredDescriptor>>,
}

impl MemoryDescriptorCatalog {
    pub fn add(&self, type_tag: &str, h: Value, p: Value) {
        let mut list = self.by_type.entry(type_tag.to_string()).or_default();
        let revision = list.len() as u32 + 1;
        list.push(StoredDescriptor { id: Uuid::new_v4(), t: type_tag.to_string(), revision, h, p });
    }
}

#[async_trait]
impl DescriptorCatalog for MemoryDescriptorCatalog {
    async fn find(&self, type_tag: &str) -> Result<Vec<StoredDescriptor>, StoreError> {
        Ok(self.by_type.get(type_tag).map(|l| l.clone()).unwrap_or_default())
    }
}
