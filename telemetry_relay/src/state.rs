use crate::config::Config;
use crate::crypto::Crypto;
use crate::relay::topics::MissionTopics;
use crate::store::seed::MemoryStores;
use crate::store::{AccessLedger, CommandStore, DescriptorCatalog, PacketStore, SecretStore};
use std::sync::Arc;

/// Shared by every connection. Holds no per-session state.
#[derive(Clone)]
pub struct AppState {
    pub secrets: Arc<dyn SecretStore>,
    pub ledger: Arc<dyn AccessLedger>,
    pub packets: Arc<dyn PacketStore>,
    pub commands: Arc<dyn CommandStore>,
    pub descriptors: Arc<dyn DescriptorCatalog>,
    pub topics: MissionTopics,
    pub crypto: Crypto,
}

impl AppState {
    pub fn new(config: &Config, stores: &MemoryStores) -> Self {
        AppState {
            secrets: stores.secrets.clone(),
            ledger: stores.ledger.clone(),
            packets: stores.packets.clone(),
            commands: stores.commands.clone(),
            descriptors: stores.descriptors.clone(),
            topics: MissionTopics::new(config.topic_capacity),
            crypto: Crypto::from_config(config),
        }
    }
}
