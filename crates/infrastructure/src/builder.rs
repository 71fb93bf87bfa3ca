use std::sync::Arc;

use application::ChannelSenders;
use config::NotificationsConfig;
use thiserror::Error;

use crate::channels::build_channel_senders;
use crate::memory::MemoryStorage;

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct Infrastructure {
    pub storage: Arc<MemoryStorage>,
    pub senders: ChannelSenders,
}

impl Infrastructure {
    pub fn build(config: &NotificationsConfig) -> Result<Self, InfrastructureError> {
        let storage = Arc::new(MemoryStorage::new());
        let senders = build_channel_senders(&config.channels)?;
        Ok(Self { storage, senders })
    }
}
