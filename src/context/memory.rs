//! In-memory context store for tests and ephemeral runs.

use super::{ChannelContext, ContextStore};
use crate::ChannelId;
use crate::error::StoreError;

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryContextStore {
    contexts: RwLock<HashMap<ChannelId, ChannelContext>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn load(&self, channel_id: &ChannelId) -> Result<ChannelContext, StoreError> {
        Ok(self
            .contexts
            .read()
            .await
            .get(channel_id)
            .cloned()
            .unwrap_or_else(|| ChannelContext::new(channel_id.clone())))
    }

    async fn save(&self, context: &ChannelContext) -> Result<(), StoreError> {
        self.contexts
            .write()
            .await
            .insert(context.channel_id.clone(), context.clone());
        Ok(())
    }
}
