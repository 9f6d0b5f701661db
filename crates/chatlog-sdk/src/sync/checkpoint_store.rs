//! 同步断点存储
//!
//! 保存中途失败或被切走的 SyncState，下次激活时从断点续拉。
//! Key 格式：sync_checkpoint:{channel_id}

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::Result;
use crate::storage::kv::KvStore;
use crate::sync::SyncState;
use crate::types::ChannelId;

const PREFIX: &str = "sync_checkpoint";

/// 断点存储 trait
#[async_trait]
pub trait SyncCheckpointStore: Send + Sync {
    async fn load(&self, channel_id: ChannelId) -> Result<Option<SyncState>>;

    async fn save(&self, state: &SyncState) -> Result<()>;

    async fn remove(&self, channel_id: ChannelId) -> Result<()>;
}

/// 内存断点存储（进程内有效）
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    states: Mutex<HashMap<ChannelId, SyncState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }
}

#[async_trait]
impl SyncCheckpointStore for MemoryCheckpointStore {
    async fn load(&self, channel_id: ChannelId) -> Result<Option<SyncState>> {
        Ok(self.states.lock().get(&channel_id).cloned())
    }

    async fn save(&self, state: &SyncState) -> Result<()> {
        self.states.lock().insert(state.channel_id, state.clone());
        Ok(())
    }

    async fn remove(&self, channel_id: ChannelId) -> Result<()> {
        self.states.lock().remove(&channel_id);
        Ok(())
    }
}

/// sled 断点存储（跨进程重启有效）
#[derive(Debug, Clone)]
pub struct KvCheckpointStore {
    kv: KvStore,
}

impl KvCheckpointStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    fn key(channel_id: ChannelId) -> String {
        format!("{}:{}", PREFIX, channel_id)
    }

    /// 列出所有未完成的断点
    pub async fn pending(&self) -> Result<Vec<SyncState>> {
        let prefix = format!("{}:", PREFIX);
        let entries: Vec<(String, SyncState)> = self.kv.scan_prefix(&prefix).await?;
        Ok(entries.into_iter().map(|(_, state)| state).collect())
    }
}

#[async_trait]
impl SyncCheckpointStore for KvCheckpointStore {
    async fn load(&self, channel_id: ChannelId) -> Result<Option<SyncState>> {
        self.kv.get(Self::key(channel_id)).await
    }

    async fn save(&self, state: &SyncState) -> Result<()> {
        self.kv.set(Self::key(state.channel_id), state).await?;
        self.kv.flush().await
    }

    async fn remove(&self, channel_id: ChannelId) -> Result<()> {
        self.kv.remove(Self::key(channel_id)).await?;
        Ok(())
    }
}
