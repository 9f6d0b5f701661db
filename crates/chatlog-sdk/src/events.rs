//! 事件系统模块 - 同步状态变更的广播与订阅
//!
//! UI 层可以轮询 `BackfillCoordinator::sync_status`，也可以订阅这里的事件流
//! 来决定是否显示加载指示器。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::types::{ChannelId, LogId};

/// 每个频道的同步状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// 未同步
    Idle,
    /// 正在同步
    Syncing {
        frontier_log_id: LogId,
        pages_fetched: u32,
    },
    /// 同步完成
    Completed {
        last_log_id: LogId,
        new_messages: usize,
        pages_fetched: u32,
    },
    /// 同步失败
    Failed {
        error: String,
        retryable: bool,
    },
    /// 频道被切走，断点已保存
    Suspended {
        frontier_log_id: LogId,
    },
}

impl SyncStatus {
    /// UI 是否应显示加载指示器
    pub fn is_loading(&self) -> bool {
        matches!(self, SyncStatus::Syncing { .. })
    }
}

/// 同步事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncEvent {
    SyncStarted {
        channel_id: ChannelId,
        remote_head_log_id: LogId,
        resumed: bool,
        timestamp: i64,
    },
    PageApplied {
        channel_id: ChannelId,
        new_messages: usize,
        frontier_log_id: LogId,
        timestamp: i64,
    },
    SyncCompleted {
        channel_id: ChannelId,
        last_log_id: LogId,
        new_messages: usize,
        timestamp: i64,
    },
    SyncFailed {
        channel_id: ChannelId,
        error: String,
        retryable: bool,
        timestamp: i64,
    },
    SyncSuspended {
        channel_id: ChannelId,
        frontier_log_id: LogId,
        timestamp: i64,
    },
    LiveMessageMerged {
        channel_id: ChannelId,
        log_id: LogId,
        during_sync: bool,
        timestamp: i64,
    },
}

impl SyncEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::SyncStarted { .. } => "sync_started",
            SyncEvent::PageApplied { .. } => "page_applied",
            SyncEvent::SyncCompleted { .. } => "sync_completed",
            SyncEvent::SyncFailed { .. } => "sync_failed",
            SyncEvent::SyncSuspended { .. } => "sync_suspended",
            SyncEvent::LiveMessageMerged { .. } => "live_message_merged",
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        match self {
            SyncEvent::SyncStarted { channel_id, .. }
            | SyncEvent::PageApplied { channel_id, .. }
            | SyncEvent::SyncCompleted { channel_id, .. }
            | SyncEvent::SyncFailed { channel_id, .. }
            | SyncEvent::SyncSuspended { channel_id, .. }
            | SyncEvent::LiveMessageMerged { channel_id, .. } => *channel_id,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            SyncEvent::SyncStarted { timestamp, .. }
            | SyncEvent::PageApplied { timestamp, .. }
            | SyncEvent::SyncCompleted { timestamp, .. }
            | SyncEvent::SyncFailed { timestamp, .. }
            | SyncEvent::SyncSuspended { timestamp, .. }
            | SyncEvent::LiveMessageMerged { timestamp, .. } => *timestamp,
        }
    }
}

/// 当前时间（毫秒）
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 最后事件时间
    pub last_event_time: Option<i64>,
}

/// 事件管理器
#[derive(Debug, Clone)]
pub struct EventManager {
    sender: broadcast::Sender<SyncEvent>,
    stats: Arc<RwLock<EventStats>>,
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            stats: Arc::new(RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub async fn emit(&self, event: SyncEvent) {
        debug!("Emitting event: {} channel_id={}", event.event_type(), event.channel_id());

        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 没有订阅者时 send 失败属正常场景
        if let Err(e) = self.sender.send(event) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub async fn get_stats(&self) -> EventStats {
        self.stats.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_manager() {
        let manager = EventManager::new(16);
        let mut receiver = manager.subscribe();

        manager
            .emit(SyncEvent::SyncCompleted {
                channel_id: 10,
                last_log_id: 150,
                new_messages: 50,
                timestamp: now_millis(),
            })
            .await;

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "sync_completed");
        assert_eq!(received.channel_id(), 10);

        let stats = manager.get_stats().await;
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.events_by_type.get("sync_completed"), Some(&1));
    }

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let manager = EventManager::new(4);
        manager
            .emit(SyncEvent::SyncSuspended {
                channel_id: 1,
                frontier_log_id: 3,
                timestamp: 0,
            })
            .await;
        assert_eq!(manager.get_stats().await.total_events, 1);
    }

    #[test]
    fn loading_indicator_only_while_syncing() {
        assert!(SyncStatus::Syncing { frontier_log_id: 1, pages_fetched: 0 }.is_loading());
        assert!(!SyncStatus::Idle.is_loading());
        assert!(!SyncStatus::Suspended { frontier_log_id: 1 }.is_loading());
    }
}
