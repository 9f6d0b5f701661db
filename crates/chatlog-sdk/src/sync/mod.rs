/// 消息回填同步模块
///
/// 职责：
/// - 维护每个频道的同步会话（游标、远端头部、累积消息）
/// - 分页拉取并去重，直到到达边界
/// - 保存中途中断的断点，下次激活时续拉
/// - 在同步进行中合并实时消息

pub mod sync_state;
pub mod backfill;
pub mod retry_policy;
pub mod checkpoint_store;

pub use sync_state::{ExhaustReason, PageOutcome, SyncState};
pub use backfill::BackfillCoordinator;
pub use retry_policy::{RetryPolicy, SyncFailureReason};
pub use checkpoint_store::{KvCheckpointStore, MemoryCheckpointStore, SyncCheckpointStore};

use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, LogId, LogMessage};

/// 一次完整同步的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub channel_id: ChannelId,
    /// 频道当前全部消息（log_id 升序、唯一）
    pub messages: Vec<LogMessage>,
    /// 本轮新合并的消息数
    pub new_messages: usize,
    /// 本轮（含续拉前）累计拉取页数
    pub pages_fetched: u32,
    /// 会话使用的远端头部
    pub remote_head_log_id: LogId,
    /// 是否从断点续拉
    pub resumed: bool,
    pub exhaust_reason: Option<ExhaustReason>,
    pub last_sync_at: i64,
}
