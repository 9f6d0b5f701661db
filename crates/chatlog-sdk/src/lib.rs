//! Chatlog SDK - 聊天消息回填同步
//!
//! 本 SDK 负责在频道激活时把本地消息历史与远端权威日志对齐：
//! - 分页补齐本地与远端头部之间的缺口，按 log_id 去重
//! - 每个频道同一时刻最多一个同步，切走频道时丢弃过期分页
//! - 传输失败或被切走时保存断点，下次激活续拉（可持久化到 sled）
//! - 同步进行中合并实时消息
//! - 登录状态码映射与两阶段强制登录
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chatlog_sdk::{BackfillConfig, BackfillCoordinator, ProtocolClient};
//!
//! async fn on_channel_selected(
//!     client: Arc<dyn ProtocolClient>,
//!     channel_id: u64,
//!     local_last_log_id: u64,
//! ) -> chatlog_sdk::Result<()> {
//!     let config = BackfillConfig::builder()
//!         .page_fetch_timeout_ms(5_000)
//!         .data_dir("/path/to/data")
//!         .build();
//!     let coordinator = Arc::new(BackfillCoordinator::open(client, config).await?);
//!
//!     // 实时消息与回填并行合并
//!     let _listener = coordinator.spawn_live_listener();
//!
//!     coordinator.switch_to(channel_id);
//!     let messages = coordinator.run_full_sync(channel_id, local_last_log_id).await?;
//!     println!("频道 {} 共 {} 条消息", channel_id, messages.len());
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod error;
pub mod types;
pub mod client;
pub mod config;
pub mod events;
pub mod storage;
pub mod sync;
pub mod login;

#[cfg(test)]
mod testing;

// 重新导出核心类型，方便使用
pub use error::{ChatSyncError, Result};
pub use types::{
    partition_by_channel, Channel, ChannelId, ChatListPage, LogId, LogMessage, PacketRequest,
    PacketResponse, SyncDirection, SyncMessageResponse,
};
pub use client::ProtocolClient;
pub use config::{BackfillConfig, BackfillConfigBuilder, StallPolicy};
pub use events::{EventManager, EventStats, SyncEvent, SyncStatus};
pub use storage::{ChannelStore, KvStore};
pub use sync::{
    BackfillCoordinator, ExhaustReason, KvCheckpointStore, MemoryCheckpointStore, PageOutcome,
    RetryPolicy, SyncCheckpointStore, SyncFailureReason, SyncReport, SyncState,
};
pub use login::{
    AuthClient, AuthRejection, LoginCredentials, LoginErrorCode, LoginFlow, LoginOutcome,
    LoginRequest, LoginSession, PendingForceLogin,
};
