//! 协议客户端抽象
//!
//! 消息协议本身由外部客户端库实现，SDK 只依赖这里列出的能力：
//! - `request_packet`：通用请求/响应原语（同步请求、获取头部游标）
//! - `get_messages_from`：向前分页原语
//! - `get_messages_before`：向后分页原语（可选）
//! - `subscribe_messages`：实时消息订阅

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{ChatSyncError, Result};
use crate::types::{ChannelId, ChatListPage, LogId, LogMessage, PacketRequest, PacketResponse};

/// 协议客户端 trait（由接入层实现）
#[async_trait]
pub trait ProtocolClient: Send + Sync + std::fmt::Debug {
    /// 发送请求并等待响应
    async fn request_packet(&self, request: PacketRequest) -> Result<PacketResponse>;

    /// 拉取 `cursor` 之后的一页消息（log_id 升序）
    async fn get_messages_from(&self, channel_id: ChannelId, cursor: LogId) -> Result<ChatListPage>;

    /// 拉取 `cursor`（含）及之前的一页消息（log_id 降序）
    async fn get_messages_before(
        &self,
        channel_id: ChannelId,
        cursor: LogId,
    ) -> Result<ChatListPage> {
        let _ = (channel_id, cursor);
        Err(ChatSyncError::Unsupported(
            "backward pagination is not provided by this client".to_string(),
        ))
    }

    /// 订阅实时消息（全局流，未按频道过滤）
    fn subscribe_messages(&self) -> broadcast::Receiver<LogMessage>;
}
