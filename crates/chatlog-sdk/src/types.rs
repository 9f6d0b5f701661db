//! 频道、消息日志与同步请求的数据模型

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 频道 ID（服务端 64 位整数）
pub type ChannelId = u64;

/// 日志位置（每个频道内单调不减）
pub type LogId = u64;

/// 频道
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    /// 本地已完整拉取的最高日志位置，0 表示本地无历史
    pub last_synced_log_id: LogId,
}

impl Channel {
    pub fn new(id: ChannelId) -> Self {
        Self {
            id,
            last_synced_log_id: 0,
        }
    }
}

/// 频道消息日志（不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    /// 日志位置，分页游标
    pub log_id: LogId,
    /// 上一条消息的 log_id，构成向后链表；0 表示链首
    pub prev_log_id: LogId,
    pub channel_id: ChannelId,
    pub sender_id: u64,
    /// 发送时间（UNIX 秒）
    pub send_at: i64,
    /// 不透明负载，SDK 不解析
    pub payload: serde_json::Value,
}

impl LogMessage {
    pub fn new(log_id: LogId, prev_log_id: LogId, channel_id: ChannelId) -> Self {
        Self {
            log_id,
            prev_log_id,
            channel_id,
            sender_id: 0,
            send_at: 0,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_sender(mut self, sender_id: u64) -> Self {
        self.sender_id = sender_id;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// 分页方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SyncDirection {
    /// 从本地最后位置向远端头部推进（log_id > cursor，升序）
    #[default]
    Forward,
    /// 从远端头部沿 prev_log_id 链回溯（log_id <= cursor，降序）
    Backward,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Forward => "forward",
            SyncDirection::Backward => "backward",
        }
    }
}

/// 通用请求描述（requestPacket 的输入）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketRequest {
    /// 同步请求：拉取 (cur, max] 区间内最多 count 条消息
    SyncMessage {
        channel_id: ChannelId,
        cur: LogId,
        count: u32,
        max: LogId,
    },
}

/// 同步请求响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncMessageResponse {
    pub chat_list: Vec<LogMessage>,
    /// 服务端最新 token（用于第二次请求的 max）
    pub last_token_id: LogId,
    pub is_ok: bool,
}

/// 通用响应描述（requestPacket 的输出）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketResponse {
    SyncMessage(SyncMessageResponse),
}

/// getMessagesFrom 的响应；`result` 为 `None` 表示没有更多消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChatListPage {
    pub result: Option<Vec<LogMessage>>,
}

impl ChatListPage {
    pub fn empty() -> Self {
        Self { result: None }
    }

    pub fn of(messages: Vec<LogMessage>) -> Self {
        Self {
            result: Some(messages),
        }
    }

    /// 展开为消息列表，`None` 视为空页
    pub fn into_messages(self) -> Vec<LogMessage> {
        self.result.unwrap_or_default()
    }
}

/// 将未过滤的全局消息流按频道拆分（保留原顺序）
pub fn partition_by_channel(
    messages: impl IntoIterator<Item = LogMessage>,
) -> HashMap<ChannelId, Vec<LogMessage>> {
    let mut partitions: HashMap<ChannelId, Vec<LogMessage>> = HashMap::new();
    for message in messages {
        partitions.entry(message.channel_id).or_default().push(message);
    }
    partitions
}
