/// 频道消息存储
///
/// 职责：
/// - 保存每个频道的永久消息（按 log_id 去重、升序）
/// - 维护频道的 last_synced_log_id
/// - 接收同步会话退役时合并的消息

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use tracing::debug;

use crate::types::{Channel, ChannelId, LogId, LogMessage};

#[derive(Debug, Default)]
struct ChannelHistory {
    last_synced_log_id: LogId,
    messages: BTreeMap<LogId, LogMessage>,
}

impl ChannelHistory {
    /// 沿 prev_log_id 链推进 last_synced_log_id，直到遇到缺口
    fn advance_contiguous(&mut self) {
        while let Some(next) = self
            .messages
            .range((Bound::Excluded(self.last_synced_log_id), Bound::Unbounded))
            .next()
            .map(|(_, m)| m)
        {
            if next.prev_log_id != self.last_synced_log_id {
                break;
            }
            self.last_synced_log_id = next.log_id;
        }
    }
}

/// 频道存储
#[derive(Debug, Default)]
pub struct ChannelStore {
    channels: RwLock<HashMap<ChannelId, ChannelHistory>>,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取频道的 last_synced_log_id，不存在时为 0
    pub fn last_synced_log_id(&self, channel_id: ChannelId) -> LogId {
        self.channels
            .read()
            .get(&channel_id)
            .map(|h| h.last_synced_log_id)
            .unwrap_or(0)
    }

    /// 获取频道快照
    pub fn channel(&self, channel_id: ChannelId) -> Option<Channel> {
        self.channels.read().get(&channel_id).map(|h| Channel {
            id: channel_id,
            last_synced_log_id: h.last_synced_log_id,
        })
    }

    /// 列出所有已知频道
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self
            .channels
            .read()
            .iter()
            .map(|(&id, h)| Channel {
                id,
                last_synced_log_id: h.last_synced_log_id,
            })
            .collect();
        channels.sort_by_key(|c| c.id);
        channels
    }

    /// 合并一次完整同步的结果，last_synced_log_id 只增不减
    ///
    /// 返回新增消息数
    pub fn merge_synced(
        &self,
        channel_id: ChannelId,
        messages: impl IntoIterator<Item = LogMessage>,
        synced_up_to: LogId,
    ) -> usize {
        let mut channels = self.channels.write();
        let history = channels.entry(channel_id).or_default();

        let mut inserted = 0;
        for message in messages {
            if message.channel_id != channel_id {
                continue;
            }
            if history.messages.insert(message.log_id, message).is_none() {
                inserted += 1;
            }
        }
        history.last_synced_log_id = history.last_synced_log_id.max(synced_up_to);
        history.advance_contiguous();

        debug!(
            "合并同步结果: channel_id={}, inserted={}, last_synced_log_id={}",
            channel_id, inserted, history.last_synced_log_id
        );
        inserted
    }

    /// 追加一条实时消息
    ///
    /// 只有当 prev_log_id 链与 last_synced_log_id 相接时才推进 last_synced_log_id，
    /// 否则中间存在缺口，留给下一次回填。返回是否为新消息。
    pub fn append_live(&self, message: LogMessage) -> bool {
        let mut channels = self.channels.write();
        let history = channels.entry(message.channel_id).or_default();

        if history.messages.contains_key(&message.log_id) {
            return false;
        }
        history.messages.insert(message.log_id, message);
        history.advance_contiguous();
        true
    }

    /// 频道的全部消息（log_id 升序）
    pub fn messages(&self, channel_id: ChannelId) -> Vec<LogMessage> {
        self.channels
            .read()
            .get(&channel_id)
            .map(|h| h.messages.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn message_count(&self, channel_id: ChannelId) -> usize {
        self.channels
            .read()
            .get(&channel_id)
            .map(|h| h.messages.len())
            .unwrap_or(0)
    }

    /// 清理频道数据（用于测试或重置）
    pub fn clear(&self) {
        self.channels.write().clear();
    }
}
