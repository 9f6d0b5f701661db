/// 单频道同步会话状态
///
/// 职责：
/// - 记录远端头部位置与当前游标（frontier）
/// - 按 log_id 去重累积消息（BTreeMap 保证升序且唯一）
/// - 根据每页结果推进游标并判定本轮是否结束
///
/// 不做任何 I/O，由 BackfillCoordinator 负责拉取与持久化。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::StallPolicy;
use crate::error::{ChatSyncError, Result};
use crate::types::{ChannelId, LogId, LogMessage, SyncDirection};

/// 本轮结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExhaustReason {
    /// 游标已到达（或越过）远端头部
    ReachedHead,
    /// 游标已回溯到本地已覆盖的位置
    ReachedLocal,
    /// 已回溯到链首（prev_log_id == 0）
    ChainStart,
    /// 服务端返回空页
    EmptyPage,
    /// 游标未推进，视为边界
    Stalled,
}

/// 单页应用结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOutcome {
    /// 本页新增（去重后）的消息数
    pub new_messages: usize,
    /// 应用后的游标
    pub frontier_log_id: LogId,
    /// 本轮是否结束
    pub exhausted: Option<ExhaustReason>,
}

/// 同步状态（每频道、每会话）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub channel_id: ChannelId,
    /// 会话开始时本地已有的最后位置
    pub local_last_log_id: LogId,
    /// 会话内只获取一次的远端头部
    pub remote_head_log_id: LogId,
    /// 当前游标
    pub frontier_log_id: LogId,
    pub direction: SyncDirection,
    accumulated: BTreeMap<LogId, LogMessage>,
    /// 经实时通道并入的消息
    #[serde(default)]
    live_log_ids: BTreeSet<LogId>,
    /// 上一页最后一条消息
    last_page_tail: Option<LogId>,
    pub pages_fetched: u32,
    exhausted: Option<ExhaustReason>,
    /// 会话创建时间（毫秒）
    pub started_at: i64,
}

impl SyncState {
    /// 创建同步状态
    pub fn new(
        channel_id: ChannelId,
        local_last_log_id: LogId,
        remote_head_log_id: LogId,
        direction: SyncDirection,
    ) -> Self {
        let frontier_log_id = match direction {
            SyncDirection::Forward => local_last_log_id,
            SyncDirection::Backward => remote_head_log_id,
        };
        let exhausted = if remote_head_log_id <= local_last_log_id {
            Some(ExhaustReason::ReachedHead)
        } else {
            None
        };

        Self {
            channel_id,
            local_last_log_id,
            remote_head_log_id,
            frontier_log_id,
            direction,
            accumulated: BTreeMap::new(),
            live_log_ids: BTreeSet::new(),
            last_page_tail: None,
            pages_fetched: 0,
            exhausted,
            started_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 本轮是否已结束
    pub fn is_complete(&self) -> bool {
        self.exhausted.is_some()
    }

    pub fn exhaust_reason(&self) -> Option<ExhaustReason> {
        self.exhausted
    }

    /// 已累积消息数
    pub fn accumulated_len(&self) -> usize {
        self.accumulated.len()
    }

    /// 已累积消息（按 log_id 升序）
    pub fn messages(&self) -> impl Iterator<Item = &LogMessage> {
        self.accumulated.values()
    }

    pub fn into_messages(self) -> Vec<LogMessage> {
        self.accumulated.into_values().collect()
    }

    /// 已累积的最大 log_id
    pub fn max_log_id(&self) -> Option<LogId> {
        self.accumulated.keys().next_back().copied()
    }

    pub fn contains(&self, log_id: LogId) -> bool {
        self.accumulated.contains_key(&log_id)
    }

    /// 本轮确认没有缺口的位置
    ///
    /// 只算游标实际走过的范围，游标之外并入的实时消息不计入。
    /// 反向回溯只有走到本地位置或链首才覆盖到远端头部。
    pub fn synced_through(&self) -> LogId {
        let walked = match (self.direction, self.exhausted) {
            (SyncDirection::Forward, _) => self.frontier_log_id.min(self.remote_head_log_id),
            (
                SyncDirection::Backward,
                Some(ExhaustReason::ReachedLocal | ExhaustReason::ChainStart),
            ) => self.remote_head_log_id,
            (SyncDirection::Backward, _) => self.local_last_log_id,
        };
        walked.max(self.local_last_log_id)
    }

    /// 合并一条实时消息，返回是否为新消息
    pub fn insert_live(&mut self, message: LogMessage) -> bool {
        if message.channel_id != self.channel_id {
            return false;
        }
        let log_id = message.log_id;
        let inserted = self.insert(message);
        if inserted {
            self.live_log_ids.insert(log_id);
        }
        inserted
    }

    /// 取出经实时通道并入的消息（log_id 升序），丢弃其余累积
    pub fn into_live_messages(mut self) -> Vec<LogMessage> {
        self.live_log_ids
            .iter()
            .filter_map(|log_id| self.accumulated.remove(log_id))
            .collect()
    }

    /// 应用一页拉取结果
    ///
    /// - 空页：正常结束
    /// - 消息属于其他频道：协议违规
    /// - 游标倒退：协议违规
    /// - 游标未推进：按 `stall_policy` 结束或报协议违规
    pub fn apply_page(&mut self, page: Vec<LogMessage>, stall_policy: StallPolicy) -> Result<PageOutcome> {
        self.pages_fetched += 1;

        let Some(tail) = page.last() else {
            self.exhausted = Some(ExhaustReason::EmptyPage);
            return Ok(self.outcome(0));
        };

        if let Some(foreign) = page.iter().find(|m| m.channel_id != self.channel_id) {
            return Err(ChatSyncError::protocol_violation(
                self.channel_id,
                format!(
                    "page contains log_id={} of channel {}",
                    foreign.log_id, foreign.channel_id
                ),
            ));
        }

        let tail_log_id = tail.log_id;
        let next_frontier = match self.direction {
            SyncDirection::Forward => tail.log_id,
            SyncDirection::Backward => tail.prev_log_id,
        };

        let regressed = match self.direction {
            SyncDirection::Forward => next_frontier < self.frontier_log_id,
            SyncDirection::Backward => next_frontier > self.frontier_log_id,
        };
        if regressed {
            return Err(ChatSyncError::protocol_violation(
                self.channel_id,
                format!(
                    "cursor regressed from {} to {} ({})",
                    self.frontier_log_id,
                    next_frontier,
                    self.direction.as_str()
                ),
            ));
        }

        let stalled = next_frontier == self.frontier_log_id || self.last_page_tail == Some(tail_log_id);
        if stalled && stall_policy == StallPolicy::Violation {
            return Err(ChatSyncError::protocol_violation(
                self.channel_id,
                format!("cursor did not advance past {}", self.frontier_log_id),
            ));
        }

        let mut new_messages = 0;
        for message in page {
            if self.insert(message) {
                new_messages += 1;
            }
        }

        self.frontier_log_id = next_frontier;
        self.last_page_tail = Some(tail_log_id);
        self.exhausted = if stalled {
            Some(ExhaustReason::Stalled)
        } else {
            self.boundary_reached()
        };

        Ok(self.outcome(new_messages))
    }

    fn boundary_reached(&self) -> Option<ExhaustReason> {
        match self.direction {
            SyncDirection::Forward if self.frontier_log_id >= self.remote_head_log_id => {
                Some(ExhaustReason::ReachedHead)
            }
            SyncDirection::Backward if self.frontier_log_id == 0 => Some(ExhaustReason::ChainStart),
            SyncDirection::Backward if self.frontier_log_id <= self.local_last_log_id => {
                Some(ExhaustReason::ReachedLocal)
            }
            _ => None,
        }
    }

    fn insert(&mut self, message: LogMessage) -> bool {
        // 本地已覆盖的部分不再累积
        if message.log_id <= self.local_last_log_id || self.accumulated.contains_key(&message.log_id) {
            return false;
        }
        self.accumulated.insert(message.log_id, message);
        true
    }

    fn outcome(&self, new_messages: usize) -> PageOutcome {
        PageOutcome {
            new_messages,
            frontier_log_id: self.frontier_log_id,
            exhausted: self.exhausted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forward_range(channel_id: u64, from: u64, to: u64) -> Vec<LogMessage> {
        (from..=to).map(|id| LogMessage::new(id, id - 1, channel_id)).collect()
    }

    fn backward_range(channel_id: u64, from: u64, to: u64) -> Vec<LogMessage> {
        (from..=to).rev().map(|id| LogMessage::new(id, id - 1, channel_id)).collect()
    }

    fn log_ids(state: &SyncState) -> Vec<u64> {
        state.messages().map(|m| m.log_id).collect()
    }

    #[test]
    fn starts_complete_when_local_is_at_head() {
        let state = SyncState::new(1, 150, 150, SyncDirection::Forward);
        assert!(state.is_complete());
        assert_eq!(state.exhaust_reason(), Some(ExhaustReason::ReachedHead));
    }

    #[test]
    fn forward_pages_reach_head() {
        let mut state = SyncState::new(1, 100, 150, SyncDirection::Forward);

        let first = state.apply_page(forward_range(1, 101, 120), StallPolicy::Exhausted).unwrap();
        assert_eq!(first.new_messages, 20);
        assert_eq!(first.frontier_log_id, 120);
        assert!(first.exhausted.is_none());

        state.apply_page(forward_range(1, 121, 140), StallPolicy::Exhausted).unwrap();
        let last = state.apply_page(forward_range(1, 141, 150), StallPolicy::Exhausted).unwrap();

        assert_eq!(last.exhausted, Some(ExhaustReason::ReachedHead));
        assert_eq!(state.accumulated_len(), 50);
        assert_eq!(state.pages_fetched, 3);
        assert_eq!(log_ids(&state), (101..=150).collect::<Vec<_>>());
    }

    #[test]
    fn overlapping_page_boundaries_are_deduplicated() {
        let mut state = SyncState::new(1, 0, 30, SyncDirection::Forward);
        state.apply_page(forward_range(1, 1, 20), StallPolicy::Exhausted).unwrap();
        let outcome = state.apply_page(forward_range(1, 15, 30), StallPolicy::Exhausted).unwrap();

        assert_eq!(outcome.new_messages, 10);
        assert_eq!(log_ids(&state), (1..=30).collect::<Vec<_>>());
    }

    #[test]
    fn empty_page_ends_the_pass() {
        let mut state = SyncState::new(1, 10, 50, SyncDirection::Forward);
        let outcome = state.apply_page(Vec::new(), StallPolicy::Violation).unwrap();
        assert_eq!(outcome.exhausted, Some(ExhaustReason::EmptyPage));
        assert_eq!(state.pages_fetched, 1);
    }

    #[test]
    fn repeated_tail_is_treated_as_exhausted() {
        let mut state = SyncState::new(1, 0, 100, SyncDirection::Forward);
        state.apply_page(forward_range(1, 1, 20), StallPolicy::Exhausted).unwrap();
        let outcome = state.apply_page(forward_range(1, 1, 20), StallPolicy::Exhausted).unwrap();

        assert_eq!(outcome.exhausted, Some(ExhaustReason::Stalled));
        assert_eq!(outcome.new_messages, 0);
        assert_eq!(state.accumulated_len(), 20);
    }

    #[test]
    fn repeated_tail_is_violation_under_strict_policy() {
        let mut state = SyncState::new(1, 0, 100, SyncDirection::Forward);
        state.apply_page(forward_range(1, 1, 20), StallPolicy::Violation).unwrap();
        let err = state
            .apply_page(forward_range(1, 1, 20), StallPolicy::Violation)
            .unwrap_err();

        assert!(matches!(err, ChatSyncError::ProtocolViolation { channel_id: 1, .. }));
        assert_eq!(state.frontier_log_id, 20);
    }

    #[test]
    fn regressing_cursor_is_violation() {
        let mut state = SyncState::new(1, 50, 100, SyncDirection::Forward);
        let err = state
            .apply_page(forward_range(1, 10, 20), StallPolicy::Exhausted)
            .unwrap_err();
        assert!(matches!(err, ChatSyncError::ProtocolViolation { .. }));
        assert_eq!(state.accumulated_len(), 0);
    }

    #[test]
    fn foreign_channel_message_is_violation() {
        let mut state = SyncState::new(1, 0, 100, SyncDirection::Forward);
        let mut page = forward_range(1, 1, 5);
        page.push(LogMessage::new(6, 5, 2));

        let err = state.apply_page(page, StallPolicy::Exhausted).unwrap_err();
        assert!(matches!(err, ChatSyncError::ProtocolViolation { channel_id: 1, .. }));
        assert_eq!(state.accumulated_len(), 0);
    }

    #[test]
    fn backward_walk_stops_at_local_coverage() {
        let mut state = SyncState::new(1, 100, 150, SyncDirection::Backward);
        assert_eq!(state.frontier_log_id, 150);

        state.apply_page(backward_range(1, 131, 150), StallPolicy::Exhausted).unwrap();
        assert_eq!(state.frontier_log_id, 130);
        state.apply_page(backward_range(1, 111, 130), StallPolicy::Exhausted).unwrap();
        let last = state.apply_page(backward_range(1, 91, 110), StallPolicy::Exhausted).unwrap();

        assert_eq!(last.exhausted, Some(ExhaustReason::ReachedLocal));
        assert_eq!(last.new_messages, 10);
        assert_eq!(log_ids(&state), (101..=150).collect::<Vec<_>>());
    }

    #[test]
    fn backward_walk_stops_at_chain_start() {
        let mut state = SyncState::new(1, 0, 5, SyncDirection::Backward);
        let outcome = state.apply_page(backward_range(1, 1, 5), StallPolicy::Exhausted).unwrap();
        assert_eq!(outcome.exhausted, Some(ExhaustReason::ChainStart));
        assert_eq!(state.accumulated_len(), 5);
    }

    #[test]
    fn live_messages_are_deduplicated_against_pages() {
        let mut state = SyncState::new(1, 100, 110, SyncDirection::Forward);
        assert!(state.insert_live(LogMessage::new(105, 104, 1)));
        assert!(!state.insert_live(LogMessage::new(105, 104, 1)));
        assert!(!state.insert_live(LogMessage::new(99, 98, 1)));
        assert!(!state.insert_live(LogMessage::new(106, 105, 2)));

        let outcome = state.apply_page(forward_range(1, 101, 110), StallPolicy::Exhausted).unwrap();
        assert_eq!(outcome.new_messages, 9);
        assert_eq!(log_ids(&state), (101..=110).collect::<Vec<_>>());
    }

    #[test]
    fn live_message_past_stalled_frontier_is_not_synced() {
        let mut state = SyncState::new(1, 100, 150, SyncDirection::Forward);
        state.apply_page(forward_range(1, 101, 120), StallPolicy::Exhausted).unwrap();
        assert!(state.insert_live(LogMessage::new(140, 139, 1)));
        let outcome = state.apply_page(forward_range(1, 101, 120), StallPolicy::Exhausted).unwrap();

        assert_eq!(outcome.exhausted, Some(ExhaustReason::Stalled));
        assert_eq!(state.max_log_id(), Some(140));
        assert_eq!(state.synced_through(), 120);
    }

    #[test]
    fn forward_pass_past_head_is_synced_to_head() {
        let mut state = SyncState::new(1, 100, 110, SyncDirection::Forward);
        state.apply_page(forward_range(1, 101, 115), StallPolicy::Exhausted).unwrap();
        assert_eq!(state.synced_through(), 110);

        let idle = SyncState::new(1, 150, 120, SyncDirection::Forward);
        assert_eq!(idle.synced_through(), 150);
    }

    #[test]
    fn backward_pass_is_synced_only_when_it_meets_local_history() {
        let mut state = SyncState::new(1, 100, 150, SyncDirection::Backward);
        state.apply_page(backward_range(1, 131, 150), StallPolicy::Exhausted).unwrap();
        let outcome = state.apply_page(Vec::new(), StallPolicy::Exhausted).unwrap();
        assert_eq!(outcome.exhausted, Some(ExhaustReason::EmptyPage));
        assert_eq!(state.synced_through(), 100);

        let mut state = SyncState::new(1, 100, 150, SyncDirection::Backward);
        state.apply_page(backward_range(1, 131, 150), StallPolicy::Exhausted).unwrap();
        state.apply_page(backward_range(1, 111, 130), StallPolicy::Exhausted).unwrap();
        state.apply_page(backward_range(1, 91, 110), StallPolicy::Exhausted).unwrap();
        assert_eq!(state.synced_through(), 150);

        let mut state = SyncState::new(1, 0, 5, SyncDirection::Backward);
        state.apply_page(backward_range(1, 1, 5), StallPolicy::Exhausted).unwrap();
        assert_eq!(state.synced_through(), 5);
    }

    #[test]
    fn live_messages_are_kept_apart_from_pages() {
        let mut state = SyncState::new(1, 100, 150, SyncDirection::Forward);
        state.apply_page(forward_range(1, 101, 120), StallPolicy::Exhausted).unwrap();
        assert!(state.insert_live(LogMessage::new(140, 139, 1)));
        assert!(!state.insert_live(LogMessage::new(110, 109, 1)));

        let live: Vec<u64> = state.into_live_messages().iter().map(|m| m.log_id).collect();
        assert_eq!(live, vec![140]);
    }

    #[test]
    fn state_survives_json_round_trip() {
        let mut state = SyncState::new(9, 0, 40, SyncDirection::Forward);
        state.apply_page(forward_range(9, 1, 20), StallPolicy::Exhausted).unwrap();

        let json = serde_json::to_vec(&state).unwrap();
        let restored: SyncState = serde_json::from_slice(&json).unwrap();
        assert_eq!(restored, state);
        assert_eq!(restored.frontier_log_id, 20);
    }
}
