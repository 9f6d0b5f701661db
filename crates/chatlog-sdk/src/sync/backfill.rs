/// 回填协调器
///
/// 职责：
/// - 频道激活时比较本地位置与远端头部，分页补齐缺口
/// - 每个频道同一时刻最多一个同步（在途预约）
/// - 频道被切走时丢弃过期分页并保存断点
/// - 传输失败时保存断点，下次激活续拉
/// - 同步进行中合并实时消息（按 log_id 去重）
/// - 完成后合并到 ChannelStore 并退役会话

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::ProtocolClient;
use crate::config::BackfillConfig;
use crate::error::{ChatSyncError, Result};
use crate::events::{now_millis, EventManager, SyncEvent, SyncStatus};
use crate::storage::channel_store::ChannelStore;
use crate::storage::kv::KvStore;
use crate::sync::checkpoint_store::{KvCheckpointStore, MemoryCheckpointStore, SyncCheckpointStore};
use crate::sync::retry_policy::SyncFailureReason;
use crate::sync::sync_state::{ExhaustReason, PageOutcome, SyncState};
use crate::sync::SyncReport;
use crate::types::{
    partition_by_channel, ChannelId, LogId, LogMessage, PacketRequest, PacketResponse,
    SyncDirection, SyncMessageResponse,
};

/// 断点存储使用的 sled Tree
const CHECKPOINT_NAMESPACE: &str = "sync_checkpoints";

/// 在途预约，drop 时释放
///
/// 未经 `finish` 就被 drop 表示调用方取消了 future，此时会话转为挂起。
struct InFlightGuard<'a> {
    coordinator: &'a BackfillCoordinator,
    channel_id: ChannelId,
    finished: bool,
}

impl InFlightGuard<'_> {
    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.coordinator.on_cancelled(self.channel_id);
        }
        self.coordinator.in_flight.lock().remove(&self.channel_id);
    }
}

/// 回填协调器
pub struct BackfillCoordinator {
    client: Arc<dyn ProtocolClient>,
    config: BackfillConfig,
    channel_store: Arc<ChannelStore>,
    checkpoints: Arc<dyn SyncCheckpointStore>,
    /// 未退役的会话（进行中、失败待续拉、被挂起）
    sessions: Mutex<HashMap<ChannelId, SyncState>>,
    in_flight: Mutex<HashSet<ChannelId>>,
    active: RwLock<HashSet<ChannelId>>,
    statuses: RwLock<HashMap<ChannelId, SyncStatus>>,
    events: EventManager,
}

impl fmt::Debug for BackfillCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackfillCoordinator")
            .field("client", &self.client)
            .field("config", &self.config)
            .field("sessions", &self.sessions.lock().len())
            .field("in_flight", &self.in_flight.lock().len())
            .finish_non_exhaustive()
    }
}

impl BackfillCoordinator {
    /// 创建协调器（内存断点）
    pub fn new(client: Arc<dyn ProtocolClient>, config: BackfillConfig) -> Self {
        Self::with_stores(
            client,
            config,
            Arc::new(ChannelStore::new()),
            Arc::new(MemoryCheckpointStore::new()),
        )
    }

    /// 创建协调器；配置了 data_dir 时断点持久化到 sled
    pub async fn open(client: Arc<dyn ProtocolClient>, config: BackfillConfig) -> Result<Self> {
        let checkpoints: Arc<dyn SyncCheckpointStore> = match &config.data_dir {
            Some(dir) => {
                let kv = KvStore::open(dir, CHECKPOINT_NAMESPACE).await?;
                Arc::new(KvCheckpointStore::new(kv))
            }
            None => Arc::new(MemoryCheckpointStore::new()),
        };
        Ok(Self::with_stores(
            client,
            config,
            Arc::new(ChannelStore::new()),
            checkpoints,
        ))
    }

    pub fn with_stores(
        client: Arc<dyn ProtocolClient>,
        config: BackfillConfig,
        channel_store: Arc<ChannelStore>,
        checkpoints: Arc<dyn SyncCheckpointStore>,
    ) -> Self {
        let events = EventManager::new(config.event_capacity);
        Self {
            client,
            config,
            channel_store,
            checkpoints,
            sessions: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            active: RwLock::new(HashSet::new()),
            statuses: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn config(&self) -> &BackfillConfig {
        &self.config
    }

    pub fn channel_store(&self) -> &Arc<ChannelStore> {
        &self.channel_store
    }

    /// 频道当前全部消息（log_id 升序）
    pub fn messages(&self, channel_id: ChannelId) -> Vec<LogMessage> {
        self.channel_store.messages(channel_id)
    }

    /// 未退役会话的快照
    pub fn session(&self, channel_id: ChannelId) -> Option<SyncState> {
        self.sessions.lock().get(&channel_id).cloned()
    }

    // ============================================================
    // 激活管理
    // ============================================================

    pub fn activate(&self, channel_id: ChannelId) {
        if self.active.write().insert(channel_id) {
            debug!("频道激活: channel_id={}", channel_id);
        }
    }

    /// 取消激活；在途分页返回后会被丢弃
    pub fn deactivate(&self, channel_id: ChannelId) -> bool {
        let removed = self.active.write().remove(&channel_id);
        if removed {
            debug!("频道取消激活: channel_id={}", channel_id);
        }
        removed
    }

    /// 切换到单个频道，其余频道全部取消激活
    pub fn switch_to(&self, channel_id: ChannelId) {
        let mut active = self.active.write();
        active.clear();
        active.insert(channel_id);
        debug!("切换当前频道: channel_id={}", channel_id);
    }

    pub fn is_active(&self, channel_id: ChannelId) -> bool {
        self.active.read().contains(&channel_id)
    }

    pub fn active_channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = self.active.read().iter().copied().collect();
        channels.sort_unstable();
        channels
    }

    // ============================================================
    // 状态与事件
    // ============================================================

    pub fn sync_status(&self, channel_id: ChannelId) -> SyncStatus {
        self.statuses
            .read()
            .get(&channel_id)
            .cloned()
            .unwrap_or(SyncStatus::Idle)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventManager {
        &self.events
    }

    fn set_status(&self, channel_id: ChannelId, status: SyncStatus) {
        self.statuses.write().insert(channel_id, status);
    }

    // ============================================================
    // 远端调用
    // ============================================================

    /// 查询远端头部位置
    ///
    /// 先用 `{cur: 1, count: 1, max: 2}` 探测 last_token_id，
    /// 再以它为 max 拉取最新一段，取其中最大的 log_id。没有消息时返回 0。
    pub async fn fetch_remote_head(&self, channel_id: ChannelId) -> Result<LogId> {
        let probe = self.request_sync(channel_id, 1, 1, 2).await?;
        Self::ensure_channel(channel_id, &probe.chat_list)?;

        let response = self
            .request_sync(channel_id, 1, self.config.page_size, probe.last_token_id)
            .await?;
        Self::ensure_channel(channel_id, &response.chat_list)?;

        let head = response
            .chat_list
            .iter()
            .map(|m| m.log_id)
            .max()
            .unwrap_or(0);
        debug!(
            "远端头部: channel_id={}, last_token_id={}, remote_head={}",
            channel_id, probe.last_token_id, head
        );
        Ok(head)
    }

    /// 拉取一页消息，空页表示该方向没有更多消息
    pub async fn fetch_page(
        &self,
        channel_id: ChannelId,
        from_log_id: LogId,
        direction: SyncDirection,
    ) -> Result<Vec<LogMessage>> {
        let page = match direction {
            SyncDirection::Forward => {
                self.with_timeout(self.client.get_messages_from(channel_id, from_log_id))
                    .await?
            }
            SyncDirection::Backward => {
                self.with_timeout(self.client.get_messages_before(channel_id, from_log_id))
                    .await?
            }
        };
        Ok(page.into_messages())
    }

    async fn request_sync(
        &self,
        channel_id: ChannelId,
        cur: LogId,
        count: u32,
        max: LogId,
    ) -> Result<SyncMessageResponse> {
        let request = PacketRequest::SyncMessage {
            channel_id,
            cur,
            count,
            max,
        };
        let PacketResponse::SyncMessage(response) =
            self.with_timeout(self.client.request_packet(request)).await?;

        if !response.is_ok {
            return Err(ChatSyncError::Transport(format!(
                "sync request rejected: channel_id={}",
                channel_id
            )));
        }
        Ok(response)
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.page_fetch_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(ChatSyncError::Timeout {
                millis: self.config.page_fetch_timeout_ms,
            }),
        }
    }

    fn ensure_channel(channel_id: ChannelId, messages: &[LogMessage]) -> Result<()> {
        match messages.iter().find(|m| m.channel_id != channel_id) {
            Some(foreign) => Err(ChatSyncError::protocol_violation(
                channel_id,
                format!(
                    "sync response contains log_id={} of channel {}",
                    foreign.log_id, foreign.channel_id
                ),
            )),
            None => Ok(()),
        }
    }

    // ============================================================
    // 同步主流程
    // ============================================================

    /// 初始化（或从断点恢复）同步会话，并激活频道
    pub async fn begin_sync(&self, channel_id: ChannelId, local_last_log_id: LogId) -> Result<SyncState> {
        self.activate(channel_id);
        let guard = self.reserve(channel_id)?;
        let result = match self.begin_session(channel_id, local_last_log_id).await {
            Ok((state, _)) => Ok(state),
            Err(e) => Err(self.fail_begin(channel_id, e).await),
        };
        guard.finish();
        result
    }

    /// 拉取并应用下一页；本轮结束时会话合并入 ChannelStore 并退役
    pub async fn advance(&self, channel_id: ChannelId) -> Result<PageOutcome> {
        let guard = self.reserve(channel_id)?;
        let result = self.advance_once(channel_id).await;
        guard.finish();
        result
    }

    /// 频道激活时的入口：补齐缺口并返回频道全部消息（log_id 升序、唯一）
    pub async fn run_full_sync(&self, channel_id: ChannelId, local_last_log_id: LogId) -> Result<Vec<LogMessage>> {
        self.sync_channel(channel_id, local_last_log_id)
            .await
            .map(|report| report.messages)
    }

    /// 同步单个频道，返回详细结果
    ///
    /// future 被取消时会话保留在内存，状态置为挂起，断点在后台写入。
    pub async fn sync_channel(&self, channel_id: ChannelId, local_last_log_id: LogId) -> Result<SyncReport> {
        self.activate(channel_id);
        let guard = self.reserve(channel_id)?;
        let result = self.run_pass(channel_id, local_last_log_id).await;
        guard.finish();
        result
    }

    /// 调用方需持有在途预约
    async fn run_pass(&self, channel_id: ChannelId, local_last_log_id: LogId) -> Result<SyncReport> {
        let (state, resumed) = match self.begin_session(channel_id, local_last_log_id).await {
            Ok(started) => started,
            Err(e) => return Err(self.fail_begin(channel_id, e).await),
        };

        let mut exhausted = state.exhaust_reason();
        while exhausted.is_none() {
            match self.advance_session(channel_id).await {
                Ok(outcome) => exhausted = outcome.exhausted,
                Err(e) => return Err(self.abort(channel_id, e).await),
            }
        }

        self.retire(channel_id, resumed).await
    }

    /// 按配置的重试策略同步，只重试可重试错误
    pub async fn run_full_sync_with_retry(
        &self,
        channel_id: ChannelId,
        local_last_log_id: LogId,
    ) -> Result<Vec<LogMessage>> {
        let mut retry_count = 0;
        loop {
            let error = match self.run_full_sync(channel_id, local_last_log_id).await {
                Ok(messages) => return Ok(messages),
                Err(e) => e,
            };

            let reason = SyncFailureReason::from(&error);
            match self.config.retry_policy.next_delay(retry_count, &reason) {
                Some(delay) => {
                    retry_count += 1;
                    warn!(
                        "同步失败，{}ms 后第 {} 次重试: channel_id={}, error={}",
                        delay.as_millis(),
                        retry_count,
                        channel_id,
                        error
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(error),
            }
        }
    }

    /// 从断点续拉；频道必须处于激活状态
    pub async fn resume_sync(&self, channel_id: ChannelId) -> Result<SyncReport> {
        if !self.is_active(channel_id) {
            debug!("频道未激活，忽略续拉: channel_id={}", channel_id);
            return Err(ChatSyncError::NotActive { channel_id });
        }
        let local_last_log_id = self.channel_store.last_synced_log_id(channel_id);
        self.sync_channel(channel_id, local_last_log_id).await
    }

    /// 并发同步多个频道，各频道互不影响
    pub async fn sync_channels(
        &self,
        channels: &[(ChannelId, LogId)],
    ) -> Vec<(ChannelId, Result<SyncReport>)> {
        let tasks = channels.iter().map(|&(channel_id, local_last_log_id)| async move {
            (channel_id, self.sync_channel(channel_id, local_last_log_id).await)
        });
        join_all(tasks).await
    }

    /// 放弃未完成的会话及其断点
    pub async fn abandon_sync(&self, channel_id: ChannelId) -> Result<()> {
        let guard = self.reserve(channel_id)?;
        self.discard_session(channel_id).await;
        self.set_status(channel_id, SyncStatus::Idle);
        guard.finish();
        info!("放弃同步会话: channel_id={}", channel_id);
        Ok(())
    }

    // ============================================================
    // 实时消息
    // ============================================================

    /// 合并一条实时消息，返回是否为新消息
    ///
    /// 频道有未退役会话时并入会话累积，否则直接写入 ChannelStore。
    pub async fn ingest_live(&self, message: LogMessage) -> bool {
        let channel_id = message.channel_id;
        let log_id = message.log_id;

        let (inserted, during_sync) = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(&channel_id) {
                Some(state) => (state.insert_live(message), true),
                None => (self.channel_store.append_live(message), false),
            }
        };

        if inserted {
            debug!(
                "合并实时消息: channel_id={}, log_id={}, during_sync={}",
                channel_id, log_id, during_sync
            );
            self.events
                .emit(SyncEvent::LiveMessageMerged {
                    channel_id,
                    log_id,
                    during_sync,
                    timestamp: now_millis(),
                })
                .await;
        }
        inserted
    }

    /// 合并未按频道过滤的一批实时消息，返回新消息数
    pub async fn ingest_live_batch(&self, messages: Vec<LogMessage>) -> usize {
        let mut inserted = 0;
        for (_, channel_messages) in partition_by_channel(messages) {
            for message in channel_messages {
                if self.ingest_live(message).await {
                    inserted += 1;
                }
            }
        }
        inserted
    }

    /// 启动实时消息监听任务，消息流关闭时退出
    pub fn spawn_live_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let mut receiver = self.client.subscribe_messages();

        tokio::spawn(async move {
            info!("实时消息监听已启动");
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        coordinator.ingest_live(message).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("实时消息积压，跳过 {} 条，缺口留给下次回填", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("实时消息流已关闭，监听退出");
                        break;
                    }
                }
            }
        })
    }

    // ============================================================
    // 私有方法
    // ============================================================

    fn reserve(&self, channel_id: ChannelId) -> Result<InFlightGuard<'_>> {
        if !self.in_flight.lock().insert(channel_id) {
            debug!("频道已有同步在进行: channel_id={}", channel_id);
            return Err(ChatSyncError::AlreadySyncing { channel_id });
        }
        Ok(InFlightGuard {
            coordinator: self,
            channel_id,
            finished: false,
        })
    }

    /// 同步 future 被取消：会话留在内存，状态置为挂起，后台写入断点
    fn on_cancelled(&self, channel_id: ChannelId) {
        let Some(state) = self.session(channel_id) else {
            return;
        };
        let frontier_log_id = state.frontier_log_id;
        warn!("同步被取消，转为挂起: channel_id={}, frontier={}", channel_id, frontier_log_id);
        self.set_status(channel_id, SyncStatus::Suspended { frontier_log_id });

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("没有可用的运行时，断点未写入: channel_id={}", channel_id);
            return;
        };
        let checkpoints = Arc::clone(&self.checkpoints);
        let events = self.events.clone();
        runtime.spawn(async move {
            if let Err(e) = checkpoints.save(&state).await {
                warn!("保存同步断点失败: channel_id={}, error={}", channel_id, e);
            }
            events
                .emit(SyncEvent::SyncSuspended {
                    channel_id,
                    frontier_log_id,
                    timestamp: now_millis(),
                })
                .await;
        });
    }

    /// 调用方需持有在途预约
    async fn advance_once(&self, channel_id: ChannelId) -> Result<PageOutcome> {
        let outcome = match self.advance_session(channel_id).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.abort(channel_id, e).await),
        };
        if outcome.exhausted.is_some() {
            self.retire(channel_id, false).await?;
        }
        Ok(outcome)
    }

    /// 调用方需持有在途预约
    async fn begin_session(&self, channel_id: ChannelId, local_last_log_id: LogId) -> Result<(SyncState, bool)> {
        let local_last_log_id = local_last_log_id.max(self.channel_store.last_synced_log_id(channel_id));

        let existing = self.sessions.lock().get(&channel_id).cloned();
        let existing = match existing {
            Some(state) => Some(state),
            None => self.checkpoints.load(channel_id).await?,
        };

        if let Some(state) = existing {
            if state.direction == self.config.direction {
                info!(
                    "从断点续拉: channel_id={}, frontier={}, remote_head={}, pages_fetched={}",
                    channel_id, state.frontier_log_id, state.remote_head_log_id, state.pages_fetched
                );
                self.start_session(state.clone(), true).await;
                return Ok((state, true));
            }
            debug!(
                "断点方向与当前配置不一致，丢弃: channel_id={}, direction={}",
                channel_id,
                state.direction.as_str()
            );
            self.discard_session(channel_id).await;
        }

        let remote_head_log_id = self.fetch_remote_head(channel_id).await?;
        let state = SyncState::new(channel_id, local_last_log_id, remote_head_log_id, self.config.direction);

        if state.is_complete() {
            debug!(
                "无需同步: channel_id={}, local_last={}, remote_head={}",
                channel_id, local_last_log_id, remote_head_log_id
            );
        } else {
            info!(
                "开始同步: channel_id={}, local_last={}, remote_head={}, direction={}",
                channel_id,
                local_last_log_id,
                remote_head_log_id,
                state.direction.as_str()
            );
        }
        self.start_session(state.clone(), false).await;
        Ok((state, false))
    }

    async fn start_session(&self, state: SyncState, resumed: bool) {
        let channel_id = state.channel_id;
        let remote_head_log_id = state.remote_head_log_id;
        self.set_status(
            channel_id,
            SyncStatus::Syncing {
                frontier_log_id: state.frontier_log_id,
                pages_fetched: state.pages_fetched,
            },
        );
        self.sessions.lock().insert(channel_id, state);

        self.events
            .emit(SyncEvent::SyncStarted {
                channel_id,
                remote_head_log_id,
                resumed,
                timestamp: now_millis(),
            })
            .await;
    }

    /// 调用方需持有在途预约
    async fn advance_session(&self, channel_id: ChannelId) -> Result<PageOutcome> {
        let (cursor, direction, pages_fetched, exhausted) = {
            let sessions = self.sessions.lock();
            let state = sessions
                .get(&channel_id)
                .ok_or(ChatSyncError::NoSession { channel_id })?;
            (
                state.frontier_log_id,
                state.direction,
                state.pages_fetched,
                state.exhaust_reason(),
            )
        };

        if exhausted.is_some() {
            return Ok(PageOutcome {
                new_messages: 0,
                frontier_log_id: cursor,
                exhausted,
            });
        }
        if pages_fetched >= self.config.max_pages_per_pass {
            return Err(ChatSyncError::protocol_violation(
                channel_id,
                format!("exceeded {} pages in one pass", self.config.max_pages_per_pass),
            ));
        }

        debug!(
            "拉取分页: channel_id={}, cursor={}, direction={}",
            channel_id,
            cursor,
            direction.as_str()
        );
        let page = self.fetch_page(channel_id, cursor, direction).await?;

        // 在途期间频道被切走，结果作废
        if !self.is_active(channel_id) {
            debug!(
                "频道已切走，丢弃过期分页: channel_id={}, cursor={}, page_len={}",
                channel_id,
                cursor,
                page.len()
            );
            return Err(ChatSyncError::NotActive { channel_id });
        }

        let (outcome, pages_fetched) = {
            let mut sessions = self.sessions.lock();
            let state = sessions
                .get_mut(&channel_id)
                .ok_or(ChatSyncError::NoSession { channel_id })?;
            let outcome = state.apply_page(page, self.config.stall_policy)?;
            (outcome, state.pages_fetched)
        };

        if outcome.exhausted == Some(ExhaustReason::Stalled) {
            warn!(
                "游标未推进，视为已到达边界: channel_id={}, frontier={}",
                channel_id, outcome.frontier_log_id
            );
        }
        debug!(
            "分页已应用: channel_id={}, new_messages={}, frontier={}, pages_fetched={}",
            channel_id, outcome.new_messages, outcome.frontier_log_id, pages_fetched
        );

        self.set_status(
            channel_id,
            SyncStatus::Syncing {
                frontier_log_id: outcome.frontier_log_id,
                pages_fetched,
            },
        );
        self.events
            .emit(SyncEvent::PageApplied {
                channel_id,
                new_messages: outcome.new_messages,
                frontier_log_id: outcome.frontier_log_id,
                timestamp: now_millis(),
            })
            .await;

        Ok(outcome)
    }

    /// 合并会话结果并退役
    async fn retire(&self, channel_id: ChannelId, resumed: bool) -> Result<SyncReport> {
        let state = self
            .sessions
            .lock()
            .remove(&channel_id)
            .ok_or(ChatSyncError::NoSession { channel_id })?;

        // 游标之外的实时消息由 ChannelStore 按 prev_log_id 链推进
        let synced_up_to = state.synced_through();
        let pages_fetched = state.pages_fetched;
        let remote_head_log_id = state.remote_head_log_id;
        let exhaust_reason = state.exhaust_reason();

        let new_messages = self
            .channel_store
            .merge_synced(channel_id, state.into_messages(), synced_up_to);
        let last_log_id = self.channel_store.last_synced_log_id(channel_id);
        if let Err(e) = self.checkpoints.remove(channel_id).await {
            warn!("删除同步断点失败: channel_id={}, error={}", channel_id, e);
        }

        info!(
            "同步完成: channel_id={}, new_messages={}, pages_fetched={}, last_synced={}",
            channel_id, new_messages, pages_fetched, last_log_id
        );

        self.set_status(
            channel_id,
            SyncStatus::Completed {
                last_log_id,
                new_messages,
                pages_fetched,
            },
        );
        self.events
            .emit(SyncEvent::SyncCompleted {
                channel_id,
                last_log_id,
                new_messages,
                timestamp: now_millis(),
            })
            .await;

        Ok(SyncReport {
            channel_id,
            messages: self.channel_store.messages(channel_id),
            new_messages,
            pages_fetched,
            remote_head_log_id,
            resumed,
            exhaust_reason,
            last_sync_at: now_millis(),
        })
    }

    /// 头部获取失败：不创建会话
    async fn fail_begin(&self, channel_id: ChannelId, error: ChatSyncError) -> ChatSyncError {
        match &error {
            ChatSyncError::ProtocolViolation { .. } => {
                error!("获取远端头部时协议违规: channel_id={}, error={}", channel_id, error);
            }
            _ => {
                warn!("获取远端头部失败: channel_id={}, error={}", channel_id, error);
            }
        }
        self.report_failure(channel_id, &error).await;
        error
    }

    /// 本轮中断
    ///
    /// - NotActive：保存断点，状态置为挂起
    /// - ProtocolViolation：丢弃会话与断点
    /// - 其他：保存断点，等待续拉
    async fn abort(&self, channel_id: ChannelId, error: ChatSyncError) -> ChatSyncError {
        match &error {
            ChatSyncError::NotActive { .. } => {
                self.suspend(channel_id).await;
            }
            ChatSyncError::ProtocolViolation { .. } => {
                error!("协议违规，丢弃同步会话: channel_id={}, error={}", channel_id, error);
                self.discard_session(channel_id).await;
                self.report_failure(channel_id, &error).await;
            }
            _ => {
                warn!("同步中断，保存断点: channel_id={}, error={}", channel_id, error);
                self.save_checkpoint(channel_id).await;
                self.report_failure(channel_id, &error).await;
            }
        }
        error
    }

    async fn suspend(&self, channel_id: ChannelId) {
        let Some(frontier_log_id) = self.save_checkpoint(channel_id).await else {
            return;
        };
        self.set_status(channel_id, SyncStatus::Suspended { frontier_log_id });
        self.events
            .emit(SyncEvent::SyncSuspended {
                channel_id,
                frontier_log_id,
                timestamp: now_millis(),
            })
            .await;
    }

    /// 保存断点，返回断点游标
    async fn save_checkpoint(&self, channel_id: ChannelId) -> Option<LogId> {
        let state = self.sessions.lock().get(&channel_id).cloned()?;
        if let Err(e) = self.checkpoints.save(&state).await {
            warn!("保存同步断点失败: channel_id={}, error={}", channel_id, e);
        }
        Some(state.frontier_log_id)
    }

    /// 丢弃会话与断点；经实时通道并入的消息写入 ChannelStore
    async fn discard_session(&self, channel_id: ChannelId) {
        let in_memory = self.sessions.lock().remove(&channel_id);
        let state = match in_memory {
            Some(state) => Some(state),
            None => self.checkpoints.load(channel_id).await.unwrap_or_else(|e| {
                warn!("读取同步断点失败: channel_id={}, error={}", channel_id, e);
                None
            }),
        };

        if let Some(state) = state {
            let mut kept = 0;
            for message in state.into_live_messages() {
                if self.channel_store.append_live(message) {
                    kept += 1;
                }
            }
            if kept > 0 {
                debug!("丢弃会话，保留实时消息: channel_id={}, count={}", channel_id, kept);
            }
        }

        if let Err(e) = self.checkpoints.remove(channel_id).await {
            warn!("删除同步断点失败: channel_id={}, error={}", channel_id, e);
        }
    }

    async fn report_failure(&self, channel_id: ChannelId, error: &ChatSyncError) {
        let retryable = error.is_retryable();
        self.set_status(
            channel_id,
            SyncStatus::Failed {
                error: error.to_string(),
                retryable,
            },
        );
        self.events
            .emit(SyncEvent::SyncFailed {
                channel_id,
                error: error.to_string(),
                retryable,
                timestamp: now_millis(),
            })
            .await;
    }
}
