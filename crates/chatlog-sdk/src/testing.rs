//! 测试用脚本化协议客户端

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};

use crate::client::ProtocolClient;
use crate::error::{ChatSyncError, Result};
use crate::types::{
    ChannelId, ChatListPage, LogId, LogMessage, PacketRequest, PacketResponse, SyncMessageResponse,
};

/// 挂起下一次分页请求，直到测试放行
#[derive(Debug, Clone, Default)]
pub(crate) struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// 内存中的远端日志，可注入失败、停滞页和挂起
#[derive(Debug)]
pub(crate) struct ScriptedClient {
    page_size: usize,
    remote: Mutex<HashMap<ChannelId, BTreeMap<LogId, LogMessage>>>,
    scripted: Mutex<HashMap<ChannelId, VecDeque<Vec<LogMessage>>>>,
    head_failures: AtomicUsize,
    page_failures: Mutex<HashSet<usize>>,
    gate: Mutex<Option<Gate>>,
    page_calls: AtomicUsize,
    head_calls: AtomicUsize,
    live_tx: broadcast::Sender<LogMessage>,
}

impl ScriptedClient {
    pub fn new(page_size: usize) -> Arc<Self> {
        let (live_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            page_size,
            remote: Mutex::new(HashMap::new()),
            scripted: Mutex::new(HashMap::new()),
            head_failures: AtomicUsize::new(0),
            page_failures: Mutex::new(HashSet::new()),
            gate: Mutex::new(None),
            page_calls: AtomicUsize::new(0),
            head_calls: AtomicUsize::new(0),
            live_tx,
        })
    }

    /// 远端追加 from..=to（prev_log_id = log_id - 1）
    pub fn with_range(self: Arc<Self>, channel_id: ChannelId, from: LogId, to: LogId) -> Arc<Self> {
        for log_id in from..=to {
            self.push_remote(LogMessage::new(log_id, log_id - 1, channel_id));
        }
        self
    }

    pub fn push_remote(&self, message: LogMessage) {
        self.insert_raw(message.channel_id, message);
    }

    /// 以 `channel_id` 为键写入远端日志，不校验消息自身的频道
    pub fn insert_raw(&self, channel_id: ChannelId, message: LogMessage) {
        self.remote
            .lock()
            .entry(channel_id)
            .or_default()
            .insert(message.log_id, message);
    }

    /// 后续分页请求按顺序返回这些页，用完后回落到远端日志
    pub fn script_pages(&self, channel_id: ChannelId, pages: Vec<Vec<LogMessage>>) {
        self.scripted
            .lock()
            .entry(channel_id)
            .or_default()
            .extend(pages);
    }

    pub fn fail_head(&self, times: usize) {
        self.head_failures.store(times, Ordering::SeqCst);
    }

    /// 第 `call` 次分页请求（从 1 计数，跨频道）返回传输错误
    pub fn fail_page_call(&self, call: usize) {
        self.page_failures.lock().insert(call);
    }

    pub fn gate_next_page(&self) -> Gate {
        let gate = Gate::default();
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn send_live(&self, message: LogMessage) {
        let _ = self.live_tx.send(message);
    }

    async fn begin_page_call(&self) -> Result<()> {
        let call = self.page_calls.fetch_add(1, Ordering::SeqCst) + 1;

        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        if self.page_failures.lock().remove(&call) {
            return Err(ChatSyncError::Transport(format!("page call {} dropped", call)));
        }
        Ok(())
    }

    fn next_scripted(&self, channel_id: ChannelId) -> Option<Vec<LogMessage>> {
        self.scripted
            .lock()
            .get_mut(&channel_id)
            .and_then(|pages| pages.pop_front())
    }

    fn to_page(messages: Vec<LogMessage>) -> ChatListPage {
        if messages.is_empty() {
            ChatListPage::empty()
        } else {
            ChatListPage::of(messages)
        }
    }
}

#[async_trait]
impl ProtocolClient for ScriptedClient {
    async fn request_packet(&self, request: PacketRequest) -> Result<PacketResponse> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);

        let PacketRequest::SyncMessage {
            channel_id,
            count,
            max,
            ..
        } = request;

        let failing = self
            .head_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ChatSyncError::Transport("sync request failed".to_string()));
        }

        let remote = self.remote.lock();
        let log = remote.get(&channel_id);
        let last_token_id = log
            .and_then(|log| log.keys().next_back().copied())
            .unwrap_or(0);
        let chat_list = log
            .map(|log| {
                log.range(..=max)
                    .rev()
                    .take(count as usize)
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default();

        Ok(PacketResponse::SyncMessage(SyncMessageResponse {
            chat_list,
            last_token_id,
            is_ok: true,
        }))
    }

    async fn get_messages_from(&self, channel_id: ChannelId, cursor: LogId) -> Result<ChatListPage> {
        self.begin_page_call().await?;
        if let Some(page) = self.next_scripted(channel_id) {
            return Ok(Self::to_page(page));
        }

        let page = self
            .remote
            .lock()
            .get(&channel_id)
            .map(|log| {
                log.range((Bound::Excluded(cursor), Bound::Unbounded))
                    .take(self.page_size)
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self::to_page(page))
    }

    async fn get_messages_before(&self, channel_id: ChannelId, cursor: LogId) -> Result<ChatListPage> {
        self.begin_page_call().await?;
        if let Some(page) = self.next_scripted(channel_id) {
            return Ok(Self::to_page(page));
        }

        let page = self
            .remote
            .lock()
            .get(&channel_id)
            .map(|log| {
                log.range(..=cursor)
                    .rev()
                    .take(self.page_size)
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self::to_page(page))
    }

    fn subscribe_messages(&self) -> broadcast::Receiver<LogMessage> {
        self.live_tx.subscribe()
    }
}
