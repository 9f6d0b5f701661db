//! 消息回填演示
//!
//! 用内存中的远端日志模拟协议客户端，展示首次回填、实时消息合并、
//! 切换频道后续拉以及重复同步的幂等性。

use async_trait::async_trait;
use chatlog_sdk::{
    BackfillConfig, BackfillCoordinator, ChannelId, ChatListPage, LogId, LogMessage,
    PacketRequest, PacketResponse, ProtocolClient, SyncEvent, SyncMessageResponse,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration};

const PAGE_SIZE: usize = 20;

/// 内存远端
#[derive(Debug)]
struct InMemoryServer {
    logs: Mutex<HashMap<ChannelId, BTreeMap<LogId, LogMessage>>>,
    live_tx: broadcast::Sender<LogMessage>,
}

impl InMemoryServer {
    fn new() -> Arc<Self> {
        let (live_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            logs: Mutex::new(HashMap::new()),
            live_tx,
        })
    }

    /// 远端新增一条消息并推送给实时订阅者
    fn post(&self, channel_id: ChannelId, text: &str) -> LogMessage {
        let message = {
            let mut logs = self.logs.lock();
            let log = logs.entry(channel_id).or_default();
            let prev_log_id = log.keys().next_back().copied().unwrap_or(0);
            let message = LogMessage::new(prev_log_id + 1, prev_log_id, channel_id)
                .with_sender(1)
                .with_payload(serde_json::json!({ "text": text }));
            log.insert(message.log_id, message.clone());
            message
        };
        let _ = self.live_tx.send(message.clone());
        message
    }
}

#[async_trait]
impl ProtocolClient for InMemoryServer {
    async fn request_packet(&self, request: PacketRequest) -> chatlog_sdk::Result<PacketResponse> {
        let PacketRequest::SyncMessage {
            channel_id,
            count,
            max,
            ..
        } = request;
        let logs = self.logs.lock();
        let log = logs.get(&channel_id);
        Ok(PacketResponse::SyncMessage(SyncMessageResponse {
            chat_list: log
                .map(|log| log.range(..=max).rev().take(count as usize).map(|(_, m)| m.clone()).collect())
                .unwrap_or_default(),
            last_token_id: log.and_then(|log| log.keys().next_back().copied()).unwrap_or(0),
            is_ok: true,
        }))
    }

    async fn get_messages_from(&self, channel_id: ChannelId, cursor: LogId) -> chatlog_sdk::Result<ChatListPage> {
        // 模拟网络延迟
        sleep(Duration::from_millis(20)).await;
        let page: Vec<LogMessage> = self
            .logs
            .lock()
            .get(&channel_id)
            .map(|log| {
                log.range((Bound::Excluded(cursor), Bound::Unbounded))
                    .take(PAGE_SIZE)
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(if page.is_empty() { ChatListPage::empty() } else { ChatListPage::of(page) })
    }

    fn subscribe_messages(&self) -> broadcast::Receiver<LogMessage> {
        self.live_tx.subscribe()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("========================================");
    println!("消息回填演示");
    println!("========================================\n");

    let server = InMemoryServer::new();
    for i in 1..=150 {
        server.post(10, &format!("频道 10 的第 {} 条消息", i));
    }
    for i in 1..=35 {
        server.post(20, &format!("频道 20 的第 {} 条消息", i));
    }

    let config = BackfillConfig::builder().page_fetch_timeout_ms(2_000).build();
    let coordinator = Arc::new(BackfillCoordinator::new(server.clone(), config));
    let listener = coordinator.spawn_live_listener();

    let mut events = coordinator.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let SyncEvent::SyncCompleted { channel_id, last_log_id, new_messages, .. } = event {
                println!("📬 频道 {} 同步完成: last_log_id={}, 新消息 {} 条", channel_id, last_log_id, new_messages);
            }
        }
    });

    // === 1. 首次回填（本地已有 1..100） ===
    coordinator.switch_to(10);
    let messages = coordinator.run_full_sync(10, 100).await?;
    println!("✅ 频道 10: {} 条消息 ({}..={})\n", messages.len(),
        messages.first().map(|m| m.log_id).unwrap_or(0),
        messages.last().map(|m| m.log_id).unwrap_or(0));

    // === 2. 切换频道时丢弃在途分页 ===
    let task = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.run_full_sync(20, 0).await })
    };
    sleep(Duration::from_millis(30)).await;
    coordinator.switch_to(10);
    match task.await? {
        Ok(messages) => println!("频道 20 在切换前已完成: {} 条", messages.len()),
        Err(e) if e.is_ignorable() => println!("⏸  频道 20 已挂起: {:?}\n", coordinator.sync_status(20)),
        Err(e) => return Err(e.into()),
    }

    // === 3. 实时消息 ===
    server.post(10, "实时消息");
    sleep(Duration::from_millis(50)).await;
    println!("💬 频道 10 现有 {} 条消息\n", coordinator.messages(10).len());

    // === 4. 回到频道 20 续拉 ===
    coordinator.switch_to(20);
    let report = coordinator.resume_sync(20).await?;
    println!("✅ 频道 20: {} 条消息, resumed={}\n", report.messages.len(), report.resumed);

    // === 5. 重复同步 ===
    coordinator.switch_to(10);
    let again = coordinator.run_full_sync(10, 100).await?;
    println!("🔁 重复同步频道 10: {} 条消息（无需拉取）", again.len());

    listener.abort();
    let stats = coordinator.events().get_stats().await;
    println!("\n事件总数: {}", stats.total_events);
    Ok(())
}
