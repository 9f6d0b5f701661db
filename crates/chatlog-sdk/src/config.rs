//! 同步协调器配置

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::RetryPolicy;
use crate::types::SyncDirection;

/// 游标未推进时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StallPolicy {
    /// 视为已到达边界，正常结束本轮
    #[default]
    Exhausted,
    /// 视为协议违规
    Violation,
}

/// 回填协调器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// 每页条数（头部同步请求使用）
    pub page_size: u32,
    /// 单页拉取超时（毫秒）
    pub page_fetch_timeout_ms: u64,
    /// 分页方向
    pub direction: SyncDirection,
    /// 游标停滞处理策略
    pub stall_policy: StallPolicy,
    /// 单轮最多拉取页数，超出视为协议违规
    pub max_pages_per_pass: u32,
    /// 重试配置
    pub retry_policy: RetryPolicy,
    /// 事件广播容量
    pub event_capacity: usize,
    /// 数据目录；设置后部分同步状态持久化到 `<data_dir>/kv`
    pub data_dir: Option<PathBuf>,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            page_fetch_timeout_ms: 10_000,
            direction: SyncDirection::Forward,
            stall_policy: StallPolicy::Exhausted,
            max_pages_per_pass: 10_000,
            retry_policy: RetryPolicy::default(),
            event_capacity: 256,
            data_dir: None,
        }
    }
}

impl BackfillConfig {
    pub fn builder() -> BackfillConfigBuilder {
        BackfillConfigBuilder::new()
    }

    pub fn page_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.page_fetch_timeout_ms)
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct BackfillConfigBuilder {
    config: BackfillConfig,
}

impl BackfillConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.config.page_size = size.max(1);
        self
    }

    pub fn page_fetch_timeout_ms(mut self, millis: u64) -> Self {
        self.config.page_fetch_timeout_ms = millis;
        self
    }

    pub fn direction(mut self, direction: SyncDirection) -> Self {
        self.config.direction = direction;
        self
    }

    pub fn stall_policy(mut self, policy: StallPolicy) -> Self {
        self.config.stall_policy = policy;
        self
    }

    pub fn max_pages_per_pass(mut self, pages: u32) -> Self {
        self.config.max_pages_per_pass = pages.max(1);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn build(self) -> BackfillConfig {
        self.config
    }
}
