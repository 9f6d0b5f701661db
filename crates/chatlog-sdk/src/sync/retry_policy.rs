use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ChatSyncError;

/// 同步失败原因分类
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SyncFailureReason {
    /// 请求超时 - 可重试
    Timeout,
    /// 传输层失败 - 可重试
    Transport,
    /// 协作方违反分页契约 - 不重试
    ProtocolViolation,
    /// 频道已切走 - 不重试
    NotActive,
    /// 同一频道已有同步 - 不重试
    Busy,
    /// 其他错误
    Other(String),
}

impl SyncFailureReason {
    /// 判断是否可以重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncFailureReason::Timeout | SyncFailureReason::Transport)
    }

    /// 获取重试延迟倍数
    pub fn get_delay_multiplier(&self) -> f64 {
        match self {
            SyncFailureReason::Timeout => 1.5,
            _ => 1.0,
        }
    }
}

impl From<&ChatSyncError> for SyncFailureReason {
    fn from(error: &ChatSyncError) -> Self {
        match error {
            ChatSyncError::Timeout { .. } => SyncFailureReason::Timeout,
            ChatSyncError::Transport(_) => SyncFailureReason::Transport,
            ChatSyncError::ProtocolViolation { .. } => SyncFailureReason::ProtocolViolation,
            ChatSyncError::NotActive { .. } => SyncFailureReason::NotActive,
            ChatSyncError::AlreadySyncing { .. } => SyncFailureReason::Busy,
            other => SyncFailureReason::Other(other.to_string()),
        }
    }
}

/// 重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 基础延迟（毫秒）
    pub base_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避因子
    pub backoff_factor: f64,
    /// 随机抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// 不做任何重试
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// 检查是否应该重试
    pub fn should_retry(&self, retry_count: u32, failure_reason: &SyncFailureReason) -> bool {
        retry_count < self.max_retries && failure_reason.is_retryable()
    }

    /// 不含抖动的退避延迟：min(base * factor^n * multiplier, max)
    pub fn base_delay_for(&self, retry_count: u32, failure_reason: &SyncFailureReason) -> Duration {
        let exponent = retry_count.min(20) as i32;
        let delay = self.base_delay_ms as f64
            * self.backoff_factor.powi(exponent)
            * failure_reason.get_delay_multiplier();
        let capped = delay.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// 计算下次重试延迟，不应重试时返回 None
    pub fn next_delay(&self, retry_count: u32, failure_reason: &SyncFailureReason) -> Option<Duration> {
        if !self.should_retry(retry_count, failure_reason) {
            return None;
        }

        let capped = self.base_delay_for(retry_count, failure_reason).as_millis() as f64;
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let final_delay = (capped + jitter).clamp(0.0, self.max_delay_ms as f64);

        Some(Duration::from_millis(final_delay as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_retryable() {
        assert!(SyncFailureReason::Timeout.is_retryable());
        assert!(SyncFailureReason::Transport.is_retryable());
        assert!(!SyncFailureReason::ProtocolViolation.is_retryable());
        assert!(!SyncFailureReason::NotActive.is_retryable());
        assert!(!SyncFailureReason::Busy.is_retryable());
    }

    #[test]
    fn test_reason_from_error() {
        let reason = SyncFailureReason::from(&ChatSyncError::Timeout { millis: 10 });
        assert_eq!(reason, SyncFailureReason::Timeout);
        let reason = SyncFailureReason::from(&ChatSyncError::protocol_violation(3, "regressed"));
        assert_eq!(reason, SyncFailureReason::ProtocolViolation);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_factor: 2.0,
            jitter_factor: 0.0,
        };

        assert_eq!(
            policy.base_delay_for(0, &SyncFailureReason::Transport),
            Duration::from_millis(100)
        );
        assert_eq!(
            policy.base_delay_for(3, &SyncFailureReason::Transport),
            Duration::from_millis(800)
        );
        assert_eq!(
            policy.base_delay_for(6, &SyncFailureReason::Transport),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn test_next_delay_respects_limits() {
        let policy = RetryPolicy::default();

        assert!(policy.next_delay(0, &SyncFailureReason::Transport).is_some());
        assert!(policy.next_delay(10, &SyncFailureReason::Transport).is_none());
        assert!(policy.next_delay(0, &SyncFailureReason::ProtocolViolation).is_none());
        assert!(RetryPolicy::none().next_delay(0, &SyncFailureReason::Transport).is_none());
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter_factor: 0.5,
            ..RetryPolicy::default()
        };
        for _ in 0..50 {
            let delay = policy
                .next_delay(1, &SyncFailureReason::Transport)
                .expect("retryable");
            assert!(delay <= Duration::from_millis(policy.max_delay_ms));
            assert!(delay >= Duration::from_millis(750));
        }
    }
}
