use thiserror::Error;

use crate::login::LoginErrorCode;

/// SDK 统一错误类型
///
/// 分类：
/// - `Transport` / `Timeout`：远端调用失败或超时，可重试
/// - `ProtocolViolation`：协作方违反分页契约，本轮同步致命，不自动重试
/// - `NotActive`：频道已不是当前激活频道，调用方忽略即可
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatSyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout: request did not complete within {millis}ms")]
    Timeout { millis: u64 },

    #[error("Protocol violation on channel {channel_id}: {reason}")]
    ProtocolViolation { channel_id: u64, reason: String },

    #[error("Channel {channel_id} is not active")]
    NotActive { channel_id: u64 },

    #[error("Channel {channel_id} already has a sync in progress")]
    AlreadySyncing { channel_id: u64 },

    #[error("Channel {channel_id} has no sync session")]
    NoSession { channel_id: u64 },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("KV store error: {0}")]
    KvStore(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    IO(String),

    #[error("Login failed [{}]: {}", .0.code(), .0.message())]
    Login(LoginErrorCode),
}

impl ChatSyncError {
    /// 构造协议违规错误
    pub fn protocol_violation(channel_id: u64, reason: impl Into<String>) -> Self {
        ChatSyncError::ProtocolViolation {
            channel_id,
            reason: reason.into(),
        }
    }

    /// 是否为传输层错误（超时也归为传输层）
    pub fn is_transport(&self) -> bool {
        matches!(self, ChatSyncError::Transport(_) | ChatSyncError::Timeout { .. })
    }

    /// 是否可以重试
    pub fn is_retryable(&self) -> bool {
        match self {
            ChatSyncError::Transport(_) | ChatSyncError::Timeout { .. } => true,
            ChatSyncError::Login(code) => code.is_retryable(),
            _ => false,
        }
    }

    /// 是否应被 UI 静默忽略
    pub fn is_ignorable(&self) -> bool {
        matches!(self, ChatSyncError::NotActive { .. })
    }
}

impl From<serde_json::Error> for ChatSyncError {
    fn from(error: serde_json::Error) -> Self {
        ChatSyncError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for ChatSyncError {
    fn from(error: std::io::Error) -> Self {
        ChatSyncError::IO(error.to_string())
    }
}

impl From<sled::Error> for ChatSyncError {
    fn from(error: sled::Error) -> Self {
        ChatSyncError::KvStore(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_retryable_errors() {
        assert!(ChatSyncError::Transport("reset".into()).is_retryable());
        assert!(ChatSyncError::Timeout { millis: 100 }.is_retryable());
        assert!(!ChatSyncError::protocol_violation(1, "stalled").is_retryable());
        assert!(!ChatSyncError::NotActive { channel_id: 1 }.is_retryable());
    }

    #[test]
    fn only_not_active_is_ignorable() {
        assert!(ChatSyncError::NotActive { channel_id: 7 }.is_ignorable());
        assert!(!ChatSyncError::Transport("x".into()).is_ignorable());
        assert!(!ChatSyncError::AlreadySyncing { channel_id: 7 }.is_ignorable());
    }

    #[test]
    fn login_error_display_carries_code() {
        let err = ChatSyncError::Login(LoginErrorCode::Unknown(-4242));
        assert!(err.to_string().contains("-4242"));
    }
}
