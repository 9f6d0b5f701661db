//! 登录模块
//!
//! - `LoginErrorCode`：服务端状态码到错误类型的显式映射，未知状态码保留原值
//! - `LoginFlow`：两阶段登录。首次尝试遇到“其他设备已登录”时返回
//!   `LoginOutcome::Conflict`，由调用方确认后再调用 `force_attempt`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ChatSyncError, Result};

/// 登录相关的服务端状态码
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginErrorCode {
    /// -9797
    ServerMaintenance,
    /// -999
    ClientTooOld,
    /// -998
    AuthenticationRequired,
    /// -997
    AccountRestricted,
    /// -500
    OperationFailed,
    /// -402
    BlockedFriend,
    /// -401
    ChatNotFound,
    /// -301
    InternalServerErrorBo,
    /// -300
    InternalServerErrorCarriage,
    /// -203
    InvalidParameter,
    /// -202
    InvalidMethod,
    /// -201
    LoggedOutAccount,
    /// -112
    TooManyVerificationRequests,
    /// -111
    IncorrectVerificationCode,
    /// -102
    DeviceLimitExceeded,
    /// -101
    AnotherClientLoggedIn,
    /// -100
    DeviceNotRegistered,
    /// -1
    InvalidUser,
    /// 12，携带服务端提示
    ServerRejected(Option<String>),
    /// 30
    InvalidField,
    /// 32
    AccountNotFound,
    /// 500
    InternalError,
    Unknown(i32),
}

impl LoginErrorCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            -9797 => Self::ServerMaintenance,
            -999 => Self::ClientTooOld,
            -998 => Self::AuthenticationRequired,
            -997 => Self::AccountRestricted,
            -500 => Self::OperationFailed,
            -402 => Self::BlockedFriend,
            -401 => Self::ChatNotFound,
            -301 => Self::InternalServerErrorBo,
            -300 => Self::InternalServerErrorCarriage,
            -203 => Self::InvalidParameter,
            -202 => Self::InvalidMethod,
            -201 => Self::LoggedOutAccount,
            -112 => Self::TooManyVerificationRequests,
            -111 => Self::IncorrectVerificationCode,
            -102 => Self::DeviceLimitExceeded,
            -101 => Self::AnotherClientLoggedIn,
            -100 => Self::DeviceNotRegistered,
            -1 => Self::InvalidUser,
            12 => Self::ServerRejected(None),
            30 => Self::InvalidField,
            32 => Self::AccountNotFound,
            500 => Self::InternalError,
            other => Self::Unknown(other),
        }
    }

    /// 从服务端拒绝响应构造；只有 12 会保留服务端提示
    pub fn from_rejection(rejection: &AuthRejection) -> Self {
        match Self::from_code(rejection.status) {
            Self::ServerRejected(_) => Self::ServerRejected(
                rejection.message.clone().filter(|m| !m.is_empty()),
            ),
            code => code,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::ServerMaintenance => -9797,
            Self::ClientTooOld => -999,
            Self::AuthenticationRequired => -998,
            Self::AccountRestricted => -997,
            Self::OperationFailed => -500,
            Self::BlockedFriend => -402,
            Self::ChatNotFound => -401,
            Self::InternalServerErrorBo => -301,
            Self::InternalServerErrorCarriage => -300,
            Self::InvalidParameter => -203,
            Self::InvalidMethod => -202,
            Self::LoggedOutAccount => -201,
            Self::TooManyVerificationRequests => -112,
            Self::IncorrectVerificationCode => -111,
            Self::DeviceLimitExceeded => -102,
            Self::AnotherClientLoggedIn => -101,
            Self::DeviceNotRegistered => -100,
            Self::InvalidUser => -1,
            Self::ServerRejected(_) => 12,
            Self::InvalidField => 30,
            Self::AccountNotFound => 32,
            Self::InternalError => 500,
            Self::Unknown(code) => *code,
        }
    }

    /// 面向用户的提示
    pub fn message(&self) -> &str {
        match self {
            Self::ServerMaintenance => "Server is under maintenance",
            Self::ClientTooOld => "Client version is too old",
            Self::AuthenticationRequired => "Authentication is required",
            Self::AccountRestricted => "Account has been restricted",
            Self::OperationFailed => "Unknown failure",
            Self::BlockedFriend => "Tried to message a blocked friend",
            Self::ChatNotFound => "Chat not found",
            Self::InternalServerErrorBo => "Internal server error (BO)",
            Self::InternalServerErrorCarriage => "Internal server error (carriage)",
            Self::InvalidParameter => "Invalid parameter",
            Self::InvalidMethod => "Invalid method",
            Self::LoggedOutAccount => "Request came from a logged-out account",
            Self::TooManyVerificationRequests => "Too many verification requests",
            Self::IncorrectVerificationCode => "Incorrect verification code",
            Self::DeviceLimitExceeded => "Too many devices registered",
            Self::AnotherClientLoggedIn => "Another client is already logged in",
            Self::DeviceNotRegistered => "Device is not registered",
            Self::InvalidUser => "Invalid user",
            Self::ServerRejected(Some(message)) => message,
            Self::ServerRejected(None) => "An error occurred. Error code: 12",
            Self::InvalidField => "Some fields have invalid values",
            Self::AccountNotFound => "Account not found",
            Self::InternalError => "Internal error",
            Self::Unknown(_) => "Unknown error",
        }
    }

    /// 服务端临时故障，可稍后重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServerMaintenance
                | Self::InternalServerErrorBo
                | Self::InternalServerErrorCarriage
                | Self::InternalError
        )
    }
}

impl fmt::Display for LoginErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message())
    }
}

/// 登录凭据
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
    pub device_uuid: String,
}

impl LoginCredentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>, device_uuid: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            device_uuid: device_uuid.into(),
        }
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("email", &self.email)
            .field("password", &"***")
            .field("device_uuid", &self.device_uuid)
            .finish()
    }
}

/// 发往认证服务的登录请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub credentials: LoginCredentials,
    /// 为 true 时挤掉其他设备上的登录
    pub force: bool,
}

/// 登录成功后的会话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginSession {
    pub user_id: u64,
    pub access_token: String,
}

/// 认证服务拒绝登录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRejection {
    pub status: i32,
    pub message: Option<String>,
}

impl AuthRejection {
    pub fn new(status: i32) -> Self {
        Self { status, message: None }
    }

    pub fn with_message(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }
}

/// 认证客户端 trait（由接入层实现）
#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> std::result::Result<LoginSession, AuthRejection>;
}

/// 等待调用方确认的强制登录
///
/// 只能由 `LoginFlow::attempt` 产生，`force_attempt` 会消费它。
#[derive(Debug)]
pub struct PendingForceLogin {
    credentials: LoginCredentials,
}

impl PendingForceLogin {
    pub fn email(&self) -> &str {
        &self.credentials.email
    }
}

/// 登录结果
#[derive(Debug)]
pub enum LoginOutcome {
    LoggedIn(LoginSession),
    /// 设备未注册，需要走设备验证流程
    VerificationRequired(LoginCredentials),
    /// 其他设备已登录，确认后调用 `force_attempt`
    Conflict(PendingForceLogin),
}

/// 两阶段登录流程
pub struct LoginFlow {
    client: Arc<dyn AuthClient>,
}

impl LoginFlow {
    pub fn new(client: Arc<dyn AuthClient>) -> Self {
        Self { client }
    }

    /// 普通登录
    pub async fn attempt(&self, credentials: LoginCredentials) -> Result<LoginOutcome> {
        self.login(credentials, false).await
    }

    /// 调用方确认后强制登录，不会再返回 `Conflict`
    pub async fn force_attempt(&self, pending: PendingForceLogin) -> Result<LoginOutcome> {
        info!("强制登录: email={}", pending.credentials.email);
        match self.login(pending.credentials, true).await? {
            LoginOutcome::Conflict(_) => Err(ChatSyncError::Login(LoginErrorCode::AnotherClientLoggedIn)),
            outcome => Ok(outcome),
        }
    }

    async fn login(&self, credentials: LoginCredentials, force: bool) -> Result<LoginOutcome> {
        let request = LoginRequest { credentials, force };

        let rejection = match self.client.login(&request).await {
            Ok(session) => {
                info!("登录成功: user_id={}, force={}", session.user_id, force);
                return Ok(LoginOutcome::LoggedIn(session));
            }
            Err(rejection) => rejection,
        };

        let code = LoginErrorCode::from_rejection(&rejection);
        match code {
            LoginErrorCode::DeviceNotRegistered => {
                info!("设备未注册，需要验证: email={}", request.credentials.email);
                Ok(LoginOutcome::VerificationRequired(request.credentials))
            }
            LoginErrorCode::AnotherClientLoggedIn if !force => {
                info!("其他设备已登录，等待确认: email={}", request.credentials.email);
                Ok(LoginOutcome::Conflict(PendingForceLogin {
                    credentials: request.credentials,
                }))
            }
            code => {
                warn!("登录失败: code={}, message={}, force={}", code.code(), code.message(), force);
                Err(ChatSyncError::Login(code))
            }
        }
    }
}
