use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("设备未找到: {id}")]
    DeviceNotFound { id: i64 },
    #[error("备份计划未找到: {id}")]
    ScheduleNotFound { id: i64 },
    #[error("未知的备份方式: {key}")]
    UnknownBackupMethod { key: String },
    #[error("未知的存储后端: {key}")]
    UnknownStorageBackend { key: String },
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("调度器锁已丢失")]
    LockLost,
    #[error("调度器锁被其他实例持有: {holder}")]
    LockHeld { holder: String },
    #[error("消息队列错误: {0}")]
    MessageQueue(String),
    #[error("结果流错误: {0}")]
    ResultStream(String),
    #[error("无效的状态转换: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
    #[error("采集失败: {0}")]
    Collect(#[from] CollectError),
    #[error("存储失败: {0}")]
    Storage(#[from] StorageError),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type VaultResult<T> = Result<T, VaultError>;

/// 备份采集插件的错误分类。
///
/// `timeout` 与 `unreachable` 属于瞬时错误，允许按尝试次数重试；
/// `auth_failed` 与 `plugin_error` 属于永久错误，直接记为终态失败。
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum CollectError {
    #[error("设备不可达: {0}")]
    Unreachable(String),
    #[error("设备认证失败: {0}")]
    AuthFailed(String),
    #[error("采集超时（{0}秒）")]
    Timeout(u64),
    #[error("插件执行出错: {0}")]
    Plugin(String),
}

impl CollectError {
    pub fn kind(&self) -> &'static str {
        match self {
            CollectError::Unreachable(_) => "unreachable",
            CollectError::AuthFailed(_) => "auth_failed",
            CollectError::Timeout(_) => "timeout",
            CollectError::Plugin(_) => "plugin_error",
        }
    }

    /// 瞬时错误可以被重新投递，直到尝试次数耗尽
    pub fn is_transient(&self) -> bool {
        matches!(self, CollectError::Unreachable(_) | CollectError::Timeout(_))
    }

    pub fn from_kind(kind: &str, detail: String) -> Self {
        match kind {
            "unreachable" => CollectError::Unreachable(detail),
            "auth_failed" => CollectError::AuthFailed(detail),
            "timeout" => CollectError::Timeout(detail.parse().unwrap_or(0)),
            _ => CollectError::Plugin(detail),
        }
    }
}

/// 存储后端的错误分类。
///
/// `conflict` 与容量/可用性错误必须区分：冲突是永久错误，
/// 容量不足或后端不可用是瞬时错误。
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum StorageError {
    #[error("存储位置冲突: {0}")]
    Conflict(String),
    #[error("存储容量不足: {0}")]
    Capacity(String),
    #[error("存储后端不可用: {0}")]
    Unavailable(String),
    #[error("存储IO错误: {0}")]
    Io(String),
    #[error("版本标记未找到: {0}")]
    VersionNotFound(String),
}

impl StorageError {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Conflict(_) => "conflict",
            StorageError::Capacity(_) => "capacity",
            StorageError::Unavailable(_) => "unavailable",
            StorageError::Io(_) => "io",
            StorageError::VersionNotFound(_) => "version_not_found",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Capacity(_) | StorageError::Unavailable(_) | StorageError::Io(_)
        )
    }
}

impl VaultError {
    pub fn queue_error<S: Into<String>>(msg: S) -> Self {
        Self::MessageQueue(msg.into())
    }
    pub fn stream_error<S: Into<String>>(msg: S) -> Self {
        Self::ResultStream(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VaultError::Internal(_) | VaultError::Configuration(_)
        )
    }
    pub fn is_retryable(&self) -> bool {
        match self {
            VaultError::DatabaseOperation(_)
            | VaultError::MessageQueue(_)
            | VaultError::ResultStream(_)
            | VaultError::Timeout(_) => true,
            VaultError::Collect(e) => e.is_transient(),
            VaultError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for VaultError {
    fn from(err: anyhow::Error) -> Self {
        VaultError::Internal(err.to_string())
    }
}
