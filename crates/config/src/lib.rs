pub mod models;

pub use models::{
    AppConfig, CollectorConfig, DatabaseConfig, LogConfig, MessageQueueConfig, MessageQueueType,
    SchedulerConfig, StorageWorkerConfig, StreamsConfig,
};

/// 配置层结果类型
pub type ConfigResult<T> = Result<T, ConfigError>;

/// 配置层错误枚举
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("配置校验失败: {0}")]
    Validation(String),

    #[error("配置文件错误: {0}")]
    File(String),

    #[error("配置解析错误: {0}")]
    Parse(String),
}

impl From<anyhow::Error> for ConfigError {
    fn from(err: anyhow::Error) -> Self {
        ConfigError::Configuration(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::File(err.to_string())
    }
}

/// 各配置段实现的校验契约
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}
