use serde::{Deserialize, Serialize};

use crate::{ConfigError, ConfigResult, ConfigValidator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageQueueType {
    /// 进程内队列，单进程部署与测试用
    InMemory,
    /// Redis，任务队列与结果流都基于Stream加消费组
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageQueueConfig {
    pub r#type: MessageQueueType,
    pub url: String,
    /// 所有队列与流的键前缀，多套环境共用一个Redis时隔离用
    pub key_prefix: String,
    pub connection_timeout_seconds: u64,
}

impl Default for MessageQueueConfig {
    fn default() -> Self {
        Self {
            r#type: MessageQueueType::Redis,
            url: "redis://localhost:6379".to_string(),
            key_prefix: "netvault".to_string(),
            connection_timeout_seconds: 30,
        }
    }
}

impl ConfigValidator for MessageQueueConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.r#type == MessageQueueType::Redis && !self.url.starts_with("redis://") {
            return Err(ConfigError::Validation(format!(
                "message_queue.url 必须是redis地址: {}",
                self.url
            )));
        }
        if self.key_prefix.is_empty() {
            return Err(ConfigError::Validation(
                "message_queue.key_prefix 不能为空".to_string(),
            ));
        }
        if self.connection_timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "message_queue.connection_timeout_seconds 必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}
