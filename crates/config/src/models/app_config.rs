use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig,
    logging::LogConfig,
    message_queue::MessageQueueConfig,
    pipeline::{CollectorConfig, SchedulerConfig, StorageWorkerConfig, StreamsConfig},
};
use crate::ConfigValidator;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub message_queue: MessageQueueConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub storage: StorageWorkerConfig,
    #[serde(default)]
    pub streams: StreamsConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

impl AppConfig {
    /// 加载配置：TOML文件（显式路径或默认路径）叠加 NETVAULT_ 环境变量。
    /// 环境变量用双下划线分段，如 NETVAULT_SCHEDULER__LOCK_TTL_SECONDS=120。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/netvault.toml",
                "netvault.toml",
                "/etc/netvault/config.toml",
            ];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("NETVAULT")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.database.validate()?;
        self.message_queue.validate()?;
        self.scheduler.validate()?;
        self.collector.validate()?;
        self.storage.validate()?;
        self.streams.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message_queue::MessageQueueType;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.tick_interval_seconds, 10);
        assert_eq!(config.scheduler.default_queue, "backup_tasks");
        assert_eq!(config.streams.device_results, "device_backup_results");
    }

    #[test]
    fn toml_round_trip() {
        let config = AppConfig::default();
        let raw = config.to_toml().unwrap();
        let back = AppConfig::from_toml(&raw).unwrap();
        assert_eq!(back.scheduler.lock_name, config.scheduler.lock_name);
        assert_eq!(back.storage.backends, config.storage.backends);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [message_queue]
            type = "in_memory"
            url = "memory://"
            key_prefix = "test"
            connection_timeout_seconds = 5

            [scheduler]
            enabled = true
            tick_interval_seconds = 1
            lock_name = "test:lock"
            lock_ttl_seconds = 10
            restart_window_minutes = 5
            max_attempts = 2
            default_queue = "q"
            "#,
        )
        .unwrap();
        assert_eq!(config.message_queue.r#type, MessageQueueType::InMemory);
        assert_eq!(config.scheduler.max_attempts, 2);
        // 未给出的段回落到默认值
        assert_eq!(config.collector.plugin_timeout_seconds, 240);
    }

    #[test]
    fn rejects_lock_ttl_not_above_tick() {
        let mut config = AppConfig::default();
        config.scheduler.lock_ttl_seconds = config.scheduler.tick_interval_seconds;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_storage_backend() {
        let mut config = AppConfig::default();
        config.storage.backends = vec!["s3".to_string()];
        assert!(config.validate().is_err());
    }
}
