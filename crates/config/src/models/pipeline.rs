use serde::{Deserialize, Serialize};

use crate::{ConfigError, ConfigResult, ConfigValidator};

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// 评估CRON计划的tick间隔
    pub tick_interval_seconds: u64,
    /// 全局单例锁的名字
    pub lock_name: String,
    /// 锁TTL，须明显大于tick间隔
    pub lock_ttl_seconds: u64,
    /// 重启后的补采窗口：错过的触发点在此窗口内的计划会被补采一次
    pub restart_window_minutes: i64,
    /// 采集任务的最大尝试次数
    pub max_attempts: u32,
    /// 无分组、计划也未指定队列时的兜底采集队列
    pub default_queue: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_seconds: 10,
            lock_name: "netvault:scheduler:lock".to_string(),
            lock_ttl_seconds: 60,
            restart_window_minutes: 15,
            max_attempts: 3,
            default_queue: "backup_tasks".to_string(),
        }
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.tick_interval_seconds == 0 {
            return Err(ConfigError::Validation(
                "scheduler.tick_interval_seconds 必须大于0".to_string(),
            ));
        }
        if self.lock_ttl_seconds <= self.tick_interval_seconds {
            return Err(ConfigError::Validation(
                "scheduler.lock_ttl_seconds 必须大于tick间隔，否则锁会在两次tick之间过期"
                    .to_string(),
            ));
        }
        if self.restart_window_minutes < 0 {
            return Err(ConfigError::Validation(
                "scheduler.restart_window_minutes 不能为负".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "scheduler.max_attempts 必须大于0".to_string(),
            ));
        }
        if self.default_queue.is_empty() {
            return Err(ConfigError::Validation(
                "scheduler.default_queue 不能为空".to_string(),
            ));
        }
        Ok(())
    }
}

/// 采集worker配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// worker标识，缺省用"{hostname}-{pid}"
    pub worker_id: Option<String>,
    /// 本worker订阅的采集队列（兜底队列和若干分组队列）
    pub queues: Vec<String>,
    /// 插件单次执行的超时上限
    pub plugin_timeout_seconds: u64,
    pub poll_interval_ms: u64,
    /// 并行执行的采集任务数上限
    pub max_concurrent_jobs: usize,
    /// 备份方式键 → 外部采集程序，启动时注册为命令插件
    #[serde(default)]
    pub command_plugins: std::collections::HashMap<String, String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            queues: vec!["backup_tasks".to_string()],
            plugin_timeout_seconds: 240,
            poll_interval_ms: 500,
            max_concurrent_jobs: 8,
            command_plugins: std::collections::HashMap::new(),
        }
    }
}

impl ConfigValidator for CollectorConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.queues.is_empty() {
            return Err(ConfigError::Validation(
                "collector.queues 至少需要一个队列".to_string(),
            ));
        }
        if self.plugin_timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "collector.plugin_timeout_seconds 必须大于0".to_string(),
            ));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::Validation(
                "collector.max_concurrent_jobs 必须大于0".to_string(),
            ));
        }
        for (key, program) in &self.command_plugins {
            if key.is_empty() || program.is_empty() {
                return Err(ConfigError::Validation(
                    "collector.command_plugins 的键和程序路径都不能为空".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// 存储worker配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageWorkerConfig {
    /// 本进程启用的存储后端键
    pub backends: Vec<String>,
    /// fs后端的根目录
    pub fs_base_path: String,
    /// git后端的本地仓库根目录
    pub git_repo_path: String,
    pub poll_interval_ms: u64,
}

impl Default for StorageWorkerConfig {
    fn default() -> Self {
        Self {
            backends: vec!["fs".to_string()],
            fs_base_path: "/var/lib/netvault/backups".to_string(),
            git_repo_path: "/var/lib/netvault/repos".to_string(),
            poll_interval_ms: 500,
        }
    }
}

impl ConfigValidator for StorageWorkerConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.backends.is_empty() {
            return Err(ConfigError::Validation(
                "storage.backends 至少需要一个后端".to_string(),
            ));
        }
        for backend in &self.backends {
            if backend != "fs" && backend != "git" {
                return Err(ConfigError::Validation(format!(
                    "storage.backends 包含未知后端: {backend}"
                )));
            }
        }
        Ok(())
    }
}

/// 结果流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamsConfig {
    /// 设备采集结果流
    pub device_results: String,
    /// 存储结果流
    pub storage_results: String,
    /// 消费组名
    pub group: String,
    /// 消费者名，缺省用"{hostname}-{pid}"
    pub consumer: Option<String>,
    pub read_count: usize,
    pub block_ms: u64,
    /// 认领他人滞留条目前的最短空闲时间
    pub claim_min_idle_ms: u64,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            device_results: "device_backup_results".to_string(),
            storage_results: "storage_results".to_string(),
            group: "result_writers".to_string(),
            consumer: None,
            read_count: 16,
            block_ms: 2000,
            claim_min_idle_ms: 60_000,
        }
    }
}

impl ConfigValidator for StreamsConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.device_results.is_empty() || self.storage_results.is_empty() {
            return Err(ConfigError::Validation(
                "streams 的流名不能为空".to_string(),
            ));
        }
        if self.group.is_empty() {
            return Err(ConfigError::Validation(
                "streams.group 不能为空".to_string(),
            ));
        }
        if self.read_count == 0 {
            return Err(ConfigError::Validation(
                "streams.read_count 必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}
