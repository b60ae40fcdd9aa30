use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 网络设备。资源管理API负责增删改，流水线只读。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub name: String,
    /// 设备管理地址（IP或DNS名）
    pub address: String,
    /// 备份方式插件的注册键，如 "mikrotik_ssh"、"noop"
    pub backup_method: String,
    /// 凭据内容，由凭据库解析后注入（插件契约的一部分）
    pub credential: Option<serde_json::Value>,
    /// 采集分组。有分组的设备被路由到 `collect.{group}` 队列，
    /// 以便把受限网段的采集隔离到专属worker
    pub collection_group: Option<String>,
    /// 存储后端键："fs" 或 "git"
    pub storage_backend: String,
    /// 后端内的存储位置（仓库或目录的逻辑名）
    pub storage_location: String,
    /// 保留策略提示，由外部的保留策略执行器解释
    pub retention_policy: Option<String>,
    pub enabled: bool,
}

/// 备份计划。cadence 为CRON表达式，由管理员维护，流水线只读。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub name: String,
    /// CRON表达式（秒 分 时 日 月 星期）
    pub cadence: String,
    /// 计划指定的目标采集队列；设备的采集分组优先于此设置
    pub queue: Option<String>,
    pub enabled: bool,
    /// 该计划覆盖的设备
    pub device_ids: Vec<i64>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// 采集任务。job id 同时是幂等键：同一（设备、计划、触发时间桶）
/// 生成相同的id，崩溃恢复后重放tick不会产生重复任务。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionJob {
    pub id: String,
    pub device_id: i64,
    pub device_address: String,
    /// 解析后的目标队列名
    pub queue: String,
    pub credential: serde_json::Value,
    pub backup_method: String,
    pub timeout_seconds: u64,
    pub enqueued_at: DateTime<Utc>,
    /// 当前尝试次数（从1开始）
    pub attempt: u32,
    pub max_attempts: u32,
}

impl CollectionJob {
    /// 计划触发的幂等键。fire_ts 取触发时间的分钟桶。
    /// 补采复用同一个键：id只由触发点决定，与何时观察到无关，
    /// 崩溃后晚到的重放才能撞上去重窗口。
    pub fn scheduled_id(schedule_id: i64, device_id: i64, fire_time: DateTime<Utc>) -> String {
        let bucket = fire_time.timestamp() / 60;
        format!("sched:{schedule_id}:{device_id}:{bucket}")
    }

    /// 手动"立即执行"的键：每次触发是独立的逻辑事件
    pub fn manual_id(device_id: i64) -> String {
        format!("manual:{device_id}:{}", Uuid::new_v4())
    }

    pub fn next_attempt(&self) -> Self {
        let mut job = self.clone();
        job.attempt += 1;
        job.enqueued_at = Utc::now();
        job
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResultStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failure")]
    Failure,
}

/// 设备采集结果流的条目。只追加，永不修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceResultEntry {
    pub job_id: String,
    pub device_id: i64,
    /// 任务被消费的队列。重试入队沿用原路由，
    /// 不会把分组/计划专属队列上的任务退回兜底队列
    #[serde(default)]
    pub queue: String,
    pub status: ResultStatus,
    /// 成功时为采集到的配置文本
    pub config_text: Option<String>,
    /// 失败时的错误分类（CollectError::kind）
    pub error_kind: Option<String>,
    pub error_detail: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub attempt: u32,
    pub max_attempts: u32,
}

/// 存储任务。id 由来源采集任务确定性派生，
/// 重复投递同一条结果不会产生两个不同id的存储任务。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageJob {
    pub id: String,
    /// 来源采集任务id（审计链路）
    pub source_job_id: String,
    pub device_id: i64,
    pub backend: String,
    pub location: String,
    pub payload: String,
    /// 采集时间，也是存储路径里的时间戳
    pub timestamp: DateTime<Utc>,
    pub retention_hint: Option<String>,
}

impl StorageJob {
    /// 从采集任务id确定性派生存储任务id
    pub fn derived_id(source_job_id: &str) -> String {
        format!("{source_job_id}:store")
    }
}

/// 存储结果流的条目。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageResultEntry {
    pub job_id: String,
    pub source_job_id: String,
    pub device_id: i64,
    pub status: ResultStatus,
    pub backend: String,
    pub path: Option<String>,
    /// 后端特定的版本标记（git为提交哈希，fs为相对路径）
    pub version_marker: Option<String>,
    pub size_bytes: Option<u64>,
    pub error_kind: Option<String>,
    pub error_detail: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// 单次备份在采集→存储链路上的状态机。
///
/// scheduled → collecting → collected | collect_failed
///                        → storing → stored | store_failed
///
/// 终态：stored、collect_failed、store_failed。状态只能前进，不能回退。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BackupStatus {
    #[serde(rename = "scheduled")]
    Scheduled,
    #[serde(rename = "collecting")]
    Collecting,
    #[serde(rename = "collected")]
    Collected,
    #[serde(rename = "collect_failed")]
    CollectFailed,
    #[serde(rename = "storing")]
    Storing,
    #[serde(rename = "stored")]
    Stored,
    #[serde(rename = "store_failed")]
    StoreFailed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Scheduled => "scheduled",
            BackupStatus::Collecting => "collecting",
            BackupStatus::Collected => "collected",
            BackupStatus::CollectFailed => "collect_failed",
            BackupStatus::Storing => "storing",
            BackupStatus::Stored => "stored",
            BackupStatus::StoreFailed => "store_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(BackupStatus::Scheduled),
            "collecting" => Some(BackupStatus::Collecting),
            "collected" => Some(BackupStatus::Collected),
            "collect_failed" => Some(BackupStatus::CollectFailed),
            "storing" => Some(BackupStatus::Storing),
            "stored" => Some(BackupStatus::Stored),
            "store_failed" => Some(BackupStatus::StoreFailed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackupStatus::Stored | BackupStatus::CollectFailed | BackupStatus::StoreFailed
        )
    }

    fn rank(&self) -> u8 {
        match self {
            BackupStatus::Scheduled => 0,
            BackupStatus::Collecting => 1,
            BackupStatus::Collected | BackupStatus::CollectFailed => 2,
            BackupStatus::Storing => 3,
            BackupStatus::Stored | BackupStatus::StoreFailed => 4,
        }
    }

    /// 校验状态转换。同状态的重放是合法的（消费端幂等），
    /// 终态之后不再接受任何转换，状态永不回退。
    pub fn can_transition(from: BackupStatus, to: BackupStatus) -> bool {
        if from == to {
            return true;
        }
        if from.is_terminal() {
            return false;
        }
        to.rank() > from.rank()
    }
}

/// 持久化的备份记录，资源API读取，保留策略执行器删除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredBackup {
    pub id: i64,
    pub device_id: i64,
    pub timestamp: DateTime<Utc>,
    pub backend: String,
    pub location: String,
    pub path: Option<String>,
    pub version_marker: Option<String>,
    pub size_bytes: Option<u64>,
    pub status: BackupStatus,
    /// 审计日志行（JSON数组），无需查进程日志即可还原链路
    pub log_lines: Vec<String>,
    /// 来源采集任务id，消费端以此去重
    pub job_identifier: String,
    pub updated_at: DateTime<Utc>,
}

/// 对备份记录的一次写入（由两个结果消费者构造）
#[derive(Debug, Clone)]
pub struct BackupUpsert {
    pub device_id: i64,
    pub timestamp: DateTime<Utc>,
    pub status: BackupStatus,
    pub backend: String,
    pub location: String,
    pub path: Option<String>,
    pub version_marker: Option<String>,
    pub size_bytes: Option<u64>,
    pub log_lines: Vec<String>,
    pub job_identifier: String,
}

/// 分布式锁的持有记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEntry {
    pub name: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}
