use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netvault_errors::VaultResult;

use crate::entities::{BackupUpsert, Device, Schedule, StoredBackup};

/// 备份计划仓储。调度器只读计划，写入仅限触发时间戳。
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn list_enabled(&self) -> VaultResult<Vec<Schedule>>;

    async fn get_by_id(&self, id: i64) -> VaultResult<Option<Schedule>>;

    /// 记录计划最近一次成功触发的时间（补采窗口的判断依据）
    async fn update_last_run(&self, id: i64, run_at: DateTime<Utc>) -> VaultResult<()>;
}

/// 设备仓储。流水线只读。
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> VaultResult<Option<Device>>;

    async fn list_by_ids(&self, ids: &[i64]) -> VaultResult<Vec<Device>>;
}

/// 备份记录仓储。
///
/// upsert 以（设备id、时间戳）为自然键：不存在则创建，
/// 存在则按状态机校验后合并。非法的状态转换返回
/// `VaultError::InvalidStateTransition`，消费端记告警后确认消息，
/// 已有记录保持不变。
#[async_trait]
pub trait StoredBackupRepository: Send + Sync {
    async fn upsert(&self, upsert: &BackupUpsert) -> VaultResult<StoredBackup>;

    async fn get_by_device_and_time(
        &self,
        device_id: i64,
        timestamp: DateTime<Utc>,
    ) -> VaultResult<Option<StoredBackup>>;

    async fn list_by_device(&self, device_id: i64) -> VaultResult<Vec<StoredBackup>>;

    /// 某任务id是否已写入过（消费端幂等检查）
    async fn job_identifier_seen(&self, job_identifier: &str) -> VaultResult<bool>;
}
