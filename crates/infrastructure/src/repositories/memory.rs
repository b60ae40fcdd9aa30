use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netvault_domain::entities::{BackupUpsert, Device, Schedule, StoredBackup};
use netvault_domain::repositories::{
    DeviceRepository, ScheduleRepository, StoredBackupRepository,
};
use netvault_errors::{VaultError, VaultResult};
use tokio::sync::Mutex;

use super::merge_backup;

/// 进程内计划仓储
#[derive(Default)]
pub struct InMemoryScheduleRepository {
    schedules: Mutex<HashMap<i64, Schedule>>,
}

impl InMemoryScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, schedule: Schedule) {
        self.schedules.lock().await.insert(schedule.id, schedule);
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn list_enabled(&self) -> VaultResult<Vec<Schedule>> {
        let schedules = self.schedules.lock().await;
        let mut enabled: Vec<_> = schedules.values().filter(|s| s.enabled).cloned().collect();
        enabled.sort_by_key(|s| s.id);
        Ok(enabled)
    }

    async fn get_by_id(&self, id: i64) -> VaultResult<Option<Schedule>> {
        Ok(self.schedules.lock().await.get(&id).cloned())
    }

    async fn update_last_run(&self, id: i64, run_at: DateTime<Utc>) -> VaultResult<()> {
        let mut schedules = self.schedules.lock().await;
        let schedule = schedules
            .get_mut(&id)
            .ok_or(VaultError::ScheduleNotFound { id })?;
        schedule.last_run_at = Some(run_at);
        Ok(())
    }
}

/// 进程内设备仓储
#[derive(Default)]
pub struct InMemoryDeviceRepository {
    devices: Mutex<HashMap<i64, Device>>,
}

impl InMemoryDeviceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, device: Device) {
        self.devices.lock().await.insert(device.id, device);
    }
}

#[async_trait]
impl DeviceRepository for InMemoryDeviceRepository {
    async fn get_by_id(&self, id: i64) -> VaultResult<Option<Device>> {
        Ok(self.devices.lock().await.get(&id).cloned())
    }

    async fn list_by_ids(&self, ids: &[i64]) -> VaultResult<Vec<Device>> {
        let devices = self.devices.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| devices.get(id).cloned())
            .collect())
    }
}

/// 进程内备份记录仓储，自然键为（设备id、时间戳）
#[derive(Default)]
pub struct InMemoryStoredBackupRepository {
    backups: Mutex<HashMap<(i64, DateTime<Utc>), StoredBackup>>,
    next_id: Mutex<i64>,
}

impl InMemoryStoredBackupRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoredBackupRepository for InMemoryStoredBackupRepository {
    async fn upsert(&self, upsert: &BackupUpsert) -> VaultResult<StoredBackup> {
        let mut backups = self.backups.lock().await;
        let key = (upsert.device_id, upsert.timestamp);
        let new_id = {
            let mut next = self.next_id.lock().await;
            *next += 1;
            *next
        };
        let merged = merge_backup(backups.get(&key), upsert, new_id)?;
        backups.insert(key, merged.clone());
        Ok(merged)
    }

    async fn get_by_device_and_time(
        &self,
        device_id: i64,
        timestamp: DateTime<Utc>,
    ) -> VaultResult<Option<StoredBackup>> {
        let backups = self.backups.lock().await;
        Ok(backups.get(&(device_id, timestamp)).cloned())
    }

    async fn list_by_device(&self, device_id: i64) -> VaultResult<Vec<StoredBackup>> {
        let backups = self.backups.lock().await;
        let mut found: Vec<_> = backups
            .values()
            .filter(|b| b.device_id == device_id)
            .cloned()
            .collect();
        found.sort_by_key(|b| b.timestamp);
        Ok(found)
    }

    async fn job_identifier_seen(&self, job_identifier: &str) -> VaultResult<bool> {
        let backups = self.backups.lock().await;
        Ok(backups
            .values()
            .any(|b| b.job_identifier == job_identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use netvault_domain::entities::BackupStatus;

    #[tokio::test]
    async fn upsert_converges_without_regression() {
        let repo = InMemoryStoredBackupRepository::new();
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        let base = BackupUpsert {
            device_id: 5,
            timestamp: ts,
            status: BackupStatus::Collecting,
            backend: "fs".into(),
            location: "core".into(),
            path: None,
            version_marker: None,
            size_bytes: None,
            log_lines: vec!["collecting".into()],
            job_identifier: "j1".into(),
        };
        repo.upsert(&base).await.unwrap();

        let mut stored = base.clone();
        stored.status = BackupStatus::Stored;
        stored.path = Some("core/device_5/x.cfg".into());
        stored.size_bytes = Some(42);
        stored.job_identifier = "j1:store".into();
        stored.log_lines = vec!["stored".into()];
        let final_record = repo.upsert(&stored).await.unwrap();
        assert_eq!(final_record.status, BackupStatus::Stored);

        // 迟到的中间状态写入被拒绝，记录保持终态
        let err = repo.upsert(&base).await;
        assert!(err.is_err());
        let current = repo.get_by_device_and_time(5, ts).await.unwrap().unwrap();
        assert_eq!(current.status, BackupStatus::Stored);
        assert_eq!(current.size_bytes, Some(42));
    }

    #[tokio::test]
    async fn job_identifier_lookup() {
        let repo = InMemoryStoredBackupRepository::new();
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        let upsert = BackupUpsert {
            device_id: 5,
            timestamp: ts,
            status: BackupStatus::Collected,
            backend: "fs".into(),
            location: "core".into(),
            path: None,
            version_marker: None,
            size_bytes: None,
            log_lines: Vec::new(),
            job_identifier: "j7".into(),
        };
        repo.upsert(&upsert).await.unwrap();
        assert!(repo.job_identifier_seen("j7").await.unwrap());
        assert!(!repo.job_identifier_seen("j8").await.unwrap());
    }
}
