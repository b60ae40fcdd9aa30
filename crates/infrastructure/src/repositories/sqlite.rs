use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netvault_domain::entities::{
    BackupStatus, BackupUpsert, Device, Schedule, StoredBackup,
};
use netvault_domain::repositories::{
    DeviceRepository, ScheduleRepository, StoredBackupRepository,
};
use netvault_errors::{VaultError, VaultResult};
use sqlx::{Row, SqlitePool};

use super::merge_backup;

/// 建表。重复执行无害，启动时调用。
pub async fn run_migrations(pool: &SqlitePool) -> VaultResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schedules (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            cadence TEXT NOT NULL,
            queue TEXT,
            enabled INTEGER NOT NULL DEFAULT 1,
            device_ids TEXT NOT NULL DEFAULT '[]',
            last_run_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            address TEXT NOT NULL,
            backup_method TEXT NOT NULL,
            credential TEXT,
            collection_group TEXT,
            storage_backend TEXT NOT NULL,
            storage_location TEXT NOT NULL,
            retention_policy TEXT,
            enabled INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stored_backups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            backend TEXT NOT NULL,
            location TEXT NOT NULL,
            path TEXT,
            version_marker TEXT,
            size_bytes INTEGER,
            status TEXT NOT NULL,
            log_lines TEXT NOT NULL DEFAULT '[]',
            job_identifier TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (device_id, timestamp)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_stored_backups_job ON stored_backups (job_identifier)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn schedule_from_row(row: &sqlx::sqlite::SqliteRow) -> VaultResult<Schedule> {
    let device_ids: String = row.try_get("device_ids")?;
    Ok(Schedule {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        cadence: row.try_get("cadence")?,
        queue: row.try_get("queue")?,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
        device_ids: serde_json::from_str(&device_ids)?,
        last_run_at: row.try_get("last_run_at")?,
    })
}

fn device_from_row(row: &sqlx::sqlite::SqliteRow) -> VaultResult<Device> {
    let credential: Option<String> = row.try_get("credential")?;
    Ok(Device {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        address: row.try_get("address")?,
        backup_method: row.try_get("backup_method")?,
        credential: credential.map(|raw| serde_json::from_str(&raw)).transpose()?,
        collection_group: row.try_get("collection_group")?,
        storage_backend: row.try_get("storage_backend")?,
        storage_location: row.try_get("storage_location")?,
        retention_policy: row.try_get("retention_policy")?,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
    })
}

fn backup_from_row(row: &sqlx::sqlite::SqliteRow) -> VaultResult<StoredBackup> {
    let status_raw: String = row.try_get("status")?;
    let status = BackupStatus::parse(&status_raw).ok_or_else(|| {
        VaultError::DatabaseOperation(format!("无法识别的备份状态: {status_raw}"))
    })?;
    let log_lines: String = row.try_get("log_lines")?;
    let size_bytes: Option<i64> = row.try_get("size_bytes")?;
    Ok(StoredBackup {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        timestamp: row.try_get("timestamp")?,
        backend: row.try_get("backend")?,
        location: row.try_get("location")?,
        path: row.try_get("path")?,
        version_marker: row.try_get("version_marker")?,
        size_bytes: size_bytes.map(|v| v as u64),
        status,
        log_lines: serde_json::from_str(&log_lines)?,
        job_identifier: row.try_get("job_identifier")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// SQLite计划仓储
pub struct SqliteScheduleRepository {
    pool: SqlitePool,
}

impl SqliteScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleRepository for SqliteScheduleRepository {
    async fn list_enabled(&self) -> VaultResult<Vec<Schedule>> {
        let rows = sqlx::query("SELECT * FROM schedules WHERE enabled = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(schedule_from_row).collect()
    }

    async fn get_by_id(&self, id: i64) -> VaultResult<Option<Schedule>> {
        let row = sqlx::query("SELECT * FROM schedules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(schedule_from_row).transpose()
    }

    async fn update_last_run(&self, id: i64, run_at: DateTime<Utc>) -> VaultResult<()> {
        let result = sqlx::query("UPDATE schedules SET last_run_at = ? WHERE id = ?")
            .bind(run_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(VaultError::ScheduleNotFound { id });
        }
        Ok(())
    }
}

/// SQLite设备仓储
pub struct SqliteDeviceRepository {
    pool: SqlitePool,
}

impl SqliteDeviceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceRepository for SqliteDeviceRepository {
    async fn get_by_id(&self, id: i64) -> VaultResult<Option<Device>> {
        let row = sqlx::query("SELECT * FROM devices WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn list_by_ids(&self, ids: &[i64]) -> VaultResult<Vec<Device>> {
        let mut devices = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(device) = self.get_by_id(*id).await? {
                devices.push(device);
            }
        }
        Ok(devices)
    }
}

/// SQLite备份记录仓储。
/// 合并在事务内完成：读当前行、按状态机合并、写回。
pub struct SqliteStoredBackupRepository {
    pool: SqlitePool,
}

impl SqliteStoredBackupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StoredBackupRepository for SqliteStoredBackupRepository {
    async fn upsert(&self, upsert: &BackupUpsert) -> VaultResult<StoredBackup> {
        let mut tx = self.pool.begin().await?;

        let existing_row =
            sqlx::query("SELECT * FROM stored_backups WHERE device_id = ? AND timestamp = ?")
                .bind(upsert.device_id)
                .bind(upsert.timestamp)
                .fetch_optional(&mut *tx)
                .await?;
        let existing = existing_row.as_ref().map(backup_from_row).transpose()?;

        let merged = merge_backup(existing.as_ref(), upsert, 0)?;
        let log_lines = serde_json::to_string(&merged.log_lines)?;

        let merged = if existing.is_some() {
            sqlx::query(
                r#"
                UPDATE stored_backups
                SET backend = ?, location = ?, path = ?, version_marker = ?,
                    size_bytes = ?, status = ?, log_lines = ?, job_identifier = ?, updated_at = ?
                WHERE device_id = ? AND timestamp = ?
                "#,
            )
            .bind(&merged.backend)
            .bind(&merged.location)
            .bind(&merged.path)
            .bind(&merged.version_marker)
            .bind(merged.size_bytes.map(|v| v as i64))
            .bind(merged.status.as_str())
            .bind(&log_lines)
            .bind(&merged.job_identifier)
            .bind(merged.updated_at)
            .bind(merged.device_id)
            .bind(merged.timestamp)
            .execute(&mut *tx)
            .await?;
            merged
        } else {
            let result = sqlx::query(
                r#"
                INSERT INTO stored_backups
                    (device_id, timestamp, backend, location, path, version_marker,
                     size_bytes, status, log_lines, job_identifier, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(merged.device_id)
            .bind(merged.timestamp)
            .bind(&merged.backend)
            .bind(&merged.location)
            .bind(&merged.path)
            .bind(&merged.version_marker)
            .bind(merged.size_bytes.map(|v| v as i64))
            .bind(merged.status.as_str())
            .bind(&log_lines)
            .bind(&merged.job_identifier)
            .bind(merged.updated_at)
            .execute(&mut *tx)
            .await?;
            let mut merged = merged;
            merged.id = result.last_insert_rowid();
            merged
        };

        tx.commit().await?;
        Ok(merged)
    }

    async fn get_by_device_and_time(
        &self,
        device_id: i64,
        timestamp: DateTime<Utc>,
    ) -> VaultResult<Option<StoredBackup>> {
        let row = sqlx::query("SELECT * FROM stored_backups WHERE device_id = ? AND timestamp = ?")
            .bind(device_id)
            .bind(timestamp)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(backup_from_row).transpose()
    }

    async fn list_by_device(&self, device_id: i64) -> VaultResult<Vec<StoredBackup>> {
        let rows =
            sqlx::query("SELECT * FROM stored_backups WHERE device_id = ? ORDER BY timestamp")
                .bind(device_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(backup_from_row).collect()
    }

    async fn job_identifier_seen(&self, job_identifier: &str) -> VaultResult<bool> {
        let row = sqlx::query("SELECT 1 FROM stored_backups WHERE job_identifier = ? LIMIT 1")
            .bind(job_identifier)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn backup_upsert_round_trip() {
        let pool = pool().await;
        let repo = SqliteStoredBackupRepository::new(pool);
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();

        let record = repo
            .upsert(&BackupUpsert {
                device_id: 3,
                timestamp: ts,
                status: BackupStatus::Collecting,
                backend: "fs".into(),
                location: "core".into(),
                path: None,
                version_marker: None,
                size_bytes: None,
                log_lines: vec!["collecting".into()],
                job_identifier: "j1".into(),
            })
            .await
            .unwrap();
        assert!(record.id > 0);

        let stored = repo
            .upsert(&BackupUpsert {
                device_id: 3,
                timestamp: ts,
                status: BackupStatus::Stored,
                backend: "fs".into(),
                location: "core".into(),
                path: Some("core/device_3/x.cfg".into()),
                version_marker: Some("core/device_3/x.cfg".into()),
                size_bytes: Some(9),
                log_lines: vec!["stored".into()],
                job_identifier: "j1:store".into(),
            })
            .await
            .unwrap();
        assert_eq!(stored.id, record.id);
        assert_eq!(stored.status, BackupStatus::Stored);
        assert_eq!(stored.log_lines.len(), 2);

        // 回退被拒绝
        let err = repo
            .upsert(&BackupUpsert {
                device_id: 3,
                timestamp: ts,
                status: BackupStatus::Collecting,
                backend: "fs".into(),
                location: "core".into(),
                path: None,
                version_marker: None,
                size_bytes: None,
                log_lines: Vec::new(),
                job_identifier: "j2".into(),
            })
            .await;
        assert!(matches!(
            err,
            Err(VaultError::InvalidStateTransition { .. })
        ));

        assert!(repo.job_identifier_seen("j1:store").await.unwrap());
    }

    #[tokio::test]
    async fn schedule_and_device_round_trip() {
        let pool = pool().await;
        sqlx::query(
            "INSERT INTO schedules (id, name, cadence, queue, enabled, device_ids) \
             VALUES (1, 'nightly', '0 0 2 * * *', NULL, 1, '[3]')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO devices (id, name, address, backup_method, credential, \
             collection_group, storage_backend, storage_location, retention_policy, enabled) \
             VALUES (3, 'sw1', '10.0.0.3', 'noop', '{}', NULL, 'fs', 'core', NULL, 1)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let schedules = SqliteScheduleRepository::new(pool.clone());
        let devices = SqliteDeviceRepository::new(pool);

        let enabled = schedules.list_enabled().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].device_ids, vec![3]);

        let run_at = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        schedules.update_last_run(1, run_at).await.unwrap();
        let schedule = schedules.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(schedule.last_run_at, Some(run_at));

        let device = devices.get_by_id(3).await.unwrap().unwrap();
        assert_eq!(device.storage_backend, "fs");
    }
}
