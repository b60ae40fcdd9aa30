//! 仓储实现：进程内（测试与单进程部署）与SQLite（持久化部署）。

pub mod memory;
pub mod sqlite;

use chrono::Utc;
use netvault_domain::entities::{BackupStatus, BackupUpsert, StoredBackup};
use netvault_errors::{VaultError, VaultResult};

/// 备份记录的合并规则，两个仓储实现共用。
///
/// 同状态且同任务id的写入是纯重放，原记录原样返回；
/// 非法的状态转换报错，已有记录不动。
pub(crate) fn merge_backup(
    existing: Option<&StoredBackup>,
    upsert: &BackupUpsert,
    new_id: i64,
) -> VaultResult<StoredBackup> {
    let Some(existing) = existing else {
        return Ok(StoredBackup {
            id: new_id,
            device_id: upsert.device_id,
            timestamp: upsert.timestamp,
            backend: upsert.backend.clone(),
            location: upsert.location.clone(),
            path: upsert.path.clone(),
            version_marker: upsert.version_marker.clone(),
            size_bytes: upsert.size_bytes,
            status: upsert.status,
            log_lines: upsert.log_lines.clone(),
            job_identifier: upsert.job_identifier.clone(),
            updated_at: Utc::now(),
        });
    };

    if !BackupStatus::can_transition(existing.status, upsert.status) {
        return Err(VaultError::InvalidStateTransition {
            from: existing.status.as_str().to_string(),
            to: upsert.status.as_str().to_string(),
        });
    }

    if existing.status == upsert.status && existing.job_identifier == upsert.job_identifier {
        return Ok(existing.clone());
    }

    let mut merged = existing.clone();
    merged.status = upsert.status;
    if upsert.path.is_some() {
        merged.path = upsert.path.clone();
    }
    if upsert.version_marker.is_some() {
        merged.version_marker = upsert.version_marker.clone();
    }
    if upsert.size_bytes.is_some() {
        merged.size_bytes = upsert.size_bytes;
    }
    if !upsert.backend.is_empty() {
        merged.backend = upsert.backend.clone();
    }
    if !upsert.location.is_empty() {
        merged.location = upsert.location.clone();
    }
    merged.log_lines.extend(upsert.log_lines.iter().cloned());
    merged.job_identifier = upsert.job_identifier.clone();
    merged.updated_at = Utc::now();
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn upsert(status: BackupStatus, job: &str) -> BackupUpsert {
        BackupUpsert {
            device_id: 1,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap(),
            status,
            backend: "fs".into(),
            location: "core".into(),
            path: None,
            version_marker: None,
            size_bytes: None,
            log_lines: vec![format!("{job}: {}", status.as_str())],
            job_identifier: job.into(),
        }
    }

    #[test]
    fn regression_is_rejected_and_record_untouched() {
        let stored = merge_backup(None, &upsert(BackupStatus::Stored, "j1"), 1).unwrap();
        let err = merge_backup(Some(&stored), &upsert(BackupStatus::Storing, "j2"), 2);
        assert!(matches!(
            err,
            Err(VaultError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn replay_of_same_job_returns_existing_unchanged() {
        let stored = merge_backup(None, &upsert(BackupStatus::Stored, "j1"), 1).unwrap();
        let replayed = merge_backup(Some(&stored), &upsert(BackupStatus::Stored, "j1"), 2).unwrap();
        assert_eq!(replayed.id, stored.id);
        assert_eq!(replayed.log_lines, stored.log_lines);
    }

    #[test]
    fn forward_transition_appends_log() {
        let collecting = merge_backup(None, &upsert(BackupStatus::Collecting, "j1"), 1).unwrap();
        let stored =
            merge_backup(Some(&collecting), &upsert(BackupStatus::Stored, "j1s"), 2).unwrap();
        assert_eq!(stored.status, BackupStatus::Stored);
        assert_eq!(stored.log_lines.len(), 2);
        assert_eq!(stored.id, collecting.id);
    }
}
