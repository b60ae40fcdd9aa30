use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netvault_domain::storage::{ArtifactVersion, StorageBackend, StoredArtifact};
use netvault_errors::StorageError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{artifact_file_name, parse_artifact_timestamp};

/// 制品旁的元数据文件，幂等重放的判断依据
#[derive(Debug, Serialize, Deserialize)]
struct ArtifactMeta {
    idempotency_key: String,
    size_bytes: u64,
}

/// 文件系统存储后端。
///
/// 目录布局：`{base}/{location}/device_{id}/{ts}.cfg`，
/// 每个制品带 `.meta` 旁文件记录写入时的幂等键。
/// 相同幂等键的重放返回首次写入的结果；相同（设备、时间戳）
/// 但不同幂等键的写入以冲突拒绝，已有文件永不被覆盖。
pub struct FsBackend {
    base_path: PathBuf,
}

impl FsBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn device_dir(&self, location: &str, device_id: i64) -> PathBuf {
        self.base_path.join(location).join(format!("device_{device_id}"))
    }

    fn relative_path(location: &str, device_id: i64, file_name: &str) -> String {
        format!("{location}/device_{device_id}/{file_name}")
    }

    async fn read_meta(meta_path: &Path) -> Result<ArtifactMeta, StorageError> {
        let raw = tokio::fs::read_to_string(meta_path)
            .await
            .map_err(io_error)?;
        serde_json::from_str(&raw)
            .map_err(|e| StorageError::Io(format!("损坏的元数据文件 {}: {e}", meta_path.display())))
    }

    async fn replay_or_conflict(
        &self,
        location: &str,
        device_id: i64,
        file_name: &str,
        idempotency_key: &str,
        meta_path: &Path,
    ) -> Result<StoredArtifact, StorageError> {
        let meta = Self::read_meta(meta_path).await?;
        if meta.idempotency_key == idempotency_key {
            let rel = Self::relative_path(location, device_id, file_name);
            debug!(path = %rel, "idempotent replay, returning prior artifact");
            return Ok(StoredArtifact {
                path: rel.clone(),
                version_marker: rel,
                size_bytes: meta.size_bytes,
            });
        }
        Err(StorageError::Conflict(format!(
            "设备{device_id}在该时间点已有来自其他任务的备份: {file_name}"
        )))
    }
}

fn io_error(e: std::io::Error) -> StorageError {
    match e.kind() {
        ErrorKind::StorageFull | ErrorKind::QuotaExceeded => StorageError::Capacity(e.to_string()),
        ErrorKind::PermissionDenied => StorageError::Unavailable(e.to_string()),
        _ => StorageError::Io(e.to_string()),
    }
}

#[async_trait]
impl StorageBackend for FsBackend {
    fn key(&self) -> &'static str {
        "fs"
    }

    async fn save(
        &self,
        location: &str,
        device_id: i64,
        timestamp: DateTime<Utc>,
        payload: &str,
        idempotency_key: &str,
    ) -> Result<StoredArtifact, StorageError> {
        let file_name = artifact_file_name(timestamp);
        let dir = self.device_dir(location, device_id);
        let file_path = dir.join(&file_name);
        let meta_path = dir.join(format!("{file_name}.meta"));

        if tokio::fs::try_exists(&file_path).await.map_err(io_error)? {
            return self
                .replay_or_conflict(location, device_id, &file_name, idempotency_key, &meta_path)
                .await;
        }

        tokio::fs::create_dir_all(&dir).await.map_err(io_error)?;

        // create_new杜绝并发写同一文件时的静默覆盖
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        match options.open(&file_path).await {
            Ok(file) => {
                use tokio::io::AsyncWriteExt;
                let mut file = file;
                file.write_all(payload.as_bytes()).await.map_err(io_error)?;
                file.flush().await.map_err(io_error)?;
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return self
                    .replay_or_conflict(
                        location,
                        device_id,
                        &file_name,
                        idempotency_key,
                        &meta_path,
                    )
                    .await;
            }
            Err(e) => return Err(io_error(e)),
        }

        let meta = ArtifactMeta {
            idempotency_key: idempotency_key.to_string(),
            size_bytes: payload.len() as u64,
        };
        let raw = serde_json::to_string(&meta)
            .map_err(|e| StorageError::Io(format!("序列化元数据失败: {e}")))?;
        tokio::fs::write(&meta_path, raw).await.map_err(io_error)?;

        let rel = Self::relative_path(location, device_id, &file_name);
        Ok(StoredArtifact {
            path: rel.clone(),
            version_marker: rel,
            size_bytes: payload.len() as u64,
        })
    }

    async fn retrieve(
        &self,
        _location: &str,
        version_marker: &str,
    ) -> Result<String, StorageError> {
        // 版本标记就是base内的相对路径；拒绝越界访问
        if version_marker.split('/').any(|part| part == "..") {
            return Err(StorageError::VersionNotFound(version_marker.to_string()));
        }
        let path = self.base_path.join(version_marker);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::VersionNotFound(version_marker.to_string()))
            }
            Err(e) => Err(io_error(e)),
        }
    }

    async fn list_versions(
        &self,
        location: &str,
        device_id: i64,
    ) -> Result<Vec<ArtifactVersion>, StorageError> {
        let dir = self.device_dir(location, device_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(e)),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(timestamp) = parse_artifact_timestamp(&name) else {
                continue;
            };
            let size = entry.metadata().await.map_err(io_error)?.len();
            versions.push(ArtifactVersion {
                version_marker: Self::relative_path(location, device_id, &name),
                timestamp,
                size_bytes: size,
            });
        }
        versions.sort_by_key(|v| v.timestamp);
        Ok(versions)
    }
}
