use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netvault_errors::StorageError;
use serde::{Deserialize, Serialize};

/// 存储后端专属队列名："storage." 前缀加后端键
pub fn storage_queue_name(backend: &str) -> String {
    format!("storage.{backend}")
}

/// 一次成功存储产生的制品信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredArtifact {
    /// 后端内的存储路径
    pub path: String,
    /// 后端特定的版本标记，可用于事后取回该版本
    pub version_marker: String,
    pub size_bytes: u64,
}

/// 已存在的备份版本（列举用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactVersion {
    pub version_marker: String,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
}

/// 存储后端抽象。每个进程内的实现在启动时注册到后端表，
/// 存储worker按后端键绑定到各自的 `storage.{backend}` 队列。
///
/// save 必须是幂等的：同一 `idempotency_key` 的重放返回
/// 首次写入的制品信息；相同（设备、时间戳）但不同key的写入
/// 必须以 `StorageError::Conflict` 拒绝，禁止静默覆盖。
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// 后端注册键（"fs"、"git"）
    fn key(&self) -> &'static str;

    async fn save(
        &self,
        location: &str,
        device_id: i64,
        timestamp: DateTime<Utc>,
        payload: &str,
        idempotency_key: &str,
    ) -> Result<StoredArtifact, StorageError>;

    /// 按版本标记取回备份内容
    async fn retrieve(
        &self,
        location: &str,
        version_marker: &str,
    ) -> Result<String, StorageError>;

    /// 列举某设备在该位置下的全部版本，按时间升序
    async fn list_versions(
        &self,
        location: &str,
        device_id: i64,
    ) -> Result<Vec<ArtifactVersion>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_name_carries_backend_key() {
        assert_eq!(storage_queue_name("fs"), "storage.fs");
        assert_eq!(storage_queue_name("git"), "storage.git");
    }
}
