//! 存储后端实现与进程内后端表。

pub mod fs;
pub mod git;

use std::collections::HashMap;
use std::sync::Arc;

use netvault_domain::storage::StorageBackend;
use netvault_errors::{VaultError, VaultResult};

/// 进程内存储后端表。启动时按配置注册，运行期只读。
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<&'static str, Arc<dyn StorageBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn StorageBackend>) {
        self.backends.insert(backend.key(), backend);
    }

    pub fn resolve(&self, key: &str) -> VaultResult<Arc<dyn StorageBackend>> {
        self.backends
            .get(key)
            .cloned()
            .ok_or_else(|| VaultError::UnknownStorageBackend { key: key.to_string() })
    }

    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.backends.keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}

/// 备份文件名：UTC时间戳，秒级精度
pub(crate) fn artifact_file_name(timestamp: chrono::DateTime<chrono::Utc>) -> String {
    format!("{}.cfg", timestamp.format("%Y%m%dT%H%M%SZ"))
}

pub(crate) fn parse_artifact_timestamp(
    file_name: &str,
) -> Option<chrono::DateTime<chrono::Utc>> {
    let stem = file_name.strip_suffix(".cfg")?;
    chrono::NaiveDateTime::parse_from_str(stem, "%Y%m%dT%H%M%SZ")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn artifact_name_round_trip() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        let name = artifact_file_name(ts);
        assert_eq!(name, "20260301T020000Z.cfg");
        assert_eq!(parse_artifact_timestamp(&name), Some(ts));
    }
}
