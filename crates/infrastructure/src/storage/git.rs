use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netvault_domain::storage::{ArtifactVersion, StorageBackend, StoredArtifact};
use netvault_errors::StorageError;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use super::{artifact_file_name, parse_artifact_timestamp};

#[derive(Debug, Serialize, Deserialize)]
struct CommitMeta {
    idempotency_key: String,
    commit: String,
    size_bytes: u64,
}

/// Git存储后端，每个location对应一个本地裸仓库的工作副本。
///
/// 制品写入工作树后提交，版本标记为 `{commit}:{相对路径}`。
/// `.meta` 旁文件不入库，仅记录幂等键与提交哈希，
/// 供重复投递时返回首次提交的结果。
pub struct GitBackend {
    repo_root: PathBuf,
}

impl GitBackend {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    fn repo_dir(&self, location: &str) -> PathBuf {
        self.repo_root.join(location)
    }

    async fn run_git(repo: &Path, args: &[&str]) -> Result<String, StorageError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(repo)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    StorageError::Unavailable("git可执行文件未找到".to_string())
                } else {
                    StorageError::Io(format!("启动git失败: {e}"))
                }
            })?;

        if !output.status.success() {
            return Err(StorageError::Io(format!(
                "git {} 失败: {}",
                args.first().copied().unwrap_or(""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn ensure_repo(&self, location: &str) -> Result<PathBuf, StorageError> {
        let repo = self.repo_dir(location);
        if !repo.join(".git").exists() {
            tokio::fs::create_dir_all(&repo)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
            Self::run_git(&repo, &["init", "--quiet"]).await?;
            debug!(repo = %repo.display(), "initialized backup repository");
        }
        Ok(repo)
    }

    async fn commit_artifact(
        repo: &Path,
        rel_path: &str,
        device_id: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<String, StorageError> {
        Self::run_git(repo, &["add", rel_path]).await?;
        let message = format!("backup device {device_id} at {}", timestamp.to_rfc3339());
        Self::run_git(
            repo,
            &[
                "-c",
                "user.name=netvault",
                "-c",
                "user.email=netvault@localhost",
                "commit",
                "--quiet",
                "--allow-empty",
                "-m",
                &message,
            ],
        )
        .await?;
        Self::run_git(repo, &["rev-parse", "HEAD"]).await
    }
}

#[async_trait]
impl StorageBackend for GitBackend {
    fn key(&self) -> &'static str {
        "git"
    }

    async fn save(
        &self,
        location: &str,
        device_id: i64,
        timestamp: DateTime<Utc>,
        payload: &str,
        idempotency_key: &str,
    ) -> Result<StoredArtifact, StorageError> {
        let repo = self.ensure_repo(location).await?;
        let file_name = artifact_file_name(timestamp);
        let rel_path = format!("device_{device_id}/{file_name}");
        let file_path = repo.join(&rel_path);
        let meta_path = repo.join(format!("{rel_path}.meta"));

        if tokio::fs::try_exists(&file_path)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            // 已有制品：同一幂等键按重放处理，否则是冲突
            if let Ok(raw) = tokio::fs::read_to_string(&meta_path).await {
                let meta: CommitMeta = serde_json::from_str(&raw)
                    .map_err(|e| StorageError::Io(format!("损坏的元数据文件: {e}")))?;
                if meta.idempotency_key == idempotency_key {
                    return Ok(StoredArtifact {
                        path: rel_path.clone(),
                        version_marker: format!("{}:{rel_path}", meta.commit),
                        size_bytes: meta.size_bytes,
                    });
                }
            }
            return Err(StorageError::Conflict(format!(
                "设备{device_id}在该时间点已有备份: {rel_path}"
            )));
        }

        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }
        tokio::fs::write(&file_path, payload)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;

        let commit = Self::commit_artifact(&repo, &rel_path, device_id, timestamp).await?;

        let meta = CommitMeta {
            idempotency_key: idempotency_key.to_string(),
            commit: commit.clone(),
            size_bytes: payload.len() as u64,
        };
        let raw = serde_json::to_string(&meta)
            .map_err(|e| StorageError::Io(format!("序列化元数据失败: {e}")))?;
        tokio::fs::write(&meta_path, raw)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(StoredArtifact {
            path: rel_path.clone(),
            version_marker: format!("{commit}:{rel_path}"),
            size_bytes: payload.len() as u64,
        })
    }

    async fn retrieve(
        &self,
        location: &str,
        version_marker: &str,
    ) -> Result<String, StorageError> {
        let Some((commit, rel_path)) = version_marker.split_once(':') else {
            return Err(StorageError::VersionNotFound(version_marker.to_string()));
        };
        let repo = self.repo_dir(location);
        let spec = format!("{commit}:{rel_path}");
        Self::run_git(&repo, &["show", &spec])
            .await
            .map_err(|_| StorageError::VersionNotFound(version_marker.to_string()))
    }

    async fn list_versions(
        &self,
        location: &str,
        device_id: i64,
    ) -> Result<Vec<ArtifactVersion>, StorageError> {
        let dir = self.repo_dir(location).join(format!("device_{device_id}"));
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e.to_string())),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(timestamp) = parse_artifact_timestamp(&name) else {
                continue;
            };
            let meta_path = dir.join(format!("{name}.meta"));
            let marker = match tokio::fs::read_to_string(&meta_path).await {
                Ok(raw) => serde_json::from_str::<CommitMeta>(&raw)
                    .map(|m| format!("{}:device_{device_id}/{name}", m.commit))
                    .unwrap_or_else(|_| format!("HEAD:device_{device_id}/{name}")),
                Err(_) => format!("HEAD:device_{device_id}/{name}"),
            };
            let size = entry
                .metadata()
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?
                .len();
            versions.push(ArtifactVersion {
                version_marker: marker,
                timestamp,
                size_bytes: size,
            });
        }
        versions.sort_by_key(|v| v.timestamp);
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap()
    }

    async fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn save_commits_and_retrieves_by_marker() {
        if !git_available().await {
            return;
        }
        let dir = TempDir::new().unwrap();
        let backend = GitBackend::new(dir.path());
        let artifact = backend
            .save("edge", 3, ts(), "hostname edge-3", "job-9:store")
            .await
            .unwrap();
        assert!(artifact.version_marker.contains(':'));
        let content = backend
            .retrieve("edge", &artifact.version_marker)
            .await
            .unwrap();
        assert_eq!(content, "hostname edge-3");
    }

    #[tokio::test]
    async fn replay_returns_original_commit() {
        if !git_available().await {
            return;
        }
        let dir = TempDir::new().unwrap();
        let backend = GitBackend::new(dir.path());
        let first = backend
            .save("edge", 3, ts(), "v1", "job-9:store")
            .await
            .unwrap();
        let second = backend
            .save("edge", 3, ts(), "v1", "job-9:store")
            .await
            .unwrap();
        assert_eq!(first.version_marker, second.version_marker);

        let err = backend
            .save("edge", 3, ts(), "v2", "job-10:store")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }
}
