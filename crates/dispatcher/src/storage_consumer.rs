use std::sync::Arc;

use netvault_config::StreamsConfig;
use netvault_domain::entities::{BackupStatus, BackupUpsert, ResultStatus, StorageResultEntry};
use netvault_domain::messaging::{ResultStream, StreamEntry};
use netvault_domain::repositories::StoredBackupRepository;
use netvault_errors::{VaultError, VaultResult};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 存储结果消费者。
///
/// 只写两个终态：成功 → stored（带路径、版本标记、字节数），
/// 失败 → store_failed。瞬时存储失败不会出现在结果流里，
/// 存储worker对它们走队列重投递。
pub struct StorageResultConsumer {
    stream: Arc<dyn ResultStream>,
    backup_repo: Arc<dyn StoredBackupRepository>,
    config: StreamsConfig,
    consumer_name: String,
}

impl StorageResultConsumer {
    pub fn new(
        stream: Arc<dyn ResultStream>,
        backup_repo: Arc<dyn StoredBackupRepository>,
        config: StreamsConfig,
        consumer_name: String,
    ) -> Self {
        Self {
            stream,
            backup_repo,
            config,
            consumer_name,
        }
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> VaultResult<()> {
        self.stream
            .ensure_group(&self.config.storage_results, &self.config.group)
            .await?;
        info!(consumer = %self.consumer_name, "storage result consumer starting");

        let claimed = self
            .stream
            .claim_pending(
                &self.config.storage_results,
                &self.config.group,
                &self.consumer_name,
                self.config.claim_min_idle_ms,
                self.config.read_count,
            )
            .await?;
        for entry in claimed {
            self.handle_entry(&entry).await;
        }

        loop {
            if shutdown.try_recv().is_ok() {
                break;
            }
            let entries = tokio::select! {
                _ = shutdown.recv() => break,
                result = self.stream.read_group(
                    &self.config.storage_results,
                    &self.config.group,
                    &self.consumer_name,
                    self.config.read_count,
                    self.config.block_ms,
                ) => result?,
            };
            for entry in entries {
                self.handle_entry(&entry).await;
            }
        }
        info!("storage result consumer stopped");
        Ok(())
    }

    pub async fn handle_entry(&self, entry: &StreamEntry) {
        let result: StorageResultEntry = match serde_json::from_value(entry.payload.clone()) {
            Ok(result) => result,
            Err(e) => {
                warn!(entry_id = %entry.id, "无法解析的存储结果条目，直接确认: {e}");
                self.ack(entry).await;
                return;
            }
        };

        match self.process_result(&result).await {
            Ok(()) => self.ack(entry).await,
            Err(VaultError::InvalidStateTransition { from, to }) => {
                warn!(
                    job_id = %result.job_id,
                    from, to,
                    "stale storage result ignored"
                );
                self.ack(entry).await;
            }
            Err(e) => {
                error!(job_id = %result.job_id, "处理存储结果失败，等待重投: {e}");
            }
        }
    }

    async fn process_result(&self, result: &StorageResultEntry) -> VaultResult<()> {
        let (status, log_line) = match result.status {
            ResultStatus::Success => (
                BackupStatus::Stored,
                format!(
                    "stored by job {} via {} in {}ms",
                    result.job_id, result.backend, result.duration_ms
                ),
            ),
            ResultStatus::Failure => (
                BackupStatus::StoreFailed,
                format!(
                    "store failed ({}) via {}: {}",
                    result.error_kind.as_deref().unwrap_or("unknown"),
                    result.backend,
                    result.error_detail.as_deref().unwrap_or("")
                ),
            ),
        };

        self.backup_repo
            .upsert(&BackupUpsert {
                device_id: result.device_id,
                timestamp: result.timestamp,
                status,
                backend: result.backend.clone(),
                location: String::new(), // 保留记录里已有的location
                path: result.path.clone(),
                version_marker: result.version_marker.clone(),
                size_bytes: result.size_bytes,
                log_lines: vec![log_line],
                job_identifier: result.job_id.clone(),
            })
            .await?;
        info!(
            job_id = %result.job_id,
            status = status.as_str(),
            "storage result recorded"
        );
        Ok(())
    }

    async fn ack(&self, entry: &StreamEntry) {
        if let Err(e) = self
            .stream
            .ack(&self.config.storage_results, &self.config.group, &entry.id)
            .await
        {
            error!(entry_id = %entry.id, "确认存储结果条目失败: {e}");
        }
    }
}
