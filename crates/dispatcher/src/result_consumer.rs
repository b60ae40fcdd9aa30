use std::sync::Arc;

use netvault_config::StreamsConfig;
use netvault_domain::entities::{
    BackupStatus, BackupUpsert, CollectionJob, DeviceResultEntry, ResultStatus, StorageJob,
};
use netvault_domain::messaging::{Message, MessageQueue, ResultStream, StreamEntry};
use netvault_domain::repositories::{DeviceRepository, StoredBackupRepository};
use netvault_domain::storage::storage_queue_name;
use netvault_errors::{CollectError, VaultError, VaultResult};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// 采集结果消费者。
///
/// 以消费组身份读设备结果流，游标只在处理完成后提交：
/// - 成功：写collected、确定性派生存储任务入队、写storing
/// - 瞬时失败且尝试未耗尽：重建采集任务（attempt+1）重新入队
/// - 永久失败或尝试耗尽：写collect_failed终态
///
/// 条目可能被重复投递，所有写入都经过仓储的状态机合并，
/// 存储任务id由采集任务id确定性派生，重放不会产生分叉。
pub struct BackupResultConsumer {
    stream: Arc<dyn ResultStream>,
    queue: Arc<dyn MessageQueue>,
    device_repo: Arc<dyn DeviceRepository>,
    backup_repo: Arc<dyn StoredBackupRepository>,
    config: StreamsConfig,
    consumer_name: String,
    /// 重试入队时无分组设备的兜底队列
    default_queue: String,
}

impl BackupResultConsumer {
    pub fn new(
        stream: Arc<dyn ResultStream>,
        queue: Arc<dyn MessageQueue>,
        device_repo: Arc<dyn DeviceRepository>,
        backup_repo: Arc<dyn StoredBackupRepository>,
        config: StreamsConfig,
        consumer_name: String,
        default_queue: String,
    ) -> Self {
        Self {
            stream,
            queue,
            device_repo,
            backup_repo,
            config,
            consumer_name,
            default_queue,
        }
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> VaultResult<()> {
        self.stream
            .ensure_group(&self.config.device_results, &self.config.group)
            .await?;
        info!(consumer = %self.consumer_name, "backup result consumer starting");

        // 启动时先认领上一个消费者崩溃前滞留的条目
        let claimed = self
            .stream
            .claim_pending(
                &self.config.device_results,
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
                    &self.config.device_results,
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
        info!("backup result consumer stopped");
        Ok(())
    }

    /// 处理一条结果。只有处理成功（或确定不可处理）才确认；
    /// 处理中途出错则不确认，等待重新投递。
    pub async fn handle_entry(&self, entry: &StreamEntry) {
        let result: DeviceResultEntry = match serde_json::from_value(entry.payload.clone()) {
            Ok(result) => result,
            Err(e) => {
                warn!(entry_id = %entry.id, "无法解析的结果条目，直接确认: {e}");
                self.ack(entry).await;
                return;
            }
        };

        match self.process_result(&result).await {
            Ok(()) => self.ack(entry).await,
            Err(VaultError::InvalidStateTransition { from, to }) => {
                // 迟到的旧状态写入，记录已处于更晚的状态
                warn!(
                    job_id = %result.job_id,
                    from, to,
                    "stale result entry ignored"
                );
                self.ack(entry).await;
            }
            Err(e) => {
                error!(job_id = %result.job_id, "处理采集结果失败，等待重投: {e}");
            }
        }
    }

    async fn process_result(&self, result: &DeviceResultEntry) -> VaultResult<()> {
        let device = self
            .device_repo
            .get_by_id(result.device_id)
            .await?
            .ok_or(VaultError::DeviceNotFound {
                id: result.device_id,
            })?;

        match result.status {
            ResultStatus::Success => {
                let config_text = result.config_text.clone().unwrap_or_default();

                self.backup_repo
                    .upsert(&BackupUpsert {
                        device_id: result.device_id,
                        timestamp: result.timestamp,
                        status: BackupStatus::Collected,
                        backend: device.storage_backend.clone(),
                        location: device.storage_location.clone(),
                        path: None,
                        version_marker: None,
                        size_bytes: None,
                        log_lines: vec![format!(
                            "collected by job {} in {}ms",
                            result.job_id, result.duration_ms
                        )],
                        job_identifier: result.job_id.clone(),
                    })
                    .await?;

                let storage_job = StorageJob {
                    id: StorageJob::derived_id(&result.job_id),
                    source_job_id: result.job_id.clone(),
                    device_id: result.device_id,
                    backend: device.storage_backend.clone(),
                    location: device.storage_location.clone(),
                    payload: config_text,
                    timestamp: result.timestamp,
                    retention_hint: device.retention_policy.clone(),
                };
                let storage_queue = storage_queue_name(&storage_job.backend);
                self.queue.create_queue(&storage_queue).await?;
                self.queue
                    .publish_message(&storage_queue, &Message::storage(storage_job.clone()))
                    .await?;
                debug!(
                    job_id = %result.job_id,
                    storage_job = %storage_job.id,
                    queue = %storage_queue,
                    "storage job derived and enqueued"
                );

                self.backup_repo
                    .upsert(&BackupUpsert {
                        device_id: result.device_id,
                        timestamp: result.timestamp,
                        status: BackupStatus::Storing,
                        backend: device.storage_backend.clone(),
                        location: device.storage_location.clone(),
                        path: None,
                        version_marker: None,
                        size_bytes: None,
                        log_lines: vec![format!("storage job {} enqueued", storage_job.id)],
                        job_identifier: storage_job.id.clone(),
                    })
                    .await?;
                Ok(())
            }
            ResultStatus::Failure => self.process_failure(&device, result).await,
        }
    }

    async fn process_failure(
        &self,
        device: &netvault_domain::entities::Device,
        result: &DeviceResultEntry,
    ) -> VaultResult<()> {
        let kind = result.error_kind.as_deref().unwrap_or("plugin_error");
        let detail = result.error_detail.clone().unwrap_or_default();
        let transient = CollectError::from_kind(kind, detail.clone()).is_transient();

        if transient && result.attempt < result.max_attempts {
            // 重建任务重试。attempt递增体现在任务内容里，
            // id不变：上一次尝试已确认，队列的去重窗口已经让位。
            // 重试沿用任务原本被消费的队列；老条目缺队列字段时
            // 退回 分组队列 > 兜底队列 的解析
            let retry_queue = if result.queue.is_empty() {
                device
                    .collection_group
                    .as_deref()
                    .map(netvault_domain::plugins::collection_queue_name)
                    .unwrap_or_else(|| self.default_queue.clone())
            } else {
                result.queue.clone()
            };
            let retry = CollectionJob {
                id: result.job_id.clone(),
                device_id: device.id,
                device_address: device.address.clone(),
                queue: retry_queue,
                credential: device
                    .credential
                    .clone()
                    .unwrap_or(serde_json::Value::Null),
                backup_method: device.backup_method.clone(),
                timeout_seconds: 0,
                enqueued_at: chrono::Utc::now(),
                attempt: result.attempt + 1,
                max_attempts: result.max_attempts,
            };
            let queue = retry.queue.clone();
            self.queue.create_queue(&queue).await?;
            self.queue
                .publish_message(&queue, &Message::collection(retry))
                .await?;
            info!(
                job_id = %result.job_id,
                attempt = result.attempt + 1,
                max = result.max_attempts,
                kind,
                "transient collect failure, job re-enqueued"
            );
            return Ok(());
        }

        self.backup_repo
            .upsert(&BackupUpsert {
                device_id: result.device_id,
                timestamp: result.timestamp,
                status: BackupStatus::CollectFailed,
                backend: device.storage_backend.clone(),
                location: device.storage_location.clone(),
                path: None,
                version_marker: None,
                size_bytes: None,
                log_lines: vec![format!(
                    "collect failed ({kind}) after attempt {}/{}: {detail}",
                    result.attempt, result.max_attempts
                )],
                job_identifier: result.job_id.clone(),
            })
            .await?;
        info!(job_id = %result.job_id, kind, "collect failure recorded as terminal");
        Ok(())
    }

    async fn ack(&self, entry: &StreamEntry) {
        if let Err(e) = self
            .stream
            .ack(&self.config.device_results, &self.config.group, &entry.id)
            .await
        {
            error!(entry_id = %entry.id, "确认结果条目失败: {e}");
        }
    }
}
