use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use netvault_config::{StorageWorkerConfig, StreamsConfig};
use netvault_domain::entities::{ResultStatus, StorageJob, StorageResultEntry};
use netvault_domain::messaging::{MessageQueue, MessageType, ResultStream};
use netvault_domain::storage::storage_queue_name;
use netvault_errors::VaultResult;
use netvault_infrastructure::BackendRegistry;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

/// 瞬时存储失败的重投上限，超过后按永久失败上报
const MAX_TRANSIENT_RETRIES: u32 = 5;

/// 存储worker。
///
/// 每个启用的后端绑定各自的 `storage.{backend}` 队列。
/// 写入以任务id为幂等键，重复投递的任务拿回首次写入的制品。
/// 瞬时失败退回队列重投，永久失败（冲突等）直接写失败结果。
pub struct StorageWorker {
    queue: Arc<dyn MessageQueue>,
    stream: Arc<dyn ResultStream>,
    registry: Arc<BackendRegistry>,
    config: StorageWorkerConfig,
    streams: StreamsConfig,
    worker_id: String,
    transient_failures: Mutex<HashMap<String, u32>>,
}

impl StorageWorker {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        stream: Arc<dyn ResultStream>,
        registry: Arc<BackendRegistry>,
        config: StorageWorkerConfig,
        streams: StreamsConfig,
        worker_id: String,
    ) -> Self {
        Self {
            queue,
            stream,
            registry,
            config,
            streams,
            worker_id,
            transient_failures: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> VaultResult<()> {
        let queues: Vec<String> = self
            .config
            .backends
            .iter()
            .map(|b| storage_queue_name(b))
            .collect();
        for queue in &queues {
            self.queue.create_queue(queue).await?;
        }
        info!(worker = %self.worker_id, queues = ?queues, "storage worker starting");

        let poll = Duration::from_millis(self.config.poll_interval_ms);
        'outer: loop {
            let mut drained = true;
            for queue_name in &queues {
                let messages = self.queue.consume_messages(queue_name, 8).await?;
                if !messages.is_empty() {
                    drained = false;
                }
                for message in messages {
                    let MessageType::StorageJob(job) = message.message_type else {
                        warn!(queue = %queue_name, message_id = %message.id, "非存储消息，丢弃");
                        self.queue.ack_message(queue_name, &message.id).await?;
                        continue;
                    };
                    self.handle_job(queue_name, job).await?;
                }
            }

            if drained {
                tokio::select! {
                    _ = shutdown.recv() => break 'outer,
                    _ = tokio::time::sleep(poll) => {}
                }
            } else if shutdown.try_recv().is_ok() {
                break 'outer;
            }
        }
        info!(worker = %self.worker_id, "storage worker stopped");
        Ok(())
    }

    pub async fn handle_job(&self, queue_name: &str, job: StorageJob) -> VaultResult<()> {
        let started = Instant::now();
        let backend = match self.registry.resolve(&job.backend) {
            Ok(backend) => backend,
            Err(e) => {
                // 路由错了队列或配置缺后端，按永久失败上报
                error!(job_id = %job.id, backend = %job.backend, "无法解析存储后端: {e}");
                self.emit_failure(
                    &job,
                    "unavailable",
                    &format!("后端未注册: {}", job.backend),
                    started,
                )
                .await?;
                self.queue.ack_message(queue_name, &job.id).await?;
                return Ok(());
            }
        };

        let outcome = backend
            .save(
                &job.location,
                job.device_id,
                job.timestamp,
                &job.payload,
                &job.id,
            )
            .await;

        match outcome {
            Ok(artifact) => {
                debug!(job_id = %job.id, path = %artifact.path, "artifact stored");
                self.transient_failures.lock().await.remove(&job.id);
                let entry = StorageResultEntry {
                    job_id: job.id.clone(),
                    source_job_id: job.source_job_id.clone(),
                    device_id: job.device_id,
                    status: ResultStatus::Success,
                    backend: job.backend.clone(),
                    path: Some(artifact.path),
                    version_marker: Some(artifact.version_marker),
                    size_bytes: Some(artifact.size_bytes),
                    error_kind: None,
                    error_detail: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                    timestamp: job.timestamp,
                };
                self.emit(&entry).await?;
                self.queue.ack_message(queue_name, &job.id).await?;
            }
            Err(e) if e.is_transient() => {
                let attempts = {
                    let mut failures = self.transient_failures.lock().await;
                    let count = failures.entry(job.id.clone()).or_insert(0);
                    *count += 1;
                    *count
                };
                if attempts < MAX_TRANSIENT_RETRIES {
                    warn!(
                        job_id = %job.id,
                        attempts,
                        kind = e.kind(),
                        "transient storage failure, job requeued"
                    );
                    self.queue.nack_message(queue_name, &job.id).await?;
                } else {
                    error!(job_id = %job.id, kind = e.kind(), "存储重试耗尽: {e}");
                    self.transient_failures.lock().await.remove(&job.id);
                    self.emit_failure(&job, e.kind(), &e.to_string(), started)
                        .await?;
                    self.queue.ack_message(queue_name, &job.id).await?;
                }
            }
            Err(e) => {
                warn!(job_id = %job.id, kind = e.kind(), "permanent storage failure: {e}");
                self.emit_failure(&job, e.kind(), &e.to_string(), started)
                    .await?;
                self.queue.ack_message(queue_name, &job.id).await?;
            }
        }
        Ok(())
    }

    async fn emit_failure(
        &self,
        job: &StorageJob,
        kind: &str,
        detail: &str,
        started: Instant,
    ) -> VaultResult<()> {
        let entry = StorageResultEntry {
            job_id: job.id.clone(),
            source_job_id: job.source_job_id.clone(),
            device_id: job.device_id,
            status: ResultStatus::Failure,
            backend: job.backend.clone(),
            path: None,
            version_marker: None,
            size_bytes: None,
            error_kind: Some(kind.to_string()),
            error_detail: Some(detail.to_string()),
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: job.timestamp,
        };
        self.emit(&entry).await
    }

    async fn emit(&self, entry: &StorageResultEntry) -> VaultResult<()> {
        let payload = serde_json::to_value(entry)?;
        self.stream
            .append(&self.streams.storage_results, &payload)
            .await?;
        Ok(())
    }
}
