use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use netvault_config::{CollectorConfig, StreamsConfig};
use netvault_domain::entities::{CollectionJob, DeviceResultEntry, ResultStatus};
use netvault_domain::messaging::{MessageQueue, MessageType, ResultStream};
use netvault_domain::plugins::PluginRegistry;
use netvault_errors::{CollectError, VaultResult};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::plugins::run_with_timeout;

/// 采集worker。
///
/// 订阅配置的采集队列，按并发上限执行插件，把结果
/// （成功带配置文本，失败带错误分类）追加到设备结果流。
/// worker自身不做重试也不写备份记录，这两件事都归消费者。
pub struct CollectorWorker {
    queue: Arc<dyn MessageQueue>,
    stream: Arc<dyn ResultStream>,
    registry: Arc<PluginRegistry>,
    config: CollectorConfig,
    streams: StreamsConfig,
    worker_id: String,
}

impl CollectorWorker {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        stream: Arc<dyn ResultStream>,
        registry: Arc<PluginRegistry>,
        config: CollectorConfig,
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
        }
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> VaultResult<()> {
        for queue in &self.config.queues {
            self.queue.create_queue(queue).await?;
        }
        info!(
            worker = %self.worker_id,
            queues = ?self.config.queues,
            "collector worker starting"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_jobs));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        'outer: loop {
            let mut drained = true;
            for queue_name in &self.config.queues {
                let free = semaphore.available_permits();
                if free == 0 {
                    drained = false;
                    break;
                }
                let messages = self.queue.consume_messages(queue_name, free).await?;
                if !messages.is_empty() {
                    drained = false;
                }
                for message in messages {
                    let message_id = message.id.clone();
                    let MessageType::CollectionJob(job) = message.message_type else {
                        warn!(queue = %queue_name, message_id = %message_id, "非采集消息，丢弃");
                        self.queue.ack_message(queue_name, &message_id).await?;
                        continue;
                    };
                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|e| netvault_errors::VaultError::Internal(e.to_string()))?;
                    let worker = self.job_context(queue_name.clone());
                    tasks.spawn(async move {
                        worker.execute(&message_id, job).await;
                        drop(permit);
                    });
                }
            }

            // 回收已完成的任务句柄
            while tasks.try_join_next().is_some() {}

            // 队列空转或并发占满时都要让出，等新消息或在途任务完成
            let saturated = semaphore.available_permits() == 0;
            if drained || saturated {
                tokio::select! {
                    _ = shutdown.recv() => break 'outer,
                    _ = tokio::time::sleep(poll) => {}
                }
            } else if shutdown.try_recv().is_ok() {
                break 'outer;
            }
        }

        // 等在途任务收尾
        while tasks.join_next().await.is_some() {}
        info!(worker = %self.worker_id, "collector worker stopped");
        Ok(())
    }

    fn job_context(&self, queue_name: String) -> JobContext {
        JobContext {
            queue: self.queue.clone(),
            stream: self.stream.clone(),
            registry: self.registry.clone(),
            queue_name,
            results_stream: self.streams.device_results.clone(),
            default_timeout: self.config.plugin_timeout_seconds,
        }
    }
}

/// 单个采集任务的执行上下文（跨spawn移动）
struct JobContext {
    queue: Arc<dyn MessageQueue>,
    stream: Arc<dyn ResultStream>,
    registry: Arc<PluginRegistry>,
    queue_name: String,
    results_stream: String,
    default_timeout: u64,
}

impl JobContext {
    async fn execute(&self, message_id: &str, job: CollectionJob) {
        let started = Instant::now();
        let timeout = if job.timeout_seconds > 0 {
            job.timeout_seconds
        } else {
            self.default_timeout
        };

        let outcome = match self.registry.resolve(&job.backup_method) {
            Ok(plugin) => {
                debug!(job_id = %job.id, plugin = plugin.key(), "collect starting");
                run_with_timeout(plugin.as_ref(), &job.device_address, &job.credential, timeout)
                    .await
            }
            // 未注册的备份方式是配置错误，按永久失败上报
            Err(_) => Err(CollectError::Plugin(format!(
                "未注册的备份方式: {}",
                job.backup_method
            ))),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let entry = match outcome {
            Ok(config_text) => DeviceResultEntry {
                job_id: job.id.clone(),
                device_id: job.device_id,
                queue: self.queue_name.clone(),
                status: ResultStatus::Success,
                config_text: Some(config_text),
                error_kind: None,
                error_detail: None,
                duration_ms,
                timestamp: Utc::now(),
                attempt: job.attempt,
                max_attempts: job.max_attempts,
            },
            Err(e) => {
                warn!(job_id = %job.id, kind = e.kind(), "collect failed: {e}");
                DeviceResultEntry {
                    job_id: job.id.clone(),
                    device_id: job.device_id,
                    queue: self.queue_name.clone(),
                    status: ResultStatus::Failure,
                    config_text: None,
                    error_kind: Some(e.kind().to_string()),
                    error_detail: Some(e.to_string()),
                    duration_ms,
                    timestamp: Utc::now(),
                    attempt: job.attempt,
                    max_attempts: job.max_attempts,
                }
            }
        };

        // 先落结果流，再确认消息：中间崩溃时消息被重投，
        // 后果只是同一任务id重复出一条结果，消费端会吸收
        match serde_json::to_value(&entry) {
            Ok(payload) => {
                if let Err(e) = self.stream.append(&self.results_stream, &payload).await {
                    error!(job_id = %job.id, "写结果流失败，任务将被重投: {e}");
                    return;
                }
            }
            Err(e) => {
                error!(job_id = %job.id, "结果序列化失败: {e}");
                return;
            }
        }
        if let Err(e) = self.queue.ack_message(&self.queue_name, message_id).await {
            error!(job_id = %job.id, "确认采集消息失败: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netvault_domain::entities::CollectionJob;
    use netvault_domain::messaging::Message;
    use netvault_domain::plugins::BackupPlugin;
    use netvault_infrastructure::{InMemoryQueue, InMemoryStream};
    use serde_json::json;

    struct NapPlugin;

    #[async_trait::async_trait]
    impl BackupPlugin for NapPlugin {
        fn key(&self) -> &str {
            "nap"
        }

        async fn run(
            &self,
            address: &str,
            _credential: &serde_json::Value,
        ) -> Result<String, CollectError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(format!("config of {address}"))
        }
    }

    fn job(id: &str) -> Message {
        Message::collection(CollectionJob {
            id: id.to_string(),
            device_id: 1,
            device_address: "10.0.0.1".into(),
            queue: "backup_tasks".into(),
            credential: json!({}),
            backup_method: "nap".into(),
            timeout_seconds: 5,
            enqueued_at: chrono::Utc::now(),
            attempt: 1,
            max_attempts: 3,
        })
    }

    // 单线程运行时、并发占满的场景：worker必须让出，
    // 在途任务才有机会完成并释放permit
    #[tokio::test]
    async fn saturated_worker_yields_to_in_flight_jobs() {
        let queue = Arc::new(InMemoryQueue::new());
        let stream = Arc::new(InMemoryStream::new());
        let streams = StreamsConfig::default();
        let mut registry = netvault_domain::plugins::PluginRegistry::new();
        registry.register(Arc::new(NapPlugin));
        for id in ["a", "b", "c"] {
            queue.publish_message("backup_tasks", &job(id)).await.unwrap();
        }

        let worker = Arc::new(CollectorWorker::new(
            queue.clone(),
            stream.clone(),
            Arc::new(registry),
            CollectorConfig {
                queues: vec!["backup_tasks".to_string()],
                plugin_timeout_seconds: 5,
                poll_interval_ms: 10,
                max_concurrent_jobs: 1,
                ..Default::default()
            },
            streams.clone(),
            "w1".to_string(),
        ));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run(shutdown_rx).await })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let done = stream.stream_len(&streams.device_results).await.unwrap();
            if done == 3 {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "collector starved in-flight jobs, only {done} results"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
