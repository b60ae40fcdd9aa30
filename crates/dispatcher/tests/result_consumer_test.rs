#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use netvault_config::StreamsConfig;
    use netvault_dispatcher::BackupResultConsumer;
    use netvault_domain::entities::{DeviceResultEntry, ResultStatus};
    use netvault_domain::messaging::{MessageQueue, MessageType, StreamEntry};
    use netvault_domain::repositories::StoredBackupRepository;
    use netvault_infrastructure::{
        InMemoryDeviceRepository, InMemoryQueue, InMemoryStoredBackupRepository, InMemoryStream,
    };
    use netvault_testing_utils::DeviceBuilder;

    struct Harness {
        queue: Arc<InMemoryQueue>,
        device_repo: Arc<InMemoryDeviceRepository>,
        backup_repo: Arc<InMemoryStoredBackupRepository>,
        consumer: BackupResultConsumer,
    }

    impl Harness {
        fn new() -> Self {
            let stream = Arc::new(InMemoryStream::new());
            let queue = Arc::new(InMemoryQueue::new());
            let device_repo = Arc::new(InMemoryDeviceRepository::new());
            let backup_repo = Arc::new(InMemoryStoredBackupRepository::new());
            let consumer = BackupResultConsumer::new(
                stream,
                queue.clone(),
                device_repo.clone(),
                backup_repo.clone(),
                StreamsConfig::default(),
                "test-consumer".to_string(),
                "backup_tasks".to_string(),
            );
            Self {
                queue,
                device_repo,
                backup_repo,
                consumer,
            }
        }
    }

    fn failure_entry(job_id: &str, queue: &str, kind: &str, attempt: u32) -> StreamEntry {
        let result = DeviceResultEntry {
            job_id: job_id.to_string(),
            device_id: 1,
            queue: queue.to_string(),
            status: ResultStatus::Failure,
            config_text: None,
            error_kind: Some(kind.to_string()),
            error_detail: Some("no route to host".to_string()),
            duration_ms: 5,
            timestamp: Utc::now(),
            attempt,
            max_attempts: 3,
        };
        StreamEntry {
            id: format!("0-{attempt}"),
            payload: serde_json::to_value(&result).unwrap(),
        }
    }

    #[tokio::test]
    async fn retry_reuses_the_originating_queue() {
        let harness = Harness::new();
        harness
            .device_repo
            .insert(DeviceBuilder::new(1).build())
            .await;

        // 任务来自计划专属队列，重试必须回到同一队列
        harness
            .consumer
            .handle_entry(&failure_entry("sched:9:1:100", "backup_core", "unreachable", 1))
            .await;

        assert_eq!(harness.queue.queue_size("backup_core").await.unwrap(), 1);
        assert_eq!(harness.queue.queue_size("backup_tasks").await.unwrap(), 0);
        let retries = harness
            .queue
            .consume_messages("backup_core", 10)
            .await
            .unwrap();
        let MessageType::CollectionJob(ref job) = retries[0].message_type else {
            panic!("unexpected message type");
        };
        assert_eq!(job.attempt, 2);
        assert_eq!(job.queue, "backup_core");
    }

    #[tokio::test]
    async fn retry_falls_back_to_group_queue_for_legacy_entries() {
        let harness = Harness::new();
        harness
            .device_repo
            .insert(DeviceBuilder::new(1).collection_group("dmz").build())
            .await;

        // 旧条目没有队列字段：按 分组队列 > 兜底队列 解析
        harness
            .consumer
            .handle_entry(&failure_entry("sched:9:1:101", "", "unreachable", 1))
            .await;

        assert_eq!(harness.queue.queue_size("collect.dmz").await.unwrap(), 1);
        assert_eq!(harness.queue.queue_size("backup_tasks").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn exhausted_attempts_become_terminal_not_retried() {
        let harness = Harness::new();
        harness
            .device_repo
            .insert(DeviceBuilder::new(1).build())
            .await;

        harness
            .consumer
            .handle_entry(&failure_entry("sched:9:1:102", "backup_core", "unreachable", 3))
            .await;

        assert_eq!(harness.queue.queue_size("backup_core").await.unwrap(), 0);
        assert!(harness
            .backup_repo
            .job_identifier_seen("sched:9:1:102")
            .await
            .unwrap());
    }
}
