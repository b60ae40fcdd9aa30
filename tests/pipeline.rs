//! 端到端流水线测试：在进程内队列、结果流与仓储上
//! 跑通 采集任务 → 插件执行 → 结果消费 → 存储归档 的完整链路。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use netvault_config::{CollectorConfig, SchedulerConfig, StorageWorkerConfig, StreamsConfig};
use netvault_dispatcher::{BackupResultConsumer, BackupScheduler, StorageResultConsumer};
use netvault_domain::entities::{BackupStatus, DeviceResultEntry, ResultStatus, StoredBackup};
use netvault_domain::messaging::{MessageQueue, ResultStream};
use netvault_domain::plugins::PluginRegistry;
use netvault_domain::repositories::StoredBackupRepository;
use netvault_errors::CollectError;
use netvault_infrastructure::{
    BackendRegistry, FsBackend, InMemoryDeviceRepository, InMemoryLock, InMemoryQueue,
    InMemoryScheduleRepository, InMemoryStream, InMemoryStoredBackupRepository,
};
use netvault_testing_utils::{DeviceBuilder, FlakyBackend, ScheduleBuilder, ScriptedPlugin};
use netvault_worker::{CollectorWorker, StorageWorker};
use tokio::sync::broadcast;

struct Pipeline {
    queue: Arc<InMemoryQueue>,
    stream: Arc<InMemoryStream>,
    lock: Arc<InMemoryLock>,
    schedule_repo: Arc<InMemoryScheduleRepository>,
    device_repo: Arc<InMemoryDeviceRepository>,
    backup_repo: Arc<InMemoryStoredBackupRepository>,
    scheduler_config: SchedulerConfig,
    streams: StreamsConfig,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Pipeline {
    fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            queue: Arc::new(InMemoryQueue::new()),
            stream: Arc::new(InMemoryStream::new()),
            lock: Arc::new(InMemoryLock::new()),
            schedule_repo: Arc::new(InMemoryScheduleRepository::new()),
            device_repo: Arc::new(InMemoryDeviceRepository::new()),
            backup_repo: Arc::new(InMemoryStoredBackupRepository::new()),
            scheduler_config: SchedulerConfig {
                enabled: true,
                tick_interval_seconds: 1,
                lock_name: "test:scheduler:lock".to_string(),
                lock_ttl_seconds: 5,
                restart_window_minutes: 1,
                max_attempts: 3,
                default_queue: "backup_tasks".to_string(),
            },
            streams: StreamsConfig {
                block_ms: 100,
                read_count: 16,
                ..Default::default()
            },
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    fn scheduler(&self) -> BackupScheduler {
        BackupScheduler::new(
            self.schedule_repo.clone(),
            self.device_repo.clone(),
            self.backup_repo.clone(),
            self.queue.clone(),
            self.lock.clone(),
            self.scheduler_config.clone(),
            "test-scheduler".to_string(),
        )
    }

    fn spawn_collector(&mut self, plugin: Arc<ScriptedPlugin>) {
        let mut registry = PluginRegistry::new();
        registry.register(plugin);
        let worker = CollectorWorker::new(
            self.queue.clone(),
            self.stream.clone(),
            Arc::new(registry),
            CollectorConfig {
                queues: vec!["backup_tasks".to_string()],
                plugin_timeout_seconds: 5,
                poll_interval_ms: 20,
                ..Default::default()
            },
            self.streams.clone(),
            "test-collector".to_string(),
        );
        let rx = self.shutdown_tx.subscribe();
        self.handles.push(tokio::spawn(async move {
            worker.run(rx).await.expect("collector run");
        }));
    }

    fn spawn_storage_worker(&mut self, backends: BackendRegistry, base_path: &str) {
        let worker = StorageWorker::new(
            self.queue.clone(),
            self.stream.clone(),
            Arc::new(backends),
            StorageWorkerConfig {
                backends: vec!["fs".to_string()],
                fs_base_path: base_path.to_string(),
                git_repo_path: base_path.to_string(),
                poll_interval_ms: 20,
            },
            self.streams.clone(),
            "test-storage".to_string(),
        );
        let rx = self.shutdown_tx.subscribe();
        self.handles.push(tokio::spawn(async move {
            worker.run(rx).await.expect("storage worker run");
        }));
    }

    fn spawn_consumers(&mut self) {
        let device_consumer = BackupResultConsumer::new(
            self.stream.clone(),
            self.queue.clone(),
            self.device_repo.clone(),
            self.backup_repo.clone(),
            self.streams.clone(),
            "test-consumer".to_string(),
            self.scheduler_config.default_queue.clone(),
        );
        let rx = self.shutdown_tx.subscribe();
        self.handles.push(tokio::spawn(async move {
            device_consumer.run(rx).await.expect("device consumer run");
        }));

        let storage_consumer = StorageResultConsumer::new(
            self.stream.clone(),
            self.backup_repo.clone(),
            self.streams.clone(),
            "test-consumer".to_string(),
        );
        let rx = self.shutdown_tx.subscribe();
        self.handles.push(tokio::spawn(async move {
            storage_consumer.run(rx).await.expect("storage consumer run");
        }));
    }

    /// 轮询备份记录直到指定设备出现目标状态的记录
    async fn wait_for_status(&self, device_id: i64, status: BackupStatus) -> StoredBackup {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let backups = self
                .backup_repo
                .list_by_device(device_id)
                .await
                .expect("list backups");
            if let Some(backup) = backups.iter().find(|b| b.status == status) {
                return backup.clone();
            }
            if tokio::time::Instant::now() > deadline {
                let states: Vec<_> = backups.iter().map(|b| b.status).collect();
                panic!("等待 {status:?} 超时，现有状态: {states:?}");
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for handle in self.handles {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }
}

fn fs_registry(base_path: &str) -> BackendRegistry {
    let mut backends = BackendRegistry::new();
    backends.register(Arc::new(FsBackend::new(base_path)));
    backends
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_trigger_flows_to_stored() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_string_lossy().into_owned();
    let mut pipeline = Pipeline::new();
    pipeline.device_repo.insert(DeviceBuilder::new(1).build()).await;

    pipeline.spawn_collector(ScriptedPlugin::always_ok("noop", "interface ether1\n"));
    pipeline.spawn_storage_worker(fs_registry(&base), &base);
    pipeline.spawn_consumers();

    let job_id = pipeline.scheduler().trigger_now(1).await.unwrap();
    assert!(job_id.starts_with("manual:1:"));

    let backup = pipeline.wait_for_status(1, BackupStatus::Stored).await;
    assert_eq!(backup.backend, "fs");
    assert_eq!(backup.size_bytes, Some("interface ether1\n".len() as u64));
    assert!(backup.path.is_some());
    let marker = backup.version_marker.expect("version marker");
    assert!(marker.contains("device_1"));
    // 审计链路：采集与存储都留了日志行
    assert!(backup.log_lines.iter().any(|l| l.contains("collected by job")));
    assert!(backup.log_lines.iter().any(|l| l.contains("stored by job")));

    pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_failure_is_retried_until_success() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_string_lossy().into_owned();
    let mut pipeline = Pipeline::new();
    pipeline.device_repo.insert(DeviceBuilder::new(1).build()).await;

    let plugin = ScriptedPlugin::new(
        "noop",
        vec![
            Err(CollectError::Unreachable("no route".into())),
            Ok("config after retry\n".to_string()),
        ],
    );
    pipeline.spawn_collector(plugin.clone());
    pipeline.spawn_storage_worker(fs_registry(&base), &base);
    pipeline.spawn_consumers();

    pipeline.scheduler().trigger_now(1).await.unwrap();

    pipeline.wait_for_status(1, BackupStatus::Stored).await;
    assert_eq!(plugin.call_count(), 2);

    pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn permanent_failure_is_terminal_without_retry() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_string_lossy().into_owned();
    let mut pipeline = Pipeline::new();
    pipeline.device_repo.insert(DeviceBuilder::new(1).build()).await;

    let plugin = ScriptedPlugin::always_err("noop", CollectError::AuthFailed("denied".into()));
    pipeline.spawn_collector(plugin.clone());
    pipeline.spawn_storage_worker(fs_registry(&base), &base);
    pipeline.spawn_consumers();

    pipeline.scheduler().trigger_now(1).await.unwrap();

    let backup = pipeline.wait_for_status(1, BackupStatus::CollectFailed).await;
    assert_eq!(plugin.call_count(), 1);
    assert!(backup.path.is_none());
    assert!(backup
        .log_lines
        .iter()
        .any(|l| l.contains("auth_failed")));

    pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_failures_exhaust_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_string_lossy().into_owned();
    let mut pipeline = Pipeline::new();
    pipeline.scheduler_config.max_attempts = 2;
    pipeline.device_repo.insert(DeviceBuilder::new(1).build()).await;

    let plugin = ScriptedPlugin::always_err("noop", CollectError::Unreachable("down".into()));
    pipeline.spawn_collector(plugin.clone());
    pipeline.spawn_storage_worker(fs_registry(&base), &base);
    pipeline.spawn_consumers();

    pipeline.scheduler().trigger_now(1).await.unwrap();

    let backup = pipeline.wait_for_status(1, BackupStatus::CollectFailed).await;
    assert_eq!(plugin.call_count(), 2);
    assert!(backup
        .log_lines
        .iter()
        .any(|l| l.contains("attempt 2/2")));

    pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn storage_outage_is_redelivered_until_success() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_string_lossy().into_owned();
    let mut pipeline = Pipeline::new();
    pipeline.device_repo.insert(DeviceBuilder::new(1).build()).await;

    // 前两次写入失败，之后恢复
    let mut backends = BackendRegistry::new();
    backends.register(Arc::new(FlakyBackend::new(FsBackend::new(&base), 2)));
    pipeline.spawn_collector(ScriptedPlugin::always_ok("noop", "config\n"));
    pipeline.spawn_storage_worker(backends, &base);
    pipeline.spawn_consumers();

    pipeline.scheduler().trigger_now(1).await.unwrap();

    let backup = pipeline.wait_for_status(1, BackupStatus::Stored).await;
    assert!(backup.version_marker.is_some());

    pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_result_entries_converge_to_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_string_lossy().into_owned();
    let mut pipeline = Pipeline::new();
    pipeline.device_repo.insert(DeviceBuilder::new(1).build()).await;

    pipeline.spawn_storage_worker(fs_registry(&base), &base);
    pipeline.spawn_consumers();

    // 同一条采集结果被投递两次（模拟消费者确认前崩溃）
    let entry = DeviceResultEntry {
        job_id: "sched:1:1:29000000".to_string(),
        device_id: 1,
        queue: "backup_tasks".to_string(),
        status: ResultStatus::Success,
        config_text: Some("duplicated config\n".to_string()),
        error_kind: None,
        error_detail: None,
        duration_ms: 12,
        timestamp: Utc::now(),
        attempt: 1,
        max_attempts: 3,
    };
    let payload = serde_json::to_value(&entry).unwrap();
    let stream_name = pipeline.streams.device_results.clone();
    pipeline.stream.append(&stream_name, &payload).await.unwrap();
    pipeline.stream.append(&stream_name, &payload).await.unwrap();

    pipeline.wait_for_status(1, BackupStatus::Stored).await;
    // 状态机合并后只有一条记录，重复存储写入拿回同一份制品
    let backups = pipeline.backup_repo.list_by_device(1).await.unwrap();
    assert_eq!(backups.len(), 1);

    pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn tick_replay_does_not_duplicate_jobs() {
    let pipeline = Pipeline::new();
    pipeline.device_repo.insert(DeviceBuilder::new(1).build()).await;
    let schedule = ScheduleBuilder::new(7)
        .cadence("0 * * * * *")
        .devices(&[1])
        .build();
    pipeline.schedule_repo.insert(schedule.clone()).await;

    let scheduler = pipeline.scheduler();
    let now = Utc::now();
    let first = scheduler.tick(now).await.unwrap();
    assert_eq!(first, 1);

    // 模拟崩溃重放：触发时间戳回退后重新tick，任务id相同，队列去重
    pipeline.schedule_repo.insert(schedule).await;
    scheduler.tick(now).await.unwrap();

    let size = pipeline.queue.queue_size("backup_tasks").await.unwrap();
    assert_eq!(size, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn collection_group_routes_to_dedicated_queue() {
    let pipeline = Pipeline::new();
    pipeline
        .device_repo
        .insert(DeviceBuilder::new(1).collection_group("dmz").build())
        .await;

    pipeline.scheduler().trigger_now(1).await.unwrap();

    assert_eq!(pipeline.queue.queue_size("collect.dmz").await.unwrap(), 1);
    assert_eq!(pipeline.queue.queue_size("backup_tasks").await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_devices_are_skipped_by_tick() {
    let pipeline = Pipeline::new();
    pipeline
        .device_repo
        .insert(DeviceBuilder::new(1).disabled().build())
        .await;
    pipeline
        .schedule_repo
        .insert(ScheduleBuilder::new(7).cadence("0 * * * * *").devices(&[1]).build())
        .await;

    let enqueued = pipeline.scheduler().tick(Utc::now()).await.unwrap();
    assert_eq!(enqueued, 0);
}
