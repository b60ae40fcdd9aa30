use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use netvault_config::SchedulerConfig;
use netvault_domain::entities::{
    BackupStatus, BackupUpsert, CollectionJob, Device, Schedule,
};
use netvault_domain::locking::DistributedLock;
use netvault_domain::messaging::{Message, MessageQueue};
use netvault_domain::plugins::collection_queue_name;
use netvault_domain::repositories::{
    DeviceRepository, ScheduleRepository, StoredBackupRepository,
};
use netvault_errors::VaultResult;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::cron_utils::CronPlan;

/// 备份调度器。
///
/// 全局单例由分布式锁保证：每个tick先获取（或续约）锁，
/// 拿不到锁的实例保持待机。tick内对每个启用的计划计算
/// 自上次触发以来的全部触发点（含重启期间错过的、在补采
/// 窗口内的触发点），为覆盖的每台设备生成确定性id的采集任务。
pub struct BackupScheduler {
    schedule_repo: Arc<dyn ScheduleRepository>,
    device_repo: Arc<dyn DeviceRepository>,
    backup_repo: Arc<dyn StoredBackupRepository>,
    queue: Arc<dyn MessageQueue>,
    lock: Arc<dyn DistributedLock>,
    config: SchedulerConfig,
    holder_id: String,
}

impl BackupScheduler {
    pub fn new(
        schedule_repo: Arc<dyn ScheduleRepository>,
        device_repo: Arc<dyn DeviceRepository>,
        backup_repo: Arc<dyn StoredBackupRepository>,
        queue: Arc<dyn MessageQueue>,
        lock: Arc<dyn DistributedLock>,
        config: SchedulerConfig,
        holder_id: String,
    ) -> Self {
        Self {
            schedule_repo,
            device_repo,
            backup_repo,
            queue,
            lock,
            config,
            holder_id,
        }
    }

    /// 调度主循环，直到收到关闭信号
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut had_lock = false;
        let interval = Duration::from_secs(self.config.tick_interval_seconds);
        info!(holder = %self.holder_id, "backup scheduler starting");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            match self
                .lock
                .acquire(
                    &self.config.lock_name,
                    &self.holder_id,
                    self.config.lock_ttl_seconds,
                )
                .await
            {
                Ok(true) => {
                    if !had_lock {
                        info!(holder = %self.holder_id, "scheduler lock acquired, now active");
                        had_lock = true;
                    }
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!("调度tick失败: {e}");
                    }
                }
                Ok(false) => {
                    if had_lock {
                        warn!(holder = %self.holder_id, "scheduler lock lost, going standby");
                        had_lock = false;
                    } else {
                        debug!(holder = %self.holder_id, "standby, lock held elsewhere");
                    }
                }
                Err(e) => error!("获取调度器锁失败: {e}"),
            }
        }

        if had_lock {
            if let Err(e) = self
                .lock
                .release(&self.config.lock_name, &self.holder_id)
                .await
            {
                warn!("释放调度器锁失败: {e}");
            }
        }
        info!("backup scheduler stopped");
    }

    /// 单次tick：评估全部启用计划。
    /// 任务id对（计划、设备、触发分钟）确定，tick重放不会造成重复入队。
    pub async fn tick(&self, now: DateTime<Utc>) -> VaultResult<usize> {
        let schedules = self.schedule_repo.list_enabled().await?;
        let mut enqueued = 0;

        for schedule in schedules {
            match self.evaluate_schedule(&schedule, now).await {
                Ok(count) => enqueued += count,
                Err(e) => error!(schedule = %schedule.name, "计划评估失败: {e}"),
            }
        }

        if enqueued > 0 {
            info!("本次tick入队了 {} 个采集任务", enqueued);
        }
        Ok(enqueued)
    }

    async fn evaluate_schedule(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> VaultResult<usize> {
        let plan = CronPlan::new(&schedule.cadence)?;

        // 回看起点：上次触发之后，且不早于补采窗口
        let window_start = now - chrono::Duration::minutes(self.config.restart_window_minutes);
        let after = match schedule.last_run_at {
            Some(last) if last > window_start => last,
            Some(last) => {
                // 窗口之外错过的触发点不再补采，落一条失败记录留痕
                self.record_missed_fires(schedule, &plan, last, window_start)
                    .await?;
                window_start
            }
            None => window_start,
        };
        let fire_times = plan.fire_times_between(after, now);
        if fire_times.is_empty() {
            return Ok(0);
        }

        let devices = self.device_repo.list_by_ids(&schedule.device_ids).await?;
        let mut enqueued = 0;
        let tick = chrono::Duration::seconds(self.config.tick_interval_seconds as i64);

        for fire_time in &fire_times {
            // 超过两个tick周期才到手的触发点按补采记。
            // 补采只影响日志：任务id仍由触发点决定，这样
            // 崩溃后晚到的重放生成相同的id，被队列去重吸收。
            let is_catchup = now - *fire_time > tick * 2;
            for device in &devices {
                if !device.enabled {
                    debug!(device = %device.name, "device disabled, skipping");
                    continue;
                }
                let job_id = CollectionJob::scheduled_id(schedule.id, device.id, *fire_time);
                self.enqueue_collection(device, schedule.queue.as_deref(), job_id)
                    .await?;
                enqueued += 1;
            }
            if is_catchup {
                info!(
                    schedule = %schedule.name,
                    fire_time = %fire_time,
                    "missed fire point recovered within restart window"
                );
            }
        }

        if let Some(latest) = fire_times.last() {
            self.schedule_repo
                .update_last_run(schedule.id, *latest)
                .await?;
        }
        Ok(enqueued)
    }

    /// 停机时间超过补采窗口时，把窗口外错过的触发点记为
    /// collect_failed 的备份记录，而不是静默吞掉。
    async fn record_missed_fires(
        &self,
        schedule: &Schedule,
        plan: &CronPlan,
        last_run: DateTime<Utc>,
        window_start: DateTime<Utc>,
    ) -> VaultResult<()> {
        let missed = plan.fire_times_between(last_run, window_start);
        if missed.is_empty() {
            return Ok(());
        }
        let devices = self.device_repo.list_by_ids(&schedule.device_ids).await?;

        for fire_time in &missed {
            for device in devices.iter().filter(|d| d.enabled) {
                let job_id = CollectionJob::scheduled_id(schedule.id, device.id, *fire_time);
                if self.backup_repo.job_identifier_seen(&job_id).await? {
                    continue;
                }
                self.backup_repo
                    .upsert(&BackupUpsert {
                        device_id: device.id,
                        timestamp: *fire_time,
                        status: BackupStatus::CollectFailed,
                        backend: device.storage_backend.clone(),
                        location: device.storage_location.clone(),
                        path: None,
                        version_marker: None,
                        size_bytes: None,
                        log_lines: vec![format!(
                            "fire point {fire_time} missed: outside {}min restart window",
                            self.config.restart_window_minutes
                        )],
                        job_identifier: job_id,
                    })
                    .await?;
            }
            warn!(
                schedule = %schedule.name,
                fire_time = %fire_time,
                "missed fire point outside restart window, recorded as collect_failed"
            );
        }
        Ok(())
    }

    /// 手动"立即备份"，绕过CRON评估。每次调用是独立事件，
    /// 返回生成的任务id。
    pub async fn trigger_now(&self, device_id: i64) -> VaultResult<String> {
        let device = self
            .device_repo
            .get_by_id(device_id)
            .await?
            .ok_or(netvault_errors::VaultError::DeviceNotFound { id: device_id })?;
        let job_id = CollectionJob::manual_id(device_id);
        self.enqueue_collection(&device, None, job_id.clone())
            .await?;
        info!(device = %device.name, job_id = %job_id, "manual backup triggered");
        Ok(job_id)
    }

    /// 队列选择顺序：设备采集分组 > 计划指定队列 > 全局兜底队列
    fn resolve_queue(&self, device: &Device, schedule_queue: Option<&str>) -> String {
        if let Some(group) = &device.collection_group {
            return collection_queue_name(group);
        }
        if let Some(queue) = schedule_queue {
            return queue.to_string();
        }
        self.config.default_queue.clone()
    }

    async fn enqueue_collection(
        &self,
        device: &Device,
        schedule_queue: Option<&str>,
        job_id: String,
    ) -> VaultResult<()> {
        let queue = self.resolve_queue(device, schedule_queue);
        let job = CollectionJob {
            id: job_id,
            device_id: device.id,
            device_address: device.address.clone(),
            queue: queue.clone(),
            credential: device
                .credential
                .clone()
                .unwrap_or(serde_json::Value::Null),
            backup_method: device.backup_method.clone(),
            timeout_seconds: 0, // worker按自身配置的超时执行
            enqueued_at: Utc::now(),
            attempt: 1,
            max_attempts: self.config.max_attempts,
        };
        self.queue.create_queue(&queue).await?;
        self.queue
            .publish_message(&queue, &Message::collection(job))
            .await?;
        debug!(queue = %queue, device = %device.name, "collection job enqueued");
        Ok(())
    }
}
