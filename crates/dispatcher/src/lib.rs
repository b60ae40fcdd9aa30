//! 调度与结果消费：锁保护的调度器单例、采集结果消费者、存储结果消费者。

pub mod cron_utils;
pub mod result_consumer;
pub mod scheduler;
pub mod storage_consumer;

pub use cron_utils::CronPlan;
pub use result_consumer::BackupResultConsumer;
pub use scheduler::BackupScheduler;
pub use storage_consumer::StorageResultConsumer;
