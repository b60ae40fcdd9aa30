pub mod app_config;
pub mod database;
pub mod logging;
pub mod message_queue;
pub mod pipeline;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use message_queue::{MessageQueueConfig, MessageQueueType};
pub use pipeline::{CollectorConfig, SchedulerConfig, StorageWorkerConfig, StreamsConfig};
