//! 基础设施层：消息队列、结果流、分布式锁、存储后端与仓储的具体实现。
//!
//! 进程内实现（`in_memory_*`）用于单进程部署与测试，
//! Redis实现用于多进程部署。两者实现同一组domain抽象，
//! 上层组件不感知差异。

pub mod in_memory_lock;
pub mod in_memory_queue;
pub mod in_memory_stream;
pub mod redis_backend;
pub mod repositories;
pub mod storage;

pub use in_memory_lock::InMemoryLock;
pub use in_memory_queue::InMemoryQueue;
pub use in_memory_stream::InMemoryStream;
pub use redis_backend::{RedisConnectionManager, RedisLock, RedisQueue, RedisResultStream};
pub use repositories::memory::{
    InMemoryDeviceRepository, InMemoryScheduleRepository, InMemoryStoredBackupRepository,
};
pub use repositories::sqlite::{
    SqliteDeviceRepository, SqliteScheduleRepository, SqliteStoredBackupRepository,
};
pub use storage::fs::FsBackend;
pub use storage::git::GitBackend;
pub use storage::BackendRegistry;
