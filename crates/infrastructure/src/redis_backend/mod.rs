//! 基于Redis的队列、结果流与分布式锁实现。
//!
//! 队列用Stream加消费组承载（天然具备ack与重投递语义），
//! 结果流直接映射到Redis Stream，锁用 SET NX EX 加持有者校验脚本。

pub mod connection_manager;
pub mod lock;
pub mod queue;
pub mod stream;

pub use connection_manager::RedisConnectionManager;
pub use lock::RedisLock;
pub use queue::RedisQueue;
pub use stream::RedisResultStream;
