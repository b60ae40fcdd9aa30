//! 网络设备配置备份系统的进程装配层。
//!
//! 各子crate提供领域抽象与实现，这里负责按运行模式把
//! 调度器、采集worker、存储worker和结果消费者装配成进程。

pub mod app;
pub mod common;
pub mod shutdown;

pub use app::{AppMode, Application};
pub use shutdown::ShutdownManager;
