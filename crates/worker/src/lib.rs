//! worker进程：采集worker池与按后端划分的存储worker。

pub mod collector;
pub mod plugins;
pub mod storage_worker;

pub use collector::CollectorWorker;
pub use plugins::{CommandPlugin, NoopPlugin};
pub use storage_worker::StorageWorker;
