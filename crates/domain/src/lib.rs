pub mod entities;
pub mod locking;
pub mod messaging;
pub mod plugins;
pub mod repositories;
pub mod storage;

pub use entities::*;
pub use locking::DistributedLock;
pub use messaging::{Message, MessageQueue, MessageType, ResultStream, StreamEntry};
pub use plugins::{collection_queue_name, BackupPlugin, PluginRegistry};
pub use repositories::{DeviceRepository, ScheduleRepository, StoredBackupRepository};
pub use storage::{storage_queue_name, ArtifactVersion, StorageBackend, StoredArtifact};
