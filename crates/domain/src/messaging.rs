use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netvault_errors::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};

use crate::entities::{CollectionJob, StorageJob};

/// 队列消息的载荷类型
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MessageType {
    #[serde(rename = "collection_job")]
    CollectionJob(CollectionJob),
    #[serde(rename = "storage_job")]
    StorageJob(StorageJob),
}

/// 队列消息。message id 由任务id派生，
/// 队列按id去重即可获得"重复投递合并为一次"的语义。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(flatten)]
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

impl Message {
    /// 采集消息id带上尝试序号：tick重放（attempt相同）仍被去重，
    /// 而重试（attempt+1）不会撞上尚未确认的前一次尝试。
    pub fn collection(job: CollectionJob) -> Self {
        Self {
            id: format!("{}#{}", job.id, job.attempt),
            message_type: MessageType::CollectionJob(job),
            timestamp: Utc::now(),
            retry_count: 0,
        }
    }

    pub fn storage(job: StorageJob) -> Self {
        Self {
            id: job.id.clone(),
            message_type: MessageType::StorageJob(job),
            timestamp: Utc::now(),
            retry_count: 0,
        }
    }

    pub fn to_json(&self) -> VaultResult<String> {
        serde_json::to_string(self).map_err(VaultError::from)
    }

    pub fn from_json(raw: &str) -> VaultResult<Self> {
        serde_json::from_str(raw).map_err(VaultError::from)
    }
}

/// 任务队列抽象。实现方须保证：
/// - 同一队列内按入队顺序投递
/// - 相同id的消息在未被消费前重复发布只保留一份
/// - ack 之前消费者崩溃，消息可被重新投递
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish_message(&self, queue: &str, message: &Message) -> VaultResult<()>;

    /// 拉取至多 `count` 条消息，不阻塞。取走的消息在 ack 前处于未确认状态。
    async fn consume_messages(&self, queue: &str, count: usize) -> VaultResult<Vec<Message>>;

    async fn ack_message(&self, queue: &str, message_id: &str) -> VaultResult<()>;

    /// 否定确认：消息退回队列，等待重新投递
    async fn nack_message(&self, queue: &str, message_id: &str) -> VaultResult<()>;

    async fn create_queue(&self, queue: &str) -> VaultResult<()>;

    async fn queue_size(&self, queue: &str) -> VaultResult<usize>;

    async fn purge_queue(&self, queue: &str) -> VaultResult<()>;
}

/// 结果流中的一条记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEntry {
    /// 流内单调递增的条目id，由流的实现分配
    pub id: String,
    pub payload: serde_json::Value,
}

/// 只追加的结果流抽象，带消费组游标。
///
/// 消费组内的游标只在 ack 后推进；读到但未 ack 的条目
/// 在消费者重启后会被重新投递，消费端必须自行幂等。
#[async_trait]
pub trait ResultStream: Send + Sync {
    /// 追加一条记录，返回分配的条目id
    async fn append(&self, stream: &str, payload: &serde_json::Value) -> VaultResult<String>;

    /// 幂等地创建消费组（已存在时不报错）
    async fn ensure_group(&self, stream: &str, group: &str) -> VaultResult<()>;

    /// 以消费组身份读取新条目，至多 `count` 条，最长阻塞 `block_ms` 毫秒
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> VaultResult<Vec<StreamEntry>>;

    /// 确认条目已处理完毕，推进消费组游标
    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> VaultResult<()>;

    /// 认领本消费组内滞留超过 `min_idle_ms` 的未确认条目（崩溃恢复）
    async fn claim_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> VaultResult<Vec<StreamEntry>>;

    async fn stream_len(&self, stream: &str) -> VaultResult<usize>;
}
