use std::sync::Arc;

use async_trait::async_trait;
use netvault_domain::messaging::{Message, MessageQueue};
use netvault_errors::{VaultError, VaultResult};
use redis::streams::{StreamAutoClaimReply, StreamId, StreamReadReply};
use tracing::{debug, info, warn};

use super::connection_manager::RedisConnectionManager;

const CONSUMER_GROUP: &str = "workers";
/// 其它消费者滞留超过此时长的未确认消息可被接管
const DEFAULT_CLAIM_IDLE_MS: u64 = 60_000;

/// 基于Redis Stream的任务队列。
///
/// 每个队列一条Stream，固定消费组 "workers"。发布前以
/// SADD去重集合过滤重复的消息id，确认时从集合移除，
/// 由此获得"未消费完成前重复发布只保留一份"的语义。
/// 消费前先XAUTOCLAIM接管崩溃消费者滞留的消息，
/// 保证取走未确认的任务在进程死亡后仍会被重新投递。
pub struct RedisQueue {
    connection: Arc<RedisConnectionManager>,
    key_prefix: String,
    consumer: String,
    claim_min_idle_ms: u64,
}

impl RedisQueue {
    pub fn new(
        connection: Arc<RedisConnectionManager>,
        key_prefix: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            key_prefix: key_prefix.into(),
            consumer: consumer.into(),
            claim_min_idle_ms: DEFAULT_CLAIM_IDLE_MS,
        }
    }

    /// 调整接管滞留消息的空闲阈值（测试里缩短等待）
    pub fn with_claim_min_idle_ms(mut self, min_idle_ms: u64) -> Self {
        self.claim_min_idle_ms = min_idle_ms;
        self
    }

    fn stream_key(&self, queue: &str) -> String {
        format!("{}:queue:{}", self.key_prefix, queue)
    }

    fn dedup_key(&self, queue: &str) -> String {
        format!("{}:queue:{}:ids", self.key_prefix, queue)
    }

    fn index_key(&self, queue: &str) -> String {
        format!("{}:queue:{}:index", self.key_prefix, queue)
    }

    async fn ensure_group(&self, queue: &str) -> VaultResult<()> {
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE")
            .arg(self.stream_key(queue))
            .arg(CONSUMER_GROUP)
            .arg("0")
            .arg("MKSTREAM");
        match self.connection.execute_command::<String>(&cmd).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// 消息id到Stream条目id的映射（确认时反查XACK目标）
    async fn entry_id_for(&self, queue: &str, message_id: &str) -> VaultResult<Option<String>> {
        let mut cmd = redis::cmd("HGET");
        cmd.arg(self.index_key(queue)).arg(message_id);
        self.connection.execute_command(&cmd).await
    }

    /// 解码一条Stream条目。无法解析的条目直接确认丢弃。
    async fn decode_entry(&self, queue: &str, entry: &StreamId) -> VaultResult<Option<Message>> {
        let Some(raw) = entry.get::<String>("message") else {
            warn!(queue, entry_id = %entry.id, "stream entry without message field");
            return Ok(None);
        };
        match Message::from_json(&raw) {
            Ok(message) => Ok(Some(message)),
            Err(e) => {
                warn!(queue, entry_id = %entry.id, "undecodable message dropped: {e}");
                let mut ack = redis::cmd("XACK");
                ack.arg(self.stream_key(queue))
                    .arg(CONSUMER_GROUP)
                    .arg(&entry.id);
                let _: i64 = self.connection.execute_command(&ack).await?;
                Ok(None)
            }
        }
    }

    /// 接管组内滞留过久的未确认消息（原消费者已崩溃）
    async fn claim_stale(&self, queue: &str, count: usize) -> VaultResult<Vec<Message>> {
        let mut cmd = redis::cmd("XAUTOCLAIM");
        cmd.arg(self.stream_key(queue))
            .arg(CONSUMER_GROUP)
            .arg(&self.consumer)
            .arg(self.claim_min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count);

        let reply: StreamAutoClaimReply = match self.connection.execute_command(&cmd).await {
            Ok(reply) => reply,
            Err(e) if e.to_string().contains("NOGROUP") => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut messages = Vec::new();
        for entry in &reply.claimed {
            if let Some(message) = self.decode_entry(queue, entry).await? {
                messages.push(message);
            }
        }
        if !messages.is_empty() {
            info!(
                queue,
                consumer = %self.consumer,
                claimed = messages.len(),
                "reclaimed stale pending messages"
            );
        }
        Ok(messages)
    }

    async fn forget_message(&self, queue: &str, message_id: &str) -> VaultResult<()> {
        let mut cmd = redis::cmd("HDEL");
        cmd.arg(self.index_key(queue)).arg(message_id);
        let _: i64 = self.connection.execute_command(&cmd).await?;
        let mut cmd = redis::cmd("SREM");
        cmd.arg(self.dedup_key(queue)).arg(message_id);
        let _: i64 = self.connection.execute_command(&cmd).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for RedisQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> VaultResult<()> {
        let mut cmd = redis::cmd("SADD");
        cmd.arg(self.dedup_key(queue)).arg(&message.id);
        let added: i64 = self.connection.execute_command(&cmd).await?;
        if added == 0 {
            debug!(queue, message_id = %message.id, "duplicate message suppressed");
            return Ok(());
        }

        let raw = message.to_json()?;
        let mut cmd = redis::cmd("XADD");
        cmd.arg(self.stream_key(queue))
            .arg("*")
            .arg("message")
            .arg(raw);
        let entry_id: String = self.connection.execute_command(&cmd).await?;

        let mut cmd = redis::cmd("HSET");
        cmd.arg(self.index_key(queue))
            .arg(&message.id)
            .arg(&entry_id);
        let _: i64 = self.connection.execute_command(&cmd).await?;
        Ok(())
    }

    async fn consume_messages(&self, queue: &str, count: usize) -> VaultResult<Vec<Message>> {
        // 先接管崩溃消费者滞留的消息，再拉取新消息
        let mut messages = self.claim_stale(queue, count).await?;
        if messages.len() >= count {
            return Ok(messages);
        }

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(CONSUMER_GROUP)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(count - messages.len())
            .arg("STREAMS")
            .arg(self.stream_key(queue))
            .arg(">");

        let reply: StreamReadReply = match self.connection.execute_command(&cmd).await {
            Ok(reply) => reply,
            // 组尚未建立时按空队列处理，下一次publish/create会建组
            Err(e) if e.to_string().contains("NOGROUP") => return Ok(messages),
            Err(e) => return Err(e),
        };

        for key in reply.keys {
            for entry in key.ids {
                if let Some(message) = self.decode_entry(queue, &entry).await? {
                    messages.push(message);
                }
            }
        }
        Ok(messages)
    }

    async fn ack_message(&self, queue: &str, message_id: &str) -> VaultResult<()> {
        let Some(entry_id) = self.entry_id_for(queue, message_id).await? else {
            warn!(queue, message_id, "ack for unknown message");
            return Ok(());
        };
        let mut cmd = redis::cmd("XACK");
        cmd.arg(self.stream_key(queue))
            .arg(CONSUMER_GROUP)
            .arg(&entry_id);
        let _: i64 = self.connection.execute_command(&cmd).await?;
        self.forget_message(queue, message_id).await
    }

    async fn nack_message(&self, queue: &str, message_id: &str) -> VaultResult<()> {
        let Some(entry_id) = self.entry_id_for(queue, message_id).await? else {
            warn!(queue, message_id, "nack for unknown message");
            return Ok(());
        };

        // 取回原消息体，重新入队后确认旧条目
        let mut cmd = redis::cmd("XRANGE");
        cmd.arg(self.stream_key(queue)).arg(&entry_id).arg(&entry_id);
        let range: Vec<(String, Vec<(String, String)>)> =
            self.connection.execute_command(&cmd).await?;
        self.requeue_raw(queue, message_id, &entry_id, range).await
    }

    async fn create_queue(&self, queue: &str) -> VaultResult<()> {
        self.ensure_group(queue).await
    }

    async fn queue_size(&self, queue: &str) -> VaultResult<usize> {
        let mut cmd = redis::cmd("XLEN");
        cmd.arg(self.stream_key(queue));
        let len: usize = self.connection.execute_command(&cmd).await?;
        Ok(len)
    }

    async fn purge_queue(&self, queue: &str) -> VaultResult<()> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.stream_key(queue))
            .arg(self.dedup_key(queue))
            .arg(self.index_key(queue));
        let _: i64 = self.connection.execute_command(&cmd).await?;
        self.ensure_group(queue).await
    }
}

impl RedisQueue {
    async fn requeue_raw(
        &self,
        queue: &str,
        message_id: &str,
        old_entry_id: &str,
        range: Vec<(String, Vec<(String, String)>)>,
    ) -> VaultResult<()> {
        let raw = range
            .into_iter()
            .next()
            .and_then(|(_, fields)| fields.into_iter().find(|(k, _)| k == "message"))
            .map(|(_, v)| v)
            .ok_or_else(|| {
                VaultError::queue_error(format!("Message body not found for {message_id}"))
            })?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(self.stream_key(queue)).arg("*").arg("message").arg(raw);
        let new_entry_id: String = self.connection.execute_command(&cmd).await?;

        let mut cmd = redis::cmd("HSET");
        cmd.arg(self.index_key(queue)).arg(message_id).arg(&new_entry_id);
        let _: i64 = self.connection.execute_command(&cmd).await?;

        let mut cmd = redis::cmd("XACK");
        cmd.arg(self.stream_key(queue))
            .arg(CONSUMER_GROUP)
            .arg(old_entry_id);
        let _: i64 = self.connection.execute_command(&cmd).await?;
        Ok(())
    }
}
