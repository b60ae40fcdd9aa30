use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use netvault_domain::messaging::{ResultStream, StreamEntry};
use netvault_errors::{VaultError, VaultResult};
use redis::streams::{StreamAutoClaimReply, StreamReadReply};
use tracing::warn;

use super::connection_manager::RedisConnectionManager;

/// 结果流的Redis实现，一条逻辑流对应一条Redis Stream。
///
/// 阻塞读不走 XREADGROUP BLOCK（会卡住多路复用连接），
/// 改为客户端按小间隔轮询到截止时间。
pub struct RedisResultStream {
    connection: Arc<RedisConnectionManager>,
    key_prefix: String,
}

impl RedisResultStream {
    pub fn new(connection: Arc<RedisConnectionManager>, key_prefix: impl Into<String>) -> Self {
        Self {
            connection,
            key_prefix: key_prefix.into(),
        }
    }

    fn stream_key(&self, stream: &str) -> String {
        format!("{}:stream:{}", self.key_prefix, stream)
    }

    async fn read_once(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> VaultResult<Vec<StreamEntry>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(self.stream_key(stream))
            .arg(">");

        let reply: StreamReadReply = self.connection.execute_command(&cmd).await?;
        let mut entries = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                match id.get::<String>("payload") {
                    Some(raw) => match serde_json::from_str(&raw) {
                        Ok(payload) => entries.push(StreamEntry { id: id.id, payload }),
                        Err(e) => {
                            warn!(stream, entry_id = %id.id, "undecodable stream payload: {e}")
                        }
                    },
                    None => warn!(stream, entry_id = %id.id, "stream entry without payload"),
                }
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl ResultStream for RedisResultStream {
    async fn append(&self, stream: &str, payload: &serde_json::Value) -> VaultResult<String> {
        let raw = serde_json::to_string(payload)?;
        let mut cmd = redis::cmd("XADD");
        cmd.arg(self.stream_key(stream))
            .arg("*")
            .arg("payload")
            .arg(raw);
        self.connection
            .execute_command(&cmd)
            .await
            .map_err(|e| VaultError::stream_error(e.to_string()))
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> VaultResult<()> {
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE")
            .arg(self.stream_key(stream))
            .arg(group)
            .arg("0")
            .arg("MKSTREAM");
        match self.connection.execute_command::<String>(&cmd).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(VaultError::stream_error(e.to_string())),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> VaultResult<Vec<StreamEntry>> {
        let deadline = Instant::now() + Duration::from_millis(block_ms);
        loop {
            let entries = self.read_once(stream, group, consumer, count).await?;
            if !entries.is_empty() || Instant::now() >= deadline {
                return Ok(entries);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> VaultResult<()> {
        let mut cmd = redis::cmd("XACK");
        cmd.arg(self.stream_key(stream)).arg(group).arg(entry_id);
        let _: i64 = self
            .connection
            .execute_command(&cmd)
            .await
            .map_err(|e| VaultError::stream_error(e.to_string()))?;
        Ok(())
    }

    async fn claim_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> VaultResult<Vec<StreamEntry>> {
        let mut cmd = redis::cmd("XAUTOCLAIM");
        cmd.arg(self.stream_key(stream))
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count);

        let reply: StreamAutoClaimReply = self
            .connection
            .execute_command(&cmd)
            .await
            .map_err(|e| VaultError::stream_error(e.to_string()))?;

        let mut entries = Vec::new();
        for id in reply.claimed {
            match id.get::<String>("payload") {
                Some(raw) => match serde_json::from_str(&raw) {
                    Ok(payload) => entries.push(StreamEntry { id: id.id, payload }),
                    Err(e) => warn!(stream, entry_id = %id.id, "undecodable claimed payload: {e}"),
                },
                None => warn!(stream, entry_id = %id.id, "claimed entry without payload"),
            }
        }
        Ok(entries)
    }

    async fn stream_len(&self, stream: &str) -> VaultResult<usize> {
        let mut cmd = redis::cmd("XLEN");
        cmd.arg(self.stream_key(stream));
        self.connection
            .execute_command(&cmd)
            .await
            .map_err(|e| VaultError::stream_error(e.to_string()))
    }
}
