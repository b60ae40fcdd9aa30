use std::time::Duration;

use netvault_errors::{VaultError, VaultResult};
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, error};

/// Redis连接管理。内部持有自动重连的多路复用连接，
/// 所有命令经 `execute_command` 统一走错误转换。
pub struct RedisConnectionManager {
    manager: ConnectionManager,
}

impl RedisConnectionManager {
    pub async fn new(url: &str, connection_timeout: Duration) -> VaultResult<Self> {
        let client = Client::open(url)
            .map_err(|e| VaultError::queue_error(format!("Failed to create Redis client: {e}")))?;

        let manager = tokio::time::timeout(connection_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                VaultError::queue_error(format!(
                    "Redis connection timed out after {connection_timeout:?}"
                ))
            })?
            .map_err(|e| VaultError::queue_error(format!("Failed to connect to Redis: {e}")))?;

        let this = Self { manager };
        this.ping().await?;
        debug!("Successfully connected to Redis");
        Ok(this)
    }

    pub async fn execute_command<T: redis::FromRedisValue>(
        &self,
        cmd: &redis::Cmd,
    ) -> VaultResult<T> {
        let mut conn = self.manager.clone();
        cmd.query_async(&mut conn).await.map_err(|e| {
            error!("Redis command failed: {}", e);
            VaultError::queue_error(format!("Redis command failed: {e}"))
        })
    }

    pub async fn invoke_script<T: redis::FromRedisValue>(
        &self,
        invocation: &redis::ScriptInvocation<'_>,
    ) -> VaultResult<T> {
        let mut conn = self.manager.clone();
        invocation.invoke_async(&mut conn).await.map_err(|e| {
            error!("Redis script failed: {}", e);
            VaultError::queue_error(format!("Redis script failed: {e}"))
        })
    }

    pub async fn ping(&self) -> VaultResult<()> {
        let response: String = self.execute_command(&redis::cmd("PING")).await?;
        if response == "PONG" {
            Ok(())
        } else {
            Err(VaultError::queue_error(format!(
                "Unexpected PING response: {response}"
            )))
        }
    }

    pub async fn health_check(&self) -> bool {
        self.ping().await.is_ok()
    }
}
