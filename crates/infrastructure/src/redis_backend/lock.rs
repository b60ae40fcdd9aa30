use std::sync::Arc;

use async_trait::async_trait;
use netvault_domain::locking::DistributedLock;
use netvault_errors::VaultResult;
use redis::Script;
use tracing::debug;

use super::connection_manager::RedisConnectionManager;

/// 基于Redis的分布式锁。
///
/// 获取走 SET NX EX，续约与释放走持有者校验的Lua脚本，
/// 避免误夺他人的锁或误删已被夺取的锁。
pub struct RedisLock {
    connection: Arc<RedisConnectionManager>,
    refresh_script: Script,
    release_script: Script,
}

impl RedisLock {
    pub fn new(connection: Arc<RedisConnectionManager>) -> Self {
        Self {
            connection,
            refresh_script: Script::new(
                r"if redis.call('GET', KEYS[1]) == ARGV[1] then
                    return redis.call('EXPIRE', KEYS[1], ARGV[2])
                  else
                    return 0
                  end",
            ),
            release_script: Script::new(
                r"if redis.call('GET', KEYS[1]) == ARGV[1] then
                    return redis.call('DEL', KEYS[1])
                  else
                    return 0
                  end",
            ),
        }
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn acquire(&self, name: &str, holder: &str, ttl_seconds: u64) -> VaultResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(name)
            .arg(holder)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds);
        let reply: Option<String> = self.connection.execute_command(&cmd).await?;
        if reply.is_some() {
            debug!(lock = name, holder, "lock acquired");
            return Ok(true);
        }
        // SET NX失败但持有者是自己：当作重入，顺带续约
        self.refresh(name, holder, ttl_seconds).await
    }

    async fn refresh(&self, name: &str, holder: &str, ttl_seconds: u64) -> VaultResult<bool> {
        let mut invocation = self.refresh_script.prepare_invoke();
        invocation.key(name).arg(holder).arg(ttl_seconds);
        let refreshed: i64 = self.connection.invoke_script(&invocation).await?;
        Ok(refreshed == 1)
    }

    async fn release(&self, name: &str, holder: &str) -> VaultResult<()> {
        let mut invocation = self.release_script.prepare_invoke();
        invocation.key(name).arg(holder);
        let released: i64 = self.connection.invoke_script(&invocation).await?;
        if released == 1 {
            debug!(lock = name, holder, "lock released");
        }
        Ok(())
    }

    async fn holder(&self, name: &str) -> VaultResult<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(name);
        self.connection.execute_command(&cmd).await
    }
}
