use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use netvault_domain::locking::DistributedLock;
use netvault_errors::VaultResult;
use tokio::sync::Mutex;

struct LockState {
    holder: String,
    expires_at: Instant,
}

/// 进程内TTL锁。单进程部署时调度器单例的兜底实现，
/// 测试里用来模拟锁被夺取、过期等场景。
#[derive(Default)]
pub struct InMemoryLock {
    locks: Mutex<HashMap<String, LockState>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn acquire(&self, name: &str, holder: &str, ttl_seconds: u64) -> VaultResult<bool> {
        let mut locks = self.locks.lock().await;
        let now = Instant::now();
        match locks.get_mut(name) {
            Some(state) if state.expires_at > now && state.holder != holder => Ok(false),
            _ => {
                locks.insert(
                    name.to_string(),
                    LockState {
                        holder: holder.to_string(),
                        expires_at: now + Duration::from_secs(ttl_seconds),
                    },
                );
                Ok(true)
            }
        }
    }

    async fn refresh(&self, name: &str, holder: &str, ttl_seconds: u64) -> VaultResult<bool> {
        let mut locks = self.locks.lock().await;
        let now = Instant::now();
        match locks.get_mut(name) {
            Some(state) if state.holder == holder && state.expires_at > now => {
                state.expires_at = now + Duration::from_secs(ttl_seconds);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, name: &str, holder: &str) -> VaultResult<()> {
        let mut locks = self.locks.lock().await;
        if locks.get(name).is_some_and(|s| s.holder == holder) {
            locks.remove(name);
        }
        Ok(())
    }

    async fn holder(&self, name: &str) -> VaultResult<Option<String>> {
        let locks = self.locks.lock().await;
        Ok(locks
            .get(name)
            .filter(|s| s.expires_at > Instant::now())
            .map(|s| s.holder.clone()))
    }
}
