use async_trait::async_trait;
use netvault_errors::VaultResult;

/// 分布式锁抽象。调度器以此保证全局单例：
/// 同一时刻至多一个持有者，TTL到期未续约的锁可被其他实例夺取。
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// 尝试获取锁。已被其他持有者持有时返回 false；
    /// 自己已持有时刷新TTL并返回 true。
    async fn acquire(&self, name: &str, holder: &str, ttl_seconds: u64) -> VaultResult<bool>;

    /// 续约。仅当 `holder` 仍是当前持有者时刷新TTL并返回 true，
    /// 锁已丢失（过期被他人夺取）时返回 false。
    async fn refresh(&self, name: &str, holder: &str, ttl_seconds: u64) -> VaultResult<bool>;

    /// 释放锁。仅当 `holder` 是当前持有者时生效，否则静默忽略。
    async fn release(&self, name: &str, holder: &str) -> VaultResult<()>;

    /// 查询当前持有者
    async fn holder(&self, name: &str) -> VaultResult<Option<String>>;
}
