use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use netvault_errors::{CollectError, VaultError, VaultResult};

/// 采集分组专属队列名："collect." 前缀加分组名
pub fn collection_queue_name(group: &str) -> String {
    format!("collect.{group}")
}

/// 备份采集插件契约。
///
/// 插件只负责与设备交互并返回配置文本，不做任何存储或持久化。
/// 失败时必须返回 `CollectError` 的某个分类，worker据此决定
/// 该失败是否值得重试。
#[async_trait]
pub trait BackupPlugin: Send + Sync {
    /// 插件注册键，与设备的 backup_method 字段对应
    fn key(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// 对设备执行一次采集，返回完整配置文本。
    /// 超时控制由调用方负责，插件自身不设上限。
    async fn run(
        &self,
        address: &str,
        credential: &serde_json::Value,
    ) -> Result<String, CollectError>;
}

/// 插件注册表。启动时一次性注册，运行期只读。
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn BackupPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn BackupPlugin>) {
        self.plugins.insert(plugin.key().to_string(), plugin);
    }

    /// 按备份方式键解析插件，未注册的键是配置错误
    pub fn resolve(&self, key: &str) -> VaultResult<Arc<dyn BackupPlugin>> {
        self.plugins
            .get(key)
            .cloned()
            .ok_or_else(|| VaultError::UnknownBackupMethod { key: key.to_string() })
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<_> = self.plugins.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
