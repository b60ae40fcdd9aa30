use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use netvault_domain::plugins::BackupPlugin;
use netvault_errors::CollectError;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// 空采集插件。不接触任何设备，返回固定格式的配置文本，
/// 用于联调流水线与演示部署。
pub struct NoopPlugin;

#[async_trait]
impl BackupPlugin for NoopPlugin {
    fn key(&self) -> &str {
        "noop"
    }

    fn description(&self) -> &str {
        "返回占位配置文本，不访问设备"
    }

    async fn run(
        &self,
        address: &str,
        _credential: &serde_json::Value,
    ) -> Result<String, CollectError> {
        Ok(format!("# placeholder config for {address}\n"))
    }
}

/// 外部命令采集插件。
///
/// 启动配置的程序，设备地址作为唯一参数，凭据JSON写入stdin，
/// stdout即为采集到的配置文本。退出码非0按插件错误处理，
/// 程序不存在按设备不可达以外的永久错误处理。
pub struct CommandPlugin {
    key: String,
    program: String,
}

impl CommandPlugin {
    pub fn new(key: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            program: program.into(),
        }
    }
}

#[async_trait]
impl BackupPlugin for CommandPlugin {
    fn key(&self) -> &str {
        &self.key
    }

    fn description(&self) -> &str {
        "执行外部采集程序，stdout作为配置文本"
    }

    async fn run(
        &self,
        address: &str,
        credential: &serde_json::Value,
    ) -> Result<String, CollectError> {
        debug!(program = %self.program, address, "spawning collect command");
        let mut child = Command::new(&self.program)
            .arg(address)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CollectError::Plugin(format!("无法启动采集程序 {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let raw = credential.to_string();
            stdin
                .write_all(raw.as_bytes())
                .await
                .map_err(|e| CollectError::Plugin(format!("写入凭据失败: {e}")))?;
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CollectError::Plugin(format!("等待采集程序失败: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // 约定的退出码区分失败类别
            return Err(match output.status.code() {
                Some(10) => CollectError::Unreachable(stderr.trim().to_string()),
                Some(11) => CollectError::AuthFailed(stderr.trim().to_string()),
                _ => CollectError::Plugin(format!(
                    "采集程序退出码 {:?}: {}",
                    output.status.code(),
                    stderr.trim()
                )),
            });
        }

        String::from_utf8(output.stdout)
            .map_err(|e| CollectError::Plugin(format!("配置文本不是合法UTF-8: {e}")))
    }
}

/// 插件执行的统一超时封装，超时归为瞬时错误
pub async fn run_with_timeout(
    plugin: &dyn BackupPlugin,
    address: &str,
    credential: &serde_json::Value,
    timeout_seconds: u64,
) -> Result<String, CollectError> {
    match tokio::time::timeout(
        Duration::from_secs(timeout_seconds),
        plugin.run(address, credential),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(CollectError::Timeout(timeout_seconds)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn noop_plugin_echoes_address() {
        let plugin = NoopPlugin;
        let text = plugin.run("10.0.0.1", &json!({})).await.unwrap();
        assert!(text.contains("10.0.0.1"));
    }

    #[tokio::test]
    async fn timeout_wrapper_classifies_as_transient() {
        struct SlowPlugin;

        #[async_trait]
        impl BackupPlugin for SlowPlugin {
            fn key(&self) -> &str {
                "slow"
            }
            async fn run(
                &self,
                _address: &str,
                _credential: &serde_json::Value,
            ) -> Result<String, CollectError> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(String::new())
            }
        }

        tokio::time::pause();
        let handle = tokio::spawn(async {
            run_with_timeout(&SlowPlugin, "10.0.0.1", &json!({}), 1).await
        });
        tokio::time::advance(Duration::from_secs(2)).await;
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err, CollectError::Timeout(1));
        assert!(err.is_transient());
    }
}
