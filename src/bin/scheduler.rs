use anyhow::Result;
use netvault::app::AppMode;
use netvault::common::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    run_cli(
        "netvault-scheduler",
        "网络设备配置备份系统 - 调度器服务",
        Some("启动备份调度器，按CRON计划生成采集任务。多实例部署时由分布式锁保证只有一个实例在调度"),
        vec![],
        AppMode::Scheduler,
        "Scheduler",
    )
    .await
}
