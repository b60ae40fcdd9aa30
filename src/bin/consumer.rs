use anyhow::Result;
use clap::Arg;
use netvault::app::AppMode;
use netvault::common::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    let custom_args = vec![Arg::new("worker-id")
        .short('w')
        .long("worker-id")
        .value_name("ID")
        .help("消费者唯一标识符，缺省用主机名加进程号")];

    run_cli(
        "netvault-consumer",
        "网络设备配置备份系统 - 结果消费者",
        Some("启动结果消费者，消费设备结果流与存储结果流，维护备份记录状态并派生存储任务"),
        custom_args,
        AppMode::Consumer,
        "Consumer",
    )
    .await
}
