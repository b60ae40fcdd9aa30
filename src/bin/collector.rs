use anyhow::Result;
use clap::Arg;
use netvault::app::AppMode;
use netvault::common::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    // 采集worker特有参数
    let custom_args = vec![Arg::new("worker-id")
        .short('w')
        .long("worker-id")
        .value_name("ID")
        .help("worker节点唯一标识符，缺省用主机名加进程号")];

    run_cli(
        "netvault-collector",
        "网络设备配置备份系统 - 采集worker",
        Some("启动采集worker，消费采集队列并执行备份插件，结果写入设备结果流"),
        custom_args,
        AppMode::Collector,
        "Collector",
    )
    .await
}
