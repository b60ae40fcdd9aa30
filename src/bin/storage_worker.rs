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
        .help("worker节点唯一标识符，缺省用主机名加进程号")];

    run_cli(
        "netvault-storage-worker",
        "网络设备配置备份系统 - 存储worker",
        Some("启动存储worker，消费各后端的存储队列并归档配置文本，结果写入存储结果流"),
        custom_args,
        AppMode::StorageWorker,
        "StorageWorker",
    )
    .await
}
