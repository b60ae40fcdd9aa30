use anyhow::Result;
use clap::Subcommand;
use netvault::app::{AppMode, Application};
use netvault::common::{
    init_logging, load_config, parse_app_mode, start_application, StartupConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliApp::parse();
    cli.run().await
}

/// 单进程入口与管理命令
#[derive(clap::Parser, Debug)]
#[command(name = "netvault")]
#[command(version)]
#[command(about = "网络设备配置备份采集与归档系统")]
#[command(long_about = "单进程运行全部组件，或执行手动备份、配置校验等管理命令")]
struct CliApp {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径，缺省按默认路径查找
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// 日志格式
    #[arg(long, default_value = "pretty", value_parser = ["json", "pretty", "text"])]
    log_format: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 运行服务组件
    Run {
        /// 运行模式: scheduler | collector | storage-worker | consumer | all
        #[arg(short, long, default_value = "all")]
        mode: String,
        /// worker节点唯一标识符
        #[arg(short, long)]
        worker_id: Option<String>,
    },
    /// 手动触发一台设备的立即备份
    Trigger {
        /// 设备ID
        device_id: i64,
    },
    /// 加载并校验配置
    CheckConfig,
}

impl CliApp {
    fn parse() -> Self {
        <Self as clap::Parser>::parse()
    }

    async fn run(self) -> Result<()> {
        let startup_config = StartupConfig {
            config_path: self.config,
            log_level: self.log_level,
            log_format: self.log_format,
            worker_id: None,
        };

        match self.command {
            Commands::Run { mode, worker_id } => {
                let app_mode = parse_app_mode(&mode)?;
                let startup_config = StartupConfig {
                    worker_id,
                    ..startup_config
                };
                start_application(startup_config, app_mode, "NetVault").await
            }
            Commands::Trigger { device_id } => {
                init_logging(&startup_config.log_level, &startup_config.log_format)?;
                let config = load_config(&startup_config)?;
                let app = Application::new(config, AppMode::Scheduler).await?;
                let job_id = app.trigger_backup(device_id).await?;
                println!("已触发设备 {device_id} 的立即备份，任务ID: {job_id}");
                Ok(())
            }
            Commands::CheckConfig => {
                let config = load_config(&startup_config)?;
                println!("配置校验通过");
                println!("{}", config.to_toml()?);
                Ok(())
            }
        }
    }
}
