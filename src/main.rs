use clap::{Parser, Subcommand};
use drivesync_lib::config::{EngineConfig, StorageConfig, SyncConfig};
use drivesync_lib::storage::create_remote_store;
use drivesync_lib::{Outcome, SyncEngine, SyncError};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// 把本地文件和文件夹持续同步到远程容器
#[derive(Parser, Debug)]
#[command(name = "drivesync", version, about)]
struct Cli {
    /// 应用配置目录（包含 config.json 和 logs/）
    #[arg(long, env = "DRIVESYNC_CONFIG_DIR", global = true)]
    config_dir: Option<PathBuf>,

    /// 输出调试日志到控制台
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 上传单个文件（远程已存在同名对象时更新）
    Upload {
        /// 本地文件路径
        file: PathBuf,
    },
    /// 按备份配置同步并持续监听变化，直到收到 Ctrl-C
    Backup {
        /// 备份配置文件（JSON，包含 files / folders）
        config: PathBuf,
    },
}

fn build_engine(config_dir: &std::path::Path) -> anyhow::Result<SyncEngine> {
    let storage_config = StorageConfig::load(config_dir)?;
    let engine_config = EngineConfig::load(config_dir);
    let store = create_remote_store(&storage_config)?;
    Ok(SyncEngine::new(store, storage_config.container, engine_config))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_dir = cli
        .config_dir
        .unwrap_or_else(drivesync_lib::default_config_dir);

    match cli.command {
        Command::Upload { file } => {
            let engine = build_engine(&config_dir)?;
            match engine.upload(&file).await? {
                Outcome::Created(r) => println!("New file created: {}", r.id),
                Outcome::Updated(r) => println!("Updated file: {}", r.id),
            }
        }
        Command::Backup { config } => {
            // 配置错误在连接远程之前报告
            let sync_config = SyncConfig::load(&config).map_err(SyncError::from)?;
            if sync_config.is_empty() {
                tracing::warn!("备份配置中没有文件或文件夹: {}", config.display());
            }
            let engine = build_engine(&config_dir)?;

            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        tracing::info!("收到退出信号，正在停止监听...");
                        signal.cancel();
                    }
                    Err(e) => tracing::error!("无法监听退出信号: {}", e),
                }
            });

            let report = engine.run(&sync_config, shutdown).await?;
            tracing::debug!("同步报告: {}", serde_json::to_string(&report)?);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(drivesync_lib::default_config_dir);
    let _guard = drivesync_lib::logging::init(&config_dir, cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
