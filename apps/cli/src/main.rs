//! # ObjDet CLI
//!
//! 对象检测数据通路的命令行驱动，使用软件加速器与合成场景。
//!
//! ```bash
//! # 生成示例配置档案
//! objdet-cli init > profile.toml
//!
//! # 只做启动前配置，查看每个子帧的内存使用
//! objdet-cli plan --profile profile.toml
//!
//! # 运行 100 帧，逐帧输出点云
//! objdet-cli run --profile profile.toml --frames 100 --json
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{PlanCommand, RunCommand};

/// ObjDet CLI - 雷达对象检测命令行工具
#[derive(Parser, Debug)]
#[command(name = "objdet-cli")]
#[command(about = "Command-line driver for the radar object-detection data path", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 输出示例配置档案
    Init,

    /// 启动前配置并报告内存使用
    Plan {
        #[command(flatten)]
        args: PlanCommand,
    },

    /// 驱动流水线处理若干帧
    Run {
        #[command(flatten)]
        args: RunCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("objdet_cli=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => commands::init(),
        Commands::Plan { args } => args.execute(),
        Commands::Run { args } => args.execute(),
    }
}
