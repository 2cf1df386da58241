//! plan 命令
//!
//! 下发启动前的配置命令，报告规划结果

use anyhow::{Result, bail};
use clap::Args;
use objdet_dpc::{CommandResponse, ObjDetBuilder};
use objdet_protocol::{BankUsage, Command};
use tracing::info;

use super::load_profile;

/// 规划命令参数
#[derive(Args, Debug)]
pub struct PlanCommand {
    /// 配置档案路径
    #[arg(short, long)]
    pub profile: String,
}

impl PlanCommand {
    pub fn execute(&self) -> Result<()> {
        let profile = load_profile(&self.profile)?;
        let mut dpc = ObjDetBuilder::new()
            .config(profile.dpc.clone())
            .source(profile.scene_source())
            .build();

        for cmd in profile.commands() {
            let code = cmd.code();
            let sub_frame = match &cmd {
                Command::PreStartCfg { sub_frame, .. } => Some(*sub_frame),
                _ => None,
            };
            match dpc.dispatch(cmd) {
                Ok(CommandResponse::MemUsage(usage)) => {
                    let idx = sub_frame.unwrap_or_default();
                    println!("sub-frame {idx}:");
                    print_bank("window", &usage.window);
                    print_bank("local", &usage.local);
                    print_bank("slow", &usage.slow);
                    if let Some(sf) = dpc.subframe(idx) {
                        let layout = sf.layout();
                        println!(
                            "  raw objects ≤ {}, validated objects ≤ {}, detection matrix: {}",
                            layout.raw_capacity,
                            layout.object_capacity,
                            if layout.det_matrix.is_some() { "yes" } else { "no" }
                        );
                    }
                }
                Ok(_) => info!("{:?} accepted", code),
                Err(e) => bail!("{:?} rejected (code {}): {}", code, e.code(), e),
            }
        }
        println!("✅ {} sub-frame(s) planned", dpc.num_subframes());
        Ok(())
    }
}

fn print_bank(name: &str, usage: &BankUsage) {
    let pct = if usage.capacity == 0 {
        0.0
    } else {
        usage.used as f64 * 100.0 / usage.capacity as f64
    };
    println!(
        "  {:<6} {:>8} / {:>8} bytes ({:5.1}%)",
        name, usage.used, usage.capacity, pct
    );
}
