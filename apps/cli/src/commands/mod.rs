//! 命令定义和实现

pub mod plan;
pub mod run;

pub use plan::PlanCommand;
pub use run::RunCommand;

use anyhow::{Context, Result};
use objdet_tools::Profile;

/// 输出示例配置档案
pub fn init() -> Result<()> {
    let text = Profile::example().to_toml_string()?;
    print!("{text}");
    Ok(())
}

/// 加载配置档案
pub fn load_profile(path: &str) -> Result<Profile> {
    Profile::load(path).with_context(|| format!("loading profile {path}"))
}
