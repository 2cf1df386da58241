//! # ObjDet Tools - 应用层共享工具
//!
//! **依赖原则**: 只依赖数据通路的公开类型，不引入命令行或线程相关代码
//!
//! ## 包含模块
//!
//! - `profile` - TOML 配置档案（内存区、公共配置、子帧配置、合成场景）
//! - `statistics` - 时延统计（纯函数，可选）
//!
//! ## Feature Flags
//!
//! - `default` - 无默认 features
//! - `full` - 启用所有功能（包含 statistics）
//! - `statistics` - 启用统计模块
//!
//! ## 使用示例
//!
//! ```toml
//! # apps/cli/Cargo.toml - 需要统计
//! [dependencies]
//! objdet-tools = { workspace = true, features = ["full"] }
//! ```

pub mod profile;

// ⭐ 可选模块（通过 feature flags 控制）
#[cfg(feature = "statistics")]
pub mod statistics;

// 重新导出常用类型
pub use profile::{Profile, ProfileError, SceneCfg, TargetSpec};
#[cfg(feature = "statistics")]
pub use statistics::LatencyStatistics;
