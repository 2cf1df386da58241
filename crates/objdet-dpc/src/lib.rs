//! # ObjDet Data-Path Controller
//!
//! 雷达对象检测数据通路控制器。把一帧原始 ADC 样本变换为三维点云：
//!
//! ```text
//! ADC ─▶ Range FFT ─▶ Radar Cube ─▶ Doppler FFT + CFAR ─▶ 原始目标
//!                                          │
//!                                    检测矩阵 ─▶ Range CFAR ─▶ 交集 ─▶ AoA ─▶ 点云
//! ```
//!
//! 模块结构：
//! - [`planner`]：从内存区切出每个子帧的缓冲区，分配参数集槽位与传输通道
//! - [`stage`]：距离、多普勒、距离 CFAR 三个阶段的配置与运行
//! - [`intersect`] / [`aoa`] / [`measure`]：目标列表交集、到达角估计与标定测量
//! - [`dpc`]：帧 / 子帧状态机与命令分发
//! - [`export`]：结果导出握手（深度为 1 的在途令牌）
//! - [`runtime`]：流水线线程
//!
//! # 使用示例
//!
//! ```rust
//! use objdet_dpc::{FrameStartOutcome, ObjDetBuilder};
//! use objdet_hwa::{SceneSource, SceneTarget};
//! use objdet_protocol::{CommonConfig, StaticConfig};
//!
//! let scene = SceneSource::new(vec![SceneTarget::boresight(40.0, 1000.0)]);
//! let mut dpc = ObjDetBuilder::new().source(scene).build();
//! dpc.pre_start_common(CommonConfig::default()).unwrap();
//! dpc.pre_start(0, StaticConfig::default()).unwrap();
//! dpc.start().unwrap();
//!
//! if let FrameStartOutcome::Processed(result) = dpc.frame_start().unwrap() {
//!     println!("{} objects", result.record.num_objects);
//!     dpc.result_exported(result.record.sub_frame_index).unwrap();
//! }
//! ```

pub mod aoa;
mod builder;
pub mod config;
pub mod dpc;
pub mod error;
pub mod export;
pub mod intersect;
pub mod measure;
pub mod metrics;
pub mod planner;
pub mod records;
pub mod runtime;
pub mod stage;
pub mod subframe;
pub mod window;

pub use aoa::{AoaEstimator, AoaOutput};
pub use builder::ObjDetBuilder;
pub use config::{AddressMap, DpcConfig, DpcLimits};
pub use dpc::{CommandResponse, DpcState, FrameStartOutcome, ObjDet};
pub use error::{
    AoaError, BufferClass, CfarError, ConsistencyViolation, DopplerError, DpcError, PlannerError,
    RangeError,
};
pub use export::{ExportGate, ExportedResult};
pub use intersect::{IntersectOutput, Intersector};
pub use metrics::{DpcMetrics, MetricsSnapshot};
pub use planner::{HwCapacity, SubFrameLayout, SubFramePlan};
pub use runtime::{DpcRunner, RunnerError};
pub use subframe::SubFrame;
