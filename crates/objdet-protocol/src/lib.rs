//! # ObjDet Protocol
//!
//! 雷达目标检测数据通路的数据模型定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `constants`: 定点格式、记录大小与容量上限
//! - `config`: 公共配置与子帧静态配置（命令负载）
//! - `command`: 命令枚举与命令码
//! - `result`: 点云、侧信息、结果记录与时序统计
//!
//! ## 内存布局
//!
//! 所有落在片上内存（arena）中的数据均为小端字节序。
//! 复数样本使用 [`Cmplx16`]（实部在前）。

pub mod command;
pub mod config;
pub mod constants;
pub mod result;

// 重新导出常用类型
pub use command::*;
pub use config::*;
pub use constants::*;
pub use result::*;

use thiserror::Error;

/// 16 位定点复数样本（雷达立方体、ADC 缓冲区、目标记录中的天线样本）
///
/// # 内存布局
///
/// ```text
/// byte 0-1: re (i16, LE)
/// byte 2-3: im (i16, LE)
/// ```
///
/// # 示例
///
/// ```rust
/// use objdet_protocol::Cmplx16;
///
/// let s = Cmplx16::new(100, -3);
/// assert_eq!(Cmplx16::from_le_bytes(s.to_le_bytes()), s);
/// assert_eq!(Cmplx16::from_f32(40_000.0, -40_000.0), Cmplx16::new(i16::MAX, i16::MIN));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cmplx16 {
    /// 实部
    pub re: i16,
    /// 虚部
    pub im: i16,
}

impl Cmplx16 {
    /// 零样本
    pub const ZERO: Self = Self { re: 0, im: 0 };

    /// 单个样本在内存中的字节数
    pub const SIZE: usize = 4;

    pub const fn new(re: i16, im: i16) -> Self {
        Self { re, im }
    }

    /// 从浮点值四舍五入并饱和到 i16
    #[inline]
    pub fn from_f32(re: f32, im: f32) -> Self {
        Self {
            re: saturate_i16(re),
            im: saturate_i16(im),
        }
    }

    #[inline]
    pub fn to_le_bytes(self) -> [u8; 4] {
        let re = self.re.to_le_bytes();
        let im = self.im.to_le_bytes();
        [re[0], re[1], im[0], im[1]]
    }

    #[inline]
    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self {
            re: i16::from_le_bytes([bytes[0], bytes[1]]),
            im: i16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }
}

/// 四舍五入并饱和到 i16
#[inline]
pub fn saturate_i16(value: f32) -> i16 {
    let rounded = value.round();
    if rounded >= i16::MAX as f32 {
        i16::MAX
    } else if rounded <= i16::MIN as f32 {
        i16::MIN
    } else {
        rounded as i16
    }
}

/// 协议层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Unknown command code: {0:#06x}")]
    UnknownCommandCode(u32),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
