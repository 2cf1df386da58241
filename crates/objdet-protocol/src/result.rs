//! 结果记录定义
//!
//! 每个子帧处理完成后产出一条 [`ResultRecord`] 和一条 [`TimingStats`]，
//! 作为两槽描述符交给导出方。

use crate::Cmplx16;
use crate::constants::{POINT_OBJ_BYTES, SIDE_INFO_BYTES};

/// 点云目标
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PointObj {
    /// 米
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// 米每秒
    pub velocity: f32,
}

impl PointObj {
    pub fn to_le_bytes(&self) -> [u8; POINT_OBJ_BYTES] {
        let mut out = [0u8; POINT_OBJ_BYTES];
        out[0..4].copy_from_slice(&self.x.to_le_bytes());
        out[4..8].copy_from_slice(&self.y.to_le_bytes());
        out[8..12].copy_from_slice(&self.z.to_le_bytes());
        out[12..16].copy_from_slice(&self.velocity.to_le_bytes());
        out
    }

    pub fn range(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// 点云侧信息（0.1 dB）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SideInfo {
    pub snr: i16,
    pub noise: i16,
}

impl SideInfo {
    pub fn to_le_bytes(&self) -> [u8; SIDE_INFO_BYTES] {
        let s = self.snr.to_le_bytes();
        let n = self.noise.to_le_bytes();
        [s[0], s[1], n[0], n[1]]
    }
}

/// 共享内存中的缓冲区描述符（已做地址转换）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferDesc {
    pub addr: u32,
    pub size: u32,
}

/// 结果中的缓冲区引用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResultRefs {
    pub object_list: BufferDesc,
    pub side_info: BufferDesc,
    /// 未分配检测矩阵时为 `None`
    pub det_matrix: Option<BufferDesc>,
}

/// 列表截断计数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClipCounters {
    /// 多普勒原始列表
    pub raw_list: u32,
    /// 距离 CFAR 列表
    pub cfar_list: u32,
    /// 有效目标列表
    pub validated_list: u32,
}

impl ClipCounters {
    pub fn total(&self) -> u32 {
        self.raw_list + self.cfar_list + self.validated_list
    }
}

/// 距离偏差 / RX 相位测量结果
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RangeBiasRxPhase {
    pub range_bias_m: f32,
    /// 每个虚拟天线的 Q14 补偿系数
    pub coefficients: Vec<Cmplx16>,
}

/// 子帧结果记录
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResultRecord {
    pub sub_frame_index: u8,
    pub frame_number: u32,
    pub num_objects: u32,
    pub objects: Vec<PointObj>,
    pub side_info: Vec<SideInfo>,
    pub refs: ResultRefs,
    pub clipped: ClipCounters,
    /// 多普勒阶段原始目标数
    pub num_raw_objects: u32,
    /// 距离 CFAR 目标数（未启用时为 0）
    pub num_cfar_objects: u32,
    pub measurement: Option<RangeBiasRxPhase>,
}

/// 各阶段耗时下标
pub mod stage_index {
    pub const RANGE: usize = 0;
    pub const DOPPLER: usize = 1;
    pub const CFAR: usize = 2;
    pub const INTERSECT: usize = 3;
    pub const AOA: usize = 4;
    pub const COUNT: usize = 5;
}

/// 时序统计（微秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimingStats {
    pub frame_start_us: u64,
    /// 帧间处理开始时间
    pub inter_frame_start_us: u64,
    pub inter_frame_end_us: u64,
    pub inter_frame_processing_us: u64,
    pub sub_frame_processing_us: u64,
    pub stage_us: [u64; stage_index::COUNT],
    /// 帧内处理余量，始终上报 0：第一阶段完全由硬件完成，无法测量
    pub intra_frame_margin_us: u64,
}

/// 单个内存区的使用情况
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BankUsage {
    pub used: usize,
    pub max_usage: usize,
    pub capacity: usize,
}

impl BankUsage {
    pub fn free(&self) -> usize {
        self.capacity.saturating_sub(self.used)
    }
}

/// `PRE_START_CFG` 返回的内存使用统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemUsageStats {
    pub window: BankUsage,
    pub local: BankUsage,
    pub slow: BankUsage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_obj_bytes() {
        let p = PointObj {
            x: 1.0,
            y: 2.0,
            z: 0.0,
            velocity: -1.0,
        };
        let bytes = p.to_le_bytes();
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[12..16], &(-1.0f32).to_le_bytes());
        assert!((p.range() - 5.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_side_info_bytes() {
        let s = SideInfo { snr: 300, noise: -2 };
        assert_eq!(s.to_le_bytes(), [0x2C, 0x01, 0xFE, 0xFF]);
    }

    #[test]
    fn test_bank_usage_free() {
        let u = BankUsage {
            used: 10,
            max_usage: 20,
            capacity: 64,
        };
        assert_eq!(u.free(), 54);
    }

    #[test]
    fn test_timing_default_margin_zero() {
        assert_eq!(TimingStats::default().intra_frame_margin_us, 0);
    }
}
