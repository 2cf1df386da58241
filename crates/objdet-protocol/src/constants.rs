//! 协议常量定义
//!
//! 定点格式、内存记录大小以及硬件相关上限。

/// 最大 RX 天线数
pub const MAX_RX_ANTENNAS: usize = 4;

/// 最大 TX 天线数（TDM-MIMO）
pub const MAX_TX_ANTENNAS: usize = 3;

/// 最大虚拟天线数
pub const MAX_VIRTUAL_ANTENNAS: usize = MAX_RX_ANTENNAS * MAX_TX_ANTENNAS;

/// 方位向零插入掩码可覆盖的最大列数
pub const MAX_AZIMUTH_COLUMNS: usize = 32;

/// 默认最大子帧数
pub const DEFAULT_MAX_SUBFRAMES: usize = 4;

/// 检测矩阵的小数位数（log2 幅度，Q11）
pub const LOG2_Q_FRAC_BITS: u32 = 11;

/// 检测矩阵中 log2 单位 1.0 的定点值
pub const LOG2_ONE: f32 = (1u32 << LOG2_Q_FRAC_BITS) as f32;

/// 每个 log2 幅度单位对应的 dB 数（20·log10(2)）
pub const DB_PER_LOG2: f32 = 6.020_6;

/// 校准系数的小数位数（Q14，`16384` 表示 1.0）
pub const CALIB_FRAC_BITS: u32 = 14;

/// 校准系数的单位值
pub const CALIB_ONE: i16 = 1 << CALIB_FRAC_BITS;

/// 窗函数系数小数位数（Q15）
pub const WINDOW_FRAC_BITS: u32 = 15;

/// 方位/俯仰导向相位表长度
pub const PHASE_TABLE_LEN: usize = 256;

/// 原始目标记录头部字节数（range u16, doppler i16, peak u16, noise u16）
pub const RAW_OBJ_HEADER_BYTES: usize = 8;

/// CFAR 目标记录字节数（range u16, doppler u16, noise u16）
pub const CFAR_RECORD_BYTES: usize = 6;

/// 点云目标字节数（x, y, z, velocity 四个 f32）
pub const POINT_OBJ_BYTES: usize = 16;

/// 侧信息字节数（snr i16, noise i16）
pub const SIDE_INFO_BYTES: usize = 4;

/// 原始目标记录总字节数（头部 + 每个虚拟天线一个 `Cmplx16`）
#[inline]
pub const fn raw_obj_record_bytes(num_virtual_antennas: usize) -> usize {
    RAW_OBJ_HEADER_BYTES + num_virtual_antennas * crate::Cmplx16::SIZE
}

/// dB 门限转换为 Q11 log2 幅度单位
#[inline]
pub fn db_to_log2_q11(db: f32) -> u16 {
    let value = (db / DB_PER_LOG2 * LOG2_ONE).round();
    value.clamp(0.0, u16::MAX as f32) as u16
}

/// Q11 log2 幅度单位转换为 0.1 dB
#[inline]
pub fn log2_q11_to_decidb(value: i32) -> i16 {
    let db10 = value as f32 / LOG2_ONE * DB_PER_LOG2 * 10.0;
    crate::saturate_i16(db10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes() {
        assert_eq!(raw_obj_record_bytes(8), 40);
        assert_eq!(raw_obj_record_bytes(12), 56);
    }

    #[test]
    fn test_db_conversions() {
        // 6.02 dB == 1 log2 unit
        assert_eq!(db_to_log2_q11(DB_PER_LOG2), 2048);
        assert_eq!(db_to_log2_q11(-3.0), 0);
        assert_eq!(log2_q11_to_decidb(2048), 60);
        assert_eq!(log2_q11_to_decidb(-2048), -60);
    }
}
