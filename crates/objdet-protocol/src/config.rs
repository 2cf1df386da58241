//! 配置结构体定义
//!
//! - [`CommonConfig`]: 所有子帧共享的配置（`PRE_START_COMMON_CFG` 负载）
//! - [`StaticConfig`]: 单个子帧的静态配置（`PRE_START_CFG` 负载）
//!
//! 启用 `serde` feature 后，所有字段都带有默认值，可从部分填写的配置文件中反序列化。

use crate::constants::*;
use crate::{Cmplx16, saturate_i16};
use thiserror::Error;

// ============================================================================
// 公共配置
// ============================================================================

/// 公共配置校验错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid sub-frame count {count} (allowed 1..={max})")]
    InvalidSubframeCount { count: u8, max: usize },
    #[error("Antenna geometry is empty")]
    EmptyGeometry,
    #[error("Too many virtual antennas: {count} (max {max})")]
    TooManyAntennas { count: usize, max: usize },
    #[error("Antenna {index} has invalid row {row} (only rows 0 and 1 are supported)")]
    InvalidAntennaRow { index: usize, row: u8 },
    #[error("Antenna {index} has invalid column {col} (max {max})")]
    InvalidAntennaColumn { index: usize, col: u8, max: usize },
    #[error("Too many calibration coefficients: {count} (max {max})")]
    TooManyCoefficients { count: usize, max: usize },
    #[error("Invalid measurement window: target {target_m} m, search window {search_m} m")]
    InvalidMeasurementWindow { target_m: f32, search_m: f32 },
}

/// 虚拟天线在阵列中的位置（以半波长为单位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AntennaPos {
    /// 行号：0 = 方位行，1 = 俯仰行
    pub row: u8,
    /// 列号
    pub col: u8,
}

/// 虚拟天线几何（索引为虚拟天线号 `tx * numRx + rx`）
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AntennaGeometry {
    pub positions: Vec<AntennaPos>,
}

impl AntennaGeometry {
    /// `n` 个天线的均匀线阵（全部位于方位行）
    pub fn uniform_linear(n: usize) -> Self {
        Self {
            positions: (0..n)
                .map(|col| AntennaPos {
                    row: 0,
                    col: col as u8,
                })
                .collect(),
        }
    }

    /// 3TX / 4RX 带俯仰的典型布局
    ///
    /// ```text
    /// row 1:        [tx1 r0..r3]
    /// row 0: [tx0 r0..r3][tx2 r0..r3]
    ///         col 0    2    4    7
    /// ```
    pub fn tdm_3tx4rx_elevation() -> Self {
        let mut positions = Vec::with_capacity(12);
        for (row, col_base) in [(0u8, 0u8), (1, 2), (0, 4)] {
            for rx in 0..4u8 {
                positions.push(AntennaPos {
                    row,
                    col: col_base + rx,
                });
            }
        }
        Self { positions }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// 列数（最大列号 + 1）
    pub fn num_columns(&self) -> usize {
        self.positions
            .iter()
            .map(|p| p.col as usize + 1)
            .max()
            .unwrap_or(0)
    }

    /// 是否存在俯仰行
    pub fn has_elevation(&self) -> bool {
        self.positions.iter().any(|p| p.row == 1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.positions.is_empty() {
            return Err(ConfigError::EmptyGeometry);
        }
        if self.positions.len() > MAX_VIRTUAL_ANTENNAS {
            return Err(ConfigError::TooManyAntennas {
                count: self.positions.len(),
                max: MAX_VIRTUAL_ANTENNAS,
            });
        }
        for (index, pos) in self.positions.iter().enumerate() {
            if pos.row > 1 {
                return Err(ConfigError::InvalidAntennaRow {
                    index,
                    row: pos.row,
                });
            }
            if pos.col as usize >= MAX_AZIMUTH_COLUMNS {
                return Err(ConfigError::InvalidAntennaColumn {
                    index,
                    col: pos.col,
                    max: MAX_AZIMUTH_COLUMNS - 1,
                });
            }
        }
        Ok(())
    }
}

impl Default for AntennaGeometry {
    fn default() -> Self {
        Self::uniform_linear(8)
    }
}

/// 距离偏差与 RX 通道相位补偿
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RxChanCompensation {
    /// 距离偏差（米），AoA 计算距离时减去
    pub range_bias_m: f32,
    /// 每个虚拟天线的 Q14 补偿系数；缺失的天线按 `16384 + 0j` 处理
    pub coefficients: Vec<Cmplx16>,
}

impl RxChanCompensation {
    /// 虚拟天线 `ant` 的系数
    pub fn coefficient(&self, ant: usize) -> Cmplx16 {
        self.coefficients
            .get(ant)
            .copied()
            .unwrap_or(Cmplx16::new(CALIB_ONE, 0))
    }

    /// 全部为单位系数
    pub fn identity(num_virtual_antennas: usize) -> Self {
        Self {
            range_bias_m: 0.0,
            coefficients: vec![Cmplx16::new(CALIB_ONE, 0); num_virtual_antennas],
        }
    }

    /// 从浮点复数构造 Q14 系数
    pub fn coefficient_from_f32(re: f32, im: f32) -> Cmplx16 {
        let one = CALIB_ONE as f32;
        Cmplx16::new(saturate_i16(re * one), saturate_i16(im * one))
    }
}

/// 距离偏差 / RX 相位测量配置
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MeasureCfg {
    pub enabled: bool,
    /// 已知标定目标的距离（米）
    pub target_distance_m: f32,
    /// 搜索窗口半宽（米）
    pub search_win_m: f32,
}

impl Default for MeasureCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            target_distance_m: 1.5,
            search_win_m: 0.3,
        }
    }
}

/// 公共配置（所有子帧共享）
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CommonConfig {
    /// 子帧数
    pub num_subframes: u8,
    /// 虚拟天线几何
    pub antenna: AntennaGeometry,
    /// 通道补偿
    pub rx_chan_comp: RxChanCompensation,
    /// 方位 FFT 零插入掩码：bit c 置位表示第 c 列参与，清零的列在 FFT 输入中填零
    pub azimuth_mask: u32,
    /// 距离偏差 / 相位测量
    pub measure: MeasureCfg,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            num_subframes: 1,
            antenna: AntennaGeometry::default(),
            rx_chan_comp: RxChanCompensation::default(),
            azimuth_mask: u32::MAX,
            measure: MeasureCfg::default(),
        }
    }
}

impl CommonConfig {
    pub fn validate(&self, max_subframes: usize) -> Result<(), ConfigError> {
        if self.num_subframes == 0 || self.num_subframes as usize > max_subframes {
            return Err(ConfigError::InvalidSubframeCount {
                count: self.num_subframes,
                max: max_subframes,
            });
        }
        self.antenna.validate()?;
        if self.rx_chan_comp.coefficients.len() > MAX_VIRTUAL_ANTENNAS {
            return Err(ConfigError::TooManyCoefficients {
                count: self.rx_chan_comp.coefficients.len(),
                max: MAX_VIRTUAL_ANTENNAS,
            });
        }
        if self.measure.enabled
            && (self.measure.search_win_m <= 0.0 || self.measure.target_distance_m <= 0.0)
        {
            return Err(ConfigError::InvalidMeasurementWindow {
                target_m: self.measure.target_distance_m,
                search_m: self.measure.search_win_m,
            });
        }
        Ok(())
    }
}

// ============================================================================
// 子帧静态配置
// ============================================================================

/// ADC 数据格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AdcConfig {
    /// 每个 chirp 的采样点数
    pub num_adc_samples: u16,
    pub num_rx: u8,
    /// TDM-MIMO 发射天线数
    pub num_tx: u8,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            num_adc_samples: 256,
            num_rx: 4,
            num_tx: 2,
        }
    }
}

impl AdcConfig {
    pub fn num_virtual_antennas(&self) -> usize {
        self.num_rx as usize * self.num_tx as usize
    }
}

/// 窗函数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum WindowType {
    Rectangular,
    #[default]
    Hann,
    Hamming,
    Blackman,
}

/// 雷达立方体压缩
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CompressionCfg {
    pub enabled: bool,
    /// 压缩比（压缩后 / 压缩前），(0, 1]
    pub ratio: f32,
}

impl Default for CompressionCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            ratio: 0.5,
        }
    }
}

impl CompressionCfg {
    /// 一个天线块（`num_ant` 个复数样本）压缩后的字节数
    pub fn block_bytes(&self, num_ant: usize) -> usize {
        let raw = num_ant * Cmplx16::SIZE;
        if self.enabled {
            ((raw as f32 * self.ratio).ceil() as usize).min(raw)
        } else {
            raw
        }
    }
}

/// CFAR 噪声平均方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CfarAveraging {
    /// 两侧取平均
    #[default]
    Ca,
    /// 两侧取较大者
    Cago,
    /// 两侧取较小者
    Caso,
}

/// CFAR 配置
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CfarCfg {
    pub enabled: bool,
    pub averaging: CfarAveraging,
    /// 每侧噪声窗口长度（单元数，2 的幂）
    pub win_len: u8,
    /// 每侧保护单元数
    pub guard_len: u8,
    /// 门限（dB）
    pub threshold_db: f32,
}

impl CfarCfg {
    /// 距离域默认值
    pub fn range_default() -> Self {
        Self {
            enabled: true,
            averaging: CfarAveraging::Ca,
            win_len: 8,
            guard_len: 4,
            threshold_db: 15.0,
        }
    }

    /// 多普勒域默认值
    pub fn doppler_default() -> Self {
        Self {
            enabled: true,
            averaging: CfarAveraging::Ca,
            win_len: 4,
            guard_len: 2,
            threshold_db: 15.0,
        }
    }

    /// Q11 log2 单位的门限
    pub fn threshold_q11(&self) -> u16 {
        db_to_log2_q11(self.threshold_db)
    }
}

impl Default for CfarCfg {
    fn default() -> Self {
        Self::range_default()
    }
}

/// 峰值分组
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PeakGroupingCfg {
    pub in_range: bool,
    pub in_doppler: bool,
}

impl Default for PeakGroupingCfg {
    fn default() -> Self {
        Self {
            in_range: true,
            in_doppler: true,
        }
    }
}

/// 距离视场
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FovRange {
    pub min_m: f32,
    pub max_m: f32,
}

impl Default for FovRange {
    fn default() -> Self {
        Self {
            min_m: 0.0,
            max_m: 1000.0,
        }
    }
}

/// 角度视场（度）
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FovAoa {
    pub min_azimuth_deg: f32,
    pub max_azimuth_deg: f32,
    pub min_elevation_deg: f32,
    pub max_elevation_deg: f32,
}

impl Default for FovAoa {
    fn default() -> Self {
        Self {
            min_azimuth_deg: -90.0,
            max_azimuth_deg: 90.0,
            min_elevation_deg: -90.0,
            max_elevation_deg: 90.0,
        }
    }
}

/// 距离 DC 特征校准
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DcRangeSigCfg {
    pub enabled: bool,
    /// 用于求平均的帧数
    pub num_avg_frames: u16,
    /// 负向最远距离单元（≤ 0，从 `R` 回绕）
    pub negative_bin_idx: i16,
    /// 正向最远距离单元（≥ 0）
    pub positive_bin_idx: i16,
}

impl Default for DcRangeSigCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            num_avg_frames: 8,
            negative_bin_idx: -5,
            positive_bin_idx: 8,
        }
    }
}

impl DcRangeSigCfg {
    /// 参与校准的距离单元数
    pub fn num_bins(&self) -> usize {
        (self.positive_bin_idx as i32 - self.negative_bin_idx as i32 + 1).max(0) as usize
    }
}

/// AoA 配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AoaCfg {
    /// 方位 FFT 点数
    pub fft_size: u16,
}

impl Default for AoaCfg {
    fn default() -> Self {
        Self { fft_size: 64 }
    }
}

/// 加速器资源基址
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ResourceCfg {
    /// 第一个参数集槽位
    pub param_set_base: u8,
    /// 第一个传输通道
    pub edma_channel_base: u8,
}

/// 子帧静态配置
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StaticConfig {
    pub adc: AdcConfig,
    /// 距离 FFT 点数
    pub num_range_bins: u16,
    /// 每个 TX 的 chirp 数
    pub num_doppler_chirps: u16,
    /// 多普勒 FFT 点数
    pub num_doppler_bins: u16,
    /// 距离分辨率（米 / 单元）
    pub range_step_m: f32,
    /// 速度分辨率（米每秒 / 单元）
    pub doppler_step_mps: f32,
    pub range_window: WindowType,
    pub doppler_window: WindowType,
    pub compression: CompressionCfg,
    #[cfg_attr(feature = "serde", serde(default = "CfarCfg::range_default"))]
    pub cfar_range: CfarCfg,
    #[cfg_attr(feature = "serde", serde(default = "CfarCfg::doppler_default"))]
    pub cfar_doppler: CfarCfg,
    pub peak_grouping: PeakGroupingCfg,
    pub fov_range: FovRange,
    pub fov_aoa: FovAoa,
    /// 静态杂波去除
    pub static_clutter_removal: bool,
    pub dc_range_sig: DcRangeSigCfg,
    /// 导出检测矩阵
    pub det_matrix_export: bool,
    pub aoa: AoaCfg,
    pub resources: ResourceCfg,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            adc: AdcConfig::default(),
            num_range_bins: 256,
            num_doppler_chirps: 16,
            num_doppler_bins: 16,
            range_step_m: 0.044,
            doppler_step_mps: 0.13,
            range_window: WindowType::Hann,
            doppler_window: WindowType::Hann,
            compression: CompressionCfg::default(),
            cfar_range: CfarCfg::range_default(),
            cfar_doppler: CfarCfg::doppler_default(),
            peak_grouping: PeakGroupingCfg::default(),
            fov_range: FovRange::default(),
            fov_aoa: FovAoa::default(),
            static_clutter_removal: false,
            dc_range_sig: DcRangeSigCfg::default(),
            det_matrix_export: false,
            aoa: AoaCfg::default(),
            resources: ResourceCfg::default(),
        }
    }
}

impl StaticConfig {
    pub fn num_virtual_antennas(&self) -> usize {
        self.adc.num_virtual_antennas()
    }

    /// 一帧的总 chirp 数（所有 TX）
    pub fn num_chirps_total(&self) -> usize {
        self.num_doppler_chirps as usize * self.adc.num_tx as usize
    }

    /// 一帧 ADC 数据字节数（`[chirp][rx][sample]`，复数 16 位）
    pub fn adc_frame_bytes(&self) -> usize {
        self.num_chirps_total()
            * self.adc.num_rx as usize
            * self.adc.num_adc_samples as usize
            * Cmplx16::SIZE
    }

    /// 雷达立方体中一个 `(range, chirp)` 天线块的字节数
    pub fn cube_block_bytes(&self) -> usize {
        self.compression.block_bytes(self.num_virtual_antennas())
    }

    /// 雷达立方体一行（一个距离单元）的字节数
    pub fn cube_row_bytes(&self) -> usize {
        self.num_doppler_chirps as usize * self.cube_block_bytes()
    }

    pub fn cube_bytes(&self) -> usize {
        self.num_range_bins as usize * self.cube_row_bytes()
    }

    /// 是否需要检测矩阵
    pub fn det_matrix_required(&self) -> bool {
        self.cfar_range.enabled || self.peak_grouping.in_range || self.det_matrix_export
    }

    pub fn raw_record_bytes(&self) -> usize {
        raw_obj_record_bytes(self.num_virtual_antennas())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_config_validate() {
        let cfg = CommonConfig::default();
        assert!(cfg.validate(4).is_ok());

        let cfg = CommonConfig {
            num_subframes: 5,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(4),
            Err(ConfigError::InvalidSubframeCount { count: 5, max: 4 })
        );

        let cfg = CommonConfig {
            antenna: AntennaGeometry { positions: vec![] },
            ..Default::default()
        };
        assert_eq!(cfg.validate(4), Err(ConfigError::EmptyGeometry));
    }

    #[test]
    fn test_geometry_layouts() {
        let ula = AntennaGeometry::uniform_linear(4);
        assert_eq!(ula.num_columns(), 4);
        assert!(!ula.has_elevation());

        let geo = AntennaGeometry::tdm_3tx4rx_elevation();
        assert_eq!(geo.len(), 12);
        assert_eq!(geo.num_columns(), 8);
        assert!(geo.has_elevation());
        assert_eq!(geo.positions[4], AntennaPos { row: 1, col: 2 });
        assert!(geo.validate().is_ok());
    }

    #[test]
    fn test_invalid_row_rejected() {
        let geo = AntennaGeometry {
            positions: vec![AntennaPos { row: 2, col: 0 }],
        };
        assert_eq!(
            geo.validate(),
            Err(ConfigError::InvalidAntennaRow { index: 0, row: 2 })
        );
    }

    #[test]
    fn test_missing_coefficient_is_identity() {
        let comp = RxChanCompensation::default();
        assert_eq!(comp.coefficient(3), Cmplx16::new(16384, 0));
        assert_eq!(
            RxChanCompensation::coefficient_from_f32(0.5, -0.5),
            Cmplx16::new(8192, -8192)
        );
    }

    #[test]
    fn test_static_config_sizes() {
        let cfg = StaticConfig::default();
        assert_eq!(cfg.num_virtual_antennas(), 8);
        assert_eq!(cfg.adc_frame_bytes(), 32 * 4 * 256 * 4);
        assert_eq!(cfg.cube_bytes(), 256 * 16 * 8 * 4);
        assert!(cfg.det_matrix_required());

        let compressed = StaticConfig {
            compression: CompressionCfg {
                enabled: true,
                ratio: 0.5,
            },
            ..Default::default()
        };
        assert_eq!(compressed.cube_block_bytes(), 16);
    }

    #[test]
    fn test_det_matrix_rule() {
        let cfg = StaticConfig {
            cfar_range: CfarCfg {
                enabled: false,
                ..CfarCfg::range_default()
            },
            peak_grouping: PeakGroupingCfg {
                in_range: false,
                in_doppler: true,
            },
            det_matrix_export: false,
            ..Default::default()
        };
        assert!(!cfg.det_matrix_required());
    }

    #[test]
    fn test_dc_sig_bins() {
        assert_eq!(DcRangeSigCfg::default().num_bins(), 14);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"num_range_bins": 128, "doppler_window": "blackman"}"#;
        let cfg: StaticConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.num_range_bins, 128);
        assert_eq!(cfg.doppler_window, WindowType::Blackman);
        assert_eq!(cfg.range_window, WindowType::Hann);
        assert_eq!(cfg.cfar_range, CfarCfg::range_default());
        assert_eq!(cfg.cfar_doppler, CfarCfg::doppler_default());
    }
}
