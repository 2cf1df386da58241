//! 数据通路错误类型定义
//!
//! 错误分三类：
//! - 配置错误（`configure()` 时检测，每种组合一个错误码）
//! - 资源耗尽（每种缓冲区一个错误码）
//! - 一致性违例（致命，实例进入 `Halted`）
//!
//! [`DpcError::code`] 给出命令分发面上使用的稳定负数错误码。

use objdet_hwa::{Bank, HwaError};
use objdet_protocol::{ConfigError, ProtocolError};
use thiserror::Error;

/// 缓冲区类别（资源耗尽错误按类别区分）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferClass {
    PhaseTable,
    RadarCube,
    DetMatrix,
    RangeWindow,
    CfarList,
    CfarScratch,
    DopplerWindow,
    DopplerScratch,
    Decompression,
    ObjectList,
    PointCloud,
    SideInfo,
}

impl BufferClass {
    /// 类别序号，用于错误码
    pub const fn ordinal(self) -> i32 {
        match self {
            BufferClass::PhaseTable => 1,
            BufferClass::RadarCube => 2,
            BufferClass::DetMatrix => 3,
            BufferClass::RangeWindow => 4,
            BufferClass::CfarList => 5,
            BufferClass::CfarScratch => 6,
            BufferClass::DopplerWindow => 7,
            BufferClass::DopplerScratch => 8,
            BufferClass::Decompression => 9,
            BufferClass::ObjectList => 10,
            BufferClass::PointCloud => 11,
            BufferClass::SideInfo => 12,
        }
    }
}

/// 资源规划错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlannerError {
    #[error("Out of memory for {class:?} in {bank:?}: requested {requested} bytes, {available} free")]
    OutOfMemory {
        class: BufferClass,
        bank: Bank,
        requested: usize,
        available: usize,
    },
    #[error("Param sets exhausted: need up to slot {needed}, accelerator has {available}")]
    ParamSetsExhausted { needed: usize, available: usize },
    #[error("Transfer channels exhausted: need up to channel {needed}, engine has {available}")]
    ChannelsExhausted { needed: usize, available: usize },
    #[error("Hardware error during planning: {0}")]
    Hwa(#[from] HwaError),
}

/// 距离阶段配置错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RangeError {
    #[error("Invalid ADC sample count {0} (need at least 2)")]
    AdcSamples(u16),
    #[error("Range bins {bins} must be a power of two not smaller than {samples} ADC samples")]
    RangeBins { bins: u16, samples: u16 },
    #[error("Range FFT size {0} exceeds 2048")]
    FftTooLarge(u16),
    #[error("Unsupported antenna configuration: {rx} RX, {tx} TX")]
    Antennas { rx: u8, tx: u8 },
    #[error("ADC frame of {needed} bytes exceeds ADC buffer of {capacity} bytes")]
    AdcBuffer { needed: usize, capacity: usize },
    #[error("DC range signature bins [{negative}, {positive}] invalid for {bins} range bins")]
    DcSignatureBins {
        negative: i16,
        positive: i16,
        bins: u16,
    },
    #[error("DC range signature cannot be combined with cube compression")]
    DcSignatureWithCompression,
    #[error("DC range signature needs at least one averaging frame")]
    DcSignatureFrames,
    #[error("Range stage used before configure")]
    NotConfigured,
    #[error("Accelerator error: {0}")]
    Hwa(#[from] HwaError),
}

/// 多普勒阶段配置错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DopplerError {
    #[error("Doppler bins {bins} must be a power of two not smaller than {chirps} chirps")]
    DopplerBins { bins: u16, chirps: u16 },
    #[error("Doppler FFT size {0} exceeds 1024")]
    FftTooLarge(u16),
    #[error("Doppler CFAR window {win} must be a non-zero power of two")]
    CfarWindow { win: u8 },
    #[error("Doppler CFAR window {win} + guard {guard} does not fit {bins} bins")]
    CfarSpan { win: u8, guard: u8, bins: u16 },
    #[error("Doppler CFAR cannot be disabled")]
    CfarDisabled,
    #[error("Negative Doppler CFAR threshold {0} dB")]
    Threshold(f32),
    #[error("Compression ratio {ratio} leaves {mantissa_bits} mantissa bits")]
    CompressionRatio { ratio: f32, mantissa_bits: usize },
    #[error("Invalid range field of view [{min_m}, {max_m}] m")]
    FovRange { min_m: f32, max_m: f32 },
    #[error("Doppler stage used before configure")]
    NotConfigured,
    #[error("Accelerator error: {0}")]
    Hwa(#[from] HwaError),
}

/// 距离 CFAR 阶段配置错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CfarError {
    #[error("Range CFAR window {win} must be a non-zero power of two")]
    Window { win: u8 },
    #[error("Range CFAR window {win} + guard {guard} must stay below half of {bins} bins")]
    Span { win: u8, guard: u8, bins: u16 },
    #[error("Negative range CFAR threshold {0} dB")]
    Threshold(f32),
    #[error("Range CFAR stage used before configure")]
    NotConfigured,
    #[error("Accelerator error: {0}")]
    Hwa(#[from] HwaError),
}

/// AoA 配置错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AoaError {
    #[error("AoA FFT size {0} must be a power of two in 16..=256")]
    FftSize(u16),
    #[error("AoA FFT size {fft} smaller than {columns} azimuth columns")]
    Aperture { fft: u16, columns: usize },
    #[error("Antenna geometry has {geometry} entries, configuration has {virtual_antennas} virtual antennas")]
    Geometry {
        geometry: usize,
        virtual_antennas: usize,
    },
    #[error("Invalid azimuth field of view [{min_deg}, {max_deg}]")]
    FovAzimuth { min_deg: f32, max_deg: f32 },
    #[error("Invalid elevation field of view [{min_deg}, {max_deg}]")]
    FovElevation { min_deg: f32, max_deg: f32 },
    #[error("AoA estimator used before configure")]
    NotConfigured,
    #[error("Hardware error: {0}")]
    Hwa(#[from] HwaError),
}

/// 一致性违例（跨核协议失步，致命）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyViolation {
    #[error("Result exported for sub-frame {got}, but sub-frame {expected} is in flight")]
    ExportMismatch { expected: u8, got: u8 },
    #[error("Result exported for sub-frame {0} with nothing in flight")]
    ExportWithoutToken(u8),
    #[error("Frame {frame} started while a deferred frame start is already pending")]
    FrameOverrun { frame: u32 },
    #[error("Start requested while sub-frame {0} is still in flight")]
    StartWhileInFlight(u8),
    #[error("Start requested with active sub-frame {0} (must be 0)")]
    StartNotAtZero(u8),
}

impl ConsistencyViolation {
    pub fn code(&self) -> i32 {
        match self {
            ConsistencyViolation::ExportMismatch { .. } => -9001,
            ConsistencyViolation::ExportWithoutToken(_) => -9002,
            ConsistencyViolation::FrameOverrun { .. } => -9003,
            ConsistencyViolation::StartWhileInFlight(_) => -9004,
            ConsistencyViolation::StartNotAtZero(_) => -9005,
        }
    }
}

/// 数据通路统一错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DpcError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Planner error: {0}")]
    Planner(#[from] PlannerError),
    #[error("Range stage error: {0}")]
    Range(#[from] RangeError),
    #[error("Doppler stage error: {0}")]
    Doppler(#[from] DopplerError),
    #[error("Range CFAR stage error: {0}")]
    Cfar(#[from] CfarError),
    #[error("AoA error: {0}")]
    Aoa(#[from] AoaError),
    #[error("Hardware error: {0}")]
    Hwa(#[from] HwaError),
    /// 操作在当前状态下不允许
    #[error("Operation {op} not allowed in state {state}")]
    InvalidState { op: &'static str, state: &'static str },
    #[error("Sub-frame {index} out of range ({configured} configured)")]
    InvalidSubFrame { index: u8, configured: u8 },
    #[error("Sub-frame {0} not configured")]
    SubFrameNotConfigured(u8),
    #[error("Common configuration missing")]
    CommonNotConfigured,
    #[error("Dynamic change would alter the memory layout of sub-frame {0}")]
    DynamicLayoutChange(u8),
    /// 致命一致性违例，实例已停机
    #[error("Fatal consistency violation: {0}")]
    Fatal(ConsistencyViolation),
    #[error("Instance halted after a fatal error")]
    Halted,
}

impl DpcError {
    /// 稳定的负数错误码
    pub fn code(&self) -> i32 {
        match self {
            DpcError::Config(e) => match e {
                ConfigError::InvalidSubframeCount { .. } => -101,
                ConfigError::EmptyGeometry => -102,
                ConfigError::TooManyAntennas { .. } => -103,
                ConfigError::InvalidAntennaRow { .. } => -104,
                ConfigError::InvalidAntennaColumn { .. } => -105,
                ConfigError::TooManyCoefficients { .. } => -106,
                ConfigError::InvalidMeasurementWindow { .. } => -107,
            },
            DpcError::Protocol(_) => -200,
            DpcError::Range(e) => match e {
                RangeError::AdcSamples(_) => -1001,
                RangeError::RangeBins { .. } => -1002,
                RangeError::FftTooLarge(_) => -1003,
                RangeError::Antennas { .. } => -1004,
                RangeError::AdcBuffer { .. } => -1005,
                RangeError::DcSignatureBins { .. } => -1006,
                RangeError::DcSignatureWithCompression => -1007,
                RangeError::DcSignatureFrames => -1008,
                RangeError::NotConfigured => -1098,
                RangeError::Hwa(_) => -1099,
            },
            DpcError::Doppler(e) => match e {
                DopplerError::DopplerBins { .. } => -2001,
                DopplerError::FftTooLarge(_) => -2002,
                DopplerError::CfarWindow { .. } => -2003,
                DopplerError::CfarSpan { .. } => -2004,
                DopplerError::CfarDisabled => -2005,
                DopplerError::Threshold(_) => -2006,
                DopplerError::CompressionRatio { .. } => -2007,
                DopplerError::FovRange { .. } => -2008,
                DopplerError::NotConfigured => -2098,
                DopplerError::Hwa(_) => -2099,
            },
            DpcError::Cfar(e) => match e {
                CfarError::Window { .. } => -3001,
                CfarError::Span { .. } => -3002,
                CfarError::Threshold(_) => -3003,
                CfarError::NotConfigured => -3098,
                CfarError::Hwa(_) => -3099,
            },
            DpcError::Aoa(e) => match e {
                AoaError::FftSize(_) => -4001,
                AoaError::Aperture { .. } => -4002,
                AoaError::Geometry { .. } => -4003,
                AoaError::FovAzimuth { .. } => -4004,
                AoaError::FovElevation { .. } => -4005,
                AoaError::NotConfigured => -4098,
                AoaError::Hwa(_) => -4099,
            },
            DpcError::Planner(e) => match e {
                PlannerError::OutOfMemory { class, .. } => -5000 - class.ordinal(),
                PlannerError::ParamSetsExhausted { .. } => -5100,
                PlannerError::ChannelsExhausted { .. } => -5101,
                PlannerError::Hwa(_) => -5199,
            },
            DpcError::Hwa(_) => -6000,
            DpcError::InvalidState { .. } => -7001,
            DpcError::InvalidSubFrame { .. } => -7002,
            DpcError::SubFrameNotConfigured(_) => -7003,
            DpcError::CommonNotConfigured => -7004,
            DpcError::DynamicLayoutChange(_) => -7005,
            DpcError::Fatal(v) => v.code(),
            DpcError::Halted => -9999,
        }
    }

    /// 是否为致命错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, DpcError::Fatal(_) | DpcError::Halted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_memory_codes_are_distinct() {
        let classes = [
            BufferClass::PhaseTable,
            BufferClass::RadarCube,
            BufferClass::DetMatrix,
            BufferClass::RangeWindow,
            BufferClass::CfarList,
            BufferClass::CfarScratch,
            BufferClass::DopplerWindow,
            BufferClass::DopplerScratch,
            BufferClass::Decompression,
            BufferClass::ObjectList,
            BufferClass::PointCloud,
            BufferClass::SideInfo,
        ];
        let mut codes: Vec<i32> = classes
            .iter()
            .map(|&class| {
                DpcError::Planner(PlannerError::OutOfMemory {
                    class,
                    bank: Bank::Local,
                    requested: 1,
                    available: 0,
                })
                .code()
            })
            .collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), classes.len());
        assert!(codes.iter().all(|&c| c < -5000 && c > -5100));
    }

    #[test]
    fn test_dpc_error_display() {
        let err = DpcError::Fatal(ConsistencyViolation::ExportMismatch {
            expected: 0,
            got: 1,
        });
        let msg = format!("{}", err);
        assert!(msg.contains("sub-frame 1"), "message: {}", msg);
        assert_eq!(err.code(), -9001);
        assert!(err.is_fatal());

        let err: DpcError = RangeError::AdcSamples(1).into();
        assert_eq!(err.code(), -1001);
        assert!(!err.is_fatal());
    }
}
