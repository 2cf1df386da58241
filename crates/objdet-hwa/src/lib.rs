//! # ObjDet Hardware Abstraction Layer
//!
//! 数据通路的硬件抽象层：片上内存区、加速器（HWA）、传输引擎（EDMA）与 ADC 数据源。
//!
//! 所有硬件都位于 trait 之后，[`soft`] 模块提供完整的软件后端，
//! 使整条流水线可以在主机上运行和测试。

use thiserror::Error;

pub mod mem;
pub mod paramset;
pub mod scene;
pub mod soft;
pub mod transfer;

pub use mem::{Bank, MemPool, MemRegion, MemoryMap, PoolMark};
pub use paramset::{
    CfarParams, DecompressParams, DopplerFftParams, HwaStatus, ParamSet, RangeFftParams,
    fft_scale_shift,
};
pub use scene::{SceneSource, SceneTarget};
pub use soft::{SoftEdma, SoftHwa};
pub use transfer::{FlatPart, MAX_ACNT, TransferRequest, TransferShape};

use objdet_protocol::{AntennaGeometry, StaticConfig};

/// 硬件抽象层统一错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HwaError {
    #[error("Out of bounds: {bank:?} offset {offset} len {len} (limit {limit})")]
    OutOfBounds {
        bank: Bank,
        offset: usize,
        len: usize,
        limit: usize,
    },
    #[error("Invalid pool mark for {bank:?} at offset {offset}")]
    InvalidMark { bank: Bank, offset: usize },
    #[error("Param set index {index} out of range (have {max})")]
    ParamSetOutOfRange { index: usize, max: usize },
    #[error("Param set slot {0} is empty")]
    EmptyParamSet(usize),
    #[error("Accelerator triggered while not armed")]
    NotArmed,
    #[error("Accelerator awaited without a trigger")]
    NotTriggered,
    #[error("Transfer channel {channel} out of range (have {max})")]
    ChannelOutOfRange { channel: u8, max: usize },
    #[error("Transfer channel {0} not configured")]
    ChannelNotConfigured(u8),
    #[error("Transfer channel {0} awaited without a start")]
    TransferNotStarted(u8),
    #[error("Transfer chain loops back to channel {0}")]
    ChainLoop(u8),
    #[error("Flat transfer of {0} bytes cannot be expressed")]
    TransferTooLarge(usize),
    #[error("Invalid parameter set: {0}")]
    InvalidParamSet(&'static str),
    #[error("Compression block of {block_bytes} bytes for {num_ant} antennas leaves {mantissa_bits} mantissa bits")]
    InvalidCompression {
        block_bytes: usize,
        num_ant: usize,
        mantissa_bits: usize,
    },
    #[error("ADC capture failed: {0}")]
    Capture(String),
}

/// 信号处理加速器
///
/// 参数集按槽位编号保存；`arm` 选中一段连续槽位，`trigger` 依次执行。
pub trait Accelerator {
    fn num_param_sets(&self) -> usize;
    fn set_param_set(&mut self, index: usize, ps: ParamSet) -> Result<(), HwaError>;
    fn param_set(&self, index: usize) -> Option<&ParamSet>;
    fn arm(&mut self, first: usize, count: usize) -> Result<(), HwaError>;
    /// 当前已装载的槽位段
    fn armed(&self) -> Option<(usize, usize)>;
    fn trigger(&mut self, mem: &mut MemoryMap) -> Result<(), HwaError>;
    fn is_done(&self) -> bool;
    fn wait_done(&mut self) -> Result<HwaStatus, HwaError>;
}

/// 内存传输引擎
pub trait TransferEngine {
    fn num_channels(&self) -> usize;
    fn configure(&mut self, ch: u8, req: TransferRequest) -> Result<(), HwaError>;
    /// 保持形状，只替换源和目的区
    fn retarget(&mut self, ch: u8, src: MemRegion, dst: MemRegion) -> Result<(), HwaError>;
    fn start(&mut self, ch: u8, mem: &mut MemoryMap) -> Result<(), HwaError>;
    fn is_done(&self, ch: u8) -> bool;
    fn wait(&mut self, ch: u8) -> Result<(), HwaError>;
}

/// ADC 数据源
///
/// 每次帧起始时把一帧 `[chirp][rx][sample]` 复数样本写入 ADC 缓冲区。
pub trait AdcSource {
    fn capture(
        &mut self,
        sub_frame: u8,
        cfg: &StaticConfig,
        geometry: &AntennaGeometry,
        adc: &mut [u8],
    ) -> Result<(), HwaError>;
}

impl<T: AdcSource + ?Sized> AdcSource for Box<T> {
    fn capture(
        &mut self,
        sub_frame: u8,
        cfg: &StaticConfig,
        geometry: &AntennaGeometry,
        adc: &mut [u8],
    ) -> Result<(), HwaError> {
        (**self).capture(sub_frame, cfg, geometry, adc)
    }
}
