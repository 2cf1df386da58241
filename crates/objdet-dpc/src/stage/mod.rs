//! 流水线阶段
//!
//! 每个阶段分为三部分：
//! - 配置期 `configure()`：校验参数、写入窗函数、装载参数集和传输通道
//! - 运行期 `run()`：每帧执行一次
//! - 控制 `control()`：预触发等带外操作
//!
//! 阶段不持有硬件，通过 [`HwCtx`] 借用加速器、传输引擎与内存。

pub mod cfar;
pub mod doppler;
pub mod range;

pub use cfar::{CfarOutput, CfarStage};
pub use doppler::{DopplerOutput, DopplerStage};
pub use range::{RangeOutput, RangeStage};

use objdet_hwa::{Accelerator, HwaError, HwaStatus, MemoryMap, TransferEngine};

/// 一次阶段调用期间借用的硬件
pub struct HwCtx<'a, A: ?Sized, E: ?Sized> {
    pub hwa: &'a mut A,
    pub edma: &'a mut E,
    pub mem: &'a mut MemoryMap,
}

impl<'a, A, E> HwCtx<'a, A, E>
where
    A: Accelerator + ?Sized,
    E: TransferEngine + ?Sized,
{
    pub fn new(hwa: &'a mut A, edma: &'a mut E, mem: &'a mut MemoryMap) -> Self {
        Self { hwa, edma, mem }
    }

    /// 装载、触发并等待一段参数集
    pub(crate) fn run_param_sets(&mut self, first: usize, count: usize) -> Result<HwaStatus, HwaError> {
        self.hwa.arm(first, count)?;
        self.hwa.trigger(self.mem)?;
        self.hwa.wait_done()
    }

    /// 启动一个传输通道并等待完成
    pub(crate) fn transfer(&mut self, ch: u8) -> Result<(), HwaError> {
        self.edma.start(ch, self.mem)?;
        self.edma.wait(ch)
    }
}

/// 阶段控制命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageControl {
    /// 提前装载参数集，等待数据到达
    PreTrigger,
    /// 丢弃直流距离特征的累计结果，重新标定
    ResetDcCalibration,
}
