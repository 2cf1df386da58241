//! 加速器参数集
//!
//! 每个参数集描述一次加速器操作：输入/输出区、点数、缩放与检测门限。

use crate::mem::MemRegion;
use objdet_protocol::CfarAveraging;

/// FFT 输出缩放位数：`ceil(log2(n) / 2)`
///
/// 256 点 FFT 右移 4 位，16 点右移 2 位。
pub fn fft_scale_shift(n: usize) -> u8 {
    if n <= 1 {
        return 0;
    }
    let log2 = usize::BITS - (n - 1).leading_zeros();
    log2.div_ceil(2) as u8
}

/// 距离 FFT
///
/// 输入 ADC 区 `[chirp][rx][sample]`，输出雷达立方体 `[bin][doppler chirp][ant]`。
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFftParams {
    pub adc: MemRegion,
    pub window: MemRegion,
    pub cube: MemRegion,
    pub num_adc_samples: u16,
    pub fft_size: u16,
    pub num_rx: u8,
    pub num_tx: u8,
    pub num_doppler_chirps: u16,
    pub scale_shift: u8,
    /// 压缩后每个天线块的字节数（`None` 表示不压缩）
    pub compressed_block_bytes: Option<u16>,
}

/// 解压缩一段雷达立方体
#[derive(Debug, Clone, PartialEq)]
pub struct DecompressParams {
    pub src: MemRegion,
    pub dst: MemRegion,
    pub num_blocks: u16,
    pub num_ant: u8,
    pub block_bytes: u16,
}

/// 多普勒 FFT + 检测行
#[derive(Debug, Clone, PartialEq)]
pub struct DopplerFftParams {
    /// `[chirp][ant]` 复数样本
    pub input: MemRegion,
    pub window: MemRegion,
    /// `[doppler][ant]` 复数样本
    pub output: MemRegion,
    /// `[doppler]` Q11 `log2(1 + Σ|X|)`
    pub det_row: MemRegion,
    pub num_chirps: u16,
    pub fft_size: u16,
    pub num_ant: u8,
    pub scale_shift: u8,
}

/// CFAR 检测
#[derive(Debug, Clone, PartialEq)]
pub struct CfarParams {
    /// `u16` log2 幅度
    pub input: MemRegion,
    /// `(cell u16, noise u16)` 检测结果
    pub output: MemRegion,
    pub num_cells: u16,
    pub averaging: CfarAveraging,
    pub win_len: u8,
    pub guard_len: u8,
    /// Q11 log2 门限
    pub threshold: u16,
    /// 是否循环处理边界
    pub cyclic: bool,
}

impl CfarParams {
    /// 输出区可容纳的检测数
    pub fn max_hits(&self) -> usize {
        self.output.len() / 4
    }
}

/// 一个参数集槽位的内容
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSet {
    RangeFft(RangeFftParams),
    Decompress(DecompressParams),
    DopplerFft(DopplerFftParams),
    Cfar(CfarParams),
}

impl ParamSet {
    pub fn name(&self) -> &'static str {
        match self {
            ParamSet::RangeFft(_) => "range_fft",
            ParamSet::Decompress(_) => "decompress",
            ParamSet::DopplerFft(_) => "doppler_fft",
            ParamSet::Cfar(_) => "cfar",
        }
    }
}

/// 一次触发的执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HwaStatus {
    pub param_sets_run: usize,
    pub cfar_hits: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fft_scale_shift() {
        assert_eq!(fft_scale_shift(256), 4);
        assert_eq!(fft_scale_shift(16), 2);
        assert_eq!(fft_scale_shift(32), 3);
        assert_eq!(fft_scale_shift(1024), 5);
        assert_eq!(fft_scale_shift(1), 0);
    }
}
