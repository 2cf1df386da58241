//! FFT 计划缓存与定点转换

use num_complex::Complex32;
use objdet_protocol::{Cmplx16, LOG2_ONE, WINDOW_FRAC_BITS, saturate_i16};
use rustfft::{Fft, FftPlanner};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 按点数缓存的前向 FFT
pub struct FftBank {
    planner: FftPlanner<f32>,
    plans: HashMap<usize, Arc<dyn Fft<f32>>>,
    scratch: Vec<Complex32>,
}

impl fmt::Debug for FftBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sizes: Vec<_> = self.plans.keys().copied().collect();
        sizes.sort_unstable();
        f.debug_struct("FftBank").field("sizes", &sizes).finish()
    }
}

impl Default for FftBank {
    fn default() -> Self {
        Self::new()
    }
}

impl FftBank {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            plans: HashMap::new(),
            scratch: Vec::new(),
        }
    }

    /// 原地前向 FFT，点数为 `buf.len()`
    pub fn forward(&mut self, buf: &mut [Complex32]) {
        let n = buf.len();
        if n == 0 {
            return;
        }
        let plan = self
            .plans
            .entry(n)
            .or_insert_with(|| self.planner.plan_fft_forward(n))
            .clone();
        let scratch_len = plan.get_inplace_scratch_len();
        if self.scratch.len() < scratch_len {
            self.scratch.resize(scratch_len, Complex32::new(0.0, 0.0));
        }
        plan.process_with_scratch(buf, &mut self.scratch[..scratch_len]);
    }
}

const WINDOW_SCALE: f32 = (1u32 << WINDOW_FRAC_BITS) as f32;

/// 定点样本乘以 Q15 窗系数
#[inline]
pub fn windowed(sample: Cmplx16, coeff: u16) -> Complex32 {
    let w = coeff as f32 / WINDOW_SCALE;
    Complex32::new(sample.re as f32 * w, sample.im as f32 * w)
}

/// 右移 `shift` 位后饱和为 16 位定点
#[inline]
pub fn quantize(value: Complex32, shift: u8) -> Cmplx16 {
    let scale = 1.0 / (1u32 << shift) as f32;
    Cmplx16::new(saturate_i16(value.re * scale), saturate_i16(value.im * scale))
}

#[inline]
pub fn to_complex(sample: Cmplx16) -> Complex32 {
    Complex32::new(sample.re as f32, sample.im as f32)
}

#[inline]
pub fn magnitude(sample: Cmplx16) -> f32 {
    to_complex(sample).norm()
}

/// Q11 `log2(1 + magnitude_sum)`
#[inline]
pub fn log2_q11(magnitude_sum: f32) -> u16 {
    let value = ((1.0 + magnitude_sum.max(0.0)).log2() * LOG2_ONE).round();
    value.clamp(0.0, u16::MAX as f32) as u16
}
