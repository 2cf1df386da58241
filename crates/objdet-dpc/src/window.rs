//! FFT 窗函数生成
//!
//! 采用周期（DFT-even）形式 `w[n] = f(2πn/N)`，量化为 Q15，1.0 饱和为 32767。
//! 长度不超过 [`RECT_WINDOW_MAX_LEN`] 的锥形窗退化为矩形窗。

use objdet_protocol::WindowType;
use objdet_protocol::constants::WINDOW_FRAC_BITS;
use std::f64::consts::PI;

/// 点数不超过此值时改用矩形窗
pub const RECT_WINDOW_MAX_LEN: usize = 4;

const Q15_MAX: f64 = 32767.0;

/// 生成 `len` 点 Q15 窗系数
pub fn generate(kind: WindowType, len: usize) -> Vec<u16> {
    let kind = if len <= RECT_WINDOW_MAX_LEN {
        WindowType::Rectangular
    } else {
        kind
    };
    let scale = f64::from(1u32 << WINDOW_FRAC_BITS);
    (0..len)
        .map(|n| {
            let x = 2.0 * PI * n as f64 / len as f64;
            let w = match kind {
                WindowType::Rectangular => 1.0,
                WindowType::Hann => 0.5 - 0.5 * x.cos(),
                WindowType::Hamming => 0.54 - 0.46 * x.cos(),
                WindowType::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
            };
            (w * scale).round().clamp(0.0, Q15_MAX) as u16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangular() {
        assert_eq!(generate(WindowType::Rectangular, 3), vec![32767; 3]);
    }

    #[test]
    fn test_short_window_degenerates() {
        assert_eq!(generate(WindowType::Hann, 4), vec![32767; 4]);
        assert_ne!(generate(WindowType::Hann, 8)[0], 32767);
    }

    #[test]
    fn test_hann_periodic() {
        let w = generate(WindowType::Hann, 16);
        assert_eq!(w[0], 0);
        assert_eq!(w[8], 32767);
        // 周期窗关于 N/2 对称
        for n in 1..8 {
            assert_eq!(w[n], w[16 - n]);
        }
    }

    #[test]
    fn test_blackman_and_hamming_edges() {
        let b = generate(WindowType::Blackman, 64);
        assert!(b[0] < 4);
        let h = generate(WindowType::Hamming, 64);
        assert_eq!(h[0], (0.08f64 * 32768.0).round() as u16);
    }
}
