//! 雷达立方体块浮点（BFP）压缩
//!
//! 每个块包含 `num_ant` 个复数样本（`2 * num_ant` 个 i16），压缩为：
//!
//! ```text
//! byte 0      : 共享指数 e（低 4 位）
//! byte 1..    : 2 * num_ant 个 m 位补码尾数，LSB 优先紧密排列
//! ```
//!
//! `m = floor((8 * block_bytes - 8) / (2 * num_ant))`，最大 16。

use crate::HwaError;
use objdet_protocol::Cmplx16;

/// 块浮点编解码器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCodec {
    num_ant: usize,
    block_bytes: usize,
    mantissa_bits: u32,
}

impl BlockCodec {
    pub fn new(num_ant: usize, block_bytes: usize) -> Result<Self, HwaError> {
        let values = 2 * num_ant;
        let mantissa_bits = if values == 0 || block_bytes == 0 {
            0
        } else {
            ((8 * block_bytes - 8) / values).min(16)
        };
        if mantissa_bits < 2 {
            return Err(HwaError::InvalidCompression {
                block_bytes,
                num_ant,
                mantissa_bits,
            });
        }
        Ok(Self {
            num_ant,
            block_bytes,
            mantissa_bits: mantissa_bits as u32,
        })
    }

    pub fn num_ant(&self) -> usize {
        self.num_ant
    }

    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    pub fn mantissa_bits(&self) -> u32 {
        self.mantissa_bits
    }

    /// 压缩一个块；`samples.len() == num_ant`，`out.len() == block_bytes`
    pub fn encode(&self, samples: &[Cmplx16], out: &mut [u8]) {
        let m = self.mantissa_bits;
        let lo = -(1i32 << (m - 1));
        let hi = (1i32 << (m - 1)) - 1;
        let values = samples.iter().flat_map(|s| [s.re as i32, s.im as i32]);

        let exponent = (0..=15u32)
            .find(|&e| values.clone().all(|v| (lo..=hi).contains(&(v >> e))))
            .unwrap_or(15);

        out.fill(0);
        out[0] = exponent as u8;
        let mask = (1u32 << m) - 1;
        let mut bit = 0usize;
        for v in values {
            let q = ((v >> exponent) as u32) & mask;
            put_bits(&mut out[1..], bit, q, m);
            bit += m as usize;
        }
    }

    /// 解压一个块，按量化区间中点重建
    pub fn decode(&self, input: &[u8], out: &mut [Cmplx16]) {
        let m = self.mantissa_bits;
        let exponent = (input[0] & 0x0F) as u32;
        let half = if exponent > 0 { 1i32 << (exponent - 1) } else { 0 };
        let mut bit = 0usize;
        let mut next = || {
            let raw = get_bits(&input[1..], bit, m);
            bit += m as usize;
            // 符号扩展
            let shift = 32 - m;
            let q = ((raw << shift) as i32) >> shift;
            ((q << exponent) + half).clamp(i16::MIN as i32, i16::MAX as i32) as i16
        };
        for s in out.iter_mut().take(self.num_ant) {
            let re = next();
            let im = next();
            *s = Cmplx16::new(re, im);
        }
    }
}

fn put_bits(buf: &mut [u8], start: usize, value: u32, bits: u32) {
    for i in 0..bits as usize {
        if (value >> i) & 1 == 1 {
            let pos = start + i;
            buf[pos / 8] |= 1 << (pos % 8);
        }
    }
}

fn get_bits(buf: &[u8], start: usize, bits: u32) -> u32 {
    let mut value = 0u32;
    for i in 0..bits as usize {
        let pos = start + i;
        if (buf[pos / 8] >> (pos % 8)) & 1 == 1 {
            value |= 1 << i;
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mantissa_bits() {
        assert_eq!(BlockCodec::new(8, 16).unwrap().mantissa_bits(), 7);
        assert_eq!(BlockCodec::new(4, 16).unwrap().mantissa_bits(), 15);
        assert_eq!(BlockCodec::new(4, 64).unwrap().mantissa_bits(), 16);
        assert!(matches!(
            BlockCodec::new(12, 4),
            Err(HwaError::InvalidCompression { mantissa_bits: 1, .. })
        ));
    }

    #[test]
    fn test_error_bounded_by_exponent() {
        let codec = BlockCodec::new(8, 16).unwrap();
        let samples: Vec<Cmplx16> = (0..8)
            .map(|i| Cmplx16::new(4000 - 1000 * i, -123 * i))
            .collect();
        let mut packed = vec![0u8; 16];
        codec.encode(&samples, &mut packed);
        let exponent = packed[0] as i32;
        // 4000 需要 7 位尾数下的右移 6 位
        assert_eq!(exponent, 6);

        let mut out = vec![Cmplx16::ZERO; 8];
        codec.decode(&packed, &mut out);
        let tolerance = 1i32 << exponent;
        for (a, b) in samples.iter().zip(&out) {
            assert!((a.re as i32 - b.re as i32).abs() <= tolerance);
            assert!((a.im as i32 - b.im as i32).abs() <= tolerance);
        }
    }

    #[test]
    fn test_zero_block_is_exact() {
        let codec = BlockCodec::new(4, 8).unwrap();
        let mut packed = vec![0xFFu8; 8];
        codec.encode(&[Cmplx16::ZERO; 4], &mut packed);
        let mut out = vec![Cmplx16::new(1, 1); 4];
        codec.decode(&packed, &mut out);
        assert!(out.iter().all(|s| *s == Cmplx16::ZERO));
    }
}
