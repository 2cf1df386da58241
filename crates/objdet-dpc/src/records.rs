//! 目标记录的字节布局
//!
//! 原始目标记录（`8 + 4A` 字节，小端）：
//!
//! ```text
//! 0  range_idx  u16
//! 2  doppler    i16   有符号（折叠后）
//! 4  peak       u16   Q11 log2
//! 6  noise      u16   Q11 log2
//! 8  A × Cmplx16      多普勒 FFT 输出（虚拟天线顺序）
//! ```
//!
//! 距离 CFAR 记录（6 字节）：`range u16, doppler u16, noise u16`。

use bytes::{Buf, BufMut};
use objdet_hwa::{HwaError, MemRegion, MemoryMap};
use objdet_protocol::Cmplx16;
use objdet_protocol::constants::{CFAR_RECORD_BYTES, MAX_VIRTUAL_ANTENNAS, RAW_OBJ_HEADER_BYTES};
use smallvec::SmallVec;

/// 原始目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObj {
    pub range_idx: u16,
    pub doppler_idx: i16,
    pub peak: u16,
    pub noise: u16,
    pub samples: SmallVec<[Cmplx16; MAX_VIRTUAL_ANTENNAS]>,
}

impl RawObj {
    /// 记录长度
    pub fn record_bytes(&self) -> usize {
        RAW_OBJ_HEADER_BYTES + self.samples.len() * Cmplx16::SIZE
    }

    /// 无符号多普勒单元
    pub fn doppler_bin(&self, num_doppler_bins: u16) -> u16 {
        unfold_doppler(self.doppler_idx, num_doppler_bins)
    }

    pub fn encode(&self, mut out: &mut [u8]) {
        out.put_u16_le(self.range_idx);
        out.put_i16_le(self.doppler_idx);
        out.put_u16_le(self.peak);
        out.put_u16_le(self.noise);
        for s in &self.samples {
            out.put_i16_le(s.re);
            out.put_i16_le(s.im);
        }
    }

    pub fn decode(mut buf: &[u8], num_ant: usize) -> Self {
        let range_idx = buf.get_u16_le();
        let doppler_idx = buf.get_i16_le();
        let peak = buf.get_u16_le();
        let noise = buf.get_u16_le();
        let samples = (0..num_ant)
            .map(|_| {
                let re = buf.get_i16_le();
                let im = buf.get_i16_le();
                Cmplx16::new(re, im)
            })
            .collect();
        Self {
            range_idx,
            doppler_idx,
            peak,
            noise,
            samples,
        }
    }

    /// 只读取键 `(range, doppler)`
    pub fn peek_key(buf: &[u8]) -> (u16, i16) {
        let mut b = buf;
        (b.get_u16_le(), b.get_i16_le())
    }
}

/// 距离 CFAR 目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfarObj {
    pub range_idx: u16,
    pub doppler_idx: u16,
    pub noise: u16,
}

impl CfarObj {
    pub fn encode(&self, mut out: &mut [u8]) {
        out.put_u16_le(self.range_idx);
        out.put_u16_le(self.doppler_idx);
        out.put_u16_le(self.noise);
    }

    pub fn decode(mut buf: &[u8]) -> Self {
        Self {
            range_idx: buf.get_u16_le(),
            doppler_idx: buf.get_u16_le(),
            noise: buf.get_u16_le(),
        }
    }
}

/// 多普勒单元折叠为有符号索引：`d >= N/2` 时为 `d - N`
pub fn fold_doppler(bin: u16, num_doppler_bins: u16) -> i16 {
    if bin >= num_doppler_bins / 2 {
        (bin as i32 - num_doppler_bins as i32) as i16
    } else {
        bin as i16
    }
}

pub fn unfold_doppler(idx: i16, num_doppler_bins: u16) -> u16 {
    (idx as i32).rem_euclid(num_doppler_bins as i32) as u16
}

/// 列表区域中第 `index` 条原始记录
pub fn read_raw(
    mem: &MemoryMap,
    list: MemRegion,
    index: usize,
    num_ant: usize,
) -> Result<RawObj, HwaError> {
    let rec = RAW_OBJ_HEADER_BYTES + num_ant * Cmplx16::SIZE;
    let bytes = mem.bytes(list.element(index, rec)?)?;
    Ok(RawObj::decode(bytes, num_ant))
}

pub fn write_raw(
    mem: &mut MemoryMap,
    list: MemRegion,
    index: usize,
    obj: &RawObj,
) -> Result<(), HwaError> {
    let rec = obj.record_bytes();
    let bytes = mem.bytes_mut(list.element(index, rec)?)?;
    obj.encode(bytes);
    Ok(())
}

pub fn read_cfar(mem: &MemoryMap, list: MemRegion, index: usize) -> Result<CfarObj, HwaError> {
    let bytes = mem.bytes(list.element(index, CFAR_RECORD_BYTES)?)?;
    Ok(CfarObj::decode(bytes))
}

pub fn write_cfar(
    mem: &mut MemoryMap,
    list: MemRegion,
    index: usize,
    obj: &CfarObj,
) -> Result<(), HwaError> {
    let bytes = mem.bytes_mut(list.element(index, CFAR_RECORD_BYTES)?)?;
    obj.encode(bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use objdet_hwa::Bank;
    use smallvec::smallvec;

    #[test]
    fn test_raw_layout() {
        let obj = RawObj {
            range_idx: 0x0102,
            doppler_idx: -2,
            peak: 7,
            noise: 9,
            samples: smallvec![Cmplx16::new(1, -1), Cmplx16::new(300, 0)],
        };
        let mut buf = vec![0u8; obj.record_bytes()];
        obj.encode(&mut buf);
        assert_eq!(&buf[..8], &[0x02, 0x01, 0xFE, 0xFF, 7, 0, 9, 0]);
        assert_eq!(&buf[8..12], &[1, 0, 0xFF, 0xFF]);
        assert_eq!(RawObj::decode(&buf, 2), obj);
        assert_eq!(RawObj::peek_key(&buf), (0x0102, -2));
    }

    #[test]
    fn test_fold_doppler() {
        assert_eq!(fold_doppler(0, 16), 0);
        assert_eq!(fold_doppler(7, 16), 7);
        assert_eq!(fold_doppler(8, 16), -8);
        assert_eq!(fold_doppler(15, 16), -1);
        assert_eq!(unfold_doppler(-1, 16), 15);
        assert_eq!(unfold_doppler(3, 16), 3);
    }

    #[test]
    fn test_list_access_bounds() {
        let mut mem = MemoryMap::new(0, 0, 64, 0);
        let list = mem.pool_mut(Bank::Local).unwrap().alloc(18, 2).unwrap();
        let cfar = CfarObj {
            range_idx: 5,
            doppler_idx: 1,
            noise: 30,
        };
        write_cfar(&mut mem, list, 2, &cfar).unwrap();
        assert_eq!(read_cfar(&mem, list, 2).unwrap(), cfar);
        assert!(matches!(
            read_cfar(&mem, list, 3),
            Err(HwaError::OutOfBounds { .. })
        ));
    }
}
