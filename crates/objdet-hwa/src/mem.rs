//! 片上内存区与 bump 分配器
//!
//! 三个可分配的内存区（窗口 RAM、本地快速 RAM、慢速大容量 RAM）各由一个
//! [`MemPool`] 管理，外加一个固定的 ADC 缓冲区。分配只前进不回收，
//! 只能整体 `reset` 或回退到保存的 [`PoolMark`]。
//!
//! 分配结果是带边界检查的句柄 [`MemRegion`]（内存区 + 偏移 + 长度），
//! 所有读写都经由 [`MemoryMap`] 完成。

use crate::HwaError;
use bytes::{Buf, BufMut};
use objdet_protocol::Cmplx16;

/// 内存区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bank {
    /// ADC 缓冲区（不可分配）
    Adc,
    /// 加速器窗口 RAM
    Window,
    /// 本地快速 RAM
    Local,
    /// 慢速大容量 RAM
    Slow,
}

impl Bank {
    pub const ALL: [Bank; 4] = [Bank::Adc, Bank::Window, Bank::Local, Bank::Slow];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Bank::Adc => 0,
            Bank::Window => 1,
            Bank::Local => 2,
            Bank::Slow => 3,
        }
    }
}

/// 内存区中的一段连续字节
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemRegion {
    bank: Bank,
    offset: usize,
    len: usize,
}

impl MemRegion {
    pub(crate) const fn new(bank: Bank, offset: usize, len: usize) -> Self {
        Self { bank, offset, len }
    }

    pub const fn bank(&self) -> Bank {
        self.bank
    }

    pub const fn offset(&self) -> usize {
        self.offset
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const fn end(&self) -> usize {
        self.offset + self.len
    }

    /// 子区间 `[offset, offset + len)`（相对本区起点）
    pub fn sub(&self, offset: usize, len: usize) -> Result<MemRegion, HwaError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(MemRegion::new(self.bank, self.offset + offset, len)),
            _ => Err(HwaError::OutOfBounds {
                bank: self.bank,
                offset: self.offset + offset,
                len,
                limit: self.end(),
            }),
        }
    }

    /// 第 `index` 个长度为 `stride` 的元素
    pub fn element(&self, index: usize, stride: usize) -> Result<MemRegion, HwaError> {
        self.sub(index * stride, stride)
    }

    /// 两个区是否重叠（不同内存区永不重叠）
    pub fn overlaps(&self, other: &MemRegion) -> bool {
        self.bank == other.bank
            && self.offset < other.end()
            && other.offset < self.end()
            && !self.is_empty()
            && !other.is_empty()
    }
}

/// 分配游标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolMark {
    bank: Bank,
    offset: usize,
}

impl PoolMark {
    pub const fn offset(&self) -> usize {
        self.offset
    }
}

/// bump 分配器
#[derive(Debug, Clone)]
pub struct MemPool {
    bank: Bank,
    capacity: usize,
    cursor: usize,
    max_usage: usize,
}

impl MemPool {
    pub fn new(bank: Bank, capacity: usize) -> Self {
        Self {
            bank,
            capacity,
            cursor: 0,
            max_usage: 0,
        }
    }

    pub fn bank(&self) -> Bank {
        self.bank
    }

    /// 游标回到起点（历史最高水位保留）
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// 分配 `size` 字节，起点按 `align`（2 的幂）对齐
    ///
    /// 超出容量时返回 `None`，游标不变。
    pub fn alloc(&mut self, size: usize, align: usize) -> Option<MemRegion> {
        if !align.is_power_of_two() {
            return None;
        }
        let start = self.cursor.checked_next_multiple_of(align)?;
        let end = start.checked_add(size)?;
        if end > self.capacity {
            return None;
        }
        self.cursor = end;
        self.max_usage = self.max_usage.max(end);
        Some(MemRegion::new(self.bank, start, size))
    }

    pub fn mark(&self) -> PoolMark {
        PoolMark {
            bank: self.bank,
            offset: self.cursor,
        }
    }

    /// 回到保存的游标位置（允许向前跳到较晚的快照）
    pub fn rewind(&mut self, mark: PoolMark) -> Result<(), HwaError> {
        if mark.bank != self.bank || mark.offset > self.capacity {
            return Err(HwaError::InvalidMark {
                bank: mark.bank,
                offset: mark.offset,
            });
        }
        self.cursor = mark.offset;
        self.max_usage = self.max_usage.max(mark.offset);
        Ok(())
    }

    /// 自创建以来的最高水位
    pub fn max_usage(&self) -> usize {
        self.max_usage
    }

    pub fn used(&self) -> usize {
        self.cursor
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free(&self) -> usize {
        self.capacity - self.cursor
    }
}

/// 全部内存区的存储与分配器
#[derive(Debug)]
pub struct MemoryMap {
    storage: [Vec<u8>; 4],
    window: MemPool,
    local: MemPool,
    slow: MemPool,
}

impl MemoryMap {
    pub fn new(adc: usize, window: usize, local: usize, slow: usize) -> Self {
        Self {
            storage: [vec![0; adc], vec![0; window], vec![0; local], vec![0; slow]],
            window: MemPool::new(Bank::Window, window),
            local: MemPool::new(Bank::Local, local),
            slow: MemPool::new(Bank::Slow, slow),
        }
    }

    /// 可分配内存区的分配器（ADC 区返回 `None`）
    pub fn pool(&self, bank: Bank) -> Option<&MemPool> {
        match bank {
            Bank::Adc => None,
            Bank::Window => Some(&self.window),
            Bank::Local => Some(&self.local),
            Bank::Slow => Some(&self.slow),
        }
    }

    pub fn pool_mut(&mut self, bank: Bank) -> Option<&mut MemPool> {
        match bank {
            Bank::Adc => None,
            Bank::Window => Some(&mut self.window),
            Bank::Local => Some(&mut self.local),
            Bank::Slow => Some(&mut self.slow),
        }
    }

    /// 复位三个可分配内存区
    pub fn reset_pools(&mut self) {
        self.window.reset();
        self.local.reset();
        self.slow.reset();
    }

    pub fn bank_len(&self, bank: Bank) -> usize {
        self.storage[bank.index()].len()
    }

    /// ADC 缓冲区开头 `len` 字节
    pub fn adc_region(&self, len: usize) -> Result<MemRegion, HwaError> {
        let limit = self.bank_len(Bank::Adc);
        if len > limit {
            return Err(HwaError::OutOfBounds {
                bank: Bank::Adc,
                offset: 0,
                len,
                limit,
            });
        }
        Ok(MemRegion::new(Bank::Adc, 0, len))
    }

    fn check(&self, region: &MemRegion) -> Result<(), HwaError> {
        let limit = self.bank_len(region.bank);
        if region.end() > limit {
            return Err(HwaError::OutOfBounds {
                bank: region.bank,
                offset: region.offset,
                len: region.len,
                limit,
            });
        }
        Ok(())
    }

    pub fn bytes(&self, region: MemRegion) -> Result<&[u8], HwaError> {
        self.check(&region)?;
        Ok(&self.storage[region.bank.index()][region.offset..region.end()])
    }

    pub fn bytes_mut(&mut self, region: MemRegion) -> Result<&mut [u8], HwaError> {
        self.check(&region)?;
        Ok(&mut self.storage[region.bank.index()][region.offset..region.end()])
    }

    /// 同时借用两个区：`src` 只读，`dst` 可写
    ///
    /// 同一内存区内的两个区必须不重叠。
    pub fn split_pair(
        &mut self,
        src: MemRegion,
        dst: MemRegion,
    ) -> Result<(&[u8], &mut [u8]), HwaError> {
        self.check(&src)?;
        self.check(&dst)?;
        let (si, di) = (src.bank.index(), dst.bank.index());
        if si == di {
            let before = src.end() <= dst.offset;
            if !before && dst.end() > src.offset {
                return Err(HwaError::OutOfBounds {
                    bank: dst.bank,
                    offset: dst.offset,
                    len: dst.len,
                    limit: src.offset,
                });
            }
            let bank = &mut self.storage[si];
            if before {
                let (lo, hi) = bank.split_at_mut(dst.offset);
                Ok((&lo[src.offset..src.end()], &mut hi[..dst.len]))
            } else {
                let (lo, hi) = bank.split_at_mut(src.offset);
                Ok((&hi[..src.len], &mut lo[dst.offset..dst.end()]))
            }
        } else {
            let (lo, hi) = self.storage.split_at_mut(si.max(di));
            let (a, b) = (&mut lo[si.min(di)], &mut hi[0]);
            let (s, d) = if si < di { (a, b) } else { (b, a) };
            Ok((&s[src.offset..src.end()], &mut d[dst.offset..dst.end()]))
        }
    }

    /// 把 `src` 全部字节拷贝到 `dst` 起始处（`dst` 不短于 `src`）
    pub fn copy_region(&mut self, src: MemRegion, dst: MemRegion) -> Result<(), HwaError> {
        let dst = dst.sub(0, src.len)?;
        if src.bank == dst.bank {
            self.check(&src)?;
            self.check(&dst)?;
            self.storage[src.bank.index()].copy_within(src.offset..src.end(), dst.offset);
            return Ok(());
        }
        let (s, d) = self.split_pair(src, dst)?;
        d.copy_from_slice(s);
        Ok(())
    }

    pub fn fill(&mut self, region: MemRegion, value: u8) -> Result<(), HwaError> {
        self.bytes_mut(region)?.fill(value);
        Ok(())
    }

    // ------------------------------------------------------------------
    // 小端类型化访问
    // ------------------------------------------------------------------

    pub fn read_u16(&self, region: MemRegion, index: usize) -> Result<u16, HwaError> {
        let mut buf = self.bytes(region.element(index, 2)?)?;
        Ok(buf.get_u16_le())
    }

    pub fn write_u16(&mut self, region: MemRegion, index: usize, value: u16) -> Result<(), HwaError> {
        let mut buf = self.bytes_mut(region.element(index, 2)?)?;
        buf.put_u16_le(value);
        Ok(())
    }

    pub fn read_i32(&self, region: MemRegion, index: usize) -> Result<i32, HwaError> {
        let mut buf = self.bytes(region.element(index, 4)?)?;
        Ok(buf.get_i32_le())
    }

    pub fn write_i32(&mut self, region: MemRegion, index: usize, value: i32) -> Result<(), HwaError> {
        let mut buf = self.bytes_mut(region.element(index, 4)?)?;
        buf.put_i32_le(value);
        Ok(())
    }

    pub fn read_cmplx16(&self, region: MemRegion, index: usize) -> Result<Cmplx16, HwaError> {
        let mut buf = self.bytes(region.element(index, Cmplx16::SIZE)?)?;
        let re = buf.get_i16_le();
        let im = buf.get_i16_le();
        Ok(Cmplx16::new(re, im))
    }

    pub fn write_cmplx16(
        &mut self,
        region: MemRegion,
        index: usize,
        value: Cmplx16,
    ) -> Result<(), HwaError> {
        let mut buf = self.bytes_mut(region.element(index, Cmplx16::SIZE)?)?;
        buf.put_i16_le(value.re);
        buf.put_i16_le(value.im);
        Ok(())
    }

    /// 从区起点读取 `out.len()` 个 `u16`
    pub fn read_u16_slice(&self, region: MemRegion, out: &mut [u16]) -> Result<(), HwaError> {
        let mut buf = self.bytes(region.sub(0, out.len() * 2)?)?;
        for v in out.iter_mut() {
            *v = buf.get_u16_le();
        }
        Ok(())
    }

    pub fn write_u16_slice(&mut self, region: MemRegion, values: &[u16]) -> Result<(), HwaError> {
        let mut buf = self.bytes_mut(region.sub(0, values.len() * 2)?)?;
        for &v in values {
            buf.put_u16_le(v);
        }
        Ok(())
    }

    pub fn read_cmplx16_slice(&self, region: MemRegion, out: &mut [Cmplx16]) -> Result<(), HwaError> {
        let mut buf = self.bytes(region.sub(0, out.len() * Cmplx16::SIZE)?)?;
        for v in out.iter_mut() {
            let re = buf.get_i16_le();
            let im = buf.get_i16_le();
            *v = Cmplx16::new(re, im);
        }
        Ok(())
    }

    pub fn write_cmplx16_slice(
        &mut self,
        region: MemRegion,
        values: &[Cmplx16],
    ) -> Result<(), HwaError> {
        let mut buf = self.bytes_mut(region.sub(0, values.len() * Cmplx16::SIZE)?)?;
        for v in values {
            buf.put_i16_le(v.re);
            buf.put_i16_le(v.im);
        }
        Ok(())
    }
}
