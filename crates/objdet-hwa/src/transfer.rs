//! 传输描述符
//!
//! 二维传输：`bcnt` 行，每行 `acnt` 字节，源/目的行间距分别为
//! `src_bidx` / `dst_bidx` 字节。每一维的计数均受 [`MAX_ACNT`] 限制。

use crate::HwaError;
use crate::mem::MemRegion;
use smallvec::SmallVec;

/// 每一维计数上限
pub const MAX_ACNT: usize = u16::MAX as usize;

/// 二维传输形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferShape {
    pub acnt: u16,
    pub bcnt: u16,
    pub src_bidx: u32,
    pub dst_bidx: u32,
}

/// 平铺传输的一段：相对偏移 + 形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatPart {
    pub offset: usize,
    pub shape: TransferShape,
}

impl TransferShape {
    /// 连续拷贝 `bytes` 字节（单行）
    pub fn contiguous(bytes: usize) -> Result<Self, HwaError> {
        if bytes > MAX_ACNT {
            return Err(HwaError::TransferTooLarge(bytes));
        }
        Ok(Self {
            acnt: bytes as u16,
            bcnt: 1,
            src_bidx: 0,
            dst_bidx: 0,
        })
    }

    /// 跨步拷贝：`rows` 行，每行 `elem` 字节
    pub fn strided(elem: usize, rows: usize, src_bidx: usize, dst_bidx: usize) -> Result<Self, HwaError> {
        if elem > MAX_ACNT || rows > MAX_ACNT {
            return Err(HwaError::TransferTooLarge(elem * rows));
        }
        Ok(Self {
            acnt: elem as u16,
            bcnt: rows as u16,
            src_bidx: src_bidx as u32,
            dst_bidx: dst_bidx as u32,
        })
    }

    /// 把超出单维上限的平铺拷贝拆成最多两段
    ///
    /// 第一段为 `bytes / MAX_ACNT` 行 × `MAX_ACNT` 字节，第二段为余数。
    pub fn split_flat(bytes: usize) -> Result<SmallVec<[FlatPart; 2]>, HwaError> {
        let mut parts = SmallVec::new();
        if bytes <= MAX_ACNT {
            parts.push(FlatPart {
                offset: 0,
                shape: Self::contiguous(bytes)?,
            });
            return Ok(parts);
        }
        let rows = bytes / MAX_ACNT;
        if rows > MAX_ACNT {
            return Err(HwaError::TransferTooLarge(bytes));
        }
        parts.push(FlatPart {
            offset: 0,
            shape: Self::strided(MAX_ACNT, rows, MAX_ACNT, MAX_ACNT)?,
        });
        let rest = bytes - rows * MAX_ACNT;
        if rest > 0 {
            parts.push(FlatPart {
                offset: rows * MAX_ACNT,
                shape: Self::contiguous(rest)?,
            });
        }
        Ok(parts)
    }

    /// 源侧最后一个字节之后的相对偏移
    pub fn src_extent(&self) -> usize {
        Self::extent(self.acnt, self.bcnt, self.src_bidx)
    }

    pub fn dst_extent(&self) -> usize {
        Self::extent(self.acnt, self.bcnt, self.dst_bidx)
    }

    fn extent(acnt: u16, bcnt: u16, bidx: u32) -> usize {
        if bcnt == 0 || acnt == 0 {
            return 0;
        }
        (bcnt as usize - 1) * bidx as usize + acnt as usize
    }

    /// 总字节数
    pub fn total_bytes(&self) -> usize {
        self.acnt as usize * self.bcnt as usize
    }
}

/// 传输通道配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub src: MemRegion,
    pub dst: MemRegion,
    pub shape: TransferShape,
    /// 完成后启动的通道
    pub chain_to: Option<u8>,
}

impl TransferRequest {
    pub fn new(src: MemRegion, dst: MemRegion, shape: TransferShape) -> Self {
        Self {
            src,
            dst,
            shape,
            chain_to: None,
        }
    }

    pub fn chain(mut self, ch: u8) -> Self {
        self.chain_to = Some(ch);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_small() {
        let parts = TransferShape::split_flat(1000).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].shape.total_bytes(), 1000);
    }

    #[test]
    fn test_split_large() {
        let bytes = 3 * MAX_ACNT + 17;
        let parts = TransferShape::split_flat(bytes).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].shape.bcnt, 3);
        assert_eq!(parts[0].shape.src_extent(), 3 * MAX_ACNT);
        assert_eq!(parts[1].offset, 3 * MAX_ACNT);
        assert_eq!(parts[1].shape.total_bytes(), 17);
        let total: usize = parts.iter().map(|p| p.shape.total_bytes()).sum();
        assert_eq!(total, bytes);
    }

    #[test]
    fn test_split_exact_multiple() {
        let parts = TransferShape::split_flat(2 * MAX_ACNT).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].shape.bcnt, 2);
    }

    #[test]
    fn test_strided_extent() {
        let shape = TransferShape::strided(2, 256, 32, 2).unwrap();
        assert_eq!(shape.src_extent(), 255 * 32 + 2);
        assert_eq!(shape.dst_extent(), 512);
        assert!(TransferShape::strided(2, 70_000, 2, 2).is_err());
    }
}
