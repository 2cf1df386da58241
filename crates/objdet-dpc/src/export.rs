//! 结果导出握手
//!
//! 深度为 1 的通道承载"在途"子帧索引：通道中有一个元素即表示一个子帧的结果
//! 已交给消费端、尚未确认。令牌数就是通道长度，不可能为负。

use crate::error::ConsistencyViolation;
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use objdet_protocol::{ResultRecord, TimingStats};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// 交给消费端的一次子帧结果
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedResult {
    pub record: ResultRecord,
    pub timing: TimingStats,
}

/// 在途令牌与当前活动子帧索引
#[derive(Debug, Clone)]
pub struct ExportGate {
    tx: Sender<u8>,
    rx: Receiver<u8>,
    active: Arc<AtomicU8>,
}

impl Default for ExportGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportGate {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self {
            tx,
            rx,
            active: Arc::new(AtomicU8::new(0)),
        }
    }

    /// 为当前活动子帧取得令牌；已有在途子帧时返回 `false`
    pub fn try_acquire(&self) -> bool {
        self.tx.try_send(self.active()).is_ok()
    }

    /// 消费端确认子帧 `index` 已导出，释放令牌
    pub fn acknowledge(&self, index: u8) -> Result<(), ConsistencyViolation> {
        // 先检查再取出，不匹配时令牌保持原状
        match self.in_flight() {
            None => Err(ConsistencyViolation::ExportWithoutToken(index)),
            Some(expected) if expected != index => {
                Err(ConsistencyViolation::ExportMismatch { expected, got: index })
            }
            Some(_) => match self.rx.try_recv() {
                Ok(_) => Ok(()),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                    Err(ConsistencyViolation::ExportWithoutToken(index))
                }
            },
        }
    }

    /// 在途子帧索引
    pub fn in_flight(&self) -> Option<u8> {
        (self.rx.len() == 1).then(|| self.active())
    }

    pub fn active(&self) -> u8 {
        self.active.load(Ordering::Acquire)
    }

    /// 活动索引前进一位，到 `num_subframes` 回绕
    pub fn advance(&self, num_subframes: u8) {
        let next = (self.active() + 1) % num_subframes.max(1);
        self.active.store(next, Ordering::Release);
    }

    /// 活动索引回到 0（停止后）
    pub fn rewind(&self) {
        self.active.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_token() {
        let gate = ExportGate::new();
        assert_eq!(gate.in_flight(), None);
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
        assert_eq!(gate.in_flight(), Some(0));
        gate.acknowledge(0).unwrap();
        assert_eq!(gate.in_flight(), None);
        assert!(gate.try_acquire());
    }

    #[test]
    fn test_acknowledge_mismatch_keeps_token() {
        let gate = ExportGate::new();
        gate.advance(3);
        assert!(gate.try_acquire());
        assert_eq!(
            gate.acknowledge(0),
            Err(ConsistencyViolation::ExportMismatch {
                expected: 1,
                got: 0
            })
        );
        assert_eq!(gate.in_flight(), Some(1));
        gate.acknowledge(1).unwrap();
        assert_eq!(
            gate.acknowledge(1),
            Err(ConsistencyViolation::ExportWithoutToken(1))
        );
    }

    #[test]
    fn test_advance_wraps() {
        let gate = ExportGate::new();
        gate.advance(2);
        assert_eq!(gate.active(), 1);
        gate.advance(2);
        assert_eq!(gate.active(), 0);
        gate.advance(2);
        gate.rewind();
        assert_eq!(gate.active(), 0);
    }
}
