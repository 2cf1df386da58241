//! 数据通路运行指标
//!
//! 原子计数器，可在任何线程读取快照，不引入锁。

use std::sync::atomic::{AtomicU64, Ordering};

/// 数据通路实时指标
///
/// # 使用示例
///
/// ```rust
/// use objdet_dpc::DpcMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = DpcMetrics::new();
/// metrics.frames_started.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().frames_started, 1);
/// ```
#[derive(Debug, Default)]
pub struct DpcMetrics {
    /// 帧起始事件总数
    pub frames_started: AtomicU64,

    /// 处理完成的子帧数
    pub subframes_processed: AtomicU64,

    /// 因结果未确认而延后的帧起始事件数
    pub deferred_frame_starts: AtomicU64,

    /// 多普勒阶段原始目标累计数
    pub raw_objects: AtomicU64,

    /// 交集后有效目标累计数
    pub validated_objects: AtomicU64,

    /// 输出点云目标累计数
    pub output_objects: AtomicU64,

    /// 几何不成立丢弃的目标数
    pub dropped_geometry: AtomicU64,

    /// 超出角度视场丢弃的目标数
    pub dropped_fov: AtomicU64,

    /// 各列表容量溢出被截断的目标数
    ///
    /// 持续增长说明容量上限或门限设置不合适。
    pub list_clips: AtomicU64,
}

impl DpcMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_started: self.frames_started.load(Ordering::Relaxed),
            subframes_processed: self.subframes_processed.load(Ordering::Relaxed),
            deferred_frame_starts: self.deferred_frame_starts.load(Ordering::Relaxed),
            raw_objects: self.raw_objects.load(Ordering::Relaxed),
            validated_objects: self.validated_objects.load(Ordering::Relaxed),
            output_objects: self.output_objects.load(Ordering::Relaxed),
            dropped_geometry: self.dropped_geometry.load(Ordering::Relaxed),
            dropped_fov: self.dropped_fov.load(Ordering::Relaxed),
            list_clips: self.list_clips.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.frames_started.store(0, Ordering::Relaxed);
        self.subframes_processed.store(0, Ordering::Relaxed);
        self.deferred_frame_starts.store(0, Ordering::Relaxed);
        self.raw_objects.store(0, Ordering::Relaxed);
        self.validated_objects.store(0, Ordering::Relaxed);
        self.output_objects.store(0, Ordering::Relaxed);
        self.dropped_geometry.store(0, Ordering::Relaxed);
        self.dropped_fov.store(0, Ordering::Relaxed);
        self.list_clips.store(0, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, value: impl Into<u64>) {
        counter.fetch_add(value.into(), Ordering::Relaxed);
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub frames_started: u64,
    pub subframes_processed: u64,
    pub deferred_frame_starts: u64,
    pub raw_objects: u64,
    pub validated_objects: u64,
    pub output_objects: u64,
    pub dropped_geometry: u64,
    pub dropped_fov: u64,
    pub list_clips: u64,
}

impl MetricsSnapshot {
    /// 有效目标中被 AoA 丢弃的比例（百分比）
    ///
    /// `validated_objects` 为 0 时返回 0.0。
    pub fn aoa_drop_rate(&self) -> f64 {
        if self.validated_objects == 0 {
            return 0.0;
        }
        ((self.dropped_geometry + self.dropped_fov) as f64 / self.validated_objects as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_metrics_default() {
        let snapshot = DpcMetrics::new().snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = DpcMetrics::new();
        metrics.frames_started.fetch_add(5, Ordering::Relaxed);
        metrics.list_clips.fetch_add(2, Ordering::Relaxed);
        assert_eq!(metrics.snapshot().list_clips, 2);
        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_metrics_concurrent() {
        let metrics = Arc::new(DpcMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        DpcMetrics::add(&m.subframes_processed, 1u32);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().subframes_processed, 4000);
    }

    #[test]
    fn test_aoa_drop_rate() {
        let s = MetricsSnapshot {
            validated_objects: 10,
            dropped_geometry: 1,
            dropped_fov: 1,
            ..Default::default()
        };
        assert!((s.aoa_drop_rate() - 20.0).abs() < 1e-9);
        assert_eq!(MetricsSnapshot::default().aoa_drop_rate(), 0.0);
    }
}
