//! # 统计工具
//!
//! 子帧处理时延统计（可选模块）
//!
//! 需要启用 `statistics` feature：
//! ```toml
//! objdet-tools = { workspace = true, features = ["statistics"] }
//! ```

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

/// 时延统计
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatencyStatistics {
    /// 平均时延（微秒）
    pub avg_latency_us: f64,

    /// 最小时延（微秒）
    pub min_latency_us: u64,

    /// 最大时延（微秒）
    pub max_latency_us: u64,

    /// 标准差（微秒）
    pub std_dev_us: f64,

    /// 第 99 百分位（微秒）
    pub p99_latency_us: f64,

    /// 样本数量
    pub sample_count: u64,
}

impl LatencyStatistics {
    /// 计算时延统计
    pub fn calculate(latencies: &[u64]) -> Self {
        if latencies.is_empty() {
            return Self::default();
        }

        let sum: u64 = latencies.iter().sum();
        let avg = sum as f64 / latencies.len() as f64;

        let min = *latencies.iter().min().unwrap_or(&0);
        let max = *latencies.iter().max().unwrap_or(&0);

        // 总体标准差
        let variance = latencies
            .iter()
            .map(|&x| {
                let diff = x as f64 - avg;
                diff * diff
            })
            .sum::<f64>()
            / latencies.len() as f64;

        Self {
            avg_latency_us: avg,
            min_latency_us: min,
            max_latency_us: max,
            std_dev_us: variance.sqrt(),
            p99_latency_us: percentile(latencies, 99),
            sample_count: latencies.len() as u64,
        }
    }

    /// 抖动（用标准差表示）
    pub fn jitter(&self) -> f64 {
        self.std_dev_us
    }

    /// 帧率（帧/秒）：`frames` 帧耗时 `duration_us` 微秒
    pub fn frame_rate(frames: u64, duration_us: u64) -> f64 {
        if duration_us == 0 {
            return 0.0;
        }
        frames as f64 / (duration_us as f64 / 1_000_000.0)
    }
}

/// 第 `p` 百分位（`p` 取 0..=100）
pub fn percentile(samples: &[u64], p: usize) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut data = Data::new(samples.iter().map(|&x| x as f64).collect::<Vec<f64>>());
    data.percentile(p.min(100))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_statistics() {
        let latencies = vec![100, 150, 200, 120, 180];
        let stats = LatencyStatistics::calculate(&latencies);

        assert_eq!(stats.min_latency_us, 100);
        assert_eq!(stats.max_latency_us, 200);
        assert_eq!(stats.sample_count, 5);

        let expected_avg = (100 + 150 + 200 + 120 + 180) as f64 / 5.0;
        assert!((stats.avg_latency_us - expected_avg).abs() < 0.01);
        assert!(stats.p99_latency_us <= 200.0);
        assert!(stats.p99_latency_us >= 180.0);
    }

    #[test]
    fn test_latency_statistics_empty() {
        let stats = LatencyStatistics::calculate(&[]);
        assert_eq!(stats.sample_count, 0);
        assert_eq!(stats.avg_latency_us, 0.0);
        assert_eq!(stats.p99_latency_us, 0.0);
    }

    #[test]
    fn test_constant_samples_have_no_jitter() {
        let stats = LatencyStatistics::calculate(&[250; 16]);
        assert_eq!(stats.jitter(), 0.0);
        assert_eq!(stats.p99_latency_us, 250.0);
    }

    #[test]
    fn test_percentile_bounds() {
        let samples: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&samples, 0), 1.0);
        assert_eq!(percentile(&samples, 100), 100.0);
        let median = percentile(&samples, 50);
        assert!((50.0..=51.0).contains(&median));
    }

    #[test]
    fn test_frame_rate() {
        assert_eq!(LatencyStatistics::frame_rate(100, 1_000_000), 100.0);
        assert_eq!(LatencyStatistics::frame_rate(10, 0), 0.0);
    }
}
