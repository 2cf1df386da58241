//! 距离偏差与 RX 通道相位测量
//!
//! 在已知距离放置一个角反射器，在原始目标中找到它，报告距离偏差与每个虚拟天线
//! 的补偿系数。结果只随结果记录上报，不会自动生效。

use crate::records::{RawObj, read_raw};
use objdet_hwa::{HwaError, MemRegion, MemoryMap};
use objdet_protocol::{MeasureCfg, RangeBiasRxPhase, RxChanCompensation};
use tracing::debug;

/// 在 `count` 条原始记录中测量
///
/// 候选目标：多普勒为 0，距离在 `target ± search_win` 内；取峰值最大者。
pub fn measure(
    mem: &MemoryMap,
    raw_list: MemRegion,
    count: usize,
    num_ant: usize,
    range_step_m: f32,
    cfg: &MeasureCfg,
) -> Result<Option<RangeBiasRxPhase>, HwaError> {
    let mut best: Option<RawObj> = None;
    for i in 0..count {
        let obj = read_raw(mem, raw_list, i, num_ant)?;
        if obj.doppler_idx != 0 {
            continue;
        }
        let range = obj.range_idx as f32 * range_step_m;
        if (range - cfg.target_distance_m).abs() > cfg.search_win_m {
            continue;
        }
        if best.as_ref().is_none_or(|b| obj.peak > b.peak) {
            best = Some(obj);
        }
    }
    let Some(target) = best else {
        return Ok(None);
    };

    let power: Vec<f32> = target
        .samples
        .iter()
        .map(|s| {
            let (re, im) = (s.re as f32, s.im as f32);
            re * re + im * im
        })
        .collect();
    let min_mag = power.iter().copied().fold(f32::INFINITY, f32::min).sqrt();
    if min_mag.is_nan() || min_mag <= 0.0 {
        return Ok(None);
    }
    // c = min|x| · conj(x) / |x|²
    let coefficients = target
        .samples
        .iter()
        .zip(&power)
        .map(|(s, &p)| {
            let scale = min_mag / p;
            RxChanCompensation::coefficient_from_f32(s.re as f32 * scale, -(s.im as f32) * scale)
        })
        .collect();

    let range_bias_m = target.range_idx as f32 * range_step_m - cfg.target_distance_m;
    debug!(
        "measure: reflector at range bin {}, bias {:.4} m",
        target.range_idx, range_bias_m
    );
    Ok(Some(RangeBiasRxPhase {
        range_bias_m,
        coefficients,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::write_raw;
    use objdet_hwa::Bank;
    use objdet_protocol::Cmplx16;
    use smallvec::smallvec;

    fn obj(range_idx: u16, doppler_idx: i16, peak: u16, samples: [Cmplx16; 2]) -> RawObj {
        RawObj {
            range_idx,
            doppler_idx,
            peak,
            noise: 0,
            samples: smallvec![samples[0], samples[1]],
        }
    }

    #[test]
    fn test_measure_picks_strongest_static_target() {
        let mut mem = MemoryMap::new(0, 0, 0, 1024);
        let list = mem.pool_mut(Bank::Slow).unwrap().alloc(16 * 4, 4).unwrap();
        let s = [Cmplx16::new(1000, 0), Cmplx16::new(0, 2000)];
        write_raw(&mut mem, list, 0, &obj(34, 0, 100, s)).unwrap();
        write_raw(&mut mem, list, 1, &obj(35, 0, 900, s)).unwrap();
        write_raw(&mut mem, list, 2, &obj(35, 1, 5000, s)).unwrap();
        write_raw(&mut mem, list, 3, &obj(90, 0, 5000, s)).unwrap();
        let cfg = MeasureCfg {
            enabled: true,
            target_distance_m: 1.5,
            search_win_m: 0.3,
        };
        let m = measure(&mem, list, 4, 2, 0.044, &cfg).unwrap().unwrap();
        assert!((m.range_bias_m - (35.0 * 0.044 - 1.5)).abs() < 1e-5);
        // 天线 0：1000 → 16384；天线 1：j2000 → -j8192
        assert_eq!(m.coefficients[0], Cmplx16::new(16384, 0));
        assert_eq!(m.coefficients[1], Cmplx16::new(0, -8192));
    }

    #[test]
    fn test_measure_without_candidate() {
        let mut mem = MemoryMap::new(0, 0, 0, 256);
        let list = mem.pool_mut(Bank::Slow).unwrap().alloc(16, 4).unwrap();
        let s = [Cmplx16::new(10, 0); 2];
        write_raw(&mut mem, list, 0, &obj(5, 0, 100, s)).unwrap();
        let m = measure(&mem, list, 1, 2, 0.044, &MeasureCfg::default()).unwrap();
        assert!(m.is_none());
    }
}
