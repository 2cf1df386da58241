//! 规划器属性测试
//!
//! 在一组合法的 FFT 尺寸与天线配置上检查：
//! - 同样输入得到同样布局
//! - 必须同时存活的缓冲区互不重叠
//! - 使用量不超过容量

use objdet_dpc::DpcLimits;
use objdet_dpc::planner::{HwCapacity, plan_common, plan_subframe};
use objdet_hwa::{MemRegion, MemoryMap};
use objdet_protocol::{AdcConfig, CfarCfg, CommonConfig, StaticConfig};
use proptest::prelude::*;

const HW: HwCapacity = HwCapacity {
    param_sets: 32,
    channels: 64,
};

fn memory() -> MemoryMap {
    MemoryMap::new(0, 16 * 1024, 64 * 1024, 1024 * 1024)
}

fn config(range_log2: u32, doppler_log2: u32, num_tx: u8, cfar_range: bool, export: bool) -> StaticConfig {
    let bins = 1u16 << range_log2;
    let chirps = 1u16 << doppler_log2;
    let base = StaticConfig::default();
    StaticConfig {
        adc: AdcConfig {
            num_adc_samples: bins,
            num_tx,
            ..base.adc
        },
        num_range_bins: bins,
        num_doppler_chirps: chirps,
        num_doppler_bins: chirps,
        cfar_range: CfarCfg {
            enabled: cfar_range,
            ..CfarCfg::range_default()
        },
        det_matrix_export: export,
        ..base
    }
}

fn assert_disjoint(regions: &[MemRegion]) {
    for (i, a) in regions.iter().enumerate() {
        for b in &regions[i + 1..] {
            assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
        }
    }
}

#[test]
fn test_default_plan() {
    let mut mem = memory();
    let common = plan_common(&mut mem, &CommonConfig::default()).unwrap();
    let cfg = StaticConfig::default();
    let plan = plan_subframe(&mut mem, &common, &cfg, &DpcLimits::default(), HW).unwrap();
    let layout = plan.layout;

    assert_eq!(layout.cube.len(), cfg.cube_bytes());
    assert_eq!(
        layout.det_matrix.map(|r| r.len()),
        Some(cfg.num_range_bins as usize * cfg.num_doppler_bins as usize * 2)
    );
    assert!(layout.cfar.is_some());
    assert!(layout.raw_capacity <= DpcLimits::default().max_raw_objects);
    assert!(layout.object_capacity <= layout.raw_capacity);
    assert!(!layout.range_window.overlaps(&common.phase_table));
}

#[test]
fn test_param_set_exhaustion() {
    let mut mem = memory();
    let common = plan_common(&mut mem, &CommonConfig::default()).unwrap();
    let hw = HwCapacity {
        param_sets: 4,
        channels: 64,
    };
    let err = plan_subframe(
        &mut mem,
        &common,
        &StaticConfig::default(),
        &DpcLimits::default(),
        hw,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        objdet_dpc::PlannerError::ParamSetsExhausted { available: 4, .. }
    ));
}

proptest! {
    #[test]
    fn prop_plan_is_deterministic_and_disjoint(
        range_log2 in 6u32..=9,
        doppler_log2 in 3u32..=5,
        num_tx in 1u8..=2,
        cfar_range in any::<bool>(),
        export in any::<bool>(),
    ) {
        let cfg = config(range_log2, doppler_log2, num_tx, cfar_range, export);
        let limits = DpcLimits::default();
        let mut mem = memory();
        let common = plan_common(&mut mem, &CommonConfig::default()).unwrap();

        let first = plan_subframe(&mut mem, &common, &cfg, &limits, HW).unwrap();
        let second = plan_subframe(&mut mem, &common, &cfg, &limits, HW).unwrap();
        prop_assert_eq!(first, second);

        let l = first.layout;
        prop_assert_eq!(l.det_matrix.is_some(), cfg.det_matrix_required());
        prop_assert_eq!(l.cfar.is_some(), cfar_range);

        // 慢速区
        let mut slow = vec![l.cube];
        slow.extend(l.det_matrix);
        assert_disjoint(&slow);

        // 多普勒暂存与输出列表同时存活
        let d = l.doppler;
        let mut local = vec![common.phase_table, d.input, d.output, d.det_row, d.hits];
        local.extend(d.decompressed);
        local.extend([l.object_list, l.point_cloud, l.side_info]);
        assert_disjoint(&local);

        // 距离 CFAR 暂存只与多普勒暂存互相覆盖
        if let Some(c) = l.cfar {
            let mut live = vec![common.phase_table, c.list, c.cum_index];
            live.extend([c.scratch[0].column, c.scratch[0].hits, c.scratch[1].column, c.scratch[1].hits]);
            live.extend([l.object_list, l.point_cloud, l.side_info]);
            assert_disjoint(&live);
        }

        prop_assert!(!l.range_window.overlaps(&d.window));
        for bank in [first.usage.window, first.usage.local, first.usage.slow] {
            prop_assert!(bank.used <= bank.capacity);
        }
        prop_assert!(l.raw_capacity * cfg.raw_record_bytes() <= l.cube.len());
    }
}
