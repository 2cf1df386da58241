//! 距离方向 CFAR 阶段
//!
//! 对检测矩阵逐列（每个多普勒单元一列）做非循环 CFAR。列通过跨步传输搬到
//! 交替使用的 ping/pong 暂存中。输出按多普勒单元、再按距离单元排序，
//! 并记录每个多普勒单元的累计目标数。

use super::HwCtx;
use crate::error::CfarError;
use crate::planner::{CfarLayout, StageResources, SubFrameLayout};
use crate::records::{CfarObj, write_cfar};
use objdet_hwa::{
    Accelerator, CfarParams, MemRegion, ParamSet, TransferEngine, TransferRequest, TransferShape,
};
use objdet_protocol::{CfarCfg, StaticConfig};
use tracing::{debug, warn};

/// 一帧距离 CFAR 结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CfarOutput {
    pub num_objects: usize,
    pub clipped: u32,
}

#[derive(Debug, Clone)]
struct Configured {
    param_set: usize,
    channels: [u8; 2],
    det_matrix: MemRegion,
    layout: CfarLayout,
    cfar: CfarCfg,
    num_range_bins: u16,
    num_doppler_bins: usize,
}

/// 距离 CFAR 阶段
#[derive(Debug, Clone, Default)]
pub struct CfarStage {
    configured: Option<Configured>,
}

impl CfarStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(cfg: &StaticConfig) -> Result<(), CfarError> {
        let c = &cfg.cfar_range;
        if !c.enabled {
            return Ok(());
        }
        if !c.win_len.is_power_of_two() {
            return Err(CfarError::Window { win: c.win_len });
        }
        if c.win_len as u16 + c.guard_len as u16 >= cfg.num_range_bins / 2 {
            return Err(CfarError::Span {
                win: c.win_len,
                guard: c.guard_len,
                bins: cfg.num_range_bins,
            });
        }
        if c.threshold_db < 0.0 {
            return Err(CfarError::Threshold(c.threshold_db));
        }
        Ok(())
    }

    /// 是否已配置为运行（距离 CFAR 关闭时为 `false`）
    pub fn is_enabled(&self) -> bool {
        self.configured.is_some()
    }

    /// CFAR 列表与累计索引
    pub fn layout(&self) -> Option<&CfarLayout> {
        self.configured.as_ref().map(|c| &c.layout)
    }

    pub fn configure<A, E>(
        &mut self,
        hw: &mut HwCtx<'_, A, E>,
        cfg: &StaticConfig,
        layout: &SubFrameLayout,
        res: &StageResources,
    ) -> Result<(), CfarError>
    where
        A: Accelerator + ?Sized,
        E: TransferEngine + ?Sized,
    {
        Self::validate(cfg)?;
        let (Some(cfar_layout), Some(det_matrix), true) =
            (layout.cfar, layout.det_matrix, cfg.cfar_range.enabled)
        else {
            self.configured = None;
            return Ok(());
        };

        let r = cfg.num_range_bins as usize;
        let n_dop = cfg.num_doppler_bins as usize;
        let column = TransferShape::strided(2, r, n_dop * 2, 2)?;
        for (ch, scratch) in res.cfar_channels.iter().zip(&cfar_layout.scratch) {
            hw.edma
                .configure(*ch, TransferRequest::new(det_matrix, scratch.column, column))?;
        }
        let configured = Configured {
            param_set: res.cfar_param_set,
            channels: res.cfar_channels,
            det_matrix,
            layout: cfar_layout,
            cfar: cfg.cfar_range,
            num_range_bins: cfg.num_range_bins,
            num_doppler_bins: n_dop,
        };
        hw.hwa
            .set_param_set(configured.param_set, configured.param_set_for(0))?;
        debug!(
            "cfar: configured range CFAR win {} guard {} over {} bins",
            cfg.cfar_range.win_len, cfg.cfar_range.guard_len, r
        );
        self.configured = Some(configured);
        Ok(())
    }

    pub fn run<A, E>(&mut self, hw: &mut HwCtx<'_, A, E>) -> Result<CfarOutput, CfarError>
    where
        A: Accelerator + ?Sized,
        E: TransferEngine + ?Sized,
    {
        let c = self.configured.as_ref().ok_or(CfarError::NotConfigured)?;
        let l = &c.layout;
        let mut count = 0usize;
        let mut clipped = 0u32;

        for d in 0..c.num_doppler_bins {
            let ping = d % 2;
            let scratch = l.scratch[ping];
            let column = c.det_matrix.sub(d * 2, c.det_matrix.len() - d * 2)?;
            hw.edma.retarget(c.channels[ping], column, scratch.column)?;
            hw.transfer(c.channels[ping])?;

            hw.hwa.set_param_set(c.param_set, c.param_set_for(ping))?;
            let status = hw.run_param_sets(c.param_set, 1)?;
            for h in 0..status.cfar_hits {
                if count >= l.capacity {
                    clipped += 1;
                    continue;
                }
                let obj = CfarObj {
                    range_idx: hw.mem.read_u16(scratch.hits, 2 * h)?,
                    doppler_idx: d as u16,
                    noise: hw.mem.read_u16(scratch.hits, 2 * h + 1)?,
                };
                write_cfar(hw.mem, l.list, count, &obj)?;
                count += 1;
            }
            hw.mem.write_u16(l.cum_index, d, count as u16)?;
        }

        if clipped > 0 {
            warn!("cfar: range CFAR list full, {} detections clipped", clipped);
        }
        debug!("cfar: {} range CFAR detections", count);
        Ok(CfarOutput {
            num_objects: count,
            clipped,
        })
    }
}

impl Configured {
    fn param_set_for(&self, ping: usize) -> ParamSet {
        let s = self.layout.scratch[ping];
        ParamSet::Cfar(CfarParams {
            input: s.column,
            output: s.hits,
            num_cells: self.num_range_bins,
            averaging: self.cfar.averaging,
            win_len: self.cfar.win_len,
            guard_len: self.cfar.guard_len,
            threshold: self.cfar.threshold_q11(),
            cyclic: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(CfarStage::validate(&StaticConfig::default()).is_ok());

        let mut cfg = StaticConfig::default();
        cfg.cfar_range.win_len = 6;
        assert_eq!(CfarStage::validate(&cfg), Err(CfarError::Window { win: 6 }));

        cfg.cfar_range.win_len = 64;
        cfg.cfar_range.guard_len = 64;
        assert!(matches!(CfarStage::validate(&cfg), Err(CfarError::Span { .. })));

        cfg.cfar_range.enabled = false;
        assert!(CfarStage::validate(&cfg).is_ok());

        let mut cfg = StaticConfig::default();
        cfg.cfar_range.threshold_db = -1.0;
        assert_eq!(CfarStage::validate(&cfg), Err(CfarError::Threshold(-1.0)));
    }
}
