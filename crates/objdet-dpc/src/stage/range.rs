//! 距离处理阶段
//!
//! 一个 `RangeFft` 参数集把一帧 ADC 数据变换为雷达立方体。
//! 可选的直流距离特征标定：前 `num_avg_frames` 帧累计近距离单元的平均值，
//! 之后每帧从立方体中减去该均值。

use super::{HwCtx, StageControl};
use crate::error::RangeError;
use crate::planner::{StageResources, SubFrameLayout};
use crate::window;
use objdet_hwa::{
    Accelerator, MemRegion, ParamSet, RangeFftParams, TransferEngine, fft_scale_shift,
};
use objdet_protocol::constants::{MAX_RX_ANTENNAS, MAX_TX_ANTENNAS};
use objdet_protocol::{Cmplx16, StaticConfig, saturate_i16};
use smallvec::SmallVec;
use tracing::{debug, trace};

/// 距离 FFT 最大点数
pub const MAX_RANGE_FFT_SIZE: u16 = 2048;

/// 直流标定状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcState {
    Disabled,
    /// 已累计的帧数
    Accumulating(u16),
    Calibrated,
}

/// 一帧距离处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeOutput {
    pub dc: DcState,
}

/// 直流标定的运行期状态
///
/// 多个子帧的规划互相覆盖同一段内存，累计值必须跨越其他子帧的帧保留，
/// 因此放在阶段内而不是内存区中。
#[derive(Debug, Clone)]
struct DcCalib {
    negative_bin_idx: i16,
    positive_bin_idx: i16,
    num_range_bins: usize,
    num_avg_frames: u16,
    /// `[bin][ant]` 累加和
    sums: Vec<(i64, i64)>,
    frames: u16,
    mean: Option<Vec<Cmplx16>>,
}

impl DcCalib {
    fn new(cfg: &StaticConfig, num_ant: usize) -> Self {
        let dc = &cfg.dc_range_sig;
        Self {
            negative_bin_idx: dc.negative_bin_idx,
            positive_bin_idx: dc.positive_bin_idx,
            num_range_bins: cfg.num_range_bins as usize,
            num_avg_frames: dc.num_avg_frames,
            sums: vec![(0, 0); dc.num_bins() * num_ant],
            frames: 0,
            mean: None,
        }
    }

    fn matches(&self, cfg: &StaticConfig, num_ant: usize) -> bool {
        let dc = &cfg.dc_range_sig;
        self.negative_bin_idx == dc.negative_bin_idx
            && self.positive_bin_idx == dc.positive_bin_idx
            && self.num_range_bins == cfg.num_range_bins as usize
            && self.num_avg_frames == dc.num_avg_frames
            && self.sums.len() == dc.num_bins() * num_ant
    }

    /// 参与标定的距离单元（已按 `R` 取模）
    fn bins(&self) -> impl Iterator<Item = usize> + '_ {
        let r = self.num_range_bins as i32;
        (self.negative_bin_idx as i32..=self.positive_bin_idx as i32)
            .map(move |b| b.rem_euclid(r) as usize)
    }

    fn reset(&mut self) {
        self.sums.iter_mut().for_each(|s| *s = (0, 0));
        self.frames = 0;
        self.mean = None;
    }
}

#[derive(Debug, Clone)]
struct Configured {
    param_set: usize,
    cube: MemRegion,
    num_doppler_chirps: usize,
    num_ant: usize,
}

/// 距离处理阶段
#[derive(Debug, Clone, Default)]
pub struct RangeStage {
    configured: Option<Configured>,
    dc: Option<DcCalib>,
}

impl RangeStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 校验静态配置
    pub fn validate(cfg: &StaticConfig, adc_capacity: usize) -> Result<(), RangeError> {
        let samples = cfg.adc.num_adc_samples;
        if samples < 2 {
            return Err(RangeError::AdcSamples(samples));
        }
        let bins = cfg.num_range_bins;
        if !bins.is_power_of_two() || bins < samples {
            return Err(RangeError::RangeBins { bins, samples });
        }
        if bins > MAX_RANGE_FFT_SIZE {
            return Err(RangeError::FftTooLarge(bins));
        }
        let (rx, tx) = (cfg.adc.num_rx, cfg.adc.num_tx);
        if rx == 0 || rx as usize > MAX_RX_ANTENNAS || tx == 0 || tx as usize > MAX_TX_ANTENNAS {
            return Err(RangeError::Antennas { rx, tx });
        }
        let needed = cfg.adc_frame_bytes();
        if needed > adc_capacity {
            return Err(RangeError::AdcBuffer {
                needed,
                capacity: adc_capacity,
            });
        }
        let dc = &cfg.dc_range_sig;
        if dc.enabled {
            if cfg.compression.enabled {
                return Err(RangeError::DcSignatureWithCompression);
            }
            if dc.num_avg_frames == 0 {
                return Err(RangeError::DcSignatureFrames);
            }
            let half = bins as i32 / 2;
            let (neg, pos) = (dc.negative_bin_idx as i32, dc.positive_bin_idx as i32);
            if neg > 0 || pos < 0 || -neg >= half || pos >= half {
                return Err(RangeError::DcSignatureBins {
                    negative: dc.negative_bin_idx,
                    positive: dc.positive_bin_idx,
                    bins,
                });
            }
        }
        Ok(())
    }

    /// 写入窗函数并装载参数集
    ///
    /// 直流标定的累计结果跨 `configure` 保留，只有 [`StageControl::ResetDcCalibration`]
    /// 或标定参数变化才会清除。
    pub fn configure<A, E>(
        &mut self,
        hw: &mut HwCtx<'_, A, E>,
        cfg: &StaticConfig,
        layout: &SubFrameLayout,
        res: &StageResources,
    ) -> Result<(), RangeError>
    where
        A: Accelerator + ?Sized,
        E: TransferEngine + ?Sized,
    {
        Self::validate(cfg, hw.mem.bank_len(objdet_hwa::Bank::Adc))?;

        let coeffs = window::generate(cfg.range_window, cfg.adc.num_adc_samples as usize);
        hw.mem.write_u16_slice(layout.range_window, &coeffs)?;

        let adc = hw.mem.adc_region(cfg.adc_frame_bytes())?;
        let compressed_block_bytes = cfg
            .compression
            .enabled
            .then(|| cfg.cube_block_bytes() as u16);
        hw.hwa.set_param_set(
            res.range_param_set,
            ParamSet::RangeFft(RangeFftParams {
                adc,
                window: layout.range_window,
                cube: layout.cube,
                num_adc_samples: cfg.adc.num_adc_samples,
                fft_size: cfg.num_range_bins,
                num_rx: cfg.adc.num_rx,
                num_tx: cfg.adc.num_tx,
                num_doppler_chirps: cfg.num_doppler_chirps,
                scale_shift: fft_scale_shift(cfg.num_range_bins as usize),
                compressed_block_bytes,
            }),
        )?;

        let num_ant = cfg.num_virtual_antennas();
        self.dc = if cfg.dc_range_sig.enabled {
            match self.dc.take() {
                Some(prev) if prev.matches(cfg, num_ant) => Some(prev),
                _ => Some(DcCalib::new(cfg, num_ant)),
            }
        } else {
            None
        };

        self.configured = Some(Configured {
            param_set: res.range_param_set,
            cube: layout.cube,
            num_doppler_chirps: cfg.num_doppler_chirps as usize,
            num_ant,
        });
        debug!(
            "range: configured {} samples -> {} bins, param set {}",
            cfg.adc.num_adc_samples, cfg.num_range_bins, res.range_param_set
        );
        Ok(())
    }

    pub fn control<A, E>(&mut self, hw: &mut HwCtx<'_, A, E>, cmd: StageControl) -> Result<(), RangeError>
    where
        A: Accelerator + ?Sized,
        E: TransferEngine + ?Sized,
    {
        match cmd {
            StageControl::PreTrigger => {
                let c = self.configured.as_ref().ok_or(RangeError::NotConfigured)?;
                hw.hwa.arm(c.param_set, 1)?;
                trace!("range: pre-triggered param set {}", c.param_set);
            }
            StageControl::ResetDcCalibration => {
                if let Some(dc) = self.dc.as_mut() {
                    dc.reset();
                }
            }
        }
        Ok(())
    }

    /// 执行距离 FFT
    ///
    /// 已预触发时直接等待数据处理完成；否则先装载参数集。
    pub fn run<A, E>(&mut self, hw: &mut HwCtx<'_, A, E>) -> Result<RangeOutput, RangeError>
    where
        A: Accelerator + ?Sized,
        E: TransferEngine + ?Sized,
    {
        let c = self.configured.as_ref().ok_or(RangeError::NotConfigured)?;
        if hw.hwa.armed() != Some((c.param_set, 1)) {
            hw.hwa.arm(c.param_set, 1)?;
        }
        hw.hwa.trigger(hw.mem)?;
        hw.hwa.wait_done()?;

        let dc = match self.dc.as_mut() {
            None => DcState::Disabled,
            Some(dc) => apply_dc(dc, c, hw.mem)?,
        };
        Ok(RangeOutput { dc })
    }
}

fn apply_dc(
    dc: &mut DcCalib,
    c: &Configured,
    mem: &mut objdet_hwa::MemoryMap,
) -> Result<DcState, RangeError> {
    let (k, ant) = (c.num_doppler_chirps, c.num_ant);
    let element = |bin: usize, chirp: usize, a: usize| (bin * k + chirp) * ant + a;

    if let Some(mean) = &dc.mean {
        for (i, bin) in dc.bins().enumerate() {
            for chirp in 0..k {
                for a in 0..ant {
                    let m = mean[i * ant + a];
                    let idx = element(bin, chirp, a);
                    let s = mem.read_cmplx16(c.cube, idx)?;
                    let out = Cmplx16::new(
                        saturate_i16(s.re as f32 - m.re as f32),
                        saturate_i16(s.im as f32 - m.im as f32),
                    );
                    mem.write_cmplx16(c.cube, idx, out)?;
                }
            }
        }
        return Ok(DcState::Calibrated);
    }

    let bins: SmallVec<[usize; 16]> = dc.bins().collect();
    for (i, &bin) in bins.iter().enumerate() {
        for chirp in 0..k {
            for a in 0..ant {
                let s = mem.read_cmplx16(c.cube, element(bin, chirp, a))?;
                let acc = &mut dc.sums[i * ant + a];
                acc.0 += s.re as i64;
                acc.1 += s.im as i64;
            }
        }
    }
    dc.frames += 1;
    if dc.frames < dc.num_avg_frames {
        return Ok(DcState::Accumulating(dc.frames));
    }
    let count = dc.frames as i64 * k as i64;
    let mean = dc
        .sums
        .iter()
        .map(|&(re, im)| Cmplx16::new((re / count) as i16, (im / count) as i16))
        .collect();
    dc.mean = Some(mean);
    debug!("range: DC signature calibrated over {} frames", dc.frames);
    Ok(DcState::Accumulating(dc.frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use objdet_protocol::{AdcConfig, CompressionCfg, DcRangeSigCfg};

    #[test]
    fn test_validate() {
        let cfg = StaticConfig::default();
        assert!(RangeStage::validate(&cfg, 1 << 20).is_ok());

        let bad_bins = StaticConfig {
            num_range_bins: 200,
            ..Default::default()
        };
        assert!(matches!(
            RangeStage::validate(&bad_bins, 1 << 20),
            Err(RangeError::RangeBins { bins: 200, .. })
        ));

        let too_many_rx = StaticConfig {
            adc: AdcConfig {
                num_rx: 5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            RangeStage::validate(&too_many_rx, 1 << 20),
            Err(RangeError::Antennas { rx: 5, .. })
        ));

        assert!(matches!(
            RangeStage::validate(&cfg, 1024),
            Err(RangeError::AdcBuffer { .. })
        ));
    }

    #[test]
    fn test_dc_calibration_removes_constant_offset() {
        use crate::config::DpcLimits;
        use crate::planner::{HwCapacity, plan_common, plan_subframe};
        use objdet_hwa::{MemoryMap, SoftEdma, SoftHwa};
        use objdet_protocol::CommonConfig;

        let cfg = StaticConfig {
            dc_range_sig: DcRangeSigCfg {
                enabled: true,
                num_avg_frames: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut mem = MemoryMap::new(256 * 1024, 16 * 1024, 256 * 1024, 1024 * 1024);
        let common = plan_common(&mut mem, &CommonConfig::default()).unwrap();
        let capacity = HwCapacity {
            param_sets: 32,
            channels: 64,
        };
        let plan = plan_subframe(&mut mem, &common, &cfg, &DpcLimits::default(), capacity).unwrap();
        let cube = plan.layout.cube;
        let (k, ant) = (cfg.num_doppler_chirps as usize, cfg.num_virtual_antennas());
        let element = |bin: usize, chirp: usize, a: usize| (bin * k + chirp) * ant + a;

        let (mut hwa, mut edma) = (SoftHwa::default(), SoftEdma::default());
        let mut hw = HwCtx::new(&mut hwa, &mut edma, &mut mem);
        let mut stage = RangeStage::new();
        stage
            .configure(&mut hw, &cfg, &plan.layout, &plan.resources)
            .unwrap();

        let adc = hw.mem.adc_region(cfg.adc_frame_bytes()).unwrap();
        let offset = vec![Cmplx16::new(1000, 0); cfg.adc_frame_bytes() / Cmplx16::SIZE];
        fn frame(
            stage: &mut RangeStage,
            hw: &mut HwCtx<'_, SoftHwa, SoftEdma>,
            adc: MemRegion,
            samples: &[Cmplx16],
        ) -> DcState {
            hw.mem.write_cmplx16_slice(adc, samples).unwrap();
            stage.run(hw).unwrap().dc
        }

        assert_eq!(frame(&mut stage, &mut hw, adc, &offset), DcState::Accumulating(1));
        let raw_dc = hw.mem.read_cmplx16(cube, element(0, 0, 0)).unwrap();
        let far_bin = hw.mem.read_cmplx16(cube, element(100, 3, 2)).unwrap();
        assert_ne!(raw_dc, Cmplx16::new(0, 0));
        assert_eq!(frame(&mut stage, &mut hw, adc, &offset), DcState::Accumulating(2));
        assert_eq!(hw.mem.read_cmplx16(cube, element(0, 0, 0)).unwrap(), raw_dc);

        assert_eq!(frame(&mut stage, &mut hw, adc, &offset), DcState::Calibrated);
        for chirp in 0..k {
            for a in 0..ant {
                assert_eq!(
                    hw.mem.read_cmplx16(cube, element(0, chirp, a)).unwrap(),
                    Cmplx16::new(0, 0)
                );
            }
        }
        // 标定范围外的单元不动
        assert_eq!(hw.mem.read_cmplx16(cube, element(100, 3, 2)).unwrap(), far_bin);

        // 相同配置重新装载后保留标定结果
        stage
            .configure(&mut hw, &cfg, &plan.layout, &plan.resources)
            .unwrap();
        assert_eq!(frame(&mut stage, &mut hw, adc, &offset), DcState::Calibrated);

        stage
            .control(&mut hw, StageControl::ResetDcCalibration)
            .unwrap();
        assert_eq!(frame(&mut stage, &mut hw, adc, &offset), DcState::Accumulating(1));
    }

    #[test]
    fn test_dc_signature_rules() {
        let with_compression = StaticConfig {
            dc_range_sig: DcRangeSigCfg {
                enabled: true,
                ..Default::default()
            },
            compression: CompressionCfg {
                enabled: true,
                ratio: 0.5,
            },
            ..Default::default()
        };
        assert_eq!(
            RangeStage::validate(&with_compression, 1 << 20),
            Err(RangeError::DcSignatureWithCompression)
        );

        let wide = StaticConfig {
            dc_range_sig: DcRangeSigCfg {
                enabled: true,
                positive_bin_idx: 200,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            RangeStage::validate(&wide, 1 << 20),
            Err(RangeError::DcSignatureBins { .. })
        ));
    }
}
