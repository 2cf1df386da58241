//! 多普勒处理阶段
//!
//! 逐距离单元处理雷达立方体：
//!
//! 1. 传输一行立方体到本地暂存（压缩时再解压）
//! 2. 可选静态杂波去除：每个天线减去 chirp 均值
//! 3. 多普勒 FFT 与检测行，循环 CFAR
//! 4. 多普勒峰值检查与距离视场检查后，原始目标追加写入已消费的立方体行
//! 5. 检测行写入检测矩阵
//!
//! 全部距离单元处理完后，按检测矩阵做距离方向峰值分组，原地压缩目标列表。

use super::HwCtx;
use crate::error::DopplerError;
use crate::planner::{StageResources, SubFrameLayout};
use crate::records::{RawObj, fold_doppler, read_raw, write_raw};
use crate::window;
use objdet_hwa::soft::codec::BlockCodec;
use objdet_hwa::{
    Accelerator, CfarParams, DecompressParams, DopplerFftParams, MemRegion, MemoryMap, ParamSet,
    TransferEngine, TransferRequest, TransferShape, fft_scale_shift,
};
use objdet_protocol::{Cmplx16, PeakGroupingCfg, StaticConfig, saturate_i16};
use tracing::{debug, trace, warn};

/// 多普勒 FFT 最大点数
pub const MAX_DOPPLER_FFT_SIZE: u16 = 1024;

/// 一帧多普勒处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DopplerOutput {
    /// 原始目标数（峰值分组之后）
    pub num_objects: usize,
    /// 超出容量被丢弃的目标数
    pub clipped: u32,
}

#[derive(Debug, Clone)]
struct Configured {
    decompress_param_set: Option<usize>,
    fft_param_set: usize,
    row_channel: u8,
    det_channel: Option<u8>,
    cube: MemRegion,
    det_matrix: Option<MemRegion>,
    input: MemRegion,
    fft_input: MemRegion,
    output: MemRegion,
    det_row: MemRegion,
    hits: MemRegion,
    num_range_bins: usize,
    num_chirps: usize,
    num_doppler_bins: usize,
    num_ant: usize,
    row_bytes: usize,
    record_bytes: usize,
    raw_capacity: usize,
    clutter_removal: bool,
    peak_grouping: PeakGroupingCfg,
    /// 距离视场（单元，闭区间）
    fov_bins: (usize, usize),
}

/// 多普勒处理阶段
#[derive(Debug, Clone, Default)]
pub struct DopplerStage {
    configured: Option<Configured>,
}

impl DopplerStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(cfg: &StaticConfig) -> Result<(), DopplerError> {
        let (bins, chirps) = (cfg.num_doppler_bins, cfg.num_doppler_chirps);
        if !bins.is_power_of_two() || bins < chirps || chirps == 0 {
            return Err(DopplerError::DopplerBins { bins, chirps });
        }
        if bins > MAX_DOPPLER_FFT_SIZE {
            return Err(DopplerError::FftTooLarge(bins));
        }
        let cfar = &cfg.cfar_doppler;
        if !cfar.enabled {
            return Err(DopplerError::CfarDisabled);
        }
        if !cfar.win_len.is_power_of_two() {
            return Err(DopplerError::CfarWindow { win: cfar.win_len });
        }
        if 2 * (cfar.win_len as u16 + cfar.guard_len as u16) >= bins {
            return Err(DopplerError::CfarSpan {
                win: cfar.win_len,
                guard: cfar.guard_len,
                bins,
            });
        }
        if cfar.threshold_db < 0.0 {
            return Err(DopplerError::Threshold(cfar.threshold_db));
        }
        if cfg.compression.enabled {
            let ant = cfg.num_virtual_antennas();
            let block = cfg.cube_block_bytes();
            if BlockCodec::new(ant, block).is_err() {
                return Err(DopplerError::CompressionRatio {
                    ratio: cfg.compression.ratio,
                    mantissa_bits: (8 * block).saturating_sub(8) / (2 * ant).max(1),
                });
            }
        }
        let fov = &cfg.fov_range;
        if fov.min_m < 0.0 || fov.min_m >= fov.max_m {
            return Err(DopplerError::FovRange {
                min_m: fov.min_m,
                max_m: fov.max_m,
            });
        }
        Ok(())
    }

    pub fn configure<A, E>(
        &mut self,
        hw: &mut HwCtx<'_, A, E>,
        cfg: &StaticConfig,
        layout: &SubFrameLayout,
        res: &StageResources,
    ) -> Result<(), DopplerError>
    where
        A: Accelerator + ?Sized,
        E: TransferEngine + ?Sized,
    {
        Self::validate(cfg)?;
        let d = &layout.doppler;
        let k = cfg.num_doppler_chirps as usize;
        let n_dop = cfg.num_doppler_bins as usize;
        let ant = cfg.num_virtual_antennas();

        let coeffs = window::generate(cfg.doppler_window, k);
        hw.mem.write_u16_slice(d.window, &coeffs)?;

        let base = res.doppler_param_set;
        let decompress_param_set = match d.decompressed {
            Some(dst) => {
                hw.hwa.set_param_set(
                    base,
                    ParamSet::Decompress(DecompressParams {
                        src: d.input,
                        dst,
                        num_blocks: cfg.num_doppler_chirps,
                        num_ant: ant as u8,
                        block_bytes: cfg.cube_block_bytes() as u16,
                    }),
                )?;
                Some(base)
            }
            None => None,
        };
        hw.hwa.set_param_set(
            base + 1,
            ParamSet::DopplerFft(DopplerFftParams {
                input: d.fft_input(),
                window: d.window,
                output: d.output,
                det_row: d.det_row,
                num_chirps: cfg.num_doppler_chirps,
                fft_size: cfg.num_doppler_bins,
                num_ant: ant as u8,
                scale_shift: fft_scale_shift(n_dop),
            }),
        )?;
        let cfar = &cfg.cfar_doppler;
        hw.hwa.set_param_set(
            base + 2,
            ParamSet::Cfar(CfarParams {
                input: d.det_row,
                output: d.hits,
                num_cells: cfg.num_doppler_bins,
                averaging: cfar.averaging,
                win_len: cfar.win_len,
                guard_len: cfar.guard_len,
                threshold: cfar.threshold_q11(),
                cyclic: true,
            }),
        )?;

        let row_bytes = cfg.cube_row_bytes();
        let [row_channel, det_ch] = res.doppler_channels;
        hw.edma.configure(
            row_channel,
            TransferRequest::new(
                layout.cube.sub(0, row_bytes)?,
                d.input,
                TransferShape::contiguous(row_bytes)?,
            ),
        )?;
        let det_channel = match layout.det_matrix {
            Some(det) => {
                hw.edma.configure(
                    det_ch,
                    TransferRequest::new(
                        d.det_row,
                        det.sub(0, n_dop * 2)?,
                        TransferShape::contiguous(n_dop * 2)?,
                    ),
                )?;
                Some(det_ch)
            }
            None => None,
        };

        let step = cfg.range_step_m;
        let last = cfg.num_range_bins as usize - 1;
        let fov_lo = (cfg.fov_range.min_m / step).ceil().max(0.0) as usize;
        let fov_hi = ((cfg.fov_range.max_m / step).floor() as usize).min(last);

        self.configured = Some(Configured {
            decompress_param_set,
            fft_param_set: base + 1,
            row_channel,
            det_channel,
            cube: layout.cube,
            det_matrix: layout.det_matrix,
            input: d.input,
            fft_input: d.fft_input(),
            output: d.output,
            det_row: d.det_row,
            hits: d.hits,
            num_range_bins: cfg.num_range_bins as usize,
            num_chirps: k,
            num_doppler_bins: n_dop,
            num_ant: ant,
            row_bytes,
            record_bytes: cfg.raw_record_bytes(),
            raw_capacity: layout.raw_capacity,
            clutter_removal: cfg.static_clutter_removal,
            peak_grouping: cfg.peak_grouping,
            fov_bins: (fov_lo, fov_hi),
        });
        debug!(
            "doppler: configured {} chirps -> {} bins, {} antennas, compression {}",
            k,
            n_dop,
            ant,
            decompress_param_set.is_some()
        );
        Ok(())
    }

    pub fn run<A, E>(&mut self, hw: &mut HwCtx<'_, A, E>) -> Result<DopplerOutput, DopplerError>
    where
        A: Accelerator + ?Sized,
        E: TransferEngine + ?Sized,
    {
        let c = self.configured.as_ref().ok_or(DopplerError::NotConfigured)?;
        let n_dop = c.num_doppler_bins;
        let mut det = vec![0u16; n_dop];
        let mut samples = vec![Cmplx16::ZERO; c.num_ant];
        let mut count = 0usize;
        let mut clipped = 0u32;

        for r in 0..c.num_range_bins {
            let row = c.cube.sub(r * c.row_bytes, c.row_bytes)?;
            hw.edma.retarget(c.row_channel, row, c.input)?;
            hw.transfer(c.row_channel)?;

            if let Some(ps) = c.decompress_param_set {
                hw.run_param_sets(ps, 1)?;
            }
            if c.clutter_removal {
                remove_clutter(hw.mem, c.fft_input, c.num_chirps, c.num_ant)?;
            }
            let status = hw.run_param_sets(c.fft_param_set, 2)?;
            hw.mem.read_u16_slice(c.det_row, &mut det)?;

            for h in 0..status.cfar_hits {
                let bin = hw.mem.read_u16(c.hits, 2 * h)? as usize;
                let noise = hw.mem.read_u16(c.hits, 2 * h + 1)?;
                if c.peak_grouping.in_doppler && !is_cyclic_peak(&det, bin) {
                    continue;
                }
                if r < c.fov_bins.0 || r > c.fov_bins.1 {
                    continue;
                }
                // 记录只能写入已消费的立方体行
                if count >= c.raw_capacity || (count + 1) * c.record_bytes > (r + 1) * c.row_bytes {
                    clipped += 1;
                    continue;
                }
                let src = c.output.sub(bin * c.num_ant * Cmplx16::SIZE, c.num_ant * Cmplx16::SIZE)?;
                hw.mem.read_cmplx16_slice(src, &mut samples)?;
                let obj = RawObj {
                    range_idx: r as u16,
                    doppler_idx: fold_doppler(bin as u16, n_dop as u16),
                    peak: det[bin],
                    noise,
                    samples: samples.iter().copied().collect(),
                };
                trace!(
                    "doppler: object {} at range {} doppler {} peak {}",
                    count, r, obj.doppler_idx, obj.peak
                );
                write_raw(hw.mem, c.cube, count, &obj)?;
                count += 1;
            }

            if let (Some(ch), Some(det_matrix)) = (c.det_channel, c.det_matrix) {
                let dst = det_matrix.sub(r * n_dop * 2, n_dop * 2)?;
                hw.edma.retarget(ch, c.det_row, dst)?;
                hw.transfer(ch)?;
            }
        }

        if c.peak_grouping.in_range
            && let Some(det_matrix) = c.det_matrix
        {
            count = group_in_range(hw.mem, c, det_matrix, count)?;
        }
        if clipped > 0 {
            warn!("doppler: raw object list full, {} objects clipped", clipped);
        }
        debug!("doppler: {} raw objects", count);
        Ok(DopplerOutput {
            num_objects: count,
            clipped,
        })
    }
}

/// `det[bin]` 不小于循环意义下的两个相邻单元
fn is_cyclic_peak(det: &[u16], bin: usize) -> bool {
    let n = det.len();
    let left = det[(bin + n - 1) % n];
    let right = det[(bin + 1) % n];
    det[bin] >= left && det[bin] >= right
}

/// 每个天线减去 chirp 方向均值
fn remove_clutter(
    mem: &mut MemoryMap,
    region: MemRegion,
    chirps: usize,
    ant: usize,
) -> Result<(), DopplerError> {
    let mut row = vec![Cmplx16::ZERO; chirps * ant];
    mem.read_cmplx16_slice(region, &mut row)?;
    for a in 0..ant {
        let (re, im) = (0..chirps).fold((0i64, 0i64), |(re, im), c| {
            let s = row[c * ant + a];
            (re + s.re as i64, im + s.im as i64)
        });
        let mean_re = re as f32 / chirps as f32;
        let mean_im = im as f32 / chirps as f32;
        for c in 0..chirps {
            let s = &mut row[c * ant + a];
            *s = Cmplx16::new(
                saturate_i16(s.re as f32 - mean_re),
                saturate_i16(s.im as f32 - mean_im),
            );
        }
    }
    mem.write_cmplx16_slice(region, &row)?;
    Ok(())
}

/// 距离方向峰值分组：只保留不小于距离相邻单元的目标
fn group_in_range(
    mem: &mut MemoryMap,
    c: &Configured,
    det_matrix: MemRegion,
    count: usize,
) -> Result<usize, DopplerError> {
    let n_dop = c.num_doppler_bins;
    let cell = |mem: &MemoryMap, r: usize, d: usize| mem.read_u16(det_matrix, r * n_dop + d);
    let mut kept = 0usize;
    for i in 0..count {
        let obj = read_raw(mem, c.cube, i, c.num_ant)?;
        let r = obj.range_idx as usize;
        let d = obj.doppler_bin(n_dop as u16) as usize;
        let center = cell(mem, r, d)?;
        let left = if r > 0 { cell(mem, r - 1, d)? } else { 0 };
        let right = if r + 1 < c.num_range_bins {
            cell(mem, r + 1, d)?
        } else {
            0
        };
        if center >= left && center >= right {
            if kept != i {
                write_raw(mem, c.cube, kept, &obj)?;
            }
            kept += 1;
        }
    }
    Ok(kept)
}
