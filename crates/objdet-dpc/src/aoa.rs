//! 到达角估计
//!
//! 对每个有效目标：
//!
//! 1. TDM-MIMO 多普勒相位补偿（TX 时隙 `t` 乘以 `exp(-j2π·d·t/(numTx·Nd))`）
//! 2. 乘以 Q14 RX 通道补偿系数
//! 3. 方位行按列零插入后做方位 FFT，峰值附近三点二次插值
//! 4. 相位表给出导向矢量，单频点 DFT 得到方位行与俯仰行的相关值
//! 5. 俯仰相位 `arg(conj(az) · el)`
//! 6. 由距离与两个角度求 `x, y, z`；`y² <= 0` 的目标丢弃
//! 7. 视场检查（角度正弦）
//! 8. 速度与信噪比
//!
//! 几何或视场不满足的目标静默丢弃，只计数。

use crate::error::AoaError;
use crate::planner::{CommonLayout, SubFrameLayout};
use crate::records::read_raw;
use num_complex::Complex32;
use objdet_hwa::soft::fft::{FftBank, to_complex};
use objdet_hwa::{MemRegion, MemoryMap};
use objdet_protocol::constants::{
    CALIB_ONE, MAX_AZIMUTH_COLUMNS, PHASE_TABLE_LEN, POINT_OBJ_BYTES, SIDE_INFO_BYTES,
    log2_q11_to_decidb,
};
use objdet_protocol::{CommonConfig, FovAoa, PointObj, SideInfo, StaticConfig};
use std::f32::consts::PI;
use tracing::{debug, trace};

/// 方位 FFT 点数范围
pub const MIN_AOA_FFT_SIZE: u16 = 16;
pub const MAX_AOA_FFT_SIZE: u16 = 256;

/// 小角度近似的适用范围：`|im| <= 0.1 * re`
const SMALL_ANGLE_RATIO: f32 = 0.1;

/// 一帧 AoA 结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AoaOutput {
    pub objects: Vec<PointObj>,
    pub side_info: Vec<SideInfo>,
    /// 几何不成立（`y² <= 0`）而丢弃
    pub dropped_geometry: u32,
    /// 超出角度视场而丢弃
    pub dropped_fov: u32,
}

#[derive(Debug, Clone, Copy)]
struct Antenna {
    row: u8,
    col: u8,
    tx: usize,
    calib: Complex32,
}

#[derive(Debug, Clone, Copy)]
struct FovSines {
    az: (f32, f32),
    el: (f32, f32),
}

impl FovSines {
    fn new(fov: &FovAoa) -> Self {
        let sin = |deg: f32| deg.to_radians().sin();
        Self {
            az: (sin(fov.min_azimuth_deg), sin(fov.max_azimuth_deg)),
            el: (sin(fov.min_elevation_deg), sin(fov.max_elevation_deg)),
        }
    }

    fn contains(&self, sin_az: f32, sin_el: f32) -> bool {
        (self.az.0..=self.az.1).contains(&sin_az) && (self.el.0..=self.el.1).contains(&sin_el)
    }
}

#[derive(Debug, Clone)]
struct Configured {
    fft_size: usize,
    phase_table: Vec<Complex32>,
    antennas: Vec<Antenna>,
    azimuth_mask: u32,
    has_elevation: bool,
    num_tx: usize,
    num_doppler_bins: usize,
    range_step: f32,
    range_bias: f32,
    doppler_step: f32,
    fov: FovSines,
    object_list: MemRegion,
    point_cloud: MemRegion,
    side_info: MemRegion,
}

/// 到达角估计器
#[derive(Debug, Default)]
pub struct AoaEstimator {
    configured: Option<Configured>,
    fft: FftBank,
}

impl AoaEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(cfg: &StaticConfig, common: &CommonConfig) -> Result<(), AoaError> {
        let n = cfg.aoa.fft_size;
        if !n.is_power_of_two() || !(MIN_AOA_FFT_SIZE..=MAX_AOA_FFT_SIZE).contains(&n) {
            return Err(AoaError::FftSize(n));
        }
        let columns = common.antenna.num_columns();
        if (n as usize) < columns {
            return Err(AoaError::Aperture { fft: n, columns });
        }
        let virtual_antennas = cfg.num_virtual_antennas();
        if common.antenna.len() != virtual_antennas {
            return Err(AoaError::Geometry {
                geometry: common.antenna.len(),
                virtual_antennas,
            });
        }
        Self::validate_fov(&cfg.fov_aoa)
    }

    pub fn validate_fov(fov: &FovAoa) -> Result<(), AoaError> {
        let valid = |min: f32, max: f32| min < max && min >= -90.0 && max <= 90.0;
        if !valid(fov.min_azimuth_deg, fov.max_azimuth_deg) {
            return Err(AoaError::FovAzimuth {
                min_deg: fov.min_azimuth_deg,
                max_deg: fov.max_azimuth_deg,
            });
        }
        if !valid(fov.min_elevation_deg, fov.max_elevation_deg) {
            return Err(AoaError::FovElevation {
                min_deg: fov.min_elevation_deg,
                max_deg: fov.max_elevation_deg,
            });
        }
        Ok(())
    }

    /// 装载相位表与补偿系数，预计算视场正弦边界
    pub fn configure(
        &mut self,
        mem: &MemoryMap,
        cfg: &StaticConfig,
        common: &CommonConfig,
        common_layout: &CommonLayout,
        layout: &SubFrameLayout,
    ) -> Result<(), AoaError> {
        Self::validate(cfg, common)?;

        let mut raw = vec![objdet_protocol::Cmplx16::ZERO; PHASE_TABLE_LEN];
        mem.read_cmplx16_slice(common_layout.phase_table, &mut raw)?;
        let phase_table = raw
            .iter()
            .map(|s| to_complex(*s) / i16::MAX as f32)
            .collect();

        let num_rx = cfg.adc.num_rx as usize;
        let calib_one = CALIB_ONE as f32;
        let antennas = common
            .antenna
            .positions
            .iter()
            .enumerate()
            .map(|(v, pos)| Antenna {
                row: pos.row,
                col: pos.col,
                tx: v / num_rx,
                calib: to_complex(common.rx_chan_comp.coefficient(v)) / calib_one,
            })
            .collect();

        self.configured = Some(Configured {
            fft_size: cfg.aoa.fft_size as usize,
            phase_table,
            antennas,
            azimuth_mask: common.azimuth_mask,
            has_elevation: common.antenna.has_elevation(),
            num_tx: cfg.adc.num_tx as usize,
            num_doppler_bins: cfg.num_doppler_bins as usize,
            range_step: cfg.range_step_m,
            range_bias: common.rx_chan_comp.range_bias_m,
            doppler_step: cfg.doppler_step_mps,
            fov: FovSines::new(&cfg.fov_aoa),
            object_list: layout.object_list,
            point_cloud: layout.point_cloud,
            side_info: layout.side_info,
        });
        debug!(
            "aoa: configured {}-point azimuth FFT, elevation {}",
            cfg.aoa.fft_size,
            common.antenna.has_elevation()
        );
        Ok(())
    }

    /// 估计 `num_objects` 个有效目标的位置，结果写入点云与附加信息区
    pub fn run(&mut self, mem: &mut MemoryMap, num_objects: usize) -> Result<AoaOutput, AoaError> {
        let c = self.configured.as_ref().ok_or(AoaError::NotConfigured)?;
        let n = c.fft_size;
        let mut out = AoaOutput::default();
        let mut az = vec![Complex32::new(0.0, 0.0); n];
        let mut x = Vec::with_capacity(c.antennas.len());

        for i in 0..num_objects {
            let obj = read_raw(mem, c.object_list, i, c.antennas.len())?;
            let d = obj.doppler_idx as f32;

            // 0-1. TDM 补偿与通道补偿
            x.clear();
            for (ant, s) in c.antennas.iter().zip(&obj.samples) {
                let tdm = -2.0 * PI * d * ant.tx as f32 / (c.num_tx * c.num_doppler_bins) as f32;
                x.push(to_complex(*s) * Complex32::from_polar(1.0, tdm) * ant.calib);
            }

            // 2. 方位 FFT
            az.fill(Complex32::new(0.0, 0.0));
            for (ant, v) in c.antennas.iter().zip(&x) {
                if ant.row == 0 && column_enabled(c.azimuth_mask, ant.col) {
                    az[ant.col as usize] += *v;
                }
            }
            self.fft.forward(&mut az);
            let refined = refine_peak(&az);

            // 3-4. 导向矢量相关
            let mut peak_az = Complex32::new(0.0, 0.0);
            let mut peak_el = Complex32::new(0.0, 0.0);
            for (ant, v) in c.antennas.iter().zip(&x) {
                let steer = c.steering(ant.col, refined).conj();
                if ant.row == 0 {
                    if column_enabled(c.azimuth_mask, ant.col) {
                        peak_az += *v * steer;
                    }
                } else {
                    peak_el += *v * steer;
                }
            }

            // 5. 俯仰相位
            let phase = if c.has_elevation {
                elevation_phase(peak_az.conj() * peak_el)
            } else {
                0.0
            };

            // 6. 位置
            let range = (obj.range_idx as f32 * c.range_step - c.range_bias).max(0.0);
            let px = range * 2.0 * refined / n as f32;
            let pz = range * phase / PI;
            let y2 = range * range - px * px - pz * pz;
            if y2 <= 0.0 {
                out.dropped_geometry += 1;
                trace!("aoa: object {} dropped, y^2 = {}", i, y2);
                continue;
            }
            let py = y2.sqrt();

            // 7. 视场
            let sin_az = px / (px * px + py * py).sqrt();
            let sin_el = pz / range;
            if !c.fov.contains(sin_az, sin_el) {
                out.dropped_fov += 1;
                continue;
            }

            // 8. 速度与信噪比
            let point = PointObj {
                x: px,
                y: py,
                z: pz,
                velocity: d * c.doppler_step,
            };
            let side = SideInfo {
                snr: log2_q11_to_decidb(obj.peak as i32 - obj.noise as i32),
                noise: log2_q11_to_decidb(obj.noise as i32),
            };
            let k = out.objects.len();
            mem.bytes_mut(c.point_cloud.element(k, POINT_OBJ_BYTES)?)?
                .copy_from_slice(&point.to_le_bytes());
            mem.bytes_mut(c.side_info.element(k, SIDE_INFO_BYTES)?)?
                .copy_from_slice(&side.to_le_bytes());
            out.objects.push(point);
            out.side_info.push(side);
        }
        debug!(
            "aoa: {} objects, {} dropped (geometry), {} dropped (fov)",
            out.objects.len(),
            out.dropped_geometry,
            out.dropped_fov
        );
        Ok(out)
    }
}

impl Configured {
    /// `exp(j2π·col·f/N)`，由相位表查得
    fn steering(&self, col: u8, refined: f32) -> Complex32 {
        let l = PHASE_TABLE_LEN as f32;
        let idx = (col as f32 * refined * l / self.fft_size as f32).round() as i64;
        self.phase_table[idx.rem_euclid(PHASE_TABLE_LEN as i64) as usize]
    }
}

fn column_enabled(mask: u32, col: u8) -> bool {
    (col as usize) < MAX_AZIMUTH_COLUMNS && mask & (1 << col) != 0
}

/// 峰值位置的二次插值，返回有符号的小数频点
fn refine_peak(spectrum: &[Complex32]) -> f32 {
    let n = spectrum.len();
    let mags: Vec<f32> = spectrum.iter().map(|v| v.norm()).collect();
    let k = mags
        .iter()
        .enumerate()
        .fold(0, |best, (i, &m)| if m > mags[best] { i } else { best });
    let a = mags[(k + n - 1) % n];
    let b = mags[k];
    let c = mags[(k + 1) % n];
    let denom = a - 2.0 * b + c;
    let delta = if denom.abs() > f32::EPSILON {
        (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    let refined = k as f32 + delta;
    if refined >= n as f32 / 2.0 {
        refined - n as f32
    } else {
        refined
    }
}

/// 俯仰相位，取值 `(-π, π]`
fn elevation_phase(v: Complex32) -> f32 {
    let phase = if v.re > 0.0 && v.im.abs() <= SMALL_ANGLE_RATIO * v.re {
        v.im / v.re
    } else {
        v.im.atan2(v.re)
    };
    if phase <= -PI { phase + 2.0 * PI } else { phase }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objdet_protocol::AntennaGeometry;

    #[test]
    fn test_refine_peak() {
        let n = 64;
        // 单音位于 5.25 与 -3 频点
        for &(f, expected) in &[(5.25f32, 5.25f32), (61.0, -3.0)] {
            let mut buf: Vec<Complex32> = (0..n)
                .map(|i| {
                    if i < 8 {
                        Complex32::from_polar(1.0, 2.0 * PI * f * i as f32 / n as f32)
                    } else {
                        Complex32::new(0.0, 0.0)
                    }
                })
                .collect();
            FftBank::new().forward(&mut buf);
            let refined = refine_peak(&buf);
            assert!((refined - expected).abs() < 0.1, "{} vs {}", refined, expected);
        }
    }

    #[test]
    fn test_elevation_phase() {
        assert!((elevation_phase(Complex32::new(1.0, 0.05)) - 0.05).abs() < 1e-6);
        assert!((elevation_phase(Complex32::new(0.0, 1.0)) - PI / 2.0).abs() < 1e-6);
        assert!((elevation_phase(Complex32::new(-1.0, 0.0)) - PI).abs() < 1e-6);
    }

    #[test]
    fn test_validate() {
        let common = CommonConfig::default();
        let cfg = StaticConfig::default();
        assert!(AoaEstimator::validate(&cfg, &common).is_ok());

        let mut bad = cfg.clone();
        bad.aoa.fft_size = 48;
        assert_eq!(AoaEstimator::validate(&bad, &common), Err(AoaError::FftSize(48)));

        let elevation = CommonConfig {
            antenna: AntennaGeometry::tdm_3tx4rx_elevation(),
            ..Default::default()
        };
        assert!(matches!(
            AoaEstimator::validate(&cfg, &elevation),
            Err(AoaError::Geometry {
                geometry: 12,
                virtual_antennas: 8
            })
        ));

        let mut fov = cfg.clone();
        fov.fov_aoa.min_azimuth_deg = 30.0;
        fov.fov_aoa.max_azimuth_deg = 10.0;
        assert!(matches!(
            AoaEstimator::validate(&fov, &common),
            Err(AoaError::FovAzimuth { .. })
        ));
    }

    #[test]
    fn test_degenerate_geometry_dropped() {
        use crate::config::DpcLimits;
        use crate::planner::{HwCapacity, plan_common, plan_subframe};
        use crate::records::{RawObj, write_raw};
        use objdet_protocol::Cmplx16;

        let cfg = StaticConfig::default();
        let common = CommonConfig::default();
        let mut mem = MemoryMap::new(0, 16 * 1024, 64 * 1024, 1024 * 1024);
        let common_layout = plan_common(&mut mem, &common).unwrap();
        let hw = HwCapacity {
            param_sets: 32,
            channels: 64,
        };
        let layout = plan_subframe(&mut mem, &common_layout, &cfg, &DpcLimits::default(), hw)
            .unwrap()
            .layout;

        let ant = cfg.num_virtual_antennas();
        // 距离 0 处 y² = 0，距离 40 处为正前方目标
        for (i, range_idx) in [0u16, 40].into_iter().enumerate() {
            let obj = RawObj {
                range_idx,
                doppler_idx: 0,
                peak: 20000,
                noise: 2000,
                samples: (0..ant).map(|_| Cmplx16::new(1000, 0)).collect(),
            };
            write_raw(&mut mem, layout.object_list, i, &obj).unwrap();
        }

        let mut aoa = AoaEstimator::new();
        aoa.configure(&mem, &cfg, &common, &common_layout, &layout)
            .unwrap();
        let out = aoa.run(&mut mem, 1).unwrap();
        assert_eq!(out.dropped_geometry, 1);
        assert_eq!(out.dropped_fov, 0);
        assert!(out.objects.is_empty());
        assert!(out.side_info.is_empty());

        let out = aoa.run(&mut mem, 2).unwrap();
        assert_eq!(out.dropped_geometry, 1);
        assert_eq!(out.objects.len(), 1);
        assert!(out.objects[0].x.abs() < 1e-3);
        assert!((out.objects[0].y - 40.0 * cfg.range_step_m).abs() < 1e-3);
    }

    #[test]
    fn test_fov_sines() {
        let fov = FovSines::new(&FovAoa {
            min_azimuth_deg: -30.0,
            max_azimuth_deg: 30.0,
            ..Default::default()
        });
        assert!(fov.contains(0.49, 0.0));
        assert!(!fov.contains(0.51, 0.0));
    }
}
