//! 合成 ADC 场景
//!
//! 为一组点目标生成 `[chirp][rx][sample]` 复数 ADC 样本。每个目标的相位由三部分组成：
//!
//! ```text
//! 2π·r·s/N            距离（N 为距离 FFT 点数）
//! 2π·d·n/(numTx·Nd)   多普勒（n = k·numTx + t 为帧内 chirp 序号）
//! π·(col·u + row·w)   空间相位（u/w 为方位/俯仰方向余弦）
//! ```

use crate::{AdcSource, HwaError};
use bytes::BufMut;
use objdet_protocol::{AntennaGeometry, AntennaPos, Cmplx16, StaticConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;
use tracing::trace;

/// 一个点目标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneTarget {
    /// 距离单元（可为小数）
    pub range_bin: f32,
    /// 多普勒单元（有符号）
    pub doppler_bin: f32,
    /// 方位方向余弦 `x / r`
    pub sin_azimuth: f32,
    /// 俯仰方向余弦 `z / r`
    pub sin_elevation: f32,
    /// 每个样本的幅度
    pub amplitude: f32,
}

impl SceneTarget {
    /// 正前方静止目标
    pub fn boresight(range_bin: f32, amplitude: f32) -> Self {
        Self {
            range_bin,
            doppler_bin: 0.0,
            sin_azimuth: 0.0,
            sin_elevation: 0.0,
            amplitude,
        }
    }
}

/// 合成场景数据源
#[derive(Debug, Clone)]
pub struct SceneSource {
    targets: Vec<SceneTarget>,
    noise_amplitude: f32,
    rng: StdRng,
    frames: u64,
}

impl SceneSource {
    pub fn new(targets: Vec<SceneTarget>) -> Self {
        Self {
            targets,
            noise_amplitude: 0.0,
            rng: StdRng::seed_from_u64(0),
            frames: 0,
        }
    }

    /// 叠加 `[-amplitude, amplitude]` 均匀噪声
    pub fn with_noise(mut self, amplitude: f32, seed: u64) -> Self {
        self.noise_amplitude = amplitude;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn targets(&self) -> &[SceneTarget] {
        &self.targets
    }

    pub fn set_targets(&mut self, targets: Vec<SceneTarget>) {
        self.targets = targets;
    }

    /// 已生成帧数
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl AdcSource for SceneSource {
    fn capture(
        &mut self,
        sub_frame: u8,
        cfg: &StaticConfig,
        geometry: &AntennaGeometry,
        adc: &mut [u8],
    ) -> Result<(), HwaError> {
        let needed = cfg.adc_frame_bytes();
        if adc.len() < needed {
            return Err(HwaError::Capture(format!(
                "ADC buffer holds {} bytes, frame needs {}",
                adc.len(),
                needed
            )));
        }

        let n_adc = cfg.adc.num_adc_samples as usize;
        let (rx, tx) = (cfg.adc.num_rx as usize, cfg.adc.num_tx as usize);
        let n_range = cfg.num_range_bins as f32;
        let n_dop = cfg.num_doppler_bins as f32;
        let chirps = cfg.num_chirps_total();

        let mut out = &mut adc[..needed];
        for chirp in 0..chirps {
            let t = chirp % tx;
            for r in 0..rx {
                let v = t * rx + r;
                let pos = geometry.positions.get(v).copied().unwrap_or(AntennaPos {
                    row: 0,
                    col: v as u8,
                });
                for s in 0..n_adc {
                    let (mut re, mut im) = (0.0f32, 0.0f32);
                    for target in &self.targets {
                        let phase = 2.0 * PI * target.range_bin * s as f32 / n_range
                            + 2.0 * PI * target.doppler_bin * chirp as f32 / (tx as f32 * n_dop)
                            + PI * (pos.col as f32 * target.sin_azimuth
                                + pos.row as f32 * target.sin_elevation);
                        re += target.amplitude * phase.cos();
                        im += target.amplitude * phase.sin();
                    }
                    if self.noise_amplitude > 0.0 {
                        re += self.rng.gen_range(-self.noise_amplitude..=self.noise_amplitude);
                        im += self.rng.gen_range(-self.noise_amplitude..=self.noise_amplitude);
                    }
                    let sample = Cmplx16::from_f32(re, im);
                    out.put_i16_le(sample.re);
                    out.put_i16_le(sample.im);
                }
            }
        }
        self.frames += 1;
        trace!(
            "scene: sub-frame {} captured {} bytes ({} targets)",
            sub_frame,
            needed,
            self.targets.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_layout() {
        let cfg = StaticConfig {
            adc: objdet_protocol::AdcConfig {
                num_adc_samples: 8,
                num_rx: 2,
                num_tx: 1,
            },
            num_range_bins: 8,
            num_doppler_chirps: 2,
            num_doppler_bins: 2,
            ..Default::default()
        };
        let mut scene = SceneSource::new(vec![SceneTarget::boresight(0.0, 100.0)]);
        let mut adc = vec![0u8; cfg.adc_frame_bytes()];
        scene
            .capture(0, &cfg, &AntennaGeometry::uniform_linear(2), &mut adc)
            .unwrap();
        // 零距离零速度：所有样本都是实数 100
        assert!(adc.chunks_exact(4).all(|c| c == [100, 0, 0, 0]));
        assert_eq!(scene.frames(), 1);
    }

    #[test]
    fn test_capture_rejects_short_buffer() {
        let cfg = StaticConfig::default();
        let mut scene = SceneSource::new(vec![]);
        let mut adc = vec![0u8; 16];
        assert!(matches!(
            scene.capture(0, &cfg, &AntennaGeometry::default(), &mut adc),
            Err(HwaError::Capture(_))
        ));
    }

    #[test]
    fn test_noise_is_seeded() {
        let cfg = StaticConfig {
            adc: objdet_protocol::AdcConfig {
                num_adc_samples: 16,
                num_rx: 1,
                num_tx: 1,
            },
            num_range_bins: 16,
            num_doppler_chirps: 1,
            num_doppler_bins: 1,
            ..Default::default()
        };
        let geo = AntennaGeometry::uniform_linear(1);
        let mut a = vec![0u8; cfg.adc_frame_bytes()];
        let mut b = vec![0u8; cfg.adc_frame_bytes()];
        SceneSource::new(vec![]).with_noise(10.0, 7).capture(0, &cfg, &geo, &mut a).unwrap();
        SceneSource::new(vec![]).with_noise(10.0, 7).capture(0, &cfg, &geo, &mut b).unwrap();
        assert_eq!(a, b);
        assert!(a.iter().any(|&x| x != 0));
    }
}
