//! # 配置档案
//!
//! 一个 TOML 文件描述一次完整的运行：
//!
//! ```toml
//! [dpc]
//! slow_bytes = 1048576
//!
//! [common]
//! num_subframes = 1
//!
//! [[subframe]]
//! num_range_bins = 256
//!
//! [subframe.cfar_range]
//! enabled = false
//!
//! [scene]
//! noise_amplitude = 5.0
//! seed = 42
//!
//! [[target]]
//! range_bin = 40.0
//! azimuth_deg = 10.0
//! ```
//!
//! 所有表都可以省略，省略的字段取默认值。

use objdet_dpc::DpcConfig;
use objdet_hwa::{SceneSource, SceneTarget};
use objdet_protocol::{Command, CommonConfig, StaticConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 配置档案错误
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Failed to read profile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid profile: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize profile: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Profile declares {declared} sub-frame(s) but lists {listed}")]
    SubFrameCount { declared: u8, listed: usize },
    #[error("Target {index}: amplitude must be positive, got {amplitude}")]
    TargetAmplitude { index: usize, amplitude: f32 },
    #[error("Target {index}: angle {angle_deg} deg outside [-90, 90]")]
    TargetAngle { index: usize, angle_deg: f32 },
}

/// 合成场景参数
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneCfg {
    /// 均匀噪声幅度（ADC 计数），0 表示无噪声
    pub noise_amplitude: f32,
    /// 噪声随机种子
    pub seed: u64,
}

/// 一个合成目标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSpec {
    pub range_bin: f32,
    pub doppler_bin: f32,
    pub azimuth_deg: f32,
    pub elevation_deg: f32,
    pub amplitude: f32,
}

impl Default for TargetSpec {
    fn default() -> Self {
        Self {
            range_bin: 0.0,
            doppler_bin: 0.0,
            azimuth_deg: 0.0,
            elevation_deg: 0.0,
            amplitude: 1000.0,
        }
    }
}

impl TargetSpec {
    pub fn to_scene_target(&self) -> SceneTarget {
        SceneTarget {
            range_bin: self.range_bin,
            doppler_bin: self.doppler_bin,
            sin_azimuth: self.azimuth_deg.to_radians().sin(),
            sin_elevation: self.elevation_deg.to_radians().sin(),
            amplitude: self.amplitude,
        }
    }
}

/// 配置档案
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub dpc: DpcConfig,
    pub common: CommonConfig,
    #[serde(rename = "subframe")]
    pub subframes: Vec<StaticConfig>,
    pub scene: SceneCfg,
    #[serde(rename = "target")]
    pub targets: Vec<TargetSpec>,
}

impl Profile {
    /// 单子帧、正前方一个目标的示例档案
    pub fn example() -> Self {
        Self {
            subframes: vec![StaticConfig::default()],
            targets: vec![TargetSpec {
                range_bin: 40.0,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ProfileError> {
        Ok(toml::to_string(self)?)
    }

    /// 解析并校验 TOML 文本
    pub fn from_toml_str(text: &str) -> Result<Self, ProfileError> {
        let profile: Profile = toml::from_str(text)?;
        profile.validate()?;
        Ok(profile)
    }

    /// 从文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 档案自身的一致性检查
    ///
    /// 数值参数的合法性留给数据通路在 `pre_start` 中检查。
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.subframes.len() != self.common.num_subframes as usize {
            return Err(ProfileError::SubFrameCount {
                declared: self.common.num_subframes,
                listed: self.subframes.len(),
            });
        }
        for (index, t) in self.targets.iter().enumerate() {
            if t.amplitude <= 0.0 || !t.amplitude.is_finite() {
                return Err(ProfileError::TargetAmplitude {
                    index,
                    amplitude: t.amplitude,
                });
            }
            for angle_deg in [t.azimuth_deg, t.elevation_deg] {
                if !(-90.0..=90.0).contains(&angle_deg) {
                    return Err(ProfileError::TargetAngle { index, angle_deg });
                }
            }
        }
        Ok(())
    }

    /// 启动前的命令序列：公共配置，然后每个子帧一条静态配置
    pub fn commands(&self) -> Vec<Command> {
        std::iter::once(Command::PreStartCommonCfg(self.common.clone()))
            .chain(
                self.subframes
                    .iter()
                    .enumerate()
                    .map(|(i, cfg)| Command::pre_start(i as u8, cfg.clone())),
            )
            .collect()
    }

    pub fn scene_targets(&self) -> Vec<SceneTarget> {
        self.targets.iter().map(TargetSpec::to_scene_target).collect()
    }

    /// 带噪声参数的合成数据源
    pub fn scene_source(&self) -> SceneSource {
        let source = SceneSource::new(self.scene_targets());
        if self.scene.noise_amplitude > 0.0 {
            source.with_noise(self.scene.noise_amplitude, self.scene.seed)
        } else {
            source
        }
    }
}
