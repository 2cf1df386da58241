//! 命令定义
//!
//! 外部配置方通过 [`Command`] 驱动数据通路。每个命令有一个固定的
//! [`CommandCode`]，与下层传输约定保持一致。

use crate::ProtocolError;
use crate::config::{CfarCfg, CommonConfig, FovAoa, FovRange, PeakGroupingCfg, StaticConfig};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 命令码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum CommandCode {
    PreStartCommonCfg = 0x0101,
    PreStartCfg = 0x0102,
    Start = 0x0201,
    Stop = 0x0202,
    TriggerFrame = 0x0301,
    ResultExported = 0x0302,
    DynamicCfg = 0x0401,
}

impl CommandCode {
    /// 从原始码解析
    pub fn parse(raw: u32) -> Result<Self, ProtocolError> {
        Self::try_from(raw).map_err(|_| ProtocolError::UnknownCommandCode(raw))
    }
}

/// 动态配置目标子帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubFrameSel {
    /// 所有已配置子帧
    All,
    /// 指定子帧
    Index(u8),
}

/// 单项动态配置
///
/// 在对应子帧下一次 `configure()` 边界生效。
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DynamicChange {
    CfarRange(CfarCfg),
    CfarDoppler(CfarCfg),
    FovRange(FovRange),
    FovAoa(FovAoa),
    StaticClutterRemoval(bool),
    PeakGrouping(PeakGroupingCfg),
}

impl DynamicChange {
    /// 应用到静态配置副本
    pub fn apply(&self, cfg: &mut StaticConfig) {
        match *self {
            DynamicChange::CfarRange(c) => cfg.cfar_range = c,
            DynamicChange::CfarDoppler(c) => cfg.cfar_doppler = c,
            DynamicChange::FovRange(f) => cfg.fov_range = f,
            DynamicChange::FovAoa(f) => cfg.fov_aoa = f,
            DynamicChange::StaticClutterRemoval(on) => cfg.static_clutter_removal = on,
            DynamicChange::PeakGrouping(p) => cfg.peak_grouping = p,
        }
    }
}

/// 数据通路命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// 公共配置，必须先于所有子帧配置
    PreStartCommonCfg(CommonConfig),
    /// 子帧静态配置
    PreStartCfg {
        sub_frame: u8,
        config: Box<StaticConfig>,
    },
    Start,
    Stop,
    /// 模拟帧起始事件
    TriggerFrame,
    /// 结果导出确认
    ResultExported { sub_frame: u8 },
    /// 动态配置
    DynamicCfg {
        sub_frame: SubFrameSel,
        change: DynamicChange,
    },
}

impl Command {
    pub fn code(&self) -> CommandCode {
        match self {
            Command::PreStartCommonCfg(_) => CommandCode::PreStartCommonCfg,
            Command::PreStartCfg { .. } => CommandCode::PreStartCfg,
            Command::Start => CommandCode::Start,
            Command::Stop => CommandCode::Stop,
            Command::TriggerFrame => CommandCode::TriggerFrame,
            Command::ResultExported { .. } => CommandCode::ResultExported,
            Command::DynamicCfg { .. } => CommandCode::DynamicCfg,
        }
    }

    pub fn pre_start(sub_frame: u8, config: StaticConfig) -> Self {
        Command::PreStartCfg {
            sub_frame,
            config: Box::new(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_code_roundtrip() {
        for code in [
            CommandCode::PreStartCommonCfg,
            CommandCode::PreStartCfg,
            CommandCode::Start,
            CommandCode::Stop,
            CommandCode::TriggerFrame,
            CommandCode::ResultExported,
            CommandCode::DynamicCfg,
        ] {
            let raw: u32 = code.into();
            assert_eq!(CommandCode::parse(raw).unwrap(), code);
        }
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(
            CommandCode::parse(0x0999),
            Err(ProtocolError::UnknownCommandCode(0x0999))
        );
    }

    #[test]
    fn test_command_code_mapping() {
        assert_eq!(
            Command::pre_start(0, StaticConfig::default()).code(),
            CommandCode::PreStartCfg
        );
        assert_eq!(
            Command::ResultExported { sub_frame: 1 }.code(),
            CommandCode::ResultExported
        );
    }

    #[test]
    fn test_dynamic_change_apply() {
        let mut cfg = StaticConfig::default();
        DynamicChange::StaticClutterRemoval(true).apply(&mut cfg);
        assert!(cfg.static_clutter_removal);

        let fov = FovRange {
            min_m: 0.5,
            max_m: 8.0,
        };
        DynamicChange::FovRange(fov).apply(&mut cfg);
        assert_eq!(cfg.fov_range, fov);
    }
}
