//! 数据通路实例配置
//!
//! 内存区容量、列表容量上限以及消费端（主控核）看到的各内存区基地址。

use objdet_hwa::{Bank, MemRegion};
use objdet_protocol::BufferDesc;
use objdet_protocol::constants::DEFAULT_MAX_SUBFRAMES;

/// 列表容量上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DpcLimits {
    /// 最多子帧数
    pub max_subframes: usize,
    /// 多普勒阶段原始目标上限
    pub max_raw_objects: usize,
    /// 距离 CFAR 列表上限
    pub max_cfar_objects: usize,
    /// 交集后有效目标上限
    pub max_validated_objects: usize,
}

impl Default for DpcLimits {
    fn default() -> Self {
        Self {
            max_subframes: DEFAULT_MAX_SUBFRAMES,
            max_raw_objects: 500,
            max_cfar_objects: 1000,
            max_validated_objects: 500,
        }
    }
}

/// 消费端地址映射
///
/// 结果描述符中的地址 = 内存区基地址 + 区内偏移。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AddressMap {
    pub adc_base: u32,
    pub window_base: u32,
    pub local_base: u32,
    pub slow_base: u32,
}

impl Default for AddressMap {
    fn default() -> Self {
        Self {
            adc_base: 0x2800_0000,
            window_base: 0x2100_0000,
            local_base: 0x1002_0000,
            slow_base: 0x2000_0000,
        }
    }
}

impl AddressMap {
    pub fn base(&self, bank: Bank) -> u32 {
        match bank {
            Bank::Adc => self.adc_base,
            Bank::Window => self.window_base,
            Bank::Local => self.local_base,
            Bank::Slow => self.slow_base,
        }
    }

    /// 区描述符转换为消费端地址
    pub fn translate(&self, region: MemRegion) -> BufferDesc {
        BufferDesc {
            addr: self.base(region.bank()).wrapping_add(region.offset() as u32),
            size: region.len() as u32,
        }
    }
}

/// 数据通路配置
///
/// # Example
///
/// ```
/// use objdet_dpc::DpcConfig;
///
/// let config = DpcConfig {
///     slow_bytes: 2 * 1024 * 1024,
///     ..Default::default()
/// };
/// assert_eq!(config.limits.max_subframes, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DpcConfig {
    /// ADC 缓冲区容量（字节）
    pub adc_bytes: usize,
    /// 加速器窗口 RAM（字节）
    pub window_bytes: usize,
    /// 本地快速 RAM（字节）
    pub local_bytes: usize,
    /// 慢速大容量 RAM（字节）
    pub slow_bytes: usize,
    pub limits: DpcLimits,
    pub address_map: AddressMap,
}

impl Default for DpcConfig {
    fn default() -> Self {
        Self {
            adc_bytes: 256 * 1024,
            window_bytes: 16 * 1024,
            local_bytes: 64 * 1024,
            slow_bytes: 1024 * 1024,
            limits: DpcLimits::default(),
            address_map: AddressMap::default(),
        }
    }
}
