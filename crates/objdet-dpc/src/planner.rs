//! 子帧资源规划
//!
//! 公共缓冲区（AoA 相位表）在 `pre_start_common` 时分配一次并记录各内存区的
//! 游标快照；每个子帧的规划都从这些快照开始按固定顺序重新分配，因此多个子帧
//! 共享同一片内存，任一时刻只有一个子帧处于活动状态。
//!
//! 本地 RAM 中距离 CFAR 的 ping/pong 暂存区与多普勒暂存区互相覆盖
//! （两个阶段不会同时运行），之后从两者中较靠后的终点继续分配输出列表。

use crate::config::DpcLimits;
use crate::error::{BufferClass, PlannerError};
use objdet_hwa::{Bank, HwaError, MemPool, MemRegion, MemoryMap, PoolMark};
use objdet_protocol::constants::{
    CFAR_RECORD_BYTES, PHASE_TABLE_LEN, POINT_OBJ_BYTES, SIDE_INFO_BYTES,
};
use objdet_protocol::{BankUsage, Cmplx16, CommonConfig, MemUsageStats, StaticConfig};
use tracing::debug;

/// 默认对齐（字节）
const ALIGN: usize = 4;

/// 多普勒阶段参数集数：解压、FFT、CFAR
pub const DOPPLER_PARAM_SETS: usize = 3;
/// 每子帧参数集总数：距离 1 + 多普勒 3 + 距离 CFAR 1
pub const PARAM_SETS_PER_SUBFRAME: usize = 1 + DOPPLER_PARAM_SETS + 1;
/// 每子帧传输通道总数：多普勒 2 + 距离 CFAR 2 + 交集 2
pub const CHANNELS_PER_SUBFRAME: usize = 6;

/// 后端资源规模
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwCapacity {
    pub param_sets: usize,
    pub channels: usize,
}

/// 公共规划结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonLayout {
    /// `exp(j2πi/L)`，`L = PHASE_TABLE_LEN`，Q15 复数
    pub phase_table: MemRegion,
    marks: [PoolMark; 3],
}

/// 距离 CFAR 单个 ping/pong 暂存
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfarScratch {
    /// 检测矩阵的一列（`R` 个 `u16`）
    pub column: MemRegion,
    /// `(cell, noise)` 检测结果
    pub hits: MemRegion,
}

/// 距离 CFAR 缓冲区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfarLayout {
    pub list: MemRegion,
    /// 每个多普勒单元的累计目标数（`u16`）
    pub cum_index: MemRegion,
    pub scratch: [CfarScratch; 2],
    pub capacity: usize,
}

/// 多普勒阶段缓冲区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DopplerLayout {
    pub window: MemRegion,
    /// 雷达立方体一行（压缩时为压缩块）
    pub input: MemRegion,
    /// 解压后的 `[chirp][ant]`
    pub decompressed: Option<MemRegion>,
    /// `[doppler][ant]`
    pub output: MemRegion,
    pub det_row: MemRegion,
    pub hits: MemRegion,
}

impl DopplerLayout {
    /// 多普勒 FFT 的输入区
    pub fn fft_input(&self) -> MemRegion {
        self.decompressed.unwrap_or(self.input)
    }
}

/// 子帧全部缓冲区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubFrameLayout {
    pub cube: MemRegion,
    pub det_matrix: Option<MemRegion>,
    pub range_window: MemRegion,
    pub cfar: Option<CfarLayout>,
    pub doppler: DopplerLayout,
    pub object_list: MemRegion,
    pub point_cloud: MemRegion,
    pub side_info: MemRegion,
    /// 原始目标（覆盖写入雷达立方体）容量
    pub raw_capacity: usize,
    /// 有效目标容量
    pub object_capacity: usize,
}

/// 加速器槽位与传输通道分配
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageResources {
    pub range_param_set: usize,
    /// 解压、FFT、CFAR 依次占用 `doppler_param_set..+3`
    pub doppler_param_set: usize,
    pub cfar_param_set: usize,
    pub doppler_channels: [u8; 2],
    pub cfar_channels: [u8; 2],
    pub intersect_channels: [u8; 2],
}

/// 子帧规划结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubFramePlan {
    pub layout: SubFrameLayout,
    pub resources: StageResources,
    pub usage: MemUsageStats,
}

fn pool(mem: &mut MemoryMap, bank: Bank) -> Result<&mut MemPool, PlannerError> {
    // ADC 区没有分配器
    mem.pool_mut(bank)
        .ok_or(PlannerError::Hwa(HwaError::InvalidMark { bank, offset: 0 }))
}

fn alloc(
    mem: &mut MemoryMap,
    bank: Bank,
    class: BufferClass,
    size: usize,
    align: usize,
) -> Result<MemRegion, PlannerError> {
    let pool = pool(mem, bank)?;
    let available = pool.free();
    pool.alloc(size, align).ok_or(PlannerError::OutOfMemory {
        class,
        bank,
        requested: size,
        available,
    })
}

fn bank_usage(mem: &MemoryMap, bank: Bank) -> BankUsage {
    mem.pool(bank)
        .map(|p| BankUsage {
            used: p.used(),
            max_usage: p.max_usage(),
            capacity: p.capacity(),
        })
        .unwrap_or_default()
}

/// 当前三个内存区的使用情况
pub fn usage(mem: &MemoryMap) -> MemUsageStats {
    MemUsageStats {
        window: bank_usage(mem, Bank::Window),
        local: bank_usage(mem, Bank::Local),
        slow: bank_usage(mem, Bank::Slow),
    }
}

/// 规划公共缓冲区
///
/// 复位所有内存区，分配相位表并写入内容，记录公共快照。
pub fn plan_common(mem: &mut MemoryMap, _common: &CommonConfig) -> Result<CommonLayout, PlannerError> {
    mem.reset_pools();
    let phase_table = alloc(
        mem,
        Bank::Local,
        BufferClass::PhaseTable,
        PHASE_TABLE_LEN * Cmplx16::SIZE,
        ALIGN,
    )?;
    let table: Vec<Cmplx16> = (0..PHASE_TABLE_LEN)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / PHASE_TABLE_LEN as f32;
            Cmplx16::from_f32(32767.0 * phase.cos(), 32767.0 * phase.sin())
        })
        .collect();
    mem.write_cmplx16_slice(phase_table, &table)?;

    let marks = [
        pool(mem, Bank::Window)?.mark(),
        pool(mem, Bank::Local)?.mark(),
        pool(mem, Bank::Slow)?.mark(),
    ];
    debug!(
        "planner: common buffers planned, local used {} bytes",
        marks[1].offset()
    );
    Ok(CommonLayout { phase_table, marks })
}

fn plan_resources(cfg: &StaticConfig, hw: HwCapacity) -> Result<StageResources, PlannerError> {
    let ps = cfg.resources.param_set_base as usize;
    let needed = ps + PARAM_SETS_PER_SUBFRAME;
    if needed > hw.param_sets {
        return Err(PlannerError::ParamSetsExhausted {
            needed,
            available: hw.param_sets,
        });
    }
    let ch = cfg.resources.edma_channel_base as usize;
    let needed = ch + CHANNELS_PER_SUBFRAME;
    if needed > hw.channels || needed > u8::MAX as usize + 1 {
        return Err(PlannerError::ChannelsExhausted {
            needed,
            available: hw.channels,
        });
    }
    let ch = ch as u8;
    Ok(StageResources {
        range_param_set: ps,
        doppler_param_set: ps + 1,
        cfar_param_set: ps + 1 + DOPPLER_PARAM_SETS,
        doppler_channels: [ch, ch + 1],
        cfar_channels: [ch + 2, ch + 3],
        intersect_channels: [ch + 4, ch + 5],
    })
}

/// 规划一个子帧
///
/// 结果只取决于 `cfg` 与公共快照：同样的输入得到同样的布局。
pub fn plan_subframe(
    mem: &mut MemoryMap,
    common: &CommonLayout,
    cfg: &StaticConfig,
    limits: &DpcLimits,
    hw: HwCapacity,
) -> Result<SubFramePlan, PlannerError> {
    let resources = plan_resources(cfg, hw)?;
    pool(mem, Bank::Window)?.rewind(common.marks[0])?;
    pool(mem, Bank::Local)?.rewind(common.marks[1])?;
    pool(mem, Bank::Slow)?.rewind(common.marks[2])?;

    let r = cfg.num_range_bins as usize;
    let k = cfg.num_doppler_chirps as usize;
    let n_dop = cfg.num_doppler_bins as usize;
    let ant = cfg.num_virtual_antennas();
    let rec = cfg.raw_record_bytes();

    // 1. 雷达立方体
    let cube = alloc(mem, Bank::Slow, BufferClass::RadarCube, cfg.cube_bytes(), ALIGN)?;

    // 2. 检测矩阵
    let det_matrix = if cfg.det_matrix_required() {
        Some(alloc(mem, Bank::Slow, BufferClass::DetMatrix, r * n_dop * 2, ALIGN)?)
    } else {
        None
    };

    // 3. 距离窗
    let range_window = alloc(
        mem,
        Bank::Window,
        BufferClass::RangeWindow,
        cfg.adc.num_adc_samples as usize * 2,
        ALIGN,
    )?;
    // 4. 距离 CFAR 列表，然后是可被覆盖的 ping/pong 暂存
    let (cfar_parts, scratch_mark) = if cfg.cfar_range.enabled {
        let capacity = limits.max_cfar_objects;
        let list = alloc(
            mem,
            Bank::Local,
            BufferClass::CfarList,
            capacity * CFAR_RECORD_BYTES,
            ALIGN,
        )?;
        let cum_index = alloc(mem, Bank::Local, BufferClass::CfarList, n_dop * 2, ALIGN)?;
        let mark = pool(mem, Bank::Local)?.mark();
        let mut scratch = Vec::with_capacity(2);
        for _ in 0..2 {
            let column = alloc(mem, Bank::Local, BufferClass::CfarScratch, r * 2, ALIGN)?;
            let hits = alloc(mem, Bank::Local, BufferClass::CfarScratch, r * 4, ALIGN)?;
            scratch.push(CfarScratch { column, hits });
        }
        let end = pool(mem, Bank::Local)?.mark();
        let cfar = CfarLayout {
            list,
            cum_index,
            scratch: [scratch[0], scratch[1]],
            capacity,
        };
        (Some((cfar, end)), mark)
    } else {
        (None, pool(mem, Bank::Local)?.mark())
    };

    // 5. 回到快照，分配多普勒暂存
    pool(mem, Bank::Local)?.rewind(scratch_mark)?;
    let window = alloc(mem, Bank::Window, BufferClass::DopplerWindow, k * 2, ALIGN)?;
    let uncompressed_row = k * ant * Cmplx16::SIZE;
    let input = alloc(
        mem,
        Bank::Local,
        BufferClass::DopplerScratch,
        cfg.cube_row_bytes(),
        ALIGN,
    )?;
    let decompressed = if cfg.compression.enabled {
        Some(alloc(
            mem,
            Bank::Local,
            BufferClass::Decompression,
            uncompressed_row,
            ALIGN,
        )?)
    } else {
        None
    };
    let output = alloc(
        mem,
        Bank::Local,
        BufferClass::DopplerScratch,
        n_dop * ant * Cmplx16::SIZE,
        ALIGN,
    )?;
    let det_row = alloc(mem, Bank::Local, BufferClass::DopplerScratch, n_dop * 2, ALIGN)?;
    let hits = alloc(mem, Bank::Local, BufferClass::DopplerScratch, n_dop * 4, ALIGN)?;
    let doppler = DopplerLayout {
        window,
        input,
        decompressed,
        output,
        det_row,
        hits,
    };

    // 6. 从两组暂存中较靠后的终点继续
    let local = pool(mem, Bank::Local)?;
    let cfar = match cfar_parts {
        Some((cfar, end)) => {
            if end.offset() > local.used() {
                local.rewind(end)?;
            }
            Some(cfar)
        }
        None => None,
    };

    let raw_capacity = if rec == 0 {
        0
    } else {
        limits.max_raw_objects.min(cube.len() / rec)
    };
    let per_object = rec + POINT_OBJ_BYTES + SIDE_INFO_BYTES;
    let free = local.free();
    let object_capacity = limits
        .max_validated_objects
        .min(raw_capacity)
        .min(free / per_object);
    if object_capacity == 0 {
        return Err(PlannerError::OutOfMemory {
            class: BufferClass::ObjectList,
            bank: Bank::Local,
            requested: per_object,
            available: free,
        });
    }
    let object_list = alloc(
        mem,
        Bank::Local,
        BufferClass::ObjectList,
        object_capacity * rec,
        ALIGN,
    )?;
    let point_cloud = alloc(
        mem,
        Bank::Local,
        BufferClass::PointCloud,
        object_capacity * POINT_OBJ_BYTES,
        ALIGN,
    )?;
    let side_info = alloc(
        mem,
        Bank::Local,
        BufferClass::SideInfo,
        object_capacity * SIDE_INFO_BYTES,
        ALIGN,
    )?;

    let layout = SubFrameLayout {
        cube,
        det_matrix,
        range_window,
        cfar,
        doppler,
        object_list,
        point_cloud,
        side_info,
        raw_capacity,
        object_capacity,
    };
    let usage = usage(mem);
    debug!(
        "planner: sub-frame planned, cube {} bytes, raw cap {}, object cap {}, local {}/{}",
        cube.len(),
        raw_capacity,
        object_capacity,
        usage.local.used,
        usage.local.capacity
    );
    Ok(SubFramePlan {
        layout,
        resources,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DpcConfig;

    const HW: HwCapacity = HwCapacity {
        param_sets: 32,
        channels: 64,
    };

    fn memory() -> MemoryMap {
        let c = DpcConfig::default();
        MemoryMap::new(c.adc_bytes, c.window_bytes, c.local_bytes, c.slow_bytes)
    }

    fn layout_regions(l: &SubFrameLayout) -> Vec<MemRegion> {
        let mut v = vec![l.cube, l.range_window];
        v.extend(l.det_matrix);
        v.extend([
            l.doppler.window,
            l.doppler.input,
            l.doppler.output,
            l.doppler.det_row,
            l.doppler.hits,
        ]);
        v.extend(l.doppler.decompressed);
        v.extend([l.object_list, l.point_cloud, l.side_info]);
        if let Some(c) = &l.cfar {
            v.extend([c.list, c.cum_index]);
        }
        v
    }

    #[test]
    fn test_default_plan() {
        let mut mem = memory();
        let common = plan_common(&mut mem, &CommonConfig::default()).unwrap();
        let cfg = StaticConfig::default();
        let plan = plan_subframe(&mut mem, &common, &cfg, &DpcLimits::default(), HW).unwrap();
        let l = &plan.layout;
        assert_eq!(l.cube.len(), 256 * 16 * 8 * 4);
        assert_eq!(l.det_matrix.map(|d| d.len()), Some(256 * 16 * 2));
        assert_eq!(l.raw_capacity, 500);
        assert!(l.object_capacity > 0 && l.object_capacity <= 500);
        assert_eq!(plan.resources.doppler_param_set, 1);
        assert_eq!(plan.resources.intersect_channels, [4, 5]);
    }

    #[test]
    fn test_live_buffers_do_not_overlap() {
        let mut mem = memory();
        let common = plan_common(&mut mem, &CommonConfig::default()).unwrap();
        let cfg = StaticConfig {
            compression: objdet_protocol::CompressionCfg {
                enabled: true,
                ratio: 0.5,
            },
            ..Default::default()
        };
        let plan = plan_subframe(&mut mem, &common, &cfg, &DpcLimits::default(), HW).unwrap();
        let mut regions = layout_regions(&plan.layout);
        regions.push(common.phase_table);
        for (i, a) in regions.iter().enumerate() {
            for b in &regions[i + 1..] {
                assert!(!a.overlaps(b), "{:?} overlaps {:?}", a, b);
            }
        }
        // CFAR 暂存可与多普勒暂存重叠，但不能与列表或输出重叠
        let cfar = plan.layout.cfar.unwrap();
        for s in cfar.scratch {
            assert!(!s.column.overlaps(&plan.layout.object_list));
            assert!(!s.hits.overlaps(&cfar.list));
        }
    }

    #[test]
    fn test_plan_is_idempotent() {
        let mut mem = memory();
        let common = plan_common(&mut mem, &CommonConfig::default()).unwrap();
        let cfg = StaticConfig::default();
        let limits = DpcLimits::default();
        let a = plan_subframe(&mut mem, &common, &cfg, &limits, HW).unwrap();
        let other = StaticConfig {
            num_range_bins: 128,
            adc: objdet_protocol::AdcConfig {
                num_adc_samples: 128,
                ..Default::default()
            },
            ..Default::default()
        };
        plan_subframe(&mut mem, &common, &other, &limits, HW).unwrap();
        let b = plan_subframe(&mut mem, &common, &cfg, &limits, HW).unwrap();
        assert_eq!(a.layout, b.layout);
    }

    #[test]
    fn test_cube_out_of_memory() {
        let mut mem = MemoryMap::new(1024, 1024, 64 * 1024, 1024);
        let common = plan_common(&mut mem, &CommonConfig::default()).unwrap();
        let err = plan_subframe(
            &mut mem,
            &common,
            &StaticConfig::default(),
            &DpcLimits::default(),
            HW,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PlannerError::OutOfMemory {
                class: BufferClass::RadarCube,
                bank: Bank::Slow,
                ..
            }
        ));
    }

    #[test]
    fn test_resource_exhaustion() {
        let mut mem = memory();
        let common = plan_common(&mut mem, &CommonConfig::default()).unwrap();
        let cfg = StaticConfig {
            resources: objdet_protocol::ResourceCfg {
                param_set_base: 30,
                edma_channel_base: 0,
            },
            ..Default::default()
        };
        let err = plan_subframe(&mut mem, &common, &cfg, &DpcLimits::default(), HW).unwrap_err();
        assert_eq!(
            err,
            PlannerError::ParamSetsExhausted {
                needed: 35,
                available: 32
            }
        );
    }
}
