//! 目标列表交集
//!
//! 距离 CFAR 开启时，只有同时出现在多普勒原始列表与距离 CFAR 列表中的
//! `(range, doppler)` 才进入有效列表；原始列表的顺序保持不变。
//! 距离 CFAR 关闭时，直接整块拷贝原始列表的前 `min(N, cap)` 条记录。

use crate::planner::{CfarLayout, StageResources, SubFrameLayout};
use crate::records::{RawObj, read_cfar, unfold_doppler};
use crate::stage::HwCtx;
use objdet_hwa::{
    Accelerator, HwaError, MemRegion, MemoryMap, TransferEngine, TransferRequest, TransferShape,
};
use objdet_protocol::StaticConfig;
use tracing::{debug, trace, warn};

/// 交集结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntersectOutput {
    pub num_objects: usize,
    pub clipped: u32,
}

#[derive(Debug, Clone)]
struct Configured {
    channels: [u8; 2],
    raw_list: MemRegion,
    object_list: MemRegion,
    capacity: usize,
    record_bytes: usize,
    num_doppler_bins: u16,
    cfar: Option<CfarLayout>,
}

/// 目标列表交集器
#[derive(Debug, Clone, Default)]
pub struct Intersector {
    configured: Option<Configured>,
}

impl Intersector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure<A, E>(
        &mut self,
        hw: &mut HwCtx<'_, A, E>,
        cfg: &StaticConfig,
        layout: &SubFrameLayout,
        res: &StageResources,
    ) -> Result<(), HwaError>
    where
        A: Accelerator + ?Sized,
        E: TransferEngine + ?Sized,
    {
        let rec = cfg.raw_record_bytes();
        let cfar = layout.cfar.filter(|_| cfg.cfar_range.enabled);
        if cfar.is_some() {
            hw.edma.configure(
                res.intersect_channels[0],
                TransferRequest::new(
                    layout.cube.sub(0, rec)?,
                    layout.object_list.sub(0, rec)?,
                    TransferShape::contiguous(rec)?,
                ),
            )?;
        }
        self.configured = Some(Configured {
            channels: res.intersect_channels,
            raw_list: layout.cube,
            object_list: layout.object_list,
            capacity: layout.object_capacity,
            record_bytes: rec,
            num_doppler_bins: cfg.num_doppler_bins,
            cfar,
        });
        Ok(())
    }

    /// 有效列表所在区域
    pub fn object_list(&self) -> Option<MemRegion> {
        self.configured.as_ref().map(|c| c.object_list)
    }

    pub fn run<A, E>(
        &mut self,
        hw: &mut HwCtx<'_, A, E>,
        num_raw: usize,
    ) -> Result<IntersectOutput, HwaError>
    where
        A: Accelerator + ?Sized,
        E: TransferEngine + ?Sized,
    {
        let c = self
            .configured
            .as_ref()
            .ok_or(HwaError::InvalidParamSet("intersector not configured"))?;
        let out = match &c.cfar {
            Some(cfar) => intersect(hw, c, cfar, num_raw)?,
            None => bulk_copy(hw, c, num_raw)?,
        };
        if out.clipped > 0 {
            warn!(
                "intersect: validated list full, {} objects clipped",
                out.clipped
            );
        }
        debug!("intersect: {} of {} raw objects validated", out.num_objects, num_raw);
        Ok(out)
    }
}

/// 在 CFAR 列表 `[lo, hi)` 中二分查找距离单元
fn find_range(
    mem: &MemoryMap,
    list: MemRegion,
    lo: usize,
    hi: usize,
    range: u16,
) -> Result<bool, HwaError> {
    let (mut lo, mut hi) = (lo, hi);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let r = read_cfar(mem, list, mid)?.range_idx;
        match r.cmp(&range) {
            std::cmp::Ordering::Equal => return Ok(true),
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
        }
    }
    Ok(false)
}

fn intersect<A, E>(
    hw: &mut HwCtx<'_, A, E>,
    c: &Configured,
    cfar: &CfarLayout,
    num_raw: usize,
) -> Result<IntersectOutput, HwaError>
where
    A: Accelerator + ?Sized,
    E: TransferEngine + ?Sized,
{
    let ch = c.channels[0];
    let mut out = IntersectOutput::default();
    for i in 0..num_raw {
        let src = c.raw_list.element(i, c.record_bytes)?;
        let (range, doppler) = RawObj::peek_key(hw.mem.bytes(src)?);
        let d = unfold_doppler(doppler, c.num_doppler_bins) as usize;
        let lo = if d == 0 {
            0
        } else {
            hw.mem.read_u16(cfar.cum_index, d - 1)? as usize
        };
        let hi = hw.mem.read_u16(cfar.cum_index, d)? as usize;
        if !find_range(hw.mem, cfar.list, lo, hi, range)? {
            continue;
        }
        if out.num_objects >= c.capacity {
            out.clipped += 1;
            continue;
        }
        let dst = c.object_list.element(out.num_objects, c.record_bytes)?;
        hw.edma.retarget(ch, src, dst)?;
        hw.transfer(ch)?;
        trace!("intersect: object {} (range {}, doppler {})", i, range, doppler);
        out.num_objects += 1;
    }
    Ok(out)
}

fn bulk_copy<A, E>(
    hw: &mut HwCtx<'_, A, E>,
    c: &Configured,
    num_raw: usize,
) -> Result<IntersectOutput, HwaError>
where
    A: Accelerator + ?Sized,
    E: TransferEngine + ?Sized,
{
    let n = num_raw.min(c.capacity);
    let out = IntersectOutput {
        num_objects: n,
        clipped: (num_raw - n) as u32,
    };
    let bytes = n * c.record_bytes;
    if bytes == 0 {
        return Ok(out);
    }
    let parts = TransferShape::split_flat(bytes)?;
    for (i, part) in parts.iter().enumerate() {
        let len = part.shape.total_bytes();
        let mut req = TransferRequest::new(
            c.raw_list.sub(part.offset, len)?,
            c.object_list.sub(part.offset, len)?,
            part.shape,
        );
        if i + 1 < parts.len() {
            req = req.chain(c.channels[i + 1]);
        }
        hw.edma.configure(c.channels[i], req)?;
    }
    hw.edma.start(c.channels[0], hw.mem)?;
    for &ch in c.channels.iter().take(parts.len()) {
        hw.edma.wait(ch)?;
    }
    Ok(out)
}
