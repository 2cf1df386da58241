//! 子帧对象
//!
//! 一个子帧保存三类东西：
//! - 配置：`PRE_START_CFG` 下发的 [`StaticConfig`]，只能被动态配置修改
//! - 句柄：规划器分配的 [`SubFramePlan`]
//! - 运行期状态：各阶段的已配置描述与直流标定累计
//!
//! 动态配置先排队，只在子帧的下一次配置边界生效。

use crate::aoa::AoaEstimator;
use crate::error::DpcError;
use crate::intersect::Intersector;
use crate::planner::{CommonLayout, SubFrameLayout, SubFramePlan};
use crate::stage::{CfarStage, DopplerStage, HwCtx, RangeStage, StageControl};
use objdet_hwa::{Accelerator, TransferEngine};
use objdet_protocol::{CommonConfig, DynamicChange, StaticConfig};
use smallvec::SmallVec;
use tracing::{debug, trace};

/// 一个已规划的子帧
#[derive(Debug)]
pub struct SubFrame {
    index: u8,
    config: StaticConfig,
    plan: SubFramePlan,
    pub(crate) range: RangeStage,
    pub(crate) doppler: DopplerStage,
    pub(crate) cfar: CfarStage,
    pub(crate) intersect: Intersector,
    pub(crate) aoa: AoaEstimator,
    pending: SmallVec<[DynamicChange; 4]>,
}

impl SubFrame {
    pub fn new(index: u8, config: StaticConfig, plan: SubFramePlan) -> Self {
        Self {
            index,
            config,
            plan,
            range: RangeStage::new(),
            doppler: DopplerStage::new(),
            cfar: CfarStage::new(),
            intersect: Intersector::new(),
            aoa: AoaEstimator::new(),
            pending: SmallVec::new(),
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn config(&self) -> &StaticConfig {
        &self.config
    }

    pub fn plan(&self) -> &SubFramePlan {
        &self.plan
    }

    pub fn layout(&self) -> &SubFrameLayout {
        &self.plan.layout
    }

    /// 尚未生效的动态配置数
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// 排队一项动态配置
    ///
    /// 在配置副本上校验：不能改变内存布局（距离 CFAR 开关、检测矩阵是否存在），
    /// 并且必须通过相关阶段的参数检查。校验失败时队列不变。
    pub fn queue(&mut self, change: DynamicChange) -> Result<(), DpcError> {
        self.check(change)?;
        self.pending.push(change);
        trace!("sub-frame {}: queued {:?}", self.index, change);
        Ok(())
    }

    /// 只校验，不排队
    pub fn check(&self, change: DynamicChange) -> Result<(), DpcError> {
        let candidate = self.preview(change);
        if candidate.cfar_range.enabled != self.config.cfar_range.enabled
            || candidate.det_matrix_required() != self.config.det_matrix_required()
        {
            return Err(DpcError::DynamicLayoutChange(self.index));
        }
        DopplerStage::validate(&candidate)?;
        CfarStage::validate(&candidate)?;
        AoaEstimator::validate_fov(&candidate.fov_aoa)?;
        Ok(())
    }

    fn preview(&self, change: DynamicChange) -> StaticConfig {
        let mut candidate = self.config.clone();
        for c in &self.pending {
            c.apply(&mut candidate);
        }
        change.apply(&mut candidate);
        candidate
    }

    /// 应用全部排队项，返回是否有变化
    pub fn drain_pending(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        for change in self.pending.drain(..) {
            change.apply(&mut self.config);
        }
        debug!("sub-frame {}: dynamic configuration applied", self.index);
        true
    }

    /// 配置距离阶段
    pub fn configure_range<A, E>(&mut self, hw: &mut HwCtx<'_, A, E>) -> Result<(), DpcError>
    where
        A: Accelerator + ?Sized,
        E: TransferEngine + ?Sized,
    {
        self.range
            .configure(hw, &self.config, &self.plan.layout, &self.plan.resources)?;
        Ok(())
    }

    /// 预触发距离阶段
    ///
    /// 加速器同一时刻只保持一段已装载的槽位，其后任何阶段装载参数集都会覆盖它。
    pub fn pre_trigger_range<A, E>(&mut self, hw: &mut HwCtx<'_, A, E>) -> Result<(), DpcError>
    where
        A: Accelerator + ?Sized,
        E: TransferEngine + ?Sized,
    {
        self.range.control(hw, StageControl::PreTrigger)?;
        Ok(())
    }

    /// 配置距离阶段之后的全部处理：多普勒、距离 CFAR、交集与 AoA
    pub fn configure_processing<A, E>(
        &mut self,
        hw: &mut HwCtx<'_, A, E>,
        common: &CommonConfig,
        common_layout: &CommonLayout,
    ) -> Result<(), DpcError>
    where
        A: Accelerator + ?Sized,
        E: TransferEngine + ?Sized,
    {
        let (layout, res) = (&self.plan.layout, &self.plan.resources);
        self.doppler.configure(hw, &self.config, layout, res)?;
        self.cfar.configure(hw, &self.config, layout, res)?;
        self.intersect.configure(hw, &self.config, layout, res)?;
        self.aoa
            .configure(hw.mem, &self.config, common, common_layout, layout)?;
        Ok(())
    }

    /// 配置全部阶段
    pub fn configure_all<A, E>(
        &mut self,
        hw: &mut HwCtx<'_, A, E>,
        common: &CommonConfig,
        common_layout: &CommonLayout,
    ) -> Result<(), DpcError>
    where
        A: Accelerator + ?Sized,
        E: TransferEngine + ?Sized,
    {
        self.configure_range(hw)?;
        self.configure_processing(hw, common, common_layout)
    }
}
