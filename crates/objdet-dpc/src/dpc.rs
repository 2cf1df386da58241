//! 对象检测实例
//!
//! [`ObjDet`] 持有全部内存区、后端与子帧对象，实现帧 / 子帧状态机：
//!
//! ```text
//! Init ──pre_start_common──▶ Configured ──start──▶ Idle ──frame_start──▶ StageExecuting
//!                                 ▲                  ▲                        │
//!                                 │            result_exported                ▼
//!                               Stopped ◀──stop── (any) ◀────────────── ResultsReady
//! ```
//!
//! 致命的一致性违例使实例进入终态 `Halted`，之后所有入口都返回 [`DpcError::Halted`]。

use crate::aoa::AoaEstimator;
use crate::config::DpcConfig;
use crate::error::{ConsistencyViolation, DpcError};
use crate::export::{ExportGate, ExportedResult};
use crate::measure::measure;
use crate::metrics::DpcMetrics;
use crate::planner::{self, CommonLayout, HwCapacity};
use crate::stage::{CfarOutput, CfarStage, DopplerStage, HwCtx, RangeStage, StageControl};
use crate::subframe::SubFrame;
use objdet_hwa::{
    Accelerator, AdcSource, Bank, MemoryMap, SceneSource, SoftEdma, SoftHwa, TransferEngine,
};
use objdet_protocol::constants::{POINT_OBJ_BYTES, SIDE_INFO_BYTES};
use objdet_protocol::{
    ClipCounters, Command, CommonConfig, DynamicChange, MemUsageStats, ResultRecord, ResultRefs,
    StaticConfig, SubFrameSel, TimingStats, stage_index,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// 实例状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpcState {
    /// 未收到公共配置
    Init,
    /// 已配置，未启动
    Configured,
    /// 已启动，等待帧起始
    Idle,
    /// 正在处理一个子帧
    StageExecuting,
    /// 结果已交出，等待导出确认
    ResultsReady,
    Stopped,
    /// 致命错误后的终态
    Halted,
}

impl DpcState {
    pub fn name(&self) -> &'static str {
        match self {
            DpcState::Init => "Init",
            DpcState::Configured => "Configured",
            DpcState::Idle => "Idle",
            DpcState::StageExecuting => "StageExecuting",
            DpcState::ResultsReady => "ResultsReady",
            DpcState::Stopped => "Stopped",
            DpcState::Halted => "Halted",
        }
    }

    /// 是否处于启动之后、停止之前
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            DpcState::Idle | DpcState::StageExecuting | DpcState::ResultsReady
        )
    }
}

/// 帧起始事件的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum FrameStartOutcome {
    /// 子帧已处理，结果等待导出确认
    Processed(Box<ExportedResult>),
    /// 上一个子帧尚未导出，事件已延后
    Deferred,
}

/// 命令应答
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResponse {
    Ack,
    /// `PRE_START_CFG` 的内存使用统计
    MemUsage(MemUsageStats),
    Frame(FrameStartOutcome),
    /// 导出确认触发了延后的帧起始时携带其结果
    Exported(Option<Box<ExportedResult>>),
}

#[derive(Debug)]
struct CommonState {
    config: CommonConfig,
    layout: CommonLayout,
}

/// 对象检测实例
///
/// 默认使用软件加速器、软件传输引擎与合成场景数据源。
///
/// # Example
///
/// ```rust
/// use objdet_dpc::{DpcState, ObjDetBuilder};
/// use objdet_protocol::{CommonConfig, StaticConfig};
///
/// let mut dpc = ObjDetBuilder::new().build();
/// dpc.pre_start_common(CommonConfig::default()).unwrap();
/// let usage = dpc.pre_start(0, StaticConfig::default()).unwrap();
/// assert!(usage.slow.used > 0);
/// dpc.start().unwrap();
/// assert_eq!(dpc.state(), DpcState::Idle);
/// ```
pub struct ObjDet<A = SoftHwa, E = SoftEdma, S = SceneSource> {
    mem: MemoryMap,
    hwa: A,
    edma: E,
    source: S,
    config: DpcConfig,
    common: Option<CommonState>,
    subframes: Vec<Option<SubFrame>>,
    gate: ExportGate,
    state: DpcState,
    /// 已完成的整帧数
    frame: u32,
    /// 延后的帧起始时间戳（微秒）
    deferred: Option<u64>,
    metrics: Arc<DpcMetrics>,
    epoch: Instant,
}

fn elapsed_us(epoch: Instant) -> u64 {
    u64::try_from(epoch.elapsed().as_micros()).unwrap_or(u64::MAX)
}

fn subframe_mut(subframes: &mut [Option<SubFrame>], index: u8) -> Result<&mut SubFrame, DpcError> {
    subframes
        .get_mut(index as usize)
        .and_then(Option::as_mut)
        .ok_or(DpcError::SubFrameNotConfigured(index))
}

impl<A, E, S> ObjDet<A, E, S>
where
    A: Accelerator,
    E: TransferEngine,
    S: AdcSource,
{
    pub fn new(config: DpcConfig, hwa: A, edma: E, source: S) -> Self {
        let mem = MemoryMap::new(
            config.adc_bytes,
            config.window_bytes,
            config.local_bytes,
            config.slow_bytes,
        );
        Self {
            mem,
            hwa,
            edma,
            source,
            config,
            common: None,
            subframes: Vec::new(),
            gate: ExportGate::new(),
            state: DpcState::Init,
            frame: 0,
            deferred: None,
            metrics: Arc::new(DpcMetrics::new()),
            epoch: Instant::now(),
        }
    }

    pub fn state(&self) -> DpcState {
        self.state
    }

    pub fn config(&self) -> &DpcConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<DpcMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn memory(&self) -> &MemoryMap {
        &self.mem
    }

    pub fn memory_usage(&self) -> MemUsageStats {
        planner::usage(&self.mem)
    }

    pub fn subframe(&self, index: u8) -> Option<&SubFrame> {
        self.subframes.get(index as usize).and_then(Option::as_ref)
    }

    pub fn num_subframes(&self) -> u8 {
        self.subframes.len() as u8
    }

    /// 当前活动子帧
    pub fn active_subframe(&self) -> u8 {
        self.gate.active()
    }

    /// 在途（已交出未确认）子帧
    pub fn in_flight(&self) -> Option<u8> {
        self.gate.in_flight()
    }

    /// 已完成的整帧数
    pub fn frame_number(&self) -> u32 {
        self.frame
    }

    /// 是否存有延后的帧起始事件
    pub fn has_deferred_frame_start(&self) -> bool {
        self.deferred.is_some()
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    fn check_alive(&self) -> Result<(), DpcError> {
        if self.state == DpcState::Halted {
            return Err(DpcError::Halted);
        }
        Ok(())
    }

    fn require_stopped(&self, op: &'static str) -> Result<(), DpcError> {
        if self.state.is_running() {
            return Err(DpcError::InvalidState {
                op,
                state: self.state.name(),
            });
        }
        Ok(())
    }

    fn fatal(&mut self, violation: ConsistencyViolation) -> DpcError {
        error!("fatal consistency violation: {}", violation);
        self.state = DpcState::Halted;
        DpcError::Fatal(violation)
    }

    fn halt(&mut self, err: DpcError) -> DpcError {
        error!("data path halted: {}", err);
        self.state = DpcState::Halted;
        err
    }

    fn hw_capacity(&self) -> HwCapacity {
        HwCapacity {
            param_sets: self.hwa.num_param_sets(),
            channels: self.edma.num_channels(),
        }
    }

    /// 公共配置
    ///
    /// 复位全部内存区并规划公共缓冲区；之前的子帧规划全部失效。
    pub fn pre_start_common(&mut self, config: CommonConfig) -> Result<(), DpcError> {
        self.check_alive()?;
        self.require_stopped("pre_start_common")?;
        config.validate(self.config.limits.max_subframes)?;

        self.common = None;
        self.subframes.clear();
        let layout = planner::plan_common(&mut self.mem, &config)?;
        self.subframes
            .resize_with(config.num_subframes as usize, || None);
        info!(
            "common configuration applied: {} sub-frame(s), {} virtual antennas",
            config.num_subframes,
            config.antenna.len()
        );
        self.common = Some(CommonState { config, layout });
        self.state = DpcState::Configured;
        Ok(())
    }

    /// 子帧静态配置
    ///
    /// 校验参数、规划缓冲区并配置全部阶段；任何错误都同步返回。
    pub fn pre_start(&mut self, index: u8, config: StaticConfig) -> Result<MemUsageStats, DpcError> {
        self.check_alive()?;
        self.require_stopped("pre_start")?;
        let hw_capacity = self.hw_capacity();
        let common = self.common.as_ref().ok_or(DpcError::CommonNotConfigured)?;
        let configured = self.subframes.len() as u8;
        if index >= configured {
            return Err(DpcError::InvalidSubFrame { index, configured });
        }

        RangeStage::validate(&config, self.mem.bank_len(Bank::Adc))?;
        DopplerStage::validate(&config)?;
        CfarStage::validate(&config)?;
        AoaEstimator::validate(&config, &common.config)?;

        // 旧规划在重新分配前作废
        self.subframes[index as usize] = None;
        let plan = planner::plan_subframe(
            &mut self.mem,
            &common.layout,
            &config,
            &self.config.limits,
            hw_capacity,
        )?;
        let mut sf = SubFrame::new(index, config, plan);
        let mut hw = HwCtx::new(&mut self.hwa, &mut self.edma, &mut self.mem);
        sf.configure_all(&mut hw, &common.config, &common.layout)?;

        let usage = plan.usage;
        info!(
            "sub-frame {} configured: slow {}/{}, local {}/{}, window {}/{}",
            index,
            usage.slow.used,
            usage.slow.capacity,
            usage.local.used,
            usage.local.capacity,
            usage.window.used,
            usage.window.capacity
        );
        self.subframes[index as usize] = Some(sf);
        self.state = DpcState::Configured;
        Ok(usage)
    }

    pub fn start(&mut self) -> Result<(), DpcError> {
        self.check_alive()?;
        if !matches!(self.state, DpcState::Configured | DpcState::Stopped) {
            return Err(DpcError::InvalidState {
                op: "start",
                state: self.state.name(),
            });
        }
        if self.common.is_none() {
            return Err(DpcError::CommonNotConfigured);
        }
        if let Some(missing) = self.subframes.iter().position(Option::is_none) {
            return Err(DpcError::SubFrameNotConfigured(missing as u8));
        }
        if let Some(index) = self.gate.in_flight() {
            return Err(self.fatal(ConsistencyViolation::StartWhileInFlight(index)));
        }
        let active = self.gate.active();
        if active != 0 {
            return Err(self.fatal(ConsistencyViolation::StartNotAtZero(active)));
        }

        let common = self.common.as_ref().ok_or(DpcError::CommonNotConfigured)?;
        let sf = subframe_mut(&mut self.subframes, 0)?;
        let mut hw = HwCtx::new(&mut self.hwa, &mut self.edma, &mut self.mem);
        sf.drain_pending();
        sf.configure_all(&mut hw, &common.config, &common.layout)?;
        sf.pre_trigger_range(&mut hw)?;

        self.deferred = None;
        self.state = DpcState::Idle;
        info!("data path started with {} sub-frame(s)", self.subframes.len());
        Ok(())
    }

    /// 停止
    ///
    /// 丢弃延后的帧起始；在途子帧的导出确认在停止后仍然接受。
    pub fn stop(&mut self) -> Result<(), DpcError> {
        self.check_alive()?;
        if self.deferred.take().is_some() {
            warn!("stop: dropping deferred frame start");
        }
        if self.gate.in_flight().is_none() {
            self.gate.rewind();
        }
        self.state = DpcState::Stopped;
        info!("data path stopped");
        Ok(())
    }

    /// 帧起始事件
    pub fn frame_start(&mut self) -> Result<FrameStartOutcome, DpcError> {
        self.check_alive()?;
        if !matches!(self.state, DpcState::Idle | DpcState::ResultsReady) {
            return Err(DpcError::InvalidState {
                op: "frame_start",
                state: self.state.name(),
            });
        }
        let now = elapsed_us(self.epoch);
        DpcMetrics::add(&self.metrics.frames_started, 1u32);

        if !self.gate.try_acquire() {
            if self.deferred.is_some() {
                let frame = self.frame;
                return Err(self.fatal(ConsistencyViolation::FrameOverrun { frame }));
            }
            self.deferred = Some(now);
            DpcMetrics::add(&self.metrics.deferred_frame_starts, 1u32);
            warn!(
                "frame start deferred: sub-frame {} not exported yet",
                self.gate.active()
            );
            return Ok(FrameStartOutcome::Deferred);
        }
        let result = self.process(now)?;
        Ok(FrameStartOutcome::Processed(Box::new(result)))
    }

    /// 导出确认
    ///
    /// 释放令牌并前进到下一个子帧；若有延后的帧起始，立即处理并返回其结果。
    pub fn result_exported(&mut self, index: u8) -> Result<Option<ExportedResult>, DpcError> {
        self.check_alive()?;
        if let Err(violation) = self.gate.acknowledge(index) {
            return Err(self.fatal(violation));
        }
        if self.state.is_running() {
            self.gate.advance(self.subframes.len() as u8);
        } else {
            self.gate.rewind();
        }
        if self.state == DpcState::ResultsReady {
            self.state = DpcState::Idle;
        }
        trace!(
            "sub-frame {} exported, next active {}",
            index,
            self.gate.active()
        );

        if self.state == DpcState::Idle
            && let Some(stamp) = self.deferred.take()
        {
            if !self.gate.try_acquire() {
                return Err(self.fatal(ConsistencyViolation::StartWhileInFlight(index)));
            }
            debug!("firing deferred frame start");
            return self.process(stamp).map(Some);
        }
        Ok(None)
    }

    /// 排队动态配置
    ///
    /// `SubFrameSel::All` 先校验所有已配置子帧，全部通过才排队。
    pub fn queue_dynamic(&mut self, sel: SubFrameSel, change: DynamicChange) -> Result<(), DpcError> {
        self.check_alive()?;
        if self.common.is_none() {
            return Err(DpcError::CommonNotConfigured);
        }
        match sel {
            SubFrameSel::Index(index) => {
                let configured = self.subframes.len() as u8;
                if index >= configured {
                    return Err(DpcError::InvalidSubFrame { index, configured });
                }
                subframe_mut(&mut self.subframes, index)?.queue(change)
            }
            SubFrameSel::All => {
                if self.subframes.iter().all(Option::is_none) {
                    return Err(DpcError::SubFrameNotConfigured(0));
                }
                for sf in self.subframes.iter().flatten() {
                    sf.check(change)?;
                }
                for sf in self.subframes.iter_mut().flatten() {
                    sf.queue(change)?;
                }
                Ok(())
            }
        }
    }

    /// 丢弃子帧的直流距离特征标定结果，重新累计
    pub fn reset_dc_calibration(&mut self, index: u8) -> Result<(), DpcError> {
        self.check_alive()?;
        let sf = subframe_mut(&mut self.subframes, index)?;
        let mut hw = HwCtx::new(&mut self.hwa, &mut self.edma, &mut self.mem);
        sf.range.control(&mut hw, StageControl::ResetDcCalibration)?;
        Ok(())
    }

    /// 执行一条命令
    pub fn dispatch(&mut self, cmd: Command) -> Result<CommandResponse, DpcError> {
        trace!("dispatch {:?}", cmd.code());
        match cmd {
            Command::PreStartCommonCfg(config) => {
                self.pre_start_common(config)?;
                Ok(CommandResponse::Ack)
            }
            Command::PreStartCfg { sub_frame, config } => {
                self.pre_start(sub_frame, *config).map(CommandResponse::MemUsage)
            }
            Command::Start => {
                self.start()?;
                Ok(CommandResponse::Ack)
            }
            Command::Stop => {
                self.stop()?;
                Ok(CommandResponse::Ack)
            }
            Command::TriggerFrame => self.frame_start().map(CommandResponse::Frame),
            Command::ResultExported { sub_frame } => self
                .result_exported(sub_frame)
                .map(|r| CommandResponse::Exported(r.map(Box::new))),
            Command::DynamicCfg { sub_frame, change } => {
                self.queue_dynamic(sub_frame, change)?;
                Ok(CommandResponse::Ack)
            }
        }
    }

    /// 处理活动子帧；运行期任何错误都会使实例停机
    fn process(&mut self, frame_start_us: u64) -> Result<ExportedResult, DpcError> {
        self.state = DpcState::StageExecuting;
        match self.execute(frame_start_us) {
            Ok(result) => {
                self.state = DpcState::ResultsReady;
                Ok(result)
            }
            Err(err) => Err(self.halt(err)),
        }
    }

    fn execute(&mut self, frame_start_us: u64) -> Result<ExportedResult, DpcError> {
        let idx = self.gate.active();
        let num_subframes = self.subframes.len() as u8;
        let ObjDet {
            mem,
            hwa,
            edma,
            source,
            config,
            common,
            subframes,
            frame,
            metrics,
            epoch,
            ..
        } = self;
        let epoch = *epoch;
        let common = common.as_ref().ok_or(DpcError::CommonNotConfigured)?;
        let mut hw = HwCtx::new(hwa, edma, mem);
        let mut timing = TimingStats {
            frame_start_us,
            ..Default::default()
        };

        // 帧内：采集与距离处理
        let sf = subframe_mut(subframes, idx)?;
        let t = Instant::now();
        let adc = hw.mem.adc_region(sf.config().adc_frame_bytes())?;
        source.capture(idx, sf.config(), &common.config.antenna, hw.mem.bytes_mut(adc)?)?;
        let range = sf.range.run(&mut hw)?;
        timing.stage_us[stage_index::RANGE] = t.elapsed().as_micros() as u64;
        trace!("sub-frame {}: range done, dc {:?}", idx, range.dc);

        // 帧间处理
        timing.inter_frame_start_us = elapsed_us(epoch);
        let changed = sf.drain_pending();
        if num_subframes > 1 || changed {
            sf.configure_processing(&mut hw, &common.config, &common.layout)?;
        }
        let t = Instant::now();
        let doppler = sf.doppler.run(&mut hw)?;
        timing.stage_us[stage_index::DOPPLER] = t.elapsed().as_micros() as u64;

        let next_idx = (idx + 1) % num_subframes;
        if num_subframes > 1 {
            let next = subframe_mut(subframes, next_idx)?;
            next.drain_pending();
            next.configure_range(&mut hw)?;
        }

        let sf = subframe_mut(subframes, idx)?;
        let t = Instant::now();
        let cfar = if sf.cfar.is_enabled() {
            sf.cfar.run(&mut hw)?
        } else {
            CfarOutput::default()
        };
        timing.stage_us[stage_index::CFAR] = t.elapsed().as_micros() as u64;

        let t = Instant::now();
        let validated = sf.intersect.run(&mut hw, doppler.num_objects)?;
        timing.stage_us[stage_index::INTERSECT] = t.elapsed().as_micros() as u64;

        // 之后的处理不再使用加速器
        subframe_mut(subframes, next_idx)?.pre_trigger_range(&mut hw)?;

        let sf = subframe_mut(subframes, idx)?;
        let layout = *sf.layout();
        let det_matrix_export = sf.config().det_matrix_export;
        let measurement = if common.config.measure.enabled {
            measure(
                hw.mem,
                layout.cube,
                doppler.num_objects,
                sf.config().num_virtual_antennas(),
                sf.config().range_step_m,
                &common.config.measure,
            )?
        } else {
            None
        };

        let t = Instant::now();
        let aoa = sf.aoa.run(hw.mem, validated.num_objects)?;
        timing.stage_us[stage_index::AOA] = t.elapsed().as_micros() as u64;

        let num_objects = aoa.objects.len();
        let map = &config.address_map;
        let refs = ResultRefs {
            object_list: map.translate(layout.point_cloud.sub(0, num_objects * POINT_OBJ_BYTES)?),
            side_info: map.translate(layout.side_info.sub(0, num_objects * SIDE_INFO_BYTES)?),
            det_matrix: layout
                .det_matrix
                .filter(|_| det_matrix_export)
                .map(|r| map.translate(r)),
        };
        let clipped = ClipCounters {
            raw_list: doppler.clipped,
            cfar_list: cfar.clipped,
            validated_list: validated.clipped,
        };

        DpcMetrics::add(&metrics.subframes_processed, 1u32);
        DpcMetrics::add(&metrics.raw_objects, doppler.num_objects as u64);
        DpcMetrics::add(&metrics.validated_objects, validated.num_objects as u64);
        DpcMetrics::add(&metrics.output_objects, num_objects as u64);
        DpcMetrics::add(&metrics.dropped_geometry, aoa.dropped_geometry);
        DpcMetrics::add(&metrics.dropped_fov, aoa.dropped_fov);
        DpcMetrics::add(&metrics.list_clips, clipped.total());

        let record = ResultRecord {
            sub_frame_index: idx,
            frame_number: *frame,
            num_objects: num_objects as u32,
            objects: aoa.objects,
            side_info: aoa.side_info,
            refs,
            clipped,
            num_raw_objects: doppler.num_objects as u32,
            num_cfar_objects: cfar.num_objects as u32,
            measurement,
        };
        if idx + 1 == num_subframes {
            *frame = frame.wrapping_add(1);
        }

        timing.inter_frame_end_us = elapsed_us(epoch);
        timing.inter_frame_processing_us = timing
            .inter_frame_end_us
            .saturating_sub(timing.inter_frame_start_us);
        timing.sub_frame_processing_us = timing.inter_frame_end_us.saturating_sub(frame_start_us);

        debug!(
            "sub-frame {} frame {}: raw {}, cfar {}, validated {}, output {} ({} us)",
            idx,
            record.frame_number,
            record.num_raw_objects,
            record.num_cfar_objects,
            validated.num_objects,
            record.num_objects,
            timing.sub_frame_processing_us
        );
        Ok(ExportedResult { record, timing })
    }
}

impl<A, E, S> std::fmt::Debug for ObjDet<A, E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjDet")
            .field("state", &self.state)
            .field("num_subframes", &self.subframes.len())
            .field("active", &self.gate.active())
            .field("in_flight", &self.gate.in_flight())
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}
