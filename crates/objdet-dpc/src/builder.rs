//! Builder 模式实现
//!
//! 提供链式构造 `ObjDet` 实例的便捷方式。

use crate::config::DpcConfig;
use crate::dpc::ObjDet;
use crate::runtime::DpcRunner;
use objdet_hwa::{Accelerator, AdcSource, SceneSource, SoftEdma, SoftHwa, TransferEngine};

/// ObjDet Builder（链式构造）
///
/// 未指定的后端使用软件实现：[`SoftHwa`]、[`SoftEdma`] 和空场景的 [`SceneSource`]。
///
/// # Example
///
/// ```rust
/// use objdet_dpc::{DpcConfig, ObjDetBuilder};
/// use objdet_hwa::{SceneSource, SceneTarget, SoftHwa};
///
/// let dpc = ObjDetBuilder::new()
///     .config(DpcConfig::default())
///     .hwa(SoftHwa::new(64))
///     .source(SceneSource::new(vec![SceneTarget::boresight(40.0, 1000.0)]))
///     .build();
/// assert_eq!(dpc.num_subframes(), 0);
/// ```
#[derive(Debug)]
pub struct ObjDetBuilder<A = SoftHwa, E = SoftEdma, S = SceneSource> {
    config: DpcConfig,
    hwa: A,
    edma: E,
    source: S,
}

impl Default for ObjDetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjDetBuilder {
    pub fn new() -> Self {
        Self {
            config: DpcConfig::default(),
            hwa: SoftHwa::default(),
            edma: SoftEdma::default(),
            source: SceneSource::new(Vec::new()),
        }
    }
}

impl<A, E, S> ObjDetBuilder<A, E, S> {
    /// 设置内存区容量与容量上限（可选）
    pub fn config(mut self, config: DpcConfig) -> Self {
        self.config = config;
        self
    }

    /// 替换加速器后端
    pub fn hwa<A2>(self, hwa: A2) -> ObjDetBuilder<A2, E, S> {
        ObjDetBuilder {
            config: self.config,
            hwa,
            edma: self.edma,
            source: self.source,
        }
    }

    /// 替换传输引擎后端
    pub fn edma<E2>(self, edma: E2) -> ObjDetBuilder<A, E2, S> {
        ObjDetBuilder {
            config: self.config,
            hwa: self.hwa,
            edma,
            source: self.source,
        }
    }

    /// 替换 ADC 数据源
    pub fn source<S2>(self, source: S2) -> ObjDetBuilder<A, E, S2> {
        ObjDetBuilder {
            config: self.config,
            hwa: self.hwa,
            edma: self.edma,
            source,
        }
    }
}

impl<A, E, S> ObjDetBuilder<A, E, S>
where
    A: Accelerator,
    E: TransferEngine,
    S: AdcSource,
{
    /// 构建实例（状态为 `Init`）
    pub fn build(self) -> ObjDet<A, E, S> {
        ObjDet::new(self.config, self.hwa, self.edma, self.source)
    }
}

impl<A, E, S> ObjDetBuilder<A, E, S>
where
    A: Accelerator + Send + 'static,
    E: TransferEngine + Send + 'static,
    S: AdcSource + Send + 'static,
{
    /// 构建实例并移入流水线线程
    pub fn spawn(self) -> DpcRunner {
        DpcRunner::spawn(self.build())
    }
}
