//! 流水线线程
//!
//! [`DpcRunner`] 把 [`ObjDet`] 移入独立线程：命令经有界通道进入，
//! 子帧结果经深度为 1 的通道交给消费端。最新时序统计通过 `ArcSwap` 无锁读取。

use crate::dpc::{CommandResponse, DpcState, FrameStartOutcome, ObjDet};
use crate::error::DpcError;
use crate::export::ExportedResult;
use crate::metrics::DpcMetrics;
use arc_swap::ArcSwap;
use crossbeam_channel::{
    Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded,
};
use objdet_hwa::{Accelerator, AdcSource, TransferEngine};
use objdet_protocol::{Command, TimingStats};
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// 命令队列容量
const COMMAND_QUEUE_CAPACITY: usize = 16;

/// 默认应答超时
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// 流水线线程错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunnerError {
    #[error("Data path error: {0}")]
    Dpc(#[from] DpcError),
    #[error("Pipeline thread is gone")]
    ChannelClosed,
    #[error("Timed out waiting for the pipeline thread")]
    Timeout,
    #[error("Pipeline halted after a fatal error")]
    Halted,
}

type Reply = Sender<Result<CommandResponse, DpcError>>;

struct Request {
    cmd: Command,
    reply: Option<Reply>,
}

/// 运行在独立线程中的对象检测实例
pub struct DpcRunner {
    /// Drop 时必须先关闭，流水线线程才能收到 `Disconnected` 退出
    cmd_tx: ManuallyDrop<Sender<Request>>,
    results: Receiver<ExportedResult>,
    timing: Arc<ArcSwap<TimingStats>>,
    halted: Arc<AtomicBool>,
    metrics: Arc<DpcMetrics>,
    thread: Option<JoinHandle<()>>,
}

impl DpcRunner {
    /// 启动流水线线程
    pub fn spawn<A, E, S>(dpc: ObjDet<A, E, S>) -> Self
    where
        A: Accelerator + Send + 'static,
        E: TransferEngine + Send + 'static,
        S: AdcSource + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = bounded(COMMAND_QUEUE_CAPACITY);
        let (result_tx, results) = bounded(1);
        let timing = Arc::new(ArcSwap::from_pointee(TimingStats::default()));
        let halted = Arc::new(AtomicBool::new(false));
        let metrics = dpc.metrics();

        let worker = Worker {
            dpc,
            cmd_rx,
            result_tx,
            stale_rx: results.clone(),
            timing: Arc::clone(&timing),
            halted: Arc::clone(&halted),
        };
        let thread = spawn(move || worker.run());

        Self {
            cmd_tx: ManuallyDrop::new(cmd_tx),
            results,
            timing,
            halted,
            metrics,
            thread: Some(thread),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> Arc<DpcMetrics> {
        Arc::clone(&self.metrics)
    }

    /// 最近一个子帧的时序统计
    pub fn latest_timing(&self) -> TimingStats {
        **self.timing.load()
    }

    fn send(&self, req: Request) -> Result<(), RunnerError> {
        if self.is_halted() {
            return Err(RunnerError::Halted);
        }
        self.cmd_tx.send(req).map_err(|_| self.closed())
    }

    fn closed(&self) -> RunnerError {
        if self.is_halted() {
            RunnerError::Halted
        } else {
            RunnerError::ChannelClosed
        }
    }

    /// 发送命令并等待应答
    pub fn request(&self, cmd: Command) -> Result<CommandResponse, RunnerError> {
        self.request_timeout(cmd, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn request_timeout(
        &self,
        cmd: Command,
        timeout: Duration,
    ) -> Result<CommandResponse, RunnerError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(Request {
            cmd,
            reply: Some(reply_tx),
        })?;
        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(RunnerError::from),
            Err(RecvTimeoutError::Timeout) => Err(RunnerError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(self.closed()),
        }
    }

    /// 帧起始事件（不等待应答）
    pub fn trigger_frame(&self) -> Result<(), RunnerError> {
        self.send(Request {
            cmd: Command::TriggerFrame,
            reply: None,
        })
    }

    /// 导出确认（不等待应答）
    pub fn result_exported(&self, sub_frame: u8) -> Result<(), RunnerError> {
        self.send(Request {
            cmd: Command::ResultExported { sub_frame },
            reply: None,
        })
    }

    /// 等待下一个子帧结果
    pub fn recv_result(&self, timeout: Duration) -> Result<ExportedResult, RunnerError> {
        match self.results.recv_timeout(timeout) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) if self.is_halted() => Err(RunnerError::Halted),
            Err(RecvTimeoutError::Timeout) => Err(RunnerError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(self.closed()),
        }
    }

    pub fn try_recv_result(&self) -> Option<ExportedResult> {
        self.results.try_recv().ok()
    }
}

impl Drop for DpcRunner {
    fn drop(&mut self) {
        // 先关闭命令通道，再 join
        unsafe {
            ManuallyDrop::drop(&mut self.cmd_tx);
        }
        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            error!("pipeline thread panicked");
        }
    }
}

struct Worker<A, E, S> {
    dpc: ObjDet<A, E, S>,
    cmd_rx: Receiver<Request>,
    result_tx: Sender<ExportedResult>,
    /// 用于丢弃消费端没有读取的旧结果
    stale_rx: Receiver<ExportedResult>,
    timing: Arc<ArcSwap<TimingStats>>,
    halted: Arc<AtomicBool>,
}

impl<A, E, S> Worker<A, E, S>
where
    A: Accelerator,
    E: TransferEngine,
    S: AdcSource,
{
    fn run(self) {
        let Worker {
            mut dpc,
            cmd_rx,
            result_tx,
            stale_rx,
            timing,
            halted,
        } = self;

        while let Ok(Request { cmd, reply }) = cmd_rx.recv() {
            let code = cmd.code();
            let result = dpc.dispatch(cmd);
            match &result {
                Ok(CommandResponse::Frame(FrameStartOutcome::Processed(r)))
                | Ok(CommandResponse::Exported(Some(r))) => {
                    timing.store(Arc::new(r.timing));
                    publish(&result_tx, &stale_rx, ExportedResult::clone(r));
                }
                Ok(_) => {}
                Err(e) if reply.is_none() => {
                    warn!("command {:?} failed: {}", code, e);
                }
                Err(_) => {}
            }
            let fatal = result.as_ref().is_err_and(DpcError::is_fatal)
                || dpc.state() == DpcState::Halted;
            if fatal {
                halted.store(true, Ordering::Release);
            }
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
            if fatal {
                error!("pipeline thread halting");
                break;
            }
        }
        debug!("pipeline thread exiting");
    }
}

fn publish(tx: &Sender<ExportedResult>, stale: &Receiver<ExportedResult>, result: ExportedResult) {
    match tx.try_send(result) {
        Ok(()) => {}
        Err(TrySendError::Full(result)) => {
            // 旧结果已被确认但没有读取
            if !matches!(stale.try_recv(), Err(TryRecvError::Disconnected)) {
                warn!("dropping unread result");
            }
            let _ = tx.try_send(result);
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}
