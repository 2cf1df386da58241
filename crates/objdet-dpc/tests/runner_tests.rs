//! 流水线线程测试
//!
//! 命令经通道进入线程，结果和时序统计从另一侧取回。

use objdet_dpc::{
    CommandResponse, ConsistencyViolation, DpcError, DpcRunner, FrameStartOutcome, ObjDetBuilder,
    RunnerError,
};
use objdet_hwa::{SceneSource, SceneTarget};
use objdet_protocol::{CfarCfg, Command, CommonConfig, StaticConfig};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn quiet_config() -> StaticConfig {
    StaticConfig {
        cfar_range: CfarCfg {
            enabled: false,
            ..CfarCfg::range_default()
        },
        cfar_doppler: CfarCfg {
            threshold_db: 40.0,
            ..CfarCfg::doppler_default()
        },
        ..Default::default()
    }
}

fn started_runner() -> DpcRunner {
    let runner = ObjDetBuilder::new()
        .source(SceneSource::new(vec![SceneTarget::boresight(40.0, 1000.0)]))
        .spawn();
    assert_eq!(
        runner
            .request(Command::PreStartCommonCfg(CommonConfig::default()))
            .unwrap(),
        CommandResponse::Ack
    );
    let usage = runner.request(Command::pre_start(0, quiet_config())).unwrap();
    assert!(matches!(usage, CommandResponse::MemUsage(u) if u.slow.used > 0));
    assert_eq!(runner.request(Command::Start).unwrap(), CommandResponse::Ack);
    runner
}

#[test]
fn test_frames_flow_through_runner() {
    let runner = started_runner();

    for frame in 0..3u32 {
        runner.trigger_frame().unwrap();
        let result = runner.recv_result(WAIT).unwrap();
        assert_eq!(result.record.frame_number, frame);
        assert_eq!(result.record.num_objects, 1);
        runner.result_exported(result.record.sub_frame_index).unwrap();
    }

    // 命令按顺序执行，应答到达时前面的导出确认已处理
    assert_eq!(runner.request(Command::Stop).unwrap(), CommandResponse::Ack);
    let snapshot = runner.metrics().snapshot();
    assert_eq!(snapshot.subframes_processed, 3);
    assert_eq!(snapshot.output_objects, 3);
    let timing = runner.latest_timing();
    assert!(timing.inter_frame_end_us >= timing.inter_frame_start_us);
}

#[test]
fn test_request_returns_frame_and_publishes_result() {
    let runner = started_runner();
    let resp = runner.request(Command::TriggerFrame).unwrap();
    let CommandResponse::Frame(FrameStartOutcome::Processed(result)) = resp else {
        panic!("unexpected response {resp:?}");
    };
    let published = runner.recv_result(WAIT).unwrap();
    assert_eq!(published, *result);
    assert_eq!(runner.latest_timing(), result.timing);
}

#[test]
fn test_deferred_frame_published_after_export() {
    let runner = started_runner();
    runner.trigger_frame().unwrap();
    let first = runner.recv_result(WAIT).unwrap();

    assert_eq!(
        runner.request(Command::TriggerFrame).unwrap(),
        CommandResponse::Frame(FrameStartOutcome::Deferred)
    );
    runner.result_exported(first.record.sub_frame_index).unwrap();
    let second = runner.recv_result(WAIT).unwrap();
    assert_eq!(second.record.frame_number, first.record.frame_number + 1);
}

#[test]
fn test_fatal_error_halts_runner() {
    let runner = started_runner();
    assert_eq!(
        runner.request(Command::ResultExported { sub_frame: 0 }),
        Err(RunnerError::Dpc(DpcError::Fatal(
            ConsistencyViolation::ExportWithoutToken(0)
        )))
    );
    assert!(runner.is_halted());
    assert_eq!(runner.request(Command::Stop), Err(RunnerError::Halted));
    assert_eq!(runner.trigger_frame(), Err(RunnerError::Halted));
    assert_eq!(
        runner.recv_result(Duration::from_millis(10)),
        Err(RunnerError::Halted)
    );
}

#[test]
fn test_non_fatal_error_keeps_runner_alive() {
    let runner = ObjDetBuilder::new().spawn();
    assert!(matches!(
        runner.request(Command::Start),
        Err(RunnerError::Dpc(DpcError::InvalidState { op: "start", .. }))
    ));
    assert!(!runner.is_halted());
    assert_eq!(
        runner
            .request(Command::PreStartCommonCfg(CommonConfig::default()))
            .unwrap(),
        CommandResponse::Ack
    );
}

#[test]
fn test_drop_joins_thread() {
    let runner = started_runner();
    runner.trigger_frame().unwrap();
    drop(runner);
}

#[test]
fn test_recv_timeout_without_frames() {
    let runner = started_runner();
    assert_eq!(
        runner.recv_result(Duration::from_millis(20)),
        Err(RunnerError::Timeout)
    );
    assert!(runner.try_recv_result().is_none());
}
