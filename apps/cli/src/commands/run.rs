//! run 命令
//!
//! 在流水线线程中处理若干帧：逐子帧触发，取回结果后立即确认导出

use anyhow::{Context, Result};
use clap::Args;
use objdet_dpc::ExportedResult;
use objdet_dpc::ObjDetBuilder;
use objdet_dpc::runtime::DEFAULT_REQUEST_TIMEOUT;
use objdet_protocol::Command;
use objdet_tools::LatencyStatistics;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::load_profile;

/// 运行命令参数
#[derive(Args, Debug)]
pub struct RunCommand {
    /// 配置档案路径
    #[arg(short, long)]
    pub profile: String,

    /// 帧数（每帧包含全部子帧）
    #[arg(short, long, default_value_t = 10)]
    pub frames: u32,

    /// 两次帧起始之间的间隔（毫秒），0 表示确认导出后立即触发
    #[arg(long, default_value_t = 0)]
    pub period_ms: u64,

    /// 以 JSON 行输出点云
    #[arg(long)]
    pub json: bool,
}

impl RunCommand {
    pub fn execute(&self) -> Result<()> {
        let profile = load_profile(&self.profile)?;

        // Ctrl+C 结束运行循环
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            warn!("Ctrl-C handler not installed: {}", e);
        }

        let runner = ObjDetBuilder::new()
            .config(profile.dpc.clone())
            .source(profile.scene_source())
            .spawn();
        for cmd in profile.commands() {
            let code = cmd.code();
            runner
                .request(cmd)
                .with_context(|| format!("{code:?} rejected"))?;
        }
        runner.request(Command::Start).context("start rejected")?;
        info!(
            "running {} frame(s) of {} sub-frame(s)",
            self.frames, profile.common.num_subframes
        );

        let total = self.frames as usize * profile.common.num_subframes as usize;
        let mut latencies = Vec::with_capacity(total);
        let started = Instant::now();
        for _ in 0..total {
            if stop.load(Ordering::SeqCst) {
                println!("\n⚠️  interrupted");
                break;
            }
            runner.trigger_frame()?;
            let result = runner
                .recv_result(DEFAULT_REQUEST_TIMEOUT)
                .context("waiting for sub-frame result")?;
            latencies.push(result.timing.sub_frame_processing_us);
            self.report(&result)?;
            runner.result_exported(result.record.sub_frame_index)?;
            if self.period_ms > 0 {
                std::thread::sleep(Duration::from_millis(self.period_ms));
            }
        }
        let elapsed_us = started.elapsed().as_micros() as u64;
        runner.request(Command::Stop).context("stop rejected")?;

        let stats = LatencyStatistics::calculate(&latencies);
        let metrics = runner.metrics().snapshot();
        println!();
        println!("📊 processing time per sub-frame:");
        println!("  samples: {}", stats.sample_count);
        println!(
            "  avg {:.1} us, min {} us, max {} us, p99 {:.1} us, jitter {:.1} us",
            stats.avg_latency_us,
            stats.min_latency_us,
            stats.max_latency_us,
            stats.p99_latency_us,
            stats.jitter()
        );
        println!(
            "  throughput: {:.1} sub-frames/s",
            LatencyStatistics::frame_rate(stats.sample_count, elapsed_us)
        );
        println!(
            "📈 objects: raw {}, validated {}, output {}, dropped {:.1}%, list clips {}",
            metrics.raw_objects,
            metrics.validated_objects,
            metrics.output_objects,
            metrics.aoa_drop_rate(),
            metrics.list_clips
        );
        Ok(())
    }

    fn report(&self, result: &ExportedResult) -> Result<()> {
        let record = &result.record;
        if self.json {
            let line = serde_json::json!({
                "sub_frame": record.sub_frame_index,
                "frame": record.frame_number,
                "objects": record.objects,
                "side_info": record.side_info,
                "processing_us": result.timing.sub_frame_processing_us,
            });
            println!("{}", serde_json::to_string(&line)?);
            return Ok(());
        }
        println!(
            "frame {} sub-frame {}: {} object(s) ({} raw, {} us)",
            record.frame_number,
            record.sub_frame_index,
            record.num_objects,
            record.num_raw_objects,
            result.timing.sub_frame_processing_us
        );
        for (obj, side) in record.objects.iter().zip(&record.side_info) {
            println!(
                "  x {:7.3} m  y {:7.3} m  z {:7.3} m  v {:7.3} m/s  snr {:5.1} dB",
                obj.x,
                obj.y,
                obj.z,
                obj.velocity,
                side.snr as f32 / 10.0
            );
        }
        Ok(())
    }
}
