/// 目标驻留时间统计
///
/// 用法示例:
/// ```text
/// dwell --source camera:0 --duration 600 --model yolov8n.onnx --export
/// dwell --source ./frames --fps 15 --duration 60 --replay detections.json --snapshots ./shots
/// ```
use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dwell_rs::config::{Args, DetectorKind};
use dwell_rs::detection::{Detector, ReplayDetector};
use dwell_rs::input::SourceOptions;
use dwell_rs::pipeline::{Pipeline, StopReason};
use dwell_rs::renderer::{FrameSink, NullSink, SnapshotSink};
use dwell_rs::report;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dwell_rs=info,dwell=info")),
        )
        .init();

    let args = Args::parse();

    if let Some(path) = &args.write_config {
        dwell_rs::PipelineConfig::default().save(path)?;
        return Ok(());
    }

    if args.list_devices {
        list_devices();
        return Ok(());
    }

    info!("🎯 ============ 目标驻留时间统计 ============");

    let config = args.resolve().context("配置无效")?;
    let input = config.input_source().context("视频源无效")?;
    info!("📹 视频源: {}", input);

    let detector = build_detector(&args)?;
    let sink = build_sink(&args)?;

    let source = input
        .open(&SourceOptions { fps: args.fps })
        .with_context(|| format!("无法打开视频源 {}", input))?;

    let pipeline = Pipeline::new(config.clone(), detector, sink)?;

    let stop = pipeline.stop_signal();
    ctrlc::set_handler(move || {
        info!("🛑 收到 Ctrl+C, 正在停止...");
        stop.trigger();
    })
    .context("无法注册 Ctrl+C 处理器")?;

    let started_at = Local::now();
    let outcome = pipeline.run(source);

    report::log_summary(&outcome.summary);

    report::export_reports(
        &outcome.summary,
        outcome.actual_duration,
        &started_at,
        config.export_summary.then_some(config.reports_dir.as_path()),
        args.json.as_deref(),
    );

    match (outcome.reason, outcome.failure) {
        (StopReason::DetectorFailure, Some(err)) => Err(err.into()),
        _ => Ok(()),
    }
}

fn build_detector(args: &Args) -> Result<Box<dyn Detector>> {
    match args.detector_kind() {
        Some(DetectorKind::Replay) => {
            let Some(path) = &args.replay else {
                bail!("回放检测器需要 --replay <文件>");
            };
            Ok(Box::new(ReplayDetector::load(path)?))
        }
        Some(DetectorKind::Yolo) => build_yolo(args),
        None => bail!("请指定检测器: --model <onnx模型> 或 --replay <检测结果JSON>"),
    }
}

#[cfg(feature = "onnx")]
fn build_yolo(args: &Args) -> Result<Box<dyn Detector>> {
    let Some(path) = &args.model else {
        bail!("YOLO 检测器需要 --model <onnx模型>");
    };
    Ok(Box::new(dwell_rs::detection::YoloDetector::load(path)?))
}

#[cfg(not(feature = "onnx"))]
fn build_yolo(_args: &Args) -> Result<Box<dyn Detector>> {
    bail!("YOLO 检测器需要启用 `onnx` 功能 (cargo build --features onnx)")
}

fn build_sink(args: &Args) -> Result<Box<dyn FrameSink>> {
    let Some(dir) = &args.snapshots else {
        return Ok(Box::new(NullSink));
    };

    let mut sink = SnapshotSink::new(dir, args.snapshot_every)?;
    if let Some(font) = &args.font {
        sink = sink.with_font(font)?;
    } else {
        warn!("⚠️ 未指定 --font, 截图只绘制检测框");
    }
    Ok(Box::new(sink))
}

#[cfg(feature = "ffmpeg")]
fn list_devices() {
    let devices = dwell_rs::input::list_video_devices();
    if devices.is_empty() {
        warn!("⚠️ 未找到摄像头设备");
    }
    for (index, name) in devices {
        info!("📷 camera:{}  {}", index, name);
    }
}

#[cfg(not(feature = "ffmpeg"))]
fn list_devices() {
    warn!("⚠️ 列出摄像头需要启用 `ffmpeg` 功能");
}
