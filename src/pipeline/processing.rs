//! 处理线程
//! 职责: FrameBuffer → 追赶策略 → 检测 → 跟踪 → 叠加信息 → FrameSink

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::buffer::FrameBuffer;
use super::telemetry::ThroughputMeter;
use super::{FrameEnvelope, StopSignal};
use crate::detection::{Detector, ObjectStore, ObjectTracker};
use crate::error::PipelineError;
use crate::renderer::{FrameSink, Overlay};

/// 运行结束原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// 到达运行时长
    Deadline,
    /// 外部取消 (Ctrl+C)
    Cancelled,
    /// 视频源结束且缓冲区已清空
    SourceExhausted,
    /// 检测器出错
    DetectorFailure,
}

// ========== 追赶策略 ==========

/// 取帧结果
#[derive(Debug)]
pub enum NextFrame {
    /// 追赶: 最新一帧, 其余积压已丢弃
    CaughtUp(FrameEnvelope),
    /// 按顺序取最旧一帧
    InOrder(FrameEnvelope),
    /// 无帧可处理
    Idle,
}

/// 每隔 `interval` 丢弃积压只处理最新帧, 其余时间按 FIFO 顺序处理
///
/// 追赶到期但缓冲区为空时本次不处理任何帧, 也不重置计时
#[derive(Debug)]
pub struct CatchupPolicy {
    interval: Duration,
    last_catchup: Instant,
}

impl CatchupPolicy {
    pub fn new(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            last_catchup: start,
        }
    }

    pub fn next(&mut self, now: Instant, buffer: &FrameBuffer) -> NextFrame {
        if now.saturating_duration_since(self.last_catchup) >= self.interval {
            return match buffer.drain_keeping_newest() {
                Some(envelope) => {
                    self.last_catchup = now;
                    NextFrame::CaughtUp(envelope)
                }
                None => NextFrame::Idle,
            };
        }

        match buffer.pop_oldest() {
            Some(envelope) => NextFrame::InOrder(envelope),
            None => NextFrame::Idle,
        }
    }
}

/// `captured_at` 相对 `start` 的秒数 (早于 start 时为负)
pub fn frame_time(captured_at: Instant, start: Instant) -> f64 {
    match captured_at.checked_duration_since(start) {
        Some(after) => after.as_secs_f64(),
        None => -start.duration_since(captured_at).as_secs_f64(),
    }
}

// ========== 处理循环 ==========

/// 处理循环参数
#[derive(Clone, Debug)]
pub struct ProcessingOptions {
    pub catchup_interval: Duration,
    pub idle_sleep: Duration,
    pub telemetry_interval: Duration,
}

pub struct ProcessingLoop<D, K, S: ObjectStore> {
    detector: D,
    sink: K,
    tracker: ObjectTracker<S>,
    buffer: Arc<FrameBuffer>,
    stop: StopSignal,
    options: ProcessingOptions,
    processed: u64,
    caught_up: u64,
}

impl<D: Detector, K: FrameSink, S: ObjectStore> ProcessingLoop<D, K, S> {
    pub fn new(
        detector: D,
        sink: K,
        tracker: ObjectTracker<S>,
        buffer: Arc<FrameBuffer>,
        stop: StopSignal,
        options: ProcessingOptions,
    ) -> Self {
        Self {
            detector,
            sink,
            tracker,
            buffer,
            stop,
            options,
            processed: 0,
            caught_up: 0,
        }
    }

    /// 运行直到截止/取消/源结束/检测器出错
    pub fn run(&mut self, start: Instant, deadline: Instant) -> (StopReason, Option<PipelineError>) {
        info!("🔍 处理线程启动 (检测器: {})", self.detector.name());

        let mut policy = CatchupPolicy::new(self.options.catchup_interval, start);
        let mut meter = ThroughputMeter::new(start, deadline, self.options.telemetry_interval);

        loop {
            if self.stop.is_triggered() {
                info!("🛑 收到停止信号");
                return (StopReason::Cancelled, None);
            }

            let now = Instant::now();
            if now >= deadline {
                info!("⏱️ 到达运行时长");
                return (StopReason::Deadline, None);
            }

            let envelope = match policy.next(now, &self.buffer) {
                NextFrame::CaughtUp(envelope) => {
                    self.caught_up += 1;
                    envelope
                }
                NextFrame::InOrder(envelope) => envelope,
                NextFrame::Idle => {
                    if self.buffer.is_closed() && self.buffer.is_empty() {
                        info!("📭 视频源已结束");
                        return (StopReason::SourceExhausted, None);
                    }
                    thread::sleep(self.options.idle_sleep);
                    continue;
                }
            };

            if let Err(e) = self.process(envelope, start) {
                error!("❌ {}", e);
                return (StopReason::DetectorFailure, Some(e));
            }

            if let Some(sample) = meter.tick(Instant::now(), self.processed) {
                sample.log();
                self.sink.on_progress(&sample);
            }
        }
    }

    /// 处理单帧: 检测 → 跟踪更新 → 查询ID → 输出
    pub fn process(&mut self, envelope: FrameEnvelope, start: Instant) -> Result<(), PipelineError> {
        let t = frame_time(envelope.captured_at, start);

        let detections = self
            .detector
            .detect(&envelope.frame)
            .map_err(|e| PipelineError::Detector {
                sequence: envelope.sequence,
                source: e.into(),
            })?;

        self.tracker.update(&detections, t);

        let overlays: Vec<Overlay> = detections
            .iter()
            .filter(|d| self.tracker.is_allowed(&d.label))
            .map(|d| Overlay {
                bbox: d.bbox,
                label: d.label.clone(),
                id: self.tracker.query(&d.bbox, &d.label),
            })
            .collect();

        if let Err(e) = self.sink.present(&envelope.frame, &overlays) {
            warn!("⚠️ 渲染失败 (帧 #{}): {:#}", envelope.sequence, e);
        }

        self.processed += 1;
        debug!(
            "帧 #{} t={:.3}s: {} 个检测, {} 个活跃目标",
            envelope.sequence,
            t,
            detections.len(),
            self.tracker.active_count()
        );
        Ok(())
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn caught_up(&self) -> u64 {
        self.caught_up
    }

    pub fn tracker(&self) -> &ObjectTracker<S> {
        &self.tracker
    }
}
