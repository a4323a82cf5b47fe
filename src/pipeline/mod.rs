/// 采集/处理流水线 (Capture / Processing Pipeline)
///
/// 双线程架构, 通过有界帧缓冲区通信:
/// - Capture:    视频源读帧 → 编号/时间戳 → FrameBuffer (独立线程)
/// - Processing: 追赶策略取帧 → 检测 → 跟踪 → 输出 (调用者线程)
///
/// 截止时间 / Ctrl+C / 源结束 / 检测器出错 四种结束方式共用同一收尾流程:
/// 触发停止 → 关闭缓冲区 → 等待采集线程 → 生成汇总
pub mod buffer;
pub mod capture;
pub mod processing;
pub mod telemetry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::detection::{Detector, ObjectStore, ObjectTracker, SessionHistory};
use crate::error::{ConfigError, PipelineError};
use crate::input::{Frame, FrameSource};
use crate::renderer::FrameSink;
use crate::summary::Summary;

pub use buffer::{BufferStats, FrameBuffer};
pub use capture::{CaptureEnd, CaptureLoop, CaptureReport};
pub use processing::{CatchupPolicy, NextFrame, ProcessingLoop, ProcessingOptions, StopReason};
pub use telemetry::{ThroughputMeter, ThroughputSample};

// ========== 线程间数据 ==========

/// 缓冲区中的帧 (采集线程 → 处理线程)
#[derive(Debug)]
pub struct FrameEnvelope {
    /// 采集序号 (从1开始)
    pub sequence: u64,
    /// 入队时间
    pub captured_at: Instant,
    pub frame: Frame,
}

/// 停止信号 (Ctrl+C 处理器 / 处理线程 → 采集线程)
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 一次运行的结果
#[derive(Debug)]
pub struct RunOutcome {
    pub summary: Summary,
    pub reason: StopReason,
    /// 检测器错误 (reason = DetectorFailure 时)
    pub failure: Option<PipelineError>,
    /// 实际运行时长
    pub actual_duration: Duration,
    pub frames_processed: u64,
    /// 追赶次数
    pub catchups: u64,
    pub capture: CaptureReport,
    pub buffer: BufferStats,
}

impl RunOutcome {
    /// 平均处理速率
    pub fn average_fps(&self) -> f64 {
        let secs = self.actual_duration.as_secs_f64();
        if secs > 0.0 {
            self.frames_processed as f64 / secs
        } else {
            0.0
        }
    }
}

// ========== 流水线 ==========

pub struct Pipeline<D, K, S: ObjectStore = SessionHistory> {
    config: PipelineConfig,
    detector: D,
    sink: K,
    tracker: ObjectTracker<S>,
    stop: StopSignal,
}

impl<D: Detector, K: FrameSink> Pipeline<D, K, SessionHistory> {
    /// 校验配置并创建流水线
    pub fn new(config: PipelineConfig, detector: D, sink: K) -> Result<Self, ConfigError> {
        config.validate()?;
        let tracker = ObjectTracker::new(config.tracker_config());
        Ok(Self {
            config,
            detector,
            sink,
            tracker,
            stop: StopSignal::new(),
        })
    }
}

impl<D: Detector, K: FrameSink, S: ObjectStore> Pipeline<D, K, S> {
    /// 替换跟踪器 (自定义对象存储)
    pub fn with_tracker<T: ObjectStore>(self, tracker: ObjectTracker<T>) -> Pipeline<D, K, T> {
        Pipeline {
            config: self.config,
            detector: self.detector,
            sink: self.sink,
            tracker,
            stop: self.stop,
        }
    }

    /// 外部取消用的停止信号
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 运行到结束并返回汇总
    pub fn run(self, source: Box<dyn FrameSource + Send>) -> RunOutcome {
        let Self {
            config,
            detector,
            sink,
            tracker,
            stop,
        } = self;

        let buffer = Arc::new(FrameBuffer::new(config.buffer_capacity, config.backlog_soft_cap));
        let capture = CaptureLoop::new(source, buffer.clone(), stop.clone());
        let capture_thread = thread::spawn(move || capture.run());

        let start = Instant::now();
        let deadline = start + config.run_duration();
        info!(
            "🚀 流水线启动: 运行 {:.1}s, 缓冲 {}/{}, 追赶间隔 {:.2}s",
            config.run_duration().as_secs_f64(),
            config.backlog_soft_cap,
            config.buffer_capacity,
            config.catchup_interval().as_secs_f64()
        );

        let mut processing = ProcessingLoop::new(
            detector,
            sink,
            tracker,
            buffer.clone(),
            stop.clone(),
            config.processing_options(),
        );
        let (reason, failure) = processing.run(start, deadline);

        // ===== 收尾 (所有结束方式共用) =====
        stop.trigger();
        buffer.close();
        let capture = match capture_thread.join() {
            Ok(report) => report,
            Err(_) => {
                error!("❌ 采集线程异常退出");
                CaptureReport::default()
            }
        };
        let actual_duration = start.elapsed();

        let frames_processed = processing.processed();
        let catchups = processing.caught_up();
        let summary = Summary::from_tracker(processing.tracker());

        let outcome = RunOutcome {
            summary,
            reason,
            failure,
            actual_duration,
            frames_processed,
            catchups,
            capture,
            buffer: buffer.stats(),
        };

        info!(
            "🏁 运行结束 ({:?}): {:.1}s, 采集 {} 帧, 处理 {} 帧 ({:.2} FPS), 追赶 {} 次",
            outcome.reason,
            outcome.actual_duration.as_secs_f64(),
            outcome.capture.frames_read,
            outcome.frames_processed,
            outcome.average_fps(),
            outcome.catchups
        );
        info!(
            "📦 缓冲区: 入队 {}, 拒绝 {}, 淘汰 {}, 跳过 {}",
            outcome.buffer.pushed, outcome.buffer.rejected, outcome.buffer.evicted, outcome.buffer.skipped
        );

        outcome
    }
}
