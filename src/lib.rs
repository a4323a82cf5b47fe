#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 运行配置 (JSON + 命令行)
pub mod detection; // 检测与身份跟踪
pub mod error; // 错误类型
pub mod input; // 视频输入系统
pub mod pipeline; // 采集/处理流水线
pub mod renderer; // 叠加信息输出
pub mod report; // 汇总报表
pub mod summary; // 驻留时间汇总

pub use crate::config::{Args, DetectorKind, PipelineConfig};
pub use crate::detection::{
    BBox, Detection, Detector, MatchPolicy, ObjectId, ObjectTracker, ReplayDetector, TrackerConfig,
};
pub use crate::error::{ConfigError, PipelineError, SourceError};
pub use crate::input::{Frame, FrameSource, InputSource, SourceOptions};
pub use crate::pipeline::{Pipeline, RunOutcome, StopReason, StopSignal};
pub use crate::renderer::{FrameSink, NullSink, Overlay, SnapshotSink};
pub use crate::summary::{summarize, Summary};
