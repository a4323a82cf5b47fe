//! 错误类型
//! Error types for configuration, frame sources and the processing pipeline

use std::path::PathBuf;

use thiserror::Error;

/// 配置错误 (流水线启动前拒绝)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write config file {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("run duration is required")]
    MissingDuration,

    #[error("run duration must be a positive number of seconds, got {0}")]
    InvalidDuration(f64),

    #[error("no video source given")]
    EmptySource,

    #[error("invalid source descriptor `{0}`")]
    InvalidSource(String),

    #[error("no object labels selected")]
    NoLabels,

    #[error("{name} must be {expected}, got {value}")]
    OutOfRange {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// 视频源错误 (采集线程视为流结束)
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open video source {source_name}: {reason}")]
    Open { source_name: String, reason: String },

    #[error("failed to read frame: {0}")]
    Read(String),

    #[error("no images found in {0}")]
    NoImages(PathBuf),

    #[error("`{0}` needs the `ffmpeg` feature")]
    FeatureDisabled(String),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 流水线运行错误 (中止运行, 但仍会生成汇总)
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("detector failed on frame #{sequence}")]
    Detector {
        sequence: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}
