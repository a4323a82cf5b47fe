//! 运行配置 (JSON 配置文件 + 命令行)
//!
//! 命令行参数覆盖配置文件中的值, 合并后统一校验

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::detection::{MatchPolicy, TrackerConfig, DEFAULT_LABELS};
use crate::error::ConfigError;
use crate::input::InputSource;
use crate::pipeline::buffer::{DEFAULT_CAPACITY, DEFAULT_SOFT_CAP};
use crate::pipeline::ProcessingOptions;

/// 流水线配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // ===== 跟踪参数 =====
    /// 匹配 IOU 阈值 (严格大于)
    pub iou_threshold: f32,
    /// 连续丢失多少帧后退役
    pub missing_threshold: u32,
    pub match_policy: MatchPolicy,
    /// 允许跟踪的类别
    pub allowed_labels: Vec<String>,

    // ===== 缓冲与追赶 =====
    /// 缓冲区硬上限
    pub buffer_capacity: usize,
    /// 积压软上限
    pub backlog_soft_cap: usize,
    /// 追赶间隔 (秒)
    pub catchup_interval_secs: f64,
    /// 无帧时休眠 (毫秒)
    pub idle_sleep_ms: u64,
    /// 吞吐量日志间隔 (秒)
    pub telemetry_interval_secs: f64,

    // ===== 运行 =====
    /// 运行时长 (秒, 必填)
    pub run_duration_secs: Option<f64>,
    /// 视频源描述
    pub source: Option<String>,
    /// 结束后导出 CSV
    pub export_summary: bool,
    pub reports_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.5,
            missing_threshold: 20,
            match_policy: MatchPolicy::FirstMatch,
            allowed_labels: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
            buffer_capacity: DEFAULT_CAPACITY,
            backlog_soft_cap: DEFAULT_SOFT_CAP,
            catchup_interval_secs: 0.5,
            idle_sleep_ms: 10,
            telemetry_interval_secs: 30.0,
            run_duration_secs: None,
            source: None,
            export_summary: false,
            reports_dir: PathBuf::from("reports"),
        }
    }
}

fn out_of_range(name: &'static str, expected: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::OutOfRange {
        name,
        expected,
        value: value.to_string(),
    }
}

impl PipelineConfig {
    /// 从 JSON 文件加载
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("✅ 配置已从 {} 加载", path.display());
        Ok(config)
    }

    /// 保存为 JSON 文件
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source: std::io::Error| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        fs::write(path, json).map_err(write_err)?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 启动前校验
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.run_duration_secs {
            None => return Err(ConfigError::MissingDuration),
            Some(d) if !d.is_finite() || d <= 0.0 => return Err(ConfigError::InvalidDuration(d)),
            Some(_) => {}
        }

        if !(0.0..1.0).contains(&self.iou_threshold) {
            return Err(out_of_range("iou_threshold", "in [0, 1)", self.iou_threshold));
        }
        if self.missing_threshold == 0 {
            return Err(out_of_range("missing_threshold", "at least 1", 0));
        }
        if self.allowed_labels.iter().all(|l| l.trim().is_empty()) {
            return Err(ConfigError::NoLabels);
        }
        if self.buffer_capacity == 0 {
            return Err(out_of_range("buffer_capacity", "at least 1", 0));
        }
        if self.backlog_soft_cap == 0 || self.backlog_soft_cap > self.buffer_capacity {
            return Err(out_of_range(
                "backlog_soft_cap",
                "between 1 and buffer_capacity",
                self.backlog_soft_cap,
            ));
        }
        if !self.catchup_interval_secs.is_finite() || self.catchup_interval_secs <= 0.0 {
            return Err(out_of_range(
                "catchup_interval_secs",
                "a positive number",
                self.catchup_interval_secs,
            ));
        }
        if !self.telemetry_interval_secs.is_finite() || self.telemetry_interval_secs <= 0.0 {
            return Err(out_of_range(
                "telemetry_interval_secs",
                "a positive number",
                self.telemetry_interval_secs,
            ));
        }
        if let Some(source) = &self.source {
            if source.trim().is_empty() {
                return Err(ConfigError::EmptySource);
            }
        }
        Ok(())
    }

    /// 解析视频源
    pub fn input_source(&self) -> Result<InputSource, ConfigError> {
        self.source
            .as_deref()
            .ok_or(ConfigError::EmptySource)?
            .parse()
    }

    /// 跟踪器参数
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            iou_threshold: self.iou_threshold,
            missing_threshold: self.missing_threshold,
            allowed_labels: self
                .allowed_labels
                .iter()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect(),
            match_policy: self.match_policy,
        }
    }

    /// 运行时长 (校验后调用)
    pub fn run_duration(&self) -> Duration {
        Duration::from_secs_f64(self.run_duration_secs.unwrap_or(0.0).max(0.0))
    }

    pub fn catchup_interval(&self) -> Duration {
        Duration::from_secs_f64(self.catchup_interval_secs.max(0.0))
    }

    pub fn processing_options(&self) -> ProcessingOptions {
        ProcessingOptions {
            catchup_interval: self.catchup_interval(),
            idle_sleep: Duration::from_millis(self.idle_sleep_ms),
            telemetry_interval: Duration::from_secs_f64(self.telemetry_interval_secs.max(0.0)),
        }
    }
}

// ========== 命令行 ==========

/// 检测器类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DetectorKind {
    /// YOLOv8 ONNX 模型 (需要 `onnx` 功能)
    Yolo,
    /// 回放 JSON 检测结果
    Replay,
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about = "目标驻留时间统计 (检测 + IOU跟踪)", long_about = None)]
pub struct Args {
    /// 配置文件 (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 视频源: camera:<序号> | rtsp://... | ip:<地址>:<用户名>:<密码> | 图片目录 | 视频文件
    #[arg(short, long)]
    pub source: Option<String>,

    /// 运行时长 (秒)
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// 跟踪类别, 逗号分隔
    #[arg(short, long, value_delimiter = ',')]
    pub labels: Vec<String>,

    /// 检测器
    #[arg(long, value_enum)]
    pub detector: Option<DetectorKind>,

    /// ONNX 模型路径
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// 回放检测结果 (JSON)
    #[arg(long)]
    pub replay: Option<PathBuf>,

    /// 标注截图目录
    #[arg(long)]
    pub snapshots: Option<PathBuf>,

    /// 每 N 帧保存一张截图
    #[arg(long, default_value_t = 30)]
    pub snapshot_every: u64,

    /// 截图文字字体 (TTF/OTF)
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// 图片目录输入的模拟帧率
    #[arg(long)]
    pub fps: Option<f64>,

    /// 结束后导出 CSV 报表
    #[arg(short, long)]
    pub export: bool,

    /// 导出 JSON 汇总到指定文件
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// 写出默认配置后退出
    #[arg(long)]
    pub write_config: Option<PathBuf>,

    /// 列出摄像头设备后退出
    #[arg(long)]
    pub list_devices: bool,
}

impl Args {
    /// 合并配置文件与命令行参数
    pub fn resolve(&self) -> Result<PipelineConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(source) = &self.source {
            config.source = Some(source.clone());
        }
        if let Some(duration) = self.duration {
            config.run_duration_secs = Some(duration);
        }
        if !self.labels.is_empty() {
            config.allowed_labels = self.labels.clone();
        }
        if self.export {
            config.export_summary = true;
        }

        config.validate()?;
        Ok(config)
    }

    /// 检测器类型: 显式指定, 否则由 --model / --replay 推断
    pub fn detector_kind(&self) -> Option<DetectorKind> {
        self.detector.or(match (&self.model, &self.replay) {
            (Some(_), _) => Some(DetectorKind::Yolo),
            (None, Some(_)) => Some(DetectorKind::Replay),
            (None, None) => None,
        })
    }
}
