//! 回放检测器
//!
//! 从 JSON 文件读取预先计算好的检测结果, 按帧序号 (`Frame::index`) 回放。
//! 适合离线复现、调参和无 GPU 环境:
//! ```json
//! { "frames": [ { "frame": 0, "detections": [ { "bbox": [10, 20, 110, 220], "label": "person", "confidence": 0.91 } ] } ] }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Detection, Detector};
use crate::input::Frame;

/// 最低置信度 (严格大于)
pub const MIN_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ReplayFile {
    pub frames: Vec<ReplayFrame>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplayFrame {
    pub frame: u64,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

/// 回放检测器 (缺失的帧视为无检测)
#[derive(Debug, Default)]
pub struct ReplayDetector {
    frames: HashMap<u64, Vec<Detection>>,
}

impl ReplayDetector {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("无法读取回放文件 {}", path.display()))?;
        let file: ReplayFile = serde_json::from_str(&text)
            .with_context(|| format!("回放文件格式错误 {}", path.display()))?;
        let detector = Self::from_file(file);
        info!(
            "📼 回放检测器: {} ({} 帧)",
            path.display(),
            detector.frames.len()
        );
        Ok(detector)
    }

    pub fn from_file(file: ReplayFile) -> Self {
        let mut frames: HashMap<u64, Vec<Detection>> = HashMap::new();
        for entry in file.frames {
            frames.entry(entry.frame).or_default().extend(
                entry
                    .detections
                    .into_iter()
                    .filter(|d| d.confidence > MIN_CONFIDENCE),
            );
        }
        Self { frames }
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.frames.get(&frame.index).cloned().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "replay"
    }
}
