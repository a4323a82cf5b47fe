//! 渲染输出 (Frame Sinks)
//!
//! 处理线程把每帧的叠加信息 (检测框 + 类别 + 跟踪ID) 交给 `FrameSink`:
//! - NullSink:     无界面运行, 丢弃
//! - SnapshotSink: 每 N 帧保存一张标注后的 JPEG

use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::FontVec;
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{debug, info};

use crate::detection::{BBox, ObjectId};
use crate::input::Frame;
use crate::pipeline::telemetry::ThroughputSample;

/// 单个目标的叠加信息
#[derive(Clone, Debug, PartialEq)]
pub struct Overlay {
    pub bbox: BBox,
    pub label: String,
    /// 匹配到的跟踪ID (None = 未匹配, 不绘制)
    pub id: Option<ObjectId>,
}

impl Overlay {
    /// 显示文本: `car (3)`
    pub fn caption(&self) -> Option<String> {
        self.id.map(|id| format!("{} ({})", self.label, id))
    }
}

/// 渲染输出接口
pub trait FrameSink {
    fn present(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<()>;

    /// 周期性吞吐量采样
    fn on_progress(&mut self, _sample: &ThroughputSample) {}
}

impl<K: FrameSink + ?Sized> FrameSink for Box<K> {
    fn present(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<()> {
        (**self).present(frame, overlays)
    }

    fn on_progress(&mut self, sample: &ThroughputSample) {
        (**self).on_progress(sample)
    }
}

/// 空输出
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&mut self, _frame: &Frame, _overlays: &[Overlay]) -> Result<()> {
        Ok(())
    }
}

// ========== 标注截图 ==========

/// 跟踪ID配色
const PALETTE: [[u8; 3]; 10] = [
    [255, 64, 64],   // 红色
    [64, 255, 64],   // 绿色
    [64, 64, 255],   // 蓝色
    [255, 255, 64],  // 黄色
    [255, 64, 255],  // 品红
    [64, 255, 255],  // 青色
    [255, 128, 0],   // 橙色
    [128, 0, 255],   // 紫色
    [255, 128, 192], // 粉色
    [128, 255, 128], // 浅绿
];

pub fn id_color(id: ObjectId) -> Rgb<u8> {
    Rgb(PALETTE[id as usize % PALETTE.len()])
}

/// 每 N 帧保存一张标注截图
pub struct SnapshotSink {
    dir: PathBuf,
    every: u64,
    presented: u64,
    saved: u64,
    font: Option<FontVec>,
}

impl SnapshotSink {
    pub fn new(dir: &Path, every: u64) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("无法创建截图目录 {}", dir.display()))?;
        info!("📸 每 {} 帧保存截图到 {}", every.max(1), dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            every: every.max(1),
            presented: 0,
            saved: 0,
            font: None,
        })
    }

    /// 加载字体以绘制类别与ID (未加载时只画框)
    pub fn with_font(mut self, path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("无法读取字体 {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| anyhow::anyhow!("字体格式错误 {}: {}", path.display(), e))?;
        self.font = Some(font);
        Ok(self)
    }

    pub fn saved(&self) -> u64 {
        self.saved
    }
}

impl FrameSink for SnapshotSink {
    fn present(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<()> {
        self.presented += 1;
        if self.presented % self.every != 0 {
            return Ok(());
        }

        let mut image = frame.to_rgb_image().with_context(|| {
            format!(
                "帧数据与尺寸不符: {}x{} / {} 字节",
                frame.width,
                frame.height,
                frame.data.len()
            )
        })?;
        draw_overlays(&mut image, overlays, self.font.as_ref());

        let path = self.dir.join(format!("frame_{:06}.jpg", frame.index));
        image
            .save(&path)
            .with_context(|| format!("无法保存截图 {}", path.display()))?;
        self.saved += 1;
        debug!("📸 {}", path.display());
        Ok(())
    }
}

/// 在图像上绘制已匹配目标的框与标签
pub fn draw_overlays(image: &mut RgbImage, overlays: &[Overlay], font: Option<&FontVec>) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    for overlay in overlays {
        let (Some(id), Some(caption)) = (overlay.id, overlay.caption()) else {
            continue;
        };
        let color = id_color(id);

        let x1 = overlay.bbox.x1.clamp(0.0, (width - 1) as f32) as i32;
        let y1 = overlay.bbox.y1.clamp(0.0, (height - 1) as f32) as i32;
        let w = (overlay.bbox.width().max(1.0) as u32).min(width - x1 as u32);
        let h = (overlay.bbox.height().max(1.0) as u32).min(height - y1 as u32);

        // 线宽 2
        draw_hollow_rect_mut(image, Rect::at(x1, y1).of_size(w.max(1), h.max(1)), color);
        if w > 2 && h > 2 {
            draw_hollow_rect_mut(image, Rect::at(x1 + 1, y1 + 1).of_size(w - 2, h - 2), color);
        }

        if let Some(font) = font {
            let text_y = (y1 - 18).max(0);
            draw_text_mut(image, color, x1, text_y, 16.0, font, &caption);
        }
    }
}
