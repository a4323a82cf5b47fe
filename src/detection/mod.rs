/// 检测系统 (Detection System)
///
/// 处理线程内同步调用
/// - Detector: 目标检测 (YOLOv8 ONNX / 回放)
/// - Tracker:  基于 IOU 的目标跟踪与驻留时间统计
pub mod labels;
pub mod replay;
pub mod tracker;
pub mod types;

#[cfg(feature = "onnx")]
pub mod yolo;

use std::cmp::Ordering;

use crate::input::Frame;

pub use labels::{coco_label, DEFAULT_LABELS};
pub use replay::ReplayDetector;
pub use tracker::{
    MatchPolicy, ObjectId, ObjectStore, ObjectTracker, SessionHistory, TrackState, TrackedObject,
    TrackerConfig,
};
pub use types::{compute_iou, BBox, Detection};

#[cfg(feature = "onnx")]
pub use yolo::YoloDetector;

/// 检测器接口
///
/// 返回的检测结果应已按置信度 (> 0.5) 过滤, 类别名与跟踪器的允许类别一致
pub trait Detector {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<Detection>>;

    fn name(&self) -> &str {
        "detector"
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<Detection>> {
        (**self).detect(frame)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// 按类别的非极大值抑制, 保留置信度高者
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept = 0;
    for index in 0..detections.len() {
        let suppressed = (0..kept).any(|prev| {
            detections[prev].label == detections[index].label
                && detections[prev].bbox.iou(&detections[index].bbox) > iou_threshold
        });
        if !suppressed {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}
