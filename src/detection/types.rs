//! 检测数据结构定义
//! Data structures shared by detectors, the tracker and the renderers

use serde::{Deserialize, Serialize};

/// 检测框 (像素坐标, 左上角 x1/y1, 右下角 x2/y2)
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// 面积 (非法框按0计算)
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// 与另一个框的 IOU
    pub fn iou(&self, other: &BBox) -> f32 {
        compute_iou(self, other)
    }
}

impl From<[f32; 4]> for BBox {
    fn from([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// 单帧检测结果 (检测器 → 跟踪器)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub label: String,
    #[serde(default = "full_confidence")]
    pub confidence: f32,
}

fn full_confidence() -> f32 {
    1.0
}

impl Detection {
    pub fn new(bbox: BBox, label: impl Into<String>) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

/// 计算两个边界框的IOU (Intersection over Union)
///
/// 并集面积为0时 (退化框) 返回0
pub fn compute_iou(bbox1: &BBox, bbox2: &BBox) -> f32 {
    let x1 = bbox1.x1.max(bbox2.x1);
    let y1 = bbox1.y1.max(bbox2.y1);
    let x2 = bbox1.x2.min(bbox2.x2);
    let y2 = bbox1.y2.min(bbox2.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = bbox1.area() + bbox2.area() - intersection;

    if union <= 0.0 {
        return 0.0;
    }

    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_self_is_one() {
        let a = BBox::new(10.0, 20.0, 110.0, 80.0);
        assert!((compute_iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint_is_zero() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(compute_iou(&a, &b), 0.0);

        // 仅边相接也不算重叠
        let c = BBox::new(10.0, 0.0, 20.0, 10.0);
        assert_eq!(compute_iou(&a, &c), 0.0);
    }

    #[test]
    fn test_iou_symmetric() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 5.0, 15.0, 15.0);
        assert!((compute_iou(&a, &b) - compute_iou(&b, &a)).abs() < 1e-6);
        // 交集 25, 并集 175
        assert!((compute_iou(&a, &b) - 25.0 / 175.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_zero_area() {
        let point = BBox::new(5.0, 5.0, 5.0, 5.0);
        let line = BBox::new(0.0, 5.0, 10.0, 5.0);
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(compute_iou(&point, &point), 0.0);
        assert_eq!(compute_iou(&point, &a), 0.0);
        assert_eq!(compute_iou(&line, &a), 0.0);
    }

    #[test]
    fn test_detection_json() {
        let d: Detection =
            serde_json::from_str(r#"{"bbox":[1,2,3,4],"label":"car"}"#).unwrap();
        assert_eq!(d.bbox, BBox::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(d.label, "car");
        assert_eq!(d.confidence, 1.0);
    }
}
