//! COCO 类别表

use phf::phf_map;

/// 默认跟踪的类别
pub const DEFAULT_LABELS: [&str; 9] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "bus",
    "truck",
    "bird",
    "cat",
    "dog",
];

/// YOLOv8 (COCO 80类) 类别ID → 名称, 只收录需要关注的类别
pub static COCO_LABELS: phf::Map<u32, &'static str> = phf_map! {
    0u32 => "person",
    1u32 => "bicycle",
    2u32 => "car",
    3u32 => "motorcycle",
    5u32 => "bus",
    7u32 => "truck",
    14u32 => "bird",
    15u32 => "cat",
    16u32 => "dog",
};

pub fn coco_label(class_id: u32) -> Option<&'static str> {
    COCO_LABELS.get(&class_id).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_labels_are_known() {
        for label in DEFAULT_LABELS {
            assert!(COCO_LABELS.values().any(|&name| name == label), "{label}");
        }
    }

    #[test]
    fn test_coco_lookup() {
        assert_eq!(coco_label(2), Some("car"));
        assert_eq!(coco_label(4), None); // airplane 不关注
    }
}
