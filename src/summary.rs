//! 驻留时间汇总
//!
//! 从跟踪器历史生成按类别分组的统计:
//! 类别按首次出现顺序排列, 同类别内按ID升序

use serde::Serialize;

use crate::detection::{ObjectId, ObjectStore, ObjectTracker, TrackedObject};

/// 生成汇总 (跟踪器历史, 含已退役目标)
pub fn summarize<S: ObjectStore>(tracker: &ObjectTracker<S>) -> Summary {
    Summary::from_tracker(tracker)
}

/// 单个目标的汇总
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObjectSummary {
    pub id: ObjectId,
    pub first_seen: f64,
    pub last_seen: f64,
    pub total_time: f64,
    pub missing_streak: u32,
    pub retired: bool,
}

impl From<&TrackedObject> for ObjectSummary {
    fn from(obj: &TrackedObject) -> Self {
        Self {
            id: obj.id,
            first_seen: obj.first_seen,
            last_seen: obj.last_seen,
            total_time: obj.total_time,
            missing_streak: obj.missing_streak,
            retired: obj.is_retired(),
        }
    }
}

/// 类别统计
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LabelStats {
    pub objects: usize,
    pub active: usize,
    pub retired: usize,
    /// 驻留时间合计
    pub total_dwell: f64,
    pub mean_dwell: f64,
    pub longest_dwell: f64,
}

impl LabelStats {
    fn from_objects(objects: &[ObjectSummary]) -> Self {
        let total_dwell: f64 = objects.iter().map(|o| o.total_time).sum();
        let retired = objects.iter().filter(|o| o.retired).count();
        Self {
            objects: objects.len(),
            active: objects.len() - retired,
            retired,
            total_dwell,
            mean_dwell: if objects.is_empty() {
                0.0
            } else {
                total_dwell / objects.len() as f64
            },
            longest_dwell: objects.iter().map(|o| o.total_time).fold(0.0, f64::max),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LabelSummary {
    pub label: String,
    pub objects: Vec<ObjectSummary>,
    pub stats: LabelStats,
}

/// 按类别分组的汇总 (类别首次出现顺序)
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Summary {
    pub labels: Vec<LabelSummary>,
}

impl Summary {
    /// 从跟踪器历史 (含已退出目标) 生成
    pub fn from_tracker<S: ObjectStore>(tracker: &ObjectTracker<S>) -> Self {
        Self::from_objects(tracker.objects())
    }

    /// 输入按创建顺序 (ID 递增)
    pub fn from_objects<'a>(objects: impl IntoIterator<Item = &'a TrackedObject>) -> Self {
        let mut groups: Vec<(String, Vec<ObjectSummary>)> = Vec::new();
        for obj in objects {
            match groups.iter_mut().find(|(label, _)| *label == obj.label) {
                Some((_, list)) => list.push(obj.into()),
                None => groups.push((obj.label.clone(), vec![obj.into()])),
            }
        }

        let labels = groups
            .into_iter()
            .map(|(label, mut objects)| {
                objects.sort_by_key(|o| o.id);
                let stats = LabelStats::from_objects(&objects);
                LabelSummary {
                    label,
                    objects,
                    stats,
                }
            })
            .collect();

        Self { labels }
    }

    pub fn get(&self, label: &str) -> Option<&LabelSummary> {
        self.labels.iter().find(|l| l.label == label)
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn object_count(&self) -> usize {
        self.labels.iter().map(|l| l.objects.len()).sum()
    }

    /// (类别, 目标) 扁平化, 保持汇总顺序
    pub fn rows(&self) -> impl Iterator<Item = (&str, &ObjectSummary)> + '_ {
        self.labels
            .iter()
            .flat_map(|l| l.objects.iter().map(move |o| (l.label.as_str(), o)))
    }
}
