//! 目标身份跟踪 (IOU匹配 + 丢失退役状态机)
//! Identity tracking across frames using bounding-box overlap only
//!
//! 状态机: Active (可匹配) → Retired (终态, 仅保留用于报表)
//!
//! 每帧流程:
//! 1. 过滤不在允许列表中的类别
//! 2. 按创建顺序在同类活跃对象中查找 IOU 超过阈值的候选
//! 3. 匹配成功 → 更新; 否则 → 分配新ID
//! 4. 本帧未匹配的活跃对象丢失计数+1, 达到阈值后退役

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::labels::DEFAULT_LABELS;
use super::types::{compute_iou, BBox, Detection};

/// 跟踪ID (从1开始严格递增, 不复用)
pub type ObjectId = u32;

// ========== 公共数据结构 ==========

/// 跟踪对象状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    /// 可参与匹配
    Active,
    /// 连续丢失达到阈值, 不再参与匹配
    Retired,
}

/// 跟踪对象
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedObject {
    /// 唯一跟踪ID
    pub id: ObjectId,

    /// 类别 (创建后不变)
    pub label: String,

    /// 最近一次匹配到的边界框
    pub bbox: BBox,

    /// 首次出现时间 (秒, 相对跟踪起点)
    pub first_seen: f64,

    /// 最近出现时间 (秒, 相对跟踪起点)
    pub last_seen: f64,

    /// 驻留时长 = last_seen - first_seen
    pub total_time: f64,

    /// 连续丢失帧数
    pub missing_streak: u32,

    pub state: TrackState,
}

impl TrackedObject {
    fn new(id: ObjectId, label: String, bbox: BBox, t: f64) -> Self {
        Self {
            id,
            label,
            bbox,
            first_seen: t,
            last_seen: t,
            total_time: 0.0,
            missing_streak: 0,
            state: TrackState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == TrackState::Active
    }

    pub fn is_retired(&self) -> bool {
        self.state == TrackState::Retired
    }

    fn observe(&mut self, bbox: BBox, t: f64) {
        self.bbox = bbox;
        self.last_seen = t;
        self.total_time = self.last_seen - self.first_seen;
        self.missing_streak = 0;
    }

    /// 记一次丢失, 本次导致退役时返回 true
    fn mark_missing(&mut self, missing_threshold: u32) -> bool {
        self.missing_streak += 1;
        if self.missing_streak >= missing_threshold {
            self.state = TrackState::Retired;
            return true;
        }
        false
    }
}

// ========== 匹配策略 ==========

/// 候选选择策略
///
/// `FirstMatch` 取创建顺序中第一个超过阈值的候选, 即使后面有 IOU 更高的候选。
/// `BestMatch` 取 IOU 最高者, 相同时取先创建者。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    #[default]
    FirstMatch,
    BestMatch,
}

impl MatchPolicy {
    /// 从 (位置, IOU) 候选序列 (按创建顺序) 中选出匹配位置
    pub fn select<I>(self, candidates: I, iou_threshold: f32) -> Option<usize>
    where
        I: IntoIterator<Item = (usize, f32)>,
    {
        let mut over = candidates
            .into_iter()
            .filter(|&(_, iou)| iou > iou_threshold);

        match self {
            MatchPolicy::FirstMatch => over.next().map(|(idx, _)| idx),
            MatchPolicy::BestMatch => over
                .fold(None, |best: Option<(usize, f32)>, cand| match best {
                    Some((_, best_iou)) if best_iou >= cand.1 => best,
                    _ => Some(cand),
                })
                .map(|(idx, _)| idx),
        }
    }
}

// ========== 对象存储 ==========

/// 跟踪对象存储
///
/// 匹配算法只通过 `candidates` 访问可匹配对象, 报表只通过 `history` 访问;
/// 归档/淘汰策略在此实现, 不影响匹配逻辑。
pub trait ObjectStore {
    /// 追加新对象
    fn insert(&mut self, object: TrackedObject);

    /// 参与匹配的对象 (创建顺序), 可能包含已退役对象
    fn candidates(&self) -> &[TrackedObject];

    fn candidates_mut(&mut self) -> &mut [TrackedObject];

    /// 会话内全部对象 (创建顺序)
    fn history(&self) -> Box<dyn Iterator<Item = &TrackedObject> + '_>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 保留整个会话的全部对象 (内存随出现过的对象数线性增长)
#[derive(Clone, Debug, Default)]
pub struct SessionHistory {
    objects: Vec<TrackedObject>,
}

impl ObjectStore for SessionHistory {
    fn insert(&mut self, object: TrackedObject) {
        self.objects.push(object);
    }

    fn candidates(&self) -> &[TrackedObject] {
        &self.objects
    }

    fn candidates_mut(&mut self) -> &mut [TrackedObject] {
        &mut self.objects
    }

    fn history(&self) -> Box<dyn Iterator<Item = &TrackedObject> + '_> {
        Box::new(self.objects.iter())
    }

    fn len(&self) -> usize {
        self.objects.len()
    }
}

// ========== 跟踪器 ==========

/// 跟踪器参数
#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// 匹配 IOU 阈值 (严格大于)
    pub iou_threshold: f32,
    /// 连续丢失多少帧后退役
    pub missing_threshold: u32,
    /// 允许跟踪的类别
    pub allowed_labels: HashSet<String>,
    pub match_policy: MatchPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.5,
            missing_threshold: 20,
            allowed_labels: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
            match_policy: MatchPolicy::FirstMatch,
        }
    }
}

/// 身份跟踪器
///
/// 只由处理线程独占持有, 无内部锁。
#[derive(Clone, Debug)]
pub struct ObjectTracker<S: ObjectStore = SessionHistory> {
    config: TrackerConfig,
    store: S,
    next_id: ObjectId,
    /// 第一帧的时间 (跟踪起点)
    epoch: Option<f64>,
    frames_seen: u64,
}

impl ObjectTracker<SessionHistory> {
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_store(config, SessionHistory::default())
    }
}

impl Default for ObjectTracker<SessionHistory> {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl<S: ObjectStore> ObjectTracker<S> {
    pub fn with_store(config: TrackerConfig, store: S) -> Self {
        Self {
            config,
            store,
            next_id: 1,
            epoch: None,
            frames_seen: 0,
        }
    }

    /// 用一帧检测结果更新跟踪状态
    ///
    /// 返回每个检测对应的跟踪ID, 未允许的类别为 `None`。
    pub fn update(&mut self, detections: &[Detection], frame_time: f64) -> Vec<Option<ObjectId>> {
        let epoch = *self.epoch.get_or_insert(frame_time);
        let t = frame_time - epoch;

        // 本帧已被占用的ID (含本帧新建的)
        let mut claimed: HashSet<ObjectId> = HashSet::with_capacity(detections.len());
        let mut identities = Vec::with_capacity(detections.len());

        for detection in detections {
            if !self.is_allowed(&detection.label) {
                identities.push(None);
                continue;
            }

            let id = match self.find_match(&detection.bbox, &detection.label, &claimed) {
                Some(idx) => {
                    let object = &mut self.store.candidates_mut()[idx];
                    object.observe(detection.bbox, t);
                    object.id
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.store.insert(TrackedObject::new(
                        id,
                        detection.label.clone(),
                        detection.bbox,
                        t,
                    ));
                    debug!("🆕 新目标 {} #{} @ {:.2}s", detection.label, id, t);
                    id
                }
            };

            claimed.insert(id);
            identities.push(Some(id));
        }

        // 未匹配的活跃对象计入丢失
        let missing_threshold = self.config.missing_threshold;
        for object in self.store.candidates_mut() {
            if !object.is_active() {
                continue;
            }
            if claimed.contains(&object.id) {
                object.missing_streak = 0;
            } else if object.mark_missing(missing_threshold) {
                debug!(
                    "💤 目标退役 {} #{} (连续丢失{}帧)",
                    object.label, object.id, object.missing_streak
                );
            }
        }

        self.frames_seen += 1;
        identities
    }

    /// 按值传递的更新形式: (旧状态, 检测, 时间) → (新状态, 每个检测的ID)
    pub fn step(
        mut self,
        detections: &[Detection],
        frame_time: f64,
    ) -> (Self, Vec<Option<ObjectId>>) {
        let identities = self.update(detections, frame_time);
        (self, identities)
    }

    /// 只读查询: 该检测当前会匹配到哪个ID (与 `update` 相同规则, 无副作用)
    pub fn query(&self, bbox: &BBox, label: &str) -> Option<ObjectId> {
        if !self.is_allowed(label) {
            return None;
        }
        self.find_match(bbox, label, &HashSet::new())
            .map(|idx| self.store.candidates()[idx].id)
    }

    fn find_match(&self, bbox: &BBox, label: &str, claimed: &HashSet<ObjectId>) -> Option<usize> {
        let candidates = self
            .store
            .candidates()
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_active() && o.label == label && !claimed.contains(&o.id))
            .map(|(idx, o)| (idx, compute_iou(bbox, &o.bbox)));

        self.config
            .match_policy
            .select(candidates, self.config.iou_threshold)
    }

    pub fn is_allowed(&self, label: &str) -> bool {
        self.config.allowed_labels.contains(label)
    }

    /// 全部对象 (创建顺序)
    pub fn objects(&self) -> impl Iterator<Item = &TrackedObject> + '_ {
        self.store.history()
    }

    pub fn get(&self, id: ObjectId) -> Option<&TrackedObject> {
        self.store.history().find(|o| o.id == id)
    }

    pub fn active_count(&self) -> usize {
        self.store.candidates().iter().filter(|o| o.is_active()).count()
    }

    pub fn object_count(&self) -> usize {
        self.store.len()
    }

    pub fn epoch(&self) -> Option<f64> {
        self.epoch
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(labels: &[&str], missing_threshold: u32) -> ObjectTracker {
        ObjectTracker::new(TrackerConfig {
            missing_threshold,
            allowed_labels: labels.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    fn car(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection::new(BBox::new(x1, y1, x2, y2), "car")
    }

    #[test]
    fn test_first_object_gets_id_one() {
        let mut tracker = tracker_with(&["car", "person"], 20);
        let ids = tracker.update(
            &[Detection::new(BBox::new(0.0, 0.0, 50.0, 100.0), "person")],
            3.0,
        );
        assert_eq!(ids, vec![Some(1)]);
        assert_eq!(tracker.epoch(), Some(3.0));

        let object = tracker.get(1).unwrap();
        assert_eq!(object.first_seen, 0.0);
        assert_eq!(object.last_seen, 0.0);
        assert_eq!(object.total_time, 0.0);
    }

    #[test]
    fn test_ids_strictly_increase_and_never_reused() {
        let mut tracker = tracker_with(&["car"], 2);
        tracker.update(&[car(0.0, 0.0, 10.0, 10.0)], 0.0);
        tracker.update(&[car(100.0, 100.0, 110.0, 110.0)], 1.0);
        // id1 丢失两帧 → 退役; id2 丢失一帧
        tracker.update(&[], 2.0);
        assert!(tracker.get(1).unwrap().is_retired());

        let ids = tracker.update(&[car(0.0, 0.0, 10.0, 10.0)], 3.0);
        assert_eq!(ids, vec![Some(3)]);

        let all: Vec<ObjectId> = tracker.objects().map(|o| o.id).collect();
        assert_eq!(all, vec![1, 2, 3]);
    }

    #[test]
    fn test_matched_every_frame_never_retires() {
        let mut tracker = tracker_with(&["car"], 3);
        for i in 0..50 {
            let ids = tracker.update(&[car(10.0, 10.0, 60.0, 60.0)], i as f64);
            assert_eq!(ids, vec![Some(1)]);
            let object = tracker.get(1).unwrap();
            assert_eq!(object.missing_streak, 0);
            assert!(object.is_active());
        }
        assert!((tracker.get(1).unwrap().total_time - 49.0).abs() < 1e-9);
    }

    #[test]
    fn test_retires_exactly_at_threshold() {
        let mut tracker = tracker_with(&["car"], 20);
        tracker.update(&[car(0.0, 0.0, 10.0, 10.0)], 0.0);

        for frame in 1..20 {
            tracker.update(&[], frame as f64);
        }
        let object = tracker.get(1).unwrap();
        assert_eq!(object.missing_streak, 19);
        assert!(object.is_active());

        tracker.update(&[], 20.0);
        let object = tracker.get(1).unwrap();
        assert_eq!(object.missing_streak, 20);
        assert!(object.is_retired());

        // 退役后不再累加
        tracker.update(&[], 21.0);
        assert_eq!(tracker.get(1).unwrap().missing_streak, 20);
    }

    #[test]
    fn test_missing_streak_resets_on_match() {
        let mut tracker = tracker_with(&["car"], 20);
        tracker.update(&[car(0.0, 0.0, 10.0, 10.0)], 0.0);
        for frame in 1..10 {
            tracker.update(&[], frame as f64);
        }
        assert_eq!(tracker.get(1).unwrap().missing_streak, 9);

        tracker.update(&[car(1.0, 0.0, 11.0, 10.0)], 10.0);
        let object = tracker.get(1).unwrap();
        assert_eq!(object.missing_streak, 0);
        assert_eq!(object.bbox, BBox::new(1.0, 0.0, 11.0, 10.0));
        assert_eq!(object.total_time, 10.0);
    }

    #[test]
    fn test_retired_object_is_never_revived() {
        let mut tracker = tracker_with(&["car"], 1);
        let bbox = car(0.0, 0.0, 10.0, 10.0);
        tracker.update(std::slice::from_ref(&bbox), 0.0);
        tracker.update(&[], 1.0);
        assert!(tracker.get(1).unwrap().is_retired());

        assert_eq!(tracker.query(&bbox.bbox, "car"), None);
        let ids = tracker.update(&[bbox], 2.0);
        assert_eq!(ids, vec![Some(2)]);
        assert_eq!(tracker.get(1).unwrap().last_seen, 0.0);
    }

    #[test]
    fn test_disallowed_labels_are_ignored() {
        let mut tracker = tracker_with(&["car"], 20);
        let ids = tracker.update(
            &[
                Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0), "dog"),
                car(20.0, 20.0, 30.0, 30.0),
            ],
            0.0,
        );
        assert_eq!(ids, vec![None, Some(1)]);
        assert_eq!(tracker.object_count(), 1);

        // 与已有 car 完全重叠的 dog 也不会更新它
        let ids = tracker.update(
            &[Detection::new(BBox::new(20.0, 20.0, 30.0, 30.0), "dog")],
            1.0,
        );
        assert_eq!(ids, vec![None]);
        let object = tracker.get(1).unwrap();
        assert_eq!(object.missing_streak, 1);
        assert_eq!(object.last_seen, 0.0);
        assert_eq!(tracker.query(&BBox::new(20.0, 20.0, 30.0, 30.0), "dog"), None);
    }

    #[test]
    fn test_labels_do_not_cross_match() {
        let mut tracker = tracker_with(&["car", "truck"], 20);
        tracker.update(&[car(0.0, 0.0, 10.0, 10.0)], 0.0);
        let ids = tracker.update(
            &[Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0), "truck")],
            1.0,
        );
        assert_eq!(ids, vec![Some(2)]);
    }

    /// A=(0,0,100,100) 与 B=(40,0,140,100) 同类且 IOU≈0.43 (不合并);
    /// D=(30,0,130,100) 与 A 的 IOU≈0.54, 与 B 的 IOU≈0.82
    fn two_candidates(policy: MatchPolicy) -> Option<ObjectId> {
        let mut tracker = ObjectTracker::new(TrackerConfig {
            match_policy: policy,
            ..Default::default()
        });
        let ids = tracker.update(
            &[car(0.0, 0.0, 100.0, 100.0), car(40.0, 0.0, 140.0, 100.0)],
            0.0,
        );
        assert_eq!(ids, vec![Some(1), Some(2)]);

        let d = BBox::new(30.0, 0.0, 130.0, 100.0);
        assert!(d.iou(&BBox::new(0.0, 0.0, 100.0, 100.0)) > 0.5);
        assert!(d.iou(&BBox::new(40.0, 0.0, 140.0, 100.0)) > d.iou(&BBox::new(0.0, 0.0, 100.0, 100.0)));

        let queried = tracker.query(&d, "car");
        let ids = tracker.update(&[Detection::new(d, "car")], 1.0);
        assert_eq!(ids, vec![queried]);
        ids[0]
    }

    #[test]
    fn test_first_match_prefers_earlier_candidate() {
        assert_eq!(two_candidates(MatchPolicy::FirstMatch), Some(1));
    }

    #[test]
    fn test_best_match_prefers_higher_iou() {
        assert_eq!(two_candidates(MatchPolicy::BestMatch), Some(2));
    }

    #[test]
    fn test_policy_tie_keeps_creation_order() {
        let candidates = [(0, 0.7), (1, 0.7), (2, 0.6)];
        assert_eq!(MatchPolicy::BestMatch.select(candidates, 0.5), Some(0));
        assert_eq!(MatchPolicy::FirstMatch.select(candidates, 0.5), Some(0));
        // 严格大于
        assert_eq!(MatchPolicy::FirstMatch.select([(0, 0.5)], 0.5), None);
    }

    #[test]
    fn test_object_matched_once_per_frame() {
        let mut tracker = tracker_with(&["car"], 20);
        tracker.update(&[car(0.0, 0.0, 10.0, 10.0)], 0.0);

        // 同一帧两个重复检测: 第一个匹配 #1, 第二个新建 #2
        let ids = tracker.update(&[car(0.0, 0.0, 10.0, 10.0), car(0.5, 0.0, 10.5, 10.0)], 1.0);
        assert_eq!(ids, vec![Some(1), Some(2)]);
        assert_eq!(tracker.get(1).unwrap().bbox, BBox::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_query_has_no_side_effects() {
        let mut tracker = tracker_with(&["car"], 20);
        tracker.update(&[car(0.0, 0.0, 10.0, 10.0)], 0.0);
        let before = tracker.get(1).cloned();

        assert_eq!(tracker.query(&BBox::new(0.0, 0.0, 10.0, 10.0), "car"), Some(1));
        assert_eq!(tracker.query(&BBox::new(50.0, 50.0, 60.0, 60.0), "car"), None);

        assert_eq!(tracker.get(1).cloned(), before);
        assert_eq!(tracker.object_count(), 1);
        assert_eq!(tracker.frames_seen(), 1);
    }

    #[test]
    fn test_step_is_value_in_value_out() {
        let tracker = tracker_with(&["car"], 20);
        let (tracker, ids) = tracker.step(&[car(0.0, 0.0, 10.0, 10.0)], 5.0);
        assert_eq!(ids, vec![Some(1)]);
        let (tracker, ids) = tracker.step(&[car(0.0, 0.0, 10.0, 10.0)], 7.5);
        assert_eq!(ids, vec![Some(1)]);
        assert_eq!(tracker.get(1).unwrap().last_seen, 2.5);
    }

    #[test]
    fn test_disappear_then_new_object_scenario() {
        let mut tracker = tracker_with(&["car"], 20);
        let parked = car(100.0, 100.0, 200.0, 180.0);

        for t in 0..=25 {
            tracker.update(std::slice::from_ref(&parked), t as f64);
        }
        for t in 26..=46 {
            tracker.update(&[], t as f64);
        }
        tracker.update(&[car(400.0, 120.0, 520.0, 200.0)], 47.0);

        let cars: Vec<&TrackedObject> = tracker.objects().filter(|o| o.label == "car").collect();
        assert_eq!(cars.len(), 2);

        assert_eq!(cars[0].id, 1);
        assert!((cars[0].total_time - 25.0).abs() < 1e-9);
        assert!(cars[0].is_retired());

        assert_eq!(cars[1].id, 2);
        assert!((cars[1].first_seen - 47.0).abs() < 1e-9);
        assert!(cars[1].is_active());
    }

    #[test]
    fn test_times_relative_to_epoch() {
        let mut tracker = tracker_with(&["car"], 20);
        tracker.update(&[car(0.0, 0.0, 10.0, 10.0)], 1000.0);
        tracker.update(&[car(0.0, 0.0, 10.0, 10.0)], 1004.5);
        tracker.update(&[car(0.0, 0.0, 10.0, 10.0), car(50.0, 50.0, 60.0, 60.0)], 1006.0);

        let first = tracker.get(1).unwrap();
        assert_eq!(first.first_seen, 0.0);
        assert_eq!(first.last_seen, 6.0);
        let second = tracker.get(2).unwrap();
        assert_eq!(second.first_seen, 6.0);
    }
}
