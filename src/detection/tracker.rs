//! 目标轨迹管理 (Track lifecycle)
//!
//! 轨迹ID完全由上游检测后端分配,这里只做生命周期簿记:
//! 新ID → 创建, 已有ID → 更新, 超过宽限期未出现 → 删除。
//! 每次折叠批次后以 `Arc<TrackSnapshot>` 发布只读快照 (写时复制)。

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use image::RgbaImage;
use tracing::debug;

use super::types::{class_name, Detection, TrackId};

// ========== 公共常量 ==========

/// 轨迹历史点上限
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// 轨迹过期宽限期 (秒)
pub const DEFAULT_EXPIRY_SECS: f64 = 3.0;

// ========== 公共数据结构 ==========

/// 跟踪点 (用于绘制轨迹)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackPoint {
    pub x: f32,
    pub y: f32,
}

/// 跟踪对象
#[derive(Clone, Debug)]
pub struct Track {
    /// 上游分配的跟踪ID
    pub id: TrackId,
    pub class_id: i64,
    pub class_name: &'static str,

    /// 首次出现时间 (秒)
    pub first_seen: f64,
    /// 最近一次出现时间 (秒)
    pub last_seen: f64,
    /// last_seen - first_seen
    pub age: f64,

    pub last_confidence: f32,

    /// 首次出现时截取的缩略图,只写一次
    pub thumbnail: Option<Arc<RgbaImage>>,

    /// 历史轨迹 (中心点),旧点在前
    pub positions: VecDeque<TrackPoint>,
}

impl Track {
    fn new(detection: &Detection, timestamp: f64, capacity: usize) -> Self {
        let (cx, cy) = detection.center();
        let mut positions = VecDeque::with_capacity(capacity);
        positions.push_back(TrackPoint { x: cx, y: cy });

        Self {
            id: detection.track_id,
            class_id: detection.class_id,
            class_name: class_name(detection.class_id),
            first_seen: timestamp,
            last_seen: timestamp,
            age: 0.0,
            last_confidence: detection.confidence,
            thumbnail: None,
            positions,
        }
    }

    /// 融合新观测
    fn observe(&mut self, detection: &Detection, timestamp: f64, capacity: usize) {
        // 乱序时间戳不让 age 倒退
        let timestamp = timestamp.max(self.last_seen);

        self.last_confidence = detection.confidence;
        self.age = timestamp - self.first_seen;

        let (cx, cy) = detection.center();
        self.positions.push_back(TrackPoint { x: cx, y: cy });
        while self.positions.len() > capacity {
            self.positions.pop_front();
        }

        self.last_seen = timestamp;
    }
}

/// 轨迹只读快照
#[derive(Clone, Debug, Default)]
pub struct TrackSnapshot {
    tracks: BTreeMap<TrackId, Track>,
}

impl TrackSnapshot {
    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.tracks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// 按首次出现时间倒序 (最新的在前)
    pub fn newest_first(&self) -> Vec<&Track> {
        let mut tracks: Vec<&Track> = self.tracks.values().collect();
        tracks.sort_by(|a, b| b.first_seen.total_cmp(&a.first_seen));
        tracks
    }

    /// 各类别的活跃轨迹数 (按类别名排序)
    pub fn class_summary(&self) -> Vec<(&'static str, usize)> {
        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for track in self.tracks.values() {
            *counts.entry(track.class_name).or_default() += 1;
        }
        counts.into_iter().collect()
    }

    /// 尚未截取缩略图的轨迹
    pub fn missing_thumbnails(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.tracks
            .values()
            .filter(|t| t.thumbnail.is_none())
            .map(|t| t.id)
    }
}

/// 单个批次折叠的结果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchOutcome {
    pub created: Vec<TrackId>,
    pub updated: Vec<TrackId>,
    pub expired: Vec<TrackId>,
}

// ========== 身份关联接口 ==========

/// 检测 → 轨迹ID 的关联策略
///
/// 默认直接信任上游ID。需要重识别时 (例如遮挡后上游换了ID),
/// 在这里接入最近邻或外观匹配,生命周期簿记不受影响。
pub trait IdentityResolver: Send {
    fn resolve(&mut self, detection: &Detection, live: &TrackSnapshot) -> TrackId;
}

/// 使用上游分配的 track_id
#[derive(Clone, Copy, Debug, Default)]
pub struct UpstreamIdentity;

impl IdentityResolver for UpstreamIdentity {
    fn resolve(&mut self, detection: &Detection, _live: &TrackSnapshot) -> TrackId {
        detection.track_id
    }
}

// ========== 轨迹管理器 ==========

pub struct TrackManager {
    current: Arc<TrackSnapshot>,
    expiry_secs: f64,
    history_capacity: usize,
    resolver: Box<dyn IdentityResolver>,
}

impl Default for TrackManager {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY_SECS, DEFAULT_HISTORY_CAPACITY)
    }
}

impl TrackManager {
    pub fn new(expiry_secs: f64, history_capacity: usize) -> Self {
        Self {
            current: Arc::new(TrackSnapshot::default()),
            expiry_secs,
            history_capacity: history_capacity.max(1),
            resolver: Box::new(UpstreamIdentity),
        }
    }

    /// 替换身份关联策略
    pub fn with_resolver(mut self, resolver: Box<dyn IdentityResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// 折叠一个检测批次
    ///
    /// 先创建/更新本批出现的轨迹,再删除本批未出现且超过宽限期的轨迹。
    /// 整个过程在工作副本上完成,结束后一次性发布新快照。
    pub fn apply_batch(&mut self, detections: &[Detection], timestamp: f64) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut next = (*self.current).clone();
        let mut seen = Vec::with_capacity(detections.len());

        for det in detections {
            let id = self.resolver.resolve(det, &next);
            seen.push(id);

            match next.tracks.get_mut(&id) {
                Some(track) => {
                    track.observe(det, timestamp, self.history_capacity);
                    outcome.updated.push(id);
                }
                None => {
                    let mut det = det.clone();
                    det.track_id = id;
                    next.tracks
                        .insert(id, Track::new(&det, timestamp, self.history_capacity));
                    debug!("新轨迹 #{} ({})", id, class_name(det.class_id));
                    outcome.created.push(id);
                }
            }
        }

        let expiry = self.expiry_secs;
        next.tracks.retain(|id, track| {
            let keep = seen.contains(id) || timestamp - track.last_seen <= expiry;
            if !keep {
                outcome.expired.push(*id);
            }
            keep
        });
        for id in &outcome.expired {
            debug!("轨迹 #{} 过期", id);
        }

        self.current = Arc::new(next);
        outcome
    }

    /// 删除超过宽限期未出现的轨迹
    pub fn expire(&mut self, now: f64) -> Vec<TrackId> {
        let expiry = self.expiry_secs;
        let stale: Vec<TrackId> = self
            .current
            .iter()
            .filter(|t| now - t.last_seen > expiry)
            .map(|t| t.id)
            .collect();

        if !stale.is_empty() {
            let next = Arc::make_mut(&mut self.current);
            for id in &stale {
                next.tracks.remove(id);
                debug!("轨迹 #{} 过期", id);
            }
        }
        stale
    }

    /// 附加缩略图,每条轨迹最多一次
    ///
    /// # 返回
    /// 是否实际写入 (轨迹不存在或已有缩略图时返回 false)
    pub fn attach_thumbnail(&mut self, id: TrackId, image: RgbaImage) -> bool {
        let writable = self
            .current
            .get(id)
            .map(|t| t.thumbnail.is_none())
            .unwrap_or(false);
        if !writable {
            return false;
        }

        if let Some(track) = Arc::make_mut(&mut self.current).tracks.get_mut(&id) {
            track.thumbnail = Some(Arc::new(image));
            debug!("轨迹 #{} 缩略图已附加", id);
        }
        true
    }

    /// 当前快照 (只读,可跨帧持有)
    pub fn snapshot(&self) -> Arc<TrackSnapshot> {
        Arc::clone(&self.current)
    }

    pub fn track_count(&self) -> usize {
        self.current.len()
    }
}
