/// 检测流数据结构定义
/// Data structures for the detection stream
use phf::phf_map;
use serde::{Deserialize, Serialize};

// ========== 公共常量 ==========

/// 检测器坐标空间宽度 (上游检测框所在的像素坐标系)
pub const FRAME_WIDTH: f32 = 640.0;

/// 检测器坐标空间高度
pub const FRAME_HEIGHT: f32 = 480.0;

/// 未知类别的默认标签
pub const FALLBACK_CLASS_NAME: &str = "Object";

/// 类别ID → 名称 (COCO子集)
static CLASS_NAMES: phf::Map<i64, &'static str> = phf_map! {
    0i64 => "Person",
    1i64 => "Bicycle",
    2i64 => "Car",
    3i64 => "Motorcycle",
    5i64 => "Bus",
    7i64 => "Truck",
};

/// 地图标记调色板 (按 class_id 取模)
const MARKER_PALETTE: [&str; 6] = [
    "#f44336", "#9c27b0", "#3f51b5", "#03a9f4", "#009688", "#8bc34a",
];

pub type TrackId = i64;

// ========== 数据结构 ==========

/// 检测框 (Detection bounding box)
///
/// 每帧每个目标一条,只在当前帧有效
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub track_id: TrackId,
    pub confidence: f32,
    pub class_id: i64,
}

impl Detection {
    /// 中心点
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// 帧坐标点是否落在框内 (闭区间,边框上的点算命中)
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }

    pub fn class_name(&self) -> &'static str {
        class_name(self.class_id)
    }

    /// 标签文本: "<类别> <ID>"
    pub fn label(&self) -> String {
        format!("{} {}", self.class_name(), self.track_id)
    }
}

/// 一次入站消息折叠出的检测批次
#[derive(Clone, Debug, Default)]
pub struct DetectionBatch {
    /// 批次时间戳 (秒)
    pub timestamp: f64,
    pub detections: Vec<Detection>,
    /// 被丢弃的畸形记录数
    pub dropped: usize,
}

/// 检测流连接状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
}

// ========== 工具函数 ==========

/// 查表获取类别名称,未知类别返回 "Object"
pub fn class_name(class_id: i64) -> &'static str {
    CLASS_NAMES
        .get(&class_id)
        .copied()
        .unwrap_or(FALLBACK_CLASS_NAME)
}

/// 地图标记颜色
pub fn marker_color(class_id: i64) -> &'static str {
    MARKER_PALETTE[class_id.rem_euclid(MARKER_PALETTE.len() as i64) as usize]
}
