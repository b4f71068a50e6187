//! 图像坐标 → 地理坐标 近似投影 (Geo-projection)
//!
//! 不是标定过的相机模型,只是方位角/距离启发式:
//! - 水平视场角固定 60°,由框中心的横向偏移得到相对方位
//! - 距离只由框底边在画面中的高度线性插值 (越靠上越远, 5m ~ 70m)
//! - 方位 + 距离 用等距圆柱近似换算成经纬度偏移

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::detection::tracker::TrackSnapshot;
use crate::detection::types::{marker_color, Detection, TrackId, FRAME_HEIGHT, FRAME_WIDTH};
use crate::error::{KernelError, Result};

/// 每度纬度对应的米数 (近似)
const METERS_PER_DEGREE: f64 = 111_111.0;

/// 经纬度 (十进制度)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// 投影参数
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionParams {
    /// 水平视场角 (度)
    pub horizontal_fov_deg: f64,
    pub frame_width: f64,
    pub frame_height: f64,
    pub min_distance_m: f64,
    pub max_distance_m: f64,
}

impl Default for ProjectionParams {
    fn default() -> Self {
        Self {
            horizontal_fov_deg: 60.0,
            frame_width: FRAME_WIDTH as f64,
            frame_height: FRAME_HEIGHT as f64,
            min_distance_m: 5.0,
            max_distance_m: 70.0,
        }
    }
}

/// 传感器读数: 可用 / 不可用 (附原因)
#[derive(Clone, Debug, PartialEq)]
pub enum SensorReading<T> {
    Available(T),
    Unavailable(String),
}

impl<T> SensorReading<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            SensorReading::Available(v) => Some(v),
            SensorReading::Unavailable(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, SensorReading::Available(_))
    }
}

/// 电池状态 (level: 0-100)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatteryStatus {
    pub charging: bool,
    pub level: f64,
    pub supported: bool,
}

impl Default for BatteryStatus {
    fn default() -> Self {
        Self {
            charging: false,
            level: 100.0,
            supported: true,
        }
    }
}

/// 由设备方向事件的 alpha 计算罗盘朝向 (北=0,顺时针)
pub fn heading_from_alpha(alpha: Option<f64>) -> Option<f64> {
    alpha
        .filter(|a| a.is_finite())
        .map(|a| (360.0 - a).rem_euclid(360.0))
}

/// 由框底边高度推算距离 (米)
pub fn estimate_distance(bottom_y: f64, params: &ProjectionParams) -> f64 {
    let ratio = bottom_y / params.frame_height;
    params.max_distance_m - ratio * (params.max_distance_m - params.min_distance_m)
}

/// 目标方位角 (弧度,北=0,顺时针)
pub fn bearing_rad(center_x: f64, heading_deg: Option<f64>, params: &ProjectionParams) -> f64 {
    let heading_rad = heading_deg.unwrap_or(0.0).to_radians();
    let angle_from_center_deg = (center_x / params.frame_width - 0.5) * params.horizontal_fov_deg;
    heading_rad - angle_from_center_deg * (PI / 180.0)
}

/// 将检测框投影为地理坐标
///
/// 纯函数,相同输入总是得到相同输出。朝向缺失时按正北处理。
pub fn project(
    det: &Detection,
    user: GeoPoint,
    heading_deg: Option<f64>,
    params: &ProjectionParams,
) -> GeoPoint {
    let (center_x, _) = det.center();
    let bearing = bearing_rad(center_x as f64, heading_deg, params);
    let distance = estimate_distance(det.y2 as f64, params);

    let lat_offset = distance * bearing.cos() / METERS_PER_DEGREE;
    let lng_offset =
        distance * bearing.sin() / (METERS_PER_DEGREE * user.lat.to_radians().cos());

    GeoPoint {
        lat: user.lat + lat_offset,
        lng: user.lng + lng_offset,
    }
}

/// 地图上的轨迹标记
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectedTrack {
    pub id: TrackId,
    pub class_name: &'static str,
    pub position: GeoPoint,
    pub color: &'static str,
}

/// 投影所有在当前帧有检测框的活跃轨迹
pub fn project_tracks(
    snapshot: &TrackSnapshot,
    boxes: &[Detection],
    location: &SensorReading<GeoPoint>,
    heading_deg: Option<f64>,
    params: &ProjectionParams,
) -> Result<Vec<ProjectedTrack>> {
    let user = *location
        .value()
        .ok_or(KernelError::SensorUnavailable("geolocation"))?;

    Ok(snapshot
        .newest_first()
        .into_iter()
        .filter_map(|track| {
            let det = boxes.iter().find(|b| b.track_id == track.id)?;
            Some(ProjectedTrack {
                id: track.id,
                class_name: track.class_name,
                position: project(det, user, heading_deg, params),
                color: marker_color(track.class_id),
            })
        })
        .collect())
}
