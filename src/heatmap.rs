//! 衰减热力图 (Decaying occupancy heatmap)
//!
//! G×G 网格覆盖检测器坐标空间,每个检测中心 +0.1 (上限1.0),
//! 定时器每秒整体乘以 0.95。两条更新路径都是逐格单调运算,先后顺序无关。

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::detection::types::{Detection, FRAME_HEIGHT, FRAME_WIDTH};

/// 热力图参数
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapParams {
    /// 每轴格数
    pub grid_size: usize,
    /// 每个检测的增量
    pub increment: f32,
    /// 每次衰减的乘数
    pub decay_factor: f32,
    /// 低于此值视为无热度
    pub epsilon: f32,
    /// 检测坐标空间尺寸
    pub frame_width: f32,
    pub frame_height: f32,
}

impl Default for HeatmapParams {
    fn default() -> Self {
        Self {
            grid_size: 20,
            increment: 0.1,
            decay_factor: 0.95,
            epsilon: 0.01,
            frame_width: FRAME_WIDTH,
            frame_height: FRAME_HEIGHT,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Heatmap {
    /// [row, col] 即 [gy, gx],行优先
    cells: Array2<f32>,
    params: HeatmapParams,
}

impl Default for Heatmap {
    fn default() -> Self {
        Self::new(HeatmapParams::default())
    }
}

impl Heatmap {
    pub fn new(params: HeatmapParams) -> Self {
        let g = params.grid_size.max(1);
        Self {
            cells: Array2::zeros((g, g)),
            params: HeatmapParams {
                grid_size: g,
                decay_factor: params.decay_factor.clamp(0.0, 1.0),
                ..params
            },
        }
    }

    pub fn params(&self) -> &HeatmapParams {
        &self.params
    }

    pub fn grid_size(&self) -> usize {
        self.params.grid_size
    }

    /// 检测中心所在的格子 (gx, gy),越界返回 None
    pub fn cell_of(&self, det: &Detection) -> Option<(usize, usize)> {
        let (cx, cy) = det.center();
        let g = self.params.grid_size as f32;
        let gx = ((cx / self.params.frame_width) * g).floor();
        let gy = ((cy / self.params.frame_height) * g).floor();

        if gx >= 0.0 && gx < g && gy >= 0.0 && gy < g {
            Some((gx as usize, gy as usize))
        } else {
            None
        }
    }

    /// 每个批次调用一次
    pub fn on_detections(&mut self, detections: &[Detection]) {
        let inc = self.params.increment;
        for det in detections {
            if let Some((gx, gy)) = self.cell_of(det) {
                let cell = &mut self.cells[[gy, gx]];
                *cell = (*cell + inc).clamp(0.0, 1.0);
            }
        }
    }

    /// 定时衰减
    pub fn on_tick(&mut self) {
        let k = self.params.decay_factor;
        self.cells.mapv_inplace(|v| v * k);
    }

    pub fn value(&self, gx: usize, gy: usize) -> f32 {
        self.cells.get([gy, gx]).copied().unwrap_or(0.0)
    }

    /// 行优先展开的格子值
    pub fn values(&self) -> Vec<f32> {
        self.cells.iter().copied().collect()
    }

    /// 高于 epsilon 的格子: (gx, gy, heat)
    pub fn hot_cells(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        let eps = self.params.epsilon;
        self.cells
            .indexed_iter()
            .filter(move |(_, v)| **v > eps)
            .map(|((gy, gx), v)| (gx, gy, *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 中心落在格子 (gx, gy) 中央的检测框
    fn det_in_cell(gx: usize, gy: usize) -> Detection {
        let cw = FRAME_WIDTH / 20.0;
        let ch = FRAME_HEIGHT / 20.0;
        let cx = (gx as f32 + 0.5) * cw;
        let cy = (gy as f32 + 0.5) * ch;
        Detection {
            x1: cx - 4.0,
            y1: cy - 4.0,
            x2: cx + 4.0,
            y2: cy + 4.0,
            track_id: 1,
            confidence: 0.9,
            class_id: 0,
        }
    }

    #[test]
    fn test_increment_and_decay() {
        let mut heatmap = Heatmap::default();
        heatmap.on_detections(&[det_in_cell(5, 5)]);
        assert!((heatmap.value(5, 5) - 0.1).abs() < 1e-6);

        for _ in 0..3 {
            heatmap.on_tick();
        }
        assert!((heatmap.value(5, 5) - 0.1 * 0.95f32.powi(3)).abs() < 1e-6);
        assert!((heatmap.value(5, 5) - 0.0857).abs() < 1e-4);
    }

    #[test]
    fn test_cap_at_one() {
        let mut heatmap = Heatmap::default();
        let dets: Vec<_> = (0..15).map(|_| det_in_cell(2, 3)).collect();
        heatmap.on_detections(&dets);
        assert_eq!(heatmap.value(2, 3), 1.0);

        heatmap.on_detections(&[det_in_cell(2, 3)]);
        assert_eq!(heatmap.value(2, 3), 1.0);
    }

    #[test]
    fn test_decay_strictly_decreasing_never_negative() {
        let mut heatmap = Heatmap::default();
        heatmap.on_detections(&[det_in_cell(0, 0)]);
        let mut prev = heatmap.value(0, 0);
        for _ in 0..50 {
            heatmap.on_tick();
            let v = heatmap.value(0, 0);
            assert!(v < prev);
            assert!(v > 0.0);
            prev = v;
        }
        assert!(heatmap.hot_cells().next().is_none());
    }

    #[test]
    fn test_out_of_bounds_ignored() {
        let mut heatmap = Heatmap::default();
        let mut det = det_in_cell(0, 0);
        det.x1 = 700.0;
        det.x2 = 720.0;
        assert!(heatmap.cell_of(&det).is_none());
        heatmap.on_detections(&[det]);
        assert!(heatmap.values().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_row_major_layout() {
        let mut heatmap = Heatmap::default();
        heatmap.on_detections(&[det_in_cell(3, 1)]);
        let values = heatmap.values();
        assert!(values[1 * 20 + 3] > 0.0);
        let hot: Vec<_> = heatmap.hot_cells().map(|(x, y, _)| (x, y)).collect();
        assert_eq!(hot, vec![(3, 1)]);
    }
}
