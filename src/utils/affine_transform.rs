/// 仿射变换工具模块
/// 视频坐标 ↔ 画布坐标 的信箱 (letterbox) 映射
///
/// 绘制和点击命中测试必须使用同一个 `Letterbox`,
/// 否则框的位置和可点击区域会错位。

/// 仿射变换矩阵 (2x3)
/// | a11 a12 b1 |
/// | a21 a22 b2 |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMatrix {
    pub a11: f32,
    pub a12: f32,
    pub b1: f32,
    pub a21: f32,
    pub a22: f32,
    pub b2: f32,
}

impl AffineMatrix {
    /// 创建平移矩阵
    pub fn translation(dx: f32, dy: f32) -> Self {
        Self {
            a11: 1.0,
            a12: 0.0,
            b1: dx,
            a21: 0.0,
            a22: 1.0,
            b2: dy,
        }
    }

    /// 创建缩放矩阵
    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a11: sx,
            a12: 0.0,
            b1: 0.0,
            a21: 0.0,
            a22: sy,
            b2: 0.0,
        }
    }

    /// 矩阵组合 (self * other): 先应用 other,再应用 self
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            a11: self.a11 * other.a11 + self.a12 * other.a21,
            a12: self.a11 * other.a12 + self.a12 * other.a22,
            b1: self.a11 * other.b1 + self.a12 * other.b2 + self.b1,
            a21: self.a21 * other.a11 + self.a22 * other.a21,
            a22: self.a21 * other.a12 + self.a22 * other.a22,
            b2: self.a21 * other.b1 + self.a22 * other.b2 + self.b2,
        }
    }

    /// 应用仿射变换到点 (x, y)
    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        let new_x = self.a11 * x + self.a12 * y + self.b1;
        let new_y = self.a21 * x + self.a22 * y + self.b2;
        (new_x, new_y)
    }

    /// 计算逆矩阵 (用于反向映射)
    pub fn inverse(&self) -> Option<Self> {
        let det = self.a11 * self.a22 - self.a12 * self.a21;
        if det.abs() < 1e-10 {
            return None; // 矩阵不可逆
        }

        let inv_det = 1.0 / det;
        Some(Self {
            a11: self.a22 * inv_det,
            a12: -self.a12 * inv_det,
            b1: (self.a12 * self.b2 - self.a22 * self.b1) * inv_det,
            a21: -self.a21 * inv_det,
            a22: self.a11 * inv_det,
            b2: (self.a21 * self.b1 - self.a11 * self.b2) * inv_det,
        })
    }
}

/// 画布上的矩形 (左上角 + 宽高)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl CanvasRect {
    /// 两个矩形的交集,没有面积时返回 None (含 NaN)
    pub fn intersect(&self, other: &CanvasRect) -> Option<CanvasRect> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        if !(x2 > x1 && y2 > y1) {
            return None;
        }
        Some(CanvasRect {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        })
    }

    /// 线段裁剪到矩形内 (Liang-Barsky),完全在外或端点非有限时返回 None
    pub fn clip_segment(&self, start: (f32, f32), end: (f32, f32)) -> Option<((f32, f32), (f32, f32))> {
        let (x0, y0) = start;
        let dx = end.0 - x0;
        let dy = end.1 - y0;
        if !(x0.is_finite() && y0.is_finite() && dx.is_finite() && dy.is_finite()) {
            return None;
        }

        let mut t0 = 0.0f32;
        let mut t1 = 1.0f32;
        let edges = [
            (-dx, x0 - self.x),
            (dx, self.x + self.width - x0),
            (-dy, y0 - self.y),
            (dy, self.y + self.height - y0),
        ];
        for (p, q) in edges {
            if p == 0.0 {
                // 与该边平行
                if q < 0.0 {
                    return None;
                }
                continue;
            }
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return None;
                }
                t1 = t1.min(r);
            }
        }

        Some(((x0 + t0 * dx, y0 + t0 * dy), (x0 + t1 * dx, y0 + t1 * dy)))
    }
}

/// 保持宽高比、居中适配 (fit-inside)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub frame_width: f32,
    pub frame_height: f32,
    pub canvas_width: f32,
    pub canvas_height: f32,
    /// 视频在画布上实际占用的尺寸
    pub render_width: f32,
    pub render_height: f32,
    /// 左上角偏移
    pub x_start: f32,
    pub y_start: f32,
    matrix: AffineMatrix,
    inverse: AffineMatrix,
}

impl Letterbox {
    /// 由 (帧尺寸, 画布尺寸) 计算映射。任一尺寸非正或映射不可逆时返回 None。
    pub fn fit(frame_width: f32, frame_height: f32, canvas_width: f32, canvas_height: f32) -> Option<Self> {
        if !(frame_width > 0.0 && frame_height > 0.0 && canvas_width > 0.0 && canvas_height > 0.0) {
            return None;
        }

        let frame_aspect = frame_width / frame_height;
        let canvas_aspect = canvas_width / canvas_height;

        let (render_width, render_height) = if frame_aspect > canvas_aspect {
            (canvas_width, canvas_width / frame_aspect)
        } else {
            (canvas_height * frame_aspect, canvas_height)
        };
        let x_start = (canvas_width - render_width) / 2.0;
        let y_start = (canvas_height - render_height) / 2.0;

        let scale_x = render_width / frame_width;
        let scale_y = render_height / frame_height;
        let matrix = AffineMatrix::translation(x_start, y_start)
            .compose(&AffineMatrix::scale(scale_x, scale_y));
        let inverse = matrix.inverse()?;

        Some(Self {
            frame_width,
            frame_height,
            canvas_width,
            canvas_height,
            render_width,
            render_height,
            x_start,
            y_start,
            matrix,
            inverse,
        })
    }

    /// 帧坐标 → 画布坐标
    pub fn to_canvas(&self, x: f32, y: f32) -> (f32, f32) {
        self.matrix.transform_point(x, y)
    }

    /// 画布坐标 → 帧坐标 (点击命中测试)
    pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        self.inverse.transform_point(x, y)
    }

    /// 帧坐标下的 (x1, y1, x2, y2) → 画布矩形
    pub fn map_rect(&self, x1: f32, y1: f32, x2: f32, y2: f32) -> CanvasRect {
        let (cx1, cy1) = self.to_canvas(x1, y1);
        let (cx2, cy2) = self.to_canvas(x2, y2);
        CanvasRect {
            x: cx1,
            y: cy1,
            width: cx2 - cx1,
            height: cy2 - cy1,
        }
    }

    /// 热力图格子在画布上的矩形
    pub fn cell_rect(&self, gx: usize, gy: usize, grid_size: usize) -> CanvasRect {
        let cell_width = self.render_width / grid_size as f32;
        let cell_height = self.render_height / grid_size as f32;
        CanvasRect {
            x: self.x_start + gx as f32 * cell_width,
            y: self.y_start + gy as f32 * cell_height,
            width: cell_width,
            height: cell_height,
        }
    }
}
