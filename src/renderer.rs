//! 合成渲染 (Render / Compositor)
//!
//! 绘制顺序 (从后到前):
//! 1. 视频帧 (信箱适配, 居中)
//! 2. 轨迹线 (fusion / rgb), 越新的线段越不透明
//! 3. 检测框 + 标签 (fusion / rgb)
//! 4. 热力图 (event)
//!
//! 点击命中测试与绘制共用 `Compositor::frame_dims` + `Letterbox::fit`,
//! 保证可点击区域就是画出来的框。绘制前所有图元都裁剪到画布范围内。

use std::time::Instant;

use ab_glyph::{FontArc, PxScale};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, Blend,
};
use imageproc::rect::Rect;
use tracing::{debug, error, info};

use crate::detection::tracker::{TrackManager, TrackSnapshot};
use crate::detection::types::{Detection, TrackId, FRAME_HEIGHT, FRAME_WIDTH};
use crate::error::{KernelError, Result};
use crate::heatmap::Heatmap;
use crate::ui_config::{DisplaySettings, ViewMode};
use crate::utils::affine_transform::{CanvasRect, Letterbox};

/// 标签字号
const LABEL_FONT_SIZE: f32 = 16.0;
/// 标签基线在框上方的距离
const LABEL_OFFSET: f32 = 10.0;
/// 轨迹线最大不透明度
const TRAIL_MAX_ALPHA: f32 = 0.8;
/// 热力图最大不透明度
const HEAT_MAX_ALPHA: f32 = 0.6;

const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);
const TRAIL_COLOR: [u8; 3] = [255, 255, 0];
const HEAT_COLOR: [u8; 3] = [255, 100, 0];

/// 一帧渲染所需的全部输入 (同一帧内只读,不会被撕裂)
pub struct Scene<'a> {
    /// 原始视频帧,None 时绘制纯色背景
    pub frame: Option<&'a RgbaImage>,
    pub tracks: &'a TrackSnapshot,
    /// 已按置信度阈值过滤的检测框
    pub boxes: &'a [Detection],
    pub heatmap: &'a Heatmap,
    pub mode: ViewMode,
    pub settings: &'a DisplaySettings,
}

pub struct Compositor {
    canvas_width: u32,
    canvas_height: u32,
    /// 没有视频帧时使用的检测器坐标空间尺寸
    detection_width: f32,
    detection_height: f32,
    font: Option<FontArc>,

    /// 渲染表面错误后停止渲染
    halted: bool,

    // 统计
    render_count: u64,
    render_last: Instant,
    pub render_fps: f64,
}

impl Compositor {
    pub fn new(canvas_width: u32, canvas_height: u32) -> Self {
        Self {
            canvas_width,
            canvas_height,
            detection_width: FRAME_WIDTH,
            detection_height: FRAME_HEIGHT,
            font: None,
            halted: false,
            render_count: 0,
            render_last: Instant::now(),
            render_fps: 0.0,
        }
    }

    /// 加载标签字体 (TTF/OTF)
    pub fn with_font_file(mut self, path: &str) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let font = FontArc::try_from_vec(bytes).map_err(|e| KernelError::Font(e.to_string()))?;
        info!("✅ 标签字体加载成功: {}", path);
        self.font = Some(font);
        Ok(self)
    }

    /// 检测器坐标空间尺寸 (与热力图使用的尺寸一致)
    pub fn with_detection_size(mut self, width: f32, height: f32) -> Self {
        self.detection_width = width;
        self.detection_height = height;
        self
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// 当前帧尺寸: 有视频帧时取帧尺寸,否则取检测器坐标空间尺寸
    ///
    /// 绘制与命中测试都只通过这里取尺寸
    pub fn frame_dims(&self, frame: Option<&RgbaImage>) -> (f32, f32) {
        match frame {
            Some(f) if f.width() > 0 && f.height() > 0 => (f.width() as f32, f.height() as f32),
            _ => (self.detection_width, self.detection_height),
        }
    }

    /// 帧 → 画布 映射 (绘制与命中测试共用)
    pub fn layout(&self, frame_width: f32, frame_height: f32) -> Option<Letterbox> {
        Letterbox::fit(
            frame_width,
            frame_height,
            self.canvas_width as f32,
            self.canvas_height as f32,
        )
    }

    /// 合成一帧
    pub fn render(&mut self, scene: &Scene) -> Result<RgbaImage> {
        if self.halted {
            return Err(KernelError::RenderSurface("compositor halted".into()));
        }

        let (frame_width, frame_height) = self.frame_dims(scene.frame);
        let layout = match self.layout(frame_width, frame_height) {
            Some(layout) => layout,
            None => {
                self.halted = true;
                let msg = format!(
                    "invalid canvas {}x{} for frame {}x{}",
                    self.canvas_width, self.canvas_height, frame_width, frame_height
                );
                error!("❌ 渲染表面不可用: {}", msg);
                return Err(KernelError::RenderSurface(msg));
            }
        };

        let mut canvas = Blend(RgbaImage::from_pixel(
            self.canvas_width,
            self.canvas_height,
            BACKGROUND,
        ));

        // 1. 视频帧
        if let Some(frame) = scene.frame.filter(|f| f.width() > 0 && f.height() > 0) {
            let w = (layout.render_width.round() as u32).max(1);
            let h = (layout.render_height.round() as u32).max(1);
            let scaled = imageops::resize(frame, w, h, FilterType::Triangle);
            imageops::overlay(
                &mut canvas.0,
                &scaled,
                layout.x_start.round() as i64,
                layout.y_start.round() as i64,
            );
        }

        if scene.mode.shows_boxes() {
            // 2. 轨迹线
            if scene.settings.show_trails {
                draw_trails(&mut canvas, &layout, scene.tracks, &self.bounds(0.0));
            }
            // 3. 检测框
            self.draw_boxes(&mut canvas, &layout, scene.boxes, scene.settings);
        }

        // 4. 热力图
        if scene.mode.shows_heatmap() {
            draw_heatmap(&mut canvas, &layout, scene.heatmap);
        }

        self.update_fps();
        Ok(canvas.0)
    }

    /// 点击 → 轨迹ID
    ///
    /// 按列表顺序线性扫描,返回第一个包含点击点的框
    pub fn hit_test(
        &self,
        frame: Option<&RgbaImage>,
        boxes: &[Detection],
        click_x: f32,
        click_y: f32,
    ) -> Option<TrackId> {
        let (frame_width, frame_height) = self.frame_dims(frame);
        let layout = self.layout(frame_width, frame_height)?;
        hit_test(&layout, boxes, click_x, click_y)
    }

    /// 画布范围,四周各外扩 margin 像素
    fn bounds(&self, margin: f32) -> CanvasRect {
        CanvasRect {
            x: -margin,
            y: -margin,
            width: self.canvas_width as f32 + margin * 2.0,
            height: self.canvas_height as f32 + margin * 2.0,
        }
    }

    fn draw_boxes(
        &self,
        canvas: &mut Blend<RgbaImage>,
        layout: &Letterbox,
        boxes: &[Detection],
        settings: &DisplaySettings,
    ) {
        let color = settings.box_rgba();
        let thickness = settings.thickness();
        // 外扩比线宽多一像素,被裁掉的边连同内缩的几层都落在画布外
        let bounds = self.bounds(thickness as f32 + 1.0);

        for det in boxes {
            let Some(rect) = box_rect(layout, det).intersect(&bounds) else {
                continue;
            };

            // 逐像素向内收缩画多层边框
            for t in 0..thickness {
                let offset = t as f32;
                if let Some(r) = to_pixel_rect(&CanvasRect {
                    x: rect.x + offset,
                    y: rect.y + offset,
                    width: rect.width - offset * 2.0,
                    height: rect.height - offset * 2.0,
                }) {
                    draw_hollow_rect_mut(canvas, r, color);
                }
            }

            if settings.show_labels {
                if let Some(font) = &self.font {
                    let y = rect.y - LABEL_OFFSET - LABEL_FONT_SIZE;
                    draw_text_mut(
                        canvas,
                        color,
                        rect.x.round() as i32,
                        y.round() as i32,
                        PxScale::from(LABEL_FONT_SIZE),
                        font,
                        &det.label(),
                    );
                }
            }
        }
    }

    fn update_fps(&mut self) {
        self.render_count += 1;
        let elapsed = self.render_last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            self.render_fps = self.render_count as f64 / elapsed;
            self.render_count = 0;
            self.render_last = Instant::now();
            debug!("渲染FPS: {:.1}", self.render_fps);
        }
    }
}

// ========== 绘制函数 ==========

fn draw_trails(
    canvas: &mut Blend<RgbaImage>,
    layout: &Letterbox,
    tracks: &TrackSnapshot,
    bounds: &CanvasRect,
) {
    for track in tracks.iter() {
        let n = track.positions.len();
        if n < 2 {
            continue;
        }
        let points: Vec<(f32, f32)> = track
            .positions
            .iter()
            .map(|p| layout.to_canvas(p.x, p.y))
            .collect();

        for i in 1..n {
            let color = Rgba([
                TRAIL_COLOR[0],
                TRAIL_COLOR[1],
                TRAIL_COLOR[2],
                trail_alpha(i, n),
            ]);
            if let Some((start, end)) = bounds.clip_segment(points[i - 1], points[i]) {
                draw_line_segment_mut(canvas, start, end, color);
            }
        }
    }
}

fn draw_heatmap(canvas: &mut Blend<RgbaImage>, layout: &Letterbox, heatmap: &Heatmap) {
    let g = heatmap.grid_size();
    for (gx, gy, heat) in heatmap.hot_cells() {
        let alpha = (heat * HEAT_MAX_ALPHA * 255.0).round() as u8;
        let color = Rgba([HEAT_COLOR[0], HEAT_COLOR[1], HEAT_COLOR[2], alpha]);
        if let Some(r) = to_pixel_rect(&layout.cell_rect(gx, gy, g)) {
            draw_filled_rect_mut(canvas, r, color);
        }
    }
}

/// 第 i 段 (共 n 个点) 轨迹线的不透明度,旧→新递增
pub fn trail_alpha(i: usize, n: usize) -> u8 {
    let opacity = i as f32 / n as f32 * TRAIL_MAX_ALPHA;
    (opacity * 255.0).round() as u8
}

/// 检测框在画布上的矩形
pub fn box_rect(layout: &Letterbox, det: &Detection) -> CanvasRect {
    layout.map_rect(det.x1, det.y1, det.x2, det.y2)
}

/// 命中测试 (与绘制使用同一 layout)
///
/// 点击点经逆变换回到帧坐标,再与原始检测框比较
pub fn hit_test(
    layout: &Letterbox,
    boxes: &[Detection],
    click_x: f32,
    click_y: f32,
) -> Option<TrackId> {
    let (x, y) = layout.to_frame(click_x, click_y);
    boxes
        .iter()
        .find(|det| det.contains(x, y))
        .map(|det| det.track_id)
}

/// 按置信度阈值过滤,保持原顺序
pub fn visible_boxes(boxes: &[Detection], settings: &DisplaySettings) -> Vec<Detection> {
    boxes
        .iter()
        .filter(|det| settings.passes_threshold(det.confidence))
        .cloned()
        .collect()
}

/// 浮点矩形 → 整数像素矩形,宽或高不足1像素时返回 None
fn to_pixel_rect(rect: &CanvasRect) -> Option<Rect> {
    let w = rect.width.round();
    let h = rect.height.round();
    if w < 1.0 || h < 1.0 {
        return None;
    }
    Some(Rect::at(rect.x.round() as i32, rect.y.round() as i32).of_size(w as u32, h as u32))
}

// ========== 缩略图截取 ==========

/// 把检测框裁剪成缩略图 (越界部分裁掉,空区域返回 None)
pub fn crop_thumbnail(frame: &RgbaImage, det: &Detection) -> Option<RgbaImage> {
    let x1 = det.x1.max(0.0).floor() as u32;
    let y1 = det.y1.max(0.0).floor() as u32;
    let x2 = (det.x2.max(0.0).ceil() as u32).min(frame.width());
    let y2 = (det.y2.max(0.0).ceil() as u32).min(frame.height());
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(imageops::crop_imm(frame, x1, y1, x2 - x1, y2 - y1).to_image())
}

/// 缩略图回调 (track_id, 图像)
pub type ThumbnailCallback = Box<dyn FnMut(TrackId, &RgbaImage) + Send>;

/// 首次出现的轨迹截图,交回轨迹管理器,每条轨迹最多一次
#[derive(Default)]
pub struct ThumbnailCapture {
    callback: Option<ThumbnailCallback>,
}

impl ThumbnailCapture {
    pub fn new(callback: ThumbnailCallback) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    /// 为缺少缩略图且当前帧有框的轨迹截图
    ///
    /// # 返回
    /// 本次实际附加了缩略图的轨迹ID
    pub fn capture(
        &mut self,
        frame: &RgbaImage,
        boxes: &[Detection],
        manager: &mut TrackManager,
    ) -> Vec<TrackId> {
        let pending: Vec<TrackId> = manager.snapshot().missing_thumbnails().collect();
        let mut attached = Vec::new();

        for id in pending {
            let Some(det) = boxes.iter().find(|b| b.track_id == id) else {
                continue;
            };
            let Some(thumb) = crop_thumbnail(frame, det) else {
                continue;
            };
            if let Some(cb) = self.callback.as_mut() {
                cb(id, &thumb);
            }
            if manager.attach_thumbnail(id, thumb) {
                attached.push(id);
            }
        }
        attached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, id: TrackId, conf: f32) -> Detection {
        Detection {
            x1,
            y1,
            x2,
            y2,
            track_id: id,
            confidence: conf,
            class_id: 0,
        }
    }

    fn solid_frame() -> RgbaImage {
        RgbaImage::from_pixel(640, 480, Rgba([10, 20, 30, 255]))
    }

    #[test]
    fn test_hit_test_matches_drawn_rect() {
        let compositor = Compositor::new(1280, 720);
        let frame = solid_frame();
        let boxes = vec![det(100., 100., 200., 200., 7, 0.9)];
        // 画布坐标: x = 100*1.5 + 160 = 310 .. 460, y = 150 .. 300
        let hit = |x, y| compositor.hit_test(Some(&frame), &boxes, x, y);
        assert_eq!(hit(320.0, 160.0), Some(7));
        assert_eq!(hit(459.5, 299.5), Some(7));
        assert_eq!(hit(305.0, 160.0), None);
        assert_eq!(hit(461.0, 160.0), None);
        assert_eq!(hit(320.0, 301.0), None);
    }

    #[test]
    fn test_hit_test_first_in_list_order() {
        let layout = Letterbox::fit(640., 480., 640., 480.).unwrap();
        let boxes = vec![det(0., 0., 100., 100., 1, 0.9), det(50., 50., 150., 150., 2, 0.9)];
        assert_eq!(hit_test(&layout, &boxes, 75.0, 75.0), Some(1));
        assert_eq!(hit_test(&layout, &boxes, 125.0, 125.0), Some(2));
        assert_eq!(hit_test(&layout, &[], 75.0, 75.0), None);
    }

    #[test]
    fn test_box_drawn_where_hit_test_resolves() {
        let mut compositor = Compositor::new(1280, 720);
        let mut manager = TrackManager::default();
        let boxes = vec![det(100., 100., 200., 200., 7, 0.9)];
        manager.apply_batch(&boxes, 0.0);
        let snap = manager.snapshot();
        let heatmap = Heatmap::default();
        let settings = DisplaySettings {
            box_color: "#ff0000".into(),
            box_thickness: 1.0,
            show_labels: false,
            ..Default::default()
        };
        let frame = solid_frame();

        let out = compositor
            .render(&Scene {
                frame: Some(&frame),
                tracks: &snap,
                boxes: &boxes,
                heatmap: &heatmap,
                mode: ViewMode::Rgb,
                settings: &settings,
            })
            .unwrap();

        let layout = compositor.layout(640., 480.).unwrap();
        let rect = box_rect(&layout, &boxes[0]);
        let (x, y) = (rect.x.round() as u32, rect.y.round() as u32);
        assert_eq!(*out.get_pixel(x, y), Rgba([255, 0, 0, 255]));
        assert_eq!(
            compositor.hit_test(Some(&frame), &boxes, x as f32 + 0.5, y as f32 + 0.5),
            Some(7)
        );
        // 信箱黑边
        assert_eq!(*out.get_pixel(10, 10), BACKGROUND);
    }

    #[test]
    fn test_view_mode_gates_overlays() {
        let mut compositor = Compositor::new(640, 480);
        let mut manager = TrackManager::default();
        let boxes = vec![det(100., 100., 200., 200., 7, 0.9)];
        manager.apply_batch(&boxes, 0.0);
        let snap = manager.snapshot();
        let mut heatmap = Heatmap::default();
        heatmap.on_detections(&boxes);
        let settings = DisplaySettings {
            box_color: "#ff0000".into(),
            ..Default::default()
        };
        let frame = solid_frame();

        let mut render = |mode| {
            compositor
                .render(&Scene {
                    frame: Some(&frame),
                    tracks: &snap,
                    boxes: &boxes,
                    heatmap: &heatmap,
                    mode,
                    settings: &settings,
                })
                .unwrap()
        };

        // thermal: 只有底图
        let thermal = render(ViewMode::Thermal);
        assert_eq!(*thermal.get_pixel(100, 100), Rgba([10, 20, 30, 255]));

        // event: 框中心 (150,150) 在格子 (4,6),被热力图着色
        let event = render(ViewMode::Event);
        assert_eq!(*event.get_pixel(100, 100), Rgba([10, 20, 30, 255]));
        let heated = event.get_pixel(4 * 32 + 16, 6 * 24 + 12);
        assert!(heated.0[0] > 10);

        let rgb = render(ViewMode::Rgb);
        assert_eq!(*rgb.get_pixel(100, 100), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_invalid_canvas_halts_compositor() {
        let mut compositor = Compositor::new(0, 480);
        let snap = TrackSnapshot::default();
        let heatmap = Heatmap::default();
        let settings = DisplaySettings::default();
        let scene = Scene {
            frame: None,
            tracks: &snap,
            boxes: &[],
            heatmap: &heatmap,
            mode: ViewMode::Fusion,
            settings: &settings,
        };
        assert!(matches!(compositor.render(&scene), Err(KernelError::RenderSurface(_))));
        assert!(compositor.is_halted());

        // 停止后不再尝试布局
        match compositor.render(&scene) {
            Err(KernelError::RenderSurface(msg)) => assert!(msg.contains("halted")),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_fallback_size_shared_by_draw_and_hit_test() {
        // 没有视频帧,检测器坐标 1280x960 缩放到 640x480 画布 (0.5)
        let mut compositor = Compositor::new(640, 480).with_detection_size(1280.0, 960.0);
        let mut manager = TrackManager::default();
        let boxes = vec![det(100., 100., 200., 200., 7, 0.9)];
        manager.apply_batch(&boxes, 0.0);
        let snap = manager.snapshot();
        let heatmap = Heatmap::default();
        let settings = DisplaySettings {
            box_color: "#ff0000".into(),
            box_thickness: 1.0,
            show_labels: false,
            show_trails: false,
            ..Default::default()
        };

        let out = compositor
            .render(&Scene {
                frame: None,
                tracks: &snap,
                boxes: &boxes,
                heatmap: &heatmap,
                mode: ViewMode::Rgb,
                settings: &settings,
            })
            .unwrap();

        // 框画在 (50,50)..(100,100)
        assert_eq!(*out.get_pixel(50, 75), Rgba([255, 0, 0, 255]));
        assert_eq!(*out.get_pixel(100, 150), BACKGROUND);
        assert_eq!(compositor.hit_test(None, &boxes, 75.0, 75.0), Some(7));
        assert_eq!(compositor.hit_test(None, &boxes, 150.0, 150.0), None);
    }

    #[test]
    fn test_huge_coordinates_are_clipped_to_canvas() {
        let mut compositor = Compositor::new(640, 480);
        let mut manager = TrackManager::default();
        let far = det(1e30, 200., 1e30, 220., 2, 0.9);
        manager.apply_batch(&[det(100., 200., 120., 220., 2, 0.9)], 0.0);
        manager.apply_batch(&[far], 0.1);
        let snap = manager.snapshot();
        let boxes = vec![det(-1e30, 0., 1e30, 10., 1, 0.9)];
        let heatmap = Heatmap::default();
        let settings = DisplaySettings {
            box_color: "#ff0000".into(),
            box_thickness: 2.0,
            show_labels: false,
            ..Default::default()
        };

        let out = compositor
            .render(&Scene {
                frame: None,
                tracks: &snap,
                boxes: &boxes,
                heatmap: &heatmap,
                mode: ViewMode::Fusion,
                settings: &settings,
            })
            .unwrap();

        // 左右两边在画布外,只剩上下两条横线 (两层: 0..=1 与 8..=9)
        assert_eq!(*out.get_pixel(320, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(*out.get_pixel(320, 9), Rgba([255, 0, 0, 255]));
        assert_eq!(*out.get_pixel(320, 5), BACKGROUND);
        assert_eq!(*out.get_pixel(0, 5), BACKGROUND);
        // 指向远处的轨迹线从起点一直画到画布右边
        assert!(out.get_pixel(300, 210).0[0] > 0);
        assert!(out.get_pixel(639, 210).0[0] > 0);
    }

    #[test]
    fn test_trails_fade_and_follow_view_mode() {
        let mut compositor = Compositor::new(640, 480);
        let mut manager = TrackManager::default();
        for (i, cx) in [100., 200., 300.].into_iter().enumerate() {
            manager.apply_batch(&[det(cx - 10., 290., cx + 10., 310., 3, 0.9)], i as f64 * 0.1);
        }
        let snap = manager.snapshot();
        let heatmap = Heatmap::default();
        let frame = RgbaImage::from_pixel(640, 480, BACKGROUND);

        let mut render = |mode, show_trails| {
            let settings = DisplaySettings {
                show_trails,
                ..Default::default()
            };
            compositor
                .render(&Scene {
                    frame: Some(&frame),
                    tracks: &snap,
                    boxes: &[],
                    heatmap: &heatmap,
                    mode,
                    settings: &settings,
                })
                .unwrap()
        };

        for mode in [ViewMode::Rgb, ViewMode::Fusion] {
            let out = render(mode, true);
            let older = out.get_pixel(150, 300).0[0];
            let newer = out.get_pixel(250, 300).0[0];
            assert!(older > 0);
            assert!(newer > older);
        }

        assert_eq!(*render(ViewMode::Rgb, false).get_pixel(150, 300), BACKGROUND);
        assert_eq!(*render(ViewMode::Thermal, true).get_pixel(150, 300), BACKGROUND);
        assert_eq!(*render(ViewMode::Event, true).get_pixel(250, 300), BACKGROUND);
    }

    #[test]
    fn test_font_file_errors() {
        let missing = std::env::temp_dir().join("eagleeye-missing-font.ttf");
        let _ = std::fs::remove_file(&missing);
        let result = Compositor::new(640, 480).with_font_file(missing.to_str().unwrap());
        assert!(matches!(result, Err(KernelError::Io(_))));

        let junk = std::env::temp_dir().join(format!("eagleeye-junk-{}.ttf", std::process::id()));
        std::fs::write(&junk, b"not a font").unwrap();
        let result = Compositor::new(640, 480).with_font_file(junk.to_str().unwrap());
        let _ = std::fs::remove_file(&junk);
        assert!(matches!(result, Err(KernelError::Font(_))));
    }

    #[test]
    fn test_labels_drawn_above_box() {
        const FONTS: [&str; 3] = [
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/TTF/DejaVuSans.ttf",
        ];
        // 没有系统字体时跳过
        let Some(path) = FONTS.iter().find(|p| std::path::Path::new(p).exists()) else {
            return;
        };
        let mut compositor = Compositor::new(640, 480).with_font_file(path).unwrap();
        let boxes = vec![det(100., 100., 300., 200., 4, 0.9)];
        let snap = TrackSnapshot::default();
        let heatmap = Heatmap::default();
        let frame = RgbaImage::from_pixel(640, 480, BACKGROUND);

        let mut render = |show_labels| {
            let settings = DisplaySettings {
                box_color: "#ff0000".into(),
                show_labels,
                ..Default::default()
            };
            compositor
                .render(&Scene {
                    frame: Some(&frame),
                    tracks: &snap,
                    boxes: &boxes,
                    heatmap: &heatmap,
                    mode: ViewMode::Rgb,
                    settings: &settings,
                })
                .unwrap()
        };

        // 标签区域: 框上方 LABEL_OFFSET + LABEL_FONT_SIZE
        let label_pixels = |img: &RgbaImage| {
            (100..220u32)
                .flat_map(|x| (70..95u32).map(move |y| (x, y)))
                .filter(|&(x, y)| img.get_pixel(x, y).0[0] > 0)
                .count()
        };
        assert!(label_pixels(&render(true)) > 0);
        assert_eq!(label_pixels(&render(false)), 0);
    }

    #[test]
    fn test_trail_alpha_increases() {
        let alphas: Vec<u8> = (1..5).map(|i| trail_alpha(i, 5)).collect();
        assert!(alphas.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(trail_alpha(4, 5), (0.64f32 * 255.0).round() as u8);
    }

    #[test]
    fn test_visible_boxes_threshold() {
        let boxes = vec![det(0., 0., 1., 1., 1, 0.3), det(0., 0., 1., 1., 2, 0.6)];
        let settings = DisplaySettings {
            confidence_threshold: 0.5,
            ..Default::default()
        };
        let visible = visible_boxes(&boxes, &settings);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].track_id, 2);
    }

    #[test]
    fn test_crop_thumbnail_clamps() {
        let frame = solid_frame();
        let thumb = crop_thumbnail(&frame, &det(600., 470., 700., 500., 1, 0.9)).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (40, 10));
        assert!(crop_thumbnail(&frame, &det(700., 0., 720., 10., 1, 0.9)).is_none());
    }

    #[test]
    fn test_thumbnail_capture_once_per_track() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let mut capture = ThumbnailCapture::new(Box::new(move |id: TrackId, img: &RgbaImage| {
            sink.lock().unwrap().push((id, img.width()));
        }));

        let mut manager = TrackManager::default();
        let frame = solid_frame();
        let boxes = vec![det(10., 10., 50., 30., 1, 0.9)];
        manager.apply_batch(&boxes, 0.0);

        assert_eq!(capture.capture(&frame, &boxes, &mut manager), vec![1]);
        assert!(capture.capture(&frame, &boxes, &mut manager).is_empty());
        assert_eq!(*calls.lock().unwrap(), vec![(1, 40)]);
        assert!(manager.snapshot().get(1).unwrap().thumbnail.is_some());
    }
}
