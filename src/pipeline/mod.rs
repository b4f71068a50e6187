//! 融合内核事件循环 (Kernel event loop)
//!
//! 单线程,用 `crossbeam_channel::select!` 复用以下事件源:
//! - Stream:   检测消息流 (Opened / Message / Closed / Frame)
//! - Sensors:  定位 / 朝向 / 电池
//! - Decay:    热力图衰减定时器
//! - Render:   渲染节拍
//! - Shutdown: 整体停止
//!
//! 每个处理函数同步完成。批次先折叠进轨迹管理器,热力图和渲染器都读取折叠后的结果。

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{never, select, tick, Receiver, Sender};
use image::RgbaImage;
use tracing::{debug, error, info, warn};

use crate::config::KernelConfig;
use crate::detection::ingest::parse_message;
use crate::detection::tracker::{BatchOutcome, IdentityResolver, TrackManager, TrackSnapshot};
use crate::detection::types::{ConnectionStatus, Detection, DetectionBatch, TrackId};
use crate::error::{KernelError, Result};
use crate::geo::{
    heading_from_alpha, project_tracks, BatteryStatus, GeoPoint, ProjectedTrack, SensorReading,
};
use crate::heatmap::Heatmap;
use crate::renderer::{visible_boxes, Compositor, Scene, ThumbnailCallback, ThumbnailCapture};
use crate::ui_config::{DisplaySettings, ViewMode};

// ========== 事件类型定义 ==========

/// 检测流事件 (传输层 → 内核)
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Opened,
    /// 一条原始JSON检测消息
    Message(String),
    /// 最新视频帧
    Frame(RgbaImage),
    Closed,
    /// 传输错误,按关闭处理
    Error(String),
}

/// 传感器事件
#[derive(Clone, Debug)]
pub enum SensorEvent {
    Location(SensorReading<GeoPoint>),
    /// 设备方向事件的原始 alpha (度)
    Orientation(Option<f64>),
    Battery(SensorReading<BatteryStatus>),
}

/// 事件循环的输入通道
pub struct KernelInputs {
    pub stream: Receiver<StreamEvent>,
    pub sensors: Receiver<SensorEvent>,
    pub shutdown: Receiver<()>,
}

/// 一帧渲染读取的一致状态
#[derive(Clone, Debug)]
pub struct FrameState {
    pub tracks: Arc<TrackSnapshot>,
    /// 已按置信度阈值过滤
    pub boxes: Arc<Vec<Detection>>,
    pub heatmap: Heatmap,
}

/// 内核统计
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct KernelStats {
    pub messages: u64,
    pub batches: u64,
    pub malformed_messages: u64,
    pub dropped_records: u64,
    pub frames_rendered: u64,
}

// ========== 内核上下文 ==========

/// 内核上下文对象: 启动时创建,停止时整体返回
pub struct Kernel {
    config: KernelConfig,
    settings: DisplaySettings,
    mode: ViewMode,

    tracks: TrackManager,
    heatmap: Heatmap,
    /// None 表示渲染路径已停止
    compositor: Option<Compositor>,
    thumbnails: ThumbnailCapture,

    frame: Option<RgbaImage>,
    /// 最近一个批次的全部检测 (已校验)
    detections: Vec<Detection>,
    /// 阈值过滤后的检测框,渲染与命中测试共用
    boxes: Arc<Vec<Detection>>,
    /// (批次时间戳, 收到时刻),用于定时器推算流时间
    last_batch: Option<(f64, Instant)>,

    status: ConnectionStatus,
    location: SensorReading<GeoPoint>,
    heading: Option<f64>,
    battery: SensorReading<BatteryStatus>,

    status_sink: Option<Sender<ConnectionStatus>>,
    frame_sink: Option<Sender<RgbaImage>>,

    stats: KernelStats,
}

impl Kernel {
    pub fn new(config: KernelConfig, settings: DisplaySettings, mode: ViewMode) -> Self {
        let tracks = TrackManager::new(config.track_expiry_secs, config.history_capacity);
        let heatmap = Heatmap::new(config.heatmap);
        Self {
            config,
            settings,
            mode,
            tracks,
            heatmap,
            compositor: None,
            thumbnails: ThumbnailCapture::default(),
            frame: None,
            detections: Vec::new(),
            boxes: Arc::new(Vec::new()),
            last_batch: None,
            status: ConnectionStatus::Connecting,
            location: SensorReading::Unavailable("not yet reported".into()),
            heading: None,
            battery: SensorReading::Unavailable("not yet reported".into()),
            status_sink: None,
            frame_sink: None,
            stats: KernelStats::default(),
        }
    }

    /// 挂载合成器,没有视频帧时按热力图的检测器坐标空间布局
    pub fn with_compositor(mut self, compositor: Compositor) -> Self {
        let heatmap = &self.config.heatmap;
        self.compositor =
            Some(compositor.with_detection_size(heatmap.frame_width, heatmap.frame_height));
        self
    }

    pub fn with_resolver(mut self, resolver: Box<dyn IdentityResolver>) -> Self {
        self.tracks = TrackManager::new(self.config.track_expiry_secs, self.config.history_capacity)
            .with_resolver(resolver);
        self
    }

    /// 缩略图回调,每条轨迹最多触发一次
    pub fn with_thumbnail_callback(mut self, callback: ThumbnailCallback) -> Self {
        self.thumbnails = ThumbnailCapture::new(callback);
        self
    }

    /// 连接状态变化通知
    pub fn with_status_sink(mut self, sink: Sender<ConnectionStatus>) -> Self {
        self.status_sink = Some(sink);
        self
    }

    /// 渲染结果输出 (满时丢帧)
    pub fn with_frame_sink(mut self, sink: Sender<RgbaImage>) -> Self {
        self.frame_sink = Some(sink);
        self
    }

    // ========== 只读访问 ==========

    pub fn snapshot(&self) -> Arc<TrackSnapshot> {
        self.tracks.snapshot()
    }

    pub fn heatmap(&self) -> &Heatmap {
        &self.heatmap
    }

    pub fn boxes(&self) -> Arc<Vec<Detection>> {
        Arc::clone(&self.boxes)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn location(&self) -> &SensorReading<GeoPoint> {
        &self.location
    }

    pub fn heading(&self) -> Option<f64> {
        self.heading
    }

    pub fn battery(&self) -> &SensorReading<BatteryStatus> {
        &self.battery
    }

    pub fn stats(&self) -> KernelStats {
        self.stats
    }

    pub fn is_render_halted(&self) -> bool {
        self.compositor.as_ref().map_or(true, Compositor::is_halted)
    }

    /// 当前帧的一致状态 (轨迹快照 + 检测框 + 热力图副本)
    pub fn frame_state(&self) -> FrameState {
        FrameState {
            tracks: self.tracks.snapshot(),
            boxes: Arc::clone(&self.boxes),
            heatmap: self.heatmap.clone(),
        }
    }

    // ========== 外部可调整的状态 ==========

    pub fn set_settings(&mut self, settings: DisplaySettings) {
        self.settings = settings;
        self.boxes = Arc::new(visible_boxes(&self.detections, &self.settings));
    }

    pub fn set_frame(&mut self, frame: RgbaImage) {
        self.frame = Some(frame);
    }

    // ========== 事件处理 ==========

    pub fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Opened => self.set_status(ConnectionStatus::Open),
            StreamEvent::Message(text) => {
                if let Err(e) = self.handle_message(&text, crate::now_seconds()) {
                    debug!("消息已丢弃: {}", e);
                }
            }
            StreamEvent::Frame(frame) => self.set_frame(frame),
            StreamEvent::Closed => self.set_status(ConnectionStatus::Closed),
            StreamEvent::Error(reason) => {
                warn!("⚠️  检测流错误: {}", reason);
                self.set_status(ConnectionStatus::Closed);
            }
        }
    }

    /// 解析并折叠一条检测消息
    ///
    /// # 参数
    /// - `received_at`: 收到时间 (秒),消息缺少 ts 时使用
    ///
    /// # 返回
    /// 无 boxes 字段的消息返回 `Ok(None)`
    pub fn handle_message(&mut self, text: &str, received_at: f64) -> Result<Option<BatchOutcome>> {
        self.stats.messages += 1;
        match parse_message(text, received_at) {
            Ok(Some(batch)) => Ok(Some(self.apply_batch(batch))),
            Ok(None) => Ok(None),
            Err(e) => {
                self.stats.malformed_messages += 1;
                warn!("⚠️  检测消息解析失败: {}", e);
                Err(e)
            }
        }
    }

    /// 折叠一个已校验的批次
    ///
    /// 顺序: 轨迹管理器 → 热力图 → 缩略图 → 发布检测框
    pub fn apply_batch(&mut self, batch: DetectionBatch) -> BatchOutcome {
        let DetectionBatch {
            timestamp,
            detections,
            dropped,
        } = batch;

        // 1. 轨迹折叠 (发布新快照)
        let outcome = self.tracks.apply_batch(&detections, timestamp);

        // 2. 热力图读取同一批次
        self.heatmap.on_detections(&detections);

        // 3. 首次出现的轨迹截图
        if let Some(frame) = &self.frame {
            self.thumbnails.capture(frame, &detections, &mut self.tracks);
        }

        // 4. 渲染 / 命中测试使用的检测框
        self.boxes = Arc::new(visible_boxes(&detections, &self.settings));
        self.detections = detections;
        self.last_batch = Some((timestamp, Instant::now()));

        self.stats.batches += 1;
        self.stats.dropped_records += dropped as u64;

        if !outcome.created.is_empty() || !outcome.expired.is_empty() {
            debug!(
                "轨迹更新: 新增 {:?}, 删除 {:?}, 当前 {}",
                outcome.created,
                outcome.expired,
                self.tracks.track_count()
            );
        }
        outcome
    }

    /// 衰减定时器
    ///
    /// 同时按流时间清理过期轨迹,检测流停止时轨迹也会消失
    pub fn on_decay_tick(&mut self) {
        self.heatmap.on_tick();

        if let Some((ts, received)) = self.last_batch {
            let now = ts + received.elapsed().as_secs_f64();
            self.expire(now);
        }
    }

    /// 删除过期轨迹,同时移除它们残留的检测框
    pub fn expire(&mut self, now: f64) -> Vec<TrackId> {
        let expired = self.tracks.expire(now);
        if !expired.is_empty() {
            debug!("轨迹过期: {:?}", expired);
            self.detections.retain(|d| !expired.contains(&d.track_id));
            self.boxes = Arc::new(visible_boxes(&self.detections, &self.settings));
        }
        expired
    }

    pub fn handle_sensor(&mut self, event: SensorEvent) {
        match event {
            SensorEvent::Location(reading) => {
                if let SensorReading::Unavailable(reason) = &reading {
                    warn!("⚠️  定位不可用: {}", reason);
                }
                self.location = reading;
            }
            SensorEvent::Orientation(alpha) => {
                self.heading = heading_from_alpha(alpha);
            }
            SensorEvent::Battery(reading) => {
                if let SensorReading::Unavailable(reason) = &reading {
                    warn!("⚠️  电池状态不可用: {}", reason);
                }
                self.battery = reading;
            }
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if status == self.status {
            return;
        }
        info!("🔌 连接状态: {:?} → {:?}", self.status, status);
        self.status = status;
        if let Some(sink) = &self.status_sink {
            let _ = sink.try_send(status);
        }
    }

    // ========== 渲染与命中测试 ==========

    /// 合成当前帧
    ///
    /// 渲染表面错误只停止渲染路径,内核其余部分继续运行
    pub fn render_frame(&mut self) -> Result<RgbaImage> {
        let state = self.frame_state();
        let compositor = match self.compositor.as_mut() {
            Some(c) if !c.is_halted() => c,
            _ => return Err(KernelError::RenderSurface("render path halted".into())),
        };

        let scene = Scene {
            frame: self.frame.as_ref(),
            tracks: &state.tracks,
            boxes: &state.boxes,
            heatmap: &state.heatmap,
            mode: self.mode,
            settings: &self.settings,
        };

        match compositor.render(&scene) {
            Ok(image) => {
                self.stats.frames_rendered += 1;
                Ok(image)
            }
            Err(e) => {
                if !e.is_recoverable() {
                    error!("❌ 渲染路径已停止: {}", e);
                }
                Err(e)
            }
        }
    }

    /// 画布点击 → 轨迹ID
    pub fn hit_test(&self, click_x: f32, click_y: f32) -> Option<TrackId> {
        let compositor = self.compositor.as_ref()?;
        compositor.hit_test(self.frame.as_ref(), &self.boxes, click_x, click_y)
    }

    /// 当前帧中所有轨迹的地理位置
    pub fn projected_tracks(&self) -> Result<Vec<ProjectedTrack>> {
        project_tracks(
            &self.tracks.snapshot(),
            &self.boxes,
            &self.location,
            self.heading,
            &self.config.projection,
        )
    }

    // ========== 事件循环 ==========

    /// 运行直到收到停止信号 (或停止通道断开),返回最终状态
    ///
    /// 停止时所有事件源 (消息流, 衰减定时器, 渲染节拍) 一起释放
    pub fn run(mut self, inputs: KernelInputs) -> Kernel {
        info!("🚀 融合内核启动");
        self.config.print_summary();

        let decay = tick(self.config.decay_interval());
        let render = tick(self.config.render_interval());
        let idle_stream = never();
        let idle_sensors = never();
        let mut stream_attached = true;
        let mut sensors_attached = true;

        loop {
            let stream = if stream_attached { &inputs.stream } else { &idle_stream };
            let sensors = if sensors_attached { &inputs.sensors } else { &idle_sensors };

            select! {
                recv(stream) -> event => match event {
                    Ok(event) => self.handle_event(event),
                    Err(_) => {
                        // 传输层已分离
                        warn!("⚠️  {}", KernelError::StreamClosed);
                        stream_attached = false;
                        self.set_status(ConnectionStatus::Closed);
                    }
                },
                recv(sensors) -> event => match event {
                    Ok(event) => self.handle_sensor(event),
                    Err(_) => sensors_attached = false,
                },
                recv(decay) -> _ => self.on_decay_tick(),
                recv(render) -> _ => self.on_render_tick(),
                recv(inputs.shutdown) -> _ => break,
            }
        }

        let snapshot = self.tracks.snapshot();
        info!(
            "🛑 融合内核停止: 消息 {}, 批次 {}, 活跃轨迹 {}",
            self.stats.messages,
            self.stats.batches,
            snapshot.len()
        );
        self
    }

    fn on_render_tick(&mut self) {
        if self.is_render_halted() {
            return;
        }
        match self.render_frame() {
            Ok(image) => {
                if let Some(sink) = &self.frame_sink {
                    let _ = sink.try_send(image);
                }
            }
            Err(e) => debug!("渲染失败: {}", e),
        }
    }
}
