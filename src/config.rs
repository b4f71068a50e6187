//! 内核配置 - 通过JSON文件调整参数

use std::fs;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::tracker::{DEFAULT_EXPIRY_SECS, DEFAULT_HISTORY_CAPACITY};
use crate::geo::ProjectionParams;
use crate::heatmap::HeatmapParams;

/// 内核参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    // === 轨迹 ===
    pub track_expiry_secs: f64,    // 未出现多久后删除
    pub history_capacity: usize,   // 轨迹点上限

    // === 热力图 ===
    pub heatmap: HeatmapParams,
    pub heatmap_decay_interval_ms: u64, // 衰减周期

    // === 投影 ===
    pub projection: ProjectionParams,

    // === 渲染 ===
    pub render_interval_ms: u64, // 渲染节拍 (~60fps)
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            track_expiry_secs: DEFAULT_EXPIRY_SECS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            heatmap: HeatmapParams::default(),
            heatmap_decay_interval_ms: 1000,
            projection: ProjectionParams::default(),
            render_interval_ms: 16,
        }
    }
}

impl KernelConfig {
    /// 从JSON文件加载配置
    ///
    /// 文件不存在时写出默认配置,解析失败时使用默认值
    pub fn load(path: &str) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path);
                    config
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!("❌ 保存配置失败: {}", e);
                }
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &str) -> crate::error::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!("💾 配置已保存到 {}", path);
        Ok(())
    }

    pub fn decay_interval(&self) -> Duration {
        Duration::from_millis(self.heatmap_decay_interval_ms.max(1))
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms.max(1))
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!(
            "🎛️  轨迹过期: {:.1}s, 轨迹点上限: {}, 热力图: {}x{} 衰减 {:.2}/{}ms",
            self.track_expiry_secs,
            self.history_capacity,
            self.heatmap.grid_size,
            self.heatmap.grid_size,
            self.heatmap.decay_factor,
            self.heatmap_decay_interval_ms
        );
    }
}

/// 检测流回放参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "EagleEye - 检测流回放与合成渲染", long_about = None)]
pub struct Args {
    /// 检测消息文件 (每行一条JSON),缺省读取 stdin
    #[arg(short, long)]
    pub input: Option<String>,

    /// 背景帧图片,缺省使用 640x480 黑帧
    #[arg(short, long)]
    pub frame: Option<String>,

    /// 输出合成图片路径,缺省按时间生成
    #[arg(short, long)]
    pub output: Option<String>,

    /// 视图模式: fusion / rgb / thermal / event
    #[arg(long, default_value = "fusion")]
    pub mode: String,

    /// 画布宽度
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// 画布高度
    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// 内核配置文件
    #[arg(long, default_value = "eagleeye.json")]
    pub config: String,

    /// 显示设置文件
    #[arg(long, default_value = "settings.json")]
    pub settings: String,

    /// 标签字体 (TTF/OTF),缺省不绘制文字
    #[arg(long)]
    pub font: Option<String>,

    /// 观察者纬度
    #[arg(long, allow_hyphen_values = true)]
    pub lat: Option<f64>,

    /// 观察者经度
    #[arg(long, allow_hyphen_values = true)]
    pub lng: Option<f64>,

    /// 设备朝向 (度, 北=0 顺时针)
    #[arg(long)]
    pub heading: Option<f64>,

    /// 电池电量 (0-100),缺省视为不可用
    #[arg(long)]
    pub battery: Option<f64>,

    /// 是否在充电
    #[arg(long)]
    pub charging: bool,
}
