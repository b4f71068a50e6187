// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 内核参数与命令行
pub mod detection; // 检测流与轨迹管理
pub mod error; // 错误类型
pub mod geo; // 地理投影
pub mod heatmap; // 衰减热力图
pub mod pipeline; // 事件循环
pub mod renderer; // 合成渲染与命中测试
pub mod ui_config; // 显示设置
pub mod utils;

pub use crate::config::{Args, KernelConfig};
pub use crate::detection::{Detection, Track, TrackManager, TrackSnapshot};
pub use crate::error::{KernelError, Result};
pub use crate::geo::{project, GeoPoint, ProjectionParams};
pub use crate::heatmap::Heatmap;
pub use crate::pipeline::{Kernel, KernelInputs, SensorEvent, StreamEvent};
pub use crate::renderer::Compositor;
pub use crate::ui_config::{DisplaySettings, ViewMode};

/// 当前墙钟时间 (秒)
pub fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Local::now();
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S",
        delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}
