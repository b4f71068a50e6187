//! 内核错误类型 (Kernel error taxonomy)

use thiserror::Error;

pub type Result<T, E = KernelError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum KernelError {
    /// 单条检测记录字段缺失或非数值,只丢弃该条记录
    #[error("malformed detection record #{index}: {reason}")]
    MalformedRecord { index: usize, reason: String },

    /// 整条消息无法解析 (非JSON / 缺少boxes数组),丢弃该批次
    #[error("malformed detection message: {0}")]
    MalformedMessage(String),

    /// 传感器不可用 (定位 / 朝向 / 电池)
    #[error("sensor unavailable: {0}")]
    SensorUnavailable(&'static str),

    #[error("detection stream closed")]
    StreamClosed,

    /// 渲染表面错误,只终止渲染路径
    #[error("render surface error: {0}")]
    RenderSurface(String),

    #[error("font error: {0}")]
    Font(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl KernelError {
    /// 是否可在本地恢复 (只有渲染表面错误会向上报告)
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, KernelError::RenderSurface(_))
    }
}
