/// 检测系统 (Detection System)
///
/// 上游感知后端的检测流 → 轨迹
/// - Types:   检测框, 类别表, 连接状态
/// - Ingest:  消息解析与逐条校验
/// - Tracker: 轨迹生命周期管理
pub mod ingest;
pub mod tracker;
pub mod types;

pub use ingest::parse_message;
pub use tracker::{
    BatchOutcome, IdentityResolver, Track, TrackManager, TrackPoint, TrackSnapshot,
    UpstreamIdentity,
};
pub use types::{class_name, ConnectionStatus, Detection, DetectionBatch, TrackId};
