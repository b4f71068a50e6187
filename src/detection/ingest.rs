//! 检测消息解析 (Detection Ingestion)
//!
//! 入站消息格式: `{"ts": 1712.5, "boxes": [[x1, y1, x2, y2, track_id, conf, class_id], ...]}`
//! - `ts` 可选 (秒),缺省时使用接收时刻
//! - 单条记录畸形只丢弃该条,不中断整个批次

use serde_json::Value;
use tracing::{debug, warn};

use super::types::{Detection, DetectionBatch, TrackId};
use crate::error::{KernelError, Result};

/// 每条记录的字段数
const RECORD_LEN: usize = 7;

/// 解析一条入站消息
///
/// # 返回
/// - `Ok(Some(batch))`: 检测批次
/// - `Ok(None)`: 不含 `boxes` 的控制消息 (例如初始 track_history),忽略
/// - `Err(MalformedMessage)`: 消息本身不是合法JSON对象
pub fn parse_message(text: &str, received_at: f64) -> Result<Option<DetectionBatch>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| KernelError::MalformedMessage(e.to_string()))?;

    let object = value
        .as_object()
        .ok_or_else(|| KernelError::MalformedMessage("message is not an object".into()))?;

    let boxes = match object.get("boxes") {
        Some(Value::Array(boxes)) => boxes,
        Some(_) => {
            return Err(KernelError::MalformedMessage(
                "`boxes` is not an array".into(),
            ))
        }
        None => return Ok(None),
    };

    let timestamp = object
        .get("ts")
        .and_then(Value::as_f64)
        .filter(|ts| ts.is_finite())
        .unwrap_or(received_at);

    Ok(Some(parse_boxes(boxes, timestamp)))
}

/// 解析 boxes 数组,畸形记录计数后跳过
pub fn parse_boxes(boxes: &[Value], timestamp: f64) -> DetectionBatch {
    let mut detections = Vec::with_capacity(boxes.len());
    let mut dropped = 0;

    for (index, raw) in boxes.iter().enumerate() {
        match parse_record(index, raw) {
            Ok(det) => detections.push(det),
            Err(e) => {
                debug!("丢弃检测记录: {}", e);
                dropped += 1;
            }
        }
    }

    if dropped > 0 {
        warn!("⚠️ 批次中 {}/{} 条记录畸形,已跳过", dropped, boxes.len());
    }

    DetectionBatch {
        timestamp,
        detections,
        dropped,
    }
}

/// 解析单条 `[x1, y1, x2, y2, track_id, conf, class_id]` 记录
pub fn parse_record(index: usize, raw: &Value) -> Result<Detection> {
    let malformed = |reason: &str| KernelError::MalformedRecord {
        index,
        reason: reason.to_string(),
    };

    let fields = raw.as_array().ok_or_else(|| malformed("record is not an array"))?;
    if fields.len() < RECORD_LEN {
        return Err(malformed(&format!(
            "expected {} fields, got {}",
            RECORD_LEN,
            fields.len()
        )));
    }

    // 转成 f32 后仍需有限 (1e300 这类值会溢出成 inf)
    let number = |i: usize, name: &str| -> Result<f32> {
        fields[i]
            .as_f64()
            .map(|v| v as f32)
            .filter(|v| v.is_finite())
            .ok_or_else(|| malformed(&format!("`{}` is not a finite number", name)))
    };
    let integer = |i: usize, name: &str| -> Result<i64> {
        if let Some(v) = fields[i].as_i64() {
            return Ok(v);
        }
        // 部分后端把整数序列化成 3.0
        match fields[i].as_f64() {
            Some(v) if v.is_finite() && v.fract() == 0.0 => Ok(v as i64),
            _ => Err(malformed(&format!("`{}` is not an integer", name))),
        }
    };

    let x1 = number(0, "x1")?;
    let y1 = number(1, "y1")?;
    let x2 = number(2, "x2")?;
    let y2 = number(3, "y2")?;
    let track_id: TrackId = integer(4, "track_id")?;
    let confidence = number(5, "confidence")?;
    let class_id = integer(6, "class_id")?;

    if x2 < x1 || y2 < y1 {
        return Err(malformed("inverted box corners"));
    }
    if !(0.0..=1.0).contains(&confidence) {
        return Err(malformed("confidence outside [0, 1]"));
    }

    Ok(Detection {
        x1,
        y1,
        x2,
        y2,
        track_id,
        confidence,
        class_id,
    })
}
