//! 显示设置 - 由外部设置面板读写,渲染器只读

use std::fmt;
use std::fs;
use std::str::FromStr;

use image::Rgba;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 默认框颜色 (翡翠绿)
pub const DEFAULT_BOX_COLOR: &str = "#34D399";

/// 视图模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Fusion,
    Rgb,
    Thermal,
    Event,
}

impl ViewMode {
    /// 是否绘制轨迹线和检测框
    pub fn shows_boxes(&self) -> bool {
        matches!(self, ViewMode::Fusion | ViewMode::Rgb)
    }

    /// 是否绘制热力图
    pub fn shows_heatmap(&self) -> bool {
        matches!(self, ViewMode::Event)
    }
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fusion" => Ok(ViewMode::Fusion),
            "rgb" => Ok(ViewMode::Rgb),
            "thermal" => Ok(ViewMode::Thermal),
            "event" => Ok(ViewMode::Event),
            other => Err(format!("unknown view mode `{}`", other)),
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViewMode::Fusion => "fusion",
            ViewMode::Rgb => "rgb",
            ViewMode::Thermal => "thermal",
            ViewMode::Event => "event",
        };
        f.write_str(name)
    }
}

/// 显示参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DisplaySettings {
    pub box_color: String,    // "#RRGGBB" / "#RGB"
    pub box_thickness: f32,   // 线宽 (像素, ≥0)
    pub confidence_threshold: f32, // 低于此置信度的框不进入渲染与命中测试
    pub show_labels: bool,
    pub show_trails: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            box_color: DEFAULT_BOX_COLOR.to_string(),
            box_thickness: 2.0,
            confidence_threshold: 0.0,
            show_labels: true,
            show_trails: true,
        }
    }
}

impl DisplaySettings {
    /// 从JSON文件加载,缺失的字段使用默认值
    pub fn load(path: &str) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(settings) => {
                    info!("✅ 显示设置已从 {} 加载", path);
                    settings
                }
                Err(e) => {
                    warn!("⚠️  显示设置解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// 解析后的框颜色,非法时回退到默认色
    pub fn box_rgba(&self) -> Rgba<u8> {
        parse_hex_color(&self.box_color)
            .or_else(|| parse_hex_color(DEFAULT_BOX_COLOR))
            .unwrap_or(Rgba([52, 211, 153, 255]))
    }

    /// 线宽 (负值按0处理)
    pub fn thickness(&self) -> u32 {
        self.box_thickness.max(0.0).round() as u32
    }

    pub fn passes_threshold(&self, confidence: f32) -> bool {
        confidence >= self.confidence_threshold
    }
}

/// 解析 "#RRGGBB" 或 "#RGB"
pub fn parse_hex_color(s: &str) -> Option<Rgba<u8>> {
    let hex = s.trim().strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        6 => {
            let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
            let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
            let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
            Some(Rgba([r, g, b, 255]))
        }
        3 => {
            let expand = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
            Some(Rgba([expand(0)?, expand(1)?, expand(2)?, 255]))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_mode_gates() {
        assert!(ViewMode::Fusion.shows_boxes());
        assert!(ViewMode::Rgb.shows_boxes());
        assert!(!ViewMode::Thermal.shows_boxes());
        assert!(!ViewMode::Event.shows_boxes());
        assert!(ViewMode::Event.shows_heatmap());
        assert_eq!("EVENT".parse::<ViewMode>().unwrap(), ViewMode::Event);
        assert!("infrared".parse::<ViewMode>().is_err());
    }

    #[test]
    fn test_partial_settings_json() {
        let settings: DisplaySettings =
            serde_json::from_str(r##"{"boxColor": "#ff0000", "showTrails": false}"##).unwrap();
        assert_eq!(settings.box_rgba(), Rgba([255, 0, 0, 255]));
        assert!(!settings.show_trails);
        assert!(settings.show_labels);
        assert_eq!(settings.box_thickness, 2.0);
    }

    #[test]
    fn test_hex_colors() {
        assert_eq!(parse_hex_color("#34D399"), Some(Rgba([52, 211, 153, 255])));
        assert_eq!(parse_hex_color("#fff"), Some(Rgba([255, 255, 255, 255])));
        assert_eq!(parse_hex_color("red"), None);
        assert_eq!(parse_hex_color("#12345"), None);

        let settings = DisplaySettings {
            box_color: "bogus".into(),
            ..Default::default()
        };
        assert_eq!(settings.box_rgba(), Rgba([52, 211, 153, 255]));
    }

    #[test]
    fn test_threshold_and_thickness() {
        let settings = DisplaySettings {
            confidence_threshold: 0.5,
            box_thickness: -3.0,
            ..Default::default()
        };
        assert!(settings.passes_threshold(0.5));
        assert!(!settings.passes_threshold(0.49));
        assert_eq!(settings.thickness(), 0);
    }
}
