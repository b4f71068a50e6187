/// EagleEye 检测流回放
///
/// 读取逐行JSON检测消息 → 融合内核折叠 → 合成一帧 PNG
///
/// 直接运行: cargo run --bin eagleeye -- --input detections.jsonl --frame frame.jpg
use std::fs::File;
use std::io::{self, BufRead, BufReader};

use anyhow::{Context, Result};
use clap::Parser;
use image::RgbaImage;
use eagleeye_rs::detection::ingest::parse_message;
use eagleeye_rs::detection::TrackId;
use eagleeye_rs::geo::{BatteryStatus, GeoPoint, SensorReading};
use eagleeye_rs::pipeline::SensorEvent;
use eagleeye_rs::{
    gen_time_string, now_seconds, Args, Compositor, DisplaySettings, Kernel, KernelConfig,
    ViewMode,
};
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eagleeye_rs=info,eagleeye=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = KernelConfig::load(&args.config);
    let settings = DisplaySettings::load(&args.settings);
    let mode: ViewMode = args
        .mode
        .parse()
        .map_err(|e| anyhow::anyhow!("无效的视图模式: {}", e))?;

    let mut compositor = Compositor::new(args.width, args.height);
    if let Some(font) = &args.font {
        compositor = compositor
            .with_font_file(font)
            .with_context(|| format!("加载字体失败: {}", font))?;
    }

    let mut kernel = Kernel::new(config.clone(), settings, mode)
        .with_compositor(compositor)
        .with_thumbnail_callback(Box::new(|id: TrackId, thumb: &RgbaImage| {
            info!("🖼️  轨迹 {} 缩略图 {}x{}", id, thumb.width(), thumb.height());
        }));

    if let Some(path) = &args.frame {
        let frame = image::open(path)
            .with_context(|| format!("无法打开帧图片: {}", path))?
            .to_rgba8();
        info!("📷 背景帧 {} ({}x{})", path, frame.width(), frame.height());
        kernel.set_frame(frame);
    }

    match (args.lat, args.lng) {
        (Some(lat), Some(lng)) => {
            kernel.handle_sensor(SensorEvent::Location(SensorReading::Available(GeoPoint {
                lat,
                lng,
            })));
        }
        _ => kernel.handle_sensor(SensorEvent::Location(SensorReading::Unavailable(
            "no --lat/--lng given".into(),
        ))),
    }
    if let Some(heading) = args.heading {
        // 朝向 = 360 - alpha
        kernel.handle_sensor(SensorEvent::Orientation(Some(360.0 - heading)));
    }
    kernel.handle_sensor(SensorEvent::Battery(match args.battery {
        Some(level) => SensorReading::Available(BatteryStatus {
            charging: args.charging,
            level: level.clamp(0.0, 100.0),
            supported: true,
        }),
        None => SensorReading::Unavailable("no --battery given".into()),
    }));

    // ========== 回放 ==========
    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("无法打开输入: {}", path))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let decay_secs = config.decay_interval().as_secs_f64();
    let mut next_decay: Option<f64> = None;
    let mut malformed = 0usize;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.context("读取输入失败")?;
        if line.trim().is_empty() {
            continue;
        }

        let batch = match parse_message(&line, now_seconds()) {
            Ok(Some(batch)) => batch,
            Ok(None) => continue,
            Err(e) => {
                warn!("⚠️  第 {} 行: {}", lineno + 1, e);
                malformed += 1;
                continue;
            }
        };

        // 按消息时间推进衰减定时器
        let due = next_decay.get_or_insert(batch.timestamp + decay_secs);
        while batch.timestamp >= *due {
            kernel.on_decay_tick();
            *due += decay_secs;
        }

        kernel.apply_batch(batch);
    }

    let snapshot = kernel.snapshot();
    let stats = kernel.stats();
    info!(
        "✅ 回放完成: 批次 {}, 丢弃记录 {}, 无效消息 {}, 活跃轨迹 {}",
        stats.batches,
        stats.dropped_records,
        malformed,
        snapshot.len()
    );

    // ========== 输出 ==========
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| format!("eagleeye-{}.png", gen_time_string("")));
    let image = kernel.render_frame().context("合成渲染失败")?;
    image
        .save(&output)
        .with_context(|| format!("保存图片失败: {}", output))?;
    info!("💾 合成帧已保存到 {}", output);

    let projected = match kernel.projected_tracks() {
        Ok(p) => p,
        Err(e) => {
            warn!("⚠️  {}", e);
            Vec::new()
        }
    };

    let location = match kernel.location() {
        SensorReading::Available(p) => format!("{:.6}, {:.6}", p.lat, p.lng),
        SensorReading::Unavailable(reason) => format!("不可用 ({})", reason),
    };
    let heading = kernel
        .heading()
        .map(|h| format!("{:.0}°", h))
        .unwrap_or_else(|| "北 (默认)".to_string());
    let battery = match kernel.battery() {
        SensorReading::Available(b) => {
            format!("{:.0}%{}", b.level, if b.charging { " ⚡" } else { "" })
        }
        SensorReading::Unavailable(reason) => format!("不可用 ({})", reason),
    };
    println!("📍 {}  🧭 {}  🔋 {}", location, heading, battery);

    println!("{:<8} {:<12} {:>8} {:>6} {:>6}  位置", "ID", "类别", "存活(s)", "置信度", "轨迹点");
    for track in snapshot.newest_first() {
        let position = projected
            .iter()
            .find(|p| p.id == track.id)
            .map(|p| format!("{:.6}, {:.6}", p.position.lat, p.position.lng))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8} {:<12} {:>8.1} {:>6.2} {:>6}  {}",
            track.id,
            track.class_name,
            track.age,
            track.last_confidence,
            track.positions.len(),
            position
        );
    }

    let summary: Vec<String> = snapshot
        .class_summary()
        .into_iter()
        .map(|(name, count)| format!("{}: {}", name, count))
        .collect();
    println!("📊 {}", summary.join(", "));

    Ok(())
}
