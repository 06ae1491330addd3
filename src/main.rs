use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use dualcam_capture::readback::software::{SoftwareDevice, SoftwareFramebuffer};
use dualcam_capture::{
    CapturePipeline, FrameSink, PipelineConfig, RenderedFrameHandler, Size, WriterSink,
};
use image::RgbaImage;
use image::imageops::{self, FilterType};
use serde_json::{Map, Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Drive the dual-camera capture pipeline from a synthetic render loop:
/// - two animated "camera" bands, or a still image, rendered every tick
/// - double-buffered readback, NV21 conversion and a drop-oldest queue
/// - frames written back to back to a raw `.nv21` file, or discarded
#[derive(Parser, Debug)]
#[command(name = "dualcam")]
#[command(about = "Run the capture-and-convert pipeline against a synthetic surface")]
#[command(long_about = "Run the capture-and-convert pipeline against a synthetic two-camera surface.
Prints a JSON summary of the pipeline counters when the run ends.")]
struct Args {
    /// Frames per second
    #[arg(short = 'f', long, default_value_t = 30, help = "Render ticks per second (1-120)")]
    fps: u32,

    /// Run duration (supports seconds, minutes, hours)
    #[arg(short, long, default_value = "10s",
          help = "How long to run: 30s (30 seconds), 2m (2 minutes), 1h (1 hour)")]
    duration: String,

    /// Raw NV21 output file
    #[arg(short, long, help = "Write NV21 frames back to back to this file instead of discarding them")]
    output: Option<PathBuf>,

    /// Initial surface size
    #[arg(short, long, default_value = "1280x720", value_parser = parse_size)]
    size: Size,

    /// Resolution bound the buffer pools are sized for
    #[arg(long, default_value = "1920x1080", value_parser = parse_size)]
    max_size: Size,

    /// Frame queue depth
    #[arg(long, default_value_t = 5)]
    queue: usize,

    /// Buffers per pool
    #[arg(long, default_value_t = 3)]
    pool: usize,

    /// Flip rows before conversion (bottom-up readbacks)
    #[arg(long)]
    flip: bool,

    /// Render this image instead of the animated bands
    #[arg(long)]
    image: Option<PathBuf>,

    /// Resize the surface once during the run
    #[arg(long, num_args = 2, value_names = ["SECONDS", "WxH"])]
    resize_at: Option<Vec<String>>,
}

/// What the render loop draws every tick.
enum Scene {
    Bands,
    Image {
        source: RgbaImage,
        scaled: Option<RgbaImage>,
    },
}

impl Scene {
    fn render(&mut self, framebuffer: &SoftwareFramebuffer, tick: u64) {
        match self {
            Scene::Bands => framebuffer.draw(|pixels, size| draw_bands(pixels, size, tick)),
            Scene::Image { source, scaled } => {
                let size = framebuffer.size();
                let fits = scaled
                    .as_ref()
                    .is_some_and(|img| img.dimensions() == (size.w, size.h));
                if !fits {
                    *scaled = Some(imageops::resize(&*source, size.w, size.h, FilterType::Triangle));
                }
                if let Some(img) = scaled.as_ref() {
                    framebuffer.write(img.as_raw());
                }
            }
        }
    }
}

/// Two stacked "camera" feeds, each a moving gradient.
fn draw_bands(pixels: &mut [u8], size: Size, tick: u64) {
    let w = size.w.max(1) as u64;
    let h = size.h.max(1) as u64;
    let split = h / 2;
    for (i, px) in pixels.chunks_exact_mut(4).enumerate() {
        let x = i as u64 % w;
        let y = i as u64 / w;
        let rgba = if y < split {
            [
                ((x * 255 / w + tick * 4) % 256) as u8,
                (y * 255 / split.max(1)) as u8,
                160,
                255,
            ]
        } else {
            [
                48,
                ((x * 255 / w + 256 - (tick * 2) % 256) % 256) as u8,
                (((y - split) * 255 / (h - split).max(1) + tick * 3) % 256) as u8,
                255,
            ]
        };
        px.copy_from_slice(&rgba);
    }
}

/// Where converted frames go.
enum CliSink {
    File(WriterSink<BufWriter<File>>),
    Discard,
}

impl FrameSink for CliSink {
    fn send_frame(&mut self, nv21: &[u8], width: u32, height: u32, pts_ns: u64) -> Result<()> {
        match self {
            CliSink::File(sink) => sink.send_frame(nv21, width, height, pts_ns),
            CliSink::Discard => Ok(()),
        }
    }
}

impl Drop for CliSink {
    fn drop(&mut self) {
        if let CliSink::File(sink) = self {
            if let Err(e) = sink.flush() {
                warn!(error = %e, "failed to flush output file");
            }
        }
    }
}

struct RunPlan {
    config: PipelineConfig,
    duration: Duration,
    scene: Scene,
    sink: CliSink,
    resize_at: Option<(Duration, Size)>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dualcam_capture=info,dualcam=info")),
        )
        .init();

    let args = Args::parse();

    let duration = parse_duration(&args.duration)?;
    let resize_at = args.resize_at.as_deref().map(parse_resize).transpose()?;

    let config = PipelineConfig {
        max_size: args.max_size,
        initial_size: args.size,
        pool_capacity: args.pool,
        queue_capacity: args.queue,
        flip_vertical: args.flip,
        target_fps: args.fps,
        ..PipelineConfig::default()
    };
    config.validate()?;

    let scene = match &args.image {
        Some(path) => Scene::Image {
            source: load_image(path)?,
            scaled: None,
        },
        None => Scene::Bands,
    };
    let sink = match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            CliSink::File(WriterSink::new(BufWriter::new(file)))
        }
        None => CliSink::Discard,
    };

    let output = args.output.as_ref().map(|p| p.display().to_string());
    let plan = RunPlan {
        config,
        duration,
        scene,
        sink,
        resize_at,
    };
    let mut summary = tokio::task::spawn_blocking(move || run(plan)).await??;
    summary.insert("output".to_string(), json!(output));

    println!("{}", serde_json::to_string_pretty(&Value::Object(summary))?);
    Ok(())
}

/// Render loop; owns the pipeline for the whole run on one thread.
fn run(plan: RunPlan) -> Result<Map<String, Value>> {
    let RunPlan {
        config,
        duration,
        mut scene,
        sink,
        resize_at,
    } = plan;

    let mut size = config.initial_size;
    let interval = config.frame_interval();
    let framebuffer = SoftwareFramebuffer::new(size);
    let mut pipeline = CapturePipeline::builder()
        .with_config(config)
        .with_device(SoftwareDevice::new(framebuffer.clone()))
        .with_sink(sink)
        .build()?;

    info!(%size, ?duration, ?interval, "render loop started");
    let start = Instant::now();
    let mut next_tick = start;
    let mut tick = 0u64;
    let mut pending_resize = resize_at;

    while start.elapsed() < duration {
        if let Some((at, new_size)) = pending_resize {
            if start.elapsed() >= at {
                framebuffer.resize(new_size);
                pipeline.on_surface_resized(new_size);
                size = new_size;
                pending_resize = None;
            }
        }

        scene.render(&framebuffer, tick);
        pipeline.on_frame_rendered(size);
        tick += 1;

        next_tick += interval;
        if let Some(wait) = next_tick.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }
    pipeline.shutdown();

    let elapsed = start.elapsed();
    let stats = pipeline.stats();
    let mut summary = Map::new();
    summary.insert("elapsed_s".to_string(), json!(elapsed.as_secs_f64()));
    summary.insert("final_size".to_string(), json!(size.to_string()));
    summary.insert(
        "effective_fps".to_string(),
        json!(stats.sent as f64 / elapsed.as_secs_f64().max(f64::EPSILON)),
    );
    let counters: Map<String, Value> = stats
        .fields()
        .into_iter()
        .map(|(name, value)| (name.to_string(), json!(value)))
        .collect();
    summary.insert("stats".to_string(), Value::Object(counters));
    Ok(summary)
}

fn load_image(path: &Path) -> Result<RgbaImage> {
    let img = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(img.to_rgba8())
}

/// Parse duration string like "30s", "2m", "1h"
fn parse_duration(duration: &str) -> Result<Duration> {
    if let Ok(seconds) = duration.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let Some(unit) = duration.chars().last() else {
        return Err(anyhow!("Invalid duration format: {}", duration));
    };
    let num_str = &duration[..duration.len() - unit.len_utf8()];
    if num_str.is_empty() {
        return Err(anyhow!("Invalid duration format: {}", duration));
    }
    let num: u64 = num_str
        .parse()
        .map_err(|_| anyhow!("Invalid number in duration: {}", num_str))?;

    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        _ => {
            return Err(anyhow!(
                "Invalid duration unit: {}. Use 's' for seconds, 'm' for minutes, 'h' for hours",
                unit
            ));
        }
    };
    let seconds = num
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow!("Duration too long: {}", duration))?;
    Ok(Duration::from_secs(seconds))
}

/// Parse "WxH" into a size
fn parse_size(value: &str) -> Result<Size> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("Invalid size: {}. Use WIDTHxHEIGHT, e.g. 1280x720", value))?;
    let w: u32 = w.trim().parse().map_err(|_| anyhow!("Invalid width: {}", w))?;
    let h: u32 = h.trim().parse().map_err(|_| anyhow!("Invalid height: {}", h))?;
    if w == 0 || h == 0 {
        return Err(anyhow!("Size must be non-zero: {}", value));
    }
    Ok(Size::new(w, h))
}

/// Parse the `--resize-at SECONDS WxH` pair
fn parse_resize(values: &[String]) -> Result<(Duration, Size)> {
    let [at, size] = values else {
        return Err(anyhow!("--resize-at takes SECONDS and WxH"));
    };
    let at: f64 = at
        .parse()
        .map_err(|_| anyhow!("Invalid resize time: {}", at))?;
    let at = Duration::try_from_secs_f64(at).map_err(|_| anyhow!("Invalid resize time: {}", at))?;
    Ok((at, parse_size(size)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5é").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_overflow() {
        assert!(parse_duration("99999999999999999h").is_err());
        assert!(parse_duration("999999999999999999m").is_err());
        assert_eq!(
            parse_duration(&format!("{}s", u64::MAX)).unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1280x720").unwrap(), Size::new(1280, 720));
        assert_eq!(parse_size("640X480").unwrap(), Size::new(640, 480));
        assert!(parse_size("1280").is_err());
        assert!(parse_size("0x720").is_err());
    }

    #[test]
    fn test_parse_resize() {
        let values = vec!["1.5".to_string(), "640x360".to_string()];
        let (at, size) = parse_resize(&values).unwrap();
        assert_eq!(at, Duration::from_millis(1500));
        assert_eq!(size, Size::new(640, 360));
        assert!(parse_resize(&["-1".to_string(), "640x360".to_string()]).is_err());
    }

    #[test]
    fn test_bands_fill_every_pixel_opaque() {
        let size = Size::new(8, 6);
        let mut pixels = vec![0u8; size.rgba_len()];
        draw_bands(&mut pixels, size, 3);
        assert!(pixels.chunks_exact(4).all(|px| px[3] == 255));
        assert_ne!(&pixels[..4], &pixels[pixels.len() - 4..]);
    }
}
