/// 跟踪仿真 (Tracker Simulation)
///
/// 用合成检测器驱动调度器,事件以 JSON 行输出:
/// 1. 检测: 合成目标匀速移动 + 抖动,可配置延迟/闪烁/失败率
/// 2. 调度: FrameScheduler (跟踪 + 自适应节流)
/// 3. 输出线程: 接收事件 → stdout
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use facetrack_rs::detection::{BlankSource, Detections, Dimensions, Frame, RawDetection};
use facetrack_rs::pipeline::PipelineEvent;
use facetrack_rs::{BBox, Detector, Error, FrameScheduler, PipelineConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 仿真参数
#[derive(Parser, Debug)]
#[command(author, version, about = "人脸/眼部跟踪调度仿真", long_about = None)]
struct Args {
    /// 配置文件 (JSON); 不存在时写入默认配置
    #[arg(short, long)]
    config: Option<String>,

    /// 预设: face 或 eye
    #[arg(short, long, default_value = "face")]
    preset: String,

    /// 运行时长 (秒)
    #[arg(short, long, default_value_t = 10)]
    duration: u64,

    /// 合成目标数量
    #[arg(short, long, default_value_t = 2)]
    entities: usize,

    /// 平均检测延迟 (ms)
    #[arg(long, default_value_t = 40)]
    latency: u64,

    /// 延迟抖动 (ms)
    #[arg(long, default_value_t = 20)]
    jitter: u64,

    /// 单目标每帧漏检概率
    #[arg(long, default_value_t = 0.05)]
    flicker: f64,

    /// 每帧检测失败概率
    #[arg(long, default_value_t = 0.02)]
    failure: f64,

    /// 随机种子
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// 只输出统计,不输出事件
    #[arg(short, long, default_value_t = false)]
    quiet: bool,
}

/// 合成目标
struct Target {
    bbox: BBox,
    vx: f32,
    vy: f32,
}

/// 合成检测器
struct SyntheticDetector {
    targets: Mutex<Vec<Target>>,
    rng: Mutex<StdRng>,
    latency: u64,
    jitter: u64,
    flicker: f64,
    failure: f64,
}

impl SyntheticDetector {
    fn new(args: &Args) -> Self {
        let mut rng = StdRng::seed_from_u64(args.seed);
        let targets = (0..args.entities)
            .map(|i| Target {
                bbox: BBox::new(80.0 + 160.0 * i as f32, 120.0, 96.0, 96.0),
                vx: rng.gen_range(-1.5..1.5),
                vy: rng.gen_range(-1.0..1.0),
            })
            .collect();

        Self {
            targets: Mutex::new(targets),
            rng: Mutex::new(rng),
            latency: args.latency,
            jitter: args.jitter,
            flicker: args.flicker,
            failure: args.failure,
        }
    }
}

#[async_trait]
impl Detector for SyntheticDetector {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn detect(&self, frame: &Frame, _config: &PipelineConfig) -> facetrack_rs::Result<Detections> {
        // 随机数在 await 之前取完
        let (delay, fail, entities) = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            let mut targets = self.targets.lock().unwrap_or_else(PoisonError::into_inner);

            let offset = if self.jitter > 0 {
                rng.gen_range(0..=self.jitter * 2)
            } else {
                0
            };
            let delay = (self.latency + offset).saturating_sub(self.jitter);
            let fail = rng.gen_bool(self.failure.clamp(0.0, 1.0));

            let mut entities = Vec::new();
            for t in targets.iter_mut() {
                t.bbox = t.bbox.translate(t.vx, t.vy);
                // 碰到边界反弹
                if t.bbox.x < 0.0 || t.bbox.x2() > frame.width as f32 {
                    t.vx = -t.vx;
                }
                if t.bbox.y < 0.0 || t.bbox.y2() > frame.height as f32 {
                    t.vy = -t.vy;
                }
                if rng.gen_bool(self.flicker.clamp(0.0, 1.0)) {
                    continue;
                }
                let noisy = t
                    .bbox
                    .translate(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
                entities.push(RawDetection::new(noisy, rng.gen_range(0.6..0.99)));
            }
            (delay, fail, entities)
        };

        tokio::time::sleep(Duration::from_millis(delay)).await;

        if fail {
            return Err(Error::Detector("synthetic failure".to_string()));
        }
        Ok(Detections {
            entities,
            dimensions: Dimensions {
                width: frame.width,
                height: frame.height,
            },
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "facetrack_rs=info,tracker_sim=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::load_or_default(path)?,
        None if args.preset.eq_ignore_ascii_case("eye") => PipelineConfig::eye(),
        None => PipelineConfig::face(),
    };
    config.log_summary();

    // ========== 输出线程 ==========
    let (tx, rx) = crossbeam_channel::unbounded::<PipelineEvent>();
    let quiet = args.quiet;
    let printer = std::thread::spawn(move || {
        for event in rx {
            if quiet {
                continue;
            }
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "事件序列化失败"),
            }
        }
    });

    // ========== 调度器 ==========
    let detector = Arc::new(SyntheticDetector::new(&args));
    let scheduler = FrameScheduler::new(config, detector, Arc::new(tx))?;
    scheduler.start(Box::new(BlankSource::new(1280, 720))).await?;

    tokio::time::sleep(Duration::from_secs(args.duration)).await;

    scheduler.stop();
    let stats = scheduler.stats();
    let state = scheduler.state();
    // 释放发送端,输出线程随之退出
    drop(scheduler);
    if !matches!(tokio::task::spawn_blocking(move || printer.join()).await, Ok(Ok(()))) {
        tracing::warn!("输出线程异常退出");
    }

    tracing::info!(
        processed = stats.frames_processed,
        skipped = stats.frames_skipped,
        failures = stats.detector_failures,
        created = stats.entities_created,
        lost = stats.entities_lost,
        fps = %format!("{:.1}", stats.processing_fps),
        interval_ms = state.current_interval_ms,
        skip = state.frame_skip_target,
        "✅ 仿真结束"
    );
    eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
