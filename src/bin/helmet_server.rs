// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 安全帽检测 - WebSocket 推流服务 (Helmet Server)
///
/// 每个 `/ws` 连接独立采集, 推送
/// `{"frame": "<base64 JPEG>", "detections": [{"bbox", "conf", "label"}]}`.
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use helmet_guard::models::shared;
use helmet_guard::stream::{serve, StreamState};
use helmet_guard::{init_tracing, CommonArgs, Model, YOLOv8};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "安全帽检测 - WebSocket 推流服务", long_about = None)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// 监听地址
    #[arg(short, long, env = "HELMET_BIND")]
    bind: Option<String>,

    /// 目标帧间隔 (毫秒)
    #[arg(long, env = "HELMET_INTERVAL_MS")]
    interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    let mut settings = args.common.resolve().context("加载配置失败")?;
    if let Some(bind) = args.bind {
        settings.server.bind = bind;
    }
    if let Some(ms) = args.interval_ms {
        settings.server.pacing.target_interval_ms = ms;
    }

    info!("🚀 安全帽检测推流服务启动");
    let model = YOLOv8::new(settings.model.to_yolo_config())
        .with_context(|| format!("加载模型失败: {}", settings.model.path.display()))?;
    model.summary();

    let state = Arc::new(StreamState {
        model: shared(model),
        source: settings.source_spec(),
        overlay: settings.overlay_pipeline().context("加载字体失败")?,
        jpeg_quality: settings.server.jpeg_quality,
        pacing: settings.server.pacing,
    });
    info!(
        "⚙️ 阈值 {:.2}, 帧间隔 {} ms, 落后丢帧 {}",
        state.overlay.threshold(),
        state.pacing.target_interval_ms,
        state.pacing.drop_if_behind
    );

    serve(&settings.server.bind, state).await?;
    Ok(())
}
