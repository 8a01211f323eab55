// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 数据集采集工具
///
/// 空格键保存当前帧到 `<out>/<label>/<label>_<unix_secs>.jpg`, Esc 退出.
use std::path::PathBuf;
use std::thread::JoinHandle;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use macroquad::prelude::*;
use tracing::{error, info};

use helmet_guard::dataset::{parse_capture_label, save_capture};
use helmet_guard::{init_tracing, CommonArgs, Frame, SourceSpec};

#[derive(Parser, Debug)]
#[command(author, version, about = "安全帽数据集采集", long_about = None)]
struct Args {
    /// 类别标签: helmet / no_helmet
    label: String,

    /// 输出根目录
    #[arg(short, long, default_value = "data")]
    out: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

fn window_conf() -> Conf {
    Conf {
        window_title: "Capture".to_string(),
        window_width: 1280,
        window_height: 720,
        ..Default::default()
    }
}

/// 采集线程: 原样转发帧, 主线程退出后结束
fn run_capture(source: SourceSpec, tx: Sender<Frame>) -> helmet_guard::Result<()> {
    let mut source = source.open()?;
    while let Some(frame) = source.next_frame()? {
        if tx.send(frame).is_err() {
            break;
        }
    }
    Ok(())
}

fn to_texture(frame: &Frame) -> Texture2D {
    let rgba = image::DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
    Texture2D::from_rgba8(frame.width() as u16, frame.height() as u16, rgba.as_raw())
}

/// 取最新一帧; 采集线程结束后返回 None
fn latest_frame(rx: &Receiver<Frame>) -> Option<Option<Frame>> {
    let mut latest = None;
    loop {
        match rx.try_recv() {
            Ok(frame) => latest = Some(frame),
            Err(TryRecvError::Empty) => return Some(latest),
            Err(TryRecvError::Disconnected) => return latest.map(Some),
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let label = parse_capture_label(&args.label)?;
    let settings = args.common.resolve().context("加载配置失败")?;

    let (tx, rx) = bounded::<Frame>(1);
    let source = settings.source_spec();
    let worker: JoinHandle<helmet_guard::Result<()>> = std::thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || run_capture(source, tx))
        .context("启动采集线程失败")?;

    println!("Press SPACE to capture, ESC to exit.");
    let mut current: Option<(Frame, Texture2D)> = None;
    let mut count = 0usize;

    loop {
        if is_key_pressed(KeyCode::Escape) {
            break;
        }

        match latest_frame(&rx) {
            Some(Some(frame)) => {
                let texture = to_texture(&frame);
                current = Some((frame, texture));
            }
            Some(None) => {}
            None => {
                info!("📹 输入结束");
                break;
            }
        }

        if is_key_pressed(KeyCode::Space) {
            if let Some((frame, _)) = &current {
                let path = save_capture(&args.out, &label, frame)?;
                println!("Saved {}", path.display());
                count += 1;
            }
        }

        clear_background(BLACK);
        if let Some((_, texture)) = &current {
            let scale = (screen_width() / texture.width()).min(screen_height() / texture.height());
            let (w, h) = (texture.width() * scale, texture.height() * scale);
            draw_texture_ex(
                texture,
                (screen_width() - w) / 2.0,
                (screen_height() - h) / 2.0,
                WHITE,
                DrawTextureParams {
                    dest_size: Some(vec2(w, h)),
                    ..Default::default()
                },
            );
        }
        let status = format!("{}: {} saved | SPACE capture | ESC exit", label, count);
        draw_text(&status, 10.0, screen_height() - 10.0, 24.0, YELLOW);

        next_frame().await;
    }

    drop(rx);
    match worker.join() {
        Ok(result) => result.context("采集线程出错")?,
        Err(_) => anyhow::bail!("采集线程异常退出"),
    }

    println!("Captured {} images for class: {}", count, label);
    Ok(())
}

#[macroquad::main(window_conf)]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        error!("❌ {:#}", e);
        std::process::exit(1);
    }
}
