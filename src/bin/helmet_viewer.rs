// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 安全帽检测 - 本地窗口 (Helmet Viewer)
///
/// 系统架构:
/// 1. 检测线程: 取帧 → 推理 → 叠加层过滤与绘制 → RGBA
/// 2. 主线程:   macroquad 显示 + egui 阈值滑块
///
/// 快捷键: Q / Esc 退出
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use egui_macroquad::egui;
use macroquad::prelude::*;
use tracing::{error, info, warn};

use helmet_guard::{init_tracing, CommonArgs, Model, OverlayPipeline, SourceSpec, YOLOv8};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "安全帽检测 - 本地实时窗口", long_about = None)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
}

/// 检测线程交给主线程的一帧
struct ViewFrame {
    rgba: Vec<u8>,
    width: u32,
    height: u32,
    compliant: bool,
    kept: usize,
    infer_ms: f32,
}

fn window_conf() -> Conf {
    Conf {
        window_title: "Helmet Detection".to_string(),
        window_width: 1280,
        window_height: 720,
        high_dpi: true,
        ..Default::default()
    }
}

/// 检测线程: 输入结束、出错或主线程退出时返回 (摄像头随之释放)
fn run_worker(
    mut model: YOLOv8,
    source: SourceSpec,
    mut overlay: OverlayPipeline,
    frame_tx: Sender<ViewFrame>,
    threshold_rx: Receiver<f32>,
) -> helmet_guard::Result<()> {
    let mut source = source.open()?;

    while let Some(mut frame) = source.next_frame()? {
        // 只取最新的阈值
        if let Some(t) = threshold_rx.try_iter().last() {
            overlay.set_threshold(t);
        }

        let t0 = Instant::now();
        let raw = match model.detect(&frame) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("⚠️ 推理失败, 跳过本帧: {}", e);
                continue;
            }
        };
        let infer_ms = t0.elapsed().as_secs_f32() * 1000.0;

        let compliant = overlay.is_compliant(&raw);
        let kept = overlay.filter(&raw).len();
        overlay.annotate(&mut frame, &raw);

        let (width, height) = frame.dimensions();
        let rgba = image::DynamicImage::ImageRgb8(frame).to_rgba8().into_raw();
        let view = ViewFrame {
            rgba,
            width,
            height,
            compliant,
            kept,
            infer_ms,
        };
        if frame_tx.send(view).is_err() {
            break;
        }
    }

    info!("📹 检测线程退出");
    Ok(())
}

struct Viewer {
    texture: Option<Texture2D>,
    compliant: bool,
    kept: usize,
    infer_ms: f32,
    threshold: f32,
    frame_rx: Receiver<ViewFrame>,
    threshold_tx: Sender<f32>,
}

impl Viewer {
    /// 取最新一帧更新纹理; 检测线程结束后返回 false
    fn update(&mut self) -> bool {
        let mut latest = None;
        loop {
            match self.frame_rx.try_recv() {
                Ok(frame) => latest = Some(frame),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if latest.is_none() {
                        return false;
                    }
                    break;
                }
            }
        }

        if let Some(frame) = latest {
            // 分辨率不变时只更新像素, 不重建纹理
            let rebuild = match &self.texture {
                Some(tex) => tex.width() != frame.width as f32 || tex.height() != frame.height as f32,
                None => true,
            };
            if rebuild {
                let texture = Texture2D::from_rgba8(frame.width as u16, frame.height as u16, &frame.rgba);
                texture.set_filter(FilterMode::Linear);
                self.texture = Some(texture);
            } else if let Some(tex) = &self.texture {
                tex.update(&Image {
                    bytes: frame.rgba,
                    width: frame.width as u16,
                    height: frame.height as u16,
                });
            }
            self.compliant = frame.compliant;
            self.kept = frame.kept;
            self.infer_ms = frame.infer_ms;
        }
        true
    }

    fn draw(&self) {
        clear_background(BLACK);

        if let Some(texture) = &self.texture {
            // 等比缩放居中
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

        if !self.compliant {
            let text = "WEAR HELMET";
            let size = 48.0;
            let dims = measure_text(text, None, size as u16, 1.0);
            let x = (screen_width() - dims.width) / 2.0;
            draw_rectangle(x - 12.0, 12.0, dims.width + 24.0, dims.height + 24.0, Color::new(0.0, 0.0, 0.0, 0.6));
            draw_text(text, x, 24.0 + dims.offset_y, size, RED);
        }

        let status = format!(
            "FPS {} | infer {:.1} ms | shown {}",
            get_fps(),
            self.infer_ms,
            self.kept
        );
        draw_text(&status, 10.0, screen_height() - 10.0, 20.0, WHITE);
    }

    fn draw_egui(&mut self) {
        // egui 默认字体没有中文, 面板文字用英文
        egui_macroquad::ui(|egui_ctx| {
            egui::Window::new("Controls")
                .default_pos(egui::pos2(10.0, 10.0))
                .resizable(false)
                .show(egui_ctx, |ui| {
                    if ui
                        .add(egui::Slider::new(&mut self.threshold, 0.0..=1.0).text("confidence"))
                        .changed()
                    {
                        // try_send: 检测线程忙时不阻塞 UI
                        let _ = self.threshold_tx.try_send(self.threshold);
                    }
                    let (text, color) = if self.compliant {
                        ("helmet OK", egui::Color32::GREEN)
                    } else {
                        ("no helmet", egui::Color32::RED)
                    };
                    ui.colored_label(color, text);
                    ui.label("Q / Esc to quit");
                });
        });
        egui_macroquad::draw();
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = args.common.resolve().context("加载配置失败")?;

    let model = YOLOv8::new(settings.model.to_yolo_config())
        .with_context(|| format!("加载模型失败: {}", settings.model.path.display()))?;
    model.summary();
    let overlay = settings.overlay_pipeline().context("加载字体失败")?;
    let threshold = overlay.threshold();
    let source = settings.source_spec();

    let (frame_tx, frame_rx) = bounded::<ViewFrame>(1);
    let (threshold_tx, threshold_rx) = bounded::<f32>(8);
    let worker: JoinHandle<helmet_guard::Result<()>> = std::thread::Builder::new()
        .name("detect".to_string())
        .spawn(move || run_worker(model, source, overlay, frame_tx, threshold_rx))
        .context("启动检测线程失败")?;

    let mut viewer = Viewer {
        texture: None,
        compliant: true,
        kept: 0,
        infer_ms: 0.0,
        threshold,
        frame_rx,
        threshold_tx,
    };

    info!("🚀 窗口已启动 (阈值 {:.2})", threshold);
    loop {
        if is_key_pressed(KeyCode::Q) || is_key_pressed(KeyCode::Escape) {
            break;
        }
        if !viewer.update() {
            info!("📹 输入结束");
            break;
        }
        viewer.draw();
        viewer.draw_egui();
        next_frame().await;
    }

    // 关闭通道让检测线程退出, 再等它释放摄像头
    drop(viewer);
    match worker.join() {
        Ok(result) => result.context("检测线程出错")?,
        Err(_) => anyhow::bail!("检测线程异常退出"),
    }
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
