// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! WebSocket 推流服务
//!
//! 每个连接:
//! 1. 打开自己的输入源 (连接断开时释放)
//! 2. 阻塞线程里循环: 取帧 → 推理 → 过滤 → JPEG/base64 → JSON
//! 3. 通过 watch 通道交给异步发送端; 发送端忙时新帧覆盖还没发出去的旧帧
//!
//! 客户端可用 `/ws?threshold=0.6` 或发送文本 `{"threshold": 0.6}` 调整本连接的阈值.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::encode::build_payload;
use super::pacing::{Pacer, PacingPolicy};
use crate::detection::OverlayPipeline;
use crate::input::SourceSpec;
use crate::models::SharedModel;
use crate::{Error, Result};

/// 所有连接共享的服务状态
pub struct StreamState {
    pub model: SharedModel,
    pub source: SourceSpec,
    pub overlay: OverlayPipeline,
    pub jpeg_quality: u8,
    pub pacing: PacingPolicy,
}

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub threshold: Option<f32>,
}

/// 客户端控制消息
#[derive(Debug, Deserialize)]
struct ControlMessage {
    threshold: Option<f32>,
}

/// 解析客户端发来的阈值调整; 非法值忽略
pub fn parse_control(text: &str) -> Option<f32> {
    let msg: ControlMessage = serde_json::from_str(text).ok()?;
    msg.threshold.filter(|t| (0.0..=1.0).contains(t))
}

/// 单个连接的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    pub sent: u64,    // 交给发送端的帧 (含后来被覆盖的)
    pub dropped: u64, // 还没发出去就被新帧覆盖的帧
    pub skipped_ticks: u64,
}

type Slot = Option<(u64, String)>;

/// 采集端: 只保留最新一帧
pub struct LatestFrame {
    tx: watch::Sender<Slot>,
    delivered: Arc<AtomicU64>,
    published: u64,
}

/// 发送端
pub struct LatestFrameRx {
    rx: watch::Receiver<Slot>,
    delivered: Arc<AtomicU64>,
}

pub fn latest_frame_channel() -> (LatestFrame, LatestFrameRx) {
    let (tx, rx) = watch::channel(None);
    let delivered = Arc::new(AtomicU64::new(0));
    (
        LatestFrame {
            tx,
            delivered: delivered.clone(),
            published: 0,
        },
        LatestFrameRx { rx, delivered },
    )
}

impl LatestFrame {
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// 放入新帧; 上一帧还没被取走时返回 true (它被覆盖了)
    pub fn publish(&mut self, json: String) -> bool {
        let replaced = self.published > self.delivered.load(Ordering::Acquire);
        self.published += 1;
        self.tx.send_replace(Some((self.published, json)));
        replaced
    }
}

impl LatestFrameRx {
    /// 等待下一帧; 采集端结束且最新帧已取走后返回 None
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.changed().await.ok()?;
        let (seq, json) = self.rx.borrow_and_update().clone()?;
        self.delivered.store(seq, Ordering::Release);
        Some(json)
    }

    /// 当前最新一帧, 不标记为已取走
    pub fn latest(&self) -> Option<String> {
        self.rx.borrow().as_ref().map(|(_, json)| json.clone())
    }
}

pub fn router(state: Arc<StreamState>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

/// 启动服务, Ctrl+C 优雅退出
pub async fn serve(bind: &str, state: Arc<StreamState>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("🚀 推流服务已启动: ws://{}/ws", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 推流服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("❌ 监听 Ctrl+C 失败: {}", e);
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<StreamState>>,
) -> Response {
    let threshold = query
        .threshold
        .filter(|t| (0.0..=1.0).contains(t))
        .unwrap_or_else(|| state.overlay.threshold());
    ws.on_upgrade(move |socket| handle_socket(socket, state, threshold))
}

async fn handle_socket(socket: WebSocket, state: Arc<StreamState>, threshold: f32) {
    info!("🔗 客户端已连接 (阈值 {:.2})", threshold);

    let threshold = Arc::new(AtomicU32::new(threshold.to_bits()));
    let (tx, mut rx) = latest_frame_channel();
    let (mut sender, mut receiver) = socket.split();

    let worker_state = state.clone();
    let worker_threshold = threshold.clone();
    let worker = tokio::task::spawn_blocking(move || stream_frames(&worker_state, &worker_threshold, tx));

    let mut send_task = tokio::spawn(async move {
        while let Some(json) = rx.recv().await {
            if let Err(e) = sender.send(Message::Text(json)).await {
                debug!("发送失败, 连接关闭: {}", e);
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match parse_control(&text) {
                    Some(t) => {
                        threshold.store(t.to_bits(), Ordering::Relaxed);
                        info!("🎚️ 客户端调整阈值: {:.2}", t);
                    }
                    None => warn!("⚠️ 忽略无法识别的消息: {}", text),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("接收失败: {}", e);
                    break;
                }
            }
        }
    });

    // 任一方向结束就整体结束; 发送端被丢弃后采集线程随之退出并释放摄像头
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    match worker.await {
        Ok(Ok(stats)) => info!(
            "🔌 客户端断开: 发送 {} 帧, 丢弃 {} 帧, 跳过节拍 {}",
            stats.sent, stats.dropped, stats.skipped_ticks
        ),
        Ok(Err(e)) => error!("❌ 推流中止: {}", e),
        Err(e) => error!("❌ 采集线程异常: {}", e),
    }
}

/// 阻塞采集循环, 直到输入结束或接收端关闭
pub fn stream_frames(state: &StreamState, threshold: &AtomicU32, mut tx: LatestFrame) -> Result<StreamStats> {
    let mut source = state.source.open()?;
    let mut pacer = Pacer::new(state.pacing);
    let mut overlay = state.overlay.clone();
    let mut stats = StreamStats::default();

    loop {
        pacer.wait();
        if tx.is_closed() {
            break;
        }

        let Some(frame) = source.next_frame()? else {
            info!("📹 输入流结束");
            break;
        };

        let raw = {
            let mut model = state
                .model
                .lock()
                .map_err(|_| Error::Model("模型锁已损坏".to_string()))?;
            match model.detect(&frame) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("⚠️ 推理失败, 跳过本帧: {}", e);
                    continue;
                }
            }
        };

        // 与本地显示相同的过滤规则
        overlay.set_threshold(f32::from_bits(threshold.load(Ordering::Relaxed)));
        let json = build_payload(&frame, overlay.report(&raw), state.jpeg_quality)?;

        if tx.publish(json) {
            stats.dropped += 1;
        }
        stats.sent += 1;
    }

    stats.skipped_ticks = pacer.skipped();
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BBox, Detection, Frame};
    use crate::models::{shared, Model};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use image::Rgb;

    struct FixedModel(Vec<Detection>);

    impl Model for FixedModel {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            Ok(self.0.clone())
        }

        fn names(&self) -> &[String] {
            &[]
        }

        fn summary(&self) {}
    }

    /// 三张纯色图, 亮度 0 / 100 / 200
    fn state_with_images(dir: &std::path::Path, drop_if_behind: bool) -> StreamState {
        for i in 0..3u8 {
            let v = i * 100;
            Frame::from_pixel(8, 8, Rgb([v, v, v]))
                .save(dir.join(format!("{}.png", i)))
                .unwrap();
        }
        StreamState {
            model: shared(FixedModel(vec![
                Detection::new(BBox::new(1, 1, 5, 5), 0.9, 0, "helmet"),
                Detection::new(BBox::new(2, 2, 6, 6), 0.5, 1, "no_helmet"),
            ])),
            source: SourceSpec::Images {
                dir: dir.to_path_buf(),
                looped: false,
            },
            overlay: OverlayPipeline::default(),
            jpeg_quality: 80,
            pacing: PacingPolicy {
                target_interval_ms: 0,
                drop_if_behind,
            },
        }
    }

    /// 解出消息里 JPEG 中心像素的亮度
    fn frame_shade(msg: &serde_json::Value) -> u8 {
        let jpeg = STANDARD.decode(msg["frame"].as_str().unwrap()).unwrap();
        image::load_from_memory(&jpeg).unwrap().to_rgb8().get_pixel(4, 4)[0]
    }

    #[test]
    fn test_parse_control() {
        assert_eq!(parse_control(r#"{"threshold": 0.6}"#), Some(0.6));
        assert_eq!(parse_control(r#"{"threshold": 1.5}"#), None);
        assert_eq!(parse_control(r#"{"other": 1}"#), None);
        assert_eq!(parse_control("not json"), None);
    }

    #[test]
    fn test_latest_frame_channel_keeps_newest() {
        let (mut tx, mut rx) = latest_frame_channel();
        assert!(!tx.publish("a".to_string()));
        assert!(tx.publish("b".to_string()));
        assert!(tx.publish("c".to_string()));
        drop(tx);

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            assert_eq!(rx.recv().await.as_deref(), Some("c"));
            assert_eq!(rx.recv().await, None);
        });
    }

    #[tokio::test]
    async fn test_taken_frame_is_not_counted_as_dropped() {
        let (mut tx, mut rx) = latest_frame_channel();
        assert!(!tx.publish("a".to_string()));
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert!(!tx.publish("b".to_string()));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
    }

    #[test]
    fn test_stream_frames_filters_with_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_images(dir.path(), false);
        let threshold = AtomicU32::new(0.75f32.to_bits());
        let (tx, rx) = latest_frame_channel();

        let stats = stream_frames(&state, &threshold, tx).unwrap();
        assert_eq!(stats.sent, 3);

        let msg: serde_json::Value = serde_json::from_str(&rx.latest().unwrap()).unwrap();
        let dets = msg["detections"].as_array().unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0]["label"], "helmet");
        assert!(!msg["frame"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_stream_frames_reader_ends_on_last_frame() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_images(dir.path(), true);
        let threshold = AtomicU32::new(0.75f32.to_bits());
        let (tx, mut rx) = latest_frame_channel();

        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let reader = rt.spawn(async move {
            let mut shades = Vec::new();
            while let Some(json) = rx.recv().await {
                let msg: serde_json::Value = serde_json::from_str(&json).unwrap();
                shades.push(frame_shade(&msg));
            }
            shades
        });

        let stats = stream_frames(&state, &threshold, tx).unwrap();
        let shades = rt.block_on(reader).unwrap();
        assert_eq!(stats.sent, 3);
        assert!(!shades.is_empty() && shades.len() <= 3);
        // 不管丢了几帧, 最后送到的总是最后一帧
        assert!(shades.last().unwrap().abs_diff(200) <= 4);
    }

    #[test]
    fn test_stream_frames_drops_when_sink_busy() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_images(dir.path(), true);
        let threshold = AtomicU32::new(0.0f32.to_bits());
        // 无人读取: 每一帧都覆盖上一帧, 留下的是最后一帧
        let (tx, rx) = latest_frame_channel();

        let stats = stream_frames(&state, &threshold, tx).unwrap();
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.dropped, 2);

        let msg: serde_json::Value = serde_json::from_str(&rx.latest().unwrap()).unwrap();
        assert_eq!(msg["detections"].as_array().unwrap().len(), 2);
        assert!(frame_shade(&msg).abs_diff(200) <= 4, "got shade {}", frame_shade(&msg));
    }

    #[test]
    fn test_stream_frames_stops_when_closed() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_images(dir.path(), true);
        let threshold = AtomicU32::new(0.75f32.to_bits());
        let (tx, rx) = latest_frame_channel();
        drop(rx);

        let stats = stream_frames(&state, &threshold, tx).unwrap();
        assert_eq!(stats.sent, 0);
    }
}
