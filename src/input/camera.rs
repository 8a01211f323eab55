// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 摄像头输入模块
//!
//! 处理本地摄像头输入,支持 DirectShow(Windows) / AVFoundation(macOS) / V4L2(Linux).
//! 解码在独立线程中进行, 通过容量为 2 的通道交给采集循环; 消费端来不及时丢帧.
//! `CameraSource` 被 drop 时通知解码线程退出并等待其释放设备.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::decode_filter::DecodeFilter;
use super::FrameSource;
use crate::detection::Frame;
use crate::{Error, Result};

/// 帧队列长度: 只保留最新的少量帧
const FRAME_QUEUE: usize = 2;
const MAX_RETRIES: usize = 3;

/// 摄像头参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device_index: usize,
    /// Windows (dshow) 需要设备名; 为空时按索引查询
    pub device_name: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// 等待一帧的最长时间
    pub frame_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            device_name: None,
            width: 1280,
            height: 720,
            fps: 30,
            frame_timeout_ms: 5000,
        }
    }
}

/// 摄像头帧来源
pub struct CameraSource {
    rx: Receiver<Frame>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl CameraSource {
    /// 打开摄像头, 解码线程启动成功后才返回
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let device_name = match &config.device_name {
            Some(name) => name.clone(),
            None => get_camera_devices()
                .into_iter()
                .find(|(index, _)| *index == config.device_index)
                .map(|(_, name)| name)
                .unwrap_or_default(),
        };
        let camera_url = format_camera_url(config.device_index, &device_name);
        info!("📷 打开摄像头 #{} ({}) → {}", config.device_index, device_name, camera_url);

        let (tx, rx) = crossbeam_channel::bounded(FRAME_QUEUE);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<std::result::Result<(), String>>(1);
        let stop = Arc::new(AtomicBool::new(false));

        let filter = DecodeFilter::new(tx, rx.clone(), stop.clone());
        let (width, height, fps) = (config.width, config.height, config.fps);
        let worker = std::thread::Builder::new()
            .name("camera-decode".to_string())
            .spawn(move || decode_camera(&camera_url, width, height, fps, filter, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(Error::Capture(e));
            }
            Err(_) => {
                let _ = worker.join();
                return Err(Error::Capture("解码线程异常退出".to_string()));
            }
        }

        Ok(Self {
            rx,
            stop,
            worker: Some(worker),
            timeout: Duration::from_millis(config.frame_timeout_ms),
        })
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.rx.recv_timeout(self.timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
            Err(RecvTimeoutError::Timeout) => Err(Error::Capture(format!(
                "{:?} 内没有收到摄像头帧",
                self.timeout
            ))),
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("❌ 摄像头解码线程 panic");
            }
        }
        info!("📷 摄像头已释放");
    }
}

/// 格式化摄像头URL - 根据平台选择
fn format_camera_url(index: usize, name: &str) -> String {
    #[cfg(target_os = "windows")]
    {
        let _ = index;
        format!("video={}", name)
    }
    #[cfg(target_os = "linux")]
    {
        let _ = name;
        format!("/dev/video{}", index)
    }
    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        let _ = name;
        format!("{}", index)
    }
}

/// 平台对应的 ffmpeg 输入格式
fn camera_format() -> &'static str {
    #[cfg(target_os = "windows")]
    let format = "dshow"; // DirectShow

    #[cfg(target_os = "macos")]
    let format = "avfoundation"; // AVFoundation

    #[cfg(target_os = "linux")]
    let format = "v4l2"; // Video4Linux2

    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    let format = "video4linux2";

    format
}

/// 摄像头解码实现 (在解码线程中运行, 直到摄像头断开或收到停止信号)
fn decode_camera(
    camera_input: &str,
    width: u32,
    height: u32,
    fps: u32,
    filter: DecodeFilter,
    ready: crossbeam_channel::Sender<std::result::Result<(), String>>,
) {
    let format = camera_format();
    let mut retry_count = 0;

    loop {
        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("decode", Box::new(filter.clone()));
        let out = create_null_output().add_frame_pipeline(pipe);

        let input = Input::new(camera_input).set_format(format).set_input_opts(
            [
                ("framerate".to_string(), fps.to_string()),
                ("video_size".to_string(), format!("{}x{}", width, height)),
            ]
            .into(),
        );

        // 统一转成 YUV420P 交给 DecodeFilter
        let ctx_result = FfmpegContext::builder()
            .input(input)
            .filter_desc("format=yuv420p")
            .output(out)
            .build();

        let ctx = match ctx_result {
            Ok(c) => c,
            Err(e) => {
                retry_count += 1;
                if retry_count >= MAX_RETRIES {
                    let _ = ready.send(Err(format!(
                        "摄像头构建失败 (重试{}次): {}",
                        MAX_RETRIES, e
                    )));
                    return;
                }
                warn!(
                    "⚠️ 摄像头忙或无法打开, 1秒后重试... ({}/{}): {}",
                    retry_count, MAX_RETRIES, e
                );
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }
        };

        let sch = match ctx.start() {
            Ok(s) => s,
            Err(e) => {
                let _ = ready.send(Err(format!("摄像头启动失败: {}", e)));
                return;
            }
        };

        info!("✅ 摄像头连接成功,开始解码!");
        let _ = ready.send(Ok(()));

        let _ = sch.wait();
        info!("📹 摄像头解码循环结束");
        return;
    }
}

/// 获取可用的摄像头设备列表
pub fn get_camera_devices() -> Vec<(usize, String)> {
    match ez_ffmpeg::device::get_input_video_devices() {
        Ok(devices) => devices.into_iter().enumerate().collect(),
        Err(e) => {
            warn!("⚠️ 获取摄像头列表失败: {}", e);
            vec![]
        }
    }
}
