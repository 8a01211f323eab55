// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// FFmpeg解码过滤器模块
/// FFmpeg decode filter: camera frame (YUV420P) → RGB `Frame` → channel
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame as AvFrame};
use tracing::{debug, info, warn};

use crate::detection::Frame;

/// 单边最大分辨率
const MAX_SIDE: u32 = 4096;

#[derive(Clone)]
pub struct DecodeFilter {
    tx: Sender<Frame>,
    rx: Receiver<Frame>, // 同一通道的接收端, 队列满时用来挤掉最旧的帧
    stop: Arc<AtomicBool>,
    count: usize,
    last: Instant,
    pub current_fps: f64,
    pub dropped_frames: usize, // 丢弃的帧数 (损坏或消费端来不及)
    pub total_frames: usize,
}

impl DecodeFilter {
    pub fn new(tx: Sender<Frame>, rx: Receiver<Frame>, stop: Arc<AtomicBool>) -> Self {
        Self {
            tx,
            rx,
            stop,
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
            dropped_frames: 0,
            total_frames: 0,
        }
    }

    fn drop_frame(&mut self, reason: &str) {
        self.dropped_frames += 1;
        if self.total_frames <= 10 {
            warn!("⚠️ 丢弃帧 #{}: {}", self.total_frames, reason);
        }
    }

    fn update_stats(&mut self) {
        self.count += 1;
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            self.current_fps = self.count as f64 / elapsed;
            let drop_rate = self.dropped_frames as f64 / self.total_frames.max(1) as f64 * 100.0;
            debug!(
                "📺 采集统计: {:.1}fps | 总帧{} | 丢弃{} ({:.1}%)",
                self.current_fps, self.total_frames, self.dropped_frames, drop_rate
            );
            self.last = Instant::now();
            self.count = 0;
        }
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: AvFrame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<AvFrame>, String> {
        if self.stop.load(Ordering::Relaxed) {
            return Err("capture stopped".to_string());
        }
        self.total_frames += 1;

        let rgb = unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                self.drop_frame("空帧/损坏帧");
                return Ok(None);
            }

            let raw = &*frame.as_ptr();
            let (w, h) = (raw.width as u32, raw.height as u32);
            if w == 0 || h == 0 || w > MAX_SIDE || h > MAX_SIDE {
                self.drop_frame(&format!("非法分辨率 {}x{}", w, h));
                return Ok(None);
            }

            let (y_plane, u_plane, v_plane) = (raw.data[0], raw.data[1], raw.data[2]);
            let y_stride = raw.linesize[0] as usize;
            let uv_stride = raw.linesize[1] as usize;
            if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
                self.drop_frame("YUV指针为空");
                return Ok(None);
            }
            if y_stride < w as usize || uv_stride < (w as usize).div_ceil(2) {
                self.drop_frame(&format!("步长异常 y_stride={} uv_stride={}", y_stride, uv_stride));
                return Ok(None);
            }

            let chroma_rows = (h as usize).div_ceil(2);
            let y = std::slice::from_raw_parts(y_plane, y_stride * h as usize);
            let u = std::slice::from_raw_parts(u_plane, uv_stride * chroma_rows);
            let v = std::slice::from_raw_parts(v_plane, uv_stride * chroma_rows);
            yuv420p_to_rgb(y, u, v, y_stride, uv_stride, w, h)
        };

        self.update_stats();

        self.dropped_frames += push_latest(&self.tx, &self.rx, rgb);

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        info!("✅ 解码线程退出 (总帧{}, 丢弃{})", self.total_frames, self.dropped_frames);
    }
}

/// 送入最新一帧; 队列满时丢掉最旧的帧给它腾位置. 返回丢掉的帧数.
pub fn push_latest(tx: &Sender<Frame>, rx: &Receiver<Frame>, frame: Frame) -> usize {
    let mut frame = frame;
    let mut evicted = 0;
    loop {
        match tx.try_send(frame) {
            Ok(()) => return evicted,
            Err(TrySendError::Full(back)) => {
                // 消费端落后: 挤掉队头, 新帧重新排队
                if rx.try_recv().is_ok() {
                    evicted += 1;
                }
                frame = back;
            }
            // filter 自己持有接收端, 不会走到这里
            Err(TrySendError::Disconnected(_)) => return evicted,
        }
    }
}

/// YUV420P → RGB (BT.601, 定点系数 ×128)
pub fn yuv420p_to_rgb(
    y_plane: &[u8],
    u_plane: &[u8],
    v_plane: &[u8],
    y_stride: usize,
    uv_stride: usize,
    width: u32,
    height: u32,
) -> Frame {
    let (width_us, height_us) = (width as usize, height as usize);
    let mut buffer = vec![0u8; width_us * height_us * 3];
    let mut out_idx = 0;
    for y in 0..height_us {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;

        for x in 0..width_us {
            let y_val = y_plane[y_row + x] as i32;
            let u_val = u_plane[uv_row + (x >> 1)] as i32 - 128;
            let v_val = v_plane[uv_row + (x >> 1)] as i32 - 128;

            buffer[out_idx] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 1] =
                (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
            out_idx += 3;
        }
    }

    Frame::from_raw(width, height, buffer).unwrap_or_else(|| Frame::new(width, height))
}
