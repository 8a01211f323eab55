// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 远程推流 (Network Sink)
///
/// - pacing: 帧节拍 / 落后丢帧策略
/// - encode: JPEG + base64 + JSON 消息
/// - server: axum WebSocket `/ws`
pub mod encode;
pub mod pacing;
pub mod server;

pub use encode::{build_payload, encode_frame_base64, encode_jpeg};
pub use pacing::{Pacer, PacingPolicy};
pub use server::{
    latest_frame_channel, parse_control, router, serve, stream_frames, LatestFrame, LatestFrameRx,
    StreamState, StreamStats,
};
