// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 帧编码: RGB → JPEG → base64, 组装推流消息

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;

use crate::detection::{DetectionRecord, Frame, FramePayload};
use crate::Result;

pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    frame.write_with_encoder(encoder)?;
    Ok(buf)
}

pub fn encode_frame_base64(frame: &Frame, quality: u8) -> Result<String> {
    Ok(STANDARD.encode(encode_jpeg(frame, quality)?))
}

/// `{"frame": <base64 JPEG>, "detections": [...]}`
pub fn build_payload(frame: &Frame, detections: Vec<DetectionRecord>, quality: u8) -> Result<String> {
    let payload = FramePayload {
        frame: encode_frame_base64(frame, quality)?,
        detections,
    };
    Ok(serde_json::to_string(&payload)?)
}
