// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测叠加系统 (Detection Overlay System)
///
/// - types:   检测框 / 检测结果 / 推流记录
/// - overlay: 置信度过滤、二值配色、绘制与报告
pub mod overlay;
pub mod types;

pub use overlay::{
    classify_color, default_font, filter, label_anchor, label_text, render, to_report, OverlayPipeline,
    OverlayStyle, Palette, ALERT_COLOR, SAFE_COLOR,
};
pub use types::{
    BBox, Detection, DetectionRecord, Frame, FramePayload, DEFAULT_CONF_THRESHOLD, POSITIVE_LABEL,
};
