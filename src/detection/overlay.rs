// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测叠加层 (Detection Overlay Pipeline)
//!
//! 原始检测 → 置信度过滤 → {绘制到帧上 | 结构化报告}
//!
//! 两条输出路径共用同一个过滤规则, 阈值由 [`OverlayPipeline`] 统一持有.
//! 本模块无状态, 无 I/O, 每帧调用一次.

use std::sync::LazyLock;

use ab_glyph::{FontArc, FontVec, PxScale};
use image::Rgb;
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use tracing::warn;

use super::types::{BBox, Detection, DetectionRecord, Frame, DEFAULT_CONF_THRESHOLD, POSITIVE_LABEL};

/// 标签文字与检测框上边缘的间距 (像素)
pub const LABEL_GAP: i32 = 10;

/// 框上方放不下标签时, 标签在框内的下移量
pub const LABEL_INSET: i32 = 2;

pub const SAFE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const ALERT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// 内置标签字体 (DejaVu Sans, 许可见 assets/DejaVuSans-LICENSE.txt)
static DEFAULT_FONT_BYTES: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

static DEFAULT_FONT: LazyLock<Option<FontArc>> =
    LazyLock::new(|| match FontArc::try_from_slice(DEFAULT_FONT_BYTES) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!("⚠️ 内置字体无法解析, 标签文字将不绘制: {}", e);
            None
        }
    });

/// 内置标签字体
pub fn default_font() -> Option<FontArc> {
    DEFAULT_FONT.clone()
}

/// 置信度过滤: 保留 `confidence >= threshold` 的检测, 保持原有顺序
pub fn filter(detections: &[Detection], threshold: f32) -> Vec<Detection> {
    detections
        .iter()
        .filter(|det| det.confidence() >= threshold)
        .cloned()
        .collect()
}

/// 标签 → 颜色 (默认配色: helmet 为绿色, 其余一律红色)
pub fn classify_color(label: &str) -> Rgb<u8> {
    Palette::default().classify(label)
}

/// 标签文字, 例如 `helmet 0.90`
pub fn label_text(det: &Detection) -> String {
    format!("{} {:.2}", det.label(), det.confidence())
}

/// 检测 → 推流记录 (不再过滤, 调用方需先 [`filter`])
pub fn to_report(detections: &[Detection]) -> Vec<DetectionRecord> {
    detections.iter().map(DetectionRecord::from).collect()
}

/// 计算标签左上角坐标
///
/// 默认放在框左上角上方 `LABEL_GAP` 处; 上方空间不够时移到框内,
/// 最后整体夹在帧范围内.
pub fn label_anchor(bbox: &BBox, text_wh: (u32, u32), frame_wh: (u32, u32)) -> (i32, i32) {
    let (tw, th) = (text_wh.0 as i32, text_wh.1 as i32);
    let (fw, fh) = (frame_wh.0 as i32, frame_wh.1 as i32);

    let mut y = bbox.y1 - LABEL_GAP - th;
    if y < 0 {
        y = bbox.y1 + LABEL_INSET;
    }

    let x = bbox.x1.clamp(0, (fw - tw).max(0));
    let y = y.clamp(0, (fh - th).max(0));
    (x, y)
}

/// 二值配色: 合规标签用安全色, 其他所有标签 (包括未知标签) 用告警色
#[derive(Clone, Debug, PartialEq)]
pub struct Palette {
    pub positive_label: String,
    pub safe: Rgb<u8>,
    pub alert: Rgb<u8>,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            positive_label: POSITIVE_LABEL.to_string(),
            safe: SAFE_COLOR,
            alert: ALERT_COLOR,
        }
    }
}

impl Palette {
    pub fn with_positive_label(label: impl Into<String>) -> Self {
        Self {
            positive_label: label.into(),
            ..Default::default()
        }
    }

    pub fn is_positive(&self, label: &str) -> bool {
        label == self.positive_label
    }

    pub fn classify(&self, label: &str) -> Rgb<u8> {
        if self.is_positive(label) {
            self.safe
        } else {
            self.alert
        }
    }
}

/// 绘制参数
#[derive(Clone)]
pub struct OverlayStyle {
    pub palette: Palette,
    /// 标签字体, 默认内置字体; `None` 时只画框
    pub font: Option<FontArc>,
    pub text_scale: f32,
    pub thickness: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            palette: Palette::default(),
            font: default_font(),
            text_scale: 20.0,
            thickness: 2,
        }
    }
}

impl OverlayStyle {
    /// 只画框, 不画标签文字
    pub fn boxes_only() -> Self {
        Self {
            font: None,
            ..Default::default()
        }
    }

    /// 从 ttf/otf/ttc 文件加载标签字体 (ttc 取第 0 个字体)
    pub fn load_font(path: &std::path::Path) -> crate::Result<FontArc> {
        let bytes = std::fs::read(path)?;
        let font = FontVec::try_from_vec_and_index(bytes, 0).map_err(|e| {
            crate::Error::Config(format!("字体文件无效 {}: {}", path.display(), e))
        })?;
        Ok(FontArc::new(font))
    }

    /// 标签文字的位置和尺寸 `(x, y, w, h)`; 没有字体时为 `None`
    pub fn label_box(&self, det: &Detection, frame_wh: (u32, u32)) -> Option<(i32, i32, u32, u32)> {
        let font = self.font.as_ref()?;
        let text_wh = text_size(PxScale::from(self.text_scale), font, &label_text(det));
        let (x, y) = label_anchor(det.bbox(), text_wh, frame_wh);
        Some((x, y, text_wh.0, text_wh.1))
    }
}

/// 在帧上原地绘制检测框和标签, 返回同一帧
///
/// 按输入顺序绘制, 后画的框覆盖先画的. 不改变帧尺寸, 越界部分由 imageproc 裁剪.
pub fn render<'a>(frame: &'a mut Frame, detections: &[Detection], style: &OverlayStyle) -> &'a mut Frame {
    let frame_wh = frame.dimensions();

    for det in detections {
        let color = style.palette.classify(det.label());
        let bbox = det.bbox();

        for t in 0..style.thickness as i32 {
            let w = (bbox.width() + 1 - 2 * t).max(1) as u32;
            let h = (bbox.height() + 1 - 2 * t).max(1) as u32;
            let rect = Rect::at(bbox.x1 + t, bbox.y1 + t).of_size(w, h);
            draw_hollow_rect_mut(frame, rect, color);
        }

        if let (Some(font), Some((x, y, _, _))) = (style.font.as_ref(), style.label_box(det, frame_wh)) {
            let scale = PxScale::from(style.text_scale);
            draw_text_mut(frame, color, x, y, scale, font, &label_text(det));
        }
    }

    frame
}

/// 叠加层流水线: 本地显示和远程推流都经过这里, 保证两边阈值一致
#[derive(Clone)]
pub struct OverlayPipeline {
    threshold: f32,
    style: OverlayStyle,
}

impl Default for OverlayPipeline {
    fn default() -> Self {
        Self::new(DEFAULT_CONF_THRESHOLD, OverlayStyle::default())
    }
}

impl OverlayPipeline {
    pub fn new(threshold: f32, style: OverlayStyle) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            style,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    pub fn filter(&self, raw: &[Detection]) -> Vec<Detection> {
        filter(raw, self.threshold)
    }

    /// 本地显示路径
    pub fn annotate<'a>(&self, frame: &'a mut Frame, raw: &[Detection]) -> &'a mut Frame {
        let kept = self.filter(raw);
        render(frame, &kept, &self.style)
    }

    /// 远程推流路径
    pub fn report(&self, raw: &[Detection]) -> Vec<DetectionRecord> {
        to_report(&self.filter(raw))
    }

    /// 过阈值的检测中是否有合规标签
    pub fn is_compliant(&self, raw: &[Detection]) -> bool {
        raw.iter()
            .any(|det| det.confidence() >= self.threshold && self.style.palette.is_positive(det.label()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn det(bbox: [i32; 4], conf: f32, label: &str) -> Detection {
        Detection::new(BBox::new(bbox[0], bbox[1], bbox[2], bbox[3]), conf, 0, label)
    }

    fn scenario() -> Vec<Detection> {
        vec![
            det([10, 10, 50, 50], 0.9, "helmet"),
            det([60, 60, 90, 90], 0.5, "no_helmet"),
        ]
    }

    #[test]
    fn test_filter_keeps_confident() {
        let kept = filter(&scenario(), 0.75);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].label(), "helmet");
    }

    #[test]
    fn test_filter_bounds() {
        let dets = scenario();
        assert_eq!(filter(&dets, 0.0), dets);
        assert!(filter(&dets, 1.0001).is_empty());
        assert!(filter(&[], 0.75).is_empty());
    }

    #[test]
    fn test_filter_inclusive() {
        let dets = vec![det([0, 0, 5, 5], 0.75, "helmet")];
        assert_eq!(filter(&dets, 0.75).len(), 1);
    }

    #[test]
    fn test_classify_color() {
        assert_eq!(classify_color("helmet"), SAFE_COLOR);
        assert_eq!(classify_color("no_helmet"), ALERT_COLOR);
        assert_eq!(classify_color("unknown_object"), ALERT_COLOR);
        assert_eq!(classify_color(""), ALERT_COLOR);
        assert_eq!(classify_color("Helmet"), ALERT_COLOR);
    }

    #[test]
    fn test_custom_palette() {
        let palette = Palette::with_positive_label("hardhat");
        assert_eq!(palette.classify("hardhat"), SAFE_COLOR);
        assert_eq!(palette.classify("helmet"), ALERT_COLOR);
    }

    #[test]
    fn test_label_text() {
        assert_eq!(label_text(&det([10, 10, 50, 50], 0.9, "helmet")), "helmet 0.90");
        assert_eq!(label_text(&det([0, 0, 1, 1], 0.456, "no_helmet")), "no_helmet 0.46");
    }

    #[test]
    fn test_render_scenario() {
        let mut frame = Frame::new(100, 100);
        let pipeline = OverlayPipeline::new(DEFAULT_CONF_THRESHOLD, OverlayStyle::boxes_only());
        pipeline.annotate(&mut frame, &scenario());

        assert_eq!(frame.dimensions(), (100, 100));
        // 第一个框: 绿色, 包含右下角
        assert_eq!(*frame.get_pixel(10, 10), SAFE_COLOR);
        assert_eq!(*frame.get_pixel(30, 10), SAFE_COLOR);
        assert_eq!(*frame.get_pixel(50, 50), SAFE_COLOR);
        assert_eq!(*frame.get_pixel(11, 30), SAFE_COLOR);
        // 框内部不填充
        assert_eq!(*frame.get_pixel(30, 30), Rgb([0, 0, 0]));
        // 第二个框被过滤掉
        assert_eq!(*frame.get_pixel(60, 60), Rgb([0, 0, 0]));
        assert_eq!(*frame.get_pixel(75, 90), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_render_empty_is_noop() {
        let mut frame = Frame::from_pixel(32, 24, Rgb([7, 8, 9]));
        let before = frame.clone();
        render(&mut frame, &[], &OverlayStyle::default());
        assert_eq!(frame, before);
    }

    #[test]
    fn test_render_later_box_on_top() {
        let mut frame = Frame::new(40, 40);
        let dets = vec![
            det([5, 5, 20, 20], 0.9, "no_helmet"),
            det([5, 5, 30, 30], 0.9, "helmet"),
        ];
        render(&mut frame, &dets, &OverlayStyle::boxes_only());
        assert_eq!(*frame.get_pixel(5, 5), SAFE_COLOR);
        assert_eq!(*frame.get_pixel(20, 12), ALERT_COLOR);
    }

    #[test]
    fn test_render_out_of_bounds_box() {
        let mut frame = Frame::new(20, 20);
        render(&mut frame, &[det([-5, -5, 40, 40], 0.9, "helmet")], &OverlayStyle::default());
        assert_eq!(frame.dimensions(), (20, 20));
    }

    /// 框描边 (含线宽) 以外、值非零的像素
    fn pixels_off_outline(frame: &Frame, bbox: &BBox, thickness: i32) -> Vec<(i32, i32, Rgb<u8>)> {
        frame
            .enumerate_pixels()
            .filter(|(_, _, p)| **p != Rgb([0, 0, 0]))
            .map(|(x, y, p)| (x as i32, y as i32, *p))
            .filter(|&(x, y, _)| {
                let outer = x >= bbox.x1 && x <= bbox.x2 && y >= bbox.y1 && y <= bbox.y2;
                let inner = x >= bbox.x1 + thickness
                    && x <= bbox.x2 - thickness
                    && y >= bbox.y1 + thickness
                    && y <= bbox.y2 - thickness;
                !outer || inner
            })
            .collect()
    }

    /// 字形按基线排版, 实际像素会比 `text_size` 的高度略向下延伸
    fn in_label_area((x, y): (i32, i32), (lx, ly, lw, lh): (i32, i32, u32, u32)) -> bool {
        x >= lx - 1 && x <= lx + lw as i32 + 1 && y >= ly - 1 && y <= ly + lh as i32 + 8
    }

    #[test]
    fn test_default_style_has_font() {
        assert!(default_font().is_some());
        assert!(OverlayStyle::default().font.is_some());
        assert!(OverlayStyle::boxes_only().font.is_none());
    }

    #[test]
    fn test_render_draws_label_above_box() {
        let mut frame = Frame::new(160, 120);
        let style = OverlayStyle::default();
        let helmet = det([10, 60, 50, 100], 0.9, "helmet");
        let label = style.label_box(&helmet, frame.dimensions()).unwrap();
        assert!(label.1 + (label.3 as i32) < 60);

        render(&mut frame, std::slice::from_ref(&helmet), &style);
        assert_eq!(frame.dimensions(), (160, 120));

        let text = pixels_off_outline(&frame, helmet.bbox(), 2);
        assert!(text.iter().any(|&(_, y, _)| y < 60), "no label pixels above the box");
        for &(x, y, p) in &text {
            assert!(in_label_area((x, y), label), "stray pixel at ({x}, {y})");
            // 黑底上的绿色文字: 只有 G 通道
            assert_eq!((p[0], p[2]), (0, 0));
        }
    }

    #[test]
    fn test_render_label_moves_inside_at_top_edge() {
        let mut frame = Frame::new(240, 100);
        let style = OverlayStyle::default();
        let head = det([20, 0, 200, 60], 0.8, "no_helmet");
        let label = style.label_box(&head, frame.dimensions()).unwrap();
        assert_eq!((label.0, label.1), (20, LABEL_INSET));

        render(&mut frame, std::slice::from_ref(&head), &style);
        let text = pixels_off_outline(&frame, head.bbox(), 2);
        assert!(!text.is_empty());
        for &(x, y, p) in &text {
            assert!(x > 21 && x < 199 && y > 1 && y < 59, "label pixel outside the box at ({x}, {y})");
            assert_eq!((p[1], p[2]), (0, 0));
        }
    }

    #[test]
    fn test_report_unfiltered_and_filtered() {
        let dets = scenario();
        assert_eq!(to_report(&dets).len(), 2);
        assert!(to_report(&[]).is_empty());

        let report = OverlayPipeline::default().report(&dets);
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].bbox, [10, 10, 50, 50]);
        assert_eq!(report[0].label, "helmet");
    }

    #[test]
    fn test_unknown_label_included() {
        let dets = vec![det([0, 0, 10, 10], 0.8, "unknown_object")];
        let kept = filter(&dets, 0.75);
        assert_eq!(kept.len(), 1);
        assert_eq!(classify_color(kept[0].label()), ALERT_COLOR);
    }

    #[test]
    fn test_compliance() {
        let pipeline = OverlayPipeline::default();
        assert!(pipeline.is_compliant(&scenario()));
        assert!(!pipeline.is_compliant(&[det([0, 0, 9, 9], 0.6, "helmet")]));
        assert!(!pipeline.is_compliant(&[]));
    }

    #[test]
    fn test_threshold_clamped() {
        let mut pipeline = OverlayPipeline::new(1.5, OverlayStyle::default());
        assert_eq!(pipeline.threshold(), 1.0);
        pipeline.set_threshold(-0.2);
        assert_eq!(pipeline.threshold(), 0.0);
    }

    #[test]
    fn test_label_anchor_above_box() {
        assert_eq!(label_anchor(&BBox::new(10, 50, 40, 80), (30, 12), (100, 100)), (10, 28));
    }

    #[test]
    fn test_label_anchor_moves_inside_at_top() {
        assert_eq!(label_anchor(&BBox::new(10, 5, 40, 30), (30, 12), (100, 100)), (10, 7));
    }

    #[test]
    fn test_label_anchor_clamps_right_edge() {
        assert_eq!(label_anchor(&BBox::new(90, 50, 99, 60), (30, 12), (100, 100)), (70, 28));
    }

    proptest! {
        #[test]
        fn prop_filter_subsequence(
            confs in proptest::collection::vec(0.0f32..=1.0, 0..32),
            t in 0.0f32..=1.0,
        ) {
            let dets: Vec<Detection> = confs
                .iter()
                .enumerate()
                .map(|(i, &c)| Detection::new(BBox::new(0, 0, 1, 1), c, i, "helmet"))
                .collect();
            let kept = filter(&dets, t);
            let expected: Vec<Detection> = dets.iter().filter(|d| d.confidence() >= t).cloned().collect();

            prop_assert!(kept.len() <= dets.len());
            prop_assert_eq!(&kept, &expected);
            prop_assert!(kept.windows(2).all(|w| w[0].class_id() < w[1].class_id()));
        }

        #[test]
        fn prop_label_anchor_inside_frame(
            x1 in -200i32..400, y1 in -200i32..400,
            tw in 1u32..300, th in 1u32..60,
            fw in 1u32..320, fh in 1u32..240,
        ) {
            let bbox = BBox::new(x1, y1, x1 + 10, y1 + 10);
            let (x, y) = label_anchor(&bbox, (tw, th), (fw, fh));
            prop_assert!(x >= 0 && x < fw as i32);
            prop_assert!(y >= 0 && y < fh as i32);
            if tw <= fw {
                prop_assert!(x + tw as i32 <= fw as i32);
            }
            if th <= fh {
                prop_assert!(y + th as i32 <= fh as i32);
            }
        }
    }
}
