// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测模型接口与实现
///
/// # 架构说明
///
/// 模型本身 (权重、训练) 不在本仓库内, 这里只负责:
/// - 加载导出的 ONNX 权重
/// - 预处理 → 推理 → 后处理 (NMS)
/// - 类别索引 → 标签名
///
/// 叠加层只依赖 [`Model`] trait, 采集循环持有具体模型.
use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;

use crate::detection::{Detection, Frame};
use crate::Result;

pub mod yolov8;

pub use yolov8::{YOLOv8, YOLOv8Config};

/// 找不到模型元数据时使用的类别表
pub const FALLBACK_NAMES: [&str; 2] = ["helmet", "no_helmet"];

/// 统一的检测模型接口
///
/// ```text
/// 原始帧 → detect → Vec<Detection> (已 NMS, 坐标为原图像素)
/// ```
pub trait Model {
    /// 对一帧做检测, 按模型输出顺序返回
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// 类别索引 → 标签名表
    fn names(&self) -> &[String];

    /// 打印模型信息
    fn summary(&self);
}

/// 采集线程之间共享的模型句柄
pub type SharedModel = Arc<Mutex<Box<dyn Model + Send>>>;

pub fn shared(model: impl Model + Send + 'static) -> SharedModel {
    Arc::new(Mutex::new(Box::new(model)))
}

/// 类别索引 → 标签名, 越界时返回 `class_<id>`
pub fn label_for(names: &[String], class_id: usize) -> String {
    names
        .get(class_id)
        .cloned()
        .unwrap_or_else(|| format!("class_{}", class_id))
}

/// `names` 元数据里的 `<id>: '<name>'` 项; 编译失败时为 None, 调用方回退到默认类别
static NAMES_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(\d+)\s*:\s*['"]([^'"]*)['"]"#).ok());

/// 解析 Ultralytics 导出的 `names` 元数据, 例如 `{0: 'helmet', 1: 'no_helmet'}`
pub fn parse_names(raw: &str) -> Vec<String> {
    let Some(re) = NAMES_RE.as_ref() else {
        return Vec::new();
    };
    let mut pairs: Vec<(usize, String)> = re
        .captures_iter(raw)
        .filter_map(|cap| {
            let id = cap[1].parse::<usize>().ok()?;
            Some((id, cap[2].to_string()))
        })
        .collect();
    pairs.sort_by_key(|(id, _)| *id);

    let len = pairs.last().map(|(id, _)| id + 1).unwrap_or(0);
    let mut names: Vec<String> = (0..len).map(|i| format!("class_{}", i)).collect();
    for (id, name) in pairs {
        names[id] = name;
    }
    names
}

/// 后处理候选框 (浮点, 原图坐标)
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
}

impl Candidate {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.) * (self.y2 - self.y1).max(0.)
    }

    pub fn intersection_area(&self, another: &Candidate) -> f32 {
        let l = self.x1.max(another.x1);
        let r = self.x2.min(another.x2);
        let t = self.y1.max(another.y1);
        let b = self.y2.min(another.y2);
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn iou(&self, another: &Candidate) -> f32 {
        let union = self.area() + another.area() - self.intersection_area(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }
}

/// 按类别做 NMS: 置信度降序, 同类 IoU 超过阈值的框被丢弃
pub fn non_max_suppression(xs: &mut Vec<Candidate>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].class_id != xs[index].class_id {
                continue;
            }
            if xs[prev_index].iou(&xs[index]) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: usize) -> Candidate {
        Candidate {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id,
        }
    }

    #[test]
    fn test_parse_names() {
        let names = parse_names("{0: 'helmet', 1: 'no_helmet'}");
        assert_eq!(names, vec!["helmet".to_string(), "no_helmet".to_string()]);
    }

    #[test]
    fn test_parse_names_gaps_and_order() {
        let names = parse_names(r#"{2: "vest", 0: "helmet"}"#);
        assert_eq!(names, vec!["helmet", "class_1", "vest"]);
        assert!(parse_names("").is_empty());
    }

    #[test]
    fn test_parse_names_reuses_pattern() {
        assert!(NAMES_RE.is_some());
        let first = parse_names("{0: 'helmet'}");
        let again = parse_names("{0: 'helmet'}");
        assert_eq!(first, again);
    }

    #[test]
    fn test_label_for() {
        let names = vec!["helmet".to_string()];
        assert_eq!(label_for(&names, 0), "helmet");
        assert_eq!(label_for(&names, 3), "class_3");
    }

    #[test]
    fn test_iou() {
        let a = cand(0., 0., 10., 10., 0.9, 0);
        let b = cand(5., 0., 15., 10., 0.8, 0);
        assert!((a.iou(&b) - 50. / 150.).abs() < 1e-6);
        assert_eq!(a.iou(&cand(20., 20., 30., 30., 0.5, 0)), 0.);
    }

    #[test]
    fn test_nms_same_class() {
        let mut xs = vec![
            cand(0., 0., 10., 10., 0.6, 0),
            cand(1., 1., 10., 10., 0.9, 0),
            cand(50., 50., 60., 60., 0.7, 0),
        ];
        non_max_suppression(&mut xs, 0.45);
        assert_eq!(xs.len(), 2);
        assert_eq!(xs[0].confidence, 0.9);
        assert_eq!(xs[1].confidence, 0.7);
    }

    #[test]
    fn test_nms_keeps_other_class() {
        let mut xs = vec![
            cand(0., 0., 10., 10., 0.9, 0),
            cand(0., 0., 10., 10., 0.8, 1),
        ];
        non_max_suppression(&mut xs, 0.45);
        assert_eq!(xs.len(), 2);
    }
}
